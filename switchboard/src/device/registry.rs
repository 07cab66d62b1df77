//! Process-wide registry of device descriptors.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;

use super::descriptor::DeviceDescriptor;
use crate::error::{Error, Result};

static REGISTRY: Lazy<RwLock<DescriptorRegistry>> =
    Lazy::new(|| RwLock::new(DescriptorRegistry::new()));

/// Descriptors by device model name.
#[derive(Debug, Default)]
pub struct DescriptorRegistry {
    descriptors: HashMap<String, DeviceDescriptor>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the global registry.
    pub fn global() -> &'static RwLock<DescriptorRegistry> {
        &REGISTRY
    }

    /// Look up a descriptor in the global registry.
    pub fn lookup(name: &str) -> Option<DeviceDescriptor> {
        Self::global()
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Register a descriptor. Names are unique.
    pub fn register(&mut self, descriptor: DeviceDescriptor) -> Result<()> {
        if self.descriptors.contains_key(&descriptor.name) {
            return Err(Error::InvalidArgument {
                device: descriptor.name.clone(),
                message: "device descriptor already registered".to_string(),
            });
        }
        descriptor.validate()?;
        self.descriptors.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.descriptors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    /// Registered model names.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.descriptors.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = DescriptorRegistry::new();
        registry
            .register(DeviceDescriptor::new("esp32").with_command("reset", "reboot"))
            .unwrap();
        assert!(registry.contains("esp32"));
        assert!(registry.register(DeviceDescriptor::new("esp32")).is_err());
        assert_eq!(registry.names().count(), 1);
    }

    #[test]
    fn test_global_registry() {
        DescriptorRegistry::global()
            .write()
            .unwrap()
            .register(DeviceDescriptor::new("registry-test-model").with_regex("prompt", "> "))
            .unwrap();
        let found = DescriptorRegistry::lookup("registry-test-model").unwrap();
        assert_eq!(found.regex("prompt"), Some("> "));
        assert!(DescriptorRegistry::lookup("not-registered").is_none());
    }
}
