//! Device descriptor: the commands, response patterns and timeouts a device
//! model needs, as data.

use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::channel::compile_pattern;
use crate::error::{Error, Result};

/// Category of a device property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// Fixed for the life of the device (model, serial number).
    Persistent,
    /// Read from the device on every access (firmware version, uptime).
    Dynamic,
    /// Persistent, but may be absent for some models.
    Optional,
    /// A feature set the device exposes.
    Capability,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PropertyKind::Persistent => "persistent",
            PropertyKind::Dynamic => "dynamic",
            PropertyKind::Optional => "optional",
            PropertyKind::Capability => "capability",
        })
    }
}

/// A named property and its category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    pub kind: PropertyKind,
    #[serde(default)]
    pub description: Option<String>,
}

impl PropertySpec {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
        }
    }
}

/// What a switchboard needs to know about a device model.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use switchboard::device::{DeviceDescriptor, PropertyKind, PropertySpec};
///
/// let descriptor = DeviceDescriptor::new("raspberrypi")
///     .with_command("reboot", "sudo reboot")
///     .with_regex("prompt", r"pi@\S+:~\$ ")
///     .with_timeout("reboot", Duration::from_secs(120))
///     .with_property(PropertySpec::new("firmware_version", PropertyKind::Dynamic));
///
/// assert_eq!(descriptor.command("reboot"), Some("sudo reboot"));
/// assert_eq!(descriptor.properties_of(PropertyKind::Dynamic).count(), 1);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceDescriptor {
    /// Device model name.
    pub name: String,

    /// Named shell commands.
    #[serde(default)]
    pub commands: IndexMap<String, String>,

    /// Named response patterns.
    #[serde(default)]
    pub regexes: IndexMap<String, String>,

    /// Named timeouts, written as fractional seconds.
    #[serde(default, deserialize_with = "timeouts_secs")]
    pub timeouts: IndexMap<String, Duration>,

    #[serde(default)]
    pub properties: Vec<PropertySpec>,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parse a descriptor document and check its patterns compile.
    pub fn from_json(text: &str) -> Result<Self> {
        let descriptor: Self = serde_json::from_str(text).map_err(|e| Error::InvalidArgument {
            device: "descriptor".into(),
            message: format!("invalid device descriptor: {}", e),
        })?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn with_command(mut self, name: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.insert(name.into(), command.into());
        self
    }

    pub fn with_regex(mut self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.regexes.insert(name.into(), pattern.into());
        self
    }

    pub fn with_timeout(mut self, name: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(name.into(), timeout);
        self
    }

    pub fn with_property(mut self, property: PropertySpec) -> Self {
        self.properties.push(property);
        self
    }

    pub fn command(&self, name: &str) -> Option<&str> {
        self.commands.get(name).map(String::as_str)
    }

    pub fn regex(&self, name: &str) -> Option<&str> {
        self.regexes.get(name).map(String::as_str)
    }

    pub fn timeout(&self, name: &str) -> Option<Duration> {
        self.timeouts.get(name).copied()
    }

    /// Properties of one category, in declaration order.
    pub fn properties_of(&self, kind: PropertyKind) -> impl Iterator<Item = &PropertySpec> {
        self.properties.iter().filter(move |p| p.kind == kind)
    }

    /// Look up the property with `name`.
    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Check that every named regex compiles.
    pub fn validate(&self) -> Result<()> {
        for (name, pattern) in &self.regexes {
            compile_pattern(pattern).map_err(|e| Error::InvalidArgument {
                device: self.name.clone(),
                message: format!("regex {} ({:?}) does not compile: {}", name, pattern, e),
            })?;
        }
        Ok(())
    }

    /// Resolve a command, its response patterns and its timeout by name.
    ///
    /// `timeout_name` may be absent from the descriptor, in which case the
    /// returned timeout is `None`.
    pub fn resolve(
        &self,
        command_name: &str,
        regex_names: &[&str],
        timeout_name: Option<&str>,
    ) -> Result<(String, Vec<String>, Option<Duration>)> {
        let command = self
            .command(command_name)
            .ok_or_else(|| self.unknown("command", command_name, self.commands.keys()))?
            .to_string();
        let patterns = regex_names
            .iter()
            .map(|name| {
                self.regex(name)
                    .map(str::to_string)
                    .ok_or_else(|| self.unknown("regex", name, self.regexes.keys()))
            })
            .collect::<Result<Vec<_>>>()?;
        let timeout = timeout_name.and_then(|name| self.timeout(name));
        Ok((command, patterns, timeout))
    }

    fn unknown<'a>(&self, what: &str, name: &str, known: impl Iterator<Item = &'a String>) -> Error {
        Error::InvalidArgument {
            device: self.name.clone(),
            message: format!(
                "unknown {} {:?}, choose from {:?}",
                what,
                name,
                known.collect::<Vec<_>>()
            ),
        }
    }
}

fn timeouts_secs<'de, D>(deserializer: D) -> std::result::Result<IndexMap<String, Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = IndexMap::<String, f64>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(name, secs)| {
            Duration::try_from_secs_f64(secs)
                .map(|d| (name, d))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "name": "raspberrypi",
        "commands": {"reboot": "sudo reboot", "version": "cat /etc/os-release"},
        "regexes": {"prompt": "pi@\\S+:~\\$ ", "version": "VERSION_ID=\"(\\d+)\""},
        "timeouts": {"reboot": 120, "shell": 10.5},
        "properties": [
            {"name": "serial_number", "kind": "persistent"},
            {"name": "firmware_version", "kind": "dynamic"},
            {"name": "shell", "kind": "capability", "description": "ssh shell"}
        ]
    }"#;

    #[test]
    fn test_from_json() {
        let d = DeviceDescriptor::from_json(DOC).unwrap();
        assert_eq!(d.name, "raspberrypi");
        assert_eq!(d.timeout("shell"), Some(Duration::from_millis(10500)));
        assert_eq!(d.properties_of(PropertyKind::Capability).count(), 1);
        assert_eq!(d.property("serial_number").unwrap().kind, PropertyKind::Persistent);
        assert!(d.properties_of(PropertyKind::Optional).next().is_none());
    }

    #[test]
    fn test_resolve() {
        let d = DeviceDescriptor::from_json(DOC).unwrap();
        let (command, patterns, timeout) =
            d.resolve("version", &["version", "prompt"], Some("shell")).unwrap();
        assert_eq!(command, "cat /etc/os-release");
        assert_eq!(patterns.len(), 2);
        assert_eq!(timeout, Some(Duration::from_millis(10500)));

        let err = d.resolve("halt", &[], None).unwrap_err();
        assert!(err.to_string().contains("unknown command \"halt\""));
        assert!(d.resolve("reboot", &["missing"], None).is_err());
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let err = DeviceDescriptor::from_json(r#"{"name": "x", "regexes": {"bad": "(oops"}}"#);
        assert!(err.is_err());
    }
}
