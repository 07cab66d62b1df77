//! Device descriptors.
//!
//! A [`DeviceDescriptor`] names the commands, response patterns and timeouts
//! a device model uses, and classifies its properties by [`PropertyKind`].
//! Descriptors are plain data; drivers register them once at startup in the
//! [`DescriptorRegistry`].

mod descriptor;
mod registry;

pub use descriptor::{DeviceDescriptor, PropertyKind, PropertySpec};
pub use registry::DescriptorRegistry;
