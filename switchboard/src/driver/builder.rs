//! Builder for creating switchboards.

use std::path::PathBuf;
use std::sync::Arc;

use super::switchboard::{PortSetup, Switchboard};
use crate::channel::{AllUnknown, DataFramer, LineClassifier, NewlineFramer};
use crate::config::{PortConfig, SwitchboardConfig};
use crate::device::{DescriptorRegistry, DeviceDescriptor};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportSpec};

/// Builder for constructing a [`Switchboard`].
///
/// # Example
///
/// ```rust,no_run
/// use switchboard::driver::SwitchboardBuilder;
/// use switchboard::transport::TransportSpec;
///
/// # async fn example() -> Result<(), switchboard::Error> {
/// let sb = SwitchboardBuilder::new("esp32-07")
///     .log_directory("/var/log/lab")
///     .filter_path("/etc/lab/filters")
///     .port(TransportSpec::Serial { path: "/dev/ttyUSB0".into(), baud_rate: 115200 })
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct SwitchboardBuilder {
    config: SwitchboardConfig,
    transports: Vec<PortSetup>,
    classifier: Arc<dyn LineClassifier>,
    framer: Arc<dyn DataFramer>,
    descriptor: Option<DeviceDescriptor>,
    descriptor_name: Option<String>,
}

impl SwitchboardBuilder {
    /// Create a new builder for the named device.
    pub fn new(device_name: impl Into<String>) -> Self {
        Self::from_config(SwitchboardConfig::new(device_name))
    }

    /// Start from a loaded configuration document.
    pub fn from_config(config: SwitchboardConfig) -> Self {
        Self {
            config,
            transports: Vec::new(),
            classifier: Arc::new(AllUnknown),
            framer: Arc::new(NewlineFramer),
            descriptor: None,
            descriptor_name: None,
        }
    }

    /// Replace the configuration, keeping ports added with [`transport`](Self::transport).
    pub fn config(mut self, config: SwitchboardConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the directory for the device log and event file.
    pub fn log_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_directory = dir.into();
        self
    }

    /// Set the log file name (default: `<device_name>.txt`).
    pub fn log_filename(mut self, name: impl Into<String>) -> Self {
        self.config.log_filename = Some(name.into());
        self
    }

    /// Add a filter file, or a directory of them.
    pub fn filter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.filter_paths.push(path.into());
        self
    }

    /// Add a port using `transport`, opened on start and reopened after
    /// failures.
    pub fn port(self, transport: TransportSpec) -> Self {
        self.port_config(PortConfig::new(transport))
    }

    /// Add a port with explicit options.
    pub fn port_config(mut self, port: PortConfig) -> Self {
        self.config.ports.push(port);
        self
    }

    /// Add a port backed by a caller-built transport. These ports follow the
    /// ports from the configuration.
    pub fn transport(mut self, transport: Box<dyn Transport>, auto_reopen: bool) -> Self {
        self.transports.push(PortSetup {
            transport,
            auto_reopen,
            open_on_start: true,
        });
        self
    }

    /// Set the line classifier (default: every line is accepted).
    pub fn classifier(mut self, classifier: Arc<dyn LineClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Set the data framer (default: newline framing).
    pub fn framer(mut self, framer: Arc<dyn DataFramer>) -> Self {
        self.framer = framer;
        self
    }

    /// Set the device descriptor.
    pub fn descriptor(mut self, descriptor: DeviceDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Use a descriptor from the global registry.
    pub fn descriptor_name(mut self, name: impl Into<String>) -> Self {
        self.descriptor_name = Some(name.into());
        self
    }

    /// Set the expect search window.
    pub fn search_window_size(mut self, size: usize) -> Self {
        self.config.search_window_size = size;
        self
    }

    /// Rotate the log at this size. Zero disables rotation.
    pub fn max_log_size(mut self, size: u64) -> Self {
        self.config.max_log_size = size;
        self
    }

    /// Build the switchboard and start capturing.
    ///
    /// Ports with `open_on_start` begin opening in the background; use
    /// `open_transport` to wait for one.
    pub async fn build(self) -> Result<Switchboard> {
        let descriptor = match (self.descriptor, self.descriptor_name) {
            (Some(descriptor), _) => Some(descriptor),
            (None, Some(name)) => Some(DescriptorRegistry::lookup(&name).ok_or_else(|| {
                Error::InvalidArgument {
                    device: self.config.device_name.clone(),
                    message: format!("unknown device descriptor {:?}", name),
                }
            })?),
            (None, None) => None,
        };

        let mut ports: Vec<PortSetup> = self
            .config
            .ports
            .iter()
            .map(|port| PortSetup {
                transport: port.transport.build(),
                auto_reopen: port.auto_reopen,
                open_on_start: port.open_on_start,
            })
            .collect();
        ports.extend(self.transports);

        Switchboard::start(self.config, ports, self.classifier, self.framer, descriptor)
    }
}
