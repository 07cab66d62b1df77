//! # Switchboard
//!
//! Async device switchboard for hardware test labs.
//!
//! A switchboard owns the communication channels to one device (serial,
//! SSH, ADB shell, raw socket or HDLC framed RPC), captures everything the
//! device emits into a timestamped log, lets callers send commands and wait
//! for response patterns, and turns the log into queryable events through
//! JSON regex filters.
//!
//! ## Features
//!
//! - One capture task per port, so a caller blocked in an expect never
//!   stalls log collection
//! - Expect in `any`, `all` or `sequential` mode over a tail-limited search
//!   window
//! - Automatic reopen with readiness probing and a failure budget
//! - Event filters loaded from JSON files, with last-event, history and
//!   cause/effect queries over the event file
//! - RPC calls over HDLC framing alongside device stdout
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use switchboard::{ExpectOptions, SwitchboardBuilder, TransportSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), switchboard::Error> {
//!     let sb = SwitchboardBuilder::new("rpi-01")
//!         .log_directory("/tmp/lab")
//!         .filter_path("/etc/lab/filters")
//!         .port(TransportSpec::Serial { path: "/dev/ttyUSB0".into(), baud_rate: 115200 })
//!         .build()
//!         .await?;
//!     sb.open_transport(0).await?;
//!
//!     let options = ExpectOptions::new().timeout(Duration::from_secs(10));
//!     let response = sb.send_and_expect("uname -a", &[r"Linux \S+"], &options).await?;
//!     println!("{}", response);
//!
//!     sb.close().await
//! }
//! ```

pub mod capture;
pub mod channel;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod expect;
pub mod parser;
pub mod transport;

// Re-export main types for convenience
pub use capture::CapturedLine;
pub use channel::{LineClassifier, LineType};
pub use config::{PortConfig, SwitchboardConfig};
pub use device::{DescriptorRegistry, DeviceDescriptor, PropertyKind, PropertySpec};
pub use driver::{LineIdentifier, SendOptions, Switchboard, SwitchboardBuilder};
pub use error::{Error, ParserError, Result, TransportError};
pub use expect::{ExpectMode, ExpectOptions, ExpectResponse};
pub use parser::{EventParser, EventRecord, ParserResult};
pub use transport::{SerialControl, Transport, TransportKind, TransportSpec, TransportState};
