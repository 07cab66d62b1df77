//! The switchboard façade.
//!
//! [`Switchboard`] is what device drivers talk to: it writes commands, waits
//! for responses, performs RPC calls, annotates the log and controls the
//! lifecycle of every port. [`SwitchboardBuilder`] assembles one from a
//! configuration and a set of transports.

mod builder;
mod line_identifier;
mod switchboard;

pub use builder::SwitchboardBuilder;
pub use line_identifier::LineIdentifier;
pub use switchboard::{SendOptions, Switchboard, MAX_PORTS};
