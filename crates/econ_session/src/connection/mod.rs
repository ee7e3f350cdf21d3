//! Econ connections and the registry of channel bindings.
//!
//! [`econ`] speaks the remote console protocol of one game server, while
//! [`registry`] keeps track of which chat channel moderates which server.

pub mod codec;
pub mod econ;
pub mod registry;

pub use econ::{EconConnection, EconReader, EconWriter};
pub use registry::ChannelRegistry;
