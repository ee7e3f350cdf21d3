//! The bridge between chat and game servers.
//!
//! This module contains the [`Bridge`] itself and the handlers of the chat
//! command surface.

pub mod core;
pub mod handlers;

pub use self::core::{split_command, Bridge};
