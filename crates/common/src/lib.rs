//! Common types shared across Forge crates.
//!
//! This crate provides the foundational abstractions the supervisor and
//! its collaborators use to communicate: the error type, the assistant
//! CLI identifiers, and the outbound event model.

pub mod cli;
pub mod error;
pub mod event;

pub use cli::{CliType, TaskCategory};
pub use error::{ForgeError, Result};
pub use event::Event;
