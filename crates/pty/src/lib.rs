//! PTY management for Forge.
//!
//! Spawns assistant CLIs (and plain shells) attached to pseudoterminals,
//! streams their output as tagged events, and enforces the environment
//! allow-list every child runs under.

pub mod env;
pub mod manager;

pub use env::sanitized_env;
pub use manager::{validate_size, PtyEvent, PtyManager, PtySpawnSpec};
