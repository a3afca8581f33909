//! Task routing for Forge.
//!
//! Two pure concerns live here: mapping a natural-language goal to the
//! assistant CLI best suited for it, and building the concrete commands
//! (quoted one-shots, interactive spawn specs) used to drive each CLI.

pub mod command;
pub mod rules;

pub use command::{one_shot_command, resume_spec, shell_quote, shell_spec, spawn_spec, SpawnSpec};
pub use rules::{route_task, RouteDecision};
