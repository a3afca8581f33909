//! The Forge session supervisor.
//!
//! This crate is the control plane of the orchestrator: it owns the live
//! session map, drives per-session continuation loops, fans out
//! best-of-N synthesis jobs, and exposes the typed command/event surface
//! the UI collaborator binds to.
//!
//! # Architecture
//!
//! ```text
//! UI collaborator
//!      │ commands                     events │
//!      ▼                                     │
//! ┌──────────────────────────────────────────┴──┐
//! │ Supervisor task (single writer)             │
//! │   session map · continuation engine ·       │
//! │   synthesis jobs · idle/goal timers         │
//! └──┬───────────────┬───────────────┬──────────┘
//!    ▼               ▼               ▼
//! [forge-pty]   [forge-store]   [forge-router]
//! ```
//!
//! PTY reader threads and timer tasks never touch supervisor state
//! directly; everything funnels through one message channel.

pub mod continuation;
pub mod ensemble;
pub mod skills;
pub mod supervisor;
pub mod surface;

pub use continuation::{
    ContinuationEngine, ContinuationOptions, ContinuationSnapshot, ONE_SHOT_DONE_MARKER,
};
pub use ensemble::{ClaudeRunner, OneShotRequest, OneShotRunner, RunOutcome, SynthesisOutcome};
pub use skills::{load_agents_md, load_skills, AgentsMd, Skill};
pub use supervisor::{spawn_supervisor, workspace_id_for, SupervisorConfig, SupervisorHandle};
pub use surface::{Command, OpenedWorkspace, Response};
