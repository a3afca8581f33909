//! Events emitted by the supervisor toward the UI collaborator.
//!
//! Every event is tagged so a renderer can dispatch on the `event` field
//! without knowing the Rust types.

use serde::{Deserialize, Serialize};

/// A tagged event on the supervisor's outbound channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    /// A chunk of PTY output, decoded lossily to UTF-8.
    #[serde(rename = "shell.data")]
    ShellData { pty_id: String, chunk: String },

    /// The PTY child exited. Emitted exactly once per session.
    #[serde(rename = "shell.exit")]
    ShellExit { pty_id: String, code: Option<u32> },

    /// A continuation iteration is about to be written to the PTY.
    #[serde(rename = "continuation.iteration")]
    ContinuationIteration {
        pty_id: String,
        iteration: u32,
        max: u32,
    },

    /// The continuation detected a completion signal.
    #[serde(rename = "continuation.done")]
    ContinuationDone { pty_id: String, iterations: u32 },

    /// The continuation hit its iteration cap.
    #[serde(rename = "continuation.max_reached")]
    ContinuationMaxReached {
        pty_id: String,
        iterations: u32,
        goal: String,
    },

    /// A hidden synthesis run completed (or the job just started, with
    /// `completed == 0`).
    #[serde(rename = "ensemble.progress")]
    EnsembleProgress {
        job_id: String,
        workspace_id: String,
        goal: String,
        completed: u32,
        total: u32,
    },

    /// The synthesis job finished and produced a resumable session.
    #[serde(rename = "ensemble.done")]
    EnsembleDone {
        job_id: String,
        workspace_id: String,
        goal: String,
        session_id: String,
        total: u32,
    },

    /// A session has been quiet for the idle-notification window after
    /// producing output. The UI decides whether to raise a notification.
    #[serde(rename = "agent.idle")]
    AgentIdle { pty_id: String },

    /// Exit-notification side channel, once per session.
    #[serde(rename = "agent.exited")]
    AgentExited { pty_id: String, code: Option<u32> },
}

impl Event {
    /// The `pty_id` this event concerns, if any.
    pub fn pty_id(&self) -> Option<&str> {
        match self {
            Event::ShellData { pty_id, .. }
            | Event::ShellExit { pty_id, .. }
            | Event::ContinuationIteration { pty_id, .. }
            | Event::ContinuationDone { pty_id, .. }
            | Event::ContinuationMaxReached { pty_id, .. }
            | Event::AgentIdle { pty_id }
            | Event::AgentExited { pty_id, .. } => Some(pty_id),
            Event::EnsembleProgress { .. } | Event::EnsembleDone { .. } => None,
        }
    }
}
