//! The typed command/event surface.
//!
//! Commands arrive as tagged sum types (the reference binding is a
//! bidirectional IPC channel to a renderer); responses mirror them.
//! Boundary validation lives here so the supervisor handlers can assume
//! well-formed input.

use crate::continuation::ContinuationSnapshot;
use crate::ensemble::SynthesisOutcome;
use crate::skills::{AgentsMd, Skill};
use forge_common::{ForgeError, Result};
use forge_router::RouteDecision;
use forge_store::{AgentSession, Memory, MemoryCategory, Workspace};
use serde::{Deserialize, Serialize};

/// Commands the UI collaborator can issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    #[serde(rename = "workspace.open")]
    WorkspaceOpen { path: String },
    #[serde(rename = "workspace.list")]
    WorkspaceList,
    #[serde(rename = "workspace.get")]
    WorkspaceGet { id: String },
    #[serde(rename = "workspace.get_skills")]
    WorkspaceGetSkills { path: String },
    #[serde(rename = "workspace.get_agents_md")]
    WorkspaceGetAgentsMd { path: String },
    #[serde(rename = "workspace.active_sessions")]
    WorkspaceActiveSessions { workspace_id: String },

    #[serde(rename = "memory.store")]
    MemoryStore {
        workspace_id: String,
        key: String,
        content: String,
        category: Option<MemoryCategory>,
    },
    #[serde(rename = "memory.search")]
    MemorySearch { workspace_id: String, query: String },
    #[serde(rename = "memory.list")]
    MemoryList {
        workspace_id: String,
        category: Option<MemoryCategory>,
    },
    #[serde(rename = "memory.delete")]
    MemoryDelete { workspace_id: String, key: String },

    #[serde(rename = "agent.route")]
    AgentRoute {
        description: String,
        preferred: Option<String>,
    },

    #[serde(rename = "shell.spawn")]
    ShellSpawn {
        cli_type: String,
        workspace_path: String,
        workspace_id: String,
        goal: Option<String>,
        #[serde(default)]
        one_shot_loop: bool,
        #[serde(default)]
        shell_session: bool,
        resume_session_id: Option<String>,
    },
    #[serde(rename = "shell.list")]
    ShellList,
    #[serde(rename = "shell.write")]
    ShellWrite { pty_id: String, data: String },
    #[serde(rename = "shell.resize")]
    ShellResize {
        pty_id: String,
        cols: u16,
        rows: u16,
    },
    #[serde(rename = "shell.kill")]
    ShellKill { pty_id: String },
    #[serde(rename = "shell.open_external")]
    ShellOpenExternal { url: String },
    #[serde(rename = "shell.open_path")]
    ShellOpenPath { path: String },

    #[serde(rename = "continuation.start")]
    ContinuationStart {
        pty_id: String,
        goal: String,
        max_iterations: Option<u32>,
        require_prompt: Option<bool>,
        quiet_delay_ms: Option<u64>,
        #[serde(default)]
        kick_off: bool,
    },
    #[serde(rename = "continuation.stop")]
    ContinuationStop { pty_id: String },
    #[serde(rename = "continuation.state")]
    ContinuationState { pty_id: String },

    #[serde(rename = "ensemble.synthesis")]
    EnsembleSynthesis {
        workspace_id: String,
        workspace_path: String,
        goal: String,
        n: Option<u32>,
    },
}

/// A workspace together with its context, as returned by `workspace.open`.
#[derive(Debug, Clone, Serialize)]
pub struct OpenedWorkspace {
    pub workspace: Workspace,
    pub skills: Vec<Skill>,
    pub agents_md: Option<AgentsMd>,
}

/// Success payloads, one per command family.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Opened(OpenedWorkspace),
    Workspaces(Vec<Workspace>),
    Workspace(Option<Workspace>),
    Skills(Vec<Skill>),
    AgentsMd(Option<AgentsMd>),
    Sessions(Vec<AgentSession>),
    Memories(Vec<Memory>),
    Route(RouteDecision),
    Spawned { pty_id: String, session_id: String },
    PtyIds(Vec<String>),
    Continuation(Option<ContinuationSnapshot>),
    Synthesis(SynthesisOutcome),
    Deleted(bool),
    Target(String),
    Ack,
}

/// Only http(s) targets may be handed to the OS opener.
pub fn validate_external_url(url: &str) -> Result<()> {
    let lower = url.to_ascii_lowercase();
    let rest = lower
        .strip_prefix("http://")
        .or_else(|| lower.strip_prefix("https://"));
    match rest {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(ForgeError::InvalidInput(format!(
            "only http(s) URLs may be opened: {url}"
        ))),
    }
}
