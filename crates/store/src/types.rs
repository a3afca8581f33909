//! Row types returned by the store.

use serde::{Deserialize, Serialize};

/// A project directory the user has opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    /// First 16 hex characters of the SHA-256 of the absolute path.
    pub id: String,
    pub path: String,
    pub name: String,
    /// RFC 3339, refreshed on every open.
    pub last_opened: String,
    pub pinned: bool,
    /// Opaque JSON blob owned by the UI.
    pub config: String,
}

/// Durable projection of one assistant session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: String,
    pub workspace_id: String,
    pub cli_type: String,
    pub goal: Option<String>,
    pub status: SessionStatus,
    pub iteration_count: u32,
    pub token_input: u64,
    pub token_output: u64,
    pub started_at: String,
    pub ended_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }

    pub(crate) fn from_db(s: &str) -> Self {
        match s {
            "ended" => SessionStatus::Ended,
            _ => SessionStatus::Active,
        }
    }
}

/// Category of a workspace memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Core,
    Daily,
    Conversation,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Core => "core",
            MemoryCategory::Daily => "daily",
            MemoryCategory::Conversation => "conversation",
        }
    }

    pub(crate) fn from_db(s: &str) -> Self {
        match s {
            "daily" => MemoryCategory::Daily,
            "conversation" => MemoryCategory::Conversation,
            _ => MemoryCategory::Core,
        }
    }
}

/// A single workspace memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: i64,
    pub workspace_id: String,
    pub key: String,
    pub content: String,
    pub category: MemoryCategory,
    pub created_at: String,
    pub updated_at: String,
    /// BM25 rank, only populated by full-text search results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Crash-visible checkpoint of a running continuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationCheckpoint {
    pub pty_id: String,
    pub workspace_id: String,
    pub goal: String,
    pub max_iterations: u32,
    pub current_iteration: u32,
    pub status: String,
    pub updated_at: String,
}
