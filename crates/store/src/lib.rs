//! Embedded durable store for Forge.
//!
//! One SQLite database holds workspaces, agent-session records, workspace
//! memories (with an FTS5 index for BM25-ranked search) and continuation
//! checkpoints. All operations are synchronous from the caller's
//! perspective; the supervisor maps errors to user-visible ones.

mod memory;
mod store;
pub mod types;

pub use store::Store;
pub use types::{
    AgentSession, ContinuationCheckpoint, Memory, MemoryCategory, SessionStatus, Workspace,
};
