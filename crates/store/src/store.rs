//! Store open/schema plus workspace, session and checkpoint operations.
//!
//! One SQLite database per installation (`~/.forge/forge.db`), WAL
//! journaling, foreign keys on. Schema errors at open are fatal; per-query
//! errors propagate to the caller as `ForgeError::Store`.

use crate::types::{AgentSession, ContinuationCheckpoint, SessionStatus, Workspace};
use forge_common::{ForgeError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Embedded store for workspaces, sessions, memories and checkpoints.
pub struct Store {
    pub(crate) conn: Mutex<Connection>,
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(crate) fn store_err(e: rusqlite::Error) -> ForgeError {
    ForgeError::Store(e.to_string())
}

impl Store {
    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path).map_err(store_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;
             PRAGMA cache_size=-8000;",
        )
        .map_err(store_err)?;

        Self::init_schema(&conn)?;
        info!(db = %db_path.display(), "opened forge store");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory store, for tests and tooling.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(store_err)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS workspaces (
                id          TEXT PRIMARY KEY,
                path        TEXT NOT NULL UNIQUE,
                name        TEXT NOT NULL,
                last_opened TEXT NOT NULL,
                pinned      INTEGER NOT NULL DEFAULT 0,
                config      TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS agent_sessions (
                id              TEXT PRIMARY KEY,
                workspace_id    TEXT NOT NULL,
                cli_type        TEXT NOT NULL,
                goal            TEXT,
                status          TEXT NOT NULL DEFAULT 'active',
                iteration_count INTEGER NOT NULL DEFAULT 0,
                token_input     INTEGER NOT NULL DEFAULT 0,
                token_output    INTEGER NOT NULL DEFAULT 0,
                started_at      TEXT NOT NULL,
                ended_at        TEXT
            );

            CREATE TABLE IF NOT EXISTS workspace_memories (
                id           INTEGER PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                key          TEXT NOT NULL,
                content      TEXT NOT NULL,
                category     TEXT NOT NULL DEFAULT 'core',
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                UNIQUE(workspace_id, key)
            );

            CREATE TABLE IF NOT EXISTS continuation_state (
                pty_id            TEXT PRIMARY KEY,
                workspace_id      TEXT NOT NULL,
                goal              TEXT NOT NULL,
                max_iterations    INTEGER NOT NULL,
                current_iteration INTEGER NOT NULL DEFAULT 0,
                status            TEXT NOT NULL DEFAULT 'active',
                updated_at        TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id           TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                spec         TEXT NOT NULL,
                created_at   TEXT NOT NULL
            );",
        )
        .map_err(store_err)?;

        // FTS5 index shadowing (key, content) of workspace_memories.
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
                key, content,
                content='workspace_memories',
                content_rowid='id'
            );

            CREATE TRIGGER IF NOT EXISTS memories_ai
            AFTER INSERT ON workspace_memories BEGIN
                INSERT INTO memories_fts(rowid, key, content)
                VALUES (new.id, new.key, new.content);
            END;

            CREATE TRIGGER IF NOT EXISTS memories_ad
            AFTER DELETE ON workspace_memories BEGIN
                INSERT INTO memories_fts(memories_fts, rowid, key, content)
                VALUES ('delete', old.id, old.key, old.content);
            END;

            CREATE TRIGGER IF NOT EXISTS memories_au
            AFTER UPDATE ON workspace_memories BEGIN
                INSERT INTO memories_fts(memories_fts, rowid, key, content)
                VALUES ('delete', old.id, old.key, old.content);
                INSERT INTO memories_fts(rowid, key, content)
                VALUES (new.id, new.key, new.content);
            END;",
        )
        .map_err(store_err)?;

        Ok(())
    }

    // ── Workspaces ──────────────────────────────────────────

    /// Upsert a workspace row; a repeat open of the same path refreshes
    /// `last_opened` and replaces `id` and `name`.
    pub fn upsert_workspace(&self, id: &str, path: &str, name: &str) -> Result<Workspace> {
        let conn = self.conn.lock().expect("store poisoned");
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO workspaces (id, path, name, last_opened)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                id = excluded.id,
                name = excluded.name,
                last_opened = excluded.last_opened",
            params![id, path, name, now],
        )
        .map_err(store_err)?;

        conn.query_row(
            "SELECT id, path, name, last_opened, pinned, config
             FROM workspaces WHERE path = ?1",
            params![path],
            row_to_workspace,
        )
        .map_err(store_err)
    }

    pub fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        let conn = self.conn.lock().expect("store poisoned");
        conn.query_row(
            "SELECT id, path, name, last_opened, pinned, config
             FROM workspaces WHERE id = ?1",
            params![id],
            row_to_workspace,
        )
        .optional()
        .map_err(store_err)
    }

    /// Up to 20 workspaces, pinned first, then most recently opened.
    pub fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let conn = self.conn.lock().expect("store poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT id, path, name, last_opened, pinned, config
                 FROM workspaces
                 ORDER BY pinned DESC, last_opened DESC
                 LIMIT 20",
            )
            .map_err(store_err)?;
        let rows = stmt.query_map([], row_to_workspace).map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    pub fn set_workspace_pinned(&self, id: &str, pinned: bool) -> Result<bool> {
        let conn = self.conn.lock().expect("store poisoned");
        let changed = conn
            .execute(
                "UPDATE workspaces SET pinned = ?2 WHERE id = ?1",
                params![id, pinned as i64],
            )
            .map_err(store_err)?;
        Ok(changed > 0)
    }

    // ── Agent sessions ──────────────────────────────────────

    pub fn create_agent_session(
        &self,
        id: &str,
        workspace_id: &str,
        cli_type: &str,
        goal: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("store poisoned");
        conn.execute(
            "INSERT INTO agent_sessions (id, workspace_id, cli_type, goal, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, workspace_id, cli_type, goal, now_rfc3339()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Mark a session ended. Only the first call on an active row takes
    /// effect, so `ended_at` is set exactly once.
    pub fn end_agent_session(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store poisoned");
        conn.execute(
            "UPDATE agent_sessions
             SET status = 'ended', ended_at = ?2
             WHERE id = ?1 AND status = 'active'",
            params![id, now_rfc3339()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn increment_session_iteration(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store poisoned");
        conn.execute(
            "UPDATE agent_sessions
             SET iteration_count = iteration_count + 1
             WHERE id = ?1",
            params![id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn get_agent_session(&self, id: &str) -> Result<Option<AgentSession>> {
        let conn = self.conn.lock().expect("store poisoned");
        conn.query_row(
            "SELECT id, workspace_id, cli_type, goal, status, iteration_count,
                    token_input, token_output, started_at, ended_at
             FROM agent_sessions WHERE id = ?1",
            params![id],
            row_to_session,
        )
        .optional()
        .map_err(store_err)
    }

    pub fn list_active_sessions(&self, workspace_id: &str) -> Result<Vec<AgentSession>> {
        let conn = self.conn.lock().expect("store poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT id, workspace_id, cli_type, goal, status, iteration_count,
                        token_input, token_output, started_at, ended_at
                 FROM agent_sessions
                 WHERE workspace_id = ?1 AND status = 'active'
                 ORDER BY started_at DESC",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![workspace_id], row_to_session)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    // ── Continuation checkpoints ────────────────────────────

    pub fn save_continuation_state(
        &self,
        pty_id: &str,
        workspace_id: &str,
        goal: &str,
        max_iterations: u32,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("store poisoned");
        conn.execute(
            "INSERT INTO continuation_state
                 (pty_id, workspace_id, goal, max_iterations, current_iteration, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, 'active', ?5)
             ON CONFLICT(pty_id) DO UPDATE SET
                workspace_id = excluded.workspace_id,
                goal = excluded.goal,
                max_iterations = excluded.max_iterations,
                current_iteration = 0,
                status = 'active',
                updated_at = excluded.updated_at",
            params![pty_id, workspace_id, goal, max_iterations, now_rfc3339()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn update_continuation_iteration(&self, pty_id: &str, current_iteration: u32) -> Result<()> {
        let conn = self.conn.lock().expect("store poisoned");
        conn.execute(
            "UPDATE continuation_state
             SET current_iteration = ?2, updated_at = ?3
             WHERE pty_id = ?1",
            params![pty_id, current_iteration, now_rfc3339()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn delete_continuation_state(&self, pty_id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("store poisoned");
        let deleted = conn
            .execute(
                "DELETE FROM continuation_state WHERE pty_id = ?1",
                params![pty_id],
            )
            .map_err(store_err)?;
        Ok(deleted > 0)
    }

    pub fn get_continuation_state(&self, pty_id: &str) -> Result<Option<ContinuationCheckpoint>> {
        let conn = self.conn.lock().expect("store poisoned");
        conn.query_row(
            "SELECT pty_id, workspace_id, goal, max_iterations, current_iteration,
                    status, updated_at
             FROM continuation_state WHERE pty_id = ?1",
            params![pty_id],
            |row| {
                Ok(ContinuationCheckpoint {
                    pty_id: row.get(0)?,
                    workspace_id: row.get(1)?,
                    goal: row.get(2)?,
                    max_iterations: row.get(3)?,
                    current_iteration: row.get(4)?,
                    status: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(store_err)
    }
}

fn row_to_workspace(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        path: row.get(1)?,
        name: row.get(2)?,
        last_opened: row.get(3)?,
        pinned: row.get::<_, i64>(4)? != 0,
        config: row.get(5)?,
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentSession> {
    let status: String = row.get(4)?;
    Ok(AgentSession {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        cli_type: row.get(2)?,
        goal: row.get(3)?,
        status: SessionStatus::from_db(&status),
        iteration_count: row.get(5)?,
        token_input: row.get::<_, i64>(6)? as u64,
        token_output: row.get::<_, i64>(7)? as u64,
        started_at: row.get(8)?,
        ended_at: row.get(9)?,
    })
}
