//! Workspace memory operations: upsert, list, delete, and BM25-ranked
//! full-text search with a LIKE fallback for unparseable queries.

use crate::store::{now_rfc3339, store_err, Store};
use crate::types::{Memory, MemoryCategory};
use forge_common::Result;
use rusqlite::params;
use tracing::debug;

const SEARCH_LIMIT: usize = 10;

impl Store {
    /// Upsert a memory on `(workspace_id, key)`. Updates content, category
    /// and `updated_at` on conflict.
    pub fn store_memory(
        &self,
        workspace_id: &str,
        key: &str,
        content: &str,
        category: MemoryCategory,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("store poisoned");
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO workspace_memories
                 (workspace_id, key, content, category, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(workspace_id, key) DO UPDATE SET
                content = excluded.content,
                category = excluded.category,
                updated_at = excluded.updated_at",
            params![workspace_id, key, content, category.as_str(), now],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Full-text search ordered by BM25 rank, best first, limited to 10.
    ///
    /// An FTS5 syntax error (and only that) downgrades to a wildcarded
    /// `LIKE` scan; every other error propagates.
    pub fn search_memory(&self, workspace_id: &str, query: &str) -> Result<Vec<Memory>> {
        match self.search_memory_fts(workspace_id, query) {
            Ok(rows) => Ok(rows),
            Err(e) if is_fts_syntax_error(&e) => {
                debug!(query = %query, "FTS query unparseable, using LIKE fallback");
                self.search_memory_like(workspace_id, query)
            }
            Err(e) => Err(store_err(e)),
        }
    }

    fn search_memory_fts(
        &self,
        workspace_id: &str,
        query: &str,
    ) -> std::result::Result<Vec<Memory>, rusqlite::Error> {
        let conn = self.conn.lock().expect("store poisoned");
        let mut stmt = conn.prepare(
            "SELECT m.id, m.workspace_id, m.key, m.content, m.category,
                    m.created_at, m.updated_at, rank
             FROM memories_fts f
             JOIN workspace_memories m ON m.id = f.rowid
             WHERE memories_fts MATCH ?1 AND m.workspace_id = ?2
             ORDER BY rank
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![query, workspace_id, SEARCH_LIMIT as i64],
            |row| {
                let mut mem = row_to_memory(row)?;
                mem.score = Some(row.get::<_, f64>(7)?);
                Ok(mem)
            },
        )?;
        rows.collect()
    }

    /// Token-wise `LIKE` scan: each whitespace token is wildcarded on both
    /// sides with `\`, `%` and `_` escaped, and matched against key or
    /// content. Newest first.
    fn search_memory_like(&self, workspace_id: &str, query: &str) -> Result<Vec<Memory>> {
        let patterns: Vec<String> = query
            .split_whitespace()
            .map(|tok| format!("%{}%", escape_like(tok)))
            .collect();
        if patterns.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT id, workspace_id, key, content, category, created_at, updated_at
             FROM workspace_memories
             WHERE workspace_id = ?1 AND (",
        );
        for (i, _) in patterns.iter().enumerate() {
            if i > 0 {
                sql.push_str(" OR ");
            }
            let p = i + 2;
            sql.push_str(&format!(
                "key LIKE ?{p} ESCAPE '\\' OR content LIKE ?{p} ESCAPE '\\'"
            ));
        }
        sql.push_str(") ORDER BY updated_at DESC LIMIT ?");
        sql.push_str(&(patterns.len() + 2).to_string());

        let conn = self.conn.lock().expect("store poisoned");
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&workspace_id];
        for p in &patterns {
            bound.push(p);
        }
        let limit = SEARCH_LIMIT as i64;
        bound.push(&limit);

        let rows = stmt
            .query_map(bound.as_slice(), row_to_memory)
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    /// Memories for a workspace, newest first, optionally filtered by
    /// category.
    pub fn list_memories(
        &self,
        workspace_id: &str,
        category: Option<MemoryCategory>,
    ) -> Result<Vec<Memory>> {
        let conn = self.conn.lock().expect("store poisoned");
        let mut out = Vec::new();
        match category {
            Some(cat) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, workspace_id, key, content, category, created_at, updated_at
                         FROM workspace_memories
                         WHERE workspace_id = ?1 AND category = ?2
                         ORDER BY updated_at DESC",
                    )
                    .map_err(store_err)?;
                let rows = stmt
                    .query_map(params![workspace_id, cat.as_str()], row_to_memory)
                    .map_err(store_err)?;
                for row in rows {
                    out.push(row.map_err(store_err)?);
                }
            }
            None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, workspace_id, key, content, category, created_at, updated_at
                         FROM workspace_memories
                         WHERE workspace_id = ?1
                         ORDER BY updated_at DESC",
                    )
                    .map_err(store_err)?;
                let rows = stmt
                    .query_map(params![workspace_id], row_to_memory)
                    .map_err(store_err)?;
                for row in rows {
                    out.push(row.map_err(store_err)?);
                }
            }
        }
        Ok(out)
    }

    /// Delete a memory by key. Returns true if a row was removed.
    pub fn delete_memory(&self, workspace_id: &str, key: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("store poisoned");
        let deleted = conn
            .execute(
                "DELETE FROM workspace_memories WHERE workspace_id = ?1 AND key = ?2",
                params![workspace_id, key],
            )
            .map_err(store_err)?;
        Ok(deleted > 0)
    }
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let category: String = row.get(4)?;
    Ok(Memory {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        key: row.get(2)?,
        content: row.get(3)?,
        category: MemoryCategory::from_db(&category),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        score: None,
    })
}

/// True only for FTS5 query-parse failures; storage errors stay errors.
fn is_fts_syntax_error(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => {
            let msg = msg.to_lowercase();
            msg.contains("fts5: syntax error")
                || msg.contains("malformed match")
                || msg.contains("unterminated string")
                || msg.contains("unknown special query")
        }
        _ => false,
    }
}

/// Escape `\`, `%` and `_` so user input cannot act as LIKE wildcards.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
