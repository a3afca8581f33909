//! PTY child process management.
//!
//! The manager owns a map of live PTY handles keyed by an opaque,
//! non-reusable `pty_id`. Each session gets a reader thread that forwards
//! decoded output chunks and exactly one exit event into a tokio channel;
//! the consumer (the supervisor) serializes those deliveries onto its own
//! control task.

use crate::env::sanitized_env;
use forge_common::{ForgeError, Result};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const MIN_COLS: u16 = 1;
pub const MAX_COLS: u16 = 500;
pub const MIN_ROWS: u16 = 1;
pub const MAX_ROWS: u16 = 200;

const DEFAULT_COLS: u16 = 120;
const DEFAULT_ROWS: u16 = 30;

/// What to spawn and where.
#[derive(Debug, Clone)]
pub struct PtySpawnSpec {
    pub cmd: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub env: HashMap<String, String>,
}

impl PtySpawnSpec {
    pub fn new(cmd: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            cmd: cmd.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            env: HashMap::new(),
        }
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

/// Output stream of the manager, tagged by session.
#[derive(Debug, Clone)]
pub enum PtyEvent {
    Data { pty_id: String, chunk: String },
    Exit { pty_id: String, code: Option<u32> },
}

struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

/// Owns all live PTY children.
pub struct PtyManager {
    handles: Arc<Mutex<HashMap<String, PtyHandle>>>,
    events: mpsc::UnboundedSender<PtyEvent>,
}

pub fn validate_size(cols: u16, rows: u16) -> Result<()> {
    if !(MIN_COLS..=MAX_COLS).contains(&cols) {
        return Err(ForgeError::InvalidInput(format!(
            "cols must be in [{MIN_COLS},{MAX_COLS}], got {cols}"
        )));
    }
    if !(MIN_ROWS..=MAX_ROWS).contains(&rows) {
        return Err(ForgeError::InvalidInput(format!(
            "rows must be in [{MIN_ROWS},{MAX_ROWS}], got {rows}"
        )));
    }
    Ok(())
}

impl PtyManager {
    /// Create a manager that reports output on `events`.
    pub fn new(events: mpsc::UnboundedSender<PtyEvent>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Spawn a child attached to a fresh PTY. Returns the opaque pty id.
    ///
    /// The child sees only the sanitized environment. No handle is stored
    /// when the spawn fails.
    pub fn spawn(&self, spec: PtySpawnSpec) -> Result<String> {
        validate_size(spec.cols, spec.rows)?;

        let pty_id = format!("pty_{}", uuid::Uuid::new_v4());
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ForgeError::Pty(format!("openpty failed: {e}")))?;

        let mut cmd = CommandBuilder::new(&spec.cmd);
        cmd.args(&spec.args);
        cmd.cwd(&spec.cwd);
        cmd.env_clear();
        for (k, v) in sanitized_env(&spec.env) {
            cmd.env(k, v);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ForgeError::Pty(format!("spawn failed: {e}")))?;
        // The child owns the slave side from here on.
        drop(pair.slave);

        let killer = child.clone_killer();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ForgeError::Pty(format!("reader clone failed: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ForgeError::Pty(format!("writer take failed: {e}")))?;

        info!(pty_id = %pty_id, cmd = %spec.cmd, cwd = %spec.cwd.display(), "spawned PTY child");

        self.handles.lock().expect("pty map poisoned").insert(
            pty_id.clone(),
            PtyHandle {
                master: pair.master,
                writer,
                killer,
            },
        );

        self.spawn_reader(pty_id.clone(), reader, child);
        Ok(pty_id)
    }

    /// Reader thread: forwards chunks until EOF, then reaps the child and
    /// emits the session's single exit event.
    fn spawn_reader(
        &self,
        pty_id: String,
        mut reader: Box<dyn Read + Send>,
        mut child: Box<dyn portable_pty::Child + Send + Sync>,
    ) {
        let events = self.events.clone();
        let handles = Arc::clone(&self.handles);

        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                        if events
                            .send(PtyEvent::Data {
                                pty_id: pty_id.clone(),
                                chunk,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(pty_id = %pty_id, error = %e, "PTY read ended");
                        break;
                    }
                }
            }

            let code = match child.wait() {
                Ok(status) => Some(status.exit_code()),
                Err(e) => {
                    warn!(pty_id = %pty_id, error = %e, "failed to reap PTY child");
                    None
                }
            };

            handles.lock().expect("pty map poisoned").remove(&pty_id);
            info!(pty_id = %pty_id, code = ?code, "PTY child exited");
            let _ = events.send(PtyEvent::Exit { pty_id, code });
        });
    }

    /// Best-effort write; data for a vanished session is dropped silently.
    pub fn write(&self, pty_id: &str, data: &[u8]) {
        let mut handles = self.handles.lock().expect("pty map poisoned");
        if let Some(handle) = handles.get_mut(pty_id) {
            if let Err(e) = handle.writer.write_all(data) {
                debug!(pty_id = %pty_id, error = %e, "PTY write dropped");
            }
        }
    }

    /// Resize the terminal. Out-of-range dimensions are rejected.
    pub fn resize(&self, pty_id: &str, cols: u16, rows: u16) -> Result<()> {
        validate_size(cols, rows)?;
        let handles = self.handles.lock().expect("pty map poisoned");
        let handle = handles
            .get(pty_id)
            .ok_or_else(|| ForgeError::Pty(format!("no such pty: {pty_id}")))?;
        handle
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ForgeError::Pty(format!("resize failed: {e}")))
    }

    /// Remove the handle, then terminate the child. Idempotent: a second
    /// call for the same id is a no-op. The exit event still arrives
    /// exactly once, from the reader thread.
    pub fn kill(&self, pty_id: &str) {
        let removed = self
            .handles
            .lock()
            .expect("pty map poisoned")
            .remove(pty_id);
        if let Some(mut handle) = removed {
            if let Err(e) = handle.killer.kill() {
                debug!(pty_id = %pty_id, error = %e, "kill after removal failed");
            }
            info!(pty_id = %pty_id, "killed PTY child");
        }
    }

    pub fn is_live(&self, pty_id: &str) -> bool {
        self.handles
            .lock()
            .expect("pty map poisoned")
            .contains_key(pty_id)
    }

    pub fn live_ids(&self) -> Vec<String> {
        self.handles
            .lock()
            .expect("pty map poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.handles.lock().expect("pty map poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (PtyManager, mpsc::UnboundedReceiver<PtyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PtyManager::new(tx), rx)
    }

    #[test]
    fn size_validation_bounds() {
        assert!(validate_size(1, 1).is_ok());
        assert!(validate_size(500, 200).is_ok());
        assert!(validate_size(0, 30).is_err());
        assert!(validate_size(501, 30).is_err());
        assert!(validate_size(120, 0).is_err());
        assert!(validate_size(120, 201).is_err());
    }

    #[test]
    fn spawn_rejects_bad_dimensions() {
        let (mgr, _rx) = manager();
        let mut spec = PtySpawnSpec::new("true", "/tmp");
        spec.cols = 0;
        assert!(mgr.spawn(spec).is_err());
        assert_eq!(mgr.live_count(), 0);
    }

    #[test]
    fn write_to_unknown_pty_is_silent() {
        let (mgr, _rx) = manager();
        mgr.write("pty_missing", b"hello\n");
    }

    #[test]
    fn resize_unknown_pty_errors() {
        let (mgr, _rx) = manager();
        assert!(mgr.resize("pty_missing", 80, 24).is_err());
    }

    #[test]
    fn kill_is_idempotent_for_unknown_ids() {
        let (mgr, _rx) = manager();
        mgr.kill("pty_missing");
        mgr.kill("pty_missing");
        assert_eq!(mgr.live_count(), 0);
    }
}
