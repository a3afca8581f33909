//! The supervisor task: single owner of all live session state.
//!
//! Every mutation — the session map, continuation transitions, timers,
//! synthesis bookkeeping — happens on one task. PTY reader threads, timer
//! tasks and command callers all talk to it through a single message
//! channel, so handlers never race each other.

use crate::continuation::{
    Arm, ContinuationEngine, ContinuationOptions, StartAction, TickAction, DEFAULT_QUIET_DELAY,
    MAX_ITERATIONS_CAP, ONE_SHOT_DONE_MARKER,
};
use crate::ensemble::{self, ClaudeRunner, OneShotRunner, DEFAULT_RUNS};
use crate::skills;
use crate::surface::{validate_external_url, Command, OpenedWorkspace, Response};
use forge_common::{CliType, Event, ForgeError, Result};
use forge_pty::{PtyEvent, PtyManager, PtySpawnSpec};
use forge_store::{MemoryCategory, Store};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub const IDLE_NOTIFY_DELAY: Duration = Duration::from_secs(5);
pub const GOAL_WRITE_DELAY: Duration = Duration::from_millis(1500);

/// Process-wide supervisor configuration, fixed at startup.
pub struct SupervisorConfig {
    pub db_path: PathBuf,
    /// The user's real home; read for global skills and ensemble seeds,
    /// never written.
    pub home: PathBuf,
    pub runner: Arc<dyn OneShotRunner>,
    pub idle_notify_delay: Duration,
    pub goal_write_delay: Duration,
}

impl SupervisorConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            home: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            runner: Arc::new(ClaudeRunner),
            idle_notify_delay: IDLE_NOTIFY_DELAY,
            goal_write_delay: GOAL_WRITE_DELAY,
        }
    }

    /// Default location: `~/.forge/forge.db`.
    pub fn default_db_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".forge")
            .join("forge.db")
    }
}

/// In-memory record of one live session.
struct SessionInfo {
    session_id: String,
    workspace_id: String,
    cli_type: CliType,
    goal: Option<String>,
    /// Set for one-shot-loop sessions; their sentinel lines are stripped
    /// before `shell.data` is forwarded.
    one_shot: bool,
    had_output: bool,
    killed: bool,
    idle_generation: u64,
    goal_token: u64,
}

struct JobInfo {
    workspace_id: String,
    goal: String,
    total: u32,
}

enum Msg {
    Command {
        cmd: Command,
        reply: oneshot::Sender<Result<Response>>,
    },
    Pty(PtyEvent),
    ContinuationTick { pty_id: String, generation: u64 },
    GoalWrite { pty_id: String, token: u64 },
    IdleTick { pty_id: String, generation: u64 },
    SynthesisFinished { job_id: String },
}

/// Cheap, cloneable entry point for command callers.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Msg>,
}

impl SupervisorHandle {
    /// Issue one command and await its response.
    pub async fn command(&self, cmd: Command) -> Result<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Msg::Command {
                cmd,
                reply: reply_tx,
            })
            .map_err(|_| ForgeError::Unavailable("supervisor task has stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| ForgeError::Unavailable("supervisor dropped the request".into()))?
    }
}

/// Start the supervisor task. Returns the command handle and the outbound
/// event stream. Must be called inside a tokio runtime; schema errors are
/// fatal here, before any session exists.
pub fn spawn_supervisor(
    config: SupervisorConfig,
) -> Result<(SupervisorHandle, mpsc::UnboundedReceiver<Event>)> {
    let store = Arc::new(Store::open(&config.db_path)?);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    let (pty_tx, mut pty_rx) = mpsc::unbounded_channel();

    // PTY reader threads publish here; forwarding onto the control channel
    // serializes their deliveries with everything else.
    let forward_tx = msg_tx.clone();
    tokio::spawn(async move {
        while let Some(ev) = pty_rx.recv().await {
            if forward_tx.send(Msg::Pty(ev)).is_err() {
                break;
            }
        }
    });

    let mut supervisor = Supervisor {
        store,
        pty: PtyManager::new(pty_tx),
        engine: ContinuationEngine::new(),
        sessions: HashMap::new(),
        jobs: HashMap::new(),
        events: event_tx,
        tx: msg_tx.clone(),
        config,
    };
    tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            supervisor.handle(msg);
        }
        info!("supervisor control channel closed");
    });

    Ok((SupervisorHandle { tx: msg_tx }, event_rx))
}

struct Supervisor {
    store: Arc<Store>,
    pty: PtyManager,
    engine: ContinuationEngine,
    sessions: HashMap<String, SessionInfo>,
    jobs: HashMap<String, JobInfo>,
    events: mpsc::UnboundedSender<Event>,
    tx: mpsc::UnboundedSender<Msg>,
    config: SupervisorConfig,
}

impl Supervisor {
    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Command { cmd, reply } => self.handle_command(cmd, reply),
            Msg::Pty(PtyEvent::Data { pty_id, chunk }) => self.on_pty_data(pty_id, chunk),
            Msg::Pty(PtyEvent::Exit { pty_id, code }) => self.on_pty_exit(pty_id, code),
            Msg::ContinuationTick { pty_id, generation } => {
                self.on_continuation_tick(pty_id, generation)
            }
            Msg::GoalWrite { pty_id, token } => self.on_goal_write(pty_id, token),
            Msg::IdleTick { pty_id, generation } => self.on_idle_tick(pty_id, generation),
            Msg::SynthesisFinished { job_id } => {
                if let Some(job) = self.jobs.remove(&job_id) {
                    debug!(
                        job_id = %job_id,
                        workspace_id = %job.workspace_id,
                        goal = %job.goal,
                        total = job.total,
                        "synthesis job retired"
                    );
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command, reply: oneshot::Sender<Result<Response>>) {
        match cmd {
            // Synthesis blocks its caller but not the supervisor: the job
            // runs on its own task and answers the reply when done.
            Command::EnsembleSynthesis {
                workspace_id,
                workspace_path,
                goal,
                n,
            } => self.start_synthesis(workspace_id, workspace_path, goal, n, reply),
            other => {
                let result = self.dispatch(other);
                let _ = reply.send(result);
            }
        }
    }

    fn dispatch(&mut self, cmd: Command) -> Result<Response> {
        match cmd {
            Command::WorkspaceOpen { path } => self.workspace_open(&path),
            Command::WorkspaceList => Ok(Response::Workspaces(self.store.list_workspaces()?)),
            Command::WorkspaceGet { id } => Ok(Response::Workspace(self.store.get_workspace(&id)?)),
            Command::WorkspaceGetSkills { path } => Ok(Response::Skills(skills::load_skills(
                Path::new(&path),
                Some(&self.config.home),
            ))),
            Command::WorkspaceGetAgentsMd { path } => {
                Ok(Response::AgentsMd(skills::load_agents_md(Path::new(&path))))
            }
            Command::WorkspaceActiveSessions { workspace_id } => Ok(Response::Sessions(
                self.store.list_active_sessions(&workspace_id)?,
            )),

            Command::MemoryStore {
                workspace_id,
                key,
                content,
                category,
            } => {
                self.store.store_memory(
                    &workspace_id,
                    &key,
                    &content,
                    category.unwrap_or(MemoryCategory::Core),
                )?;
                Ok(Response::Ack)
            }
            Command::MemorySearch {
                workspace_id,
                query,
            } => Ok(Response::Memories(
                self.store.search_memory(&workspace_id, &query)?,
            )),
            Command::MemoryList {
                workspace_id,
                category,
            } => Ok(Response::Memories(
                self.store.list_memories(&workspace_id, category)?,
            )),
            Command::MemoryDelete { workspace_id, key } => Ok(Response::Deleted(
                self.store.delete_memory(&workspace_id, &key)?,
            )),

            Command::AgentRoute {
                description,
                preferred,
            } => {
                let preferred: Option<CliType> =
                    preferred.as_deref().map(str::parse).transpose()?;
                Ok(Response::Route(forge_router::route_task(
                    &description,
                    preferred,
                )))
            }

            Command::ShellSpawn {
                cli_type,
                workspace_path,
                workspace_id,
                goal,
                one_shot_loop,
                shell_session,
                resume_session_id,
            } => self.shell_spawn(
                &cli_type,
                &workspace_path,
                &workspace_id,
                goal,
                one_shot_loop,
                shell_session,
                resume_session_id,
            ),
            Command::ShellList => Ok(Response::PtyIds(self.pty.live_ids())),
            Command::ShellWrite { pty_id, data } => {
                self.pty.write(&pty_id, data.as_bytes());
                Ok(Response::Ack)
            }
            Command::ShellResize { pty_id, cols, rows } => {
                forge_pty::validate_size(cols, rows)?;
                if self.pty.is_live(&pty_id) {
                    self.pty.resize(&pty_id, cols, rows)?;
                }
                Ok(Response::Ack)
            }
            Command::ShellKill { pty_id } => {
                self.kill_session(&pty_id);
                Ok(Response::Ack)
            }
            Command::ShellOpenExternal { url } => {
                validate_external_url(&url)?;
                Ok(Response::Target(url))
            }
            Command::ShellOpenPath { path } => {
                if Path::new(&path).exists() {
                    Ok(Response::Target(path))
                } else {
                    Err(ForgeError::InvalidInput(format!(
                        "path does not exist: {path}"
                    )))
                }
            }

            Command::ContinuationStart {
                pty_id,
                goal,
                max_iterations,
                require_prompt,
                quiet_delay_ms,
                kick_off,
            } => self.continuation_start(
                &pty_id,
                &goal,
                max_iterations,
                require_prompt,
                quiet_delay_ms,
                kick_off,
            ),
            Command::ContinuationStop { pty_id } => {
                self.engine.stop(&pty_id);
                self.store.delete_continuation_state(&pty_id)?;
                Ok(Response::Ack)
            }
            Command::ContinuationState { pty_id } => {
                Ok(Response::Continuation(self.engine.snapshot(&pty_id)))
            }

            Command::EnsembleSynthesis { .. } => {
                unreachable!("synthesis is handled before dispatch")
            }
        }
    }

    // ── Workspaces ──────────────────────────────────────────

    fn workspace_open(&mut self, path: &str) -> Result<Response> {
        let abs = std::fs::canonicalize(path).map_err(|_| {
            ForgeError::InvalidInput(format!("directory does not exist: {path}"))
        })?;
        if !abs.is_dir() {
            return Err(ForgeError::InvalidInput(format!(
                "not a directory: {path}"
            )));
        }

        let id = workspace_id_for(&abs);
        let name = abs
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| abs.to_string_lossy().into_owned());
        let workspace = self
            .store
            .upsert_workspace(&id, &abs.to_string_lossy(), &name)?;

        let loaded_skills = skills::load_skills(&abs, Some(&self.config.home));
        let agents_md = skills::load_agents_md(&abs);
        info!(workspace_id = %id, path = %abs.display(), skills = loaded_skills.len(), "opened workspace");

        Ok(Response::Opened(OpenedWorkspace {
            workspace,
            skills: loaded_skills,
            agents_md,
        }))
    }

    // ── Shell sessions ──────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn shell_spawn(
        &mut self,
        cli_type: &str,
        workspace_path: &str,
        workspace_id: &str,
        goal: Option<String>,
        one_shot_loop: bool,
        shell_session: bool,
        resume_session_id: Option<String>,
    ) -> Result<Response> {
        let cli: CliType = cli_type.parse()?;
        let cwd = PathBuf::from(workspace_path);
        if !cwd.is_dir() {
            return Err(ForgeError::InvalidInput(format!(
                "workspace path is not a directory: {workspace_path}"
            )));
        }
        let goal = goal.map(|g| g.trim().to_string()).filter(|g| !g.is_empty());
        let resume = resume_session_id.filter(|s| !s.is_empty());

        let (spec, one_shot, interactive) = if shell_session {
            (forge_router::shell_spec(&cwd), false, false)
        } else if one_shot_loop {
            if cli != CliType::Claude {
                return Err(ForgeError::InvalidInput(
                    "one-shot loop is only supported for claude".into(),
                ));
            }
            if goal.is_none() {
                return Err(ForgeError::InvalidInput(
                    "one-shot loop requires a goal".into(),
                ));
            }
            // Persistent platform shell; the continuation writes the
            // one-shot command into it each iteration.
            (forge_router::shell_spec(&cwd), true, false)
        } else if let Some(sid) = resume {
            (forge_router::resume_spec(cli, &sid, &cwd)?, false, false)
        } else {
            (forge_router::spawn_spec(cli, &cwd), false, true)
        };

        let pty_spec = PtySpawnSpec::new(spec.cmd, spec.cwd).args(spec.args);
        // No session row is created when the spawn fails.
        let pty_id = self.pty.spawn(pty_spec)?;

        let session_id = uuid::Uuid::new_v4().to_string();
        self.store
            .create_agent_session(&session_id, workspace_id, cli.as_str(), goal.as_deref())?;

        let info = SessionInfo {
            session_id: session_id.clone(),
            workspace_id: workspace_id.to_string(),
            cli_type: cli,
            goal: goal.clone(),
            one_shot,
            had_output: false,
            killed: false,
            idle_generation: 0,
            goal_token: 0,
        };
        self.sessions.insert(pty_id.clone(), info);
        info!(pty_id = %pty_id, cli = %cli, workspace_id = %workspace_id, "session spawned");

        // An interactive spawn with a goal gets it typed in shortly after
        // the CLI has settled; killing the session first cancels the write.
        if interactive && goal.is_some() {
            self.schedule(
                self.config.goal_write_delay,
                Msg::GoalWrite {
                    pty_id: pty_id.clone(),
                    token: 0,
                },
            );
        }

        Ok(Response::Spawned { pty_id, session_id })
    }

    /// Idempotent teardown: handle out of the map first, then the child,
    /// then the session row, continuation and timers.
    fn kill_session(&mut self, pty_id: &str) {
        self.pty.kill(pty_id);
        if let Some(info) = self.sessions.get_mut(pty_id) {
            if !info.killed {
                info.killed = true;
                info.idle_generation += 1;
                info.goal_token += 1;
                if let Err(e) = self.store.end_agent_session(&info.session_id) {
                    warn!(pty_id = %pty_id, error = %e, "failed to end session row");
                }
            }
        }
        self.engine.stop(pty_id);
        let _ = self.store.delete_continuation_state(pty_id);
    }

    fn on_pty_data(&mut self, pty_id: String, chunk: String) {
        let Some(info) = self.sessions.get_mut(&pty_id) else {
            return;
        };
        info.had_output = true;
        info.idle_generation += 1;
        let idle_generation = info.idle_generation;
        let one_shot = info.one_shot;
        let killed = info.killed;

        if !killed {
            self.schedule(
                self.config.idle_notify_delay,
                Msg::IdleTick {
                    pty_id: pty_id.clone(),
                    generation: idle_generation,
                },
            );
        }

        let forwarded = if one_shot {
            strip_marker_lines(&chunk)
        } else {
            chunk.clone()
        };
        if !forwarded.is_empty() {
            let _ = self.events.send(Event::ShellData {
                pty_id: pty_id.clone(),
                chunk: forwarded,
            });
        }

        if let Some(arm) = self.engine.on_output(&pty_id, &chunk) {
            self.schedule_tick(&pty_id, arm);
        }
    }

    fn on_pty_exit(&mut self, pty_id: String, code: Option<u32>) {
        let _ = self.events.send(Event::ShellExit {
            pty_id: pty_id.clone(),
            code,
        });
        if let Some(info) = self.sessions.remove(&pty_id) {
            info!(pty_id = %pty_id, cli = %info.cli_type, code = ?code, "session ended");
            if let Err(e) = self.store.end_agent_session(&info.session_id) {
                warn!(pty_id = %pty_id, error = %e, "failed to end session row");
            }
            self.engine.stop(&pty_id);
            let _ = self.store.delete_continuation_state(&pty_id);
            let _ = self.events.send(Event::AgentExited { pty_id, code });
        }
    }

    // ── Continuation ────────────────────────────────────────

    fn continuation_start(
        &mut self,
        pty_id: &str,
        goal: &str,
        max_iterations: Option<u32>,
        require_prompt: Option<bool>,
        quiet_delay_ms: Option<u64>,
        kick_off: bool,
    ) -> Result<Response> {
        let Some(info) = self.sessions.get(pty_id) else {
            return Err(ForgeError::InvalidInput(format!(
                "no such session: {pty_id}"
            )));
        };
        if info.killed {
            return Err(ForgeError::InvalidInput(format!(
                "session already killed: {pty_id}"
            )));
        }

        let one_shot_command = if info.one_shot {
            Some(format!(
                "{}; echo {}",
                forge_router::one_shot_command(CliType::Claude, goal),
                ONE_SHOT_DONE_MARKER
            ))
        } else {
            None
        };

        let max = max_iterations
            .unwrap_or(crate::continuation::DEFAULT_MAX_ITERATIONS)
            .clamp(1, MAX_ITERATIONS_CAP);
        let opts = ContinuationOptions {
            max_iterations: max,
            require_prompt: require_prompt.unwrap_or(true),
            quiet_delay: quiet_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_QUIET_DELAY),
            kick_off,
            one_shot_command,
        };

        let workspace_id = info.workspace_id.clone();
        self.store
            .save_continuation_state(pty_id, &workspace_id, goal, max)?;

        match self.engine.start(pty_id, goal, opts) {
            StartAction::Kickoff {
                iteration,
                max,
                payload,
                arm,
            } => {
                self.emit_iteration(pty_id, iteration, max);
                self.pty.write(pty_id, payload.as_bytes());
                self.schedule_tick(pty_id, arm);
            }
            StartAction::Arm(arm) => self.schedule_tick(pty_id, arm),
        }
        Ok(Response::Ack)
    }

    fn on_continuation_tick(&mut self, pty_id: String, generation: u64) {
        match self.engine.on_tick(&pty_id, generation) {
            TickAction::Ignore => {}
            TickAction::Reschedule(arm) => self.schedule_tick(&pty_id, arm),
            TickAction::Continue {
                iteration,
                max,
                payload,
                arm,
            } => {
                // The iteration event always precedes the PTY write.
                self.emit_iteration(&pty_id, iteration, max);
                self.pty.write(&pty_id, payload.as_bytes());
                self.schedule_tick(&pty_id, arm);
            }
            TickAction::Done { iterations } => {
                let _ = self.store.delete_continuation_state(&pty_id);
                let _ = self.events.send(Event::ContinuationDone { pty_id, iterations });
            }
            TickAction::MaxReached { iterations, goal } => {
                let _ = self.store.delete_continuation_state(&pty_id);
                let _ = self.events.send(Event::ContinuationMaxReached {
                    pty_id,
                    iterations,
                    goal,
                });
            }
        }
    }

    fn emit_iteration(&mut self, pty_id: &str, iteration: u32, max: u32) {
        let _ = self.events.send(Event::ContinuationIteration {
            pty_id: pty_id.to_string(),
            iteration,
            max,
        });
        if let Err(e) = self.store.update_continuation_iteration(pty_id, iteration) {
            warn!(pty_id = %pty_id, error = %e, "checkpoint update failed");
        }
        if let Some(info) = self.sessions.get(pty_id) {
            if let Err(e) = self.store.increment_session_iteration(&info.session_id) {
                warn!(pty_id = %pty_id, error = %e, "iteration count update failed");
            }
        }
    }

    // ── Timers ──────────────────────────────────────────────

    fn on_goal_write(&mut self, pty_id: String, token: u64) {
        let Some(info) = self.sessions.get(&pty_id) else {
            return;
        };
        if info.killed || info.goal_token != token {
            return;
        }
        if let Some(goal) = &info.goal {
            debug!(pty_id = %pty_id, "writing initial goal into PTY");
            let line = format!("{goal}\r");
            self.pty.write(&pty_id, line.as_bytes());
        }
    }

    fn on_idle_tick(&mut self, pty_id: String, generation: u64) {
        let Some(info) = self.sessions.get(&pty_id) else {
            return;
        };
        if info.killed || info.idle_generation != generation || !info.had_output {
            return;
        }
        let _ = self.events.send(Event::AgentIdle { pty_id });
    }

    fn schedule(&self, delay: Duration, msg: Msg) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(msg);
        });
    }

    fn schedule_tick(&self, pty_id: &str, arm: Arm) {
        self.schedule(
            arm.delay,
            Msg::ContinuationTick {
                pty_id: pty_id.to_string(),
                generation: arm.generation,
            },
        );
    }

    // ── Ensemble ────────────────────────────────────────────

    fn start_synthesis(
        &mut self,
        workspace_id: String,
        workspace_path: String,
        goal: String,
        n: Option<u32>,
        reply: oneshot::Sender<Result<Response>>,
    ) {
        if goal.trim().is_empty() {
            let _ = reply.send(Err(ForgeError::InvalidInput(
                "synthesis requires a goal".into(),
            )));
            return;
        }
        let n = n.unwrap_or(DEFAULT_RUNS);
        let job_id = uuid::Uuid::new_v4().to_string();
        self.jobs.insert(
            job_id.clone(),
            JobInfo {
                workspace_id: workspace_id.clone(),
                goal: goal.clone(),
                total: n.clamp(ensemble::MIN_RUNS, ensemble::MAX_RUNS),
            },
        );

        let runner = Arc::clone(&self.config.runner);
        let home = self.config.home.clone();
        let events = self.events.clone();
        let tx = self.tx.clone();
        let ws_path = PathBuf::from(workspace_path);
        tokio::spawn(async move {
            let result = ensemble::run_synthesis(
                runner,
                home,
                job_id.clone(),
                workspace_id,
                ws_path,
                goal,
                n,
                events,
            )
            .await;
            let _ = tx.send(Msg::SynthesisFinished { job_id });
            let _ = reply.send(result.map(Response::Synthesis));
        });
    }
}

/// Workspace id: first 16 hex characters of the SHA-256 of the absolute
/// path.
pub fn workspace_id_for(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

/// Drop lines carrying the one-shot sentinel before data reaches the UI.
fn strip_marker_lines(chunk: &str) -> String {
    chunk
        .lines()
        .filter(|line| !line.contains(ONE_SHOT_DONE_MARKER))
        .collect::<Vec<_>>()
        .join("\n")
}
