//! Best-of-N synthesis orchestration.
//!
//! Runs the same goal through N hidden single-shot Claude invocations,
//! each in an isolated home directory seeded with just the credential and
//! settings files, then feeds all answers to one final run bound to a
//! fresh session id the UI can resume.

use async_trait::async_trait;
use forge_common::{Event, ForgeError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const MIN_RUNS: u32 = 1;
pub const MAX_RUNS: u32 = 12;
pub const DEFAULT_RUNS: u32 = 5;

/// Watchdog for each hidden run.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(600);

/// Warning lines the assistant prints when its config was rewritten;
/// stripped from collected output before synthesis.
const CONFIG_WARNING_MARKERS: &[&str] = &[
    "configuration file at ~/.claude.json is corrupted",
    "restoring configuration from backup",
    "falling back to default configuration",
];

/// One hidden invocation of the assistant CLI.
#[derive(Debug, Clone)]
pub struct OneShotRequest {
    /// Directory substituted for HOME (and Windows equivalents).
    pub home: PathBuf,
    pub cwd: PathBuf,
    pub args: Vec<String>,
    /// Prompt delivered on stdin; never on argv.
    pub stdin: String,
    pub timeout: Duration,
}

/// How a hidden run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed { output: String, code: i32 },
    TimedOut,
    SpawnFailed(String),
}

/// Seam over process execution so tests can substitute canned answers.
#[async_trait]
pub trait OneShotRunner: Send + Sync {
    async fn run(&self, req: OneShotRequest) -> RunOutcome;
}

/// Real runner: spawns `claude` with piped stdio and a kill-on-timeout
/// watchdog.
pub struct ClaudeRunner;

#[async_trait]
impl OneShotRunner for ClaudeRunner {
    async fn run(&self, req: OneShotRequest) -> RunOutcome {
        let mut cmd = tokio::process::Command::new("claude");
        cmd.args(&req.args)
            .current_dir(&req.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("HOME", &req.home);
        if cfg!(windows) {
            cmd.env("USERPROFILE", &req.home)
                .env("HOMEDRIVE", "")
                .env("HOMEPATH", &req.home)
                .env("APPDATA", req.home.join("AppData").join("Roaming"))
                .env("LOCALAPPDATA", req.home.join("AppData").join("Local"));
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return RunOutcome::SpawnFailed(e.to_string()),
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(req.stdin.as_bytes()).await {
                debug!(error = %e, "failed to write prompt to child stdin");
            }
            // Dropping closes stdin so the CLI starts working.
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let collector = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut out = String::new();
            if let Some(mut stdout) = stdout {
                let _ = stdout.read_to_string(&mut out).await;
            }
            if let Some(mut stderr) = stderr {
                let mut err = String::new();
                let _ = stderr.read_to_string(&mut err).await;
                out.push_str(&err);
            }
            out
        });

        tokio::select! {
            status = child.wait() => {
                let output = collector.await.unwrap_or_default();
                match status {
                    Ok(status) => RunOutcome::Completed {
                        output,
                        code: status.code().unwrap_or(-1),
                    },
                    Err(e) => RunOutcome::SpawnFailed(e.to_string()),
                }
            }
            _ = tokio::time::sleep(req.timeout) => {
                warn!(timeout_secs = req.timeout.as_secs(), "hidden run timed out, killing child");
                let _ = child.start_kill();
                let _ = child.wait().await;
                collector.abort();
                RunOutcome::TimedOut
            }
        }
    }
}

/// Seed files copied into every isolated home.
#[derive(Debug, Clone, Default)]
struct SeedFiles {
    claude_json: Option<PathBuf>,
    credentials: Option<PathBuf>,
    settings: Option<PathBuf>,
    settings_local: Option<PathBuf>,
    claude_md: Option<PathBuf>,
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}

/// Pick the seed files from the user's real home. The real home is only
/// ever read: a corrupt `~/.claude.json` is replaced *in the seed set* by
/// the newest parseable backup, never rewritten on disk.
fn collect_seed_files(real_home: &Path) -> SeedFiles {
    let claude_dir = real_home.join(".claude");
    SeedFiles {
        claude_json: select_claude_json(real_home),
        credentials: existing(claude_dir.join(".credentials.json")),
        settings: existing(claude_dir.join("settings.json")),
        settings_local: existing(claude_dir.join("settings.local.json")),
        claude_md: existing(claude_dir.join("CLAUDE.md")),
    }
}

fn parses_as_json(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
        .is_some()
}

fn select_claude_json(real_home: &Path) -> Option<PathBuf> {
    let primary = real_home.join(".claude.json");
    if !primary.exists() {
        return None;
    }
    if parses_as_json(&primary) {
        return Some(primary);
    }

    warn!(path = %primary.display(), "~/.claude.json does not parse, looking for a backup");
    let backups = real_home.join(".claude").join("backups");
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    let entries = std::fs::read_dir(&backups).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || !parses_as_json(&path) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            newest = Some((modified, path));
        }
    }
    match newest {
        Some((_, path)) => {
            info!(backup = %path.display(), "seeding isolated homes from config backup");
            Some(path)
        }
        None => {
            warn!("no parseable config backup found, runs proceed without ~/.claude.json");
            None
        }
    }
}

/// Create a fresh isolated home and copy the seed files in.
fn build_isolated_home(seed: &SeedFiles) -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::Builder::new()
        .prefix("forge-ensemble-")
        .tempdir()
        .map_err(|e| ForgeError::Ensemble(format!("temp home creation failed: {e}")))?;
    let home = dir.path().join("home");
    std::fs::create_dir_all(&home)?;
    if cfg!(windows) {
        std::fs::create_dir_all(home.join("AppData").join("Roaming"))?;
        std::fs::create_dir_all(home.join("AppData").join("Local"))?;
    }

    let claude_dir = home.join(".claude");
    let copies: [(&Option<PathBuf>, PathBuf); 5] = [
        (&seed.claude_json, home.join(".claude.json")),
        (&seed.credentials, claude_dir.join(".credentials.json")),
        (&seed.settings, claude_dir.join("settings.json")),
        (&seed.settings_local, claude_dir.join("settings.local.json")),
        (&seed.claude_md, claude_dir.join("CLAUDE.md")),
    ];
    for (src, dst) in copies {
        if let Some(src) = src {
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if let Err(e) = std::fs::copy(src, &dst) {
                debug!(src = %src.display(), error = %e, "seed copy skipped");
            }
        }
    }
    Ok((dir, home))
}

/// Strip known config-corruption warnings and collapse runs of three or
/// more blank lines down to two.
fn filter_run_output(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blanks = 0usize;
    for line in raw.lines() {
        let lower = line.to_lowercase();
        if CONFIG_WARNING_MARKERS.iter().any(|m| lower.contains(m)) {
            continue;
        }
        if line.trim().is_empty() {
            blanks += 1;
            if blanks > 2 {
                continue;
            }
        } else {
            blanks = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim_end_matches('\n').to_string()
}

fn slot_text(outcome: RunOutcome) -> String {
    match outcome {
        RunOutcome::Completed { output, code: 0 } => filter_run_output(&output),
        RunOutcome::Completed { output, code } => {
            let filtered = filter_run_output(&output);
            if filtered.is_empty() {
                format!("(exit code {code})")
            } else {
                format!("{filtered}\n(exit code {code})")
            }
        }
        RunOutcome::TimedOut => "(timed out)".to_string(),
        RunOutcome::SpawnFailed(e) => format!("(runner error: {e})"),
    }
}

fn synthesis_prompt(n: u32, combined: &str) -> String {
    format!(
        "You are a world-class synthesizer. Here are {n} independent answers \
         to the same task, produced in isolation from each other.\n\n{combined}\n\n\
         Produce one final, concise, high-quality answer that combines the \
         strongest elements of every attempt."
    )
}

/// Result handed back to the command caller.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SynthesisOutcome {
    pub ok: bool,
    pub count: u32,
    pub session_id: String,
    pub job_id: String,
}

/// Run the whole best-of-N procedure for one goal.
///
/// Progress events carry non-decreasing `completed` values; exactly one
/// `ensemble.done` follows a successful final run. Individual run failures
/// land in their slot as placeholder text and never abort the job.
#[allow(clippy::too_many_arguments)]
pub async fn run_synthesis(
    runner: Arc<dyn OneShotRunner>,
    real_home: PathBuf,
    job_id: String,
    workspace_id: String,
    workspace_path: PathBuf,
    goal: String,
    n: u32,
    events: mpsc::UnboundedSender<Event>,
) -> Result<SynthesisOutcome> {
    let n = n.clamp(MIN_RUNS, MAX_RUNS);
    info!(job_id = %job_id, n, "starting synthesis job");

    let progress = |completed: u32| {
        let _ = events.send(Event::EnsembleProgress {
            job_id: job_id.clone(),
            workspace_id: workspace_id.clone(),
            goal: goal.clone(),
            completed,
            total: n,
        });
    };
    progress(0);

    let seed = collect_seed_files(&real_home);

    let mut join_set = JoinSet::new();
    for index in 0..n {
        let runner = Arc::clone(&runner);
        let seed = seed.clone();
        let cwd = workspace_path.clone();
        let goal = goal.clone();
        join_set.spawn(async move {
            let text = run_one_hidden(runner.as_ref(), &seed, &cwd, &goal).await;
            (index, text)
        });
    }

    let mut slots: Vec<String> = vec![String::new(); n as usize];
    let mut completed = 0u32;
    while let Some(joined) = join_set.join_next().await {
        let (index, text) = joined
            .unwrap_or_else(|e| (u32::MAX, format!("(runner error: {e})")));
        if let Some(slot) = slots.get_mut(index as usize) {
            *slot = text;
        }
        completed += 1;
        progress(completed);
    }

    let combined = slots
        .iter()
        .enumerate()
        .map(|(i, text)| format!("=== Claude {}/{} ===\n{}", i + 1, n, text))
        .collect::<Vec<_>>()
        .join("\n\n");

    let session_id = uuid::Uuid::new_v4().to_string();
    let final_req = OneShotRequest {
        home: real_home,
        cwd: workspace_path,
        args: vec![
            "-p".into(),
            "--session-id".into(),
            session_id.clone(),
        ],
        stdin: synthesis_prompt(n, &combined),
        timeout: RUN_TIMEOUT,
    };
    match runner.run(final_req).await {
        RunOutcome::SpawnFailed(e) => {
            return Err(ForgeError::Ensemble(format!(
                "synthesis spawn failed: {e}"
            )));
        }
        RunOutcome::TimedOut => {
            warn!(job_id = %job_id, "final synthesis run timed out");
        }
        RunOutcome::Completed { .. } => {}
    }

    let _ = events.send(Event::EnsembleDone {
        job_id: job_id.clone(),
        workspace_id,
        goal,
        session_id: session_id.clone(),
        total: n,
    });
    info!(job_id = %job_id, session_id = %session_id, "synthesis job done");

    Ok(SynthesisOutcome {
        ok: true,
        count: n,
        session_id,
        job_id,
    })
}

/// One hidden run in its own isolated home. The temp directory is removed
/// in every path when `_dir` drops; the explicit `close` surfaces cleanup
/// problems to the log.
async fn run_one_hidden(
    runner: &dyn OneShotRunner,
    seed: &SeedFiles,
    cwd: &Path,
    goal: &str,
) -> String {
    let (dir, home) = match build_isolated_home(seed) {
        Ok(pair) => pair,
        Err(e) => return format!("(runner error: {e})"),
    };

    let outcome = runner
        .run(OneShotRequest {
            home,
            cwd: cwd.to_path_buf(),
            args: vec!["-p".into(), "--no-session-persistence".into()],
            stdin: goal.to_string(),
            timeout: RUN_TIMEOUT,
        })
        .await;

    if let Err(e) = dir.close() {
        debug!(error = %e, "isolated home cleanup failed");
    }
    slot_text(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct MockRunner {
        responses: Mutex<VecDeque<RunOutcome>>,
        requests: Mutex<Vec<OneShotRequest>>,
    }

    impl MockRunner {
        fn new(responses: Vec<RunOutcome>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<OneShotRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OneShotRunner for MockRunner {
        async fn run(&self, req: OneShotRequest) -> RunOutcome {
            self.requests.lock().unwrap().push(req);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(RunOutcome::TimedOut)
        }
    }

    fn completed(output: &str) -> RunOutcome {
        RunOutcome::Completed {
            output: output.to_string(),
            code: 0,
        }
    }

    #[tokio::test]
    async fn synthesis_end_to_end_with_two_runs() {
        let runner = Arc::new(MockRunner::new(vec![
            completed("A1"),
            completed("A2"),
            completed("final answer"),
        ]));
        let home = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = run_synthesis(
            runner.clone(),
            home.path().to_path_buf(),
            "job-1".into(),
            "w1".into(),
            ws.path().to_path_buf(),
            "solve it".into(),
            2,
            tx,
        )
        .await
        .unwrap();

        assert!(outcome.ok);
        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.job_id, "job-1");
        assert!(!outcome.session_id.is_empty());

        // progress 0, 1, 2, then done.
        let mut completed_values = Vec::new();
        let mut done = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                Event::EnsembleProgress { completed, total, .. } => {
                    assert_eq!(total, 2);
                    completed_values.push(completed);
                }
                Event::EnsembleDone { session_id, total, .. } => {
                    assert_eq!(total, 2);
                    assert_eq!(session_id, outcome.session_id);
                    done += 1;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(completed_values, vec![0, 1, 2]);
        assert_eq!(done, 1);

        // Hidden runs got stdin prompts and isolated homes; both temp
        // roots are gone afterwards.
        let requests = runner.requests();
        assert_eq!(requests.len(), 3);
        for req in &requests[..2] {
            assert_eq!(req.stdin, "solve it");
            assert_eq!(req.args, vec!["-p", "--no-session-persistence"]);
            assert_ne!(req.home, home.path());
            assert!(!req.home.exists());
        }
        // The final run is bound to the fresh session id and the real home.
        let final_req = &requests[2];
        assert_eq!(
            final_req.args,
            vec!["-p", "--session-id", outcome.session_id.as_str()]
        );
        assert_eq!(final_req.home, home.path());
        assert!(final_req.stdin.contains("=== Claude 1/2 ==="));
        assert!(final_req.stdin.contains("=== Claude 2/2 ==="));
        assert!(final_req.stdin.contains("world-class synthesizer"));
    }

    #[tokio::test]
    async fn failed_runs_fill_their_slot() {
        let runner = Arc::new(MockRunner::new(vec![
            RunOutcome::TimedOut,
            RunOutcome::Completed {
                output: String::new(),
                code: 3,
            },
            completed("final"),
        ]));
        let home = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let outcome = run_synthesis(
            runner.clone(),
            home.path().to_path_buf(),
            "job-2".into(),
            "w1".into(),
            ws.path().to_path_buf(),
            "goal".into(),
            2,
            tx,
        )
        .await
        .unwrap();
        assert!(outcome.ok);

        let final_req = runner.requests().into_iter().last().unwrap();
        assert!(final_req.stdin.contains("(timed out)"));
        assert!(final_req.stdin.contains("(exit code 3)"));
    }

    #[tokio::test]
    async fn final_spawn_failure_surfaces() {
        let runner = Arc::new(MockRunner::new(vec![
            completed("A1"),
            RunOutcome::SpawnFailed("claude not found".into()),
        ]));
        let home = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = run_synthesis(
            runner,
            home.path().to_path_buf(),
            "job-3".into(),
            "w1".into(),
            ws.path().to_path_buf(),
            "goal".into(),
            1,
            tx,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("synthesis spawn failed"));

        // No done event on failure.
        while let Ok(ev) = rx.try_recv() {
            assert!(matches!(ev, Event::EnsembleProgress { .. }));
        }
    }

    #[tokio::test]
    async fn n_is_clamped() {
        let runner = Arc::new(MockRunner::new(
            (0..13).map(|_| completed("x")).collect(),
        ));
        let home = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let outcome = run_synthesis(
            runner,
            home.path().to_path_buf(),
            "job-4".into(),
            "w1".into(),
            ws.path().to_path_buf(),
            "goal".into(),
            99,
            tx,
        )
        .await
        .unwrap();
        assert_eq!(outcome.count, MAX_RUNS);
    }

    #[test]
    fn filter_collapses_blank_runs_and_strips_warnings() {
        let raw = "line one\n\n\n\n\nline two\nWarning: configuration file at ~/.claude.json is corrupted\nline three";
        let filtered = filter_run_output(raw);
        assert_eq!(filtered, "line one\n\n\nline two\nline three");
    }

    #[test]
    fn slot_text_variants() {
        assert_eq!(slot_text(RunOutcome::TimedOut), "(timed out)");
        assert_eq!(
            slot_text(RunOutcome::SpawnFailed("boom".into())),
            "(runner error: boom)"
        );
        assert_eq!(
            slot_text(RunOutcome::Completed {
                output: String::new(),
                code: 7
            }),
            "(exit code 7)"
        );
        assert_eq!(
            slot_text(completed("fine\n")),
            "fine"
        );
    }

    #[test]
    fn corrupt_config_seed_falls_back_to_newest_backup() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join(".claude.json"), "{not json").unwrap();
        let backups = home.path().join(".claude").join("backups");
        std::fs::create_dir_all(&backups).unwrap();
        std::fs::write(backups.join("old.json"), "{\"v\":1}").unwrap();
        std::fs::write(backups.join("broken.json"), "nope").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(backups.join("new.json"), "{\"v\":2}").unwrap();

        let seed = collect_seed_files(home.path());
        assert_eq!(seed.claude_json.unwrap(), backups.join("new.json"));
        // The corrupt file on disk is untouched.
        assert_eq!(
            std::fs::read_to_string(home.path().join(".claude.json")).unwrap(),
            "{not json"
        );
    }

    #[test]
    fn valid_config_is_used_directly() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join(".claude.json"), "{\"ok\":true}").unwrap();
        let seed = collect_seed_files(home.path());
        assert_eq!(seed.claude_json.unwrap(), home.path().join(".claude.json"));
    }

    #[test]
    fn isolated_home_copies_only_seed_files() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join(".claude.json"), "{}").unwrap();
        let claude_dir = home.path().join(".claude");
        std::fs::create_dir_all(&claude_dir).unwrap();
        std::fs::write(claude_dir.join("settings.json"), "{}").unwrap();
        std::fs::write(claude_dir.join("unrelated.txt"), "secret").unwrap();

        let seed = collect_seed_files(home.path());
        let (dir, iso_home) = build_isolated_home(&seed).unwrap();
        assert!(iso_home.join(".claude.json").is_file());
        assert!(iso_home.join(".claude").join("settings.json").is_file());
        assert!(!iso_home.join(".claude").join("unrelated.txt").exists());
        dir.close().unwrap();
    }
}
