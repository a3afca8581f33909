//! Per-session continuation state machine.
//!
//! Watches PTY output and decides, after a quiet period, whether to
//! re-engage the assistant with a "next step" write. The machine itself is
//! synchronous; the supervisor arms timers for it and feeds ticks back in.
//! Every re-arm bumps a generation counter, so a stale timer that fires
//! after new output (or after cancellation) is ignored.

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_MAX_ITERATIONS: u32 = 20;
pub const MAX_ITERATIONS_CAP: u32 = 100;
pub const MIN_QUIET_DELAY: Duration = Duration::from_millis(250);
pub const DEFAULT_QUIET_DELAY: Duration = Duration::from_millis(12_000);

/// Sentinel appended by the one-shot loop so a finished step reads as an
/// idle prompt.
pub const ONE_SHOT_DONE_MARKER: &str = "__FORGE_STEP_DONE__";

const BUFFER_CAP: usize = 50_000;
const BUFFER_KEEP: usize = 20_000;
const PROMPT_WINDOW_LINES: usize = 5;

static PROMPT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"❯\s*$",
        r"\$\s?$",
        r"^[A-Za-z]:\\[^>]*>\s*$",
        r"\b(claude|gemini|codex)>\s*$",
        r"^\s*>\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static prompt pattern"))
    .collect()
});

static COMPLETION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<promise>DONE</promise>|all tasks completed|task complete|finished successfully|completed successfully",
    )
    .expect("static completion pattern")
});

/// Tuning knobs for one continuation.
#[derive(Debug, Clone)]
pub struct ContinuationOptions {
    /// Clamped to `[1, 100]`.
    pub max_iterations: u32,
    /// Require an idle prompt in the recent output before re-engaging.
    pub require_prompt: bool,
    /// Minimum 250 ms of silence before the timer fires.
    pub quiet_delay: Duration,
    /// Run iteration 1 immediately, skipping the first quiet wait and
    /// prompt check.
    pub kick_off: bool,
    /// Full command to write each step instead of the bare `continue`.
    pub one_shot_command: Option<String>,
}

impl Default for ContinuationOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            require_prompt: true,
            quiet_delay: DEFAULT_QUIET_DELAY,
            kick_off: false,
            one_shot_command: None,
        }
    }
}

/// Instruction to arm the quiet timer. The generation must be echoed back
/// on the tick; mismatched ticks are stale and get ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arm {
    pub delay: Duration,
    pub generation: u64,
}

/// What `start` asks the caller to do.
#[derive(Debug, Clone, PartialEq)]
pub enum StartAction {
    /// Write `payload` now as iteration 1, then arm the timer.
    Kickoff {
        iteration: u32,
        max: u32,
        payload: String,
        arm: Arm,
    },
    /// Just arm the timer.
    Arm(Arm),
}

/// What a timer tick resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum TickAction {
    /// Stale generation or no such continuation.
    Ignore,
    /// Not ready (no idle prompt yet); arm again.
    Reschedule(Arm),
    /// Emit the iteration event, then write `payload` to the PTY, then
    /// arm again.
    Continue {
        iteration: u32,
        max: u32,
        payload: String,
        arm: Arm,
    },
    /// Completion signal seen. State is gone.
    Done { iterations: u32 },
    /// Iteration cap hit. State is gone.
    MaxReached { iterations: u32, goal: String },
}

/// UI-visible snapshot of a running continuation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContinuationSnapshot {
    pub pty_id: String,
    pub goal: String,
    pub max_iterations: u32,
    pub current_iteration: u32,
    pub status: &'static str,
}

#[derive(Debug)]
struct ContinuationState {
    goal: String,
    max_iterations: u32,
    current_iteration: u32,
    require_prompt: bool,
    quiet_delay: Duration,
    buffer: String,
    generation: u64,
    payload: String,
}

impl ContinuationState {
    fn arm(&mut self) -> Arm {
        self.generation += 1;
        Arm {
            delay: self.quiet_delay,
            generation: self.generation,
        }
    }
}

/// All live continuations, keyed by `pty_id`. At most one per session.
#[derive(Default)]
pub struct ContinuationEngine {
    states: HashMap<String, ContinuationState>,
}

impl ContinuationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a continuation, replacing any prior one for this `pty_id`.
    pub fn start(&mut self, pty_id: &str, goal: &str, opts: ContinuationOptions) -> StartAction {
        let max_iterations = opts.max_iterations.clamp(1, MAX_ITERATIONS_CAP);
        let quiet_delay = opts.quiet_delay.max(MIN_QUIET_DELAY);
        let payload = match opts.one_shot_command {
            Some(cmd) => format!("{cmd}\n"),
            None => "continue\n".to_string(),
        };

        let mut state = ContinuationState {
            goal: goal.to_string(),
            max_iterations,
            current_iteration: 0,
            require_prompt: opts.require_prompt,
            quiet_delay,
            buffer: String::new(),
            generation: 0,
            payload: payload.clone(),
        };

        info!(
            pty_id = %pty_id,
            max_iterations,
            kick_off = opts.kick_off,
            "starting continuation"
        );

        let action = if opts.kick_off {
            state.current_iteration = 1;
            let arm = state.arm();
            StartAction::Kickoff {
                iteration: 1,
                max: max_iterations,
                payload,
                arm,
            }
        } else {
            StartAction::Arm(state.arm())
        };

        self.states.insert(pty_id.to_string(), state);
        action
    }

    /// Feed a chunk of PTY output. Returns a re-arm instruction while the
    /// continuation is alive.
    pub fn on_output(&mut self, pty_id: &str, chunk: &str) -> Option<Arm> {
        let state = self.states.get_mut(pty_id)?;

        let clean = strip_ansi_escapes::strip(chunk.as_bytes());
        state.buffer.push_str(&String::from_utf8_lossy(&clean));

        if state.buffer.len() > BUFFER_CAP {
            let mut cut = state.buffer.len() - BUFFER_KEEP;
            while !state.buffer.is_char_boundary(cut) {
                cut += 1;
            }
            state.buffer.drain(..cut);
        }

        Some(state.arm())
    }

    /// Resolve a quiet-timer tick.
    pub fn on_tick(&mut self, pty_id: &str, generation: u64) -> TickAction {
        let Some(state) = self.states.get_mut(pty_id) else {
            return TickAction::Ignore;
        };
        if state.generation != generation {
            return TickAction::Ignore;
        }

        if COMPLETION_PATTERN.is_match(&state.buffer) {
            let iterations = state.current_iteration;
            self.states.remove(pty_id);
            info!(pty_id = %pty_id, iterations, "continuation complete");
            return TickAction::Done { iterations };
        }

        if state.require_prompt && !prompt_idle(&state.buffer) {
            debug!(pty_id = %pty_id, "no idle prompt yet, rescheduling");
            return TickAction::Reschedule(state.arm());
        }

        if state.current_iteration >= state.max_iterations {
            let iterations = state.current_iteration;
            let goal = state.goal.clone();
            self.states.remove(pty_id);
            info!(pty_id = %pty_id, iterations, "continuation hit iteration cap");
            return TickAction::MaxReached { iterations, goal };
        }

        state.current_iteration += 1;
        state.buffer.clear();
        let iteration = state.current_iteration;
        let max = state.max_iterations;
        let payload = state.payload.clone();
        let arm = state.arm();
        debug!(pty_id = %pty_id, iteration, max, "continuation step");
        TickAction::Continue {
            iteration,
            max,
            payload,
            arm,
        }
    }

    /// Cancel a continuation. Returns whether one existed.
    pub fn stop(&mut self, pty_id: &str) -> bool {
        let existed = self.states.remove(pty_id).is_some();
        if existed {
            info!(pty_id = %pty_id, "continuation cancelled");
        }
        existed
    }

    pub fn is_running(&self, pty_id: &str) -> bool {
        self.states.contains_key(pty_id)
    }

    pub fn snapshot(&self, pty_id: &str) -> Option<ContinuationSnapshot> {
        self.states.get(pty_id).map(|s| ContinuationSnapshot {
            pty_id: pty_id.to_string(),
            goal: s.goal.clone(),
            max_iterations: s.max_iterations,
            current_iteration: s.current_iteration,
            status: "running",
        })
    }
}

/// True when the tail of the buffer looks like a shell or assistant
/// waiting at a prompt.
fn prompt_idle(buffer: &str) -> bool {
    buffer
        .lines()
        .rev()
        .take(PROMPT_WINDOW_LINES)
        .any(|line| {
            line.contains(ONE_SHOT_DONE_MARKER)
                || PROMPT_PATTERNS.iter().any(|re| re.is_match(line))
        })
}
