//! Builders for the concrete commands each assistant CLI is driven with:
//! shell-safe one-shot invocations and interactive spawn specs.

use forge_common::{CliType, ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How to spawn an interactive child: program, args, working directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnSpec {
    pub cmd: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// Quote a string for the platform shell.
///
/// POSIX shells get `'…'` with embedded quotes rewritten to `'"'"'`;
/// Windows shells get `'…'` with quotes doubled. Internal newlines are
/// collapsed to spaces first so the result stays a one-liner.
pub fn shell_quote(text: &str) -> String {
    let flat = text.replace("\r\n", " ").replace(['\n', '\r'], " ");
    if cfg!(windows) {
        format!("'{}'", flat.replace('\'', "''"))
    } else {
        format!("'{}'", flat.replace('\'', "'\"'\"'"))
    }
}

/// One-line command running `cli` non-interactively against `goal`.
///
/// Only suitable for short goals written into an interactive shell; large
/// prompts go over stdin instead (see the ensemble orchestrator).
pub fn one_shot_command(cli: CliType, goal: &str) -> String {
    let quoted = shell_quote(goal);
    match cli {
        CliType::Claude => format!("claude -p {quoted}"),
        CliType::Gemini => format!("gemini -p {quoted}"),
        CliType::Codex => format!("codex exec {quoted}"),
        CliType::Copilot => format!("copilot -p {quoted}"),
        CliType::Qwen => format!("qwen -p {quoted}"),
        CliType::Llm => format!("llm {quoted}"),
    }
}

/// Spec for an interactive session of `cli` in `cwd`.
pub fn spawn_spec(cli: CliType, cwd: &Path) -> SpawnSpec {
    let (cmd, args) = match cli {
        CliType::Llm => ("llm", vec!["chat".to_string()]),
        other => (other.as_str(), Vec::new()),
    };
    SpawnSpec {
        cmd: cmd.to_string(),
        args,
        cwd: cwd.to_path_buf(),
    }
}

/// Spec resuming a prior Claude conversation. Resume exists only for
/// Claude in this core.
pub fn resume_spec(cli: CliType, session_id: &str, cwd: &Path) -> Result<SpawnSpec> {
    if cli != CliType::Claude {
        return Err(ForgeError::InvalidInput(format!(
            "resume is only supported for claude, not {cli}"
        )));
    }
    if session_id.is_empty() {
        return Err(ForgeError::InvalidInput(
            "resume requires a session id".into(),
        ));
    }
    Ok(SpawnSpec {
        cmd: "claude".into(),
        args: vec!["--resume".into(), session_id.into()],
        cwd: cwd.to_path_buf(),
    })
}

/// Spec for a plain platform shell in `cwd`.
pub fn shell_spec(cwd: &Path) -> SpawnSpec {
    let cmd = if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".into())
    };
    SpawnSpec {
        cmd,
        args: Vec::new(),
        cwd: cwd.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_plain_text() {
        assert_eq!(shell_quote("hello world"), "'hello world'");
    }

    #[cfg(unix)]
    #[test]
    fn quote_embedded_single_quote_posix() {
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
    }

    #[test]
    fn quote_collapses_newlines() {
        let quoted = shell_quote("line one\nline two\r\nline three");
        assert!(!quoted.contains('\n'));
        assert!(!quoted.contains('\r'));
        assert!(quoted.contains("line one line two"));
    }

    #[test]
    fn one_shot_commands_per_cli() {
        assert_eq!(
            one_shot_command(CliType::Claude, "do it"),
            "claude -p 'do it'"
        );
        assert_eq!(
            one_shot_command(CliType::Codex, "do it"),
            "codex exec 'do it'"
        );
        assert_eq!(one_shot_command(CliType::Llm, "do it"), "llm 'do it'");
    }

    #[cfg(unix)]
    #[test]
    fn one_shot_survives_hostile_goal() {
        let cmd = one_shot_command(CliType::Claude, "rm -rf /; echo 'pwned'");
        // The payload must stay inside the quoted argument.
        assert!(cmd.starts_with("claude -p '"));
        assert!(cmd.contains("'\"'\"'"));
    }

    #[test]
    fn interactive_spec_for_llm_uses_chat() {
        let spec = spawn_spec(CliType::Llm, Path::new("/tmp"));
        assert_eq!(spec.cmd, "llm");
        assert_eq!(spec.args, vec!["chat"]);
    }

    #[test]
    fn interactive_spec_for_claude_is_bare() {
        let spec = spawn_spec(CliType::Claude, Path::new("/tmp"));
        assert_eq!(spec.cmd, "claude");
        assert!(spec.args.is_empty());
    }

    #[test]
    fn resume_requires_claude() {
        assert!(resume_spec(CliType::Gemini, "abc", Path::new("/tmp")).is_err());
        assert!(resume_spec(CliType::Claude, "", Path::new("/tmp")).is_err());
        let spec = resume_spec(CliType::Claude, "abc", Path::new("/tmp")).unwrap();
        assert_eq!(spec.args, vec!["--resume", "abc"]);
    }
}
