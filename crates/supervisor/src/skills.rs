//! Workspace skill and context-file loaders.
//!
//! Pure filesystem readers: SKILL.md frontmatter is parsed with line
//! regexes and bodies are returned verbatim. One unreadable file never
//! breaks a workspace open; bad entries are skipped.

use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// Skill directories scanned inside a workspace, in precedence order.
const WORKSPACE_SKILL_DIRS: &[&str] = &[".forge/skills", ".claude/skills", ".opencode/skills"];

/// Global skill directory under the user's home.
const GLOBAL_SKILL_DIR: &str = ".forge/skills";

static NAME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^name:\s*(.+?)\s*$").expect("static pattern"));
static DESCRIPTION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^description:\s*(.+?)\s*$").expect("static pattern"));

/// One loaded SKILL.md.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// Markdown body below the frontmatter, verbatim.
    pub body: String,
    pub path: PathBuf,
}

/// The workspace context file, verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentsMd {
    pub path: PathBuf,
    pub content: String,
}

/// Scan workspace-local and global skill directories.
pub fn load_skills(workspace: &Path, home: Option<&Path>) -> Vec<Skill> {
    let mut roots: Vec<PathBuf> = WORKSPACE_SKILL_DIRS
        .iter()
        .map(|d| workspace.join(d))
        .collect();
    if let Some(home) = home {
        roots.push(home.join(GLOBAL_SKILL_DIR));
    }

    let mut skills = Vec::new();
    for root in roots {
        let entries = match std::fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let skill_md = entry.path().join("SKILL.md");
            match load_skill_file(&skill_md) {
                Some(skill) => skills.push(skill),
                None => debug!(path = %skill_md.display(), "skipped skill entry"),
            }
        }
    }
    skills
}

fn load_skill_file(path: &Path) -> Option<Skill> {
    let content = std::fs::read_to_string(path).ok()?;
    let (frontmatter, body) = split_frontmatter(&content);

    let name = NAME_LINE
        .captures(frontmatter)
        .map(|c| c[1].to_string())
        .or_else(|| {
            path.parent()
                .and_then(|d| d.file_name())
                .map(|n| n.to_string_lossy().into_owned())
        })?;
    let description = DESCRIPTION_LINE
        .captures(frontmatter)
        .map(|c| c[1].to_string())
        .unwrap_or_default();

    Some(Skill {
        name,
        description,
        body: body.to_string(),
        path: path.to_path_buf(),
    })
}

/// Split a `---` fenced frontmatter block from the body. Files without a
/// fence are all body.
fn split_frontmatter(content: &str) -> (&str, &str) {
    let Some(rest) = content.strip_prefix("---\n") else {
        return ("", content);
    };
    match rest.find("\n---") {
        Some(end) => {
            let frontmatter = &rest[..end];
            let after = &rest[end + 4..];
            (frontmatter, after.strip_prefix('\n').unwrap_or(after))
        }
        None => ("", content),
    }
}

/// First existing context file: `AGENTS.md`, `CLAUDE.md`, `.forge/AGENTS.md`.
pub fn load_agents_md(workspace: &Path) -> Option<AgentsMd> {
    for candidate in ["AGENTS.md", "CLAUDE.md", ".forge/AGENTS.md"] {
        let path = workspace.join(candidate);
        if let Ok(content) = std::fs::read_to_string(&path) {
            return Some(AgentsMd { path, content });
        }
    }
    None
}
