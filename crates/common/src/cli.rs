//! Assistant CLI identifiers and task categories.

use crate::error::ForgeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The assistant CLIs the orchestrator knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CliType {
    Claude,
    Gemini,
    Codex,
    Copilot,
    Qwen,
    Llm,
}

impl CliType {
    /// All known CLI types, in display order.
    pub const ALL: [CliType; 6] = [
        CliType::Claude,
        CliType::Gemini,
        CliType::Codex,
        CliType::Copilot,
        CliType::Qwen,
        CliType::Llm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CliType::Claude => "claude",
            CliType::Gemini => "gemini",
            CliType::Codex => "codex",
            CliType::Copilot => "copilot",
            CliType::Qwen => "qwen",
            CliType::Llm => "llm",
        }
    }

    /// Category a preferred CLI implies when the router short-circuits.
    pub fn default_category(&self) -> TaskCategory {
        match self {
            CliType::Gemini => TaskCategory::Visual,
            CliType::Codex => TaskCategory::Code,
            CliType::Copilot => TaskCategory::Git,
            CliType::Llm => TaskCategory::Local,
            CliType::Qwen => TaskCategory::Quick,
            CliType::Claude => TaskCategory::Deep,
        }
    }
}

impl fmt::Display for CliType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CliType {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(CliType::Claude),
            "gemini" => Ok(CliType::Gemini),
            "codex" => Ok(CliType::Codex),
            "copilot" => Ok(CliType::Copilot),
            "qwen" => Ok(CliType::Qwen),
            "llm" => Ok(CliType::Llm),
            other => Err(ForgeError::InvalidInput(format!(
                "unknown CLI type: {other}"
            ))),
        }
    }
}

/// Broad task categories the router assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Deep,
    Visual,
    Code,
    Git,
    Local,
    Quick,
    Research,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Deep => "deep",
            TaskCategory::Visual => "visual",
            TaskCategory::Code => "code",
            TaskCategory::Git => "git",
            TaskCategory::Local => "local",
            TaskCategory::Quick => "quick",
            TaskCategory::Research => "research",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_cli_types() {
        for cli in CliType::ALL {
            assert_eq!(cli.as_str().parse::<CliType>().unwrap(), cli);
        }
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!("chatgpt".parse::<CliType>().is_err());
        assert!("Claude".parse::<CliType>().is_err());
        assert!("".parse::<CliType>().is_err());
    }

    #[test]
    fn default_categories() {
        assert_eq!(CliType::Gemini.default_category(), TaskCategory::Visual);
        assert_eq!(CliType::Codex.default_category(), TaskCategory::Code);
        assert_eq!(CliType::Copilot.default_category(), TaskCategory::Git);
        assert_eq!(CliType::Llm.default_category(), TaskCategory::Local);
        assert_eq!(CliType::Qwen.default_category(), TaskCategory::Quick);
        assert_eq!(CliType::Claude.default_category(), TaskCategory::Deep);
    }

    #[test]
    fn serde_lowercase_roundtrip() {
        let json = serde_json::to_string(&CliType::Copilot).unwrap();
        assert_eq!(json, "\"copilot\"");
        let back: CliType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CliType::Copilot);
    }
}
