//! Weighted keyword rules mapping a goal description to an assistant CLI.

use forge_common::{CliType, TaskCategory};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// The router's verdict for one description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub cli: CliType,
    pub category: TaskCategory,
    pub rationale: String,
    /// Matched weight over the rule's total weight, capped at 1.0.
    pub confidence: f32,
}

struct Rule {
    keywords: Vec<(Regex, f32)>,
    cli: CliType,
    category: TaskCategory,
    rationale: &'static str,
}

impl Rule {
    fn new(
        patterns: &[(&str, f32)],
        cli: CliType,
        category: TaskCategory,
        rationale: &'static str,
    ) -> Self {
        let keywords = patterns
            .iter()
            .map(|(p, w)| {
                let re = Regex::new(&format!("(?i){p}")).expect("static rule pattern");
                (re, *w)
            })
            .collect();
        Self {
            keywords,
            cli,
            category,
            rationale,
        }
    }

    fn matched_weight(&self, text: &str) -> f32 {
        self.keywords
            .iter()
            .filter(|(re, _)| re.is_match(text))
            .map(|(_, w)| *w)
            .sum()
    }

    fn total_weight(&self) -> f32 {
        self.keywords.iter().map(|(_, w)| *w).sum()
    }
}

/// Ordered rule list. Earlier rules win ties on matched weight.
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule::new(
            &[
                (r"\barchitect(ure)?\b", 1.0),
                (r"\bplan(ning)?\b", 0.8),
                (r"\brefactor(ing)?\b", 0.9),
                (r"\bwhy\b", 0.6),
                (r"\bhow does\b", 0.7),
                (r"\b(design\s+system|system\s+design)\b", 1.0),
            ],
            CliType::Claude,
            TaskCategory::Deep,
            "architecture and deep-reasoning keywords",
        ),
        Rule::new(
            &[
                (r"\bfrontend\b", 1.0),
                (r"\bui\b", 0.9),
                (r"\bcss\b", 1.0),
                (r"\breact\b", 0.9),
                (r"\btailwind\b", 1.0),
                (r"\blayout\b", 0.9),
                (r"\bstyl(e|ing)\b", 0.7),
                (r"\bdesign\b", 0.4),
            ],
            CliType::Gemini,
            TaskCategory::Visual,
            "frontend and visual-design keywords",
        ),
        Rule::new(
            &[
                (r"\bcomplete\b", 0.8),
                (r"\bboilerplate\b", 1.0),
                (r"\bscaffold(ing)?\b", 0.9),
                (r"\bsnippet\b", 0.9),
            ],
            CliType::Codex,
            TaskCategory::Code,
            "code-generation keywords",
        ),
        Rule::new(
            &[
                (r"\bcommit\b", 1.0),
                (r"\bpr\b", 0.9),
                (r"\bgithub\b", 0.9),
                (r"\bbranch\b", 0.8),
                (r"\bmerge\b", 0.8),
            ],
            CliType::Copilot,
            TaskCategory::Git,
            "git workflow keywords",
        ),
        Rule::new(
            &[
                (r"\bprivate\b", 1.0),
                (r"\boffline\b", 1.0),
                (r"\bconfidential\b", 1.0),
                (r"\bsensitive\b", 0.9),
            ],
            CliType::Llm,
            TaskCategory::Local,
            "privacy keywords favor the local model",
        ),
        Rule::new(
            &[
                (r"\bdocs?\b", 0.8),
                (r"\bexplain\b", 0.8),
                (r"\bwhat is\b", 0.9),
            ],
            CliType::Claude,
            TaskCategory::Research,
            "documentation and explanation keywords",
        ),
        Rule::new(
            &[(r"\bdebug(ging)?\b", 0.9), (r"\bstack\s*trace\b", 0.8)],
            CliType::Claude,
            TaskCategory::Deep,
            "debugging keywords",
        ),
        Rule::new(
            &[(r"\btests?\b", 0.8), (r"\bcoverage\b", 0.8)],
            CliType::Codex,
            TaskCategory::Code,
            "testing keywords",
        ),
    ]
});

/// Route a natural-language goal to an assistant CLI.
///
/// Pure: equal inputs always yield equal outputs. A preferred CLI
/// short-circuits with full confidence and its default category.
pub fn route_task(description: &str, preferred: Option<CliType>) -> RouteDecision {
    if let Some(cli) = preferred {
        return RouteDecision {
            cli,
            category: cli.default_category(),
            rationale: "user preference".into(),
            confidence: 1.0,
        };
    }

    let mut best: Option<(&Rule, f32)> = None;
    for rule in RULES.iter() {
        let matched = rule.matched_weight(description);
        if matched <= 0.0 {
            continue;
        }
        // Strict > keeps the earlier rule on ties.
        match best {
            Some((_, w)) if matched <= w => {}
            _ => best = Some((rule, matched)),
        }
    }

    match best {
        Some((rule, matched)) => RouteDecision {
            cli: rule.cli,
            category: rule.category,
            rationale: rule.rationale.into(),
            confidence: (matched / rule.total_weight()).min(1.0),
        },
        None => RouteDecision {
            cli: CliType::Claude,
            category: TaskCategory::Deep,
            rationale: "default".into(),
            confidence: 0.5,
        },
    }
}
