//! Classification of shell commands against known-dangerous patterns.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One configurable dangerous-command rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DangerPattern {
    pub category: String,
    pub pattern: String,
}

impl DangerPattern {
    fn new(category: &str, pattern: &str) -> Self {
        Self {
            category: category.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

/// Built-in rules used when the configuration does not override them.
pub fn default_patterns() -> Vec<DangerPattern> {
    vec![
        DangerPattern::new(
            "recursive_root_deletion",
            r#"\brm\s+(?:-\S+\s+)*(?:-\S*[rR]\S*|--recursive)\s+(?:-\S+\s+)*["']?(?:/\*?|~/?|\$HOME/?)["']?(?:\s|;|&|\||$)"#,
        ),
        DangerPattern::new(
            "remote_pipe_to_shell",
            r"\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:ba|z|da|k)?sh\b",
        ),
        DangerPattern::new("fork_bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
        DangerPattern::new(
            "privilege_escalation",
            r"(?:^|[\s;&|(])(?:sudo|doas|su)(?:\s|$)",
        ),
        DangerPattern::new(
            "world_writable_permissions",
            r"\bchmod\s+(?:-\S+\s+)*(?:0?777|a\+rwx|ugo\+rwx)\b",
        ),
        DangerPattern::new(
            "raw_disk_write",
            r"\bmkfs(?:\.\w+)?\b|\bdd\b[^|;]*\bof=/dev/(?:sd|hd|nvme|disk|xvd|vd)|>\s*/dev/(?:sd|nvme|disk)",
        ),
    ]
}

/// Compiled rule set.
#[derive(Debug, Clone)]
pub struct DangerClassifier {
    rules: Vec<(String, Regex)>,
}

impl DangerClassifier {
    pub fn compile(patterns: &[DangerPattern]) -> Result<Self, regex::Error> {
        let rules = patterns
            .iter()
            .map(|rule| Ok((rule.category.clone(), Regex::new(&rule.pattern)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// Category of the first rule `command` matches.
    pub fn classify(&self, command: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|(_, regex)| regex.is_match(command))
            .map(|(category, _)| category.as_str())
    }
}
