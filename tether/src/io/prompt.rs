//! System prompt rendering.

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::decision::decision_schema;
use crate::core::limits::RunLimits;
use crate::io::tools::catalog;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

#[derive(Debug, Clone, Serialize)]
struct ToolEntry {
    name: &'static str,
    args: &'static str,
    description: &'static str,
}

/// Inputs for the system prompt.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub workspace: &'a Path,
    pub limits: &'a RunLimits,
    pub project_context: Option<&'a str>,
}

/// Render the system prompt: tool catalog, response contract, rules, project context.
pub fn render_system_prompt(inputs: &PromptInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("system", SYSTEM_TEMPLATE)
        .context("load system prompt template")?;
    let tools: Vec<ToolEntry> = catalog()
        .iter()
        .map(|spec| ToolEntry {
            name: spec.name.as_str(),
            args: spec.args,
            description: spec.description,
        })
        .collect();
    let schema =
        serde_json::to_string_pretty(&decision_schema()).context("serialize decision schema")?;
    let rendered = env.get_template("system")?.render(context! {
        workspace => inputs.workspace.display().to_string(),
        schema => schema,
        tools => tools,
        limits => inputs.limits,
        project_context => inputs.project_context.map(str::trim).filter(|s| !s.is_empty()),
    })?;
    debug!(len = rendered.len(), "system prompt rendered");
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ToolName;

    fn render(project_context: Option<&str>) -> String {
        render_system_prompt(&PromptInputs {
            workspace: Path::new("/work"),
            limits: &RunLimits::default(),
            project_context,
        })
        .expect("render")
    }

    #[test]
    fn lists_every_tool() {
        let prompt = render(None);
        for tool in ToolName::ALL {
            assert!(prompt.contains(&format!("- `{}`", tool.as_str())), "{tool}");
        }
    }

    #[test]
    fn includes_limits_and_schema() {
        let prompt = render(None);
        assert!(prompt.contains("at most 20 replies"));
        assert!(prompt.contains("\"tool_call\""));
        assert!(!prompt.contains("## Project context"));
    }

    #[test]
    fn includes_project_context_when_present() {
        let prompt = render(Some("Run `make check` before finishing."));
        assert!(prompt.contains("## Project context"));
        assert!(prompt.contains("make check"));
    }
}
