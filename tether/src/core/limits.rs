//! Run limits and the counters that enforce them.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Caps applied to a single agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunLimits {
    /// Model calls per run.
    pub max_iterations: u32,
    /// Executor invocations per run.
    pub max_tool_calls_per_session: u32,
    /// Distinct files mutated by `write`, `edit` and `apply`.
    pub max_files_touched_per_run: u32,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            max_tool_calls_per_session: 50,
            max_files_touched_per_run: 5,
        }
    }
}

/// Which limit stopped the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Iterations,
    ToolCalls,
    FilesTouched,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LimitKind::Iterations => "iterations",
            LimitKind::ToolCalls => "tool_calls",
            LimitKind::FilesTouched => "files_touched",
        };
        f.write_str(label)
    }
}

/// Mutable per-run counters. Owned by the orchestrator, never shared.
#[derive(Debug, Clone, Default)]
pub struct RunCounters {
    iterations: u32,
    tool_calls: u32,
    touched: BTreeSet<PathBuf>,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn tool_calls(&self) -> u32 {
        self.tool_calls
    }

    pub fn touched(&self) -> impl Iterator<Item = &Path> {
        self.touched.iter().map(PathBuf::as_path)
    }

    /// Consume one iteration, or report that the budget is spent.
    pub fn begin_iteration(&mut self, limits: &RunLimits) -> Result<(), LimitKind> {
        if self.iterations >= limits.max_iterations {
            return Err(LimitKind::Iterations);
        }
        self.iterations += 1;
        Ok(())
    }

    /// Check whether another executor invocation fits the tool-call budget.
    pub fn admit_call(&self, limits: &RunLimits) -> Result<(), LimitKind> {
        if self.tool_calls >= limits.max_tool_calls_per_session {
            return Err(LimitKind::ToolCalls);
        }
        Ok(())
    }

    /// Check whether an allowed call fits the touched-file budget.
    ///
    /// `mutated` lists files a `write` or `edit` would touch; `apply` budgets are
    /// checked by the safety gate instead, since they deny rather than terminate.
    pub fn admit_files(&self, limits: &RunLimits, mutated: &[PathBuf]) -> Result<(), LimitKind> {
        if self.new_files(mutated) > self.remaining_files(limits) {
            return Err(LimitKind::FilesTouched);
        }
        Ok(())
    }

    pub fn record_tool_call(&mut self) {
        self.tool_calls += 1;
    }

    /// Charge successfully mutated files against the touched-file budget.
    pub fn charge_files<I>(&mut self, paths: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.touched.extend(paths);
    }

    /// Number of `paths` not yet charged.
    pub fn new_files(&self, paths: &[PathBuf]) -> usize {
        paths
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|path| !self.touched.contains(*path))
            .count()
    }

    pub fn remaining_files(&self, limits: &RunLimits) -> usize {
        (limits.max_files_touched_per_run as usize).saturating_sub(self.touched.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(iterations: u32, calls: u32, files: u32) -> RunLimits {
        RunLimits {
            max_iterations: iterations,
            max_tool_calls_per_session: calls,
            max_files_touched_per_run: files,
        }
    }

    #[test]
    fn iterations_stop_at_cap() {
        let limits = limits(2, 10, 10);
        let mut counters = RunCounters::new();
        assert_eq!(counters.begin_iteration(&limits), Ok(()));
        assert_eq!(counters.begin_iteration(&limits), Ok(()));
        assert_eq!(
            counters.begin_iteration(&limits),
            Err(LimitKind::Iterations)
        );
        assert_eq!(counters.iterations(), 2);
    }

    #[test]
    fn tool_calls_stop_at_cap() {
        let limits = limits(10, 1, 10);
        let mut counters = RunCounters::new();
        assert_eq!(counters.admit_call(&limits), Ok(()));
        counters.record_tool_call();
        assert_eq!(counters.admit_call(&limits), Err(LimitKind::ToolCalls));
    }

    #[test]
    fn retouching_a_charged_file_is_free() {
        let limits = limits(10, 10, 1);
        let mut counters = RunCounters::new();
        counters.charge_files([PathBuf::from("a.txt")]);
        assert_eq!(
            counters.admit_files(&limits, &[PathBuf::from("a.txt")]),
            Ok(())
        );
        assert_eq!(
            counters.admit_files(&limits, &[PathBuf::from("b.txt")]),
            Err(LimitKind::FilesTouched)
        );
    }

    #[test]
    fn new_files_deduplicates_input() {
        let counters = RunCounters::new();
        let paths = [PathBuf::from("a"), PathBuf::from("a"), PathBuf::from("b")];
        assert_eq!(counters.new_files(&paths), 2);
    }
}
