//! Bounded, auditable agent loop driven by a remote model.
//!
//! A model proposes one action at a time; tether validates it, runs it locally
//! under safety constraints, records it, and feeds the outcome back. The crate
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (decision parsing, limits, path
//!   normalization, redaction, dangerous-command classification). No I/O.
//! - **[`io`]**: Side-effecting adapters (filesystem tools, processes, git
//!   snapshots, audit log, model HTTP client, config).
//!
//! Orchestration lives in [`agent`] (the state machine) and [`safety`] (the gate
//! every tool call passes before execution).

pub mod agent;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod safety;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
