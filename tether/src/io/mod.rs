//! Side-effecting adapters used by the agent loop.

pub mod audit;
pub mod config;
pub mod context;
pub mod git;
pub mod model;
pub mod process;
pub mod prompt;
pub mod snapshot;
pub mod tools;
