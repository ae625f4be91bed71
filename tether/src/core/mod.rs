//! Deterministic, pure logic shared by the agent loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod cancel;
pub mod conversation;
pub mod danger;
pub mod decision;
pub mod diff;
pub mod limits;
pub mod path;
pub mod redact;
pub mod types;
