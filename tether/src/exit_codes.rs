//! Stable exit codes for tether CLI commands.

use crate::agent::Termination;

/// Command succeeded; for `run`, the model declared the task done.
pub const OK: i32 = 0;
/// Command failed due to invalid config/arguments or other errors.
pub const INVALID: i32 = 1;
/// `tether run` stopped on a run limit.
pub const LIMIT_EXCEEDED: i32 = 2;
/// `tether run` gave up on malformed model replies.
pub const PROTOCOL_ERROR: i32 = 3;
/// `tether run` hit an unrecoverable model or transport failure.
pub const FATAL_ERROR: i32 = 4;
/// `tether run` was interrupted.
pub const CANCELLED: i32 = 130;

pub fn for_termination(termination: &Termination) -> i32 {
    match termination {
        Termination::Success { .. } => OK,
        Termination::LimitExceeded { .. } => LIMIT_EXCEEDED,
        Termination::ProtocolError { .. } => PROTOCOL_ERROR,
        Termination::FatalError { .. } => FATAL_ERROR,
        Termination::Cancelled => CANCELLED,
    }
}
