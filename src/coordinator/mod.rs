//! Operator-side drivers: one session per change, plus repair.

mod recovery;
mod session;

pub use recovery::{PolicyParseError, RepairOutcome, RepairPolicy, RepairSession, RepairVerdict};
pub use session::{
    CancelToken, ChangeCoordinator, Divergence, SessionError, SessionVerdict, DEFAULT_DEADLINE,
};
