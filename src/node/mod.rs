//! Per-node protocol engine and its serialization queue.

mod server;
mod state_machine;

pub use server::{NodeHandle, NodeServer};
pub use state_machine::NodeStateMachine;

use std::path::PathBuf;

use thiserror::Error;

use crate::journal::JournalError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// A durability failure stops the machine; it never acknowledges
    /// another mutation until the operator restarts the node.
    #[error("state machine halted after a durability failure")]
    Halted,
    #[error("bootstrap configuration unreadable at {path:?}: {reason}")]
    Bootstrap { path: PathBuf, reason: String },
}
