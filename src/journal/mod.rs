//! Durable append-only change log, one per node.
//!
//! On disk the log is a single file of CRC-framed, schema-versioned JSON
//! entries. Every append is written and fsynced before it is acknowledged;
//! replay truncates a torn tail and refuses to start on corruption that is
//! not explainable as a torn final write.

mod codec;
mod frame;
mod store;

pub use codec::{CheckpointMark, Envelope, LogEntry, SCHEMA_VERSION};
pub use frame::{encode_frame, FrameRead, FrameReader, MAX_ENTRY_BYTES};
pub use store::{ChangeLog, ReplayStats, LOG_FILE_NAME};

use std::path::PathBuf;

use thiserror::Error;

use crate::change::{ChangeUuid, Version};

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("append conflict: {reason}")]
    Conflict { reason: String },
    #[error("malformed change log at {path:?} offset {offset}: {reason}")]
    Malformed {
        path: PathBuf,
        offset: u64,
        reason: String,
    },
    #[error("change log entry too large ({got_bytes} bytes, max {max_bytes})")]
    EntryTooLarge { max_bytes: usize, got_bytes: usize },
    #[error("no record at version {version}")]
    NoSuchVersion { version: Version },
    #[error("tail is not a prepared record for {uuid}")]
    TailMismatch { uuid: ChangeUuid },
}

pub type JournalResult<T> = Result<T, JournalError>;
