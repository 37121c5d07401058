//! Schema-versioned entry envelope serialized inside each frame.

use serde::{Deserialize, Serialize};

use crate::change::{ChangeAudit, ChangeRecord, ChangeState, ChangeUuid, Version};

/// Version of the persisted envelope layout. Readers accept entries up to
/// and including this version and refuse anything newer.
pub const SCHEMA_VERSION: u32 = 1;

/// Opaque compaction/audit marker. Preserved verbatim through discover.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointMark {
    pub uuid: ChangeUuid,
    pub version: Version,
    pub label: String,
}

/// One durable journal entry. A `Record` opens a change at the tail; a
/// `Resolution` closes the prepared tail; a `TakeOver` records the handoff
/// of resolution rights; a `Checkpoint` is opaque.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    Record(ChangeRecord),
    Resolution {
        uuid: ChangeUuid,
        state: ChangeState,
        approval: ChangeAudit,
    },
    TakeOver {
        uuid: ChangeUuid,
        audit: ChangeAudit,
    },
    Checkpoint(CheckpointMark),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub schema_version: u32,
    pub entry: LogEntry,
}

impl Envelope {
    pub fn new(entry: LogEntry) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            entry,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, String> {
        serde_json::to_vec(self).map_err(|e| e.to_string())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        let envelope: Envelope = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        if envelope.schema_version > SCHEMA_VERSION {
            return Err(format!(
                "entry schema version {} is newer than supported {}",
                envelope.schema_version, SCHEMA_VERSION
            ));
        }
        Ok(envelope)
    }
}
