//! The immutable unit of the change protocol.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::model::Cluster;

use super::payload::ChangePayload;

/// Cluster-history-unique identifier of one change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeUuid(Uuid);

impl ChangeUuid {
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ChangeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Monotonic record version. `Version::ZERO` means "no committed
/// configuration yet"; the genesis record is version 1.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    pub const ZERO: Version = Version(0);
    pub const GENESIS: Version = Version(1);

    pub fn new(v: u64) -> Self {
        Self(v)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Version {
        Version(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeState {
    Prepared,
    Committed,
    RolledBack,
}

impl ChangeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChangeState::Committed | ChangeState::RolledBack)
    }
}

impl fmt::Display for ChangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeState::Prepared => f.write_str("PREPARED"),
            ChangeState::Committed => f.write_str("COMMITTED"),
            ChangeState::RolledBack => f.write_str("ROLLED_BACK"),
        }
    }
}

/// Who performed a mutation, and when. Timestamps are server-assigned at
/// the moment of durable append.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeAudit {
    pub host: String,
    pub user: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl ChangeAudit {
    pub fn new(host: impl Into<String>, user: impl Into<String>, at: OffsetDateTime) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            at,
        }
    }
}

/// One entry of a node's change log. Immutable once written; commit and
/// rollback are recorded as a state transition of the tail, never as an
/// in-place edit of history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeRecord {
    pub uuid: ChangeUuid,
    pub parent_uuid: Option<ChangeUuid>,
    pub version: Version,
    pub state: ChangeState,
    pub payload: ChangePayload,
    /// The full candidate configuration produced by evaluating `payload`.
    pub result: Cluster,
    pub creation: ChangeAudit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ChangeAudit>,
}

impl ChangeRecord {
    pub fn prepared(
        uuid: ChangeUuid,
        parent_uuid: Option<ChangeUuid>,
        version: Version,
        payload: ChangePayload,
        result: Cluster,
        creation: ChangeAudit,
    ) -> Self {
        Self {
            uuid,
            parent_uuid,
            version,
            state: ChangeState::Prepared,
            payload,
            result,
            creation,
            approval: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
