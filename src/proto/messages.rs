//! Protocol messages. Every field survives a serialize/deserialize
//! round-trip; rejections are values carried inside successful responses.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::change::{ChangePayload, ChangeRecord, ChangeState, ChangeUuid, RejectReason, Version};
use crate::journal::CheckpointMark;

/// Whether the answering server is the writable head of its stripe or a
/// mirror. Informational for the coordinator; mirrors learn committed
/// configurations through platform replication.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMode {
    ActiveCoordinator,
    Passive,
}

impl std::fmt::Display for ServerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerMode::ActiveCoordinator => f.write_str("ACTIVE_COORDINATOR"),
            ServerMode::Passive => f.write_str("PASSIVE"),
        }
    }
}

/// Originator of a mutative request. Timestamps are never client-supplied;
/// nodes stamp mutations with their own clock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OriginIdentity {
    pub host: String,
    pub user: String,
}

impl OriginIdentity {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
        }
    }

    /// `CONCORD_USER` overrides the detected username, mirroring how the
    /// operator tool is usually driven from automation.
    pub fn detect() -> Self {
        let user = std::env::var("CONCORD_USER").unwrap_or_else(|_| whoami::username());
        let host = whoami::fallible::hostname().unwrap_or_else(|_| "unknown".into());
        Self { host, user }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoverRequest {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoverResponse {
    pub mode: ServerMode,
    pub mutative_message_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mutation_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mutation_user: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_mutation_timestamp: Option<OffsetDateTime>,
    pub current_version: Version,
    pub highest_version: Version,
    /// The tail record, if the log has any entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_change: Option<ChangeRecord>,
    /// Uuid of the highest committed record; pairwise agreement on this is
    /// part of the coordinator's consistency check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_committed_uuid: Option<ChangeUuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checkpoints: Vec<CheckpointMark>,
}

impl DiscoverResponse {
    pub fn tail_state(&self) -> Option<ChangeState> {
        self.latest_change.as_ref().map(|r| r.state)
    }

    /// A non-terminal tail means a prior change is still in flight.
    pub fn has_prepared_tail(&self) -> bool {
        self.tail_state() == Some(ChangeState::Prepared)
    }
}

/// Typed refusal of a mutative request. The counters in the enclosing
/// response tell the coordinator what the node actually saw.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    #[error("a write slipped in: expected mutative count {expected}, node is at {actual}")]
    Concurrent { expected: u64, actual: u64 },
    #[error("another change {uuid} is already prepared")]
    AlreadyPrepared { uuid: ChangeUuid },
    #[error("no prepared change to resolve")]
    NotPrepared,
    #[error("prepared change is {expected}, request names {got}")]
    UuidMismatch { expected: ChangeUuid, got: ChangeUuid },
    #[error("expected version {expected}, request names {got}")]
    BadVersion { expected: Version, got: Version },
    #[error("change rejected: {reason}")]
    EvaluationReject { reason: RejectReason },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrepareRequest {
    pub expected_mutative_count: u64,
    pub change_uuid: ChangeUuid,
    pub new_version: Version,
    pub payload: ChangePayload,
    pub identity: OriginIdentity,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommitRequest {
    pub expected_mutative_count: u64,
    pub change_uuid: ChangeUuid,
    pub identity: OriginIdentity,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RollbackRequest {
    pub expected_mutative_count: u64,
    pub change_uuid: ChangeUuid,
    pub identity: OriginIdentity,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TakeOverRequest {
    pub expected_mutative_count: u64,
    pub change_uuid: ChangeUuid,
    pub identity: OriginIdentity,
}

/// Outcome of prepare/commit/rollback, with the node's counters as of the
/// answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MutationResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
    pub mutative_message_count: u64,
    pub current_version: Version,
    pub highest_version: Version,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TakeOverResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
    pub mutative_message_count: u64,
    /// The prepared tail the new coordinator now owns resolving.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail: Option<ChangeRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ChangeAudit, SettingTarget};
    use crate::model::{Cluster, Node, NodeAddress, Stripe};
    use time::macros::datetime;
    use uuid::Uuid;

    fn uuid(n: u8) -> ChangeUuid {
        ChangeUuid::new(Uuid::from_bytes([n; 16]))
    }

    fn tail_record() -> ChangeRecord {
        ChangeRecord::prepared(
            uuid(1),
            None,
            Version::GENESIS,
            ChangePayload::SettingChange {
                target: SettingTarget::Cluster,
                key: "offheap-resources".to_string(),
                value: Some("main:1GB".to_string()),
            },
            Cluster::new(
                "tc",
                vec![Stripe::new(
                    "stripe1",
                    vec![Node::new("node1", NodeAddress::new("localhost", 9410))],
                )],
            ),
            ChangeAudit::new("opshost", "alice", datetime!(2024-03-01 12:00 UTC)),
        )
    }

    #[test]
    fn discover_response_roundtrips() {
        let response = DiscoverResponse {
            mode: ServerMode::ActiveCoordinator,
            mutative_message_count: 7,
            last_mutation_host: Some("opshost".to_string()),
            last_mutation_user: Some("alice".to_string()),
            last_mutation_timestamp: Some(datetime!(2024-03-01 12:00 UTC)),
            current_version: Version::ZERO,
            highest_version: Version::GENESIS,
            latest_change: Some(tail_record()),
            latest_committed_uuid: None,
            checkpoints: vec![CheckpointMark {
                uuid: uuid(2),
                version: Version::GENESIS,
                label: "nightly".to_string(),
            }],
        };
        let json = serde_json::to_string(&response).unwrap();
        let back: DiscoverResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response);
        assert!(back.has_prepared_tail());
    }

    #[test]
    fn discover_request_is_an_empty_object() {
        let json = serde_json::to_string(&DiscoverRequest {}).unwrap();
        assert_eq!(json, "{}");
        let back: DiscoverRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DiscoverRequest {});
    }

    #[test]
    fn mutation_requests_roundtrip() {
        let identity = OriginIdentity::new("opshost", "alice");
        let prepare = PrepareRequest {
            expected_mutative_count: 4,
            change_uuid: uuid(3),
            new_version: Version::new(2),
            payload: ChangePayload::DetachNode {
                address: NodeAddress::new("h2", 9410),
            },
            identity: identity.clone(),
        };
        let back: PrepareRequest =
            serde_json::from_str(&serde_json::to_string(&prepare).unwrap()).unwrap();
        assert_eq!(back, prepare);

        let commit = CommitRequest {
            expected_mutative_count: 5,
            change_uuid: uuid(3),
            identity,
        };
        let back: CommitRequest =
            serde_json::from_str(&serde_json::to_string(&commit).unwrap()).unwrap();
        assert_eq!(back, commit);
    }

    #[test]
    fn rejections_roundtrip_with_kind_tags() {
        let rejections = vec![
            Rejection::Concurrent {
                expected: 3,
                actual: 4,
            },
            Rejection::AlreadyPrepared { uuid: uuid(5) },
            Rejection::NotPrepared,
            Rejection::UuidMismatch {
                expected: uuid(1),
                got: uuid(2),
            },
            Rejection::BadVersion {
                expected: Version::new(2),
                got: Version::new(7),
            },
            Rejection::EvaluationReject {
                reason: RejectReason::LastStripe,
            },
        ];
        for rejection in rejections {
            let json = serde_json::to_string(&rejection).unwrap();
            assert!(json.contains("\"kind\""));
            let back: Rejection = serde_json::from_str(&json).unwrap();
            assert_eq!(back, rejection);
        }
    }

    #[test]
    fn unknown_wire_fields_are_rejected() {
        let json = r#"{"expected_mutative_count":1,"change_uuid":"00000000-0000-0000-0000-000000000000","identity":{"host":"h","user":"u"},"extra":1}"#;
        assert!(serde_json::from_str::<CommitRequest>(json).is_err());
    }
}
