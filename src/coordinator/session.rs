//! Drives one configuration change across every node of the cluster.
//!
//! The coordinator is the operator's session: it never shares driving
//! responsibility. Mutual exclusion against other coordinators comes from
//! the per-node mutative message counter, not from any lock service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::change::{ChangePayload, ChangeUuid, Version};
use crate::model::NodeAddress;
use crate::proto::{
    CommitRequest, DiscoverResponse, EndpointError, NodeEndpoint, OriginIdentity, PrepareRequest,
    Rejection, RollbackRequest,
};

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// Operator-side cancellation. Between prepare and commit a cancelled
/// session rolls its acceptors back; once any commit is acknowledged the
/// commit fan-out always runs to completion.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One node's view during the consistency check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Divergence {
    pub address: NodeAddress,
    pub current_version: Version,
    pub latest_committed_uuid: Option<ChangeUuid>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cluster is partially reachable: {}", render_failures(.failures))]
    PartialCluster {
        failures: Vec<(NodeAddress, EndpointError)>,
    },
    #[error("a prior change is still in flight on {}", render_prepared(.nodes))]
    PriorChangeInFlight {
        nodes: Vec<(NodeAddress, ChangeUuid)>,
    },
    #[error("cluster configuration is inconsistent across nodes")]
    InconsistentCluster { observed: Vec<Divergence> },
    #[error("another coordinator intervened on {}", render_addresses(.nodes))]
    RaceDetected { nodes: Vec<NodeAddress> },
    #[error("session cancelled by the operator")]
    Cancelled,
}

fn render_failures(failures: &[(NodeAddress, EndpointError)]) -> String {
    failures
        .iter()
        .map(|(a, e)| format!("{a} ({e})"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_prepared(nodes: &[(NodeAddress, ChangeUuid)]) -> String {
    nodes
        .iter()
        .map(|(a, u)| format!("{a} (change {u})"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_addresses(nodes: &[NodeAddress]) -> String {
    nodes
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// What a finished session reports back to the operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionVerdict {
    /// Every target committed.
    Committed { uuid: ChangeUuid, version: Version },
    /// Prepare did not get unanimity; every acceptor was rolled back.
    RolledBack {
        uuid: ChangeUuid,
        rejections: Vec<(NodeAddress, Rejection)>,
        unreachable: Vec<(NodeAddress, EndpointError)>,
    },
    /// Commit was decided but some targets did not acknowledge it; repair
    /// will drive the stragglers forward.
    PartiallyCommitted {
        uuid: ChangeUuid,
        version: Version,
        committed: Vec<NodeAddress>,
        failed: Vec<(NodeAddress, String)>,
    },
    /// Rollback was decided but some acceptors did not acknowledge it.
    PartiallyRolledBack {
        uuid: ChangeUuid,
        rejections: Vec<(NodeAddress, Rejection)>,
        rolled_back: Vec<NodeAddress>,
        failed: Vec<(NodeAddress, String)>,
    },
}

impl SessionVerdict {
    pub fn is_committed(&self) -> bool {
        matches!(self, SessionVerdict::Committed { .. })
    }
}

pub struct ChangeCoordinator {
    identity: OriginIdentity,
    deadline: Duration,
    cancel: CancelToken,
}

impl ChangeCoordinator {
    pub fn new(identity: OriginIdentity) -> Self {
        Self {
            identity,
            deadline: DEFAULT_DEADLINE,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the full prepare / commit-or-rollback session for `payload`
    /// against `targets`.
    pub fn run(
        &self,
        targets: &[&dyn NodeEndpoint],
        payload: ChangePayload,
    ) -> Result<SessionVerdict, SessionError> {
        // Phase A: first discovery.
        let discoveries = self.discover_all(targets)?;
        self.check_no_change_in_flight(targets, &discoveries)?;
        self.check_consistency(targets, &discoveries)?;

        // Phase B: local evaluation of identity and version. The next
        // version follows the highest tail, not the highest commit:
        // rolled-back records keep their version numbers, so a chain that
        // ends in a rollback still hands out head.version + 1.
        let uuid = ChangeUuid::mint();
        let new_version = discoveries
            .iter()
            .map(|d| d.highest_version)
            .max()
            .unwrap_or(Version::ZERO)
            .next();
        let counts: Vec<u64> = discoveries.iter().map(|d| d.mutative_message_count).collect();
        info!(%uuid, version = %new_version, change = %payload.summary(), "change session starting");

        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        // Phase C: prepare fan-out.
        let prepares = fan_out(targets, |i, target| {
            target.prepare(
                PrepareRequest {
                    expected_mutative_count: counts[i],
                    change_uuid: uuid,
                    new_version,
                    payload: payload.clone(),
                    identity: self.identity.clone(),
                },
                self.deadline,
            )
        });

        let mut acceptors = Vec::new();
        let mut rejections = Vec::new();
        let mut unreachable = Vec::new();
        for (i, outcome) in prepares.iter().enumerate() {
            match outcome {
                Ok(response) if response.accepted => acceptors.push(i),
                Ok(response) => {
                    let rejection = response
                        .rejection
                        .clone()
                        .unwrap_or(Rejection::NotPrepared);
                    warn!(address = %targets[i].address(), %rejection, "prepare rejected");
                    rejections.push((targets[i].address().clone(), rejection));
                }
                Err(err) => {
                    warn!(address = %targets[i].address(), error = %err, "prepare did not answer");
                    unreachable.push((targets[i].address().clone(), err.clone()));
                }
            }
        }

        if !rejections.is_empty() || !unreachable.is_empty() {
            return Ok(self.roll_back_acceptors(targets, uuid, &counts, &acceptors, rejections, unreachable));
        }

        if self.cancel.is_cancelled() {
            let _ = self.roll_back_acceptors(targets, uuid, &counts, &acceptors, Vec::new(), Vec::new());
            return Err(SessionError::Cancelled);
        }

        // Phase D: second discovery. Every tail must be the change we just
        // prepared, otherwise another coordinator slipped in.
        let second = fan_out(targets, |_, target| target.discover(self.deadline));
        let mut intruded = Vec::new();
        let mut lost = Vec::new();
        for (i, outcome) in second.iter().enumerate() {
            match outcome {
                Ok(response)
                    if response.latest_change.as_ref().is_some_and(|t| t.uuid == uuid)
                        && response.has_prepared_tail() => {}
                Ok(_) => intruded.push(targets[i].address().clone()),
                Err(err) => lost.push((targets[i].address().clone(), err.clone())),
            }
        }
        if !intruded.is_empty() || !lost.is_empty() {
            let still_ours: Vec<usize> = (0..targets.len())
                .filter(|i| {
                    matches!(
                        &second[*i],
                        Ok(r) if r.has_prepared_tail()
                            && r.latest_change.as_ref().is_some_and(|t| t.uuid == uuid)
                    )
                })
                .collect();
            let _ = self.roll_back_acceptors(targets, uuid, &counts, &still_ours, Vec::new(), Vec::new());
            if intruded.is_empty() {
                return Err(SessionError::PartialCluster { failures: lost });
            }
            return Err(SessionError::RaceDetected { nodes: intruded });
        }

        // Cancellation between prepare and commit still rolls back; after
        // the first commit acknowledgment the outcome is decided.
        if self.cancel.is_cancelled() {
            let _ = self.roll_back_acceptors(targets, uuid, &counts, &acceptors, Vec::new(), Vec::new());
            return Err(SessionError::Cancelled);
        }

        // Phase E: commit fan-out. Rejections here are reported, never
        // aborted on; every target gets its commit attempt.
        let commits = fan_out(targets, |i, target| {
            target.commit(
                CommitRequest {
                    expected_mutative_count: counts[i] + 1,
                    change_uuid: uuid,
                    identity: self.identity.clone(),
                },
                self.deadline,
            )
        });

        let mut committed = Vec::new();
        let mut failed = Vec::new();
        for (i, outcome) in commits.iter().enumerate() {
            match outcome {
                Ok(response) if response.accepted => {
                    committed.push(targets[i].address().clone());
                }
                Ok(response) => {
                    let reason = response
                        .rejection
                        .as_ref()
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "commit rejected".to_string());
                    failed.push((targets[i].address().clone(), reason));
                }
                Err(err) => failed.push((targets[i].address().clone(), err.to_string())),
            }
        }

        if failed.is_empty() {
            info!(%uuid, version = %new_version, "change committed on every node");
            Ok(SessionVerdict::Committed {
                uuid,
                version: new_version,
            })
        } else {
            warn!(
                %uuid,
                committed = committed.len(),
                failed = failed.len(),
                "commit fan-out did not reach every node; repair required"
            );
            Ok(SessionVerdict::PartiallyCommitted {
                uuid,
                version: new_version,
                committed,
                failed,
            })
        }
    }

    fn discover_all(
        &self,
        targets: &[&dyn NodeEndpoint],
    ) -> Result<Vec<DiscoverResponse>, SessionError> {
        let outcomes = fan_out(targets, |_, target| target.discover(self.deadline));
        let mut responses = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(response) => responses.push(response),
                Err(err) => failures.push((targets[i].address().clone(), err)),
            }
        }
        if !failures.is_empty() {
            return Err(SessionError::PartialCluster { failures });
        }
        Ok(responses)
    }

    fn check_no_change_in_flight(
        &self,
        targets: &[&dyn NodeEndpoint],
        discoveries: &[DiscoverResponse],
    ) -> Result<(), SessionError> {
        let nodes: Vec<(NodeAddress, ChangeUuid)> = discoveries
            .iter()
            .enumerate()
            .filter(|(_, d)| d.has_prepared_tail())
            .map(|(i, d)| {
                (
                    targets[i].address().clone(),
                    d.latest_change.as_ref().expect("prepared tail").uuid,
                )
            })
            .collect();
        if nodes.is_empty() {
            Ok(())
        } else {
            Err(SessionError::PriorChangeInFlight { nodes })
        }
    }

    /// Pairwise agreement on the committed history: same current version,
    /// same latest committed uuid.
    fn check_consistency(
        &self,
        targets: &[&dyn NodeEndpoint],
        discoveries: &[DiscoverResponse],
    ) -> Result<(), SessionError> {
        let observed: Vec<Divergence> = discoveries
            .iter()
            .enumerate()
            .map(|(i, d)| Divergence {
                address: targets[i].address().clone(),
                current_version: d.current_version,
                latest_committed_uuid: d.latest_committed_uuid,
            })
            .collect();
        let agreed = observed.windows(2).all(|pair| {
            pair[0].current_version == pair[1].current_version
                && pair[0].latest_committed_uuid == pair[1].latest_committed_uuid
        });
        if agreed {
            Ok(())
        } else {
            Err(SessionError::InconsistentCluster { observed })
        }
    }

    /// Roll back every node that accepted our prepare, then report.
    fn roll_back_acceptors(
        &self,
        targets: &[&dyn NodeEndpoint],
        uuid: ChangeUuid,
        counts: &[u64],
        acceptors: &[usize],
        rejections: Vec<(NodeAddress, Rejection)>,
        unreachable: Vec<(NodeAddress, EndpointError)>,
    ) -> SessionVerdict {
        let picked: Vec<&dyn NodeEndpoint> = acceptors.iter().map(|&i| targets[i]).collect();
        let outcomes = fan_out(&picked, |slot, target| {
            let i = acceptors[slot];
            target.rollback(
                RollbackRequest {
                    expected_mutative_count: counts[i] + 1,
                    change_uuid: uuid,
                    identity: self.identity.clone(),
                },
                self.deadline,
            )
        });

        let mut rolled_back = Vec::new();
        let mut failed = Vec::new();
        for (slot, outcome) in outcomes.iter().enumerate() {
            let address = picked[slot].address().clone();
            match outcome {
                Ok(response) if response.accepted => rolled_back.push(address),
                Ok(response) => failed.push((
                    address,
                    response
                        .rejection
                        .as_ref()
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "rollback rejected".to_string()),
                )),
                Err(err) => failed.push((address, err.to_string())),
            }
        }

        if failed.is_empty() {
            info!(%uuid, rolled_back = rolled_back.len(), "change rolled back");
            SessionVerdict::RolledBack {
                uuid,
                rejections,
                unreachable,
            }
        } else {
            warn!(%uuid, failed = failed.len(), "rollback fan-out incomplete; repair required");
            SessionVerdict::PartiallyRolledBack {
                uuid,
                rejections,
                rolled_back,
                failed,
            }
        }
    }
}

/// Call `f` once per target, in parallel, preserving target order in the
/// returned vector.
pub(crate) fn fan_out<T: Send>(
    targets: &[&dyn NodeEndpoint],
    f: impl Fn(usize, &dyn NodeEndpoint) -> T + Sync,
) -> Vec<T> {
    let f = &f;
    std::thread::scope(|scope| {
        let handles: Vec<_> = targets
            .iter()
            .enumerate()
            .map(|(i, target)| scope.spawn(move || f(i, *target)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("fan-out worker panicked"))
            .collect()
    })
}
