//! Reconciles a change a prior coordinator left unresolved.
//!
//! The invariant repair preserves: a change committed on any node will be
//! committed on all reachable nodes; a change rolled back anywhere will be
//! rolled back everywhere. When no terminal evidence exists the operator's
//! policy decides, and the default is rollback.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::change::{ChangeState, ChangeUuid};
use crate::model::NodeAddress;
use crate::proto::{
    CommitRequest, NodeEndpoint, OriginIdentity, RollbackRequest, TakeOverRequest,
};

use super::session::{fan_out, Divergence, SessionError, DEFAULT_DEADLINE};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RepairPolicy {
    /// Commit if any node committed, roll back if any rolled back,
    /// otherwise roll back.
    #[default]
    Default,
    /// Force commit when no terminal evidence exists. Refused when any
    /// node already rolled the change back.
    ForceCommit,
    /// Force rollback. Refused when any node already committed.
    ForceRollback,
}

impl std::str::FromStr for RepairPolicy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(RepairPolicy::ForceCommit),
            "rollback" => Ok(RepairPolicy::ForceRollback),
            other => Err(PolicyParseError {
                got: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("repair policy must be commit or rollback, got {got:?}")]
pub struct PolicyParseError {
    pub got: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepairOutcome {
    Commit,
    Rollback,
}

impl std::fmt::Display for RepairOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairOutcome::Commit => f.write_str("commit"),
            RepairOutcome::Rollback => f.write_str("rollback"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepairVerdict {
    /// Every tail is terminal; there is nothing to resolve.
    NothingToRepair,
    Repaired {
        outcome: RepairOutcome,
        uuid: ChangeUuid,
        /// Nodes driven from prepared to the outcome in this repair.
        resolved: Vec<NodeAddress>,
        /// Nodes that already held the outcome before repair ran.
        already_resolved: Vec<NodeAddress>,
        /// Nodes that never saw the change; they need a follow-up session
        /// targeting only them.
        stragglers: Vec<NodeAddress>,
    },
    PartiallyRepaired {
        outcome: RepairOutcome,
        uuid: ChangeUuid,
        resolved: Vec<NodeAddress>,
        failed: Vec<(NodeAddress, String)>,
        stragglers: Vec<NodeAddress>,
    },
}

pub struct RepairSession {
    identity: OriginIdentity,
    deadline: Duration,
}

impl RepairSession {
    pub fn new(identity: OriginIdentity) -> Self {
        Self {
            identity,
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn run(
        &self,
        targets: &[&dyn NodeEndpoint],
        policy: RepairPolicy,
    ) -> Result<RepairVerdict, SessionError> {
        // Step 1: discover everything; repair needs the whole picture.
        let outcomes = fan_out(targets, |_, target| target.discover(self.deadline));
        let mut discoveries = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(response) => discoveries.push(response),
                Err(err) => failures.push((targets[i].address().clone(), err)),
            }
        }
        if !failures.is_empty() {
            return Err(SessionError::PartialCluster { failures });
        }

        // Step 2: partition by tail.
        let prepared_uuids: Vec<ChangeUuid> = {
            let mut uuids: Vec<ChangeUuid> = discoveries
                .iter()
                .filter(|d| d.has_prepared_tail())
                .map(|d| d.latest_change.as_ref().expect("prepared tail").uuid)
                .collect();
            uuids.sort();
            uuids.dedup();
            uuids
        };
        let uuid = match prepared_uuids.as_slice() {
            [] => return Ok(RepairVerdict::NothingToRepair),
            [uuid] => *uuid,
            // Two different changes in flight means history already forked;
            // never silently pick a winner.
            _ => return Err(self.divergence_error(targets, &discoveries)),
        };

        let mut prepared = Vec::new(); // (index, expected count)
        let mut committed = Vec::new();
        let mut rolled_back = Vec::new();
        let mut stragglers = Vec::new();
        for (i, discovery) in discoveries.iter().enumerate() {
            let address = targets[i].address().clone();
            match discovery.latest_change.as_ref() {
                Some(tail) if tail.uuid == uuid => match tail.state {
                    ChangeState::Prepared => {
                        prepared.push((i, discovery.mutative_message_count))
                    }
                    ChangeState::Committed => committed.push(address),
                    ChangeState::RolledBack => rolled_back.push(address),
                },
                _ => stragglers.push(address),
            }
        }

        if !committed.is_empty() && !rolled_back.is_empty() {
            // Both terminal outcomes exist for one uuid: the invariant is
            // already broken and no automated choice can be safe.
            return Err(self.divergence_error(targets, &discoveries));
        }

        // Step 3: elect the outcome.
        let outcome = if !committed.is_empty() {
            if policy == RepairPolicy::ForceRollback {
                warn!(%uuid, "rollback forced but the change is committed somewhere; committing");
            }
            RepairOutcome::Commit
        } else if !rolled_back.is_empty() {
            if policy == RepairPolicy::ForceCommit {
                warn!(%uuid, "commit forced but the change is rolled back somewhere; rolling back");
            }
            RepairOutcome::Rollback
        } else if policy == RepairPolicy::ForceCommit {
            RepairOutcome::Commit
        } else {
            RepairOutcome::Rollback
        };
        info!(%uuid, %outcome, prepared = prepared.len(), "repairing unresolved change");

        // Step 4: take over each prepared node, then drive the outcome.
        let mut resolved = Vec::new();
        let mut failed = Vec::new();
        for (i, count) in prepared {
            let target = targets[i];
            let address = target.address().clone();
            let handoff = target.take_over(
                TakeOverRequest {
                    expected_mutative_count: count,
                    change_uuid: uuid,
                    identity: self.identity.clone(),
                },
                self.deadline,
            );
            let granted = match handoff {
                Ok(response) if response.accepted => response.mutative_message_count,
                Ok(response) => {
                    let reason = response
                        .rejection
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "take-over rejected".to_string());
                    failed.push((address, reason));
                    continue;
                }
                Err(err) => {
                    failed.push((address, err.to_string()));
                    continue;
                }
            };

            let result = match outcome {
                RepairOutcome::Commit => target.commit(
                    CommitRequest {
                        expected_mutative_count: granted,
                        change_uuid: uuid,
                        identity: self.identity.clone(),
                    },
                    self.deadline,
                ),
                RepairOutcome::Rollback => target.rollback(
                    RollbackRequest {
                        expected_mutative_count: granted,
                        change_uuid: uuid,
                        identity: self.identity.clone(),
                    },
                    self.deadline,
                ),
            };
            match result {
                Ok(response) if response.accepted => resolved.push(address),
                Ok(response) => failed.push((
                    address,
                    response
                        .rejection
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "resolution rejected".to_string()),
                )),
                Err(err) => failed.push((address, err.to_string())),
            }
        }

        let already_resolved = match outcome {
            RepairOutcome::Commit => committed,
            RepairOutcome::Rollback => rolled_back,
        };
        if !stragglers.is_empty() {
            warn!(
                %uuid,
                stragglers = stragglers.len(),
                "nodes never saw the change; run a session targeting only them"
            );
        }
        if failed.is_empty() {
            Ok(RepairVerdict::Repaired {
                outcome,
                uuid,
                resolved,
                already_resolved,
                stragglers,
            })
        } else {
            Ok(RepairVerdict::PartiallyRepaired {
                outcome,
                uuid,
                resolved,
                failed,
                stragglers,
            })
        }
    }

    fn divergence_error(
        &self,
        targets: &[&dyn NodeEndpoint],
        discoveries: &[crate::proto::DiscoverResponse],
    ) -> SessionError {
        SessionError::InconsistentCluster {
            observed: discoveries
                .iter()
                .enumerate()
                .map(|(i, d)| Divergence {
                    address: targets[i].address().clone(),
                    current_version: d.current_version,
                    latest_committed_uuid: d.latest_committed_uuid,
                })
                .collect(),
        }
    }
}
