//! The per-node protocol state machine.
//!
//! Legal transitions, derived from the log tail:
//!
//! ```text
//!            prepare(ok)
//! ACCEPTING ─────────────► PREPARED
//!    ▲                        │
//!    │                        ├─ commit ──► ACCEPTING (current_version bumped)
//!    │                        └─ rollback ► ACCEPTING
//! ```
//!
//! Every mutation is durable in the change log before the in-memory state
//! moves, so a crash at any point replays to exactly what was acknowledged.

use tracing::{info, warn};

use crate::change::{evaluate, ChangeAudit, ChangeRecord, ChangeState, Verdict};
use crate::clock::WallClock;
use crate::journal::{ChangeLog, JournalError};
use crate::model::Cluster;
use crate::proto::{
    CommitRequest, DiscoverResponse, MutationResponse, OriginIdentity, PrepareRequest, Rejection,
    RollbackRequest, ServerMode, TakeOverRequest, TakeOverResponse,
};

use super::NodeError;

pub struct NodeStateMachine {
    log: ChangeLog,
    bootstrap: Cluster,
    mode: ServerMode,
    clock: WallClock,
    halted: bool,
}

impl NodeStateMachine {
    pub fn new(log: ChangeLog, bootstrap: Cluster, mode: ServerMode) -> Self {
        Self {
            log,
            bootstrap,
            mode,
            clock: WallClock::new(),
            halted: false,
        }
    }

    /// The configuration this node currently serves.
    pub fn current_configuration(&self) -> &Cluster {
        self.log.current_configuration().unwrap_or(&self.bootstrap)
    }

    pub fn mode(&self) -> ServerMode {
        self.mode
    }

    pub fn log(&self) -> &ChangeLog {
        &self.log
    }

    /// Read-only status probe. Never mutates and never counts as a
    /// mutative message.
    pub fn discover(&self) -> DiscoverResponse {
        let last = self.log.last_mutation();
        DiscoverResponse {
            mode: self.mode,
            mutative_message_count: self.log.mutation_count(),
            last_mutation_host: last.map(|a| a.host.clone()),
            last_mutation_user: last.map(|a| a.user.clone()),
            last_mutation_timestamp: last.map(|a| a.at),
            current_version: self.log.current_version(),
            highest_version: self.log.highest_version(),
            latest_change: self.log.head().cloned(),
            latest_committed_uuid: self
                .log
                .records()
                .iter()
                .rev()
                .find(|r| r.state == ChangeState::Committed)
                .map(|r| r.uuid),
            checkpoints: self.log.checkpoints().to_vec(),
        }
    }

    pub fn prepare(&mut self, request: PrepareRequest) -> Result<MutationResponse, NodeError> {
        self.check_running()?;

        if let Some(rejection) = self.check_counter(request.expected_mutative_count) {
            return Ok(self.rejected(rejection));
        }
        if let Some(tail) = self.log.head() {
            if tail.state == ChangeState::Prepared {
                return Ok(self.rejected(Rejection::AlreadyPrepared { uuid: tail.uuid }));
            }
        }
        let expected_version = self.log.highest_version().next();
        if request.new_version != expected_version {
            return Ok(self.rejected(Rejection::BadVersion {
                expected: expected_version,
                got: request.new_version,
            }));
        }
        let candidate = match evaluate(self.current_configuration(), &request.payload) {
            Verdict::Accept(candidate) => *candidate,
            Verdict::Reject(reason) => {
                warn!(uuid = %request.change_uuid, %reason, "change rejected by evaluation");
                return Ok(self.rejected(Rejection::EvaluationReject { reason }));
            }
        };

        let creation = self.audit(&request.identity);
        let record = ChangeRecord::prepared(
            request.change_uuid,
            self.log.head().map(|t| t.uuid),
            request.new_version,
            request.payload,
            candidate,
            creation,
        );
        self.durable(|log| log.append(record))?;
        info!(uuid = %request.change_uuid, version = %request.new_version, "change prepared");
        Ok(self.accepted())
    }

    pub fn commit(&mut self, request: CommitRequest) -> Result<MutationResponse, NodeError> {
        self.resolve(
            request.expected_mutative_count,
            request.change_uuid,
            &request.identity,
            ChangeState::Committed,
        )
    }

    pub fn rollback(&mut self, request: RollbackRequest) -> Result<MutationResponse, NodeError> {
        self.resolve(
            request.expected_mutative_count,
            request.change_uuid,
            &request.identity,
            ChangeState::RolledBack,
        )
    }

    fn resolve(
        &mut self,
        expected_count: u64,
        uuid: crate::change::ChangeUuid,
        identity: &OriginIdentity,
        state: ChangeState,
    ) -> Result<MutationResponse, NodeError> {
        self.check_running()?;

        if let Some(rejection) = self.check_counter(expected_count) {
            return Ok(self.rejected(rejection));
        }
        match self.log.head() {
            Some(tail) if tail.state == ChangeState::Prepared => {
                if tail.uuid != uuid {
                    return Ok(self.rejected(Rejection::UuidMismatch {
                        expected: tail.uuid,
                        got: uuid,
                    }));
                }
            }
            _ => return Ok(self.rejected(Rejection::NotPrepared)),
        }

        let approval = self.audit(identity);
        self.durable(|log| log.resolve_tail(uuid, state, approval))?;
        info!(%uuid, %state, "change resolved");
        Ok(self.accepted())
    }

    /// Grant a new coordinator the right to resolve an abandoned prepared
    /// change. Accepting is itself a mutative message: the counter moves
    /// and the last-mutation audit becomes the new coordinator's.
    pub fn take_over(&mut self, request: TakeOverRequest) -> Result<TakeOverResponse, NodeError> {
        self.check_running()?;

        if let Some(rejection) = self.check_counter(request.expected_mutative_count) {
            return Ok(self.take_over_rejected(rejection));
        }
        let tail = match self.log.head() {
            Some(tail) if tail.state == ChangeState::Prepared => {
                if tail.uuid != request.change_uuid {
                    return Ok(self.take_over_rejected(Rejection::UuidMismatch {
                        expected: tail.uuid,
                        got: request.change_uuid,
                    }));
                }
                tail.clone()
            }
            _ => return Ok(self.take_over_rejected(Rejection::NotPrepared)),
        };

        let audit = self.audit(&request.identity);
        self.durable(|log| log.record_take_over(request.change_uuid, audit))?;
        info!(uuid = %request.change_uuid, user = %request.identity.user, "prepared change taken over");
        Ok(TakeOverResponse {
            accepted: true,
            rejection: None,
            mutative_message_count: self.log.mutation_count(),
            tail: Some(tail),
        })
    }

    fn check_running(&self) -> Result<(), NodeError> {
        if self.halted {
            Err(NodeError::Halted)
        } else {
            Ok(())
        }
    }

    fn check_counter(&self, expected: u64) -> Option<Rejection> {
        let actual = self.log.mutation_count();
        (expected != actual).then_some(Rejection::Concurrent { expected, actual })
    }

    fn audit(&mut self, identity: &OriginIdentity) -> ChangeAudit {
        ChangeAudit::new(identity.host.clone(), identity.user.clone(), self.clock.now())
    }

    /// Run a journal mutation; a durability failure halts the machine.
    fn durable(
        &mut self,
        op: impl FnOnce(&mut ChangeLog) -> Result<(), JournalError>,
    ) -> Result<(), NodeError> {
        match op(&mut self.log) {
            Ok(()) => Ok(()),
            Err(err @ JournalError::Io { .. }) => {
                tracing::error!(error = %err, "durability failure, halting state machine");
                self.halted = true;
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn accepted(&self) -> MutationResponse {
        MutationResponse {
            accepted: true,
            rejection: None,
            mutative_message_count: self.log.mutation_count(),
            current_version: self.log.current_version(),
            highest_version: self.log.highest_version(),
        }
    }

    fn rejected(&self, rejection: Rejection) -> MutationResponse {
        MutationResponse {
            accepted: false,
            rejection: Some(rejection),
            mutative_message_count: self.log.mutation_count(),
            current_version: self.log.current_version(),
            highest_version: self.log.highest_version(),
        }
    }

    fn take_over_rejected(&self, rejection: Rejection) -> TakeOverResponse {
        TakeOverResponse {
            accepted: false,
            rejection: Some(rejection),
            mutative_message_count: self.log.mutation_count(),
            tail: None,
        }
    }
}
