//! The per-node change log: replay on open, append + fsync, tail repair.

use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::change::{ChangeAudit, ChangeRecord, ChangeState, ChangeUuid, Version};

use super::codec::{CheckpointMark, Envelope, LogEntry};
use super::frame::{encode_frame, FrameRead, FrameReader, MAX_ENTRY_BYTES};
use super::{JournalError, JournalResult};

pub const LOG_FILE_NAME: &str = "changes.log";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub entries: usize,
    /// Offset a torn tail was truncated from, if any.
    pub truncated_from: Option<u64>,
}

/// Durable append-only change log. Owned exclusively by one node process.
#[derive(Debug)]
pub struct ChangeLog {
    path: PathBuf,
    file: File,
    records: Vec<ChangeRecord>,
    checkpoints: Vec<CheckpointMark>,
    /// Count of mutative entries replayed or appended (records, resolutions,
    /// take-overs). Checkpoints are not mutative.
    mutation_count: u64,
    last_mutation: Option<ChangeAudit>,
}

impl ChangeLog {
    /// Open (or create) the log in `dir` and replay it. A torn trailing
    /// write is truncated; anything else that fails to decode refuses the
    /// node start with `Malformed`.
    pub fn open(dir: &Path) -> JournalResult<(Self, ReplayStats)> {
        std::fs::create_dir_all(dir).map_err(|source| JournalError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|source| JournalError::Io {
                path: path.clone(),
                source,
            })?;

        let mut log = Self {
            path,
            file,
            records: Vec::new(),
            checkpoints: Vec::new(),
            mutation_count: 0,
            last_mutation: None,
        };
        let stats = log.replay()?;
        Ok((log, stats))
    }

    fn replay(&mut self) -> JournalResult<ReplayStats> {
        let reader = self.file.try_clone().map_err(|source| JournalError::Io {
            path: self.path.clone(),
            source,
        })?;
        let mut frames = FrameReader::new(BufReader::new(reader), MAX_ENTRY_BYTES);
        let mut stats = ReplayStats::default();

        loop {
            let entry_offset = frames.offset();
            match frames.read_next().map_err(|e| self.with_path(e))? {
                FrameRead::Eof => break,
                FrameRead::Torn { offset } => {
                    warn!(path = %self.path.display(), offset, "truncating torn change log tail");
                    self.file
                        .set_len(offset)
                        .map_err(|source| JournalError::Io {
                            path: self.path.clone(),
                            source,
                        })?;
                    self.file.sync_data().map_err(|source| JournalError::Io {
                        path: self.path.clone(),
                        source,
                    })?;
                    stats.truncated_from = Some(offset);
                    break;
                }
                FrameRead::Entry(body) => {
                    let envelope = Envelope::decode(&body).map_err(|reason| {
                        JournalError::Malformed {
                            path: self.path.clone(),
                            offset: entry_offset,
                            reason,
                        }
                    })?;
                    self.apply_entry(envelope.entry, entry_offset)?;
                    stats.entries += 1;
                }
            }
        }

        info!(
            path = %self.path.display(),
            entries = stats.entries,
            head = ?self.head().map(|r| r.version),
            "change log replayed"
        );
        Ok(stats)
    }

    fn apply_entry(&mut self, entry: LogEntry, offset: u64) -> JournalResult<()> {
        match entry {
            LogEntry::Record(record) => {
                self.check_chain(&record).map_err(|reason| JournalError::Malformed {
                    path: self.path.clone(),
                    offset,
                    reason,
                })?;
                self.mutation_count += 1;
                self.last_mutation = Some(record.creation.clone());
                self.records.push(record);
            }
            LogEntry::Resolution {
                uuid,
                state,
                approval,
            } => {
                if !state.is_terminal() {
                    return Err(JournalError::Malformed {
                        path: self.path.clone(),
                        offset,
                        reason: format!("resolution to non-terminal state {state}"),
                    });
                }
                let Some(tail) = self.records.last_mut() else {
                    return Err(JournalError::Malformed {
                        path: self.path.clone(),
                        offset,
                        reason: "resolution entry on empty log".to_string(),
                    });
                };
                if tail.state != ChangeState::Prepared || tail.uuid != uuid {
                    return Err(JournalError::Malformed {
                        path: self.path.clone(),
                        offset,
                        reason: format!(
                            "resolution for {uuid} does not match tail {} in state {}",
                            tail.uuid, tail.state
                        ),
                    });
                }
                tail.state = state;
                tail.approval = Some(approval.clone());
                self.mutation_count += 1;
                self.last_mutation = Some(approval);
            }
            LogEntry::TakeOver { uuid, audit } => {
                let tail_ok = self
                    .records
                    .last()
                    .is_some_and(|t| t.state == ChangeState::Prepared && t.uuid == uuid);
                if !tail_ok {
                    return Err(JournalError::Malformed {
                        path: self.path.clone(),
                        offset,
                        reason: format!("take-over of {uuid} without a matching prepared tail"),
                    });
                }
                self.mutation_count += 1;
                self.last_mutation = Some(audit);
            }
            LogEntry::Checkpoint(mark) => {
                self.checkpoints.push(mark);
            }
        }
        Ok(())
    }

    fn check_chain(&self, record: &ChangeRecord) -> Result<(), String> {
        match self.records.last() {
            None => {
                if record.parent_uuid.is_some() {
                    return Err(format!(
                        "genesis record {} must not have a parent",
                        record.uuid
                    ));
                }
                if record.version != Version::GENESIS {
                    return Err(format!(
                        "genesis record {} must be version 1, got {}",
                        record.uuid, record.version
                    ));
                }
            }
            Some(tail) => {
                if !tail.is_terminal() {
                    return Err(format!(
                        "record {} appended while tail {} is still prepared",
                        record.uuid, tail.uuid
                    ));
                }
                if record.parent_uuid != Some(tail.uuid) {
                    return Err(format!(
                        "record {} parent {:?} does not match tail {}",
                        record.uuid, record.parent_uuid, tail.uuid
                    ));
                }
                if record.version != tail.version.next() {
                    return Err(format!(
                        "record {} version {} does not follow tail version {}",
                        record.uuid, record.version, tail.version
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn head(&self) -> Option<&ChangeRecord> {
        self.records.last()
    }

    pub fn get(&self, version: Version) -> JournalResult<&ChangeRecord> {
        let index = version
            .get()
            .checked_sub(1)
            .ok_or(JournalError::NoSuchVersion { version })? as usize;
        self.records
            .get(index)
            .ok_or(JournalError::NoSuchVersion { version })
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn checkpoints(&self) -> &[CheckpointMark] {
        &self.checkpoints
    }

    pub fn mutation_count(&self) -> u64 {
        self.mutation_count
    }

    pub fn last_mutation(&self) -> Option<&ChangeAudit> {
        self.last_mutation.as_ref()
    }

    /// Version of the highest committed record, or zero.
    pub fn current_version(&self) -> Version {
        self.records
            .iter()
            .rev()
            .find(|r| r.state == ChangeState::Committed)
            .map(|r| r.version)
            .unwrap_or(Version::ZERO)
    }

    /// Version of the tail record, or zero.
    pub fn highest_version(&self) -> Version {
        self.head().map(|r| r.version).unwrap_or(Version::ZERO)
    }

    /// Result of the highest committed record, if any committed yet.
    pub fn current_configuration(&self) -> Option<&crate::model::Cluster> {
        self.records
            .iter()
            .rev()
            .find(|r| r.state == ChangeState::Committed)
            .map(|r| &r.result)
    }

    /// Append a freshly prepared record. Enforces the chain invariants and
    /// is durable before returning.
    pub fn append(&mut self, record: ChangeRecord) -> JournalResult<()> {
        if record.state != ChangeState::Prepared {
            return Err(JournalError::Conflict {
                reason: format!("cannot append a record already in state {}", record.state),
            });
        }
        self.check_chain(&record)
            .map_err(|reason| JournalError::Conflict { reason })?;
        self.write_entry(&LogEntry::Record(record.clone()))?;
        self.mutation_count += 1;
        self.last_mutation = Some(record.creation.clone());
        self.records.push(record);
        Ok(())
    }

    /// Close the prepared tail with a terminal state. Durable before
    /// returning.
    pub fn resolve_tail(
        &mut self,
        uuid: ChangeUuid,
        state: ChangeState,
        approval: ChangeAudit,
    ) -> JournalResult<()> {
        if !state.is_terminal() {
            return Err(JournalError::Conflict {
                reason: format!("cannot resolve tail to non-terminal state {state}"),
            });
        }
        let tail_matches = self
            .records
            .last()
            .is_some_and(|t| t.state == ChangeState::Prepared && t.uuid == uuid);
        if !tail_matches {
            return Err(JournalError::TailMismatch { uuid });
        }
        self.write_entry(&LogEntry::Resolution {
            uuid,
            state,
            approval: approval.clone(),
        })?;
        let tail = self.records.last_mut().expect("tail checked above");
        tail.state = state;
        tail.approval = Some(approval.clone());
        self.mutation_count += 1;
        self.last_mutation = Some(approval);
        Ok(())
    }

    /// Record the handoff of resolution rights over the prepared tail.
    pub fn record_take_over(&mut self, uuid: ChangeUuid, audit: ChangeAudit) -> JournalResult<()> {
        let tail_matches = self
            .records
            .last()
            .is_some_and(|t| t.state == ChangeState::Prepared && t.uuid == uuid);
        if !tail_matches {
            return Err(JournalError::TailMismatch { uuid });
        }
        self.write_entry(&LogEntry::TakeOver {
            uuid,
            audit: audit.clone(),
        })?;
        self.mutation_count += 1;
        self.last_mutation = Some(audit);
        Ok(())
    }

    /// Seed an empty log with another node's change history. This is how a
    /// joining node reaches log parity with its stripe: the platform syncs
    /// the chain, record by record, re-deriving counters and audits.
    pub fn adopt_history(&mut self, records: &[ChangeRecord]) -> JournalResult<()> {
        if !self.records.is_empty() {
            return Err(JournalError::Conflict {
                reason: "cannot adopt history into a non-empty log".to_string(),
            });
        }
        for record in records {
            let mut opened = record.clone();
            opened.state = ChangeState::Prepared;
            opened.approval = None;
            self.append(opened)?;
            if record.is_terminal() {
                let approval = record.approval.clone().ok_or_else(|| JournalError::Conflict {
                    reason: format!("terminal record {} carries no approval audit", record.uuid),
                })?;
                self.resolve_tail(record.uuid, record.state, approval)?;
            }
        }
        Ok(())
    }

    pub fn append_checkpoint(&mut self, mark: CheckpointMark) -> JournalResult<()> {
        self.write_entry(&LogEntry::Checkpoint(mark.clone()))?;
        self.checkpoints.push(mark);
        Ok(())
    }

    fn write_entry(&mut self, entry: &LogEntry) -> JournalResult<()> {
        let body = Envelope::new(entry.clone())
            .encode()
            .map_err(|reason| JournalError::Conflict {
                reason: format!("entry encode failed: {reason}"),
            })?;
        let frame = encode_frame(&body, MAX_ENTRY_BYTES)?;
        self.file
            .write_all(&frame)
            .and_then(|()| self.file.sync_data())
            .map_err(|source| JournalError::Io {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %self.path.display(), bytes = frame.len(), "change log entry appended");
        Ok(())
    }

    fn with_path(&self, err: JournalError) -> JournalError {
        match err {
            JournalError::Io { source, .. } => JournalError::Io {
                path: self.path.clone(),
                source,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangePayload;
    use crate::model::{Cluster, Node, NodeAddress, Stripe};
    use tempfile::TempDir;
    use time::macros::datetime;
    use uuid::Uuid;

    fn audit(user: &str) -> ChangeAudit {
        ChangeAudit::new("opshost", user, datetime!(2024-03-01 12:00 UTC))
    }

    fn cluster() -> Cluster {
        Cluster::new(
            "tc",
            vec![Stripe::new(
                "stripe1",
                vec![Node::new("node1", NodeAddress::new("localhost", 9410))],
            )],
        )
    }

    fn record(n: u8, parent: Option<ChangeUuid>, version: u64) -> ChangeRecord {
        ChangeRecord::prepared(
            ChangeUuid::new(Uuid::from_bytes([n; 16])),
            parent,
            Version::new(version),
            ChangePayload::DetachStripe {
                name: "stripe9".to_string(),
            },
            cluster(),
            audit("alice"),
        )
    }

    #[test]
    fn append_resolve_replay() {
        let dir = TempDir::new().unwrap();
        let genesis_uuid;
        {
            let (mut log, stats) = ChangeLog::open(dir.path()).unwrap();
            assert_eq!(stats.entries, 0);
            let genesis = record(1, None, 1);
            genesis_uuid = genesis.uuid;
            log.append(genesis).unwrap();
            log.resolve_tail(genesis_uuid, ChangeState::Committed, audit("alice"))
                .unwrap();
            assert_eq!(log.mutation_count(), 2);
            assert_eq!(log.current_version(), Version::new(1));
        }

        let (log, stats) = ChangeLog::open(dir.path()).unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.truncated_from, None);
        assert_eq!(log.mutation_count(), 2);
        assert_eq!(log.head().unwrap().uuid, genesis_uuid);
        assert_eq!(log.head().unwrap().state, ChangeState::Committed);
        assert_eq!(log.last_mutation().unwrap().user, "alice");
        assert_eq!(log.get(Version::new(1)).unwrap().uuid, genesis_uuid);
        assert!(matches!(
            log.get(Version::new(2)),
            Err(JournalError::NoSuchVersion { .. })
        ));
    }

    #[test]
    fn append_rejects_conflicts() {
        let dir = TempDir::new().unwrap();
        let (mut log, _) = ChangeLog::open(dir.path()).unwrap();
        let genesis = record(1, None, 1);
        let genesis_uuid = genesis.uuid;
        log.append(genesis).unwrap();

        // Tail still prepared.
        let err = log.append(record(2, Some(genesis_uuid), 2)).unwrap_err();
        assert!(matches!(err, JournalError::Conflict { .. }));

        log.resolve_tail(genesis_uuid, ChangeState::RolledBack, audit("bob"))
            .unwrap();

        // Wrong parent.
        let err = log
            .append(record(3, Some(ChangeUuid::new(Uuid::from_bytes([9; 16]))), 2))
            .unwrap_err();
        assert!(matches!(err, JournalError::Conflict { .. }));

        // Wrong version.
        let err = log.append(record(3, Some(genesis_uuid), 5)).unwrap_err();
        assert!(matches!(err, JournalError::Conflict { .. }));

        // Correct child.
        log.append(record(3, Some(genesis_uuid), 2)).unwrap();
        assert_eq!(log.highest_version(), Version::new(2));
        assert_eq!(log.current_version(), Version::ZERO);
    }

    #[test]
    fn resolve_requires_matching_prepared_tail() {
        let dir = TempDir::new().unwrap();
        let (mut log, _) = ChangeLog::open(dir.path()).unwrap();
        let err = log
            .resolve_tail(
                ChangeUuid::new(Uuid::from_bytes([1; 16])),
                ChangeState::Committed,
                audit("alice"),
            )
            .unwrap_err();
        assert!(matches!(err, JournalError::TailMismatch { .. }));

        let genesis = record(1, None, 1);
        let other = ChangeUuid::new(Uuid::from_bytes([8; 16]));
        log.append(genesis).unwrap();
        let err = log
            .resolve_tail(other, ChangeState::Committed, audit("alice"))
            .unwrap_err();
        assert!(matches!(err, JournalError::TailMismatch { .. }));
    }

    #[test]
    fn torn_tail_is_truncated_on_replay() {
        let dir = TempDir::new().unwrap();
        {
            let (mut log, _) = ChangeLog::open(dir.path()).unwrap();
            log.append(record(1, None, 1)).unwrap();
        }
        let path = dir.path().join(LOG_FILE_NAME);
        let intact_len = std::fs::metadata(&path).unwrap().len();

        // Simulate a crash mid-append: garbage half-frame at the tail.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x31, 0x4C, 0x43, 0x43, 0xFF]).unwrap();
        drop(file);

        let (log, stats) = ChangeLog::open(dir.path()).unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.truncated_from, Some(intact_len));
        assert_eq!(log.highest_version(), Version::new(1));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact_len);
    }

    #[test]
    fn mid_log_resolution_mismatch_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        {
            let (mut log, _) = ChangeLog::open(dir.path()).unwrap();
            log.append(record(1, None, 1)).unwrap();
        }
        // Hand-craft a resolution for a uuid that is not the tail.
        let bogus = Envelope::new(LogEntry::Resolution {
            uuid: ChangeUuid::new(Uuid::from_bytes([7; 16])),
            state: ChangeState::Committed,
            approval: audit("mallory"),
        })
        .encode()
        .unwrap();
        let frame = encode_frame(&bogus, MAX_ENTRY_BYTES).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&frame).unwrap();
        drop(file);

        let err = ChangeLog::open(dir.path()).unwrap_err();
        assert!(matches!(err, JournalError::Malformed { .. }));
    }

    #[test]
    fn adopt_history_reaches_parity_with_the_source() {
        let source_dir = TempDir::new().unwrap();
        let (mut source, _) = ChangeLog::open(source_dir.path()).unwrap();
        let genesis = record(1, None, 1);
        let genesis_uuid = genesis.uuid;
        source.append(genesis).unwrap();
        source
            .resolve_tail(genesis_uuid, ChangeState::Committed, audit("alice"))
            .unwrap();
        let child = record(2, Some(genesis_uuid), 2);
        let child_uuid = child.uuid;
        source.append(child).unwrap();
        source
            .resolve_tail(child_uuid, ChangeState::RolledBack, audit("bob"))
            .unwrap();

        let joining_dir = TempDir::new().unwrap();
        {
            let (mut joining, _) = ChangeLog::open(joining_dir.path()).unwrap();
            joining.adopt_history(source.records()).unwrap();
            assert_eq!(joining.records(), source.records());
            assert_eq!(joining.mutation_count(), source.mutation_count());
            assert_eq!(joining.current_version(), source.current_version());
        }
        // Adoption is durable like any other append.
        let (joining, _) = ChangeLog::open(joining_dir.path()).unwrap();
        assert_eq!(joining.records(), source.records());

        let (mut joining, _) = ChangeLog::open(joining_dir.path()).unwrap();
        let err = joining.adopt_history(source.records()).unwrap_err();
        assert!(matches!(err, JournalError::Conflict { .. }));
    }

    #[test]
    fn checkpoints_replay_verbatim() {
        let dir = TempDir::new().unwrap();
        let mark = CheckpointMark {
            uuid: ChangeUuid::new(Uuid::from_bytes([5; 16])),
            version: Version::new(1),
            label: "nightly".to_string(),
        };
        {
            let (mut log, _) = ChangeLog::open(dir.path()).unwrap();
            let genesis = record(1, None, 1);
            let uuid = genesis.uuid;
            log.append(genesis).unwrap();
            log.resolve_tail(uuid, ChangeState::Committed, audit("alice"))
                .unwrap();
            log.append_checkpoint(mark.clone()).unwrap();
            // Checkpoints are not mutative.
            assert_eq!(log.mutation_count(), 2);
        }
        let (log, _) = ChangeLog::open(dir.path()).unwrap();
        assert_eq!(log.checkpoints(), &[mark]);
        assert_eq!(log.mutation_count(), 2);
    }
}
