//! In-process endpoint: the shipped `NodeEndpoint` implementation.
//!
//! Network transport is an external collaborator; the operator tool and
//! the test suite drive nodes through their journal directories instead.
//! A node directory holds `bootstrap.json` (the node's seed configuration)
//! and `changes.log`.

use std::path::Path;
use std::time::Duration;

use crate::journal::ChangeLog;
use crate::model::{Cluster, NodeAddress};
use crate::node::{NodeError, NodeHandle, NodeServer, NodeStateMachine};

use super::endpoint::{EndpointError, NodeEndpoint};
use super::messages::{
    CommitRequest, DiscoverResponse, MutationResponse, PrepareRequest, RollbackRequest, ServerMode,
    TakeOverRequest, TakeOverResponse,
};

pub const BOOTSTRAP_FILE_NAME: &str = "bootstrap.json";

#[derive(Debug)]
pub struct EmbeddedEndpoint {
    handle: NodeHandle,
}

impl EmbeddedEndpoint {
    /// Open a node directory, replay its change log, and spin up its
    /// worker.
    pub fn open(dir: &Path, address: NodeAddress, mode: ServerMode) -> Result<Self, NodeError> {
        let bootstrap = read_bootstrap(dir)?;
        let (log, _) = ChangeLog::open(dir)?;
        let machine = NodeStateMachine::new(log, bootstrap, mode);
        Ok(Self {
            handle: NodeServer::spawn(machine, address),
        })
    }

    pub fn from_handle(handle: NodeHandle) -> Self {
        Self { handle }
    }
}

/// Seed configuration a node serves before any change commits.
pub fn read_bootstrap(dir: &Path) -> Result<Cluster, NodeError> {
    let path = dir.join(BOOTSTRAP_FILE_NAME);
    let contents = std::fs::read(&path).map_err(|e| NodeError::Bootstrap {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&contents).map_err(|e| NodeError::Bootstrap {
        path,
        reason: e.to_string(),
    })
}

pub fn write_bootstrap(dir: &Path, cluster: &Cluster) -> Result<(), NodeError> {
    std::fs::create_dir_all(dir).map_err(|e| NodeError::Bootstrap {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    let path = dir.join(BOOTSTRAP_FILE_NAME);
    let contents = serde_json::to_vec_pretty(cluster).map_err(|e| NodeError::Bootstrap {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    std::fs::write(&path, contents).map_err(|e| NodeError::Bootstrap {
        path,
        reason: e.to_string(),
    })
}

impl NodeEndpoint for EmbeddedEndpoint {
    fn address(&self) -> &NodeAddress {
        self.handle.address()
    }

    fn discover(&self, deadline: Duration) -> Result<DiscoverResponse, EndpointError> {
        self.handle.discover(deadline)
    }

    fn prepare(
        &self,
        request: PrepareRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError> {
        self.handle.prepare(request, deadline)
    }

    fn commit(
        &self,
        request: CommitRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError> {
        self.handle.commit(request, deadline)
    }

    fn rollback(
        &self,
        request: RollbackRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError> {
        self.handle.rollback(request, deadline)
    }

    fn take_over(
        &self,
        request: TakeOverRequest,
        deadline: Duration,
    ) -> Result<TakeOverResponse, EndpointError> {
        self.handle.take_over(request, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, Stripe};
    use tempfile::TempDir;

    #[test]
    fn open_reads_bootstrap_and_serves_discover() {
        let dir = TempDir::new().unwrap();
        let address = NodeAddress::new("localhost", 9410);
        let cluster = Cluster::new(
            "tc",
            vec![Stripe::new(
                "stripe1",
                vec![Node::new("node1", address.clone())],
            )],
        );
        write_bootstrap(dir.path(), &cluster).unwrap();

        let endpoint =
            EmbeddedEndpoint::open(dir.path(), address, ServerMode::ActiveCoordinator).unwrap();
        let discover = endpoint.discover(Duration::from_secs(5)).unwrap();
        assert_eq!(discover.mutative_message_count, 0);
        assert_eq!(discover.mode, ServerMode::ActiveCoordinator);
    }

    #[test]
    fn open_refuses_missing_bootstrap() {
        let dir = TempDir::new().unwrap();
        let err = EmbeddedEndpoint::open(
            dir.path(),
            NodeAddress::new("localhost", 9410),
            ServerMode::Passive,
        )
        .unwrap_err();
        assert!(matches!(err, NodeError::Bootstrap { .. }));
    }
}
