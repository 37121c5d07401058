//! Embedded multi-node cluster harness shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tempfile::TempDir;
use uuid::Uuid;

use concord_rs::change::ChangeUuid;
use concord_rs::journal::ChangeLog;
use concord_rs::model::{Cluster, Node, NodeAddress, Stripe};
use concord_rs::proto::embedded::write_bootstrap;
use concord_rs::proto::{
    CommitRequest, DiscoverResponse, EmbeddedEndpoint, EndpointError, MutationResponse,
    NodeEndpoint, PrepareRequest, RollbackRequest, ServerMode, TakeOverRequest, TakeOverResponse,
};

pub const DEADLINE: Duration = Duration::from_secs(5);

pub fn address(i: usize) -> NodeAddress {
    NodeAddress::new("localhost", (9410 + i * 100) as u16)
}

pub fn node(i: usize) -> Node {
    Node::new(format!("node{}", i + 1), address(i))
}

/// One stripe holding nodes 0..n, the shape most scenarios start from.
pub fn single_stripe_cluster(n: usize) -> Cluster {
    Cluster::new(
        "test-cluster",
        vec![Stripe::new("stripe1", (0..n).map(node).collect())],
    )
}

pub struct TestCluster {
    root: TempDir,
    pub endpoints: Vec<EmbeddedEndpoint>,
    addresses: Vec<NodeAddress>,
}

impl TestCluster {
    /// `n` nodes, every one seeded with the same `bootstrap`.
    pub fn launch(n: usize, bootstrap: &Cluster) -> Self {
        let root = TempDir::new().expect("tempdir");
        let mut endpoints = Vec::with_capacity(n);
        let mut addresses = Vec::with_capacity(n);
        for i in 0..n {
            let dir = root.path().join(format!("node{}", i + 1));
            write_bootstrap(&dir, bootstrap).expect("write bootstrap");
            let endpoint =
                EmbeddedEndpoint::open(&dir, address(i), ServerMode::ActiveCoordinator)
                    .expect("open node");
            endpoints.push(endpoint);
            addresses.push(address(i));
        }
        Self {
            root,
            endpoints,
            addresses,
        }
    }

    pub fn node_dir(&self, i: usize) -> PathBuf {
        self.root.path().join(format!("node{}", i + 1))
    }

    pub fn targets(&self) -> Vec<&dyn NodeEndpoint> {
        self.endpoints.iter().map(|e| e as &dyn NodeEndpoint).collect()
    }

    pub fn discover(&self, i: usize) -> DiscoverResponse {
        self.endpoints[i].discover(DEADLINE).expect("discover")
    }

    /// Seed an extra unconfigured node directory next to the cluster.
    pub fn seed_joining_node(&self, i: usize, seed: &Cluster) -> PathBuf {
        let dir = self.node_dir(i);
        write_bootstrap(&dir, seed).expect("write bootstrap");
        dir
    }

    pub fn open_log(&self, i: usize) -> ChangeLog {
        let (log, _) = ChangeLog::open(&self.node_dir(i)).expect("open log");
        log
    }
}

pub fn mint_uuid() -> ChangeUuid {
    ChangeUuid::new(Uuid::new_v4())
}

/// Endpoint wrapper with switchable faults, for partial-failure scenarios.
pub struct FaultyEndpoint<'a> {
    inner: &'a dyn NodeEndpoint,
    pub fail_prepare: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fail_rollback: AtomicBool,
}

impl<'a> FaultyEndpoint<'a> {
    pub fn new(inner: &'a dyn NodeEndpoint) -> Self {
        Self {
            inner,
            fail_prepare: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            fail_rollback: AtomicBool::new(false),
        }
    }

    fn down(&self) -> EndpointError {
        EndpointError::Unreachable {
            address: self.inner.address().clone(),
            reason: "injected fault".to_string(),
        }
    }
}

impl NodeEndpoint for FaultyEndpoint<'_> {
    fn address(&self) -> &NodeAddress {
        self.inner.address()
    }

    fn discover(&self, deadline: Duration) -> Result<DiscoverResponse, EndpointError> {
        self.inner.discover(deadline)
    }

    fn prepare(
        &self,
        request: PrepareRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError> {
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(self.down());
        }
        self.inner.prepare(request, deadline)
    }

    fn commit(
        &self,
        request: CommitRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(self.down());
        }
        self.inner.commit(request, deadline)
    }

    fn rollback(
        &self,
        request: RollbackRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError> {
        if self.fail_rollback.load(Ordering::SeqCst) {
            return Err(self.down());
        }
        self.inner.rollback(request, deadline)
    }

    fn take_over(
        &self,
        request: TakeOverRequest,
        deadline: Duration,
    ) -> Result<TakeOverResponse, EndpointError> {
        self.inner.take_over(request, deadline)
    }
}

/// Endpoint wrapper that answers the coordinator's consistency re-check
/// with a foreign tail, as if another coordinator slipped in between the
/// prepare and the second discovery.
pub struct IntrudedEndpoint<'a> {
    inner: &'a dyn NodeEndpoint,
    discovers: AtomicUsize,
}

impl<'a> IntrudedEndpoint<'a> {
    pub fn new(inner: &'a dyn NodeEndpoint) -> Self {
        Self {
            inner,
            discovers: AtomicUsize::new(0),
        }
    }
}

impl NodeEndpoint for IntrudedEndpoint<'_> {
    fn address(&self) -> &NodeAddress {
        self.inner.address()
    }

    fn discover(&self, deadline: Duration) -> Result<DiscoverResponse, EndpointError> {
        let mut response = self.inner.discover(deadline)?;
        let nth = self.discovers.fetch_add(1, Ordering::SeqCst) + 1;
        if nth >= 2 {
            if let Some(tail) = response.latest_change.as_mut() {
                tail.uuid = mint_uuid();
            }
        }
        Ok(response)
    }

    fn prepare(
        &self,
        request: PrepareRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError> {
        self.inner.prepare(request, deadline)
    }

    fn commit(
        &self,
        request: CommitRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError> {
        self.inner.commit(request, deadline)
    }

    fn rollback(
        &self,
        request: RollbackRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError> {
        self.inner.rollback(request, deadline)
    }

    fn take_over(
        &self,
        request: TakeOverRequest,
        deadline: Duration,
    ) -> Result<TakeOverResponse, EndpointError> {
        self.inner.take_over(request, deadline)
    }
}

/// Write a roster file next to `dirs` for CLI-driven tests.
pub fn write_roster(path: &Path, members: &[(NodeAddress, &Path)]) {
    let mut text = String::new();
    for (address, dir) in members {
        text.push_str(&format!(
            "[[members]]\naddress = \"{address}\"\ndir = \"{}\"\n\n",
            dir.display()
        ));
    }
    std::fs::write(path, text).expect("write roster");
}
