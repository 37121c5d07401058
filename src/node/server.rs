//! Per-node serialization queue.
//!
//! The state machine runs on one dedicated worker thread; every request is
//! a message on a crossbeam channel, so mutations are serialized without a
//! lock and no network I/O ever happens inside the node's critical path.
//! The worker exits when the last handle is dropped.

use std::thread;
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, RecvTimeoutError, Sender};
use tracing::{debug, error};

use crate::model::NodeAddress;
use crate::proto::{
    CommitRequest, DiscoverResponse, EndpointError, MutationResponse, PrepareRequest,
    RollbackRequest, TakeOverRequest, TakeOverResponse,
};

use super::state_machine::NodeStateMachine;
use super::NodeError;

enum NodeRequest {
    Discover {
        reply: Sender<DiscoverResponse>,
    },
    Prepare {
        request: PrepareRequest,
        reply: Sender<Result<MutationResponse, NodeError>>,
    },
    Commit {
        request: CommitRequest,
        reply: Sender<Result<MutationResponse, NodeError>>,
    },
    Rollback {
        request: RollbackRequest,
        reply: Sender<Result<MutationResponse, NodeError>>,
    },
    TakeOver {
        request: TakeOverRequest,
        reply: Sender<Result<TakeOverResponse, NodeError>>,
    },
}

pub struct NodeServer;

impl NodeServer {
    /// Move the state machine onto its worker thread and return the client
    /// side of its queue.
    pub fn spawn(machine: NodeStateMachine, address: NodeAddress) -> NodeHandle {
        let (tx, rx) = unbounded::<NodeRequest>();
        let thread_address = address.clone();
        thread::Builder::new()
            .name(format!("node-{thread_address}"))
            .spawn(move || {
                let mut machine = machine;
                while let Ok(request) = rx.recv() {
                    match request {
                        NodeRequest::Discover { reply } => {
                            let _ = reply.send(machine.discover());
                        }
                        NodeRequest::Prepare { request, reply } => {
                            let _ = reply.send(machine.prepare(request));
                        }
                        NodeRequest::Commit { request, reply } => {
                            let _ = reply.send(machine.commit(request));
                        }
                        NodeRequest::Rollback { request, reply } => {
                            let _ = reply.send(machine.rollback(request));
                        }
                        NodeRequest::TakeOver { request, reply } => {
                            let _ = reply.send(machine.take_over(request));
                        }
                    }
                }
                debug!(address = %thread_address, "node worker stopped");
            })
            .expect("spawn node worker");
        NodeHandle { address, tx }
    }
}

/// Cloneable client side of one node's queue.
#[derive(Clone, Debug)]
pub struct NodeHandle {
    address: NodeAddress,
    tx: Sender<NodeRequest>,
}

impl NodeHandle {
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn discover(&self, deadline: Duration) -> Result<DiscoverResponse, EndpointError> {
        let (reply, rx) = bounded(1);
        self.send(NodeRequest::Discover { reply })?;
        self.wait(rx, deadline)
    }

    pub fn prepare(
        &self,
        request: PrepareRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError> {
        let (reply, rx) = bounded(1);
        self.send(NodeRequest::Prepare { request, reply })?;
        self.wait_fallible(rx, deadline)
    }

    pub fn commit(
        &self,
        request: CommitRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError> {
        let (reply, rx) = bounded(1);
        self.send(NodeRequest::Commit { request, reply })?;
        self.wait_fallible(rx, deadline)
    }

    pub fn rollback(
        &self,
        request: RollbackRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError> {
        let (reply, rx) = bounded(1);
        self.send(NodeRequest::Rollback { request, reply })?;
        self.wait_fallible(rx, deadline)
    }

    pub fn take_over(
        &self,
        request: TakeOverRequest,
        deadline: Duration,
    ) -> Result<TakeOverResponse, EndpointError> {
        let (reply, rx) = bounded(1);
        self.send(NodeRequest::TakeOver { request, reply })?;
        self.wait_fallible(rx, deadline)
    }

    fn send(&self, request: NodeRequest) -> Result<(), EndpointError> {
        self.tx.send(request).map_err(|_| EndpointError::Unreachable {
            address: self.address.clone(),
            reason: "node worker is gone".to_string(),
        })
    }

    fn wait<T>(
        &self,
        rx: crossbeam::channel::Receiver<T>,
        deadline: Duration,
    ) -> Result<T, EndpointError> {
        match rx.recv_timeout(deadline) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(EndpointError::Timeout {
                address: self.address.clone(),
                after: deadline,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(EndpointError::Unreachable {
                address: self.address.clone(),
                reason: "node worker dropped the request".to_string(),
            }),
        }
    }

    /// A node that halts (durability failure) stops acknowledging; the
    /// caller observes that as unreachability, not as a rejection.
    fn wait_fallible<T>(
        &self,
        rx: crossbeam::channel::Receiver<Result<T, NodeError>>,
        deadline: Duration,
    ) -> Result<T, EndpointError> {
        match self.wait(rx, deadline)? {
            Ok(value) => Ok(value),
            Err(err) => {
                error!(address = %self.address, error = %err, "node refused to acknowledge");
                Err(EndpointError::Unreachable {
                    address: self.address.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }
}
