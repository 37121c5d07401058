//! The RPC seam. Transport is an external collaborator; everything the
//! coordinator needs from a node goes through this trait with an explicit
//! per-call deadline.

use std::time::Duration;

use thiserror::Error;

use crate::model::NodeAddress;

use super::messages::{
    CommitRequest, DiscoverResponse, MutationResponse, PrepareRequest, RollbackRequest,
    TakeOverRequest, TakeOverResponse,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("node {address} unreachable: {reason}")]
    Unreachable { address: NodeAddress, reason: String },
    #[error("node {address} did not answer within {after:?}")]
    Timeout { address: NodeAddress, after: Duration },
}

impl EndpointError {
    pub fn address(&self) -> &NodeAddress {
        match self {
            EndpointError::Unreachable { address, .. } => address,
            EndpointError::Timeout { address, .. } => address,
        }
    }
}

pub trait NodeEndpoint: Send + Sync {
    fn address(&self) -> &NodeAddress;

    fn discover(&self, deadline: Duration) -> Result<DiscoverResponse, EndpointError>;

    fn prepare(
        &self,
        request: PrepareRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError>;

    fn commit(
        &self,
        request: CommitRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError>;

    fn rollback(
        &self,
        request: RollbackRequest,
        deadline: Duration,
    ) -> Result<MutationResponse, EndpointError>;

    fn take_over(
        &self,
        request: TakeOverRequest,
        deadline: Duration,
    ) -> Result<TakeOverResponse, EndpointError>;
}
