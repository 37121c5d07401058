#![forbid(unsafe_code)]

pub mod audit;
pub mod change;
pub mod cli;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod journal;
pub mod model;
pub mod node;
mod paths;
pub mod proto;
pub mod telemetry;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the protocol vocabulary at the crate root for convenience.
pub use crate::change::{
    evaluate, ChangeAudit, ChangePayload, ChangeRecord, ChangeState, ChangeUuid, RejectReason,
    SettingTarget, Verdict, Version,
};
pub use crate::model::{Cluster, Node, NodeAddress, Stripe};
pub use crate::proto::{
    CommitRequest, DiscoverResponse, EndpointError, MutationResponse, NodeEndpoint, OriginIdentity,
    PrepareRequest, Rejection, RollbackRequest, ServerMode, TakeOverRequest, TakeOverResponse,
};
