//! Request/response messages and the RPC seam between the coordinator and
//! nodes. Wire encoding is JSON; unknown fields are rejected.

pub mod embedded;
mod endpoint;
mod messages;

pub use embedded::EmbeddedEndpoint;
pub use endpoint::{EndpointError, NodeEndpoint};
pub use messages::{
    CommitRequest, DiscoverRequest, DiscoverResponse, MutationResponse, OriginIdentity,
    PrepareRequest, Rejection, RollbackRequest, ServerMode, TakeOverRequest, TakeOverResponse,
};
