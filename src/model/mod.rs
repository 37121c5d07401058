//! Cluster configuration domain model.
//!
//! Two representations exist on purpose. [`Cluster`] is the serializable
//! view stored inside change records and rendered by `export`. [`Topology`]
//! is an arena of stripe/node records addressed by integer ids; the
//! evaluator mutates the arena and rebuilds the view, so no parent/child
//! owning references ever form a cycle.

mod cluster;
pub mod export;
pub mod settings;
mod topology;

pub use cluster::{AddressParseError, Cluster, Node, NodeAddress, Stripe};
pub use topology::{ModelError, NodeId, StripeId, Topology};
