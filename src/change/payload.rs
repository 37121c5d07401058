//! Change descriptions operators can apply to a cluster.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Node, NodeAddress, Stripe};

/// Which part of the configuration a setting mutation addresses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum SettingTarget {
    Cluster,
    Node { address: NodeAddress },
}

impl fmt::Display for SettingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingTarget::Cluster => f.write_str("cluster"),
            SettingTarget::Node { address } => write!(f, "node {address}"),
        }
    }
}

/// The opaque-to-the-log, serializable description of one mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangePayload {
    /// Set (or with `value: None`, unset) a setting.
    SettingChange {
        target: SettingTarget,
        key: String,
        value: Option<String>,
    },
    /// Add a node to an existing stripe.
    AttachNode { stripe: String, node: Node },
    /// Remove a node from its stripe.
    DetachNode { address: NodeAddress },
    /// Add a whole stripe with its member nodes.
    AttachStripe { stripe: Stripe },
    /// Remove a stripe and all of its nodes.
    DetachStripe { name: String },
}

impl ChangePayload {
    /// One-line operator-facing description.
    pub fn summary(&self) -> String {
        match self {
            ChangePayload::SettingChange {
                target,
                key,
                value: Some(value),
            } => format!("set {key}={value} on {target}"),
            ChangePayload::SettingChange {
                target,
                key,
                value: None,
            } => format!("unset {key} on {target}"),
            ChangePayload::AttachNode { stripe, node } => {
                format!("attach node {} to stripe {stripe}", node.address)
            }
            ChangePayload::DetachNode { address } => format!("detach node {address}"),
            ChangePayload::AttachStripe { stripe } => {
                format!("attach stripe {} ({} nodes)", stripe.name, stripe.nodes.len())
            }
            ChangePayload::DetachStripe { name } => format!("detach stripe {name}"),
        }
    }
}
