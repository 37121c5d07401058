//! Applies a change payload to a configuration, yielding the candidate.
//!
//! Evaluation is pure and deterministic: every node must reach the same
//! verdict from the same `(current, payload)` pair, because the coordinator
//! relies on unanimity instead of voting.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::settings::{self, Mutability, SettingScope};
use crate::model::{Cluster, NodeAddress, Topology};

use super::payload::{ChangePayload, SettingTarget};

/// Why a change is illegal against the current configuration.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("unknown setting {key:?}")]
    UnknownSetting { key: String },
    #[error("setting {key:?} cannot change after activation")]
    ImmutableSetting { key: String },
    #[error("setting {key:?} does not apply to {target}")]
    WrongScope { key: String, target: String },
    #[error("invalid value for {key:?}: {detail}")]
    InvalidValue { key: String, detail: String },
    #[error("node {address} is not part of the cluster")]
    UnknownNode { address: NodeAddress },
    #[error("stripe {name:?} is not part of the cluster")]
    UnknownStripe { name: String },
    #[error("node {address} already belongs to the cluster")]
    DuplicateAddress { address: NodeAddress },
    #[error("port {port} already in use on host {host:?}")]
    PortCollision { host: String, port: u16 },
    #[error("node {node:?} is missing required setting {key:?}")]
    MissingRequiredSetting { node: String, key: String },
    #[error("stripe {name:?} already exists")]
    StripeExists { name: String },
    #[error("cannot detach the last remaining stripe")]
    LastStripe,
    #[error("cannot detach the last node of the last stripe")]
    LastNode,
}

/// Legality verdict plus, on acceptance, the candidate configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accept(Box<Cluster>),
    Reject(RejectReason),
}

impl Verdict {
    pub fn into_result(self) -> Result<Cluster, RejectReason> {
        match self {
            Verdict::Accept(cluster) => Ok(*cluster),
            Verdict::Reject(reason) => Err(reason),
        }
    }
}

pub fn evaluate(current: &Cluster, payload: &ChangePayload) -> Verdict {
    match try_evaluate(current, payload) {
        Ok(candidate) => Verdict::Accept(Box::new(candidate)),
        Err(reason) => Verdict::Reject(reason),
    }
}

fn try_evaluate(current: &Cluster, payload: &ChangePayload) -> Result<Cluster, RejectReason> {
    let mut topology = Topology::from_cluster(current);
    match payload {
        ChangePayload::SettingChange { target, key, value } => {
            apply_setting(&mut topology, target, key, value.as_deref())?
        }
        ChangePayload::AttachNode { stripe, node } => {
            check_joining_node(&topology, node)?;
            let stripe_id = topology
                .stripe_by_name(stripe)
                .ok_or_else(|| RejectReason::UnknownStripe { name: stripe.clone() })?;
            topology
                .attach_node(stripe_id, node.clone())
                .map_err(reject_from_model)?;
        }
        ChangePayload::DetachNode { address } => {
            let node_id = topology
                .node_by_address(address)
                .ok_or_else(|| RejectReason::UnknownNode {
                    address: address.clone(),
                })?;
            if topology.live_node_count() == 1 {
                return Err(RejectReason::LastNode);
            }
            topology.detach_node(node_id);
        }
        ChangePayload::AttachStripe { stripe } => {
            if topology.stripe_by_name(&stripe.name).is_some() {
                return Err(RejectReason::StripeExists {
                    name: stripe.name.clone(),
                });
            }
            // Admit members one by one so collisions inside the joining
            // stripe are caught, not only collisions with existing nodes.
            let stripe_id = topology
                .attach_stripe(crate::model::Stripe::new(stripe.name.clone(), Vec::new()))
                .map_err(reject_from_model)?;
            for node in &stripe.nodes {
                check_joining_node(&topology, node)?;
                topology
                    .attach_node(stripe_id, node.clone())
                    .map_err(reject_from_model)?;
            }
        }
        ChangePayload::DetachStripe { name } => {
            let stripe_id = topology
                .stripe_by_name(name)
                .ok_or_else(|| RejectReason::UnknownStripe { name: name.clone() })?;
            if topology.live_stripe_count() == 1 {
                return Err(RejectReason::LastStripe);
            }
            topology.detach_stripe(stripe_id);
        }
    }
    Ok(topology.to_cluster())
}

fn apply_setting(
    topology: &mut Topology,
    target: &SettingTarget,
    key: &str,
    value: Option<&str>,
) -> Result<(), RejectReason> {
    let def = settings::lookup(key).ok_or_else(|| RejectReason::UnknownSetting {
        key: key.to_string(),
    })?;
    if def.mutability == Mutability::ImmutableAfterActivation {
        return Err(RejectReason::ImmutableSetting {
            key: key.to_string(),
        });
    }
    if let Some(value) = value {
        def.validate(value).map_err(|detail| RejectReason::InvalidValue {
            key: key.to_string(),
            detail,
        })?;
    }
    match (def.scope, target) {
        (SettingScope::Cluster, SettingTarget::Cluster) => {
            let map = topology.cluster_settings_mut();
            match value {
                Some(value) => {
                    map.insert(key.to_string(), value.to_string());
                }
                None => {
                    map.remove(key);
                }
            }
            Ok(())
        }
        (SettingScope::Node, SettingTarget::Node { address }) => {
            let node_id =
                topology
                    .node_by_address(address)
                    .ok_or_else(|| RejectReason::UnknownNode {
                        address: address.clone(),
                    })?;
            let map = &mut topology.node_mut(node_id).settings;
            match value {
                Some(value) => {
                    map.insert(key.to_string(), value.to_string());
                }
                None => {
                    map.remove(key);
                }
            }
            Ok(())
        }
        (_, target) => Err(RejectReason::WrongScope {
            key: key.to_string(),
            target: target.to_string(),
        }),
    }
}

/// Admission checks for a node about to join: unique address, free listen
/// ports on its host, required settings present.
fn check_joining_node(
    topology: &Topology,
    node: &crate::model::Node,
) -> Result<(), RejectReason> {
    if topology.node_by_address(&node.address).is_some() {
        return Err(RejectReason::DuplicateAddress {
            address: node.address.clone(),
        });
    }
    for (_, port) in topology.ports_on_host(&node.address.host) {
        if port == node.address.port || group_port_of(node) == Some(port) {
            return Err(RejectReason::PortCollision {
                host: node.address.host.clone(),
                port,
            });
        }
    }
    for def in settings::required_node_settings() {
        let satisfied = match def.key {
            // The address carries these two; an explicit setting is optional.
            "node-hostname" => !node.address.host.is_empty(),
            "node-port" => node.address.port != 0,
            key => node.settings.contains_key(key),
        };
        if !satisfied {
            return Err(RejectReason::MissingRequiredSetting {
                node: node.name.clone(),
                key: def.key.to_string(),
            });
        }
    }
    Ok(())
}

fn group_port_of(node: &crate::model::Node) -> Option<u16> {
    node.settings
        .get("node-group-port")
        .and_then(|raw| raw.parse().ok())
}

fn reject_from_model(err: crate::model::ModelError) -> RejectReason {
    use crate::model::ModelError;
    match err {
        ModelError::UnknownStripe { name } => RejectReason::UnknownStripe { name },
        ModelError::UnknownNode { address } => RejectReason::UnknownNode { address },
        ModelError::DuplicateAddress { address } => RejectReason::DuplicateAddress { address },
        ModelError::StripeExists { name } => RejectReason::StripeExists { name },
    }
}
