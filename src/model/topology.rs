//! Arena representation of the stripe/node graph.
//!
//! Stripes and nodes live in flat vectors; links between them are indices.
//! Detach marks a record dead instead of shifting the arena, so ids held by
//! the caller stay valid for the lifetime of one evaluation.

use std::collections::BTreeMap;

use thiserror::Error;

use super::cluster::{Cluster, Node, NodeAddress, Stripe};

pub type StripeId = usize;
pub type NodeId = usize;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown stripe {name:?}")]
    UnknownStripe { name: String },
    #[error("unknown node {address}")]
    UnknownNode { address: NodeAddress },
    #[error("duplicate node address {address}")]
    DuplicateAddress { address: NodeAddress },
    #[error("stripe {name:?} already exists")]
    StripeExists { name: String },
}

#[derive(Clone, Debug)]
struct StripeRecord {
    name: String,
    nodes: Vec<NodeId>,
    alive: bool,
}

#[derive(Clone, Debug)]
struct NodeRecord {
    stripe: StripeId,
    node: Node,
    alive: bool,
}

#[derive(Clone, Debug)]
pub struct Topology {
    cluster_name: String,
    cluster_settings: BTreeMap<String, String>,
    stripes: Vec<StripeRecord>,
    nodes: Vec<NodeRecord>,
}

impl Topology {
    pub fn from_cluster(cluster: &Cluster) -> Self {
        let mut topology = Self {
            cluster_name: cluster.name.clone(),
            cluster_settings: cluster.settings.clone(),
            stripes: Vec::with_capacity(cluster.stripes.len()),
            nodes: Vec::with_capacity(cluster.node_count()),
        };
        for stripe in &cluster.stripes {
            let stripe_id = topology.stripes.len();
            let mut node_ids = Vec::with_capacity(stripe.nodes.len());
            for node in &stripe.nodes {
                let node_id = topology.nodes.len();
                topology.nodes.push(NodeRecord {
                    stripe: stripe_id,
                    node: node.clone(),
                    alive: true,
                });
                node_ids.push(node_id);
            }
            topology.stripes.push(StripeRecord {
                name: stripe.name.clone(),
                nodes: node_ids,
                alive: true,
            });
        }
        topology
    }

    /// Rebuild the serializable view, skipping dead records.
    pub fn to_cluster(&self) -> Cluster {
        let stripes = self
            .stripes
            .iter()
            .filter(|s| s.alive)
            .map(|s| Stripe {
                name: s.name.clone(),
                nodes: s
                    .nodes
                    .iter()
                    .filter(|&&id| self.nodes[id].alive)
                    .map(|&id| self.nodes[id].node.clone())
                    .collect(),
            })
            .collect();
        Cluster {
            name: self.cluster_name.clone(),
            settings: self.cluster_settings.clone(),
            stripes,
        }
    }

    pub fn cluster_settings_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.cluster_settings
    }

    pub fn live_stripe_count(&self) -> usize {
        self.stripes.iter().filter(|s| s.alive).count()
    }

    pub fn live_node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.alive).count()
    }

    pub fn stripe_by_name(&self, name: &str) -> Option<StripeId> {
        self.stripes
            .iter()
            .position(|s| s.alive && s.name == name)
    }

    pub fn node_by_address(&self, address: &NodeAddress) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.alive && n.node.address == *address)
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id].node
    }

    /// Live nodes sharing `host`, as (id, port) pairs. Used for listen-port
    /// collision checks.
    pub fn ports_on_host(&self, host: &str) -> Vec<(NodeId, u16)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.alive && n.node.address.host == host)
            .map(|(id, n)| (id, n.node.address.port))
            .collect()
    }

    pub fn attach_node(&mut self, stripe: StripeId, node: Node) -> Result<NodeId, ModelError> {
        if self.node_by_address(&node.address).is_some() {
            return Err(ModelError::DuplicateAddress {
                address: node.address,
            });
        }
        if !self.stripes.get(stripe).is_some_and(|s| s.alive) {
            return Err(ModelError::UnknownStripe {
                name: format!("#{stripe}"),
            });
        }
        let id = self.nodes.len();
        self.nodes.push(NodeRecord {
            stripe,
            node,
            alive: true,
        });
        self.stripes[stripe].nodes.push(id);
        Ok(id)
    }

    pub fn detach_node(&mut self, id: NodeId) {
        self.nodes[id].alive = false;
    }

    pub fn attach_stripe(&mut self, stripe: Stripe) -> Result<StripeId, ModelError> {
        if self.stripe_by_name(&stripe.name).is_some() {
            return Err(ModelError::StripeExists { name: stripe.name });
        }
        let stripe_id = self.stripes.len();
        let mut node_ids = Vec::with_capacity(stripe.nodes.len());
        for node in stripe.nodes {
            if self.node_by_address(&node.address).is_some() {
                return Err(ModelError::DuplicateAddress {
                    address: node.address,
                });
            }
            let id = self.nodes.len();
            self.nodes.push(NodeRecord {
                stripe: stripe_id,
                node,
                alive: true,
            });
            node_ids.push(id);
        }
        self.stripes.push(StripeRecord {
            name: stripe.name,
            nodes: node_ids,
            alive: true,
        });
        Ok(stripe_id)
    }

    pub fn detach_stripe(&mut self, id: StripeId) {
        self.stripes[id].alive = false;
        for &node in &self.stripes[id].nodes {
            self.nodes[node].alive = false;
        }
    }
}
