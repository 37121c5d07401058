//! Serializable cluster view: the payload result carried by change records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// `host:port` endpoint of a node. Serialized as the string form.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("address must be host:port, got {got:?}")]
    MissingPort { got: String },
    #[error("invalid port in {got:?}: {reason}")]
    InvalidPort { got: String, reason: String },
    #[error("empty host in {got:?}")]
    EmptyHost { got: String },
}

impl FromStr for NodeAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((host, port)) = s.rsplit_once(':') else {
            return Err(AddressParseError::MissingPort { got: s.to_string() });
        };
        if host.is_empty() {
            return Err(AddressParseError::EmptyHost { got: s.to_string() });
        }
        let port = port.parse::<u16>().map_err(|e| AddressParseError::InvalidPort {
            got: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Serialize for NodeAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One configured server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Node {
    pub name: String,
    pub address: NodeAddress,
    /// Node-scoped settings (`node-group-port`, `data-dirs`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

impl Node {
    pub fn new(name: impl Into<String>, address: NodeAddress) -> Self {
        Self {
            name: name.into(),
            address,
            settings: BTreeMap::new(),
        }
    }

    pub fn with_setting(mut self, key: &str, value: &str) -> Self {
        self.settings.insert(key.to_string(), value.to_string());
        self
    }
}

/// A replication group of nodes sharing identical state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stripe {
    pub name: String,
    pub nodes: Vec<Node>,
}

impl Stripe {
    pub fn new(name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            nodes,
        }
    }
}

/// The full declarative cluster configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Cluster {
    pub name: String,
    /// Cluster-scoped settings (`offheap-resources`, `client-lease-duration`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
    pub stripes: Vec<Stripe>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, stripes: Vec<Stripe>) -> Self {
        Self {
            name: name.into(),
            settings: BTreeMap::new(),
            stripes,
        }
    }

    /// The built-in configuration a node holds before any change commits.
    pub fn bootstrap(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn node_addresses(&self) -> Vec<&NodeAddress> {
        self.stripes
            .iter()
            .flat_map(|s| s.nodes.iter().map(|n| &n.address))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.stripes.iter().map(|s| s.nodes.len()).sum()
    }

    pub fn contains_address(&self, address: &NodeAddress) -> bool {
        self.stripes
            .iter()
            .any(|s| s.nodes.iter().any(|n| &n.address == address))
    }

    /// Name of the stripe containing `address`, if any.
    pub fn stripe_of(&self, address: &NodeAddress) -> Option<&Stripe> {
        self.stripes
            .iter()
            .find(|s| s.nodes.iter().any(|n| &n.address == address))
    }

    pub fn find_node(&self, address: &NodeAddress) -> Option<&Node> {
        self.stripes
            .iter()
            .flat_map(|s| s.nodes.iter())
            .find(|n| &n.address == address)
    }
}
