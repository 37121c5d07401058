//! Render a cluster configuration for operators: JSON or properties.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cluster::Cluster;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Properties,
}

impl std::str::FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "properties" => Ok(Self::Properties),
            other => Err(ExportError::UnknownFormat {
                got: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unknown export format {got:?} (expected json or properties)")]
    UnknownFormat { got: String },
    #[error("json render failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn render(cluster: &Cluster, format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(cluster)?),
        ExportFormat::Properties => Ok(render_properties(cluster)),
    }
}

/// Flat `stripe.<i>.node.<j>.<key>=<value>` lines, stripes and nodes 1-based.
fn render_properties(cluster: &Cluster) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "cluster-name={}", cluster.name);
    for (key, value) in &cluster.settings {
        let _ = writeln!(out, "{key}={value}");
    }
    for (si, stripe) in cluster.stripes.iter().enumerate() {
        let si = si + 1;
        let _ = writeln!(out, "stripe.{si}.stripe-name={}", stripe.name);
        for (ni, node) in stripe.nodes.iter().enumerate() {
            let ni = ni + 1;
            let _ = writeln!(out, "stripe.{si}.node.{ni}.node-name={}", node.name);
            let _ = writeln!(out, "stripe.{si}.node.{ni}.node-hostname={}", node.address.host);
            let _ = writeln!(out, "stripe.{si}.node.{ni}.node-port={}", node.address.port);
            for (key, value) in &node.settings {
                let _ = writeln!(out, "stripe.{si}.node.{ni}.{key}={value}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, NodeAddress, Stripe};

    fn sample() -> Cluster {
        let mut cluster = Cluster::new(
            "tc",
            vec![Stripe::new(
                "stripe1",
                vec![Node::new("node1", NodeAddress::new("localhost", 9410))
                    .with_setting("node-group-port", "9430")],
            )],
        );
        cluster
            .settings
            .insert("offheap-resources".to_string(), "main:512MB".to_string());
        cluster
    }

    #[test]
    fn json_roundtrips() {
        let cluster = sample();
        let json = render(&cluster, ExportFormat::Json).unwrap();
        let back: Cluster = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cluster);
    }

    #[test]
    fn properties_are_flat_and_one_based() {
        let text = render(&sample(), ExportFormat::Properties).unwrap();
        assert!(text.contains("cluster-name=tc\n"));
        assert!(text.contains("offheap-resources=main:512MB\n"));
        assert!(text.contains("stripe.1.node.1.node-hostname=localhost\n"));
        assert!(text.contains("stripe.1.node.1.node-group-port=9430\n"));
    }

    #[test]
    fn format_parses() {
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
