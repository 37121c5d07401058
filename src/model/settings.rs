//! Registry of the platform settings an operator can read or mutate.
//!
//! Every setting has a scope, a mutability class, and a validator. The
//! evaluator consults this table; it never hard-codes setting names.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingScope {
    Cluster,
    Node,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutability {
    /// May change at runtime through the change protocol.
    Mutable,
    /// Fixed once the node has been activated into a cluster.
    ImmutableAfterActivation,
}

pub struct SettingDef {
    pub key: &'static str,
    pub scope: SettingScope,
    pub mutability: Mutability,
    pub required: bool,
    validator: fn(&str) -> Result<(), String>,
}

impl SettingDef {
    pub fn validate(&self, value: &str) -> Result<(), String> {
        (self.validator)(value)
    }
}

const SETTINGS: &[SettingDef] = &[
    SettingDef {
        key: "cluster-name",
        scope: SettingScope::Cluster,
        mutability: Mutability::ImmutableAfterActivation,
        required: false,
        validator: non_empty,
    },
    SettingDef {
        key: "offheap-resources",
        scope: SettingScope::Cluster,
        mutability: Mutability::Mutable,
        required: false,
        validator: offheap_resources,
    },
    SettingDef {
        key: "client-reconnect-window",
        scope: SettingScope::Cluster,
        mutability: Mutability::Mutable,
        required: false,
        validator: duration,
    },
    SettingDef {
        key: "client-lease-duration",
        scope: SettingScope::Cluster,
        mutability: Mutability::Mutable,
        required: false,
        validator: duration,
    },
    SettingDef {
        key: "failover-priority",
        scope: SettingScope::Cluster,
        mutability: Mutability::ImmutableAfterActivation,
        required: false,
        validator: failover_priority,
    },
    SettingDef {
        key: "node-hostname",
        scope: SettingScope::Node,
        mutability: Mutability::ImmutableAfterActivation,
        required: true,
        validator: non_empty,
    },
    SettingDef {
        key: "node-port",
        scope: SettingScope::Node,
        mutability: Mutability::ImmutableAfterActivation,
        required: true,
        validator: port,
    },
    SettingDef {
        key: "node-group-port",
        scope: SettingScope::Node,
        mutability: Mutability::ImmutableAfterActivation,
        required: false,
        validator: port,
    },
    SettingDef {
        key: "node-bind-address",
        scope: SettingScope::Node,
        mutability: Mutability::ImmutableAfterActivation,
        required: false,
        validator: non_empty,
    },
    SettingDef {
        key: "node-metadata-dir",
        scope: SettingScope::Node,
        mutability: Mutability::ImmutableAfterActivation,
        required: false,
        validator: non_empty,
    },
    SettingDef {
        key: "data-dirs",
        scope: SettingScope::Node,
        mutability: Mutability::Mutable,
        required: false,
        validator: named_paths,
    },
    SettingDef {
        key: "node-backup-dir",
        scope: SettingScope::Node,
        mutability: Mutability::Mutable,
        required: false,
        validator: non_empty,
    },
    SettingDef {
        key: "node-log-dir",
        scope: SettingScope::Node,
        mutability: Mutability::Mutable,
        required: false,
        validator: non_empty,
    },
    SettingDef {
        key: "security-dir",
        scope: SettingScope::Node,
        mutability: Mutability::Mutable,
        required: false,
        validator: non_empty,
    },
    SettingDef {
        key: "audit-log-dir",
        scope: SettingScope::Node,
        mutability: Mutability::Mutable,
        required: false,
        validator: non_empty,
    },
];

pub fn lookup(key: &str) -> Option<&'static SettingDef> {
    SETTINGS.iter().find(|def| def.key == key)
}

pub fn required_node_settings() -> impl Iterator<Item = &'static SettingDef> {
    SETTINGS
        .iter()
        .filter(|def| def.required && def.scope == SettingScope::Node)
}

fn non_empty(value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err("value cannot be empty".to_string())
    } else {
        Ok(())
    }
}

fn port(value: &str) -> Result<(), String> {
    match value.parse::<u32>() {
        Ok(p) if (1..=65535).contains(&p) => Ok(()),
        Ok(p) => Err(format!("port {p} out of range 1..=65535")),
        Err(e) => Err(format!("not a port number: {e}")),
    }
}

/// `150s`, `20m`, `1h`.
fn duration(value: &str) -> Result<(), String> {
    parse_duration(value).map(|_| ())
}

pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("missing unit in {value:?}"))?;
    let (digits, unit) = value.split_at(split);
    let quantity: u64 = digits
        .parse()
        .map_err(|e| format!("bad quantity in {value:?}: {e}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(quantity)),
        "s" => Ok(Duration::from_secs(quantity)),
        "m" => Ok(Duration::from_secs(quantity * 60)),
        "h" => Ok(Duration::from_secs(quantity * 3600)),
        other => Err(format!("unknown unit {other:?} in {value:?}")),
    }
}

/// `main:512MB,cache:1GB`
fn offheap_resources(value: &str) -> Result<(), String> {
    for part in value.split(',') {
        let Some((name, size)) = part.split_once(':') else {
            return Err(format!("offheap resource must be name:size, got {part:?}"));
        };
        if name.trim().is_empty() {
            return Err(format!("empty resource name in {part:?}"));
        }
        parse_size(size.trim())?;
    }
    Ok(())
}

pub fn parse_size(value: &str) -> Result<u64, String> {
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("missing unit in {value:?}"))?;
    let (digits, unit) = value.split_at(split);
    let quantity: u64 = digits
        .parse()
        .map_err(|e| format!("bad quantity in {value:?}: {e}"))?;
    let multiplier: u64 = match unit {
        "B" => 1,
        "KB" => 1024,
        "MB" => 1024 * 1024,
        "GB" => 1024 * 1024 * 1024,
        "TB" => 1024u64.pow(4),
        other => return Err(format!("unknown size unit {other:?} in {value:?}")),
    };
    quantity
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow in {value:?}"))
}

/// `availability` or `consistency:N`
fn failover_priority(value: &str) -> Result<(), String> {
    match value.split_once(':') {
        None if value == "availability" => Ok(()),
        Some(("consistency", voters)) => voters
            .parse::<u32>()
            .map(|_| ())
            .map_err(|e| format!("bad voter count: {e}")),
        _ => Err(format!(
            "failover-priority must be availability or consistency:<voters>, got {value:?}"
        )),
    }
}

/// `main:/var/data,fast:/mnt/ssd`
fn named_paths(value: &str) -> Result<(), String> {
    for part in value.split(',') {
        let Some((name, path)) = part.split_once(':') else {
            return Err(format!("data dir must be name:path, got {part:?}"));
        };
        if name.trim().is_empty() || path.trim().is_empty() {
            return Err(format!("empty name or path in {part:?}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_knows_the_registry() {
        assert!(lookup("offheap-resources").is_some());
        assert!(lookup("node-port").is_some());
        assert!(lookup("no-such-setting").is_none());
    }

    #[test]
    fn required_node_settings_cover_address() {
        let keys: Vec<_> = required_node_settings().map(|d| d.key).collect();
        assert_eq!(keys, vec!["node-hostname", "node-port"]);
    }

    #[test]
    fn validators_accept_and_reject() {
        assert!(lookup("node-port").unwrap().validate("9410").is_ok());
        assert!(lookup("node-port").unwrap().validate("0").is_err());
        assert!(lookup("offheap-resources").unwrap().validate("main:512MB").is_ok());
        assert!(lookup("offheap-resources").unwrap().validate("main").is_err());
        assert!(lookup("client-lease-duration").unwrap().validate("150s").is_ok());
        assert!(lookup("client-lease-duration").unwrap().validate("150").is_err());
        assert!(lookup("failover-priority").unwrap().validate("consistency:2").is_ok());
        assert!(lookup("failover-priority").unwrap().validate("fastest").is_err());
        assert!(lookup("data-dirs").unwrap().validate("main:/var/data").is_ok());
    }

    #[test]
    fn sizes_and_durations_parse() {
        assert_eq!(parse_size("512MB").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_size("12XB").is_err());
    }
}
