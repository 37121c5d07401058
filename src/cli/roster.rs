//! The cluster roster: which member address lives in which directory.
//!
//! Transport is an external collaborator, so the tool reaches nodes
//! through their journal directories. The roster file is the embedded
//! stand-in for DNS + connection config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::NodeAddress;
use crate::proto::ServerMode;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("failed to read roster {path:?}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
    #[error("member {address} is not in the roster")]
    UnknownMember { address: NodeAddress },
    #[error("roster has no members")]
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roster {
    #[serde(rename = "members")]
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub address: NodeAddress,
    pub dir: PathBuf,
    #[serde(default)]
    pub passive: bool,
}

impl Member {
    pub fn mode(&self) -> ServerMode {
        if self.passive {
            ServerMode::Passive
        } else {
            ServerMode::ActiveCoordinator
        }
    }
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let contents = std::fs::read_to_string(path).map_err(|e| RosterError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut roster: Roster =
            toml::from_str(&contents).map_err(|e| RosterError::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if roster.members.is_empty() {
            return Err(RosterError::Empty);
        }
        // Member dirs are relative to the roster file.
        if let Some(base) = path.parent() {
            for member in &mut roster.members {
                if member.dir.is_relative() {
                    member.dir = base.join(&member.dir);
                }
            }
        }
        Ok(roster)
    }

    pub fn member(&self, address: &NodeAddress) -> Result<&Member, RosterError> {
        self.members
            .iter()
            .find(|m| &m.address == address)
            .ok_or_else(|| RosterError::UnknownMember {
                address: address.clone(),
            })
    }
}
