use thiserror::Error;

use crate::coordinator::SessionError;
use crate::journal::JournalError;
use crate::model::export::ExportError;
use crate::node::NodeError;
use crate::proto::EndpointError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What we know about side effects when an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// Definitely no side effects occurred.
    None,
    /// Side effects definitely occurred (locally or remotely).
    Some,
    /// We don't know if side effects occurred.
    Unknown,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Some => "some",
            Effect::Unknown => "unknown",
        }
    }
}

/// Crate-level convenience error: a thin wrapper over the capability
/// errors, not a replacement for them.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            // The journal only errors on protocol bugs, corruption, or a
            // durability failure; none of those heal on retry.
            Error::Journal(_) => Transience::Permanent,
            Error::Node(NodeError::Journal(_)) => Transience::Permanent,
            Error::Node(NodeError::Halted) => Transience::Permanent,
            Error::Node(NodeError::Bootstrap { .. }) => Transience::Permanent,
            Error::Endpoint(_) => Transience::Retryable,
            Error::Session(SessionError::PartialCluster { .. }) => Transience::Retryable,
            Error::Session(SessionError::RaceDetected { .. }) => Transience::Retryable,
            Error::Session(SessionError::PriorChangeInFlight { .. }) => Transience::Permanent,
            Error::Session(SessionError::InconsistentCluster { .. }) => Transience::Permanent,
            Error::Session(SessionError::Cancelled) => Transience::Permanent,
            Error::Export(_) => Transience::Permanent,
            Error::Config(_) => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Error::Journal(JournalError::Io { .. }) => Effect::Unknown,
            Error::Journal(_) => Effect::None,
            Error::Node(NodeError::Journal(JournalError::Io { .. })) => Effect::Unknown,
            Error::Node(_) => Effect::None,
            Error::Endpoint(_) => Effect::Unknown,
            // Phase A aborts happen before any mutation is sent.
            Error::Session(SessionError::PartialCluster { .. }) => Effect::None,
            Error::Session(SessionError::PriorChangeInFlight { .. }) => Effect::None,
            Error::Session(SessionError::InconsistentCluster { .. }) => Effect::None,
            // A race or cancellation abort rolls acceptors back first.
            Error::Session(SessionError::RaceDetected { .. }) => Effect::Some,
            Error::Session(SessionError::Cancelled) => Effect::Unknown,
            Error::Export(_) => Effect::None,
            Error::Config(_) => Effect::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_is_retryable_with_unknown_effect() {
        let err = Error::Endpoint(EndpointError::Unreachable {
            address: crate::model::NodeAddress::new("h1", 9410),
            reason: "connection refused".to_string(),
        });
        assert!(err.transience().is_retryable());
        assert_eq!(err.effect(), Effect::Unknown);
    }

    #[test]
    fn prior_change_needs_operator_action() {
        let err = Error::Session(SessionError::PriorChangeInFlight { nodes: Vec::new() });
        assert_eq!(err.transience(), Transience::Permanent);
        assert_eq!(err.effect(), Effect::None);
    }
}
