/*!
 * Error types for Slingshot
 */

use std::io;
use thiserror::Error;
use uuid::Uuid;

use crate::topology::EndpointId;

pub type Result<T> = std::result::Result<T, SlingshotError>;

/// Errors raised while resolving and committing transfer paths
#[derive(Error, Debug)]
pub enum SlingshotError {
    /// No route exists between two endpoints under the active multihop policy.
    /// Handled per-source: the candidate is dropped, the batch continues.
    #[error("no path from {src} to {dst}")]
    NoPath { src: EndpointId, dst: EndpointId },

    /// An endpoint id was referenced that the topology does not contain
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(EndpointId),

    /// An endpoint disappeared between path resolution and persistence.
    /// The request is left unassigned for a future cycle.
    #[error("endpoint vanished while persisting: {0}")]
    EndpointVanished(EndpointId),

    /// Uniqueness conflict: a non-terminal request already exists for this
    /// (data id, destination) pair. Recovered by re-reading the existing row.
    #[error("conflicting request for data {data_id} at {dest}")]
    Conflict { data_id: Uuid, dest: EndpointId },

    /// A request id was referenced that the store does not contain
    #[error("unknown request: {0}")]
    UnknownRequest(Uuid),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Persistence layer failure
    #[error("store error: {0}")]
    Store(String),

    /// Control-plane transport failure after exhausting retries.
    /// Fatal for the single operation only, never for the batch.
    #[error("transport failed after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },

    /// Authentication/token acquisition failure
    #[error("authentication error: {0}")]
    Auth(String),

    /// I/O error (config file loading, log file creation)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SlingshotError {
    /// Whether a retrying caller may reasonably try this operation again
    pub fn is_transient(&self) -> bool {
        matches!(self, SlingshotError::Store(_) | SlingshotError::Io(_))
    }

    /// Whether this failure only affects a single source candidate,
    /// as opposed to the whole request or batch
    pub fn is_per_source(&self) -> bool {
        matches!(self, SlingshotError::NoPath { .. })
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        SlingshotError::Config(msg.into())
    }

    pub fn store<S: Into<String>>(msg: S) -> Self {
        SlingshotError::Store(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_path_is_per_source() {
        let err = SlingshotError::NoPath {
            src: EndpointId::nil(),
            dst: EndpointId::nil(),
        };
        assert!(err.is_per_source());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(SlingshotError::store("connection reset").is_transient());
        assert!(!SlingshotError::Config("bad strategy".to_string()).is_transient());
        assert!(!SlingshotError::Conflict {
            data_id: Uuid::nil(),
            dest: EndpointId::nil(),
        }
        .is_transient());
    }

    #[test]
    fn test_display() {
        let err = SlingshotError::Transport {
            attempts: 3,
            message: "gateway timeout".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "transport failed after 3 attempts: gateway timeout"
        );
    }
}
