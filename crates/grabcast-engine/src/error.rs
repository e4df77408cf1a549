//! Error types for the engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::ConnectionId;

/// Errors surfaced by the engine's connection and session plumbing.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The control socket could not be bound.
    #[error("could not bind control socket {path:?}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A write was attempted on a connection with no live peer.
    #[error("connection {0} is not connected")]
    NotConnected(ConnectionId),

    /// I/O failure on a connection.
    #[error("connection i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// Message codec failure.
    #[error(transparent)]
    Wire(#[from] grabcast_proto::WireError),

    /// Shared-memory failure.
    #[error(transparent)]
    Shm(#[from] grabcast_shm::ShmError),
}
