//! Error type for encoder implementations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors an encoder can report from its own thread.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// Output file could not be created.
    #[error("could not create output {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing encoded output failed.
    #[error("could not write output: {0}")]
    Write(#[from] std::io::Error),
}
