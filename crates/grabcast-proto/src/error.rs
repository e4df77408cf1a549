//! Error type for the message codec.

use thiserror::Error;

use crate::MAX_MESSAGE_SIZE;

/// Errors produced while encoding or decoding a message payload.
#[derive(Debug, Error)]
pub enum WireError {
    /// A message could not be serialized.
    #[error("could not encode message: {0}")]
    Encode(#[source] bincode::Error),

    /// A payload could not be deserialized into a known message.
    #[error("could not decode message: {0}")]
    Decode(#[source] bincode::Error),

    /// The encoded payload exceeds the frame size cap.
    #[error("encoded message is {0} bytes, over the {MAX_MESSAGE_SIZE}-byte frame limit")]
    Oversized(usize),
}
