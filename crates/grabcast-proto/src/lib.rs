//! Typed controller<->target messages for grabcast.
//!
//! This crate defines the control messages exchanged between the host
//! controller and an instrumented target over its framed pipe, plus the
//! payload codec. Framing itself (the `u32` little-endian length prefix)
//! is the transport's job; this crate only produces and consumes the
//! payload bytes behind the prefix.

mod error;
mod messages;

pub use error::WireError;
pub use messages::{
    AudioSetup, Backend, Message, PixFmt, SampleFormat, ShmemRegion, VideoSetup,
};

/// Hard cap on a single framed payload. Control messages are tiny; a
/// length prefix beyond this means the stream is corrupt.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Encode a message into the payload bytes of one frame.
pub fn encode(message: &Message) -> Result<Vec<u8>, WireError> {
    let payload = bincode::serialize(message).map_err(WireError::Encode)?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(WireError::Oversized(payload.len()));
    }
    Ok(payload)
}

/// Decode the payload bytes of one frame.
pub fn decode(payload: &[u8]) -> Result<Message, WireError> {
    bincode::deserialize(payload).map_err(WireError::Decode)
}
