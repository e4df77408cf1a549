//! Core controller for grabcast.
//!
//! This crate coordinates the framed connections coming back from
//! instrumented targets, arbitrates the single active capture session,
//! and bridges the targets' asynchronous frame commits into the
//! synchronous pull interface the encoder thread blocks on.

mod audio;
mod connection;
mod error;
mod main_loop;
mod queue;
mod session;
mod video;

pub use audio::{AudioInterceptReceiver, AudioReceiver, AudioReceiverFactory};
pub use connection::{Connection, ConnectionId};
pub use error::EngineError;
pub use main_loop::{CaptureConfig, EncoderFactory, MainLoop};
pub use queue::BoundedQueue;
pub use session::Session;
pub use video::{FrameInfo, VideoReceiver};

use std::time::Duration;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Capacity of the main event queue.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Default number of in-flight frames buffered per capture.
pub const DEFAULT_BUFFERED_FRAMES: usize = 3;

/// How long blocking waits sleep before re-checking for shutdown.
/// Bounds both the event loop's exit latency and the encoder's
/// worst-case wakeup after a stop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);
