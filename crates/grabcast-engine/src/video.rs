//! Video side of a capture session.
//!
//! The main loop pushes frame commits in from its dispatch thread; the
//! encoder thread pulls frames out, copying pixel data straight from the
//! target's shared ring and acknowledging each consumed slot back over
//! the connection so the target can reuse it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use grabcast_encoder::VideoFormat;
use grabcast_proto::Message;
use grabcast_shm::FrameRing;

use crate::{BoundedQueue, Connection, POLL_INTERVAL};

/// One committed ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Ring slot index, `0 <= index < ring slots`.
    pub index: u32,

    /// Frame timestamp in nanoseconds.
    pub timestamp: i64,
}

/// Bridges asynchronous frame commits into the encoder's synchronous
/// pull.
pub struct VideoReceiver {
    conn: Arc<Connection>,
    format: VideoFormat,
    ring: FrameRing,
    pending: BoundedQueue<FrameInfo>,
    stopped: Mutex<bool>,
}

impl VideoReceiver {
    pub fn new(
        conn: Arc<Connection>,
        format: VideoFormat,
        ring: FrameRing,
        buffered_frames: usize,
    ) -> Self {
        Self {
            conn,
            format,
            ring,
            pending: BoundedQueue::new(buffered_frames),
            stopped: Mutex::new(false),
        }
    }

    /// The fixed format captured at session setup.
    pub fn video_format(&self) -> VideoFormat {
        self.format
    }

    /// Encoder side: block until the next frame, copy it into `buf`
    /// (sized `pitch * height`), and acknowledge the slot. Returns the
    /// bytes copied, or 0 once the receiver is stopped and drained.
    pub fn read_frame(&self, buf: &mut [u8], timestamp: &mut i64) -> usize {
        loop {
            let Some(info) = self.pending.pop_timeout(POLL_INTERVAL) else {
                if *self.stopped.lock() {
                    return 0;
                }
                continue;
            };

            let Some(slot) = self.ring.slot(info.index, buf.len()) else {
                warn!(
                    conn = %self.conn.id(),
                    index = info.index,
                    "committed frame lies outside the shared ring, dropping"
                );
                continue;
            };

            buf.copy_from_slice(slot);
            *timestamp = info.timestamp;

            trace!(conn = %self.conn.id(), index = info.index, "frame consumed");
            if let Err(e) = self.conn.write(&Message::VideoFrameProcessed { index: info.index }) {
                // the next read on the pipe will surface the loss
                warn!(conn = %self.conn.id(), error = %e, "could not acknowledge frame");
            }

            return buf.len();
        }
    }

    /// Main-loop side: queue a committed slot for the encoder. Dropped
    /// silently once stopped.
    pub fn frame_committed(&self, index: u32, timestamp: i64) {
        if *self.stopped.lock() {
            return;
        }
        self.pending.push(FrameInfo { index, timestamp });
    }

    /// Stop the stream. Frames already queued are still delivered and
    /// acknowledged; later commits are dropped. Closing the queue wakes
    /// the encoder without waiting out its poll tick.
    pub fn stop(&self) {
        let mut stopped = self.stopped.lock();
        *stopped = true;
        self.pending.close();
    }
}
