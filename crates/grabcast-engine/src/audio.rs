//! Audio side of a capture session.
//!
//! Audio has two sources: the target can intercept the game's own output
//! and hand it over in-band through a shared ring, or an external
//! factory can supply a receiver of its own (a system loopback capture,
//! say). The main loop only ever sees the capability set.

use parking_lot::Mutex;
use tracing::{trace, warn};

use grabcast_encoder::AudioFormat;
use grabcast_proto::AudioSetup;
use grabcast_shm::FrameRing;

use crate::{BoundedQueue, EngineResult, POLL_INTERVAL};

/// Capability set every audio source provides.
pub trait AudioReceiver: Send + Sync {
    /// The fixed audio layout of this capture.
    fn audio_format(&self) -> AudioFormat;

    /// Block until audio frames are available and copy as many as fit
    /// into `buf`. Returns frames copied; 0 once stopped and drained.
    fn read_frames(&self, buf: &mut [u8]) -> usize;

    /// Queue a committed span of ring frames. Dropped once stopped.
    fn frames_committed(&self, offset: u32, frames: u32);

    /// Stop the stream, waking any blocked reader.
    fn stop(&self);
}

/// Constructor for an externally supplied audio source, used when the
/// target offers no in-band audio.
pub type AudioReceiverFactory = Box<dyn Fn() -> Option<Box<dyn AudioReceiver>> + Send + Sync>;

/// One committed span of the audio ring.
#[derive(Debug, Clone, Copy)]
struct AudioChunk {
    offset: u32,
    frames: u32,
}

/// In-band audio over the ring described by the target's setup message.
pub struct AudioInterceptReceiver {
    format: AudioFormat,
    ring: FrameRing,
    ring_frames: u32,
    pending: BoundedQueue<AudioChunk>,
    stopped: Mutex<bool>,
}

/// Committed audio spans buffered before the encoder drains them.
const PENDING_CHUNKS: usize = 16;

impl AudioInterceptReceiver {
    pub fn new(setup: &AudioSetup) -> EngineResult<Self> {
        let format = AudioFormat {
            channels: setup.channels,
            rate: setup.rate,
            sample_format: setup.sample_format,
        };
        let ring = FrameRing::open(&setup.shmem.path, setup.shmem.size)?;
        let ring_frames = (ring.len() / format.frame_bytes()) as u32;

        Ok(Self {
            format,
            ring,
            ring_frames,
            pending: BoundedQueue::new(PENDING_CHUNKS),
            stopped: Mutex::new(false),
        })
    }
}

impl AudioReceiver for AudioInterceptReceiver {
    fn audio_format(&self) -> AudioFormat {
        self.format
    }

    fn read_frames(&self, buf: &mut [u8]) -> usize {
        let frame_bytes = self.format.frame_bytes();
        let buf_frames = (buf.len() / frame_bytes) as u32;

        loop {
            let Some(chunk) = self.pending.pop_timeout(POLL_INTERVAL) else {
                if *self.stopped.lock() {
                    return 0;
                }
                continue;
            };

            // clamp to the destination buffer and the ring tail
            let frames = chunk
                .frames
                .min(buf_frames)
                .min(self.ring_frames.saturating_sub(chunk.offset));
            if frames == 0 {
                warn!(
                    offset = chunk.offset,
                    frames = chunk.frames,
                    "committed audio span lies outside the ring, dropping"
                );
                continue;
            }
            if frames < chunk.frames {
                trace!(
                    dropped = chunk.frames - frames,
                    "audio span clipped to buffer"
                );
            }

            let start = chunk.offset as usize * frame_bytes;
            let len = frames as usize * frame_bytes;
            let Some(src) = self.ring.range(start, len) else {
                warn!(offset = chunk.offset, "audio ring range vanished, dropping");
                continue;
            };

            buf[..len].copy_from_slice(src);
            return frames as usize;
        }
    }

    fn frames_committed(&self, offset: u32, frames: u32) {
        if *self.stopped.lock() {
            return;
        }
        self.pending.push(AudioChunk { offset, frames });
    }

    fn stop(&self) {
        let mut stopped = self.stopped.lock();
        *stopped = true;
        self.pending.close();
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use grabcast_proto::{SampleFormat, ShmemRegion};

    use super::*;

    const CHANNELS: u16 = 2;
    const FRAME_BYTES: usize = 4; // stereo i16

    fn ring_setup(dir: &tempfile::TempDir, ring_frames: usize) -> (AudioSetup, PathBuf) {
        let path = dir.path().join("audio-ring");
        let contents: Vec<u8> = (0..ring_frames * FRAME_BYTES)
            .map(|i| (i % 251) as u8)
            .collect();
        File::create(&path).unwrap().write_all(&contents).unwrap();

        let setup = AudioSetup {
            channels: CHANNELS,
            rate: 48_000,
            sample_format: SampleFormat::I16,
            shmem: ShmemRegion {
                path: path.to_string_lossy().into_owned(),
                size: (ring_frames * FRAME_BYTES) as u64,
            },
        };
        (setup, path)
    }

    #[test]
    fn committed_spans_come_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (setup, _path) = ring_setup(&dir, 32);
        let receiver = AudioInterceptReceiver::new(&setup).unwrap();

        receiver.frames_committed(0, 4);
        receiver.frames_committed(8, 2);

        let mut buf = [0u8; 64];
        assert_eq!(receiver.read_frames(&mut buf), 4);
        assert_eq!(buf[0], 0);
        assert_eq!(receiver.read_frames(&mut buf), 2);
        assert_eq!(buf[0], (8 * FRAME_BYTES % 251) as u8);
    }

    #[test]
    fn span_is_clamped_to_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let (setup, _path) = ring_setup(&dir, 32);
        let receiver = AudioInterceptReceiver::new(&setup).unwrap();

        receiver.frames_committed(0, 16);
        let mut buf = [0u8; 8 * FRAME_BYTES];
        assert_eq!(receiver.read_frames(&mut buf), 8);
    }

    #[test]
    fn out_of_ring_span_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (setup, _path) = ring_setup(&dir, 8);
        let receiver = AudioInterceptReceiver::new(&setup).unwrap();

        receiver.frames_committed(100, 4);
        receiver.frames_committed(2, 1);

        let mut buf = [0u8; 64];
        assert_eq!(receiver.read_frames(&mut buf), 1);
        assert_eq!(buf[0], (2 * FRAME_BYTES % 251) as u8);
    }

    #[test]
    fn stop_unblocks_reader() {
        let dir = tempfile::tempdir().unwrap();
        let (setup, _path) = ring_setup(&dir, 8);
        let receiver = Arc::new(AudioInterceptReceiver::new(&setup).unwrap());

        let reader = {
            let receiver = Arc::clone(&receiver);
            thread::spawn(move || {
                let mut buf = [0u8; 64];
                receiver.read_frames(&mut buf)
            })
        };

        thread::sleep(Duration::from_millis(20));
        receiver.stop();
        assert_eq!(reader.join().unwrap(), 0);

        receiver.frames_committed(0, 2);
        let mut buf = [0u8; 64];
        assert_eq!(receiver.read_frames(&mut buf), 0);
    }

    #[test]
    fn missing_ring_fails_setup() {
        let setup = AudioSetup {
            channels: 2,
            rate: 48_000,
            sample_format: SampleFormat::F32,
            shmem: ShmemRegion {
                path: "/nonexistent/audio-ring".into(),
                size: 64,
            },
        };
        assert!(AudioInterceptReceiver::new(&setup).is_err());
    }
}
