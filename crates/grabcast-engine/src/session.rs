//! One capture attempt, end to end.
//!
//! A session owns the receiver pair and the encoder thread consuming
//! them. Stopping is cooperative: the receivers are told to stop, the
//! encoder's next pull observes end of stream and returns, and a later
//! `join` reaps the thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use grabcast_encoder::{AudioFormat, Encoder, FrameSource, VideoFormat};

use crate::{AudioReceiver, VideoReceiver};

/// Adapter giving the encoder thread its synchronous pull view of the
/// session's receivers.
struct EncoderFeed {
    video: Arc<VideoReceiver>,
    audio: Option<Arc<dyn AudioReceiver>>,
}

impl FrameSource for EncoderFeed {
    fn video_format(&self) -> VideoFormat {
        self.video.video_format()
    }

    fn read_video_frame(&self, buf: &mut [u8], timestamp: &mut i64) -> usize {
        self.video.read_frame(buf, timestamp)
    }

    fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    fn audio_format(&self) -> Option<AudioFormat> {
        self.audio.as_ref().map(|audio| audio.audio_format())
    }

    fn read_audio_frames(&self, buf: &mut [u8]) -> usize {
        match &self.audio {
            Some(audio) => audio.read_frames(buf),
            None => 0,
        }
    }
}

/// A single capture session: receivers plus the encoder thread.
pub struct Session {
    video: Arc<VideoReceiver>,
    audio: Option<Arc<dyn AudioReceiver>>,
    encoder: Option<Box<dyn Encoder>>,
    encoder_thread: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        video: Arc<VideoReceiver>,
        audio: Option<Arc<dyn AudioReceiver>>,
        encoder: Box<dyn Encoder>,
    ) -> Self {
        Self {
            video,
            audio,
            encoder: Some(encoder),
            encoder_thread: None,
        }
    }

    /// Launch the encoder thread. Subsequent calls are no-ops.
    pub fn start(&mut self) {
        let Some(mut encoder) = self.encoder.take() else {
            warn!("session already started");
            return;
        };

        let feed = EncoderFeed {
            video: Arc::clone(&self.video),
            audio: self.audio.clone(),
        };

        let spawned = thread::Builder::new()
            .name("encoder".into())
            .spawn(move || {
                debug!(encoder = encoder.name(), "encoder thread starting");
                if let Err(e) = encoder.run(&feed) {
                    error!(encoder = encoder.name(), error = %e, "encoder failed");
                }
                debug!(encoder = encoder.name(), "encoder thread done");
            });

        match spawned {
            Ok(handle) => self.encoder_thread = Some(handle),
            Err(e) => error!(error = %e, "could not spawn encoder thread"),
        }
    }

    /// Tell the receivers to stop. Non-blocking and idempotent; the
    /// encoder thread exits on its own.
    pub fn stop(&self) {
        info!("stopping session");
        self.video.stop();
        if let Some(audio) = &self.audio {
            audio.stop();
        }
    }

    /// Wait for the encoder thread to return. Idempotent.
    pub fn join(&mut self) {
        if let Some(handle) = self.encoder_thread.take() {
            if handle.join().is_err() {
                error!("encoder thread panicked");
            }
        }
    }

    /// The session's video receiver, for forwarding commits.
    pub fn video(&self) -> &VideoReceiver {
        &self.video
    }

    /// The session's audio receiver, if any.
    pub fn audio(&self) -> Option<&dyn AudioReceiver> {
        self.audio.as_deref()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // last-resort cleanup; the owner is expected to have joined
        self.stop();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use grabcast_encoder::{EncoderResult, FrameSource};
    use grabcast_proto::PixFmt;
    use grabcast_shm::FrameRing;

    use crate::Connection;

    use super::*;

    const SLOT: usize = 16;

    struct CountingEncoder {
        frames: Arc<AtomicUsize>,
        saw_audio: Arc<AtomicUsize>,
    }

    impl Encoder for CountingEncoder {
        fn run(&mut self, source: &dyn FrameSource) -> EncoderResult<()> {
            if source.has_audio() {
                self.saw_audio.fetch_add(1, Ordering::SeqCst);
            }
            let mut buf = vec![0u8; source.video_format().frame_size()];
            let mut timestamp = 0i64;
            while source.read_video_frame(&mut buf, &mut timestamp) > 0 {
                self.frames.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn test_session(dir: &tempfile::TempDir) -> (Session, Arc<AtomicUsize>, UnixStream) {
        let ring_path = dir.path().join("ring");
        File::create(&ring_path)
            .unwrap()
            .write_all(&[7u8; SLOT * 3])
            .unwrap();
        let ring = FrameRing::open(&ring_path, (SLOT * 3) as u64).unwrap();

        let sock_path = dir.path().join("ctl.sock");
        let conn = Connection::bind(&sock_path).unwrap();
        let client = thread::spawn(move || UnixStream::connect(sock_path).unwrap());
        conn.connect();
        let target = client.join().unwrap();

        let format = VideoFormat {
            width: 2,
            height: 2,
            pix_fmt: PixFmt::Rgba,
            vflip: false,
            pitch: 8,
        };
        let video = Arc::new(VideoReceiver::new(Arc::new(conn), format, ring, 4));

        let frames = Arc::new(AtomicUsize::new(0));
        let encoder = CountingEncoder {
            frames: Arc::clone(&frames),
            saw_audio: Arc::new(AtomicUsize::new(0)),
        };

        (
            Session::new(video, None, Box::new(encoder)),
            frames,
            target,
        )
    }

    #[test]
    fn encoder_consumes_until_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, frames, _target) = test_session(&dir);

        session.start();
        session.video().frame_committed(0, 1);
        session.video().frame_committed(1, 2);

        session.stop();
        session.join();
        assert_eq!(frames.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stop_and_join_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _frames, _target) = test_session(&dir);

        session.start();
        session.stop();
        session.stop();
        session.join();
        session.join();
    }

    #[test]
    fn second_start_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, frames, _target) = test_session(&dir);

        session.start();
        session.start();

        session.video().frame_committed(0, 1);
        // give a hypothetical duplicate encoder time to double-count
        thread::sleep(Duration::from_millis(50));
        session.stop();
        session.join();
        assert_eq!(frames.load(Ordering::SeqCst), 1);
    }
}
