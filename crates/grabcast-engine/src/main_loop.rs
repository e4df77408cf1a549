//! Connection supervision and session arbitration.
//!
//! Every connection gets a reader thread that parses frames off the pipe
//! and pushes them onto one bounded event queue. The main loop pops that
//! queue single-threadedly, so all session state changes happen on one
//! thread; receivers and the encoder only ever see it through their own
//! synchronized surfaces.
//!
//! Termination is signalled by connections disappearing, not by a
//! message: the pop timeout doubles as the liveness check.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use grabcast_encoder::{Encoder, VideoFormat};
use grabcast_proto::{Message, VideoSetup};
use grabcast_shm::FrameRing;

use crate::{
    AudioInterceptReceiver, AudioReceiver, AudioReceiverFactory, BoundedQueue, Connection,
    ConnectionId, Session, VideoReceiver, DEFAULT_BUFFERED_FRAMES, EVENT_QUEUE_CAPACITY,
    POLL_INTERVAL,
};

/// Capture parameters handed to targets and sessions.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Requested capture frame rate.
    pub fps: u32,

    /// Downscale divider the target applies before writing frames.
    pub size_divider: u32,

    /// Whether the target should color-convert on the GPU.
    pub gpu_color_conv: bool,

    /// In-flight frames buffered between commit and encode.
    pub buffered_frames: usize,

    /// Disable audio capture entirely.
    pub no_audio: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            size_divider: 1,
            gpu_color_conv: false,
            buffered_frames: DEFAULT_BUFFERED_FRAMES,
            no_audio: false,
        }
    }
}

/// Builds the encoder for each new session.
pub type EncoderFactory = Box<dyn Fn() -> Box<dyn Encoder> + Send + Sync>;

/// One parsed-off-the-wire event awaiting dispatch.
struct Event {
    conn: Arc<Connection>,
    payload: Bytes,
}

/// Connections and the preferred one, under a single lock. The lock is
/// held for list surgery only, never across I/O.
struct Roster {
    conns: Vec<Arc<Connection>>,
    best: Option<ConnectionId>,
}

/// The controller's central arbiter.
pub struct MainLoop {
    config: CaptureConfig,
    roster: Mutex<Roster>,
    events: BoundedQueue<Event>,
    session: Mutex<Option<Session>>,
    old_sessions: Mutex<Vec<Session>>,
    encoder_factory: EncoderFactory,
    audio_factory: Option<AudioReceiverFactory>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl MainLoop {
    pub fn new(
        config: CaptureConfig,
        encoder_factory: EncoderFactory,
        audio_factory: Option<AudioReceiverFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            roster: Mutex::new(Roster {
                conns: Vec::new(),
                best: None,
            }),
            events: BoundedQueue::new(EVENT_QUEUE_CAPACITY),
            session: Mutex::new(None),
            old_sessions: Mutex::new(Vec::new()),
            encoder_factory,
            audio_factory,
            readers: Mutex::new(Vec::new()),
        })
    }

    /// Register a connection and spawn its reader thread.
    pub fn add_connection(self: &Arc<Self>, conn: Arc<Connection>) {
        info!(conn = %conn.pipe_name(), "adding connection");
        self.roster.lock().conns.push(Arc::clone(&conn));

        let this = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("reader-{}", conn.id()))
            .spawn(move || this.poll_connection(conn));

        if let Err(e) = spawned.map(|handle| self.readers.lock().push(handle)) {
            error!(error = %e, "could not spawn reader thread");
        }
    }

    /// Reader thread body: accept the peer, then pump frames into the
    /// event queue until end of stream, then cull the connection. The
    /// connection itself outlives the thread — events already queued
    /// keep their handle to it.
    fn poll_connection(&self, conn: Arc<Connection>) {
        conn.connect();

        if conn.is_connected() {
            while let Some(payload) = conn.read() {
                self.events.push(Event {
                    conn: Arc::clone(&conn),
                    payload,
                });
            }
        } else {
            warn!(conn = %conn.pipe_name(), "could not open pipe, bailing out");
        }

        debug!(conn = %conn.pipe_name(), "culling connection");
        let mut roster = self.roster.lock();
        roster.conns.retain(|c| c.id() != conn.id());
        if roster.best == Some(conn.id()) {
            // never leave a capture start aimed at a dead pipe
            roster.best = None;
        }
    }

    /// Pump events until every connection is gone, then tear down.
    pub fn run(&self) {
        info!("main loop running");

        loop {
            let Some(event) = self.events.pop_timeout(POLL_INTERVAL) else {
                if self.roster.lock().conns.is_empty() {
                    info!("no connections left, quitting");
                    break;
                }
                continue;
            };
            self.dispatch(event);
        }

        debug!("ending active session");
        self.end_session();
        debug!("joining old sessions");
        self.join_sessions();

        for reader in self.readers.lock().drain(..) {
            let _ = reader.join();
        }
        info!("main loop done");
    }

    fn dispatch(&self, event: Event) {
        let Event { conn, payload } = event;

        let message = match grabcast_proto::decode(&payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(conn = %conn.pipe_name(), error = %e, "undecodable message, dropping");
                return;
            }
        };

        match message {
            Message::HotkeyPressed => self.capture_flip(),
            Message::CaptureStop => self.capture_stop(),
            Message::VideoSetup(setup) => self.start_session(setup, &conn),
            Message::VideoFrameCommitted { index, timestamp } => {
                if let Some(session) = self.session.lock().as_ref() {
                    session.video().frame_committed(index, timestamp);
                }
            }
            Message::AudioFramesCommitted { offset, frames } => {
                if let Some(session) = self.session.lock().as_ref() {
                    if let Some(audio) = session.audio() {
                        audio.frames_committed(offset, frames);
                    }
                }
            }
            Message::SawBackend { backend } => {
                info!(conn = %conn.pipe_name(), ?backend, "target hooked a backend");
                self.roster.lock().best = Some(conn.id());
            }
            other => {
                warn!(conn = %conn.pipe_name(), message = ?other, "unexpected message, dropping");
            }
        }
    }

    /// Toggle capture: start when idle, stop when running.
    pub fn capture_flip(&self) {
        if self.session.lock().is_some() {
            self.capture_stop();
        } else {
            self.capture_start();
        }
    }

    /// Ask a target to start capturing. Prefers the connection that
    /// announced a hooked backend; otherwise the first one registered.
    /// The session itself is only created once the target answers with
    /// its video setup.
    fn capture_start(&self) {
        let conn = {
            let roster = self.roster.lock();
            roster
                .best
                .and_then(|id| roster.conns.iter().find(|c| c.id() == id))
                .or_else(|| roster.conns.first())
                .cloned()
        };

        let Some(conn) = conn else {
            warn!("no connection to start capture on");
            return;
        };

        info!(conn = %conn.pipe_name(), "requesting capture start");
        let message = Message::CaptureStart {
            fps: self.config.fps,
            size_divider: self.config.size_divider,
            gpu_color_conv: self.config.gpu_color_conv,
        };
        if let Err(e) = conn.write(&message) {
            warn!(conn = %conn.pipe_name(), error = %e, "could not request capture start");
        }
    }

    /// End the session and tell every target capture is over.
    fn capture_stop(&self) {
        self.end_session();

        let conns = self.roster.lock().conns.clone();
        for conn in conns {
            debug!(conn = %conn.pipe_name(), "requesting capture stop");
            if let Err(e) = conn.write(&Message::CaptureStop) {
                warn!(conn = %conn.pipe_name(), error = %e, "could not request capture stop");
            }
        }
    }

    /// Retire the active session without blocking on its encoder.
    fn end_session(&self) {
        let Some(session) = self.session.lock().take() else {
            debug!("no session to end");
            return;
        };
        session.stop();
        self.old_sessions.lock().push(session);
    }

    /// Reap every retired session's encoder thread.
    fn join_sessions(&self) {
        let mut sessions = self.old_sessions.lock();
        debug!(count = sessions.len(), "joining sessions");
        for session in sessions.iter_mut() {
            session.join();
        }
        sessions.clear();
    }

    /// React to a target's video setup: map its ring, build the
    /// receivers, and launch the encoder.
    fn start_session(&self, setup: VideoSetup, conn: &Arc<Connection>) {
        if self.session.lock().is_some() {
            warn!(conn = %conn.pipe_name(), "session already running, ignoring setup");
            return;
        }
        if setup.width == 0 || setup.height == 0 {
            warn!(
                conn = %conn.pipe_name(),
                width = setup.width,
                height = setup.height,
                "zero-sized video setup, ignoring"
            );
            return;
        }
        let Some(&pitch) = setup.linesize.first() else {
            warn!(conn = %conn.pipe_name(), "video setup without linesize, ignoring");
            return;
        };

        let ring = match FrameRing::open(&setup.shmem.path, setup.shmem.size) {
            Ok(ring) => ring,
            Err(e) => {
                warn!(conn = %conn.pipe_name(), error = %e, "could not map frame ring, ignoring setup");
                return;
            }
        };

        info!(
            conn = %conn.pipe_name(),
            width = setup.width,
            height = setup.height,
            pitch,
            "setting up capture session"
        );

        let format = VideoFormat {
            width: setup.width,
            height: setup.height,
            pix_fmt: setup.pix_fmt,
            vflip: setup.vflip,
            pitch,
        };
        let video = Arc::new(VideoReceiver::new(
            Arc::clone(conn),
            format,
            ring,
            self.config.buffered_frames,
        ));

        let audio = self.select_audio(&setup);

        let mut session = Session::new(video, audio, (self.encoder_factory)());
        session.start();
        *self.session.lock() = Some(session);
    }

    fn select_audio(&self, setup: &VideoSetup) -> Option<Arc<dyn AudioReceiver>> {
        if self.config.no_audio {
            info!("audio capture disabled by configuration");
            return None;
        }

        if let Some(audio_setup) = &setup.audio {
            return match AudioInterceptReceiver::new(audio_setup) {
                Ok(receiver) => Some(Arc::new(receiver)),
                Err(e) => {
                    warn!(error = %e, "could not map audio ring, capturing without audio");
                    None
                }
            };
        }

        if let Some(factory) = &self.audio_factory {
            debug!("no in-band audio, trying factory");
            return factory().map(Arc::from);
        }

        debug!("no in-band audio and no factory, capturing without audio");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverEncoder;

    impl Encoder for NeverEncoder {
        fn run(&mut self, _source: &dyn grabcast_encoder::FrameSource) -> grabcast_encoder::EncoderResult<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "never"
        }
    }

    fn quiet_loop() -> Arc<MainLoop> {
        MainLoop::new(
            CaptureConfig::default(),
            Box::new(|| Box::new(NeverEncoder) as Box<dyn Encoder>),
            None,
        )
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.fps, 60);
        assert_eq!(config.size_divider, 1);
        assert_eq!(config.buffered_frames, DEFAULT_BUFFERED_FRAMES);
        assert!(!config.no_audio);
        assert!(!config.gpu_color_conv);
    }

    #[test]
    fn capture_start_without_connections_is_harmless() {
        let main_loop = quiet_loop();
        main_loop.capture_flip();
    }

    #[test]
    fn end_session_without_session_is_harmless() {
        let main_loop = quiet_loop();
        main_loop.end_session();
        main_loop.join_sessions();
    }

    #[test]
    fn run_returns_with_no_connections() {
        let main_loop = quiet_loop();
        // no connections registered: the first timeout tick exits
        main_loop.run();
    }
}
