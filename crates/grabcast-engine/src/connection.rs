//! Framed message pipe to one instrumented target.
//!
//! The controller is the listening side: it binds a Unix socket before
//! the target is launched, then accepts the single peer the injected
//! library opens. Each direction carries `u32` little-endian
//! length-prefixed payloads; payload encoding lives in `grabcast-proto`.

use std::fs;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use grabcast_proto::{Message, MAX_MESSAGE_SIZE};

use crate::{EngineError, EngineResult};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a connection. Unlike the socket path, identities are never
/// reused — a target reconnecting on the same path gets a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// A bidirectional framed pipe to one target.
///
/// Reads are single-consumer (the connection's reader thread); writes are
/// serialized internally and may come from any thread.
pub struct Connection {
    id: ConnectionId,
    path: PathBuf,
    listener: Mutex<Option<UnixListener>>,
    reader: Mutex<Option<UnixStream>>,
    writer: Mutex<Option<UnixStream>>,
    connected: AtomicBool,
}

impl Connection {
    /// Bind the control socket at `path`. Binding happens eagerly so a
    /// target spawned right after can open the socket before the
    /// controller gets around to accepting.
    pub fn bind(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();

        // stale socket from a previous run
        let _ = fs::remove_file(&path);

        let listener = UnixListener::bind(&path).map_err(|source| EngineError::Bind {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            id: ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            path,
            listener: Mutex::new(Some(listener)),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
        })
    }

    /// Wait for the target to open the pipe. On failure the connection
    /// stays not-connected and every `read` reports end of stream.
    pub fn connect(&self) {
        let Some(listener) = self.listener.lock().take() else {
            return;
        };

        let stream = match listener.accept() {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!(conn = %self.id, path = %self.path.display(), error = %e, "accept failed");
                return;
            }
        };

        let write_half = match stream.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                warn!(conn = %self.id, error = %e, "could not split stream");
                return;
            }
        };

        debug!(conn = %self.id, path = %self.path.display(), "target connected");
        *self.reader.lock() = Some(stream);
        *self.writer.lock() = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Human-readable identity for logs.
    pub fn pipe_name(&self) -> String {
        format!("{} ({})", self.id, self.path.display())
    }

    /// Block until one full frame arrives and return its payload, or
    /// `None` on end of stream. Any read error, a zero length, or a
    /// length over the frame cap counts as end of stream: the peer is
    /// gone or the stream is garbage either way.
    pub fn read(&self) -> Option<Bytes> {
        let mut guard = self.reader.lock();
        let stream = guard.as_mut()?;

        match read_frame(stream) {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!(conn = %self.id, error = %e, "read side closed");
                *guard = None;
                self.connected.store(false, Ordering::SeqCst);
                None
            }
        }
    }

    /// Atomically write one length-prefixed message. Safe to call from
    /// any thread; concurrent writers are serialized.
    pub fn write(&self, message: &Message) -> EngineResult<()> {
        let payload = grabcast_proto::encode(message)?;

        let mut guard = self.writer.lock();
        let stream = guard.as_mut().ok_or(EngineError::NotConnected(self.id))?;

        let prefix = (payload.len() as u32).to_le_bytes();
        stream.write_all(&prefix)?;
        stream.write_all(&payload)?;
        stream.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn read_frame(stream: &mut UnixStream) -> std::io::Result<Bytes> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix)?;

    let len = u32::from_le_bytes(prefix) as usize;
    if len == 0 || len > MAX_MESSAGE_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("bogus frame length {len}"),
        ));
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(Bytes::from(payload))
}
