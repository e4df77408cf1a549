//! The control messages themselves.

use serde::{Deserialize, Serialize};

/// Graphics backend an instrumented target managed to hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    OpenGl,
    D3D9,
    Dxgi,
    Vulkan,
}

/// Pixel format of the frames the target writes into its ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixFmt {
    Rgba,
    Bgra,
    Rgb10A2,
    Yuv444P,
}

/// Sample format for in-band audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    I16,
    I32,
    F32,
    F64,
}

impl SampleFormat {
    /// Width of one sample in bytes.
    pub fn byte_width(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I32 | SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }
}

/// A named shared-memory region owned by the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShmemRegion {
    /// Filesystem path of the shared-memory object.
    pub path: String,

    /// Usable size of the region in bytes.
    pub size: u64,
}

/// Layout of the in-band audio ring, carried inside [`VideoSetup`] when
/// the target intercepts the game's own audio output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSetup {
    /// Interleaved channel count.
    pub channels: u16,

    /// Sample rate in Hz.
    pub rate: u32,

    /// Sample format of the ring contents.
    pub sample_format: SampleFormat,

    /// Ring the target writes audio frames into.
    pub shmem: ShmemRegion,
}

/// A target's announcement that a video stream is ready to capture.
///
/// `linesize` holds one pitch per plane; packed formats use a single
/// entry. The ring slot size is derived host-side as `pitch * height`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSetup {
    pub width: u32,
    pub height: u32,
    pub pix_fmt: PixFmt,
    pub vflip: bool,
    pub linesize: Vec<u32>,
    pub shmem: ShmemRegion,
    pub audio: Option<AudioSetup>,
}

/// One control message, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// The user hit the capture hotkey inside the target; toggle capture.
    HotkeyPressed,

    /// Controller asks a target to begin capturing.
    CaptureStart {
        fps: u32,
        size_divider: u32,
        gpu_color_conv: bool,
    },

    /// Capture should stop (either direction).
    CaptureStop,

    /// Target announces a ready-to-capture video stream.
    VideoSetup(VideoSetup),

    /// Target finished writing ring slot `index`.
    VideoFrameCommitted { index: u32, timestamp: i64 },

    /// Controller is done with ring slot `index`; the target may reuse it.
    VideoFrameProcessed { index: u32 },

    /// Target wrote `frames` audio frames at ring offset `offset`.
    AudioFramesCommitted { offset: u32, frames: u32 },

    /// Target identifies the graphics backend it hooked. The connection
    /// this arrives on becomes the preferred capture target.
    SawBackend { backend: Backend },
}
