//! Raw-file reference encoder.
//!
//! Writes captured frames to disk with a minimal self-describing header,
//! so a capture can be inspected or transcoded later without any codec
//! toolchain present on the host. Audio, when the capture carries it,
//! lands in a sibling `.audio` file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::thread;

use tracing::{debug, info, warn};

use grabcast_proto::{PixFmt, SampleFormat};

use crate::{AudioFormat, Encoder, EncoderError, EncoderResult, FrameSource, VideoFormat};

const VIDEO_MAGIC: &[u8; 4] = b"GRCV";
const AUDIO_MAGIC: &[u8; 4] = b"GRCA";

/// Number of audio frames pulled per read.
const AUDIO_READ_FRAMES: usize = 1024;

/// Reference encoder writing raw frames to a file.
pub struct RawFileEncoder {
    path: PathBuf,
}

impl RawFileEncoder {
    /// Create an encoder that will write to `path` once it runs. The
    /// file is not touched until [`Encoder::run`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn audio_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.audio", self.path.display()))
    }
}

impl Encoder for RawFileEncoder {
    fn run(&mut self, source: &dyn FrameSource) -> EncoderResult<()> {
        let vfmt = source.video_format();
        info!(
            path = %self.path.display(),
            width = vfmt.width,
            height = vfmt.height,
            pitch = vfmt.pitch,
            "writing raw capture"
        );

        let video_file = File::create(&self.path).map_err(|source| EncoderError::Create {
            path: self.path.clone(),
            source,
        })?;

        let audio_format = source.audio_format().filter(|_| source.has_audio());
        let audio_path = self.audio_path();

        thread::scope(|scope| {
            let audio_writer = audio_format.map(|afmt| {
                let path = audio_path.clone();
                scope.spawn(move || write_audio_track(source, afmt, path))
            });

            let result = write_video_track(source, vfmt, video_file);

            if let Some(writer) = audio_writer {
                match writer.join() {
                    Ok(Ok(frames)) => debug!(frames, "audio track finished"),
                    Ok(Err(e)) => warn!(error = %e, "audio track failed"),
                    Err(_) => warn!("audio track writer panicked"),
                }
            }

            result
        })
    }

    fn name(&self) -> &'static str {
        "raw-file"
    }
}

fn write_video_track(
    source: &dyn FrameSource,
    vfmt: VideoFormat,
    file: File,
) -> EncoderResult<()> {
    let mut out = BufWriter::new(file);

    out.write_all(VIDEO_MAGIC)?;
    out.write_all(&vfmt.width.to_le_bytes())?;
    out.write_all(&vfmt.height.to_le_bytes())?;
    out.write_all(&vfmt.pitch.to_le_bytes())?;
    out.write_all(&[pix_fmt_tag(vfmt.pix_fmt), vfmt.vflip as u8])?;

    let mut frame = vec![0u8; vfmt.frame_size()];
    let mut timestamp = 0i64;
    let mut frames = 0u64;

    loop {
        let n = source.read_video_frame(&mut frame, &mut timestamp);
        if n == 0 {
            break;
        }
        out.write_all(&timestamp.to_le_bytes())?;
        out.write_all(&frame[..n])?;
        frames += 1;
    }

    out.flush()?;
    debug!(frames, "video track finished");
    Ok(())
}

fn write_audio_track(
    source: &dyn FrameSource,
    afmt: AudioFormat,
    path: PathBuf,
) -> EncoderResult<u64> {
    let file = File::create(&path).map_err(|source| EncoderError::Create {
        path: path.clone(),
        source,
    })?;
    let mut out = BufWriter::new(file);

    out.write_all(AUDIO_MAGIC)?;
    out.write_all(&afmt.channels.to_le_bytes())?;
    out.write_all(&afmt.rate.to_le_bytes())?;
    out.write_all(&[sample_format_tag(afmt.sample_format)])?;

    let frame_bytes = afmt.frame_bytes();
    let mut buf = vec![0u8; frame_bytes * AUDIO_READ_FRAMES];
    let mut total = 0u64;

    loop {
        let frames = source.read_audio_frames(&mut buf);
        if frames == 0 {
            break;
        }
        out.write_all(&buf[..frames * frame_bytes])?;
        total += frames as u64;
    }

    out.flush()?;
    Ok(total)
}

fn pix_fmt_tag(pix_fmt: PixFmt) -> u8 {
    match pix_fmt {
        PixFmt::Rgba => 0,
        PixFmt::Bgra => 1,
        PixFmt::Rgb10A2 => 2,
        PixFmt::Yuv444P => 3,
    }
}

fn sample_format_tag(sample_format: SampleFormat) -> u8 {
    match sample_format {
        SampleFormat::U8 => 0,
        SampleFormat::I16 => 1,
        SampleFormat::I32 => 2,
        SampleFormat::F32 => 3,
        SampleFormat::F64 => 4,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    struct ScriptedSource {
        vfmt: VideoFormat,
        video: Mutex<VecDeque<(i64, Vec<u8>)>>,
        audio: Option<(AudioFormat, Mutex<VecDeque<Vec<u8>>>)>,
    }

    impl ScriptedSource {
        fn video_only(vfmt: VideoFormat, frames: Vec<(i64, Vec<u8>)>) -> Self {
            Self {
                vfmt,
                video: Mutex::new(frames.into()),
                audio: None,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn video_format(&self) -> VideoFormat {
            self.vfmt
        }

        fn read_video_frame(&self, buf: &mut [u8], timestamp: &mut i64) -> usize {
            match self.video.lock().unwrap().pop_front() {
                Some((ts, data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    *timestamp = ts;
                    data.len()
                }
                None => 0,
            }
        }

        fn has_audio(&self) -> bool {
            self.audio.is_some()
        }

        fn audio_format(&self) -> Option<AudioFormat> {
            self.audio.as_ref().map(|(afmt, _)| *afmt)
        }

        fn read_audio_frames(&self, buf: &mut [u8]) -> usize {
            let Some((afmt, chunks)) = self.audio.as_ref() else {
                return 0;
            };
            match chunks.lock().unwrap().pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    chunk.len() / afmt.frame_bytes()
                }
                None => 0,
            }
        }
    }

    fn small_format() -> VideoFormat {
        VideoFormat {
            width: 2,
            height: 2,
            pix_fmt: PixFmt::Bgra,
            vflip: false,
            pitch: 8,
        }
    }

    #[test]
    fn writes_header_and_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.grc");

        let source = ScriptedSource::video_only(
            small_format(),
            vec![(1_000, vec![0x11; 16]), (2_000, vec![0x22; 16])],
        );

        let mut encoder = RawFileEncoder::new(&path);
        encoder.run(&source).unwrap();

        let written = std::fs::read(&path).unwrap();
        // magic + 3×u32 + 2 bytes of header, then (i64 ts + frame) × 2
        assert_eq!(written.len(), 4 + 12 + 2 + 2 * (8 + 16));
        assert_eq!(&written[..4], VIDEO_MAGIC);
        assert_eq!(&written[4..8], &2u32.to_le_bytes());
        assert_eq!(&written[18..26], &1_000i64.to_le_bytes());
        assert_eq!(&written[26..42], &[0x11; 16]);
    }

    #[test]
    fn writes_audio_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.grc");

        let afmt = AudioFormat {
            channels: 2,
            rate: 48_000,
            sample_format: SampleFormat::I16,
        };
        let source = ScriptedSource {
            vfmt: small_format(),
            video: Mutex::new(VecDeque::from(vec![(0, vec![0u8; 16])])),
            audio: Some((afmt, Mutex::new(VecDeque::from(vec![vec![0x5a; 4 * 10]])))),
        };

        let mut encoder = RawFileEncoder::new(&path);
        encoder.run(&source).unwrap();

        let audio = std::fs::read(dir.path().join("out.grc.audio")).unwrap();
        assert_eq!(&audio[..4], AUDIO_MAGIC);
        // header is magic + u16 + u32 + 1 tag byte, then 10 frames
        assert_eq!(audio.len(), 4 + 2 + 4 + 1 + 40);
    }

    #[test]
    fn unwritable_output_is_reported() {
        let source = ScriptedSource::video_only(small_format(), Vec::new());
        let mut encoder = RawFileEncoder::new("/nonexistent-dir/out.grc");
        assert!(matches!(
            encoder.run(&source),
            Err(EncoderError::Create { .. })
        ));
    }
}
