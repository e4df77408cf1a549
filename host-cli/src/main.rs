//! grabcast — launch an instrumented target and record its output.
//!
//! Binds the control socket, spawns the target with the capture library
//! preloaded, then runs the main loop on this thread until every target
//! connection is gone. The capture itself lands in a raw video file via
//! the reference encoder.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use grabcast_encoder::{Encoder, RawFileEncoder};
use grabcast_engine::{CaptureConfig, Connection, EncoderFactory, MainLoop};

/// Name of the injected capture library inside `--library-dir`.
const CAPTURE_LIBRARY: &str = "libgrabcast.so";

/// Environment variable telling the injected library where to connect.
const SOCKET_ENV: &str = "GRABCAST_SOCKET";

#[derive(Parser, Debug)]
#[command(name = "grabcast", version, about = "Game capture host controller")]
struct Args {
    /// Target executable to launch and capture.
    exec: PathBuf,

    /// Arguments passed through to the target.
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,

    /// Requested capture frame rate.
    #[arg(long, default_value_t = 60)]
    fps: u32,

    /// Downscale divider applied by the target (1 = full size).
    #[arg(long, default_value_t = 1)]
    size_divider: u32,

    /// Ask the target to color-convert on the GPU.
    #[arg(long)]
    gpu_color_conv: bool,

    /// Frames buffered between commit and encode.
    #[arg(long, default_value_t = grabcast_engine::DEFAULT_BUFFERED_FRAMES)]
    buffered_frames: usize,

    /// Disable audio capture entirely.
    #[arg(long)]
    no_audio: bool,

    /// Directory holding the injected capture library.
    #[arg(long)]
    library_dir: Option<PathBuf>,

    /// Where the raw capture is written.
    #[arg(long, default_value = "capture.grc")]
    output: PathBuf,

    /// Control socket path (defaults to a per-process path in /tmp).
    #[arg(long)]
    socket: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let socket_path = args
        .socket
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("/tmp/grabcast-{}.sock", std::process::id())));

    let conn = Arc::new(
        Connection::bind(&socket_path)
            .with_context(|| format!("binding control socket {}", socket_path.display()))?,
    );

    let config = CaptureConfig {
        fps: args.fps,
        size_divider: args.size_divider,
        gpu_color_conv: args.gpu_color_conv,
        buffered_frames: args.buffered_frames,
        no_audio: args.no_audio,
    };

    let output = args.output.clone();
    let encoder_factory: EncoderFactory =
        Box::new(move || Box::new(RawFileEncoder::new(output.clone())) as Box<dyn Encoder>);

    let main_loop = MainLoop::new(config, encoder_factory, None);
    main_loop.add_connection(conn);

    let mut command = Command::new(&args.exec);
    command.args(&args.args).env(SOCKET_ENV, &socket_path);
    if let Some(dir) = &args.library_dir {
        command.env("LD_PRELOAD", dir.join(CAPTURE_LIBRARY));
    } else {
        warn!("no --library-dir given; target runs uninstrumented");
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning {}", args.exec.display()))?;
    info!(pid = child.id(), exec = %args.exec.display(), "target launched");

    // watch the child from the side; the main loop ends on its own once
    // the target's pipe closes
    // TODO: unblock the pending accept when the child dies without ever
    // connecting (uninstrumented targets currently leave us waiting)
    let (status_tx, status_rx) = crossbeam_channel::bounded(1);
    let watcher = thread::Builder::new()
        .name("child-watcher".into())
        .spawn(move || {
            let _ = status_tx.send(child.wait());
        })
        .context("spawning child watcher")?;

    main_loop.run();

    let _ = watcher.join();
    match status_rx.try_recv() {
        Ok(Ok(status)) => info!(%status, "target exited"),
        Ok(Err(e)) => warn!(error = %e, "could not wait on target"),
        Err(_) => {}
    }

    let _ = std::fs::remove_file(&socket_path);
    info!(output = %args.output.display(), "capture finished");
    Ok(())
}
