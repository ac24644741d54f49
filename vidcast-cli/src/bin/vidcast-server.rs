//! vidcast server
//!
//! Streams every video of a directory, in name order, at each file's own
//! bitrate, to registered clients or a broadcast group.

use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use vidcast::io::shutdown_channel;
use vidcast::Server;
use vidcast_cli::{
    bitrate_or_default, display_server_summary, format_bandwidth, format_duration,
    list_video_files, Config, FfmpegProber, MediaProber, ServerSettings, StreamMode,
};

#[derive(Parser, Debug)]
#[command(name = "vidcast-server")]
#[command(about = "Paced UDP video stream server", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write an example configuration to this path and exit
    #[arg(long)]
    write_example_config: Option<PathBuf>,

    /// Directory with the videos to stream
    #[arg(short = 'd', long)]
    video_dir: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Delivery mode (session, broadcast)
    #[arg(short, long)]
    mode: Option<String>,

    /// Broadcast destination (repeatable); implies broadcast mode
    #[arg(long = "to")]
    broadcast_to: Vec<SocketAddr>,

    /// Bitrate in bits per second, instead of probing each file
    #[arg(long)]
    bitrate: Option<u64>,

    /// Stream the directory once instead of looping
    #[arg(long)]
    once: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn load_settings(args: &Args) -> anyhow::Result<ServerSettings> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    let mut settings = config.server;

    if let Some(dir) = &args.video_dir {
        settings.video_dir = dir.clone();
    }
    if let Some(bind) = args.bind {
        settings.bind = bind;
    }
    if let Some(mode) = &args.mode {
        settings.mode = match mode.as_str() {
            "session" => StreamMode::Session,
            "broadcast" => StreamMode::Broadcast,
            _ => anyhow::bail!("Invalid mode: {}", mode),
        };
    }
    if !args.broadcast_to.is_empty() {
        settings.mode = StreamMode::Broadcast;
        settings.broadcast_to = args.broadcast_to.clone();
    }
    if args.once {
        settings.loop_playlist = false;
    }
    Ok(settings)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    vidcast_cli::init_logging(args.verbose);

    if let Some(path) = &args.write_example_config {
        Config::example().to_file(path)?;
        tracing::info!("Wrote example configuration to {}", path.display());
        return Ok(());
    }

    let settings = load_settings(&args)?;
    let server_config = settings.server_config()?;

    let (handle, shutdown) = shutdown_channel();
    ctrlc::set_handler(move || {
        tracing::info!("Interrupted, shutting down");
        handle.trigger();
    })?;

    let mut server = Server::bind(server_config, shutdown)?;
    let prober = FfmpegProber::default();
    let start = Instant::now();

    let result = run_playlist(&mut server, &settings, &prober, args.bitrate);

    let summary = server.finish();
    display_server_summary(&summary, start.elapsed());
    result
}

fn run_playlist(
    server: &mut Server,
    settings: &ServerSettings,
    prober: &dyn MediaProber,
    bitrate_override: Option<u64>,
) -> anyhow::Result<()> {
    let gap = settings.inter_stream_gap();
    let mut first = true;

    loop {
        let files = list_video_files(&settings.video_dir)?;
        if files.is_empty() {
            tracing::warn!("No videos in {}", settings.video_dir.display());
        }

        for path in &files {
            if !first && !server.wait(gap) {
                return Ok(());
            }
            first = false;

            let bitrate = bitrate_override
                .unwrap_or_else(|| bitrate_or_default(prober, path, settings.default_bitrate_bps));
            match prober.probe_duration(path) {
                Ok(duration) => tracing::info!(
                    "Streaming {} ({}, {})",
                    path.display(),
                    format_duration(duration),
                    format_bandwidth(bitrate)
                ),
                Err(_) => tracing::info!("Streaming {} ({})", path.display(), format_bandwidth(bitrate)),
            }

            let file = match File::open(path) {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            server.stream(BufReader::new(file), bitrate)?;

            if server.is_shutting_down() {
                return Ok(());
            }
        }

        if !settings.loop_playlist {
            return Ok(());
        }
        // An empty directory is rescanned after one gap
        if files.is_empty() && !server.wait(gap) {
            return Ok(());
        }
    }
}
