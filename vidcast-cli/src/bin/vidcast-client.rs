//! vidcast client
//!
//! Registers with a server (or listens to a broadcast), puts the packets
//! back in order and feeds the payload to a player, stdout or a file.

use anyhow::Context;
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Instant;
use vidcast::io::{shutdown_channel, MediaSocket};
use vidcast::{Receiver, ReceiverEvent, DEFAULT_PORT};
use vidcast_cli::{
    compact_stats, display_receiver_summary, open_output, ClientSettings, Config, StreamMode,
};

#[derive(Parser, Debug)]
#[command(name = "vidcast-client")]
#[command(about = "vidcast stream receiver", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write an example configuration to this path and exit
    #[arg(long)]
    write_example_config: Option<PathBuf>,

    /// Server address (session mode)
    #[arg(short, long)]
    server: Option<SocketAddr>,

    /// Local bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Listen for a broadcast instead of registering
    #[arg(long)]
    broadcast: bool,

    /// Multicast group to join (implies --broadcast)
    #[arg(long)]
    group: Option<Ipv4Addr>,

    /// Output: 'player', '-' for stdout, or a file path
    #[arg(short, long)]
    output: Option<String>,

    /// Statistics interval in seconds (0 disables)
    #[arg(long)]
    stats: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn load_settings(args: &Args) -> anyhow::Result<ClientSettings> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    let mut settings = config.client;

    if let Some(server) = args.server {
        settings.server = server;
    }
    if let Some(bind) = args.bind {
        settings.bind = bind;
    }
    if args.broadcast {
        settings.mode = StreamMode::Broadcast;
    }
    if let Some(group) = args.group {
        settings.mode = StreamMode::Broadcast;
        settings.multicast_group = Some(group);
    }
    if let Some(output) = &args.output {
        settings.output = output.clone();
    }
    if let Some(stats) = args.stats {
        settings.stats_interval_secs = stats;
    }
    Ok(settings)
}

fn bind_socket(settings: &ClientSettings) -> anyhow::Result<MediaSocket> {
    let socket = match (settings.mode, settings.multicast_group) {
        (StreamMode::Broadcast, Some(group)) => {
            let mut bind = settings.bind;
            // Group traffic is addressed to the server port
            if bind.port() == 0 {
                bind.set_port(DEFAULT_PORT);
            }
            tracing::info!("Joining multicast group {} on {}", group, bind);
            MediaSocket::bind_multicast(bind, group, Ipv4Addr::UNSPECIFIED)?
        }
        _ => MediaSocket::bind(settings.bind)?,
    };
    if settings.recv_buffer_bytes > 0 {
        socket.set_recv_buffer_size(settings.recv_buffer_bytes)?;
        tracing::debug!("Receive buffer: {} bytes", socket.recv_buffer_size()?);
    }
    Ok(socket)
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
    let receiver_config = settings.receiver_config()?;
    let socket = bind_socket(&settings)?;
    let sink = open_output(&settings.output, &settings.player_command)
        .with_context(|| format!("Failed to open output '{}'", settings.output))?;

    let (handle, shutdown) = shutdown_channel();
    ctrlc::set_handler(move || {
        tracing::info!("Interrupted, shutting down");
        handle.trigger();
    })?;

    let receiver = Receiver::new(socket, receiver_config, sink, shutdown)?.with_observer(
        |event: &ReceiverEvent| match event {
            ReceiverEvent::Progress { current, lifetime } => {
                tracing::info!("{}", compact_stats(current, lifetime))
            }
            ReceiverEvent::Stalled(stats) => {
                tracing::info!("Stalled stream: {}", compact_stats(stats, stats))
            }
            _ => {}
        },
    );

    let start = Instant::now();
    let (report, mut sink) = receiver.run()?;
    if let Err(e) = sink.terminate() {
        tracing::warn!("Failed to stop output: {}", e);
    }
    display_receiver_summary(&report, start.elapsed());
    Ok(())
}
