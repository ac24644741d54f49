//! vidcast CLI Library
//!
//! Shared functionality for the vidcast command-line tools.

pub mod config;
pub mod media;
pub mod player;
pub mod stats;

pub use config::{ClientSettings, Config, ConfigError, ServerSettings, StreamMode};
pub use media::{bitrate_or_default, list_video_files, FfmpegProber, MediaError, MediaProber};
pub use player::{open_output, PlayerSink, ProcessPlayer, WriterSink};
pub use stats::{
    compact_stats, display_receiver_summary, display_server_summary, format_bandwidth,
    format_bytes, format_duration,
};

/// Install the tracing subscriber used by both binaries
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects debug output.
pub fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
