//! Media collaborators: bitrate probing and video discovery
//!
//! The server only needs two facts about a file before streaming it: its
//! bitrate, which sets the pacing, and optionally its duration for the log.
//! Both come from an external prober behind [`MediaProber`].

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use thiserror::Error;

/// Media errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Could not determine {what} of {path}")]
    Probe { what: &'static str, path: PathBuf },

    #[error("Failed to read video directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Source of media facts
pub trait MediaProber {
    /// Overall bitrate in bits per second
    fn probe_bitrate(&self, path: &Path) -> Result<u64, MediaError>;

    /// Playing time
    fn probe_duration(&self, path: &Path) -> Result<Duration, MediaError>;
}

/// Prober backed by the `ffmpeg` and `ffprobe` executables
#[derive(Debug, Clone)]
pub struct FfmpegProber {
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for FfmpegProber {
    fn default() -> Self {
        FfmpegProber {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl FfmpegProber {
    fn run(&self, program: &str, args: &[&OsStr]) -> Result<String, MediaError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| MediaError::Spawn {
                command: program.to_string(),
                source,
            })?;
        // ffmpeg prints stream information on stderr
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

impl MediaProber for FfmpegProber {
    fn probe_bitrate(&self, path: &Path) -> Result<u64, MediaError> {
        let text = self.run(
            &self.ffmpeg,
            &[OsStr::new("-hide_banner"), OsStr::new("-i"), path.as_os_str()],
        )?;
        parse_ffmpeg_bitrate(&text).ok_or_else(|| MediaError::Probe {
            what: "bitrate",
            path: path.to_path_buf(),
        })
    }

    fn probe_duration(&self, path: &Path) -> Result<Duration, MediaError> {
        let text = self.run(
            &self.ffprobe,
            &[
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-show_entries"),
                OsStr::new("format=duration"),
                OsStr::new("-of"),
                OsStr::new("default=noprint_wrappers=1:nokey=1"),
                path.as_os_str(),
            ],
        )?;
        parse_seconds(text.trim()).ok_or_else(|| MediaError::Probe {
            what: "duration",
            path: path.to_path_buf(),
        })
    }
}

/// Probed bitrate of `path`, or `fallback` when probing fails
pub fn bitrate_or_default<P: MediaProber + ?Sized>(prober: &P, path: &Path, fallback: u64) -> u64 {
    match prober.probe_bitrate(path) {
        Ok(bps) if bps > 0 => bps,
        Ok(_) => {
            tracing::warn!("{} reports a zero bitrate, using {} bps", path.display(), fallback);
            fallback
        }
        Err(e) => {
            tracing::warn!("{}, using {} bps", e, fallback);
            fallback
        }
    }
}

/// Extract the overall bitrate from `ffmpeg -i` output
///
/// Looks for `bitrate: <N> kb/s` and returns bits per second.
pub fn parse_ffmpeg_bitrate(output: &str) -> Option<u64> {
    const MARKER: &str = "bitrate: ";
    output.match_indices(MARKER).find_map(|(at, _)| {
        let rest = &output[at + MARKER.len()..];
        let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits_end == 0 || !rest[digits_end..].starts_with(" kb/s") {
            return None;
        }
        rest[..digits_end].parse::<u64>().ok()?.checked_mul(1000)
    })
}

fn parse_seconds(text: &str) -> Option<Duration> {
    Duration::try_from_secs_f64(text.parse().ok()?).ok()
}

/// Regular files in `dir`, sorted by name
pub fn list_video_files(dir: &Path) -> Result<Vec<PathBuf>, MediaError> {
    let entries = fs::read_dir(dir).map_err(|source| MediaError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FFMPEG_OUTPUT: &str = "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'clip.mp4':\n  \
        Duration: 00:00:10.01, start: 0.000000, bitrate: 2516 kb/s\n  \
        Stream #0:0(und): Video: h264 (High), yuv420p, 1280x720, 2381 kb/s, 30 fps\n";

    #[test]
    fn test_parse_ffmpeg_bitrate() {
        assert_eq!(parse_ffmpeg_bitrate(FFMPEG_OUTPUT), Some(2_516_000));
        assert_eq!(parse_ffmpeg_bitrate("bitrate: N/A"), None);
        assert_eq!(parse_ffmpeg_bitrate("no such file"), None);
    }

    struct FixedProber(Option<u64>);

    impl MediaProber for FixedProber {
        fn probe_bitrate(&self, path: &Path) -> Result<u64, MediaError> {
            self.0.ok_or_else(|| MediaError::Probe {
                what: "bitrate",
                path: path.to_path_buf(),
            })
        }

        fn probe_duration(&self, _path: &Path) -> Result<Duration, MediaError> {
            Ok(Duration::ZERO)
        }
    }

    #[test]
    fn test_bitrate_fallback() {
        let path = Path::new("clip.mp4");
        assert_eq!(bitrate_or_default(&FixedProber(Some(800_000)), path, 2_000_000), 800_000);
        assert_eq!(bitrate_or_default(&FixedProber(None), path, 2_000_000), 2_000_000);
        assert_eq!(bitrate_or_default(&FixedProber(Some(0)), path, 2_000_000), 2_000_000);
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("10.5"), Some(Duration::from_millis(10_500)));
        assert_eq!(parse_seconds("N/A"), None);
        assert_eq!(parse_seconds("-1"), None);
    }

    #[test]
    fn test_list_video_files_sorted_and_regular() {
        let dir = std::env::temp_dir().join(format!("vidcast-media-{}", std::process::id()));
        fs::create_dir_all(dir.join("subdir")).unwrap();
        for name in ["b.mp4", "a.mp4", "c.ts"] {
            fs::write(dir.join(name), b"x").unwrap();
        }

        let files = list_video_files(&dir).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.mp4", "c.ts"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_directory() {
        assert!(matches!(
            list_video_files(Path::new("/nonexistent/vidcast")),
            Err(MediaError::Directory { .. })
        ));
    }
}
