use crate::models::{MsPosition, PlaybackStatus};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Game audio engine demo player
#[derive(Debug, Parser)]
#[command(name = "gaplay")]
#[command(about = "Plays WAV files through the game audio engine")]
#[command(version = "0.1.0")]
pub struct CliApp {
    /// Report paused sounds as "paused" instead of "stopped"
    #[arg(long, global = true)]
    pub distinct_status: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the format of a WAV file
    Info {
        #[arg(value_parser = parse_path)]
        file: PathBuf,
    },
    /// Load a WAV file into memory and play it as a 2D sample
    Play {
        #[arg(value_parser = parse_path)]
        file: PathBuf,
        /// Volume (0-127)
        #[arg(long, default_value_t = 127, value_parser = clap::value_parser!(i32).range(0..=127))]
        volume: i32,
        /// Pan (0 = left, 64 = center, 127 = right)
        #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(i32).range(0..=127))]
        pan: i32,
        /// Playback rate in Hz; defaults to the file's own rate
        #[arg(long)]
        rate: Option<u32>,
        /// Times to play; 0 loops until interrupted
        #[arg(long, default_value_t = 1)]
        loops: u32,
    },
    /// Play a mono WAV file at a position around the listener
    Play3d {
        #[arg(value_parser = parse_path)]
        file: PathBuf,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        x: f32,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        y: f32,
        #[arg(long, default_value_t = -5.0, allow_hyphen_values = true)]
        z: f32,
        /// Times to play; 0 loops until interrupted
        #[arg(long, default_value_t = 1)]
        loops: u32,
    },
    /// Stream a WAV file from disk
    Stream {
        #[arg(value_parser = parse_path)]
        file: PathBuf,
        /// Passes through the file; 0 loops until interrupted
        #[arg(long, default_value_t = 1)]
        loops: u32,
        /// Start offset (e.g. "1:30", "90", "90s")
        #[arg(long, value_parser = CliApp::parse_time)]
        start: Option<Duration>,
        /// Refill period in microseconds
        #[arg(long, default_value_t = 20_000)]
        service_us: u64,
    },
    /// List audio output devices
    Devices,
    /// Show or reset the saved engine configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the active configuration as TOML
    Show,
    /// Restore and save the defaults
    Reset,
}

fn parse_path(input: &str) -> Result<PathBuf, ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError::EmptyPath);
    }
    Ok(CliApp::expand_path(input))
}

impl CliApp {
    /// Parse command line arguments
    pub fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Expand tilde (~) in path to home directory
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home_dir) = dirs::home_dir() {
                return home_dir.join(rest);
            }
        } else if path == "~" {
            return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
        }
        PathBuf::from(path)
    }

    /// Parse "1:30", "90", "90s" or "1:30.5" into a duration
    pub fn parse_time(time_str: &str) -> Result<Duration, ParseError> {
        let trimmed = time_str.trim();
        let invalid = || ParseError::InvalidTimeFormat {
            input: time_str.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid());
        }

        let seconds = if let Some((minutes, seconds)) = trimmed.split_once(':') {
            let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
            let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
            if !(0.0..60.0).contains(&seconds) {
                return Err(invalid());
            }
            minutes as f64 * 60.0 + seconds
        } else {
            let seconds: f64 = trimmed.trim_end_matches('s').parse().map_err(|_| invalid())?;
            if seconds < 0.0 || !seconds.is_finite() {
                return Err(invalid());
            }
            seconds
        };
        Ok(Duration::from_secs_f64(seconds))
    }

    /// Format milliseconds as MM:SS.t
    pub fn format_ms(ms: u32) -> String {
        let total_seconds = ms / 1000;
        format!("{:02}:{:02}.{}", total_seconds / 60, total_seconds % 60, (ms % 1000) / 100)
    }

    /// One status line for the playback loop
    pub fn status_line(label: &str, status: PlaybackStatus, position: MsPosition) -> String {
        format!(
            "{:<10} {:<8} {} / {}",
            Self::truncate(label, 10),
            status.as_str(),
            Self::format_ms(position.current_ms),
            Self::format_ms(position.total_ms)
        )
    }

    /// Truncate string to fit display width
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", kept)
        }
    }
}

/// Command parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Path is empty")]
    EmptyPath,

    #[error("Invalid time format: {input}")]
    InvalidTimeFormat { input: String },
}
