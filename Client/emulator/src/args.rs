// File: args.rs
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use dash_player::{DashError, DashResult, PlayerConfig};
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "A headless MPEG-DASH player that emulates the playback of a stream."
)]
pub struct Args {
    /// URL of the MPD manifest
    #[arg(value_parser = parse_target)]
    pub target: String,
    /// YAML file with player settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
    /// Print the QoE report as JSON when playback ends
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    pub report: bool,
    #[arg(long)]
    pub bandwidth_fraction: Option<f64>,
    #[arg(long)]
    pub panic_buffer: Option<f64>,
    #[arg(long)]
    pub safe_buffer: Option<f64>,
    #[arg(long)]
    pub max_buffer: Option<f64>,
    #[arg(long)]
    pub min_start_buffer: Option<f64>,
    #[arg(long)]
    pub min_rebuffer: Option<f64>,
}

fn parse_target(value: &str) -> Result<String, String> {
    let url = Url::parse(value).map_err(|e| format!("invalid URL: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(value.to_string()),
        other => Err(format!("unsupported scheme {other:?}, expected http or https")),
    }
}

pub fn parse_args() -> Args {
    Args::parse()
}

pub fn get_log_level_filter(args: &Args) -> LevelFilter {
    match args.log_level {
        LogLevel::Trace => LevelFilter::TRACE,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
    }
}

/// Settings from the optional YAML file, then the command-line overrides.
pub fn player_config(args: &Args) -> DashResult<PlayerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| DashError::Config(format!("cannot read {}: {e}", path.display())))?;
            serde_yaml::from_str(&content)
                .map_err(|e| DashError::Config(format!("cannot parse {}: {e}", path.display())))?
        }
        None => PlayerConfig::default(),
    };

    let overrides = [
        (args.bandwidth_fraction, &mut config.bandwidth_fraction),
        (args.panic_buffer, &mut config.panic_buffer),
        (args.safe_buffer, &mut config.safe_buffer),
        (args.max_buffer, &mut config.max_buffer_duration),
        (args.min_start_buffer, &mut config.min_start_buffer),
        (args.min_rebuffer, &mut config.min_rebuffer),
    ];
    for (value, field) in overrides {
        if let Some(value) = value {
            *field = value;
        }
    }

    config.validate()?;
    Ok(config)
}
