pub mod abr;
pub mod bandwidth;
pub mod buffer;
pub mod config;
pub mod download;
pub mod error;
pub mod event_logger;
pub mod factory;
pub mod mpd;
pub mod player;
pub mod scheduler;
pub mod stats;

pub use abr::{AbrController, DashAbrController, SelectionMap};
pub use bandwidth::{BandwidthListener, BandwidthMeter};
pub use buffer::BufferManager;
pub use config::PlayerConfig;
pub use download::{Downloader, HttpDownloader, TransferListener};
pub use error::{DashError, DashResult};
pub use event_logger::EventLogger;
pub use factory::DashPlayerBuilder;
pub use mpd::parser::parse_mpd;
pub use mpd::provider::ManifestProvider;
pub use mpd::Manifest;
pub use player::{DashPlayer, PlaybackStateMachine, PlayerListener, State};
pub use scheduler::{Scheduler, SchedulerListener};
pub use stats::{PlaybackReport, QoeRecorder};
