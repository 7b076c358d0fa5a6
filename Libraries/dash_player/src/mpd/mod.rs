//! DASH manifest data structures (MPD and related types).
//! These are produced once by the parser and never mutated afterwards; dynamic
//! manifests are replaced wholesale by the provider.

pub mod builder;
pub mod parser;
pub mod provider;
pub mod template;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub type AdaptationSetId = String;
pub type RepresentationId = String;
/// Adaptation sets keyed by their id.
pub type AdaptationSets = BTreeMap<AdaptationSetId, AdaptationSet>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentationType {
    /// Video on demand, the manifest never changes.
    Static,
    /// Live, the manifest must be refreshed periodically.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Video,
    Audio,
}

impl ContentType {
    /// Infers the content type from a `contentType` or `mimeType` value.
    pub fn infer(value: &str) -> Option<Self> {
        if value.starts_with("video") {
            Some(ContentType::Video)
        } else if value.starts_with("audio") {
            Some(ContentType::Audio)
        } else {
            None
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentType::Video => write!(f, "video"),
            ContentType::Audio => write!(f, "audio"),
        }
    }
}

/// A single media segment with its resolved URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub url: String,
    /// Playback duration in seconds.
    pub duration: f64,
}

/// A single video/audio representation within an adaptation set.
#[derive(Debug, Clone, Serialize)]
pub struct Representation {
    pub id: RepresentationId,
    pub mime_type: String,
    pub codecs: String,
    /// Average bandwidth in bits per second (bps).
    pub bandwidth: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Resolved URL of the initialization segment, if the stream has one.
    pub initialization: Option<String>,
    /// Media segments in playback order.
    pub segments: Vec<Segment>,
}

impl Representation {
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

/// An adaptation set groups representations with the same content type (e.g., audio or video).
#[derive(Debug, Clone, Serialize)]
pub struct AdaptationSet {
    pub id: AdaptationSetId,
    pub content_type: ContentType,
    pub frame_rate: Option<String>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    /// Picture aspect ratio, e.g. "16:9".
    pub par: Option<String>,
    /// Never empty.
    pub representations: BTreeMap<RepresentationId, Representation>,
}

impl AdaptationSet {
    /// Representations sorted from highest to lowest bitrate.
    pub fn by_bitrate_desc(&self) -> Vec<&Representation> {
        let mut representations: Vec<&Representation> = self.representations.values().collect();
        representations.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));
        representations
    }

    pub fn lowest_bitrate(&self) -> Option<&Representation> {
        self.representations.values().min_by_key(|r| r.bandwidth)
    }
}

/// Top-level metadata parsed from an MPD file.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    /// The raw manifest text.
    #[serde(skip)]
    pub content: String,
    pub url: String,
    pub presentation_type: PresentationType,
    /// Seconds.
    pub media_presentation_duration: f64,
    /// Seconds.
    pub max_segment_duration: f64,
    /// Recommended minimum buffer, in seconds.
    pub min_buffer_time: f64,
    /// Refresh period of a dynamic manifest, in seconds.
    pub minimum_update_period: Option<f64>,
    pub availability_start_time: Option<DateTime<Utc>>,
    pub adaptation_sets: Arc<AdaptationSets>,
}

impl Manifest {
    pub fn is_dynamic(&self) -> bool {
        self.presentation_type == PresentationType::Dynamic
    }
}
