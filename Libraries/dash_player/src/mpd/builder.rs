use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use std::io::Cursor;

use crate::error::{DashError, DashResult};
use crate::mpd::{ContentType, PresentationType};

/// One representation within an adaptation set
#[derive(Debug, Clone)]
pub struct RepresentationDef {
    pub id: String,
    pub bandwidth: u64,
    pub codecs: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct AdaptationSetDef {
    pub id: String,
    pub content_type: ContentType,
    pub mime_type: String,
    pub codecs: Option<String>,
    pub frame_rate: Option<String>,
    pub par: Option<String>,
    pub representations: Vec<RepresentationDef>,
}

impl AdaptationSetDef {
    pub fn new(id: &str, content_type: ContentType, representations: &[(&str, u64)]) -> Self {
        Self {
            id: id.to_string(),
            content_type,
            mime_type: format!("{content_type}/mp4"),
            codecs: None,
            frame_rate: None,
            par: None,
            representations: representations
                .iter()
                .map(|(id, bandwidth)| RepresentationDef {
                    id: id.to_string(),
                    bandwidth: *bandwidth,
                    codecs: None,
                    width: None,
                    height: None,
                })
                .collect(),
        }
    }
}

/// Writes single-period SegmentTimeline manifests.
///
/// Every adaptation set shares one SegmentTemplate and timeline, declared at
/// the adaptation set level.
#[derive(Debug, Clone)]
pub struct MpdBuilder {
    pub presentation_type: PresentationType,
    pub minimum_update_period: Option<f64>,
    pub min_buffer_time: f64,
    pub timescale: u64,
    pub start_number: u64,
    pub initialization: String,
    pub media: String,
    /// `(d, r)` pairs in timescale units.
    pub timeline: Vec<(u64, i64)>,
    pub adaptation_sets: Vec<AdaptationSetDef>,
}

impl Default for MpdBuilder {
    fn default() -> Self {
        Self {
            presentation_type: PresentationType::Static,
            minimum_update_period: None,
            min_buffer_time: 2.0,
            timescale: 1,
            start_number: 1,
            initialization: "init-stream$RepresentationID$.m4s".to_string(),
            media: "chunk-stream$RepresentationID$-$Number%05d$.m4s".to_string(),
            timeline: vec![],
            adaptation_sets: vec![],
        }
    }
}

impl MpdBuilder {
    /**
     * A live manifest, to be refetched every `minimum_update_period` seconds.
     */
    pub fn dynamic(minimum_update_period: f64) -> Self {
        Self {
            presentation_type: PresentationType::Dynamic,
            minimum_update_period: Some(minimum_update_period),
            ..Self::default()
        }
    }

    pub fn min_buffer_time(mut self, seconds: f64) -> Self {
        self.min_buffer_time = seconds;
        self
    }

    /**
     * Number of timeline units per second.
     */
    pub fn timescale(mut self, timescale: u64) -> Self {
        self.timescale = timescale;
        self
    }

    pub fn start_number(mut self, number: u64) -> Self {
        self.start_number = number;
        self
    }

    /**
     * Set the initialization and media patterns of the SegmentTemplate.
     * Both may use the $RepresentationID$ and $Number$ identifiers.
     */
    pub fn segment_template(mut self, initialization: &str, media: &str) -> Self {
        self.initialization = initialization.to_string();
        self.media = media.to_string();
        self
    }

    /**
     * Append `1 + repeat` segments of `duration` timescale units.
     */
    pub fn timeline_entry(mut self, duration: u64, repeat: i64) -> Self {
        self.timeline.push((duration, repeat));
        self
    }

    pub fn adaptation_set(mut self, adaptation_set: AdaptationSetDef) -> Self {
        self.adaptation_sets.push(adaptation_set);
        self
    }

    pub fn video_set(self, id: &str, representations: &[(&str, u64)]) -> Self {
        self.adaptation_set(AdaptationSetDef::new(id, ContentType::Video, representations))
    }

    pub fn audio_set(self, id: &str, representations: &[(&str, u64)]) -> Self {
        self.adaptation_set(AdaptationSetDef::new(id, ContentType::Audio, representations))
    }

    /// Total timeline duration in seconds. Open-ended repeats count once.
    pub fn duration(&self) -> f64 {
        let units: u64 = self
            .timeline
            .iter()
            .map(|(d, r)| d * (1 + (*r).max(0) as u64))
            .sum();
        units as f64 / self.timescale as f64
    }

    /**
     * Build the MPD XML string.
     */
    pub fn build_xml_string(&self) -> DashResult<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        let mut mpd = BytesStart::new("MPD");
        mpd.push_attribute(("xmlns", "urn:mpeg:dash:schema:mpd:2011"));
        mpd.push_attribute(("profiles", "urn:mpeg:dash:profile:isoff-live:2011"));
        match self.presentation_type {
            PresentationType::Static => {
                mpd.push_attribute(("type", "static"));
                let duration = iso_duration(self.duration());
                mpd.push_attribute(("mediaPresentationDuration", duration.as_str()));
            }
            PresentationType::Dynamic => {
                mpd.push_attribute(("type", "dynamic"));
                if let Some(v) = self.minimum_update_period {
                    mpd.push_attribute(("minimumUpdatePeriod", iso_duration(v).as_str()));
                }
            }
        }
        if let Some(longest) = self.timeline.iter().map(|(d, _)| *d).max() {
            let seconds = longest as f64 / self.timescale as f64;
            mpd.push_attribute(("maxSegmentDuration", iso_duration(seconds).as_str()));
        }
        mpd.push_attribute(("minBufferTime", iso_duration(self.min_buffer_time).as_str()));
        write(&mut writer, Event::Start(mpd))?;

        let mut period = BytesStart::new("Period");
        period.push_attribute(("id", "0"));
        period.push_attribute(("start", "PT0S"));
        write(&mut writer, Event::Start(period))?;

        for set in &self.adaptation_sets {
            let mut adaptation = BytesStart::new("AdaptationSet");
            adaptation.push_attribute(("id", set.id.as_str()));
            adaptation.push_attribute(("contentType", set.content_type.to_string().as_str()));
            adaptation.push_attribute(("mimeType", set.mime_type.as_str()));
            if let Some(codecs) = &set.codecs {
                adaptation.push_attribute(("codecs", codecs.as_str()));
            }
            if let Some(frame_rate) = &set.frame_rate {
                adaptation.push_attribute(("frameRate", frame_rate.as_str()));
            }
            if let Some(par) = &set.par {
                adaptation.push_attribute(("par", par.as_str()));
            }
            write(&mut writer, Event::Start(adaptation))?;
            self.write_template(&mut writer)?;

            for rep in &set.representations {
                let mut rep_el = BytesStart::new("Representation");
                rep_el.push_attribute(("id", rep.id.as_str()));
                rep_el.push_attribute(("bandwidth", rep.bandwidth.to_string().as_str()));
                if let Some(codecs) = &rep.codecs {
                    rep_el.push_attribute(("codecs", codecs.as_str()));
                }
                if let Some(width) = rep.width {
                    rep_el.push_attribute(("width", width.to_string().as_str()));
                }
                if let Some(height) = rep.height {
                    rep_el.push_attribute(("height", height.to_string().as_str()));
                }
                write(&mut writer, Event::Empty(rep_el))?;
            }

            write(&mut writer, Event::End(BytesEnd::new("AdaptationSet")))?;
        }

        write(&mut writer, Event::End(BytesEnd::new("Period")))?;
        write(&mut writer, Event::End(BytesEnd::new("MPD")))?;

        let result = writer.into_inner().into_inner();
        String::from_utf8(result).map_err(|e| DashError::parse(e.to_string()))
    }

    fn write_template(&self, writer: &mut Writer<Cursor<Vec<u8>>>) -> DashResult<()> {
        let mut template = BytesStart::new("SegmentTemplate");
        template.push_attribute(("timescale", self.timescale.to_string().as_str()));
        template.push_attribute(("initialization", self.initialization.as_str()));
        template.push_attribute(("media", self.media.as_str()));
        template.push_attribute(("startNumber", self.start_number.to_string().as_str()));
        write(writer, Event::Start(template))?;

        write(writer, Event::Start(BytesStart::new("SegmentTimeline")))?;
        for (duration, repeat) in &self.timeline {
            let mut entry = BytesStart::new("S");
            entry.push_attribute(("d", duration.to_string().as_str()));
            if *repeat != 0 {
                entry.push_attribute(("r", repeat.to_string().as_str()));
            }
            write(writer, Event::Empty(entry))?;
        }
        write(writer, Event::End(BytesEnd::new("SegmentTimeline")))?;

        write(writer, Event::End(BytesEnd::new("SegmentTemplate")))
    }
}

fn iso_duration(seconds: f64) -> String {
    format!("PT{}S", seconds)
}

fn write(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event) -> DashResult<()> {
    writer
        .write_event(event)
        .map_err(|e| DashError::parse(format!("Cannot write manifest: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpd::parser::parse_mpd;

    #[test]
    fn built_manifest_parses_back() {
        let xml = MpdBuilder::default()
            .timescale(1000)
            .timeline_entry(2000, 2)
            .timeline_entry(1000, 0)
            .video_set("v", &[("720p", 1_500_000), ("360p", 400_000)])
            .audio_set("a", &[("aac", 128_000)])
            .build_xml_string()
            .unwrap();

        let manifest = parse_mpd(&xml, "http://host/vod/manifest.mpd").unwrap();

        assert!((manifest.media_presentation_duration - 7.0).abs() < 1e-9);
        assert!((manifest.max_segment_duration - 2.0).abs() < 1e-9);
        assert_eq!(manifest.adaptation_sets.len(), 2);
        let audio = &manifest.adaptation_sets["a"];
        assert_eq!(audio.content_type, ContentType::Audio);
        let aac = &audio.representations["aac"];
        assert_eq!(aac.segments.len(), 4);
        assert_eq!(aac.initialization.as_deref(), Some("http://host/vod/init-streamaac.m4s"));
        assert_eq!(aac.segments[3].url, "http://host/vod/chunk-streamaac-00004.m4s");
    }

    #[test]
    fn dynamic_manifest_declares_update_period() {
        let xml = MpdBuilder::dynamic(2.0)
            .timeline_entry(1, 3)
            .video_set("0", &[("0", 1_000_000)])
            .build_xml_string()
            .unwrap();
        let manifest = parse_mpd(&xml, "http://host/live.mpd").unwrap();
        assert!(manifest.is_dynamic());
        assert_eq!(manifest.minimum_update_period, Some(2.0));
    }
}
