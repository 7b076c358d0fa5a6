use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};
use url::Url;

use crate::error::{DashError, DashResult};
use crate::mpd::template::TemplateValues;
use crate::mpd::{
    AdaptationSet, AdaptationSets, ContentType, Manifest, PresentationType, Representation, Segment,
};

type Attributes = HashMap<String, String>;

/// Upper bound on the segments expanded for one representation.
const MAX_SEGMENTS: u64 = 200_000;

/// Parses an ISO-8601 duration such as `PT1H2M3.5S` into seconds.
///
/// Calendar components (years, months) have no fixed length and are rejected.
/// The result keeps millisecond precision.
pub fn parse_duration(value: &str) -> DashResult<f64> {
    let value = value.trim();
    let invalid = || DashError::parse(format!("Invalid ISO-8601 duration: {value:?}"));
    if !value.bytes().any(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let iso = iso8601_duration::Duration::parse(value).map_err(|_| invalid())?;
    if iso.year != 0.0 || iso.month != 0.0 {
        return Err(DashError::parse(format!(
            "Duration {value:?} uses calendar years or months"
        )));
    }
    let millis = |component: f32| (f64::from(component) * 1000.0).round();
    let seconds = (86_400.0 * millis(iso.day)
        + 3600.0 * millis(iso.hour)
        + 60.0 * millis(iso.minute)
        + millis(iso.second))
        / 1000.0;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(invalid());
    }
    Ok(seconds)
}

/// Parses the manifest text fetched from `url` into a [`Manifest`].
///
/// Relative segment URLs are resolved against the directory of `url` (or the
/// MPD-level `BaseURL` when present). Only the first Period is used.
pub fn parse_mpd(content: &str, url: &str) -> DashResult<Manifest> {
    let scan = ManifestScan::run(content)?;

    let mpd = scan
        .mpd
        .ok_or_else(|| DashError::parse("Cannot find the MPD element"))?;
    if !scan.period_found {
        return Err(DashError::parse("Cannot find the Period element"));
    }

    let presentation_type = match mpd.get("type").map(String::as_str) {
        None | Some("static") => PresentationType::Static,
        Some("dynamic") => PresentationType::Dynamic,
        Some(other) => return Err(DashError::parse(format!("Unknown presentation type {other:?}"))),
    };
    let min_buffer_time = mpd
        .get("minBufferTime")
        .ok_or_else(|| DashError::parse("MPD element lacks the minBufferTime attribute"))
        .and_then(|v| parse_duration(v))?;
    let declared_duration = optional_duration(&mpd, "mediaPresentationDuration")?;
    let declared_max_segment = optional_duration(&mpd, "maxSegmentDuration")?;
    let minimum_update_period = optional_duration(&mpd, "minimumUpdatePeriod")?;
    let availability_start_time = mpd
        .get("availabilityStartTime")
        .map(|v| v.parse::<DateTime<Utc>>())
        .transpose()
        .map_err(|e| DashError::parse(format!("Invalid availabilityStartTime: {e}")))?;

    let base = BaseUrl::new(url, scan.base_url.as_deref())?;

    let mut adaptation_sets = AdaptationSets::new();
    for (index, draft) in scan.adaptation_sets.into_iter().enumerate() {
        let built = build_adaptation_set(draft, index, &base, declared_duration)?;
        let Some(adaptation_set) = built else {
            continue;
        };
        if adaptation_sets.contains_key(&adaptation_set.id) {
            return Err(DashError::parse(format!(
                "Duplicate adaptation set id {}",
                adaptation_set.id
            )));
        }
        adaptation_sets.insert(adaptation_set.id.clone(), adaptation_set);
    }
    if adaptation_sets.is_empty() {
        return Err(DashError::parse("The Period has no audio or video adaptation set"));
    }

    let representations = || adaptation_sets.values().flat_map(|s| s.representations.values());
    let media_presentation_duration = declared_duration.unwrap_or_else(|| {
        representations()
            .map(Representation::total_duration)
            .fold(0.0, f64::max)
    });
    let max_segment_duration = declared_max_segment.unwrap_or_else(|| {
        representations()
            .flat_map(|r| r.segments.iter().map(|s| s.duration))
            .fold(0.0, f64::max)
    });

    debug!(
        "Parsed {:?} manifest with {} adaptation sets, duration {:.3}s",
        presentation_type,
        adaptation_sets.len(),
        media_presentation_duration
    );

    Ok(Manifest {
        content: content.to_string(),
        url: url.to_string(),
        presentation_type,
        media_presentation_duration,
        max_segment_duration,
        min_buffer_time,
        minimum_update_period,
        availability_start_time,
        adaptation_sets: Arc::new(adaptation_sets),
    })
}

fn optional_duration(attributes: &Attributes, key: &str) -> DashResult<Option<f64>> {
    attributes.get(key).map(|v| parse_duration(v)).transpose()
}

fn optional_number<T: FromStr>(attributes: &Attributes, key: &str) -> DashResult<Option<T>> {
    attributes
        .get(key)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| DashError::parse(format!("Invalid value {v:?} for attribute {key}")))
        })
        .transpose()
}

#[derive(Debug, Clone, Copy)]
struct TimelineEntry {
    t: Option<u64>,
    d: u64,
    r: i64,
}

#[derive(Debug, Clone, Default)]
struct TemplateDraft {
    attributes: Attributes,
    timeline: Vec<TimelineEntry>,
}

impl TemplateDraft {
    /// Representation-level attributes override the inherited ones; a
    /// timeline is taken whole from the most specific level that has one.
    fn inherit(
        parent: Option<&TemplateDraft>,
        own: Option<&TemplateDraft>,
    ) -> Option<TemplateDraft> {
        match (parent, own) {
            (None, None) => None,
            (Some(parent), None) => Some(parent.clone()),
            (None, Some(own)) => Some(own.clone()),
            (Some(parent), Some(own)) => {
                let mut attributes = parent.attributes.clone();
                attributes.extend(own.attributes.clone());
                let timeline = if own.timeline.is_empty() {
                    parent.timeline.clone()
                } else {
                    own.timeline.clone()
                };
                Some(TemplateDraft { attributes, timeline })
            }
        }
    }
}

#[derive(Debug, Default)]
struct RepresentationDraft {
    attributes: Attributes,
    template: Option<TemplateDraft>,
}

#[derive(Debug, Default)]
struct AdaptationSetDraft {
    attributes: Attributes,
    template: Option<TemplateDraft>,
    representations: Vec<RepresentationDraft>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TemplateOwner {
    AdaptationSet,
    Representation,
}

/// First pass over the XML events: collects the raw attributes of the
/// elements the engine cares about, without interpreting them.
#[derive(Debug, Default)]
struct ManifestScan {
    mpd: Option<Attributes>,
    base_url: Option<String>,
    period_found: bool,
    adaptation_sets: Vec<AdaptationSetDraft>,

    in_period: bool,
    skipping_period: bool,
    in_base_url: bool,
    current_set: Option<AdaptationSetDraft>,
    current_representation: Option<RepresentationDraft>,
    open_template: Option<TemplateOwner>,
}

impl ManifestScan {
    fn run(content: &str) -> DashResult<Self> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);
        let mut scan = ManifestScan::default();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(ref e) => scan.open(e)?,
                Event::Empty(ref e) => {
                    scan.open(e)?;
                    scan.close(e.local_name().as_ref())?;
                }
                Event::End(ref e) => scan.close(e.local_name().as_ref())?,
                Event::Text(ref e) if scan.in_base_url => {
                    let text = e.unescape()?;
                    scan.base_url = Some(text.trim().to_string());
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(scan)
    }

    fn open(&mut self, e: &BytesStart) -> DashResult<()> {
        let name = e.local_name();
        let tag = std::str::from_utf8(name.as_ref())
            .map_err(|err| DashError::parse(format!("Invalid element name: {err}")))?;

        match tag {
            "MPD" => self.mpd = Some(attributes(e)?),
            "BaseURL" if !self.period_found => self.in_base_url = true,
            "Period" => {
                if self.period_found {
                    warn!("Only the first Period is played, ignoring the others");
                    self.skipping_period = true;
                }
                self.period_found = true;
                self.in_period = true;
            }
            _ if self.skipping_period || !self.in_period => {}
            "AdaptationSet" => {
                self.current_set = Some(AdaptationSetDraft {
                    attributes: attributes(e)?,
                    ..Default::default()
                });
            }
            "Representation" => {
                if self.current_set.is_none() {
                    return Err(DashError::parse("Representation outside of an AdaptationSet"));
                }
                self.current_representation = Some(RepresentationDraft {
                    attributes: attributes(e)?,
                    template: None,
                });
            }
            "SegmentTemplate" => {
                let template = TemplateDraft {
                    attributes: attributes(e)?,
                    timeline: vec![],
                };
                if let Some(representation) = self.current_representation.as_mut() {
                    representation.template = Some(template);
                    self.open_template = Some(TemplateOwner::Representation);
                } else if let Some(set) = self.current_set.as_mut() {
                    set.template = Some(template);
                    self.open_template = Some(TemplateOwner::AdaptationSet);
                }
            }
            "S" => {
                let Some(owner) = self.open_template else {
                    return Ok(());
                };
                let attributes = attributes(e)?;
                let entry = TimelineEntry {
                    t: optional_number(&attributes, "t")?,
                    d: optional_number(&attributes, "d")?
                        .ok_or_else(|| {
                            DashError::parse("SegmentTimeline entry lacks the d attribute")
                        })?,
                    r: optional_number(&attributes, "r")?.unwrap_or(0),
                };
                let template = match owner {
                    TemplateOwner::Representation => self
                        .current_representation
                        .as_mut()
                        .and_then(|r| r.template.as_mut()),
                    TemplateOwner::AdaptationSet => {
                        self.current_set.as_mut().and_then(|s| s.template.as_mut())
                    }
                };
                if let Some(template) = template {
                    template.timeline.push(entry);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) -> DashResult<()> {
        match name {
            b"BaseURL" => self.in_base_url = false,
            b"Period" => {
                self.in_period = false;
                self.skipping_period = false;
            }
            _ if self.skipping_period || !self.in_period => {}
            b"SegmentTemplate" => self.open_template = None,
            b"Representation" => {
                if let (Some(representation), Some(set)) =
                    (self.current_representation.take(), self.current_set.as_mut())
                {
                    set.representations.push(representation);
                }
            }
            b"AdaptationSet" => {
                if let Some(set) = self.current_set.take() {
                    self.adaptation_sets.push(set);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn attributes(e: &BytesStart) -> DashResult<Attributes> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.local_name().as_ref())
            .map_err(|err| DashError::parse(format!("Invalid attribute name: {err}")))?
            .to_string();
        let value = attr.unescape_value()?.to_string();
        map.insert(key, value);
    }
    Ok(map)
}

fn build_adaptation_set(
    draft: AdaptationSetDraft,
    index: usize,
    base: &BaseUrl,
    presentation_duration: Option<f64>,
) -> DashResult<Option<AdaptationSet>> {
    let attrs = &draft.attributes;
    let id = attrs.get("id").cloned().unwrap_or_else(|| index.to_string());

    let content_type = attrs
        .get("contentType")
        .and_then(|v| ContentType::infer(v))
        .or_else(|| attrs.get("mimeType").and_then(|v| ContentType::infer(v)))
        .or_else(|| {
            draft
                .representations
                .iter()
                .find_map(|r| r.attributes.get("mimeType").and_then(|v| ContentType::infer(v)))
        });
    let Some(content_type) = content_type else {
        warn!("Skipping adaptation set {id}: it is neither audio nor video");
        return Ok(None);
    };

    if draft.representations.is_empty() {
        return Err(DashError::parse(format!("Adaptation set {id} has no representations")));
    }

    let mut representations = BTreeMap::new();
    for representation in &draft.representations {
        let representation =
            build_representation(representation, &draft, base, presentation_duration)?;
        if representations.contains_key(&representation.id) {
            return Err(DashError::parse(format!(
                "Duplicate representation id {} in adaptation set {id}",
                representation.id
            )));
        }
        representations.insert(representation.id.clone(), representation);
    }

    Ok(Some(AdaptationSet {
        id,
        content_type,
        frame_rate: attrs.get("frameRate").cloned(),
        max_width: optional_number(attrs, "maxWidth")?,
        max_height: optional_number(attrs, "maxHeight")?,
        par: attrs.get("par").cloned(),
        representations,
    }))
}

fn build_representation(
    draft: &RepresentationDraft,
    set: &AdaptationSetDraft,
    base: &BaseUrl,
    presentation_duration: Option<f64>,
) -> DashResult<Representation> {
    let attrs = &draft.attributes;
    let inherited = |key: &str| attrs.get(key).or_else(|| set.attributes.get(key)).cloned();

    let id = attrs
        .get("id")
        .cloned()
        .ok_or_else(|| DashError::parse("Representation lacks the id attribute"))?;
    let bandwidth = optional_number::<u64>(attrs, "bandwidth")?
        .ok_or_else(|| {
            DashError::parse(format!("Representation {id} lacks the bandwidth attribute"))
        })?;
    let mime_type = inherited("mimeType")
        .ok_or_else(|| {
            DashError::parse(format!("Representation {id} lacks the mimeType attribute"))
        })?;

    let template = TemplateDraft::inherit(set.template.as_ref(), draft.template.as_ref())
        .ok_or_else(|| DashError::AddressingUnsupported(id.clone()))?;

    let values = TemplateValues::new(&id, bandwidth);
    let initialization = template
        .attributes
        .get("initialization")
        .map(|pattern| base.resolve(&values.resolve(pattern)))
        .transpose()?;
    let segments = expand_segments(&template, &values, base, presentation_duration)?;
    if segments.is_empty() {
        return Err(DashError::parse(format!("Representation {id} has no segments")));
    }

    Ok(Representation {
        mime_type,
        codecs: inherited("codecs").unwrap_or_default(),
        bandwidth,
        width: optional_number(attrs, "width")?,
        height: optional_number(attrs, "height")?,
        initialization,
        segments,
        id,
    })
}

fn expand_segments(
    template: &TemplateDraft,
    values: &TemplateValues,
    base: &BaseUrl,
    presentation_duration: Option<f64>,
) -> DashResult<Vec<Segment>> {
    let attrs = &template.attributes;
    let id = values.representation_id;
    let media = attrs
        .get("media")
        .ok_or_else(|| {
            DashError::parse(format!(
                "SegmentTemplate of representation {id} lacks the media attribute"
            ))
        })?;
    let timescale = optional_number::<u64>(attrs, "timescale")?.unwrap_or(1);
    if timescale == 0 {
        return Err(DashError::parse(format!("Representation {id} declares a zero timescale")));
    }
    let start_number = optional_number::<u64>(attrs, "startNumber")?.unwrap_or(1);

    let too_many = || {
        DashError::parse(format!(
            "Representation {id} expands to more than {MAX_SEGMENTS} segments"
        ))
    };
    let overflow =
        || DashError::parse(format!("Segment numbering of representation {id} overflows"));

    let mut segments = vec![];
    let mut push = |number: u64, time: u64, duration: f64| -> DashResult<()> {
        let url = base.resolve(&values.with_segment(number, time).resolve(media))?;
        segments.push(Segment { url, duration });
        Ok(())
    };

    if !template.timeline.is_empty() {
        let timeline = &template.timeline;
        let mut number = start_number;
        let mut time = timeline[0].t.unwrap_or(0);
        let mut expanded: u64 = 0;

        for (index, entry) in timeline.iter().enumerate() {
            if let Some(t) = entry.t {
                time = t;
            }
            if entry.d == 0 {
                return Err(DashError::parse(format!(
                    "Representation {id} has a zero-length timeline entry"
                )));
            }
            let repeat = if entry.r >= 0 {
                entry.r as u64
            } else {
                // Open-ended repeat: fill up to the next explicit start or the presentation end
                let end = match timeline.get(index + 1).and_then(|next| next.t) {
                    Some(next) => next,
                    None => {
                        let total = presentation_duration.ok_or_else(|| {
                            DashError::parse(format!(
                                "Representation {id} repeats until the end \
                                 but the presentation duration is unknown"
                            ))
                        })?;
                        (total * timescale as f64).round() as u64
                    }
                };
                end.saturating_sub(time).div_ceil(entry.d).saturating_sub(1)
            };

            if !matches!(count_after(expanded, repeat), Some(count) if count <= MAX_SEGMENTS) {
                return Err(too_many());
            }
            expanded += repeat + 1;

            let duration = entry.d as f64 / timescale as f64;
            for _ in 0..=repeat {
                push(number, time, duration)?;
                number = number.checked_add(1).ok_or_else(overflow)?;
                time = time.checked_add(entry.d).ok_or_else(overflow)?;
            }
        }
    } else if let Some(duration) = optional_number::<u64>(attrs, "duration")? {
        if duration == 0 {
            return Err(DashError::parse(format!(
                "Representation {id} declares a zero segment duration"
            )));
        }
        let total = presentation_duration.ok_or_else(|| {
            DashError::parse(format!(
                "Representation {id} uses a fixed segment duration \
                 but the presentation duration is unknown"
            ))
        })?;
        let segment_duration = duration as f64 / timescale as f64;
        let count = ((total / segment_duration) - 1e-9).ceil().max(1.0);
        if count > MAX_SEGMENTS as f64 {
            return Err(too_many());
        }
        for i in 0..count as u64 {
            let remaining = total - i as f64 * segment_duration;
            let number = start_number.checked_add(i).ok_or_else(overflow)?;
            let time = i.checked_mul(duration).ok_or_else(overflow)?;
            push(number, time, remaining.min(segment_duration))?;
        }
    } else {
        return Err(DashError::parse(format!(
            "SegmentTemplate of representation {id} has neither a SegmentTimeline nor a duration"
        )));
    }

    Ok(segments)
}

/// Total segment count once `repeat + 1` more are added to `expanded`.
fn count_after(expanded: u64, repeat: u64) -> Option<u64> {
    expanded.checked_add(repeat)?.checked_add(1)
}

/// Resolves segment references relative to the manifest location.
#[derive(Debug, Clone)]
enum BaseUrl {
    Absolute(Url),
    /// The manifest was not loaded from a URL (e.g. a local path).
    Directory(String),
}

impl BaseUrl {
    fn new(manifest_url: &str, base_element: Option<&str>) -> DashResult<Self> {
        match Url::parse(manifest_url) {
            Ok(url) => match base_element {
                Some(base) if !base.is_empty() => Ok(BaseUrl::Absolute(url.join(base)?)),
                _ => Ok(BaseUrl::Absolute(url)),
            },
            Err(_) => {
                if let Some(Ok(url)) = base_element.map(Url::parse) {
                    return Ok(BaseUrl::Absolute(url));
                }
                let dir = manifest_url.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
                let dir = match base_element {
                    Some(base) if !base.is_empty() => join_path(dir, base),
                    _ => dir.to_string(),
                };
                Ok(BaseUrl::Directory(dir))
            }
        }
    }

    fn resolve(&self, reference: &str) -> DashResult<String> {
        match self {
            BaseUrl::Absolute(url) => Ok(url.join(reference)?.to_string()),
            BaseUrl::Directory(_) if Url::parse(reference).is_ok() => Ok(reference.to_string()),
            BaseUrl::Directory(dir) => Ok(join_path(dir, reference)),
        }
    }
}

fn join_path(dir: &str, reference: &str) -> String {
    if dir.is_empty() {
        reference.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), reference)
    }
}
