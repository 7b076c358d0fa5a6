use once_cell::sync::Lazy;
use regex::{Captures, Regex};

// Only `%0<width>d` is allowed as a format tag, so it is expanded by hand.
static IDENTIFIER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(?:(RepresentationID|Number|Time|Bandwidth)(?:%0(\d+)d)?)?\$")
        .expect("identifier regex is valid")
});

/// Values substituted into a SegmentTemplate `media` or `initialization` pattern.
#[derive(Debug, Clone, Default)]
pub struct TemplateValues<'a> {
    pub representation_id: &'a str,
    pub bandwidth: u64,
    pub number: Option<u64>,
    pub time: Option<u64>,
}

impl<'a> TemplateValues<'a> {
    pub fn new(representation_id: &'a str, bandwidth: u64) -> Self {
        Self {
            representation_id,
            bandwidth,
            number: None,
            time: None,
        }
    }

    pub fn with_segment(&self, number: u64, time: u64) -> Self {
        Self {
            number: Some(number),
            time: Some(time),
            ..self.clone()
        }
    }

    /// Expands every identifier this set of values knows about. Unknown or
    /// unset identifiers are left untouched and `$$` becomes `$`.
    pub fn resolve(&self, template: &str) -> String {
        IDENTIFIER_REGEX
            .replace_all(template, |caps: &Captures| {
                let Some(name) = caps.get(1) else {
                    return "$".to_string();
                };
                let value = match name.as_str() {
                    "RepresentationID" => Some(self.representation_id.to_string()),
                    "Bandwidth" => Some(self.bandwidth.to_string()),
                    "Number" => self.number.map(|n| n.to_string()),
                    "Time" => self.time.map(|t| t.to_string()),
                    _ => None,
                };
                match (value, caps.get(2)) {
                    (Some(value), Some(width)) => {
                        let width = width.as_str().parse::<usize>().unwrap_or(1);
                        format!("{:0>width$}", value, width = width)
                    }
                    (Some(value), None) => value,
                    (None, _) => caps[0].to_string(),
                }
            })
            .to_string()
    }
}
