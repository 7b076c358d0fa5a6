use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashError {
    /// The manifest is malformed or lacks a required element/attribute.
    #[error("Manifest parse error: {0}")]
    Parse(String),

    /// A representation has no SegmentTemplate to address its segments with.
    #[error("Unsupported addressing mode for representation {0}")]
    AddressingUnsupported(String),

    #[error("Transfer of {url} failed: {reason}")]
    Transfer { url: String, reason: String },

    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: String },

    /// The transfer was interrupted because the downloader got closed.
    #[error("Transfer of {0} was canceled")]
    Canceled(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

impl DashError {
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse(msg.into())
    }

    pub fn transfer<S: Into<String>>(url: &str, reason: S) -> Self {
        Self::Transfer {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    /// True for every error raised while reading the manifest.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            DashError::Parse(_)
                | DashError::AddressingUnsupported(_)
                | DashError::Xml(_)
                | DashError::XmlAttribute(_)
                | DashError::Url(_)
        )
    }
}

pub type DashResult<T> = Result<T, DashError>;
