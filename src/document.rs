use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The kind of media a document was captioned from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

impl MediaKind {
    /// The value stored in (and filtered on) the `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            other => Err(Error::Config(format!(
                "unknown media type '{other}' (expected 'image' or 'video')"
            ))),
        }
    }
}

/// One indexed unit: a caption for an image or for a sampled video frame.
///
/// `timestamp` is 0 for images and the sample offset (in seconds) for video
/// frames. `modified_time` is the source file's mtime in seconds since the
/// Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub caption: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub timestamp: u64,
    pub modified_time: u64,
}

impl Document {
    /// Documents with a blank caption are never stored.
    pub fn is_indexable(&self) -> bool {
        !self.caption.trim().is_empty()
    }
}
