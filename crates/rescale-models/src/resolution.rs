//! Output resolution catalog.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dimensions used for labels that are not in the catalog.
pub const FALLBACK_DIMENSIONS: Dimensions = Dimensions {
    width: 854,
    height: 480,
};

/// Pixel dimensions of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either side is larger than the matching side of `other`.
    ///
    /// Encoding `self` from an `other`-sized source would upscale.
    pub fn exceeds(&self, other: &Dimensions) -> bool {
        self.width > other.width || self.height > other.height
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Named output quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Resolution {
    #[serde(rename = "4K")]
    Uhd4k,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "240p")]
    P240,
    #[serde(rename = "144p")]
    P144,
}

impl Resolution {
    /// Every catalog entry, highest tier first.
    pub const ALL: [Resolution; 7] = [
        Resolution::Uhd4k,
        Resolution::P1080,
        Resolution::P720,
        Resolution::P480,
        Resolution::P360,
        Resolution::P240,
        Resolution::P144,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Uhd4k => "4K",
            Resolution::P1080 => "1080p",
            Resolution::P720 => "720p",
            Resolution::P480 => "480p",
            Resolution::P360 => "360p",
            Resolution::P240 => "240p",
            Resolution::P144 => "144p",
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        match self {
            Resolution::Uhd4k => Dimensions::new(3840, 2160),
            Resolution::P1080 => Dimensions::new(1920, 1080),
            Resolution::P720 => Dimensions::new(1280, 720),
            Resolution::P480 => Dimensions::new(854, 480),
            Resolution::P360 => Dimensions::new(640, 360),
            Resolution::P240 => Dimensions::new(426, 240),
            Resolution::P144 => Dimensions::new(256, 144),
        }
    }

    /// Look up a catalog entry by label (case-insensitive).
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|r| r.label().eq_ignore_ascii_case(label))
    }

    /// Target dimensions for a label.
    ///
    /// Unknown labels resolve to [`FALLBACK_DIMENSIONS`] instead of failing.
    pub fn resolve(label: &str) -> Dimensions {
        Self::from_label(label)
            .map(|r| r.dimensions())
            .unwrap_or(FALLBACK_DIMENSIONS)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
