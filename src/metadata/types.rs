use serde::{Deserialize, Serialize};
use url::Url;

use crate::classify::LinkType;

/// Where an image candidate was found in the document. Ordering doubles as
/// the scoring priority: earlier kinds are more trustworthy hero images.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageSource {
    MetaTag,
    StructuredData,
    Srcset,
    ResponsiveMap,
    ImgAttr,
    Poster,
    LinkTag,
    CssBackground,
    InlineScript,
}

impl ImageSource {
    /// Base score by source kind. The relative ordering is the load-bearing
    /// contract; the exact magnitudes are tunable.
    pub fn base_score(self) -> i32 {
        match self {
            ImageSource::MetaTag => 500,
            ImageSource::StructuredData => 450,
            ImageSource::Srcset => 400,
            ImageSource::ResponsiveMap => 380,
            ImageSource::ImgAttr => 300,
            ImageSource::Poster => 250,
            ImageSource::LinkTag => 200,
            ImageSource::CssBackground => 150,
            ImageSource::InlineScript => 50,
        }
    }
}

/// A single image found on the page. The URL is always absolute; relative
/// URLs are resolved against the page before a candidate is admitted.
#[derive(Clone, Debug)]
pub struct ImageCandidate {
    pub url: Url,
    pub source: ImageSource,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

const SIZE_BONUS_CAP: i32 = 160;
const FAVICON_PENALTY: i32 = -80;
const LOGO_PENALTY: i32 = -40;
const SVG_PENALTY: i32 = -30;

impl ImageCandidate {
    pub fn score(&self) -> i32 {
        let mut score = self.source.base_score();

        let mut bonus = 0;
        if let Some(w) = self.width {
            bonus += (w.min(1600) / 10) as i32;
        }
        if let Some(h) = self.height {
            bonus += (h.min(1600) / 10) as i32;
        }
        score += bonus.min(SIZE_BONUS_CAP);

        let url_lower = self.url.as_str().to_lowercase();
        if url_lower.contains("favicon") || url_lower.contains("sprite") {
            score += FAVICON_PENALTY;
        }
        if url_lower.contains("logo") {
            score += LOGO_PENALTY;
        }
        // vector logos are rarely useful hero images
        if self.url.path().to_lowercase().ends_with(".svg") {
            score += SVG_PENALTY;
        }

        score
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSet {
    pub logo: Option<String>,
    pub image: Option<String>,
    pub favicon: Option<String>,
    pub apple_touch_icon: Option<String>,
}

impl ImageSet {
    pub fn is_empty(&self) -> bool {
        self.logo.is_none()
            && self.image.is_none()
            && self.favicon.is_none()
            && self.apple_touch_icon.is_none()
    }

    pub fn has_any(&self) -> bool {
        !self.is_empty()
    }
}

/// Structured metadata derived from one page.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub images: ImageSet,
}

impl PageMetadata {
    /// At least one of title/description/any image present.
    pub fn is_useful(&self) -> bool {
        self.title.as_deref().map(|t| !t.is_empty()).unwrap_or(false)
            || self
                .description
                .as_deref()
                .map(|d| !d.is_empty())
                .unwrap_or(false)
            || self.images.has_any()
    }
}

/// Caller-facing request for the FetchAndExtract operation.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FetchRequest {
    pub url: String,

    #[serde(default)]
    pub method: Option<String>,

    /// Extra headers, merged over the generated browser identity.
    #[serde(default)]
    pub headers: Option<std::collections::BTreeMap<String, String>>,

    /// Honored for POST/PUT/PATCH only.
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub domain: Option<String>,
    pub status_code: u16,
    pub status_text: String,
    pub method: String,
    pub content_type: Option<String>,
    pub response_time_ms: u64,
    pub attempt: u32,
}

/// The envelope returned to the caller, successful or not.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub success: bool,
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_url: Option<String>,

    pub method: String,
    pub status: u16,
    pub status_text: String,
    pub link_type: LinkType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMeta>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<ImageSet>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub attempt: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
