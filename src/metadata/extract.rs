//! HTML metadata extraction: title, description, and a scored image
//! candidate set gathered from eight kinds of markup.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

use crate::metadata::types::{ImageCandidate, ImageSource, PageMetadata};

/// Inline-script URL scraping is a last resort; don't walk megabytes of JS.
const MAX_SCRIPT_MATCHES: usize = 20;
/// Recursion guard for structured-data scanning on adversarial documents.
const MAX_JSON_DEPTH: usize = 8;

static CSS_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"background(?:-image)?\s*:\s*url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).unwrap()
});

static SCRIPT_IMAGE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>\\]+\.(?:png|jpe?g|webp|gif)"#).unwrap());

static FILENAME_DIMS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{2,4})x(\d{2,4})").unwrap());

fn selector(src: &str) -> Selector {
    Selector::parse(src).expect("static selector is valid")
}

/// Resolve a raw attribute value into an absolute http(s) URL against the
/// page. Already-absolute URLs pass through, protocol-relative URLs inherit
/// the page's scheme, everything else joins against the page URL. Failures
/// return None; nothing here ever surfaces an error.
pub fn resolve_url(raw: &str, page: &Url) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }

    let resolved = if raw.starts_with("//") {
        Url::parse(&format!("{}:{}", page.scheme(), raw)).ok()?
    } else if let Ok(url) = Url::parse(raw) {
        url
    } else {
        page.join(raw).ok()?
    };

    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        _ => None,
    }
}

/// Opportunistic dimensions for candidates without explicit width/height:
/// query parameters first, then a NNNxNNN filename pattern.
fn dimensions_from_url(url: &Url) -> (Option<u32>, Option<u32>) {
    let mut width = None;
    let mut height = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "w" | "width" => width = width.or_else(|| value.parse().ok()),
            "h" | "height" => height = height.or_else(|| value.parse().ok()),
            _ => {}
        }
    }

    if width.is_none() && height.is_none() {
        if let Some(segment) = url.path_segments().and_then(|s| s.last()) {
            if let Some(caps) = FILENAME_DIMS_REGEX.captures(segment) {
                width = caps.get(1).and_then(|m| m.as_str().parse().ok());
                height = caps.get(2).and_then(|m| m.as_str().parse().ok());
            }
        }
    }

    (width, height)
}

/// Candidate set keyed by absolute URL; the first occurrence wins.
struct CandidateSet {
    seen: HashSet<String>,
    candidates: Vec<ImageCandidate>,
}

impl CandidateSet {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            candidates: Vec::new(),
        }
    }

    fn admit(
        &mut self,
        raw: &str,
        page: &Url,
        source: ImageSource,
        width: Option<u32>,
        height: Option<u32>,
    ) {
        let Some(url) = resolve_url(raw, page) else {
            return;
        };
        if !self.seen.insert(url.as_str().to_string()) {
            return;
        }
        let (url_w, url_h) = dimensions_from_url(&url);
        self.candidates.push(ImageCandidate {
            url,
            source,
            width: width.or(url_w),
            height: height.or(url_h),
        });
    }

    fn best(&self) -> Option<&ImageCandidate> {
        self.candidates.iter().max_by_key(|c| c.score())
    }
}

/// Output of the single pass over <meta> tags.
#[derive(Default)]
struct MetaTags {
    og_title: Option<String>,
    meta_title: Option<String>,
    og_description: Option<String>,
    description: Option<String>,
    images: Vec<String>,
    image_width: Option<u32>,
    image_height: Option<u32>,
}

fn scan_meta_tags(document: &Html) -> MetaTags {
    let mut tags = MetaTags::default();

    for element in document.select(&selector("meta")) {
        let prop = element.attr("property").unwrap_or_default();
        let key = element.attr("name").filter(|n| !n.is_empty()).unwrap_or(prop);
        let value = element.attr("content").unwrap_or_default().trim();
        if value.is_empty() {
            continue;
        }

        match key {
            "og:title" => {
                if tags.og_title.is_none() {
                    tags.og_title = Some(value.to_string());
                }
            }
            "title" => {
                if tags.meta_title.is_none() {
                    tags.meta_title = Some(value.to_string());
                }
            }
            "og:description" => {
                if tags.og_description.is_none() {
                    tags.og_description = Some(value.to_string());
                }
            }
            "description" | "Description" => {
                if tags.description.is_none() {
                    tags.description = Some(value.to_string());
                }
            }
            "og:image" | "og:image:url" | "og:image:secure_url" | "twitter:image"
            | "twitter:image:src" => {
                tags.images.push(value.to_string());
            }
            "og:image:width" => tags.image_width = value.parse().ok(),
            "og:image:height" => tags.image_height = value.parse().ok(),
            _ => {}
        }
    }

    tags
}

/// Recursively scan a parsed JSON-LD value for image-bearing fields,
/// including @graph arrays. Depth-guarded.
fn collect_json_images(value: &serde_json::Value, depth: usize, out: &mut Vec<String>) {
    if depth >= MAX_JSON_DEPTH {
        return;
    }

    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                collect_json_images(item, depth + 1, out);
            }
        }
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                match key.as_str() {
                    "image" | "thumbnailUrl" | "logo" | "contentUrl" => match val {
                        serde_json::Value::String(s) => out.push(s.clone()),
                        other => collect_json_images(other, depth + 1, out),
                    },
                    // image objects carry their url under "url"
                    "url" if map.contains_key("width") || map.contains_key("@type") => {
                        if let Some(s) = val.as_str() {
                            if s.contains("://") {
                                out.push(s.to_string());
                            }
                        }
                    }
                    "@graph" => collect_json_images(val, depth + 1, out),
                    _ => {
                        if val.is_object() || val.is_array() {
                            collect_json_images(val, depth + 1, out);
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

/// Parse a `srcset` value into (url, width) pairs. Density descriptors are
/// kept without a width.
fn parse_srcset(srcset: &str) -> Vec<(String, Option<u32>)> {
    srcset
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split_whitespace();
            let url = parts.next()?.to_string();
            let width = parts
                .next()
                .and_then(|d| d.strip_suffix('w'))
                .and_then(|w| w.parse().ok());
            Some((url, width))
        })
        .collect()
}

/// A JSON responsive map: {"https://…/a.jpg": [640, 480], …}.
fn parse_responsive_map(raw: &str) -> Vec<(String, Option<u32>, Option<u32>)> {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str(raw.trim()) else {
        return Vec::new();
    };

    map.into_iter()
        .filter(|(key, _)| key.contains('/') || key.starts_with("//"))
        .map(|(key, value)| {
            let dims = value.as_array();
            let width = dims
                .and_then(|d| d.first())
                .and_then(|v| v.as_u64())
                .map(|w| w as u32);
            let height = dims
                .and_then(|d| d.get(1))
                .and_then(|v| v.as_u64())
                .map(|h| h as u32);
            (key, width, height)
        })
        .collect()
}

static LAZY_SRC_ATTRS: &[&str] = &["src", "data-src", "data-lazy-src", "data-original", "data-lazy"];

fn gather_candidates(document: &Html, page: &Url, tags: &MetaTags, set: &mut CandidateSet) {
    // meta tags (og:image family, twitter:image family)
    for raw in &tags.images {
        set.admit(raw, page, ImageSource::MetaTag, tags.image_width, tags.image_height);
    }

    // structured-data blocks
    for element in document.select(&selector(r#"script[type="application/ld+json"]"#)) {
        let json_text = element.text().collect::<String>();
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&json_text) {
            let mut urls = Vec::new();
            collect_json_images(&json, 0, &mut urls);
            for raw in urls {
                set.admit(&raw, page, ImageSource::StructuredData, None, None);
            }
        }
    }

    // responsive srcset (img and picture sources)
    for element in document.select(&selector("img[srcset], source[srcset]")) {
        if let Some(srcset) = element.attr("srcset") {
            for (raw, width) in parse_srcset(srcset) {
                set.admit(&raw, page, ImageSource::Srcset, width, None);
            }
        }
    }

    let img_selector = selector("img");
    let img_elements: Vec<ElementRef> = document.select(&img_selector).collect();

    // responsive image-map attributes (JSON map of url -> [width, height])
    for element in &img_elements {
        for (name, value) in element.value().attrs() {
            if name.starts_with("data-") && value.trim_start().starts_with('{') {
                for (raw, width, height) in parse_responsive_map(value) {
                    set.admit(&raw, page, ImageSource::ResponsiveMap, width, height);
                }
            }
        }
    }

    // plain image attributes, incl. common lazy-load variants
    for element in &img_elements {
        let width = element.attr("width").and_then(|w| w.parse().ok());
        let height = element.attr("height").and_then(|h| h.parse().ok());
        for attr in LAZY_SRC_ATTRS {
            if let Some(raw) = element.attr(attr) {
                set.admit(raw, page, ImageSource::ImgAttr, width, height);
            }
        }
    }

    // video posters
    for element in document.select(&selector("video[poster]")) {
        if let Some(raw) = element.attr("poster") {
            set.admit(raw, page, ImageSource::Poster, None, None);
        }
    }

    // link rel=image_src / preload-as-image
    for element in document.select(&selector(r#"link[rel="image_src"]"#)) {
        if let Some(raw) = element.attr("href") {
            set.admit(raw, page, ImageSource::LinkTag, None, None);
        }
    }
    for element in document.select(&selector(r#"link[rel="preload"][as="image"]"#)) {
        if let Some(raw) = element.attr("href") {
            set.admit(raw, page, ImageSource::LinkTag, None, None);
        }
    }

    // inline CSS backgrounds
    for element in document.select(&selector("[style]")) {
        if let Some(style) = element.attr("style") {
            for caps in CSS_URL_REGEX.captures_iter(style) {
                set.admit(&caps[1], page, ImageSource::CssBackground, None, None);
            }
        }
    }

    // inline-script URL scraping, bounded
    let mut script_matches = 0;
    'scripts: for element in document.select(&selector("script")) {
        // skip json-ld and other non-js payloads, already handled above
        if element
            .attr("type")
            .map(|t| !t.contains("javascript"))
            .unwrap_or(false)
        {
            continue;
        }
        let text = element.text().collect::<String>();
        for m in SCRIPT_IMAGE_REGEX.find_iter(&text) {
            set.admit(m.as_str(), page, ImageSource::InlineScript, None, None);
            script_matches += 1;
            if script_matches >= MAX_SCRIPT_MATCHES {
                break 'scripts;
            }
        }
    }
}

fn element_text(element: ElementRef) -> Option<String> {
    let text = element.text().collect::<String>().trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn img_src(element: ElementRef, page: &Url) -> Option<String> {
    LAZY_SRC_ATTRS
        .iter()
        .filter_map(|attr| element.attr(attr))
        .find_map(|raw| resolve_url(raw, page))
        .map(|u| u.to_string())
}

/// The logo selector list, checked in order. Falls back to the primary
/// image, then the favicon, at the call site.
fn find_logo(document: &Html, page: &Url) -> Option<String> {
    for element in document.select(&selector("img")) {
        let haystack = format!(
            "{} {} {}",
            element.attr("alt").unwrap_or_default(),
            element.attr("class").unwrap_or_default(),
            element.attr("id").unwrap_or_default()
        )
        .to_lowercase();
        if haystack.contains("logo") {
            if let Some(src) = img_src(element, page) {
                return Some(src);
            }
        }
    }

    for sel in [
        ".logo img",
        "#logo img",
        ".navbar-brand img",
        ".site-logo img",
        "header img",
        ".brand img",
    ] {
        if let Some(element) = document.select(&selector(sel)).next() {
            if let Some(src) = img_src(element, page) {
                return Some(src);
            }
        }
    }

    None
}

fn find_link_href(document: &Html, selectors: &[&str], page: &Url) -> Option<String> {
    for sel in selectors {
        for element in document.select(&selector(sel)) {
            if let Some(raw) = element.attr("href") {
                if let Some(url) = resolve_url(raw, page) {
                    return Some(url.to_string());
                }
            }
        }
    }
    None
}

/// Parse an HTML document into structured metadata. Never fails: a page we
/// cannot make sense of degrades to empty fields.
pub fn extract_page(html: &str, page_url: &Url) -> PageMetadata {
    let document = Html::parse_document(html);
    let tags = scan_meta_tags(&document);

    let title = tags
        .og_title
        .clone()
        .or_else(|| tags.meta_title.clone())
        .or_else(|| {
            document
                .select(&selector("title"))
                .next()
                .and_then(element_text)
        })
        .or_else(|| {
            document
                .select(&selector("h1"))
                .next()
                .and_then(element_text)
        })
        .map(|t| t.trim().to_string());

    let description = tags
        .og_description
        .clone()
        .or_else(|| tags.description.clone())
        .map(|d| d.trim().to_string());

    let mut meta = PageMetadata {
        title,
        description,
        ..Default::default()
    };

    // meta-first-hit shortcut: an og:image/twitter:image wins outright
    meta.images.image = tags
        .images
        .iter()
        .find_map(|raw| resolve_url(raw, page_url))
        .map(|u| u.to_string());

    if meta.images.image.is_none() {
        let mut set = CandidateSet::new();
        gather_candidates(&document, page_url, &tags, &mut set);
        meta.images.image = set.best().map(|c| c.url.to_string());
    }

    meta.images.favicon = find_link_href(
        &document,
        &[r#"link[rel="icon"]"#, r#"link[rel="shortcut icon"]"#],
        page_url,
    );
    meta.images.apple_touch_icon = find_link_href(
        &document,
        &[
            r#"link[rel="apple-touch-icon"]"#,
            r#"link[rel="apple-touch-icon-precomposed"]"#,
        ],
        page_url,
    );

    // fixed ordering: primary image first, favicon as last resort
    meta.images.logo = find_logo(&document, page_url)
        .or_else(|| meta.images.image.clone())
        .or_else(|| meta.images.favicon.clone());

    meta
}
