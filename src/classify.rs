//! Coarse content classification. Deterministic, priority-ordered: exact
//! domain membership, then URL path shape, then title/description keywords,
//! then body markers. First matching rule wins.

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Social,
    Product,
    News,
    Video,
    Portfolio,
    Blog,
    Education,
    Forum,
    Other,
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkType::Social => "social",
            LinkType::Product => "product",
            LinkType::News => "news",
            LinkType::Video => "video",
            LinkType::Portfolio => "portfolio",
            LinkType::Blog => "blog",
            LinkType::Education => "education",
            LinkType::Forum => "forum",
            LinkType::Other => "other",
        };
        f.write_str(s)
    }
}

static SOCIAL_DOMAINS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "threads.net",
    "tiktok.com",
    "pinterest.com",
    "snapchat.com",
    "mastodon.social",
    "bsky.app",
];

static VIDEO_DOMAINS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "vimeo.com",
    "dailymotion.com",
    "twitch.tv",
];

static NEWS_DOMAINS: &[&str] = &[
    "bbc.com",
    "bbc.co.uk",
    "cnn.com",
    "nytimes.com",
    "theguardian.com",
    "reuters.com",
    "apnews.com",
    "washingtonpost.com",
    "aljazeera.com",
    "bloomberg.com",
];

static PRODUCT_DOMAINS: &[&str] = &[
    "amazon.com",
    "amazon.co.uk",
    "amazon.de",
    "amazon.in",
    "flipkart.com",
    "ebay.com",
    "etsy.com",
    "aliexpress.com",
    "walmart.com",
    "bestbuy.com",
];

static EDUCATION_DOMAINS: &[&str] = &[
    "coursera.org",
    "udemy.com",
    "edx.org",
    "khanacademy.org",
    "wikipedia.org",
    "mit.edu",
    "stanford.edu",
];

static FORUM_DOMAINS: &[&str] = &[
    "reddit.com",
    "news.ycombinator.com",
    "stackoverflow.com",
    "stackexchange.com",
    "quora.com",
    "discourse.org",
];

static PATH_RULES: &[(&str, LinkType)] = &[
    ("/shop", LinkType::Product),
    ("/store", LinkType::Product),
    ("/product", LinkType::Product),
    ("/cart", LinkType::Product),
    ("/watch", LinkType::Video),
    ("/video", LinkType::Video),
    ("/blog", LinkType::Blog),
    ("/article", LinkType::News),
    ("/news", LinkType::News),
    ("/course", LinkType::Education),
    ("/forum", LinkType::Forum),
    ("/thread", LinkType::Forum),
    ("/portfolio", LinkType::Portfolio),
];

static KEYWORD_RULES: &[(&str, LinkType)] = &[
    ("add to cart", LinkType::Product),
    ("buy now", LinkType::Product),
    ("free shipping", LinkType::Product),
    ("breaking news", LinkType::News),
    ("watch now", LinkType::Video),
    ("subscribe to our channel", LinkType::Video),
    ("my portfolio", LinkType::Portfolio),
    ("blog post", LinkType::Blog),
    ("online course", LinkType::Education),
    ("tutorial", LinkType::Education),
    ("discussion", LinkType::Forum),
];

static BODY_RULES: &[(&str, LinkType)] = &[
    ("add-to-cart", LinkType::Product),
    ("product-price", LinkType::Product),
    ("video-player", LinkType::Video),
    ("og:video", LinkType::Video),
    ("article:published_time", LinkType::News),
    ("wp-content", LinkType::Blog),
];

fn domain_in(host: &str, list: &[&str]) -> bool {
    list.iter()
        .any(|entry| host == *entry || host.ends_with(&format!(".{entry}")))
}

fn classify_domain(host: &str) -> Option<LinkType> {
    if domain_in(host, SOCIAL_DOMAINS) {
        return Some(LinkType::Social);
    }
    if domain_in(host, VIDEO_DOMAINS) {
        return Some(LinkType::Video);
    }
    if domain_in(host, NEWS_DOMAINS) {
        return Some(LinkType::News);
    }
    if domain_in(host, PRODUCT_DOMAINS) {
        return Some(LinkType::Product);
    }
    if domain_in(host, EDUCATION_DOMAINS) {
        return Some(LinkType::Education);
    }
    if domain_in(host, FORUM_DOMAINS) {
        return Some(LinkType::Forum);
    }
    None
}

/// Pure function of (url, title, description, html) — no stored state.
pub fn classify(
    url: &Url,
    title: Option<&str>,
    description: Option<&str>,
    html: Option<&str>,
) -> LinkType {
    if let Some(host) = url.host_str() {
        let host = host.strip_prefix("www.").unwrap_or(host);
        if let Some(link_type) = classify_domain(host) {
            return link_type;
        }
    }

    let path = url.path().to_lowercase();
    for (fragment, link_type) in PATH_RULES {
        if path.contains(fragment) {
            return *link_type;
        }
    }

    let text = format!(
        "{} {}",
        title.unwrap_or_default(),
        description.unwrap_or_default()
    )
    .to_lowercase();
    if !text.trim().is_empty() {
        for (keyword, link_type) in KEYWORD_RULES {
            if text.contains(keyword) {
                return *link_type;
            }
        }
    }

    if let Some(html) = html {
        let html = html.to_lowercase();
        for (marker, link_type) in BODY_RULES {
            if html.contains(marker) {
                return *link_type;
            }
        }
    }

    LinkType::Other
}
