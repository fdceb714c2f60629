//! Curated, process-wide domain tables. Loaded once, never mutated.

use url::Url;

use crate::metadata::types::PageMetadata;
use crate::scrape::blocked;

/// Hostnames that only ever redirect; resolved once before the quality loop.
pub const SHORTENERS: &[&str] = &[
    "bit.ly",
    "t.co",
    "tinyurl.com",
    "goo.gl",
    "ow.ly",
    "buff.ly",
    "is.gd",
    "cutt.ly",
    "rebrand.ly",
    "tiny.cc",
    "lnkd.in",
    "shorturl.at",
    "rb.gy",
];

/// Domains that serve an empty shell to static clients and require a real
/// browser engine to produce content.
pub const RENDER_REQUIRED: &[&str] = &[
    "twitter.com",
    "x.com",
    "instagram.com",
    "facebook.com",
    "threads.net",
    "linkedin.com",
];

/// Domains known to serve block pages with HTTP 200. A block-token body from
/// one of these forces a retry even when the status looks fine.
pub const HOSTILE: &[&str] = &[
    "amazon.com",
    "amazon.co.uk",
    "amazon.de",
    "amazon.in",
    "amazon.ca",
    "flipkart.com",
    "ticketmaster.com",
];

fn host_matches(host: &str, entry: &str) -> bool {
    host == entry || host.ends_with(&format!(".{entry}"))
}

fn host_in(host: &str, list: &[&str]) -> bool {
    list.iter().any(|entry| host_matches(host, entry))
}

pub fn is_shortener(host: &str) -> bool {
    host_in(host, SHORTENERS)
}

pub fn requires_rendering(host: &str) -> bool {
    host_in(host, RENDER_REQUIRED)
}

pub fn is_hostile(host: &str) -> bool {
    host_in(host, HOSTILE)
}

/// Per-platform validator for e-commerce product pages. A plain "we got some
/// metadata" check is not enough for these: retailers serve shell pages with
/// a title but a placeholder image, so each platform declares what a real
/// product page must contain.
pub struct ProductPlatform {
    pub name: &'static str,
    pub hosts: &'static [&'static str],
    /// URL path fragments that mark a product page on this platform.
    pub product_paths: &'static [&'static str],
    /// Markup fragments a rendered product page is expected to contain.
    pub price_markers: &'static [&'static str],
    /// The primary image must be hosted on one of these CDNs.
    pub image_cdn_hosts: &'static [&'static str],
}

pub static PRODUCT_PLATFORMS: &[ProductPlatform] = &[
    ProductPlatform {
        name: "amazon",
        hosts: &[
            "amazon.com",
            "amazon.co.uk",
            "amazon.de",
            "amazon.in",
            "amazon.ca",
            "amazon.fr",
            "amazon.es",
            "amazon.it",
            "amazon.co.jp",
        ],
        product_paths: &["/dp/", "/gp/product/"],
        price_markers: &["a-price", "priceblock", "corePrice"],
        image_cdn_hosts: &["media-amazon.com", "ssl-images-amazon.com"],
    },
    ProductPlatform {
        name: "flipkart",
        hosts: &["flipkart.com"],
        product_paths: &["/p/"],
        price_markers: &["₹", "_30jeq3"],
        image_cdn_hosts: &["rukminim1.flixcart.com", "rukminim2.flixcart.com"],
    },
];

impl ProductPlatform {
    pub fn matches_host(&self, host: &str) -> bool {
        host_in(host, self.hosts)
    }

    pub fn is_product_url(&self, url: &Url) -> bool {
        let path = url.path();
        self.product_paths.iter().any(|p| path.contains(p))
    }

    /// Stricter acceptability check: a usable title, a price marker in the
    /// markup, and a primary image served from the platform's own CDN.
    pub fn sanity_check(&self, html: &str, meta: &PageMetadata) -> bool {
        let title_ok = meta
            .title
            .as_deref()
            .map(|t| !t.trim().is_empty() && !blocked::text_blockish(t))
            .unwrap_or(false);

        let price_ok = self.price_markers.iter().any(|m| html.contains(m));

        let image_ok = meta
            .images
            .image
            .as_deref()
            .and_then(|raw| Url::parse(raw).ok())
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .map(|host| self.image_cdn_hosts.iter().any(|cdn| host_matches(&host, cdn)))
            .unwrap_or(false);

        title_ok && price_ok && image_ok
    }
}

/// Returns the validator whose host matches and whose URL shape marks a
/// product page, if any.
pub fn product_platform_for(url: &Url) -> Option<&'static ProductPlatform> {
    let host = url.host_str()?;
    PRODUCT_PLATFORMS
        .iter()
        .find(|platform| platform.matches_host(host) && platform.is_product_url(url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::ImageSet;

    #[test]
    fn test_shortener_membership() {
        assert!(is_shortener("bit.ly"));
        assert!(is_shortener("t.co"));
        assert!(!is_shortener("example.com"));
        // suffix matching must not over-match
        assert!(!is_shortener("notbit.ly.example.com"));
    }

    #[test]
    fn test_render_required_subdomains() {
        assert!(requires_rendering("www.instagram.com"));
        assert!(requires_rendering("x.com"));
        assert!(!requires_rendering("example.com"));
    }

    #[test]
    fn test_product_platform_detection() {
        let url = Url::parse("https://www.amazon.com/dp/B08N5WRWNW").unwrap();
        let platform = product_platform_for(&url).unwrap();
        assert_eq!(platform.name, "amazon");

        let non_product = Url::parse("https://www.amazon.com/gp/help/customer").unwrap();
        assert!(product_platform_for(&non_product).is_none());

        let other = Url::parse("https://example.com/dp/B08N5WRWNW").unwrap();
        assert!(product_platform_for(&other).is_none());
    }

    #[test]
    fn test_sanity_check_requires_cdn_image() {
        let platform = &PRODUCT_PLATFORMS[0];
        let html = r#"<div class="a-price">$29.99</div>"#;

        let mut meta = PageMetadata {
            title: Some("Anker USB C Charger".to_string()),
            description: None,
            images: ImageSet::default(),
        };

        // no image at all
        assert!(!platform.sanity_check(html, &meta));

        // image on a foreign host
        meta.images.image = Some("https://cdn.example.com/x.jpg".to_string());
        assert!(!platform.sanity_check(html, &meta));

        // image on the platform CDN
        meta.images.image = Some("https://m.media-amazon.com/images/I/x.jpg".to_string());
        assert!(platform.sanity_check(html, &meta));

        // block-ish title fails even with a good image
        meta.title = Some("Sorry, access denied".to_string());
        assert!(!platform.sanity_check(html, &meta));
    }

    #[test]
    fn test_sanity_check_requires_price_marker() {
        let platform = &PRODUCT_PLATFORMS[0];
        let meta = PageMetadata {
            title: Some("Anker USB C Charger".to_string()),
            description: None,
            images: ImageSet {
                image: Some("https://m.media-amazon.com/images/I/x.jpg".to_string()),
                ..Default::default()
            },
        };
        assert!(!platform.sanity_check("<html><body>robot check</body></html>", &meta));
    }
}
