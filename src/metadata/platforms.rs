//! Platform metadata fallback. Certain media platforms serve shell pages to
//! static clients but expose an oEmbed endpoint that returns real metadata;
//! when the local scrape looks like platform boilerplate, ask the endpoint
//! and merge its answer in without regressing anything specific we already
//! extracted.

use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::types::PageMetadata;

const OEMBED_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Platform {
    pub name: &'static str,
    hosts: &'static [&'static str],
    oembed_endpoint: &'static str,
    pub default_favicon: &'static str,
    /// Boilerplate titles the platform serves on shell pages.
    generic_titles: &'static [&'static str],
}

pub static PLATFORMS: &[Platform] = &[
    Platform {
        name: "youtube",
        hosts: &["youtube.com", "youtu.be"],
        oembed_endpoint: "https://www.youtube.com/oembed",
        default_favicon: "https://www.youtube.com/favicon.ico",
        generic_titles: &["youtube", "- youtube", "youtube - youtube"],
    },
    Platform {
        name: "vimeo",
        hosts: &["vimeo.com", "player.vimeo.com"],
        oembed_endpoint: "https://vimeo.com/api/oembed.json",
        default_favicon: "https://vimeo.com/favicon.ico",
        generic_titles: &["vimeo", "vimeo | the world's only all-in-one video solution"],
    },
];

pub fn platform_for(url: &Url) -> Option<&'static Platform> {
    let host = url.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    PLATFORMS.iter().find(|p| {
        p.hosts
            .iter()
            .any(|entry| host == *entry || host.ends_with(&format!(".{entry}")))
    })
}

#[derive(Debug, Deserialize)]
struct OembedResponse {
    title: Option<String>,
    author_name: Option<String>,
    provider_name: Option<String>,
    thumbnail_url: Option<String>,
    description: Option<String>,
}

fn oembed_to_metadata(oembed: OembedResponse, default_favicon: &str) -> PageMetadata {
    // prefer the real title; fall back to "author - provider"
    let title = oembed.title.or_else(|| {
        match (&oembed.author_name, &oembed.provider_name) {
            (Some(author), Some(provider)) => Some(format!("{author} - {provider}")),
            (Some(author), None) => Some(author.clone()),
            (None, Some(provider)) => Some(provider.clone()),
            (None, None) => None,
        }
    });

    let mut meta = PageMetadata {
        title,
        description: oembed.description,
        ..Default::default()
    };
    meta.images.image = oembed.thumbnail_url;
    meta.images.favicon = Some(default_favicon.to_string());
    meta
}

async fn fetch_oembed(endpoint: &str, target: &Url) -> anyhow::Result<OembedResponse> {
    let client = reqwest::Client::builder()
        .timeout(OEMBED_TIMEOUT)
        .build()?;

    let response = client
        .get(endpoint)
        .query(&[("url", target.as_str()), ("format", "json")])
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("oEmbed endpoint returned status {}", response.status());
    }

    Ok(response.json().await?)
}

impl Platform {
    pub fn is_generic_title(&self, title: &str) -> bool {
        let title = title.trim().to_lowercase();
        self.generic_titles.iter().any(|g| title == *g)
    }

    /// The local scrape captured a shell page: missing or boilerplate title,
    /// or no primary image at all.
    pub fn looks_generic(&self, meta: &PageMetadata) -> bool {
        let title_generic = match meta.title.as_deref() {
            None => true,
            Some(t) => t.trim().is_empty() || self.is_generic_title(t),
        };
        title_generic || meta.images.image.is_none()
    }

    pub async fn resolve(&self, target: &Url) -> anyhow::Result<PageMetadata> {
        log::debug!("{}: querying oEmbed endpoint for {target}", self.name);
        let oembed = fetch_oembed(self.oembed_endpoint, target).await?;
        Ok(oembed_to_metadata(oembed, self.default_favicon))
    }

    /// A local field is replaced only when absent or generic; images are
    /// filled only where the scrape left them empty.
    pub fn merge(&self, local: &mut PageMetadata, platform: PageMetadata) {
        let title_replaceable = match local.title.as_deref() {
            None => true,
            Some(t) => t.trim().is_empty() || self.is_generic_title(t),
        };
        if title_replaceable {
            if let Some(title) = platform.title {
                local.title = Some(title);
            }
        }

        if local
            .description
            .as_deref()
            .map(|d| d.trim().is_empty())
            .unwrap_or(true)
        {
            if let Some(description) = platform.description {
                local.description = Some(description);
            }
        }

        if local.images.image.is_none() {
            local.images.image = platform.images.image;
        }
        if local.images.favicon.is_none() {
            local.images.favicon = platform.images.favicon;
        }
        if local.images.logo.is_none() {
            local.images.logo = platform.images.logo;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_platform_recognition() {
        assert_eq!(
            platform_for(&url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"))
                .unwrap()
                .name,
            "youtube"
        );
        assert_eq!(
            platform_for(&url("https://youtu.be/dQw4w9WgXcQ")).unwrap().name,
            "youtube"
        );
        assert_eq!(
            platform_for(&url("https://vimeo.com/123456789")).unwrap().name,
            "vimeo"
        );
        assert!(platform_for(&url("https://example.com/watch")).is_none());
    }

    #[test]
    fn test_generic_detection() {
        let yt = platform_for(&url("https://youtube.com/watch?v=x")).unwrap();

        assert!(yt.is_generic_title("YouTube"));
        assert!(yt.is_generic_title("  - YouTube "));
        assert!(!yt.is_generic_title("Crab Rave - YouTube video"));

        let shell = PageMetadata {
            title: Some("YouTube".to_string()),
            ..Default::default()
        };
        assert!(yt.looks_generic(&shell));

        // real title but no image still counts as generic
        let no_image = PageMetadata {
            title: Some("Crab Rave".to_string()),
            ..Default::default()
        };
        assert!(yt.looks_generic(&no_image));

        let mut complete = no_image.clone();
        complete.images.image = Some("https://i.ytimg.com/vi/x/hq720.jpg".to_string());
        assert!(!yt.looks_generic(&complete));
    }

    #[test]
    fn test_oembed_title_fallback_chain() {
        let with_title = OembedResponse {
            title: Some("Crab Rave".to_string()),
            author_name: Some("Noisestorm".to_string()),
            provider_name: Some("YouTube".to_string()),
            thumbnail_url: None,
            description: None,
        };
        assert_eq!(
            oembed_to_metadata(with_title, "https://x/f.ico").title.as_deref(),
            Some("Crab Rave")
        );

        let author_only = OembedResponse {
            title: None,
            author_name: Some("Noisestorm".to_string()),
            provider_name: Some("YouTube".to_string()),
            thumbnail_url: None,
            description: None,
        };
        assert_eq!(
            oembed_to_metadata(author_only, "https://x/f.ico").title.as_deref(),
            Some("Noisestorm - YouTube")
        );
    }

    #[test]
    fn test_merge_never_regresses_specific_values() {
        let yt = platform_for(&url("https://youtube.com/watch?v=x")).unwrap();

        let mut local = PageMetadata {
            title: Some("A real scraped title".to_string()),
            description: Some("scraped description".to_string()),
            ..Default::default()
        };
        local.images.image = Some("https://scraped.example/img.jpg".to_string());

        let mut platform = PageMetadata {
            title: Some("Platform title".to_string()),
            description: Some("platform description".to_string()),
            ..Default::default()
        };
        platform.images.image = Some("https://i.ytimg.com/vi/x/hq720.jpg".to_string());
        platform.images.favicon = Some("https://www.youtube.com/favicon.ico".to_string());

        yt.merge(&mut local, platform);

        assert_eq!(local.title.as_deref(), Some("A real scraped title"));
        assert_eq!(local.description.as_deref(), Some("scraped description"));
        assert_eq!(local.images.image.as_deref(), Some("https://scraped.example/img.jpg"));
        // empty slots are filled
        assert_eq!(
            local.images.favicon.as_deref(),
            Some("https://www.youtube.com/favicon.ico")
        );
    }

    #[test]
    fn test_merge_replaces_generic_title() {
        let yt = platform_for(&url("https://youtube.com/watch?v=x")).unwrap();

        let mut local = PageMetadata {
            title: Some("YouTube".to_string()),
            ..Default::default()
        };
        let platform = PageMetadata {
            title: Some("Crab Rave".to_string()),
            ..Default::default()
        };
        yt.merge(&mut local, platform);
        assert_eq!(local.title.as_deref(), Some("Crab Rave"));
    }

    mod endpoint {
        use super::*;
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[tokio::test]
        async fn test_fetch_oembed_maps_fields() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/oembed"))
                .and(query_param("format", "json"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "type": "video",
                    "title": "Crab Rave",
                    "author_name": "Noisestorm",
                    "provider_name": "YouTube",
                    "thumbnail_url": "https://i.ytimg.com/vi/x/hq720.jpg"
                })))
                .mount(&server)
                .await;

            let endpoint = format!("{}/oembed", server.uri());
            let target = url("https://www.youtube.com/watch?v=x");
            let oembed = fetch_oembed(&endpoint, &target).await.unwrap();

            let meta = oembed_to_metadata(oembed, "https://www.youtube.com/favicon.ico");
            assert_eq!(meta.title.as_deref(), Some("Crab Rave"));
            assert_eq!(
                meta.images.image.as_deref(),
                Some("https://i.ytimg.com/vi/x/hq720.jpg")
            );
            assert_eq!(
                meta.images.favicon.as_deref(),
                Some("https://www.youtube.com/favicon.ico")
            );
        }

        #[tokio::test]
        async fn test_fetch_oembed_non_success_is_error() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&server)
                .await;

            let endpoint = format!("{}/oembed", server.uri());
            let target = url("https://www.youtube.com/watch?v=x");
            assert!(fetch_oembed(&endpoint, &target).await.is_err());
        }
    }
}
