//! The quality-gated retrieval loop. A single successful HTTP exchange can
//! still return unusable content (an anti-bot shell with HTTP 200), so the
//! orchestrator is wrapped in an outer loop that re-fetches, escalates to a
//! rendered fetch, consults platform endpoints and only stops when the
//! extracted metadata is judged sufficient or the attempt budget runs out.

pub mod extract;
pub mod platforms;
pub mod types;

use chrono::Utc;
use reqwest::Method;
use std::sync::Arc;
use url::Url;

use crate::classify;
use crate::config::Config;
use crate::domains;
use crate::errors::FetchError;
use crate::scrape::{self, FetchAttempt, PageRenderer, RetrievalSession};
use types::{FetchRequest, FetchResponse, PageMetadata, ResponseMeta};

/// Normalize and validate the caller-supplied URL. Protocol-relative URLs
/// are upgraded to https.
pub fn parse_target_url(raw: &str) -> Result<Url, FetchError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FetchError::input("url is required"));
    }

    let raw = if raw.starts_with("//") {
        format!("https:{raw}")
    } else {
        raw.to_string()
    };

    Url::parse(&raw).map_err(|e| FetchError::input(format!("invalid url '{raw}': {e}")))
}

pub fn parse_method(raw: Option<&str>) -> Result<Method, FetchError> {
    let raw = match raw {
        None => return Ok(Method::GET),
        Some(r) if r.trim().is_empty() => return Ok(Method::GET),
        Some(r) => r.trim().to_uppercase(),
    };

    match raw.as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "DELETE" => Ok(Method::DELETE),
        "PATCH" => Ok(Method::PATCH),
        "HEAD" => Ok(Method::HEAD),
        other => Err(FetchError::input(format!("unsupported method '{other}'"))),
    }
}

fn accepts_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Escalate to a rendered fetch when extraction came up empty AND something
/// suggests a real browser would do better.
pub fn should_escalate(url: &Url, html: &str, meta: &PageMetadata, blocked: bool) -> bool {
    if scrape::meta_looks_ok(meta) {
        return false;
    }

    if blocked {
        return true;
    }

    let host = url.host_str().unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host);
    if domains::requires_rendering(host) {
        return true;
    }

    if let Some(platform) = domains::product_platform_for(url) {
        if !platform.sanity_check(html, meta) {
            return true;
        }
    }

    false
}

/// Final acceptability for one quality attempt. Recognized product pages are
/// held to the stricter per-platform check; everything else just needs
/// useful metadata, which also rules out blocked-with-nothing-extracted.
pub fn is_acceptable(url: &Url, html: &str, meta: &PageMetadata) -> bool {
    if let Some(platform) = domains::product_platform_for(url) {
        return platform.sanity_check(html, meta);
    }

    meta.is_useful()
}

fn synthetic_rendered_attempt(prior: &FetchAttempt, html: String) -> FetchAttempt {
    FetchAttempt {
        status: reqwest::StatusCode::OK,
        status_text: "OK".to_string(),
        headers: reqwest::header::HeaderMap::new(),
        body: html,
        elapsed_ms: prior.elapsed_ms,
        attempt: prior.attempt,
        final_url: prior.final_url.clone(),
    }
}

struct EnvelopeInput<'a> {
    requested_url: &'a str,
    session: &'a RetrievalSession,
    method: &'a Method,
    attempt: &'a FetchAttempt,
    meta: Option<&'a PageMetadata>,
    html: Option<&'a str>,
    blocked: bool,
    /// Usefulness judged before the favicon backfill; a guessed
    /// `/favicon.ico` must not turn a failed scrape into a success.
    useful: bool,
}

fn build_envelope(input: EnvelopeInput<'_>) -> FetchResponse {
    let EnvelopeInput {
        requested_url,
        session,
        method,
        attempt,
        meta,
        html,
        blocked,
        useful,
    } = input;

    let success = (attempt.status.is_success() && !blocked) || useful;

    let (status, status_text) = if success {
        (200, "OK".to_string())
    } else {
        (attempt.status.as_u16(), attempt.status_text.clone())
    };

    let current = session.current_url();
    let link_type = classify::classify(
        current,
        meta.and_then(|m| m.title.as_deref()),
        meta.and_then(|m| m.description.as_deref()),
        html,
    );

    FetchResponse {
        success,
        url: requested_url.to_string(),
        resolved_url: session.resolved_url.as_ref().map(|u| u.to_string()),
        method: method.to_string(),
        status,
        status_text,
        link_type,
        metadata: Some(ResponseMeta {
            domain: attempt.final_url.host_str().map(|h| h.to_string()),
            status_code: attempt.status.as_u16(),
            status_text: attempt.status_text.clone(),
            method: method.to_string(),
            content_type: attempt.content_type(),
            response_time_ms: attempt.elapsed_ms,
            attempt: attempt.attempt,
        }),
        images: meta.map(|m| m.images.clone()),
        title: meta.and_then(|m| m.title.clone()),
        description: meta.and_then(|m| m.description.clone()),
        error: None,
        attempt: session.total_attempts,
        timestamp: Utc::now(),
    }
}

fn failure_envelope(requested_url: &str, method: &Method, error: &FetchError, attempts: u32) -> FetchResponse {
    let link_type = Url::parse(requested_url)
        .map(|u| classify::classify(&u, None, None, None))
        .unwrap_or(classify::LinkType::Other);

    FetchResponse {
        success: false,
        url: requested_url.to_string(),
        resolved_url: None,
        method: method.to_string(),
        status: 502,
        status_text: "Bad Gateway".to_string(),
        link_type,
        metadata: None,
        images: None,
        title: None,
        description: None,
        error: Some(error.to_string()),
        attempt: attempts,
        timestamp: Utc::now(),
    }
}

async fn render_page(
    renderer: Arc<dyn PageRenderer>,
    url: &Url,
) -> anyhow::Result<String> {
    let url = url.to_string();
    let rendered = tokio::task::spawn_blocking(move || renderer.render(&url))
        .await
        .map_err(|e| anyhow::anyhow!("render task panicked: {e}"))??;
    Ok(rendered.html)
}

/// The primary operation: fetch a URL with retries, extract metadata, and
/// return the caller-facing envelope. Only invalid input surfaces as Err;
/// upstream failures come back as an unsuccessful envelope.
pub async fn fetch_and_extract(
    config: &Config,
    renderer: Arc<dyn PageRenderer>,
    request: FetchRequest,
) -> Result<FetchResponse, FetchError> {
    let requested_url = request.url.clone();
    let target = parse_target_url(&requested_url)?;
    let method = parse_method(request.method.as_deref())?;
    let headers = request.headers.unwrap_or_default();
    let body = if accepts_body(&method) {
        request.body
    } else {
        None
    };

    let mut session = RetrievalSession::new(target.clone());

    if let Some(host) = target.host_str() {
        if domains::is_shortener(host) {
            session.resolved_url = scrape::resolve_redirect(config, &target).await;
        }
    }

    let quality_attempts = config.fetch.quality_attempts;
    let mut last: Option<(FetchAttempt, Option<PageMetadata>, bool, bool)> = None;

    for q in 0..quality_attempts {
        session.quality_attempt = q + 1;
        if q > 0 {
            let delay = scrape::backoff_delay(&config.fetch, q - 1);
            log::debug!(
                "{requested_url}: quality attempt {} after {}ms",
                q + 1,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }

        let current = session.current_url().clone();
        let mut attempt = match scrape::fetch_with_retries(
            config,
            &mut session,
            &current,
            &method,
            &headers,
            body.as_deref(),
        )
        .await
        {
            Ok(a) => a,
            Err(err @ FetchError::Input(_)) => return Err(err),
            Err(err) => {
                log::warn!("{requested_url}: retrieval failed: {err}");
                return Ok(failure_envelope(
                    &requested_url,
                    &method,
                    &err,
                    session.total_attempts,
                ));
            }
        };

        let html_like = scrape::is_html_like(attempt.content_type().as_deref(), &attempt.body);

        if !html_like {
            // non-HTML content is not subject to quality gating
            let blocked = scrape::blocked::looks_blocked(&attempt.body);
            return Ok(build_envelope(EnvelopeInput {
                requested_url: &requested_url,
                session: &session,
                method: &method,
                attempt: &attempt,
                meta: None,
                html: None,
                blocked,
                useful: false,
            }));
        }

        let mut meta = extract::extract_page(&attempt.body, &attempt.final_url);
        let mut blocked = scrape::blocked::looks_blocked(&attempt.body);

        if should_escalate(&current, &attempt.body, &meta, blocked) && renderer.available() {
            log::info!("{requested_url}: escalating to rendered fetch");
            session.total_attempts += 1;
            match render_page(renderer.clone(), &current).await {
                Ok(html) => {
                    attempt = synthetic_rendered_attempt(&attempt, html);
                    attempt.attempt = session.total_attempts;
                    meta = extract::extract_page(&attempt.body, &attempt.final_url);
                    blocked = scrape::blocked::looks_blocked(&attempt.body);
                }
                Err(err) => log::warn!("{requested_url}: rendered fetch failed: {err}"),
            }
        }

        if let Some(platform) = platforms::platform_for(&current) {
            if platform.looks_generic(&meta) {
                match platform.resolve(&current).await {
                    Ok(remote) => platform.merge(&mut meta, remote),
                    Err(err) => {
                        log::warn!("{requested_url}: platform resolver failed: {err}")
                    }
                }
            }
        }

        let acceptable = is_acceptable(&current, &attempt.body, &meta);
        let useful = meta.is_useful();

        // presentation-only backfill, judged after acceptability
        if meta.images.favicon.is_none() {
            if let Some(host) = attempt.final_url.host_str() {
                meta.images.favicon =
                    Some(format!("{}://{host}/favicon.ico", attempt.final_url.scheme()));
            }
        }

        if acceptable {
            return Ok(build_envelope(EnvelopeInput {
                requested_url: &requested_url,
                session: &session,
                method: &method,
                attempt: &attempt,
                meta: Some(&meta),
                html: Some(attempt.body.as_str()),
                blocked,
                useful,
            }));
        }

        log::debug!(
            "{requested_url}: quality attempt {} insufficient (blocked={blocked})",
            q + 1
        );
        last = Some((attempt, Some(meta), blocked, useful));
    }

    // budget exhausted; surface the best we have
    let (attempt, meta, blocked, useful) = match last {
        Some(t) => t,
        None => {
            return Ok(failure_envelope(
                &requested_url,
                &method,
                &FetchError::input("no quality attempts configured"),
                0,
            ))
        }
    };

    Ok(build_envelope(EnvelopeInput {
        requested_url: &requested_url,
        session: &session,
        method: &method,
        attempt: &attempt,
        meta: meta.as_ref(),
        html: Some(&attempt.body),
        blocked,
        useful,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::{NoopRenderer, RenderedPage};
    use wiremock::matchers::{method as http_method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Always-available renderer returning a fixed document.
    struct FixedRenderer(&'static str);

    impl PageRenderer for FixedRenderer {
        fn available(&self) -> bool {
            true
        }

        fn render(&self, _url: &str) -> anyhow::Result<RenderedPage> {
            Ok(RenderedPage {
                html: self.0.to_string(),
            })
        }
    }

    struct FailingRenderer;

    impl PageRenderer for FailingRenderer {
        fn available(&self) -> bool {
            true
        }

        fn render(&self, _url: &str) -> anyhow::Result<RenderedPage> {
            anyhow::bail!("browser crashed")
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.fetch.max_retries = 2;
        config.fetch.quality_attempts = 2;
        config.fetch.backoff_base_ms = 1;
        config.fetch.backoff_cap_ms = 5;
        config.scrape.block_private_ips = false;
        config
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_parse_target_url() {
        assert!(parse_target_url("").is_err());
        assert!(parse_target_url("   ").is_err());
        assert!(parse_target_url("not a url").is_err());

        // protocol-relative upgrade
        let upgraded = parse_target_url("//example.com/page").unwrap();
        assert_eq!(upgraded.scheme(), "https");
        assert_eq!(upgraded.host_str(), Some("example.com"));

        let plain = parse_target_url("http://example.com/").unwrap();
        assert_eq!(plain.scheme(), "http");
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method(None).unwrap(), Method::GET);
        assert_eq!(parse_method(Some("")).unwrap(), Method::GET);
        assert_eq!(parse_method(Some("post")).unwrap(), Method::POST);
        assert_eq!(parse_method(Some("Head")).unwrap(), Method::HEAD);
        assert!(parse_method(Some("TRACE")).is_err());
    }

    #[test]
    fn test_should_escalate() {
        let empty = PageMetadata::default();
        let good = PageMetadata {
            title: Some("a real page".to_string()),
            ..Default::default()
        };
        let plain = url("https://example.com/x");

        // useful metadata never escalates
        assert!(!should_escalate(&plain, "", &good, true));
        // empty + blocked escalates
        assert!(should_escalate(&plain, "", &empty, true));
        // empty alone does not
        assert!(!should_escalate(&plain, "", &empty, false));
        // render-required domain escalates on empty metadata
        assert!(should_escalate(
            &url("https://x.com/user/status/1"),
            "",
            &empty,
            false
        ));
        // product page failing the platform sanity check escalates
        assert!(should_escalate(
            &url("https://www.amazon.com/dp/B000000000"),
            "<html><body>robot check</body></html>",
            &empty,
            false
        ));
    }

    #[test]
    fn test_is_acceptable() {
        let plain = url("https://example.com/x");
        let good = PageMetadata {
            title: Some("something".to_string()),
            ..Default::default()
        };
        assert!(is_acceptable(&plain, "", &good));
        assert!(!is_acceptable(&plain, "", &PageMetadata::default()));

        // product page needs the stricter check even with a title
        let product = url("https://www.amazon.com/dp/B000000000");
        assert!(!is_acceptable(&product, "<html></html>", &good));

        let mut product_meta = PageMetadata {
            title: Some("Anker Charger".to_string()),
            ..Default::default()
        };
        product_meta.images.image =
            Some("https://m.media-amazon.com/images/I/x.jpg".to_string());
        assert!(is_acceptable(
            &product,
            r#"<div class="a-price">$29.99</div>"#,
            &product_meta
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_success_envelope() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(path("/article"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                concat!(
                    "<html><head>",
                    r#"<title>Ferris ships</title>"#,
                    r#"<meta name="description" content="A short tale">"#,
                    r#"<meta property="og:image" content="/hero.jpg">"#,
                    "</head><body></body></html>",
                ),
                "text/html",
            ))
            .mount(&server)
            .await;

        let config = test_config();
        let target = format!("{}/article", server.uri());
        let response = fetch_and_extract(
            &config,
            Arc::new(NoopRenderer),
            FetchRequest {
                url: target.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(response.success);
        assert_eq!(response.status, 200);
        assert_eq!(response.url, target);
        assert_eq!(response.title.as_deref(), Some("Ferris ships"));
        assert_eq!(response.description.as_deref(), Some("A short tale"));

        let images = response.images.unwrap();
        assert_eq!(
            images.image.as_deref(),
            Some(format!("{}/hero.jpg", server.uri()).as_str())
        );
        // favicon backfilled from the origin
        assert_eq!(
            images.favicon.as_deref(),
            Some(format!("{}/favicon.ico", server.uri()).as_str())
        );

        let meta = response.metadata.unwrap();
        assert_eq!(meta.status_code, 200);
        assert_eq!(meta.method, "GET");
        assert!(response.attempt >= 1);
    }

    #[tokio::test]
    async fn test_envelope_serializes_camel_case() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "<html><head><title>plain page here</title></head></html>",
                "text/html",
            ))
            .mount(&server)
            .await;

        let config = test_config();
        let response = fetch_and_extract(
            &config,
            Arc::new(NoopRenderer),
            FetchRequest {
                url: format!("{}/p", server.uri()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("linkType").is_some());
        assert!(json.get("statusText").is_some());
        let meta = json.get("metadata").unwrap();
        assert!(meta.get("statusCode").is_some());
        assert!(meta.get("responseTimeMs").is_some());
    }

    #[tokio::test]
    async fn test_escalation_replaces_block_page_with_rendered_content() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "<html><body>Access denied. Complete the captcha to continue.</body></html>",
                "text/html",
            ))
            .mount(&server)
            .await;

        let config = test_config();
        let renderer = Arc::new(FixedRenderer(concat!(
            "<html><head>",
            "<title>Rendered just fine</title>",
            r#"<meta property="og:image" content="https://cdn.example.com/r.jpg">"#,
            "</head></html>",
        )));

        let response = fetch_and_extract(
            &config,
            renderer,
            FetchRequest {
                url: format!("{}/wall", server.uri()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // metadata comes from the rendered document, not the block page
        assert!(response.success);
        assert_eq!(response.title.as_deref(), Some("Rendered just fine"));
        assert_eq!(
            response.images.unwrap().image.as_deref(),
            Some("https://cdn.example.com/r.jpg")
        );
        // two blocked HTTP attempts plus the rendered fetch
        assert_eq!(response.attempt, 3);
        assert_eq!(response.metadata.unwrap().attempt, 3);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_render_failure_keeps_static_result() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "<html><body>Access denied. Complete the captcha to continue.</body></html>",
                "text/html",
            ))
            .mount(&server)
            .await;

        let config = test_config();
        let response = fetch_and_extract(
            &config,
            Arc::new(FailingRenderer),
            FetchRequest {
                url: format!("{}/wall", server.uri()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // render errors are logged and swallowed; the static block page is
        // what finally comes back, unsuccessful but intact
        assert!(!response.success);
        assert!(response.title.is_none());
        assert!(response.error.is_none());
        // 2 quality attempts x (2 HTTP retries + 1 failed render)
        assert_eq!(response.attempt, 6);
        assert_eq!(server.received_requests().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_unusable_content_exhausts_quality_budget() {
        let server = MockServer::start().await;
        // never blocked, never useful: quality loop must run to its limit
        Mock::given(http_method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "<html><head></head><body><p>nothing to see</p></body></html>",
                "text/html",
            ))
            .mount(&server)
            .await;

        let config = test_config();
        let response = fetch_and_extract(
            &config,
            Arc::new(NoopRenderer),
            FetchRequest {
                url: format!("{}/empty", server.uri()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // favicon backfill makes the final envelope carry images, but the
        // page itself never became acceptable before the budget ran out
        assert_eq!(
            server.received_requests().await.unwrap().len() as u32,
            config.fetch.quality_attempts
        );
        assert!(response.title.is_none());
        assert!(response.description.is_none());
    }

    #[tokio::test]
    async fn test_non_html_returns_immediately() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"ok":true}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let config = test_config();
        let response = fetch_and_extract(
            &config,
            Arc::new(NoopRenderer),
            FetchRequest {
                url: format!("{}/data.json", server.uri()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(response.success);
        assert!(response.title.is_none());
        assert!(response.images.is_none());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_envelope() {
        let config = test_config();
        let response = fetch_and_extract(
            &config,
            Arc::new(NoopRenderer),
            FetchRequest {
                url: "http://127.0.0.1:9/".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(!response.success);
        assert_eq!(response.url, "http://127.0.0.1:9/");
        assert!(response.error.is_some());
        assert!(response.metadata.is_none());
    }

    #[tokio::test]
    async fn test_invalid_input_is_an_error() {
        let config = test_config();
        let result = fetch_and_extract(
            &config,
            Arc::new(NoopRenderer),
            FetchRequest {
                url: String::new(),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(FetchError::Input(_))));

        let result = fetch_and_extract(
            &config,
            Arc::new(NoopRenderer),
            FetchRequest {
                url: "https://example.com/".to_string(),
                method: Some("TRACE".to_string()),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(FetchError::Input(_))));
    }

    #[tokio::test]
    async fn test_upstream_status_surfaced_on_failure() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_raw(
                "<html><head></head><body>gone</body></html>",
                "text/html",
            ))
            .mount(&server)
            .await;

        let config = test_config();
        let response = fetch_and_extract(
            &config,
            Arc::new(NoopRenderer),
            FetchRequest {
                url: format!("{}/missing", server.uri()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(!response.success);
        assert_eq!(response.status, 404);
        assert_eq!(response.status_text, "Not Found");
    }

    #[test]
    fn test_failure_envelope_shape() {
        let err = FetchError::Transport {
            attempts: 5,
            message: "connection refused".to_string(),
        };
        let envelope = failure_envelope("https://example.com/x", &Method::GET, &err, 5);
        assert!(!envelope.success);
        assert_eq!(envelope.status, 502);
        assert_eq!(envelope.attempt, 5);
        assert!(envelope.error.unwrap().contains("connection refused"));
        assert!(envelope.images.is_none());
    }
}
