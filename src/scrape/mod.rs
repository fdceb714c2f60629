//! The retrying fetch orchestrator: issues a single logical HTTP request as
//! up to N physical attempts, with a fresh browser identity per attempt, a
//! sticky cookie threaded between attempts, and exponential backoff.

pub mod blocked;
#[cfg(feature = "headless")]
pub mod headless;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{Method, StatusCode};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use url::Url;

use crate::config::{Config, FetchConfig, ScrapeConfig};
use crate::domains;
use crate::errors::FetchError;
use crate::identity;
use crate::metadata::extract;

const JITTER_MS: u64 = 1000;

/// Ephemeral per-call state. Created fresh for every caller call and
/// threaded by &mut through the retry and quality loops; never shared
/// across concurrent calls.
#[derive(Debug)]
pub struct RetrievalSession {
    pub target_url: Url,
    pub resolved_url: Option<Url>,
    pub sticky_cookie: Option<String>,
    pub quality_attempt: u32,
    /// Strictly increases across both the inner retry loop and the outer
    /// quality loop; reported to the caller as one monotone integer.
    pub total_attempts: u32,
}

impl RetrievalSession {
    pub fn new(target_url: Url) -> Self {
        Self {
            target_url,
            resolved_url: None,
            sticky_cookie: None,
            quality_attempt: 0,
            total_attempts: 0,
        }
    }

    pub fn current_url(&self) -> &Url {
        self.resolved_url.as_ref().unwrap_or(&self.target_url)
    }
}

/// One physical fetch, HTTP or rendered. Immutable once produced.
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: String,
    pub elapsed_ms: u64,
    pub attempt: u32,
    pub final_url: Url,
}

impl FetchAttempt {
    pub fn content_type(&self) -> Option<String> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }
}

/// A page produced by the escalation path.
pub struct RenderedPage {
    pub html: String,
}

/// Injected capability for the headless-browser escalation. The pipeline
/// checks `available()` instead of failing at load time when no browser
/// engine is present.
pub trait PageRenderer: Send + Sync {
    fn available(&self) -> bool;
    fn render(&self, url: &str) -> anyhow::Result<RenderedPage>;
}

/// Stand-in used when the crate is built without the `headless` feature or
/// escalation is disabled per call.
pub struct NoopRenderer;

impl PageRenderer for NoopRenderer {
    fn available(&self) -> bool {
        false
    }

    fn render(&self, _url: &str) -> anyhow::Result<RenderedPage> {
        anyhow::bail!("headless renderer unavailable")
    }
}

fn is_ip_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

fn is_private_host(host: &str) -> bool {
    use std::net::ToSocketAddrs;

    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_ip_private(&ip);
    }

    if let Ok(addrs) = (host, 80).to_socket_addrs() {
        for addr in addrs {
            if is_ip_private(&addr.ip()) {
                return true;
            }
        }
    }

    false
}

/// SSRF guard: scheme allow-list, blocked hosts, private-IP resolution.
/// Rejections are input errors, never retried.
pub fn validate_url_policy(url: &Url, config: &ScrapeConfig) -> Result<(), FetchError> {
    if !config.allowed_schemes.iter().any(|s| s == url.scheme()) {
        return Err(FetchError::input(format!(
            "URL scheme '{}' not allowed",
            url.scheme()
        )));
    }

    let host = url.host_str().unwrap_or_default();

    if config.blocked_hosts.iter().any(|h| h == host) {
        return Err(FetchError::input(format!("host '{host}' is blocked")));
    }

    if config.block_private_ips && is_private_host(host) {
        return Err(FetchError::input(format!(
            "host '{host}' resolves to a private address"
        )));
    }

    Ok(())
}

/// Backoff before the attempt following failed attempt k (0-based):
/// min(base * 2^k, cap) plus up to a second of jitter.
pub fn backoff_delay(config: &FetchConfig, k: u32) -> Duration {
    let exp = config
        .backoff_base_ms
        .saturating_mul(1u64 << k.min(20))
        .min(config.backoff_cap_ms);
    Duration::from_millis(exp + rand::random::<u64>() % JITTER_MS)
}

/// Relaxed HTML-likeness check. Content types lie, so a tag sniff over the
/// head of the body backs up the declared type.
pub fn is_html_like(content_type: Option<&str>, body: &str) -> bool {
    if let Some(ct) = content_type {
        let ct = ct.to_lowercase();
        if ct.contains("text/html") || ct.contains("xhtml") {
            return true;
        }
    }

    // cut must land on a char boundary or slicing panics
    let mut cut = body.len().min(65536);
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = body[..cut].to_lowercase();
    head.contains("<html") || head.contains("<head") || head.contains("<title")
}

/// Keep only name=value pairs from Set-Cookie headers; attributes like
/// Path/Expires/HttpOnly belong to the jar we deliberately don't have.
pub fn extract_cookie_pairs(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<String> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(|pair| pair.trim().to_string())
        .filter(|pair| pair.contains('='))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

/// Extraction yielded something AND it doesn't read like a block page.
pub fn meta_looks_ok(meta: &crate::metadata::types::PageMetadata) -> bool {
    if !meta.is_useful() {
        return false;
    }
    let title_bad = meta.title.as_deref().map(blocked::text_blockish).unwrap_or(false);
    let desc_bad = meta
        .description
        .as_deref()
        .map(blocked::text_blockish)
        .unwrap_or(false);
    !title_bad && !desc_bad
}

/// The retry-eligibility policy. Transport errors are handled separately
/// (always retried); this decides for completed HTTP exchanges.
pub fn should_retry(status: StatusCode, hostile_hit: bool, blocked_html: bool, meta_ok: bool) -> bool {
    let retriable_status = matches!(status.as_u16(), 403 | 429 | 503);
    retriable_status || hostile_hit || (blocked_html && !meta_ok)
}

fn build_client(
    config: &Config,
    proxy: Option<&str>,
) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.fetch.request_timeout_secs))
        .redirect(reqwest::redirect::Policy::limited(config.fetch.max_redirects))
        .danger_accept_invalid_certs(config.scrape.accept_invalid_certs)
        .danger_accept_invalid_hostnames(config.scrape.accept_invalid_certs);

    if let Some(proxy) = proxy {
        builder = builder.proxy(
            reqwest::Proxy::all(proxy)
                .map_err(|e| FetchError::input(format!("invalid proxy '{proxy}': {e}")))?,
        );
    }

    builder
        .build()
        .map_err(|e| FetchError::Other(anyhow::anyhow!("client build failed: {e}")))
}

fn build_headers(
    identity: &identity::Identity,
    extra: &BTreeMap<String, String>,
    sticky_cookie: Option<&str>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    // increasing priority: generated < caller-supplied < sticky cookie
    for (name, value) in &identity.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(*name),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    if let Ok(ua) = HeaderValue::from_str(identity.user_agent) {
        headers.insert(reqwest::header::USER_AGENT, ua);
    }

    for (name, value) in extra {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    if let Some(cookie) = sticky_cookie {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            headers.insert(COOKIE, value);
        }
    }

    headers
}

fn transport_detail(error: &reqwest::Error) -> String {
    use std::error::Error as _;
    match error.source() {
        Some(e) => match e.source() {
            Some(e) => e.to_string(),
            None => e.to_string(),
        },
        None => error.to_string(),
    }
}

/// Perform up to `max_retries` attempts of a single HTTP request. Every
/// status code is a valid response; the last completed exchange is returned
/// even when it still looks blocked, so the caller can decide. Only a
/// transport failure on the final attempt becomes an error.
pub async fn fetch_with_retries(
    config: &Config,
    session: &mut RetrievalSession,
    url: &Url,
    method: &Method,
    extra_headers: &BTreeMap<String, String>,
    body: Option<&str>,
) -> Result<FetchAttempt, FetchError> {
    validate_url_policy(url, &config.scrape)?;

    let host = url.host_str().unwrap_or_default().to_string();
    let iden = format!("{host}{}", url.path());
    let max_retries = config.fetch.max_retries;

    let mut force_proxy = false;

    for k in 0..max_retries {
        if k > 0 {
            let delay = backoff_delay(&config.fetch, k - 1);
            log::debug!("{iden}: backing off {}ms before retry", delay.as_millis());
            tokio::time::sleep(delay).await;
        }

        session.total_attempts += 1;
        let last = k + 1 == max_retries;

        let proxy = if force_proxy {
            config.scrape.proxy.as_deref()
        } else {
            None
        };
        let client = build_client(config, proxy)?;

        let identity = identity::generate(url);
        let headers = build_headers(&identity, extra_headers, session.sticky_cookie.as_deref());

        let mut request = client
            .request(method.clone(), url.clone())
            .headers(headers);
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        log::debug!("{iden}: requesting (attempt {})", session.total_attempts);
        let started = Instant::now();

        let response = match request.send().await {
            Ok(r) => r,
            Err(err) => {
                log::warn!("{iden}: transport error: {}", transport_detail(&err));
                force_proxy = config.scrape.proxy.is_some();
                if last {
                    return Err(FetchError::Transport {
                        attempts: k + 1,
                        message: transport_detail(&err),
                    });
                }
                continue;
            }
        };

        let status = response.status();
        let response_headers = response.headers().clone();
        let final_url = response.url().clone();

        let body_text = match response.text().await {
            Ok(t) => t,
            Err(err) => {
                log::warn!("{iden}: body read failed: {err}");
                force_proxy = config.scrape.proxy.is_some();
                if last {
                    return Err(FetchError::Transport {
                        attempts: k + 1,
                        message: err.to_string(),
                    });
                }
                continue;
            }
        };

        // single-session continuity without a cookie jar
        if let Some(cookie) = extract_cookie_pairs(&response_headers) {
            log::debug!("{iden}: captured sticky cookie");
            session.sticky_cookie = Some(cookie);
        }

        let attempt = FetchAttempt {
            status,
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers: response_headers,
            body: body_text,
            elapsed_ms: started.elapsed().as_millis() as u64,
            attempt: session.total_attempts,
            final_url,
        };

        let content_type = attempt.content_type();
        let meta_ok = if is_html_like(content_type.as_deref(), &attempt.body) {
            meta_looks_ok(&extract::extract_page(&attempt.body, &attempt.final_url))
        } else {
            false
        };
        let blocked_html = blocked::looks_blocked(&attempt.body);
        let hostile_hit = domains::is_hostile(&host) && blocked_html && !meta_ok;

        if status.is_success() && !blocked_html {
            return Ok(attempt);
        }

        if !should_retry(status, hostile_hit, blocked_html, meta_ok) || last {
            if !status.is_success() {
                log::debug!("{iden}: returning status {status} (attempt {})", attempt.attempt);
            }
            return Ok(attempt);
        }

        log::debug!(
            "{iden}: retrying (status {status}, blocked={blocked_html}, meta_ok={meta_ok})"
        );
    }

    // max_retries >= 1, the loop always returns
    unreachable!("retry loop exited without a result")
}

/// Follow a shortener once and return the redirect target. Best effort; any
/// failure keeps the original URL.
pub async fn resolve_redirect(config: &Config, url: &Url) -> Option<Url> {
    let client = build_client(config, None).ok()?;
    let identity = identity::generate(url);

    match client
        .get(url.clone())
        .headers(build_headers(&identity, &BTreeMap::new(), None))
        .send()
        .await
    {
        Ok(response) => {
            let final_url = response.url().clone();
            if final_url != *url {
                log::info!("resolved shortener {} -> {}", url, final_url);
                Some(final_url)
            } else {
                None
            }
        }
        Err(err) => {
            log::warn!("shortener resolution failed for {url}: {err}");
            None
        }
    }
}
