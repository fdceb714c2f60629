use serde::{Deserialize, Serialize};

const MAX_RETRIES: u32 = 5;
const QUALITY_ATTEMPTS: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 15;
const BACKOFF_BASE_MS: u64 = 1000;
const BACKOFF_CAP_MS: u64 = 10_000;
const MAX_REDIRECTS: usize = 10;
const LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Retry/backoff budget for a single caller call. Read-only after startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Inner HTTP attempts per fetch
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Outer quality-gated attempts per call
    #[serde(default = "default_quality_attempts")]
    pub quality_attempts: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            quality_attempts: QUALITY_ATTEMPTS,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            backoff_base_ms: BACKOFF_BASE_MS,
            backoff_cap_ms: BACKOFF_CAP_MS,
            max_redirects: MAX_REDIRECTS,
        }
    }
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

fn default_quality_attempts() -> u32 {
    QUALITY_ATTEMPTS
}

fn default_request_timeout_secs() -> u64 {
    REQUEST_TIMEOUT_SECS
}

fn default_backoff_base_ms() -> u64 {
    BACKOFF_BASE_MS
}

fn default_backoff_cap_ms() -> u64 {
    BACKOFF_CAP_MS
}

fn default_max_redirects() -> usize {
    MAX_REDIRECTS
}

/// Outbound request policy (SSRF guard + TLS/proxy knobs).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_allowed_schemes")]
    pub allowed_schemes: Vec<String>,

    #[serde(default)]
    pub blocked_hosts: Vec<String>,

    #[serde(default = "default_block_private_ips")]
    pub block_private_ips: bool,

    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Optional egress proxy. Transport failures flip the remaining
    /// attempts onto it.
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: default_allowed_schemes(),
            blocked_hosts: Vec::new(),
            block_private_ips: true,
            accept_invalid_certs: false,
            proxy: None,
        }
    }
}

fn default_allowed_schemes() -> Vec<String> {
    vec!["http".to_string(), "https".to_string()]
}

fn default_block_private_ips() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub scrape: ScrapeConfig,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            scrape: ScrapeConfig::default(),
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    LISTEN_ADDR.to_string()
}

impl Config {
    fn validate(&mut self) {
        if self.fetch.max_retries == 0 {
            self.fetch.max_retries = 1;
        }
        if self.fetch.quality_attempts == 0 {
            self.fetch.quality_attempts = 1;
        }
        if self.fetch.backoff_cap_ms < self.fetch.backoff_base_ms {
            panic!(
                "fetch.backoff_cap_ms ({}) must be >= fetch.backoff_base_ms ({})",
                self.fetch.backoff_cap_ms, self.fetch.backoff_base_ms
            );
        }
        if self.scrape.allowed_schemes.is_empty() {
            panic!("scrape.allowed_schemes must not be empty");
        }
    }

    pub fn load(path: &str) -> Self {
        // create new if does not exist
        if !std::path::Path::new(path).exists() {
            let default = serde_yml::to_string(&Self::default()).unwrap();
            if let Err(e) = std::fs::write(path, default) {
                log::warn!("could not write default config to {path}: {e}");
                let mut config = Self::default();
                config.validate();
                return config;
            }
        }

        let config_str = std::fs::read_to_string(path).expect("config file is not readable");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.validate();

        config
    }
}
