use rand::seq::IndexedRandom;
use url::Url;

/// One browser fingerprint: a user agent plus the header set a real browser
/// with that agent would send. Generated fresh for every attempt.
#[derive(Clone, Debug)]
pub struct Identity {
    pub user_agent: &'static str,
    pub headers: Vec<(&'static str, String)>,
}

struct AgentProfile {
    agent: &'static str,
    /// Chromium agents additionally send the sec-ch-ua client-hint trio.
    chromium: bool,
    sec_ch_ua: &'static str,
    platform: &'static str,
}

static AGENT_POOL: &[AgentProfile] = &[
    AgentProfile {
        agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        chromium: true,
        sec_ch_ua: r#""Google Chrome";v="131", "Chromium";v="131", "Not_A Brand";v="24""#,
        platform: "\"Windows\"",
    },
    AgentProfile {
        agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        chromium: true,
        sec_ch_ua: r#""Google Chrome";v="131", "Chromium";v="131", "Not_A Brand";v="24""#,
        platform: "\"macOS\"",
    },
    AgentProfile {
        agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
        chromium: true,
        sec_ch_ua: r#""Chromium";v="130", "Google Chrome";v="130", "Not?A_Brand";v="99""#,
        platform: "\"Linux\"",
    },
    AgentProfile {
        agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
        chromium: true,
        sec_ch_ua: r#""Microsoft Edge";v="131", "Chromium";v="131", "Not_A Brand";v="24""#,
        platform: "\"Windows\"",
    },
    AgentProfile {
        agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:132.0) Gecko/20100101 Firefox/132.0",
        chromium: false,
        sec_ch_ua: "",
        platform: "",
    },
    AgentProfile {
        agent: "Mozilla/5.0 (X11; Linux x86_64; rv:131.0) Gecko/20100101 Firefox/131.0",
        chromium: false,
        sec_ch_ua: "",
        platform: "",
    },
    AgentProfile {
        agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
        chromium: false,
        sec_ch_ua: "",
        platform: "",
    },
];

static ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-US,en;q=0.8",
    "en-GB,en-US;q=0.9,en;q=0.8",
    "en-US,en;q=0.5",
];

/// Pure, stateless: picks an agent and emits a header set consistent with it
/// and with the target origin. No pooling, no shared mutable state.
pub fn generate(origin: &Url) -> Identity {
    let mut rng = rand::rng();

    let profile = AGENT_POOL
        .choose(&mut rng)
        .expect("agent pool is non-empty");
    let accept_language = ACCEPT_LANGUAGES
        .choose(&mut rng)
        .expect("language pool is non-empty");

    let mut headers: Vec<(&'static str, String)> = vec![
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
                .to_string(),
        ),
        // Accept-Encoding is left to the HTTP client so response
        // decompression stays enabled
        ("Accept-Language", accept_language.to_string()),
        ("Upgrade-Insecure-Requests", "1".to_string()),
        ("Sec-Fetch-Dest", "document".to_string()),
        ("Sec-Fetch-Mode", "navigate".to_string()),
        ("Sec-Fetch-Site", "same-origin".to_string()),
        ("Sec-Fetch-User", "?1".to_string()),
    ];

    if let Some(host) = origin.host_str() {
        headers.push(("Referer", format!("{}://{}/", origin.scheme(), host)));
    }

    if profile.chromium {
        headers.push(("sec-ch-ua", profile.sec_ch_ua.to_string()));
        headers.push(("sec-ch-ua-mobile", "?0".to_string()));
        headers.push(("sec-ch-ua-platform", profile.platform.to_string()));
    }

    Identity {
        user_agent: profile.agent,
        headers,
    }
}
