//! Escalation path: render the page in a real browser engine when the plain
//! HTTP pipeline keeps producing shells or block pages.

use anyhow::{bail, Context};
use headless_chrome::{
    protocol::cdp::{Page, Target::CreateTarget},
    Browser, LaunchOptionsBuilder, Tab,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::{PageRenderer, RenderedPage};

const NAV_TIMEOUT: Duration = Duration::from_secs(20);
const SETTLE_SLEEP: Duration = Duration::from_secs(5);
const SETTLE_ELEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Renders pages with a locally installed Chromium. A browser is launched
/// per render; keeping one warm is not worth the session-bleed between
/// unrelated URLs.
pub struct ChromeRenderer {
    chrome_path: Option<PathBuf>,
    proxy: Option<String>,
}

impl ChromeRenderer {
    pub fn new(proxy: Option<String>) -> Self {
        Self {
            chrome_path: std::env::var("CHROME_PATH")
                .ok()
                .and_then(|p| PathBuf::from_str(&p).ok()),
            proxy,
        }
    }

    fn launch(&self) -> anyhow::Result<Browser> {
        let options = LaunchOptionsBuilder::default()
            .sandbox(false)
            .proxy_server(self.proxy.as_deref())
            .path(self.chrome_path.clone())
            .build()
            .context("invalid browser launch options")?;
        Browser::new(options).context("could not launch chromium")
    }
}

fn stealth_tab(tab: &Arc<Tab>) -> anyhow::Result<()> {
    tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
        run_immediately: Some(true),
        source: "Object.defineProperty(navigator, 'webdriver', {get: () => undefined});"
            .to_string(),
        world_name: None,
        include_command_line_api: None,
    })?;
    tab.set_user_agent(
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36",
        Some("en-US,en"),
        Some("Mac OS X"),
    )?;
    Ok(())
}

/// Cheap challenge signals; no bypassing, just an honest "this render is a
/// challenge page, don't extract from it".
fn looks_like_challenge(tab: &Arc<Tab>) -> bool {
    let title = tab.get_title().unwrap_or_default();
    if title.to_lowercase().contains("just a moment") {
        return true;
    }

    let res = tab.evaluate(
        r#"
        !!(document.querySelector('iframe[src*="challenge"]')
           || document.querySelector('div[id*="cf-"], div[class*="cf-"]')
           || document.querySelector('iframe[src*="hcaptcha"], iframe[src*="turnstile"]'))
    "#,
        false,
    );
    res.ok()
        .and_then(|v| v.value.and_then(|x| x.as_bool()))
        .unwrap_or(false)
}

impl PageRenderer for ChromeRenderer {
    fn available(&self) -> bool {
        true
    }

    fn render(&self, url: &str) -> anyhow::Result<RenderedPage> {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_default();

        let browser = self.launch()?;
        let tab = browser.new_tab_with_options(CreateTarget {
            for_tab: None,
            url: url.to_string(),
            width: Some(1280),
            height: Some(720),
            browser_context_id: None,
            enable_begin_frame_control: None,
            new_window: Some(true),
            background: None,
        })?;

        tab.enable_stealth_mode()?;
        stealth_tab(&tab)?;
        tab.set_default_timeout(NAV_TIMEOUT);

        tab.navigate_to(url)
            .with_context(|| format!("{host}: navigation failed"))?;
        tab.wait_until_navigated()
            .with_context(|| format!("{host}: navigation did not settle"))?;

        log::debug!("{host}: letting scripts settle");
        std::thread::sleep(SETTLE_SLEEP);

        // best effort; SPA shells may never produce nested content in time
        let _ = tab.wait_for_element_with_custom_timeout("body * *", SETTLE_ELEMENT_TIMEOUT);

        if looks_like_challenge(&tab) {
            let _ = tab.close(true);
            bail!("{host}: challenge page detected");
        }

        let html = tab
            .get_content()
            .with_context(|| format!("{host}: could not read rendered document"))?;
        let _ = tab.close(true);

        log::debug!("{host}: rendered {} bytes", html.len());
        Ok(RenderedPage { html })
    }
}
