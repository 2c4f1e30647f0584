use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use headless_chrome::Tab;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use tracing::{debug, warn};

use crate::dom;
use crate::error::AgentError;
use crate::hands::BrowserSession;
use crate::types::{DomInfo, Observation, Screenshot};

/// Produces one point-in-time observation of the active page.
#[async_trait]
pub trait PageObserver: Send + Sync {
    async fn observe(&self) -> Result<Observation, AgentError>;
}

/// Pages the browser refuses to capture.
pub fn is_restricted_url(url: &str) -> bool {
    const PREFIXES: [&str; 4] = ["chrome://", "chrome-extension://", "edge://", "devtools://"];
    if PREFIXES.iter().any(|p| url.starts_with(p)) {
        return true;
    }
    if url.starts_with("about:") && url != "about:blank" {
        return true;
    }
    url.contains("chrome.google.com/webstore")
}

/// Screenshot plus element extraction against the session's active tab.
pub struct ChromeObserver {
    session: Arc<BrowserSession>,
}

impl ChromeObserver {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl PageObserver for ChromeObserver {
    async fn observe(&self) -> Result<Observation, AgentError> {
        debug!("observing page");

        // Each capture resolves the active tab on its own, so a tab switch
        // between them can pair a screenshot with another page's elements.
        let shot_session = self.session.clone();
        let dom_session = self.session.clone();
        let screenshot = tokio::task::spawn_blocking(move || {
            let tab = shot_session.active_tab()?;
            capture_screenshot(&tab)
        });
        let extraction = tokio::task::spawn_blocking(move || {
            let tab = dom_session.active_tab()?;
            dom::extract_interactive_elements(&tab)
        });

        let (screenshot, extraction) = tokio::join!(screenshot, extraction);
        let (shot_url, screenshot) =
            screenshot.map_err(|e| AgentError::Screenshot(format!("capture task panicked: {e}")))??;
        let dom: DomInfo = extraction
            .map_err(|e| AgentError::Extraction(format!("extraction task panicked: {e}")))??;

        if !same_page(&shot_url, &dom.url) {
            warn!(
                screenshot_url = %shot_url,
                dom_url = %dom.url,
                "screenshot and element list came from different pages"
            );
        }

        Ok(Observation::new(screenshot, dom))
    }
}

/// Returns the URL the screenshot was taken of, and the encoded image.
fn capture_screenshot(tab: &Arc<Tab>) -> Result<(String, Screenshot), AgentError> {
    let url = tab.get_url();
    if is_restricted_url(&url) {
        return Err(AgentError::RestrictedPage { url });
    }

    let png = tab
        .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
        .map_err(|e| AgentError::Screenshot(e.to_string()))?;
    if png.is_empty() {
        return Err(AgentError::Screenshot("browser returned an empty image".into()));
    }
    debug!(bytes = png.len(), "captured screenshot");

    let data = base64::engine::general_purpose::STANDARD.encode(&png);
    Ok((url, Screenshot::png(data)))
}

/// Ignores the fragment, which changes without a new page.
fn same_page(a: &str, b: &str) -> bool {
    let strip = |u: &str| u.split('#').next().unwrap_or(u).to_string();
    strip(a) == strip(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restricted_pages_are_refused() {
        assert!(is_restricted_url("chrome://settings"));
        assert!(is_restricted_url("chrome-extension://abc/popup.html"));
        assert!(is_restricted_url("edge://flags"));
        assert!(is_restricted_url("about:config"));
        assert!(is_restricted_url("https://chrome.google.com/webstore/detail/x"));
    }

    #[test]
    fn regular_pages_are_allowed() {
        assert!(!is_restricted_url("https://example.com"));
        assert!(!is_restricted_url("http://localhost:3000/"));
        assert!(!is_restricted_url("about:blank"));
    }

    #[test]
    fn fragment_changes_count_as_the_same_page() {
        assert!(same_page("https://a.dev/x#top", "https://a.dev/x"));
        assert!(!same_page("https://a.dev/x", "https://a.dev/y"));
    }
}
