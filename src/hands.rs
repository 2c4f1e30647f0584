use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, SettleDelays};
use crate::dom::agent_selector;
use crate::error::AgentError;
use crate::types::{Action, ClickTarget, Command, ScrollDirection, ScrollParams, TypeParams};

/// Browser session shared by the observer and the executor. Created once,
/// reused for all tasks.
pub struct BrowserSession {
    browser: Browser,
    active: Mutex<Option<Arc<Tab>>>,
}

impl BrowserSession {
    /// Attach to a running Chrome when a debug URL is configured, otherwise
    /// launch one with a persistent agent profile.
    pub fn launch(config: &AgentConfig) -> Result<Self> {
        if let Some(url) = &config.chrome_debug_url {
            info!(%url, "attaching to existing Chrome");
            let browser = Browser::connect(url.clone())
                .with_context(|| format!("could not attach to Chrome at {url}"))?;

            let tab = {
                let tabs = browser
                    .get_tabs()
                    .lock()
                    .map_err(|_| anyhow::anyhow!("browser tab list is poisoned"))?;
                tabs.first().cloned()
            };
            let tab = match tab {
                Some(t) => {
                    debug!("using existing tab");
                    t
                }
                None => browser.new_tab()?,
            };

            return Ok(Self::with_tab(browser, tab));
        }

        let profile = config.profile_dir();
        if let Some(dir) = &profile {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("could not create profile dir {}", dir.display()))?;
        }

        let options = LaunchOptions {
            headless: config.headless,
            path: config.chrome_path.clone(),
            user_data_dir: profile.clone(),
            window_size: Some((1280, 800)),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        info!(headless = config.headless, profile = ?profile, "launching Chrome");
        let browser = Browser::new(options).context("browser launch failed")?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self::with_tab(browser, tab))
    }

    fn with_tab(browser: Browser, tab: Arc<Tab>) -> Self {
        Self {
            browser,
            active: Mutex::new(Some(tab)),
        }
    }

    /// The tab every observation and action targets, resolved at call time.
    pub fn active_tab(&self) -> Result<Arc<Tab>, AgentError> {
        self.active.lock().clone().ok_or(AgentError::NoActiveTab)
    }

    /// Open a fresh tab and make it the active one.
    pub fn new_tab(&self) -> Result<Arc<Tab>> {
        let tab = self.browser.new_tab()?;
        *self.active.lock() = Some(tab.clone());
        Ok(tab)
    }
}

/// Applies one decided action to the live page.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &Action) -> Result<(), AgentError>;
}

/// Executes actions in the session's active tab through injected scripts.
pub struct ChromeExecutor {
    session: Arc<BrowserSession>,
    delays: SettleDelays,
}

impl ChromeExecutor {
    pub fn new(session: Arc<BrowserSession>, delays: SettleDelays) -> Self {
        Self { session, delays }
    }

    /// Run a script in the active tab off the async runtime.
    async fn run_script(&self, script: String) -> Result<serde_json::Value, AgentError> {
        let tab = self.session.active_tab()?;
        tokio::task::spawn_blocking(move || {
            tab.evaluate(&script, false)
                .map(|r| r.value.unwrap_or_default())
                .map_err(|e| AgentError::Browser(e.to_string()))
        })
        .await
        .map_err(|e| AgentError::Browser(format!("script task panicked: {e}")))?
    }

    async fn click(&self, target: &ClickTarget) -> Result<(), AgentError> {
        let found = self.run_script(click_script(target, self.delays.click_scroll)).await?;
        if found != json!(true) {
            warn!(?target, "click target no longer resolves; skipping");
        }
        tokio::time::sleep(self.delays.click_scroll).await;
        Ok(())
    }

    async fn type_text(&self, params: &TypeParams) -> Result<(), AgentError> {
        let script = type_script(params, self.delays.type_per_char);
        let found = self.run_script(script).await?;
        if found != json!(true) {
            warn!(
                element_id = params.element_id,
                "type target is not editable or is stale; skipping"
            );
        }
        tokio::time::sleep(self.delays.after_typing(&params.text)).await;
        Ok(())
    }

    async fn scroll(&self, params: &ScrollParams) -> Result<(), AgentError> {
        self.run_script(scroll_script(params)).await?;
        tokio::time::sleep(self.delays.scroll).await;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), AgentError> {
        let tab = self.session.active_tab()?;
        let target = url.to_string();
        tokio::task::spawn_blocking(move || {
            tab.navigate_to(&target)
                .map(|_| ())
                .map_err(|e| AgentError::Browser(e.to_string()))
        })
        .await
        .map_err(|e| AgentError::Browser(format!("navigation task panicked: {e}")))??;
        tokio::time::sleep(self.delays.navigate).await;
        Ok(())
    }
}

#[async_trait]
impl ActionExecutor for ChromeExecutor {
    async fn execute(&self, action: &Action) -> Result<(), AgentError> {
        debug!(action = %action.command, "executing");
        match &action.command {
            Command::Click(target) => self.click(target).await,
            Command::Type(params) => self.type_text(params).await,
            Command::Scroll(params) => self.scroll(params).await,
            Command::Wait(params) => {
                tokio::time::sleep(Duration::from_millis(params.ms)).await;
                Ok(())
            }
            Command::Navigate(params) => self.navigate(&params.url).await,
            Command::Done(params) => {
                info!(result = %params.result, "task completed");
                Ok(())
            }
            Command::Unknown { name, .. } => {
                warn!(kind = %name, "unknown action kind; ignoring");
                Ok(())
            }
            Command::Invalid { name, reason, .. } => {
                warn!(kind = %name, %reason, "malformed action; ignoring");
                Ok(())
            }
        }
    }
}

/// Resolves to `true` when a target element was found.
fn click_script(target: &ClickTarget, scroll_pause: Duration) -> String {
    match target {
        ClickTarget::Element { element_id } => format!(
            r#"(() => {{
  const el = document.querySelector('{selector}');
  if (!(el instanceof HTMLElement)) return false;
  el.scrollIntoView({{ behavior: 'smooth', block: 'center' }});
  setTimeout(() => el.click(), {pause});
  return true;
}})()"#,
            selector = agent_selector(*element_id),
            pause = scroll_pause.as_millis()
        ),
        ClickTarget::Point { x, y } => format!(
            r#"(() => {{
  const el = document.elementFromPoint({x}, {y});
  if (!(el instanceof HTMLElement)) return false;
  el.click();
  return true;
}})()"#
        ),
    }
}

/// Clears the field, then writes one character per tick so page scripts see
/// a stream of input events followed by a change event.
fn type_script(params: &TypeParams, per_char: Duration) -> String {
    let text = serde_json::Value::String(params.text.clone());
    format!(
        r#"(() => {{
  const el = document.querySelector('{selector}');
  const text = {text};
  if (el instanceof HTMLInputElement || el instanceof HTMLTextAreaElement) {{
    el.focus();
    el.value = '';
    const chars = Array.from(text);
    if (chars.length === 0) {{
      el.dispatchEvent(new Event('input', {{ bubbles: true }}));
      el.dispatchEvent(new Event('change', {{ bubbles: true }}));
      return true;
    }}
    let current = '';
    chars.forEach((ch, i) => {{
      setTimeout(() => {{
        current += ch;
        el.value = current;
        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
        if (i === chars.length - 1) {{
          el.dispatchEvent(new Event('change', {{ bubbles: true }}));
        }}
      }}, i * {tick});
    }});
    return true;
  }}
  if (el instanceof HTMLElement && el.isContentEditable) {{
    el.focus();
    el.textContent = text;
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
    return true;
  }}
  return false;
}})()"#,
        selector = agent_selector(params.element_id),
        tick = per_char.as_millis()
    )
}

fn scroll_script(params: &ScrollParams) -> String {
    let amount = match params.amount.filter(|px| *px != 0.0) {
        Some(px) => px.to_string(),
        None => "window.innerHeight".to_string(),
    };
    let call = match params.direction {
        ScrollDirection::Up => {
            format!("window.scrollBy({{ top: -({amount}), behavior: 'smooth' }})")
        }
        ScrollDirection::Down => {
            format!("window.scrollBy({{ top: {amount}, behavior: 'smooth' }})")
        }
        ScrollDirection::Top => {
            "window.scrollTo({ top: 0, behavior: 'smooth' })".to_string()
        }
        ScrollDirection::Bottom => {
            "window.scrollTo({ top: document.body.scrollHeight, behavior: 'smooth' })".to_string()
        }
    };
    format!("(() => {{ {call}; return true; }})()")
}
