//! Page context for one-shot prompts.
//!
//! Pages rich in images, charts or data tables are sent as a screenshot plus
//! extracted text ("vision" mode); plain pages only send the selected or main
//! text.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use headless_chrome::Tab;
use tracing::{debug, warn};

use crate::dom;
use crate::hands::BrowserSession;
use crate::observer::PageObserver;
use crate::types::{DomInfo, Observation};

/// How much page text is quoted in a vision prompt.
pub const VISION_TEXT_LIMIT: usize = 5000;

const DETECT_VISUAL_JS: &str = r#"
(() => {
  const images = Array.from(document.querySelectorAll('img[src]')).filter(img => {
    const w = img.width || img.naturalWidth;
    const h = img.height || img.naturalHeight;
    return w > 50 && h > 50;
  });
  if (images.length > 2) return true;
  if (document.querySelectorAll('canvas').length > 0) return true;
  const svgs = Array.from(document.querySelectorAll('svg')).filter(svg => {
    const r = svg.getBoundingClientRect();
    return r.width > 100 && r.height > 100;
  });
  if (svgs.length > 0) return true;
  const tables = Array.from(document.querySelectorAll('table')).filter(t => {
    const rows = t.querySelectorAll('tr').length;
    const first = t.querySelector('tr');
    const cols = first ? first.querySelectorAll('td, th').length : 0;
    return rows > 5 || cols > 4;
  });
  if (tables.length > 0) return true;
  return document.querySelectorAll('iframe:not([width="1"]):not([height="1"])').length > 0;
})()
"#;

const SELECTION_JS: &str = r#"
(() => {
  const selected = (window.getSelection() || '').toString().trim();
  if (selected) return selected;
  const selectors = ['article', 'main', '[role="main"]', '.content', '.main-content', '#content', '#main'];
  let main = '';
  for (const s of selectors) {
    const el = document.querySelector(s);
    if (el) { main = el.innerText; break; }
  }
  if (!main) main = document.body ? document.body.innerText.substring(0, 3000) : '';
  return 'Page: ' + document.title + '\n\n' + main;
})()
"#;

/// Whether the page has images, charts, large SVGs, data tables or embeds
/// worth showing the model.
pub fn detect_visual_content(tab: &Arc<Tab>) -> anyhow::Result<bool> {
    let result = tab.evaluate(DETECT_VISUAL_JS, false)?;
    Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
}

/// Selected text, or the page title and main content when nothing is selected.
pub fn tab_selection(tab: &Arc<Tab>) -> anyhow::Result<Option<String>> {
    let result = tab.evaluate(SELECTION_JS, false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .filter(|s| !s.is_empty()))
}

#[derive(Debug, Clone)]
pub enum PageContext {
    Vision {
        observation: Observation,
    },
    Text {
        text: String,
        url: String,
        title: String,
        timestamp: DateTime<Utc>,
    },
}

impl PageContext {
    pub fn url(&self) -> &str {
        match self {
            PageContext::Vision { observation } => &observation.url,
            PageContext::Text { url, .. } => url,
        }
    }

    pub fn has_visual_data(&self) -> bool {
        matches!(self, PageContext::Vision { observation } if !observation.screenshot.data.is_empty())
    }
}

/// Choose vision or text mode for the active page. Vision is used when
/// forced, or when `smart_detection` finds visual content. Any failure in
/// vision mode falls back to text.
pub async fn enhanced_page_context(
    session: Arc<BrowserSession>,
    observer: &dyn PageObserver,
    force_vision: bool,
    smart_detection: bool,
) -> anyhow::Result<PageContext> {
    let tab = session.active_tab()?;

    let use_vision = if force_vision {
        true
    } else if smart_detection {
        let detect_tab = tab.clone();
        tokio::task::spawn_blocking(move || detect_visual_content(&detect_tab))
            .await?
            .unwrap_or_else(|e| {
                warn!(error = %e, "visual content detection failed");
                false
            })
    } else {
        false
    };
    debug!(use_vision, force_vision, smart_detection, "page context mode");

    if use_vision {
        match observer.observe().await {
            Ok(observation) => return Ok(PageContext::Vision { observation }),
            Err(e) => warn!(error = %e, "vision capture failed; falling back to text"),
        }
    }

    tokio::task::spawn_blocking(move || text_context(&tab)).await?
}

fn text_context(tab: &Arc<Tab>) -> anyhow::Result<PageContext> {
    let text = tab_selection(tab)?.unwrap_or_default();
    Ok(PageContext::Text {
        text,
        url: dom::get_current_url(tab)?,
        title: dom::get_page_title(tab)?,
        timestamp: Utc::now(),
    })
}

/// Unique non-empty element texts, in first-seen order.
pub fn extract_text_from_dom(dom: &DomInfo) -> String {
    let mut seen = HashSet::new();
    dom.elements
        .iter()
        .map(|el| el.text.trim())
        .filter(|t| !t.is_empty() && seen.insert(*t))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap `base` so the model looks at both the screenshot and the page text.
/// Text mode returns `base` unchanged.
pub fn build_vision_prompt(base: &str, context: &PageContext, language: &str) -> String {
    let PageContext::Vision { observation } = context else {
        return base.to_string();
    };

    let mut text = extract_text_from_dom(&observation.dom);
    if text.is_empty() {
        text = "No text extracted".to_string();
    }
    let text: String = text.chars().take(VISION_TEXT_LIMIT).collect();

    format!(
        "You are viewing a webpage. I will provide you with:\n\
         1. A screenshot of the page (attached as image)\n\
         2. The text content extracted from the page\n\n\
         Please analyze BOTH the visual elements (images, charts, diagrams, layout) and the \
         text content to fulfill the following request:\n\n\
         {base}\n\n\
         Text content from page:\n\
         ---\n\
         {text}\n\
         ---\n\n\
         IMPORTANT:\n\
         - Pay attention to visual elements like charts, graphs, images, and diagrams in the screenshot\n\
         - Describe or reference visual content when relevant to the request\n\
         - Consider the visual layout and structure of the page\n\
         - If there are data visualizations (charts/graphs), extract and describe the data they show\n\
         - Please respond in {language}\n"
    )
}

/// Prompt for text mode: the request followed by the page text.
pub fn build_text_prompt(base: &str, context: &PageContext, language: &str) -> String {
    match context {
        PageContext::Text { text, .. } if !text.is_empty() => {
            format!("{base}\n\n---\n{text}\n---\n\nPlease respond in {language}.")
        }
        _ => format!("{base}\n\nPlease respond in {language}."),
    }
}
