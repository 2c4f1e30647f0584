use std::sync::Arc;

use headless_chrome::Tab;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::types::{DomInfo, InteractiveElement, Viewport};

/// Marker attribute that links a live DOM node to its per-observation id.
pub const AGENT_ID_ATTR: &str = "data-agent-id";

/// Elements this far above or below the viewport are still reported, so the
/// model can decide to scroll to them.
pub const VIEWPORT_MARGIN_PX: f64 = 500.0;

/// Injected into the page to list interactive elements.
///
/// The script:
///   1. Clears markers left by the previous observation.
///   2. Queries links, buttons, form fields, role-based widgets, click
///      handlers and editable regions.
///   3. Drops zero-sized, invisible or far-offscreen nodes.
///   4. Tags survivors with sequential `data-agent-id` values 0..N-1.
///   5. Returns the DomInfo record as a JSON string.
const EXTRACT_JS: &str = r#"
(() => {
  document.querySelectorAll('[data-agent-id]').forEach(el => el.removeAttribute('data-agent-id'));
  const selectors = [
    'a[href]', 'button', 'input', 'textarea', 'select',
    '[role="button"]', '[role="link"]', '[role="textbox"]',
    '[onclick]', '[contenteditable="true"]'
  ];
  const elements = [];
  let id = 0;
  document.querySelectorAll(selectors.join(', ')).forEach(el => {
    const rect = el.getBoundingClientRect();
    if (rect.width === 0 || rect.height === 0) return;
    const style = window.getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden' || style.opacity === '0') return;
    if (rect.bottom < -500 || rect.top > window.innerHeight + 500) return;
    el.setAttribute('data-agent-id', String(id));
    elements.push({
      id: id++,
      tag: el.tagName.toLowerCase(),
      type: el.type || '',
      text: (el.textContent || '').trim().substring(0, 100),
      placeholder: el.placeholder || '',
      href: el.href || '',
      value: typeof el.value === 'string' ? el.value : '',
      ariaLabel: el.getAttribute('aria-label') || '',
      rect: {
        x: Math.round(rect.x),
        y: Math.round(rect.y),
        width: Math.round(rect.width),
        height: Math.round(rect.height)
      }
    });
  });
  return JSON.stringify({
    url: window.location.href,
    title: document.title,
    elements,
    viewport: {
      width: window.innerWidth,
      height: window.innerHeight,
      scrollX: window.scrollX,
      scrollY: window.scrollY
    }
  });
})()
"#;

/// Scan the live page and tag every interactive candidate.
///
/// No cap is applied here; the prompt builder truncates.
pub fn extract_interactive_elements(tab: &Arc<Tab>) -> Result<DomInfo, AgentError> {
    let result = tab
        .evaluate(EXTRACT_JS, false)
        .map_err(|e| AgentError::Extraction(e.to_string()))?;
    let raw = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| AgentError::Extraction("extraction script returned no value".into()))?;

    let dom = parse_dom_info(&raw)?;
    debug!(url = %dom.url, elements = dom.elements.len(), "extracted interactive elements");
    Ok(dom)
}

/// Decode the extractor's JSON and re-check geometry on the Rust side.
pub fn parse_dom_info(raw: &str) -> Result<DomInfo, AgentError> {
    let mut dom: DomInfo =
        serde_json::from_str(raw).map_err(|e| AgentError::Extraction(e.to_string()))?;
    let before = dom.elements.len();
    dom.elements.retain(|el| is_candidate(el, &dom.viewport));
    if dom.elements.len() != before {
        warn!(
            dropped = before - dom.elements.len(),
            "extractor returned elements outside the visible geometry"
        );
    }
    Ok(dom)
}

/// Positive size, and not further than the margin outside the viewport.
pub fn is_candidate(el: &InteractiveElement, viewport: &Viewport) -> bool {
    el.rect.width > 0.0
        && el.rect.height > 0.0
        && el.rect.bottom() >= -VIEWPORT_MARGIN_PX
        && el.rect.y <= viewport.height + VIEWPORT_MARGIN_PX
}

/// CSS selector for an element tagged during extraction.
pub fn agent_selector(element_id: u32) -> String {
    format!("[{AGENT_ID_ATTR}=\"{element_id}\"]")
}

/// Get the current page URL.
pub fn get_current_url(tab: &Arc<Tab>) -> anyhow::Result<String> {
    let result = tab.evaluate("window.location.href", false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "unknown".to_string()))
}

/// Get the current page title.
pub fn get_page_title(tab: &Arc<Tab>) -> anyhow::Result<String> {
    let result = tab.evaluate("document.title", false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "untitled".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_dom(elements: serde_json::Value) -> String {
        json!({
            "url": "https://example.com/",
            "title": "Example",
            "elements": elements,
            "viewport": {"width": 1280, "height": 800, "scrollX": 0, "scrollY": 120}
        })
        .to_string()
    }

    fn element(id: u32, y: f64, width: f64, height: f64) -> serde_json::Value {
        json!({
            "id": id, "tag": "button", "type": "submit", "text": "Go",
            "placeholder": "", "href": "", "value": "", "ariaLabel": "",
            "rect": {"x": 10, "y": y, "width": width, "height": height}
        })
    }

    #[test]
    fn parses_extractor_output() {
        let dom = parse_dom_info(&raw_dom(json!([element(0, 10.0, 80.0, 30.0)]))).unwrap();
        assert_eq!(dom.url, "https://example.com/");
        assert_eq!(dom.viewport.scroll_y, 120.0);
        assert_eq!(dom.elements.len(), 1);
        assert_eq!(dom.elements[0].input_type, "submit");
    }

    #[test]
    fn drops_degenerate_and_far_offscreen_elements() {
        let dom = parse_dom_info(&raw_dom(json!([
            element(0, 10.0, 80.0, 30.0),
            element(1, 10.0, 0.0, 30.0),
            element(2, 10.0, 80.0, 0.0),
            element(3, -700.0, 80.0, 30.0),
            element(4, 1400.0, 80.0, 30.0),
            element(5, 1250.0, 80.0, 30.0),
            element(6, -520.0, 80.0, 30.0),
        ])))
        .unwrap();

        let ids: Vec<u32> = dom.elements.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 5, 6]);
        assert!(
            dom.elements
                .iter()
                .all(|e| e.rect.width > 0.0 && e.rect.height > 0.0)
        );
    }

    #[test]
    fn rejects_malformed_extractor_output() {
        let err = parse_dom_info("not json").unwrap_err();
        assert!(matches!(err, AgentError::Extraction(_)));
    }

    #[test]
    fn selector_targets_marker_attribute() {
        assert_eq!(agent_selector(7), r#"[data-agent-id="7"]"#);
        assert!(EXTRACT_JS.contains(AGENT_ID_ATTR));
    }
}
