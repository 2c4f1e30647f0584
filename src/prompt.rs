use std::fmt::Write;

use crate::types::{AgentStep, InteractiveElement, Observation, PROMPT_ELEMENT_LIMIT};

const AVAILABLE_ACTIONS: &str = r#"Available actions:
1. click(elementId: number) - click the element with this ID (preferred)
2. click(x: number, y: number) - click a viewport coordinate (only when no element ID fits)
3. type(elementId: number, text: string) - type text into an input field
4. scroll(direction: "up"|"down"|"top"|"bottom", amount?: number) - scroll the page
5. wait(ms: number) - wait for the given number of milliseconds
6. navigate(url: string) - go to a new URL
7. done(result: string) - the task is finished; return the result

Rules:
- Prefer element IDs over coordinates.
- Perform exactly one action per reply.
- If the target element is not listed, consider scrolling.
- After typing, you usually need to click a submit button.
- Use wait while the page is loading or animating.
- You must use done when the task is complete.

Reply with JSON only, no other text:
{
    "thought": "your analysis of the current situation and why you chose this action",
    "action": "action type",
    "params": { "parameters" },
    "reason": "why this action moves the task forward"
}

Example reply:
{
    "thought": "There is a search box (element 5); I should type the query there",
    "action": "type",
    "params": { "elementId": 5, "text": "Gemini API" },
    "reason": "The query has to be entered before searching"
}"#;

/// One line per element, in extraction order.
pub fn describe_element(el: &InteractiveElement) -> String {
    let mut desc = format!("[{}] {}", el.id, el.tag);
    if !el.input_type.is_empty() {
        let _ = write!(desc, "[type={}]", el.input_type);
    }
    let text = squash_whitespace(&el.text);
    if !text.is_empty() {
        let _ = write!(desc, ": \"{text}\"");
    }
    if !el.placeholder.is_empty() {
        let _ = write!(desc, " placeholder=\"{}\"", el.placeholder);
    }
    if !el.href.is_empty() {
        let _ = write!(desc, " href=\"{}\"", el.href);
    }
    if !el.aria_label.is_empty() {
        let _ = write!(desc, " aria-label=\"{}\"", el.aria_label);
    }
    let _ = write!(desc, " at ({}, {})", el.rect.x, el.rect.y);
    desc
}

/// Keeps multi-line element text on its listing line.
fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The element listing sent to the model, capped at the first
/// [`PROMPT_ELEMENT_LIMIT`] elements.
pub fn describe_elements(elements: &[InteractiveElement]) -> String {
    elements
        .iter()
        .take(PROMPT_ELEMENT_LIMIT)
        .map(describe_element)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Condensed (thought, action) pairs of earlier steps.
pub fn describe_history(history: &[AgentStep]) -> String {
    history
        .iter()
        .enumerate()
        .map(|(i, step)| {
            format!(
                "{}. {}\n   Action: {}",
                i + 1,
                step.action.thought.as_deref().unwrap_or(""),
                step.action.command
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds the full text prompt for one decision. The screenshot travels
/// separately as an inline image.
pub fn build_agent_prompt(task: &str, observation: &Observation, history: &[AgentStep]) -> String {
    let viewport = &observation.dom.viewport;
    let mut prompt = format!(
        "You are a browser automation agent. Your task is: {task}\n\n\
         Current page:\n\
         - URL: {url}\n\
         - Title: {title}\n\
         - Viewport: {w}x{h}\n\
         - Scroll position: ({sx}, {sy})\n\n\
         Interactive elements (IDs match positions in the screenshot):\n\
         {elements}\n\n",
        url = observation.url,
        title = observation.title,
        w = viewport.width,
        h = viewport.height,
        sx = viewport.scroll_x,
        sy = viewport.scroll_y,
        elements = describe_elements(&observation.dom.elements),
    );

    if !history.is_empty() {
        let _ = write!(
            prompt,
            "Previous actions ({} steps):\n{}\n\n",
            history.len(),
            describe_history(history)
        );
    }

    prompt.push_str("Analyse the screenshot and the element list, then decide the next action.\n\n");
    prompt.push_str(AVAILABLE_ACTIONS);
    prompt
}
