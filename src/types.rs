use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MAX_STEPS: usize = 20;
/// Only this many elements are listed in the decision prompt.
pub const PROMPT_ELEMENT_LIMIT: usize = 50;
pub const DEFAULT_WAIT_MS: u64 = 1000;
pub const DEFAULT_DONE_RESULT: &str = "Task completed";

/// Viewport-relative bounding box, rounded to whole pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// One element eligible for interaction, valid for a single observation only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveElement {
    pub id: u32,
    pub tag: String,
    #[serde(default, rename = "type")]
    pub input_type: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default)]
    pub href: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub aria_label: String,
    pub rect: Rect,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
}

/// Output of the element extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomInfo {
    pub url: String,
    pub title: String,
    pub elements: Vec<InteractiveElement>,
    pub viewport: Viewport,
}

/// Encoded page image, ready to attach inline to a model request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    pub mime_type: String,
    /// Base64, no data-URL prefix.
    pub data: String,
}

impl Screenshot {
    pub fn png(data: String) -> Self {
        Self {
            mime_type: "image/png".to_string(),
            data,
        }
    }
}

/// A point-in-time snapshot of the active page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub screenshot: Screenshot,
    pub dom: DomInfo,
    pub url: String,
    pub title: String,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn new(screenshot: Screenshot, dom: DomInfo) -> Self {
        Self {
            url: dom.url.clone(),
            title: dom.title.clone(),
            screenshot,
            dom,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClickTarget {
    Element {
        #[serde(rename = "elementId", deserialize_with = "element_id")]
        element_id: u32,
    },
    Point {
        x: f64,
        y: f64,
    },
}

/// Element ids arrive as numbers, but models sometimes quote them.
fn element_id<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(u32),
        Text(String),
    }

    match Id::deserialize(d)? {
        Id::Number(n) => Ok(n),
        Id::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid element id `{s}`"))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeParams {
    #[serde(deserialize_with = "element_id")]
    pub element_id: u32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Top,
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollParams {
    pub direction: ScrollDirection,
    /// Pixels; one viewport height when absent or zero.
    #[serde(
        default,
        deserialize_with = "scroll_amount",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount: Option<f64>,
}

fn scroll_amount<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.filter(|px| *px != 0.0))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitParams {
    /// Zero or absent means [`DEFAULT_WAIT_MS`].
    #[serde(default = "default_wait_ms", deserialize_with = "wait_ms")]
    pub ms: u64,
}

fn default_wait_ms() -> u64 {
    DEFAULT_WAIT_MS
}

fn wait_ms<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    Ok(Option::<u64>::deserialize(d)?
        .filter(|ms| *ms != 0)
        .unwrap_or(DEFAULT_WAIT_MS))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigateParams {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneParams {
    #[serde(default = "default_done_result")]
    pub result: String,
}

fn default_done_result() -> String {
    DEFAULT_DONE_RESULT.to_string()
}

/// The single browser-level effect chosen by the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Click(ClickTarget),
    Type(TypeParams),
    Scroll(ScrollParams),
    Wait(WaitParams),
    Navigate(NavigateParams),
    Done(DoneParams),
    /// A kind outside the closed set. Executed as a no-op.
    Unknown { name: String, params: Value },
    /// A known kind whose params did not decode. Executed as a no-op.
    Invalid {
        name: String,
        params: Value,
        reason: String,
    },
}

impl Command {
    pub fn name(&self) -> &str {
        match self {
            Command::Click(_) => "click",
            Command::Type(_) => "type",
            Command::Scroll(_) => "scroll",
            Command::Wait(_) => "wait",
            Command::Navigate(_) => "navigate",
            Command::Done(_) => "done",
            Command::Unknown { name, .. } | Command::Invalid { name, .. } => name,
        }
    }

    /// Params in the same JSON shape the model is asked to produce.
    pub fn params(&self) -> Value {
        let value = match self {
            Command::Click(p) => serde_json::to_value(p),
            Command::Type(p) => serde_json::to_value(p),
            Command::Scroll(p) => serde_json::to_value(p),
            Command::Wait(p) => serde_json::to_value(p),
            Command::Navigate(p) => serde_json::to_value(p),
            Command::Done(p) => serde_json::to_value(p),
            Command::Unknown { params, .. } | Command::Invalid { params, .. } => {
                return params.clone();
            }
        };
        value.unwrap_or_default()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.params())
    }
}

/// A decoded decision: the command plus the model's stated reasoning.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub command: Command,
    pub thought: Option<String>,
    pub reason: Option<String>,
}

impl Action {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            thought: None,
            reason: None,
        }
    }

    pub fn kind(&self) -> &str {
        self.command.name()
    }

    pub fn is_done(&self) -> bool {
        matches!(self.command, Command::Done(_))
    }
}

impl Serialize for Action {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Action", 4)?;
        s.serialize_field("thought", &self.thought)?;
        s.serialize_field("action", self.kind())?;
        s.serialize_field("params", &self.command.params())?;
        s.serialize_field("reason", &self.reason)?;
        s.end()
    }
}

/// One loop iteration: what was seen and what was decided.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStep {
    /// 1-based.
    pub step_number: usize,
    pub observation: Observation,
    pub action: Action,
    pub timestamp: DateTime<Utc>,
}

impl AgentStep {
    pub fn new(step_number: usize, observation: Observation, action: Action) -> Self {
        Self {
            step_number,
            observation,
            action,
            timestamp: Utc::now(),
        }
    }
}

/// Where the agent loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Observing,
    Deciding,
    Acting,
    Done,
    Failed,
    Exhausted,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Idle => "idle",
            AgentState::Observing => "observing",
            AgentState::Deciding => "deciding",
            AgentState::Acting => "acting",
            AgentState::Done => "done",
            AgentState::Failed => "failed",
            AgentState::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded(String),
    Failed(String),
}

/// Run-level context. History is append-only and lives as long as the run.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub description: String,
    pub max_steps: usize,
    pub history: Vec<AgentStep>,
    pub state: AgentState,
    pub outcome: Option<TaskOutcome>,
}

impl AgentTask {
    pub fn new(description: impl Into<String>, max_steps: usize) -> Self {
        Self {
            description: description.into(),
            max_steps,
            history: Vec::new(),
            state: AgentState::Idle,
            outcome: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn element_deserializes_from_extractor_shape() {
        let el: InteractiveElement = serde_json::from_value(json!({
            "id": 4,
            "tag": "input",
            "type": "search",
            "text": "",
            "placeholder": "Search",
            "href": "",
            "value": "",
            "ariaLabel": "Site search",
            "rect": {"x": 10, "y": 20, "width": 200, "height": 32}
        }))
        .unwrap();
        assert_eq!(el.input_type, "search");
        assert_eq!(el.aria_label, "Site search");
        assert_eq!(el.rect.bottom(), 52.0);
    }

    #[test]
    fn command_params_keep_model_shape() {
        let click = Command::Click(ClickTarget::Element { element_id: 3 });
        assert_eq!(click.params(), json!({"elementId": 3}));

        let typed = Command::Type(TypeParams {
            element_id: 5,
            text: "rust".into(),
        });
        assert_eq!(typed.to_string(), r#"type({"elementId":5,"text":"rust"})"#);

        let scroll = Command::Scroll(ScrollParams {
            direction: ScrollDirection::Down,
            amount: None,
        });
        assert_eq!(scroll.params(), json!({"direction": "down"}));
    }

    #[test]
    fn action_serializes_as_decision_object() {
        let mut action = Action::new(Command::Navigate(NavigateParams {
            url: "https://example.com".into(),
        }));
        action.thought = Some("go".into());
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["action"], "navigate");
        assert_eq!(value["params"]["url"], "https://example.com");
        assert_eq!(value["thought"], "go");
        assert!(value["reason"].is_null());
    }
}
