use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Deserializer, Map, Value};
use tracing::{debug, error, warn};

use crate::error::AgentError;
use crate::gemini::GeminiClient;
use crate::prompt::build_agent_prompt;
use crate::types::{Action, AgentStep, Command, DEFAULT_DONE_RESULT, DoneParams, Observation};

/// Turns the current observation into the next action.
#[async_trait]
pub trait DecisionClient: Send + Sync {
    async fn decide(
        &self,
        task: &str,
        observation: &Observation,
        history: &[AgentStep],
    ) -> Result<Action, AgentError>;
}

/// The decision object exactly as the model wrote it.
#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default)]
    thought: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    reason: Option<String>,
}

/// Finds the first complete JSON object in `text`, skipping any prose or
/// markdown fences around it.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    text.char_indices()
        .filter(|(_, c)| *c == '{')
        .find_map(|(i, _)| {
            let mut stream = Deserializer::from_str(&text[i..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(Value::Object(map))) => Some(map),
                _ => None,
            }
        })
}

/// Parse a model reply into a typed action.
///
/// Only a missing JSON object or a missing `action`/`params` is an error.
/// Known kinds with params of the wrong shape come back as
/// [`Command::Invalid`], unrecognised kinds as [`Command::Unknown`].
pub fn parse_agent_response(response: &str) -> Result<Action, AgentError> {
    let object = extract_json_object(response).ok_or_else(|| {
        error!(response, "no JSON object in model reply");
        AgentError::parse("no JSON found in response", response)
    })?;

    let raw: RawDecision = serde_json::from_value(Value::Object(object))
        .map_err(|e| AgentError::parse(format!("invalid decision object: {e}"), response))?;

    let (Some(kind), Some(params)) = (raw.action, raw.params) else {
        return Err(AgentError::parse(
            "decision is missing `action` or `params`",
            response,
        ));
    };
    if params.is_null() {
        return Err(AgentError::parse("`params` is null", response));
    }

    let command = decode_command(&kind.trim().to_ascii_lowercase(), params);
    Ok(Action {
        command,
        thought: raw.thought,
        reason: raw.reason,
    })
}

fn decode_command(kind: &str, params: Value) -> Command {
    let decoded = match kind {
        "click" => decode_params(&params).map(Command::Click),
        "type" => decode_params(&params).map(Command::Type),
        "scroll" => decode_params(&params).map(Command::Scroll),
        "wait" => decode_params(&params).map(Command::Wait),
        "navigate" => decode_params(&params).map(Command::Navigate),
        "done" => Ok(Command::Done(DoneParams {
            result: done_result(&params),
        })),
        other => {
            return Command::Unknown {
                name: other.to_string(),
                params,
            };
        }
    };
    decoded.unwrap_or_else(|e| {
        warn!(kind, %params, error = %e, "action params do not fit; it will be skipped");
        Command::Invalid {
            name: kind.to_string(),
            params,
            reason: e.to_string(),
        }
    })
}

/// `done` always ends the run; a missing, empty or non-string result is
/// replaced rather than rejected.
fn done_result(params: &Value) -> String {
    match params.get("result") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        None | Some(Value::Null) | Some(Value::String(_)) | Some(Value::Bool(false)) => {
            DEFAULT_DONE_RESULT.to_string()
        }
        Some(other) => other.to_string(),
    }
}

fn decode_params<T: DeserializeOwned>(params: &Value) -> Result<T, serde_json::Error> {
    T::deserialize(params)
}

/// Gemini-backed decision client: one multimodal call per step.
pub struct GeminiBrain {
    client: GeminiClient,
}

impl GeminiBrain {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DecisionClient for GeminiBrain {
    async fn decide(
        &self,
        task: &str,
        observation: &Observation,
        history: &[AgentStep],
    ) -> Result<Action, AgentError> {
        let prompt = build_agent_prompt(task, observation, history);
        debug!(chars = prompt.len(), history = history.len(), "asking model for next action");

        let reply = self
            .client
            .generate_text(&prompt, Some(&observation.screenshot))
            .await?;
        debug!(reply = %reply, "model replied");

        parse_agent_response(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ClickTarget, NavigateParams, ScrollDirection, ScrollParams, TypeParams, WaitParams,
    };

    #[test]
    fn parses_reply_with_leading_commentary() {
        let reply = r#"Sure! {"thought":"t","action":"click","params":{"elementId":3},"reason":"r"}"#;
        let action = parse_agent_response(reply).unwrap();
        assert_eq!(action.kind(), "click");
        assert_eq!(
            action.command,
            Command::Click(ClickTarget::Element { element_id: 3 })
        );
        assert_eq!(action.thought.as_deref(), Some("t"));
        assert_eq!(action.reason.as_deref(), Some("r"));
    }

    #[test]
    fn parsing_is_idempotent() {
        let reply = "```json\n{\"action\":\"scroll\",\"params\":{\"direction\":\"down\",\"amount\":400}}\n```";
        assert_eq!(
            parse_agent_response(reply).unwrap(),
            parse_agent_response(reply).unwrap()
        );
    }

    #[test]
    fn reply_without_json_is_a_parse_error() {
        let err = parse_agent_response("I am not sure what to do next.").unwrap_err();
        assert!(matches!(err, AgentError::Parse { .. }));
        assert_eq!(err.raw_response(), Some("I am not sure what to do next."));
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        assert!(matches!(
            parse_agent_response(r#"{"thought":"x","params":{}}"#),
            Err(AgentError::Parse { .. })
        ));
        assert!(matches!(
            parse_agent_response(r#"{"action":"wait"}"#),
            Err(AgentError::Parse { .. })
        ));
    }

    #[test]
    fn skips_brace_fragments_that_are_not_json() {
        let reply = r#"Options {a, b}. Decision: {"action":"navigate","params":{"url":"https://x.dev"}} done."#;
        let action = parse_agent_response(reply).unwrap();
        assert_eq!(
            action.command,
            Command::Navigate(NavigateParams {
                url: "https://x.dev".into()
            })
        );
    }

    #[test]
    fn click_accepts_coordinates() {
        let action = parse_agent_response(r#"{"action":"click","params":{"x":120,"y":48.5}}"#).unwrap();
        assert_eq!(
            action.command,
            Command::Click(ClickTarget::Point { x: 120.0, y: 48.5 })
        );
    }

    #[test]
    fn malformed_known_kinds_decode_as_invalid() {
        for reply in [
            r#"{"action":"click","params":{}}"#,
            r#"{"action":"wait","params":{"ms":-5}}"#,
            r#"{"action":"scroll","params":{"direction":"left"}}"#,
            r#"{"action":"type","params":{"text":"x"}}"#,
        ] {
            let action = parse_agent_response(reply).unwrap();
            assert!(
                matches!(&action.command, Command::Invalid { reason, .. } if !reason.is_empty()),
                "{reply} decoded as {:?}",
                action.command
            );
        }

        let action = parse_agent_response(r#"{"action":"Click","params":{"x":"left"}}"#).unwrap();
        assert_eq!(action.kind(), "click");
        assert_eq!(action.command.params(), serde_json::json!({"x": "left"}));
    }

    #[test]
    fn done_always_decodes() {
        let numeric = parse_agent_response(r#"{"action":"done","params":{"result":42}}"#).unwrap();
        assert_eq!(
            numeric.command,
            Command::Done(DoneParams {
                result: "42".into()
            })
        );
        let empty = parse_agent_response(r#"{"action":"done","params":{"result":""}}"#).unwrap();
        assert!(matches!(empty.command, Command::Done(p) if p.result == "Task completed"));
    }

    #[test]
    fn quoted_element_ids_are_accepted() {
        let click = parse_agent_response(r#"{"action":"click","params":{"elementId":"3"}}"#).unwrap();
        assert_eq!(
            click.command,
            Command::Click(ClickTarget::Element { element_id: 3 })
        );

        let typed =
            parse_agent_response(r#"{"action":"type","params":{"elementId":" 7 ","text":"hi"}}"#)
                .unwrap();
        assert_eq!(
            typed.command,
            Command::Type(TypeParams {
                element_id: 7,
                text: "hi".into()
            })
        );

        let bad = parse_agent_response(r#"{"action":"click","params":{"elementId":"submit"}}"#)
            .unwrap();
        assert!(matches!(bad.command, Command::Invalid { .. }));
    }

    #[test]
    fn zero_wait_and_scroll_fall_back_to_defaults() {
        let wait = parse_agent_response(r#"{"action":"wait","params":{"ms":0}}"#).unwrap();
        assert_eq!(wait.command, Command::Wait(WaitParams { ms: 1000 }));

        let scroll =
            parse_agent_response(r#"{"action":"scroll","params":{"direction":"down","amount":0}}"#)
                .unwrap();
        assert_eq!(
            scroll.command,
            Command::Scroll(ScrollParams {
                direction: ScrollDirection::Down,
                amount: None
            })
        );
    }

    #[test]
    fn defaults_fill_optional_params() {
        let wait = parse_agent_response(r#"{"action":"wait","params":{}}"#).unwrap();
        assert_eq!(wait.command, Command::Wait(WaitParams { ms: 1000 }));

        let done = parse_agent_response(r#"{"action":"done","params":{}}"#).unwrap();
        assert_eq!(
            done.command,
            Command::Done(DoneParams {
                result: "Task completed".into()
            })
        );

        let scroll = parse_agent_response(r#"{"action":"scroll","params":{"direction":"top"}}"#).unwrap();
        assert_eq!(
            scroll.command,
            Command::Scroll(ScrollParams {
                direction: ScrollDirection::Top,
                amount: None
            })
        );
    }

    #[test]
    fn unknown_kind_is_kept_for_the_executor() {
        let action =
            parse_agent_response(r#"{"action":"hover","params":{"elementId":2}}"#).unwrap();
        assert_eq!(action.kind(), "hover");
        assert!(matches!(action.command, Command::Unknown { .. }));
    }

    #[test]
    fn type_carries_element_and_text() {
        let ok = parse_agent_response(r#"{"action":"type","params":{"elementId":5,"text":"Gemini API"}}"#)
            .unwrap();
        assert_eq!(
            ok.command,
            Command::Type(TypeParams {
                element_id: 5,
                text: "Gemini API".into()
            })
        );
    }
}
