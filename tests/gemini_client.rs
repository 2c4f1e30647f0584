use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tars_agent::types::ClickTarget;
use tars_agent::{
    AgentError, Command, DecisionClient, DomInfo, GeminiBrain, GeminiClient, GeminiSettings,
    Observation, Screenshot,
};

const GENERATE_PATH: &str = "/models/gemini-2.0-flash-exp:generateContent";

fn settings(server: &MockServer, key: Option<&str>) -> GeminiSettings {
    GeminiSettings {
        api_key: key.map(String::from),
        base_url: server.uri(),
        ..Default::default()
    }
}

fn reply(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }]
    })
}

fn observation() -> Observation {
    let dom = DomInfo {
        url: "https://example.com/".into(),
        title: "Example".into(),
        ..Default::default()
    };
    Observation::new(Screenshot::png("c2NyZWVu".into()), dom)
}

#[tokio::test]
async fn brain_sends_screenshot_and_parses_the_reply() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "generationConfig": {"temperature": 0.2, "maxOutputTokens": 1000}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply(
            "Sure! {\"thought\":\"t\",\"action\":\"click\",\"params\":{\"elementId\":3},\"reason\":\"r\"}",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let brain = GeminiBrain::new(GeminiClient::new(settings(&server, Some("test-key"))).unwrap());
    let action = brain.decide("open docs", &observation(), &[]).await.unwrap();

    assert_eq!(
        action.command,
        Command::Click(ClickTarget::Element { element_id: 3 })
    );

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let parts = &body["contents"][0]["parts"];
    assert!(parts[0]["text"].as_str().unwrap().contains("Your task is: open docs"));
    assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
    assert_eq!(parts[1]["inline_data"]["data"], "c2NyZWVu");
}

#[tokio::test]
async fn api_error_message_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}
        })))
        .mount(&server)
        .await;

    let client = GeminiClient::new(settings(&server, Some("test-key"))).unwrap();
    let err = client.generate_text("hi", None).await.unwrap_err();

    match err {
        AgentError::DecisionService { status, message } => {
            assert_eq!(status, 429);
            assert_eq!(message, "Resource has been exhausted");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn non_json_error_body_is_kept_verbatim() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let client = GeminiClient::new(settings(&server, Some("test-key"))).unwrap();
    let err = client.generate_text("hi", None).await.unwrap_err();
    assert_eq!(err.to_string(), "decision service error (502): bad gateway");
}

#[tokio::test]
async fn missing_key_fails_before_any_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply("{}")))
        .expect(0)
        .mount(&server)
        .await;

    let client = GeminiClient::new(settings(&server, None)).unwrap();
    let err = client.generate_text("hi", None).await.unwrap_err();
    assert!(matches!(err, AgentError::MissingApiKey));
}

#[tokio::test]
async fn empty_candidates_are_an_empty_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
        .mount(&server)
        .await;

    let client = GeminiClient::new(settings(&server, Some("test-key"))).unwrap();
    let err = client.generate_text("hi", None).await.unwrap_err();
    assert!(matches!(err, AgentError::EmptyResponse));
}

#[tokio::test]
async fn prose_reply_is_a_parse_error_with_raw_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(reply("I cannot see any buttons here.")),
        )
        .mount(&server)
        .await;

    let brain = GeminiBrain::new(GeminiClient::new(settings(&server, Some("test-key"))).unwrap());
    let err = brain.decide("click buy", &observation(), &[]).await.unwrap_err();
    assert_eq!(err.raw_response(), Some("I cannot see any buttons here."));
}
