#![allow(clippy::unwrap_used)]

use ganesha_llm::AdapterChain;
use ganesha_llm::ChatCompletionsAdapter;
use ganesha_llm::PlannerAdapter;
use ganesha_llm::PlannerError;
use ganesha_llm::SystemFacts;
use serde_json::json;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

fn plan_body(content: &str) -> serde_json::Value {
    json!({
        "choices": [
            {"message": {"role": "assistant", "content": content}}
        ]
    })
}

async fn mock_provider(server: &MockServer, content: &str) {
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "test-model"}]
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(plan_body(content)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn adapter_round_trips_a_plan() {
    let server = MockServer::start().await;
    mock_provider(
        &server,
        r#"{"actions":[{"type":"shell","command":"mkdir /tmp/x","explanation":"make dir","risk_level":"low","reversible":true,"rollback_command":"rmdir /tmp/x"}]}"#,
    )
    .await;

    let adapter = ChatCompletionsAdapter::new("test", server.uri());
    assert!(adapter.is_available().await);

    let facts = SystemFacts::collect();
    let plan = adapter.plan(&facts, "make a dir", &[]).await.unwrap();
    assert_eq!(plan.task, "make a dir");
    assert_eq!(plan.actions.len(), 1);
    assert_eq!(plan.actions[0].command, "mkdir /tmp/x");
    assert_eq!(
        plan.actions[0].rollback_command.as_deref(),
        Some("rmdir /tmp/x")
    );
}

#[tokio::test]
async fn adapter_uses_the_first_listed_model_when_unconfigured() {
    let server = MockServer::start().await;
    mock_provider(&server, r#"{"actions":[{"command":"ls"}]}"#).await;

    let adapter = ChatCompletionsAdapter::new("test", server.uri());
    let facts = SystemFacts::collect();
    adapter.plan(&facts, "list", &[]).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let completion = requests
        .iter()
        .find(|r| r.url.path() == "/v1/chat/completions")
        .unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&completion.body).unwrap();
    assert_eq!(payload["model"], "test-model");
    assert_eq!(payload["stream"], false);
    // System prompt first, then the task.
    assert_eq!(payload["messages"][0]["role"], "system");
    assert_eq!(payload["messages"][1]["content"], "TASK: list");
}

#[tokio::test]
async fn http_errors_are_typed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data":[{"id":"m"}]})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let adapter = ChatCompletionsAdapter::new("test", server.uri()).with_model("m");
    let facts = SystemFacts::collect();
    let err = adapter.plan(&facts, "task", &[]).await.err().unwrap();
    assert!(matches!(err, PlannerError::Http { status: 500, .. }));
}

#[tokio::test]
async fn empty_content_is_a_typed_failure() {
    let server = MockServer::start().await;
    mock_provider(&server, "   ").await;

    let adapter = ChatCompletionsAdapter::new("test", server.uri()).with_model("m");
    let facts = SystemFacts::collect();
    let err = adapter.plan(&facts, "task", &[]).await.err().unwrap();
    assert!(matches!(err, PlannerError::EmptyResponse));
}

#[tokio::test]
async fn chain_falls_through_a_dead_provider() {
    let server = MockServer::start().await;
    mock_provider(&server, r#"{"actions":[{"command":"uptime"}]}"#).await;

    // First adapter points at a closed port; the chain must skip it.
    let chain = AdapterChain::new(vec![
        Box::new(ChatCompletionsAdapter::new(
            "dead",
            "http://127.0.0.1:1",
        )),
        Box::new(ChatCompletionsAdapter::new("live", server.uri())),
    ]);

    let facts = SystemFacts::collect();
    let plan = chain.plan(&facts, "check uptime", &[]).await.unwrap();
    assert_eq!(plan.actions[0].command, "uptime");
}
