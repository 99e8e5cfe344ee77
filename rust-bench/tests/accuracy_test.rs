use chrono::{TimeZone, Utc};
use serde_json::json;
use sparkbench::accuracy::{AccuracyClient, AccuracyConfig, HEALTH_PATH};
use sparkbench::config::CHAT_COMPLETIONS_PATH;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> AccuracyClient {
    AccuracyClient::try_new(&server.uri(), AccuracyConfig::new("test-model")).unwrap()
}

#[tokio::test]
async fn health_check_passes_on_ok() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HEALTH_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).health_check().await.unwrap();
}

#[tokio::test]
async fn health_check_fails_on_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HEALTH_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server).health_check().await.unwrap_err();
    assert!(err.to_string().contains("cannot reach inference server"));
}

#[tokio::test]
async fn collect_records_responses_and_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_COMPLETIONS_PATH))
        .and(body_partial_json(json!({
            "model": "test-model",
            "max_tokens": 2048,
            "temperature": 0.0,
            "messages": [{"role": "user", "content": "Say hi."}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "hi"}}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHAT_COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .mount(&server)
        .await;

    let prompts = vec!["Say hi.".to_string(), "Break.".to_string()];
    let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
    let set = client(&server).collect(&prompts, now).await;

    assert_eq!(set.model, "test-model");
    assert_eq!(set.num_samples, 2);
    assert_eq!(set.failed_samples, 1);
    assert_eq!(set.responses[0].prompt, "Say hi.");
    assert_eq!(set.responses[0].response, "hi");
    assert_eq!(set.responses[1].response, "");
    assert!(set.timestamp.starts_with("2025-01-02T03:04:05"));
}

#[tokio::test]
async fn generate_surfaces_status_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such model"))
        .mount(&server)
        .await;

    let err = client(&server).generate("anything").await.unwrap_err();
    assert_eq!(err.status_code(), Some(404));
}
