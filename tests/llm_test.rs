//! Integration tests for the chat-completions question generator using wiremock

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quizset::config::{LlmConfig, LlmProvider};
use quizset::llm::{GenerationError, OpenAiQuestionGenerator, QuestionGenerator};

fn config(server: &MockServer, provider: LlmProvider) -> LlmConfig {
    LlmConfig {
        provider,
        endpoint: server.uri(),
        api_key: Some("sk-test".to_string()),
        model: "vision-model".to_string(),
        question_count: 2,
        input_price_per_token: 0.001,
        output_price_per_token: 0.002,
        request_timeout_secs: 5,
        ..LlmConfig::default()
    }
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "choices": [{ "message": { "role": "assistant", "content": content, "refusal": null } }],
        "usage": { "prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150 }
    })
}

fn urls() -> Vec<String> {
    vec![
        "https://search.pstatic.net/common/?src=a.jpg".to_string(),
        "https://search.pstatic.net/common/?src=b.jpg".to_string(),
    ]
}

/// Questions come back ordered and priced from token usage
#[tokio::test]
async fn test_generate_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "vision-model",
            "response_format": { "type": "json_schema" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"user_question2": "Which one is older?", "user_question1": "What breed are these dogs?"}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let generator = OpenAiQuestionGenerator::new(config(&server, LlmProvider::OpenAi)).unwrap();
    let generated = generator.generate(&urls()).await.unwrap();

    assert_eq!(
        generated.questions,
        vec!["What breed are these dogs?", "Which one is older?"]
    );
    assert!((generated.total_cost - 0.2).abs() < 1e-9);
}

/// The user message carries every image at high detail
#[tokio::test]
async fn test_request_carries_images() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"user_question1": "a", "user_question2": "b"}"#,
        )))
        .mount(&server)
        .await;

    let generator = OpenAiQuestionGenerator::new(config(&server, LlmProvider::OpenAi)).unwrap();
    generator.generate(&urls()).await.unwrap();

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages[0]["role"], "system");
    assert!(messages[0]["content"].as_str().unwrap().contains("2 images"));

    let parts = messages[1]["content"].as_array().unwrap();
    let images: Vec<&str> = parts
        .iter()
        .filter(|p| p["type"] == "image_url")
        .map(|p| {
            assert_eq!(p["image_url"]["detail"], "high");
            p["image_url"]["url"].as_str().unwrap()
        })
        .collect();
    assert_eq!(images, urls());
}

/// Azure deployments use their own path, api-version and key header
#[tokio::test]
async fn test_azure_routing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/openai/deployments/vision-model/chat/completions"))
        .and(query_param("api-version", "2024-08-01-preview"))
        .and(header("api-key", "sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"user_question1": "What is it?"}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let generator = OpenAiQuestionGenerator::new(config(&server, LlmProvider::Azure)).unwrap();
    let generated = generator.generate(&urls()[..1]).await.unwrap();
    assert_eq!(generated.questions, vec!["What is it?"]);
}

#[tokio::test]
async fn test_api_error_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let generator = OpenAiQuestionGenerator::new(config(&server, LlmProvider::OpenAi)).unwrap();
    let err = generator.generate(&urls()).await.unwrap_err();
    assert!(matches!(err, GenerationError::Api { status: 429, ref body } if body == "slow down"));
}

#[tokio::test]
async fn test_refusal_and_empty_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": null, "refusal": "I can't help with that." } }]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let generator = OpenAiQuestionGenerator::new(config(&server, LlmProvider::OpenAi)).unwrap();
    assert!(matches!(
        generator.generate(&urls()).await,
        Err(GenerationError::Refused(_))
    ));
    assert!(matches!(
        generator.generate(&urls()).await,
        Err(GenerationError::EmptyResponse)
    ));
}

#[tokio::test]
async fn test_no_images_is_rejected_locally() {
    let server = MockServer::start().await;
    let generator = OpenAiQuestionGenerator::new(config(&server, LlmProvider::OpenAi)).unwrap();
    assert!(matches!(
        generator.generate(&[]).await,
        Err(GenerationError::NoImages)
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}
