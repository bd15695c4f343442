//! OpenAI / Azure OpenAI chat-completions client
//!
//! Sends the rendered system prompt plus one user message carrying the image
//! URLs (`detail: high`) and asks for a JSON object with fields
//! `user_question1..N`. Cost is computed from the token usage the API
//! reports.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::prompt::{PromptBuilder, USER_INSTRUCTION};
use super::{GeneratedQuestions, GenerationError, QuestionGenerator};
use crate::config::{LlmConfig, LlmProvider};

lazy_static! {
    static ref QUESTION_KEY: Regex = Regex::new(r"^user_question(\d+)$").unwrap();
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Value>,
    response_format: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ============================================================================
// Client
// ============================================================================

/// Question generator backed by an OpenAI-compatible chat API
pub struct OpenAiQuestionGenerator {
    client: Client,
    config: LlmConfig,
    prompts: PromptBuilder,
}

impl OpenAiQuestionGenerator {
    /// Create a generator from configuration
    pub fn new(config: LlmConfig) -> Result<Self, GenerationError> {
        if config.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(GenerationError::Config(
                "API key missing; set llm.api_key or OPENAI_API_KEY".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GenerationError::Config(format!("Failed to create HTTP client: {e}")))?;

        let prompts = match &config.prompt_path {
            Some(path) => PromptBuilder::with_template(path, config.question_count)?,
            None => PromptBuilder::new(config.question_count)?,
        };

        Ok(Self {
            client,
            config,
            prompts,
        })
    }

    fn completions_url(&self) -> String {
        let endpoint = self.config.endpoint.trim_end_matches('/');
        match self.config.provider {
            LlmProvider::OpenAi => format!("{endpoint}/v1/chat/completions"),
            LlmProvider::Azure => format!(
                "{endpoint}/openai/deployments/{}/chat/completions?api-version={}",
                self.config.model, self.config.api_version
            ),
        }
    }

    fn build_request(&self, image_urls: &[String]) -> Result<ChatRequest, GenerationError> {
        let system = self.prompts.system_prompt(image_urls.len())?;

        let mut content = vec![json!({ "type": "text", "text": USER_INSTRUCTION })];
        content.extend(image_urls.iter().map(|url| {
            json!({
                "type": "image_url",
                "image_url": { "url": url, "detail": "high" }
            })
        }));

        Ok(ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                json!({ "role": "system", "content": system }),
                json!({ "role": "user", "content": content }),
            ],
            response_format: response_schema(self.prompts.question_count()),
        })
    }

    fn cost(&self, usage: Usage) -> f64 {
        usage.prompt_tokens as f64 * self.config.input_price_per_token
            + usage.completion_tokens as f64 * self.config.output_price_per_token
    }
}

/// JSON-schema structured output with fields `user_question1..=count`
fn response_schema(count: usize) -> Value {
    let names: Vec<String> = (1..=count).map(|i| format!("user_question{i}")).collect();
    let properties: Map<String, Value> = names
        .iter()
        .map(|name| (name.clone(), json!({ "type": "string" })))
        .collect();

    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "user_questions_about_images",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": properties,
                "required": names,
                "additionalProperties": false
            }
        }
    })
}

/// Pull the JSON object out of a model reply, tolerating code fences
fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return text[start + 7..start + 7 + end].trim();
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            return &text[start..=end];
        }
    }

    text.trim()
}

/// Questions from a `{"user_questionN": "..."}` object, ordered by N
fn parse_questions(content: &str) -> Result<Vec<String>, GenerationError> {
    let object: Map<String, Value> = serde_json::from_str(extract_json(content))
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

    let mut numbered: Vec<(u32, String)> = object
        .into_iter()
        .filter_map(|(key, value)| {
            let n = QUESTION_KEY
                .captures(&key)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())?;
            match value {
                Value::String(q) if !q.trim().is_empty() => Some((n, q.trim().to_string())),
                _ => None,
            }
        })
        .collect();

    if numbered.is_empty() {
        return Err(GenerationError::MalformedResponse(
            "no user_questionN fields in response".to_string(),
        ));
    }

    numbered.sort_by_key(|(n, _)| *n);
    Ok(numbered.into_iter().map(|(_, q)| q).collect())
}

#[async_trait]
impl QuestionGenerator for OpenAiQuestionGenerator {
    async fn generate(&self, image_urls: &[String]) -> Result<GeneratedQuestions, GenerationError> {
        if image_urls.is_empty() {
            return Err(GenerationError::NoImages);
        }

        let request = self.build_request(image_urls)?;
        let api_key = self.config.api_key.as_deref().unwrap_or_default();

        let builder = self.client.post(self.completions_url()).json(&request);
        let builder = match self.config.provider {
            LlmProvider::OpenAi => builder.bearer_auth(api_key),
            LlmProvider::Azure => builder.header("api-key", api_key),
        };

        tracing::debug!(images = image_urls.len(), model = %self.config.model, "Requesting questions");

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::Http(e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api { status, body });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(GenerationError::EmptyResponse)?;

        if let Some(refusal) = message.refusal.filter(|r| !r.is_empty()) {
            return Err(GenerationError::Refused(refusal));
        }

        let content = message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)?;

        let questions = parse_questions(&content)?;
        let total_cost = self.cost(parsed.usage.unwrap_or_default());

        tracing::debug!(
            questions = questions.len(),
            cost = total_cost,
            "Questions generated"
        );

        Ok(GeneratedQuestions {
            questions,
            total_cost,
        })
    }
}
