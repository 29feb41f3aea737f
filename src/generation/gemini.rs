use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::{Generation, GenerationError, Generator, build_prompt};
use crate::memory::MemorySnapshot;
use crate::roles::RoleDescriptor;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent` over HTTPS.
pub struct GeminiGenerator {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    retry_attempts: u32,
    retry_delay_ms: u64,
}

impl GeminiGenerator {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: GEMINI_API_BASE.to_string(),
            retry_attempts: 1,
            retry_delay_ms: 0,
        }
    }

    pub fn with_retry(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    async fn call_once(&self, body: &Value) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| GenerationError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let raw = response
            .json::<Value>()
            .await
            .map_err(|err| GenerationError::Transport(err.to_string()))?;
        extract_candidate_text(&raw).ok_or(GenerationError::EmptyResponse)
    }
}

/// Concatenate the text parts of the first candidate.
pub fn extract_candidate_text(raw: &Value) -> Option<String> {
    let parts = raw["candidates"][0]["content"]["parts"].as_array()?;
    let text = parts
        .iter()
        .filter_map(|part| part["text"].as_str())
        .collect::<Vec<&str>>()
        .join("");
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

pub fn request_body(role: &RoleDescriptor, prompt: &str) -> Value {
    json!({
        "systemInstruction": {
            "parts": [{ "text": role.instruction }]
        },
        "contents": [{
            "role": "user",
            "parts": [{ "text": prompt }]
        }]
    })
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn invoke(
        &self,
        role: &RoleDescriptor,
        sub_query: &str,
        memory: &MemorySnapshot,
    ) -> Result<Generation, GenerationError> {
        let body = request_body(role, &build_prompt(role, sub_query, memory));
        let mut events = Vec::new();
        let mut attempts = 0u32;
        let mut last_error = None;

        while attempts < self.retry_attempts {
            attempts += 1;
            let start = Instant::now();
            match self.call_once(&body).await {
                Ok(text) => {
                    events.push(format!(
                        "model={} role={} attempt={} latency_ms={}",
                        self.model,
                        role.id,
                        attempts,
                        start.elapsed().as_millis()
                    ));
                    return Ok(Generation {
                        events,
                        final_text: text,
                        document_type: None,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        model = %self.model,
                        role = %role.id,
                        attempt = attempts,
                        error = %err,
                        "Gemini request failed"
                    );
                    events.push(format!("model={} attempt={} error={}", self.model, attempts, err));
                    let retryable = err.is_retryable();
                    last_error = Some(err);
                    if !retryable {
                        break;
                    }
                }
            }

            if attempts < self.retry_attempts && self.retry_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.retry_delay_ms)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GenerationError::Transport("gemini request failed unexpectedly".to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::RoleRegistry;

    #[test]
    fn candidate_text_is_joined() {
        let raw = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Hello, " }, { "text": "world" }] }
            }]
        });
        assert_eq!(extract_candidate_text(&raw).as_deref(), Some("Hello, world"));
        assert_eq!(extract_candidate_text(&json!({ "candidates": [] })), None);
    }

    #[test]
    fn body_carries_instruction_and_prompt() {
        let registry = RoleRegistry::builtin();
        let tutor = registry.resolve("tutor").unwrap();
        let body = request_body(&tutor, "TASK: tutor\nexplain p-values");
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"].as_str(),
            Some(tutor.instruction.as_str())
        );
        assert_eq!(
            body["contents"][0]["parts"][0]["text"].as_str(),
            Some("TASK: tutor\nexplain p-values")
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_after_retries() {
        let registry = RoleRegistry::builtin();
        let tutor = registry.resolve("tutor").unwrap();
        let generator = GeminiGenerator::new("test-key".to_string(), "gemini-2.5-flash".to_string())
            .with_base_url("http://127.0.0.1:9")
            .with_retry(2, 0);
        let err = generator
            .invoke(&tutor, "TASK: tutor\nhi", &MemorySnapshot::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Transport(_)));
    }
}
