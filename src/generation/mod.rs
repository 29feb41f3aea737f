//! Text-generation collaborators invoked once per role per mission.

pub mod gemini;
pub mod offline;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::cli::Provider;
use crate::config::RuntimeConfig;
use crate::memory::MemorySnapshot;
use crate::roles::RoleDescriptor;
use crate::tools::Toolbox;

pub use gemini::GeminiGenerator;
pub use offline::OfflineGenerator;

pub const GOOGLE_API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Result of one role invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Generation {
    /// Intermediate progress lines (tool calls, provider attempts).
    pub events: Vec<String>,
    pub final_text: String,
    /// Overrides the role's default document type when the draft is gated.
    pub document_type: Option<String>,
}

impl Generation {
    pub fn text(final_text: impl Into<String>) -> Self {
        Self {
            final_text: final_text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Transport(String),
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("provider response contained no text")]
    EmptyResponse,
    #[error("role '{role}' failed: {message}")]
    Role { role: String, message: String },
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Transport(_) | GenerationError::EmptyResponse => true,
            GenerationError::Http { status, .. } => *status == 429 || *status >= 500,
            GenerationError::Role { .. } => false,
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        role: &RoleDescriptor,
        sub_query: &str,
        memory: &MemorySnapshot,
    ) -> Result<Generation, GenerationError>;
}

/// Prompt body sent to hosted models: stored context first, then the task.
pub fn build_prompt(role: &RoleDescriptor, sub_query: &str, memory: &MemorySnapshot) -> String {
    let capabilities = if role.capabilities.is_empty() {
        "<none>".to_string()
    } else {
        role.capabilities.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    format!(
        "Role: {} ({})\nCapabilities: {}\n\nStored context:\n{}\n\n{}",
        role.name,
        role.id,
        capabilities,
        memory.render(),
        sub_query.trim()
    )
}

/// Document type implied by the wording of a mission.
pub fn infer_document_type(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    let rules: &[(&str, &str)] = &[
        ("layoff", "Layoff pitch"),
        ("laid off", "Layoff pitch"),
        ("cover letter", "Cover letter"),
        ("linkedin", "LinkedIn summary"),
        ("negotiat", "Negotiation script"),
        ("pitch", "Interview pitch"),
        ("interview", "Interview answer"),
    ];
    rules
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, document_type)| *document_type)
}

pub fn resolve_provider(requested: Provider) -> Provider {
    match requested {
        Provider::Auto if env_present(GOOGLE_API_KEY_ENV) => Provider::Gemini,
        Provider::Auto => {
            tracing::warn!(
                "{} is not set; falling back to the offline generator",
                GOOGLE_API_KEY_ENV
            );
            Provider::Offline
        }
        other => other,
    }
}

pub fn build_generator(cfg: &RuntimeConfig) -> Result<(Arc<dyn Generator>, Provider)> {
    let provider = resolve_provider(cfg.provider);
    match provider {
        Provider::Gemini => {
            let api_key = std::env::var(GOOGLE_API_KEY_ENV)
                .context("GOOGLE_API_KEY is required for the gemini provider")?;
            let model_name = cfg
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
            validate_model_for_provider(provider, &model_name)?;
            let generator = GeminiGenerator::new(api_key, model_name)
                .with_retry(cfg.generation_retry_attempts, cfg.generation_retry_delay_ms);
            Ok((Arc::new(generator), provider))
        }
        Provider::Offline | Provider::Auto => Ok((
            Arc::new(OfflineGenerator::new(Toolbox::default())),
            Provider::Offline,
        )),
    }
}

pub fn validate_model_for_provider(provider: Provider, model_name: &str) -> Result<()> {
    let is_valid = match provider {
        Provider::Gemini => model_name.starts_with("gemini"),
        Provider::Offline | Provider::Auto => true,
    };
    if is_valid {
        return Ok(());
    }
    Err(anyhow::anyhow!(
        "model '{}' is not compatible with provider '{}'",
        model_name,
        provider.label()
    ))
}

pub fn env_present(key: &str) -> bool {
    std::env::var(key)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::roles::RoleRegistry;

    #[test]
    fn prompt_carries_context_and_task() {
        let registry = RoleRegistry::builtin();
        let coach = registry.resolve("coach").unwrap();
        let memory = MemoryStore::with_seed([("user:coaching:layoff_reason", "Q3 reduction")]);
        let prompt = build_prompt(&coach, "TASK: coach\nlayoff pitch", &memory.snapshot());
        assert!(prompt.starts_with("Role: Career Coach (coach)"));
        assert!(prompt.contains("- user:coaching:layoff_reason: Q3 reduction"));
        assert!(prompt.ends_with("TASK: coach\nlayoff pitch"));
    }

    #[test]
    fn document_type_follows_wording() {
        assert_eq!(infer_document_type("Draft my layoff pitch"), Some("Layoff pitch"));
        assert_eq!(infer_document_type("Prep an interview pitch"), Some("Interview pitch"));
        assert_eq!(infer_document_type("Write a LinkedIn about section"), Some("LinkedIn summary"));
        assert_eq!(infer_document_type("hello"), None);
    }

    #[test]
    fn model_validation_rejects_foreign_models() {
        assert!(validate_model_for_provider(Provider::Gemini, "gemini-2.5-pro").is_ok());
        assert!(validate_model_for_provider(Provider::Gemini, "gpt-4o").is_err());
        assert!(validate_model_for_provider(Provider::Offline, "anything").is_ok());
    }

    #[test]
    fn retryable_errors() {
        assert!(GenerationError::Transport("reset".into()).is_retryable());
        assert!(GenerationError::Http { status: 503, message: String::new() }.is_retryable());
        assert!(!GenerationError::Http { status: 400, message: String::new() }.is_retryable());
        assert!(!GenerationError::Role { role: "coach".into(), message: "x".into() }.is_retryable());
    }
}
