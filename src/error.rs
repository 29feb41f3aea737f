use crate::approval::ApprovalError;
use crate::dispatch::DispatchError;
use crate::generation::GenerationError;
use crate::memory::MemoryError;
use crate::mission::MissionError;
use crate::roles::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Provider,
    Mission,
    Approval,
    Input,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Provider => "PROVIDER",
            ErrorCategory::Mission => "MISSION",
            ErrorCategory::Approval => "APPROVAL",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Provider => {
                "Set GOOGLE_API_KEY for the gemini provider or run with --provider offline."
            }
            ErrorCategory::Mission => {
                "Check the role name (career-copilot roles list) and retry with RUST_LOG=info for dispatch logs."
            }
            ErrorCategory::Approval => {
                "Each approval request can be answered once. List open requests with /pending or GET /v1/approvals."
            }
            ErrorCategory::Input => "Run career-copilot --help and correct command arguments.",
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

fn chain_has<T: std::error::Error + Send + Sync + 'static>(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<T>())
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    if chain_has::<ApprovalError>(err) {
        return ErrorCategory::Approval;
    }
    if chain_has::<GenerationError>(err) {
        return ErrorCategory::Provider;
    }
    if chain_has::<DispatchError>(err) || chain_has::<MissionError>(err) {
        return ErrorCategory::Mission;
    }
    if chain_has::<RegistryError>(err) || chain_has::<MemoryError>(err) {
        return ErrorCategory::Input;
    }

    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("api_key") || msg.contains("provider") {
        return ErrorCategory::Provider;
    }

    if msg.contains("invalid value")
        || msg.contains("unknown argument")
        || msg.contains("failed to read input")
        || msg.contains("profile")
        || msg.contains("catalog")
    {
        return ErrorCategory::Input;
    }

    if msg.contains("mission") || msg.contains("role") {
        return ErrorCategory::Mission;
    }

    if msg.contains("approval") {
        return ErrorCategory::Approval;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error) -> String {
    let category = categorize_error(err);
    format!(
        "[{}] {}\nHint: {}",
        category.code(),
        render_error_message(err),
        category.hint()
    )
}

/// Top-level message plus causes, with API keys masked.
pub fn render_error_message(err: &anyhow::Error) -> String {
    redact_api_keys(&format!("{err:#}"))
}

/// Mask `key=<value>` query parameters and bare Google API keys (`AIza...`).
pub fn redact_api_keys(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    loop {
        let next = [rest.find("key="), rest.find("AIza")]
            .into_iter()
            .flatten()
            .min();
        let Some(start) = next else {
            out.push_str(rest);
            break;
        };

        let value_start = if rest[start..].starts_with("key=") {
            start + "key=".len()
        } else {
            start
        };
        out.push_str(&rest[..value_start]);

        let tail = &rest[value_start..];
        let end = tail
            .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'))
            .unwrap_or(tail.len());
        if end > 0 {
            out.push_str("[REDACTED]");
        }
        rest = &tail[end..];
    }

    out
}
