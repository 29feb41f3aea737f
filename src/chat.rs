use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;

use crate::approval::Verdict;
use crate::config::RuntimeConfig;
use crate::dispatch::{CHAT_TO_AGENT_TAG, ROLE_MARKER_PREFIX};
use crate::error::format_cli_error;
use crate::memory::RESUME_KEY;
use crate::mission::{MissionCanceller, MissionController, MissionOutcome, MissionRequest};
use crate::streaming::{ApprovalMode, FollowOutcome, follow_mission, print_outcome, print_trace};
use crate::telemetry::TelemetrySink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Exit,
    Status,
    Help,
    Roles,
    Role(Option<String>),
    Memory(Option<String>),
    Remember { key: String, value: String },
    Reload(Option<String>),
    Trace,
    Pending,
    Approve(String),
    Reject(String),
    Cancel(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedChatCommand {
    NotACommand,
    Command(ChatCommand),
    MissingArgument { usage: &'static str },
    UnknownCommand(String),
}

fn required(
    arg: &str,
    usage: &'static str,
    build: impl FnOnce(String) -> ChatCommand,
) -> ParsedChatCommand {
    if arg.is_empty() {
        ParsedChatCommand::MissingArgument { usage }
    } else {
        ParsedChatCommand::Command(build(arg.to_string()))
    }
}

fn optional(arg: &str) -> Option<String> {
    (!arg.is_empty()).then(|| arg.to_string())
}

pub fn parse_chat_command(input: &str) -> ParsedChatCommand {
    let trimmed = input.trim();

    if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("/exit") {
        return ParsedChatCommand::Command(ChatCommand::Exit);
    }

    if !trimmed.starts_with('/') {
        return ParsedChatCommand::NotACommand;
    }

    let slashless = trimmed.trim_start_matches('/');
    if slashless.is_empty() {
        return ParsedChatCommand::UnknownCommand("/".to_string());
    }

    let mut parts = slashless.splitn(2, char::is_whitespace);
    let command = parts
        .next()
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match command.as_str() {
        "exit" | "quit" => ParsedChatCommand::Command(ChatCommand::Exit),
        "status" => ParsedChatCommand::Command(ChatCommand::Status),
        "help" => ParsedChatCommand::Command(ChatCommand::Help),
        "roles" => ParsedChatCommand::Command(ChatCommand::Roles),
        "role" => ParsedChatCommand::Command(ChatCommand::Role(optional(arg))),
        "memory" => ParsedChatCommand::Command(ChatCommand::Memory(optional(arg))),
        "remember" => match arg.split_once(char::is_whitespace) {
            Some((key, value)) if !value.trim().is_empty() => {
                ParsedChatCommand::Command(ChatCommand::Remember {
                    key: key.to_string(),
                    value: value.trim().to_string(),
                })
            }
            _ => ParsedChatCommand::MissingArgument {
                usage: "/remember <key> <value>",
            },
        },
        "reload" => ParsedChatCommand::Command(ChatCommand::Reload(optional(arg))),
        "trace" => ParsedChatCommand::Command(ChatCommand::Trace),
        "pending" => ParsedChatCommand::Command(ChatCommand::Pending),
        "approve" => required(arg, "/approve <request-id>", ChatCommand::Approve),
        "reject" => required(arg, "/reject <request-id>", ChatCommand::Reject),
        "cancel" => required(arg, "/cancel <mission-id>", ChatCommand::Cancel),
        other => ParsedChatCommand::UnknownCommand(format!("/{other}")),
    }
}

pub fn print_chat_help() {
    println!("Chat commands:");
    println!("- /help: show command quick reference");
    println!("- /status: show provider, dispatch mode, and open missions");
    println!("- /roles: list registered roles");
    println!("- /role [id]: send following messages to one role (no id clears it)");
    println!("- /memory [key]: list memory keys or print one value");
    println!("- /remember <key> <value>: store a value in memory");
    println!("- /reload [path]: re-read the résumé file (defaults to the configured path)");
    println!("- /trace: print the raw event trace of the last finished mission");
    println!("- /pending: list approval requests waiting for a decision");
    println!("- /approve <id> | /reject <id>: answer an approval request");
    println!("- /cancel <mission-id>: cancel a mission left waiting for approval");
    println!("- /exit: end interactive chat");
}

/// Encode a pinned role the way directly-addressed chat messages carry it.
pub fn address_to_role(role: Option<&str>, input: &str) -> String {
    match role {
        Some(role) => format!("{CHAT_TO_AGENT_TAG} {ROLE_MARKER_PREFIX}{role}\n{input}"),
        None => input.to_string(),
    }
}

pub enum ChatCommandAction {
    Continue,
    Exit,
}

pub struct ChatState {
    pub pinned_role: Option<String>,
    /// Missions left running with an open approval request.
    pub deferred: BTreeMap<String, MissionCanceller>,
    /// Mission id and raw event log of the last mission followed to the end.
    pub last_trace: Option<(String, Vec<String>)>,
}

impl ChatState {
    pub fn new() -> Self {
        Self {
            pinned_role: None,
            deferred: BTreeMap::new(),
            last_trace: None,
        }
    }

    pub fn remember_outcome(&mut self, outcome: &MissionOutcome) {
        self.last_trace = Some((outcome.mission_id.clone(), outcome.raw_event_log.clone()));
    }
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn dispatch_chat_command(
    command: ChatCommand,
    cfg: &RuntimeConfig,
    controller: &MissionController,
    state: &mut ChatState,
    telemetry: &TelemetrySink,
) -> Result<ChatCommandAction> {
    match command {
        ChatCommand::Exit => return Ok(ChatCommandAction::Exit),
        ChatCommand::Help => print_chat_help(),
        ChatCommand::Status => {
            println!("Profile: {}", cfg.profile);
            println!("Generator: {}", controller.generator_name());
            println!("Dispatch mode: {}", controller.dispatcher().mode().label());
            println!(
                "Pinned role: {}",
                state.pinned_role.as_deref().unwrap_or("<heuristic>")
            );
            state.deferred.retain(|_, canceller| !canceller.is_cancelled());
            println!("Missions waiting for approval: {}", state.deferred.len());
        }
        ChatCommand::Roles => {
            for role in controller.dispatcher().registry().list() {
                let marker = if role.sensitive_output { "!" } else { " " };
                println!("{marker} {} - {}", role.id, role.name);
            }
        }
        ChatCommand::Role(None) => {
            state.pinned_role = None;
            println!("Role cleared; messages are routed by keyword.");
        }
        ChatCommand::Role(Some(id)) => match controller.dispatcher().registry().resolve(&id) {
            Ok(role) => {
                println!("Messages now go to '{}'.", role.id);
                state.pinned_role = Some(role.id.clone());
            }
            Err(err) => println!("{err}"),
        },
        ChatCommand::Memory(None) => {
            for key in controller.memory().list_keys() {
                println!("- {key}");
            }
        }
        ChatCommand::Memory(Some(key)) => match controller.memory().get(&key) {
            Ok(value) => println!("{value}"),
            Err(err) => println!("{err}"),
        },
        ChatCommand::Remember { key, value } => {
            controller.memory().put(key.clone(), value);
            println!("Stored '{key}'.");
        }
        ChatCommand::Reload(path) => {
            let path = path.map(PathBuf::from).unwrap_or_else(|| cfg.resume_path());
            match controller.memory().load_file(RESUME_KEY, &path) {
                Ok(status) => {
                    telemetry.emit(
                        "memory.reloaded",
                        json!({ "key": RESUME_KEY, "status": status.label() }),
                    );
                    println!("{} -> '{RESUME_KEY}': {}", path.display(), status.label());
                }
                Err(err) => eprintln!("{}", format_cli_error(&err)),
            }
        }
        ChatCommand::Trace => match &state.last_trace {
            Some((mission_id, log)) => print_trace(mission_id, log),
            None => println!("No finished mission yet."),
        },
        ChatCommand::Pending => {
            let pending = controller.gate().pending();
            if pending.is_empty() {
                println!("No approval requests pending.");
            }
            for request in pending {
                println!(
                    "- {} mission={} role={} type={} preview={:?}",
                    request.id,
                    request.mission_id,
                    request.role_id,
                    request.document_type,
                    request.draft_preview
                );
            }
        }
        ChatCommand::Approve(id) => resolve_from_chat(controller, &id, Verdict::Approved, telemetry),
        ChatCommand::Reject(id) => resolve_from_chat(controller, &id, Verdict::Rejected, telemetry),
        ChatCommand::Cancel(mission_id) => match state.deferred.remove(&mission_id) {
            Some(canceller) => {
                canceller.cancel();
                println!("Cancelled {mission_id}.");
            }
            None => println!("No open mission '{mission_id}'."),
        },
    }
    Ok(ChatCommandAction::Continue)
}

fn resolve_from_chat(
    controller: &MissionController,
    id: &str,
    verdict: Verdict,
    telemetry: &TelemetrySink,
) {
    match controller.gate().resolve(id, verdict) {
        Ok(request) => {
            telemetry.emit(
                "chat.approval_answered",
                json!({ "request_id": request.id, "decision": request.decision.label() }),
            );
            println!("Request {} {}.", request.id, request.decision.label());
        }
        Err(err) => eprintln!("{}", format_cli_error(&anyhow::Error::from(err))),
    }
}

pub async fn run_chat(
    cfg: RuntimeConfig,
    controller: Arc<MissionController>,
    telemetry: &TelemetrySink,
) -> Result<()> {
    telemetry.emit(
        "chat.started",
        json!({
            "generator": controller.generator_name(),
            "profile": cfg.profile.clone(),
            "dispatch_mode": controller.dispatcher().mode().label(),
        }),
    );
    tracing::info!(generator = controller.generator_name(), "Using generator");
    println!("Interactive mode started. Type /help for commands or /exit to quit.");
    println!("Sensitive drafts ask for approval; answer 'l' to decide later with /approve or /reject.");

    let stdin = io::stdin();
    let mut line = String::new();
    let mut state = ChatState::new();

    loop {
        print!("copilot> ");
        io::stdout().flush().context("failed to flush stdout")?;
        line.clear();
        let read = stdin
            .read_line(&mut line)
            .context("failed to read input from stdin")?;
        if read == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match parse_chat_command(input) {
            ParsedChatCommand::NotACommand => {}
            ParsedChatCommand::MissingArgument { usage } => {
                println!("Usage: {usage}");
                continue;
            }
            ParsedChatCommand::UnknownCommand(command) => {
                println!("Unknown command '{command}'. Use /help.");
                continue;
            }
            ParsedChatCommand::Command(command) => {
                let action =
                    dispatch_chat_command(command, &cfg, &controller, &mut state, telemetry)?;
                if matches!(action, ChatCommandAction::Exit) {
                    break;
                }
                continue;
            }
        }

        let query = address_to_role(state.pinned_role.as_deref(), input);
        let handle = controller.spawn(MissionRequest::new(query));
        match follow_mission(
            handle,
            controller.gate(),
            ApprovalMode::Prompt { allow_defer: true },
            true,
        )
        .await
        {
            Ok(FollowOutcome::Finished(outcome)) => {
                print_outcome(&outcome, false);
                state.remember_outcome(&outcome);
            }
            Ok(FollowOutcome::Deferred(handle, request)) => {
                println!(
                    "Mission {} is waiting on request {}. Use /approve {} or /reject {}.",
                    handle.id(),
                    request.id,
                    request.id,
                    request.id
                );
                state
                    .deferred
                    .insert(handle.id().to_string(), handle.canceller());
                tokio::spawn(async move {
                    match handle.outcome().await {
                        Ok(outcome) => {
                            println!();
                            println!("Mission {} finished ({})", outcome.mission_id, outcome.status.label());
                            print_outcome(&outcome, false);
                        }
                        Err(err) => tracing::warn!(error = %err, "deferred mission ended abnormally"),
                    }
                });
            }
            Err(err) => eprintln!("{}", format_cli_error(&err)),
        }
    }

    for canceller in state.deferred.values() {
        canceller.cancel();
    }
    telemetry.emit("chat.finished", json!({}));
    Ok(())
}
