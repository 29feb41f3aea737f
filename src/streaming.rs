use std::io::{self, Write};

use anyhow::{Context, Result};

use crate::approval::{ApprovalGate, ApprovalRequest, Verdict};
use crate::mission::{MissionEvent, MissionHandle, MissionOutcome, MissionStatus, RoleResultStatus};

pub const EVENT_PREFIX: &str = "[EVENT] > ";
pub const FINAL_RESPONSE_PREFIX: &str = "[FINAL RESPONSE] > ";
pub const MISSION_COMPLETED_LINE: &str = "Mission Completed.";
pub const NO_TEXTUAL_RESPONSE: &str = "No textual response produced by the mission.";

/// Raw-log line for an event. Terminal events are logged by the controller.
pub fn event_log_line(event: &MissionEvent) -> Option<String> {
    let body = match event {
        MissionEvent::Dispatched { roles } => format!("dispatch roles={}", roles.join(",")),
        MissionEvent::RoleStarted { role } => format!("{role} started"),
        MissionEvent::Progress { role, line } => format!("{role}: {line}"),
        MissionEvent::ApprovalRequested { request } => format!(
            "approval requested id={} role={} document_type={} preview={:?}",
            request.id, request.role_id, request.document_type, request.draft_preview
        ),
        MissionEvent::ApprovalResolved { request } => format!(
            "approval resolved id={} decision={}",
            request.id,
            request.decision.label()
        ),
        MissionEvent::RoleFinished { role, status } => {
            format!("{role} finished status={}", role_status_label(*status))
        }
        MissionEvent::Finished { .. } => return None,
    };
    Some(format!("{EVENT_PREFIX}{body}"))
}

pub fn final_response_line(text: &str) -> String {
    format!("{FINAL_RESPONSE_PREFIX}{text}")
}

pub fn role_status_label(status: RoleResultStatus) -> &'static str {
    match status {
        RoleResultStatus::Delivered => "delivered",
        RoleResultStatus::Withheld => "withheld",
        RoleResultStatus::Failed => "failed",
    }
}

/// The raw event trace as printed by `ask --show-trace`, chat `/trace`, and
/// after a failed mission.
pub fn format_trace(log: &[String]) -> String {
    if log.is_empty() {
        return "(no events recorded)".to_string();
    }
    let width = log.len().to_string().len();
    log.iter()
        .enumerate()
        .map(|(index, line)| format!("{:>width$} {line}", index + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn print_trace(mission_id: &str, log: &[String]) {
    println!();
    println!("Event trace for mission {mission_id}:");
    println!("{}", format_trace(log));
}

/// How a front end answers approval requests raised while it follows a
/// mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalMode {
    Approve,
    Reject,
    /// Ask on stdin. With `allow_defer`, the reviewer may leave the request
    /// open and stop following the mission.
    Prompt { allow_defer: bool },
}

pub enum FollowOutcome {
    Finished(MissionOutcome),
    /// The reviewer left an approval open; the mission keeps running.
    Deferred(MissionHandle, ApprovalRequest),
}

enum PromptAnswer {
    Verdict(Verdict),
    Defer,
}

async fn prompt_for_verdict(request: &ApprovalRequest, allow_defer: bool) -> Result<PromptAnswer> {
    println!();
    println!("Approval required for {} draft from '{}'", request.document_type, request.role_id);
    println!("Request: {}", request.id);
    println!("Preview: {}", request.draft_preview);
    if allow_defer {
        print!("Approve this draft? [y/n/l=later]: ");
    } else {
        print!("Approve this draft? [y/N]: ");
    }
    io::stdout().flush().context("failed to flush stdout")?;

    let input = tokio::task::spawn_blocking(|| {
        let mut buf = String::new();
        io::stdin().read_line(&mut buf).map(|_| buf.trim().to_lowercase())
    })
    .await
    .context("approval prompt task failed")?
    .context("failed to read input")?;

    Ok(match input.as_str() {
        "y" | "yes" => PromptAnswer::Verdict(Verdict::Approved),
        "l" | "later" if allow_defer => PromptAnswer::Defer,
        _ => PromptAnswer::Verdict(Verdict::Rejected),
    })
}

pub fn print_event(event: &MissionEvent) {
    match event {
        MissionEvent::Dispatched { roles } => println!("Routing to: {}", roles.join(", ")),
        MissionEvent::RoleStarted { role } => println!("[{role}] working..."),
        MissionEvent::Progress { role, line } => println!("[{role}] {line}"),
        MissionEvent::ApprovalResolved { request } => {
            println!("Approval {} {}", request.id, request.decision.label())
        }
        MissionEvent::RoleFinished { .. }
        | MissionEvent::ApprovalRequested { .. }
        | MissionEvent::Finished { .. } => {}
    }
}

/// Stream a mission's events to stdout, answering approval requests per
/// `mode`, until it finishes.
pub async fn follow_mission(
    mut handle: MissionHandle,
    gate: &ApprovalGate,
    mode: ApprovalMode,
    show_progress: bool,
) -> Result<FollowOutcome> {
    while let Some(event) = handle.next_event().await {
        if show_progress {
            print_event(&event);
        }
        match event {
            MissionEvent::ApprovalRequested { request } => {
                let verdict = match mode {
                    ApprovalMode::Approve => Verdict::Approved,
                    ApprovalMode::Reject => Verdict::Rejected,
                    ApprovalMode::Prompt { allow_defer } => {
                        match prompt_for_verdict(&request, allow_defer).await? {
                            PromptAnswer::Verdict(verdict) => verdict,
                            PromptAnswer::Defer => {
                                return Ok(FollowOutcome::Deferred(handle, request));
                            }
                        }
                    }
                };
                if let Err(err) = gate.resolve(&request.id, verdict) {
                    // Another reviewer may have answered first.
                    println!("{err}");
                }
            }
            MissionEvent::Finished { .. } => break,
            _ => {}
        }
    }

    Ok(FollowOutcome::Finished(handle.outcome().await?))
}

pub fn print_outcome(outcome: &MissionOutcome, show_trace: bool) {
    let text = if outcome.final_text.trim().is_empty() {
        NO_TEXTUAL_RESPONSE
    } else {
        outcome.final_text.as_str()
    };
    println!("{text}");

    for draft in outcome.revision_drafts() {
        println!();
        println!("Draft from '{}' returned for revision:", draft.role);
        println!("{}", draft.text);
    }

    if outcome.status == MissionStatus::Failed {
        let reason = outcome
            .failure
            .as_ref()
            .map(|failure| failure.describe())
            .unwrap_or_else(|| "unknown failure".to_string());
        println!();
        println!("Mission {} failed: {}", outcome.mission_id, reason);
    }

    if show_trace || outcome.status == MissionStatus::Failed {
        print_trace(&outcome.mission_id, &outcome.raw_event_log);
    }
}
