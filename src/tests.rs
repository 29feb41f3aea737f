use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde_json::json;
use tempfile::tempdir;

use crate::approval::*;
use crate::chat::{ChatCommand, ChatState, dispatch_chat_command};
use crate::cli::*;
use crate::config::*;
use crate::dispatch::*;
use crate::error::*;
use crate::generation::*;
use crate::memory::*;
use crate::mission::*;
use crate::roles::*;
use crate::streaming::*;
use crate::telemetry::*;

pub(crate) fn base_runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        profile: "default".to_string(),
        config_path: ".copilot/config.toml".to_string(),
        provider: Provider::Offline,
        model: None,
        user_id: "test-user".to_string(),
        resume_path: DEFAULT_RESUME_PATH.to_string(),
        roles_path: DEFAULT_ROLES_PATH.to_string(),
        output_dir: None,
        dispatch_mode: DispatchMode::FirstMatch,
        generation_retry_attempts: 1,
        generation_retry_delay_ms: 0,
        telemetry_enabled: false,
        telemetry_path: DEFAULT_TELEMETRY_PATH.to_string(),
        memory_seed: default_seed(),
    }
}

const LAYOFF_DRAFT: &str = "I was part of a company-wide reduction, and I am ready for what is next.";

/// Replays canned generations per role and records which roles ran and the
/// memory each one was handed.
#[derive(Default)]
struct ScriptedGenerator {
    replies: HashMap<String, Result<Generation, GenerationError>>,
    calls: Mutex<Vec<String>>,
    snapshots: Mutex<Vec<(String, MemorySnapshot)>>,
}

impl ScriptedGenerator {
    fn reply(mut self, role: &str, text: &str) -> Self {
        self.replies
            .insert(role.to_string(), Ok(Generation::text(text)));
        self
    }

    fn fail(mut self, role: &str, message: &str) -> Self {
        self.replies.insert(
            role.to_string(),
            Err(GenerationError::Role {
                role: role.to_string(),
                message: message.to_string(),
            }),
        );
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn snapshot_seen_by(&self, role: &str) -> MemorySnapshot {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .find(|(seen_by, _)| seen_by == role)
            .map(|(_, snapshot)| snapshot.clone())
            .unwrap_or_else(|| panic!("role {role} never ran"))
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(
        &self,
        role: &RoleDescriptor,
        sub_query: &str,
        memory: &MemorySnapshot,
    ) -> Result<Generation, GenerationError> {
        self.calls.lock().unwrap().push(role.id.clone());
        self.snapshots
            .lock()
            .unwrap()
            .push((role.id.clone(), memory.clone()));
        assert!(sub_query.starts_with(&format!("TASK: {}", role.id)));
        self.replies
            .get(&role.id)
            .cloned()
            .unwrap_or_else(|| Ok(Generation::text(format!("{} reply", role.id))))
    }
}

fn controller_with(
    generator: Arc<dyn Generator>,
    mode: DispatchMode,
) -> (Arc<MissionController>, Arc<MemoryStore>) {
    let memory = Arc::new(MemoryStore::with_seed(default_seed()));
    let controller = MissionController::new(
        Dispatcher::new(Arc::new(RoleRegistry::builtin()), mode),
        Arc::clone(&memory),
        Arc::new(ApprovalGate::new()),
        generator,
        TelemetrySink::disabled("test"),
    );
    (Arc::new(controller), memory)
}

async fn wait_for_pending(gate: &ApprovalGate, mission_id: &str) -> ApprovalRequest {
    for _ in 0..200 {
        if let Some(request) = gate.pending_for_mission(mission_id).into_iter().next() {
            return request;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no approval request opened for {mission_id}");
}

#[test]
fn profile_values_apply_and_cli_overrides_win() {
    let profiles: ProfilesFile = toml::from_str(
        r#"
[profiles.work]
provider = "offline"
user_id = "profile-user"
dispatch_mode = "fan-out"
generation_retry_attempts = 0

[profiles.work.memory]
"user:preferences:location" = "Austin, TX"
"user:goal" = "Staff data scientist"
"#,
    )
    .unwrap();

    let cli = Cli::try_parse_from([
        "career-copilot",
        "--profile",
        "work",
        "--user-id",
        "cli-user",
        "doctor",
    ])
    .unwrap();
    let cfg = resolve_runtime_config(&cli, &profiles).unwrap();

    assert_eq!(cfg.provider, Provider::Offline);
    assert_eq!(cfg.user_id, "cli-user");
    assert_eq!(cfg.dispatch_mode, DispatchMode::FanOut);
    assert_eq!(cfg.generation_retry_attempts, 1);
    assert_eq!(cfg.resume_path, DEFAULT_RESUME_PATH);

    let seed = cfg.memory_seed.iter().cloned().collect::<HashMap<_, _>>();
    assert_eq!(seed["user:preferences:location"], "Austin, TX");
    assert_eq!(seed["user:goal"], "Staff data scientist");
    assert_eq!(seed[RESUME_KEY], "Placeholder resume content.");
    assert_eq!(cfg.memory_seed[0].0, RESUME_KEY);
}

#[test]
fn unknown_profile_lists_available_names() {
    let profiles: ProfilesFile = toml::from_str("[profiles.work]\nprovider = \"offline\"\n").unwrap();
    let cli = Cli::try_parse_from(["career-copilot", "--profile", "home", "doctor"]).unwrap();
    let err = resolve_runtime_config(&cli, &profiles).unwrap_err();
    assert!(err.to_string().contains("Available profiles: work"));
    assert_eq!(categorize_error(&err), ErrorCategory::Input);
}

#[test]
fn unknown_profile_fields_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[profiles.default]\nsession_backend = \"sqlite\"\n").unwrap();
    let err = load_profiles(path.to_str().unwrap()).unwrap_err();
    assert!(format!("{err:#}").contains("invalid profile configuration"));
}

#[test]
fn telemetry_summary_tracks_each_mission_and_unanswered_approvals() {
    let lines = [
        json!({ "run_id": "r1", "event": "mission.started", "ts_unix_ms": 10, "mission_id": "m1" }),
        json!({ "run_id": "r1", "event": "approval.opened", "ts_unix_ms": 11, "mission_id": "m1", "request_id": "apr_1" }),
        json!({ "run_id": "r1", "event": "approval.approved", "ts_unix_ms": 12, "mission_id": "m1", "request_id": "apr_1" }),
        json!({ "run_id": "r1", "event": "mission.completed", "ts_unix_ms": 13, "mission_id": "m1" }),
        json!({ "run_id": "r2", "event": "mission.started", "ts_unix_ms": 20, "mission_id": "m2" }),
        json!({ "run_id": "r2", "event": "role.failed", "ts_unix_ms": 21, "mission_id": "m2", "role": "tutor" }),
        json!({ "run_id": "r2", "event": "mission.failed", "ts_unix_ms": 22, "mission_id": "m2", "reason": { "kind": "generation", "role": "tutor", "message": "x" } }),
        json!({ "run_id": "r3", "event": "mission.started", "ts_unix_ms": 30, "mission_id": "m3" }),
        json!({ "run_id": "r3", "event": "approval.opened", "ts_unix_ms": 31, "mission_id": "m3", "request_id": "apr_3" }),
    ]
    .iter()
    .map(|value| value.to_string())
    .chain(std::iter::once("not json".to_string()))
    .collect::<Vec<String>>();

    let summary = summarize_telemetry_lines(lines.clone(), 100);
    assert_eq!(summary.parsed_events, 9);
    assert_eq!(summary.parse_errors, 1);
    assert_eq!(summary.runs, 3);
    assert_eq!(summary.missions.len(), 3);
    assert_eq!(summary.missions["m1"].status, "completed");
    assert_eq!(
        summary.missions["m1"].approvals,
        vec![("apr_1".to_string(), "approved".to_string())]
    );
    assert_eq!(summary.missions["m2"].status, "failed");
    assert_eq!(summary.missions["m2"].failure.as_deref(), Some("generation"));
    assert_eq!(summary.missions["m2"].failed_roles, vec!["tutor".to_string()]);
    assert_eq!(summary.missions["m3"].status, "running");
    assert_eq!(summary.missions_with_status("running"), 1);
    assert_eq!(summary.decisions("approved"), 1);
    assert_eq!(summary.unanswered_approvals.len(), 1);
    assert_eq!(summary.unanswered_approvals["apr_3"], "m3");
    assert_eq!(summary.last_event_ts_unix_ms, Some(31));

    // Only the newest lines: the opening of apr_1 falls outside the window.
    let tail = summarize_telemetry_lines(lines, 8);
    assert_eq!(tail.parsed_events, 7);
    assert!(!tail.unanswered_approvals.contains_key("apr_1"));
    assert!(tail.unanswered_approvals.contains_key("apr_3"));
}

#[test]
fn telemetry_sink_writes_jsonl_records() {
    let dir = tempdir().unwrap();
    let mut cfg = base_runtime_config();
    cfg.telemetry_enabled = true;
    cfg.telemetry_path = dir
        .path()
        .join("events.jsonl")
        .to_string_lossy()
        .to_string();
    let sink = TelemetrySink::new(&cfg, "ask".to_string());
    sink.emit("mission.started", json!({ "mission_id": "mission_00000001" }));

    let content = std::fs::read_to_string(&cfg.telemetry_path).unwrap();
    let record: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(record["event"], "mission.started");
    assert_eq!(record["command"], "ask");
    assert_eq!(record["user_id"], "test-user");
    assert_eq!(record["mission_id"], "mission_00000001");
}

#[tokio::test]
async fn layoff_pitch_waits_for_approval_then_delivers_draft() {
    let generator = Arc::new(ScriptedGenerator::default().reply(COACH_ROLE, LAYOFF_DRAFT));
    let (controller, memory) = controller_with(generator.clone(), DispatchMode::FirstMatch);

    let mut handle =
        controller.spawn(MissionRequest::new("Help me craft a layoff pitch for my interviews"));
    let status = handle
        .wait_for_status(MissionStatus::AwaitingApproval)
        .await;
    assert_eq!(status, MissionStatus::AwaitingApproval);

    let request = wait_for_pending(controller.gate(), handle.id()).await;
    assert_eq!(request.role_id, COACH_ROLE);
    assert_eq!(request.document_type, "Layoff pitch");
    assert_eq!(request.draft_preview, draft_preview(LAYOFF_DRAFT));
    assert!(request.draft_preview.chars().count() <= DRAFT_PREVIEW_CHARS + 3);

    controller
        .gate()
        .resolve(&request.id, Verdict::Approved)
        .unwrap();
    let outcome = handle.outcome().await.unwrap();

    assert_eq!(outcome.status, MissionStatus::Completed);
    assert_eq!(outcome.final_text, LAYOFF_DRAFT);
    assert!(
        outcome
            .raw_event_log
            .contains(&final_response_line(LAYOFF_DRAFT))
    );
    assert_eq!(
        outcome.raw_event_log.last().map(String::as_str),
        Some(MISSION_COMPLETED_LINE)
    );
    assert_eq!(generator.calls(), vec![COACH_ROLE.to_string()]);
    assert_eq!(
        memory.get(&format!("{ARTIFACT_PREFIX}{COACH_ROLE}:latest")).unwrap(),
        LAYOFF_DRAFT
    );
    assert!(controller.gate().pending().is_empty());
}

#[tokio::test]
async fn rejected_draft_is_withheld_and_returned_for_revision() {
    let generator = Arc::new(ScriptedGenerator::default().reply(COACH_ROLE, LAYOFF_DRAFT));
    let (controller, memory) = controller_with(generator, DispatchMode::FirstMatch);

    let handle = controller.spawn(MissionRequest::new("I was laid off, write my story"));
    let request = wait_for_pending(controller.gate(), handle.id()).await;
    controller
        .gate()
        .resolve(&request.id, Verdict::Rejected)
        .unwrap();
    let outcome = handle.outcome().await.unwrap();

    assert_eq!(outcome.status, MissionStatus::Completed);
    assert!(!outcome.final_text.contains(LAYOFF_DRAFT));
    assert!(outcome.final_text.contains("returned for revision"));
    let drafts = outcome.revision_drafts().collect::<Vec<_>>();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].text, LAYOFF_DRAFT);
    assert!(memory.get(&format!("{ARTIFACT_PREFIX}{COACH_ROLE}:latest")).is_err());
}

#[tokio::test]
async fn hiring_trends_route_to_research_without_approval() {
    let (controller, _) = controller_with(
        Arc::new(OfflineGenerator::default()),
        DispatchMode::FirstMatch,
    );
    let outcome = controller
        .run(MissionRequest::new(
            "What are the hiring trends for data scientists?",
        ))
        .await
        .unwrap();

    assert_eq!(outcome.status, MissionStatus::Completed);
    assert_eq!(outcome.roles.len(), 1);
    assert_eq!(outcome.roles[0].role, RESEARCH_ROLE);
    assert!(outcome.final_text.contains("source:"));
    assert!(outcome.roles[0].approval.is_none());
    assert!(
        outcome
            .raw_event_log
            .iter()
            .any(|line| line.starts_with(EVENT_PREFIX) && line.contains("tool_call"))
    );
    assert!(controller.gate().all().is_empty());
}

#[tokio::test]
async fn cancelling_a_waiting_mission_clears_its_approval() {
    let generator = Arc::new(ScriptedGenerator::default().reply(COACH_ROLE, LAYOFF_DRAFT));
    let (controller, _) = controller_with(generator, DispatchMode::FirstMatch);

    let mut handle = controller.spawn(
        MissionRequest::new("anything at all").with_role_hint(Some(COACH_ROLE.to_string())),
    );
    handle
        .wait_for_status(MissionStatus::AwaitingApproval)
        .await;
    let request = wait_for_pending(controller.gate(), handle.id()).await;

    handle.cancel();
    assert!(controller.gate().pending().is_empty());
    let outcome = handle.outcome().await.unwrap();

    assert_eq!(outcome.status, MissionStatus::Failed);
    assert_eq!(outcome.failure, Some(FailureReason::Cancelled));
    assert_eq!(
        controller.gate().get(&request.id).unwrap().decision,
        Decision::Cancelled
    );
    assert!(matches!(
        controller.gate().resolve(&request.id, Verdict::Approved),
        Err(ApprovalError::AlreadyResolved { .. })
    ));
}

#[tokio::test]
async fn second_answer_to_a_request_is_already_resolved() {
    let generator = Arc::new(ScriptedGenerator::default().reply(COACH_ROLE, LAYOFF_DRAFT));
    let (controller, _) = controller_with(generator, DispatchMode::FirstMatch);

    let handle = controller.spawn(MissionRequest::new("Prepare my salary negotiation coach notes"));
    let request = wait_for_pending(controller.gate(), handle.id()).await;
    let first = controller
        .gate()
        .resolve(&request.id, Verdict::Approved)
        .unwrap();
    assert_eq!(first.decision, Decision::Approved);

    let err = controller
        .gate()
        .resolve(&request.id, Verdict::Rejected)
        .unwrap_err();
    assert_eq!(
        err,
        ApprovalError::AlreadyResolved {
            id: request.id.clone(),
            decision: Decision::Approved,
        }
    );
    assert_eq!(categorize_error(&anyhow::Error::from(err)), ErrorCategory::Approval);

    let outcome = handle.outcome().await.unwrap();
    assert_eq!(outcome.final_text, LAYOFF_DRAFT);
}

#[tokio::test]
async fn role_failure_fails_mission_and_keeps_partial_results() {
    let generator = Arc::new(
        ScriptedGenerator::default()
            .reply(RESUME_ROLE, "Match Score: 72/100")
            .fail(TUTOR_ROLE, "quiz bank unavailable"),
    );
    let (controller, _) = controller_with(generator.clone(), DispatchMode::FanOut);

    let outcome = controller
        .run(MissionRequest::new("Tailor my resume and quiz me on statistics"))
        .await
        .unwrap();

    assert_eq!(generator.calls(), vec![RESUME_ROLE.to_string(), TUTOR_ROLE.to_string()]);
    assert_eq!(outcome.status, MissionStatus::Failed);
    assert!(matches!(
        outcome.failure,
        Some(FailureReason::Generation { ref role, .. }) if role == TUTOR_ROLE
    ));
    assert!(outcome.final_text.starts_with("[resume]\nMatch Score: 72/100"));
    assert!(outcome.final_text.contains("[tutor] failed:"));
    assert!(
        outcome
            .raw_event_log
            .last()
            .unwrap()
            .starts_with("Mission Failed:")
    );
}

#[tokio::test]
async fn later_role_sees_output_stored_by_earlier_role() {
    let generator = Arc::new(ScriptedGenerator::default().reply(RESUME_ROLE, "Match Score: 72/100"));
    let (controller, _) = controller_with(generator.clone(), DispatchMode::FanOut);

    let outcome = controller
        .run(MissionRequest::new("Tailor my resume and quiz me on statistics"))
        .await
        .unwrap();

    assert_eq!(outcome.status, MissionStatus::Completed);
    assert_eq!(generator.calls(), vec![RESUME_ROLE.to_string(), TUTOR_ROLE.to_string()]);
    let artifact = format!("{ARTIFACT_PREFIX}{RESUME_ROLE}:latest");
    assert_eq!(generator.snapshot_seen_by(RESUME_ROLE).get(&artifact), None);
    assert_eq!(
        generator.snapshot_seen_by(TUTOR_ROLE).get(&artifact),
        Some("Match Score: 72/100")
    );
}

#[tokio::test]
async fn approved_missions_leave_a_bounded_gate() {
    let generator = Arc::new(ScriptedGenerator::default().reply(COACH_ROLE, LAYOFF_DRAFT));
    let controller = Arc::new(MissionController::new(
        Dispatcher::new(Arc::new(RoleRegistry::builtin()), DispatchMode::FirstMatch),
        Arc::new(MemoryStore::with_seed(default_seed())),
        Arc::new(ApprovalGate::with_retention(3)),
        generator,
        TelemetrySink::disabled("test"),
    ));

    let mut request_ids = Vec::new();
    for _ in 0..8 {
        let handle = controller.spawn(MissionRequest::new("Help me pitch my layoff story"));
        let request = wait_for_pending(controller.gate(), handle.id()).await;
        controller
            .gate()
            .resolve(&request.id, Verdict::Approved)
            .unwrap();
        assert_eq!(handle.outcome().await.unwrap().status, MissionStatus::Completed);
        request_ids.push(request.id);
    }

    assert_eq!(controller.gate().all().len(), 3);
    assert!(controller.gate().pending().is_empty());
    assert!(matches!(
        controller.gate().get(&request_ids[0]),
        Err(ApprovalError::UnknownRequest(_))
    ));
    assert!(controller.gate().get(&request_ids[7]).is_ok());
}

#[tokio::test]
async fn trace_is_readable_while_mission_waits() {
    let generator = Arc::new(ScriptedGenerator::default().reply(COACH_ROLE, LAYOFF_DRAFT));
    let (controller, _) = controller_with(generator, DispatchMode::FirstMatch);

    let mut handle = controller.spawn(MissionRequest::new("Help me pitch my layoff story"));
    handle
        .wait_for_status(MissionStatus::AwaitingApproval)
        .await;
    let request = wait_for_pending(controller.gate(), handle.id()).await;
    let trace = handle.trace();
    let live = trace.lines();
    assert!(live[0].starts_with(EVENT_PREFIX));
    assert!(live.iter().any(|line| line.contains(&request.id)));
    assert!(!live.iter().any(|line| line.starts_with(FINAL_RESPONSE_PREFIX)));

    controller
        .gate()
        .resolve(&request.id, Verdict::Approved)
        .unwrap();
    let outcome = handle.outcome().await.unwrap();
    assert_eq!(outcome.raw_event_log, trace.lines());
    assert!(outcome.raw_event_log.len() > live.len());
}

#[tokio::test]
async fn chat_reload_rereads_the_resume_file() {
    let dir = tempdir().unwrap();
    let resume = dir.path().join("resume.txt");
    let mut cfg = base_runtime_config();
    cfg.resume_path = resume.display().to_string();
    let (controller, memory) = controller_with(
        Arc::new(OfflineGenerator::default()),
        DispatchMode::FirstMatch,
    );
    let telemetry = TelemetrySink::disabled("chat");
    let mut state = ChatState::new();

    let before = memory.get(RESUME_KEY).unwrap();
    dispatch_chat_command(ChatCommand::Reload(None), &cfg, &controller, &mut state, &telemetry)
        .unwrap();
    assert_eq!(memory.get(RESUME_KEY).unwrap(), before);

    let text = "Analytics engineer, six years of dbt, SQL and Looker in fintech.";
    std::fs::write(&resume, text).unwrap();
    dispatch_chat_command(ChatCommand::Reload(None), &cfg, &controller, &mut state, &telemetry)
        .unwrap();
    assert_eq!(memory.get(RESUME_KEY).unwrap(), text);

    let other = dir.path().join("resume-v2.txt");
    std::fs::write(&other, "Staff analytics engineer with a decade of warehouse design.").unwrap();
    dispatch_chat_command(
        ChatCommand::Reload(Some(other.display().to_string())),
        &cfg,
        &controller,
        &mut state,
        &telemetry,
    )
    .unwrap();
    assert!(memory.get(RESUME_KEY).unwrap().starts_with("Staff analytics engineer"));
}

#[tokio::test]
async fn chat_trace_keeps_the_last_finished_mission() {
    let (controller, _) = controller_with(
        Arc::new(OfflineGenerator::default()),
        DispatchMode::FirstMatch,
    );
    let outcome = controller
        .run(MissionRequest::new("latest hiring trends for GCP data engineers"))
        .await
        .unwrap();
    let mut state = ChatState::new();
    assert!(state.last_trace.is_none());
    state.remember_outcome(&outcome);

    let (mission_id, log) = state.last_trace.clone().unwrap();
    assert_eq!(mission_id, outcome.mission_id);
    assert_eq!(log.last().map(String::as_str), Some(MISSION_COMPLETED_LINE));
    assert!(format_trace(&log).contains("dispatch roles=research"));
}

#[tokio::test]
async fn empty_registry_fails_without_role() {
    let controller = Arc::new(MissionController::new(
        Dispatcher::new(Arc::new(RoleRegistry::new()), DispatchMode::FirstMatch),
        Arc::new(MemoryStore::new()),
        Arc::new(ApprovalGate::new()),
        Arc::new(ScriptedGenerator::default()),
        TelemetrySink::disabled("test"),
    ));
    let outcome = controller.run(MissionRequest::new("hello")).await.unwrap();
    assert_eq!(outcome.status, MissionStatus::Failed);
    assert!(matches!(
        outcome.failure,
        Some(FailureReason::NoRoleAvailable { .. })
    ));
    assert!(outcome.final_text.is_empty());
}

#[tokio::test]
async fn loaded_resume_feeds_the_resume_role() {
    let dir = tempdir().unwrap();
    let resume = dir.path().join("resume.txt");
    std::fs::write(
        &resume,
        "Data scientist with 5 years of Python, SQL, machine learning and A/B testing experience.",
    )
    .unwrap();

    let (controller, memory) = controller_with(
        Arc::new(OfflineGenerator::default()),
        DispatchMode::FirstMatch,
    );
    let status = memory.load_file(RESUME_KEY, &resume).unwrap();
    assert!(matches!(status, FileLoadStatus::Loaded { .. }));

    let outcome = controller
        .run(MissionRequest::new(
            "Tailor my resume to this job description. Requirements: Python, SQL, Spark",
        ))
        .await
        .unwrap();
    assert_eq!(outcome.roles[0].role, RESUME_ROLE);
    assert_eq!(outcome.status, MissionStatus::Completed);
    assert!(outcome.final_text.contains("Match Score"));
}

#[tokio::test]
async fn delivered_output_is_mirrored_to_output_dir() {
    let dir = tempdir().unwrap();
    let memory = Arc::new(MemoryStore::with_seed(default_seed()));
    let controller = Arc::new(
        MissionController::new(
            Dispatcher::new(Arc::new(RoleRegistry::builtin()), DispatchMode::FirstMatch),
            memory,
            Arc::new(ApprovalGate::new()),
            Arc::new(OfflineGenerator::default()),
            TelemetrySink::disabled("test"),
        )
        .with_output_dir(Some(dir.path().to_path_buf())),
    );

    let outcome = controller
        .run(MissionRequest::new("Show me salary trends in the industry"))
        .await
        .unwrap();
    let written = std::fs::read_to_string(dir.path().join("research_latest.txt")).unwrap();
    assert_eq!(written, outcome.final_text);
}

#[test]
fn errors_are_categorized_by_type_and_redacted() {
    let registry = RoleRegistry::builtin();
    let err = anyhow::Error::from(registry.resolve("astrologer").unwrap_err());
    assert_eq!(categorize_error(&err), ErrorCategory::Input);

    let err = anyhow::Error::from(GenerationError::Http {
        status: 503,
        message: "overloaded".to_string(),
    });
    assert_eq!(categorize_error(&err), ErrorCategory::Provider);
    assert!(format_cli_error(&err).starts_with("[PROVIDER] "));

    let err = anyhow::anyhow!("request to https://x?key=AIzaSyA1234567890abcdefghij failed");
    assert!(!format_cli_error(&err).contains("AIzaSyA1234567890abcdefghij"));
}
