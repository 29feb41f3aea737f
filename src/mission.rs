//! Mission lifecycle: dispatch, sequential role execution, approval
//! suspension, aggregation.
//!
//! Status moves `Running -> (AwaitingApproval -> Running)* -> Completed |
//! Failed`. Each mission runs on its own tokio task and is observed through a
//! [`MissionHandle`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalGate, ApprovalRequest, Decision};
use crate::dispatch::{Dispatch, Dispatcher};
use crate::generation::{Generation, Generator, infer_document_type};
use crate::memory::MemoryStore;
use crate::streaming::{MISSION_COMPLETED_LINE, event_log_line, final_response_line};
use crate::telemetry::TelemetrySink;

/// Document type recorded when neither the role nor the draft names one.
pub const DEFAULT_SENSITIVE_DOCUMENT: &str = "Sensitive draft";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Running,
    AwaitingApproval,
    Completed,
    Failed,
}

impl MissionStatus {
    pub fn label(self) -> &'static str {
        match self {
            MissionStatus::Running => "running",
            MissionStatus::AwaitingApproval => "awaiting_approval",
            MissionStatus::Completed => "completed",
            MissionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MissionStatus::Completed | MissionStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    NoRoleAvailable { message: String },
    Generation { role: String, message: String },
    Cancelled,
}

impl FailureReason {
    pub fn describe(&self) -> String {
        match self {
            FailureReason::NoRoleAvailable { message } => message.clone(),
            FailureReason::Generation { role, message } => format!("role '{role}' failed: {message}"),
            FailureReason::Cancelled => "mission cancelled".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MissionError {
    #[error("mission '{0}' not found")]
    UnknownMission(String),
    #[error("mission task ended abnormally: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Default)]
pub struct MissionRequest {
    pub query: String,
    pub role_hint: Option<String>,
}

impl MissionRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            role_hint: None,
        }
    }

    pub fn with_role_hint(mut self, hint: Option<String>) -> Self {
        self.role_hint = hint
            .map(|hint| hint.trim().to_string())
            .filter(|hint| !hint.is_empty());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleResultStatus {
    Delivered,
    /// Rejected by the reviewer; the draft is returned for revision.
    Withheld,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleResult {
    pub role: String,
    pub status: RoleResultStatus,
    /// Delivered text, the withheld draft, or partial output of a failed role.
    pub text: String,
    pub approval: Option<ApprovalRequest>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MissionEvent {
    Dispatched { roles: Vec<String> },
    RoleStarted { role: String },
    Progress { role: String, line: String },
    ApprovalRequested { request: ApprovalRequest },
    ApprovalResolved { request: ApprovalRequest },
    RoleFinished { role: String, status: RoleResultStatus },
    Finished { status: MissionStatus },
}

#[derive(Debug, Clone, Serialize)]
pub struct MissionOutcome {
    pub mission_id: String,
    pub query: String,
    pub status: MissionStatus,
    pub final_text: String,
    pub failure: Option<FailureReason>,
    pub roles: Vec<RoleResult>,
    pub raw_event_log: Vec<String>,
}

impl MissionOutcome {
    /// Drafts rejected by a reviewer, for the user to revise.
    pub fn revision_drafts(&self) -> impl Iterator<Item = &RoleResult> {
        self.roles
            .iter()
            .filter(|result| result.status == RoleResultStatus::Withheld)
    }
}

pub fn new_mission_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("mission_{}", &hex[..8])
}

/// Raw event log shared between a running mission and its observers.
#[derive(Debug, Clone, Default)]
pub struct EventTrace(Arc<Mutex<Vec<String>>>);

impl EventTrace {
    fn push(&self, line: String) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(line);
    }

    /// Lines recorded so far.
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Cancels a mission without owning its handle.
#[derive(Debug, Clone)]
pub struct MissionCanceller {
    mission_id: String,
    token: CancellationToken,
    gate: Arc<ApprovalGate>,
}

impl MissionCanceller {
    pub fn cancel(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();
        let released = self.gate.cancel_for_mission(&self.mission_id);
        tracing::info!(
            mission_id = %self.mission_id,
            released_approvals = released.len(),
            "Cancelled mission"
        );
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct MissionHandle {
    id: String,
    status: watch::Receiver<MissionStatus>,
    events: mpsc::UnboundedReceiver<MissionEvent>,
    trace: EventTrace,
    canceller: MissionCanceller,
    task: JoinHandle<MissionOutcome>,
}

impl MissionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> MissionStatus {
        *self.status.borrow()
    }

    pub fn status_receiver(&self) -> watch::Receiver<MissionStatus> {
        self.status.clone()
    }

    /// Wait until the mission reaches `target` or a terminal status.
    pub async fn wait_for_status(&mut self, target: MissionStatus) -> MissionStatus {
        let reached = self
            .status
            .wait_for(|status| *status == target || status.is_terminal())
            .await
            .map(|status| *status);
        reached.unwrap_or_else(|_| *self.status.borrow())
    }

    pub async fn next_event(&mut self) -> Option<MissionEvent> {
        self.events.recv().await
    }

    pub fn canceller(&self) -> MissionCanceller {
        self.canceller.clone()
    }

    pub fn trace(&self) -> EventTrace {
        self.trace.clone()
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub async fn outcome(self) -> Result<MissionOutcome, MissionError> {
        self.task
            .await
            .map_err(|err| MissionError::Aborted(err.to_string()))
    }
}

struct MissionRun {
    id: String,
    request: MissionRequest,
    status: watch::Sender<MissionStatus>,
    events: mpsc::UnboundedSender<MissionEvent>,
    cancel: CancellationToken,
    log: EventTrace,
    results: Vec<RoleResult>,
}

impl MissionRun {
    fn publish(&self, event: MissionEvent) {
        if let Some(line) = event_log_line(&event) {
            self.log.push(line);
        }
        // Observers may have dropped their receiver; the log still records it.
        let _ = self.events.send(event);
    }

    fn set_status(&self, status: MissionStatus) {
        self.status.send_replace(status);
    }
}

enum RoleStep {
    Continue,
    Stop(FailureReason),
}

/// Owns the shared services and starts missions.
pub struct MissionController {
    dispatcher: Dispatcher,
    memory: Arc<MemoryStore>,
    gate: Arc<ApprovalGate>,
    generator: Arc<dyn Generator>,
    telemetry: TelemetrySink,
    output_dir: Option<PathBuf>,
}

impl MissionController {
    pub fn new(
        dispatcher: Dispatcher,
        memory: Arc<MemoryStore>,
        gate: Arc<ApprovalGate>,
        generator: Arc<dyn Generator>,
        telemetry: TelemetrySink,
    ) -> Self {
        Self {
            dispatcher,
            memory,
            gate,
            generator,
            telemetry,
            output_dir: None,
        }
    }

    pub fn with_output_dir(mut self, output_dir: Option<PathBuf>) -> Self {
        self.output_dir = output_dir;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    pub fn spawn(self: &Arc<Self>, request: MissionRequest) -> MissionHandle {
        let id = new_mission_id();
        let (status_tx, status_rx) = watch::channel(MissionStatus::Running);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let trace = EventTrace::default();

        let run = MissionRun {
            id: id.clone(),
            request,
            status: status_tx,
            events: events_tx,
            cancel: token.clone(),
            log: trace.clone(),
            results: Vec::new(),
        };
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move { controller.execute(run).await });

        MissionHandle {
            canceller: MissionCanceller {
                mission_id: id.clone(),
                token,
                gate: Arc::clone(&self.gate),
            },
            id,
            status: status_rx,
            events: events_rx,
            trace,
            task,
        }
    }

    /// Spawn a mission and wait for its outcome.
    pub async fn run(self: &Arc<Self>, request: MissionRequest) -> Result<MissionOutcome, MissionError> {
        self.spawn(request).outcome().await
    }

    async fn execute(&self, mut run: MissionRun) -> MissionOutcome {
        tracing::info!(
            mission_id = %run.id,
            role_hint = run.request.role_hint.as_deref().unwrap_or("<none>"),
            "Starting mission"
        );
        self.telemetry.emit(
            "mission.started",
            json!({
                "mission_id": run.id,
                "query_chars": run.request.query.chars().count(),
                "role_hint": run.request.role_hint,
            }),
        );

        let dispatches = match self
            .dispatcher
            .dispatch(&run.request.query, run.request.role_hint.as_deref())
        {
            Ok(dispatches) => dispatches,
            Err(err) => {
                return self.finish(
                    run,
                    Some(FailureReason::NoRoleAvailable {
                        message: err.to_string(),
                    }),
                );
            }
        };
        run.publish(MissionEvent::Dispatched {
            roles: dispatches.iter().map(|d| d.role.id.clone()).collect(),
        });

        let mut failure = None;
        for dispatch in dispatches {
            if run.cancel.is_cancelled() {
                failure = Some(FailureReason::Cancelled);
                break;
            }
            if let RoleStep::Stop(reason) = self.run_role(&mut run, dispatch).await {
                failure = Some(reason);
                break;
            }
        }

        self.finish(run, failure)
    }

    async fn run_role(&self, run: &mut MissionRun, dispatch: Dispatch) -> RoleStep {
        let role = dispatch.role;
        run.publish(MissionEvent::RoleStarted {
            role: role.id.clone(),
        });
        tracing::info!(
            mission_id = %run.id,
            role = %role.id,
            reason = %dispatch.reason.label(),
            "Invoking role"
        );

        let snapshot = self.memory.snapshot();
        let generated = tokio::select! {
            result = self.generator.invoke(&role, &dispatch.sub_query, &snapshot) => result,
            _ = run.cancel.cancelled() => return RoleStep::Stop(FailureReason::Cancelled),
        };

        let Generation {
            events,
            final_text,
            document_type,
        } = match generated {
            Ok(generation) => generation,
            Err(err) => {
                tracing::warn!(mission_id = %run.id, role = %role.id, error = %err, "Role failed");
                self.telemetry.emit(
                    "role.failed",
                    json!({ "mission_id": run.id, "role": role.id, "error": err.to_string() }),
                );
                run.results.push(RoleResult {
                    role: role.id.clone(),
                    status: RoleResultStatus::Failed,
                    text: String::new(),
                    approval: None,
                    error: Some(err.to_string()),
                });
                run.publish(MissionEvent::RoleFinished {
                    role: role.id.clone(),
                    status: RoleResultStatus::Failed,
                });
                return RoleStep::Stop(FailureReason::Generation {
                    role: role.id.clone(),
                    message: err.to_string(),
                });
            }
        };

        for line in events {
            run.publish(MissionEvent::Progress {
                role: role.id.clone(),
                line,
            });
        }

        let mut approval = None;
        if role.sensitive_output {
            let document_type = document_type
                .or_else(|| infer_document_type(&dispatch.sub_query).map(str::to_string))
                .or_else(|| role.document_type.clone())
                .unwrap_or_else(|| DEFAULT_SENSITIVE_DOCUMENT.to_string());
            let (request, ticket) =
                self.gate
                    .open_request(&run.id, &role.id, &document_type, &final_text);
            self.telemetry.emit(
                "approval.opened",
                json!({
                    "mission_id": run.id,
                    "request_id": request.id,
                    "role": role.id,
                    "document_type": document_type,
                }),
            );
            run.set_status(MissionStatus::AwaitingApproval);
            run.publish(MissionEvent::ApprovalRequested {
                request: request.clone(),
            });

            let decision = ticket.wait(&run.cancel).await;
            let resolved = self.gate.get(&request.id).unwrap_or(request);
            self.telemetry.emit(
                &format!("approval.{}", decision.label()),
                json!({ "mission_id": run.id, "request_id": resolved.id, "role": role.id }),
            );
            run.publish(MissionEvent::ApprovalResolved {
                request: resolved.clone(),
            });

            match decision {
                Decision::Approved => {
                    run.set_status(MissionStatus::Running);
                    approval = Some(resolved);
                }
                Decision::Rejected => {
                    run.set_status(MissionStatus::Running);
                    tracing::info!(
                        mission_id = %run.id,
                        role = %role.id,
                        request_id = %resolved.id,
                        "Draft rejected, returning it for revision"
                    );
                    run.results.push(RoleResult {
                        role: role.id.clone(),
                        status: RoleResultStatus::Withheld,
                        text: final_text,
                        approval: Some(resolved),
                        error: None,
                    });
                    run.publish(MissionEvent::RoleFinished {
                        role: role.id.clone(),
                        status: RoleResultStatus::Withheld,
                    });
                    return RoleStep::Continue;
                }
                Decision::Cancelled | Decision::Pending => {
                    return RoleStep::Stop(FailureReason::Cancelled);
                }
            }
        }

        self.store_output(&run.id, &role.id, &final_text);
        self.telemetry.emit(
            "role.completed",
            json!({ "mission_id": run.id, "role": role.id, "chars": final_text.chars().count() }),
        );
        run.results.push(RoleResult {
            role: role.id.clone(),
            status: RoleResultStatus::Delivered,
            text: final_text,
            approval,
            error: None,
        });
        run.publish(MissionEvent::RoleFinished {
            role: role.id.clone(),
            status: RoleResultStatus::Delivered,
        });
        RoleStep::Continue
    }

    fn store_output(&self, mission_id: &str, role_id: &str, text: &str) {
        let name = format!("{role_id}:latest");
        if let Err(err) = self
            .memory
            .save_artifact(&name, text, self.output_dir.as_deref())
        {
            tracing::warn!(
                mission_id = mission_id,
                role = role_id,
                error = %err,
                "Failed to mirror role output to the output directory"
            );
        }
    }

    fn finish(&self, run: MissionRun, failure: Option<FailureReason>) -> MissionOutcome {
        if matches!(failure, Some(FailureReason::Cancelled)) {
            // Covers cancellation through the token alone.
            self.gate.cancel_for_mission(&run.id);
        }

        let status = if failure.is_some() {
            MissionStatus::Failed
        } else {
            MissionStatus::Completed
        };
        let final_text = aggregate_outputs(&run.results);

        run.log.push(final_response_line(&final_text));
        match &failure {
            None => run.log.push(MISSION_COMPLETED_LINE.to_string()),
            Some(reason) => run.log.push(format!("Mission Failed: {}", reason.describe())),
        }
        run.set_status(status);
        run.publish(MissionEvent::Finished { status });

        match &failure {
            None => {
                tracing::info!(mission_id = %run.id, roles = run.results.len(), "Mission completed");
                self.telemetry.emit(
                    "mission.completed",
                    json!({ "mission_id": run.id, "roles": run.results.len() }),
                );
            }
            Some(reason) => {
                tracing::warn!(mission_id = %run.id, reason = %reason.describe(), "Mission failed");
                self.telemetry.emit(
                    "mission.failed",
                    json!({ "mission_id": run.id, "reason": reason }),
                );
            }
        }

        MissionOutcome {
            mission_id: run.id,
            query: run.request.query,
            status,
            final_text,
            failure,
            roles: run.results,
            raw_event_log: run.log.lines(),
        }
    }
}

/// Combine role results into the text shown to the user. A single delivered
/// output is returned verbatim; otherwise each section is tagged with its role.
pub fn aggregate_outputs(results: &[RoleResult]) -> String {
    if let [only] = results
        && only.status == RoleResultStatus::Delivered
    {
        return only.text.clone();
    }

    results
        .iter()
        .map(|result| match result.status {
            RoleResultStatus::Delivered => format!("[{}]\n{}", result.role, result.text),
            RoleResultStatus::Withheld => format!(
                "[{}] Draft rejected by reviewer{}; returned for revision.",
                result.role,
                result
                    .approval
                    .as_ref()
                    .map(|request| format!(" ({})", request.document_type))
                    .unwrap_or_default()
            ),
            RoleResultStatus::Failed => format!(
                "[{}] failed: {}",
                result.role,
                result.error.as_deref().unwrap_or("unknown error")
            ),
        })
        .collect::<Vec<String>>()
        .join("\n\n")
}
