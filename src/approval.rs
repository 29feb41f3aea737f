//! Human approval gate for sensitive drafts.
//!
//! A request moves `Pending -> Approved | Rejected | Cancelled` exactly once.
//! The mission that opened it holds an [`ApprovalTicket`] and suspends on it;
//! reviewers resolve requests by id from any front end.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Characters of the draft kept on the request for reviewers.
pub const DRAFT_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl Decision {
    pub fn label(self) -> &'static str {
        match self {
            Decision::Pending => "pending",
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
            Decision::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Decision::Pending
    }
}

/// A reviewer's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approved,
    Rejected,
}

impl From<Verdict> for Decision {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Approved => Decision::Approved,
            Verdict::Rejected => Decision::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval request '{id}' is already {}", .decision.label())]
    AlreadyResolved { id: String, decision: Decision },
    #[error("approval request '{0}' not found")]
    UnknownRequest(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub mission_id: String,
    pub role_id: String,
    pub document_type: String,
    pub draft_preview: String,
    pub decision: Decision,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Awaitable side of a pending request, held by the mission that opened it.
#[derive(Debug)]
pub struct ApprovalTicket {
    id: String,
    receiver: oneshot::Receiver<Decision>,
}

impl ApprovalTicket {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for a decision. No timeout; returns `Cancelled` if `cancel` fires
    /// first or the gate drops the request.
    pub async fn wait(self, cancel: &CancellationToken) -> Decision {
        tokio::select! {
            decision = self.receiver => decision.unwrap_or(Decision::Cancelled),
            _ = cancel.cancelled() => Decision::Cancelled,
        }
    }
}

/// Resolved requests remembered for repeat-answer detection and listing.
pub const RESOLVED_RETENTION: usize = 256;

#[derive(Debug)]
struct GateEntry {
    request: ApprovalRequest,
    sender: oneshot::Sender<Decision>,
}

#[derive(Debug, Default)]
struct GateState {
    pending: HashMap<String, GateEntry>,
    pending_order: Vec<String>,
    resolved: HashMap<String, ApprovalRequest>,
    resolved_order: VecDeque<String>,
}

impl GateState {
    fn remember(&mut self, request: ApprovalRequest, retention: usize) {
        self.resolved_order.push_back(request.id.clone());
        self.resolved.insert(request.id.clone(), request);
        while self.resolved_order.len() > retention {
            if let Some(oldest) = self.resolved_order.pop_front() {
                self.resolved.remove(&oldest);
            }
        }
    }
}

/// Registry of approval requests. The most recent resolved requests are
/// retained so repeated answers are reported as `AlreadyResolved`; older ones
/// age out and become `UnknownRequest`.
#[derive(Debug)]
pub struct ApprovalGate {
    state: Mutex<GateState>,
    retention: usize,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::with_retention(RESOLVED_RETENTION)
    }
}

pub fn draft_preview(draft: &str) -> String {
    draft.chars().take(DRAFT_PREVIEW_CHARS).collect()
}

fn new_request_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("apr_{}", &hex[..8])
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            state: Mutex::default(),
            retention: retention.max(1),
        }
    }

    pub fn open_request(
        &self,
        mission_id: &str,
        role_id: &str,
        document_type: &str,
        draft: &str,
    ) -> (ApprovalRequest, ApprovalTicket) {
        let (sender, receiver) = oneshot::channel();
        let request = ApprovalRequest {
            id: new_request_id(),
            mission_id: mission_id.to_string(),
            role_id: role_id.to_string(),
            document_type: document_type.to_string(),
            draft_preview: draft_preview(draft),
            decision: Decision::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        };

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.pending_order.push(request.id.clone());
        state.pending.insert(
            request.id.clone(),
            GateEntry {
                request: request.clone(),
                sender,
            },
        );
        drop(state);

        tracing::info!(
            request_id = %request.id,
            mission_id = mission_id,
            role = role_id,
            document_type = document_type,
            "Opened approval request"
        );
        let ticket = ApprovalTicket {
            id: request.id.clone(),
            receiver,
        };
        (request, ticket)
    }

    pub fn resolve(&self, id: &str, verdict: Verdict) -> Result<ApprovalRequest, ApprovalError> {
        let decision = Decision::from(verdict);
        self.finish(id, decision).inspect_err(|err| {
            if matches!(err, ApprovalError::AlreadyResolved { .. }) {
                tracing::warn!(request_id = id, decision = decision.label(), error = %err, "Rejected repeated approval answer");
            }
        })
    }

    fn finish(&self, id: &str, decision: Decision) -> Result<ApprovalRequest, ApprovalError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = state.resolved.get(id) {
            return Err(ApprovalError::AlreadyResolved {
                id: id.to_string(),
                decision: previous.decision,
            });
        }
        let GateEntry {
            mut request,
            sender,
        } = state
            .pending
            .remove(id)
            .ok_or_else(|| ApprovalError::UnknownRequest(id.to_string()))?;
        state.pending_order.retain(|pending| pending != id);

        request.decision = decision;
        request.resolved_at = Some(Utc::now());
        // The mission may already be gone; the recorded decision stands.
        let _ = sender.send(decision);
        state.remember(request.clone(), self.retention);
        drop(state);

        tracing::info!(
            request_id = id,
            mission_id = %request.mission_id,
            decision = decision.label(),
            "Resolved approval request"
        );
        Ok(request)
    }

    /// Mark every pending request of `mission_id` as cancelled.
    pub fn cancel_for_mission(&self, mission_id: &str) -> Vec<ApprovalRequest> {
        self.pending_for_mission(mission_id)
            .iter()
            .filter_map(|request| self.finish(&request.id, Decision::Cancelled).ok())
            .collect()
    }

    pub fn get(&self, id: &str) -> Result<ApprovalRequest, ApprovalError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .pending
            .get(id)
            .map(|entry| entry.request.clone())
            .or_else(|| state.resolved.get(id).cloned())
            .ok_or_else(|| ApprovalError::UnknownRequest(id.to_string()))
    }

    /// Pending requests in the order they were opened.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .pending_order
            .iter()
            .filter_map(|id| state.pending.get(id).map(|entry| entry.request.clone()))
            .collect()
    }

    pub fn pending_for_mission(&self, mission_id: &str) -> Vec<ApprovalRequest> {
        self.pending()
            .into_iter()
            .filter(|request| request.mission_id == mission_id)
            .collect()
    }

    /// Retained resolved requests in resolution order, then pending ones.
    pub fn all(&self) -> Vec<ApprovalRequest> {
        let resolved = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .resolved_order
                .iter()
                .filter_map(|id| state.resolved.get(id).cloned())
                .collect::<Vec<_>>()
        };
        resolved.into_iter().chain(self.pending()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_is_bounded_on_char_boundaries() {
        let draft = "é".repeat(80);
        let preview = draft_preview(&draft);
        assert_eq!(preview.chars().count(), DRAFT_PREVIEW_CHARS);
        assert_eq!(draft_preview("short"), "short");
    }

    #[tokio::test]
    async fn approved_decision_reaches_ticket() {
        let gate = ApprovalGate::new();
        let (request, ticket) =
            gate.open_request("mission_1", "coach", "Layoff pitch", "I was part of a reduction");
        assert_eq!(request.decision, Decision::Pending);
        assert_eq!(gate.pending().len(), 1);

        let resolved = gate.resolve(&request.id, Verdict::Approved).unwrap();
        assert_eq!(resolved.decision, Decision::Approved);
        assert!(resolved.resolved_at.is_some());

        let decision = ticket.wait(&CancellationToken::new()).await;
        assert_eq!(decision, Decision::Approved);
        assert!(gate.pending().is_empty());
    }

    #[test]
    fn second_resolve_is_rejected() {
        let gate = ApprovalGate::new();
        let (request, _ticket) = gate.open_request("mission_1", "coach", "Pitch", "draft");
        gate.resolve(&request.id, Verdict::Rejected).unwrap();

        for verdict in [Verdict::Approved, Verdict::Rejected] {
            let err = gate.resolve(&request.id, verdict).unwrap_err();
            assert_eq!(
                err,
                ApprovalError::AlreadyResolved {
                    id: request.id.clone(),
                    decision: Decision::Rejected,
                }
            );
        }
        assert_eq!(gate.get(&request.id).unwrap().decision, Decision::Rejected);
    }

    #[test]
    fn unknown_request_is_reported() {
        let gate = ApprovalGate::new();
        assert_eq!(
            gate.resolve("apr_missing", Verdict::Approved),
            Err(ApprovalError::UnknownRequest("apr_missing".to_string()))
        );
    }

    #[tokio::test]
    async fn cancel_for_mission_releases_only_that_mission() {
        let gate = ApprovalGate::new();
        let (first, ticket) = gate.open_request("mission_a", "coach", "Pitch", "draft a");
        let (other, _other_ticket) = gate.open_request("mission_b", "coach", "Pitch", "draft b");

        let cancelled = gate.cancel_for_mission("mission_a");
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, first.id);
        assert_eq!(ticket.wait(&CancellationToken::new()).await, Decision::Cancelled);

        let pending = gate.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, other.id);
        assert!(matches!(
            gate.resolve(&first.id, Verdict::Approved),
            Err(ApprovalError::AlreadyResolved {
                decision: Decision::Cancelled,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn ticket_wait_honours_cancellation_token() {
        let gate = ApprovalGate::new();
        let (_request, ticket) = gate.open_request("mission_c", "coach", "Pitch", "draft");
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(ticket.wait(&token).await, Decision::Cancelled);
    }

    #[test]
    fn resolved_requests_age_out_past_retention() {
        let gate = ApprovalGate::with_retention(4);
        let ids = (0..10)
            .map(|n| {
                let (request, _ticket) =
                    gate.open_request(&format!("mission_{n}"), "coach", "Pitch", "draft");
                gate.resolve(&request.id, Verdict::Approved).unwrap();
                request.id
            })
            .collect::<Vec<_>>();

        assert_eq!(gate.all().len(), 4);
        assert!(gate.pending().is_empty());
        assert!(matches!(
            gate.resolve(&ids[9], Verdict::Rejected),
            Err(ApprovalError::AlreadyResolved {
                decision: Decision::Approved,
                ..
            })
        ));
        assert_eq!(
            gate.resolve(&ids[0], Verdict::Rejected),
            Err(ApprovalError::UnknownRequest(ids[0].clone()))
        );
        assert_eq!(gate.get(&ids[6]).unwrap().decision, Decision::Approved);
    }

    #[test]
    fn pending_requests_are_never_evicted() {
        let gate = ApprovalGate::with_retention(1);
        let (waiting, _ticket) = gate.open_request("mission_w", "coach", "Pitch", "draft");
        for n in 0..3 {
            let (request, _ticket) =
                gate.open_request(&format!("mission_{n}"), "coach", "Pitch", "draft");
            gate.resolve(&request.id, Verdict::Rejected).unwrap();
        }
        assert_eq!(gate.pending(), vec![waiting.clone()]);
        assert_eq!(gate.all().len(), 2);
        assert!(gate.resolve(&waiting.id, Verdict::Approved).is_ok());
    }
}
