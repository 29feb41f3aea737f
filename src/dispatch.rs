use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::roles::{
    COACH_ROLE, FALLBACK_ROLE, JOB_SEARCH_ROLE, RESEARCH_ROLE, RESUME_ROLE, RoleDescriptor,
    RoleRegistry, TUTOR_ROLE,
};

/// Inline role marker, e.g. `agent:coach` or `agent:ds_tutor_agent`.
pub const ROLE_MARKER_PREFIX: &str = "agent:";
/// Tag the chat front end prepends to directly-addressed messages.
pub const CHAT_TO_AGENT_TAG: &str = "[CHAT_TO_AGENT]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchMode {
    /// First matching rule only.
    #[default]
    FirstMatch,
    /// Every matching rule, in priority order.
    FanOut,
}

impl DispatchMode {
    pub fn label(self) -> &'static str {
        match self {
            DispatchMode::FirstMatch => "first-match",
            DispatchMode::FanOut => "fan-out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no role available for mission (fallback role '{0}' is not registered)")]
    NoRoleAvailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchReason {
    Hint { hint: String },
    Keyword { keyword: String },
    Fallback,
}

impl DispatchReason {
    pub fn label(&self) -> String {
        match self {
            DispatchReason::Hint { hint } => format!("hint:{hint}"),
            DispatchReason::Keyword { keyword } => format!("keyword:{keyword}"),
            DispatchReason::Fallback => "fallback".to_string(),
        }
    }
}

/// One unit of work for a mission: a role plus the text it receives.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub role: Arc<RoleDescriptor>,
    pub sub_query: String,
    pub reason: DispatchReason,
}

struct RouteRule {
    role: &'static str,
    keywords: &'static [&'static str],
}

/// Heuristic table in priority order. Single words match as token prefixes,
/// anything containing a space or punctuation matches as a substring.
const ROUTE_RULES: &[RouteRule] = &[
    RouteRule {
        role: RESUME_ROLE,
        keywords: &[
            "resume",
            "résumé",
            "cv",
            "ats",
            "job description",
            "requirements:",
            "responsibilities:",
            "qualifications:",
            "tailor",
            "cover letter",
        ],
    },
    RouteRule {
        role: COACH_ROLE,
        keywords: &[
            "layoff",
            "laid off",
            "pitch",
            "interview",
            "narrative",
            "negotiat",
            "career change",
            "coach",
            "elevator",
        ],
    },
    RouteRule {
        role: RESEARCH_ROLE,
        keywords: &[
            "trend",
            "market",
            "salary",
            "salaries",
            "demand",
            "outlook",
            "industry",
            "research",
        ],
    },
    RouteRule {
        role: TUTOR_ROLE,
        keywords: &[
            "quiz",
            "concept",
            "explain",
            "teach",
            "learn",
            "tutor",
            "practice",
            "what is",
            "how does",
        ],
    },
    RouteRule {
        role: JOB_SEARCH_ROLE,
        keywords: &[
            "job search",
            "posting",
            "openings",
            "vacanc",
            "jobs",
            "hiring now",
            "apply",
        ],
    },
];

/// Split an inline `agent:<id>` marker (and the chat tag) out of a mission.
/// Returns the marked role id, if any, and the remaining text.
pub fn split_role_marker(query: &str) -> (Option<String>, String) {
    if !query.contains(ROLE_MARKER_PREFIX) && !query.contains(CHAT_TO_AGENT_TAG) {
        return (None, query.trim().to_string());
    }

    let mut marker = None;
    let mut kept = Vec::new();
    for line in query.lines() {
        let mut words = Vec::new();
        for word in line.split_whitespace() {
            if word == CHAT_TO_AGENT_TAG {
                continue;
            }
            if marker.is_none() {
                let id = word
                    .strip_prefix(ROLE_MARKER_PREFIX)
                    .map(|id| id.trim_end_matches(|ch: char| !(ch.is_alphanumeric() || ch == '_')))
                    .unwrap_or_default();
                if !id.is_empty() {
                    marker = Some(id.to_string());
                    continue;
                }
            }
            words.push(word);
        }
        if !words.is_empty() {
            kept.push(words.join(" "));
        }
    }
    (marker, kept.join("\n"))
}

fn tokens(lower: &str) -> Vec<&str> {
    lower
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect()
}

fn keyword_matches(lower: &str, tokens: &[&str], keyword: &str) -> bool {
    if keyword.chars().all(char::is_alphanumeric) {
        tokens.iter().any(|token| token.starts_with(keyword))
    } else {
        lower.contains(keyword)
    }
}

/// Every rule that matches `text`, in priority order, with the keyword that
/// triggered it.
pub fn classify_mission(text: &str) -> Vec<(&'static str, &'static str)> {
    let lower = text.to_lowercase();
    let tokens = tokens(&lower);
    ROUTE_RULES
        .iter()
        .filter_map(|rule| {
            rule.keywords
                .iter()
                .find(|keyword| keyword_matches(&lower, &tokens, keyword))
                .map(|keyword| (rule.role, *keyword))
        })
        .collect()
}

/// Mission text as handed to one role.
pub fn frame_sub_query(role_id: &str, mission_text: &str) -> String {
    format!("TASK: {}\n{}", role_id, mission_text.trim())
}

/// Inverse of [`frame_sub_query`]: the mission text without the task header.
pub fn unframe_sub_query(sub_query: &str) -> &str {
    match sub_query.split_once('\n') {
        Some((header, rest)) if header.starts_with("TASK: ") => rest,
        _ => sub_query,
    }
}

/// Maps missions onto registered roles. Pure: the same query, hint, and
/// registry always yield the same dispatch list.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<RoleRegistry>,
    mode: DispatchMode,
}

impl Dispatcher {
    pub fn new(registry: Arc<RoleRegistry>, mode: DispatchMode) -> Self {
        Self { registry, mode }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn registry(&self) -> &Arc<RoleRegistry> {
        &self.registry
    }

    pub fn dispatch(
        &self,
        query: &str,
        explicit_hint: Option<&str>,
    ) -> Result<Vec<Dispatch>, DispatchError> {
        let (marker, text) = split_role_marker(query);

        let hints = explicit_hint
            .map(str::trim)
            .filter(|hint| !hint.is_empty())
            .map(str::to_string)
            .into_iter()
            .chain(marker);
        for hint in hints {
            match self.registry.resolve(&hint) {
                Ok(role) => {
                    tracing::info!(role = %role.id, hint = %hint, "Dispatched mission by hint");
                    return Ok(vec![Dispatch {
                        sub_query: frame_sub_query(&role.id, &text),
                        role,
                        reason: DispatchReason::Hint { hint },
                    }]);
                }
                Err(err) => {
                    tracing::warn!(hint = %hint, error = %err, "Ignoring unresolvable role hint");
                }
            }
        }

        let mut dispatches = Vec::new();
        for (role_id, keyword) in classify_mission(&text) {
            let Ok(role) = self.registry.resolve(role_id) else {
                tracing::debug!(role = role_id, "matched role is not registered, skipping");
                continue;
            };
            dispatches.push(Dispatch {
                sub_query: frame_sub_query(&role.id, &text),
                role,
                reason: DispatchReason::Keyword {
                    keyword: keyword.to_string(),
                },
            });
            if self.mode == DispatchMode::FirstMatch {
                break;
            }
        }

        if dispatches.is_empty() {
            let role = self
                .registry
                .resolve(FALLBACK_ROLE)
                .map_err(|_| DispatchError::NoRoleAvailable(FALLBACK_ROLE.to_string()))?;
            dispatches.push(Dispatch {
                sub_query: frame_sub_query(&role.id, &text),
                role,
                reason: DispatchReason::Fallback,
            });
        }

        tracing::info!(
            mode = self.mode.label(),
            roles = %dispatches
                .iter()
                .map(|d| d.role.id.as_str())
                .collect::<Vec<_>>()
                .join(","),
            "Dispatched mission"
        );
        Ok(dispatches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(mode: DispatchMode) -> Dispatcher {
        Dispatcher::new(Arc::new(RoleRegistry::builtin()), mode)
    }

    fn role_ids(dispatches: &[Dispatch]) -> Vec<&str> {
        dispatches.iter().map(|d| d.role.id.as_str()).collect()
    }

    #[test]
    fn heuristic_routes_follow_priority_table() {
        let d = dispatcher(DispatchMode::FirstMatch);
        let cases = [
            ("Please review my resume for ATS issues", RESUME_ROLE),
            ("Requirements: Python, SQL, GCP", RESUME_ROLE),
            ("Help me pitch my layoff story", COACH_ROLE),
            ("Generate a layoff pitch for a VP of Engineering role", COACH_ROLE),
            ("What are the latest hiring trends for data scientists?", RESEARCH_ROLE),
            ("latest hiring trends for GCP data engineers", RESEARCH_ROLE),
            ("Quiz me on logistic regression", TUTOR_ROLE),
            ("Find job postings in San Francisco", JOB_SEARCH_ROLE),
            ("Good morning", TUTOR_ROLE),
        ];
        for (query, expected) in cases {
            let dispatches = d.dispatch(query, None).unwrap();
            assert_eq!(role_ids(&dispatches), vec![expected], "query: {query}");
        }
    }

    #[test]
    fn resume_outranks_coach_in_first_match() {
        let d = dispatcher(DispatchMode::FirstMatch);
        let dispatches = d
            .dispatch("Tailor my résumé for an interview at AICo", None)
            .unwrap();
        assert_eq!(role_ids(&dispatches), vec![RESUME_ROLE]);
        assert_eq!(
            dispatches[0].reason,
            DispatchReason::Keyword {
                keyword: "résumé".to_string()
            }
        );
    }

    #[test]
    fn short_keywords_do_not_match_inside_words() {
        let matches = classify_mission("whats the stats story here");
        assert!(matches.iter().all(|(role, _)| *role != RESUME_ROLE));
    }

    #[test]
    fn fan_out_returns_every_match_in_priority_order() {
        let d = dispatcher(DispatchMode::FanOut);
        let dispatches = d
            .dispatch("Explain my layoff and review my resume", None)
            .unwrap();
        assert_eq!(role_ids(&dispatches), vec![RESUME_ROLE, COACH_ROLE, TUTOR_ROLE]);
    }

    #[test]
    fn explicit_hint_wins_when_it_resolves() {
        let d = dispatcher(DispatchMode::FirstMatch);
        let dispatches = d
            .dispatch("What are the hiring trends?", Some("coach"))
            .unwrap();
        assert_eq!(role_ids(&dispatches), vec![COACH_ROLE]);

        let dispatches = d
            .dispatch("What are the hiring trends?", Some("astrologer"))
            .unwrap();
        assert_eq!(role_ids(&dispatches), vec![RESEARCH_ROLE]);
    }

    #[test]
    fn inline_marker_acts_as_hint() {
        let d = dispatcher(DispatchMode::FirstMatch);
        let dispatches = d
            .dispatch("[CHAT_TO_AGENT] agent:job_search_agent\nAny openings in Austin?", None)
            .unwrap();
        assert_eq!(role_ids(&dispatches), vec![JOB_SEARCH_ROLE]);
        assert_eq!(
            dispatches[0].sub_query,
            "TASK: job_search\nAny openings in Austin?"
        );
    }

    #[test]
    fn dispatch_is_deterministic() {
        let d = dispatcher(DispatchMode::FanOut);
        let query = "market trends and a quiz on SQL joins";
        let first = role_ids(&d.dispatch(query, None).unwrap())
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        for _ in 0..10 {
            let again = d.dispatch(query, None).unwrap();
            assert_eq!(role_ids(&again), first);
        }
    }

    #[test]
    fn empty_registry_reports_no_role_available() {
        let d = Dispatcher::new(Arc::new(RoleRegistry::new()), DispatchMode::FirstMatch);
        let err = d.dispatch("anything", None).unwrap_err();
        assert_eq!(err, DispatchError::NoRoleAvailable("tutor".to_string()));
    }

    #[test]
    fn framing_round_trips() {
        let framed = frame_sub_query("coach", "  layoff pitch ");
        assert_eq!(framed, "TASK: coach\nlayoff pitch");
        assert_eq!(unframe_sub_query(&framed), "layoff pitch");
        assert_eq!(unframe_sub_query("plain"), "plain");
    }
}
