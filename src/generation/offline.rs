use async_trait::async_trait;

use super::{Generation, GenerationError, Generator, infer_document_type};
use crate::dispatch::unframe_sub_query;
use crate::memory::{MemorySnapshot, RESUME_KEY};
use crate::roles::{COACH_ROLE, JOB_SEARCH_ROLE, RESEARCH_ROLE, RESUME_ROLE, RoleDescriptor, TUTOR_ROLE};
use crate::tools::{
    CREATE_QUIZ_TOOL_NAME, JobPosting, LOAD_MEMORY_TOOL_NAME, PARSE_RESUME_TOOL_NAME,
    PITCH_NARRATIVE_TOOL_NAME, QUERY_JOB_BOARD_TOOL_NAME, RANK_JOBS_TOOL_NAME, SearchParams,
    Toolbox, TrendResult, create_short_quiz, generate_pitch_narrative, parse_resume,
    rank_jobs_by_fit,
};

pub const LOCATION_KEY: &str = "user:preferences:location";
pub const LAYOFF_REASON_KEY: &str = "user:coaching:layoff_reason";

/// Deterministic generator built from the local tools. Used when no hosted
/// model is configured.
#[derive(Clone, Default)]
pub struct OfflineGenerator {
    toolbox: Toolbox,
}

impl OfflineGenerator {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }

    fn tutor(&self, task: &str, events: &mut Vec<String>) -> String {
        let request = create_short_quiz(task, 3);
        events.push(format!("tool_call {CREATE_QUIZ_TOOL_NAME}: {request}"));
        format!(
            "Diagnostic quiz: {}\n\
             1. Define the core idea in one sentence.\n\
             2. Give a small worked example and state its assumptions.\n\
             3. Name one common pitfall and how you would detect it.\n\
             Answer each question, then ask for feedback on any you are unsure about.",
            task
        )
    }

    async fn research(&self, task: &str, events: &mut Vec<String>) -> Result<String, GenerationError> {
        let params = SearchParams {
            max_results: 5,
            max_age_days: Some(90),
            ..SearchParams::default()
        };
        let raw = self
            .toolbox
            .trends
            .search(task, &params)
            .await
            .map_err(|err| GenerationError::Role {
                role: RESEARCH_ROLE.to_string(),
                message: format!("{} failed: {err}", self.toolbox.trends.name()),
            })?;
        events.push(format!("tool_call {}: {}", self.toolbox.trends.name(), task));

        match serde_json::from_str::<Vec<TrendResult>>(&raw) {
            Ok(results) if !results.is_empty() => {
                let lines = results
                    .iter()
                    .map(|result| format!("- {}: {} (source: {})", result.title, result.snippet, result.url))
                    .collect::<Vec<String>>();
                Ok(format!("Current market findings:\n{}", lines.join("\n")))
            }
            _ => Ok(format!("No indexed trend reports for this query. {raw}")),
        }
    }

    fn resume(&self, task: &str, memory: &MemorySnapshot, events: &mut Vec<String>) -> String {
        events.push(format!("tool_call {LOAD_MEMORY_TOOL_NAME}: {RESUME_KEY}"));
        let resume = memory.get(RESUME_KEY).unwrap_or_default();
        let result = parse_resume(resume, task);
        events.push(format!(
            "tool_call {PARSE_RESUME_TOOL_NAME}: match_score={}",
            result.match_score
        ));

        let mut text = format!("Résumé review\n{}", result.summary());
        if result.skill_gaps_flagged.is_empty() {
            text.push_str("\nNo critical skill gaps detected against this description.");
        } else {
            text.push_str("\nSuggested rewrites:");
            for gap in &result.skill_gaps_flagged {
                text.push_str(&format!(
                    "\n- If you have used {gap}, name it explicitly in a bullet with a measurable outcome."
                ));
            }
        }
        text
    }

    async fn job_search(
        &self,
        task: &str,
        memory: &MemorySnapshot,
        events: &mut Vec<String>,
    ) -> Result<String, GenerationError> {
        let params = SearchParams {
            max_results: 10,
            location: memory.get(LOCATION_KEY).map(str::to_string),
            max_age_days: Some(14),
        };
        let raw = self
            .toolbox
            .jobs
            .search(task, &params)
            .await
            .map_err(|err| GenerationError::Role {
                role: JOB_SEARCH_ROLE.to_string(),
                message: format!("{QUERY_JOB_BOARD_TOOL_NAME} failed: {err}"),
            })?;
        events.push(format!("tool_call {QUERY_JOB_BOARD_TOOL_NAME}: {task}"));

        let postings = serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .and_then(|value| {
                serde_json::from_value::<Vec<JobPosting>>(value["postings"].clone()).ok()
            })
            .unwrap_or_default();
        let profile = memory.get(RESUME_KEY).unwrap_or_default();
        let ranked = rank_jobs_by_fit(&postings, &format!("{profile}\n{task}"));
        events.push(format!("tool_call {RANK_JOBS_TOOL_NAME}: {} postings", ranked.len()));

        if ranked.is_empty() {
            return Ok("No postings matched this search.".to_string());
        }
        let lines = ranked
            .iter()
            .take(3)
            .map(|job| format!("- {} {} at {} (fit {}/100)", job.id, job.title, job.company, job.score))
            .collect::<Vec<String>>();
        Ok(format!(
            "Top matches{}:\n{}",
            params
                .location
                .as_deref()
                .map(|location| format!(" near {location}"))
                .unwrap_or_default(),
            lines.join("\n")
        ))
    }

    fn coach(&self, task: &str, memory: &MemorySnapshot, events: &mut Vec<String>) -> Generation {
        events.push(format!("tool_call {LOAD_MEMORY_TOOL_NAME}: {LAYOFF_REASON_KEY}"));
        let reason = memory.get(LAYOFF_REASON_KEY).unwrap_or_default();
        events.push(format!(
            "tool_call {PITCH_NARRATIVE_TOOL_NAME}: {}",
            generate_pitch_narrative(task, reason)
        ));

        let context = if reason.trim().is_empty() {
            "My previous role ended as part of an organizational change.".to_string()
        } else {
            reason.trim().to_string()
        };
        let final_text = format!(
            "{context} I am proud of what I delivered there, and I used the transition to sharpen \
             my skills. I am now focused on a role where I can apply that experience from day one."
        );
        Generation {
            events: Vec::new(),
            final_text,
            document_type: infer_document_type(task).map(str::to_string),
        }
    }
}

#[async_trait]
impl Generator for OfflineGenerator {
    fn name(&self) -> &str {
        "offline"
    }

    async fn invoke(
        &self,
        role: &RoleDescriptor,
        sub_query: &str,
        memory: &MemorySnapshot,
    ) -> Result<Generation, GenerationError> {
        let task = unframe_sub_query(sub_query).trim();
        let mut events = Vec::new();

        let mut generation = match role.id.as_str() {
            TUTOR_ROLE => Generation::text(self.tutor(task, &mut events)),
            RESEARCH_ROLE => Generation::text(self.research(task, &mut events).await?),
            RESUME_ROLE => Generation::text(self.resume(task, memory, &mut events)),
            JOB_SEARCH_ROLE => Generation::text(self.job_search(task, memory, &mut events).await?),
            COACH_ROLE => self.coach(task, memory, &mut events),
            _ => Generation::text(format!(
                "{}: {}\nRequest: {}",
                role.name,
                if role.description.is_empty() {
                    "custom role"
                } else {
                    role.description.as_str()
                },
                task
            )),
        };

        events.append(&mut generation.events);
        generation.events = events;
        tracing::debug!(role = %role.id, events = generation.events.len(), "offline generation complete");
        Ok(generation)
    }
}
