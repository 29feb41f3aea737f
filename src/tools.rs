//! Read-only collaborators (trend search, job board) and the deterministic
//! role tools the offline generator is built from.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const LOAD_MEMORY_TOOL_NAME: &str = "load_memory";
pub const SAVE_ARTIFACT_TOOL_NAME: &str = "save_artifact";
pub const WEB_SEARCH_TOOL_NAME: &str = "google_search";
pub const SEARCH_TRENDS_TOOL_NAME: &str = "search_hiring_trends";
pub const QUERY_JOB_BOARD_TOOL_NAME: &str = "query_job_board";
pub const RANK_JOBS_TOOL_NAME: &str = "rank_jobs_by_fit";
pub const CREATE_QUIZ_TOOL_NAME: &str = "create_short_quiz";
pub const PARSE_RESUME_TOOL_NAME: &str = "parse_resume";
pub const GENERATE_ATS_TOOL_NAME: &str = "generate_ats_friendly_document";
pub const PITCH_NARRATIVE_TOOL_NAME: &str = "generate_pitch_narrative";
pub const HUMAN_REVIEW_TOOL_NAME: &str = "request_human_review";

/// Skills recognised when comparing résumé text against a job description.
pub const SKILL_VOCABULARY: &[&str] = &[
    "python",
    "sql",
    "r",
    "excel",
    "tableau",
    "pandas",
    "pytorch",
    "tensorflow",
    "spark",
    "gcp",
    "aws",
    "azure",
    "statistics",
    "regression",
    "deep learning",
    "machine learning",
    "a/b testing",
    "kubeflow",
    "jupyter",
    "docker",
];

#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub max_results: usize,
    pub location: Option<String>,
    pub max_age_days: Option<u32>,
}

#[async_trait]
pub trait SearchService: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, params: &SearchParams) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: String,
    pub title: String,
    pub company: String,
    pub skills: Vec<String>,
    pub snippet: String,
}

/// Local stand-in for live market-trend search.
#[derive(Debug, Default)]
pub struct LocalTrendSearch;

#[async_trait]
impl SearchService for LocalTrendSearch {
    fn name(&self) -> &str {
        SEARCH_TRENDS_TOOL_NAME
    }

    async fn search(&self, query: &str, params: &SearchParams) -> Result<String> {
        let lower = query.to_ascii_lowercase();
        if !lower.contains("trend") && !lower.contains("market") {
            return Ok(format!(
                "REQUEST_SENT: Performing live web search for query: '{}' with {} results.",
                query,
                params.max_results.max(1)
            ));
        }

        let mut results = vec![
            TrendResult {
                title: "GCP Data Engineer Demand Soars".to_string(),
                snippet: "Demand for GCP-certified data roles is up 30% YOY.".to_string(),
                url: "url_gcp_report".to_string(),
            },
            TrendResult {
                title: "PyTorch vs TensorFlow for LLMs 2025".to_string(),
                snippet: "PyTorch dominates R&D, but TensorFlow remains popular for deployment."
                    .to_string(),
                url: "url_ml_report".to_string(),
            },
        ];
        if params.max_results > 0 {
            results.truncate(params.max_results);
        }
        tracing::debug!(query = query, results = results.len(), "trend search served locally");
        Ok(serde_json::to_string(&results)?)
    }
}

/// Local stand-in for a job-board API.
#[derive(Debug, Default)]
pub struct LocalJobBoard;

impl LocalJobBoard {
    pub fn postings() -> Vec<JobPosting> {
        vec![
            JobPosting {
                id: "J101".to_string(),
                title: "Junior Data Analyst".to_string(),
                company: "DataCorp".to_string(),
                skills: vec!["sql".into(), "python".into(), "pandas".into(), "tableau".into()],
                snippet: "Requires strong SQL, Python (Pandas), and visualization skills (Tableau)."
                    .to_string(),
            },
            JobPosting {
                id: "J102".to_string(),
                title: "Machine Learning Engineer".to_string(),
                company: "AICo".to_string(),
                skills: vec![
                    "pytorch".into(),
                    "tensorflow".into(),
                    "deep learning".into(),
                    "gcp".into(),
                    "aws".into(),
                ],
                snippet: "Demands expertise in PyTorch/TensorFlow, deep learning models, and cloud deployment (GCP/AWS)."
                    .to_string(),
            },
            JobPosting {
                id: "J103".to_string(),
                title: "Data Science Intern".to_string(),
                company: "StartUpX".to_string(),
                skills: vec!["statistics".into(), "regression".into(), "jupyter".into()],
                snippet: "Looking for basics in statistics and linear regression. Must be familiar with Jupyter Notebooks."
                    .to_string(),
            },
        ]
    }
}

#[async_trait]
impl SearchService for LocalJobBoard {
    fn name(&self) -> &str {
        QUERY_JOB_BOARD_TOOL_NAME
    }

    async fn search(&self, query: &str, params: &SearchParams) -> Result<String> {
        let mut postings = Self::postings();
        if params.max_results > 0 {
            postings.truncate(params.max_results);
        }
        tracing::debug!(
            query = query,
            location = params.location.as_deref().unwrap_or("<any>"),
            results = postings.len(),
            "job board served locally"
        );
        Ok(json!({
            "query": query,
            "location": params.location.clone().unwrap_or_else(|| "Remote".to_string()),
            "postings": postings,
        })
        .to_string())
    }
}

/// Search collaborators shared by every generator.
#[derive(Clone)]
pub struct Toolbox {
    pub trends: Arc<dyn SearchService>,
    pub jobs: Arc<dyn SearchService>,
}

impl Default for Toolbox {
    fn default() -> Self {
        Self {
            trends: Arc::new(LocalTrendSearch),
            jobs: Arc::new(LocalJobBoard),
        }
    }
}

/// Skills from the vocabulary that appear in `text`.
pub fn extract_skills(text: &str) -> BTreeSet<String> {
    let lower = text.to_ascii_lowercase();
    let tokens = lower
        .split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '/'))
        .filter(|token| !token.is_empty())
        .collect::<BTreeSet<&str>>();

    SKILL_VOCABULARY
        .iter()
        .filter(|skill| {
            if skill.contains(' ') {
                lower.contains(*skill)
            } else {
                tokens.contains(*skill)
            }
        })
        .map(|skill| skill.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumeMatch {
    pub match_score: u32,
    pub required_skills_found: Vec<String>,
    pub skill_gaps_flagged: Vec<String>,
}

impl ResumeMatch {
    pub fn summary(&self) -> String {
        format!(
            "Match Score: {}/100\nSkills found: {}\nSkill gaps: {}",
            self.match_score,
            list_or_none(&self.required_skills_found),
            list_or_none(&self.skill_gaps_flagged)
        )
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "<none>".to_string()
    } else {
        items.join(", ")
    }
}

/// Keyword overlap between a résumé and a job description.
pub fn parse_resume(resume_text: &str, jd_text: &str) -> ResumeMatch {
    let resume = extract_skills(resume_text);
    let required = extract_skills(jd_text);
    if required.is_empty() {
        return ResumeMatch {
            match_score: 0,
            required_skills_found: Vec::new(),
            skill_gaps_flagged: Vec::new(),
        };
    }

    let found = required
        .intersection(&resume)
        .cloned()
        .collect::<Vec<String>>();
    let gaps = required
        .difference(&resume)
        .cloned()
        .collect::<Vec<String>>();
    let match_score = (found.len() as u32 * 100) / required.len() as u32;

    ResumeMatch {
        match_score,
        required_skills_found: found,
        skill_gaps_flagged: gaps,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedJob {
    pub id: String,
    pub title: String,
    pub company: String,
    pub score: u32,
}

/// Rank postings by the share of their skills present in the profile text.
pub fn rank_jobs_by_fit(postings: &[JobPosting], profile: &str) -> Vec<RankedJob> {
    let profile_skills = extract_skills(profile);
    let mut ranked = postings
        .iter()
        .map(|posting| {
            let hits = posting
                .skills
                .iter()
                .filter(|skill| profile_skills.contains(skill.as_str()))
                .count() as u32;
            let score = if posting.skills.is_empty() {
                0
            } else {
                hits * 100 / posting.skills.len() as u32
            };
            RankedJob {
                id: posting.id.clone(),
                title: posting.title.clone(),
                company: posting.company.clone(),
                score,
            }
        })
        .collect::<Vec<RankedJob>>();
    ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    ranked
}

pub fn create_short_quiz(topic: &str, num_questions: usize) -> String {
    format!(
        "REQUEST: Generate a {}-question diagnostic quiz on the topic: {}. Output in Markdown format.",
        num_questions.max(1),
        topic.trim()
    )
}

pub fn generate_pitch_narrative(topic: &str, context: &str) -> String {
    format!(
        "DRAFT_NARRATIVE: Analyzing context ({} chars) to craft a high-stakes pitch on: {}.",
        context.chars().count(),
        topic
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skills_match_whole_tokens() {
        let skills = extract_skills("Stats nerd: Python, SQL; some machine learning. Ran A/B testing.");
        assert!(skills.contains("python"));
        assert!(skills.contains("sql"));
        assert!(skills.contains("machine learning"));
        assert!(skills.contains("a/b testing"));
        assert!(!skills.contains("statistics"));
        assert!(!skills.contains("r"));
    }

    #[test]
    fn resume_match_scores_overlap() {
        let result = parse_resume(
            "Jane Doe. Python, Excel, R.",
            "We need Python, SQL and GCP experience.",
        );
        assert_eq!(result.match_score, 33);
        assert_eq!(result.required_skills_found, vec!["python"]);
        assert_eq!(result.skill_gaps_flagged, vec!["gcp", "sql"]);
        assert!(result.summary().starts_with("Match Score: 33/100"));
    }

    #[test]
    fn ranking_prefers_best_fit() {
        let ranked = rank_jobs_by_fit(&LocalJobBoard::postings(), "SQL, Python, Pandas, Tableau");
        assert_eq!(ranked[0].id, "J101");
        assert_eq!(ranked[0].score, 100);
    }

    #[tokio::test]
    async fn trend_search_returns_json_for_trend_queries() {
        let raw = LocalTrendSearch
            .search("hiring trends for GCP", &SearchParams::default())
            .await
            .unwrap();
        let parsed: Vec<TrendResult> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 2);

        let other = LocalTrendSearch
            .search("rust borrow checker", &SearchParams::default())
            .await
            .unwrap();
        assert!(other.starts_with("REQUEST_SENT"));
    }

    #[tokio::test]
    async fn job_board_truncates_results() {
        let params = SearchParams {
            max_results: 1,
            location: Some("Remote".to_string()),
            max_age_days: Some(7),
        };
        let raw = LocalJobBoard.search("data scientist", &params).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["postings"].as_array().unwrap().len(), 1);
    }
}
