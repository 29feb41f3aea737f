use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::tool_policy::filter_capabilities;
use crate::tools::{
    CREATE_QUIZ_TOOL_NAME, GENERATE_ATS_TOOL_NAME, HUMAN_REVIEW_TOOL_NAME,
    LOAD_MEMORY_TOOL_NAME, PARSE_RESUME_TOOL_NAME, PITCH_NARRATIVE_TOOL_NAME,
    QUERY_JOB_BOARD_TOOL_NAME, RANK_JOBS_TOOL_NAME, SAVE_ARTIFACT_TOOL_NAME,
    SEARCH_TRENDS_TOOL_NAME, WEB_SEARCH_TOOL_NAME,
};

pub const TUTOR_ROLE: &str = "tutor";
pub const RESEARCH_ROLE: &str = "research";
pub const RESUME_ROLE: &str = "resume";
pub const JOB_SEARCH_ROLE: &str = "job_search";
pub const COACH_ROLE: &str = "coach";

/// Role used when no heuristic matches a mission.
pub const FALLBACK_ROLE: &str = TUTOR_ROLE;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("role '{0}' is already registered")]
    DuplicateRole(String),
    #[error("role '{id}' not found. Available roles: {available}")]
    UnknownRole { id: String, available: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleSource {
    Builtin,
    Catalog,
}

impl RoleSource {
    pub fn label(self) -> &'static str {
        match self {
            RoleSource::Builtin => "builtin",
            RoleSource::Catalog => "catalog",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub instruction: String,
    pub capabilities: BTreeSet<String>,
    /// Artifacts from this role must pass the approval gate.
    pub sensitive_output: bool,
    /// Document type recorded on approval requests when the generator does
    /// not name one.
    pub document_type: Option<String>,
    pub aliases: Vec<String>,
    pub source: RoleSource,
}

impl RoleDescriptor {
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }
}

/// Role lookup table. Built once at start-up, read-only afterwards.
#[derive(Debug, Default)]
pub struct RoleRegistry {
    roles: Vec<Arc<RoleDescriptor>>,
    index: HashMap<String, usize>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the five built-in roles.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for role in builtin_roles() {
            // Built-in ids and aliases are distinct.
            let _ = registry.register(role);
        }
        registry
    }

    pub fn register(&mut self, descriptor: RoleDescriptor) -> Result<(), RegistryError> {
        let mut names = vec![descriptor.id.clone()];
        names.extend(descriptor.aliases.iter().cloned());
        for name in &names {
            if self.index.contains_key(&normalize_role_id(name)) {
                return Err(RegistryError::DuplicateRole(name.clone()));
            }
        }

        let position = self.roles.len();
        for name in names {
            self.index.insert(normalize_role_id(&name), position);
        }
        tracing::debug!(role = %descriptor.id, source = descriptor.source.label(), "registered role");
        self.roles.push(Arc::new(descriptor));
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<RoleDescriptor>, RegistryError> {
        self.index
            .get(&normalize_role_id(id))
            .and_then(|position| self.roles.get(*position))
            .cloned()
            .ok_or_else(|| RegistryError::UnknownRole {
                id: id.trim().to_string(),
                available: self.ids().join(", "),
            })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(&normalize_role_id(id))
    }

    /// Roles in registration order.
    pub fn list(&self) -> &[Arc<RoleDescriptor>] {
        &self.roles
    }

    pub fn ids(&self) -> Vec<String> {
        self.roles.iter().map(|role| role.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

fn normalize_role_id(id: &str) -> String {
    id.trim().to_ascii_lowercase().replace('-', "_")
}

fn capability_set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

pub fn builtin_roles() -> Vec<RoleDescriptor> {
    vec![
        RoleDescriptor {
            id: TUTOR_ROLE.to_string(),
            name: "Data Science Tutor".to_string(),
            description: "Teaches, quizzes, and diagnoses conceptual gaps in data science, \
                          machine learning, and technical interview topics."
                .to_string(),
            instruction: "Load the user's skill profile from memory before answering. Explain \
                          concepts clearly with short code examples when relevant and adapt to \
                          the user's level. When asked to diagnose a skill or practice, start \
                          with a short quiz. Keep explanations under 400 words."
                .to_string(),
            capabilities: capability_set(&[CREATE_QUIZ_TOOL_NAME, LOAD_MEMORY_TOOL_NAME]),
            sensitive_output: false,
            document_type: None,
            aliases: vec!["ds_tutor_agent".to_string()],
            source: RoleSource::Builtin,
        },
        RoleDescriptor {
            id: RESEARCH_ROLE.to_string(),
            name: "Market Research".to_string(),
            description: "Finds current hiring trends, in-demand skills, salary data, and \
                          authoritative sources."
                .to_string(),
            instruction: "Ground every factual claim in search results and cite sources with \
                          dates. Summarize trends as a short list of findings. Hand concept \
                          questions back to the tutor."
                .to_string(),
            capabilities: capability_set(&[WEB_SEARCH_TOOL_NAME, SEARCH_TRENDS_TOOL_NAME]),
            sensitive_output: false,
            document_type: None,
            aliases: vec!["research_agent".to_string()],
            source: RoleSource::Builtin,
        },
        RoleDescriptor {
            id: RESUME_ROLE.to_string(),
            name: "Resume Tailor".to_string(),
            description: "Matches the stored résumé against a job description and drafts \
                          ATS-friendly rewrites."
                .to_string(),
            instruction: "Read the résumé from memory key user:resume:raw. Compare it with the \
                          job description, report a match score (0-100), skills found, critical \
                          skill gaps, ATS risk flags, and suggested rewrite snippets. Never \
                          invent experience."
                .to_string(),
            capabilities: capability_set(&[
                LOAD_MEMORY_TOOL_NAME,
                PARSE_RESUME_TOOL_NAME,
                GENERATE_ATS_TOOL_NAME,
                SAVE_ARTIFACT_TOOL_NAME,
            ]),
            sensitive_output: false,
            document_type: None,
            aliases: vec!["resume_agent".to_string(), "resume_tailor".to_string()],
            source: RoleSource::Builtin,
        },
        RoleDescriptor {
            id: JOB_SEARCH_ROLE.to_string(),
            name: "Job Search".to_string(),
            description: "Finds relevant postings, extracts required skills, and ranks them by \
                          fit against the user's profile."
                .to_string(),
            instruction: "Use the user's stored preferences (location, salary) as constraints. \
                          Query the job board, rank postings by fit, and present the top three \
                          with the reason each is a strong match."
                .to_string(),
            capabilities: capability_set(&[
                LOAD_MEMORY_TOOL_NAME,
                QUERY_JOB_BOARD_TOOL_NAME,
                RANK_JOBS_TOOL_NAME,
            ]),
            sensitive_output: false,
            document_type: None,
            aliases: vec!["job_search_agent".to_string()],
            source: RoleSource::Builtin,
        },
        RoleDescriptor {
            id: COACH_ROLE.to_string(),
            name: "Career Coach".to_string(),
            description: "Coaches interview pitches and drafts sensitive career narratives such \
                          as layoff explanations. Drafts require human approval."
                .to_string(),
            instruction: "Load the user's career history and notes (for example the stored \
                          layoff reason) first. Draft a compassionate, professional, concise \
                          narrative suitable for interviews and LinkedIn. The draft is reviewed \
                          by a human before delivery."
                .to_string(),
            capabilities: capability_set(&[
                LOAD_MEMORY_TOOL_NAME,
                PITCH_NARRATIVE_TOOL_NAME,
                HUMAN_REVIEW_TOOL_NAME,
                SAVE_ARTIFACT_TOOL_NAME,
            ]),
            sensitive_output: true,
            document_type: Some("Career narrative".to_string()),
            aliases: vec!["coach_agent".to_string(), "career_coach".to_string()],
            source: RoleSource::Builtin,
        },
    ]
}

// ---------------------------------------------------------------------------
// Role catalog file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleFileConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub instruction: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub sensitive_output: bool,
    pub document_type: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RolePolicyConfig {
    #[serde(default)]
    pub allow_tools: Vec<String>,
    #[serde(default)]
    pub deny_tools: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleCatalogFile {
    #[serde(default)]
    pub roles: HashMap<String, RoleFileConfig>,
    #[serde(default)]
    pub policy: HashMap<String, RolePolicyConfig>,
}

pub fn load_role_catalog_file(path: &Path) -> Result<RoleCatalogFile> {
    if !path.exists() {
        return Ok(RoleCatalogFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read role catalog file at '{}'", path.display()))?;
    toml::from_str::<RoleCatalogFile>(&content).with_context(|| {
        format!(
            "invalid role catalog configuration in '{}'. Check field names and capability lists.",
            path.display()
        )
    })
}

fn catalog_role(id: String, config: RoleFileConfig) -> RoleDescriptor {
    RoleDescriptor {
        name: config.name.unwrap_or_else(|| id.clone()),
        description: config.description.unwrap_or_default(),
        instruction: config.instruction.unwrap_or_default(),
        capabilities: config
            .capabilities
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
        sensitive_output: config.sensitive_output,
        document_type: config.document_type,
        aliases: config.aliases,
        source: RoleSource::Catalog,
        id,
    }
}

/// Build the start-up registry: built-in roles, then catalog roles (sorted by
/// id so registration order is stable), with capability policies applied.
pub fn build_role_registry(catalog: RoleCatalogFile) -> Result<RoleRegistry> {
    let mut descriptors = builtin_roles();
    let mut catalog_roles = catalog.roles.into_iter().collect::<Vec<_>>();
    catalog_roles.sort_by(|a, b| a.0.cmp(&b.0));
    descriptors.extend(
        catalog_roles
            .into_iter()
            .map(|(id, config)| catalog_role(id.trim().to_string(), config)),
    );

    for (role_id, policy) in &catalog.policy {
        let role_key = normalize_role_id(role_id);
        let Some(descriptor) = descriptors
            .iter_mut()
            .find(|descriptor| normalize_role_id(&descriptor.id) == role_key)
        else {
            return Err(anyhow::anyhow!(
                "role policy references unknown role '{}'",
                role_id
            ));
        };
        descriptor.capabilities = filter_capabilities(
            std::mem::take(&mut descriptor.capabilities),
            &policy.allow_tools,
            &policy.deny_tools,
        );
    }

    let mut registry = RoleRegistry::new();
    for descriptor in descriptors {
        registry
            .register(descriptor)
            .context("failed to register role from catalog")?;
    }
    tracing::info!(roles = registry.len(), "Resolved role registry");
    Ok(registry)
}

pub fn load_role_registry(path: &Path) -> Result<RoleRegistry> {
    build_role_registry(load_role_catalog_file(path)?)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub fn run_roles_list(registry: &RoleRegistry) -> Result<()> {
    println!("Registered roles ({}):", registry.len());
    for role in registry.list() {
        let marker = if role.sensitive_output { "!" } else { " " };
        println!(
            "{marker} {} ({}) - {}",
            role.id,
            role.source.label(),
            role.name
        );
    }
    println!("'!' marks roles whose drafts require human approval.");
    Ok(())
}

pub fn run_roles_show(registry: &RoleRegistry, id: &str) -> Result<()> {
    let role = registry.resolve(id)?;
    println!("Role: {} (source={})", role.id, role.source.label());
    println!("Name: {}", role.name);
    println!(
        "Description: {}",
        if role.description.is_empty() {
            "<none>"
        } else {
            role.description.as_str()
        }
    );
    println!(
        "Instruction: {}",
        if role.instruction.is_empty() {
            "<none>"
        } else {
            role.instruction.as_str()
        }
    );
    println!(
        "Capabilities: {}",
        if role.capabilities.is_empty() {
            "<none>".to_string()
        } else {
            role.capabilities.iter().cloned().collect::<Vec<_>>().join(", ")
        }
    );
    println!("Sensitive output: {}", role.sensitive_output);
    println!(
        "Document type: {}",
        role.document_type.as_deref().unwrap_or("<none>")
    );
    println!(
        "Aliases: {}",
        if role.aliases.is_empty() {
            "<none>".to_string()
        } else {
            role.aliases.join(", ")
        }
    );
    Ok(())
}
