use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::*;
use crate::dispatch::DispatchMode;
use crate::memory::default_seed;

pub const DEFAULT_RESUME_PATH: &str = "data/resume.txt";
pub const DEFAULT_ROLES_PATH: &str = ".copilot/roles.toml";
pub const DEFAULT_TELEMETRY_PATH: &str = ".copilot/telemetry/events.jsonl";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: String,
    pub config_path: String,
    pub provider: Provider,
    pub model: Option<String>,
    pub user_id: String,
    pub resume_path: String,
    pub roles_path: String,
    pub output_dir: Option<String>,
    pub dispatch_mode: DispatchMode,
    pub generation_retry_attempts: u32,
    pub generation_retry_delay_ms: u64,
    pub telemetry_enabled: bool,
    pub telemetry_path: String,
    /// Memory values present at start-up, in insertion order.
    pub memory_seed: Vec<(String, String)>,
}

impl RuntimeConfig {
    pub fn resume_path(&self) -> PathBuf {
        PathBuf::from(&self.resume_path)
    }

    pub fn roles_path(&self) -> PathBuf {
        PathBuf::from(&self.roles_path)
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref().map(Path::new)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub user_id: Option<String>,
    pub resume_path: Option<String>,
    pub roles_path: Option<String>,
    pub output_dir: Option<String>,
    pub dispatch_mode: Option<DispatchMode>,
    pub generation_retry_attempts: Option<u32>,
    pub generation_retry_delay_ms: Option<u64>,
    pub telemetry_enabled: Option<bool>,
    pub telemetry_path: Option<String>,
    /// Overrides or additions to the default memory seed.
    #[serde(default)]
    pub memory: BTreeMap<String, String>,
}

pub fn load_profiles(config_path: &str) -> Result<ProfilesFile> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(ProfilesFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read profile config file at '{}'", path.display()))?;
    toml::from_str::<ProfilesFile>(&content).with_context(|| {
        format!(
            "invalid profile configuration in '{}'. Check provider/dispatch values and field names.",
            path.display()
        )
    })
}

fn merge_memory_seed(overrides: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut seed = default_seed();
    for (key, value) in overrides {
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        match seed.iter_mut().find(|(existing, _)| existing == key) {
            Some(entry) => entry.1 = value.clone(),
            None => seed.push((key.to_string(), value.clone())),
        }
    }
    seed
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn resolve_runtime_config(cli: &Cli, profiles: &ProfilesFile) -> Result<RuntimeConfig> {
    let selected = cli.profile.trim();
    if selected.is_empty() {
        return Err(anyhow::anyhow!(
            "profile name cannot be empty. Set --profile <name>."
        ));
    }

    let profile = if selected == "default" && !profiles.profiles.contains_key("default") {
        ProfileConfig::default()
    } else {
        profiles.profiles.get(selected).cloned().ok_or_else(|| {
            let names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
            if names.is_empty() {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. No profiles are defined yet.",
                    selected,
                    cli.config_path
                )
            } else {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. Available profiles: {}",
                    selected,
                    cli.config_path,
                    names.join(", ")
                )
            }
        })?
    };

    let provider = if cli.provider != Provider::Auto {
        cli.provider
    } else {
        profile.provider.unwrap_or(Provider::Auto)
    };

    Ok(RuntimeConfig {
        profile: selected.to_string(),
        config_path: cli.config_path.clone(),
        provider,
        model: non_empty(cli.model.clone()).or(profile.model),
        user_id: cli
            .user_id
            .clone()
            .or(profile.user_id)
            .unwrap_or_else(|| "local-user".to_string()),
        resume_path: cli
            .resume_path
            .clone()
            .or(profile.resume_path)
            .unwrap_or_else(|| DEFAULT_RESUME_PATH.to_string()),
        roles_path: cli
            .roles_path
            .clone()
            .or(profile.roles_path)
            .unwrap_or_else(|| DEFAULT_ROLES_PATH.to_string()),
        output_dir: non_empty(cli.output_dir.clone()).or(non_empty(profile.output_dir)),
        dispatch_mode: cli
            .dispatch_mode
            .or(profile.dispatch_mode)
            .unwrap_or_default(),
        generation_retry_attempts: cli
            .generation_retry_attempts
            .or(profile.generation_retry_attempts)
            .unwrap_or(2)
            .max(1),
        generation_retry_delay_ms: cli
            .generation_retry_delay_ms
            .or(profile.generation_retry_delay_ms)
            .unwrap_or(500),
        telemetry_enabled: cli
            .telemetry_enabled
            .or(profile.telemetry_enabled)
            .unwrap_or(true),
        telemetry_path: cli
            .telemetry_path
            .clone()
            .or(profile.telemetry_path)
            .unwrap_or_else(|| DEFAULT_TELEMETRY_PATH.to_string()),
        memory_seed: merge_memory_seed(&profile.memory),
    })
}
