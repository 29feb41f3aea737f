use anyhow::Result;

use crate::config::RuntimeConfig;
use crate::generation::{GOOGLE_API_KEY_ENV, env_present, resolve_provider};
use crate::memory::{FileLoadStatus, MIN_RESUME_CHARS};
use crate::roles::load_role_registry;

fn resume_file_status(cfg: &RuntimeConfig) -> FileLoadStatus {
    let path = cfg.resume_path();
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let chars = content.trim().chars().count();
            if chars < MIN_RESUME_CHARS {
                FileLoadStatus::TooShort { chars }
            } else {
                FileLoadStatus::Loaded { chars }
            }
        }
        Err(_) => FileLoadStatus::Missing,
    }
}

pub fn run_doctor(cfg: &RuntimeConfig) -> Result<()> {
    println!(
        "Active profile: '{}' (config: {})",
        cfg.profile, cfg.config_path
    );

    println!("Provider environment check:");
    let key_status = if env_present(GOOGLE_API_KEY_ENV) {
        "set"
    } else {
        "missing"
    };
    println!("- {GOOGLE_API_KEY_ENV}: {key_status}");
    println!(
        "Provider resolution: requested={} resolved={} model_override={}",
        cfg.provider.label(),
        resolve_provider(cfg.provider).label(),
        cfg.model.as_deref().unwrap_or("<provider-default>")
    );
    println!(
        "Generation retry: attempts={} delay_ms={}",
        cfg.generation_retry_attempts, cfg.generation_retry_delay_ms
    );

    let status = resume_file_status(cfg);
    println!("Résumé file: {} ({})", cfg.resume_path, status.label());
    if !matches!(status, FileLoadStatus::Loaded { .. }) {
        println!("Tip: save your résumé as plain text at that path or pass --resume-path.");
    }

    match load_role_registry(&cfg.roles_path()) {
        Ok(registry) => {
            let sensitive = registry
                .list()
                .iter()
                .filter(|role| role.sensitive_output)
                .map(|role| role.id.clone())
                .collect::<Vec<String>>();
            println!(
                "Roles: {} registered from builtins + '{}' (approval required: {})",
                registry.len(),
                cfg.roles_path,
                if sensitive.is_empty() {
                    "<none>".to_string()
                } else {
                    sensitive.join(", ")
                }
            );
        }
        Err(err) => println!("Roles: catalog error: {err:#}"),
    }

    println!("Dispatch mode: {}", cfg.dispatch_mode.label());
    println!(
        "Output directory: {}",
        cfg.output_dir.as_deref().unwrap_or("<memory only>")
    );
    println!(
        "Telemetry: enabled={} path={}",
        cfg.telemetry_enabled, cfg.telemetry_path
    );
    println!("Memory seed entries: {}", cfg.memory_seed.len());

    Ok(())
}
