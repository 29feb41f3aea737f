use anyhow::Result;

use crate::config::{ProfilesFile, RuntimeConfig};

pub fn run_profiles_list(profiles: &ProfilesFile, cfg: &RuntimeConfig) -> Result<()> {
    let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
    if !names.iter().any(|name| name == "default") {
        names.push("default".to_string());
    }
    names.sort();

    println!("Configured profiles (active='{}'):", cfg.profile);
    for name in names {
        let marker = if name == cfg.profile { "*" } else { " " };
        let source = if profiles.profiles.contains_key(&name) {
            "configured"
        } else {
            "implicit"
        };
        println!("{marker} {name} ({source})");
    }

    Ok(())
}

pub fn run_profiles_show(cfg: &RuntimeConfig) -> Result<()> {
    println!("Active profile: {}", cfg.profile);
    println!("Config path: {}", cfg.config_path);
    println!("Provider: {}", cfg.provider.label());
    println!(
        "Model: {}",
        cfg.model.as_deref().unwrap_or("<provider-default>")
    );
    println!("User: {}", cfg.user_id);
    println!("Résumé path: {}", cfg.resume_path);
    println!("Roles catalog: {}", cfg.roles_path);
    println!(
        "Output directory: {}",
        cfg.output_dir.as_deref().unwrap_or("<memory only>")
    );
    println!("Dispatch mode: {}", cfg.dispatch_mode.label());
    println!("Generation retry attempts: {}", cfg.generation_retry_attempts);
    println!("Generation retry delay (ms): {}", cfg.generation_retry_delay_ms);
    println!("Telemetry enabled: {}", cfg.telemetry_enabled);
    println!("Telemetry path: {}", cfg.telemetry_path);
    println!("Memory seed:");
    for (key, value) in &cfg.memory_seed {
        let preview = value.chars().take(60).collect::<String>();
        let ellipsis = if value.chars().count() > 60 { "..." } else { "" };
        println!("- {key}: {preview}{ellipsis}");
    }
    Ok(())
}
