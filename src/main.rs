use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tracing::level_filters::LevelFilter;

use career_copilot::approval::ApprovalGate;
use career_copilot::chat::run_chat;
use career_copilot::cli::{
    Cli, Commands, MemoryCommands, ProfileCommands, RoleCommands, ServerCommands,
    TelemetryCommands, command_label,
};
use career_copilot::config::{ProfilesFile, RuntimeConfig, load_profiles, resolve_runtime_config};
use career_copilot::dispatch::Dispatcher;
use career_copilot::doctor::run_doctor;
use career_copilot::error::{categorize_error, format_cli_error};
use career_copilot::generation::build_generator;
use career_copilot::memory::{MemoryStore, RESUME_KEY};
use career_copilot::mission::{MissionController, MissionRequest};
use career_copilot::profiles::{run_profiles_list, run_profiles_show};
use career_copilot::roles::{RoleRegistry, load_role_registry, run_roles_list, run_roles_show};
use career_copilot::server::run_server;
use career_copilot::streaming::{ApprovalMode, FollowOutcome, follow_mission, print_outcome};
use career_copilot::telemetry::{TelemetrySink, run_telemetry_report};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err));
        tracing::error!(category = %categorize_error(&err).code(), error = %err, "command failed");
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(log_filter: &str) -> Result<()> {
    let level = log_filter
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(log_filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

fn build_memory(cfg: &RuntimeConfig) -> Result<Arc<MemoryStore>> {
    let memory = MemoryStore::with_seed(cfg.memory_seed.clone());
    let status = memory.load_file(RESUME_KEY, &cfg.resume_path())?;
    tracing::info!(path = %cfg.resume_path, status = %status.label(), "Résumé memory");
    Ok(Arc::new(memory))
}

fn build_controller(
    cfg: &RuntimeConfig,
    registry: Arc<RoleRegistry>,
    memory: Arc<MemoryStore>,
    telemetry: &TelemetrySink,
) -> Result<Arc<MissionController>> {
    let (generator, provider) = build_generator(cfg)?;
    tracing::info!(
        provider = provider.label(),
        generator = generator.name(),
        roles = registry.len(),
        dispatch_mode = cfg.dispatch_mode.label(),
        "Using generator"
    );
    let controller = MissionController::new(
        Dispatcher::new(registry, cfg.dispatch_mode),
        memory,
        Arc::new(ApprovalGate::new()),
        generator,
        telemetry.clone(),
    )
    .with_output_dir(cfg.output_dir().map(PathBuf::from));
    Ok(Arc::new(controller))
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let profiles = load_profiles(&cli.config_path)?;
    let cfg = resolve_runtime_config(&cli, &profiles)?;
    let label = cli
        .command
        .as_ref()
        .map(command_label)
        .unwrap_or_else(|| "chat".to_string());
    let telemetry = TelemetrySink::new(&cfg, label);
    telemetry.emit(
        "command.started",
        json!({ "provider": cfg.provider.label(), "profile": cfg.profile.clone() }),
    );

    let result = run_command(cli, &cfg, &profiles, &telemetry).await;
    match &result {
        Ok(()) => telemetry.emit("command.completed", json!({})),
        Err(err) => telemetry.emit(
            "command.failed",
            json!({ "category": categorize_error(err).code(), "error": format!("{err:#}") }),
        ),
    }
    result
}

async fn run_command(
    cli: Cli,
    cfg: &RuntimeConfig,
    profiles: &ProfilesFile,
    telemetry: &TelemetrySink,
) -> Result<()> {
    match cli.command {
        Some(Commands::Ask {
            prompt,
            role,
            approve,
            reject,
            show_trace,
        }) => {
            let registry = Arc::new(load_role_registry(&cfg.roles_path())?);
            let memory = build_memory(cfg)?;
            let controller = build_controller(cfg, registry, memory, telemetry)?;
            let mode = if approve {
                ApprovalMode::Approve
            } else if reject {
                ApprovalMode::Reject
            } else {
                ApprovalMode::Prompt { allow_defer: false }
            };
            let handle =
                controller.spawn(MissionRequest::new(prompt.join(" ")).with_role_hint(role));
            match follow_mission(handle, controller.gate(), mode, false).await? {
                FollowOutcome::Finished(outcome) => print_outcome(&outcome, show_trace),
                FollowOutcome::Deferred(handle, _) => {
                    handle.cancel();
                    let outcome = handle.outcome().await?;
                    print_outcome(&outcome, show_trace);
                }
            }
        }
        Some(Commands::Chat) | None => {
            let registry = Arc::new(load_role_registry(&cfg.roles_path())?);
            let memory = build_memory(cfg)?;
            let controller = build_controller(cfg, registry, memory, telemetry)?;
            run_chat(cfg.clone(), controller, telemetry).await?;
        }
        Some(Commands::Doctor) => run_doctor(cfg)?,
        Some(Commands::Profiles { command }) => match command {
            ProfileCommands::List => run_profiles_list(profiles, cfg)?,
            ProfileCommands::Show => run_profiles_show(cfg)?,
        },
        Some(Commands::Roles { command }) => {
            let registry = load_role_registry(&cfg.roles_path())?;
            match command {
                RoleCommands::List => run_roles_list(&registry)?,
                RoleCommands::Show { name } => run_roles_show(&registry, &name)?,
            }
        }
        Some(Commands::Memory { command }) => {
            let memory = build_memory(cfg)?;
            match command {
                MemoryCommands::List => {
                    for key in memory.list_keys() {
                        println!("{key}");
                    }
                }
                MemoryCommands::Get { key } => println!("{}", memory.get(&key)?),
            }
        }
        Some(Commands::Telemetry { command }) => match command {
            TelemetryCommands::Report { path, limit } => run_telemetry_report(cfg, path, limit)?,
        },
        Some(Commands::Server { command }) => match command {
            ServerCommands::Serve { host, port } => {
                let registry = Arc::new(load_role_registry(&cfg.roles_path())?);
                let memory = build_memory(cfg)?;
                let controller = build_controller(cfg, registry, memory, telemetry)?;
                run_server(cfg.clone(), controller, host, port, telemetry).await?;
            }
        },
    }

    Ok(())
}
