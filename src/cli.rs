use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use crate::dispatch::DispatchMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Auto,
    Gemini,
    Offline,
}

impl Provider {
    pub fn label(self) -> &'static str {
        match self {
            Provider::Auto => "auto",
            Provider::Gemini => "gemini",
            Provider::Offline => "offline",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommands {
    #[command(about = "List configured profiles and highlight the active profile")]
    List,
    #[command(about = "Show the active profile's resolved runtime settings")]
    Show,
}

#[derive(Debug, Subcommand)]
pub enum RoleCommands {
    #[command(about = "List registered roles in dispatch order")]
    List,
    #[command(about = "Show a role's capabilities and approval settings")]
    Show {
        #[arg(long)]
        name: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum MemoryCommands {
    #[command(about = "List memory keys in insertion order")]
    List,
    #[command(about = "Print the value stored under a key")]
    Get {
        #[arg(long)]
        key: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum TelemetryCommands {
    #[command(about = "Summarize telemetry events from a JSONL stream")]
    Report {
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = 5000)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum ServerCommands {
    #[command(about = "Run the HTTP mission API")]
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8787)]
        port: u16,
    },
}

const CLI_EXAMPLES: &str = "Examples:\n\
  career-copilot ask \"What are the hiring trends for data scientists?\"\n\
  career-copilot ask --role coach \"Draft my layoff pitch\"\n\
  career-copilot ask --approve \"Help me pitch my layoff in interviews\"\n\
  career-copilot --dispatch-mode fan-out ask \"Explain my layoff and review my resume\"\n\
  career-copilot --provider offline chat\n\
  career-copilot roles list\n\
  career-copilot roles show --name coach\n\
  career-copilot ask --show-trace \"Quiz me on statistics\"\n\
  career-copilot memory list\n\
  career-copilot server serve --host 127.0.0.1 --port 8787\n\
  career-copilot telemetry report --limit 2000\n\
\n\
Approval behavior:\n\
  - Drafts from sensitive roles (coach) wait for a human decision before delivery.\n\
  - ask prompts on stdin unless --approve or --reject is given.\n\
  - In chat, use /pending, /approve <id>, and /reject <id>.\n\
  - Edit the résumé file, then use /reload in chat or POST /v1/memory/reload.";

#[derive(Debug, Parser)]
#[command(name = "career-copilot")]
#[command(about = "Career mission router with a human approval gate for sensitive drafts")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "COPILOT_PROVIDER", value_enum, default_value_t = Provider::Auto)]
    pub provider: Provider,

    #[arg(long, env = "COPILOT_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "COPILOT_PROFILE", default_value = "default")]
    pub profile: String,

    #[arg(long, env = "COPILOT_CONFIG", default_value = ".copilot/config.toml")]
    pub config_path: String,

    #[arg(long, env = "COPILOT_USER_ID")]
    pub user_id: Option<String>,

    #[arg(long, env = "COPILOT_RESUME_PATH")]
    pub resume_path: Option<String>,

    #[arg(long, env = "COPILOT_ROLES_PATH")]
    pub roles_path: Option<String>,

    #[arg(long, env = "COPILOT_OUTPUT_DIR")]
    pub output_dir: Option<String>,

    #[arg(long, env = "COPILOT_DISPATCH_MODE", value_enum)]
    pub dispatch_mode: Option<DispatchMode>,

    #[arg(long, env = "COPILOT_GENERATION_RETRY_ATTEMPTS")]
    pub generation_retry_attempts: Option<u32>,

    #[arg(long, env = "COPILOT_GENERATION_RETRY_DELAY_MS")]
    pub generation_retry_delay_ms: Option<u64>,

    #[arg(long, env = "COPILOT_TELEMETRY_ENABLED", action = clap::ArgAction::Set)]
    pub telemetry_enabled: Option<bool>,

    #[arg(long, env = "COPILOT_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "error")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Run a one-shot mission and print the final response")]
    Ask {
        #[arg(required = true)]
        prompt: Vec<String>,
        #[arg(long, help = "Route the mission to this role instead of the heuristic table")]
        role: Option<String>,
        #[arg(long, default_value_t = false, conflicts_with = "reject")]
        approve: bool,
        #[arg(long, default_value_t = false)]
        reject: bool,
        #[arg(long, default_value_t = false, help = "Print the raw event trace after the response")]
        show_trace: bool,
    },
    #[command(about = "Run interactive chat mode")]
    Chat,
    #[command(about = "Validate provider environment, résumé file, and role catalog")]
    Doctor,
    #[command(about = "Inspect profile configuration and active resolved profile state")]
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    #[command(about = "Inspect the role registry")]
    Roles {
        #[command(subcommand)]
        command: RoleCommands,
    },
    #[command(about = "Inspect the shared memory store as seeded at startup")]
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    #[command(about = "Telemetry utilities and reporting")]
    Telemetry {
        #[command(subcommand)]
        command: TelemetryCommands,
    },
    #[command(about = "Server mode")]
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },
}

pub fn command_label(command: &Commands) -> String {
    match command {
        Commands::Ask { .. } => "ask".to_string(),
        Commands::Chat => "chat".to_string(),
        Commands::Doctor => "doctor".to_string(),
        Commands::Profiles { command } => match command {
            ProfileCommands::List => "profiles.list".to_string(),
            ProfileCommands::Show => "profiles.show".to_string(),
        },
        Commands::Roles { command } => match command {
            RoleCommands::List => "roles.list".to_string(),
            RoleCommands::Show { .. } => "roles.show".to_string(),
        },
        Commands::Memory { command } => match command {
            MemoryCommands::List => "memory.list".to_string(),
            MemoryCommands::Get { .. } => "memory.get".to_string(),
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { .. } => "telemetry.report".to_string(),
        },
        Commands::Server { command } => match command {
            ServerCommands::Serve { .. } => "server.serve".to_string(),
        },
    }
}
