use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use crate::crew::DEFAULT_TOPIC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Auto,
    Openai,
    Groq,
    Deepseek,
    Ollama,
    Echo,
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommands {
    #[command(about = "List configured profiles and highlight the active profile")]
    List,
    #[command(about = "Show the active profile's resolved runtime settings")]
    Show,
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

const CLI_EXAMPLES: &str = "Examples:\n\
  finance-focus\n\
  finance-focus run --topic MSFT\n\
  finance-focus --provider groq --model llama-3.3-70b-versatile run --topic NVDA --show-intermediate\n\
  finance-focus --provider echo run --topic AAPL\n\
  finance-focus plan --topic TSLA\n\
  finance-focus tools\n\
  finance-focus --profile research profiles show\n\
  finance-focus telemetry report --limit 2000\n\
\n\
Configuration:\n\
  - Profiles live in .finance-focus/config.toml; flags override the selected profile.\n\
  - Per-agent model and tool overrides go under [profiles.<name>.agents.<researcher|analyst|writer|reviewer>].\n\
  - A .env file in the working directory is loaded before flags are parsed.";

#[derive(Debug, Parser)]
#[command(name = "finance-focus")]
#[command(about = "Research, analyze, write and review an investment brief with a four-agent pipeline")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "FINANCE_FOCUS_PROVIDER", value_enum, default_value_t = Provider::Auto)]
    pub provider: Provider,

    #[arg(long, env = "FINANCE_FOCUS_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "FINANCE_FOCUS_BASE_URL")]
    pub base_url: Option<String>,

    #[arg(long, env = "FINANCE_FOCUS_PROFILE", default_value = "default")]
    pub profile: String,

    #[arg(long, env = "FINANCE_FOCUS_CONFIG", default_value = ".finance-focus/config.toml")]
    pub config_path: String,

    #[arg(long, env = "FINANCE_FOCUS_TEMPERATURE")]
    pub temperature: Option<f32>,

    #[arg(long, env = "FINANCE_FOCUS_MAX_TOKENS")]
    pub max_tokens: Option<u32>,

    #[arg(long, env = "FINANCE_FOCUS_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    #[arg(long, env = "FINANCE_FOCUS_AGENT_TIMEOUT_SECS")]
    pub agent_timeout_secs: Option<u64>,

    #[arg(long, env = "FINANCE_FOCUS_MAX_TOOL_ROUNDS")]
    pub max_tool_rounds: Option<usize>,

    #[arg(long, env = "FINANCE_FOCUS_KNOWLEDGE_BASE_PATH")]
    pub knowledge_base_path: Option<String>,

    #[arg(long, env = "FINANCE_FOCUS_KNOWLEDGE_BASE_MAX_CHUNKS")]
    pub knowledge_base_max_chunks: Option<usize>,

    #[arg(long, env = "FINANCE_FOCUS_SEARCH_ENDPOINT")]
    pub search_endpoint: Option<String>,

    #[arg(long, env = "FINANCE_FOCUS_SEARCH_API_KEY_ENV")]
    pub search_api_key_env: Option<String>,

    #[arg(long, env = "FINANCE_FOCUS_SEARCH_MAX_RESULTS")]
    pub search_max_results: Option<usize>,

    #[arg(long, env = "FINANCE_FOCUS_TOOL_TIMEOUT_SECS")]
    pub tool_timeout_secs: Option<u64>,

    #[arg(long, env = "FINANCE_FOCUS_SHOW_SENSITIVE_CONFIG", default_value_t = false)]
    pub show_sensitive_config: bool,

    #[arg(long, env = "FINANCE_FOCUS_TELEMETRY_ENABLED", action = clap::ArgAction::Set)]
    pub telemetry_enabled: Option<bool>,

    #[arg(long, env = "FINANCE_FOCUS_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Run the research → analysis → writing → review pipeline for a ticker")]
    Run {
        #[arg(long, default_value = DEFAULT_TOPIC)]
        topic: String,
        #[arg(long, default_value_t = false)]
        show_intermediate: bool,
    },
    #[command(about = "Print the validated task graph and each agent's tools without running it")]
    Plan {
        #[arg(long, default_value = DEFAULT_TOPIC)]
        topic: String,
    },
    #[command(about = "List the default toolkit with schemas and side effects")]
    Tools,
    #[command(about = "Inspect profile configuration and active resolved profile state")]
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    #[command(about = "Telemetry utilities and reporting")]
    Telemetry {
        #[command(subcommand)]
        command: TelemetryCommands,
    },
}

impl Commands {
    /// What a bare `finance-focus` invocation does.
    pub fn default_run() -> Self {
        Commands::Run {
            topic: DEFAULT_TOPIC.to_string(),
            show_intermediate: false,
        }
    }
}

pub fn command_label(command: &Commands) -> String {
    match command {
        Commands::Run { .. } => "run".to_string(),
        Commands::Plan { .. } => "plan".to_string(),
        Commands::Tools => "tools".to_string(),
        Commands::Profiles { command } => match command {
            ProfileCommands::List => "profiles.list".to_string(),
            ProfileCommands::Show => "profiles.show".to_string(),
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { .. } => "telemetry.report".to_string(),
        },
    }
}

pub fn provider_label(provider: Provider) -> &'static str {
    match provider {
        Provider::Auto => "auto",
        Provider::Openai => "openai",
        Provider::Groq => "groq",
        Provider::Deepseek => "deepseek",
        Provider::Ollama => "ollama",
        Provider::Echo => "echo",
    }
}
