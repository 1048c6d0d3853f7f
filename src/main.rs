use anyhow::Result;
use clap::Parser;

use finance_focus::cli::{Cli, Commands, ProfileCommands, TelemetryCommands, command_label};
use finance_focus::config::{load_profiles, resolve_runtime_config};
use finance_focus::error::{categorize_error, format_cli_error, redact_sensitive_text};
use finance_focus::profiles::{run_profiles_list, run_profiles_show};
use finance_focus::runner::{run_pipeline_command, run_plan_command, run_tools_command};
use finance_focus::telemetry::run_telemetry_report;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let show_sensitive_config = cli.show_sensitive_config;
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err, show_sensitive_config));
        tracing::error!(
            category = %categorize_error(&err).code(),
            error = %redact_sensitive_text(&format!("{err:#}")),
            "command failed"
        );
        std::process::exit(1);
    }

    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let profiles = load_profiles(&cli.config_path)?;
    let cfg = resolve_runtime_config(&cli, &profiles)?;
    let command = cli.command.unwrap_or_else(Commands::default_run);
    tracing::debug!(command = %command_label(&command), profile = %cfg.profile, "Dispatching command");

    match command {
        Commands::Run {
            topic,
            show_intermediate,
        } => run_pipeline_command(&cfg, &topic, show_intermediate).await?,
        Commands::Plan { topic } => run_plan_command(&cfg, &topic)?,
        Commands::Tools => run_tools_command(&cfg)?,
        Commands::Profiles { command } => match command {
            ProfileCommands::List => run_profiles_list(&profiles, &cfg)?,
            ProfileCommands::Show => run_profiles_show(&cfg)?,
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { path, limit } => run_telemetry_report(&cfg, path, limit)?,
        },
    }

    Ok(())
}

fn init_tracing(log_filter: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}
