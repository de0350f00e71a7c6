pub mod commands;
pub mod runtime;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use routeslip_core::config::{
    AppConfig, ChainSourceKind, ConfigOverrides, LoadOptions, LogFormat,
};

#[derive(Debug, Parser)]
#[command(
    name = "routeslip",
    about = "Routeslip document approval CLI",
    long_about = "Submit documents, record approver decisions, and inspect sequential approval state.",
    after_help = "Examples:\n  routeslip migrate\n  routeslip submit --student stu-1 --type \"Bonafide Certificate\"\n  routeslip act --approver faculty@dts.com --document <id> --action approve\n  routeslip inbox --approver dtshod@dts.com --status pending"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        help = "Config file path (defaults to routeslip.toml or config/routeslip.toml)"
    )]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override database.url")]
    database_url: Option<String>,
    #[arg(long, global = true, help = "Override logging.level")]
    log_level: Option<String>,
    #[arg(
        long,
        global = true,
        value_parser = parse_log_format,
        help = "Override logging.format"
    )]
    log_format: Option<LogFormat>,
    #[arg(
        long,
        global = true,
        value_parser = parse_chain_source,
        help = "Override workflow.chain_source (config|database)"
    )]
    chain_source: Option<ChainSourceKind>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "List approver chains, or copy configured chains into the database")]
    Flows(commands::flows::FlowsArgs),
    #[command(about = "Submit a document for approval")]
    Submit(commands::submit::SubmitArgs),
    #[command(about = "Resubmit a rejected document, starting a new round")]
    Resubmit(commands::submit::ResubmitArgs),
    #[command(about = "Approve, reject, or comment on a document as an approver")]
    Act(commands::act::ActArgs),
    #[command(about = "Show the derived status of a document for a viewer")]
    Status(commands::status::StatusArgs),
    #[command(about = "Show the full action log of a document across rounds")]
    History(commands::status::HistoryArgs),
    #[command(about = "List documents waiting on or decided by an approver")]
    Inbox(commands::inbox::InboxArgs),
    #[command(about = "List every document type with the student's current status")]
    Overview(commands::inbox::OverviewArgs),
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                log_level: self.log_level.clone(),
                log_format: self.log_format,
                chain_source: self.chain_source,
                max_attempts: None,
            },
        }
    }
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse::<LogFormat>().map_err(|error| error.to_string())
}

fn parse_chain_source(value: &str) -> Result<ChainSourceKind, String> {
    value.parse::<ChainSourceKind>().map_err(|error| error.to_string())
}

/// Installs a stderr subscriber so stdout carries only the JSON payload.
/// Falls back to defaults when the config cannot be loaded; the command
/// itself reports that failure.
fn init_logging(options: &LoadOptions) {
    use routeslip_core::config::LogFormat::*;
    use tracing::Level;

    let config = AppConfig::load(options.clone()).unwrap_or_default();
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_max_level(log_level);

    let _ = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();
    init_logging(&options);

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(&options),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&options) }
        }
        Command::Flows(args) => commands::flows::run(&options, args),
        Command::Submit(args) => commands::submit::run(&options, args),
        Command::Resubmit(args) => commands::submit::run_resubmit(&options, args),
        Command::Act(args) => commands::act::run(&options, args),
        Command::Status(args) => commands::status::run(&options, args),
        Command::History(args) => commands::status::run_history(&options, args),
        Command::Inbox(args) => commands::inbox::run(&options, args),
        Command::Overview(args) => commands::inbox::run_overview(&options, args),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
