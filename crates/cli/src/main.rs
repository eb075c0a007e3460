use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ingest_monitor_core::{
    collect_system_info, hash_password, list_devices, list_recent, read_session_log, read_status,
    ControlAction, ControlBridge, MonitorConfig, Observed, ScriptBridge,
};
use ingest_monitor_service::{serve, Dashboard};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "ingest-monitor",
    version,
    about = "Inspect and control the unattended media-ingest pipeline."
)]
struct Cli {
    /// JSON config file; built-in defaults are used when omitted.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print degradation issues alongside each result.
    #[arg(long, global = true)]
    with_issues: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the current pipeline status record.
    Status,
    /// Summarize the most recent ingest sessions.
    History(HistoryArgs),
    /// Show host uptime, NAS mount state and free space.
    System,
    /// List removable partitions that carry a filesystem.
    Devices,
    /// Print the ingest log of one session folder.
    Log(LogArgs),
    /// Forward an operator action to the control program.
    Control(ControlArgs),
    /// Hash a password for the credentials file.
    HashPassword(HashPasswordArgs),
    /// Run the HTTP dashboard API.
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct HistoryArgs {
    /// Number of sessions to return; 0 or absent uses the configured limit.
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct LogArgs {
    /// Session folder name under the ingest root.
    session: String,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliControlVerb {
    EnableAutoScan,
    DisableAutoScan,
    ManualScan,
    Stop,
    DeleteFolder,
    UnmountDevice,
}

impl CliControlVerb {
    fn into_action(self, argument: Option<&str>) -> Result<ControlAction> {
        let action = match self {
            Self::EnableAutoScan => ControlAction::EnableAutoScan,
            Self::DisableAutoScan => ControlAction::DisableAutoScan,
            Self::ManualScan => ControlAction::manual_scan(argument)?,
            Self::Stop => ControlAction::Stop,
            Self::DeleteFolder => ControlAction::delete_folder(argument)?,
            Self::UnmountDevice => ControlAction::unmount_device(argument)?,
        };
        Ok(action)
    }
}

#[derive(Debug, Args)]
struct ControlArgs {
    verb: CliControlVerb,

    /// Device path for scans and unmounts, folder name for deletes.
    argument: Option<String>,
}

#[derive(Debug, Args)]
struct HashPasswordArgs {
    /// Username to prefix the generated credentials line with.
    #[arg(long)]
    user: Option<String>,

    password: String,
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Listen address; overrides `listen_addr` from the config.
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = MonitorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Status => print_observed(read_status(&config), cli.with_issues),
        Commands::History(args) => {
            let limit = config.history_limit_or_default(args.limit);
            print_observed(list_recent(&config, limit), cli.with_issues)
        }
        Commands::System => print_observed(collect_system_info(&config), cli.with_issues),
        Commands::Devices => print_observed(list_devices(&config), cli.with_issues),
        Commands::Log(args) => run_log_command(config, args),
        Commands::Control(args) => run_control_command(config, args),
        Commands::HashPassword(args) => run_hash_password_command(args),
        Commands::Serve(args) => run_serve_command(config, args),
    }
}

fn print_observed<T: Serialize>(observed: Observed<T>, with_issues: bool) -> Result<()> {
    let payload = if with_issues {
        serde_json::to_string_pretty(&observed)
    } else {
        serde_json::to_string_pretty(&observed.value)
    }
    .context("failed to serialize result")?;
    println!("{payload}");
    Ok(())
}

fn run_log_command(config: MonitorConfig, args: LogArgs) -> Result<()> {
    let log = read_session_log(&config, &args.session)
        .with_context(|| format!("no log for session {}", args.session))?;
    print!("{}", log.log);
    Ok(())
}

fn run_control_command(config: MonitorConfig, args: ControlArgs) -> Result<()> {
    let action = args.verb.into_action(args.argument.as_deref())?;
    let outcome = ScriptBridge::from_config(&config).execute(&action)?;

    if !outcome.message.is_empty() {
        println!("{}", outcome.message);
    }
    if let Some(enabled) = outcome.auto_scan_enabled {
        println!("Auto-scan: {}", if enabled { "enabled" } else { "disabled" });
    }
    if !outcome.success {
        bail!("control program reported failure for {:?}", args.verb);
    }
    Ok(())
}

fn run_hash_password_command(args: HashPasswordArgs) -> Result<()> {
    let hash = hash_password(&args.password)?;
    match args.user {
        Some(user) => println!("{user}:{hash}"),
        None => println!("{hash}"),
    }
    Ok(())
}

fn run_serve_command(config: MonitorConfig, args: ServeArgs) -> Result<()> {
    let addr = match args.listen {
        Some(addr) => addr,
        None => config
            .listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid listen_addr {}", config.listen_addr))?,
    };
    let dashboard = Dashboard::from_config(config)?;

    info!(
        users = dashboard.credentials().user_count(),
        auto_scan = if dashboard.config().auto_scan_enabled() {
            "enabled"
        } else {
            "disabled"
        },
        %addr,
        "ingest dashboard starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(serve(Arc::new(dashboard), addr))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
