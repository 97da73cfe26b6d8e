// netpolicy-cli/src/main.rs
// ============================================================================
// Module: Netpolicy CLI Entry Point
// Description: Command dispatcher for the policy server processes.
// Purpose: Start the API server or ASG syncer, validate config, and dry-run render.
// Dependencies: clap, netpolicy-config, netpolicy-rules, netpolicy-server, tokio
// ============================================================================

//! ## Overview
//! `serve` runs both listeners and the cleanup loop; `asg-syncer` runs the
//! leader-elected syncer. Both stop on Ctrl-C. `config validate` and `render`
//! never touch the network.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use netpolicy_cli::logging;
use netpolicy_cli::render::render_plan;
use netpolicy_config::NetPolicyConfig;
use netpolicy_rules::RenderOptions;
use netpolicy_rules::naming::DEFAULT_MAX_NAME_LENGTH;
use netpolicy_server::PolicyServer;
use netpolicy_server::run_asg_syncer;
use netpolicy_server::shutdown_channel;
use thiserror::Error;
use tokio::sync::watch;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "netpolicy", version, disable_help_subcommand = true)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the external and internal APIs plus the cleanup loop.
    Serve(ConfigArgs),
    /// Run the leader-elected ASG syncer.
    AsgSyncer(ConfigArgs),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Render a container context as an `iptables-restore` plan.
    Render(RenderCommand),
}

/// Shared config path argument.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// Config file; defaults to `NETPOLICY_CONFIG` then `netpolicy.toml`.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate the config file.
    Validate(ConfigArgs),
}

/// Arguments for `render`.
#[derive(Args, Debug)]
struct RenderCommand {
    /// Container context JSON file.
    #[arg(long, value_name = "PATH")]
    context: PathBuf,
    /// Maximum chain name length.
    #[arg(long, value_name = "LEN", default_value_t = DEFAULT_MAX_NAME_LENGTH)]
    max_name_length: usize,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying the message shown to the operator.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => command_serve(&args).await,
        Commands::AsgSyncer(args) => command_asg_syncer(&args).await,
        Commands::Config {
            command,
        } => match command {
            ConfigCommand::Validate(args) => command_config_validate(&args),
        },
        Commands::Render(command) => command_render(&command),
    }
}

// ============================================================================
// SECTION: Process Commands
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(args: &ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(args)?;
    init_logging(&config)?;
    tracing::info!(uuid = %config.uuid, "starting policy server");
    let server = PolicyServer::from_config(config)
        .await
        .map_err(|err| CliError::new(format!("policy server init failed: {err}")))?;
    let shutdown = shutdown_on_ctrl_c();
    server
        .serve(shutdown)
        .await
        .map_err(|err| CliError::new(format!("policy server failed: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `asg-syncer` command.
async fn command_asg_syncer(args: &ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(args)?;
    init_logging(&config)?;
    tracing::info!(uuid = %config.uuid, "starting asg syncer");
    let shutdown = shutdown_on_ctrl_c();
    run_asg_syncer(config, shutdown)
        .await
        .map_err(|err| CliError::new(format!("asg syncer failed: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Returns a shutdown receiver flipped by the first Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (sender, receiver) = shutdown_channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received, shutting down"),
            Err(err) => tracing::error!(error = %err, "failed to listen for interrupt"),
        }
        let _ = sender.send(true);
    });
    receiver
}

// ============================================================================
// SECTION: Offline Commands
// ============================================================================

/// Executes `config validate`.
fn command_config_validate(args: &ConfigArgs) -> CliResult<ExitCode> {
    let _config = load_config(args)?;
    write_stdout("config ok\n")?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `render`.
fn command_render(command: &RenderCommand) -> CliResult<ExitCode> {
    let options = RenderOptions {
        max_name_length: command.max_name_length,
    };
    let plan = render_plan(&command.context, &options)
        .map_err(|err| CliError::new(format!("render failed: {err}")))?;
    write_stdout(&plan)?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads and validates the config file.
fn load_config(args: &ConfigArgs) -> CliResult<NetPolicyConfig> {
    NetPolicyConfig::load(args.config.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))
}

/// Installs the log subscriber from `log_level`.
fn init_logging(config: &NetPolicyConfig) -> CliResult<()> {
    logging::init(&config.log_level).map_err(|err| CliError::new(err.to_string()))
}

/// Writes text to stdout without adding a newline.
fn write_stdout(text: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    stdout
        .write_all(text.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
