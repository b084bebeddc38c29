//! ocpp-churn CLI: connection-churn load generator for OCPP central systems.
//!
//! Command-line interface for running churn load tests and for exercising the
//! device-side responder offline.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use miette::{IntoDiagnostic, Result};
use ocpp_churn::config::{apply_env_overrides, load_config_file};
use ocpp_churn::driver::run_responder;
use ocpp_churn::model::{ProtocolSubtype, RunConfig, RunReport, RunStatus};
use ocpp_churn::run::run_websocket_with_options;
use ocpp_churn::runner::progress::ProgressCallback;
use ocpp_churn::runner::{ErrorCode, RunnerError, RunnerOptions, RunnerResult};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Exit code of a run stopped by Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(
    name = "ocpp-churn",
    version,
    about = "Rapid connect/disconnect load generator for OCPP central systems"
)]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    /// Log filter for diagnostics on stderr (`RUST_LOG` takes precedence)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Churn simulated devices against a central system
    Run(RunArgs),
    /// Answer wire frames from stdin the way a simulated device would
    Respond {
        #[arg(long, default_value = "ocpp1.6", help = "Protocol subtype whose action table answers")]
        subtype: ProtocolSubtype,
    },
    /// Output protocol documentation
    ProtocolHelp {
        #[arg(long, help = "Output as JSON (default: human-readable)")]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, help = "Print the run report as JSON on stdout")]
    json: bool,
    #[arg(long, short = 'v', help = "Show per-session progress on stderr")]
    verbose: bool,
    #[arg(long, help = "Config file (.json, .yaml or .yml)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Number of concurrent simulated devices")]
    sessions: Option<u32>,
    #[arg(long, help = "Central system host")]
    host: Option<String>,
    #[arg(long, help = "Central system port")]
    port: Option<u16>,
    #[arg(long, help = "URL scheme: ws or wss")]
    scheme: Option<String>,
    #[arg(long, help = "Path between the authority and the device id, e.g. /ocpp")]
    path_prefix: Option<String>,
    #[arg(long, help = "Protocol subtype: ocpp1.6, ocpp2.0.1 or ocpp2.1")]
    subtype: Option<ProtocolSubtype>,
    #[arg(
        long,
        conflicts_with_all = ["reconnects_min", "reconnects_max"],
        help = "Fixed connect/disconnect cycles per session"
    )]
    reconnects: Option<u32>,
    #[arg(long)]
    reconnects_min: Option<u32>,
    #[arg(long)]
    reconnects_max: Option<u32>,
    #[arg(long)]
    disconnect_delay_min_ms: Option<u64>,
    #[arg(long)]
    disconnect_delay_max_ms: Option<u64>,
    #[arg(long)]
    sleep_min_ms: Option<u64>,
    #[arg(long)]
    sleep_max_ms: Option<u64>,
    #[arg(long, help = "Heartbeat period while connected")]
    keepalive_ms: Option<u64>,
    #[arg(long, help = "Send a StatusNotification after each BootNotification")]
    status_notification: bool,
    #[arg(long)]
    open_timeout_ms: Option<u64>,
    #[arg(long)]
    close_timeout_ms: Option<u64>,
    #[arg(long, help = "Seed for reproducible device ids and jitter")]
    seed: Option<u64>,
}

impl RunArgs {
    /// Apply flags over a config that already carries file and env values.
    fn apply(&self, config: &mut RunConfig) {
        fn set<T: Clone>(slot: &mut T, value: Option<&T>) {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
        set(&mut config.sessions, self.sessions.as_ref());
        set(&mut config.transport_host, self.host.as_ref());
        set(&mut config.transport_port, self.port.as_ref());
        set(&mut config.url_scheme, self.scheme.as_ref());
        set(&mut config.url_path_prefix, self.path_prefix.as_ref());
        set(&mut config.protocol_subtype, self.subtype.as_ref());
        set(&mut config.reconnect_count_min, self.reconnects.as_ref());
        set(&mut config.reconnect_count_max, self.reconnects.as_ref());
        set(&mut config.reconnect_count_min, self.reconnects_min.as_ref());
        set(&mut config.reconnect_count_max, self.reconnects_max.as_ref());
        set(&mut config.disconnect_delay_min_ms, self.disconnect_delay_min_ms.as_ref());
        set(&mut config.disconnect_delay_max_ms, self.disconnect_delay_max_ms.as_ref());
        set(&mut config.inter_cycle_sleep_min_ms, self.sleep_min_ms.as_ref());
        set(&mut config.inter_cycle_sleep_max_ms, self.sleep_max_ms.as_ref());
        set(&mut config.open_timeout_ms, self.open_timeout_ms.as_ref());
        set(&mut config.close_timeout_ms, self.close_timeout_ms.as_ref());
        if self.keepalive_ms.is_some() {
            config.keepalive_interval_ms = self.keepalive_ms;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.status_notification {
            config.status_notification_on_boot = true;
        }
    }
}

mod progress;
mod protocol_help;

/// Configure color output based on CLI flag and environment
fn configure_colors(mode: ColorMode) -> bool {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            // Respect NO_COLOR environment variable
            if std::env::var("NO_COLOR").is_ok() {
                false
            } else {
                // Check if stderr supports color (where we output diagnostics)
                supports_color::on(supports_color::Stream::Stderr).is_some()
            }
        }
    };

    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
    use_color
}

fn init_tracing(level: &str, use_color: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(use_color)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let use_color = configure_colors(cli.color);
    init_tracing(&cli.log_level, use_color);
    match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Respond { subtype } => cmd_respond(subtype),
        Commands::ProtocolHelp { json } => cmd_protocol_help(json),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

/// Handle the run command.
fn cmd_run(args: RunArgs) -> Result<()> {
    let json = args.json;
    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(err) => return emit_result(json, Err(err)),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    install_interrupt_handler(shutdown_tx);

    let progress_callback = if args.verbose {
        Some(Arc::new(progress::VerboseProgress::new()) as Arc<dyn ProgressCallback>)
    } else {
        None
    };
    let options = RunnerOptions {
        progress: progress_callback,
        shutdown: Some(shutdown_rx),
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    let result = runtime.block_on(run_websocket_with_options(config, options));
    emit_result(json, result)
}

/// Defaults, then the config file, then `WS_*` variables, then flags.
fn resolve_config(args: &RunArgs) -> RunnerResult<RunConfig> {
    let mut config = match &args.config {
        Some(path) => load_config_file(path)?,
        None => RunConfig::default(),
    };
    apply_env_overrides(&mut config)?;
    args.apply(&mut config);
    Ok(config)
}

/// First Ctrl-C asks sessions to wind down; a second one exits at once.
fn install_interrupt_handler(shutdown: watch::Sender<bool>) {
    let installed = ctrlc::set_handler(move || {
        if shutdown.send_replace(true) {
            std::process::exit(EXIT_INTERRUPTED);
        }
        eprintln!("interrupt received: closing sessions after their current cycle (Ctrl-C again to abort)");
    });
    if let Err(err) = installed {
        tracing::warn!(%err, "could not install Ctrl-C handler");
    }
}

/// Handle the respond command.
fn cmd_respond(subtype: ProtocolSubtype) -> Result<()> {
    match run_responder(subtype) {
        Ok(summary) => {
            eprintln!(
                "responder finished: {} frames, {} replies ({} not implemented, {} faults), {} undecodable",
                summary.lines,
                summary.replies,
                summary.unimplemented,
                summary.handler_faults,
                summary.decode_failures
            );
            Ok(())
        }
        Err(err) => emit_result(false, Err(err)),
    }
}

/// Handle the protocol-help command.
fn cmd_protocol_help(json: bool) -> Result<()> {
    let help = protocol_help::generate_protocol_help();
    if json {
        let output = serde_json::to_string_pretty(&help).into_diagnostic()?;
        println!("{output}");
    } else {
        print_protocol_help_text(&help);
    }
    Ok(())
}

/// Handle the completions command.
#[allow(clippy::unnecessary_wraps)] // Consistent with other command handlers
fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

fn emit_result(json: bool, result: RunnerResult<RunReport>) -> Result<()> {
    match result {
        Ok(report) => {
            if json {
                let payload = serde_json::to_string(&report).into_diagnostic()?;
                println!("{payload}");
            } else {
                print_summary(&report);
            }
            match exit_code_for_report(&report) {
                Some(code) => std::process::exit(code),
                None => Ok(()),
            }
        }
        Err(err) => {
            if json {
                let payload = serde_json::to_string(&err.to_error_info()).into_diagnostic()?;
                println!("{payload}");
            } else {
                eprintln!("error: {err}");
            }
            std::process::exit(exit_code_for_error(&err));
        }
    }
}

fn print_summary(report: &RunReport) {
    let m = &report.metrics;
    eprintln!(
        "run {:?}: {} sessions, {} connects ({} failed), {} reconnects, {} messages sent in {}ms",
        report.status,
        m.sessions,
        m.connect_count,
        m.failed_connect_count,
        m.reconnect_count,
        m.message_count,
        m.elapsed_time_ms
    );
    if m.connect_count == 0 {
        eprintln!(
            "warning: no session reached {}; is the central system running?",
            report.config.base_url()
        );
    }
    for session in report.failed_sessions() {
        if let Some(err) = &session.error {
            eprintln!(" - {}: {}: {}", session.device_id, err.code, err.message);
        }
    }
}

/// Exit code for a run that produced a report, `None` for success.
fn exit_code_for_report(report: &RunReport) -> Option<i32> {
    if report.status == RunStatus::Canceled {
        Some(EXIT_INTERRUPTED)
    } else if report.metrics.connect_count == 0 {
        Some(ErrorCode::Transport.exit_code())
    } else if report.metrics.failed_sessions > 0 {
        Some(ErrorCode::Internal.exit_code())
    } else {
        None
    }
}

fn exit_code_for_error(err: &RunnerError) -> i32 {
    err.exit_code()
}

fn print_protocol_help_text(help: &protocol_help::ProtocolHelp) {
    println!("ocpp-churn Protocol Help");
    println!("========================");
    println!();
    println!(
        "Config version: {}  Run report version: {}",
        help.versions.config, help.versions.run_report
    );
    println!();
    println!("COMMANDS");
    println!("--------");
    for (name, cmd) in &help.commands {
        println!("  {name}");
        println!("    {}", cmd.description);
        println!("    Usage: {}", cmd.usage);
        println!();
    }
    println!("ENVELOPES");
    println!("---------");
    for (name, envelope) in &help.envelopes {
        println!("  {name} ({}): {}", envelope.message_type_id, envelope.layout);
        println!("    e.g. {}", envelope.example);
    }
    println!();
    println!("SUBTYPES");
    println!("--------");
    for (name, subtype) in &help.subtypes {
        println!("  {name} (device ids {})", subtype.device_id_prefix);
        println!("    sends:   {}", subtype.outbound_actions.join(", "));
        println!("    answers: {}", subtype.inbound_actions.join(", "));
    }
    println!();
    println!("CONFIG KEYS");
    println!("-----------");
    for (key, entry) in &help.config {
        match &entry.env {
            Some(env) => println!("  {key} = {} (env {env})", entry.default),
            None => println!("  {key} = {}", entry.default),
        }
    }
    println!();
    println!("ERROR CODES");
    println!("-----------");
    for (code, info) in &help.error_codes {
        println!("  {code} (exit {}): {}", info.exit_code, info.description);
    }
    println!();
    println!("For full JSON documentation: ocpp-churn protocol-help --json");
}
