mod host;
mod serve;

use anyhow::{Context, Result, bail};
use bridge_core::{TunnelBridge, TunnelStatus};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use shared_utils::Config;
use shared_utils::logging::{LogOptions, init_logging};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::host::{EventLines, build_bridge};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevelArg> for tracing::Level {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Trace => tracing::Level::TRACE,
            LogLevelArg::Debug => tracing::Level::DEBUG,
            LogLevelArg::Info => tracing::Level::INFO,
            LogLevelArg::Warn => tracing::Level::WARN,
            LogLevelArg::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, after_help = "Examples:\n  bridgectl status --output json\n  bridgectl run --tunnel-config wg0.conf --hold-ms 500\n  echo '{\"method\":\"getStatus\"}' | bridgectl serve")]
struct Args {
    /// Configuration file (defaults to the per-user config path when present)
    #[arg(short, long, env = "VPNBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (overrides the configured level)
    #[arg(short, long, value_enum, ignore_case = true, env = "VPNBRIDGE_LOG_LEVEL")]
    log_level: Option<LogLevelArg>,

    /// Emit JSON logs
    #[arg(long, env = "VPNBRIDGE_JSON_LOGS")]
    json_logs: bool,

    /// Output format for command results (table|json)
    #[arg(long, value_enum, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the status of a fresh bridge and the effective configuration
    Status,
    /// Serve JSON method calls on stdin, responses and events on stdout
    Serve,
    /// Bring a tunnel up, hold it, then take it down
    Run {
        /// Tunnel configuration file handed to the engine
        #[arg(long)]
        tunnel_config: PathBuf,

        /// How long to keep the tunnel up once connected
        #[arg(long, default_value_t = 1000)]
        hold_ms: u64,

        /// Upper bound on each wait for the engine
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
}

#[derive(Serialize)]
struct StatusReport<'a> {
    session: &'a str,
    status: TunnelStatus,
    config: &'a Config,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            let default = Config::default_path();
            if default.exists() {
                Config::load(&default)
                    .with_context(|| format!("failed to load config from {}", default.display()))
            } else {
                Config::from_env().context("invalid configuration from environment")
            }
        }
    }
}

fn print_status(fmt: OutputFormat, report: &StatusReport<'_>) -> Result<()> {
    match fmt {
        OutputFormat::Table => {
            println!("session: {}", report.session);
            println!("status: {}", report.status);
            println!(
                "backend: connect {}ms, disconnect {}ms{}",
                report.config.backend.connect_delay_ms,
                report.config.backend.disconnect_delay_ms,
                report
                    .config
                    .backend
                    .fail_with
                    .as_deref()
                    .map(|detail| format!(", failing with '{detail}'"))
                    .unwrap_or_default()
            );
            println!(
                "permission: pre-granted {}, grant {}",
                report.config.permission.pre_granted, report.config.permission.grant
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
    }
    Ok(())
}

/// Wait until the start settles; a drop back to `Disconnected` is a failure.
async fn await_connected(bridge: &TunnelBridge, limit: Duration) -> Result<()> {
    match timeout(limit, bridge.wait_for_terminal()).await {
        Ok(TunnelStatus::Connected) => Ok(()),
        Ok(status) => bail!("tunnel dropped to {status} before connecting"),
        Err(_) => bail!("tunnel did not connect within {}ms", limit.as_millis()),
    }
}

async fn run_tunnel(
    config: &Config,
    tunnel_config: &Path,
    hold: Duration,
    limit: Duration,
) -> Result<()> {
    let blob = tokio::fs::read_to_string(tunnel_config)
        .await
        .with_context(|| format!("failed to read {}", tunnel_config.display()))?;

    let bridge = build_bridge(config);
    let (events, rx) = EventLines::new();
    let printer = tokio::spawn(serve::print_events(rx, tokio::io::stdout()));
    bridge.attach(EventLines::downgrade(&events));

    bridge
        .request_permission()
        .await
        .context("tunnel permission")?;
    bridge.start(&blob).await.context("tunnel start")?;

    await_connected(&bridge, limit).await?;
    info!(hold_ms = hold.as_millis() as u64, "tunnel connected, holding");
    sleep(hold).await;

    bridge.stop().await.context("tunnel stop")?;
    if timeout(limit, bridge.wait_for_stopped()).await.is_err() {
        bail!("tunnel did not stop within {}ms", limit.as_millis());
    }

    bridge.detach();
    drop(events);
    printer.await??;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let level: tracing::Level = match args.log_level {
        Some(level) => level.into(),
        None => shared_utils::logging::parse_level(&config.log_level),
    };
    // stdout carries command output, so logs go to stderr
    let _guard = init_logging(LogOptions {
        level,
        json_format: args.json_logs,
        use_stderr: true,
        ..Default::default()
    });
    debug!(session = %config.session.name, "configuration loaded");

    match args.command {
        Command::Status => {
            let bridge = build_bridge(&config);
            let report = StatusReport {
                session: bridge.session_name(),
                status: bridge.get_status(),
                config: &config,
            };
            print_status(args.output, &report)?;
        }
        Command::Serve => {
            let bridge = build_bridge(&config);
            let input = BufReader::new(tokio::io::stdin());
            let mut output = tokio::io::stdout();
            serve::serve(&bridge, input, &mut output).await?;
        }
        Command::Run {
            tunnel_config,
            hold_ms,
            timeout_ms,
        } => {
            run_tunnel(
                &config,
                &tunnel_config,
                Duration::from_millis(hold_ms),
                Duration::from_millis(timeout_ms),
            )
            .await?;
        }
    }

    info!("bridgectl command completed");
    Ok(())
}
