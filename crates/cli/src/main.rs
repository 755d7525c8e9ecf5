use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use beacon_host::{DownOutcome, Supervisor, UpOptions, probe_remote, read_log_tail};
use beacon_mcp::config::{default_config_path, effective_fields, load_config_from_path, set_config_value};
use beacon_mcp::{
    BeaconConfig, CallContext, JsonMap, McpClient, McpError, TransportKind, build_capability_manifest,
    canonical_code_from_text, hint_for_error, render_manifest_human, render_manifest_json,
};
use beacon_util::sanitize_target;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Drive a JSON-RPC capability backend from the terminal.
#[derive(Parser, Debug)]
#[command(name = "beacon", version, about)]
struct Cli {
    /// Log protocol traffic and raise the default log level to debug
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Configuration file (defaults to BEACON_CONFIG_PATH or the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the managed backend
    Up {
        /// Directory for the backend to serve
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        listen: Option<String>,
        /// Listen on 127.0.0.1:<port> when --listen is not given
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        mcp_path: Option<String>,
        /// Ask the backend for JSON output
        #[arg(long)]
        json: bool,
        /// Return once the backend is started, logging to a file
        #[arg(long)]
        detach: bool,
    },
    /// Stop the managed backend
    Down,
    /// Report health of the managed backend, or of a remote endpoint
    Status {
        #[arg(long, value_name = "URL")]
        remote: Option<String>,
    },
    /// Show the detached backend's log
    Logs {
        /// Number of trailing lines; 0 shows everything
        #[arg(long, default_value_t = 200)]
        lines: usize,
    },
    /// List the tools the backend offers
    Tools {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        json: bool,
    },
    /// Call a tool
    Call {
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
        #[command(flatten)]
        target: Target,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Overrides for the configured endpoint.
#[derive(clap::Args, Debug, Default)]
struct Target {
    /// Endpoint URL, or a backend command line with --transport stdio
    #[arg(long)]
    url: Option<String>,
    /// streamable-http or stdio
    #[arg(long)]
    transport: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Effective values and where each came from
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Persist a single key
    Set { key: String, value: String },
    /// Print the configuration file location
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_config_from_path(&config_path);
    let verbose = cli.verbose || config.as_ref().is_ok_and(|config| config.verbose);
    init_tracing(verbose);

    let result = match config {
        Ok(mut config) => {
            config.verbose = verbose;
            run(cli.command, config, config_path).await
        }
        Err(err) => Err(anyhow::Error::new(err).context("failed to load configuration")),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(hint) = hint_for(&err) {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(command: Commands, config: BeaconConfig, config_path: PathBuf) -> Result<()> {
    match command {
        Commands::Up {
            dir,
            listen,
            port,
            mcp_path,
            json,
            detach,
        } => {
            let options = UpOptions {
                dir,
                listen: listen.or_else(|| port.is_none().then(|| config.host.listen.clone())),
                port,
                mcp_path: mcp_path.or_else(|| Some(config.host.mcp_path.clone())),
                json,
            };
            run_up(&options, detach).await
        }
        Commands::Down => run_down().await,
        Commands::Status { remote } => run_status(remote).await,
        Commands::Logs { lines } => {
            let supervisor = Supervisor::default();
            let tail = read_log_tail(supervisor.log_path(), lines)?;
            if tail.is_empty() {
                println!("no backend logs at {}", supervisor.log_path().display());
            } else {
                println!("{tail}");
            }
            Ok(())
        }
        Commands::Tools { target, json } => run_tools(&config, &target, json).await,
        Commands::Call {
            tool,
            args,
            target,
            json,
        } => run_call(&config, &target, &tool, &args, json).await,
        Commands::Config { action } => run_config(action, &config_path),
    }
}

async fn run_up(options: &UpOptions, detach: bool) -> Result<()> {
    let supervisor = Supervisor::default();
    if !detach {
        return Ok(supervisor.up(options, CancellationToken::new()).await?);
    }

    let detached = supervisor.up_detached(options).await?;
    println!("mcp server: started pid={}", detached.pid);
    println!("mcp server: log={}", detached.log_path.display());
    match (detached.mcp_url, detached.capture) {
        (Some(url), _) => println!("mcp server: endpoint={}", beacon_util::sanitize_endpoint(&url)),
        (None, Some(capture)) => {
            println!("mcp server: waiting for the backend to publish its endpoint");
            match capture.await {
                Ok(beacon_host::CaptureOutcome::Captured(url)) => {
                    println!("mcp server: endpoint={}", beacon_util::sanitize_endpoint(&url))
                }
                Ok(outcome) => println!("mcp server: endpoint unknown ({outcome:?})"),
                Err(err) => warn!(error = %err, "endpoint capture task failed"),
            }
        }
        (None, None) => println!("mcp server: endpoint unknown"),
    }
    Ok(())
}

async fn run_down() -> Result<()> {
    match Supervisor::default().down().await? {
        DownOutcome::NothingManaged => println!("mcp server: nothing to stop"),
        DownOutcome::AlreadyStopped { .. } => println!("mcp server: process already stopped"),
        DownOutcome::Stopped { pid } => println!("mcp server: stopped pid={pid}"),
    }
    Ok(())
}

async fn run_status(remote: Option<String>) -> Result<()> {
    if let Some(endpoint) = remote {
        let status = probe_remote(&endpoint).await?;
        for line in status.summary_lines() {
            println!("mcp server(remote): {line}");
        }
        return Ok(status.ensure_ready()?);
    }

    let health = Supervisor::default().check_health().await;
    for line in health.summary_lines() {
        println!("mcp server: {line}");
    }
    Ok(health.ensure_ready()?)
}

async fn run_tools(config: &BeaconConfig, target: &Target, json: bool) -> Result<()> {
    let client = connect(config, target)?;
    let ctx = interruptible_context();
    let manifest = async {
        client.initialize(&ctx).await?;
        build_capability_manifest(&ctx, &client).await
    }
    .await;
    close_client(&client).await;

    let manifest = manifest?;
    if json {
        println!("{}", render_manifest_json(&manifest)?);
    } else {
        println!("{}", render_manifest_human(&manifest));
    }
    Ok(())
}

async fn run_call(config: &BeaconConfig, target: &Target, tool: &str, raw_args: &str, json: bool) -> Result<()> {
    let arguments = parse_arguments(raw_args)?;
    let client = connect(config, target)?;
    let ctx = interruptible_context();
    let result = async {
        client.initialize(&ctx).await?;
        client.call_tool(&ctx, tool, arguments).await
    }
    .await;
    close_client(&client).await;

    let result = result?;
    debug!(tool, elapsed_ms = result.elapsed.as_millis() as u64, status = result.http_status, "tool call finished");
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.text());
    }
    if result.is_error {
        bail!("tool {tool} reported an error: {}", result.text());
    }
    Ok(())
}

fn run_config(action: ConfigAction, path: &std::path::Path) -> Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let fields = effective_fields(path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&fields)?);
            } else {
                println!("config: {}", path.display());
                for field in fields {
                    println!("{} = {} ({})", field.key, field.value, field.source.as_str());
                }
            }
        }
        ConfigAction::Set { key, value } => {
            set_config_value(path, &key, &value).with_context(|| format!("failed to set {key}"))?;
            println!("updated {key} in {}", path.display());
        }
        ConfigAction::Path => println!("{}", path.display()),
    }
    Ok(())
}

fn connect(config: &BeaconConfig, target: &Target) -> Result<McpClient> {
    let endpoint = target.url.as_deref().unwrap_or(&config.mcp.url);
    let transport = target.transport.as_deref().unwrap_or(&config.mcp.transport);
    let kind = TransportKind::from_str(transport)?;
    debug!(endpoint = %sanitize_target(endpoint), transport = %kind, "connecting");
    Ok(McpClient::new(endpoint, kind, config.verbose)?)
}

async fn close_client(client: &McpClient) {
    if let Err(err) = client.close().await {
        warn!(error = %err, "failed to close client");
    }
}

/// Context cancelled by Ctrl-C.
fn interruptible_context() -> CallContext {
    let token = CancellationToken::new();
    let ctx = CallContext::with_token(token.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    ctx
}

fn parse_arguments(raw: &str) -> Result<JsonMap> {
    let value: serde_json::Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("--args must be a JSON object"),
    }
}

/// Operator guidance for a failure, if its text maps to a known condition.
fn hint_for(err: &anyhow::Error) -> Option<String> {
    let hint = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<McpError>().map(hint_for_error))
        .unwrap_or_else(|| {
            canonical_code_from_text(&format!("{err:#}"))
                .map(|code| code.remediation().to_string())
                .unwrap_or_default()
        });
    Some(hint).filter(|hint| !hint.is_empty())
}
