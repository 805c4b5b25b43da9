#![forbid(unsafe_code)]

//! `agent-console`: terminal front end for the real-time interaction layer.
//!
//! Drives one controller per subcommand on a current-thread runtime, reading
//! operator input from stdin and printing updates to stdout. Logs go to
//! stderr.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_console::config::StreamTransport;
use agent_console::events::{ChannelUpdate, EventChannel, EventFilters};
use agent_console::models::approval::Decision;
use agent_console::models::event::EventType;
use agent_console::models::roundtable::Target;
use agent_console::roundtable::{Roundtable, RoundtableUpdate};
use agent_console::stream::{StreamOptions, StreamSession, StreamStatus, StreamUpdate};
use agent_console::transport::http::HttpStreamConnector;
use agent_console::transport::websocket::WebSocketConnector;
use agent_console::transport::Connector;
use agent_console::{AppError, ConsoleConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-console", about = "Operator console for AI agents", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Chat with a single agent.
    Chat {
        /// Override the configured model.
        #[arg(long)]
        model: Option<String>,
    },
    /// Join a multi-agent roundtable.
    Roundtable {
        /// Session to join.
        #[arg(long)]
        session: String,
    },
    /// Watch session telemetry events.
    Watch {
        /// Only show events for these sessions.
        #[arg(long = "session")]
        sessions: Vec<String>,
        /// Only show these event types (e.g. `tool_use`).
        #[arg(long = "event-type")]
        event_types: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = ConsoleConfig::load_from_path(&args.config)?;
    info!(base_url = %config.base_url, "configuration loaded");

    match args.command {
        Command::Chat { model } => chat(&config, model).await,
        Command::Roundtable { session } => roundtable(&config, &session).await,
        Command::Watch {
            sessions,
            event_types,
        } => watch(&config, sessions, &event_types).await,
    }
}

async fn chat(config: &ConsoleConfig, model: Option<String>) -> Result<()> {
    let connector: Arc<dyn Connector> = match config.stream.transport {
        StreamTransport::Websocket => Arc::new(WebSocketConnector::new(&config.base_url)),
        StreamTransport::Http => Arc::new(HttpStreamConnector::new(&config.base_url)),
    };
    let mut options = StreamOptions::from_config(config);
    if let Some(model) = model {
        options.model = model;
    }
    let mut session = StreamSession::new(connector, options);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("commands: /cancel /approve /deny /always /never /approve-all /deny-all /clear /quit");
    loop {
        let waiting = session.is_connected() || session.approvals().armed_for().is_some();
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !chat_input(&mut session, line.trim()).await {
                    break;
                }
            }
            Some(update) = session.next_update(), if waiting => {
                print_stream_update(&session, &update);
            }
            () = shutdown_signal() => break,
        }
    }

    session.close().await;
    info!("chat closed");
    Ok(())
}

/// Apply one line of operator input. Returns `false` to quit.
async fn chat_input(session: &mut StreamSession, line: &str) -> bool {
    let active = session
        .approvals()
        .active()
        .map(|p| p.request.id.clone());

    let outcome = match line {
        "" => Ok(()),
        "/quit" => return false,
        "/cancel" => session.cancel_stream().await,
        "/clear" => {
            session.clear_error();
            Ok(())
        }
        command if command.starts_with('/') => match (approval_command(command), active) {
            (Some((decision, remember)), Some(request_id)) => session
                .resolve_approval(&request_id, decision, remember)
                .await
                .map(|_| ()),
            (Some(_), None) => Err(AppError::NotFound("no pending approval".into())),
            (None, _) => Err(AppError::InvalidState(format!("unknown command: {command}"))),
        },
        content => session.send_message(content).await.map(|_| ()),
    };

    if let Err(err) = outcome {
        warn!(%err, "command rejected");
        eprintln!("{err}");
    }
    true
}

fn approval_command(command: &str) -> Option<(Decision, bool)> {
    match command {
        "/approve" => Some((Decision::Approve, false)),
        "/deny" => Some((Decision::Deny, false)),
        "/always" => Some((Decision::Approve, true)),
        "/never" => Some((Decision::Deny, true)),
        "/approve-all" => Some((Decision::ApproveAll, false)),
        "/deny-all" => Some((Decision::DenyAll, false)),
        _ => None,
    }
}

fn print_stream_update(session: &StreamSession, update: &StreamUpdate) {
    match update {
        StreamUpdate::Content { delta, .. } => print_delta(delta),
        StreamUpdate::ToolStarted { tool_id, .. } => println!("\n[tool {tool_id} running]"),
        StreamUpdate::ToolFinished {
            tool_id, status, ..
        } => println!("[tool {tool_id} {status:?}]"),
        StreamUpdate::Completed { cancelled, .. } => {
            println!("{}", if *cancelled { "\n[cancelled]" } else { "" });
        }
        StreamUpdate::Failed { message } => println!("\n[error] {message}"),
        StreamUpdate::Closed { reason } if session.status() == StreamStatus::Error => {
            println!("\n[closed] {reason}");
        }
        StreamUpdate::ApprovalRequested { .. } => {
            if let Some(active) = session.approvals().active() {
                println!(
                    "\n[approval] {} {} (risk {:?}, {}s) /approve /deny /always /never",
                    active.request.tool_call.tool_name,
                    active.request.tool_call.parameters,
                    active.request.tool_call.risk_level,
                    active.remaining_seconds,
                );
            }
        }
        StreamUpdate::ApprovalResolved(resolutions) => {
            for resolution in resolutions {
                println!(
                    "[approval] {} -> {}",
                    resolution.tool_name,
                    resolution.decision.as_str()
                );
            }
        }
        _ => {}
    }
}

fn print_delta(delta: &str) {
    let mut stdout = std::io::stdout().lock();
    if let Err(err) = write!(stdout, "{delta}").and_then(|()| stdout.flush()) {
        warn!(%err, "stdout write failed");
    }
}

async fn roundtable(config: &ConsoleConfig, session_id: &str) -> Result<()> {
    let connector: Arc<dyn Connector> = Arc::new(WebSocketConnector::new(&config.base_url));
    let mut table = Roundtable::from_config(connector, config);
    table.connect(session_id).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("commands: @agent message, /continue /approve /deny /quit; plain text goes to all");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !roundtable_input(&mut table, line.trim()).await {
                    break;
                }
            }
            update = table.next_update() => match update {
                Some(update) => print_roundtable_update(&update),
                None => break,
            },
            () = shutdown_signal() => break,
        }
    }

    table.disconnect().await;
    Ok(())
}

async fn roundtable_input(table: &mut Roundtable, line: &str) -> bool {
    let outcome = match line {
        "" => Ok(()),
        "/quit" => return false,
        "/continue" => table.continue_discussion().await,
        "/approve" | "/deny" => match table.approvals().active().map(|p| p.request.id.clone()) {
            Some(request_id) => {
                let decision = if line == "/approve" {
                    Decision::Approve
                } else {
                    Decision::Deny
                };
                table
                    .resolve_approval(&request_id, decision, false)
                    .await
                    .map(|_| ())
            }
            None => Err(AppError::NotFound("no pending approval".into())),
        },
        content => match content.strip_prefix('@') {
            Some(addressed) => {
                let (name, content) = addressed.split_once(' ').unwrap_or((addressed, ""));
                table
                    .send_message(content.trim(), Target::from_wire(name))
                    .await
            }
            None => table.send_message(content, Target::All).await,
        },
    };

    if let Err(err) = outcome {
        warn!(%err, "command rejected");
        eprintln!("{err}");
    }
    true
}

fn print_roundtable_update(update: &RoundtableUpdate) {
    match update {
        RoundtableUpdate::TurnStarted { agent, .. } => println!("\n[{agent}]"),
        RoundtableUpdate::Chunk { delta, .. } => print_delta(delta),
        RoundtableUpdate::MessageComplete { agent, .. } => println!("\n[{agent} done]"),
        RoundtableUpdate::VolleyComplete { speaker_order } => {
            println!("\n[volley complete: {}] /continue", speaker_order.join(" → "));
        }
        RoundtableUpdate::Failed { message } => println!("\n[error] {message}"),
        RoundtableUpdate::Closed { reason } => println!("\n[closed] {reason}"),
        RoundtableUpdate::ApprovalRequested { request_id } => {
            println!("\n[approval {request_id}] /approve /deny");
        }
        _ => {}
    }
}

async fn watch(
    config: &ConsoleConfig,
    sessions: Vec<String>,
    event_types: &[String],
) -> Result<()> {
    let mut types = Vec::with_capacity(event_types.len());
    for raw in event_types {
        let event_type = EventType::parse(raw)
            .ok_or_else(|| AppError::Config(format!("unknown event type: {raw}")))?;
        types.push(event_type);
    }
    let mut filters = EventFilters::all();
    if !sessions.is_empty() {
        filters = filters.with_sessions(sessions);
    }
    if !types.is_empty() {
        filters = filters.with_types(types);
    }

    let connector: Arc<dyn Connector> = Arc::new(WebSocketConnector::new(&config.base_url));
    let mut channel = EventChannel::from_config(connector, config).with_filters(filters);
    channel.set_observer(|event| {
        println!(
            "{} {} {}",
            event.timestamp,
            event.session_id,
            event.event_type().as_str()
        );
    });
    // With auto-reconnect on, a failed first attempt is retried by the update loop.
    if let Err(err) = channel.connect().await {
        if channel.reconnect_at().is_none() {
            return Err(err);
        }
    }

    loop {
        tokio::select! {
            update = channel.next_update() => match update {
                Some(ChannelUpdate::ReconnectFailed { error, retry_in }) => {
                    error!(%error, ?retry_in, "events reconnect failed");
                }
                Some(_) => {}
                None => break,
            },
            () = shutdown_signal() => break,
        }
    }

    channel.disconnect().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "ctrl-c signal handler failed");
        std::future::pending::<()>().await;
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
