use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use storyboard_stream::stream::{ChannelKind, SessionStatus, SessionUpdate, StreamSession, Transport};
use storyboard_stream::StreamConfig;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub fn tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let filter = ["tungstenite=warn", "tokio_tungstenite=warn", "hyper=warn", "reqwest=warn"]
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(filter, |filter, directive| filter.add_directive(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ChannelArg {
    Websocket,
    EventStream,
}

impl From<ChannelArg> for ChannelKind {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Websocket => ChannelKind::WebSocket,
            ChannelArg::EventStream => ChannelKind::EventStream,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Follow a generation run and print its events
    Watch {
        /// Backend session id
        session_id: String,
        /// Transport to use (defaults to the configured channel)
        #[arg(long, value_enum)]
        channel: Option<ChannelArg>,
        /// Ask the backend to start the run once connected
        #[arg(long)]
        start: bool,
        /// Print the final view as JSON instead of a text summary
        #[arg(long)]
        json: bool,
    },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Parser, Debug)]
#[command(name = "storyboard-stream")]
#[command(about = "Live client for storyboard generation runs", long_about = None)]
struct Cli {
    /// Configuration file path (overrides the default location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing(cli.verbose);

    let config_path = cli.config.unwrap_or_else(StreamConfig::config_file_path);

    match cli.command {
        Command::InitConfig { force } => init_config(&config_path, force),
        Command::Watch {
            session_id,
            channel,
            start,
            json,
        } => watch(&config_path, &session_id, channel.map(ChannelKind::from), start, json).await,
    }
}

fn init_config(path: &std::path::Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    StreamConfig::default()
        .save_to(path)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn watch(
    config_path: &std::path::Path,
    session_id: &str,
    channel: Option<ChannelKind>,
    start: bool,
    json: bool,
) -> anyhow::Result<()> {
    let config = StreamConfig::load_from(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    let channel = channel.unwrap_or(config.channel);

    info!("🚀 Watching session {} over {}", session_id, channel);
    let mut session = StreamSession::new(Transport::for_channel(channel), config);
    session
        .connect(session_id)
        .await
        .with_context(|| format!("Failed to connect to session {}", session_id))?;

    if start {
        session.start().await.context("Failed to start the run")?;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        let mut exhausted = false;
        while let Some(update) = rx.recv().await {
            if matches!(update, SessionUpdate::ReconnectExhausted { .. }) {
                exhausted = true;
            }
            print_update(&update);
        }
        exhausted
    });

    let interrupted = tokio::select! {
        _ = session.run(tx) => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        info!("Interrupted, closing connection");
        session.disconnect().await;
    }

    let exhausted = printer.await.context("Printer task failed")?;
    if json {
        let view = serde_json::to_string_pretty(session.view()).context("Failed to encode view")?;
        println!("{}", view);
    } else {
        print_summary(&session);
    }

    if session.status() == SessionStatus::Error {
        bail!("Run failed: {}", session.last_error().unwrap_or("unknown error"));
    }
    if exhausted {
        bail!("Connection lost: {}", session.last_error().unwrap_or("reconnect attempts exhausted"));
    }
    Ok(())
}

fn print_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::Signal(signal) => tracing::debug!(?signal, "signal"),
        SessionUpdate::Event { event, status_change } => {
            println!("[{:>4}] {:<10} {:<14} {}", event.seq, event.agent, event.kind, event.content);
            if let Some(status) = status_change {
                println!("       status -> {}", status);
            }
        }
        SessionUpdate::RemoteError(message) => println!("backend error: {}", message),
        SessionUpdate::Reconnecting { attempt, delay } => {
            println!("connection lost, retry {} in {:?}", attempt, delay)
        }
        SessionUpdate::Reconnected { attempt, .. } => println!("reconnected (attempt {})", attempt),
        SessionUpdate::ReconnectExhausted { attempts } => {
            println!("gave up after {} reconnect attempts", attempts)
        }
        SessionUpdate::Closed => println!("connection closed"),
    }
}

fn print_summary(session: &StreamSession) {
    let view = session.view();
    println!();
    println!("status:      {}", view.status());
    println!("events:      {}", view.events().len());
    if let Some(stage) = view.active_stage() {
        println!("last stage:  {}", stage);
    }
    if let Some(plan) = view.plan() {
        let domain = plan.detected_domain.as_deref().unwrap_or("unknown");
        println!("plan:        received (domain: {})", domain);
    }
    println!("scenes:      {}", view.scenes().len());
    if let Some(output) = view.final_output() {
        match output.quality_score {
            Some(score) => println!("final output (quality {}):", score),
            None => println!("final output:"),
        }
        println!("{}", output.text);
    }
}
