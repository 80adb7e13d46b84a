//! Terminal client for one antrikshGPT chat session.
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command-line flags.
//! 2. Initializing logging.
//! 3. Starting a session over the duplex channel (or fallback only).
//! 4. Forwarding stdin lines as user messages and printing session events.
//! 5. Tearing the session down on EOF or Ctrl+C.

use anyhow::Context;
use antriksh_core::events::{ConnectionState, EventSink, SessionEvent};
use antriksh_core::models::Role;
use antriksh_session::{
    config::Config,
    fallback::FallbackTransport,
    ws::{Connector, Session, WsConnector},
};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Chat with the antrikshGPT backend from the terminal.
#[derive(Parser, Debug)]
#[command(name = "client", version, about, long_about = None)]
struct Cli {
    /// Duplex channel endpoint (overrides SESSION_WS_URL)
    #[arg(long)]
    ws_url: Option<String>,

    /// Fallback HTTP endpoint (overrides SESSION_CHAT_URL)
    #[arg(long)]
    chat_url: Option<String>,

    /// Never open the duplex channel; send every message over HTTP
    #[arg(long)]
    no_socket: bool,
}

/// Listens for the `Ctrl+C` signal to shut the session down.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Closing session...");
}

fn render(event: SessionEvent) {
    match event {
        SessionEvent::Welcome(message) | SessionEvent::Info(message) => println!("* {message}"),
        SessionEvent::Snapshot { domain, cached, .. } => {
            println!("* {domain} data updated{}", if cached { " (cached)" } else { "" })
        }
        SessionEvent::ReplyDelta(chunk) => print!("{chunk}"),
        SessionEvent::TurnAppended(turn) if turn.role == Role::Assistant => {
            println!("\nassistant> {}", turn.content)
        }
        SessionEvent::TurnAppended(_) => {}
        SessionEvent::ToolStateChanged { active } => {
            for call in active {
                println!("  [{:?}] {}", call.status, call.description);
            }
        }
        SessionEvent::ServerError(message) => eprintln!("! {message}"),
        SessionEvent::Connection(ConnectionState::Open) => println!("* connected"),
        SessionEvent::Connection(ConnectionState::Closed) => println!("* disconnected"),
        SessionEvent::Connection(_) => {}
        SessionEvent::ReconnectScheduled { attempt, delay } => {
            println!("* reconnecting in {}s (attempt {attempt})", delay.as_secs())
        }
        SessionEvent::ConnectionExhausted { attempts } => {
            println!("* could not reconnect after {attempts} attempts; using HTTP from now on")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let cli = Cli::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(ws_url) = cli.ws_url {
        config.ws_url = ws_url;
    }
    if let Some(chat_url) = cli.chat_url {
        config.chat_url = chat_url;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(
        ws_url = %config.ws_url,
        chat_url = %config.chat_url,
        socket = !cli.no_socket,
        "Configuration loaded."
    );

    // --- 3. Start the Session ---
    let fallback = FallbackTransport::new(config.chat_url.clone(), config.fallback_timeout)
        .context("Failed to build HTTP client")?;
    let connector: Option<Box<dyn Connector>> = if cli.no_socket {
        None
    } else {
        Some(Box::new(WsConnector::new(
            config.ws_url.clone(),
            config.connect_timeout,
        )))
    };
    let (events, mut event_rx) = EventSink::channel();
    let (session, handle) = Session::new(&config, connector, fallback, events);
    let session_task = session.spawn();

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            render(event);
        }
    });

    // --- 4. Forward User Input ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    if handle.send_user(line.trim()).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut shutdown => break,
        }
    }

    // --- 5. Shut Down ---
    handle.close().await;
    session_task.await.context("Session task panicked")?;
    let _ = printer.await;
    info!("Session has shut down.");
    Ok(())
}
