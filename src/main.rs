//! Prospect trainer - terminal client for a training session
//!
//! Reads trainee turns from stdin and prints session notifications as JSON
//! lines on stdout.

use base64::Engine;
use prospect_trainer::config::SessionConfig;
use prospect_trainer::state_machine::SessionContext;
use prospect_trainer::store::{FilePersistence, MemoryPersistence, SessionPersistence};
use prospect_trainer::termination::Navigator;
use prospect_trainer::transport::WsTransport;
use prospect_trainer::{SessionController, SessionHandle};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Prints redirect targets; a browser shell would navigate instead
struct StdoutNavigator;

impl Navigator for StdoutNavigator {
    fn navigate(&self, target: &str) {
        println!("{{\"navigate\":{}}}", serde_json::Value::from(target));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging; stdout carries notifications
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prospect_trainer=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = SessionConfig::from_env();
    let session_id = std::env::var("PROSPECT_SESSION_ID")
        .map_err(|_| "PROSPECT_SESSION_ID must be set")?;
    // A missing token is reported by the session itself
    let auth_token = std::env::var("PROSPECT_TOKEN").unwrap_or_default();

    let persistence: Arc<dyn SessionPersistence> = match &config.state_dir {
        Some(dir) => {
            tracing::info!(path = %dir.display(), "Persisting sessions to disk");
            Arc::new(FilePersistence::new(dir.clone()))
        }
        None => Arc::new(MemoryPersistence::new()),
    };

    let context = SessionContext::from_config(session_id, auth_token, &config);
    let transport = WsTransport::from_config(&config);
    let handle =
        SessionController::spawn(context, transport, persistence, Arc::new(StdoutNavigator)).await;

    let mut notifications = Box::pin(handle.notifications());
    let printer = tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            match serde_json::to_string(&notification) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "Failed to encode notification"),
            }
        }
    });

    tracing::info!(session_id = %handle.session_id(), server = %config.server_url, "Starting session");
    handle.connect().await?;
    read_commands(&handle).await?;

    handle.dispose();
    printer.abort();
    Ok(())
}

/// One line per command: `/end`, `/quit`, `/reconnect`, `/go`,
/// `/audio <file> <text>`, anything else is a trainee turn
async fn read_commands(handle: &SessionHandle) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/end", _) => handle.end_session().await?,
            ("/reconnect", _) => handle.connect().await?,
            ("/go", _) => handle.redirect_now().await?,
            ("/audio", rest) => {
                let (path, text) = rest.split_once(' ').unwrap_or((rest, ""));
                match tokio::fs::read(path).await {
                    Ok(bytes) => {
                        let audio = base64::engine::general_purpose::STANDARD.encode(bytes);
                        handle.send_message(text, Some(audio)).await?;
                    }
                    Err(e) => tracing::warn!(path, error = %e, "Failed to read audio file"),
                }
            }
            _ => handle.send_message(line, None).await?,
        }
    }
    Ok(())
}
