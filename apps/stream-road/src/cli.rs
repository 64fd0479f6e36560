use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error};

use crate::config::ServeArgs;
use crate::protocol::{ClientMessage, ServerMessage};

#[derive(Parser, Debug)]
#[command(name = "stream-road", version)]
#[command(about = "Stream Road signaling broker and probe client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join a stream as a consumer and print every notification
    Probe {
        /// Broker WebSocket URL (e.g., ws://localhost:5001)
        #[arg(short, long, default_value = "ws://localhost:5001")]
        url: String,

        /// Stream ID to join
        #[arg(short, long)]
        stream: String,

        /// Seconds to wait for the next notification before giving up
        #[arg(short, long, default_value_t = 30)]
        timeout: u64,
    },
}

/// How a probe run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    SessionEnded,
    StreamNotFound,
    Idle,
    Closed,
}

pub async fn run_probe(url: String, stream: String, idle_timeout: u64) -> Result<ProbeOutcome> {
    let ws_url = format!("{}/ws", url.trim_end_matches('/'));
    debug!("Connecting to {} for stream {}", ws_url, stream);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("Failed to connect to {}: {}", ws_url, e);
            return Err(anyhow!("Connection failed: {}", e));
        }
        Err(_) => {
            error!("Connection timeout after 5 seconds");
            return Err(anyhow!("Connection timeout - is the broker running?"));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let join = serde_json::to_string(&ClientMessage::ConsumerJoin {
        stream_id: stream.clone(),
    })?;
    write.send(Message::Text(join.into())).await?;

    let idle = Duration::from_secs(idle_timeout);
    let outcome = loop {
        let frame = match timeout(idle, read.next()).await {
            Ok(Some(frame)) => frame?,
            Ok(None) => break ProbeOutcome::Closed,
            Err(_) => break ProbeOutcome::Idle,
        };
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break ProbeOutcome::Closed,
            _ => continue,
        };

        println!("{}", text.as_str());
        match serde_json::from_str::<ServerMessage>(text.as_str()) {
            Ok(ServerMessage::SessionEnded { .. }) => break ProbeOutcome::SessionEnded,
            Ok(ServerMessage::StreamNotFound { .. }) => break ProbeOutcome::StreamNotFound,
            Ok(ServerMessage::Error { code, message }) => {
                eprintln!("Broker error ({code}): {message}");
            }
            Ok(_) => {}
            Err(e) => debug!("Unrecognised frame: {}", e),
        }
    };

    let _ = write.send(Message::Close(None)).await;
    Ok(outcome)
}
