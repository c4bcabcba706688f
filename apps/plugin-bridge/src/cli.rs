use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error};

use crate::protocol::{Envelope, MetadataExchange};

#[derive(Parser, Debug)]
#[command(name = "plugin-bridge")]
#[command(about = "Remote plugin-host bridge and probe client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running bridge as a frontend client
    Probe {
        /// Bridge URL (e.g., ws://localhost:2503)
        #[arg(short, long, default_value = "ws://localhost:2503")]
        url: String,

        #[command(subcommand)]
        command: ProbeCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProbeCommands {
    /// Request the bridge's current plugin metadata list
    Metadata {
        /// Endpoint name stamped into the returned records
        #[arg(long, default_value = "probe")]
        endpoint_name: String,
    },
    /// Send a content envelope addressed to a plugin
    Send {
        /// Plugin identity the envelope is routed by
        #[arg(long)]
        plugin_id: String,

        /// JSON payload
        #[arg(long, default_value = "{}")]
        content: String,
    },
}

pub async fn run_probe(url: String, command: ProbeCommands) -> Result<()> {
    let ws_url = format!("{}/ws", url.trim_end_matches('/'));
    debug!("connecting to {ws_url}");

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("failed to connect to {ws_url}: {e}");
            return Err(anyhow::anyhow!("connection failed: {e}"));
        }
        Err(_) => {
            return Err(anyhow::anyhow!(
                "connection timeout - is the bridge running?"
            ));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    match command {
        ProbeCommands::Metadata { endpoint_name } => {
            let request = Envelope::metadata_request(&endpoint_name);
            write
                .send(Message::Text(serde_json::to_string(&request)?.into()))
                .await?;

            let reply = timeout(Duration::from_secs(10), async {
                while let Some(frame) = read.next().await {
                    if let Message::Text(text) = frame? {
                        let envelope: Envelope = serde_json::from_str(&text)?;
                        if let Envelope::Internal { internal } = envelope {
                            if let MetadataExchange::Result { result } = internal.metadata {
                                return Ok::<_, anyhow::Error>(result);
                            }
                        }
                    }
                }
                Err(anyhow::anyhow!("connection closed before metadata reply"))
            })
            .await;

            match reply {
                Ok(Ok(entries)) => {
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(anyhow::anyhow!("timed out waiting for metadata reply")),
            }
        }
        ProbeCommands::Send { plugin_id, content } => {
            let content: serde_json::Value = serde_json::from_str(&content)
                .map_err(|e| anyhow::anyhow!("invalid --content JSON: {e}"))?;
            let envelope = Envelope::Content { plugin_id, content };
            write
                .send(Message::Text(serde_json::to_string(&envelope)?.into()))
                .await?;
            println!("sent");
        }
    }

    write.send(Message::Close(None)).await?;
    Ok(())
}
