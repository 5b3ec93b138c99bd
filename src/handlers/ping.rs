//! Health check

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::publish;

#[derive(Debug, Default, Deserialize)]
struct PingRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PongResponse {
    message: String,
    service: &'static str,
    version: &'static str,
    timestamp: String,
}

fn pong(request: PingRequest) -> PongResponse {
    PongResponse {
        message: request
            .message
            .map(|m| format!("Pong: {}", m))
            .unwrap_or_else(|| "Pong".to_string()),
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// Handle litebill.ping; any payload, including an empty one, gets a pong
pub async fn handle_ping(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Ping message without reply subject");
                continue;
            }
        };

        let request: PingRequest = serde_json::from_slice(&msg.payload).unwrap_or_default();
        publish(&client, reply, &pong(request)).await?;
        debug!("Sent pong response");
    }

    Ok(())
}
