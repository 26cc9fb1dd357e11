use anyhow::{Context, Result};
use async_nats::{Client, ConnectOptions, Event};
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::messages::{ClassifyReply, ClassifyRequest};
use crate::signaling::Envelope;

/// Whether the server connection is currently up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Thin wrapper over the NATS connection shared by the relay and the classifier
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    status: watch::Receiver<ConnectionStatus>,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let (status_tx, status) = watch::channel(ConnectionStatus::Connected);
        let status_tx = Arc::new(status_tx);

        // The client reconnects on its own; the events only tell us when
        let client = ConnectOptions::new()
            .event_callback(move |event| {
                let status_tx = Arc::clone(&status_tx);
                async move {
                    match event {
                        Event::Disconnected => {
                            warn!("NATS connection lost");
                            status_tx.send_replace(ConnectionStatus::Disconnected);
                        }
                        Event::Connected => {
                            info!("NATS connection (re)established");
                            status_tx.send_replace(ConnectionStatus::Connected);
                        }
                        other => debug!("NATS event: {}", other),
                    }
                }
            })
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client, status })
    }

    /// Follow connection loss and recovery
    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Publish a room envelope
    pub async fn publish_envelope(&self, subject: &str, envelope: &Envelope) -> Result<()> {
        let payload = serde_json::to_vec(envelope)?;

        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .context("Failed to publish room envelope")?;

        debug!(
            "Published {:?} to {} (sender={})",
            envelope.event.kind(),
            subject,
            envelope.sender
        );

        Ok(())
    }

    /// Subscribe to a room subject
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber> {
        info!("Subscribing to {}", subject);

        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .with_context(|| format!("Failed to subscribe to {}", subject))?;

        Ok(subscriber)
    }

    /// Ask the classifier service to label one JPEG frame
    pub async fn request_classification(
        &self,
        subject: &str,
        jpeg: &[u8],
        timeout: Duration,
    ) -> Result<ClassifyReply> {
        let request = ClassifyRequest {
            image: base64::engine::general_purpose::STANDARD.encode(jpeg),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let payload = serde_json::to_vec(&request)?;

        let message = tokio::time::timeout(
            timeout,
            self.client.request(subject.to_string(), payload.into()),
        )
        .await
        .context("Classifier request timed out")?
        .context("Classifier request failed")?;

        let reply: ClassifyReply =
            serde_json::from_slice(&message.payload).context("Failed to parse classifier reply")?;

        Ok(reply)
    }

    /// Flush pending publishes
    pub async fn close(self) -> Result<()> {
        info!("Closing NATS connection");
        self.client.flush().await.context("Failed to flush NATS")?;
        Ok(())
    }
}
