use anyhow::Result;
use futures::stream::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use super::messages::Envelope;
use super::relay::{Relay, RelayLink, LINK_BUFFER};
use crate::nats::{ConnectionStatus, NatsClient};

/// Relay backed by a NATS server.
///
/// Every room maps to one subject, `{prefix}.{session_code}`; the server does
/// the fan-out and never looks at payloads. A lost server connection ends
/// every open link so the channel reattaches and resyncs.
pub struct NatsRelay {
    client: NatsClient,
    subject_prefix: String,
}

impl NatsRelay {
    pub fn new(client: NatsClient, subject_prefix: impl Into<String>) -> Self {
        Self {
            client,
            subject_prefix: subject_prefix.into(),
        }
    }

    pub fn subject_for(&self, session_code: &str) -> String {
        format!("{}.{}", self.subject_prefix, session_code)
    }
}

#[async_trait::async_trait]
impl Relay for NatsRelay {
    async fn attach(&self, session_code: &str) -> Result<RelayLink> {
        let status = self.client.connection_status();
        if *status.borrow() == ConnectionStatus::Disconnected {
            anyhow::bail!("NATS connection is down");
        }

        let subject = self.subject_for(session_code);
        let subscriber = self.client.subscribe(&subject).await?;

        let (in_tx, in_rx) = mpsc::channel::<Envelope>(LINK_BUFFER);
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(LINK_BUFFER);

        // Inbound: subscriber -> link
        let payloads = subscriber.map(|msg| msg.payload.to_vec());
        tokio::spawn(forward_inbound(payloads, status, in_tx, subject.clone()));

        // Outbound: link -> publish
        let client = self.client.clone();
        tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                if let Err(e) = client.publish_envelope(&subject, &envelope).await {
                    error!("Failed to publish to {}: {}", subject, e);
                    break;
                }
            }
        });

        Ok(RelayLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    fn name(&self) -> &str {
        "nats"
    }
}

/// Parse payloads into the link until the subscription ends or the
/// connection drops. Returning drops `in_tx`, which the link reads as lost.
async fn forward_inbound<S>(
    payloads: S,
    mut status: watch::Receiver<ConnectionStatus>,
    in_tx: mpsc::Sender<Envelope>,
    subject: String,
) where
    S: Stream<Item = Vec<u8>>,
{
    tokio::pin!(payloads);
    status.borrow_and_update();

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() || *status.borrow() == ConnectionStatus::Disconnected {
                    warn!("NATS connection lost; closing link on {}", subject);
                    return;
                }
            }
            payload = payloads.next() => match payload {
                Some(payload) => match serde_json::from_slice::<Envelope>(&payload) {
                    Ok(envelope) => {
                        if in_tx.send(envelope).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Failed to parse envelope on {}: {}", subject, e),
                },
                None => {
                    info!("NATS subscription on {} ended", subject);
                    return;
                }
            },
        }
    }
}
