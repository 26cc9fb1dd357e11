use anyhow::{Context, Result};
use std::time::Duration;

use crate::media::VideoFrame;
use crate::nats::{ClassifyReply, NatsClient};

/// Classifier verdict for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub confidence: f32,
}

impl TryFrom<ClassifyReply> for Classification {
    type Error = anyhow::Error;

    fn try_from(reply: ClassifyReply) -> Result<Self> {
        if let Some(error) = reply.error {
            anyhow::bail!("classifier error: {}", error);
        }

        Ok(Self {
            label: reply.label.context("classifier reply has no label")?,
            confidence: reply.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        })
    }
}

/// Per-frame emotion classifier.
///
/// An `Err` is a transient failure for that frame only.
#[async_trait::async_trait]
pub trait EmotionClassifier: Send + Sync {
    async fn classify(&self, frame: &VideoFrame) -> Result<Classification>;
}

/// Classifier reached over NATS request/reply
pub struct NatsClassifier {
    client: NatsClient,
    subject: String,
    timeout: Duration,
}

impl NatsClassifier {
    pub fn new(client: NatsClient, subject: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            subject: subject.into(),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl EmotionClassifier for NatsClassifier {
    async fn classify(&self, frame: &VideoFrame) -> Result<Classification> {
        let reply = self
            .client
            .request_classification(&self.subject, &frame.jpeg, self.timeout)
            .await?;

        Classification::try_from(reply)
    }
}
