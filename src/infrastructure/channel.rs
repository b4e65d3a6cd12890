//! In-process message channel.
//!
//! A bounded `tokio::sync::mpsc` queue carrying JSON-encoded events under a
//! topic name, standing in for an external broker. Publishing returns once
//! the message is queued; it waits only for queue space, never for the
//! consumer.

use crate::application::error::PublishError;
use crate::application::ports::EventPublisher;
use crate::domain::application::{ApplyEvent, APPLY_TOPIC};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Error returned when channel configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelConfigError {
    /// The queue must hold at least one message
    #[error("channel capacity must be greater than 0")]
    ZeroCapacity,
}

/// Configuration for the in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Maximum number of queued messages
    pub capacity: usize,
    /// Topic stamped on every published message
    pub topic: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            topic: APPLY_TOPIC.to_string(),
        }
    }
}

/// A message as it travels through the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub payload: String,
}

impl Envelope {
    /// Decode the payload as an [`ApplyEvent`].
    pub fn decode(&self) -> Result<ApplyEvent, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// Create a connected publisher/consumer pair.
///
/// # Errors
/// Returns `ChannelConfigError::ZeroCapacity` if `config.capacity` is zero.
pub fn channel(
    config: ChannelConfig,
) -> Result<(ChannelPublisher, ChannelConsumer), ChannelConfigError> {
    if config.capacity == 0 {
        return Err(ChannelConfigError::ZeroCapacity);
    }
    let (sender, receiver) = mpsc::channel(config.capacity);
    Ok((
        ChannelPublisher {
            sender,
            topic: config.topic,
        },
        ChannelConsumer { receiver },
    ))
}

/// Publishing half of the channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    sender: mpsc::Sender<Envelope>,
    topic: String,
}

impl ChannelPublisher {
    /// Topic this publisher writes to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, event: ApplyEvent) -> Result<(), PublishError> {
        let payload =
            serde_json::to_string(&event).map_err(|e| PublishError::Encoding(e.to_string()))?;
        self.sender
            .send(Envelope {
                topic: self.topic.clone(),
                payload,
            })
            .await
            .map_err(|_| PublishError::Closed)
    }
}

/// Consuming half of the channel.
#[derive(Debug)]
pub struct ChannelConsumer {
    receiver: mpsc::Receiver<Envelope>,
}

impl ChannelConsumer {
    /// Wait for the next message. Returns `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Stop accepting new messages; queued ones can still be received.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}
