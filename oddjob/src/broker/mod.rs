//! This module defines the ephemeral channels that carry results.
//!
//! A "channel" here is a broker queue: server-named, auto-expiring after a period of
//! inactivity, and holding at most one result.  The [`ChannelProvider`] trait covers all of
//! the queue operations the result exchange needs; in production this is RabbitMQ (see
//! [`amqp`]), and in tests it can be the in-memory [`MemoryBroker`](crate::testing::MemoryBroker).
//!
//! Implementations must not share a broker session between logical operations.  Every call
//! acquires its own session and releases it before returning, except [`ChannelProvider::fetch_one`],
//! whose [`Delivery`] holds its session until it is settled.

pub mod amqp;

use async_trait::async_trait;
use std::time::Duration;

pub use amqp::AmqpProvider;

/// Errors at the provider layer.  The result exchange wraps these into [`crate::Error`].
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The broker was unreachable or refused to declare the queue
    #[error("failed to create channel")]
    ChannelCreation(#[source] anyhow::Error),

    /// The named queue does not exist (never created, expired, or deleted)
    #[error("channel {0} not found")]
    ChannelNotFound(String),

    /// Any other broker or transport failure
    #[error("broker transport failure")]
    Transport(#[source] anyhow::Error),
}

/// A trait including all of the queue operations that the result exchange needs.
#[async_trait]
pub trait ChannelProvider: 'static + Sync + Send {
    /// Create a new server-named channel that the broker deletes after `ttl` of inactivity,
    /// returning its name.
    async fn create_channel(&self, ttl: Duration) -> Result<String, ProviderError>;

    /// Send one message to the named channel.  A missing channel is reported as
    /// [`ProviderError::ChannelNotFound`].
    async fn publish(&self, channel: &str, body: &[u8]) -> Result<(), ProviderError>;

    /// Fetch at most one pending message without waiting.  The message stays reserved for the
    /// caller until the returned [`Delivery`] is acked or requeued.
    async fn fetch_one(&self, channel: &str) -> Result<Option<Delivery>, ProviderError>;

    /// Delete the named channel.  Deleting a channel that does not exist succeeds.
    async fn delete_channel(&self, channel: &str) -> Result<(), ProviderError>;
}

/// Settles a single fetched message.  Implemented by each provider.
#[async_trait]
pub trait Settle: Send {
    /// Remove the message permanently and delete its channel.
    async fn ack(self: Box<Self>) -> Result<(), ProviderError>;

    /// Return the message to its channel so that a later fetch can see it.
    async fn requeue(self: Box<Self>) -> Result<(), ProviderError>;
}

/// A message fetched from a channel, not yet settled.
pub struct Delivery {
    body: Vec<u8>,
    settle: Box<dyn Settle>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, settle: Box<dyn Settle>) -> Self {
        Self { body, settle }
    }

    /// The message body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consume the message and delete the channel that held it.
    pub async fn ack(self) -> Result<(), ProviderError> {
        self.settle.ack().await
    }

    /// Put the message back, undeleted.
    pub async fn requeue(self) -> Result<(), ProviderError> {
        self.settle.requeue().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("body", &String::from_utf8_lossy(&self.body))
            .finish()
    }
}
