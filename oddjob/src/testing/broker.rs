use crate::broker::{ChannelProvider, Delivery, ProviderError, Settle};
use crate::token::GENERATED_QUEUE_PREFIX;
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// An in-memory [`ChannelProvider`] that behaves like the parts of RabbitMQ that oddjob uses:
/// queues get unique generated names, expire after their TTL without a fetch (measured on
/// tokio's clock, so paused-time tests work), and fetched messages stay reserved until they are
/// acked or requeued.  Dropping an unsettled delivery requeues its message, as closing a broker
/// connection would.
///
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryBroker(Arc<Mutex<State>>);

#[derive(Default)]
struct State {
    queues: HashMap<String, Queue>,
    unreachable: bool,
}

struct Queue {
    ttl: Duration,
    expires_at: Instant,
    ready: VecDeque<Vec<u8>>,
    unacked: usize,
}

impl State {
    /// Remove queues that have gone unused for their TTL.  Queues with reserved messages are
    /// in use and never expire.
    fn reap(&mut self) {
        let now = Instant::now();
        self.queues
            .retain(|_, queue| queue.unacked > 0 || now < queue.expires_at);
    }

    fn check_reachable(&self) -> Result<(), ProviderError> {
        if self.unreachable {
            Err(ProviderError::Transport(anyhow!("broker unreachable")))
        } else {
            Ok(())
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert to an `Arc<dyn ChannelProvider>`, sharing state with this instance
    pub fn as_provider(&self) -> Arc<dyn ChannelProvider> {
        Arc::new(self.clone())
    }

    /// Simulate losing (or regaining) the connection to the broker.  While unreachable, every
    /// operation fails with a transport error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Number of live (unexpired) queues
    pub fn channel_count(&self) -> usize {
        let mut state = self.lock();
        state.reap();
        state.queues.len()
    }

    /// True if the named queue exists and has not expired
    pub fn channel_exists(&self, name: &str) -> bool {
        let mut state = self.lock();
        state.reap();
        state.queues.contains_key(name)
    }

    /// The TTL the named queue was created with
    pub fn channel_ttl(&self, name: &str) -> Option<Duration> {
        let mut state = self.lock();
        state.reap();
        state.queues.get(name).map(|queue| queue.ttl)
    }

    /// Number of messages in the named queue, including reserved messages
    pub fn message_count(&self, name: &str) -> Option<usize> {
        let mut state = self.lock();
        state.reap();
        state
            .queues
            .get(name)
            .map(|queue| queue.ready.len() + queue.unacked)
    }

    /// Place an arbitrary message in the named queue, bypassing the result exchange
    pub fn inject(&self, name: &str, body: &[u8]) {
        let mut state = self.lock();
        state.reap();
        if let Some(queue) = state.queues.get_mut(name) {
            queue.ready.push_back(body.to_vec());
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn settle(&self, name: &str, body: Vec<u8>, ack: bool) {
        let mut state = self.lock();
        if ack {
            state.queues.remove(name);
        } else if let Some(queue) = state.queues.get_mut(name) {
            queue.unacked -= 1;
            queue.ready.push_front(body);
            queue.expires_at = Instant::now() + queue.ttl;
        }
    }
}

#[async_trait]
impl ChannelProvider for MemoryBroker {
    async fn create_channel(&self, ttl: Duration) -> Result<String, ProviderError> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(ProviderError::ChannelCreation(anyhow!("broker unreachable")));
        }
        if ttl.is_zero() {
            return Err(ProviderError::ChannelCreation(anyhow!(
                "x-expires must be positive"
            )));
        }
        state.reap();

        let name = loop {
            let name = format!("{}{}", GENERATED_QUEUE_PREFIX, slugid::nice());
            if !state.queues.contains_key(&name) {
                break name;
            }
        };
        state.queues.insert(
            name.clone(),
            Queue {
                ttl,
                expires_at: Instant::now() + ttl,
                ready: VecDeque::new(),
                unacked: 0,
            },
        );
        Ok(name)
    }

    async fn publish(&self, channel: &str, body: &[u8]) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.check_reachable()?;
        state.reap();
        let queue = state
            .queues
            .get_mut(channel)
            .ok_or_else(|| ProviderError::ChannelNotFound(channel.to_owned()))?;
        // publishing does not count as use for the purposes of expiry
        queue.ready.push_back(body.to_vec());
        Ok(())
    }

    async fn fetch_one(&self, channel: &str) -> Result<Option<Delivery>, ProviderError> {
        let mut state = self.lock();
        state.check_reachable()?;
        state.reap();
        let queue = state
            .queues
            .get_mut(channel)
            .ok_or_else(|| ProviderError::ChannelNotFound(channel.to_owned()))?;
        queue.expires_at = Instant::now() + queue.ttl;

        Ok(queue.ready.pop_front().map(|body| {
            queue.unacked += 1;
            Delivery::new(
                body.clone(),
                Box::new(MemoryDelivery {
                    broker: self.clone(),
                    queue: channel.to_owned(),
                    body: Some(body),
                }),
            )
        }))
    }

    async fn delete_channel(&self, channel: &str) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.check_reachable()?;
        state.queues.remove(channel);
        Ok(())
    }
}

struct MemoryDelivery {
    broker: MemoryBroker,
    queue: String,
    /// None once settled
    body: Option<Vec<u8>>,
}

#[async_trait]
impl Settle for MemoryDelivery {
    async fn ack(self: Box<Self>) -> Result<(), ProviderError> {
        let mut this = self;
        if let Some(body) = this.body.take() {
            this.broker.settle(&this.queue, body, true);
        }
        Ok(())
    }

    async fn requeue(self: Box<Self>) -> Result<(), ProviderError> {
        let mut this = self;
        if let Some(body) = this.body.take() {
            this.broker.settle(&this.queue, body, false);
        }
        Ok(())
    }
}

impl Drop for MemoryDelivery {
    fn drop(&mut self) {
        if let Some(body) = self.body.take() {
            self.broker.settle(&self.queue, body, false);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn generated_names() {
        let broker = MemoryBroker::new();
        let a = broker.create_channel(Duration::from_secs(1)).await.unwrap();
        let b = broker.create_channel(Duration::from_secs(1)).await.unwrap();
        assert!(a.starts_with(GENERATED_QUEUE_PREFIX));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn zero_ttl_rejected() {
        let broker = MemoryBroker::new();
        assert!(matches!(
            broker.create_channel(Duration::from_secs(0)).await,
            Err(ProviderError::ChannelCreation(_))
        ));
    }

    #[tokio::test]
    async fn fetch_ack_deletes_queue() {
        let broker = MemoryBroker::new();
        let q = broker.create_channel(Duration::from_secs(10)).await.unwrap();
        broker.publish(&q, b"hello").await.unwrap();
        let delivery = broker.fetch_one(&q).await.unwrap().unwrap();
        assert_eq!(delivery.body(), b"hello");
        delivery.ack().await.unwrap();
        assert!(!broker.channel_exists(&q));
        assert!(matches!(
            broker.fetch_one(&q).await,
            Err(ProviderError::ChannelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn requeue_returns_message_to_front() {
        let broker = MemoryBroker::new();
        let q = broker.create_channel(Duration::from_secs(10)).await.unwrap();
        broker.publish(&q, b"first").await.unwrap();
        broker.publish(&q, b"second").await.unwrap();

        let delivery = broker.fetch_one(&q).await.unwrap().unwrap();
        assert_eq!(broker.message_count(&q), Some(2));
        delivery.requeue().await.unwrap();

        let delivery = broker.fetch_one(&q).await.unwrap().unwrap();
        assert_eq!(delivery.body(), b"first");
    }

    #[tokio::test]
    async fn reserved_message_is_invisible() {
        let broker = MemoryBroker::new();
        let q = broker.create_channel(Duration::from_secs(10)).await.unwrap();
        broker.publish(&q, b"only").await.unwrap();

        let delivery = broker.fetch_one(&q).await.unwrap().unwrap();
        assert!(broker.fetch_one(&q).await.unwrap().is_none());
        drop(delivery);

        // dropping an unsettled delivery requeues it
        let delivery = broker.fetch_one(&q).await.unwrap().unwrap();
        assert_eq!(delivery.body(), b"only");
    }

    #[tokio::test(start_paused = true)]
    async fn unused_queue_expires() {
        let broker = MemoryBroker::new();
        let q = broker.create_channel(Duration::from_secs(1)).await.unwrap();
        broker.publish(&q, b"late").await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!broker.channel_exists(&q));
        assert!(matches!(
            broker.publish(&q, b"later").await,
            Err(ProviderError::ChannelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let broker = MemoryBroker::new();
        let q = broker.create_channel(Duration::from_secs(10)).await.unwrap();
        broker.delete_channel(&q).await.unwrap();
        broker.delete_channel(&q).await.unwrap();
        assert_eq!(broker.channel_count(), 0);
    }
}
