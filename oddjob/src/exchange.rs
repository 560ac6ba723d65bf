//! The result-exchange protocol.
//!
//! A result token moves through these states, all of which live in the broker:
//!
//!  * pending: the queue exists and is empty
//!  * ready: the queue holds an unread result
//!  * consumed: the queue has been deleted after a successful fetch
//!
//! A token whose queue has expired, been consumed, or never existed is simply invalid.
//!
//! Fetching a restricted result as someone other than its owner must not destroy it.  The
//! broker cannot peek at a message without taking it, so a forbidden fetch takes the message
//! and puts it back.  While it is out, a concurrent fetch by the owner sees an empty queue and
//! reports "pending"; fetching again succeeds.

use crate::broker::{AmqpProvider, ChannelProvider, ProviderError};
use crate::config::DEFAULT_QUEUE_TTL;
use crate::envelope::Envelope;
use crate::{token, Config, Error};
use serde_json::Value;
use slog::{debug, o, warn, Logger};
use std::sync::Arc;
use std::time::Duration;

/// Issues result tokens, publishes results, and hands each result to its reader exactly once.
///
/// A ResultExchange holds no state of its own beyond its configuration, so it is cheap to clone
/// and safe to use from any number of tasks at once.
#[derive(Clone)]
pub struct ResultExchange {
    provider: Arc<dyn ChannelProvider>,
    queue_ttl: Duration,
    result_url_base: Option<String>,
    logger: Logger,
}

/// The outcome of [`ResultExchange::retrieve`], with the routine failures folded in.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    /// The result, now consumed; the token is no longer valid
    Ready(Value),
    /// No result yet; try again later
    Pending,
    /// A result exists but belongs to someone else; it is still available to its owner
    Forbidden,
    /// The token is malformed, expired, already consumed, or unknown
    Invalid,
}

impl Retrieval {
    /// The conventional HTTP status for this outcome: 200 with the result, 204 while pending,
    /// and 404 otherwise.  Note that this does not distinguish forbidden from invalid tokens,
    /// so as not to reveal which tokens hold restricted results; callers wanting a different
    /// mapping can match on the variants directly.
    pub fn status_code(&self) -> u16 {
        match self {
            Retrieval::Ready(_) => 200,
            Retrieval::Pending => 204,
            Retrieval::Forbidden | Retrieval::Invalid => 404,
        }
    }
}

impl ResultExchange {
    /// Create a ResultExchange using the given provider, with the default queue TTL.
    pub fn new(provider: Arc<dyn ChannelProvider>, logger: Logger) -> Self {
        Self {
            provider,
            queue_ttl: DEFAULT_QUEUE_TTL,
            result_url_base: None,
            logger,
        }
    }

    /// Create a ResultExchange talking to the RabbitMQ server described by `config`.
    pub fn from_config(config: &Config, logger: Logger) -> Self {
        let provider = AmqpProvider::new(
            config.rabbitmq_url.clone(),
            config.retry.clone(),
            logger.clone(),
        );
        let mut exchange = Self::new(Arc::new(provider), logger).queue_ttl(config.queue_ttl);
        exchange.result_url_base = config.result_url_base.clone();
        exchange
    }

    /// Set the lifetime of unused result queues
    pub fn queue_ttl(mut self, queue_ttl: Duration) -> Self {
        self.queue_ttl = queue_ttl;
        self
    }

    /// Set the base URL under which results are served
    pub fn result_url_base<S: Into<String>>(mut self, result_url_base: S) -> Self {
        self.result_url_base = Some(result_url_base.into());
        self
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Get the URL at which the result for this token can be retrieved, if a base URL is
    /// configured.  The URL has the form `<base>/result/<token>/`.
    pub fn result_url(&self, token: &str) -> Option<String> {
        self.result_url_base
            .as_ref()
            .map(|base| format!("{}/result/{}/", base.trim_end_matches('/'), token))
    }

    /// Create a new, empty result queue and return its token.
    pub async fn issue_token(&self) -> Result<String, Error> {
        let queue = self
            .provider
            .create_channel(self.queue_ttl)
            .await
            .map_err(Error::TokenIssuance)?;
        debug!(self.logger, "issued result token"; "queue" => &queue);
        Ok(token::encode(&queue))
    }

    /// Publish the result for a token.  Unless `public` is set, only `identity` will be able to
    /// fetch it.  Publishing after the token has expired fails with [`Error::Publish`].
    pub async fn publish(
        &self,
        token: &str,
        result: Value,
        identity: Option<&str>,
        public: bool,
    ) -> Result<(), Error> {
        let queue = token::decode(token)?;
        let envelope = Envelope::new(result, identity, public);
        self.provider
            .publish(&queue, &envelope.to_bytes())
            .await
            .map_err(Error::Publish)?;
        debug!(self.logger, "published result";
            "queue" => &queue, "restricted" => envelope.owner().is_some());
        Ok(())
    }

    /// Fetch the result for a token on behalf of `identity` (None for an anonymous requester).
    ///
    /// Returns `Ok(None)` if the result is not yet available.  A successful fetch consumes the
    /// result, after which the token is invalid.  Fails with [`Error::InvalidToken`] for
    /// malformed, expired, consumed, or unknown tokens, and with [`Error::Authorization`] if
    /// the result belongs to a different identity, in which case it remains available.
    pub async fn fetch(&self, token: &str, identity: Option<&str>) -> Result<Option<Value>, Error> {
        let queue = token::decode(token)?;
        let logger = self.logger.new(o!("queue" => queue.clone()));

        let delivery = match self.provider.fetch_one(&queue).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                debug!(logger, "result not yet available");
                return Ok(None);
            }
            Err(ProviderError::ChannelNotFound(_)) => {
                debug!(logger, "result queue does not exist");
                return Err(Error::InvalidToken);
            }
            Err(err) => return Err(Error::Fetch(err)),
        };

        let envelope = match Envelope::from_bytes(delivery.body()) {
            Ok(envelope) => envelope,
            Err(err) => {
                // a queue that holds garbage will never hold a result, so consume it
                warn!(logger, "discarding malformed result"; "error" => %err);
                delivery.ack().await.map_err(Error::Fetch)?;
                return Err(Error::Envelope(err));
            }
        };

        if envelope.readable_by(identity) {
            delivery.ack().await.map_err(Error::Fetch)?;
            debug!(logger, "result consumed");
            Ok(Some(envelope.payload))
        } else {
            warn!(logger, "forbidden result fetch; requeueing";
                "requester" => identity.unwrap_or("<anonymous>"));
            delivery.requeue().await.map_err(Error::Fetch)?;
            Err(Error::Authorization)
        }
    }

    /// Like [`fetch`](ResultExchange::fetch), but reporting every routine outcome as a
    /// [`Retrieval`].  Only broker and data failures are returned as errors.
    pub async fn retrieve(&self, token: &str, identity: Option<&str>) -> Result<Retrieval, Error> {
        match self.fetch(token, identity).await {
            Ok(Some(result)) => Ok(Retrieval::Ready(result)),
            Ok(None) => Ok(Retrieval::Pending),
            Err(Error::Authorization) => Ok(Retrieval::Forbidden),
            Err(Error::InvalidToken) => Ok(Retrieval::Invalid),
            Err(err) => Err(err),
        }
    }

    /// Delete the result queue for a token, discarding any result.  Deleting an expired or
    /// consumed token succeeds.
    pub async fn discard(&self, token: &str) -> Result<(), Error> {
        let queue = token::decode(token)?;
        self.provider
            .delete_channel(&queue)
            .await
            .map_err(Error::Fetch)?;
        debug!(self.logger, "discarded result queue"; "queue" => &queue);
        Ok(())
    }
}
