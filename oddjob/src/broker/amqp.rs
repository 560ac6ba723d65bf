//! RabbitMQ implementation of [`ChannelProvider`], built on `lapin`.
//!
//! Each operation opens its own connection and AMQP channel and closes them before returning;
//! lapin handles are never shared between operations.  Channels are server-named queues
//! declared with `x-expires`, and results are published through the default exchange with the
//! queue name as routing key.

use super::{ChannelProvider, Delivery, ProviderError, Settle};
use crate::retry::{Backoff, Retry};
use anyhow::Context;
use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions, ConfirmSelectOptions,
    QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use slog::{debug, o, Logger};
use std::convert::TryFrom;
use std::time::Duration;

/// A [`ChannelProvider`] backed by a RabbitMQ server.
pub struct AmqpProvider {
    url: String,
    retry: Retry,
    logger: Logger,
}

impl AmqpProvider {
    /// Create a provider for the broker at the given `amqp://` URL.  No connection is made until
    /// the first operation.
    pub fn new<S: Into<String>>(url: S, retry: Retry, logger: Logger) -> Self {
        Self {
            url: url.into(),
            retry,
            logger: logger.new(o!("provider" => "amqp")),
        }
    }

    /// Open a fresh session, retrying connection failures according to the configured
    /// [`Retry`].
    async fn session(&self) -> anyhow::Result<Session> {
        let mut backoff = Backoff::new(&self.retry);
        loop {
            match Session::open(&self.url, self.logger.clone()).await {
                Ok(session) => return Ok(session),
                Err(err) => match backoff.next_backoff() {
                    Some(delay) => {
                        debug!(self.logger, "broker connection failed; retrying";
                            "error" => format!("{:#}", err), "delay_ms" => delay.as_millis() as u64);
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err),
                },
            }
        }
    }
}

#[async_trait]
impl ChannelProvider for AmqpProvider {
    async fn create_channel(&self, ttl: Duration) -> Result<String, ProviderError> {
        let expires = i64::try_from(ttl.as_millis())
            .ok()
            .filter(|ms| *ms > 0)
            .ok_or_else(|| {
                ProviderError::ChannelCreation(anyhow::anyhow!("invalid channel TTL {:?}", ttl))
            })?;
        let mut arguments = FieldTable::default();
        arguments.insert("x-expires".into(), AMQPValue::LongLongInt(expires));

        let session = self
            .session()
            .await
            .map_err(ProviderError::ChannelCreation)?;
        let res = session
            .channel
            .queue_declare("", QueueDeclareOptions::default(), arguments)
            .await;
        session.close().await;

        let queue = res
            .context("while declaring result queue")
            .map_err(ProviderError::ChannelCreation)?;
        Ok(queue.name().as_str().to_owned())
    }

    async fn publish(&self, channel: &str, body: &[u8]) -> Result<(), ProviderError> {
        let session = self.session().await.map_err(ProviderError::Transport)?;
        let res = session.publish(channel, body).await;
        session.close().await;
        res
    }

    async fn fetch_one(&self, channel: &str) -> Result<Option<Delivery>, ProviderError> {
        let session = self.session().await.map_err(ProviderError::Transport)?;
        let res = session
            .channel
            .basic_get(channel, BasicGetOptions { no_ack: false })
            .await;

        match res {
            Ok(Some(message)) => {
                let delivery_tag = message.delivery.delivery_tag;
                let body = message.delivery.data;
                Ok(Some(Delivery::new(
                    body,
                    Box::new(AmqpDelivery {
                        session,
                        queue: channel.to_owned(),
                        delivery_tag,
                    }),
                )))
            }
            Ok(None) => {
                session.close().await;
                Ok(None)
            }
            Err(err) => {
                session.close().await;
                Err(classify(channel, err, "while fetching result"))
            }
        }
    }

    async fn delete_channel(&self, channel: &str) -> Result<(), ProviderError> {
        let session = self.session().await.map_err(ProviderError::Transport)?;
        let res = session.delete_queue(channel).await;
        session.close().await;
        res
    }
}

/// A single connection and AMQP channel, used for one logical operation.
struct Session {
    connection: Connection,
    channel: Channel,
    logger: Logger,
}

impl Session {
    async fn open(url: &str, logger: Logger) -> anyhow::Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .context("while connecting to broker")?;
        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                let _ = connection.close(200, "OK").await;
                return Err(err).context("while opening broker channel");
            }
        };
        Ok(Self {
            connection,
            channel,
            logger,
        })
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), ProviderError> {
        // a passive declare fails with NOT_FOUND if the queue is gone, which a publish to the
        // default exchange would not
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| classify(queue, err, "while checking result queue"))?;

        self.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .context("while enabling publisher confirms")
            .map_err(ProviderError::Transport)?;

        let confirmation = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                body,
                BasicProperties::default(),
            )
            .await
            .map_err(|err| classify(queue, err, "while publishing result"))?
            .await
            .map_err(|err| classify(queue, err, "while awaiting publish confirmation"))?;

        match confirmation {
            // a returned mandatory message means the queue vanished after the passive declare
            Confirmation::Ack(Some(_)) => Err(ProviderError::ChannelNotFound(queue.to_owned())),
            Confirmation::Ack(None) | Confirmation::NotRequested => Ok(()),
            Confirmation::Nack(_) => Err(ProviderError::Transport(anyhow::anyhow!(
                "broker rejected result for {}",
                queue
            ))),
        }
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), ProviderError> {
        match self
            .channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(ProviderError::Transport(
                anyhow::Error::from(err).context("while deleting result queue"),
            )),
        }
    }

    /// Close the connection.  Failures here are logged, not returned: the operation has already
    /// produced its result, and the broker reclaims the connection either way.
    async fn close(self) {
        if let Err(err) = self.connection.close(200, "OK").await {
            debug!(self.logger, "error closing broker connection"; "error" => %err);
        }
    }
}

/// An unsettled message, holding the session it was fetched on.
struct AmqpDelivery {
    session: Session,
    queue: String,
    delivery_tag: u64,
}

#[async_trait]
impl Settle for AmqpDelivery {
    async fn ack(self: Box<Self>) -> Result<(), ProviderError> {
        let AmqpDelivery {
            session,
            queue,
            delivery_tag,
        } = *self;
        let res = async {
            session
                .channel
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await
                .map_err(|err| classify(&queue, err, "while acknowledging result"))?;
            session.delete_queue(&queue).await
        }
        .await;
        session.close().await;
        res
    }

    async fn requeue(self: Box<Self>) -> Result<(), ProviderError> {
        let AmqpDelivery {
            session,
            queue,
            delivery_tag,
        } = *self;
        let res = session
            .channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue: true,
                },
            )
            .await
            .map_err(|err| classify(&queue, err, "while requeueing result"));
        session.close().await;
        res
    }
}

fn is_not_found(err: &lapin::Error) -> bool {
    match err {
        lapin::Error::ProtocolError(amqp_err) => matches!(
            amqp_err.kind(),
            AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND)
        ),
        _ => false,
    }
}

/// Convert a lapin error into a ProviderError, separating out NOT_FOUND.
fn classify(queue: &str, err: lapin::Error, context: &'static str) -> ProviderError {
    if is_not_found(&err) {
        ProviderError::ChannelNotFound(queue.to_owned())
    } else {
        ProviderError::Transport(anyhow::Error::from(err).context(context))
    }
}
