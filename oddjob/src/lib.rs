//! This library runs work in the background and hands its result back exactly once, to whoever
//! holds an opaque result token, optionally restricted to the identity that launched the work.
//!
//! Results travel through RabbitMQ: every token names a server-generated, auto-expiring queue
//! that holds at most one message.  Nothing is stored locally; the broker is the only state.
//!
//! * [`broker`] abstracts the ephemeral queues, with a RabbitMQ implementation in [`broker::amqp`]
//! * [`token`] converts between queue names and URL-safe result tokens
//! * [`envelope`] defines the message stored in each queue
//! * [`exchange`] implements the issue / publish / fetch protocol
//! * [`job`] runs work off the calling path and publishes its result
//! * [`testing`] provides an in-memory broker and other support for tests
//!
//! A typical application builds a [`ResultExchange`] from a [`Config`], wraps its work in an
//! [`Oddjob`], and calls [`Oddjob::run_async`] to get a token (or URL) to hand back to the
//! requester, who later calls [`ResultExchange::fetch`] or [`ResultExchange::retrieve`].

pub mod broker;
mod config;
pub mod envelope;
mod error;
pub mod exchange;
pub mod job;
mod retry;
pub mod testing;
pub mod token;

pub use config::{Config, DEFAULT_QUEUE_TTL};
pub use error::Error;
pub use exchange::{ResultExchange, Retrieval};
pub use job::{BlockingJob, Job, JobHandle, Launched, Oddjob};
pub use retry::Retry;
