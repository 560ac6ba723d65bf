//! This module runs work in the background and publishes its result.  It handles
//!
//!  * issuing a result token before the work starts
//!  * running the work off the calling path (blocking work on tokio's blocking pool)
//!  * publishing the result, or a failure payload, when the work finishes
//!
//! The work itself is a [`Job`] you provide, wrapped in an [`Oddjob`].  A job that returns an
//! error or panics still produces a result, `{"error": "<message>"}`, so its token resolves
//! rather than waiting for the queue to expire.
//!
//! ```rust
//! use oddjob::testing::{test_logger, MemoryBroker};
//! use oddjob::{BlockingJob, Oddjob, ResultExchange};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let exchange = ResultExchange::new(MemoryBroker::new().as_provider(), test_logger());
//! let add = Oddjob::new(BlockingJob::new(|(x, y): (i64, i64)| {
//!     Ok(json!({"x": x, "y": y, "sum": x + y}))
//! }));
//!
//! let launched = add.run_async(&exchange, (1, 2), Some("alice"), false).await?;
//! launched.handle.await?;
//!
//! let result = exchange.fetch(&launched.token, Some("alice")).await?;
//! assert_eq!(result, Some(json!({"x": 1, "y": 2, "sum": 3})));
//! # Ok(())
//! # }
//! ```

mod run;
mod types;

pub use run::{JobHandle, Launched, Oddjob};
pub use types::{BlockingJob, Job};
