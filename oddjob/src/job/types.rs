use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// A job is a unit of work whose JSON result is handed back through a result token; it is the
/// main trait to implement to use this crate.
#[async_trait]
pub trait Job: 'static + Sync + Send {
    /// The arguments for a single run of this job
    type Args: 'static + Send;

    async fn run(&self, args: Self::Args) -> Result<Value>;
}

/// A [`Job`] built from a plain, blocking function.  Each run executes on tokio's blocking
/// thread pool, so the function may sleep or do blocking I/O.
pub struct BlockingJob<A, R, F>
where
    F: Fn(A) -> Result<R>,
{
    func: Arc<F>,
    _types: std::marker::PhantomData<fn(A) -> R>,
}

impl<A, R, F> BlockingJob<A, R, F>
where
    A: 'static + Send,
    R: Serialize,
    F: 'static + Sync + Send + Fn(A) -> Result<R>,
{
    pub fn new(func: F) -> Self {
        Self {
            func: Arc::new(func),
            _types: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<A, R, F> Job for BlockingJob<A, R, F>
where
    A: 'static + Send,
    R: 'static + Send + Serialize,
    F: 'static + Sync + Send + Fn(A) -> Result<R>,
{
    type Args = A;

    async fn run(&self, args: A) -> Result<Value> {
        let func = self.func.clone();
        // a panic in `func` surfaces as a JoinError here
        let output = tokio::task::spawn_blocking(move || func(args)).await??;
        Ok(serde_json::to_value(output)?)
    }
}
