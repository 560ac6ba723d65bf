use crate::job::Job;
use crate::{Error, ResultExchange};
use anyhow::{Context as AnyhowContext, Result};
use pin_project::pin_project;
use serde_json::{json, Value};
use slog::{error, info, o, warn, Logger};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// A [`Job`] that can be run in the background, with its result handed back through a result
/// token.  The job can also be called directly with [`Oddjob::call`].
pub struct Oddjob<J: Job> {
    job: Arc<J>,
}

impl<J: Job> Clone for Oddjob<J> {
    fn clone(&self) -> Self {
        Self {
            job: self.job.clone(),
        }
    }
}

/// A job that has been started by [`Oddjob::run_async`].
pub struct Launched {
    /// The token from which the result can be fetched
    pub token: String,

    /// The URL at which the result can be retrieved, if the exchange has a result URL base
    pub url: Option<String>,

    /// Resolves once the job has finished and its result has been published
    pub handle: JobHandle,
}

impl<J: Job> Oddjob<J> {
    pub fn new(job: J) -> Self {
        Self { job: Arc::new(job) }
    }

    /// Run the job on the calling path and return its result directly.
    pub async fn call(&self, args: J::Args) -> Result<Value> {
        self.job.run(args).await
    }

    /// Issue a result token, then start the job in the background, publishing its result to the
    /// token when it finishes.  Unless `public` is set, only `identity` can fetch the result.
    ///
    /// This returns as soon as the token is issued.  The returned [`JobHandle`] need not be
    /// awaited; dropping it leaves the job running.
    pub async fn run_async(
        &self,
        exchange: &ResultExchange,
        args: J::Args,
        identity: Option<&str>,
        public: bool,
    ) -> Result<Launched, Error> {
        let token = exchange.issue_token().await?;
        let url = exchange.result_url(&token);

        let run = JobRun {
            job: self.job.clone(),
            logger: exchange.logger().new(o!("token" => token.clone())),
            exchange: exchange.clone(),
            token: token.clone(),
            identity: identity.map(str::to_owned),
            public,
        };
        let handle = JobHandle {
            join_handle: tokio::spawn(run.run(args)),
        };

        Ok(Launched { token, url, handle })
    }
}

/// Everything needed to run a job once and publish its result.
struct JobRun<J: Job> {
    job: Arc<J>,
    logger: Logger,
    exchange: ResultExchange,
    token: String,
    identity: Option<String>,
    public: bool,
}

impl<J: Job> JobRun<J> {
    async fn run(self, args: J::Args) -> Result<()> {
        info!(self.logger, "starting job");

        // run the job in its own task, so that a panic is caught and reported rather than
        // leaving the token without a result
        let job = self.job.clone();
        let res = tokio::spawn(async move { job.run(args).await }).await;

        let result = match res {
            Ok(Ok(value)) => {
                info!(self.logger, "job finished");
                value
            }
            Ok(Err(err)) => {
                warn!(self.logger, "job failed"; "error" => format!("{:#}", err));
                failure_payload(format!("{:#}", err))
            }
            Err(err) => {
                error!(self.logger, "job panicked"; "error" => %err);
                failure_payload("job panicked".to_owned())
            }
        };

        if let Err(err) = self
            .exchange
            .publish(&self.token, result, self.identity.as_deref(), self.public)
            .await
        {
            // most likely the result queue expired before the job finished
            error!(self.logger, "failed to publish job result"; "error" => %err);
            return Err(err).context("while publishing job result");
        }
        Ok(())
    }
}

/// The result published in place of the output of a job that failed.
fn failure_payload(message: String) -> Value {
    json!({ "error": message })
}

/// A handle to a running job.  This acts much like a JoinHandle, and can be awaited to wait for
/// the job to finish and its result to be published.
#[pin_project]
pub struct JobHandle {
    #[pin]
    join_handle: JoinHandle<Result<()>>,
}

impl Future for JobHandle {
    type Output = Result<()>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().join_handle.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e).context("Job runner panicked")),
            Poll::Ready(Ok(r)) => Poll::Ready(r),
        }
    }
}
