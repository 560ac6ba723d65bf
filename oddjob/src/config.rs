use crate::Retry;
use anyhow::{anyhow, bail, Context, Error};
use std::env;
use std::time::Duration;

/// Default lifetime of an unused result queue.
pub const DEFAULT_QUEUE_TTL: Duration = Duration::from_secs(300);

/// Configuration for a [`ResultExchange`](crate::ResultExchange).
#[derive(Debug, Clone)]
pub struct Config {
    /// `amqp://` URL of the RabbitMQ server
    pub rabbitmq_url: String,

    /// Time after which an unused result queue (and so its token) expires
    pub queue_ttl: Duration,

    /// Base URL under which results are served; see
    /// [`ResultExchange::result_url`](crate::ResultExchange::result_url)
    pub result_url_base: Option<String>,

    /// Retry policy for connecting to the broker
    pub retry: Retry,
}

impl Config {
    /// Create a new Config with default settings.  The broker URL is required and so must always
    /// be specified.
    pub fn new<S: Into<String>>(rabbitmq_url: S) -> Self {
        Self {
            rabbitmq_url: rabbitmq_url.into(),
            queue_ttl: DEFAULT_QUEUE_TTL,
            result_url_base: None,
            retry: Retry::default(),
        }
    }

    /// Create a new Config from environment variables:
    ///
    /// * `ODDJOB_RABBITMQ_URL`
    /// * `ODDJOB_QUEUE_TTL` (optional, in seconds; default 300)
    /// * `ODDJOB_RESULT_URL_BASE` (optional)
    pub fn from_env() -> Result<Config, Error> {
        let rabbitmq_url = env::var("ODDJOB_RABBITMQ_URL").context("ODDJOB_RABBITMQ_URL")?;
        let mut config = Config::new(rabbitmq_url);

        if let Some(ttl) = optional_var("ODDJOB_QUEUE_TTL")? {
            config.queue_ttl = parse_queue_ttl(&ttl).context("ODDJOB_QUEUE_TTL")?;
        }
        config.result_url_base = optional_var("ODDJOB_RESULT_URL_BASE")?;

        Ok(config)
    }

    /// Set the lifetime of unused result queues
    pub fn queue_ttl(mut self, queue_ttl: Duration) -> Self {
        self.queue_ttl = queue_ttl;
        self
    }

    /// Set the base URL for result URLs
    pub fn result_url_base<S: Into<String>>(mut self, result_url_base: S) -> Self {
        self.result_url_base = Some(result_url_base.into());
        self
    }

    /// Set the retry policy for broker connections
    pub fn retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }
}

/// Read an environment variable, treating an unset or empty variable as None.
fn optional_var(name: &str) -> Result<Option<String>, Error> {
    match env::var(name) {
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(anyhow!(
            "Cannot read environment variable '{}': {}",
            name,
            err
        )),
        Ok(v) if v.is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
    }
}

/// Parse a queue TTL given in whole seconds.
fn parse_queue_ttl(value: &str) -> Result<Duration, Error> {
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid queue TTL {:?}", value))?;
    if secs == 0 {
        bail!("queue TTL must be at least one second");
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new("amqp://localhost:5672/%2f");
        assert_eq!(config.rabbitmq_url, "amqp://localhost:5672/%2f");
        assert_eq!(config.queue_ttl, Duration::from_secs(300));
        assert_eq!(config.result_url_base, None);
        assert_eq!(config.retry.retries, Retry::default().retries);
    }

    #[test]
    fn builder() {
        let config = Config::new("amqp://rabbit")
            .queue_ttl(Duration::from_secs(600))
            .result_url_base("https://app.example.com/oddjob")
            .retry(Retry::none());
        assert_eq!(config.queue_ttl, Duration::from_secs(600));
        assert_eq!(
            config.result_url_base.as_deref(),
            Some("https://app.example.com/oddjob")
        );
        assert_eq!(config.retry.retries, 0);
    }

    #[test]
    fn parse_ttl() {
        assert_eq!(parse_queue_ttl("600").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_queue_ttl(" 1\n").unwrap(), Duration::from_secs(1));
        assert!(parse_queue_ttl("0").is_err());
        assert!(parse_queue_ttl("-5").is_err());
        assert!(parse_queue_ttl("5m").is_err());
    }
}
