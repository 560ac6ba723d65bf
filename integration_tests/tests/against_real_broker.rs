use anyhow::Result;
use async_trait::async_trait;
use oddjob::broker::{AmqpProvider, ChannelProvider, ProviderError};
use oddjob::job::Job;
use oddjob::testing::test_logger;
use oddjob::{token, Config, Error, Oddjob, ResultExchange, Retrieval, Retry};
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

/// Return the broker configuration, or None if the test should be skipped, or panic if
/// NO_TEST_SKIP is set and ODDJOB_RABBITMQ_URL is not.
fn get_config() -> Option<Config> {
    match env::var("ODDJOB_RABBITMQ_URL") {
        Ok(_) => Some(Config::from_env().unwrap()),
        Err(_) => match env::var("NO_TEST_SKIP") {
            Ok(_) => panic!("NO_TEST_SKIP is set but ODDJOB_RABBITMQ_URL is not!"),
            Err(_) => None,
        },
    }
}

fn exchange(config: &Config) -> ResultExchange {
    ResultExchange::from_config(config, test_logger())
}

/// Issue a token, fetch before publishing, then publish publicly and fetch exactly once
#[tokio::test]
async fn test_public_result() -> Result<()> {
    if let Some(config) = get_config() {
        let exchange = exchange(&config);
        let token = exchange.issue_token().await?;
        assert_eq!(exchange.fetch(&token, None).await?, None);

        exchange
            .publish(&token, json!({"some": "data"}), Some("user1"), true)
            .await?;
        assert_eq!(
            exchange.fetch(&token, Some("user2")).await?,
            Some(json!({"some": "data"}))
        );
        assert!(matches!(
            exchange.fetch(&token, Some("user2")).await,
            Err(Error::InvalidToken)
        ));
    }
    Ok(())
}

/// A forbidden fetch leaves the result for its owner
#[tokio::test]
async fn test_private_result() -> Result<()> {
    if let Some(config) = get_config() {
        let exchange = exchange(&config);
        let token = exchange.issue_token().await?;
        let result = json!({"x": 1, "y": 2, "sum": 3});
        exchange
            .publish(&token, result.clone(), Some("alice"), false)
            .await?;

        assert!(matches!(
            exchange.fetch(&token, Some("bob")).await,
            Err(Error::Authorization)
        ));
        assert!(matches!(
            exchange.fetch(&token, None).await,
            Err(Error::Authorization)
        ));

        // the requeued message may take a moment to become deliverable again
        let mut fetched = None;
        for _ in 0..20 {
            fetched = exchange.fetch(&token, Some("alice")).await?;
            if fetched.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(fetched, Some(result));

        assert!(matches!(
            exchange.fetch(&token, Some("alice")).await,
            Err(Error::InvalidToken)
        ));
    }
    Ok(())
}

/// Malformed tokens and tokens for queues that never existed are both invalid
#[tokio::test]
async fn test_invalid_tokens() -> Result<()> {
    if let Some(config) = get_config() {
        let exchange = exchange(&config);
        assert_eq!(
            exchange.retrieve("non_existent", None).await?,
            Retrieval::Invalid
        );
        let unknown = token::encode("amq.gen-non_existent");
        assert_eq!(exchange.retrieve(&unknown, None).await?, Retrieval::Invalid);
    }
    Ok(())
}

/// An unused queue expires with its TTL
#[tokio::test]
async fn test_token_expiry() -> Result<()> {
    if let Some(config) = get_config() {
        let exchange = exchange(&config.queue_ttl(Duration::from_secs(1)));
        let token = exchange.issue_token().await?;

        // RabbitMQ checks expiry lazily, so allow a little slack
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(matches!(
            exchange.fetch(&token, None).await,
            Err(Error::InvalidToken)
        ));
        assert!(matches!(
            exchange.publish(&token, json!(1), None, true).await,
            Err(Error::Publish(ProviderError::ChannelNotFound(_)))
        ));
    }
    Ok(())
}

/// The provider reports missing queues distinctly
#[tokio::test]
async fn test_provider_not_found() -> Result<()> {
    if let Some(config) = get_config() {
        let provider = AmqpProvider::new(&config.rabbitmq_url, Retry::none(), test_logger());
        let missing = "amq.gen-does-not-exist";
        assert!(matches!(
            provider.fetch_one(missing).await,
            Err(ProviderError::ChannelNotFound(_))
        ));
        assert!(matches!(
            provider.publish(missing, b"{}").await,
            Err(ProviderError::ChannelNotFound(_))
        ));
        provider.delete_channel(missing).await?;
    }
    Ok(())
}

/// An unreachable broker fails token issuance
#[tokio::test]
async fn test_unreachable_broker() -> Result<()> {
    if get_config().is_some() {
        let config = Config::new("amqp://127.0.0.1:1/%2f").retry(Retry::none());
        assert!(matches!(
            exchange(&config).issue_token().await,
            Err(Error::TokenIssuance(ProviderError::ChannelCreation(_)))
        ));
    }
    Ok(())
}

struct Add;

#[async_trait]
impl Job for Add {
    type Args = (i64, i64, u64);

    async fn run(&self, (x, y, sleep): Self::Args) -> Result<Value> {
        tokio::time::sleep(Duration::from_secs(sleep)).await;
        Ok(json!({"x": x, "y": y, "sum": x + y}))
    }
}

/// Run a job in the background and retrieve its result by URL token
#[tokio::test]
async fn test_run_async() -> Result<()> {
    if let Some(config) = get_config() {
        let exchange = exchange(&config.result_url_base("http://testserver/oddjob"));
        let launched = Oddjob::new(Add)
            .run_async(&exchange, (1, 2, 1), Some("user1"), false)
            .await?;
        assert!(launched
            .url
            .as_deref()
            .unwrap()
            .starts_with("http://testserver/oddjob/result/"));

        assert_eq!(
            exchange.retrieve(&launched.token, Some("user1")).await?,
            Retrieval::Pending
        );

        launched.handle.await?;
        assert_eq!(
            exchange.retrieve(&launched.token, Some("user1")).await?,
            Retrieval::Ready(json!({"x": 1, "y": 2, "sum": 3}))
        );
    }
    Ok(())
}
