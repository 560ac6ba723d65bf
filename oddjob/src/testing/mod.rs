/*! This module contains support for testing code that uses oddjob, without a running broker.

## Example

```rust
use oddjob::testing::{test_logger, MemoryBroker};
use oddjob::{Error, ResultExchange};
use serde_json::json;

#[tokio::main] // or #[tokio::test] for a test case
async fn main() {
    let broker = MemoryBroker::new();
    let exchange = ResultExchange::new(broker.as_provider(), test_logger());

    let token = exchange.issue_token().await.unwrap();
    assert_eq!(exchange.fetch(&token, Some("alice")).await.unwrap(), None);

    exchange
        .publish(&token, json!({"sum": 3}), Some("alice"), false)
        .await
        .unwrap();
    assert!(matches!(
        exchange.fetch(&token, Some("bob")).await,
        Err(Error::Authorization)
    ));
    assert_eq!(
        exchange.fetch(&token, Some("alice")).await.unwrap(),
        Some(json!({"sum": 3}))
    );
}
```
*/

mod broker;
mod logger;

pub use broker::MemoryBroker;
pub use logger::test_logger;
