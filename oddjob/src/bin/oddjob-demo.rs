//! Launch a small job through a real RabbitMQ server and poll for its result.
//!
//! Configuration comes from the environment (`ODDJOB_RABBITMQ_URL` and friends).

use anyhow::{bail, Result};
use clap::Parser;
use oddjob::{BlockingJob, Config, Oddjob, ResultExchange, Retrieval};
use serde_json::json;
use slog::{info, o, Drain, Logger};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "oddjob-demo")]
#[command(about = "Add two numbers in the background and fetch the result by token")]
struct Cli {
    x: i64,
    y: i64,
    /// Seconds the job sleeps before answering
    #[arg(long, default_value_t = 0)]
    sleep: u64,
    /// Identity that launches the job
    #[arg(long)]
    user: Option<String>,
    /// Identity that fetches the result (defaults to --user)
    #[arg(long)]
    fetch_as: Option<String>,
    /// Allow anyone to fetch the result
    #[arg(long)]
    public: bool,
    /// Give up after this many polls
    #[arg(long, default_value_t = 30)]
    polls: u32,
}

fn logger() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stderr());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(drain, o!("app" => "oddjob-demo"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let logger = logger();
    let exchange = ResultExchange::from_config(&Config::from_env()?, logger.clone());

    let sleep = cli.sleep;
    let add = Oddjob::new(BlockingJob::new(move |(x, y): (i64, i64)| {
        std::thread::sleep(Duration::from_secs(sleep));
        Ok(json!({"x": x, "y": y, "sum": x + y}))
    }));

    let launched = add
        .run_async(&exchange, (cli.x, cli.y), cli.user.as_deref(), cli.public)
        .await?;
    info!(logger, "launched job"; "token" => &launched.token);
    if let Some(url) = &launched.url {
        println!("{}", url);
    }

    let fetch_as = cli.fetch_as.as_deref().or_else(|| cli.user.as_deref());
    for _ in 0..cli.polls {
        match exchange.retrieve(&launched.token, fetch_as).await? {
            Retrieval::Ready(result) => {
                println!("{}", result);
                return Ok(());
            }
            Retrieval::Pending => tokio::time::sleep(Duration::from_secs(1)).await,
            Retrieval::Forbidden => bail!("result belongs to another user"),
            Retrieval::Invalid => bail!("result token is no longer valid"),
        }
    }
    bail!("no result after {} polls", cli.polls)
}
