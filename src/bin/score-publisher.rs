//! Registers one player and publishes scores, either typed on stdin or generated.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leaderboard_watch::{
    config::AppConfig, coord::CoordinationClient, services::publisher::ScorePublisher,
};

/// Spread applied around the requested delay and score in automated mode.
const JITTER: i64 = 1000;

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish leaderboard scores for one player", long_about = None)]
struct Args {
    /// Player name, registered under the leaderboard root
    player: String,

    /// Coordination service address; overrides the configuration file
    #[arg(long)]
    endpoint: Option<String>,

    /// Leaderboard root; overrides the configuration file
    #[arg(long)]
    root: Option<String>,

    /// Post this many generated scores instead of reading them from stdin
    #[arg(long)]
    count: Option<u32>,

    /// Mean delay between generated scores, in milliseconds
    #[arg(long, default_value = "1000")]
    delay_ms: u64,

    /// Mean generated score
    #[arg(long, default_value = "500", value_parser = clap::value_parser!(i64).range(0..))]
    mean_score: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = AppConfig::load().context("loading configuration")?;
    let endpoint = args.endpoint.clone().unwrap_or(config.endpoint);
    let root = args.root.clone().unwrap_or(config.root_path);

    let client = connect(&endpoint).await?;
    let publisher = ScorePublisher::register(client, &root, &args.player)
        .await
        .with_context(|| format!("registering player `{}`", args.player))?;

    let result = match args.count {
        Some(count) => automate(&publisher, count, args.delay_ms, args.mean_score).await,
        None => interactive(&publisher).await,
    };
    publisher.leave().await;
    result
}

#[cfg(feature = "zookeeper-store")]
async fn connect(endpoint: &str) -> anyhow::Result<Arc<dyn CoordinationClient>> {
    let client = leaderboard_watch::coord::zookeeper::connect(endpoint)
        .await
        .with_context(|| format!("connecting to {endpoint}"))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "zookeeper-store"))]
async fn connect(endpoint: &str) -> anyhow::Result<Arc<dyn CoordinationClient>> {
    anyhow::bail!("no coordination backend compiled in; cannot reach {endpoint}")
}

/// Read one score per line until stdin closes.
async fn interactive(publisher: &ScorePublisher) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("Enter score: ");
        let Some(line) = lines.next_line().await.context("reading stdin")? else {
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<i64>() {
            Ok(score) => match publisher.publish(score).await {
                Ok(record) => println!("Posted {} at {}", record.score, record.timestamp),
                Err(err) => eprintln!("{err}"),
            },
            Err(_) => eprintln!("`{line}` is not a score"),
        }
    }
}

/// Post `count` scores around `mean_score`, pausing around `delay_ms` after each one.
async fn automate(
    publisher: &ScorePublisher,
    count: u32,
    delay_ms: u64,
    mean_score: i64,
) -> anyhow::Result<()> {
    let mut rng = rand::rng();
    for _ in 0..count {
        let score = jitter(&mut rng, mean_score);
        let delay = jitter(&mut rng, i64::try_from(delay_ms).unwrap_or(i64::MAX));
        println!("Posting score: {score} and waiting(ms) {delay}");
        publisher
            .publish(score)
            .await
            .with_context(|| format!("publishing score for `{}`", publisher.player()))?;
        tokio::time::sleep(Duration::from_millis(delay.unsigned_abs())).await;
    }
    Ok(())
}

/// A strictly positive value within [`JITTER`] of `mean`.
fn jitter(rng: &mut impl Rng, mean: i64) -> i64 {
    loop {
        let value = mean.saturating_add(rng.random_range(-JITTER..=JITTER));
        if value > 0 {
            return value;
        }
    }
}

fn init_tracing() {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
