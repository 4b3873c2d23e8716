//! Feedhub demo driver
//!
//! Runs a scripted multi-strategy session against simulated exchanges and
//! prints the coordinator's statistics along the way.

use feedhub_core::{Channel, DeliveryMode};
use feedhub_services::{
    CoordinatorConfig, CoordinatorError, SharedBinding, SimulatedBinding, SubscriptionCoordinator,
};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Simulated round-trip time of every exchange call
const SIMULATED_LATENCY: Duration = Duration::from_millis(25);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,feedhub_services=debug")),
        )
        .init();

    let config = CoordinatorConfig::from_env()?;
    info!(
        "Starting Feedhub coordinator (mode conflicts: {}, unbind retries: {})",
        config.mode_conflict_policy, config.retry.max_retries
    );
    let coordinator = SubscriptionCoordinator::new(config);

    // Log lifecycle events in background
    let mut events = coordinator.subscribe_events();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => info!("[Events] {}", line),
                Err(e) => warn!("[Events] Failed to serialize event: {}", e),
            }
        }
    });

    let binance = SimulatedBinding::shared("binance");
    let bybit = SimulatedBinding::shared("bybit");
    binance.set_latency(SIMULATED_LATENCY);
    bybit.set_latency(SIMULATED_LATENCY);
    let binance_feed: SharedBinding = binance.clone();
    let bybit_feed: SharedBinding = bybit.clone();

    // Two strategies share the BTC ticker; only one bind goes out
    let ticker = |strategy: &'static str| {
        coordinator.subscribe(
            strategy,
            &binance_feed,
            "BTC/USDT",
            Channel::Ticker,
            None,
            DeliveryMode::Websocket,
        )
    };
    let (momentum, arbitrage) = tokio::join!(ticker("momentum"), ticker("arbitrage"));
    momentum?;
    arbitrage?;

    coordinator
        .subscribe(
            "momentum",
            &binance_feed,
            "BTC/USDT",
            Channel::Klines,
            Some(&json!({ "interval": "1m" })),
            DeliveryMode::Websocket,
        )
        .await?;
    coordinator
        .subscribe(
            "arbitrage",
            &bybit_feed,
            "BTCUSDT",
            Channel::OrderBook,
            Some(&json!({ "depth": 50 })),
            DeliveryMode::Websocket,
        )
        .await?;
    coordinator
        .subscribe("funding", &bybit_feed, "BTCUSDT", Channel::FundingRate, None, DeliveryMode::Rest)
        .await?;

    // Joining with another delivery mode keeps the existing feed's mode
    match coordinator
        .subscribe("funding", &binance_feed, "BTC/USDT", Channel::Ticker, None, DeliveryMode::Rest)
        .await
    {
        Ok(handle) => info!("funding joined {} via {}", handle.key, handle.mode),
        Err(CoordinatorError::ModeConflict { key, .. }) => warn!("funding refused on {}", key),
        Err(e) => return Err(e.into()),
    }

    print_stats(&coordinator, "after subscribing")?;

    coordinator
        .unsubscribe("momentum", &binance_feed, "BTC/USDT", Channel::Ticker, None)
        .await?;
    coordinator.release_strategy("arbitrage").await?;
    print_stats(&coordinator, "after momentum left the ticker and arbitrage stopped")?;

    // Make one teardown fail to show stuck cleanups
    bybit.fail_next_unbinds(1);
    match coordinator.clear().await {
        Ok(()) => info!("All feeds closed"),
        Err(CoordinatorError::Clear { failures }) => {
            for failure in &failures {
                warn!("Cleanup pending for {}: {}", failure.key, failure.error);
            }
        }
        Err(e) => return Err(e.into()),
    }
    print_stats(&coordinator, "after clear")?;

    let recovered = coordinator.retry_failed_cleanups().await;
    info!("Recovered {} stuck cleanup(s)", recovered);
    print_stats(&coordinator, "after retrying cleanups")?;

    info!(
        "Exchange calls: binance {} bind / {} unbind, bybit {} bind / {} unbind",
        binance.bind_calls(),
        binance.unbind_calls(),
        bybit.bind_calls(),
        bybit.unbind_calls()
    );

    drop(coordinator);
    event_logger.abort();
    Ok(())
}

fn print_stats(coordinator: &SubscriptionCoordinator, label: &str) -> anyhow::Result<()> {
    let stats = serde_json::to_string_pretty(&coordinator.stats())?;
    println!("--- {} ---\n{}", label, stats);
    Ok(())
}
