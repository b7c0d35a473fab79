//! Gem scout entry point.
//!
//! Loads configuration, establishes the participant session, and either
//! answers a one-shot command (`--leaderboard`, `--found`) or replays a walk
//! through the geofence driver until the track ends or a shutdown signal
//! arrives.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::{anyhow, Context, Result};
use gem_engine::{
    nearest_locked, Coordinate, GemError, GeofenceDriver, HttpGemService, JsonFileStore,
    KeyValueStore, LocationWatcher, NoLocation, ReplaySource, Session, UnlockCoordinator,
    UnlockEvent, UnlockOutcome,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::cli::CliArgs;
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Configuration comes first so logging can honor it
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .with_context(|| format!("Failed to load {}", args.config_path.display()))?;
    apply_overrides(&mut config, &args);
    config
        .validate()
        .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

    logging::setup_logging(&config.logging)?;

    let store: Arc<dyn KeyValueStore> = Arc::new(
        JsonFileStore::open(config.session.store_path.clone())
            .await
            .context("Failed to open session store")?,
    );
    let session = match &args.participant {
        Some(id) => Session::with_participant(id.clone(), store).await?,
        None => Session::establish(store).await?,
    };

    let service = Arc::new(HttpGemService::new(config.to_service_config())?);
    let coordinator = Arc::new(UnlockCoordinator::with_config(
        session,
        service,
        config.to_coordinator_config(),
    ));

    info!(
        "🚀 Gem Scout v{} | participant {} | service {}",
        env!("CARGO_PKG_VERSION"),
        coordinator.participant_id(),
        config.service.base_url
    );

    // An unreachable service still lets the walk start with no gems
    if let Err(e) = coordinator.load().await {
        warn!("⚠️ Could not load gems: {}", e);
    }

    if args.leaderboard {
        print_leaderboard(&coordinator).await;
        return Ok(());
    }

    if let Some(gem_id) = &args.found {
        claim(&coordinator, gem_id).await;
        return Ok(());
    }

    explore(&config, coordinator).await
}

fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(track) = &args.track {
        config.location.track_file = Some(track.to_string_lossy().to_string());
    }

    if let Some(base_url) = &args.base_url {
        config.service.base_url = base_url.clone();
    }

    if let Some(log_level) = &args.log_level {
        config.logging.level = log_level.clone();
    }

    if args.json_logs {
        config.logging.json_format = true;
    }
}

async fn print_leaderboard(coordinator: &UnlockCoordinator) {
    let leaderboard = coordinator.leaderboard().await;
    if leaderboard.is_empty() {
        println!("No one has found a gem yet.");
        return;
    }

    println!("🏆 Leaderboard");
    for (rank, entry) in leaderboard.iter().enumerate() {
        let name = entry.name.as_deref().unwrap_or(&entry.participant_id);
        let marker = if entry.participant_id == coordinator.participant_id() {
            " (you)"
        } else {
            ""
        };
        println!("{:>3}. {:<24} {:>4}{}", rank + 1, name, entry.count, marker);
    }
}

/// Manual "I found it" claim. Failures are reported to the participant
/// instead of being retried.
async fn claim(coordinator: &UnlockCoordinator, gem_id: &str) {
    match coordinator.force_unlock(gem_id).await {
        Ok(UnlockOutcome::Unlocked {
            target,
            badges_awarded,
            target_id,
        }) => {
            let name = target.map(|t| t.name).unwrap_or(target_id);
            println!("🎉 You found {}!", name);
            for badge in badges_awarded {
                println!("🏅 New badge: {}", badge);
            }
        }
        Ok(UnlockOutcome::Reconfirmed { .. }) | Ok(UnlockOutcome::AlreadyUnlocked) => {
            println!("You already found {}.", gem_id);
        }
        Ok(UnlockOutcome::InFlight) => println!("Still checking {}...", gem_id),
        Err(GemError::NoTargetNearby) => println!("No hidden gem nearby."),
        Err(GemError::UnknownTarget(id)) => println!("There is no gem called {}.", id),
        Err(e) => println!("Could not unlock {}: {}", gem_id, e),
    }
}

async fn explore(config: &AppConfig, coordinator: Arc<UnlockCoordinator>) -> Result<()> {
    let watcher = match config.track_path() {
        Some(path) => {
            let replay = ReplaySource::from_json_file(&path, config.replay_interval())
                .await
                .with_context(|| format!("Failed to load track {}", path.display()))?;
            LocationWatcher::new(Arc::new(replay))
        }
        None => LocationWatcher::new(Arc::new(NoLocation)),
    };

    match watcher.current_position(config.to_watch_options()).await {
        Ok(start) => log_nearest(&coordinator, &start).await,
        Err(e) => warn!("⚠️ Proximity checks disabled: {}", e),
    }

    let mut events = coordinator.subscribe();
    let notifier = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(UnlockEvent::Unlocked {
                    target_id,
                    target,
                    badges_awarded,
                }) => {
                    let name = target.map(|t| t.name).unwrap_or(target_id);
                    println!("🎉 You found {}!", name);
                    for badge in badges_awarded {
                        println!("🏅 New badge: {}", badge);
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Missed {} unlock notifications", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let subscription = watcher.subscribe(config.to_watch_options());
    let handle = subscription.handle();
    let shutdown = tokio::spawn(async move {
        match signals::wait_for_shutdown().await {
            Ok(()) => {
                info!("🛑 Shutdown signal received, finishing in-flight unlocks...");
                handle.stop();
            }
            Err(e) => error!("❌ Signal handling unavailable: {}", e),
        }
    });

    let driver = GeofenceDriver::new(coordinator.clone()).with_catalog_retry(config.catalog_retry());
    let stats = driver.run(subscription).await;
    shutdown.abort();

    let progress = coordinator.snapshot().await;
    let total = coordinator.targets().await.len();

    // Dropping the last coordinator handle closes the event channel
    drop(driver);
    drop(coordinator);
    if let Err(e) = notifier.await {
        warn!("Notification task ended abnormally: {}", e);
    }

    info!(
        "✅ Walk complete: {} location updates, {}/{} gems found, {} badges",
        stats.ticks,
        progress.unlocked.len(),
        total,
        progress.badges.len()
    );
    Ok(())
}

async fn log_nearest(coordinator: &UnlockCoordinator, from: &Coordinate) {
    let targets = coordinator.targets().await;
    let unlocked: HashSet<_> = coordinator.unlocked_ids().into_iter().collect();
    if let Some((target, distance)) = nearest_locked(from, &targets, &unlocked) {
        if target.hint.is_empty() {
            info!("🧭 Closest gem is {:.0} m away", distance);
        } else {
            info!("🧭 Closest gem is {:.0} m away. Hint: {}", distance, target.hint);
        }
    }
}
