//! # Geofence Driver
//!
//! Connects a location [`Subscription`] to an [`UnlockCoordinator`]: every
//! coordinate becomes one proximity evaluation running on its own task.
//!
//! Stopping the subscription ends the driver's intake but not the work
//! already started. [`GeofenceDriver::run`] waits for every outstanding
//! evaluation before it returns, because those calls change remote state.
//!
//! When the catalog is empty (the service was unreachable at startup) the
//! driver can optionally re-fetch it on a fixed interval until it succeeds.

use crate::coordinator::{UnlockCoordinator, UnlockOutcome};
use crate::error::GemResult;
use crate::location::Subscription;
use crate::types::TargetId;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Counters collected over one [`GeofenceDriver::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub ticks: u64,
    pub unlocked: u64,
    pub reconfirmed: u64,
    /// Attempts skipped locally (in flight or already unlocked)
    pub skipped: u64,
    pub failures: u64,
    pub location_errors: u64,
}

impl DriverStats {
    fn record(&mut self, joined: Result<Vec<(TargetId, GemResult<UnlockOutcome>)>, JoinError>) {
        let results = match joined {
            Ok(results) => results,
            Err(e) => {
                error!("Proximity evaluation task failed: {}", e);
                self.failures += 1;
                return;
            }
        };

        for (target_id, result) in results {
            match result {
                Ok(UnlockOutcome::Unlocked { .. }) => self.unlocked += 1,
                Ok(UnlockOutcome::Reconfirmed { .. }) => self.reconfirmed += 1,
                Ok(UnlockOutcome::InFlight) | Ok(UnlockOutcome::AlreadyUnlocked) => {
                    self.skipped += 1
                }
                Err(e) => {
                    // Automatic scans stay quiet; the next tick retries.
                    debug!("Will retry {} on a later tick: {}", target_id, e);
                    self.failures += 1;
                }
            }
        }
    }
}

pub struct GeofenceDriver {
    coordinator: Arc<UnlockCoordinator>,
    catalog_retry: Option<Duration>,
}

impl GeofenceDriver {
    pub fn new(coordinator: Arc<UnlockCoordinator>) -> Self {
        Self {
            coordinator,
            catalog_retry: None,
        }
    }

    /// Re-fetch an empty catalog every `interval`.
    pub fn with_catalog_retry(mut self, interval: Duration) -> Self {
        self.catalog_retry = Some(interval).filter(|i| !i.is_zero());
        self
    }

    /// Drives proximity checks from a location stream.
    ///
    /// Every coordinate spawns one [`UnlockCoordinator::evaluate_and_unlock`]
    /// task, so a slow unlock never holds up the next position. Location
    /// errors are counted and logged; the subscription itself ends after one.
    ///
    /// # Arguments
    ///
    /// * `subscription` - Position stream from [`crate::LocationWatcher::subscribe`].
    ///   Stop it through its [`crate::WatchHandle`] to end the run.
    ///
    /// # Returns
    ///
    /// [`DriverStats`] for the whole run, returned only after every
    /// evaluation started before the stream ended has finished.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use gem_engine::*;
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// # async fn walk(coordinator: Arc<UnlockCoordinator>, track: Vec<Coordinate>) {
    /// let watcher = LocationWatcher::new(Arc::new(ReplaySource::new(track, Duration::from_secs(1))));
    /// let stats = GeofenceDriver::new(coordinator)
    ///     .run(watcher.subscribe(WatchOptions::default()))
    ///     .await;
    /// println!("{} new gems over {} updates", stats.unlocked, stats.ticks);
    /// # }
    /// ```
    pub async fn run(&self, mut subscription: Subscription) -> DriverStats {
        let mut stats = DriverStats::default();
        let mut tasks = JoinSet::new();
        let mut retry = self.catalog_retry.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });

        if !subscription.is_supported() {
            info!("Geofence driver idle: no location source");
        }

        loop {
            tokio::select! {
                event = subscription.next() => match event {
                    Some(Ok(coordinate)) => {
                        stats.ticks += 1;
                        let coordinator = self.coordinator.clone();
                        tasks.spawn(async move { coordinator.evaluate_and_unlock(coordinate).await });
                    }
                    Some(Err(e)) => {
                        warn!("Location error, proximity checks paused: {}", e);
                        stats.location_errors += 1;
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => stats.record(joined),
                _ = async {
                    match retry.as_mut() {
                        Some(interval) => { interval.tick().await; }
                        None => futures::future::pending::<()>().await,
                    }
                } => {
                    if self.coordinator.targets().await.is_empty() {
                        match self.coordinator.refresh().await {
                            Ok(count) if count > 0 => {
                                info!("Catalog recovered with {} gems", count);
                                retry = None;
                            }
                            Ok(_) => debug!("Catalog still empty"),
                            Err(e) => debug!("Catalog retry failed: {}", e),
                        }
                    } else {
                        retry = None;
                    }
                }
            }
        }

        if !tasks.is_empty() {
            info!("⏳ Waiting for {} in-flight unlock check(s)", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            stats.record(joined);
        }

        info!(
            "📊 Driver finished: {} ticks, {} unlocked, {} failed",
            stats.ticks, stats.unlocked, stats.failures
        );
        stats
    }
}
