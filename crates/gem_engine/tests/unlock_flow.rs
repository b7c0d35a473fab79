//! End-to-end unlock scenarios: location feed → driver → coordinator → service.

use async_trait::async_trait;
use gem_engine::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;

type UnlockScript = Box<dyn Fn(usize, Coordinate) -> GemResult<UnlockReceipt> + Send + Sync>;

/// Gem service whose unlock answers come from a closure indexed by call number.
/// Call `n` waits on `gates[n]` when that gate exists.
struct ScriptedService {
    gems: Vec<Target>,
    catalog_failures: AtomicUsize,
    unlock_calls: AtomicUsize,
    coords_seen: Mutex<Vec<Coordinate>>,
    gates: Vec<Arc<Notify>>,
    script: UnlockScript,
}

impl ScriptedService {
    fn new(gems: Vec<Target>, script: UnlockScript) -> Self {
        Self {
            gems,
            catalog_failures: AtomicUsize::new(0),
            unlock_calls: AtomicUsize::new(0),
            coords_seen: Mutex::new(Vec::new()),
            gates: Vec::new(),
            script,
        }
    }

    fn calls(&self) -> usize {
        self.unlock_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GemService for ScriptedService {
    async fn fetch_catalog(&self, _participant_id: &str) -> GemResult<CatalogSnapshot> {
        let remaining = self.catalog_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.catalog_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(GemError::Network("service unreachable".into()));
        }
        Ok(CatalogSnapshot {
            gems: self.gems.clone(),
            unlocked: Vec::new(),
            badges: Vec::new(),
        })
    }

    async fn fetch_leaderboard(&self) -> GemResult<Vec<LeaderboardEntry>> {
        Ok(Vec::new())
    }

    async fn unlock(&self, _participant_id: &str, coords: Coordinate) -> GemResult<UnlockReceipt> {
        let call = self.unlock_calls.fetch_add(1, Ordering::SeqCst);
        self.coords_seen.lock().unwrap().push(coords);
        if let Some(gate) = self.gates.get(call) {
            gate.notified().await;
        }
        (self.script)(call, coords)
    }
}

fn gem(id: &str, lat: f64, lng: f64, radius_m: f64) -> Target {
    Target {
        id: id.to_string(),
        name: format!("Gem {id}"),
        location: Coordinate::new(lat, lng),
        radius_m,
        hint: String::new(),
        badge: None,
    }
}

fn receipt(gem_id: Option<&Target>, unlocked: &[&str], badges: &[&str], already: bool) -> UnlockReceipt {
    UnlockReceipt {
        gem: gem_id.cloned(),
        unlocked_ids: unlocked.iter().map(|s| s.to_string()).collect(),
        badges: badges.iter().map(|s| s.to_string()).collect(),
        leaderboard: None,
        already_unlocked: already,
    }
}

async fn session() -> Session {
    Session::with_participant("walker", Arc::new(MemoryStore::new()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_single_gem_unlock_scenario() {
    let a = gem("A", 10.000, 20.000, 20.0);
    let service = Arc::new(ScriptedService::new(
        vec![a.clone()],
        Box::new(|_, _| Ok(receipt(None, &["A"], &["Explorer"], false))),
    ));
    let coordinator = UnlockCoordinator::new(session().await, service.clone());
    coordinator.load().await.unwrap();
    let mut events = coordinator.subscribe();

    let here = Coordinate::new(10.00005, 20.00005);
    let targets = coordinator.targets().await;
    let in_range = find_in_range(&here, &targets, &Default::default());
    assert_eq!(in_range.len(), 1);
    assert_eq!(in_range[0].id, "A");

    let results = coordinator.evaluate_and_unlock(here).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].1.as_ref().unwrap().is_new());

    assert_eq!(service.calls(), 1);
    assert_eq!(coordinator.unlocked_ids(), vec!["A".to_string()]);
    assert_eq!(coordinator.badges().await, vec!["Explorer".to_string()]);

    match events.try_recv().unwrap() {
        UnlockEvent::Unlocked { target_id, target, badges_awarded } => {
            assert_eq!(target_id, "A");
            assert_eq!(target.unwrap().name, "Gem A");
            assert_eq!(badges_awarded, vec!["Explorer".to_string()]);
        }
    }
    assert!(events.try_recv().is_err());

    // Standing still produces no further calls or events
    assert!(coordinator.evaluate_and_unlock(here).await.is_empty());
    assert_eq!(service.calls(), 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_one_failure_does_not_block_sibling() {
    let a = gem("A", 0.0, 0.0, 50.0);
    let b = gem("B", 0.0, 0.0001, 50.0);
    let b_for_script = b.clone();
    let service = Arc::new(ScriptedService::new(
        vec![a, b],
        Box::new(move |call, _| match call {
            0 => Err(GemError::Network("connection reset".into())),
            _ => Ok(receipt(Some(&b_for_script), &["B"], &[], false)),
        }),
    ));
    let coordinator = UnlockCoordinator::new(session().await, service.clone());
    coordinator.load().await.unwrap();

    let results = coordinator
        .evaluate_and_unlock(Coordinate::new(0.0, 0.00005))
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "A");
    assert!(results[0].1.is_err());
    assert!(results[1].1.as_ref().unwrap().is_new());

    assert_eq!(coordinator.unlocked_ids(), vec!["B".to_string()]);
    assert_eq!(coordinator.phase("A"), UnlockPhase::Locked);
    assert_eq!(coordinator.phase("B"), UnlockPhase::Unlocked);
}

#[tokio::test]
async fn test_failed_gem_is_retried_on_next_tick() {
    let a = gem("A", 0.0, 0.0, 50.0);
    let a_for_script = a.clone();
    let service = Arc::new(ScriptedService::new(
        vec![a],
        Box::new(move |call, _| match call {
            0 => Err(GemError::Timeout(Duration::from_secs(15))),
            _ => Ok(receipt(Some(&a_for_script), &["A"], &["Explorer"], false)),
        }),
    ));
    let coordinator = UnlockCoordinator::new(session().await, service.clone());
    coordinator.load().await.unwrap();
    let here = Coordinate::new(0.0, 0.0);

    let first = coordinator.evaluate_and_unlock(here).await;
    assert!(first[0].1.is_err());
    assert!(coordinator.badges().await.is_empty());

    let second = coordinator.evaluate_and_unlock(here).await;
    assert!(second[0].1.as_ref().unwrap().is_new());
    assert_eq!(service.calls(), 2);
}

#[tokio::test]
async fn test_unlocks_are_never_removed() {
    let a = gem("A", 0.0, 0.0, 50.0);
    let b = gem("B", 5.0, 5.0, 50.0);
    let (a2, b2) = (a.clone(), b.clone());
    let service = Arc::new(ScriptedService::new(
        vec![a, b],
        Box::new(move |call, _| match call {
            0 => Ok(receipt(Some(&a2), &["A"], &["First"], false)),
            // A stale snapshot that no longer lists A
            _ => Ok(receipt(Some(&b2), &["B"], &[], false)),
        }),
    ));
    let coordinator = UnlockCoordinator::new(session().await, service);
    coordinator.load().await.unwrap();

    coordinator.force_unlock("A").await.unwrap();
    coordinator.force_unlock("B").await.unwrap();
    coordinator.load().await.unwrap();

    assert_eq!(coordinator.unlocked_ids(), vec!["A".to_string(), "B".to_string()]);
    assert_eq!(coordinator.badges().await, vec!["First".to_string()]);
}

fn standings(name: &str, count: u32) -> Vec<LeaderboardEntry> {
    vec![LeaderboardEntry {
        participant_id: "walker".to_string(),
        name: Some(name.to_string()),
        count,
    }]
}

#[tokio::test]
async fn test_leaderboard_follows_last_arriving_receipt() {
    let a = gem("A", 0.0, 0.0, 50.0);
    let b = gem("B", 5.0, 5.0, 50.0);
    let c = gem("C", 9.0, 9.0, 50.0);
    let (a2, b2, c2) = (a.clone(), b.clone(), c.clone());
    let gates = vec![Arc::new(Notify::new()), Arc::new(Notify::new())];
    let mut service = ScriptedService::new(
        vec![a, b, c],
        Box::new(move |call, _| {
            let (gem, mut receipt) = match call {
                0 => (&a2, receipt(Some(&a2), &["A"], &[], false)),
                1 => (&b2, receipt(Some(&b2), &["A", "B"], &[], false)),
                _ => return Ok(receipt(Some(&c2), &["A", "B", "C"], &[], false)),
            };
            receipt.leaderboard = Some(standings(&format!("after {}", gem.id), call as u32 + 1));
            Ok(receipt)
        }),
    );
    service.gates = gates.clone();
    let service = Arc::new(service);

    let coordinator = Arc::new(UnlockCoordinator::new(session().await, service.clone()));
    coordinator.load().await.unwrap();

    let claim = |id: &'static str| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.force_unlock(id).await })
    };
    let first = claim("A");
    while service.calls() < 1 {
        tokio::task::yield_now().await;
    }
    let second = claim("B");
    while service.calls() < 2 {
        tokio::task::yield_now().await;
    }

    // The later request answers first
    gates[1].notify_one();
    assert!(second.await.unwrap().unwrap().is_new());
    assert_eq!(coordinator.leaderboard().await, standings("after B", 2));

    gates[0].notify_one();
    assert!(first.await.unwrap().unwrap().is_new());
    assert_eq!(coordinator.leaderboard().await, standings("after A", 1));

    // A receipt without standings keeps the current ones
    assert!(coordinator.force_unlock("C").await.unwrap().is_new());
    assert_eq!(coordinator.leaderboard().await, standings("after A", 1));
    assert_eq!(
        coordinator.unlocked_ids(),
        vec!["A".to_string(), "B".to_string(), "C".to_string()]
    );
}

#[tokio::test]
async fn test_proximity_sends_participant_position_and_force_sends_gem_position() {
    let a = gem("A", 1.0, 1.0, 100.0);
    let b = gem("B", 2.0, 2.0, 100.0);
    let service = Arc::new(ScriptedService::new(
        vec![a, b],
        Box::new(|_, _| Err(GemError::NoTargetNearby)),
    ));
    let coordinator = UnlockCoordinator::new(session().await, service.clone());
    coordinator.load().await.unwrap();

    let near_a = Coordinate::new(1.0002, 1.0002);
    coordinator.evaluate_and_unlock(near_a).await;
    let err = coordinator.force_unlock("B").await.unwrap_err();
    assert!(matches!(err, GemError::NoTargetNearby));

    let seen = service.coords_seen.lock().unwrap().clone();
    assert_eq!(seen, vec![near_a, Coordinate::new(2.0, 2.0)]);
}

#[tokio::test]
async fn test_stopping_watcher_lets_in_flight_unlock_finish() {
    let a = gem("A", 0.0, 0.0, 50.0);
    let a_for_script = a.clone();
    let gate = Arc::new(Notify::new());
    let mut service = ScriptedService::new(
        vec![a],
        Box::new(move |_, _| Ok(receipt(Some(&a_for_script), &["A"], &[], false))),
    );
    service.gates = vec![gate.clone()];
    let service = Arc::new(service);

    let coordinator = Arc::new(UnlockCoordinator::new(session().await, service.clone()));
    coordinator.load().await.unwrap();

    let (source, feed) = ChannelSource::new();
    let watcher = LocationWatcher::new(Arc::new(source));
    let subscription = watcher.subscribe(WatchOptions {
        timeout: Duration::ZERO,
        ..Default::default()
    });
    let handle = subscription.handle();

    let driver = GeofenceDriver::new(coordinator.clone());
    let run = tokio::spawn(async move { driver.run(subscription).await });

    feed.push(Coordinate::new(0.0, 0.0));
    while service.calls() == 0 {
        tokio::task::yield_now().await;
    }

    watcher.stop_watching(&handle);
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!run.is_finished());
    assert_eq!(coordinator.phase("A"), UnlockPhase::Pending);

    gate.notify_one();
    let stats = timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
    assert_eq!(stats.ticks, 1);
    assert_eq!(stats.unlocked, 1);
    assert_eq!(coordinator.phase("A"), UnlockPhase::Unlocked);
}

#[tokio::test(start_paused = true)]
async fn test_driver_retries_empty_catalog() {
    let a = gem("A", 0.0, 0.0, 50.0);
    let a_for_script = a.clone();
    let service = Arc::new(ScriptedService::new(
        vec![a],
        Box::new(move |_, _| Ok(receipt(Some(&a_for_script), &["A"], &[], false))),
    ));
    service.catalog_failures.store(2, Ordering::SeqCst);

    let coordinator = Arc::new(UnlockCoordinator::new(session().await, service.clone()));
    assert!(coordinator.load().await.is_err());
    assert!(coordinator.targets().await.is_empty());

    let (source, feed) = ChannelSource::new();
    let watcher = LocationWatcher::new(Arc::new(source));
    let subscription = watcher.subscribe(WatchOptions {
        timeout: Duration::ZERO,
        ..Default::default()
    });
    let handle = subscription.handle();

    let driver = GeofenceDriver::new(coordinator.clone()).with_catalog_retry(Duration::from_secs(30));
    let run = tokio::spawn(async move { driver.run(subscription).await });

    while coordinator.targets().await.is_empty() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    feed.push(Coordinate::new(0.0, 0.0));
    while coordinator.phase("A") != UnlockPhase::Unlocked {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.stop();

    let stats = run.await.unwrap();
    assert_eq!(stats.unlocked, 1);
    assert_eq!(service.calls(), 1);
}

#[tokio::test]
async fn test_driver_without_location_source_ends_quietly() {
    let service = Arc::new(ScriptedService::new(
        Vec::new(),
        Box::new(|_, _| Err(GemError::NoTargetNearby)),
    ));
    let coordinator = Arc::new(UnlockCoordinator::new(session().await, service.clone()));

    let watcher = LocationWatcher::new(Arc::new(NoLocation));
    let stats = GeofenceDriver::new(coordinator)
        .run(watcher.subscribe(WatchOptions::default()))
        .await;

    assert_eq!(stats, DriverStats::default());
    assert_eq!(service.calls(), 0);
}
