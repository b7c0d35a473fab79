//! # Unlock Coordinator
//!
//! Converts "target in range" observations into server-confirmed unlocks.
//!
//! Each target id moves through `Locked → Pending → Unlocked`. `Pending` lasts
//! exactly as long as one remote unlock call for that id is outstanding, and
//! the check-and-set that enters it happens on a single [`DashMap`] entry
//! before any await, so two overlapping ticks can never both issue a request
//! for the same target. `Unlocked` is terminal and only ever entered from data
//! the gem service returned.
//!
//! ## Merge Rules
//!
//! Responses may arrive in any order:
//!
//! - unlocked ids are unioned into local state, never removed
//! - badges are appended in arrival order, skipping ones already held
//! - the leaderboard is replaced by whichever snapshot arrives last
//!
//! A failed call puts its target back to `Locked` (unless some other response
//! confirmed it meanwhile) and leaves badges and leaderboard alone.

use crate::error::{GemError, GemResult};
use crate::geo::Coordinate;
use crate::proximity::find_in_range;
use crate::service::GemService;
use crate::session::Session;
use crate::types::{Badge, CatalogSnapshot, LeaderboardEntry, Target, TargetId, UnlockReceipt};
use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

// ============================================================================
// State and Outcomes
// ============================================================================

/// Per-target unlock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnlockPhase {
    Locked,
    /// A remote unlock call for this target is outstanding
    Pending,
    /// Confirmed by the gem service. Terminal.
    Unlocked,
}

/// What a single [`UnlockCoordinator::attempt_unlock`] call achieved.
#[derive(Debug, Clone, PartialEq)]
pub enum UnlockOutcome {
    /// This call produced a genuinely new unlock.
    Unlocked {
        target_id: TargetId,
        /// The gem as returned by the service, or the catalog entry
        target: Option<Target>,
        /// Badges this unlock added to the participant's collection
        badges_awarded: Vec<Badge>,
    },
    /// The service already had this unlock on record.
    Reconfirmed { target_id: TargetId },
    /// Another call for this target is still outstanding; nothing was sent.
    InFlight,
    /// Known unlocked locally; nothing was sent.
    AlreadyUnlocked,
}

impl UnlockOutcome {
    /// `true` only for the call that should produce a celebration.
    pub fn is_new(&self) -> bool {
        matches!(self, UnlockOutcome::Unlocked { .. })
    }
}

/// Broadcast to UI subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum UnlockEvent {
    /// Emitted once per genuinely new unlock.
    Unlocked {
        target_id: TargetId,
        target: Option<Target>,
        badges_awarded: Vec<Badge>,
    },
}

/// A read-only copy of the participant's progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    pub unlocked: Vec<TargetId>,
    pub badges: Vec<Badge>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound on one remote unlock call; expiry counts as a network failure
    pub unlock_timeout: Duration,
    /// Buffered [`UnlockEvent`]s per subscriber
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            unlock_timeout: Duration::from_secs(15),
            event_capacity: 64,
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    badges: Vec<Badge>,
    leaderboard: Vec<LeaderboardEntry>,
}

impl Ledger {
    /// Appends unseen badges, returning the ones added.
    fn absorb_badges(&mut self, incoming: &[Badge]) -> Vec<Badge> {
        let mut added = Vec::new();
        for badge in incoming {
            if !self.badges.contains(badge) {
                self.badges.push(badge.clone());
                added.push(badge.clone());
            }
        }
        added
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Releases a `Pending` target when its attempt ends, however it ends.
/// A confirmed target is already `Unlocked` by then and stays that way.
struct PendingGuard<'a> {
    coordinator: &'a UnlockCoordinator,
    target_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release(self.target_id);
    }
}

/// Owns the session's unlock state, badges and leaderboard cache.
///
/// All methods take `&self`; share it behind an `Arc`.
pub struct UnlockCoordinator {
    session: Session,
    service: Arc<dyn GemService>,
    config: CoordinatorConfig,
    targets: RwLock<Arc<Vec<Target>>>,
    phases: DashMap<TargetId, UnlockPhase>,
    announced: DashSet<TargetId>,
    ledger: RwLock<Ledger>,
    events: broadcast::Sender<UnlockEvent>,
}

impl UnlockCoordinator {
    pub fn new(session: Session, service: Arc<dyn GemService>) -> Self {
        Self::with_config(session, service, CoordinatorConfig::default())
    }

    pub fn with_config(
        session: Session,
        service: Arc<dyn GemService>,
        config: CoordinatorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            session,
            service,
            config,
            targets: RwLock::new(Arc::new(Vec::new())),
            phases: DashMap::new(),
            announced: DashSet::new(),
            ledger: RwLock::new(Ledger::default()),
            events,
        }
    }

    pub fn participant_id(&self) -> &str {
        self.session.participant_id()
    }

    /// Receives an [`UnlockEvent`] for every new unlock from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<UnlockEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------------

    /// Fetches the catalog and leaderboard at session start.
    ///
    /// Catalog failures are returned. A leaderboard failure only logs, the
    /// leaderboard arrives again with the next unlock.
    pub async fn load(&self) -> GemResult<usize> {
        let catalog = self
            .service
            .fetch_catalog(self.session.participant_id())
            .await?;
        let count = self.apply_catalog(catalog).await;

        match self.service.fetch_leaderboard().await {
            Ok(leaderboard) => self.ledger.write().await.leaderboard = leaderboard,
            Err(e) => warn!("Leaderboard unavailable: {}", e),
        }

        info!(
            "💎 Loaded {} gems for {} ({} already unlocked)",
            count,
            self.session.participant_id(),
            self.unlocked_ids().len()
        );
        Ok(count)
    }

    /// Re-fetches the catalog. Same merge rules as [`UnlockCoordinator::load`].
    pub async fn refresh(&self) -> GemResult<usize> {
        self.load().await
    }

    async fn apply_catalog(&self, catalog: CatalogSnapshot) -> usize {
        for id in catalog.unlocked {
            self.phases.insert(id, UnlockPhase::Unlocked);
        }
        self.ledger.write().await.absorb_badges(&catalog.badges);

        let count = catalog.gems.len();
        *self.targets.write().await = Arc::new(catalog.gems);
        count
    }

    // ------------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------------

    pub async fn targets(&self) -> Arc<Vec<Target>> {
        self.targets.read().await.clone()
    }

    pub async fn target(&self, target_id: &str) -> Option<Target> {
        self.targets
            .read()
            .await
            .iter()
            .find(|t| t.id == target_id)
            .cloned()
    }

    pub fn phase(&self, target_id: &str) -> UnlockPhase {
        self.phases
            .get(target_id)
            .map(|p| *p)
            .unwrap_or(UnlockPhase::Locked)
    }

    fn unlocked_set(&self) -> HashSet<TargetId> {
        self.phases
            .iter()
            .filter(|entry| *entry.value() == UnlockPhase::Unlocked)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Confirmed unlocked ids, sorted.
    pub fn unlocked_ids(&self) -> Vec<TargetId> {
        let mut ids: Vec<TargetId> = self.unlocked_set().into_iter().collect();
        ids.sort();
        ids
    }

    /// Badges in the order they were awarded.
    pub async fn badges(&self) -> Vec<Badge> {
        self.ledger.read().await.badges.clone()
    }

    pub async fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.ledger.read().await.leaderboard.clone()
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        let ledger = self.ledger.read().await;
        ProgressSnapshot {
            unlocked: self.unlocked_ids(),
            badges: ledger.badges.clone(),
            leaderboard: ledger.leaderboard.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Unlocking
    // ------------------------------------------------------------------------

    /// Asks the service to unlock `target_id` from `coords`.
    ///
    /// The `Locked → Pending` transition happens before the first await, so
    /// of any number of concurrent attempts for one target exactly one
    /// reaches the service. The call is bounded by
    /// [`CoordinatorConfig::unlock_timeout`].
    ///
    /// # Arguments
    ///
    /// * `target_id` - Catalog id of the target to claim
    /// * `coords` - Position reported to the service; it decides which gem,
    ///   if any, those coordinates unlock
    ///
    /// # Returns
    ///
    /// * `Ok(UnlockOutcome::Unlocked { .. })` - A new unlock, announced once
    ///   to [`UnlockCoordinator::subscribe`] receivers
    /// * `Ok(UnlockOutcome::Reconfirmed { .. })` - The service already had it
    /// * `Ok(UnlockOutcome::InFlight)` / `Ok(UnlockOutcome::AlreadyUnlocked)` -
    ///   Skipped locally, no remote call
    /// * `Err(_)` - The call failed; the target is `Locked` again
    ///
    /// Dropping the returned future mid-call also puts the target back to
    /// `Locked`, so a later tick can retry it.
    pub async fn attempt_unlock(
        &self,
        target_id: &str,
        coords: Coordinate,
    ) -> GemResult<UnlockOutcome> {
        {
            let mut phase = self
                .phases
                .entry(target_id.to_string())
                .or_insert(UnlockPhase::Locked);
            match *phase {
                UnlockPhase::Pending => return Ok(UnlockOutcome::InFlight),
                UnlockPhase::Unlocked => return Ok(UnlockOutcome::AlreadyUnlocked),
                UnlockPhase::Locked => *phase = UnlockPhase::Pending,
            }
        }
        let _pending = PendingGuard {
            coordinator: self,
            target_id,
        };

        debug!("Requesting unlock of {} at {}", target_id, coords);
        let timeout = self.config.unlock_timeout;
        let result = tokio::time::timeout(
            timeout,
            self.service.unlock(self.session.participant_id(), coords),
        )
        .await
        .unwrap_or(Err(GemError::Timeout(timeout)));

        match result {
            Ok(receipt) => Ok(self.apply_receipt(target_id, receipt).await),
            Err(e) => {
                warn!("Unlock of {} failed, will retry: {}", target_id, e);
                Err(e)
            }
        }
    }

    /// `Pending → Locked`. Leaves any other phase untouched.
    fn release(&self, target_id: &str) {
        if let Some(mut phase) = self.phases.get_mut(target_id) {
            if *phase == UnlockPhase::Pending {
                *phase = UnlockPhase::Locked;
            }
        }
    }

    async fn apply_receipt(&self, requested_id: &str, receipt: UnlockReceipt) -> UnlockOutcome {
        let UnlockReceipt {
            gem,
            unlocked_ids,
            badges,
            leaderboard,
            already_unlocked,
        } = receipt;

        let unlocked_id = gem
            .as_ref()
            .map(|g| g.id.clone())
            .unwrap_or_else(|| requested_id.to_string());

        for id in unlocked_ids.iter().chain(std::iter::once(&unlocked_id)) {
            self.phases.insert(id.clone(), UnlockPhase::Unlocked);
        }
        if unlocked_id != requested_id {
            // The service matched a different gem at these coordinates.
            debug!("Unlock for {} resolved to {}", requested_id, unlocked_id);
            self.release(requested_id);
        }

        let badges_awarded = {
            let mut ledger = self.ledger.write().await;
            if let Some(leaderboard) = leaderboard {
                ledger.leaderboard = leaderboard;
            }
            ledger.absorb_badges(&badges)
        };

        if already_unlocked || !self.announced.insert(unlocked_id.clone()) {
            debug!("Unlock of {} re-confirmed", unlocked_id);
            return UnlockOutcome::Reconfirmed {
                target_id: unlocked_id,
            };
        }

        let target = match gem {
            Some(gem) => Some(gem),
            None => self.target(&unlocked_id).await,
        };
        info!(
            "🎉 Unlocked {} ({})",
            target.as_ref().map(|t| t.name.as_str()).unwrap_or("unknown gem"),
            unlocked_id
        );

        let _ = self.events.send(UnlockEvent::Unlocked {
            target_id: unlocked_id.clone(),
            target: target.clone(),
            badges_awarded: badges_awarded.clone(),
        });

        UnlockOutcome::Unlocked {
            target_id: unlocked_id,
            target,
            badges_awarded,
        }
    }

    /// Runs one proximity tick: every locked target containing `current` gets
    /// its own concurrent unlock attempt.
    ///
    /// A failure for one target never stops the others; each result is
    /// independent, and a failed target is eligible again on the next tick.
    ///
    /// # Arguments
    ///
    /// * `current` - The participant's latest position
    ///
    /// # Returns
    ///
    /// One `(target_id, result)` pair per target in range, in catalog order.
    /// Empty when nothing locked is in range.
    pub async fn evaluate_and_unlock(
        &self,
        current: Coordinate,
    ) -> Vec<(TargetId, GemResult<UnlockOutcome>)> {
        let targets = self.targets().await;
        let unlocked = self.unlocked_set();
        let in_range: Vec<TargetId> = find_in_range(&current, &targets, &unlocked)
            .into_iter()
            .map(|t| t.id.clone())
            .collect();

        if in_range.is_empty() {
            return Vec::new();
        }
        debug!("{} gem(s) in range at {}", in_range.len(), current);

        let attempts = in_range.into_iter().map(|id| async move {
            let result = self.attempt_unlock(&id, current).await;
            (id, result)
        });
        join_all(attempts).await
    }

    /// The participant says they found `target_id`.
    ///
    /// Goes through the same server-verified path as a proximity unlock, using
    /// the target's own coordinates.
    pub async fn force_unlock(&self, target_id: &str) -> GemResult<UnlockOutcome> {
        let target = self
            .target(target_id)
            .await
            .ok_or_else(|| GemError::UnknownTarget(target_id.to_string()))?;
        self.attempt_unlock(&target.id, target.location).await
    }
}
