//! # Gem Engine
//!
//! Geofence-driven discovery of hidden gems. A participant walks around; each
//! position update is checked against the gem catalog, and any gem whose
//! radius the participant has entered is unlocked through the remote gem
//! service, which stays the single source of truth for what is unlocked.
//!
//! ## Architecture Overview
//!
//! * **[`location`]** - Cancellable streams of device coordinates
//! * **[`proximity`]** - Pure haversine range filtering
//! * **[`coordinator`]** - `Locked → Pending → Unlocked` state per gem,
//!   deduplication of in-flight requests and merging of server state
//! * **[`driver`]** - Glues a location stream to the coordinator
//! * **[`service`]** - The remote gem service contract and its HTTP client
//! * **[`session`]** - Participant identity and the local key-value store
//! * **[`journal`]** - Local search history and saved places
//!
//! ### Data Flow
//!
//! 1. A [`PositionSource`] yields fixes through a [`Subscription`]
//! 2. [`GeofenceDriver`] hands each coordinate to [`UnlockCoordinator::evaluate_and_unlock`]
//! 3. The coordinator filters locked gems in range and calls the service once per gem
//! 4. Confirmed unlocks are merged and broadcast as [`UnlockEvent`]s
//!
//! ```no_run
//! use gem_engine::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> GemResult<()> {
//! let session = Session::establish(Arc::new(MemoryStore::new())).await?;
//! let service = Arc::new(HttpGemService::new(HttpServiceConfig::default())?);
//! let coordinator = Arc::new(UnlockCoordinator::new(session, service));
//! coordinator.load().await?;
//!
//! let watcher = LocationWatcher::new(Arc::new(NoLocation));
//! let stats = GeofenceDriver::new(coordinator)
//!     .run(watcher.subscribe(WatchOptions::default()))
//!     .await;
//! println!("{} gems unlocked", stats.unlocked);
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod driver;
pub mod error;
pub mod geo;
pub mod journal;
pub mod location;
pub mod proximity;
pub mod service;
pub mod session;
pub mod types;
pub mod utils;

pub use coordinator::{
    CoordinatorConfig, ProgressSnapshot, UnlockCoordinator, UnlockEvent, UnlockOutcome, UnlockPhase,
};
pub use driver::{DriverStats, GeofenceDriver};
pub use error::{GemError, GemResult, LocationError};
pub use geo::{haversine_distance_m, Coordinate, EARTH_RADIUS_M};
pub use journal::{FavoritePlace, PlaceJournal, SearchEntry};
pub use location::{
    ChannelSource, LocationWatcher, NoLocation, PositionFeed, PositionFix, PositionSource,
    ReplaySource, Subscription, WatchHandle, WatchOptions,
};
pub use proximity::{find_in_range, nearest_locked};
pub use service::{GemService, HttpGemService, HttpServiceConfig};
pub use session::{JsonFileStore, KeyValueStore, MemoryStore, Session};
pub use types::{
    Badge, CatalogSnapshot, LeaderboardEntry, Target, TargetId, UnlockReceipt, UnlockRequest,
};
