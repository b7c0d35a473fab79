//! # Wire Types
//!
//! Data model shared with the remote gem service. Field names follow the
//! service's JSON (camelCase keys, flat `lat`/`lng` on gems).
//!
//! ## Key Types
//!
//! - [`Target`] - A hidden gem with its geofence
//! - [`LeaderboardEntry`] - One ranked participant
//! - [`CatalogSnapshot`] - Response of `GET /gems`
//! - [`UnlockReceipt`] - Response of `POST /gems/unlock`

use crate::geo::Coordinate;
use serde::{Deserialize, Serialize};

/// Identifier of a hidden gem, unique within a catalog.
pub type TargetId = String;

/// Opaque badge name awarded by the service.
pub type Badge = String;

fn default_radius_m() -> f64 {
    20.0
}

/// A discoverable point of interest with a circular geofence.
///
/// Targets are fetched once per session and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    #[serde(flatten)]
    pub location: Coordinate,
    /// Trigger radius in meters
    #[serde(default = "default_radius_m")]
    pub radius_m: f64,
    #[serde(default)]
    pub hint: String,
    /// Badge the service awards when this target is unlocked, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<Badge>,
}

impl Target {
    /// Returns `true` when `point` lies on or inside the geofence.
    pub fn contains(&self, point: &Coordinate) -> bool {
        self.location.distance_to(point) <= self.radius_m
    }
}

/// A participant's position on the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    #[serde(rename = "participantId", alias = "userId")]
    pub participant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub count: u32,
}

/// The participant's view of the catalog: every gem plus what they already own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub gems: Vec<Target>,
    #[serde(default)]
    pub unlocked: Vec<TargetId>,
    #[serde(default)]
    pub badges: Vec<Badge>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaderboardSnapshot {
    #[serde(default)]
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Body of `POST /gems/unlock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRequest {
    pub participant_id: String,
    pub coords: Coordinate,
}

/// The service's authoritative answer to an unlock attempt.
///
/// `already_unlocked` is mandatory: without it the client cannot tell a new
/// discovery from a re-confirmation, so a receipt missing it fails to decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockReceipt {
    #[serde(default)]
    pub gem: Option<Target>,
    #[serde(default)]
    pub unlocked_ids: Vec<TargetId>,
    #[serde(default)]
    pub badges: Vec<Badge>,
    #[serde(default)]
    pub leaderboard: Option<Vec<LeaderboardEntry>>,
    pub already_unlocked: bool,
}
