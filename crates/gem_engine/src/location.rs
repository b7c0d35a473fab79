//! # Location Watching
//!
//! Turns a platform position source into a cancellable, lazy stream of
//! coordinates.
//!
//! A [`PositionSource`] is the platform collaborator (GPS, a recorded track, a
//! test feed). [`LocationWatcher`] wraps one and hands out [`Subscription`]s:
//! each subscription is a non-restartable [`Stream`] that yields coordinates
//! until it is stopped, the source ends, or the source reports an error. The
//! error is yielded once and then the stream ends.
//!
//! Sources without location capability return `None` from
//! [`PositionSource::watch`]. Watching such a source never fails and never
//! yields a coordinate.

use crate::error::{GemError, GemResult, LocationError};
use crate::geo::Coordinate;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

// ============================================================================
// Options and Fixes
// ============================================================================

/// Tuning for a watch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Ask the platform for its most accurate (and most power hungry) mode
    pub high_accuracy: bool,
    /// Oldest cached fix that is still acceptable
    pub max_cached_age: Duration,
    /// How long to wait for each fix. `Duration::ZERO` waits forever.
    pub timeout: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            max_cached_age: Duration::ZERO,
            timeout: Duration::from_secs(10),
        }
    }
}

/// A single position report from a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub coordinate: Coordinate,
    /// Horizontal accuracy in meters, when the platform reports one
    pub accuracy_m: Option<f64>,
    /// How old the fix already was when it was delivered
    pub age: Duration,
}

impl PositionFix {
    pub fn fresh(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            accuracy_m: None,
            age: Duration::ZERO,
        }
    }
}

pub type FixStream = BoxStream<'static, Result<PositionFix, LocationError>>;

/// Platform position collaborator.
pub trait PositionSource: Send + Sync {
    /// Starts delivering fixes. Returns `None` when the platform has no
    /// location capability at all.
    fn watch(&self, options: &WatchOptions) -> Option<FixStream>;
}

// ============================================================================
// Watch Handle and Subscription
// ============================================================================

/// Stops the subscription it was taken from. Cloneable; stopping is idempotent.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    stop: Arc<watch::Sender<bool>>,
}

impl WatchHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { stop: Arc::new(tx) }, rx)
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

struct WatchState {
    fixes: Option<FixStream>,
    stop: watch::Receiver<bool>,
    options: WatchOptions,
}

async fn next_coordinate(
    mut state: WatchState,
) -> Option<(Result<Coordinate, LocationError>, WatchState)> {
    let mut fixes = state.fixes.take()?;

    loop {
        if *state.stop.borrow() {
            return None;
        }

        let timeout = state.options.timeout;
        let next = tokio::select! {
            biased;
            _ = state.stop.changed() => return None,
            next = async {
                if timeout.is_zero() {
                    Ok(fixes.next().await)
                } else {
                    tokio::time::timeout(timeout, fixes.next()).await
                }
            } => next,
        };

        match next {
            Err(_) => return Some((Err(LocationError::Timeout(timeout)), state)),
            Ok(None) => return None,
            Ok(Some(Err(e))) => return Some((Err(e), state)),
            Ok(Some(Ok(fix))) => {
                if fix.age > state.options.max_cached_age {
                    debug!("Dropping stale fix {} ({:?} old)", fix.coordinate, fix.age);
                    continue;
                }
                if !fix.coordinate.is_valid() {
                    warn!("Dropping out-of-range fix {}", fix.coordinate);
                    continue;
                }
                state.fixes = Some(fixes);
                return Some((Ok(fix.coordinate), state));
            }
        }
    }
}

/// A live sequence of device coordinates.
///
/// Yields `Ok(coordinate)` for each accepted fix. A source error is yielded as
/// `Err` exactly once, after which the stream is finished.
pub struct Subscription {
    events: BoxStream<'static, Result<Coordinate, LocationError>>,
    handle: WatchHandle,
    supported: bool,
}

impl Subscription {
    pub fn handle(&self) -> WatchHandle {
        self.handle.clone()
    }

    /// `false` when the source had no location capability.
    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn stop(&self) {
        self.handle.stop();
    }
}

impl Stream for Subscription {
    type Item = Result<Coordinate, LocationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}

// ============================================================================
// Location Watcher
// ============================================================================

/// Wraps a position source and hands out subscriptions to it.
#[derive(Clone)]
pub struct LocationWatcher {
    source: Arc<dyn PositionSource>,
}

impl LocationWatcher {
    pub fn new(source: Arc<dyn PositionSource>) -> Self {
        Self { source }
    }

    /// Subscribes to position updates as a stream.
    ///
    /// Nothing is requested from the source until the stream is first polled.
    ///
    /// # Arguments
    ///
    /// * `options` - Accuracy, cache age and per-fix timeout for this watch
    ///
    /// # Returns
    ///
    /// A [`Subscription`] yielding accepted coordinates. It ends after
    /// [`WatchHandle::stop`], when the source runs dry, or right after the
    /// first `Err`. A source without location capability gives a subscription
    /// that ends immediately and reports `is_supported() == false`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use futures::StreamExt;
    /// use gem_engine::{LocationWatcher, NoLocation, WatchOptions};
    /// use std::sync::Arc;
    ///
    /// # async fn run() {
    /// let watcher = LocationWatcher::new(Arc::new(NoLocation));
    /// let mut positions = watcher.subscribe(WatchOptions::default());
    /// while let Some(Ok(coordinate)) = positions.next().await {
    ///     println!("now at {}", coordinate);
    /// }
    /// # }
    /// ```
    pub fn subscribe(&self, options: WatchOptions) -> Subscription {
        let (handle, stop) = WatchHandle::new();
        let fixes = self.source.watch(&options);
        let supported = fixes.is_some();
        if !supported {
            info!("📍 Location unavailable, proximity checks disabled");
        }

        let events = stream::unfold(
            WatchState {
                fixes,
                stop,
                options,
            },
            next_coordinate,
        )
        .boxed();

        Subscription {
            events,
            handle,
            supported,
        }
    }

    /// Callback form of [`LocationWatcher::subscribe`].
    ///
    /// `on_update` runs for every accepted coordinate. `on_error` runs at most
    /// once, after which monitoring for this handle is over. Must be called
    /// from within a tokio runtime.
    pub fn start_watching<U, E>(&self, mut on_update: U, on_error: E, options: WatchOptions) -> WatchHandle
    where
        U: FnMut(Coordinate) + Send + 'static,
        E: FnOnce(LocationError) + Send + 'static,
    {
        let mut subscription = self.subscribe(options);
        let handle = subscription.handle();

        tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                match event {
                    Ok(coordinate) => on_update(coordinate),
                    Err(e) => {
                        warn!("Location watch ended: {}", e);
                        on_error(e);
                        break;
                    }
                }
            }
        });

        handle
    }

    /// Waits for a single accepted fix, then releases the watch.
    ///
    /// Fails with [`GemError::LocationUnavailable`] carrying the source's
    /// error, or [`LocationError::Unavailable`] when the source has no
    /// location capability or ends without a fix.
    pub async fn current_position(&self, options: WatchOptions) -> GemResult<Coordinate> {
        let mut subscription = self.subscribe(options);
        let supported = subscription.is_supported();
        let first = subscription.next().await;
        subscription.stop();

        match first {
            Some(Ok(coordinate)) => Ok(coordinate),
            Some(Err(e)) => Err(e.into()),
            None => {
                let reason = if supported {
                    "source ended without a fix"
                } else {
                    "no location capability"
                };
                Err(LocationError::Unavailable(reason.to_string()).into())
            }
        }
    }

    /// Releases a subscription. Safe to call any number of times.
    pub fn stop_watching(&self, handle: &WatchHandle) {
        handle.stop();
    }
}

// ============================================================================
// Built-in Sources
// ============================================================================

/// A platform without any location capability.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocation;

impl PositionSource for NoLocation {
    fn watch(&self, _options: &WatchOptions) -> Option<FixStream> {
        None
    }
}

/// Sending half of a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct PositionFeed {
    tx: mpsc::UnboundedSender<Result<PositionFix, LocationError>>,
}

impl PositionFeed {
    /// Pushes a fresh fix. Returns `false` once the watching side is gone.
    pub fn push(&self, coordinate: Coordinate) -> bool {
        self.push_fix(PositionFix::fresh(coordinate))
    }

    pub fn push_fix(&self, fix: PositionFix) -> bool {
        self.tx.send(Ok(fix)).is_ok()
    }

    pub fn fail(&self, error: LocationError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }
}

/// A source fed by hand through a [`PositionFeed`].
///
/// Only the first watch receives the feed; later watches report the source
/// as unavailable.
pub struct ChannelSource {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<PositionFix, LocationError>>>>,
}

impl ChannelSource {
    pub fn new() -> (Self, PositionFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            PositionFeed { tx },
        )
    }
}

impl PositionSource for ChannelSource {
    fn watch(&self, _options: &WatchOptions) -> Option<FixStream> {
        let taken = self.rx.lock().ok().and_then(|mut rx| rx.take());
        match taken {
            Some(rx) => Some(
                stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|fix| (fix, rx))
                })
                .boxed(),
            ),
            None => Some(
                stream::once(async {
                    Err(LocationError::Unavailable("feed already watched".to_string()))
                })
                .boxed(),
            ),
        }
    }
}

/// Replays a recorded track, one point per interval.
///
/// The first point is delivered immediately. Each watch replays the track
/// from the beginning. The accuracy hint is ignored.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    track: Vec<Coordinate>,
    interval: Duration,
}

impl ReplaySource {
    pub fn new(track: Vec<Coordinate>, interval: Duration) -> Self {
        Self { track, interval }
    }

    /// Loads a track from a JSON array of `{ "lat": .., "lng": .. }` points.
    pub async fn from_json_file(
        path: impl AsRef<Path>,
        interval: Duration,
    ) -> GemResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GemError::Store(format!("Failed to read track {}: {}", path.display(), e))
        })?;
        let track: Vec<Coordinate> = serde_json::from_str(&content)?;
        info!("🗺️ Loaded {} track points from {}", track.len(), path.display());
        Ok(Self::new(track, interval))
    }

    pub fn len(&self) -> usize {
        self.track.len()
    }

    pub fn is_empty(&self) -> bool {
        self.track.is_empty()
    }
}

impl PositionSource for ReplaySource {
    fn watch(&self, _options: &WatchOptions) -> Option<FixStream> {
        let interval = self.interval;
        let points = self.track.clone().into_iter().enumerate();
        Some(
            stream::iter(points)
                .then(move |(i, coordinate)| async move {
                    if i > 0 {
                        tokio::time::sleep(interval).await;
                    }
                    Ok(PositionFix::fresh(coordinate))
                })
                .boxed(),
        )
    }
}
