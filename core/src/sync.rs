//! Adaptive polling of a single room.
//!
//! The server is the source of truth: every fetched row replaces the local
//! snapshot wholesale. The poll interval speeds up after a change, slows
//! down while the room is quiet, backs off on errors and stops while the
//! client is hidden.

use crate::{
    client::{ApiClient, ClientError},
    events::{EventBus, SyncEvent},
    matches::MatchTracker,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use room_api::Room;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const FAST_INTERVAL: Duration = Duration::from_secs(1);
pub const BASE_INTERVAL: Duration = Duration::from_secs(2);
pub const IDLE_CAP: Duration = Duration::from_secs(10);
pub const ERROR_CAP: Duration = Duration::from_secs(30);
const IDLE_GROWTH: f64 = 1.5;
const ERROR_GROWTH: f64 = 2.0;
/// Quiet polls between two idle slow-downs.
const QUIET_STEP: u32 = 3;

/// Pure interval state machine driving the poll loop.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    current: Duration,
    quiet: u32,
    errors: u32,
    visible: bool,
}

impl PollSchedule {
    pub fn new() -> Self {
        Self {
            current: FAST_INTERVAL,
            quiet: 0,
            errors: 0,
            visible: true,
        }
    }

    /// Delay before the next poll, `None` while hidden.
    pub fn next_delay(&self) -> Option<Duration> {
        self.visible.then_some(self.current)
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.errors
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn on_change(&mut self) {
        self.current = FAST_INTERVAL;
        self.quiet = 0;
        self.errors = 0;
    }

    pub fn on_unchanged(&mut self) {
        self.errors = 0;
        self.quiet += 1;
        // leaving fast mode or recovering from an error backoff
        self.current = self.current.clamp(BASE_INTERVAL, IDLE_CAP);
        if self.quiet % QUIET_STEP == 0 {
            self.current = self.current.mul_f64(IDLE_GROWTH).min(IDLE_CAP);
        }
    }

    pub fn on_error(&mut self) {
        self.errors += 1;
        self.quiet = 0;
        self.current = self.current.mul_f64(ERROR_GROWTH).min(ERROR_CAP).max(self.current);
    }

    pub fn set_visible(&mut self, visible: bool) {
        if visible && !self.visible {
            self.current = FAST_INTERVAL;
            self.quiet = 0;
        }
        self.visible = visible;
    }
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the sync loop reads rooms from.
#[async_trait]
pub trait RoomSource: Send + Sync {
    async fn fetch_room(&self, room_id: &str) -> Result<Room, ClientError>;
}

#[async_trait]
impl RoomSource for ApiClient {
    async fn fetch_room(&self, room_id: &str) -> Result<Room, ClientError> {
        self.get_room(room_id).await
    }
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Changed,
    Unchanged,
    Failed,
    /// Another fetch was still running.
    Skipped,
}

/// Events describing the step from `prev` to `next`. Matches are not included.
pub fn diff(prev: Option<&Room>, next: &Room) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    if let Some(prev) = prev {
        if prev.same_state(next) {
            return events;
        }
        let before: HashSet<&str> = prev.participants.iter().map(|p| p.id.as_str()).collect();
        let after: HashSet<&str> = next.participants.iter().map(|p| p.id.as_str()).collect();
        for p in next.participants.iter().filter(|p| !before.contains(p.id.as_str())) {
            events.push(SyncEvent::ParticipantJoined {
                room_id: next.id.clone(),
                participant: p.clone(),
            });
        }
        for p in prev.participants.iter().filter(|p| !after.contains(p.id.as_str())) {
            events.push(SyncEvent::ParticipantLeft {
                room_id: next.id.clone(),
                participant_id: p.id.clone(),
            });
        }
    }
    events.push(SyncEvent::RoomChanged(Box::new(next.clone())));
    events
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps one room's local snapshot in step with the server.
pub struct RoomSync<S> {
    source: Arc<S>,
    room_id: String,
    bus: Arc<EventBus>,
    tracker: Arc<MatchTracker>,
    last: Mutex<Option<Room>>,
    schedule: Mutex<PollSchedule>,
    in_flight: AtomicBool,
}

impl<S: RoomSource + 'static> RoomSync<S> {
    pub fn new(
        source: Arc<S>,
        room_id: &str,
        bus: Arc<EventBus>,
        tracker: Arc<MatchTracker>,
    ) -> Self {
        Self {
            source,
            room_id: room_id.to_string(),
            bus,
            tracker,
            last: Mutex::new(None),
            schedule: Mutex::new(PollSchedule::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Last room fetched successfully.
    pub fn snapshot(&self) -> Option<Room> {
        self.last.lock().clone()
    }

    pub fn schedule(&self) -> PollSchedule {
        self.schedule.lock().clone()
    }

    /// Fetch now, unless a fetch is already under way.
    pub async fn poll_now(&self) -> PollOutcome {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return PollOutcome::Skipped;
        }
        let _guard = InFlight(&self.in_flight);
        match self.source.fetch_room(&self.room_id).await {
            Ok(room) => self.apply(room),
            Err(e) => {
                let retry_in = {
                    let mut schedule = self.schedule.lock();
                    schedule.on_error();
                    schedule.next_delay()
                };
                warn!(room = %self.room_id, error = %e, ?retry_in, "room fetch failed");
                self.bus.publish(SyncEvent::FetchFailed {
                    room_id: self.room_id.clone(),
                    error: e.code().to_string(),
                    retry_in,
                });
                PollOutcome::Failed
            }
        }
    }

    fn apply(&self, room: Room) -> PollOutcome {
        let events = {
            let mut last = self.last.lock();
            let events = diff(last.as_ref(), &room);
            *last = Some(room.clone());
            events
        };
        if events.is_empty() {
            self.schedule.lock().on_unchanged();
            return PollOutcome::Unchanged;
        }
        self.schedule.lock().on_change();
        debug!(room = %self.room_id, events = events.len(), "room changed");
        for event in events {
            self.bus.publish(event);
        }
        for m in self.tracker.take_unseen(&room) {
            info!(room = %self.room_id, item = %m.item_id, "new match");
            self.bus.publish(SyncEvent::Matched {
                room_id: self.room_id.clone(),
                kind: m.kind,
                item_id: m.item_id,
            });
        }
        PollOutcome::Changed
    }

    /// Poll until `cancel` fires. `visible` pauses and resumes polling.
    /// A fetch in progress when cancelled is allowed to finish.
    pub async fn run(
        self: Arc<Self>,
        mut visible: watch::Receiver<bool>,
        cancel: CancellationToken,
    ) {
        info!(room = %self.room_id, "sync started");
        if *visible.borrow() {
            self.poll_now().await;
        }
        loop {
            let delay = {
                let mut schedule = self.schedule.lock();
                schedule.set_visible(*visible.borrow_and_update());
                schedule.next_delay()
            };
            let sleep = async {
                match delay {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = visible.changed() => {
                    if changed.is_err() {
                        debug!(room = %self.room_id, "visibility sender dropped");
                        break;
                    }
                    continue;
                }
                _ = sleep => {}
            }
            self.poll_now().await;
        }
        info!(room = %self.room_id, "sync stopped");
    }

    pub fn spawn(
        self: Arc<Self>,
        visible: watch::Receiver<bool>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(visible, cancel))
    }
}
