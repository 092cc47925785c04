use parking_lot::Mutex;
use room_api::{find_matches, Room, SwipeKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A match that has already been shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShownMatch {
    pub kind: SwipeKind,
    pub item_id: String,
}

/// Remembers, per room, which matches this client already announced.
/// Entries are only dropped through [`MatchTracker::forget`].
#[derive(Default)]
pub struct MatchTracker {
    shown: Mutex<HashMap<String, HashSet<ShownMatch>>>,
}

impl MatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore previously shown matches, e.g. from local storage.
    pub fn seed(&self, room_id: &str, items: impl IntoIterator<Item = ShownMatch>) {
        self.shown
            .lock()
            .entry(room_id.to_string())
            .or_default()
            .extend(items);
    }

    /// Matches in `room` not shown before, marking them as shown.
    /// Restaurants come in list order, then food types sorted.
    pub fn take_unseen(&self, room: &Room) -> Vec<ShownMatch> {
        let mut guard = self.shown.lock();
        let seen = guard.entry(room.id.clone()).or_default();
        let mut fresh = Vec::new();
        for kind in [SwipeKind::Restaurant, SwipeKind::FoodType] {
            for item_id in find_matches(room, kind) {
                let m = ShownMatch { kind, item_id };
                if seen.insert(m.clone()) {
                    fresh.push(m);
                }
            }
        }
        fresh
    }

    pub fn shown(&self, room_id: &str) -> Vec<ShownMatch> {
        let mut items: Vec<ShownMatch> = self
            .shown
            .lock()
            .get(room_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        items.sort_by(|a, b| {
            let key = (a.kind == SwipeKind::FoodType, &a.item_id);
            key.cmp(&(b.kind == SwipeKind::FoodType, &b.item_id))
        });
        items
    }

    pub fn forget(&self, room_id: &str) {
        self.shown.lock().remove(room_id);
    }
}
