use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Participant id -> item id -> latest direction.
pub type SwipeMap = BTreeMap<String, BTreeMap<String, Direction>>;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
}

/// Which of the two swipe maps a swipe lands in.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SwipeKind {
    Restaurant,
    FoodType,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub online: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Restaurant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub price_level: Option<u8>,
    #[serde(default)]
    pub photo_ref: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub types: Vec<String>,
}

pub const MIN_RADIUS_M: u32 = 500;
pub const MAX_RADIUS_M: u32 = 50_000;

/// Search settings applied when loading restaurants for a room.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Filters {
    #[serde(default = "default_radius")]
    pub radius_m: u32,
    #[serde(default)]
    pub min_rating: Option<f32>,
    #[serde(default)]
    pub max_price: Option<u8>,
    #[serde(default)]
    pub open_now: bool,
    #[serde(default)]
    pub keyword: Option<String>,
}

fn default_radius() -> u32 {
    5000
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            radius_m: default_radius(),
            min_rating: None,
            max_price: None,
            open_now: false,
            keyword: None,
        }
    }
}

impl Filters {
    /// Clamp values into the ranges the places API accepts.
    pub fn normalized(mut self) -> Self {
        self.radius_m = self.radius_m.clamp(MIN_RADIUS_M, MAX_RADIUS_M);
        self.max_price = self.max_price.map(|p| p.clamp(1, 4));
        self.min_rating = self.min_rating.map(|r| r.clamp(0.0, 5.0));
        self.keyword = self
            .keyword
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        self
    }

    /// Whether a fetched restaurant passes the rating and price limits.
    pub fn accepts(&self, restaurant: &Restaurant) -> bool {
        if let Some(min) = self.min_rating {
            if restaurant.rating.unwrap_or(0.0) < min {
                return false;
            }
        }
        if let (Some(max), Some(price)) = (self.max_price, restaurant.price_level) {
            if price > max {
                return false;
            }
        }
        true
    }
}

/// Shared state of one swiping session. Stored and replaced as a whole.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Room {
    pub id: String,
    pub host_id: String,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub current_index: usize,
    #[serde(default)]
    pub restaurant_swipes: SwipeMap,
    #[serde(default)]
    pub food_type_swipes: SwipeMap,
    #[serde(default)]
    pub restaurants: Vec<Restaurant>,
    pub location: String,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default)]
    pub next_page_token: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Room {
    pub fn new(
        id: String,
        host: Participant,
        location: String,
        filters: Filters,
        now: i64,
    ) -> Self {
        Self {
            id,
            host_id: host.id.clone(),
            participants: vec![host],
            current_index: 0,
            restaurant_swipes: SwipeMap::new(),
            food_type_swipes: SwipeMap::new(),
            restaurants: Vec::new(),
            location,
            filters,
            next_page_token: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn is_participant(&self, id: &str) -> bool {
        self.participant(id).is_some()
    }

    /// Add a participant or refresh an existing one. Returns true if newly added.
    pub fn upsert_participant(&mut self, id: &str, name: &str) -> bool {
        if let Some(p) = self.participants.iter_mut().find(|p| p.id == id) {
            p.name = name.to_string();
            p.online = true;
            return false;
        }
        self.participants.push(Participant {
            id: id.to_string(),
            name: name.to_string(),
            online: true,
        });
        true
    }

    /// Remove a participant, handing the host role to the next one in line.
    /// Returns false if the id was not in the room.
    pub fn remove_participant(&mut self, id: &str) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p.id != id);
        if self.participants.len() == before {
            return false;
        }
        if self.host_id == id {
            if let Some(next) = self.participants.first() {
                self.host_id = next.id.clone();
            }
        }
        true
    }

    pub fn set_online(&mut self, id: &str, online: bool) -> bool {
        match self.participants.iter_mut().find(|p| p.id == id) {
            Some(p) if p.online != online => {
                p.online = online;
                true
            }
            _ => false,
        }
    }

    pub fn swipes(&self, kind: SwipeKind) -> &SwipeMap {
        match kind {
            SwipeKind::Restaurant => &self.restaurant_swipes,
            SwipeKind::FoodType => &self.food_type_swipes,
        }
    }

    /// Fold a swipe into the room, overwriting any earlier direction.
    pub fn record_swipe(
        &mut self,
        participant_id: &str,
        kind: SwipeKind,
        item_id: &str,
        direction: Direction,
    ) {
        let map = match kind {
            SwipeKind::Restaurant => &mut self.restaurant_swipes,
            SwipeKind::FoodType => &mut self.food_type_swipes,
        };
        map.entry(participant_id.to_string())
            .or_default()
            .insert(item_id.to_string(), direction);
    }

    pub fn restaurant(&self, id: &str) -> Option<&Restaurant> {
        self.restaurants.iter().find(|r| r.id == id)
    }

    /// Append a page of restaurants, skipping ids already loaded. Returns how many were added.
    pub fn append_restaurants<I>(&mut self, page: I) -> usize
    where
        I: IntoIterator<Item = Restaurant>,
    {
        let mut seen: HashSet<String> = self.restaurants.iter().map(|r| r.id.clone()).collect();
        let before = self.restaurants.len();
        for r in page {
            if seen.insert(r.id.clone()) {
                self.restaurants.push(r);
            }
        }
        self.restaurants.len() - before
    }

    /// Drop the loaded list so pagination starts over (after a filter change).
    pub fn reset_restaurants(&mut self) {
        self.restaurants.clear();
        self.restaurant_swipes.clear();
        self.current_index = 0;
        self.next_page_token = None;
    }

    /// Field-wise comparison that ignores timestamps.
    pub fn same_state(&self, other: &Room) -> bool {
        self.id == other.id
            && self.host_id == other.host_id
            && self.participants == other.participants
            && self.current_index == other.current_index
            && self.restaurant_swipes == other.restaurant_swipes
            && self.food_type_swipes == other.food_type_swipes
            && self.restaurants.len() == other.restaurants.len()
            && self
                .restaurants
                .iter()
                .zip(other.restaurants.iter())
                .all(|(a, b)| a.id == b.id)
            && self.location == other.location
            && self.filters == other.filters
            && self.next_page_token == other.next_page_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restaurant(id: &str) -> Restaurant {
        Restaurant {
            id: id.into(),
            name: format!("R {id}"),
            address: String::new(),
            rating: None,
            price_level: None,
            photo_ref: None,
            lat: None,
            lng: None,
            types: vec![],
        }
    }

    fn room() -> Room {
        let host = Participant {
            id: "a".into(),
            name: "Ann".into(),
            online: true,
        };
        Room::new("ABC123".into(), host, "Berlin".into(), Filters::default(), 0)
    }

    #[test]
    fn append_skips_known_ids() {
        let mut room = room();
        assert_eq!(room.append_restaurants(vec![restaurant("1"), restaurant("2")]), 2);
        assert_eq!(
            room.append_restaurants(vec![restaurant("2"), restaurant("3"), restaurant("3")]),
            1
        );
        let ids: Vec<_> = room.restaurants.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
    }

    #[test]
    fn latest_swipe_wins() {
        let mut room = room();
        room.record_swipe("a", SwipeKind::Restaurant, "1", Direction::Left);
        room.record_swipe("a", SwipeKind::Restaurant, "1", Direction::Right);
        assert_eq!(room.restaurant_swipes["a"]["1"], Direction::Right);
        assert!(room.food_type_swipes.is_empty());
    }

    #[test]
    fn host_leaving_hands_over() {
        let mut room = room();
        room.upsert_participant("b", "Ben");
        assert!(room.remove_participant("a"));
        assert_eq!(room.host_id, "b");
        assert!(!room.remove_participant("a"));
    }

    #[test]
    fn rejoin_refreshes_instead_of_duplicating() {
        let mut room = room();
        room.set_online("a", false);
        assert!(!room.upsert_participant("a", "Annie"));
        assert_eq!(room.participants.len(), 1);
        assert!(room.participants[0].online);
        assert_eq!(room.participants[0].name, "Annie");
    }

    #[test]
    fn same_state_ignores_timestamps() {
        let a = room();
        let mut b = a.clone();
        b.updated_at = 99;
        assert!(a.same_state(&b));
        b.record_swipe("a", SwipeKind::FoodType, "sushi", Direction::Right);
        assert!(!a.same_state(&b));
    }

    #[test]
    fn reset_clears_pagination() {
        let mut room = room();
        room.append_restaurants(vec![restaurant("1")]);
        room.record_swipe("a", SwipeKind::Restaurant, "1", Direction::Right);
        room.current_index = 1;
        room.next_page_token = Some("tok".into());
        room.reset_restaurants();
        assert!(room.restaurants.is_empty());
        assert!(room.restaurant_swipes.is_empty());
        assert_eq!(room.current_index, 0);
        assert!(room.next_page_token.is_none());
    }

    #[test]
    fn filters_normalize_and_accept() {
        let f = Filters {
            radius_m: 10,
            min_rating: Some(4.0),
            max_price: Some(9),
            open_now: false,
            keyword: Some("  ".into()),
        }
        .normalized();
        assert_eq!(f.radius_m, MIN_RADIUS_M);
        assert_eq!(f.max_price, Some(4));
        assert!(f.keyword.is_none());
        let mut r = restaurant("1");
        assert!(!f.accepts(&r));
        r.rating = Some(4.5);
        assert!(f.accepts(&r));
    }
}
