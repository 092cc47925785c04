//! Request and response bodies of the room server's HTTP API.

use crate::model::{Direction, Filters, Restaurant, Room, SwipeKind};
use serde::{Deserialize, Serialize};

/// Error body returned with every non-2xx response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorResp {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionReq {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionResp {
    pub token: String,
    pub participant_id: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreateRoomReq {
    pub location: String,
    #[serde(default)]
    pub filters: Filters,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JoinReq {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SwipeReq {
    pub kind: SwipeKind,
    pub item_id: String,
    pub direction: Direction,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SwipeResp {
    pub room: Room,
    pub matched: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CursorReq {
    pub index: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FiltersReq {
    #[serde(default)]
    pub location: Option<String>,
    pub filters: Filters,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PageResp {
    pub added: usize,
    pub has_more: bool,
    pub room: Room,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct MatchesResp {
    pub restaurants: Vec<String>,
    pub food_types: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DescriptionResp {
    pub restaurant_id: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Favorite {
    pub restaurant: Restaurant,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryEntry {
    pub room_id: String,
    pub location: String,
    pub matched: Option<Restaurant>,
    pub joined_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccountExport {
    pub participant_id: String,
    pub favorites: Vec<Favorite>,
    pub history: Vec<HistoryEntry>,
}
