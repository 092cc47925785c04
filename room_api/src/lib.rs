//! Types shared by the room server and the client runtime.

pub mod backoff;
pub mod matching;
pub mod model;
pub mod wire;

pub use backoff::RetryConfig;
pub use matching::{find_matches, is_match};
pub use model::{Direction, Filters, Participant, Restaurant, Room, SwipeKind, SwipeMap};
