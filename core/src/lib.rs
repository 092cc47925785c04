//! Client runtime for toss rooms: API client, live room sync, match
//! tracking, restaurant prefetching and local session storage.

pub mod cli;
pub mod client;
pub mod events;
pub mod loader;
pub mod matches;
pub mod services;
pub mod sync;

pub use client::{ApiClient, ClientError};
pub use events::{EventBus, SyncEvent};
pub use loader::RestaurantLoader;
pub use matches::{MatchTracker, ShownMatch};
pub use sync::{PollOutcome, PollSchedule, RoomSource, RoomSync};
