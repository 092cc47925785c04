pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod describe;
pub mod error;
pub mod favorites;
pub mod history;
pub mod housekeeping;
pub mod places;
pub mod presence;
pub mod rooms;
