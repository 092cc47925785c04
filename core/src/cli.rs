use crate::client::DEFAULT_SERVER;
use clap::{Args, Parser, Subcommand, ValueEnum};
use room_api::{Direction, Filters};
use std::path::PathBuf;

/// Swipe through restaurants with friends until everyone agrees.
#[derive(Parser, Debug)]
#[command(name = "toss", author, version, about)]
pub struct Cli {
    /// Room server base URL.
    #[arg(long, env = "TOSS_SERVER", default_value = DEFAULT_SERVER)]
    pub server: String,
    /// Directory for the local session file.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a guest session under a display name.
    Session { name: String },
    /// Create a room and become its host.
    Create {
        location: String,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Join a room by its code.
    Join {
        code: String,
        /// Display name inside this room, defaults to the session name.
        #[arg(long)]
        name: Option<String>,
    },
    Leave { code: String },
    /// Follow a room live until Ctrl+C.
    Watch { code: String },
    /// Swipe on a restaurant, or on a food type with `--food-type`.
    Swipe {
        code: String,
        item: String,
        #[arg(value_enum)]
        direction: SwipeDir,
        #[arg(long)]
        food_type: bool,
    },
    /// Load the next page of restaurants.
    Next { code: String },
    /// Change the room's search (host only).
    Filters {
        code: String,
        #[arg(long)]
        location: Option<String>,
        #[command(flatten)]
        filters: FilterArgs,
    },
    Matches { code: String },
    /// AI description of a restaurant in the room.
    Describe { code: String, restaurant: String },
    Favorites {
        #[command(subcommand)]
        command: Option<FavoriteCommand>,
    },
    History,
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum FavoriteCommand {
    List,
    /// Save a restaurant from a room.
    Add { code: String, restaurant: String },
    Remove { restaurant: String },
}

#[derive(Subcommand, Debug)]
pub enum AccountCommand {
    /// Print favorites and history as JSON.
    Export,
    /// Delete favorites, history and room memberships, then forget the session.
    Delete,
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// Search radius in meters.
    #[arg(long, default_value_t = 5000)]
    pub radius: u32,
    #[arg(long)]
    pub min_rating: Option<f32>,
    /// Highest price level, 1 to 4.
    #[arg(long)]
    pub max_price: Option<u8>,
    #[arg(long)]
    pub open_now: bool,
    #[arg(long)]
    pub keyword: Option<String>,
}

impl From<FilterArgs> for Filters {
    fn from(a: FilterArgs) -> Self {
        Filters {
            radius_m: a.radius,
            min_rating: a.min_rating,
            max_price: a.max_price,
            open_now: a.open_now,
            keyword: a.keyword,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDir {
    Left,
    Right,
}

impl From<SwipeDir> for Direction {
    fn from(d: SwipeDir) -> Self {
        match d {
            SwipeDir::Left => Direction::Left,
            SwipeDir::Right => Direction::Right,
        }
    }
}
