use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use room_api::{Room, SwipeKind};
use toss_core::{
    cli::{AccountCommand, Cli, Command, FavoriteCommand},
    services::storage::{Storage, StoredSession},
    ApiClient, ClientError, EventBus, MatchTracker, RestaurantLoader, RoomSync, ShownMatch,
    SyncEvent,
};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let storage = Storage::open(cli.data_dir.as_deref()).await?;
    let client = ApiClient::new(&cli.server);

    if let Command::Session { name } = &cli.command {
        let resp = client.create_session(name).await?;
        storage
            .set_session(&StoredSession {
                token: resp.token,
                participant_id: resp.participant_id.clone(),
                name: resp.name.clone(),
            })
            .await?;
        println!("signed in as {} ({})", resp.name, resp.participant_id);
        return Ok(());
    }

    let session = storage.session().await.ok_or(ClientError::NoSession)?;
    let api = client.with_token(session.token.clone());

    match cli.command {
        Command::Session { .. } => {}
        Command::Create { location, filters } => {
            let room = api.create_room(&location, filters.into()).await?;
            println!("room {} created in {}", room.id, room.location);
            println!("share the code, then run `toss watch {}`", room.id);
        }
        Command::Join { code, name } => {
            let name = name.unwrap_or_else(|| session.name.clone());
            let room = api.join_room(&room_code(&code), &name).await?;
            print_room(&room);
        }
        Command::Leave { code } => {
            api.leave_room(&room_code(&code)).await?;
            println!("left {}", room_code(&code));
        }
        Command::Watch { code } => watch_room(api, &room_code(&code), &storage).await?,
        Command::Swipe {
            code,
            item,
            direction,
            food_type,
        } => {
            let code = room_code(&code);
            let kind = if food_type {
                SwipeKind::FoodType
            } else {
                SwipeKind::Restaurant
            };
            let resp = api.swipe(&code, kind, &item, direction.into()).await?;
            let mut room = resp.room;
            if kind == SwipeKind::Restaurant {
                if let Some(pos) = room.restaurants.iter().position(|r| r.id == item) {
                    if pos >= room.current_index {
                        room = api.set_cursor(&code, pos + 1).await?;
                    }
                }
                let loader = RestaurantLoader::new(Arc::new(api.clone()), &code);
                if loader.needs_more(&room, room.current_index) {
                    if let Err(e) = loader.load_more().await {
                        warn!(error = %e, "prefetch failed");
                    }
                }
            }
            if resp.matched {
                let mut shown = storage.shown_matches(&code).await;
                shown.push(ShownMatch {
                    kind,
                    item_id: item.clone(),
                });
                storage.set_shown_matches(&code, &shown).await?;
                println!("it's a match: {}", item_label(&room, kind, &item));
            } else {
                println!("swiped {:?} on {}", direction, item_label(&room, kind, &item));
            }
        }
        Command::Next { code } => {
            let code = room_code(&code);
            let loader = RestaurantLoader::new(Arc::new(api), &code);
            if let Some(page) = loader.load_more().await? {
                println!(
                    "{} new restaurants, {} loaded{}",
                    page.added,
                    page.room.restaurants.len(),
                    if page.has_more { ", more available" } else { "" }
                );
            }
        }
        Command::Filters {
            code,
            location,
            filters,
        } => {
            let room = api
                .update_filters(&room_code(&code), location, filters.into())
                .await?;
            println!("search updated for {}, restaurant list reset", room.location);
        }
        Command::Matches { code } => {
            let code = room_code(&code);
            let room = api.get_room(&code).await?;
            let matches = api.matches(&code).await?;
            if matches.restaurants.is_empty() && matches.food_types.is_empty() {
                println!("no matches yet");
            }
            for id in &matches.restaurants {
                println!("restaurant  {}", item_label(&room, SwipeKind::Restaurant, id));
            }
            for tag in &matches.food_types {
                println!("food type   {tag}");
            }
        }
        Command::Describe { code, restaurant } => {
            let resp = api.describe(&room_code(&code), &restaurant).await?;
            println!("{}", resp.description);
        }
        Command::Favorites { command } => match command.unwrap_or(FavoriteCommand::List) {
            FavoriteCommand::List => {
                for fav in api.favorites().await? {
                    println!("{:<28} {}", fav.restaurant.id, fav.restaurant.name);
                }
            }
            FavoriteCommand::Add { code, restaurant } => {
                let room = api.get_room(&room_code(&code)).await?;
                let r = room
                    .restaurant(&restaurant)
                    .with_context(|| {
                        format!("restaurant {restaurant} is not loaded in {}", room.id)
                    })?;
                let fav = api.add_favorite(r).await?;
                println!("saved {}", fav.restaurant.name);
            }
            FavoriteCommand::Remove { restaurant } => {
                if api.remove_favorite(&restaurant).await? {
                    println!("removed {restaurant}");
                } else {
                    println!("{restaurant} was not a favorite");
                }
            }
        },
        Command::History => {
            for entry in api.history().await? {
                let outcome = entry
                    .matched
                    .map(|r| r.name)
                    .unwrap_or_else(|| "no match".into());
                println!("{}  {:<20} {}", entry.room_id, entry.location, outcome);
            }
        }
        Command::Account { command } => match command {
            AccountCommand::Export => {
                let export = api.export_account().await?;
                println!("{}", serde_json::to_string_pretty(&export)?);
            }
            AccountCommand::Delete => {
                api.delete_account().await?;
                storage.clear_session().await?;
                println!("account data deleted");
            }
        },
    }
    Ok(())
}

fn room_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn item_label(room: &Room, kind: SwipeKind, item: &str) -> String {
    match (kind, room.restaurant(item)) {
        (SwipeKind::Restaurant, Some(r)) => format!("{} ({})", r.name, r.address),
        _ => item.to_string(),
    }
}

fn print_room(room: &Room) {
    let names: Vec<String> = room
        .participants
        .iter()
        .map(|p| {
            let host = if p.id == room.host_id { "*" } else { "" };
            let status = if p.online { "" } else { " (away)" };
            format!("{host}{}{status}", p.name)
        })
        .collect();
    println!(
        "[{}] {} | {} | restaurant {}/{}",
        room.id,
        room.location,
        names.join(", "),
        room.current_index.min(room.restaurants.len()),
        room.restaurants.len()
    );
}

async fn watch_room(api: ApiClient, code: &str, storage: &Storage) -> Result<()> {
    let api = Arc::new(api);
    let bus = Arc::new(EventBus::new());
    let tracker = Arc::new(MatchTracker::new());
    tracker.seed(code, storage.shown_matches(code).await);
    let mut events = bus.subscribe();
    let sync = Arc::new(RoomSync::new(api.clone(), code, bus.clone(), tracker.clone()));
    let loader = Arc::new(RestaurantLoader::new(api, code));

    // a terminal stays visible for as long as we watch
    let (_visible, visible_rx) = watch::channel(true);
    let cancel = CancellationToken::new();
    let handle = sync.clone().spawn(visible_rx, cancel.clone());
    info!(room = %code, "watching, press Ctrl+C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        let event = tokio::select! {
            _ = &mut ctrl_c => break,
            ev = events.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
        };
        match event {
            SyncEvent::RoomChanged(room) => {
                print_room(&room);
                // loads in the background so Ctrl+C is never stuck behind a slow page
                if loader.needs_more(&room, room.current_index) {
                    let loader = loader.clone();
                    tokio::spawn(async move {
                        match loader.load_more().await {
                            Ok(Some(page)) => info!(added = page.added, "restaurants prefetched"),
                            Ok(None) => {}
                            Err(e) => warn!(error = %e, "prefetch failed"),
                        }
                    });
                }
            }
            SyncEvent::ParticipantJoined { participant, .. } => {
                println!("+ {} joined", participant.name);
            }
            SyncEvent::ParticipantLeft { participant_id, .. } => {
                println!("- {participant_id} left");
            }
            SyncEvent::Matched { kind, item_id, .. } => {
                let label = match sync.snapshot() {
                    Some(room) => item_label(&room, kind, &item_id),
                    None => item_id.clone(),
                };
                println!("it's a match: {label}");
                storage.set_shown_matches(code, &tracker.shown(code)).await?;
            }
            SyncEvent::FetchFailed { error, retry_in, .. } => {
                println!("! sync failed ({error}), retrying in {:?}", retry_in.unwrap_or_default());
            }
        }
    }
    cancel.cancel();
    handle.await?;
    Ok(())
}
