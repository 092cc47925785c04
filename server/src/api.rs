use crate::{
    auth::{self, Claims, RateLimiter},
    config::Config,
    db::{self, DbPool},
    describe::{Describer, DESCRIPTION_TTL},
    error::{RoomError, RoomResult},
    favorites, history, housekeeping,
    places::PlacesClient,
    presence::Presence,
    rooms,
};
use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use room_api::{
    wire::{
        AccountExport, CreateRoomReq, CursorReq, DescriptionResp, Favorite, FiltersReq,
        HistoryEntry, JoinReq, MatchesResp, PageResp, SessionReq, SessionResp, SwipeReq, SwipeResp,
    },
    find_matches, Participant, Restaurant, Room, SwipeKind,
};
use rusqlite::Connection;
use std::{net::TcpListener, sync::Arc, time::Duration as StdDuration};
use time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Config,
    pub secret: Arc<Vec<u8>>,
    pub presence: Arc<Presence>,
    pub places: PlacesClient,
    pub describer: Arc<Describer>,
    pub session_limiter: RateLimiter,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .context("create data dir")?;
        let pool = db::open_pool(config.db_path())?;
        let secret = auth::load_or_create_secret(&config.secret_path()).await?;
        Ok(Self {
            pool,
            secret: Arc::new(secret),
            presence: Arc::new(Presence::new(config.presence_timeout)),
            places: PlacesClient::new(&config.places),
            describer: Arc::new(Describer::new(config.ai.clone(), DESCRIPTION_TTL)),
            session_limiter: RateLimiter::new(10, StdDuration::from_secs(60)),
            config,
        })
    }
}

/// Run a blocking database closure on the blocking thread pool.
pub(crate) async fn with_conn<F, T>(pool: &DbPool, f: F) -> RoomResult<T>
where
    F: FnOnce(&mut Connection) -> RoomResult<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut *conn)
    })
    .await
    .map_err(|e| RoomError::Internal(e.into()))?
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/:id", get(get_room))
        .route("/api/rooms/:id/join", post(join_room))
        .route("/api/rooms/:id/leave", post(leave_room))
        .route("/api/rooms/:id/swipes", post(swipe))
        .route("/api/rooms/:id/cursor", put(set_cursor))
        .route("/api/rooms/:id/filters", put(update_filters))
        .route("/api/rooms/:id/restaurants/next", post(next_page))
        .route("/api/rooms/:id/matches", get(matches))
        .route(
            "/api/rooms/:id/restaurants/:rid/description",
            get(describe),
        )
        .route("/api/favorites", get(list_favorites).post(add_favorite))
        .route("/api/favorites/:rid", delete(remove_favorite))
        .route("/api/history", get(list_history))
        .route("/api/account/export", get(export_account))
        .route("/api/account", delete(delete_account))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));
    Router::new()
        .route("/api/health", get(health))
        .route("/api/session", post(create_session))
        .merge(protected)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    mut req: Request<B>,
    next: Next<B>,
) -> Result<Response, RoomError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(RoomError::Unauthorized)?;
    let claims = auth::verify_jwt(&state.secret, token).map_err(|_| RoomError::Unauthorized)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

fn room_code(id: &str) -> RoomResult<String> {
    rooms::normalize_code(id).ok_or(RoomError::NotFound)
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<SessionReq>,
) -> RoomResult<impl IntoResponse> {
    let name = rooms::validate_name(&req.name)?;
    if !state.session_limiter.check(&name.to_lowercase()).await {
        return Err(RoomError::RateLimited);
    }
    let participant_id = auth::new_guest_id();
    let token = auth::issue_jwt(&state.secret, &participant_id, &name, Duration::hours(24))?;
    info!(participant = %participant_id, "session created");
    Ok((
        StatusCode::CREATED,
        Json(SessionResp {
            token,
            participant_id,
            name,
        }),
    ))
}

async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomReq>,
) -> RoomResult<impl IntoResponse> {
    let host = Participant {
        id: claims.sub.clone(),
        name: claims.name.clone(),
        online: true,
    };
    let room = with_conn(&state.pool, move |conn| {
        let room = rooms::create_room(conn, host, &req.location, req.filters)?;
        history::record_join(conn, &room.host_id, &room.id, &room.location)?;
        Ok(room)
    })
    .await?;
    state.presence.touch(&room.id, &claims.sub);
    Ok((StatusCode::CREATED, Json(room)))
}

async fn get_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> RoomResult<Json<Room>> {
    let id = room_code(&id)?;
    let sub = claims.sub.clone();
    let room = with_conn(&state.pool, move |conn| {
        let room = rooms::get_room(conn, &id)?;
        let offline = room.participant(&sub).map(|p| !p.online).unwrap_or(false);
        if offline {
            rooms::set_online(conn, &id, &sub)?;
            rooms::get_room(conn, &id)
        } else {
            Ok(room)
        }
    })
    .await?;
    if room.is_participant(&claims.sub) {
        state.presence.touch(&room.id, &claims.sub);
    }
    Ok(Json(room))
}

async fn join_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<JoinReq>,
) -> RoomResult<Json<Room>> {
    let id = room_code(&id)?;
    let sub = claims.sub.clone();
    let room = with_conn(&state.pool, move |conn| {
        let room = rooms::join_room(conn, &id, &sub, &req.name)?;
        history::record_join(conn, &sub, &room.id, &room.location)?;
        Ok(room)
    })
    .await?;
    state.presence.touch(&room.id, &claims.sub);
    Ok(Json(room))
}

async fn leave_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> RoomResult<StatusCode> {
    let id = room_code(&id)?;
    let (room_id, sub) = (id.clone(), claims.sub.clone());
    with_conn(&state.pool, move |conn| {
        if let Some(room) = rooms::leave_room(conn, &room_id, &sub)? {
            record_settled_match(conn, &room)?;
        }
        Ok(())
    })
    .await?;
    state.presence.forget(&id, &claims.sub);
    Ok(StatusCode::NO_CONTENT)
}

/// A departure can complete a match nobody swiped into. Record it in the
/// remaining participants' history.
fn record_settled_match(conn: &Connection, room: &Room) -> RoomResult<()> {
    let first = find_matches(room, SwipeKind::Restaurant).into_iter().next();
    if let Some(r) = first.as_deref().and_then(|id| room.restaurant(id)) {
        let owners: Vec<String> = room.participants.iter().map(|p| p.id.clone()).collect();
        history::record_match(conn, &owners, &room.id, &room.location, r)?;
        info!(room = %room.id, restaurant = %r.id, "match settled by departure");
    }
    Ok(())
}

async fn swipe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<SwipeReq>,
) -> RoomResult<Json<SwipeResp>> {
    let id = room_code(&id)?;
    let sub = claims.sub.clone();
    let (room, matched) = with_conn(&state.pool, move |conn| {
        let (room, matched) = rooms::swipe(conn, &id, &sub, req.kind, &req.item_id, req.direction)?;
        if matched && req.kind == SwipeKind::Restaurant {
            if let Some(r) = room.restaurant(req.item_id.trim()) {
                let owners: Vec<String> = room.participants.iter().map(|p| p.id.clone()).collect();
                history::record_match(conn, &owners, &room.id, &room.location, r)?;
                info!(room = %room.id, restaurant = %r.id, "match found");
            }
        }
        Ok((room, matched))
    })
    .await?;
    state.presence.touch(&room.id, &claims.sub);
    Ok(Json(SwipeResp { room, matched }))
}

async fn set_cursor(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<CursorReq>,
) -> RoomResult<Json<Room>> {
    let id = room_code(&id)?;
    let sub = claims.sub.clone();
    let room =
        with_conn(&state.pool, move |conn| rooms::set_cursor(conn, &id, &sub, req.index)).await?;
    state.presence.touch(&room.id, &claims.sub);
    Ok(Json(room))
}

async fn update_filters(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<FiltersReq>,
) -> RoomResult<Json<Room>> {
    let id = room_code(&id)?;
    let sub = claims.sub.clone();
    let room = with_conn(&state.pool, move |conn| {
        rooms::update_filters(conn, &id, &sub, req.location.as_deref(), req.filters)
    })
    .await?;
    Ok(Json(room))
}

async fn next_page(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> RoomResult<Json<PageResp>> {
    let id = room_code(&id)?;
    let room_id = id.clone();
    let snapshot = with_conn(&state.pool, move |conn| rooms::get_room(conn, &room_id)).await?;
    if !snapshot.is_participant(&claims.sub) {
        return Err(RoomError::NotParticipant);
    }
    state.presence.touch(&snapshot.id, &claims.sub);
    if !snapshot.restaurants.is_empty() && snapshot.next_page_token.is_none() {
        return Ok(Json(PageResp {
            added: 0,
            has_more: false,
            room: snapshot,
        }));
    }

    let page = state
        .places
        .fetch_page(
            &snapshot.location,
            &snapshot.filters,
            snapshot.next_page_token.as_deref(),
        )
        .await?;

    let (room, added) = with_conn(&state.pool, move |conn| {
        rooms::update_room(conn, &id, |room| {
            // filters changed or another participant already loaded this page
            if room.location != snapshot.location
                || room.filters != snapshot.filters
                || room.next_page_token != snapshot.next_page_token
                || room.restaurants.len() < snapshot.restaurants.len()
            {
                return Ok(0);
            }
            let added = room.append_restaurants(page.restaurants);
            room.next_page_token = page.next_page_token;
            Ok(added)
        })
    })
    .await?;
    info!(room = %room.id, added, total = room.restaurants.len(), "restaurants page loaded");
    Ok(Json(PageResp {
        added,
        has_more: room.next_page_token.is_some(),
        room,
    }))
}

async fn matches(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> RoomResult<Json<MatchesResp>> {
    let id = room_code(&id)?;
    let room = with_conn(&state.pool, move |conn| rooms::get_room(conn, &id)).await?;
    if !room.is_participant(&claims.sub) {
        return Err(RoomError::NotParticipant);
    }
    Ok(Json(rooms::matches(&room)))
}

async fn describe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, rid)): Path<(String, String)>,
) -> RoomResult<Json<DescriptionResp>> {
    let id = room_code(&id)?;
    let room = with_conn(&state.pool, move |conn| rooms::get_room(conn, &id)).await?;
    if !room.is_participant(&claims.sub) {
        return Err(RoomError::NotParticipant);
    }
    let restaurant = room
        .restaurant(&rid)
        .ok_or_else(|| RoomError::UnknownRestaurant(rid.clone()))?;
    let description = state.describer.describe(restaurant).await?;
    Ok(Json(DescriptionResp {
        restaurant_id: rid,
        description,
    }))
}

async fn list_favorites(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> RoomResult<Json<Vec<Favorite>>> {
    let favs = with_conn(&state.pool, move |conn| {
        Ok(favorites::list_favorites(conn, &claims.sub)?)
    })
    .await?;
    Ok(Json(favs))
}

async fn add_favorite(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(restaurant): Json<Restaurant>,
) -> RoomResult<impl IntoResponse> {
    if restaurant.id.trim().is_empty() {
        return Err(RoomError::InvalidItem);
    }
    let fav = with_conn(&state.pool, move |conn| {
        Ok(favorites::add_favorite(conn, &claims.sub, &restaurant)?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(fav)))
}

async fn remove_favorite(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(rid): Path<String>,
) -> RoomResult<StatusCode> {
    let removed = with_conn(&state.pool, move |conn| {
        Ok(favorites::remove_favorite(conn, &claims.sub, &rid)?)
    })
    .await?;
    Ok(if removed {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    })
}

async fn list_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> RoomResult<Json<Vec<HistoryEntry>>> {
    let entries = with_conn(&state.pool, move |conn| {
        Ok(history::list_history(conn, &claims.sub)?)
    })
    .await?;
    Ok(Json(entries))
}

async fn export_account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> RoomResult<Json<AccountExport>> {
    let export = with_conn(&state.pool, move |conn| {
        Ok(AccountExport {
            favorites: favorites::list_favorites(conn, &claims.sub)?,
            history: history::list_history(conn, &claims.sub)?,
            participant_id: claims.sub,
        })
    })
    .await?;
    Ok(Json(export))
}

async fn delete_account(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> RoomResult<StatusCode> {
    let sub = claims.sub.clone();
    let left = with_conn(&state.pool, move |conn| {
        favorites::delete_all(conn, &sub)?;
        history::delete_all(conn, &sub)?;
        let room_ids = rooms::rooms_for_participant(conn, &sub)?;
        for room_id in &room_ids {
            if let Some(room) = rooms::leave_room(conn, room_id, &sub)? {
                record_settled_match(conn, &room)?;
            }
        }
        Ok(room_ids)
    })
    .await?;
    for room_id in &left {
        state.presence.forget(room_id, &claims.sub);
    }
    info!(participant = %claims.sub, rooms = left.len(), "account deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Serve the API on an already bound listener until the future is dropped.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    listener.set_nonblocking(true)?;
    axum::Server::from_tcp(listener)?
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}

/// Run the HTTP server with housekeeping until Ctrl+C.
pub async fn run_http_server(config: Config) -> Result<()> {
    let bind = config.bind.clone();
    let state = AppState::new(config).await?;
    if state.config.places.api_key.is_none() {
        warn!("PLACES_API_KEY not set - restaurant loading disabled");
    }
    if !state.describer.enabled() {
        info!("AI_API_KEY not set - restaurant descriptions disabled");
    }
    housekeeping::spawn(state.clone());
    let listener = TcpListener::bind(&bind).with_context(|| format!("bind {bind}"))?;
    listener.set_nonblocking(true)?;
    info!(%bind, "room server listening");
    axum::Server::from_tcp(listener)?
        .serve(build_router(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
