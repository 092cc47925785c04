use crate::error::{RoomError, RoomResult};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use room_api::{find_matches, is_match, Direction, Filters, Participant, Room, SwipeKind};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use time::OffsetDateTime;
use tracing::{debug, info};

static ROOM_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9]{6}$").unwrap());

// no 0/O or 1/I so codes survive being read aloud
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

pub(crate) fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Generate a fresh room code.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Normalize a user-typed room code. Returns None if it cannot be a code.
pub fn normalize_code(input: &str) -> Option<String> {
    let code = input.trim().to_ascii_uppercase();
    ROOM_CODE_RE.is_match(&code).then_some(code)
}

/// Trim a display name and check its length.
pub fn validate_name(name: &str) -> RoomResult<String> {
    let name = name.trim();
    let len = name.chars().count();
    if len == 0 || len > 40 {
        return Err(RoomError::InvalidName);
    }
    Ok(name.to_string())
}

fn load(conn: &Connection, id: &str) -> RoomResult<Option<Room>> {
    let state: Option<String> = conn
        .query_row("SELECT state FROM rooms WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    match state {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

fn store(conn: &Connection, room: &Room) -> RoomResult<()> {
    let state = serde_json::to_string(room)?;
    conn.execute(
        "UPDATE rooms SET host_id = ?2, state = ?3, updated_at = ?4 WHERE id = ?1",
        params![room.id, room.host_id, state, room.updated_at],
    )?;
    Ok(())
}

/// Insert a new room. Fails with a constraint violation if the code is taken.
fn insert(conn: &Connection, room: &Room) -> RoomResult<()> {
    let state = serde_json::to_string(room)?;
    conn.execute(
        "INSERT INTO rooms (id, host_id, state, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![room.id, room.host_id, state, room.created_at, room.updated_at],
    )?;
    Ok(())
}

fn is_taken(err: &RoomError) -> bool {
    matches!(
        err,
        RoomError::Internal(e) if matches!(
            e.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(f, _))
                if f.code == rusqlite::ErrorCode::ConstraintViolation
        )
    )
}

/// Create a room with the caller as host and first participant.
pub fn create_room(
    conn: &Connection,
    host: Participant,
    location: &str,
    filters: Filters,
) -> RoomResult<Room> {
    create_room_with(conn, host, location, filters, generate_code)
}

fn create_room_with(
    conn: &Connection,
    host: Participant,
    location: &str,
    filters: Filters,
    mut next_code: impl FnMut() -> String,
) -> RoomResult<Room> {
    let location = location.trim();
    if location.is_empty() {
        return Err(RoomError::InvalidLocation);
    }
    let now = now();
    for _ in 0..8 {
        let room = Room::new(
            next_code(),
            host.clone(),
            location.to_string(),
            filters.clone().normalized(),
            now,
        );
        match insert(conn, &room) {
            Ok(()) => {
                info!(room = %room.id, host = %room.host_id, "room created");
                return Ok(room);
            }
            Err(e) if is_taken(&e) => debug!(room = %room.id, "room code taken, retrying"),
            Err(e) => return Err(e),
        }
    }
    Err(RoomError::Internal(anyhow::anyhow!("could not allocate a room code")))
}

pub fn get_room(conn: &Connection, id: &str) -> RoomResult<Room> {
    load(conn, id)?.ok_or(RoomError::NotFound)
}

/// Read-modify-write a room inside one immediate transaction.
pub fn update_room<F, T>(conn: &mut Connection, id: &str, f: F) -> RoomResult<(Room, T)>
where
    F: FnOnce(&mut Room) -> RoomResult<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut room = load(&tx, id)?.ok_or(RoomError::NotFound)?;
    let out = f(&mut room)?;
    room.updated_at = now();
    store(&tx, &room)?;
    tx.commit()?;
    Ok((room, out))
}

fn require_participant(room: &Room, participant_id: &str) -> RoomResult<()> {
    if room.is_participant(participant_id) {
        Ok(())
    } else {
        Err(RoomError::NotParticipant)
    }
}

/// Add the caller to a room or mark them online again.
pub fn join_room(
    conn: &mut Connection,
    id: &str,
    participant_id: &str,
    name: &str,
) -> RoomResult<Room> {
    let name = validate_name(name)?;
    let (room, added) = update_room(conn, id, |room| {
        Ok(room.upsert_participant(participant_id, &name))
    })?;
    if added {
        info!(room = %id, participant = %participant_id, "participant joined");
    }
    Ok(room)
}

/// Remove the caller from a room. Returns None when the room was deleted because it emptied.
pub fn leave_room(
    conn: &mut Connection,
    id: &str,
    participant_id: &str,
) -> RoomResult<Option<Room>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut room = load(&tx, id)?.ok_or(RoomError::NotFound)?;
    if !room.remove_participant(participant_id) {
        return Err(RoomError::NotParticipant);
    }
    let result = if room.participants.is_empty() {
        tx.execute("DELETE FROM rooms WHERE id = ?1", [id])?;
        info!(room = %id, "last participant left, room deleted");
        None
    } else {
        room.updated_at = now();
        store(&tx, &room)?;
        info!(room = %id, participant = %participant_id, host = %room.host_id, "participant left");
        Some(room)
    };
    tx.commit()?;
    Ok(result)
}

/// Fold a swipe into the room. Returns the room and whether the item is now a match.
pub fn swipe(
    conn: &mut Connection,
    id: &str,
    participant_id: &str,
    kind: SwipeKind,
    item_id: &str,
    direction: Direction,
) -> RoomResult<(Room, bool)> {
    let item_id = item_id.trim();
    if item_id.is_empty() {
        return Err(RoomError::InvalidItem);
    }
    update_room(conn, id, |room| {
        require_participant(room, participant_id)?;
        if kind == SwipeKind::Restaurant && room.restaurant(item_id).is_none() {
            return Err(RoomError::UnknownRestaurant(item_id.to_string()));
        }
        room.record_swipe(participant_id, kind, item_id, direction);
        let matched = is_match(room.swipes(kind), &room.participants, item_id);
        debug!(
            room = %room.id,
            participant = %participant_id,
            item = %item_id,
            ?direction,
            matched,
            "swipe recorded"
        );
        Ok(matched)
    })
}

pub fn set_cursor(
    conn: &mut Connection,
    id: &str,
    participant_id: &str,
    index: usize,
) -> RoomResult<Room> {
    let (room, ()) = update_room(conn, id, |room| {
        require_participant(room, participant_id)?;
        room.current_index = index.min(room.restaurants.len());
        Ok(())
    })?;
    Ok(room)
}

/// Replace filters (and optionally the location). Restarts pagination.
pub fn update_filters(
    conn: &mut Connection,
    id: &str,
    participant_id: &str,
    location: Option<&str>,
    filters: Filters,
) -> RoomResult<Room> {
    let location = match location.map(str::trim) {
        Some("") => return Err(RoomError::InvalidLocation),
        other => other.map(str::to_string),
    };
    let (room, ()) = update_room(conn, id, |room| {
        require_participant(room, participant_id)?;
        if room.host_id != participant_id {
            return Err(RoomError::NotHost);
        }
        if let Some(location) = location {
            room.location = location;
        }
        room.filters = filters.normalized();
        room.reset_restaurants();
        Ok(())
    })?;
    info!(room = %id, "filters changed, restaurant list reset");
    Ok(room)
}

/// Mark participants offline. Returns true if anything changed.
pub fn set_offline(
    conn: &mut Connection,
    id: &str,
    participant_ids: &[String],
) -> RoomResult<bool> {
    let (_, changed) = update_room(conn, id, |room| {
        let mut changed = false;
        for p in participant_ids {
            changed |= room.set_online(p, false);
        }
        Ok(changed)
    })?;
    Ok(changed)
}

pub fn set_online(conn: &mut Connection, id: &str, participant_id: &str) -> RoomResult<bool> {
    let (_, changed) = update_room(conn, id, |room| Ok(room.set_online(participant_id, true)))?;
    Ok(changed)
}

/// Ids of every room the participant currently belongs to.
pub fn rooms_for_participant(conn: &Connection, participant_id: &str) -> RoomResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM rooms WHERE EXISTS ( \
             SELECT 1 FROM json_each(rooms.state, '$.participants') \
             WHERE json_extract(value, '$.id') = ?1 \
         ) ORDER BY created_at",
    )?;
    let ids = stmt
        .query_map([participant_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Delete rooms whose last update is older than `cutoff` (unix seconds).
pub fn delete_idle_rooms(conn: &Connection, cutoff: i64) -> RoomResult<usize> {
    let n = conn.execute("DELETE FROM rooms WHERE updated_at < ?1", [cutoff])?;
    Ok(n)
}

/// Matched restaurant ids and food types.
pub fn matches(room: &Room) -> room_api::wire::MatchesResp {
    room_api::wire::MatchesResp {
        restaurants: find_matches(room, SwipeKind::Restaurant),
        food_types: find_matches(room, SwipeKind::FoodType),
    }
}
