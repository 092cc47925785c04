use anyhow::Result;
use room_api::{wire::HistoryEntry, Restaurant};
use rusqlite::{params, Connection};
use time::OffsetDateTime;

/// Remember that a user took part in a room. Re-joining keeps the first entry.
pub fn record_join(
    conn: &Connection,
    owner_id: &str,
    room_id: &str,
    location: &str,
) -> Result<()> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT OR IGNORE INTO room_history (owner_id, room_id, location, joined_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![owner_id, room_id, location, now],
    )?;
    Ok(())
}

/// Fill in the matched restaurant for everyone who was in the room, unless a match
/// was already recorded. Returns the number of entries updated.
pub fn record_match(
    conn: &Connection,
    owner_ids: &[String],
    room_id: &str,
    location: &str,
    restaurant: &Restaurant,
) -> Result<usize> {
    let json = serde_json::to_string(restaurant)?;
    let mut updated = 0;
    for owner in owner_ids {
        record_join(conn, owner, room_id, location)?;
        updated += conn.execute(
            "UPDATE room_history SET matched = ?3 \
             WHERE owner_id = ?1 AND room_id = ?2 AND matched IS NULL",
            params![owner, room_id, json],
        )?;
    }
    Ok(updated)
}

/// History for a user, newest first.
pub fn list_history(conn: &Connection, owner_id: &str) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT room_id, location, matched, joined_at FROM room_history \
         WHERE owner_id = ?1 ORDER BY joined_at DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map([owner_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(room_id, location, matched, joined_at)| {
            Ok(HistoryEntry {
                room_id,
                location,
                matched: matched.map(|m| serde_json::from_str(&m)).transpose()?,
                joined_at,
            })
        })
        .collect()
}

pub fn delete_all(conn: &Connection, owner_id: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM room_history WHERE owner_id = ?1", [owner_id])?)
}
