use anyhow::Result;
use room_api::{wire::Favorite, Restaurant};
use rusqlite::{params, Connection};
use time::OffsetDateTime;

/// Save a restaurant for a user. Saving it again refreshes the snapshot.
pub fn add_favorite(
    conn: &Connection,
    owner_id: &str,
    restaurant: &Restaurant,
) -> Result<Favorite> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO favorites (owner_id, restaurant_id, restaurant, created_at) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(owner_id, restaurant_id) DO UPDATE SET restaurant = excluded.restaurant",
        params![owner_id, restaurant.id, serde_json::to_string(restaurant)?, now],
    )?;
    let created_at: i64 = conn.query_row(
        "SELECT created_at FROM favorites WHERE owner_id = ?1 AND restaurant_id = ?2",
        params![owner_id, restaurant.id],
        |row| row.get(0),
    )?;
    Ok(Favorite {
        restaurant: restaurant.clone(),
        created_at,
    })
}

/// Returns true if a favorite was removed.
pub fn remove_favorite(conn: &Connection, owner_id: &str, restaurant_id: &str) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM favorites WHERE owner_id = ?1 AND restaurant_id = ?2",
        params![owner_id, restaurant_id],
    )?;
    Ok(n > 0)
}

/// Favorites for a user, newest first.
pub fn list_favorites(conn: &Connection, owner_id: &str) -> Result<Vec<Favorite>> {
    let mut stmt = conn.prepare(
        "SELECT restaurant, created_at FROM favorites \
         WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map([owner_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(json, created_at)| {
            Ok(Favorite {
                restaurant: serde_json::from_str(&json)?,
                created_at,
            })
        })
        .collect()
}

pub fn delete_all(conn: &Connection, owner_id: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM favorites WHERE owner_id = ?1", [owner_id])?)
}
