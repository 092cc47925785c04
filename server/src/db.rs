use anyhow::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::{path::Path, time::Duration};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Initialize the SQLite database and run migrations.
pub fn init_db<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Open a connection pool on a database file, creating the schema if needed.
pub fn open_pool<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path)
        .with_init(|c| c.busy_timeout(Duration::from_secs(5)));
    let pool = Pool::new(manager)?;
    pool.get()?.execute_batch(SCHEMA)?;
    Ok(pool)
}

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rooms (
  id TEXT PRIMARY KEY,
  host_id TEXT NOT NULL,
  state TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS favorites (
  owner_id TEXT NOT NULL,
  restaurant_id TEXT NOT NULL,
  restaurant TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  PRIMARY KEY (owner_id, restaurant_id)
);

CREATE TABLE IF NOT EXISTS room_history (
  owner_id TEXT NOT NULL,
  room_id TEXT NOT NULL,
  location TEXT NOT NULL,
  matched TEXT,
  joined_at INTEGER NOT NULL,
  PRIMARY KEY (owner_id, room_id)
);

CREATE INDEX IF NOT EXISTS rooms_updated ON rooms(updated_at);
"#;
