use crate::matches::ShownMatch;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tokio::{fs, sync::Mutex};
use tracing::warn;

const SESSION_KEY: &str = "session";

/// The guest identity issued by the room server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub token: String,
    pub participant_id: String,
    pub name: String,
}

/// JSON key-value file holding the client's session and shown matches.
pub struct Storage {
    file: PathBuf,
    data: Mutex<HashMap<String, Value>>,
}

impl Storage {
    /// Open storage in `dir`, or the platform data directory when `None`.
    pub async fn open(dir: Option<&Path>) -> Result<Self> {
        let dir = match dir {
            Some(d) => d.to_path_buf(),
            None => ProjectDirs::from("org", "toss", "toss")
                .context("no home directory for local storage")?
                .data_dir()
                .to_path_buf(),
        };
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create {}", dir.display()))?;
        let file = dir.join("client.json");
        let data = match fs::read(&file).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(file = %file.display(), error = %e, "ignoring corrupt storage file");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Ok(Self {
            file,
            data: Mutex::new(data),
        })
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().await.get(key).cloned()
    }

    pub async fn put(&self, key: String, value: Value) -> Result<()> {
        let mut data = self.data.lock().await;
        data.insert(key, value);
        self.flush(&data).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let mut data = self.data.lock().await;
        if data.remove(key).is_some() {
            self.flush(&data).await?;
        }
        Ok(())
    }

    async fn flush(&self, data: &HashMap<String, Value>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(data)?;
        fs::write(&self.file, bytes)
            .await
            .with_context(|| format!("write {}", self.file.display()))
    }

    async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .await
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub async fn session(&self) -> Option<StoredSession> {
        self.get_as(SESSION_KEY).await
    }

    pub async fn set_session(&self, session: &StoredSession) -> Result<()> {
        self.put(SESSION_KEY.into(), serde_json::to_value(session)?).await
    }

    pub async fn clear_session(&self) -> Result<()> {
        self.remove(SESSION_KEY).await
    }

    pub async fn shown_matches(&self, room_id: &str) -> Vec<ShownMatch> {
        self.get_as(&shown_key(room_id)).await.unwrap_or_default()
    }

    pub async fn set_shown_matches(&self, room_id: &str, shown: &[ShownMatch]) -> Result<()> {
        self.put(shown_key(room_id), serde_json::to_value(shown)?).await
    }
}

fn shown_key(room_id: &str) -> String {
    format!("shown:{room_id}")
}
