use crate::{
    config::AiConfig,
    error::{RoomError, RoomResult},
};
use parking_lot::Mutex;
use room_api::Restaurant;
use serde::Deserialize;
use serde_json::json;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

pub const DESCRIPTION_TTL: Duration = Duration::from_secs(6 * 3600);

const SYSTEM_PROMPT: &str =
    "You write brief, friendly restaurant descriptions for a food discovery app.";

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Generates short restaurant blurbs through a chat completions API and caches them.
pub struct Describer {
    http: reqwest::Client,
    cfg: AiConfig,
    cache: Mutex<HashMap<String, (String, Instant)>>,
    ttl: Duration,
}

fn prompt(r: &Restaurant) -> String {
    let mut p = format!("Describe the restaurant \"{}\"", r.name);
    if !r.address.is_empty() {
        p.push_str(&format!(" at {}", r.address));
    }
    if let Some(rating) = r.rating {
        p.push_str(&format!(", rated {rating:.1}/5"));
    }
    if let Some(price) = r.price_level {
        p.push_str(&format!(", price level {}", "$".repeat(price.max(1) as usize)));
    }
    let tags: Vec<&str> = r
        .types
        .iter()
        .map(String::as_str)
        .filter(|t| !matches!(*t, "restaurant" | "food" | "point_of_interest" | "establishment"))
        .collect();
    if !tags.is_empty() {
        p.push_str(&format!(", tagged {}", tags.join(", ")));
    }
    p.push_str(". One short, appetizing paragraph, no more than 60 words.");
    p
}

impl Describer {
    pub fn new(cfg: AiConfig, ttl: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.api_key.is_some()
    }

    fn cached(&self, id: &str, now: Instant) -> Option<String> {
        let guard = self.cache.lock();
        guard
            .get(id)
            .filter(|(_, at)| now.duration_since(*at) < self.ttl)
            .map(|(text, _)| text.clone())
    }

    pub async fn describe(&self, restaurant: &Restaurant) -> RoomResult<String> {
        let key = self.cfg.api_key.as_deref().ok_or(RoomError::DescriptionsDisabled)?;
        if let Some(text) = self.cached(&restaurant.id, Instant::now()) {
            return Ok(text);
        }
        let url = format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.cfg.model,
            "max_tokens": 160,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt(restaurant)},
            ],
        });
        let resp = self
            .http
            .post(url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RoomError::Upstream(e.to_string()))?;
        if !resp.status().is_success() {
            warn!(
                status = %resp.status(),
                restaurant = %restaurant.id,
                "description request failed"
            );
            return Err(RoomError::Upstream(format!("status {}", resp.status())));
        }
        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| RoomError::Upstream(e.to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RoomError::Upstream("empty completion".into()))?;
        self.cache
            .lock()
            .insert(restaurant.id.clone(), (text.clone(), Instant::now()));
        debug!(restaurant = %restaurant.id, "description generated");
        Ok(text)
    }

    /// Drop expired cache entries. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut guard = self.cache.lock();
        let before = guard.len();
        guard.retain(|_, (_, at)| now.duration_since(*at) < self.ttl);
        before - guard.len()
    }
}
