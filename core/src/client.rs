use reqwest::{Method, RequestBuilder, StatusCode};
use room_api::{
    wire::{
        AccountExport, CreateRoomReq, CursorReq, DescriptionResp, ErrorResp, Favorite, FiltersReq,
        HistoryEntry, JoinReq, MatchesResp, PageResp, SessionReq, SessionResp, SwipeReq, SwipeResp,
    },
    Direction, Filters, Restaurant, Room, SwipeKind,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not signed in, run `toss session <name>` first")]
    NoSession,
    #[error("server responded {status}: {code}")]
    Api { status: u16, code: String },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ClientError {
    /// Stable snake_case code, the server's own code for API errors.
    pub fn code(&self) -> &str {
        match self {
            ClientError::NoSession => "no_session",
            ClientError::Api { code, .. } => code,
            ClientError::Http(_) => "network_error",
        }
    }

    /// Whether retrying the same request later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::NoSession => false,
            ClientError::Api { status, .. } => matches!(*status, 429 | 500 | 502 | 504),
            ClientError::Http(e) => !e.is_decode() && !e.is_builder(),
        }
    }
}

/// Thin typed wrapper over the room server's HTTP API.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        let token = self.token.as_deref().ok_or(ClientError::NoSession)?;
        Ok(self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, ClientError> {
        let resp = check(req.send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn send_empty(req: RequestBuilder) -> Result<(), ClientError> {
        check(req.send().await?).await?;
        Ok(())
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        Self::send(self.request(Method::POST, path)?.json(body)).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        Self::send(self.request(Method::GET, path)?).await
    }

    /// Start a guest session. Does not need an existing token.
    pub async fn create_session(&self, name: &str) -> Result<SessionResp, ClientError> {
        let req = self
            .http
            .post(format!("{}/api/session", self.base_url))
            .json(&SessionReq { name: name.into() });
        Self::send(req).await
    }

    pub async fn create_room(&self, location: &str, filters: Filters) -> Result<Room, ClientError> {
        let body = CreateRoomReq {
            location: location.into(),
            filters,
        };
        self.post("/api/rooms", &body).await
    }

    pub async fn get_room(&self, id: &str) -> Result<Room, ClientError> {
        self.get(&format!("/api/rooms/{id}")).await
    }

    pub async fn join_room(&self, id: &str, name: &str) -> Result<Room, ClientError> {
        self.post(&format!("/api/rooms/{id}/join"), &JoinReq { name: name.into() })
            .await
    }

    pub async fn leave_room(&self, id: &str) -> Result<(), ClientError> {
        Self::send_empty(self.request(Method::POST, &format!("/api/rooms/{id}/leave"))?).await
    }

    pub async fn swipe(
        &self,
        id: &str,
        kind: SwipeKind,
        item_id: &str,
        direction: Direction,
    ) -> Result<SwipeResp, ClientError> {
        let body = SwipeReq {
            kind,
            item_id: item_id.into(),
            direction,
        };
        self.post(&format!("/api/rooms/{id}/swipes"), &body).await
    }

    pub async fn set_cursor(&self, id: &str, index: usize) -> Result<Room, ClientError> {
        let req = self
            .request(Method::PUT, &format!("/api/rooms/{id}/cursor"))?
            .json(&CursorReq { index });
        Self::send(req).await
    }

    pub async fn update_filters(
        &self,
        id: &str,
        location: Option<String>,
        filters: Filters,
    ) -> Result<Room, ClientError> {
        let req = self
            .request(Method::PUT, &format!("/api/rooms/{id}/filters"))?
            .json(&FiltersReq { location, filters });
        Self::send(req).await
    }

    pub async fn next_page(&self, id: &str) -> Result<PageResp, ClientError> {
        Self::send(self.request(Method::POST, &format!("/api/rooms/{id}/restaurants/next"))?).await
    }

    pub async fn matches(&self, id: &str) -> Result<MatchesResp, ClientError> {
        self.get(&format!("/api/rooms/{id}/matches")).await
    }

    pub async fn describe(
        &self,
        id: &str,
        restaurant_id: &str,
    ) -> Result<DescriptionResp, ClientError> {
        self.get(&format!("/api/rooms/{id}/restaurants/{restaurant_id}/description"))
            .await
    }

    pub async fn favorites(&self) -> Result<Vec<Favorite>, ClientError> {
        self.get("/api/favorites").await
    }

    pub async fn add_favorite(&self, restaurant: &Restaurant) -> Result<Favorite, ClientError> {
        self.post("/api/favorites", restaurant).await
    }

    /// Returns false when the restaurant was not a favorite.
    pub async fn remove_favorite(&self, restaurant_id: &str) -> Result<bool, ClientError> {
        let resp = self
            .request(Method::DELETE, &format!("/api/favorites/{restaurant_id}"))?
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(resp).await?;
        Ok(true)
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>, ClientError> {
        self.get("/api/history").await
    }

    pub async fn export_account(&self) -> Result<AccountExport, ClientError> {
        self.get("/api/account/export").await
    }

    pub async fn delete_account(&self) -> Result<(), ClientError> {
        Self::send_empty(self.request(Method::DELETE, "/api/account")?).await
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let code = match resp.json::<ErrorResp>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unknown")
            .to_lowercase()
            .replace(' ', "_"),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        code,
    })
}
