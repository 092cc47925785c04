use crate::config::PlacesConfig;
use room_api::{Filters, Restaurant, RetryConfig};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum PlacesError {
    #[error("places API key is not configured")]
    Disabled,
    #[error("places API rate limit exceeded")]
    RateLimited,
    #[error("places API rejected the request")]
    InvalidRequest,
    #[error("location {0:?} could not be geocoded")]
    LocationNotFound(String),
    #[error("places API returned status {0}")]
    Status(String),
    #[error("invalid places URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("places request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// One page of search results.
#[derive(Debug, Clone)]
pub struct PlacesPage {
    pub restaurants: Vec<Restaurant>,
    pub next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Deserialize)]
struct Photo {
    photo_reference: String,
}

#[derive(Deserialize)]
struct PlaceResult {
    place_id: String,
    name: String,
    #[serde(default)]
    vicinity: Option<String>,
    #[serde(default)]
    formatted_address: Option<String>,
    #[serde(default)]
    rating: Option<f32>,
    #[serde(default)]
    price_level: Option<u8>,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    geometry: Option<Geometry>,
    #[serde(default)]
    photos: Vec<Photo>,
}

#[derive(Deserialize)]
struct NearbyResponse {
    status: String,
    #[serde(default)]
    results: Vec<PlaceResult>,
    #[serde(default)]
    next_page_token: Option<String>,
}

trait Status {
    fn status(&self) -> &str;
}

impl Status for GeocodeResponse {
    fn status(&self) -> &str {
        &self.status
    }
}

impl Status for NearbyResponse {
    fn status(&self) -> &str {
        &self.status
    }
}

impl From<PlaceResult> for Restaurant {
    fn from(p: PlaceResult) -> Self {
        let (lat, lng) = match p.geometry {
            Some(g) => (Some(g.location.lat), Some(g.location.lng)),
            None => (None, None),
        };
        Restaurant {
            id: p.place_id,
            name: p.name,
            address: p.vicinity.or(p.formatted_address).unwrap_or_default(),
            rating: p.rating,
            price_level: p.price_level,
            photo_ref: p.photos.into_iter().next().map(|ph| ph.photo_reference),
            lat,
            lng,
            types: p.types,
        }
    }
}

/// Client for the upstream places and geocoding API.
#[derive(Clone)]
pub struct PlacesClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryConfig,
}

impl PlacesClient {
    pub fn new(cfg: &PlacesConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            retry: RetryConfig::for_api(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn key(&self) -> Result<&str, PlacesError> {
        self.api_key.as_deref().ok_or(PlacesError::Disabled)
    }

    fn endpoint(&self, path: &str) -> Result<Url, PlacesError> {
        Ok(Url::parse(&format!("{}/{}", self.base_url, path))?)
    }

    /// Resolve a free-form location to coordinates.
    pub async fn geocode(&self, location: &str) -> Result<(f64, f64), PlacesError> {
        let mut url = self.endpoint("geocode/json")?;
        url.query_pairs_mut()
            .append_pair("address", location)
            .append_pair("key", self.key()?);
        let resp: GeocodeResponse = self.get_with_retry(url, false).await?;
        resp.results
            .into_iter()
            .next()
            .map(|r| (r.geometry.location.lat, r.geometry.location.lng))
            .ok_or_else(|| PlacesError::LocationNotFound(location.to_string()))
    }

    /// Fetch the next page of restaurants. Without a token this is the first page
    /// for `location` and `filters`.
    pub async fn fetch_page(
        &self,
        location: &str,
        filters: &Filters,
        page_token: Option<&str>,
    ) -> Result<PlacesPage, PlacesError> {
        let key = self.key()?;
        let mut url = self.endpoint("place/nearbysearch/json")?;
        // a fresh page token is rejected until it propagates upstream
        let retry_invalid = page_token.is_some();
        match page_token {
            Some(token) => {
                url.query_pairs_mut()
                    .append_pair("pagetoken", token)
                    .append_pair("key", key);
            }
            None => {
                let (lat, lng) = self.geocode(location).await?;
                let mut q = url.query_pairs_mut();
                q.append_pair("location", &format!("{lat},{lng}"))
                    .append_pair("radius", &filters.radius_m.to_string())
                    .append_pair("type", "restaurant");
                if let Some(keyword) = &filters.keyword {
                    q.append_pair("keyword", keyword);
                }
                if filters.open_now {
                    q.append_pair("opennow", "true");
                }
                q.append_pair("key", key);
            }
        }
        let resp: NearbyResponse = self.get_with_retry(url, retry_invalid).await?;
        let fetched = resp.results.len();
        let restaurants: Vec<Restaurant> = resp
            .results
            .into_iter()
            .map(Restaurant::from)
            .filter(|r| filters.accepts(r))
            .collect();
        debug!(
            fetched,
            kept = restaurants.len(),
            has_more = resp.next_page_token.is_some(),
            "places page"
        );
        Ok(PlacesPage {
            restaurants,
            next_page_token: resp.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn get_with_retry<T>(&self, url: Url, retry_invalid: bool) -> Result<T, PlacesError>
    where
        T: DeserializeOwned + Status,
    {
        let mut attempt = 0;
        loop {
            let outcome = self.get_json::<T>(url.clone()).await;
            let retryable = match &outcome {
                Err(PlacesError::RateLimited) => true,
                Err(PlacesError::InvalidRequest) => retry_invalid,
                _ => false,
            };
            if retryable && self.retry.should_retry(attempt) {
                let delay = self.retry.delay_for_attempt(attempt);
                warn!(attempt, ?delay, error = ?outcome.as_ref().err(), "retrying places request");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            return outcome;
        }
    }

    async fn get_json<T>(&self, url: Url) -> Result<T, PlacesError>
    where
        T: DeserializeOwned + Status,
    {
        let resp = self.http.get(url).send().await?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PlacesError::RateLimited);
        }
        let body: T = resp.error_for_status()?.json().await?;
        match body.status() {
            "OK" | "ZERO_RESULTS" => Ok(body),
            "OVER_QUERY_LIMIT" => Err(PlacesError::RateLimited),
            "INVALID_REQUEST" => Err(PlacesError::InvalidRequest),
            other => Err(PlacesError::Status(other.to_string())),
        }
    }
}
