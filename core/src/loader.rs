use crate::client::{ApiClient, ClientError};
use async_trait::async_trait;
use room_api::{wire::PageResp, Room, RetryConfig};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, warn};

pub const PREFETCH_THRESHOLD: usize = 5;

/// Server side of restaurant paging.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn next_page(&self, room_id: &str) -> Result<PageResp, ClientError>;
}

#[async_trait]
impl PageSource for ApiClient {
    async fn next_page(&self, room_id: &str) -> Result<PageResp, ClientError> {
        ApiClient::next_page(self, room_id).await
    }
}

/// Asks the server for more restaurants as the user nears the end of the list.
pub struct RestaurantLoader<S> {
    source: Arc<S>,
    room_id: String,
    prefetch_threshold: usize,
    retry: RetryConfig,
    loading: AtomicBool,
    exhausted: AtomicBool,
}

impl<S: PageSource> RestaurantLoader<S> {
    pub fn new(source: Arc<S>, room_id: &str) -> Self {
        Self {
            source,
            room_id: room_id.to_string(),
            prefetch_threshold: PREFETCH_THRESHOLD,
            retry: RetryConfig::for_api(),
            loading: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.prefetch_threshold = threshold;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Whether a page should be requested when the user is at `position`.
    pub fn needs_more(&self, room: &Room, position: usize) -> bool {
        if self.is_loading() {
            return false;
        }
        if room.restaurants.is_empty() {
            return !self.exhausted.load(Ordering::Acquire);
        }
        let remaining = room.restaurants.len().saturating_sub(position);
        remaining <= self.prefetch_threshold && room.next_page_token.is_some()
    }

    /// Load the next page, retrying transient failures. Returns `None` when
    /// another load is already running.
    pub async fn load_more(&self) -> Result<Option<PageResp>, ClientError> {
        if self.loading.swap(true, Ordering::AcqRel) {
            return Ok(None);
        }
        let result = self.load_with_retry().await;
        self.loading.store(false, Ordering::Release);
        let page = result?;
        if !page.has_more {
            self.exhausted.store(true, Ordering::Release);
        }
        debug!(room = %self.room_id, added = page.added, has_more = page.has_more, "page loaded");
        Ok(Some(page))
    }

    async fn load_with_retry(&self) -> Result<PageResp, ClientError> {
        let mut attempt = 0;
        loop {
            match self.source.next_page(&self.room_id).await {
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        room = %self.room_id,
                        attempt,
                        ?delay,
                        error = %e,
                        "page load failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Forget that the list ran out, after the filters changed.
    pub fn reset(&self) {
        self.exhausted.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use room_api::{Filters, Participant, Restaurant};
    use std::{collections::VecDeque, sync::atomic::AtomicUsize};
    use tokio::sync::Notify;

    struct Pages {
        script: Mutex<VecDeque<Result<PageResp, ClientError>>>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl PageSource for Pages {
        async fn next_page(&self, _room_id: &str) -> Result<PageResp, ClientError> {
            *self.calls.lock() += 1;
            self.script.lock().pop_front().unwrap_or(Err(ClientError::NoSession))
        }
    }

    /// Holds every request until the gate opens.
    struct Gated {
        gate: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageSource for Gated {
        async fn next_page(&self, _room_id: &str) -> Result<PageResp, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(page(2, true))
        }
    }

    fn pages(script: Vec<Result<PageResp, ClientError>>) -> Arc<Pages> {
        Arc::new(Pages {
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
        })
    }

    fn room(n: usize, token: Option<&str>) -> Room {
        let host = Participant {
            id: "a".into(),
            name: "Ann".into(),
            online: true,
        };
        let mut room = Room::new("R1".into(), host, "Oslo".into(), Filters::default(), 0);
        room.append_restaurants((0..n).map(|i| Restaurant {
            id: format!("p{i}"),
            name: format!("Place {i}"),
            address: String::new(),
            rating: None,
            price_level: None,
            photo_ref: None,
            lat: None,
            lng: None,
            types: vec![],
        }));
        room.next_page_token = token.map(str::to_string);
        room
    }

    fn page(added: usize, has_more: bool) -> PageResp {
        PageResp {
            added,
            has_more,
            room: room(added, has_more.then_some("t")),
        }
    }

    #[test]
    fn prefetches_near_the_end() {
        let loader = RestaurantLoader::new(pages(vec![]), "R1");
        let r = room(20, Some("t"));
        assert!(!loader.needs_more(&r, 10));
        assert!(loader.needs_more(&r, 15));
        assert!(!loader.needs_more(&room(20, None), 19));
        assert!(loader.needs_more(&room(0, None), 0));
    }

    #[tokio::test]
    async fn empty_result_stops_until_reset() {
        let loader = RestaurantLoader::new(pages(vec![Ok(page(0, false))]), "R1");
        let empty = room(0, None);
        assert!(loader.load_more().await.unwrap().is_some());
        assert!(!loader.needs_more(&empty, 0));
        loader.reset();
        assert!(loader.needs_more(&empty, 0));
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let source = pages(vec![
            Err(ClientError::Api {
                status: 502,
                code: "upstream_error".into(),
            }),
            Ok(page(3, true)),
        ]);
        let loader =
            RestaurantLoader::new(source.clone(), "R1").with_retry(RetryConfig::immediate(3));
        let got = loader.load_more().await.unwrap().unwrap();
        assert_eq!(got.added, 3);
        assert_eq!(*source.calls.lock(), 2);
        assert!(!loader.is_loading());
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let source = pages(vec![Err(ClientError::Api {
            status: 503,
            code: "places_disabled".into(),
        })]);
        let loader =
            RestaurantLoader::new(source.clone(), "R1").with_retry(RetryConfig::immediate(3));
        let err = loader.load_more().await.unwrap_err();
        assert_eq!(err.code(), "places_disabled");
        assert_eq!(*source.calls.lock(), 1);
    }

    #[tokio::test]
    async fn background_load_holds_off_duplicates() {
        let source = Arc::new(Gated {
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let loader = Arc::new(RestaurantLoader::new(source.clone(), "R1"));
        let task = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load_more().await }
        });
        while !loader.is_loading() {
            tokio::task::yield_now().await;
        }

        assert!(!loader.needs_more(&room(0, None), 0));
        assert!(loader.load_more().await.unwrap().is_none());

        source.gate.notify_one();
        let got = task.await.unwrap().unwrap().unwrap();
        assert_eq!(got.added, 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(!loader.is_loading());
    }
}
