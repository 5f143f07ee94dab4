//! Cache API: `caches.open()`, `cache.match()`, `cache.put()`, `cache.addAll()`.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache (one per generation, e.g. "trakkertime-cache-v2")
//!             └── normalized GET URL → CacheEntry
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::try_join_all;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};
use trakker_net::{Fetcher, Request, Response, ResponseType};
use url::Url;

use crate::ServiceWorkerError;

/// Cache key for a request URL: absolute, fragment stripped.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

// ==================== Entry ====================

/// A cached GET request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Normalized request URL.
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Basic or CORS; opaque responses are never stored.
    pub response_type: ResponseType,

    /// Response headers in received order, values as raw bytes.
    pub headers: Vec<(String, Bytes)>,

    /// Response body.
    pub body: Bytes,
}

impl CacheEntry {
    /// Capture a response for storage.
    pub fn capture(url: &Url, response: &Response) -> Self {
        Self {
            url: cache_key(url),
            status: response.status,
            response_type: response.response_type,
            headers: response
                .headers
                .iter()
                .map(|(name, value)| {
                    (name.as_str().to_string(), Bytes::copy_from_slice(value.as_bytes()))
                })
                .collect(),
            body: response.body().clone(),
        }
    }

    /// Bytes this entry counts against the storage quota.
    pub fn size(&self) -> u64 {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        (self.url.len() + headers + self.body.len()) as u64
    }

    /// Rebuild a response from this entry.
    pub fn to_response(&self) -> Result<Response, ServiceWorkerError> {
        let url = Url::parse(&self.url)
            .map_err(|e| ServiceWorkerError::CacheError(format!("corrupt key {}: {e}", self.url)))?;
        let status = StatusCode::from_u16(self.status).map_err(|e| {
            ServiceWorkerError::CacheError(format!("corrupt status {}: {e}", self.status))
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_bytes(value),
            ) {
                headers.append(n, v);
            }
        }

        Ok(Response::new(url, status, headers, self.body.clone()).with_type(self.response_type))
    }
}

// ==================== Quota ====================

/// Storage usage shared by every cache in one [`CacheStorage`].
#[derive(Debug, Default)]
struct Quota {
    limit: Option<u64>,
    used: AtomicU64,
}

impl Quota {
    /// Reserve `added` bytes while releasing `released`.
    fn reserve(&self, added: u64, released: u64) -> Result<(), ServiceWorkerError> {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(released) + added;
            if let Some(limit) = self.limit {
                if next > limit && added > released {
                    return Err(ServiceWorkerError::QuotaExceeded {
                        needed: added,
                        available: limit.saturating_sub(current.saturating_sub(released)),
                    });
                }
            }
            match self
                .used
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}

// ==================== Cache ====================

/// One named cache generation.
#[derive(Debug)]
pub struct Cache {
    name: String,
    entries: RwLock<HashMap<String, CacheEntry>>,
    quota: Arc<Quota>,
}

impl Cache {
    fn new(name: &str, quota: Arc<Quota>) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
            quota,
        }
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a request. Only GET requests can match.
    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        if request.method != Method::GET {
            return None;
        }
        self.match_url(&request.url).await
    }

    /// Match a URL.
    pub async fn match_url(&self, url: &Url) -> Option<Response> {
        let key = cache_key(url);
        let entries = self.entries.read().await;
        let entry = entries.get(&key)?;
        match entry.to_response() {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(cache = %self.name, url = %key, error = %e, "Dropping unreadable entry");
                None
            }
        }
    }

    /// Store a response for a GET request. Last write wins.
    pub async fn put(&self, request: &Request, response: Response) -> Result<(), ServiceWorkerError> {
        if request.method != Method::GET {
            return Err(ServiceWorkerError::CacheError(format!(
                "cannot cache {} request",
                request.method
            )));
        }
        if response.is_opaque() {
            return Err(ServiceWorkerError::CacheError(
                "cannot cache an opaque response".to_string(),
            ));
        }

        let entry = CacheEntry::capture(&request.url, &response);
        let mut entries = self.entries.write().await;
        let released = entries.get(&entry.url).map(CacheEntry::size).unwrap_or(0);
        self.quota.reserve(entry.size(), released)?;
        trace!(cache = %self.name, url = %entry.url, "Cache put");
        entries.insert(entry.url.clone(), entry);
        Ok(())
    }

    /// Fetch every URL and store all of them, or none.
    ///
    /// Fails if any fetch fails, or any response is not OK or is opaque.
    /// Nothing becomes visible until every response is in hand. Returns the
    /// number of distinct entries committed.
    pub async fn add_all(
        &self,
        fetcher: &dyn Fetcher,
        urls: &[Url],
    ) -> Result<usize, ServiceWorkerError> {
        let staged = try_join_all(urls.iter().map(|url| async move {
            let response = fetcher
                .fetch(Request::get(url.clone()))
                .await
                .map_err(|e| ServiceWorkerError::NetworkError(format!("{url}: {e}")))?;
            if !response.ok() || response.is_opaque() {
                return Err(ServiceWorkerError::NetworkError(format!(
                    "{url}: unusable response (status {})",
                    response.status
                )));
            }
            Ok::<_, ServiceWorkerError>(CacheEntry::capture(url, &response))
        }))
        .await?;

        let mut entries = self.entries.write().await;
        let mut batch: HashMap<String, CacheEntry> = HashMap::with_capacity(staged.len());
        for entry in staged {
            batch.insert(entry.url.clone(), entry);
        }
        let added: u64 = batch.values().map(CacheEntry::size).sum();
        let released: u64 = batch
            .keys()
            .filter_map(|k| entries.get(k))
            .map(CacheEntry::size)
            .sum();
        self.quota.reserve(added, released)?;

        let committed = batch.len();
        entries.extend(batch);
        debug!(cache = %self.name, committed, "addAll committed");
        Ok(committed)
    }

    /// Delete an entry.
    pub async fn delete(&self, url: &Url) -> bool {
        let removed = self.entries.write().await.remove(&cache_key(url));
        match removed {
            Some(entry) => {
                self.quota.release(entry.size());
                true
            }
            None => false,
        }
    }

    /// All keys (URLs), sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache has no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn total_size(&self) -> u64 {
        self.entries.read().await.values().map(CacheEntry::size).sum()
    }
}

// ==================== Cache Storage ====================

/// Cache storage (caches global), shared by every worker of an origin.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: RwLock<HashMap<String, Arc<Cache>>>,
    quota: Arc<Quota>,
}

impl CacheStorage {
    /// Create unbounded cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create cache storage limited to `limit` bytes.
    pub fn with_quota(limit: u64) -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            quota: Arc::new(Quota {
                limit: Some(limit),
                used: AtomicU64::new(0),
            }),
        }
    }

    /// Open a cache (creates if doesn't exist).
    pub async fn open(&self, name: &str) -> Arc<Cache> {
        if let Some(cache) = self.caches.read().await.get(name) {
            return Arc::clone(cache);
        }
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Cache::new(name, Arc::clone(&self.quota))));
        Arc::clone(cache)
    }

    /// Get an existing cache without creating it.
    pub async fn get(&self, name: &str) -> Option<Arc<Cache>> {
        self.caches.read().await.get(name).cloned()
    }

    /// Check if cache exists.
    pub async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    /// Delete a cache. Returns false if it did not exist.
    pub async fn delete(&self, name: &str) -> bool {
        let removed = self.caches.write().await.remove(name);
        match removed {
            Some(cache) => {
                self.quota.release(cache.total_size().await);
                true
            }
            None => false,
        }
    }

    /// All cache names, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.caches.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Bytes currently stored across all caches.
    pub fn usage(&self) -> u64 {
        self.quota.used.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use trakker_net::NetError;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn ok_response(u: &str, body: &'static str) -> Response {
        Response::new(url(u), StatusCode::OK, HeaderMap::new(), body)
    }

    /// Serves a fixed body for every URL except those listed as failing.
    struct StaticFetcher {
        failing: Vec<String>,
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, request: Request) -> Result<Response, NetError> {
            if self.failing.iter().any(|f| request.url.as_str() == f) {
                return Err(NetError::RequestFailed("connection refused".to_string()));
            }
            Ok(Response::new(
                request.url.clone(),
                StatusCode::OK,
                HeaderMap::new(),
                Bytes::from(format!("body of {}", request.url.path())),
            ))
        }
    }

    #[test]
    fn test_cache_key_strips_fragment() {
        assert_eq!(
            cache_key(&url("https://example.com/index.html#top")),
            "https://example.com/index.html"
        );
    }

    #[tokio::test]
    async fn test_cache_put_and_match() {
        let storage = CacheStorage::new();
        let cache = storage.open("v1").await;

        let request = Request::get(url("https://example.com/style.css"));
        cache
            .put(&request, ok_response("https://example.com/style.css", "body{}"))
            .await
            .unwrap();

        let hit = cache.match_request(&request).await.unwrap();
        assert_eq!(hit.body().as_ref(), b"body{}");
        assert!(cache
            .match_url(&url("https://example.com/other.css"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_cache_rejects_non_get() {
        let storage = CacheStorage::new();
        let cache = storage.open("v1").await;
        let post = Request::post(url("https://example.com/timer/start"), Bytes::new());

        let result = cache
            .put(&post, ok_response("https://example.com/timer/start", "{}"))
            .await;
        assert!(matches!(result, Err(ServiceWorkerError::CacheError(_))));
        assert!(cache.is_empty().await);
        assert!(cache.match_request(&post).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_rejects_opaque() {
        let storage = CacheStorage::new();
        let cache = storage.open("v1").await;
        let request = Request::get(url("https://cdn.example.net/a.png"));

        let result = cache.put(&request, Response::opaque(request.url.clone())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cache_delete() {
        let storage = CacheStorage::new();
        let cache = storage.open("v1").await;
        let request = Request::get(url("https://example.com/style.css"));
        cache
            .put(&request, ok_response("https://example.com/style.css", "x"))
            .await
            .unwrap();

        assert!(cache.delete(&request.url).await);
        assert!(!cache.delete(&request.url).await);
        assert!(cache.match_request(&request).await.is_none());
        assert_eq!(storage.usage(), 0);
    }

    #[tokio::test]
    async fn test_add_all_commits_everything() {
        let storage = CacheStorage::new();
        let cache = storage.open("v1").await;
        let fetcher = StaticFetcher { failing: vec![] };
        let urls = vec![url("https://example.com/a.js"), url("https://example.com/b.js")];

        let committed = cache.add_all(&fetcher, &urls).await.unwrap();
        assert_eq!(committed, 2);
        assert_eq!(
            cache.keys().await,
            vec!["https://example.com/a.js", "https://example.com/b.js"]
        );
    }

    #[tokio::test]
    async fn test_add_all_is_all_or_nothing() {
        let storage = CacheStorage::new();
        let cache = storage.open("v1").await;
        let fetcher = StaticFetcher {
            failing: vec!["https://example.com/b.js".to_string()],
        };
        let urls = vec![url("https://example.com/a.js"), url("https://example.com/b.js")];

        let result = cache.add_all(&fetcher, &urls).await;
        assert!(matches!(result, Err(ServiceWorkerError::NetworkError(_))));
        assert!(cache.is_empty().await);
        assert_eq!(storage.usage(), 0);
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let storage = CacheStorage::with_quota(64);
        let cache = storage.open("v1").await;
        let request = Request::get(url("https://example.com/big.bin"));
        let big = Response::new(
            request.url.clone(),
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from(vec![0u8; 128]),
        );

        let result = cache.put(&request, big).await;
        assert!(matches!(result, Err(ServiceWorkerError::QuotaExceeded { .. })));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_overwrite_releases_old_size() {
        let storage = CacheStorage::new();
        let cache = storage.open("v1").await;
        let request = Request::get(url("https://example.com/a"));

        cache.put(&request, ok_response("https://example.com/a", "long body")).await.unwrap();
        let first = storage.usage();
        cache.put(&request, ok_response("https://example.com/a", "s")).await.unwrap();

        assert!(storage.usage() < first);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_cache_storage() {
        let storage = CacheStorage::new();

        assert!(!storage.has("v1").await);
        assert!(storage.get("v1").await.is_none());

        storage.open("v1").await;
        storage.open("v2").await;
        assert_eq!(storage.keys().await, vec!["v1", "v2"]);

        assert!(storage.delete("v1").await);
        assert!(!storage.delete("v1").await);
        assert!(!storage.has("v1").await);
    }

    #[tokio::test]
    async fn test_entry_round_trips_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("text/css"));
        let response = Response::new(url("https://example.com/s.css"), StatusCode::OK, headers, "a{}");

        let entry = CacheEntry::capture(&response.url, &response);
        let restored = entry.to_response().unwrap();
        assert_eq!(restored.headers.get("content-type").unwrap(), "text/css");
        assert_eq!(restored.body(), response.body());
    }

    #[tokio::test]
    async fn test_entry_keeps_non_utf8_header_values() {
        let raw = b"attachment; filename=\"caf\xe9.csv\"";
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_DISPOSITION,
            HeaderValue::from_bytes(raw).unwrap(),
        );
        headers.append("x-trace", HeaderValue::from_static("a"));
        headers.append("x-trace", HeaderValue::from_static("b"));
        let response = Response::new(url("https://example.com/export.csv"), StatusCode::OK, headers, "1,2");

        let restored = CacheEntry::capture(&response.url, &response).to_response().unwrap();
        assert_eq!(restored.headers.get("content-disposition").unwrap().as_bytes(), &raw[..]);
        let traces: Vec<_> = restored.headers.get_all("x-trace").iter().collect();
        assert_eq!(traces, vec!["a", "b"]);
    }
}
