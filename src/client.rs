/// Database client seams and the shared client cache.
///
/// The sampler never talks to a database directly. It asks a `ClientCache`
/// for a client for an (endpoint, credential) pair, opens a container on
/// it, and runs a query that yields one diagnostics block per page.
use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Lazy, finite, non-restartable sequence of page diagnostics blocks.
pub type PageStream = Box<dyn Iterator<Item = Result<String, QueryError>> + Send>;

/// Account key or token. Never printed.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    #[cfg(test)]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Per-query request options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub page_size: u32,
    pub max_degree_of_parallelism: u32,
    pub max_buffered_item_count: u32,
    pub metrics_enabled: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_degree_of_parallelism: 10,
            max_buffered_item_count: 100,
            metrics_enabled: true,
        }
    }
}

/// A queryable container (collection) inside a database.
pub trait QueryContainer: Send + Sync {
    /// Start a query. Errors raised before the first page come back here;
    /// errors while paging come back as items of the stream.
    fn query_pages(&self, query: &str, options: &QueryOptions) -> Result<PageStream, QueryError>;
}

/// A live connection to one account.
pub trait DocumentClient: Send + Sync {
    fn container(
        &self,
        database: &str,
        container: &str,
    ) -> Result<Arc<dyn QueryContainer>, QueryError>;

    /// Release the client's resources. Called once when the cache drops it.
    fn close(&self);
}

/// Builds clients for the cache.
pub trait ClientFactory: Send + Sync {
    type Client: DocumentClient;

    fn connect(&self, endpoint: &str, credential: &Credential) -> Result<Self::Client, QueryError>;
}

struct CachedClient<C> {
    endpoint: String,
    credential: Credential,
    client: Arc<C>,
}

/// Holds at most one live client, keyed by (endpoint, credential).
///
/// Shared by reference between every sampler of a run. Asking for a
/// different pair closes the current client before connecting a new one.
pub struct ClientCache<F: ClientFactory> {
    factory: F,
    slot: Mutex<Option<CachedClient<F::Client>>>,
}

impl<F: ClientFactory> ClientCache<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached client for this pair, connecting if needed.
    pub fn acquire(
        &self,
        endpoint: &str,
        credential: &Credential,
    ) -> Result<Arc<F::Client>, QueryError> {
        let mut slot = self.lock();

        if let Some(cached) = slot.as_ref() {
            if cached.endpoint == endpoint && &cached.credential == credential {
                return Ok(Arc::clone(&cached.client));
            }
        }

        if let Some(previous) = slot.take() {
            tracing::info!(
                previous = %previous.endpoint,
                endpoint,
                "connection settings changed, closing cached client"
            );
            previous.client.close();
        }

        tracing::info!(endpoint, "connecting document client");
        let client = Arc::new(self.factory.connect(endpoint, credential)?);
        *slot = Some(CachedClient {
            endpoint: endpoint.to_string(),
            credential: credential.clone(),
            client: Arc::clone(&client),
        });
        Ok(client)
    }

    /// Close and forget the cached client. Safe to call repeatedly.
    pub fn release(&self) {
        if let Some(cached) = self.lock().take() {
            tracing::info!(endpoint = %cached.endpoint, "closing document client");
            cached.client.close();
        }
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<CachedClient<F::Client>>> {
        // A panic while holding the lock leaves the slot in a usable state.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory client used by the cache and sampler tests.
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct Counters {
        pub connects: AtomicUsize,
        pub closes: AtomicUsize,
        pub containers: AtomicUsize,
    }

    /// Serves the same pages (or one error) for every query.
    pub struct StubFactory {
        pub counters: Arc<Counters>,
        pub pages: Vec<String>,
        pub fail_query: Option<u16>,
    }

    impl StubFactory {
        pub fn new(pages: &[&str]) -> Self {
            Self {
                counters: Arc::new(Counters::default()),
                pages: pages.iter().map(|p| p.to_string()).collect(),
                fail_query: None,
            }
        }

        pub fn failing(status: u16) -> Self {
            Self {
                fail_query: Some(status),
                ..Self::new(&[])
            }
        }
    }

    pub struct StubClient {
        counters: Arc<Counters>,
        pages: Vec<String>,
        fail_query: Option<u16>,
        pub endpoint: String,
    }

    struct StubContainer {
        pages: Vec<String>,
        fail_query: Option<u16>,
    }

    impl ClientFactory for StubFactory {
        type Client = StubClient;

        fn connect(&self, endpoint: &str, _credential: &Credential) -> Result<StubClient, QueryError> {
            if endpoint.is_empty() {
                return Err(QueryError::Connect {
                    endpoint: endpoint.to_string(),
                    message: "endpoint is empty".into(),
                });
            }
            self.counters.connects.fetch_add(1, Ordering::SeqCst);
            Ok(StubClient {
                counters: Arc::clone(&self.counters),
                pages: self.pages.clone(),
                fail_query: self.fail_query,
                endpoint: endpoint.to_string(),
            })
        }
    }

    impl DocumentClient for StubClient {
        fn container(
            &self,
            _database: &str,
            _container: &str,
        ) -> Result<Arc<dyn QueryContainer>, QueryError> {
            self.counters.containers.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubContainer {
                pages: self.pages.clone(),
                fail_query: self.fail_query,
            }))
        }

        fn close(&self) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl QueryContainer for StubContainer {
        fn query_pages(&self, _query: &str, _options: &QueryOptions) -> Result<PageStream, QueryError> {
            if let Some(status) = self.fail_query {
                return Err(QueryError::Rejected {
                    status,
                    message: "did not return response from query".into(),
                });
            }
            Ok(Box::new(self.pages.clone().into_iter().map(Ok)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StubFactory;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn credential_is_redacted() {
        let key = Credential::new("super-secret");
        assert_eq!(format!("{key:?}"), "Credential(<redacted>)");
        assert_eq!(key.to_string(), "<redacted>");
        assert_eq!(key.expose(), "super-secret");
    }

    #[test]
    fn acquire_connects_lazily_once() {
        let factory = StubFactory::new(&[]);
        let counters = Arc::clone(&factory.counters);
        let cache = ClientCache::new(factory);
        assert!(!cache.is_connected());
        assert_eq!(counters.connects.load(Ordering::SeqCst), 0);

        let key = Credential::new("k");
        let a = cache.acquire("uri", &key).unwrap();
        let b = cache.acquire("uri", &key).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(counters.connects.load(Ordering::SeqCst), 1);
        assert!(cache.is_connected());
    }

    #[test]
    fn changed_credential_closes_and_reconnects() {
        let factory = StubFactory::new(&[]);
        let counters = Arc::clone(&factory.counters);
        let cache = ClientCache::new(factory);

        let first = cache.acquire("uri", &Credential::new("old")).unwrap();
        let second = cache.acquire("uri", &Credential::new("new")).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(counters.connects.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn changed_endpoint_closes_and_reconnects() {
        let factory = StubFactory::new(&[]);
        let counters = Arc::clone(&factory.counters);
        let cache = ClientCache::new(factory);
        let key = Credential::new("k");

        cache.acquire("uri-a", &key).unwrap();
        let client = cache.acquire("uri-b", &key).unwrap();
        assert_eq!(client.endpoint, "uri-b");
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_connect_leaves_cache_empty() {
        let factory = StubFactory::new(&[]);
        let counters = Arc::clone(&factory.counters);
        let cache = ClientCache::new(factory);
        let key = Credential::new("k");

        cache.acquire("uri", &key).unwrap();
        let err = cache.acquire("", &key).err().unwrap();
        assert!(matches!(err, QueryError::Connect { .. }));
        // The old client was closed before the new connect was attempted.
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert!(!cache.is_connected());
    }

    #[test]
    fn release_is_idempotent() {
        let factory = StubFactory::new(&[]);
        let counters = Arc::clone(&factory.counters);
        let cache = ClientCache::new(factory);

        cache.release();
        cache.acquire("uri", &Credential::new("k")).unwrap();
        cache.release();
        cache.release();
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert!(!cache.is_connected());
    }

    #[test]
    fn concurrent_acquire_shares_one_client() {
        let factory = StubFactory::new(&[]);
        let counters = Arc::clone(&factory.counters);
        let cache = Arc::new(ClientCache::new(factory));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache.acquire("uri", &Credential::new("k")).map(|_| ())
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert_eq!(counters.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn query_options_defaults() {
        let opts = QueryOptions::default();
        assert_eq!(opts.page_size, 10);
        assert_eq!(opts.max_degree_of_parallelism, 10);
        assert_eq!(opts.max_buffered_item_count, 100);
        assert!(opts.metrics_enabled);
    }
}
