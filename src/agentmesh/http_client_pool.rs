//! HTTP client pooling for outbound providers.
//!
//! Maintains one persistent `reqwest::Client` per base URL (LLM vendor,
//! vector backend, scraper service), avoiding DNS/TLS churn, plus a
//! [`ProviderPool`] wrapper that bounds in-flight requests per provider.
//! Pool acquisition races a 3-second timeout and maps to the
//! `pool_exhausted` error kind, so a saturated provider surfaces as a
//! typed error instead of unbounded queueing.

use crate::agentmesh::error::{ErrorKind, MeshError};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Global cache of HTTP clients indexed by base URL.
/// Using DashMap for thread-safe concurrent access without locks.
static CLIENT_POOL: Lazy<DashMap<String, reqwest::Client>> = Lazy::new(DashMap::new);

/// Creates or retrieves a shared HTTP client for the given base URL.
///
/// The client keeps up to 100 idle connections per host alive for 90 s with
/// TCP keepalive, so repeated calls to the same provider skip connection
/// setup entirely.
pub fn get_or_create_client(base_url: &str) -> reqwest::Client {
    CLIENT_POOL
        .entry(base_url.to_string())
        .or_insert_with(create_pooled_client)
        .clone()
}

/// Creates a new reqwest client with connection pooling enabled.
fn create_pooled_client() -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client")
}

/// Bounded-concurrency wrapper around one provider's shared client.
///
/// # Example
///
/// ```rust,no_run
/// use agentmesh::http_client_pool::ProviderPool;
///
/// # async {
/// let pool = ProviderPool::new("https://api.example.com", 8);
/// let lease = pool.acquire().await.unwrap();
/// let response = lease.client().get("https://api.example.com/v1/things").send().await;
/// drop(lease); // releases the slot
/// # };
/// ```
pub struct ProviderPool {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl ProviderPool {
    /// Create a pool for one provider base URL with `size` concurrent slots
    /// and the default 3 s acquire timeout.
    pub fn new(base_url: &str, size: usize) -> Self {
        Self {
            client: get_or_create_client(base_url),
            permits: Arc::new(Semaphore::new(size.max(1))),
            acquire_timeout: Duration::from_secs(3),
        }
    }

    /// Override the acquire timeout (builder pattern).
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Acquire a request slot, or fail with `pool_exhausted` after the
    /// acquire timeout.
    pub async fn acquire(&self) -> Result<PoolLease, MeshError> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| {
            MeshError::new(
                ErrorKind::PoolExhausted,
                format!("no pool slot within {:?}", self.acquire_timeout),
            )
        })?
        .map_err(|_| MeshError::internal("provider pool semaphore closed"))?;

        Ok(PoolLease {
            client: self.client.clone(),
            _permit: permit,
        })
    }

    /// Slots currently available.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// A held pool slot. The slot is released on drop.
#[derive(Debug)]
pub struct PoolLease {
    client: reqwest::Client,
    _permit: OwnedSemaphorePermit,
}

impl PoolLease {
    /// The provider's shared HTTP client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}
