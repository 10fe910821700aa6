//! Rate-limited client pool.
//!
//! One pooled client per proxy endpoint, each with its own HTTP transport and
//! token bucket. A client is checked out exclusively through a `ClientLease`,
//! which puts it back into the pool when dropped, so release happens on every
//! exit path (success, error, panic in the transfer task, cancellation).

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::balancer::Balancer;
use crate::error::FetchError;
use crate::provision::ProxyEndpoint;
use crate::transport::{HttpGet, TransportFactory};

/// Token bucket parameters applied to every client.
#[derive(Debug, Clone, Copy)]
pub struct ClientQuota {
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl ClientQuota {
    fn limiter(&self) -> DefaultDirectRateLimiter {
        let rate = NonZeroU32::new(self.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.burst).unwrap_or(NonZeroU32::MIN);
        RateLimiter::direct(Quota::per_minute(rate).allow_burst(burst))
    }
}

/// One HTTP client bound to one endpoint (or none) and its own limiter.
pub struct PooledClient {
    index: usize,
    endpoint: Option<ProxyEndpoint>,
    // Behind a mutex only so the client is `Sync`; a lease never contends on it.
    http: Mutex<Box<dyn HttpGet>>,
    limiter: DefaultDirectRateLimiter,
}

impl PooledClient {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn endpoint(&self) -> Option<&ProxyEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn limiter(&self) -> &DefaultDirectRateLimiter {
        &self.limiter
    }

    /// Blocking GET through this client's transport.
    pub fn get(&mut self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        self.http
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(url, timeout)
    }
}

/// Fixed set of pooled clients; at most `size()` leases exist at once.
pub struct ClientPool {
    idle: Mutex<VecDeque<PooledClient>>,
    available: Arc<Semaphore>,
    size: usize,
}

impl ClientPool {
    /// Build one client per endpoint in the balancer's cycle order. With no
    /// endpoints the pool degrades to a single direct (unproxied) client.
    pub fn build(
        endpoints: &Balancer<ProxyEndpoint>,
        quota: ClientQuota,
        factory: &dyn TransportFactory,
    ) -> Result<Arc<Self>, FetchError> {
        let mut clients = VecDeque::new();
        if endpoints.is_empty() {
            tracing::warn!("no proxy endpoints, using a single direct client");
            clients.push_back(PooledClient {
                index: 0,
                endpoint: None,
                http: Mutex::new(factory.build(None)?),
                limiter: quota.limiter(),
            });
        }
        for index in 0..endpoints.size() {
            let endpoint = endpoints.next();
            let http = factory.build(endpoint.as_ref())?;
            clients.push_back(PooledClient {
                index,
                endpoint,
                http: Mutex::new(http),
                limiter: quota.limiter(),
            });
        }

        let size = clients.len();
        tracing::debug!(
            size,
            requests_per_minute = quota.requests_per_minute,
            burst = quota.burst,
            "client pool built"
        );
        Ok(Arc::new(Self {
            idle: Mutex::new(clients),
            available: Arc::new(Semaphore::new(size)),
            size,
        }))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of clients not currently checked out.
    pub fn idle(&self) -> usize {
        self.lock_idle().len()
    }

    fn lock_idle(&self) -> MutexGuard<'_, VecDeque<PooledClient>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait until a client is free and check it out.
    pub async fn acquire(self: &Arc<Self>) -> Result<ClientLease, FetchError> {
        let permit = Arc::clone(&self.available)
            .acquire_owned()
            .await
            .map_err(|_| FetchError::PoolClosed)?;
        let client = self.lock_idle().pop_front().ok_or(FetchError::PoolClosed)?;
        Ok(ClientLease {
            client: Some(client),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    fn give_back(&self, client: PooledClient) {
        self.lock_idle().push_back(client);
    }
}

/// Exclusive checkout of one pooled client; returned to the pool on drop.
pub struct ClientLease {
    client: Option<PooledClient>,
    pool: Arc<ClientPool>,
    // Dropped after `Drop::drop` has pushed the client back.
    _permit: OwnedSemaphorePermit,
}

impl ClientLease {
    pub fn client(&self) -> &PooledClient {
        // Only `Drop` takes the client out.
        self.client.as_ref().unwrap_or_else(|| unreachable!("lease already released"))
    }

    pub fn client_mut(&mut self) -> &mut PooledClient {
        self.client.as_mut().unwrap_or_else(|| unreachable!("lease already released"))
    }

    /// Wait until this client's limiter admits one request, or fail once
    /// `timeout` has elapsed.
    pub async fn wait(&self, timeout: Duration) -> Result<(), FetchError> {
        tokio::time::timeout(timeout, self.client().limiter().until_ready())
            .await
            .map_err(|_| FetchError::RateLimit(timeout))
    }
}

impl Drop for ClientLease {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.give_back(client);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport that returns a fixed body and counts calls.
    pub(crate) struct StaticTransport {
        pub(crate) body: Vec<u8>,
        pub(crate) calls: Arc<AtomicUsize>,
    }

    impl HttpGet for StaticTransport {
        fn get(&mut self, _url: &str, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.body.clone())
        }
    }

    pub(crate) struct StaticFactory {
        pub(crate) calls: Arc<AtomicUsize>,
        pub(crate) built_for: Mutex<Vec<Option<String>>>,
    }

    impl StaticFactory {
        pub(crate) fn new() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                built_for: Mutex::new(Vec::new()),
            }
        }
    }

    impl TransportFactory for StaticFactory {
        fn build(&self, endpoint: Option<&ProxyEndpoint>) -> Result<Box<dyn HttpGet>, FetchError> {
            self.built_for
                .lock()
                .unwrap()
                .push(endpoint.map(|e| e.to_string()));
            Ok(Box::new(StaticTransport {
                body: b"[]".to_vec(),
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    pub(crate) fn endpoints(n: u16) -> Balancer<ProxyEndpoint> {
        Balancer::with_items(
            (0..n)
                .map(|i| ProxyEndpoint {
                    host: format!("10.0.0.{}", i),
                    port: 8000 + i,
                    user: "u".into(),
                    password: "p".into(),
                })
                .collect(),
        )
    }

    const QUOTA: ClientQuota = ClientQuota {
        requests_per_minute: 60,
        burst: 5,
    };

    #[test]
    fn one_client_per_endpoint_in_cycle_order() {
        let factory = StaticFactory::new();
        let pool = ClientPool::build(&endpoints(3), QUOTA, &factory).unwrap();
        assert_eq!(pool.size(), 3);
        assert_eq!(
            *factory.built_for.lock().unwrap(),
            vec![
                Some("10.0.0.0:8000".to_string()),
                Some("10.0.0.1:8001".to_string()),
                Some("10.0.0.2:8002".to_string()),
            ]
        );
    }

    #[test]
    fn no_endpoints_means_one_direct_client() {
        let factory = StaticFactory::new();
        let pool = ClientPool::build(&Balancer::new(), QUOTA, &factory).unwrap();
        assert_eq!(pool.size(), 1);
        assert_eq!(*factory.built_for.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn acquire_blocks_at_pool_size_and_release_unblocks() {
        let factory = StaticFactory::new();
        let pool = ClientPool::build(&endpoints(2), QUOTA, &factory).unwrap();
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a.client().index(), b.client().index());
        assert_eq!(pool.idle(), 0);

        let third = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(third.is_err(), "third acquire must wait");

        drop(a);
        assert_eq!(pool.idle(), 1);
        let c = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
            .await
            .expect("released client is available")
            .unwrap();
        drop(b);
        drop(c);
        assert_eq!(pool.idle(), 2);
    }

    #[tokio::test]
    async fn lease_returns_even_if_transfer_panics() {
        let factory = StaticFactory::new();
        let pool = ClientPool::build(&endpoints(1), QUOTA, &factory).unwrap();
        let lease = pool.acquire().await.unwrap();
        let res = tokio::task::spawn_blocking(move || {
            let _lease = lease;
            panic!("transfer blew up");
        })
        .await;
        assert!(res.is_err());
        assert_eq!(pool.idle(), 1);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn limiter_admits_burst_then_holds() {
        let factory = StaticFactory::new();
        let quota = ClientQuota {
            requests_per_minute: 1,
            burst: 5,
        };
        let pool = ClientPool::build(&endpoints(1), quota, &factory).unwrap();
        let lease = pool.acquire().await.unwrap();
        for _ in 0..5 {
            lease.wait(Duration::from_millis(100)).await.unwrap();
        }
        // Next token is a minute away.
        let err = lease.wait(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimit(_)));
    }

    #[tokio::test]
    async fn limiter_refills_at_the_per_minute_rate() {
        let factory = StaticFactory::new();
        // 1200 per minute: one token every 50ms.
        let quota = ClientQuota {
            requests_per_minute: 1200,
            burst: 1,
        };
        let pool = ClientPool::build(&endpoints(1), quota, &factory).unwrap();
        let lease = pool.acquire().await.unwrap();
        lease.wait(Duration::from_millis(100)).await.unwrap();
        assert!(lease.client().limiter().check().is_err());

        let started = std::time::Instant::now();
        for _ in 0..4 {
            lease.wait(Duration::from_secs(1)).await.unwrap();
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(180), "refilled too fast: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(1), "refilled too slowly: {:?}", elapsed);
    }

    #[tokio::test]
    async fn each_client_has_its_own_bucket() {
        let factory = StaticFactory::new();
        let quota = ClientQuota {
            requests_per_minute: 1,
            burst: 1,
        };
        let pool = ClientPool::build(&endpoints(2), quota, &factory).unwrap();
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        a.wait(Duration::from_millis(100)).await.unwrap();
        b.wait(Duration::from_millis(100)).await.unwrap();
        assert!(a.wait(Duration::from_millis(20)).await.is_err());
    }
}
