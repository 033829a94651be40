//! Provides the builder and implementation of [`Registry`], the cache that maps
//! a [`Service`] to its current [`Pool`] of alive backends.

use crate::health_probe::DEFAULT_PROBE_TIMEOUT;
use crate::{Backend, DnsResolver, Error, HealthProbe, HttpProbe, LookupService, Pool, Service};
use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing_futures::Instrument;

type Refresh = Shared<BoxFuture<'static, Result<Arc<Pool>, Error>>>;

static DEFAULT_TTL: Duration = Duration::from_secs(10);
static DEFAULT_PROBE_CONCURRENCY: usize = 8;

/// Resolves a [`Service`] to one of its alive [`Backend`]s.
///
/// Pools are cached for a configurable TTL. Concurrent callers that find the
/// same service missing or stale share a single refresh.
///
/// ```rust
/// use std::time::Duration;
/// use wizbal::{Backend, HealthProbe, LookupService, Registry, ResolutionError, Service};
///
/// struct Static;
///
/// #[async_trait::async_trait]
/// impl LookupService for Static {
///     async fn resolve_service_endpoints(
///         &self,
///         _service: &Service,
///     ) -> Result<Vec<Backend>, ResolutionError> {
///         Ok(vec![Backend::new("127.0.0.1", 8080)])
///     }
/// }
///
/// struct AlwaysAlive;
///
/// #[async_trait::async_trait]
/// impl HealthProbe for AlwaysAlive {
///     async fn check(&self, _backend: &Backend) -> bool {
///         true
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let registry = Registry::builder()
///         .ttl(Duration::from_secs(5))
///         .lookup_service(Static)
///         .health_probe(AlwaysAlive)
///         .build()
///         .expect("failed to build Registry");
///
///     let service = Service::try_from("foo.srv.example.com").unwrap();
///     let backend = registry.get_backend(&service).await.unwrap();
///     assert_eq!(backend, Backend::new("127.0.0.1", 8080));
/// }
/// ```
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

struct Inner {
    entries: DashMap<Service, Arc<Entry>>,
    lookup: Box<dyn LookupService + Send + Sync>,
    probe: Box<dyn HealthProbe + Send + Sync>,
    ttl: Duration,
    probe_concurrency: usize,
}

/// Cache slot of one service.
#[derive(Default)]
struct Entry {
    pool: ArcSwapOption<Pool>,
    inflight: tokio::sync::Mutex<Option<Refresh>>,
}

impl Entry {
    fn fresh_pool(&self, ttl: Duration) -> Option<Arc<Pool>> {
        self.pool.load_full().filter(|pool| pool.is_fresh(ttl))
    }
}

impl Registry {
    /// Start configuring a [`Registry`].
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Select an alive backend of `service`, refreshing its pool if needed.
    pub async fn get_backend(&self, service: &Service) -> Result<Backend, Error> {
        let pool = self.get_pool(service).await?;

        match pool.select() {
            Some(backend) => Ok(backend.clone()),
            None => {
                tracing::debug!("{}: no backends found", service);
                Err(Error::NoBackend(service.clone()))
            }
        }
    }

    /// Return the current pool of `service`, refreshing it if missing or stale.
    pub async fn get_pool(&self, service: &Service) -> Result<Arc<Pool>, Error> {
        let entry = self.entry(service);

        if let Some(pool) = entry.fresh_pool(self.inner.ttl) {
            tracing::debug!("{}: cache hit", service);
            return Ok(pool);
        }

        let refresh = {
            let mut inflight = entry.inflight.lock().await;

            // A refresh may have been published while we waited for the lock.
            if let Some(pool) = entry.fresh_pool(self.inner.ttl) {
                return Ok(pool);
            }

            match inflight.as_ref() {
                Some(refresh) => {
                    tracing::debug!("{}: joining refresh in flight", service);
                    refresh.clone()
                }
                None => {
                    tracing::debug!("{}: cache missing or too old", service);
                    let refresh = self.spawn_refresh(service, &entry);
                    *inflight = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await
    }

    fn entry(&self, service: &Service) -> Arc<Entry> {
        if let Some(entry) = self.inner.entries.get(service) {
            return Arc::clone(&entry);
        }
        Arc::clone(&self.inner.entries.entry(service.clone()).or_default())
    }

    /// Spawn the refresh so that it runs to completion even if every caller
    /// waiting on it goes away.
    fn spawn_refresh(&self, service: &Service, entry: &Arc<Entry>) -> Refresh {
        let inner = Arc::clone(&self.inner);
        let task_entry = Arc::clone(entry);
        let task_service = service.clone();
        let span = tracing::debug_span!("refresh", service = %service);

        let handle = tokio::spawn(
            async move {
                let result = inner.build_pool(&task_service).await.map(Arc::new);
                if let Ok(pool) = &result {
                    task_entry.pool.store(Some(Arc::clone(pool)));
                }
                inner.finish_refresh(&task_service, &task_entry).await;
                result
            }
            .instrument(span),
        );

        let inner = Arc::clone(&self.inner);
        let entry = Arc::clone(entry);
        let service = service.clone();
        async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!("{}: refresh task failed: {}", service, err);
                    inner.finish_refresh(&service, &entry).await;
                    Err(Error::RefreshAborted(service))
                }
            }
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn build_pool(&self, service: &Service) -> Result<Pool, Error> {
        let candidates = match self.lookup.resolve_service_endpoints(service).await {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::warn!("couldn't lookup {}: {}", service, err);
                return Err(err.into());
            }
        };
        tracing::debug!("{}: resolved {} candidates", service, candidates.len());

        let probe = &self.probe;
        let alive: Vec<Backend> = stream::iter(candidates)
            .map(|backend| async move {
                let alive = probe.check(&backend).await;
                (backend, alive)
            })
            .buffered(self.probe_concurrency)
            .filter_map(|(backend, alive)| futures::future::ready(alive.then_some(backend)))
            .collect()
            .await;
        tracing::debug!("{}: {} alive backends", service, alive.len());

        Ok(Pool::new(alive))
    }

    /// Clear the refresh slot of `entry`. An entry that never held a pool is
    /// dropped from the cache, so failed lookups leave nothing behind.
    async fn finish_refresh(&self, service: &Service, entry: &Arc<Entry>) {
        let mut inflight = entry.inflight.lock().await;
        *inflight = None;
        if entry.pool.load().is_none() {
            self.entries
                .remove_if(service, |_, cached| Arc::ptr_eq(cached, entry));
        }
    }
}

/// Builder to configure and create a [`Registry`].
pub struct RegistryBuilder {
    ttl: Duration,
    probe_concurrency: usize,
    probe_timeout: Duration,
    lookup_service: Option<Box<dyn LookupService + Send + Sync>>,
    health_probe: Option<Box<dyn HealthProbe + Send + Sync>>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            lookup_service: None,
            health_probe: None,
        }
    }
}

impl RegistryBuilder {
    /// Set how long a resolved pool is served before it is refreshed.
    /// Default is 10 seconds.
    pub fn ttl(self, ttl: Duration) -> Self {
        Self { ttl, ..self }
    }

    /// Set how many candidates are probed at the same time during a refresh.
    /// Default is 8, values below 1 are raised to 1.
    pub fn probe_concurrency(self, probe_concurrency: usize) -> Self {
        Self {
            probe_concurrency: probe_concurrency.max(1),
            ..self
        }
    }

    /// Set the timeout of a single liveness probe of the default [`HttpProbe`].
    ///
    /// Has no effect when a custom [`HealthProbe`] is set.
    pub fn probe_timeout(self, probe_timeout: Duration) -> Self {
        Self {
            probe_timeout,
            ..self
        }
    }

    /// Set a custom [`LookupService`]. Defaults to [`DnsResolver::from_system_config`].
    pub fn lookup_service<T: LookupService + Send + Sync + 'static>(self, lookup_service: T) -> Self {
        Self {
            lookup_service: Some(Box::new(lookup_service)),
            ..self
        }
    }

    /// Set a custom [`HealthProbe`]. Defaults to [`HttpProbe`].
    pub fn health_probe<T: HealthProbe + Send + Sync + 'static>(self, health_probe: T) -> Self {
        Self {
            health_probe: Some(Box::new(health_probe)),
            ..self
        }
    }

    /// Construct a [`Registry`] from the [`RegistryBuilder`] instance.
    pub fn build(self) -> Result<Registry, anyhow::Error> {
        let lookup = match self.lookup_service {
            Some(lookup) => lookup,
            None => Box::new(DnsResolver::from_system_config()?),
        };
        let probe = match self.health_probe {
            Some(probe) => probe,
            None => Box::new(HttpProbe::with_timeout(self.probe_timeout)?),
        };

        Ok(Registry {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                lookup,
                probe,
                ttl: self.ttl,
                probe_concurrency: self.probe_concurrency,
            }),
        })
    }
}

const _: () = {
    const fn assert_is_send_sync<T: Send + Sync>() {}
    assert_is_send_sync::<Registry>();
    assert_is_send_sync::<RegistryBuilder>();
};
