//! `wizbal` routes HTTP requests to backends discovered through DNS SRV records.
//!
//! A [`Registry`] maps a [`Service`] name to a cached [`Pool`] of the backends
//! that answered a liveness probe, and picks one of them uniformly at random
//! for every request.
//!
//! # Simple example
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() {
//!     use wizbal::{Registry, Service};
//!
//!     // Create a registry with the default DNS resolver and HTTP probe.
//!     let registry = Registry::builder()
//!         .build()
//!         .expect("failed to construct Registry");
//!
//!     let service = Service::try_from("foo.srv.example.com").unwrap();
//!     match registry.get_backend(&service).await {
//!         Ok(backend) => println!("routing to {}", backend),
//!         Err(err) => println!("service unavailable: {}", err),
//!     }
//! }
//! ```
//!
//! [`Registry`] also allows plugging in a different implementation of [`LookupService`].
//!
//! ```rust
//! use wizbal::{Backend, LookupService, ResolutionError, Service};
//!
//! // This knows no backends
//! struct DummyLookupService;
//!
//! #[async_trait::async_trait]
//! impl LookupService for DummyLookupService {
//!     async fn resolve_service_endpoints(
//!         &self,
//!         _service: &Service,
//!     ) -> Result<Vec<Backend>, ResolutionError> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     use wizbal::{Error, Registry};
//!
//!     let registry = Registry::builder()
//!         .lookup_service(DummyLookupService)
//!         .build()
//!         .expect("failed to construct Registry");
//!
//!     let service = Service::try_from("foo.srv.example.com").unwrap();
//!     let err = registry.get_backend(&service).await.unwrap_err();
//!     assert!(matches!(err, Error::NoBackend(_)));
//! }
//! ```
//! For services with higher churn, the cache ttl can be lowered.
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() {
//!     use wizbal::Registry;
//!
//!     let registry = Registry::builder()
//!         .ttl(std::time::Duration::from_secs(3))
//!         .build()
//!         .expect("failed to construct Registry");
//! }
//! ```
//!
//! It's also possible to bound how long a single liveness probe may take
//! and how many candidates are probed at once.
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() {
//!     use wizbal::Registry;
//!
//!     let registry = Registry::builder()
//!         .probe_timeout(std::time::Duration::from_millis(500))
//!         .probe_concurrency(16)
//!         .build()
//!         .expect("failed to construct Registry");
//! }
//! ```
//!
//! # Internals
//! Each service owns a cache slot holding its current [`Pool`] behind an
//! atomically swapped pointer, so readers never wait on a refresh in progress.
//! A missing or stale pool is rebuilt by one spawned task per service; every
//! caller arriving meanwhile awaits that same task.
//! Priority and weight of SRV records are ignored on purpose: selection is
//! uniform over the alive backends.

mod dns_resolver;
mod error;
mod health_probe;
mod lookup_service;
mod pool;
mod proxy;
mod registry;
mod service;

pub use dns_resolver::*;
pub use error::*;
pub use health_probe::*;
pub use lookup_service::*;
pub use pool::*;
pub use proxy::*;
pub use registry::*;
pub use service::*;
