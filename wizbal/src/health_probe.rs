//! Liveness probing of candidate backends.

use crate::{Backend, ProbeError};
use anyhow::Context;
use http::StatusCode;
use std::time::Duration;

pub(crate) const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Interface that decides whether a candidate [`Backend`] may receive traffic.
#[async_trait::async_trait]
pub trait HealthProbe {
    /// Probe `backend` once. No retries.
    async fn check(&self, backend: &Backend) -> bool;
}

/// Implements [`HealthProbe`] by sending `HEAD http://host:port/`.
///
/// Redirects are not followed: a backend answering with a redirect is alive.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Construct a new [`HttpProbe`] with the default probe timeout.
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::with_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    /// Construct a new [`HttpProbe`] that gives up on a backend after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            // Every probe opens a new connection.
            .pool_max_idle_per_host(0)
            .timeout(timeout)
            .build()
            .context("failed to build probe http client")?;

        Ok(Self { client })
    }

    async fn status(&self, backend: &Backend) -> Result<StatusCode, ProbeError> {
        let response = self.client.head(backend.url()).send().await?;
        Ok(response.status())
    }
}

#[async_trait::async_trait]
impl HealthProbe for HttpProbe {
    #[tracing::instrument(level = "debug", skip(self, backend), fields(backend = %backend))]
    async fn check(&self, backend: &Backend) -> bool {
        match self.status(backend).await {
            Ok(status) => {
                let alive = classify_status(status);
                if alive {
                    if status.is_redirection() {
                        tracing::debug!("just a redirect, ignoring");
                    }
                } else {
                    tracing::warn!("{} dead: {}", backend.url(), status);
                }
                alive
            }
            Err(err) => {
                tracing::warn!("{} dead: {}", backend.url(), err);
                false
            }
        }
    }
}

/// Server errors mark a backend dead; every other answer marks it alive.
pub fn classify_status(status: StatusCode) -> bool {
    !status.is_server_error()
}
