//! Errors surfaced by the [`Registry`](crate::Registry) and its collaborators.

use crate::Service;

/// Classifies why a discovery lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionErrorKind {
    /// The lookup did not complete in time.
    Timeout,
    /// The name does not exist (NXDOMAIN).
    NotFound,
    /// The response could not be understood.
    Malformed,
    /// Any other failure, e.g. I/O or resolver configuration.
    Other,
}

/// A discovery lookup for a [`Service`] failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to resolve '{service}' ({kind:?}): {message}")]
pub struct ResolutionError {
    service: Service,
    kind: ResolutionErrorKind,
    message: String,
}

impl ResolutionError {
    pub fn new<M: ToString>(service: Service, kind: ResolutionErrorKind, message: M) -> Self {
        Self {
            service,
            kind,
            message: message.to_string(),
        }
    }

    /// The service whose lookup failed.
    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn kind(&self) -> ResolutionErrorKind {
        self.kind
    }
}

/// A liveness probe could not reach a backend.
///
/// Only ever observed inside a refresh: the backend is left out of the new pool.
#[derive(Debug, thiserror::Error)]
#[error("probe transport failure: {0}")]
pub struct ProbeError(#[from] reqwest::Error);

/// Errors returned by [`Registry::get_backend`](crate::Registry::get_backend).
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("no alive backend for '{0}'")]
    NoBackend(Service),
    #[error("refresh of '{0}' did not complete")]
    RefreshAborted(Service),
}

impl Error {
    /// The service the error relates to.
    pub fn service(&self) -> &Service {
        match self {
            Error::Resolution(err) => err.service(),
            Error::NoBackend(service) | Error::RefreshAborted(service) => service,
        }
    }
}
