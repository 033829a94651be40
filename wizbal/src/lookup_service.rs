//! Defines the interface that [`Registry`](crate::Registry) requires in order
//! to enumerate the candidate backends of a service.

use crate::{Backend, ResolutionError, Service};

/// Interface that provides functionality to
/// acquire the candidate backends of a [`Service`].
#[async_trait::async_trait]
pub trait LookupService {
    /// Return the candidate [`Backend`]s registered for `service`, in the
    /// order the discovery protocol returned them.
    /// If nothing is registered, an empty list is returned.
    async fn resolve_service_endpoints(
        &self,
        service: &Service,
    ) -> Result<Vec<Backend>, ResolutionError>;
}
