//! Implements [`LookupService`] for DNS SRV records.

use crate::{Backend, LookupService, ResolutionError, ResolutionErrorKind, Service};
use anyhow::Context;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::{system_conf, TokioAsyncResolver};

/// Implements [`LookupService`] by querying SRV records for [`Service::as_str`].
///
/// Priority and weight of the records are ignored: every target is an equal
/// candidate.
pub struct DnsResolver {
    /// The hickory resolver which contacts the dns service directly such
    /// that we bypass os-specific dns caching.
    dns: TokioAsyncResolver,
}

impl DnsResolver {
    /// Construct a new [`DnsResolver`] from env and system configuration, e.g `resolv.conf`.
    pub fn from_system_config() -> Result<Self, anyhow::Error> {
        let (config, opts) = system_conf::read_system_conf()
            .context("failed to read dns services from system configuration")?;

        Ok(Self::new(config, opts))
    }

    /// Construct a new [`DnsResolver`] from an explicit configuration.
    pub fn new(config: ResolverConfig, mut opts: ResolverOpts) -> Self {
        // The registry caches pools, we do not want a second cache here.
        opts.cache_size = 0;

        let dns = TokioAsyncResolver::tokio(config, opts);

        Self { dns }
    }
}

#[async_trait::async_trait]
impl LookupService for DnsResolver {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn resolve_service_endpoints(
        &self,
        service: &Service,
    ) -> Result<Vec<Backend>, ResolutionError> {
        match self.dns.srv_lookup(service.as_str()).await {
            Ok(lookup) => {
                tracing::debug!("dns query expires in: {:?}", lookup.as_lookup().valid_until());
                Ok(lookup
                    .iter()
                    .map(|srv| {
                        let backend = Backend::new(target_host(&srv.target().to_utf8()), srv.port());
                        tracing::debug!("result: srv {}", backend);
                        backend
                    })
                    .collect())
            }
            Err(err) => match classify(&err) {
                None => {
                    tracing::debug!("no srv records for {}", service);
                    Ok(Vec::new())
                }
                Some(kind) => Err(ResolutionError::new(service.clone(), kind, err)),
            },
        }
    }
}

/// Map a resolver failure to a [`ResolutionErrorKind`].
///
/// `None` means the name exists but carries no SRV records.
fn classify(err: &ResolveError) -> Option<ResolutionErrorKind> {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => {
            classify_empty_response(*response_code)
        }
        ResolveErrorKind::Timeout => Some(ResolutionErrorKind::Timeout),
        ResolveErrorKind::Proto(_) => Some(ResolutionErrorKind::Malformed),
        _ => Some(ResolutionErrorKind::Other),
    }
}

/// Map the response code of an answer without records.
fn classify_empty_response(response_code: ResponseCode) -> Option<ResolutionErrorKind> {
    match response_code {
        ResponseCode::NXDomain => Some(ResolutionErrorKind::NotFound),
        ResponseCode::NoError => None,
        _ => Some(ResolutionErrorKind::Malformed),
    }
}

/// SRV targets are fully qualified; drop the root label.
fn target_host(target: &str) -> &str {
    match target.strip_suffix('.') {
        Some(host) if !host.is_empty() => host,
        _ => target,
    }
}
