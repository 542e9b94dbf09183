//! Generic outbound proxy: validate a JSON descriptor, forward it to an
//! allow-listed host, relay the reply.

pub mod allow_list;
pub mod descriptor;
pub mod forward;
pub mod secrets;

use std::sync::Arc;

use tracing::warn;

use crate::error::ProxyError;
use crate::types::ProxyResult;

pub use allow_list::{is_allowed_origin, ALLOWED_ORIGINS};
pub use descriptor::{ProxyRequestDescriptor, RequestBody};
pub use forward::{HttpUpstream, OutboundRequest, Upstream, UpstreamResponse};
pub use secrets::SecretMap;

/// Everything one proxied call needs. Shared read-only across requests.
#[derive(Clone)]
pub struct ProxyContext {
    pub upstream: Arc<dyn Upstream>,
    pub allow_list: &'static [&'static str],
    pub secrets: SecretMap,
}

impl ProxyContext {
    pub fn new(upstream: Arc<dyn Upstream>, secrets: SecretMap) -> Self {
        Self {
            upstream,
            allow_list: ALLOWED_ORIGINS,
            secrets,
        }
    }
}

/// validate -> forward -> relay. Validation failures return before any
/// network call.
pub async fn handle(raw: &[u8], ctx: &ProxyContext) -> Result<ProxyResult, ProxyError> {
    let descriptor = ProxyRequestDescriptor::parse(raw, &ctx.secrets).map_err(|e| {
        warn!(error = %e, "[PROXY] rejected request");
        e
    })?;

    if !is_allowed_origin(ctx.allow_list, &descriptor.origin) {
        warn!(origin = %descriptor.origin, "[PROXY] origin not allowed");
        return Err(ProxyError::OriginNotAllowed {
            origin: descriptor.origin,
        });
    }

    forward::forward(&descriptor, ctx.upstream.as_ref()).await
}
