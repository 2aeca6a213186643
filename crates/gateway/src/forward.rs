//! Upstream forwarding and auth injection.
//!
//! The gateway's own auth headers are applied *after* any header a
//! transform attempted to set for the same name, so they always take
//! precedence.

use std::time::Duration;

use apigate_core::Upstream;
use reqwest::Client;

use crate::error::GatewayError;
use crate::http::{ProxyRequest, ProxyResponse};

/// Inject `upstream`'s configured auth header into `req`, overriding
/// whatever a transform set for the same header name.
pub fn inject_upstream_auth(upstream: &Upstream, req: &mut ProxyRequest) {
    if let Some((name, value)) = upstream.auth_header_pair() {
        req.set_header(&name, value);
    }
}

/// Forward `req` to `upstream`, bounded by the request's remaining deadline
/// (capped at the upstream's own configured timeout).
///
/// # Errors
/// Returns [`GatewayError::UpstreamTimeout`] if the round-trip exceeds the
/// deadline, or [`GatewayError::UpstreamError`] for a connection failure.
pub async fn forward(client: &Client, upstream: &Upstream, req: &ProxyRequest, deadline: Duration) -> Result<ProxyResponse, GatewayError> {
    let timeout = deadline.min(upstream.timeout);
    let url = format!("{}{}", upstream.base_url.trim_end_matches('/'), req.uri_path_and_query());

    let method = reqwest::Method::from_bytes(req.method.as_bytes())
        .map_err(|e| GatewayError::UpstreamError(e.to_string()))?;

    let mut builder = client.request(method, url).timeout(timeout).body(req.body.clone());
    for (name, value) in &req.headers {
        builder = builder.header(name, value);
    }

    let result = tokio::time::timeout(timeout, builder.send()).await;

    let response = match result {
        Ok(Ok(response)) => response,
        Ok(Err(e)) if e.is_timeout() => return Err(GatewayError::UpstreamTimeout),
        Ok(Err(e)) => return Err(GatewayError::UpstreamError(e.to_string())),
        Err(_) => return Err(GatewayError::UpstreamTimeout),
    };

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned())))
        .collect();
    let body = response.bytes().await.map_err(|e| GatewayError::UpstreamError(e.to_string()))?.to_vec();

    Ok(ProxyResponse { status, headers, body })
}
