//! The catch-all proxy handler: converts an inbound `axum` request into
//! `apigate_gateway::ProxyRequest`/`RequestContext`, drives it through
//! [`apigate_gateway::Gateway::handle`], and converts the result back into
//! an `axum` response. The gateway crate is deliberately framework-agnostic
//! (see `apigate_gateway::http`'s module doc); this is the one place that
//! crosses the boundary.

use std::collections::HashMap;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use apigate_gateway::{ProxyRequest, ProxyResponse, RequestContext};

use super::AppState;
use crate::error::ServerError;

/// Handle any method/path not claimed by `/health` or `/metrics`.
pub async fn proxy(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<std::net::SocketAddr>,
    req: Request<Body>,
) -> Response {
    let (parts, body) = req.into_parts();

    let host = parts
        .headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    let query: HashMap<String, String> = parts
        .uri
        .query()
        .map(parse_query_string)
        .unwrap_or_default();

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned())))
        .collect();

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => return ServerError::Io(std::io::Error::other(e.to_string())).into_response(),
    };

    let proxy_req = ProxyRequest {
        method: parts.method.as_str().to_owned(),
        path: parts.uri.path().to_owned(),
        query,
        headers,
        body: body_bytes.to_vec(),
    };

    let ctx = RequestContext {
        host,
        ip_address: Some(peer.ip().to_string()),
        user_agent: parts
            .headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    };

    let outcome = state.gateway.handle(&ctx, proxy_req).await;

    match outcome {
        Ok(resp) => {
            state.metrics.record_status(resp.status);
            proxy_response_into_axum(resp)
        }
        Err(e) => {
            state.metrics.record_status(e.status_code());
            match &e {
                apigate_gateway::GatewayError::RateLimited { .. } => state.metrics.record_rate_limited(),
                apigate_gateway::GatewayError::QuotaExceeded => state.metrics.record_quota_exceeded(),
                apigate_gateway::GatewayError::AuthRejected(_) => state.metrics.record_auth_rejected(),
                _ => {}
            }
            ServerError::Gateway(e).into_response()
        }
    }
}

/// Split a raw query string on `&`/`=` without percent-decoding, matching
/// `ProxyRequest::uri_path_and_query`'s own un-decoded round-trip.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_owned(), v.to_owned()),
            None => (pair.to_owned(), String::new()),
        })
        .collect()
}

fn proxy_response_into_axum(resp: ProxyResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);

    for (name, value) in &resp.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            builder = builder.header(name, value);
        }
    }

    builder
        .body(Body::from(Bytes::from(resp.body)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
