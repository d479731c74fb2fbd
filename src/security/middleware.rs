//! Security Middleware Module
//!
//! Axum middleware: request-metadata capture, admission enforcement for
//! HTTP routes, and security response headers.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::result::Result as StdResult;
use std::sync::Arc;

use crate::security::auth::AuthContext;
use crate::security::pipeline::AdmissionPipeline;
use crate::security::threat::RequestMeta;

/// Forwarding headers probed for the real client address, in order.
/// The first parseable IP wins.
const CLIENT_IP_HEADERS: &[&str] = &[
    "x-forwarded-for",
    "x-real-ip",
    "x-forwarded",
    "x-cluster-client-ip",
    "forwarded-for",
    "forwarded",
];

/// Resolve the client IP from forwarding headers, falling back to the
/// socket peer address.
pub fn resolve_client_ip<B>(req: &axum::http::Request<B>) -> IpAddr {
    for header in CLIENT_IP_HEADERS {
        if let Some(value) = req.headers().get(*header).and_then(|v| v.to_str().ok()) {
            for candidate in value.split(',') {
                if let Ok(ip) = candidate.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

/// Build the request metadata consumed by the admission pipeline.
pub fn request_meta<B>(req: &axum::http::Request<B>) -> RequestMeta {
    let client_ip = resolve_client_ip(req);
    let user_agent = req
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let headers = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    RequestMeta {
        client_ip,
        user_agent,
        headers,
        path: req.uri().path().to_string(),
        query_string: req.uri().query().unwrap_or("").to_string(),
    }
}

/// Admission middleware for HTTP routes: scans, rate-limits, and
/// authenticates, then stores the metadata and auth context in request
/// extensions for handlers to consume. Rate-limit rejections become 429
/// responses with a Retry-After header.
pub async fn admission_middleware(
    mut req: Request<Body>,
    next: Next,
    pipeline: Arc<AdmissionPipeline>,
) -> Response {
    let meta = request_meta(&req);

    match pipeline.admit(&meta) {
        Ok(context) => {
            req.extensions_mut().insert(meta);
            req.extensions_mut().insert(context);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

/// Extension accessor for the auth context placed by the admission
/// middleware.
pub fn auth_context(req: &Request<Body>) -> AuthContext {
    req.extensions()
        .get::<AuthContext>()
        .cloned()
        .unwrap_or_else(AuthContext::anonymous)
}

/// Security headers middleware
pub async fn security_headers_middleware(
    req: Request<Body>,
    next: Next,
) -> StdResult<Response, StatusCode> {
    let mut response = next.run(req).await;

    response
        .headers_mut()
        .insert("X-Content-Type-Options", "nosniff".parse().unwrap());

    response
        .headers_mut()
        .insert("X-Frame-Options", "DENY".parse().unwrap());

    response
        .headers_mut()
        .insert("X-XSS-Protection", "1; mode=block".parse().unwrap());

    response.headers_mut().insert(
        "Strict-Transport-Security",
        "max-age=31536000; includeSubDomains".parse().unwrap(),
    );

    response.headers_mut().insert(
        "Referrer-Policy",
        "strict-origin-when-cross-origin".parse().unwrap(),
    );

    Ok(response)
}
