//! Request middleware: per-client rate limiting and access token checks

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};

use crate::AppState;

/// Reject clients that exceed the per-IP request quota
pub async fn ip_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let key = format!("ip-limiter:{}", ip);

    match state.ip_limiter.limit(&key).await {
        Ok(false) => Ok(next.run(req).await),
        Ok(true) => {
            warn!("Rate limited client {}", ip);
            Err(StatusCode::TOO_MANY_REQUESTS)
        }
        Err(e) => {
            error!("Rate limiter failed for {}: {}", ip, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Extract and validate the bearer access token
///
/// On success the token's [`AccessClaims`](crate::jwt::AccessClaims) are
/// added to the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = state.sessions.authenticate(token).await.map_err(|_| {
        debug!("Rejected request to {}", req.uri().path());
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
