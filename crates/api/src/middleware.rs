use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use lecture_auth::cookie::DEVICE_ID_COOKIE;
use lecture_auth::{AuthError, AuthFailure, RequestMetadata, TokenId, fingerprint, resolve_client_ip};

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::{DeviceContext, PrincipalContext};
use crate::cookies;

const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Attach a `DeviceContext` to every request and refresh the long-lived
/// `device_id` cookie, minting one if the client has none.
pub async fn device_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let device = device_context(req.headers(), peer_addr(&req));
    debug!(client_ip = ?device.client_ip(), "device context resolved");

    let refresh = services.cookie_policy().device(device.device_id().to_string());
    req.extensions_mut().insert(device);

    let mut response = next.run(req).await;
    cookies::append(&mut response, &refresh);
    response
}

/// Validate the session cookie and charge the request quota.
///
/// On an authentication failure the session cookie is cleared.
pub async fn auth_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(device) = req.extensions().get::<DeviceContext>().cloned() else {
        return ApiError::Internal("device context missing".to_string()).into_response();
    };
    let token = cookies::read(req.headers(), &services.cookie_policy().name);

    let outcome = match services
        .guard()
        .authenticate(token.as_deref(), device.fingerprint())
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => return auth_failure(&services, err),
    };

    let remaining = outcome.rate_limit.remaining();
    let degraded = outcome.degraded();
    req.extensions_mut()
        .insert(PrincipalContext::new(outcome.principal, degraded));

    let mut response = next.run(req).await;
    if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
        response.headers_mut().insert(RATE_LIMIT_REMAINING, v);
    }
    response
}

/// Render an auth error, clearing the session cookie when the credential is
/// no longer usable.
pub fn auth_failure(services: &AppServices, err: AuthError) -> Response {
    let clears = err.clears_credential();
    let mut response = ApiError::from(err).into_response();
    if clears {
        cookies::append(&mut response, &services.sessions().clear_cookie());
    }
    response
}

/// Session token from the request's session cookie.
pub fn session_token(services: &AppServices, headers: &HeaderMap) -> Result<TokenId, AuthError> {
    cookies::read(headers, &services.cookie_policy().name)
        .and_then(TokenId::from_transport)
        .ok_or(AuthError::Unauthenticated(AuthFailure::MissingCredential))
}

fn peer_addr(req: &axum::http::Request<axum::body::Body>) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn device_context(headers: &HeaderMap, peer: Option<SocketAddr>) -> DeviceContext {
    let device_id = cookies::read(headers, DEVICE_ID_COOKIE)
        .filter(|id| id.len() <= 128)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let client_ip = resolve_client_ip(
        header(headers, "x-forwarded-for"),
        header(headers, "x-real-ip"),
        peer.map(|addr| addr.ip()),
    );
    let user_agent = header(headers, axum::http::header::USER_AGENT.as_str()).map(str::to_string);

    let meta = RequestMetadata::new(client_ip.clone(), user_agent, Some(device_id.clone()));
    DeviceContext::new(device_id, client_ip, fingerprint(&meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::{COOKIE, USER_AGENT};

    fn headers(pairs: &[(&str, &'static str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_static(v),
            );
        }
        h
    }

    #[test]
    fn existing_device_cookie_is_kept() {
        let h = headers(&[(COOKIE.as_str(), "device_id=dev-1"), (USER_AGENT.as_str(), "ua")]);
        let ctx = device_context(&h, None);
        assert_eq!(ctx.device_id(), "dev-1");
    }

    #[test]
    fn missing_device_cookie_is_minted() {
        let a = device_context(&HeaderMap::new(), None);
        let b = device_context(&HeaderMap::new(), None);
        assert_ne!(a.device_id(), b.device_id());
        assert!(uuid::Uuid::parse_str(a.device_id()).is_ok());
    }

    #[test]
    fn forwarded_for_beats_peer_address() {
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let h = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(device_context(&h, Some(peer)).client_ip(), Some("203.0.113.7"));
        assert_eq!(
            device_context(&HeaderMap::new(), Some(peer)).client_ip(),
            Some("127.0.0.1")
        );
    }

    #[test]
    fn fingerprint_follows_device_signals() {
        let h1 = headers(&[(COOKIE.as_str(), "device_id=dev-1")]);
        let h2 = headers(&[(COOKIE.as_str(), "device_id=dev-2")]);
        let a = device_context(&h1, None);
        let b = device_context(&h2, None);
        assert!(!a.fingerprint().matches(b.fingerprint()));
        assert!(a.fingerprint().matches(device_context(&h1, None).fingerprint()));
    }
}
