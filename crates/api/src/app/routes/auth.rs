//! Login, renewal and logout.
//!
//! Login charges the login quotas before the credential check so a
//! guessing client is throttled whether or not its guesses are right.

use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{info, warn};

use lecture_auth::AuthError;
use lecture_infra::rate_limit::LoginSubjects;

use crate::app::dto::{LoginRequest, SessionResponse};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::{DeviceContext, PrincipalContext};
use crate::cookies;
use crate::middleware::{auth_failure, session_token};

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(device): Extension<DeviceContext>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let login = req.login.trim();
    if login.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("login and password are required".to_string()));
    }

    let subjects = LoginSubjects {
        login_id: login,
        device_id: Some(device.device_id()),
        ip: device.client_ip(),
    };
    let quota = services.limiter().check_login(subjects).await?;
    if let Err(err) = quota.enforce() {
        warn!(device_id = %device.device_id(), "login attempts throttled");
        return Err(err.into());
    }

    let principal_id = services
        .verifier()
        .verify(login, &req.password)
        .await
        .map_err(|e| AuthError::unavailable(e.to_string()))?
        .ok_or(ApiError::InvalidCredentials)?;

    let session = services
        .sessions()
        .issue(&principal_id, device.fingerprint().clone())
        .await?;
    services
        .limiter()
        .reset_login(login, Some(device.device_id()))
        .await;
    // A user's own record becomes addressable once they have signed in here.
    services.catalog().insert_user(principal_id.as_str());
    info!(principal = %principal_id, degraded = quota.degraded, "login succeeded");

    let mut response = Json(SessionResponse::from(&session)).into_response();
    cookies::append(&mut response, &services.sessions().login_cookie(&session));
    Ok(response)
}

/// Extend the presented session by one TTL.
pub async fn renew(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(device): Extension<DeviceContext>,
    headers: HeaderMap,
) -> Response {
    let result = match session_token(&services, &headers) {
        Ok(token) => services.sessions().renew(&token, device.fingerprint()).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(session) => {
            let mut response = Json(SessionResponse::from(&session)).into_response();
            cookies::append(&mut response, &services.sessions().login_cookie(&session));
            response
        }
        Err(err) => auth_failure(&services, err),
    }
}

/// Revoke the presented session, if any, and clear the cookie.
pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Ok(token) = session_token(&services, &headers) {
        services.sessions().revoke(&token).await?;
    }
    let mut response = StatusCode::NO_CONTENT.into_response();
    cookies::append(&mut response, &services.sessions().clear_cookie());
    Ok(response)
}

/// Revoke every session of the authenticated principal.
pub async fn logout_all(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Response, ApiError> {
    let revoked = services.sessions().revoke_all(principal.principal_id()).await?;
    info!(principal = %principal.principal_id(), revoked, "logged out everywhere");

    let mut response = Json(json!({ "revoked": revoked })).into_response();
    cookies::append(&mut response, &services.sessions().clear_cookie());
    Ok(response)
}
