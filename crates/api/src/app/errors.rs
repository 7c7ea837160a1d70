use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use lecture_auth::AuthError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("invalid login or password")]
    InvalidCredentials,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::Auth(err) => auth_error_response(err),
            ApiError::InvalidCredentials => {
                json_error(StatusCode::UNAUTHORIZED, "invalid_credentials", "invalid login or password")
            }
            ApiError::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Internal(msg) => {
                warn!(error = %msg, "internal error");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
            }
        }
    }
}

fn auth_error_response(err: AuthError) -> axum::response::Response {
    match err {
        AuthError::Unauthenticated(_) => {
            json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "authentication required")
        }
        AuthError::RateLimited { retry_after } => {
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            let mut response =
                json_error(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "too many requests");
            if let Ok(v) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(RETRY_AFTER, v);
            }
            response
        }
        // Same body for both so callers cannot tell which resources exist.
        AuthError::Forbidden | AuthError::NotFound => {
            json_error(StatusCode::FORBIDDEN, "forbidden", "access denied")
        }
        AuthError::DependencyUnavailable(_) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            "authentication backend unavailable",
        ),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lecture_auth::AuthFailure;

    #[test]
    fn status_mapping() {
        let cases = [
            (AuthError::Unauthenticated(AuthFailure::Expired), StatusCode::UNAUTHORIZED),
            (AuthError::Forbidden, StatusCode::FORBIDDEN),
            (AuthError::NotFound, StatusCode::FORBIDDEN),
            (AuthError::unavailable("redis down"), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn rate_limited_sets_retry_after_rounded_up() {
        let response = ApiError::from(AuthError::RateLimited {
            retry_after: Duration::from_millis(19_200),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "20");
    }
}
