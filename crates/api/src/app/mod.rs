//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, limiter, directory and guard selected from config
//! - `catalog.rs`: lecture/group records and their ownership lookups
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

use crate::middleware;
use self::services::AppServices;

pub mod catalog;
pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Every request passes the device middleware. Protected routes then pass
/// session validation and the per-principal quota; routes carrying a policy
/// rule additionally pass the ownership check before the handler runs.
pub fn build_app(services: Arc<AppServices>) -> Router {
    let protected = routes::protected(&services).layer(axum::middleware::from_fn_with_state(
        services.clone(),
        middleware::auth_middleware,
    ));

    let api = Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::public())
        .merge(protected)
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(
            services.clone(),
            middleware::device_middleware,
        ));

    match services.api_root_path().trim_end_matches('/') {
        "" => api,
        root => Router::new().nest(root, api),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use lecture_core::SystemClock;
    use lecture_infra::AuthConfig;
    use lecture_infra::directory::InMemoryUserDirectory;

    use crate::app::catalog::Catalog;

    fn app(api_root_path: &str) -> Router {
        let config = AuthConfig {
            api_root_path: api_root_path.to_string(),
            ..AuthConfig::default()
        };
        let services = AppServices::in_memory(
            &config,
            Arc::new(InMemoryUserDirectory::new()),
            Arc::new(Catalog::new()),
            Arc::new(SystemClock),
        );
        build_app(Arc::new(services))
    }

    async fn status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn routes_are_mounted_under_the_api_root() {
        assert_eq!(status(app("/api"), "/api/health").await, StatusCode::OK);
        assert_eq!(status(app("/api"), "/health").await, StatusCode::NOT_FOUND);
        assert_eq!(status(app("/"), "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn every_response_refreshes_the_device_cookie() {
        let response = app("/")
            .oneshot(Request::get("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let cookies: Vec<_> = response
            .headers()
            .get_all(axum::http::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert!(cookies.iter().any(|c| c.starts_with("device_id=")));
        assert!(cookies.iter().any(|c| c.starts_with("session=") && c.contains("Max-Age=0")));
    }
}
