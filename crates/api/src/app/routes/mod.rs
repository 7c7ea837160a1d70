use axum::{Router, routing::{get, post}};

use crate::app::services::AppServices;

pub mod auth;
pub mod groups;
pub mod lectures;
pub mod system;
pub mod users;

/// Endpoints reachable without a session.
pub fn public() -> Router {
    Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/renew", post(auth::renew))
        .route("/auth/logout", post(auth::logout))
}

/// Endpoints behind session validation. Resource routes carry their
/// ownership rule in their own router.
pub fn protected(services: &AppServices) -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/auth/logout-all", post(auth::logout_all))
        .merge(lectures::router(services.authz()))
        .merge(groups::router(services.authz()))
        .merge(users::router(services.authz()))
}
