use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    routing::get,
};

use lecture_auth::{Action, PolicyRule};
use lecture_infra::AuthorizationEngine;

use crate::app::dto::LectureResponse;
use crate::app::services::AppServices;
use crate::authz::guarded;

pub fn router(authz: Arc<AuthorizationEngine>) -> Router {
    Router::new().route(
        "/users/:user_id/lectures",
        guarded(authz, PolicyRule::user(Action::Read), get(user_lectures)),
    )
}

async fn user_lectures(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> Json<Vec<LectureResponse>> {
    Json(
        services
            .catalog()
            .lectures_owned_by(&user_id)
            .into_iter()
            .map(LectureResponse::from)
            .collect(),
    )
}
