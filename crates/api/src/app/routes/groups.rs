use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    routing::get,
};

use lecture_auth::{Action, AuthError, PolicyRule};
use lecture_infra::AuthorizationEngine;

use crate::app::dto::GroupResponse;
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz::guarded;

pub fn router(authz: Arc<AuthorizationEngine>) -> Router {
    Router::new().route(
        "/groups/:group_id",
        guarded(authz, PolicyRule::group(Action::Read), get(read_group)),
    )
}

async fn read_group(
    Extension(services): Extension<Arc<AppServices>>,
    Path(group_id): Path<String>,
) -> Result<Json<GroupResponse>, ApiError> {
    let group = services.catalog().group(&group_id).ok_or(AuthError::NotFound)?;
    Ok(Json(group.into()))
}
