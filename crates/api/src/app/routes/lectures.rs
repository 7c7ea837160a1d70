use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::{delete, get, post, put},
};

use lecture_auth::{Action, AuthError, PolicyRule};
use lecture_infra::AuthorizationEngine;

use crate::app::catalog::LectureRecord;
use crate::app::dto::{LectureRequest, LectureResponse};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz::guarded;
use crate::context::PrincipalContext;

pub fn router(authz: Arc<AuthorizationEngine>) -> Router {
    let item = guarded(authz.clone(), PolicyRule::lecture(Action::Read), get(read_lecture))
        .merge(guarded(
            authz.clone(),
            PolicyRule::lecture(Action::Update),
            put(update_lecture),
        ))
        .merge(guarded(authz, PolicyRule::lecture(Action::Delete), delete(delete_lecture)));

    Router::new()
        .route("/lectures", post(create_lecture))
        .route("/lectures/:lecture_id", item)
}

fn title(req: LectureRequest) -> Result<String, ApiError> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }
    Ok(title.to_string())
}

async fn create_lecture(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(req): Json<LectureRequest>,
) -> Result<(StatusCode, Json<LectureResponse>), ApiError> {
    let record = LectureRecord {
        id: uuid::Uuid::now_v7().to_string(),
        title: title(req)?,
        owner_id: principal.principal_id().to_string(),
    };
    services.catalog().insert_lecture(record.clone());
    Ok((StatusCode::CREATED, Json(record.into())))
}

// Ownership was checked before these run; a record that vanished since is
// reported the same way the check reports it.

async fn read_lecture(
    Extension(services): Extension<Arc<AppServices>>,
    Path(lecture_id): Path<String>,
) -> Result<Json<LectureResponse>, ApiError> {
    let record = services.catalog().lecture(&lecture_id).ok_or(AuthError::NotFound)?;
    Ok(Json(record.into()))
}

async fn update_lecture(
    Extension(services): Extension<Arc<AppServices>>,
    Path(lecture_id): Path<String>,
    Json(req): Json<LectureRequest>,
) -> Result<Json<LectureResponse>, ApiError> {
    let record = services
        .catalog()
        .rename_lecture(&lecture_id, title(req)?)
        .ok_or(AuthError::NotFound)?;
    Ok(Json(record.into()))
}

async fn delete_lecture(
    Extension(services): Extension<Arc<AppServices>>,
    Path(lecture_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    services
        .catalog()
        .remove_lecture(&lecture_id)
        .ok_or(AuthError::NotFound)?;
    Ok(StatusCode::NO_CONTENT)
}
