//! Route-level ownership enforcement.
//!
//! Each protected route declares its `PolicyRule` explicitly in the router;
//! `guarded` wraps the handler so the Authorization Engine runs after
//! authentication and before the handler body.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
};

use lecture_auth::{AuthError, AuthFailure, OperationArgs, PolicyRule};
use lecture_infra::AuthorizationEngine;

use crate::app::errors::ApiError;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct PolicyState {
    engine: Arc<AuthorizationEngine>,
    rule: Arc<PolicyRule>,
}

/// Protect `route` with `rule`. Path parameters are the operation arguments.
pub fn guarded(engine: Arc<AuthorizationEngine>, rule: PolicyRule, route: MethodRouter) -> MethodRouter {
    let state = PolicyState {
        engine,
        rule: Arc::new(rule),
    };
    route.route_layer(middleware::from_fn_with_state(state, authorize_middleware))
}

pub async fn authorize_middleware(
    State(policy): State<PolicyState>,
    Path(params): Path<HashMap<String, String>>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(principal) = req.extensions().get::<PrincipalContext>().cloned() else {
        return ApiError::from(AuthError::Unauthenticated(AuthFailure::MissingCredential)).into_response();
    };

    let args = OperationArgs::from(params);
    if let Err(err) = policy
        .engine
        .authorize(principal.principal(), &policy.rule, &args)
        .await
    {
        return ApiError::from(err).into_response();
    }

    next.run(req).await
}
