use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lecture_auth::Session;

use crate::app::catalog::{GroupRecord, LectureRecord};
use crate::context::PrincipalContext;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LectureRequest {
    pub title: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub principal_id: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&Session> for SessionResponse {
    fn from(s: &Session) -> Self {
        Self {
            principal_id: s.principal_id.to_string(),
            expires_at: s.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WhoAmIResponse {
    pub principal_id: String,
    pub roles: Vec<String>,
    pub group_id: Option<String>,
    pub degraded: bool,
}

impl From<&PrincipalContext> for WhoAmIResponse {
    fn from(p: &PrincipalContext) -> Self {
        let mut roles: Vec<String> = p.roles().map(|r| r.as_str().to_string()).collect();
        roles.sort();
        Self {
            principal_id: p.principal_id().to_string(),
            roles,
            group_id: p.group_id().map(|g| g.to_string()),
            degraded: p.degraded(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LectureResponse {
    pub id: String,
    pub title: String,
    pub owner_id: String,
}

impl From<LectureRecord> for LectureResponse {
    fn from(r: LectureRecord) -> Self {
        Self {
            id: r.id,
            title: r.title,
            owner_id: r.owner_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GroupResponse {
    pub id: String,
    pub name: String,
}

impl From<GroupRecord> for GroupResponse {
    fn from(r: GroupRecord) -> Self {
        Self { id: r.id, name: r.name }
    }
}
