//! `reqwest` client for the user service.
//!
//! - `GET  {base}/internal/users/{id}` -> `{ "id", "roles", "group_id" }`, 404 if unknown
//! - `POST {base}/internal/auth/verify` with `{ "login", "password" }` -> `{ "id" }`,
//!   401/404 on bad credentials

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use lecture_auth::{Principal, Role};
use lecture_core::{GroupId, PrincipalId};

use super::{CredentialVerifier, DirectoryError, PrincipalResolver};

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    group_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    login: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    id: String,
}

#[derive(Debug, Clone)]
pub struct HttpUserDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUserDirectory {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }
}

fn transport(err: reqwest::Error) -> DirectoryError {
    DirectoryError::Unavailable(err.to_string())
}

#[async_trait]
impl PrincipalResolver for HttpUserDirectory {
    #[instrument(skip(self), err)]
    async fn resolve(&self, principal_id: &PrincipalId) -> Result<Option<Principal>, DirectoryError> {
        let url = format!("{}/internal/users/{}", self.base_url, principal_id);
        let response = self.client.get(url).send().await.map_err(transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            s if s.is_success() => {}
            s => return Err(DirectoryError::Unavailable(format!("user service status {s}"))),
        }

        let body: UserResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::InvalidResponse(e.to_string()))?;
        if body.id != principal_id.as_str() {
            return Err(DirectoryError::InvalidResponse(format!(
                "asked for {principal_id}, got {}",
                body.id
            )));
        }

        let roles: HashSet<Role> = body.roles.into_iter().map(Role::new).collect();
        Ok(Some(Principal {
            principal_id: principal_id.clone(),
            roles,
            group_id: body.group_id.map(GroupId::new),
        }))
    }
}

#[async_trait]
impl CredentialVerifier for HttpUserDirectory {
    #[instrument(skip(self, password), err)]
    async fn verify(&self, login: &str, password: &str) -> Result<Option<PrincipalId>, DirectoryError> {
        let url = format!("{}/internal/auth/verify", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&VerifyRequest { login, password })
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => return Ok(None),
            s if s.is_success() => {}
            s => return Err(DirectoryError::Unavailable(format!("user service status {s}"))),
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::InvalidResponse(e.to_string()))?;
        body.id
            .parse::<PrincipalId>()
            .map(Some)
            .map_err(|e| DirectoryError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn directory(server: &MockServer) -> HttpUserDirectory {
        HttpUserDirectory::new(server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn resolves_roles_and_group() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/users/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "u1",
                "roles": ["admin"],
                "group_id": "g1"
            })))
            .mount(&server)
            .await;

        let principal = directory(&server)
            .await
            .resolve(&PrincipalId::new("u1"))
            .await
            .unwrap()
            .unwrap();
        assert!(principal.has_role(&Role::ADMIN));
        assert_eq!(principal.group_id, Some(GroupId::new("g1")));
    }

    #[tokio::test]
    async fn unknown_user_is_none_and_5xx_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/users/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/internal/users/u2"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = directory(&server).await;
        assert_eq!(dir.resolve(&PrincipalId::new("ghost")).await.unwrap(), None);
        assert!(matches!(
            dir.resolve(&PrincipalId::new("u2")).await,
            Err(DirectoryError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn verify_posts_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/auth/verify"))
            .and(body_json(serde_json::json!({ "login": "010-1234", "password": "pw" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "u1" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/internal/auth/verify"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let dir = directory(&server).await;
        assert_eq!(
            dir.verify("010-1234", "pw").await.unwrap(),
            Some(PrincipalId::new("u1"))
        );
        assert_eq!(dir.verify("010-1234", "bad").await.unwrap(), None);
    }
}
