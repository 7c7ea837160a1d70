use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::{COOKIE, RETRY_AFTER, SET_COOKIE};
use serde_json::{Value, json};

use lecture_api::app::catalog::{Catalog, GroupRecord, LectureRecord};
use lecture_api::app::services::AppServices;
use lecture_auth::{Principal, Role};
use lecture_core::SystemClock;
use lecture_infra::AuthConfig;
use lecture_infra::directory::InMemoryUserDirectory;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let directory = Arc::new(InMemoryUserDirectory::new());
        directory.add_account("alice", "alice-pw", Principal::new("A").with_group("g1"));
        directory.add_account("bob", "bob-pw", Principal::new("B").with_group("g2"));
        directory.add_account("root", "root-pw", Principal::new("R").with_role(Role::ADMIN));

        let catalog = Arc::new(Catalog::new());
        catalog.insert_lecture(LectureRecord {
            id: "42".into(),
            title: "Ownership in practice".into(),
            owner_id: "A".into(),
        });
        for (id, name) in [("g1", "Backend"), ("g2", "Frontend")] {
            catalog.insert_group(GroupRecord {
                id: id.into(),
                name: name.into(),
            });
        }

        let services = AppServices::in_memory(
            &AuthConfig::default(),
            directory,
            catalog,
            Arc::new(SystemClock),
        );

        // Same router as prod, bound to an ephemeral port.
        let app = lecture_api::app::build_app(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self { base_url, handle }
    }

    fn device(&self, device_id: &str) -> Device {
        Device {
            client: reqwest::Client::new(),
            base_url: self.base_url.clone(),
            device_id: device_id.to_string(),
            session: None,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One browser: a stable `device_id` cookie plus whatever session the
/// server last handed out.
struct Device {
    client: reqwest::Client,
    base_url: String,
    device_id: String,
    session: Option<String>,
}

struct Reply {
    status: StatusCode,
    retry_after: Option<String>,
    remaining: Option<String>,
    session_cookie: Option<String>,
    body: Value,
}

impl Device {
    async fn send(&mut self, method: reqwest::Method, path: &str, body: Option<Value>) -> Reply {
        let mut cookie = format!("device_id={}", self.device_id);
        if let Some(token) = &self.session {
            cookie.push_str(&format!("; session={token}"));
        }
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header(COOKIE, cookie);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let res = req.send().await.unwrap();

        let session_cookie = res
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with("session="))
            .map(str::to_string);
        if let Some(header) = &session_cookie {
            let value = header["session=".len()..].split(';').next().unwrap_or("");
            self.session = (!value.is_empty()).then(|| value.to_string());
        }

        let header = |name: &str| {
            res.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let retry_after = header(RETRY_AFTER.as_str());
        let remaining = header("x-ratelimit-remaining");
        let status = res.status();
        let bytes = res.bytes().await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        Reply {
            status,
            retry_after,
            remaining,
            session_cookie,
            body,
        }
    }

    async fn get(&mut self, path: &str) -> Reply {
        self.send(reqwest::Method::GET, path, None).await
    }

    async fn post(&mut self, path: &str, body: Value) -> Reply {
        self.send(reqwest::Method::POST, path, Some(body)).await
    }

    async fn login(&mut self, login: &str, password: &str) -> Reply {
        self.post("/auth/login", json!({ "login": login, "password": password }))
            .await
    }
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let reply = srv.device("d1").get("/health").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "ok");
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;
    let mut device = srv.device("d1");

    let reply = device.get("/whoami").await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"], "unauthenticated");

    device.session = Some("not-a-real-token".to_string());
    let reply = device.get("/lectures/42").await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_sets_a_hardened_session_cookie() {
    let srv = TestServer::spawn().await;
    let mut device = srv.device("d1");

    let reply = device.login("alice", "wrong").await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"], "invalid_credentials");
    assert!(device.session.is_none());

    let reply = device.login("alice", "alice-pw").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["principal_id"], "A");

    let cookie = reply.session_cookie.expect("session cookie");
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Secure"));
    assert!(cookie.contains("SameSite=Strict"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=3600") || cookie.contains("Max-Age=3599"));
    assert_eq!(device.session.as_ref().map(String::len), Some(43));

    let reply = device.get("/whoami").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["principal_id"], "A");
    assert_eq!(reply.body["group_id"], "g1");
    assert_eq!(reply.body["degraded"], false);
    assert!(reply.remaining.is_some());
}

#[tokio::test]
async fn stolen_cookie_on_another_device_revokes_the_session() {
    let srv = TestServer::spawn().await;
    let mut owner = srv.device("device-1");
    owner.login("alice", "alice-pw").await;
    let token = owner.session.clone();

    let mut thief = srv.device("device-2");
    thief.session = token;
    let reply = thief.get("/whoami").await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    let cleared = reply.session_cookie.expect("cookie cleared");
    assert!(cleared.contains("Max-Age=0"));

    // The mismatch revoked the session for its rightful device too.
    let reply = owner.get("/whoami").await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ownership_is_enforced_before_handlers() {
    let srv = TestServer::spawn().await;
    let mut alice = srv.device("a");
    let mut bob = srv.device("b");
    let mut root = srv.device("r");
    alice.login("alice", "alice-pw").await;
    bob.login("bob", "bob-pw").await;
    root.login("root", "root-pw").await;

    let reply = alice.get("/lectures/42").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["owner_id"], "A");

    let denied = bob.get("/lectures/42").await;
    let missing = bob.get("/lectures/999").await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);
    assert_eq!(missing.status, StatusCode::FORBIDDEN);
    assert_eq!(denied.body, missing.body);
    assert_eq!(denied.body["error"], "forbidden");

    assert_eq!(root.get("/lectures/42").await.status, StatusCode::OK);

    assert_eq!(alice.get("/groups/g1").await.status, StatusCode::OK);
    assert_eq!(alice.get("/groups/g2").await.status, StatusCode::FORBIDDEN);

    let reply = alice.get("/users/A/lectures").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body.as_array().map(Vec::len), Some(1));
    assert_eq!(alice.get("/users/B/lectures").await.status, StatusCode::FORBIDDEN);

    // Unknown users are indistinguishable from foreign ones.
    let ghost = alice.get("/users/ghost/lectures").await;
    assert_eq!(ghost.status, StatusCode::FORBIDDEN);
    assert_eq!(ghost.body["error"], "forbidden");
    assert_eq!(root.get("/users/ghost/lectures").await.status, StatusCode::OK);
}

#[tokio::test]
async fn created_lectures_belong_to_their_creator() {
    let srv = TestServer::spawn().await;
    let mut alice = srv.device("a");
    let mut bob = srv.device("b");
    alice.login("alice", "alice-pw").await;
    bob.login("bob", "bob-pw").await;

    let reply = bob.post("/lectures", json!({ "title": "Lifetimes" })).await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["owner_id"], "B");
    let path = format!("/lectures/{}", reply.body["id"].as_str().unwrap());

    assert_eq!(alice.get(&path).await.status, StatusCode::FORBIDDEN);
    assert_eq!(
        alice
            .send(reqwest::Method::DELETE, &path, None)
            .await
            .status,
        StatusCode::FORBIDDEN
    );

    let reply = bob
        .send(reqwest::Method::PUT, &path, Some(json!({ "title": "Borrowing" })))
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["title"], "Borrowing");

    let reply = bob.send(reqwest::Method::DELETE, &path, None).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert_eq!(bob.get(&path).await.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn repeated_login_attempts_are_throttled() {
    let srv = TestServer::spawn().await;
    let mut device = srv.device("d1");

    for _ in 0..5 {
        let reply = device.login("alice", "guess").await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }

    // Throttled even with the right password.
    let reply = device.login("alice", "alice-pw").await;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(reply.body["error"], "rate_limited");
    let retry_after: u64 = reply.retry_after.expect("Retry-After").parse().unwrap();
    assert!((1..=3600).contains(&retry_after));
}

#[tokio::test]
async fn logout_revokes_immediately() {
    let srv = TestServer::spawn().await;
    let mut device = srv.device("d1");
    device.login("alice", "alice-pw").await;
    let token = device.session.clone();

    let reply = device.post("/auth/logout", json!({})).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert!(device.session.is_none());

    device.session = token;
    assert_eq!(device.get("/whoami").await.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_all_ends_every_session() {
    let srv = TestServer::spawn().await;
    let mut laptop = srv.device("laptop");
    let mut phone = srv.device("phone");
    laptop.login("bob", "bob-pw").await;

    let reply = laptop.post("/auth/logout-all", json!({})).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["revoked"], 1);
    assert_eq!(laptop.get("/whoami").await.status, StatusCode::UNAUTHORIZED);

    phone.login("bob", "bob-pw").await;
    assert_eq!(phone.get("/whoami").await.status, StatusCode::OK);
}

#[tokio::test]
async fn second_login_replaces_the_first_session() {
    let srv = TestServer::spawn().await;
    let mut laptop = srv.device("laptop");
    let mut phone = srv.device("phone");
    laptop.login("bob", "bob-pw").await;
    phone.login("bob", "bob-pw").await;

    assert_eq!(laptop.get("/whoami").await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(phone.get("/whoami").await.status, StatusCode::OK);
}

#[tokio::test]
async fn renew_keeps_the_token_and_refreshes_the_cookie() {
    let srv = TestServer::spawn().await;
    let mut device = srv.device("d1");
    device.login("alice", "alice-pw").await;
    let token = device.session.clone();

    let reply = device.post("/auth/renew", json!({})).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.session_cookie.is_some());
    assert_eq!(device.session, token);

    let mut other = srv.device("d2");
    other.session = token;
    let reply = other.post("/auth/renew", json!({})).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}
