#![allow(dead_code)]

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use mediavault::{
    ServerConfig, create_app,
    db::Database,
    rate_limit::RateLimits,
    session::SessionSettings,
    token::TokenCodec,
    upload::UploadLimits,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const TEST_KEY: &[u8; 32] = b"test-key-0123456789-abcdefghijkl";
pub const PASSWORD: &str = "password123";

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub tokens: Arc<TokenCodec>,
    pub upload_dir: TempDir,
}

pub async fn test_app() -> TestApp {
    test_app_with(UploadLimits::default(), SessionSettings::default()).await
}

pub async fn test_app_with(limits: UploadLimits, sessions: SessionSettings) -> TestApp {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let tokens = Arc::new(TokenCodec::new(TEST_KEY).expect("Invalid test key"));
    let upload_dir = tempfile::tempdir().expect("Failed to create upload dir");

    let generous = NonZeroU32::new(10_000).unwrap();
    let config = ServerConfig {
        db: db.clone(),
        tokens: tokens.clone(),
        upload_dir: upload_dir.path().to_path_buf(),
        sessions,
        upload_limits: limits,
        rate_limits: RateLimits {
            login_per_minute: generous,
            user_create_per_minute: generous,
        },
        trust_proxy: false,
        shutdown: CancellationToken::new(),
    };

    TestApp {
        app: create_app(&config),
        db,
        tokens,
        upload_dir,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Send a request and decode the JSON body (Null when empty).
    pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.send(request).await;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&body).into_owned())
            })
        };
        (status, value)
    }

    pub async fn create_user(&self, email: &str) -> Value {
        let (status, body) = self
            .send_json(json_request(
                "POST",
                "/create-user",
                json!({ "email": email, "password": PASSWORD }),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create user failed: {}", body);
        body
    }

    pub async fn login(&self, email: &str) -> Value {
        let (status, body) = self
            .send_json(json_request(
                "POST",
                "/login-user",
                json!({ "email": email, "password": PASSWORD }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body
    }

    /// Create a user, log in, and return the access token.
    pub async fn signed_in(&self, email: &str) -> String {
        self.create_user(email).await;
        let login = self.login(email).await;
        login["access_token"].as_str().unwrap().to_string()
    }
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn authed(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub fn authed_json(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

const BOUNDARY: &str = "----MediaTestBoundary7MA4YWxk";

/// Build a multipart body with one `files` part per (filename, bytes).
pub fn multipart_body(files: &[(&str, &[u8])]) -> (String, Vec<u8>) {
    let mut body = Vec::new();

    for (name, data) in files {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n",
                name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}

pub fn upload_request(token: &str, files: &[(&str, &[u8])]) -> Request<Body> {
    let (content_type, body) = multipart_body(files);
    Request::builder()
        .method("POST")
        .uri("/media/upload")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap()
}
