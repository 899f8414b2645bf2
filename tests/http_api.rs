use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use qr_pass::http::{PASS_SECRET_HEADER, SharedSecretCheck, router};
use qr_pass::storage::MemoryStorage;
use qr_pass::{Identity, IdentityStatus, PassServer};
use serde_json::Value;
use tower::ServiceExt;

const ISSUER_SECRET: &str = "issuer-secret";
const ADMIN_SECRET: &str = "admin-secret";

fn identity(id: &str, status: IdentityStatus) -> Identity {
    Identity {
        id: id.to_string(),
        document_number: "123.456.789-00".to_string(),
        name: "Maria Oliveira Costa".to_string(),
        registration: "2021002".to_string(),
        department: "Secretaria de Saúde".to_string(),
        role: "Enfermeira".to_string(),
        photo_url: None,
        status,
    }
}

async fn test_app(max_per_window: u32) -> Router {
    let storage = Arc::new(MemoryStorage::with_identities([
        identity("E1", IdentityStatus::Active),
        identity("E9", IdentityStatus::Blocked),
    ]));
    let counter = AtomicUsize::new(0);
    let server = PassServer::builder()
        .with_storage(storage)
        .with_base_url("https://pass.example.org")
        .with_rate_limit(max_per_window, std::time::Duration::from_secs(60))
        .with_token_generator(move |_| {
            format!("TOKEN-{}", counter.fetch_add(1, Ordering::SeqCst))
        })
        .build_and_init()
        .await
        .expect("server should build");

    let credentials = Arc::new(SharedSecretCheck::new(
        ISSUER_SECRET,
        Some(ADMIN_SECRET.to_string()),
    ));
    router(Arc::new(server), credentials)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn issue_request(identity_id: &str, secret: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/cards/{identity_id}/token"));
    if let Some(secret) = secret {
        builder = builder.header(PASS_SECRET_HEADER, secret);
    }
    builder.body(Body::empty()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_issue_and_validate_over_http() {
    let app = test_app(10).await;

    let (status, body) = send(&app, issue_request("E1", Some(ISSUER_SECRET))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token"], "TOKEN-0");
    assert_eq!(body["url"], "https://pass.example.org/validate/TOKEN-0");
    assert_eq!(body["ttlSeconds"], 120);

    let request = Request::builder()
        .uri("/validate/TOKEN-0")
        .header("x-forwarded-for", "203.0.113.7")
        .header("user-agent", "MerchantScanner/2.1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "valid");
    assert_eq!(body["identity"]["idMasked"], "***.456.789-**");
    assert_eq!(body["identity"]["status"], "active");
    assert!(!body.to_string().contains("123.456.789-00"));

    let (status, body) = send(&app, get("/validate/TOKEN-0")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["result"], "already_used");
}

#[tokio::test]
async fn test_validation_failures_map_to_status_codes() {
    let app = test_app(10).await;

    let (status, body) = send(&app, get("/validate/UNKNOWN")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["result"], "not_found");

    let (status, body) = send(&app, get("/validate/bad%20token")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["result"], "malformed");
}

#[tokio::test]
async fn test_issue_requires_secret() {
    let app = test_app(10).await;

    let (status, body) = send(&app, issue_request("E1", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);

    let (status, _) = send(&app, issue_request("E1", Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_issue_refuses_unknown_and_blocked_identities() {
    let app = test_app(10).await;

    let (status, _) = send(&app, issue_request("E404", Some(ISSUER_SECRET))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, issue_request("E9", Some(ISSUER_SECRET))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Cardholder is not active");
}

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let app = test_app(2).await;

    for _ in 0..2 {
        let (status, _) = send(&app, issue_request("E1", Some(ISSUER_SECRET))).await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(issue_request("E1", Some(ISSUER_SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn test_admin_routes() {
    let app = test_app(10).await;

    send(&app, issue_request("E1", Some(ISSUER_SECRET))).await;
    send(&app, get("/validate/TOKEN-0")).await;
    send(&app, get("/validate/TOKEN-0")).await;

    let (status, _) = send(&app, get("/validations")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/validations?limit=1")
        .header(PASS_SECRET_HEADER, ISSUER_SECRET)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/validations?limit=1")
        .header(PASS_SECRET_HEADER, ADMIN_SECRET)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["outcome"], "invalid");

    let request = Request::builder()
        .uri("/stats")
        .header(PASS_SECRET_HEADER, ADMIN_SECRET)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalIdentities"], 2);
    assert_eq!(body["blockedIdentities"], 1);
    assert_eq!(body["validationsToday"], 1);
}

#[tokio::test]
async fn test_health() {
    let app = test_app(10).await;
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
