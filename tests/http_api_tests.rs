//! HTTP surface: routes, envelopes and middleware wiring

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::{harness, harness_with, student_profile, test_config, Harness, PASSWORD};
use incubator_auth::api::create_router;
use serde_json::{json, Value};
use std::sync::Arc;

fn server(h: &Harness) -> TestServer {
    TestServer::new(create_router(Arc::clone(&h.service))).unwrap()
}

async fn register_and_verify(h: &Harness, server: &TestServer, email: &str) -> Value {
    let response = server
        .post("/api/auth/register")
        .json(&json!({
            "email": email,
            "password": PASSWORD,
            "role": "student",
            "profile": student_profile(),
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);

    let token = h.notifier.last_verification_token(email).unwrap();
    let response = server
        .post("/api/auth/verify-email")
        .json(&json!({ "token": token }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = server
        .post("/api/auth/login")
        .json(&json!({ "email": email, "password": PASSWORD }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    response.json::<Value>()
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let response = server(&h).get("/api/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache"]["mode"], "memory");
}

#[tokio::test]
async fn test_session_lifecycle() {
    let h = harness();
    let server = server(&h);
    let login = register_and_verify(&h, &server, "http@example.com").await;

    assert_eq!(login["success"], true);
    assert!(login["data"]["user"].get("password_hash").is_none());
    let access = login["data"]["access_token"].as_str().unwrap().to_string();
    let refresh = login["data"]["refresh_token"].as_str().unwrap().to_string();

    let me = server
        .get("/api/auth/me")
        .add_header("Authorization", format!("Bearer {access}"))
        .await;
    assert_eq!(me.status_code(), StatusCode::OK);
    assert_eq!(me.json::<Value>()["data"]["email"], "http@example.com");

    let logout = server
        .post("/api/auth/logout")
        .add_header("Authorization", format!("Bearer {access}"))
        .json(&json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(logout.status_code(), StatusCode::OK);

    let me = server
        .get("/api/auth/me")
        .add_header("Authorization", format!("Bearer {access}"))
        .await;
    assert_eq!(me.status_code(), StatusCode::UNAUTHORIZED);
    let body = me.json::<Value>();
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "unauthorized");

    let refreshed = server
        .post("/api/auth/refresh")
        .json(&json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(refreshed.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_requires_token() {
    let h = harness();
    let response = server(&h).get("/api/auth/me").await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.json::<Value>()["message"],
        "Authentication token is required"
    );
}

#[tokio::test]
async fn test_register_validation_envelope() {
    let h = harness();
    let response = server(&h)
        .post("/api/auth/register")
        .json(&json!({
            "email": "not-an-email",
            "password": "weak",
            "role": "student",
            "profile": student_profile(),
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body = response.json::<Value>();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "validation_failed");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Email address is invalid"));
}

#[tokio::test]
async fn test_malformed_body_uses_envelope() {
    let h = harness();
    let response = server(&h)
        .post("/api/auth/refresh")
        .json(&json!({ "token": "missing field name" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"]["code"], "validation_failed");
}

#[tokio::test]
async fn test_duplicate_registration_conflict() {
    let h = harness();
    let server = server(&h);
    let body = json!({
        "email": "dup@example.com",
        "password": PASSWORD,
        "role": "company",
        "profile": { "company_name": "Acme" },
    });

    assert_eq!(
        server.post("/api/auth/register").json(&body).await.status_code(),
        StatusCode::CREATED
    );
    let second = server.post("/api/auth/register").json(&body).await;
    assert_eq!(second.status_code(), StatusCode::CONFLICT);
    assert_eq!(second.json::<Value>()["error"]["code"], "account_exists");
}

#[tokio::test]
async fn test_forgot_password_rate_limited() {
    let h = harness();
    let server = server(&h);
    let body = json!({ "email": "flood@example.com" });

    for _ in 0..10 {
        let response = server.post("/api/auth/forgot-password").json(&body).await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    let response = server.post("/api/auth/forgot-password").json(&body).await;
    assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(response.json::<Value>()["error"], "too_many_requests");

    // Counted per email
    let other = server
        .post("/api/auth/forgot-password")
        .json(&json!({ "email": "someone-else@example.com" }))
        .await;
    assert_eq!(other.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_locked_account_status() {
    let mut config = test_config();
    config.lockout.max_attempts = 2;
    let h = harness_with(config);
    let server = server(&h);
    register_and_verify(&h, &server, "lock@example.com").await;

    for _ in 0..2 {
        let response = server
            .post("/api/auth/login")
            .json(&json!({ "email": "lock@example.com", "password": "Wr0ng!pass" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    let response = server
        .post("/api/auth/login")
        .json(&json!({ "email": "lock@example.com", "password": PASSWORD }))
        .await;
    assert_eq!(response.status_code(), StatusCode::LOCKED);
    assert_eq!(response.json::<Value>()["error"]["code"], "account_locked");
}

#[tokio::test]
async fn test_change_password_over_http() {
    let h = harness();
    let server = server(&h);
    let login = register_and_verify(&h, &server, "change@example.com").await;
    let access = login["data"]["access_token"].as_str().unwrap().to_string();

    let wrong = server
        .post("/api/auth/change-password")
        .add_header("Authorization", format!("Bearer {access}"))
        .json(&json!({ "current_password": "Wr0ng!pass", "new_password": "N3w!Secret" }))
        .await;
    assert_eq!(wrong.status_code(), StatusCode::BAD_REQUEST);

    let changed = server
        .post("/api/auth/change-password")
        .add_header("Authorization", format!("Bearer {access}"))
        .json(&json!({ "current_password": PASSWORD, "new_password": "N3w!Secret" }))
        .await;
    assert_eq!(changed.status_code(), StatusCode::OK);

    let relogin = server
        .post("/api/auth/login")
        .json(&json!({ "email": "change@example.com", "password": "N3w!Secret" }))
        .await;
    assert_eq!(relogin.status_code(), StatusCode::OK);
}
