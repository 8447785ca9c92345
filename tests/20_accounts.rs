mod common;

use anyhow::Result;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn signup_issues_session() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app
        .post(
            "/api/v1/users/signup",
            None,
            json!({
                "name": "Jonas Schmedtmann",
                "email": "Jonas@Example.io",
                "password": "pass1234",
                "passwordConfirm": "pass1234",
                "role": "admin"
            }),
        )
        .await?;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    assert_eq!(res.body["status"], "success");
    let user = &res.body["data"]["user"];
    assert_eq!(user["email"], "jonas@example.io");
    assert_eq!(user["role"], "user");
    assert!(user.get("password").is_none());
    assert!(res.cookie().unwrap().starts_with("jwt="));
    assert!(res.cookie().unwrap().contains("HttpOnly"));

    let token = res.body["token"].as_str().unwrap();
    let res = app.get("/api/v1/users/me", Some(token)).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"]["data"]["name"], "Jonas Schmedtmann");
    Ok(())
}

#[tokio::test]
async fn signup_validates_input() -> Result<()> {
    let app = common::spawn_app().await?;
    app.signup("Jonas Schmedtmann", "jonas@example.io", "pass1234").await?;

    let res = app
        .post(
            "/api/v1/users/signup",
            None,
            json!({ "name": "Someone Else", "email": "jonas@example.io", "password": "pass1234", "passwordConfirm": "pass1234" }),
        )
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.body["message"].as_str().unwrap().starts_with("Duplicate field value"));

    let res = app
        .post(
            "/api/v1/users/signup",
            None,
            json!({ "name": "Mismatched", "email": "m@example.io", "password": "pass1234", "passwordConfirm": "pass4321" }),
        )
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["code"], "VALIDATION_ERROR");
    Ok(())
}

#[tokio::test]
async fn login_checks_credentials() -> Result<()> {
    let app = common::spawn_app().await?;
    app.signup("Jonas Schmedtmann", "jonas@example.io", "pass1234").await?;

    let res = app.post("/api/v1/users/login", None, json!({ "email": "jonas@example.io" })).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["message"], "Please provide email and password!");

    let res = app
        .post("/api/v1/users/login", None, json!({ "email": "jonas@example.io", "password": "wrong-pass" }))
        .await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["message"], "Incorrect email or password");

    let res = app
        .post("/api/v1/users/login", None, json!({ "email": "nobody@example.io", "password": "pass1234" }))
        .await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["message"], "Incorrect email or password");

    let res = app
        .post("/api/v1/users/login", None, json!({ "email": "jonas@example.io", "password": "pass1234" }))
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.body["token"].is_string());
    Ok(())
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app.get("/api/v1/users/me", None).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["message"], "You are not logged in! Please log in to get access.");

    let res = app.get("/api/v1/users/me", Some("not.a.token")).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    // Valid signature, but the user never existed
    let ghost = app.state.credentials.issue_token(Uuid::new_v4())?;
    let res = app.get("/api/v1/users/me", Some(&ghost.token)).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn session_cookie_authenticates() -> Result<()> {
    let app = common::spawn_app().await?;
    let (_, token) = app.signup("Jonas Schmedtmann", "jonas@example.io", "pass1234").await?;

    let request = Request::builder()
        .uri("/api/v1/users/me")
        .header(header::COOKIE, format!("theme=dark; jwt={}", token))
        .body(Body::empty())?;
    let res = app.send(request).await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    Ok(())
}

#[tokio::test]
async fn tokens_issued_before_password_change_are_rejected() -> Result<()> {
    let app = common::spawn_app().await?;
    let (id, token) = app.signup("Jonas Schmedtmann", "jonas@example.io", "pass1234").await?;
    let earlier = app
        .state
        .credentials
        .issue_token_at(id.parse()?, Utc::now() - Duration::hours(1))?;

    let res = app.get("/api/v1/users/me", Some(&earlier.token)).await?;
    assert_eq!(res.status, StatusCode::OK);

    let res = app
        .patch(
            "/api/v1/users/updateMyPassword",
            Some(&token),
            json!({ "passwordCurrent": "wrong-pass", "password": "newpass123", "passwordConfirm": "newpass123" }),
        )
        .await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["message"], "Your current password is wrong.");

    let res = app
        .patch(
            "/api/v1/users/updateMyPassword",
            Some(&token),
            json!({ "passwordCurrent": "pass1234", "password": "newpass123", "passwordConfirm": "newpass123" }),
        )
        .await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let fresh = res.body["token"].as_str().unwrap().to_string();

    let res = app.get("/api/v1/users/me", Some(&earlier.token)).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = app.get("/api/v1/users/me", Some(&fresh)).await?;
    assert_eq!(res.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn session_endpoint_is_optional() -> Result<()> {
    let app = common::spawn_app().await?;
    let (_, token) = app.signup("Jonas Schmedtmann", "jonas@example.io", "pass1234").await?;

    let res = app.get("/api/v1/users/session", None).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.body["data"]["user"].is_null());

    let res = app.get("/api/v1/users/session", Some("garbage")).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.body["data"]["user"].is_null());

    let res = app.get("/api/v1/users/session", Some(&token)).await?;
    assert_eq!(res.body["data"]["user"]["name"], "Jonas Schmedtmann");
    Ok(())
}

#[tokio::test]
async fn password_reset_flow() -> Result<()> {
    let app = common::spawn_app().await?;
    app.signup("Jonas Schmedtmann", "jonas@example.io", "pass1234").await?;

    let res = app.post("/api/v1/users/forgotPassword", None, json!({ "email": "nobody@example.io" })).await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.body["message"], "There is no user with that email address.");

    let res = app.post("/api/v1/users/forgotPassword", None, json!({ "email": "jonas@example.io" })).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"]["message"], "Token sent to email!");

    let url = app.outbox.sent.lock().unwrap()[0].1.clone();
    let token = url.rsplit('/').next().unwrap().to_string();
    let reset = format!("/api/v1/users/resetPassword/{}", token);

    let res = app
        .patch(&reset, None, json!({ "password": "brandnew1", "passwordConfirm": "brandnew1" }))
        .await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert!(res.body["token"].is_string());

    let res = app
        .patch(&reset, None, json!({ "password": "again1234", "passwordConfirm": "again1234" }))
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["message"], "Token is invalid or has expired");

    let res = app
        .post("/api/v1/users/login", None, json!({ "email": "jonas@example.io", "password": "brandnew1" }))
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn logout_overwrites_cookie() -> Result<()> {
    let app = common::spawn_app().await?;

    let res = app.get("/api/v1/users/logout", None).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.cookie().unwrap().starts_with("jwt=loggedout;"));
    Ok(())
}

#[tokio::test]
async fn self_service_updates() -> Result<()> {
    let app = common::spawn_app().await?;
    let (_, token) = app.signup("Jonas Schmedtmann", "jonas@example.io", "pass1234").await?;

    let res = app
        .patch("/api/v1/users/updateMe", Some(&token), json!({ "password": "sneaky123" }))
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let res = app
        .patch("/api/v1/users/updateMe", Some(&token), json!({ "name": "Jonas S", "role": "admin" }))
        .await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["data"]["user"]["name"], "Jonas S");
    assert_eq!(res.body["data"]["user"]["role"], "user");

    let res = app.delete("/api/v1/users/deleteMe", Some(&token)).await?;
    assert_eq!(res.status, StatusCode::NO_CONTENT);

    let res = app.get("/api/v1/users/me", Some(&token)).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = app
        .post("/api/v1/users/login", None, json!({ "email": "jonas@example.io", "password": "pass1234" }))
        .await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn user_administration_is_admin_only() -> Result<()> {
    let app = common::spawn_app().await?;
    let (_, user) = app.signup("Jonas Schmedtmann", "jonas@example.io", "pass1234").await?;
    let (_, admin) = app.user_with_role("Site Admin", "admin").await?;

    let res = app.get("/api/v1/users", Some(&user)).await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.body["message"], "You do not have permission to perform this action");

    let res = app.get("/api/v1/users", Some(&admin)).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["results"], 2);
    assert!(res.body["data"]["data"][0].get("password").is_none());

    let res = app.post("/api/v1/users", Some(&admin), json!({ "name": "Anyone" })).await?;
    assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.body["message"], "This route is not defined! Please use /signup instead!");
    Ok(())
}
