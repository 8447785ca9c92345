use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use super::utils::{object_body, str_field, JsonBody};
use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, Principal};
use crate::services::account::{logout_cookie, session_cookie};
use crate::services::Session;

/// Token responses carry the session both in the body and as a cookie.
fn token_response(state: &AppState, session: Session, status: StatusCode) -> Response {
    let security = &state.config.security;
    let expires = Utc::now() + Duration::days(security.jwt_cookie_expires_in_days);
    let cookie = session_cookie(&session.token.token, expires, security.require_https);
    let body = ApiResponse::with_status(json!({ "user": session.user }), status).with_token(session.token.token);
    ([(header::SET_COOKIE, cookie)], body).into_response()
}

/// POST /signup
pub async fn signup(State(state): State<AppState>, body: JsonBody) -> Result<Response, ApiError> {
    let session = state.accounts.signup(object_body(body)?).await?;
    Ok(token_response(&state, session, StatusCode::CREATED))
}

/// POST /login
pub async fn login(State(state): State<AppState>, body: JsonBody) -> Result<Response, ApiError> {
    let body = object_body(body)?;
    let session = state
        .accounts
        .login(str_field(&body, "email"), str_field(&body, "password"))
        .await?;
    Ok(token_response(&state, session, StatusCode::OK))
}

/// GET /logout
pub async fn logout() -> Response {
    ([(header::SET_COOKIE, logout_cookie(Utc::now()))], ApiResponse::success(Value::Null)).into_response()
}

/// POST /forgotPassword
pub async fn forgot_password(State(state): State<AppState>, body: JsonBody) -> ApiResult<Value> {
    let body = object_body(body)?;
    let email = str_field(&body, "email").unwrap_or_default();
    state.accounts.forgot_password(email).await?;
    Ok(ApiResponse::success(json!({ "message": "Token sent to email!" })))
}

/// PATCH /resetPassword/:token
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: JsonBody,
) -> Result<Response, ApiError> {
    let body = object_body(body)?;
    let session = state
        .accounts
        .reset_password(&token, body.get("password"), body.get("passwordConfirm"))
        .await?;
    Ok(token_response(&state, session, StatusCode::OK))
}

/// GET /session - the caller if logged in, `null` otherwise
pub async fn session(principal: Option<Extension<Principal>>) -> ApiResult<Value> {
    let user = principal.map(|Extension(p)| json!(p)).unwrap_or(Value::Null);
    Ok(ApiResponse::success(json!({ "user": user })))
}

/// PATCH /updateMyPassword
pub async fn update_my_password(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: JsonBody,
) -> Result<Response, ApiError> {
    let body = object_body(body)?;
    let session = state
        .accounts
        .update_password(
            principal.id,
            str_field(&body, "passwordCurrent"),
            body.get("password"),
            body.get("passwordConfirm"),
        )
        .await?;
    Ok(token_response(&state, session, StatusCode::OK))
}

/// GET /me
pub async fn me(State(state): State<AppState>, Extension(principal): Extension<Principal>) -> ApiResult<Value> {
    let user = state.accounts.me(principal.id).await?;
    Ok(ApiResponse::success(json!({ "data": user })))
}

/// PATCH /updateMe
pub async fn update_me(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: JsonBody,
) -> ApiResult<Value> {
    let user = state.accounts.update_me(principal.id, object_body(body)?).await?;
    Ok(ApiResponse::success(json!({ "user": user })))
}

/// DELETE /deleteMe
pub async fn delete_me(State(state): State<AppState>, Extension(principal): Extension<Principal>) -> ApiResult<()> {
    state.accounts.delete_me(principal.id).await?;
    Ok(ApiResponse::<()>::no_content())
}

/// POST / - accounts are only created through signup
pub async fn create_user() -> ApiError {
    ApiError::internal_server_error("This route is not defined! Please use /signup instead!")
}
