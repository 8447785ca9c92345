#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Map, Value};
use tower::ServiceExt;
use uuid::Uuid;

use natours_api::config::{AppConfig, StorageKind};
use natours_api::database::{DocumentStore, MemoryStore};
use natours_api::schemas::{booking::BOOKINGS, tour::TOURS, user::USERS};
use natours_api::services::ResetDelivery;
use natours_api::{ensure_collections, router, AppState};

/// Captures reset links instead of mailing them.
#[derive(Default)]
pub struct Outbox {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ResetDelivery for Outbox {
    async fn deliver(&self, email: &str, reset_url: &str) -> Result<(), String> {
        self.sent
            .lock()
            .map_err(|e| e.to_string())?
            .push((email.to_string(), reset_url.to_string()));
        Ok(())
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn cookie(&self) -> Option<&str> {
        self.headers.get(header::SET_COOKIE).and_then(|v| v.to_str().ok())
    }
}

/// An application on a fresh in-memory store.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub outbox: Arc<Outbox>,
}

impl TestApp {
    pub fn store(&self) -> &dyn DocumentStore {
        self.state.store.as_ref()
    }

    pub async fn request(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<TestResponse> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&v)?)
            }
            None => Body::empty(),
        };
        self.send(builder.body(body)?).await
    }

    pub async fn send(&self, request: Request<Body>) -> Result<TestResponse> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).with_context(|| format!("non-JSON body: {:?}", bytes))?
        };
        Ok(TestResponse { status, headers, body })
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Result<TestResponse> {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> Result<TestResponse> {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: Option<&str>, body: Value) -> Result<TestResponse> {
        self.request(Method::PATCH, uri, token, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> Result<TestResponse> {
        self.request(Method::DELETE, uri, token, None).await
    }

    /// Signs a user up through the API and returns its id and token.
    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<(String, String)> {
        let res = self
            .post(
                "/api/v1/users/signup",
                None,
                json!({ "name": name, "email": email, "password": password, "passwordConfirm": password }),
            )
            .await?;
        anyhow::ensure!(res.status == StatusCode::CREATED, "signup failed: {}", res.body);
        let id = res.body["data"]["user"]["id"].as_str().context("user id")?.to_string();
        let token = res.body["token"].as_str().context("token")?.to_string();
        Ok((id, token))
    }

    /// Stores a user with the given role directly and issues a token for it.
    pub async fn user_with_role(&self, name: &str, role: &str) -> Result<(String, String)> {
        let mut data = Map::new();
        data.insert("name".into(), json!(name));
        data.insert("email".into(), json!(format!("{}@example.io", name.to_lowercase().replace(' ', "."))));
        data.insert("role".into(), json!(role));
        data.insert("photo".into(), json!("default.jpg"));
        data.insert("password".into(), json!("not-a-real-hash"));
        data.insert("active".into(), json!(true));
        let user = self.store().insert(USERS, data).await?;
        let token = self.state.credentials.issue_token(user.id)?;
        Ok((user.id.to_string(), token.token))
    }

    pub async fn insert_tour(&self, name: &str, fields: Value) -> Result<String> {
        let mut data = json!({
            "name": name,
            "slug": name.to_lowercase().replace(' ', "-"),
            "duration": 5,
            "maxGroupSize": 10,
            "difficulty": "easy",
            "ratingsAverage": 4.5,
            "ratingsQuantity": 0,
            "price": 500,
            "summary": "A tour",
            "imageCover": "cover.jpg",
            "createdAt": "2026-01-01T00:00:00.000Z",
            "secretTour": false
        });
        if let (Some(target), Some(extra)) = (data.as_object_mut(), fields.as_object()) {
            for (k, v) in extra {
                target.insert(k.clone(), v.clone());
            }
        }
        let data = data.as_object().cloned().context("tour object")?;
        Ok(self.store().insert(TOURS, data).await?.id.to_string())
    }

    pub async fn insert_booking(&self, tour: &str, user: &str) -> Result<String> {
        let data = json!({
            "tour": tour,
            "user": user,
            "price": 500,
            "paid": true,
            "createdAt": "2026-01-01T00:00:00.000Z"
        });
        let data = data.as_object().cloned().context("booking object")?;
        Ok(self.store().insert(BOOKINGS, data).await?.id.to_string())
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::development();
    config.server.storage = StorageKind::Memory;
    config.security.bcrypt_cost = 4;
    config.security.password_reset_base_url = "http://localhost:3000/api/v1/users/resetPassword".into();
    config
}

pub async fn spawn_app() -> Result<TestApp> {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    ensure_collections(store.as_ref()).await?;
    let outbox = Arc::new(Outbox::default());
    let state = AppState::new(test_config(), store, outbox.clone())?;
    Ok(TestApp { router: router(state.clone()), state, outbox })
}

pub fn ids(body: &Value) -> Vec<String> {
    body["data"]["data"]
        .as_array()
        .map(|docs| docs.iter().filter_map(|d| d["id"].as_str().map(String::from)).collect())
        .unwrap_or_default()
}

pub fn random_id() -> String {
    Uuid::new_v4().to_string()
}
