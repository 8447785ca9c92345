use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::filter::QueryParams;

pub type JsonBody = Result<Json<Map<String, Value>>, JsonRejection>;

/// Query string pairs in arrival order, percent-decoded.
pub fn query_params(raw: Option<&str>) -> QueryParams {
    let pairs: Vec<(String, String)> = raw
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    QueryParams::from(pairs)
}

/// Unwraps a JSON object body, turning rejections into the API error shape.
pub fn object_body(body: JsonBody) -> Result<Map<String, Value>, ApiError> {
    body.map(|Json(map)| map).map_err(|rejection| {
        tracing::debug!("Rejected request body: {}", rejection);
        ApiError::bad_request(rejection.body_text())
    })
}

pub fn str_field<'a>(body: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str)
}
