use axum::extract::{Path, RawQuery, State};
use axum::Extension;
use serde_json::{json, Value};

use super::utils::{object_body, query_params, JsonBody};
use crate::app::AppState;
use crate::error::ApiError;
use crate::filter::FilterWhereInfo;
use crate::middleware::{ApiResponse, ApiResult, Principal};
use crate::services::reviews::has_booked;

const NOT_BOOKED: &str = "You can only review tours you have booked";

/// GET /tours/:id/reviews
pub async fn list_for_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    RawQuery(query): RawQuery,
) -> ApiResult<Value> {
    let params = query_params(query.as_deref());
    let listing = state
        .reviews
        .get_all(&params, vec![FilterWhereInfo::eq("tour", tour_id)])
        .await?;
    Ok(ApiResponse::list(listing.results, json!({ "data": listing.documents })))
}

/// POST /reviews
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: JsonBody,
) -> ApiResult<Value> {
    create_review(&state, &principal, None, body).await
}

/// POST /tours/:id/reviews
pub async fn create_for_tour(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(tour_id): Path<String>,
    body: JsonBody,
) -> ApiResult<Value> {
    create_review(&state, &principal, Some(tour_id), body).await
}

/// Fills `tour` from the path and `user` from the caller when absent, then
/// requires a booking for the pair.
async fn create_review(
    state: &AppState,
    principal: &Principal,
    tour_id: Option<String>,
    body: JsonBody,
) -> ApiResult<Value> {
    let mut body = object_body(body)?;
    if let Some(tour_id) = tour_id {
        body.entry("tour").or_insert(Value::String(tour_id));
    }
    body.entry("user").or_insert_with(|| Value::String(principal.id.to_string()));

    let tour = body.get("tour").and_then(Value::as_str).unwrap_or_default().to_string();
    let user = body.get("user").and_then(Value::as_str).unwrap_or_default().to_string();
    if !has_booked(state.store.as_ref(), &tour, &user).await? {
        tracing::debug!("{} has no booking for tour {}", user, tour);
        return Err(ApiError::forbidden(NOT_BOOKED));
    }

    let doc = state.reviews.create_one(body).await?;
    Ok(ApiResponse::created(json!({ "data": doc })))
}
