use axum::extract::{Path, RawQuery, State};
use serde_json::{json, Value};

use super::utils::query_params;
use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::schemas::tour::TOUR_REVIEWS;
use crate::services::tours::{self, DistanceUnit, LatLng};

/// GET /top-5-cheap
pub async fn top_cheap(State(state): State<AppState>, RawQuery(query): RawQuery) -> ApiResult<Value> {
    let params = tours::top_cheap_params(&query_params(query.as_deref()));
    let listing = state.tours.get_all(&params, vec![]).await?;
    Ok(ApiResponse::list(listing.results, json!({ "data": listing.documents })))
}

/// GET /:id - with its reviews attached
pub async fn get_tour(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    let doc = state.tours.get_one(&id, Some(&TOUR_REVIEWS)).await?;
    Ok(ApiResponse::success(json!({ "data": doc })))
}

/// GET /tour-stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Value> {
    let stats = tours::tour_stats(&state.tours).await?;
    Ok(ApiResponse::success(json!({ "stats": stats })))
}

/// GET /monthly-plan/:year
pub async fn monthly_plan(State(state): State<AppState>, Path(year): Path<String>) -> ApiResult<Value> {
    let year: i32 = year
        .parse()
        .ok()
        .filter(|y| (1..=9998).contains(y))
        .ok_or_else(|| ApiError::bad_request(format!("Invalid year: {}", year)))?;
    let plan = tours::monthly_plan(&state.tours, year).await?;
    Ok(ApiResponse::success(json!({ "plan": plan })))
}

/// GET /tours-within/:distance/center/:latlng/unit/:unit
pub async fn tours_within(
    State(state): State<AppState>,
    Path((distance, latlng, unit)): Path<(String, String, String)>,
) -> ApiResult<Value> {
    let center = LatLng::parse(&latlng)?;
    let distance = tours::parse_distance(&distance)?;
    let found = tours::tours_within(&state.tours, distance, center, DistanceUnit::parse(&unit)).await?;
    Ok(ApiResponse::list(found.len(), json!({ "data": found })))
}

/// GET /distances/:latlng/unit/:unit
pub async fn distances(
    State(state): State<AppState>,
    Path((latlng, unit)): Path<(String, String)>,
) -> ApiResult<Value> {
    let origin = LatLng::parse(&latlng)?;
    let distances = tours::distances(&state.tours, origin, DistanceUnit::parse(&unit)).await?;
    Ok(ApiResponse::success(json!({ "distances": distances })))
}
