//! Route handlers shared by every resource. Each is generic over the schema
//! and picks its [`ResourceHandler`] out of the application state.

use axum::extract::{Path, RawQuery, State};
use serde_json::{json, Value};

use super::utils::{object_body, query_params, JsonBody};
use crate::app::AppState;
use crate::database::ResourceHandler;
use crate::middleware::{ApiResponse, ApiResult};
use crate::schemas::{BookingSchema, ResourceSchema, ReviewSchema, TourSchema, UserSchema};

pub trait ResourceState<S: ResourceSchema> {
    fn resource(&self) -> &ResourceHandler<S>;
}

impl ResourceState<TourSchema> for AppState {
    fn resource(&self) -> &ResourceHandler<TourSchema> {
        &self.tours
    }
}

impl ResourceState<ReviewSchema> for AppState {
    fn resource(&self) -> &ResourceHandler<ReviewSchema> {
        &self.reviews
    }
}

impl ResourceState<UserSchema> for AppState {
    fn resource(&self) -> &ResourceHandler<UserSchema> {
        &self.users
    }
}

impl ResourceState<BookingSchema> for AppState {
    fn resource(&self) -> &ResourceHandler<BookingSchema> {
        &self.bookings
    }
}

fn handler<S: ResourceSchema>(state: &AppState) -> &ResourceHandler<S>
where
    AppState: ResourceState<S>,
{
    <AppState as ResourceState<S>>::resource(state)
}

/// GET / - list with filter, sort, fields and pagination
pub async fn get_all<S: ResourceSchema>(State(state): State<AppState>, RawQuery(query): RawQuery) -> ApiResult<Value>
where
    AppState: ResourceState<S>,
{
    let params = query_params(query.as_deref());
    let listing = handler::<S>(&state).get_all(&params, vec![]).await?;
    Ok(ApiResponse::list(listing.results, json!({ "data": listing.documents })))
}

/// GET /:id
pub async fn get_one<S: ResourceSchema>(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value>
where
    AppState: ResourceState<S>,
{
    let doc = handler::<S>(&state).get_one(&id, None).await?;
    Ok(ApiResponse::success(json!({ "data": doc })))
}

/// POST /
pub async fn create_one<S: ResourceSchema>(State(state): State<AppState>, body: JsonBody) -> ApiResult<Value>
where
    AppState: ResourceState<S>,
{
    let doc = handler::<S>(&state).create_one(object_body(body)?).await?;
    Ok(ApiResponse::created(json!({ "data": doc })))
}

/// PATCH /:id
pub async fn update_one<S: ResourceSchema>(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: JsonBody,
) -> ApiResult<Value>
where
    AppState: ResourceState<S>,
{
    let doc = handler::<S>(&state).update_one(&id, object_body(body)?).await?;
    Ok(ApiResponse::success(json!({ "data": doc })))
}

/// DELETE /:id
pub async fn delete_one<S: ResourceSchema>(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()>
where
    AppState: ResourceState<S>,
{
    handler::<S>(&state).delete_one(&id).await?;
    Ok(ApiResponse::<()>::no_content())
}
