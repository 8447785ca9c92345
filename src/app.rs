use axum::{
    extract::{DefaultBodyLimit, OriginalUri, State},
    handler::Handler,
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{AuthError, CredentialService};
use crate::config::AppConfig;
use crate::database::{DocumentStore, ResourceHandler};
use crate::error::ApiError;
use crate::handlers::{resource, reviews, tours, users};
use crate::middleware::{optional_auth, require_auth, restrict_to, AuthState, Role};
use crate::schemas::{BookingSchema, ResourceSchema, ReviewSchema, TourSchema, UserSchema};
use crate::services::{AccountService, RatingTrigger, ResetDelivery, StorePrincipals};

const BODY_LIMIT: usize = 10 * 1024;

const ADMIN: &[Role] = &[Role::Admin];
const USER: &[Role] = &[Role::User];
const USER_OR_ADMIN: &[Role] = &[Role::User, Role::Admin];
const MANAGERS: &[Role] = &[Role::Admin, Role::LeadGuide];
const STAFF: &[Role] = &[Role::Admin, Role::LeadGuide, Role::Guide];

/// Everything a request handler can reach. Built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub credentials: Arc<CredentialService>,
    pub tours: Arc<ResourceHandler<TourSchema>>,
    pub reviews: Arc<ResourceHandler<ReviewSchema>>,
    pub users: Arc<ResourceHandler<UserSchema>>,
    pub bookings: Arc<ResourceHandler<BookingSchema>>,
    pub accounts: Arc<AccountService>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        delivery: Arc<dyn ResetDelivery>,
    ) -> Result<Self, AuthError> {
        let credentials = Arc::new(CredentialService::new(&config.security)?);
        let filter = config.filter.clone();

        let tours = Arc::new(ResourceHandler::new(TourSchema, store.clone(), filter.clone()));
        let reviews = Arc::new(
            ResourceHandler::new(ReviewSchema, store.clone(), filter.clone()).with_trigger(Arc::new(RatingTrigger)),
        );
        let users = Arc::new(ResourceHandler::new(UserSchema, store.clone(), filter.clone()));
        let bookings = Arc::new(ResourceHandler::new(BookingSchema, store.clone(), filter));
        let accounts = Arc::new(AccountService::new(
            users.clone(),
            credentials.clone(),
            delivery,
            config.security.password_reset_base_url.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            credentials,
            tours,
            reviews,
            users,
            bookings,
            accounts,
        })
    }

    pub fn auth(&self) -> AuthState {
        AuthState {
            credentials: self.credentials.clone(),
            principals: Arc::new(StorePrincipals::new(self.store.clone())),
        }
    }
}

/// Creates backing storage for every resource.
pub async fn ensure_collections(store: &dyn DocumentStore) -> Result<(), crate::database::DatabaseError> {
    for spec in [
        TourSchema.collection(),
        ReviewSchema.collection(),
        UserSchema.collection(),
        BookingSchema.collection(),
    ] {
        store.ensure_collection(&spec).await?;
    }
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let auth = state.auth();

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api/v1/tours", tour_routes(&auth))
        .nest("/api/v1/users", user_routes(&auth))
        .nest("/api/v1/reviews", review_routes(&auth))
        .nest("/api/v1/bookings", booking_routes(&auth))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn tour_routes(auth: &AuthState) -> Router<AppState> {
    let protect = || from_fn_with_state(auth.clone(), require_auth);
    let managers = from_fn_with_state(MANAGERS, restrict_to);

    Router::new()
        .route(
            "/",
            get(resource::get_all::<TourSchema>)
                .post(resource::create_one::<TourSchema>.layer(managers.clone()).layer(protect())),
        )
        .route("/top-5-cheap", get(tours::top_cheap))
        .route("/tour-stats", get(tours::stats))
        .route(
            "/monthly-plan/:year",
            get(tours::monthly_plan
                .layer(from_fn_with_state(STAFF, restrict_to))
                .layer(protect())),
        )
        .route("/tours-within/:distance/center/:latlng/unit/:unit", get(tours::tours_within))
        .route("/distances/:latlng/unit/:unit", get(tours::distances))
        .route("/distance/:latlng/unit/:unit", get(tours::distances))
        .route(
            "/:id",
            get(tours::get_tour)
                .patch(resource::update_one::<TourSchema>.layer(managers.clone()).layer(protect()))
                .delete(resource::delete_one::<TourSchema>.layer(managers).layer(protect())),
        )
        .route(
            "/:id/reviews",
            get(reviews::list_for_tour.layer(protect()))
                .post(reviews::create_for_tour.layer(from_fn_with_state(USER, restrict_to)).layer(protect())),
        )
}

fn user_routes(auth: &AuthState) -> Router<AppState> {
    let public = Router::new()
        .route("/signup", post(users::signup))
        .route("/login", post(users::login))
        .route("/logout", get(users::logout))
        .route("/forgotPassword", post(users::forgot_password))
        .route("/resetPassword/:token", patch(users::reset_password))
        .route("/session", get(users::session.layer(from_fn_with_state(auth.clone(), optional_auth))));

    let account = Router::new()
        .route("/updateMyPassword", patch(users::update_my_password))
        .route("/me", get(users::me))
        .route("/updateMe", patch(users::update_me))
        .route("/deleteMe", delete(users::delete_me))
        .route_layer(from_fn_with_state(auth.clone(), require_auth));

    let admin = Router::new()
        .route("/", get(resource::get_all::<UserSchema>).post(users::create_user))
        .route(
            "/:id",
            get(resource::get_one::<UserSchema>)
                .patch(resource::update_one::<UserSchema>)
                .delete(resource::delete_one::<UserSchema>),
        )
        .route_layer(from_fn_with_state(ADMIN, restrict_to))
        .route_layer(from_fn_with_state(auth.clone(), require_auth));

    public.merge(account).merge(admin)
}

fn review_routes(auth: &AuthState) -> Router<AppState> {
    let owners = from_fn_with_state(USER_OR_ADMIN, restrict_to);

    Router::new()
        .route(
            "/",
            get(resource::get_all::<ReviewSchema>).post(reviews::create.layer(from_fn_with_state(USER, restrict_to))),
        )
        .route(
            "/:id",
            get(resource::get_one::<ReviewSchema>)
                .patch(resource::update_one::<ReviewSchema>.layer(owners.clone()))
                .delete(resource::delete_one::<ReviewSchema>.layer(owners)),
        )
        .route_layer(from_fn_with_state(auth.clone(), require_auth))
}

fn booking_routes(auth: &AuthState) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(resource::get_all::<BookingSchema>).post(resource::create_one::<BookingSchema>),
        )
        .route(
            "/:id",
            get(resource::get_one::<BookingSchema>)
                .patch(resource::update_one::<BookingSchema>)
                .delete(resource::delete_one::<BookingSchema>),
        )
        .route_layer(from_fn_with_state(MANAGERS, restrict_to))
        .route_layer(from_fn_with_state(auth.clone(), require_auth))
}

fn cors(config: &AppConfig) -> CorsLayer {
    if config.security.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .security
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {}", o);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn root() -> Json<Value> {
    Json(json!({
        "status": "success",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.store.health_check().await?;
    Ok(Json(json!({ "status": "success", "database": "ok" })))
}

async fn not_found(OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::not_found(format!("Can't find {} on this server!", uri))
}
