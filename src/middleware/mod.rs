pub mod auth;
pub mod response;

pub use auth::{
    authenticate, extract_token, optional_auth, require_auth, restrict_to, AuthState, Principal, PrincipalLookup,
    Role, TOKEN_COOKIE,
};
pub use response::{ApiResponse, ApiResult};
