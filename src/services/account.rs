use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::{AuthError, CredentialService, IssuedToken};
use crate::database::{DatabaseError, Document, DocumentStore, ResourceError, ResourceHandler};
use crate::filter::{FilterOp, FilterWhereInfo};
use crate::middleware::TOKEN_COOKIE;
use crate::schemas::user::USERS;
use crate::schemas::{timestamp, ResourceSchema, SchemaError, UserSchema};

const SIGNUP_FIELDS: &[&str] = &["name", "email", "password", "passwordConfirm"];
const SELF_SERVICE_FIELDS: &[&str] = &["name", "email"];

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Please provide email and password!")]
    MissingCredentials,

    #[error("Incorrect email or password")]
    IncorrectCredentials,

    #[error("Your current password is wrong.")]
    IncorrectPassword,

    #[error("There is no user with that email address.")]
    UnknownEmail,

    #[error("Token is invalid or has expired")]
    InvalidResetToken,

    #[error("There was an error sending the email. Try again later!")]
    DeliveryFailed,

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Hands a password reset link to the user.
#[async_trait]
pub trait ResetDelivery: Send + Sync {
    async fn deliver(&self, email: &str, reset_url: &str) -> Result<(), String>;
}

/// Logs the link instead of sending it.
pub struct LogDelivery;

#[async_trait]
impl ResetDelivery for LogDelivery {
    async fn deliver(&self, email: &str, reset_url: &str) -> Result<(), String> {
        tracing::info!("Password reset for {}: {}", email, reset_url);
        Ok(())
    }
}

/// A freshly issued session and the user it belongs to, hidden fields
/// removed.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: IssuedToken,
    pub user: Document,
}

pub struct AccountService {
    users: Arc<ResourceHandler<UserSchema>>,
    credentials: Arc<CredentialService>,
    delivery: Arc<dyn ResetDelivery>,
    reset_base_url: String,
}

impl AccountService {
    pub fn new(
        users: Arc<ResourceHandler<UserSchema>>,
        credentials: Arc<CredentialService>,
        delivery: Arc<dyn ResetDelivery>,
        reset_base_url: impl Into<String>,
    ) -> Self {
        Self {
            users,
            credentials,
            delivery,
            reset_base_url: reset_base_url.into(),
        }
    }

    fn store(&self) -> &dyn DocumentStore {
        self.users.store().as_ref()
    }

    /// New accounts always start with the `user` role.
    pub async fn signup(&self, body: Map<String, Value>) -> Result<Session, AccountError> {
        let mut body: Map<String, Value> = body.into_iter().filter(|(k, _)| SIGNUP_FIELDS.contains(&k.as_str())).collect();
        body.insert("role".into(), Value::from("user"));

        let mut data = self.users.schema().validate_create(body)?;
        self.hash_into(&mut data).await?;
        let user = self.store().insert(USERS, data).await?;
        tracing::info!("New user {} signed up", user.id);
        self.session_for(user)
    }

    pub async fn login(&self, email: Option<&str>, password: Option<&str>) -> Result<Session, AccountError> {
        let (Some(email), Some(password)) = (email.filter(|e| !e.is_empty()), password.filter(|p| !p.is_empty())) else {
            return Err(AccountError::MissingCredentials);
        };

        let user = self.find_active_by_email(email).await?;
        // Unknown emails pay for a full bcrypt round as well
        let hash = user.as_ref().and_then(|u| u.get_str("password"));
        let matches = self.credentials.verify_password_or_dummy(password, hash).await?;
        match user {
            Some(user) if matches => self.session_for(user),
            _ => {
                tracing::warn!("Failed login for {}", email);
                Err(AccountError::IncorrectCredentials)
            }
        }
    }

    /// Stores a hashed reset token and hands the plaintext link to the
    /// delivery. A failed delivery leaves no usable token behind.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AccountError> {
        let user = self.find_active_by_email(email).await?.ok_or(AccountError::UnknownEmail)?;
        let reset = self.credentials.create_password_reset_token();

        let expires = timestamp(reset.expires_at);
        self.store()
            .modify(USERS, user.id, &|mut data| {
                data.insert("passwordResetToken".into(), Value::from(reset.hashed.clone()));
                data.insert("passwordResetExpires".into(), Value::from(expires.clone()));
                data
            })
            .await?
            .ok_or(ResourceError::NotFound)?;

        let url = format!("{}/{}", self.reset_base_url, reset.plaintext);
        let address = user.get_str("email").unwrap_or(email).to_string();
        if let Err(e) = self.delivery.deliver(&address, &url).await {
            tracing::error!("Reset delivery for {} failed: {}", user.id, e);
            self.store()
                .modify(USERS, user.id, &|mut data| {
                    if data.get("passwordResetToken").and_then(Value::as_str) == Some(reset.hashed.as_str()) {
                        data.remove("passwordResetToken");
                        data.remove("passwordResetExpires");
                    }
                    data
                })
                .await?;
            return Err(AccountError::DeliveryFailed);
        }
        Ok(())
    }

    pub async fn reset_password(
        &self,
        token: &str,
        password: Option<&Value>,
        confirm: Option<&Value>,
    ) -> Result<Session, AccountError> {
        self.reset_password_at(token, password, confirm, Utc::now()).await
    }

    pub async fn reset_password_at(
        &self,
        token: &str,
        password: Option<&Value>,
        confirm: Option<&Value>,
        now: DateTime<Utc>,
    ) -> Result<Session, AccountError> {
        let mut conditions = vec![
            FilterWhereInfo::eq("passwordResetToken", CredentialService::hash_reset_token(token)),
            FilterWhereInfo::new("passwordResetExpires", FilterOp::Gt, timestamp(now)),
        ];
        conditions.extend(self.users.schema().default_scope());
        let user = self
            .store()
            .find_one(USERS, conditions)
            .await?
            .ok_or(AccountError::InvalidResetToken)?;

        let mut data = user.data;
        data.remove("passwordResetToken");
        data.remove("passwordResetExpires");
        self.set_password(user.id, user.version, data, password, confirm, now).await
    }

    /// Requires the current password even though the caller is logged in.
    pub async fn update_password(
        &self,
        user_id: Uuid,
        current: Option<&str>,
        password: Option<&Value>,
        confirm: Option<&Value>,
    ) -> Result<Session, AccountError> {
        let user = self
            .store()
            .find_by_id(USERS, user_id)
            .await?
            .ok_or(ResourceError::NotFound)?;
        let hash = user.get_str("password").unwrap_or_default();
        if !self.credentials.verify_password(current.unwrap_or_default(), hash).await {
            return Err(AccountError::IncorrectPassword);
        }
        self.set_password(user.id, user.version, user.data, password, confirm, Utc::now()).await
    }

    pub async fn me(&self, user_id: Uuid) -> Result<Document, AccountError> {
        Ok(self.users.get_one(&user_id.to_string(), None).await?)
    }

    /// Only `name` and `email` can be changed here; password fields are
    /// refused outright.
    pub async fn update_me(&self, user_id: Uuid, body: Map<String, Value>) -> Result<Document, AccountError> {
        if body.contains_key("password") || body.contains_key("passwordConfirm") {
            return Err(SchemaError::Rejected(
                "This route is not for password updates. Please use /updateMyPassword".to_string(),
            )
            .into());
        }
        let patch: Map<String, Value> = body
            .into_iter()
            .filter(|(k, _)| SELF_SERVICE_FIELDS.contains(&k.as_str()))
            .collect();
        Ok(self.users.update_one(&user_id.to_string(), patch).await?)
    }

    /// Deactivates the account; the data stays.
    pub async fn delete_me(&self, user_id: Uuid) -> Result<(), AccountError> {
        let mut patch = Map::new();
        patch.insert("active".into(), Value::Bool(false));
        self.users.update_one(&user_id.to_string(), patch).await?;
        tracing::info!("User {} deactivated their account", user_id);
        Ok(())
    }

    /// Writes only over the `version` the caller checked; a concurrent change
    /// surfaces as a conflict rather than being retried.
    async fn set_password(
        &self,
        id: Uuid,
        version: i32,
        mut data: Map<String, Value>,
        password: Option<&Value>,
        confirm: Option<&Value>,
        now: DateTime<Utc>,
    ) -> Result<Session, AccountError> {
        UserSchema::check_new_password(password, confirm)?;
        data.insert("password".into(), password.cloned().unwrap_or(Value::Null));
        self.hash_into(&mut data).await?;
        data.insert(
            "passwordChangedAt".into(),
            Value::from(timestamp(CredentialService::password_changed_at(now))),
        );
        let data = self.users.schema().normalize(data)?;
        let user = self
            .store()
            .replace(USERS, id, version, data)
            .await?
            .ok_or(ResourceError::NotFound)?;
        tracing::info!("Password changed for {}", id);
        self.session_for_at(user, now)
    }

    async fn hash_into(&self, data: &mut Map<String, Value>) -> Result<(), AccountError> {
        if let Some(plain) = data.get("password").and_then(Value::as_str) {
            let hash = self.credentials.hash_password(plain).await?;
            data.insert("password".into(), Value::from(hash));
        }
        Ok(())
    }

    async fn find_active_by_email(&self, email: &str) -> Result<Option<Document>, AccountError> {
        let mut conditions = vec![FilterWhereInfo::eq("email", email.trim().to_lowercase())];
        conditions.extend(self.users.schema().default_scope());
        Ok(self.store().find_one(USERS, conditions).await?)
    }

    fn session_for(&self, user: Document) -> Result<Session, AccountError> {
        self.session_for_at(user, Utc::now())
    }

    fn session_for_at(&self, user: Document, now: DateTime<Utc>) -> Result<Session, AccountError> {
        let token = self.credentials.issue_token_at(user.id, now)?;
        Ok(Session { token, user: self.users.present(user) })
    }
}

/// `Set-Cookie` value carrying a session token.
pub fn session_cookie(token: &str, expires: DateTime<Utc>, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Expires={}; Path=/; HttpOnly",
        TOKEN_COOKIE,
        token,
        expires.format("%a, %d %b %Y %H:%M:%S GMT")
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Overwrites the session cookie with a short-lived placeholder.
pub fn logout_cookie(now: DateTime<Utc>) -> String {
    session_cookie("loggedout", now + Duration::seconds(10), false)
}
