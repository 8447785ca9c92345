pub mod password;
pub mod reset;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::config::SecurityConfig;

pub use reset::ResetToken;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("JWT secret not configured")]
    InvalidSecret,

    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedToken {
    pub principal_id: Uuid,
    /// Seconds since the epoch.
    pub issued_at: i64,
}

/// Password hashing, session tokens and reset tokens. Receives its secret,
/// token lifetime and hashing cost at construction.
#[derive(Clone)]
pub struct CredentialService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
    bcrypt_cost: u32,
    dummy_hash: Arc<OnceCell<String>>,
}

const DUMMY_PASSWORD: &str = "natours-dummy-password";

impl CredentialService {
    pub fn new(config: &SecurityConfig) -> Result<Self, AuthError> {
        if config.jwt_secret.is_empty() {
            return Err(AuthError::InvalidSecret);
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            token_ttl: Duration::days(config.jwt_expires_in_days),
            bcrypt_cost: config.bcrypt_cost,
            dummy_hash: Arc::default(),
        })
    }

    pub fn issue_token(&self, principal_id: Uuid) -> Result<IssuedToken, AuthError> {
        self.issue_token_at(principal_id, Utc::now())
    }

    pub fn issue_token_at(&self, principal_id: Uuid, now: DateTime<Utc>) -> Result<IssuedToken, AuthError> {
        let expires_at = now + self.token_ttl;
        let claims = Claims {
            sub: principal_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenGeneration(e.to_string()))?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Bad signatures, expired tokens (no leeway) and malformed payloads all
    /// fail the same way.
    pub fn verify_token(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let principal_id = Uuid::parse_str(&data.claims.sub)
            .map_err(|_| AuthError::InvalidToken("malformed subject".to_string()))?;

        Ok(VerifiedToken { principal_id, issued_at: data.claims.iat })
    }

    pub async fn hash_password(&self, plain: &str) -> Result<String, AuthError> {
        password::hash(plain, self.bcrypt_cost).await
    }

    pub async fn verify_password(&self, plain: &str, hash: &str) -> bool {
        password::verify(plain, hash).await
    }

    /// Without a stored hash, verifies against a throwaway hash of the same
    /// cost and reports a mismatch.
    pub async fn verify_password_or_dummy(&self, plain: &str, hash: Option<&str>) -> Result<bool, AuthError> {
        match hash {
            Some(hash) => Ok(password::verify(plain, hash).await),
            None => {
                password::verify(plain, self.dummy_hash().await?).await;
                Ok(false)
            }
        }
    }

    async fn dummy_hash(&self) -> Result<&str, AuthError> {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| password::hash(DUMMY_PASSWORD, self.bcrypt_cost))
            .await?;
        Ok(hash.as_str())
    }

    pub fn create_password_reset_token(&self) -> ResetToken {
        reset::create(Utc::now())
    }

    pub fn hash_reset_token(plain: &str) -> String {
        reset::digest(plain)
    }

    /// A token is stale when it was issued strictly before the last password
    /// change, compared in whole seconds.
    pub fn is_token_stale_after_password_change(issued_at: i64, changed_at: Option<DateTime<Utc>>) -> bool {
        changed_at.is_some_and(|changed| issued_at < changed.timestamp())
    }

    /// Backdated one second so a token issued in the same instant stays valid.
    pub fn password_changed_at(now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::seconds(1)
    }
}

/// Seconds since the epoch as a UTC timestamp.
pub fn from_epoch_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn service() -> CredentialService {
        let mut config = AppConfig::development().security;
        config.jwt_secret = "test-secret".to_string();
        config.bcrypt_cost = 4;
        CredentialService::new(&config).unwrap()
    }

    #[test]
    fn issued_tokens_verify() {
        let svc = service();
        let id = Uuid::new_v4();
        let issued = svc.issue_token(id).unwrap();
        let verified = svc.verify_token(&issued.token).unwrap();
        assert_eq!(verified.principal_id, id);
        assert!(issued.expires_at > Utc::now() + Duration::days(89));
    }

    #[test]
    fn rejects_foreign_signatures_and_garbage() {
        let mut other = AppConfig::development().security;
        other.jwt_secret = "another-secret".to_string();
        let foreign = CredentialService::new(&other).unwrap().issue_token(Uuid::new_v4()).unwrap();

        let svc = service();
        assert!(matches!(svc.verify_token(&foreign.token), Err(AuthError::InvalidToken(_))));
        assert!(svc.verify_token("not.a.token").is_err());
        assert!(svc.verify_token("").is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let svc = service();
        let issued = svc.issue_token_at(Uuid::new_v4(), Utc::now() - Duration::days(91)).unwrap();
        assert!(svc.verify_token(&issued.token).is_err());
    }

    #[test]
    fn rejects_non_uuid_subjects() {
        let svc = service();
        let now = Utc::now().timestamp();
        let claims = Claims { sub: "admin".into(), iat: now, exp: now + 60 };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap();
        assert!(matches!(svc.verify_token(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn empty_secret_is_rejected() {
        let mut config = AppConfig::development().security;
        config.jwt_secret.clear();
        assert!(matches!(CredentialService::new(&config), Err(AuthError::InvalidSecret)));
    }

    #[test]
    fn staleness_compares_whole_seconds() {
        let changed = Utc::now();
        let iat = changed.timestamp();
        assert!(!CredentialService::is_token_stale_after_password_change(iat, Some(changed)));
        assert!(CredentialService::is_token_stale_after_password_change(iat - 1, Some(changed)));
        assert!(!CredentialService::is_token_stale_after_password_change(iat - 1, None));
    }

    #[test]
    fn password_change_is_backdated() {
        let now = Utc::now();
        assert_eq!(CredentialService::password_changed_at(now), now - Duration::seconds(1));
    }

    #[tokio::test]
    async fn hashes_and_verifies_passwords() {
        let svc = service();
        let hash = svc.hash_password("pass1234").await.unwrap();
        assert_ne!(hash, "pass1234");
        assert!(svc.verify_password("pass1234", &hash).await);
        assert!(!svc.verify_password("pass12345", &hash).await);
        assert!(!svc.verify_password("pass1234", "not-a-hash").await);
    }

    #[tokio::test]
    async fn missing_hashes_verify_against_a_dummy_of_the_same_cost() {
        let svc = service();
        assert!(!svc.verify_password_or_dummy(DUMMY_PASSWORD, None).await.unwrap());
        assert!(svc.dummy_hash().await.unwrap().starts_with("$2b$04$"));

        let hash = svc.hash_password("pass1234").await.unwrap();
        assert!(svc.verify_password_or_dummy("pass1234", Some(&hash)).await.unwrap());
        assert!(!svc.verify_password_or_dummy("wrong", Some(&hash)).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_users_still_pay_for_a_bcrypt_round() {
        let mut config = AppConfig::development().security;
        config.jwt_secret = "test-secret".to_string();
        config.bcrypt_cost = 8;
        let svc = CredentialService::new(&config).unwrap();
        svc.dummy_hash().await.unwrap();

        let started = std::time::Instant::now();
        assert!(!svc.verify_password_or_dummy("pass1234", None).await.unwrap());
        assert!(started.elapsed() >= std::time::Duration::from_millis(2));
    }
}
