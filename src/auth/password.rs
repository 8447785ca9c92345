use super::AuthError;

/// bcrypt is CPU-bound; both directions run on the blocking pool.
pub async fn hash(plain: &str, cost: u32) -> Result<String, AuthError> {
    let plain = plain.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(plain, cost))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Malformed hashes verify as false.
pub async fn verify(plain: &str, hash: &str) -> bool {
    let (plain, hash) = (plain.to_string(), hash.to_string());
    match tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hash)).await {
        Ok(Ok(matches)) => matches,
        Ok(Err(e)) => {
            tracing::debug!("Password verification failed: {}", e);
            false
        }
        Err(e) => {
            tracing::error!("Password verification task failed: {}", e);
            false
        }
    }
}
