use anyhow::Result;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: String,
    pub user_id: i64,
}

/// HS256 token validation. Token issuance lives in the auth service; this
/// side only needs to verify and read claims.
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }

    /// Used by tests and local tooling.
    pub fn generate_token(&self, user_id: i64, role: &str, ttl_seconds: u64) -> Result<String> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + ttl_seconds) as usize,
            role: role.to_string(),
            user_id,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let manager = JwtManager::new("test-secret");
        let token = manager.generate_token(42, "user", 3600).unwrap();
        let claims = manager.validate_token(&token).unwrap();

        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.role, "user");
    }

    #[test]
    fn test_rejects_wrong_secret() {
        let manager = JwtManager::new("secret-a");
        let token = manager.generate_token(1, "user", 3600).unwrap();

        let other = JwtManager::new("secret-b");
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn test_rejects_expired() {
        let manager = JwtManager::new("secret");
        let token = manager.generate_token(1, "user", 0).unwrap();

        // exp == now fails default leeway-less validation once a token is stale
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(manager.validate_token(&token).is_err());
    }
}
