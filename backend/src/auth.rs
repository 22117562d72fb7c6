use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const TOKEN_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub user_id: String,
    pub exp: i64,
}

/// Shared HS256 signing material for session tokens.
#[derive(Clone)]
pub struct JwtKeys {
    secret: Arc<str>,
}

impl JwtKeys {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into().into(),
        }
    }

    pub fn issue(&self, user_id: &str, email: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: email.to_string(),
            user_id: user_id.to_string(),
            exp: (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(data.claims)
    }
}
