use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Authenticator, Identity, UserId};
use crate::error::{GatewayError, Result};

const ACCESS_TOKEN_TYPE: &str = "access";

/// Claims of an access token as issued by the lab's login service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub token_type: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub user_id: UserId,
}

/// Validates HS256 access tokens signed with the shared secret
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Mints an access token; meant for development tooling and tests
    pub fn issue_access_token(&self, user_id: UserId, ttl: Duration) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            exp: now + ttl.as_secs() as i64,
            iat: now,
            jti: Uuid::new_v4().simple().to_string(),
            user_id,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| GatewayError::internal(format!("Failed to encode token: {}", e)))
    }

    pub fn validate(&self, token: &str) -> Result<AccessClaims> {
        if token.is_empty() {
            return Err(GatewayError::MissingToken);
        }

        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => GatewayError::TokenExpired,
                _ => GatewayError::unauthorized(e.to_string()),
            }
        })?;

        if data.claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(GatewayError::unauthorized(format!(
                "expected an access token, got {}",
                data.claims.token_type
            )));
        }

        Ok(data.claims)
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity> {
        let claims = self.validate(token)?;
        Ok(Identity {
            user_id: claims.user_id,
        })
    }
}
