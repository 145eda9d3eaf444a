//! JWT service for token generation and validation
//!
//! Access and refresh tokens are HS512 tokens signed with distinct secrets,
//! so a token of one class can never validate as the other. Both carry the
//! user id and the session id they were issued for.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret for signing access tokens
    pub access_secret: String,
    /// Secret for signing refresh tokens
    pub refresh_secret: String,
    /// Access token lifetime (default: 30 minutes)
    pub access_token_expiry: Duration,
    /// Refresh token lifetime (default: 7 days)
    pub refresh_token_expiry: Duration,
}

/// JWT errors
#[derive(Error, Debug)]
pub enum JwtError {
    #[error("failed to sign token: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),

    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),

    #[error("access and refresh secrets must be distinct and non-empty")]
    WeakSecrets,
}

/// Claims of the short-lived access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User ID
    pub uid: i64,
    /// Session ID
    pub ssid: String,
    /// Client fingerprint hint, not enforced
    pub user_agent: String,
    /// Issued at time
    pub iat: u64,
    /// Expiration time
    pub exp: u64,
}

/// Claims of the long-lived refresh token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// User ID
    pub uid: i64,
    /// Session ID
    pub ssid: String,
    /// Issued at time
    pub iat: u64,
    /// Expiration time
    pub exp: u64,
}

/// JWT service
#[derive(Clone)]
pub struct JwtService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    validation: Validation,
    config: JwtConfig,
}

fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

impl JwtService {
    /// Initialize a new JWT service
    pub fn new(config: JwtConfig) -> Result<Self, JwtError> {
        if config.access_secret.is_empty()
            || config.refresh_secret.is_empty()
            || config.access_secret == config.refresh_secret
        {
            return Err(JwtError::WeakSecrets);
        }

        let mut validation = Validation::new(Algorithm::HS512);
        validation.validate_exp = true;
        validation.leeway = 0;

        Ok(JwtService {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            validation,
            config,
        })
    }

    /// Generate an access token bound to a session
    pub fn generate_access_token(
        &self,
        uid: i64,
        ssid: &str,
        user_agent: &str,
    ) -> Result<String, JwtError> {
        let now = now_secs();
        let claims = AccessClaims {
            uid,
            ssid: ssid.to_string(),
            user_agent: user_agent.to_string(),
            iat: now,
            exp: now + self.config.access_token_expiry.as_secs(),
        };
        encode(&Header::new(Algorithm::HS512), &claims, &self.access_encoding)
            .map_err(JwtError::Encode)
    }

    /// Generate a refresh token bound to a session
    pub fn generate_refresh_token(&self, uid: i64, ssid: &str) -> Result<String, JwtError> {
        let now = now_secs();
        let claims = RefreshClaims {
            uid,
            ssid: ssid.to_string(),
            iat: now,
            exp: now + self.config.refresh_token_expiry.as_secs(),
        };
        encode(&Header::new(Algorithm::HS512), &claims, &self.refresh_encoding)
            .map_err(JwtError::Encode)
    }

    /// Verify signature and expiry of an access token
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        decode::<AccessClaims>(token, &self.access_decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(JwtError::Invalid)
    }

    /// Verify signature and expiry of a refresh token
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        decode::<RefreshClaims>(token, &self.refresh_decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(JwtError::Invalid)
    }

    /// Get the refresh token lifetime
    pub fn refresh_token_expiry(&self) -> Duration {
        self.config.refresh_token_expiry
    }
}
