//! Session management on top of the key-value store
//!
//! A session is active from the moment its tokens are issued; nothing is
//! written at login. Logging out writes a revocation marker
//! `users:ssid:{ssid}` that outlives every token of the session. A marker
//! that exists means the session is revoked.

use std::sync::Arc;

use chrono::Utc;
use common::{KvStore, StoreError};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::jwt::{AccessClaims, JwtError, JwtService, RefreshClaims};

/// Session management errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("token error: {0}")]
    Token(#[from] JwtError),

    #[error("session store error: {0}")]
    Store(#[from] StoreError),
}

/// Authentication failure
///
/// Deliberately carries no cause: a bad signature, an expired token, a
/// revoked session and an unreachable store all look the same to callers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("unauthorized")]
    Unauthorized,
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Revoked,
    Expired,
}

/// Freshly issued login tokens
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub ssid: String,
}

/// Session manager for handling user sessions
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn KvStore>,
    jwt_service: JwtService,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(store: Arc<dyn KvStore>, jwt_service: JwtService) -> Self {
        Self { store, jwt_service }
    }

    fn marker_key(ssid: &str) -> String {
        format!("users:ssid:{}", ssid)
    }

    /// Start a new session for a user
    pub fn issue_login_tokens(&self, uid: i64, user_agent: &str) -> Result<TokenPair, SessionError> {
        let ssid = Uuid::new_v4().to_string();
        info!("Creating session {} for user {}", ssid, uid);

        let refresh_token = self.jwt_service.generate_refresh_token(uid, &ssid)?;
        let access_token = self
            .jwt_service
            .generate_access_token(uid, &ssid, user_agent)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            ssid,
        })
    }

    /// Sign a new access token for an existing session
    pub fn issue_access_token(
        &self,
        uid: i64,
        ssid: &str,
        user_agent: &str,
    ) -> Result<String, SessionError> {
        Ok(self
            .jwt_service
            .generate_access_token(uid, ssid, user_agent)?)
    }

    /// Revoke a session
    ///
    /// The marker lives as long as a refresh token; after that every token of
    /// the session has expired on its own.
    pub async fn revoke(&self, ssid: &str) -> Result<(), SessionError> {
        info!("Revoking session {}", ssid);
        self.store
            .set(
                &Self::marker_key(ssid),
                "",
                Some(self.jwt_service.refresh_token_expiry()),
            )
            .await?;
        Ok(())
    }

    /// Check whether a session was revoked
    pub async fn is_revoked(&self, ssid: &str) -> Result<bool, SessionError> {
        let count = self.store.exists(&Self::marker_key(ssid)).await?;
        Ok(count > 0)
    }

    /// Lifecycle state of the session a refresh token belongs to
    pub async fn state(&self, claims: &RefreshClaims) -> Result<SessionState, SessionError> {
        if claims.exp <= Utc::now().timestamp().max(0) as u64 {
            return Ok(SessionState::Expired);
        }
        if self.is_revoked(&claims.ssid).await? {
            return Ok(SessionState::Revoked);
        }
        Ok(SessionState::Active)
    }

    /// Fail closed: a store error counts as revoked
    async fn ensure_active(&self, ssid: &str) -> Result<(), AuthError> {
        match self.is_revoked(ssid).await {
            Ok(false) => Ok(()),
            Ok(true) => {
                debug!("Rejected token of revoked session {}", ssid);
                Err(AuthError::Unauthorized)
            }
            Err(e) => {
                error!("Failed to check revocation of session {}: {}", ssid, e);
                Err(AuthError::Unauthorized)
            }
        }
    }

    /// Authenticate a bearer access token
    pub async fn authenticate(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let claims = self.jwt_service.validate_access_token(token).map_err(|e| {
            debug!("Rejected access token: {}", e);
            AuthError::Unauthorized
        })?;
        self.ensure_active(&claims.ssid).await?;
        Ok(claims)
    }

    /// Authenticate a refresh token
    pub async fn authenticate_refresh(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        let claims = self.jwt_service.validate_refresh_token(token).map_err(|e| {
            debug!("Rejected refresh token: {}", e);
            AuthError::Unauthorized
        })?;
        self.ensure_active(&claims.ssid).await?;
        Ok(claims)
    }

    /// Exchange a refresh token for a new access token of the same session
    pub async fn refresh(&self, refresh_token: &str, user_agent: &str) -> Result<String, AuthError> {
        let claims = self.authenticate_refresh(refresh_token).await?;
        self.issue_access_token(claims.uid, &claims.ssid, user_agent)
            .map_err(|e| {
                error!("Failed to sign access token: {}", e);
                AuthError::Unauthorized
            })
    }
}
