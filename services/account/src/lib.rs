//! Account service
//!
//! SMS login, JWT sessions with server-side revocation, per-client rate
//! limiting and a read-through user cache, all coordinated through the
//! shared key-value store from the `common` crate.

use std::sync::Arc;

pub mod code;
pub mod config;
pub mod database;
pub mod jwt;
pub mod limiter;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod session;
pub mod singleflight;
pub mod sms;
pub mod user_cache;
pub mod validation;

use crate::{
    code::CodeService, limiter::Limiter, session::SessionManager,
    user_cache::CachedUserRepository,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub codes: CodeService,
    pub users: CachedUserRepository,
    pub ip_limiter: Arc<dyn Limiter>,
}
