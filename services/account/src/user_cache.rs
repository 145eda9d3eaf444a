//! Read-through user cache
//!
//! Reads go cache first; concurrent misses for the same user share one
//! source-of-truth lookup. Writes go to the source of truth, then delete the
//! cached entry right away and once more after a short delay, which evicts
//! any stale copy a racing reader may have written back in between.

use std::sync::Arc;
use std::time::Duration;

use common::{KvStore, StoreError};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::models::{NewUser, UpdateUser, User};
use crate::repositories::{RepoError, UserStore};
use crate::singleflight::Group;

/// Cache timings
#[derive(Debug, Clone)]
pub struct UserCacheConfig {
    /// Lifetime of a cached user
    pub ttl: Duration,
    /// Delay before the second invalidation of a written user
    pub double_delete_delay: Duration,
    /// Bound for the detached second delete
    pub background_timeout: Duration,
}

impl Default for UserCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(15 * 60),
            double_delete_delay: Duration::from_secs(1),
            background_timeout: Duration::from_secs(5),
        }
    }
}

/// Errors of the cache itself
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The user is not cached
    #[error("cache miss")]
    Miss,

    #[error("user cache store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to encode cached user: {0}")]
    Encode(String),
}

/// Errors of the cached user repository
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("user not found")]
    NotFound,

    /// The cache failed with something other than a miss
    #[error("user cache unavailable: {0}")]
    Cache(CacheError),

    #[error(transparent)]
    Repo(RepoError),

    /// The shared lookup this call was waiting on never finished
    #[error("shared user lookup was abandoned")]
    Abandoned,
}

impl From<RepoError> for LookupError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => LookupError::NotFound,
            other => LookupError::Repo(other),
        }
    }
}

/// JSON user records under `user:info:{id}`
#[derive(Clone)]
pub struct UserCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl UserCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(id: i64) -> String {
        format!("user:info:{}", id)
    }

    /// Get a cached user
    ///
    /// An entry that no longer decodes is reported as a miss so it gets
    /// replaced from the source of truth.
    pub async fn get(&self, id: i64) -> Result<User, CacheError> {
        let raw = self.store.get(&Self::key(id)).await?.ok_or(CacheError::Miss)?;
        serde_json::from_str(&raw).map_err(|e| {
            warn!("Discarding undecodable cache entry for user {}: {}", id, e);
            CacheError::Miss
        })
    }

    /// Cache a user
    pub async fn set(&self, user: &User) -> Result<(), CacheError> {
        let raw = serde_json::to_string(user).map_err(|e| CacheError::Encode(e.to_string()))?;
        self.store.set(&Self::key(user.id), &raw, Some(self.ttl)).await?;
        Ok(())
    }

    /// Evict a user
    pub async fn delete(&self, id: i64) -> Result<(), CacheError> {
        self.store.delete(&Self::key(id)).await?;
        Ok(())
    }
}

/// User repository with a read-through cache in front of the source of truth
#[derive(Clone)]
pub struct CachedUserRepository {
    users: Arc<dyn UserStore>,
    cache: UserCache,
    flights: Arc<Group<i64, Result<User, LookupError>>>,
    config: UserCacheConfig,
}

impl CachedUserRepository {
    pub fn new(users: Arc<dyn UserStore>, cache: UserCache, config: UserCacheConfig) -> Self {
        Self {
            users,
            cache,
            flights: Arc::new(Group::new()),
            config,
        }
    }

    /// Find a user by ID through the cache
    pub async fn find_by_id(&self, id: i64) -> Result<User, LookupError> {
        match self.cache.get(id).await {
            Ok(user) => return Ok(user),
            Err(CacheError::Miss) => debug!("User cache miss for {}", id),
            Err(e) => return Err(LookupError::Cache(e)),
        }

        let users = Arc::clone(&self.users);
        let cache = self.cache.clone();
        self.flights
            .work(id, move || async move {
                let user = users.find_by_id(id).await?;
                if let Err(e) = cache.set(&user).await {
                    error!("Failed to write user {} back to cache: {}", id, e);
                }
                Ok(user)
            })
            .await
            .unwrap_or(Err(LookupError::Abandoned))
    }

    /// Find the user owning `phone`, creating one on first login
    pub async fn find_or_create_by_phone(&self, phone: &str) -> Result<User, LookupError> {
        match self.users.find_by_phone(phone).await {
            Ok(user) => return Ok(user),
            Err(RepoError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let new_user = NewUser {
            phone: Some(phone.to_string()),
            ..NewUser::default()
        };
        match self.users.insert(&new_user).await {
            Ok(user) => Ok(user),
            // another request created it first
            Err(RepoError::Duplicate(_)) => Ok(self.users.find_by_phone(phone).await?),
            Err(e) => Err(e.into()),
        }
    }

    /// Write an update and invalidate the cached copy twice
    ///
    /// The first delete's failure is returned since the cache may now hold
    /// data older than the write; the delayed delete only logs.
    pub async fn update(&self, id: i64, changes: &UpdateUser) -> Result<(), LookupError> {
        self.users.update(id, changes).await?;

        let cache = self.cache.clone();
        let delay = self.config.double_delete_delay;
        let timeout = self.config.background_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match tokio::time::timeout(timeout, cache.delete(id)).await {
                Ok(Ok(())) => debug!("Delayed cache delete done for user {}", id),
                Ok(Err(e)) => error!("Delayed cache delete failed for user {}: {}", id, e),
                Err(_) => error!("Delayed cache delete timed out for user {}", id),
            }
        });

        self.cache.delete(id).await.map_err(LookupError::Cache)
    }
}
