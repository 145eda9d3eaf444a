//! User repository for database operations

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use crate::models::{NewUser, UpdateUser, User};

/// User repository errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepoError {
    #[error("user not found")]
    NotFound,

    /// A unique column (phone, email) already holds the value
    #[error("duplicate user: {0}")]
    Duplicate(String),

    #[error("user store error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepoError::Duplicate(db.constraint().unwrap_or("users").to_string())
            }
            other => RepoError::Backend(other.to_string()),
        }
    }
}

/// Source of truth for user records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find a user by ID
    async fn find_by_id(&self, id: i64) -> Result<User, RepoError>;

    /// Find a user by phone number
    async fn find_by_phone(&self, phone: &str) -> Result<User, RepoError>;

    /// Create a new user
    async fn insert(&self, new_user: &NewUser) -> Result<User, RepoError>;

    /// Update the non-empty fields of a user
    async fn update(&self, id: i64, changes: &UpdateUser) -> Result<(), RepoError>;
}

/// PostgreSQL implementation of [`UserStore`]
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str =
    "id, email, phone, nickname, birthday, about_me, avatar, created_at, updated_at";

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: i64) -> Result<User, RepoError> {
        info!("Finding user by ID: {}", id);

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_phone(&self, phone: &str) -> Result<User, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE phone = $1",
            USER_COLUMNS
        ))
        .bind(phone)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn insert(&self, new_user: &NewUser) -> Result<User, RepoError> {
        info!("Creating new user");

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, phone)
            VALUES ($1, $2)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&new_user.email)
        .bind(&new_user.phone)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn update(&self, id: i64, changes: &UpdateUser) -> Result<(), RepoError> {
        info!("Updating user: {}", id);

        let result = sqlx::query(
            r#"
            UPDATE users SET
                nickname = COALESCE($2, nickname),
                birthday = COALESCE($3, birthday),
                about_me = COALESCE($4, about_me),
                avatar = COALESCE($5, avatar),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&changes.nickname)
        .bind(changes.birthday)
        .bind(&changes.about_me)
        .bind(&changes.avatar)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
