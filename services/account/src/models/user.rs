//! User model and related functionality

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub nickname: String,
    pub birthday: Option<NaiveDate>,
    pub about_me: String,
    pub avatar: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New user creation payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// User update payload; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUser {
    pub nickname: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub about_me: Option<String>,
    pub avatar: Option<String>,
}

impl User {
    /// Apply an update the way the store does
    pub fn apply(&mut self, changes: &UpdateUser) {
        if let Some(nickname) = &changes.nickname {
            self.nickname = nickname.clone();
        }
        if let Some(birthday) = changes.birthday {
            self.birthday = Some(birthday);
        }
        if let Some(about_me) = &changes.about_me {
            self.about_me = about_me.clone();
        }
        if let Some(avatar) = &changes.avatar {
            self.avatar = avatar.clone();
        }
    }
}
