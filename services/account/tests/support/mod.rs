#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use account::{
    AppState,
    code::{CodeConfig, CodeService, CodeStore},
    jwt::{JwtConfig, JwtService},
    limiter::{LimiterConfig, SlidingWindowLimiter},
    models::{NewUser, UpdateUser, User},
    repositories::{RepoError, UserStore},
    session::SessionManager,
    sms::{SmsError, SmsMessage, SmsPipeline, SmsSender},
    user_cache::{CachedUserRepository, UserCache, UserCacheConfig},
};
use async_trait::async_trait;
use chrono::Utc;
use common::memory::MemoryStore;

/// Users held in a map, with an optional per-lookup delay
#[derive(Default)]
pub struct InMemoryUsers {
    users: Mutex<HashMap<i64, User>>,
    next_id: AtomicI64,
    pub lookups: AtomicUsize,
    pub delay: Duration,
}

impl InMemoryUsers {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn seed(&self, id: i64, nickname: &str) {
        let user = User {
            id,
            email: None,
            phone: Some(format!("1380013{:04}", id)),
            nickname: nickname.to_string(),
            birthday: None,
            about_me: String::new(),
            avatar: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.users.lock().unwrap().insert(id, user);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for InMemoryUsers {
    async fn find_by_id(&self, id: i64) -> Result<User, RepoError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.users
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn find_by_phone(&self, phone: &str) -> Result<User, RepoError> {
        self.users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.phone.as_deref() == Some(phone))
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn insert(&self, new_user: &NewUser) -> Result<User, RepoError> {
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.phone.is_some() && u.phone == new_user.phone) {
            return Err(RepoError::Duplicate("users_phone_key".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1000;
        let user = User {
            id,
            email: new_user.email.clone(),
            phone: new_user.phone.clone(),
            nickname: String::new(),
            birthday: None,
            about_me: String::new(),
            avatar: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        users.insert(id, user.clone());
        Ok(user)
    }

    async fn update(&self, id: i64, changes: &UpdateUser) -> Result<(), RepoError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&id).ok_or(RepoError::NotFound)?;
        user.apply(changes);
        user.updated_at = Utc::now();
        Ok(())
    }
}

/// SMS driver that keeps every message
#[derive(Default)]
pub struct CapturingSender {
    pub sent: Mutex<Vec<SmsMessage>>,
}

impl CapturingSender {
    pub fn last_code(&self) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .last()
            .and_then(|m| m.args.first().cloned())
    }
}

#[async_trait]
impl SmsSender for CapturingSender {
    async fn send(&self, message: &SmsMessage) -> Result<(), SmsError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub fn jwt_service() -> JwtService {
    JwtService::new(JwtConfig {
        access_secret: "integration-access".to_string(),
        refresh_secret: "integration-refresh".to_string(),
        access_token_expiry: Duration::from_secs(1800),
        refresh_token_expiry: Duration::from_secs(7 * 24 * 3600),
    })
    .unwrap()
}

pub fn cached_users(
    memory: Arc<MemoryStore>,
    users: Arc<InMemoryUsers>,
) -> CachedUserRepository {
    let config = UserCacheConfig::default();
    CachedUserRepository::new(users, UserCache::new(memory, config.ttl), config)
}

/// Everything a router test needs to look behind the handlers
pub struct TestApp {
    pub state: AppState,
    pub memory: Arc<MemoryStore>,
    pub users: Arc<InMemoryUsers>,
    pub sms: Arc<CapturingSender>,
}

pub fn test_app(ip_rate: u32) -> TestApp {
    let memory = Arc::new(MemoryStore::new());
    let users = Arc::new(InMemoryUsers::default());
    let sms = Arc::new(CapturingSender::default());

    let ip_limiter = Arc::new(SlidingWindowLimiter::new(
        memory.clone(),
        LimiterConfig {
            window: Duration::from_secs(60),
            rate: ip_rate,
            ..LimiterConfig::default()
        },
    ));
    let codes = CodeService::new(
        CodeStore::new(memory.clone(), CodeConfig::default()),
        SmsPipeline::builder().trace().deliver(sms.clone()),
    );

    let state = AppState {
        sessions: SessionManager::new(memory.clone(), jwt_service()),
        codes,
        users: cached_users(memory.clone(), users.clone()),
        ip_limiter,
    };

    TestApp {
        state,
        memory,
        users,
        sms,
    }
}
