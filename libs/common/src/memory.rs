//! In-process key-value store
//!
//! Mirrors the Redis backend closely enough for tests and local runs: keys
//! expire on tokio's clock, and every [`Script`] is executed natively while
//! holding the store lock, which gives the same atomicity a Lua script has on
//! a Redis server.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{StoreError, StoreResult};
use crate::store::{KvStore, Script};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    /// Sorted set as (score, member) pairs
    ZSet(Vec<(i64, String)>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Key-value store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remaining time to live of a key, Redis style: `None` when the key is
    /// missing, `Some(None)` when it never expires
    pub fn ttl(&self, key: &str) -> Option<Option<Duration>> {
        let now = Instant::now();
        let entries = self.lock();
        let entry = entries.get(key).filter(|e| e.is_live(now))?;
        Some(entry.expires_at.map(|at| at.saturating_duration_since(now)))
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| e.is_live(now)).count()
    }

    /// Whether the store holds no live keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn live<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn arg<T: FromStr>(args: &[String], idx: usize) -> StoreResult<T> {
    args.get(idx)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| StoreError::InvalidArgument(format!("argument {} is missing or malformed", idx)))
}

fn first_key(keys: &[String]) -> StoreResult<&str> {
    keys.first()
        .map(String::as_str)
        .ok_or_else(|| StoreError::InvalidArgument("script needs one key".to_string()))
}

fn sliding_window(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    args: &[String],
    now: Instant,
) -> StoreResult<i64> {
    let window: i64 = arg(args, 0)?;
    let threshold: usize = arg(args, 1)?;
    let now_ms: i64 = arg(args, 2)?;
    let member: String = arg(args, 3)?;

    let entry = live(entries, key, now);
    let mut events = match entry {
        Some(Entry {
            value: Value::ZSet(events),
            ..
        }) => std::mem::take(events),
        Some(_) => return Err(StoreError::WrongType(key.to_string())),
        None => Vec::new(),
    };

    events.retain(|(score, _)| *score > now_ms - window);
    let limited = events.len() >= threshold;
    if !limited {
        events.retain(|(_, m)| *m != member);
        events.push((now_ms, member));
        events.sort();
    }

    let expires_at = if limited {
        entries.get(key).and_then(|e| e.expires_at)
    } else {
        Some(now + Duration::from_millis(window.max(1) as u64))
    };
    if events.is_empty() {
        entries.remove(key);
    } else {
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::ZSet(events),
                expires_at,
            },
        );
    }

    Ok(if limited { 1 } else { 0 })
}

fn set_code(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    args: &[String],
    now: Instant,
) -> StoreResult<i64> {
    let code: String = arg(args, 0)?;
    let ttl_secs: u64 = arg(args, 1)?;
    let resend_secs: u64 = arg(args, 2)?;

    match live(entries, key, now).map(|e| e.expires_at) {
        Some(None) => return Ok(-2),
        Some(Some(at)) => {
            let remaining_ms = at.saturating_duration_since(now).as_millis();
            if remaining_ms >= u128::from(ttl_secs.saturating_sub(resend_secs)) * 1000 {
                return Ok(-1);
            }
        }
        None => {}
    }

    let expires_at = Some(now + Duration::from_secs(ttl_secs));
    entries.insert(
        key.to_string(),
        Entry {
            value: Value::Str(code),
            expires_at,
        },
    );
    entries.insert(
        format!("{}:cnt", key),
        Entry {
            value: Value::Str("0".to_string()),
            expires_at,
        },
    );
    Ok(0)
}

fn verify_code(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    args: &[String],
    now: Instant,
) -> StoreResult<i64> {
    let input: String = arg(args, 0)?;
    let max_attempts: i64 = arg(args, 1)?;

    let (code, code_expiry) = match live(entries, key, now) {
        Some(Entry {
            value: Value::Str(code),
            expires_at,
        }) => (code.clone(), *expires_at),
        Some(_) => return Err(StoreError::WrongType(key.to_string())),
        None => return Ok(-3),
    };

    let cnt_key = format!("{}:cnt", key);
    let attempts = match live(entries, &cnt_key, now) {
        Some(entry) => {
            let Value::Str(raw) = &entry.value else {
                return Err(StoreError::WrongType(cnt_key));
            };
            let next = raw
                .parse::<i64>()
                .map_err(|_| StoreError::WrongType(cnt_key.clone()))?
                + 1;
            entry.value = Value::Str(next.to_string());
            next
        }
        None => {
            entries.insert(
                cnt_key.clone(),
                Entry {
                    value: Value::Str("1".to_string()),
                    expires_at: code_expiry,
                },
            );
            1
        }
    };

    if attempts > max_attempts {
        return Ok(-1);
    }
    if code == input {
        entries.remove(key);
        entries.remove(&cnt_key);
        return Ok(0);
    }
    Ok(-2)
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.lock();
        match live(&mut entries, key, now) {
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let now = Instant::now();
        self.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let now = Instant::now();
        let mut entries = self.lock();
        let removed = entries.remove(key).filter(|e| e.is_live(now));
        Ok(removed.map_or(0, |_| 1))
    }

    async fn exists(&self, key: &str) -> StoreResult<u64> {
        let now = Instant::now();
        let mut entries = self.lock();
        Ok(live(&mut entries, key, now).map_or(0, |_| 1))
    }

    async fn eval(&self, script: Script, keys: &[String], args: &[String]) -> StoreResult<i64> {
        let key = first_key(keys)?;
        let now = Instant::now();
        let mut entries = self.lock();
        match script {
            Script::SlidingWindow => sliding_window(&mut entries, key, args, now),
            Script::SetCode => set_code(&mut entries, key, args, now),
            Script::VerifyCode => verify_code(&mut entries, key, args, now),
        }
    }
}
