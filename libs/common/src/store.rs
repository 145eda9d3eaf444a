//! Key-value store abstraction shared by every coordination component
//!
//! Components never issue a GET followed by a SET for check-and-set logic.
//! They compile that logic into one of the [`Script`]s below and run it
//! through [`KvStore::eval`], which executes it atomically on the store.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

/// Atomic scripts understood by every [`KvStore`] backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    /// Sliding window admission check.
    ///
    /// Keys: `[subject]`. Args: `[window_ms, rate, now_ms, member]`.
    /// Replies `1` when limited, `0` when the event was admitted and recorded.
    SlidingWindow,
    /// Verification code issuance.
    ///
    /// Keys: `[code_key]`. Args: `[code, ttl_secs, resend_interval_secs]`.
    /// Replies `0` stored, `-1` sent too recently, `-2` key has no expiry.
    SetCode,
    /// Verification code check.
    ///
    /// Keys: `[code_key]`. Args: `[input, max_attempts]`.
    /// Replies `0` matched, `-1` too many attempts, `-2` mismatch, `-3` no code.
    VerifyCode,
}

impl Script {
    /// Every script, used to preload bodies into a backend
    pub const ALL: [Script; 3] = [Script::SlidingWindow, Script::SetCode, Script::VerifyCode];

    /// Lua body executed by Redis
    pub fn body(&self) -> &'static str {
        match self {
            Script::SlidingWindow => include_str!("lua/slide_window.lua"),
            Script::SetCode => include_str!("lua/set_code.lua"),
            Script::VerifyCode => include_str!("lua/verify_code.lua"),
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Script::SlidingWindow => "slide_window",
            Script::SetCode => "set_code",
            Script::VerifyCode => "verify_code",
        }
    }
}

/// Operations the coordination layer needs from a key-value store
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a value by key, `None` when the key does not exist
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a value with an optional time to live
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Delete a key, returning the number of keys removed
    async fn delete(&self, key: &str) -> StoreResult<u64>;

    /// Count how many of the given keys exist (0 or 1 for a single key)
    async fn exists(&self, key: &str) -> StoreResult<u64>;

    /// Run an atomic script and return its integer reply
    async fn eval(&self, script: Script, keys: &[String], args: &[String]) -> StoreResult<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_bodies_reference_their_keys() {
        for script in Script::ALL {
            assert!(script.body().contains("KEYS[1]"), "{}", script.name());
        }
    }

    #[test]
    fn test_code_scripts_share_counter_suffix() {
        assert!(Script::SetCode.body().contains(":cnt"));
        assert!(Script::VerifyCode.body().contains(":cnt"));
    }
}
