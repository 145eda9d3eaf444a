//! Common library for the account service
//!
//! This crate provides the key-value store abstraction the coordination
//! layer is built on: the [`store::KvStore`] trait with its atomic
//! [`store::Script`]s, a Redis backend, an in-process backend, and the shared
//! error types.
//!
//! ```rust,no_run
//! use common::cache::{RedisConfig, RedisPool};
//! use common::KvStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = RedisPool::new(&RedisConfig::default()).await?;
//!     pool.set("greeting", "hello", None).await?;
//!     println!("Redis health check: {}", pool.health_check().await?);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod memory;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::{KvStore, Script};
