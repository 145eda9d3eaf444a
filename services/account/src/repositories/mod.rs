//! Repositories backed by the relational store

pub mod user;

pub use user::{PgUserStore, RepoError, UserStore};
