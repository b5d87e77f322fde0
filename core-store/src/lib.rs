//! # Durable Notification Store
//!
//! SQLite-backed persistence for notifications, buckets, and sync bookkeeping.
//!
//! ## Overview
//!
//! - [`db`] owns pool configuration, schema migrations, and the swappable
//!   [`db::DurableDatabase`] handle that recovery uses to reset the database
//!   underneath live repositories
//! - [`models`] defines the row types
//! - [`repositories`] provides trait-based data access over the pool
//!
//! Corruption-class driver errors are classified at the error boundary (see
//! [`error::StoreError::is_corruption`]) so callers can route them to the
//! recovery service instead of treating them as ordinary query failures.

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{Result, StoreError};
