//! # stagehand-store
//!
//! The local SQLite database. A [`Database`] is opened on demand by whoever
//! needs it and closed explicitly, so the close error can be observed.

#![deny(unsafe_code)]

pub mod database;
pub mod error;
pub mod profiles;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use profiles::{Profile, ProfileRepo};
