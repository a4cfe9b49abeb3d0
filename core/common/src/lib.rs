//! Common types shared across the dav sync client crates.
//!
//! This crate holds the data model that every other layer speaks: table
//! objects and their property bags, the upload status tag, the session and
//! the cached user profile, plus the error type used throughout.

pub mod account;
pub mod error;
pub mod types;

pub use account::{App, Plan, Session, SessionUploadStatus, User};
pub use error::{Error, Result};
pub use types::{Property, PropertyValue, TableId, TableObject, UploadStatus};
