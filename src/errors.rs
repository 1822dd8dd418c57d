//!
//! src/errors.rs
//!
//! Defines enums and methods of error conversion
//! for errors the sync uses
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("config error: {0}")]
    Config(String),
    #[error("scrape error: {0}")]
    Scrape(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self { SyncError::Parse(e.to_string()) }
}
