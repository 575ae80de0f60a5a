//! Error types for the disk cache

use std::fmt;

#[derive(Debug)]
pub enum DiskCacheError {
    Io(Box<std::io::Error>),
    Database(Box<sqlx::Error>),
    Migration(String),
    Init(String),
    LaneClosed,
    Config(String),
}

impl fmt::Display for DiskCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskCacheError::Io(err) => write!(f, "IO error: {}", err),
            DiskCacheError::Database(err) => write!(f, "Database error: {}", err),
            DiskCacheError::Migration(msg) => write!(f, "Migration error: {}", msg),
            DiskCacheError::Init(msg) => write!(f, "Initialization error: {}", msg),
            DiskCacheError::LaneClosed => write!(f, "Disk cache is closed"),
            DiskCacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for DiskCacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiskCacheError::Io(err) => Some(err.as_ref()),
            DiskCacheError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DiskCacheError {
    fn from(err: std::io::Error) -> Self {
        DiskCacheError::Io(Box::new(err))
    }
}

impl From<sqlx::Error> for DiskCacheError {
    fn from(err: sqlx::Error) -> Self {
        DiskCacheError::Database(Box::new(err))
    }
}

impl From<sqlx::migrate::MigrateError> for DiskCacheError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DiskCacheError::Migration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiskCacheError>;
