//! Error types for Tether

use std::error::Error as _;

use thiserror::Error;

use crate::types::Category;

/// Result type alias for Tether operations
pub type Result<T> = std::result::Result<T, TetherError>;

/// Main error type for Tether
#[derive(Error, Debug)]
pub enum TetherError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Cloud storage error: {0}")]
    CloudStorage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Failed to synchronize {category}")]
    Category {
        category: Category,
        #[source]
        source: Box<TetherError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TetherError {
    /// Wrap an error with the category whose sync raised it
    pub fn in_category(self, category: Category) -> Self {
        TetherError::Category {
            category,
            source: Box::new(self),
        }
    }

    /// Check if the error means "the path does not exist"
    pub fn is_not_found(&self) -> bool {
        match self {
            TetherError::NotFound(_) => true,
            TetherError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            TetherError::Category { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if the error must abort the run even when raised for a single file
    pub fn is_fatal(&self) -> bool {
        match self {
            TetherError::Auth(_) => true,
            TetherError::Category { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Verbose text including every nested cause, one per line
    pub fn diagnostic(&self) -> String {
        let mut out = self.to_string();
        let mut cause = self.source();
        while let Some(inner) = cause {
            out.push_str("\n  caused by: ");
            out.push_str(&inner.to_string());
            cause = inner.source();
        }
        out
    }
}
