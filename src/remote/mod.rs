//! Remote store abstraction
//!
//! The sync engine talks to cloud storage only through [`RemoteStore`].
//! Paths are absolute, `/`-separated, and rooted at the account's
//! app-scoped folder (for example `/Notes/todo.txt`).
//!
//! # Feature Flags
//!
//! The S3-compatible backend requires the `cloud` feature. The in-memory
//! store is always available.

mod memory;
#[cfg(feature = "cloud")]
mod s3;

pub use memory::{FailureKind, MemoryRemoteStore, RemoteOp};
#[cfg(feature = "cloud")]
pub use s3::S3RemoteStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// One entry of a remote listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Absolute remote path
    pub path: String,
    /// False for folders
    pub is_file: bool,
    /// Content modification time in UTC
    pub modified_at: DateTime<Utc>,
    /// Size in bytes (0 for folders)
    pub size: u64,
}

/// A single page of a folder listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<RemoteEntry>,
    /// Continuation cursor for the next page
    pub cursor: Option<String>,
    /// Whether another page must be fetched with `cursor`
    pub has_more: bool,
}

/// Cloud storage operations consumed by the sync engine
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List a folder. Returns `TetherError::NotFound` if the folder does not exist.
    async fn list_folder(&self, path: &str, recursive: bool) -> Result<ListPage>;

    /// Fetch the page after `cursor`
    async fn list_folder_continue(&self, cursor: &str) -> Result<ListPage>;

    /// Metadata for a path, or `None` if nothing exists there
    async fn get_metadata(&self, path: &str) -> Result<Option<RemoteEntry>>;

    /// Download a file's bytes
    async fn download(&self, path: &str) -> Result<Vec<u8>>;

    /// Upload a file, overwriting any existing copy, keeping `modified_at`
    /// as the stored content time
    async fn upload(&self, path: &str, data: Vec<u8>, modified_at: DateTime<Utc>) -> Result<()>;

    /// Create a folder. Succeeds if it already exists.
    async fn create_folder(&self, path: &str) -> Result<()>;

    /// Invalidate the credentials this store was opened with
    async fn revoke_token(&self) -> Result<()>;

    /// Check that the store is reachable with the current credentials
    async fn test_connection(&self) -> bool;
}

/// List a folder to exhaustion, following continuation cursors.
///
/// Entries are keyed by path so one repeated across a page boundary is kept
/// once. A folder that does not exist yet lists as empty.
pub async fn list_all(
    store: &dyn RemoteStore,
    path: &str,
    recursive: bool,
) -> Result<Vec<RemoteEntry>> {
    let mut page = match store.list_folder(path, recursive).await {
        Ok(page) => page,
        Err(e) if e.is_not_found() => {
            tracing::debug!("Remote folder {} does not exist yet", path);
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let mut entries: BTreeMap<String, RemoteEntry> = BTreeMap::new();
    let mut pages = 1usize;
    loop {
        for entry in page.entries.drain(..) {
            entries.insert(entry.path.clone(), entry);
        }

        if !page.has_more {
            break;
        }
        let cursor = match page.cursor.take() {
            Some(cursor) => cursor,
            None => {
                return Err(crate::error::TetherError::CloudStorage(format!(
                    "Listing of {} reported more pages without a cursor",
                    path
                )))
            }
        };
        page = store.list_folder_continue(&cursor).await?;
        pages += 1;
    }

    tracing::debug!(
        "Listed {} entries under {} across {} page(s)",
        entries.len(),
        path,
        pages
    );
    Ok(entries.into_values().collect())
}

/// Join a remote folder and a `/`-separated relative path
pub fn join_remote(dir: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        dir.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

/// Path of `path` relative to the folder `dir`, if it lies beneath it
pub fn relative_remote<'a>(dir: &str, path: &'a str) -> Option<&'a str> {
    let dir = dir.trim_end_matches('/');
    path.strip_prefix(dir)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_join_and_relative() {
        assert_eq!(join_remote("/Notes", "a/b.txt"), "/Notes/a/b.txt");
        assert_eq!(join_remote("/Notes/", "/b.txt"), "/Notes/b.txt");
        assert_eq!(relative_remote("/Notes", "/Notes/a/b.txt"), Some("a/b.txt"));
        assert_eq!(relative_remote("/Notes", "/NotesOld/b.txt"), None);
        assert_eq!(relative_remote("/Notes", "/Notes"), None);
    }

    #[tokio::test]
    async fn test_list_all_missing_folder_is_empty() {
        let store = MemoryRemoteStore::new();
        let entries = list_all(&store, "/Nowhere", true).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_list_all_follows_cursors() {
        let store = MemoryRemoteStore::new().with_page_size(2);
        for i in 0..7 {
            store.put_file(&format!("/Notes/n{}.txt", i), b"x".to_vec(), ts(i));
        }

        let entries = list_all(&store, "/Notes", true).await.unwrap();
        let files: Vec<_> = entries.iter().filter(|e| e.is_file).collect();
        assert_eq!(files.len(), 7);
        assert!(store.list_calls() >= 4);
    }
}
