//! In-process remote store
//!
//! Keeps files and folders in memory, pages listings like a real cloud API,
//! and can be told to fail specific operations on specific paths.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{ListPage, RemoteEntry, RemoteStore};
use crate::error::{Result, TetherError};
use crate::types::normalize_mtime;

const DEFAULT_PAGE_SIZE: usize = 500;

/// Operations that can have failures injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    List,
    Metadata,
    Download,
    Upload,
    CreateFolder,
}

/// Kind of injected failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A network-style error that only affects the call it hits
    Transient,
    /// Credentials rejected
    Auth,
}

impl FailureKind {
    fn to_error(self, op: RemoteOp, path: &str) -> TetherError {
        match self {
            FailureKind::Transient => {
                TetherError::Connection(format!("simulated {:?} failure on {}", op, path))
            }
            FailureKind::Auth => TetherError::Auth("access token rejected".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredFile {
    data: Vec<u8>,
    modified_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, StoredFile>,
    folders: BTreeMap<String, DateTime<Utc>>,
    cursors: HashMap<String, VecDeque<RemoteEntry>>,
    failures: HashMap<(RemoteOp, String), FailureKind>,
}

/// Remote store backed by process memory
pub struct MemoryRemoteStore {
    state: Mutex<State>,
    page_size: usize,
    revoked: AtomicBool,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    list_calls: AtomicUsize,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: DEFAULT_PAGE_SIZE,
            revoked: AtomicBool::new(false),
            uploads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Limit listing pages to `page_size` entries
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Place a file directly, creating its parent folders
    pub fn put_file(&self, path: &str, data: Vec<u8>, modified_at: DateTime<Utc>) {
        let mut state = self.state.lock();
        insert_ancestors(&mut state.folders, path, modified_at);
        state.files.insert(
            path.to_string(),
            StoredFile {
                data,
                modified_at: normalize_mtime(modified_at),
            },
        );
    }

    /// Contents and modification time of a stored file
    pub fn file(&self, path: &str) -> Option<(Vec<u8>, DateTime<Utc>)> {
        self.state
            .lock()
            .files
            .get(path)
            .map(|f| (f.data.clone(), f.modified_at))
    }

    /// Whether a folder exists at `path`
    pub fn folder_exists(&self, path: &str) -> bool {
        self.state.lock().folders.contains_key(path)
    }

    /// Paths of every stored file
    pub fn file_paths(&self) -> BTreeSet<String> {
        self.state.lock().files.keys().cloned().collect()
    }

    /// Make `op` on `path` fail until cleared
    pub fn inject_failure(&self, op: RemoteOp, path: &str, kind: FailureKind) {
        self.state
            .lock()
            .failures
            .insert((op, path.to_string()), kind);
    }

    /// Remove every injected failure
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Number of successful uploads
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Number of successful downloads
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Number of listing calls, including continuations
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Whether the token has been revoked
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    fn check(&self, state: &State, op: RemoteOp, path: &str) -> Result<()> {
        if self.is_revoked() {
            return Err(TetherError::Auth("access token has been revoked".to_string()));
        }
        match state.failures.get(&(op, path.to_string())) {
            Some(kind) => Err(kind.to_error(op, path)),
            None => Ok(()),
        }
    }

    fn next_page(&self, state: &mut State, mut pending: VecDeque<RemoteEntry>) -> ListPage {
        let take = pending.len().min(self.page_size);
        let entries: Vec<RemoteEntry> = pending.drain(..take).collect();

        if pending.is_empty() {
            return ListPage {
                entries,
                cursor: None,
                has_more: false,
            };
        }

        let cursor = uuid::Uuid::new_v4().to_string();
        state.cursors.insert(cursor.clone(), pending);
        ListPage {
            entries,
            cursor: Some(cursor),
            has_more: true,
        }
    }
}

fn insert_ancestors(folders: &mut BTreeMap<String, DateTime<Utc>>, path: &str, at: DateTime<Utc>) {
    let mut current = String::new();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
        current.push('/');
        current.push_str(segment);
        folders.entry(current.clone()).or_insert(at);
    }
}

fn is_within(dir: &str, path: &str, recursive: bool) -> bool {
    match super::relative_remote(dir, path) {
        Some(rest) => recursive || !rest.contains('/'),
        None => false,
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn list_folder(&self, path: &str, recursive: bool) -> Result<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        self.check(&state, RemoteOp::List, path)?;

        let dir = path.trim_end_matches('/');
        if !state.folders.contains_key(dir) {
            return Err(TetherError::NotFound(dir.to_string()));
        }

        let folders = state
            .folders
            .iter()
            .filter(|(p, _)| is_within(dir, p, recursive))
            .map(|(p, at)| RemoteEntry {
                path: p.clone(),
                is_file: false,
                modified_at: *at,
                size: 0,
            });
        let files = state
            .files
            .iter()
            .filter(|(p, _)| is_within(dir, p, recursive))
            .map(|(p, f)| RemoteEntry {
                path: p.clone(),
                is_file: true,
                modified_at: f.modified_at,
                size: f.data.len() as u64,
            });
        let pending: VecDeque<RemoteEntry> = folders.chain(files).collect();

        Ok(self.next_page(&mut state, pending))
    }

    async fn list_folder_continue(&self, cursor: &str) -> Result<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if self.is_revoked() {
            return Err(TetherError::Auth("access token has been revoked".to_string()));
        }
        let pending = state
            .cursors
            .remove(cursor)
            .ok_or_else(|| TetherError::Sync(format!("Listing cursor expired: {}", cursor)))?;
        Ok(self.next_page(&mut state, pending))
    }

    async fn get_metadata(&self, path: &str) -> Result<Option<RemoteEntry>> {
        let state = self.state.lock();
        self.check(&state, RemoteOp::Metadata, path)?;

        if let Some(f) = state.files.get(path) {
            return Ok(Some(RemoteEntry {
                path: path.to_string(),
                is_file: true,
                modified_at: f.modified_at,
                size: f.data.len() as u64,
            }));
        }
        Ok(state.folders.get(path).map(|at| RemoteEntry {
            path: path.to_string(),
            is_file: false,
            modified_at: *at,
            size: 0,
        }))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let state = self.state.lock();
        self.check(&state, RemoteOp::Download, path)?;

        let file = state
            .files
            .get(path)
            .ok_or_else(|| TetherError::NotFound(path.to_string()))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(file.data.clone())
    }

    async fn upload(&self, path: &str, data: Vec<u8>, modified_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        self.check(&state, RemoteOp::Upload, path)?;

        insert_ancestors(&mut state.folders, path, Utc::now());
        state.files.insert(
            path.to_string(),
            StoredFile {
                data,
                modified_at: normalize_mtime(modified_at),
            },
        );
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_folder(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        self.check(&state, RemoteOp::CreateFolder, path)?;

        let dir = path.trim_end_matches('/');
        let now = Utc::now();
        insert_ancestors(&mut state.folders, dir, now);
        state.folders.entry(dir.to_string()).or_insert(now);
        Ok(())
    }

    async fn revoke_token(&self) -> Result<()> {
        self.revoked.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        !self.is_revoked()
    }
}
