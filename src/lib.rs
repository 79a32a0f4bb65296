//! Tether - keep application data in step across machines
//!
//! Synchronizes per-category local folders (notes, playlists, templates,
//! history, images, URL pad) with mirrored folders in cloud storage, using
//! last-writer-wins by modification time.

pub mod error;
pub mod remote;
pub mod settings;
pub mod sync;
pub mod types;

pub use error::{Result, TetherError};
pub use remote::RemoteStore;
pub use settings::{SettingsStore, SyncSettings};
pub use sync::{
    FolderSyncer, LifecyclePolicy, ManualSync, SyncDirection, SyncMode, SyncOrchestrator,
    SyncResult,
};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
