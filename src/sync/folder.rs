//! Reconciliation of one local folder with one remote folder

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{FileAction, FileOutcome, FolderReport, SyncDirection, SyncMode, SyncPhase};
use crate::error::{Result, TetherError};
use crate::remote::{join_remote, list_all, relative_remote, RemoteEntry, RemoteStore};
use crate::types::{system_time_to_utc, FileRecord};

/// Suffix of in-progress download files; never pushed
const PARTIAL_SUFFIX: &str = ".tether-partial";

/// Enumerate every regular file under `dir`, recursively.
///
/// Unreadable entries are logged and left out.
pub fn scan_local(dir: &Path) -> Result<Vec<FileRecord>> {
    let mut records = Vec::new();

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        if entry.file_type().is_symlink() {
            debug!("Not following symlink {}", entry.path().display());
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        if entry
            .file_name()
            .to_string_lossy()
            .ends_with(PARTIAL_SUFFIX)
        {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };
        let modified = match metadata.modified() {
            Ok(t) => t,
            Err(e) => {
                warn!("No modification time for {}: {}", entry.path().display(), e);
                continue;
            }
        };

        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| TetherError::Internal(e.to_string()))?;
        let Some(segments) = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()
        else {
            warn!(
                "Skipping {}: file name is not valid UTF-8",
                entry.path().display()
            );
            continue;
        };
        let relative_path = segments.join("/");

        records.push(FileRecord {
            relative_path,
            modified_at: system_time_to_utc(modified),
            size: metadata.len(),
        });
    }

    records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(records)
}

/// Map a remote-relative path onto the local folder, refusing anything that
/// would escape it
fn local_path_for(local_dir: &Path, relative: &str) -> Result<PathBuf> {
    let mut path = local_dir.to_path_buf();
    for segment in relative.split('/') {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => path.push(part),
            _ => {
                return Err(TetherError::Sync(format!(
                    "Refusing unsafe remote path: {}",
                    relative
                )))
            }
        }
    }
    Ok(path)
}

/// Write `data` to `path` through a sibling temp file and stamp it with `mtime`
fn write_with_mtime(path: &Path, data: &[u8], mtime: DateTime<Utc>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = path.with_file_name(format!("{}{}", file_name, PARTIAL_SUFFIX));

    std::fs::write(&partial, data)?;
    let stamped = std::fs::OpenOptions::new()
        .write(true)
        .open(&partial)
        .and_then(|f| f.set_modified(SystemTime::from(mtime)));
    if let Err(e) = stamped.and_then(|_| std::fs::rename(&partial, path)) {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }
    Ok(())
}

/// Modification time of a local regular file, or `None` if nothing is there
async fn local_mtime(path: &Path) -> Result<Option<DateTime<Utc>>> {
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => Ok(Some(system_time_to_utc(m.modified()?))),
        Ok(_) => Err(TetherError::Sync(format!(
            "{} exists locally and is not a file",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether a file last modified at `modified_at` falls at or before the cutoff
fn before_cutoff(modified_at: DateTime<Utc>, cutoff: Option<DateTime<Utc>>) -> bool {
    cutoff.map(|c| modified_at <= c).unwrap_or(false)
}

/// Push/pull engine for a single local/remote folder pair.
///
/// Each file goes in the direction of the newer modification time; equal
/// times are left alone. Per-file failures are recorded and skipped, while
/// authentication failures and folder-level errors abort the call.
pub struct FolderSyncer<'a> {
    store: &'a dyn RemoteStore,
}

impl<'a> FolderSyncer<'a> {
    pub fn new(store: &'a dyn RemoteStore) -> Self {
        Self { store }
    }

    /// Synchronize `local_dir` with `remote_dir`.
    ///
    /// With [`SyncMode::Incremental`], files modified at or before `since`
    /// are skipped without being compared. Push always finishes before pull
    /// starts.
    pub async fn sync(
        &self,
        local_dir: &Path,
        remote_dir: &str,
        direction: SyncDirection,
        mode: SyncMode,
        since: Option<DateTime<Utc>>,
    ) -> Result<FolderReport> {
        let cutoff = match mode {
            SyncMode::Full => None,
            SyncMode::Incremental => since,
        };
        let mut report = FolderReport::default();

        tokio::fs::create_dir_all(local_dir).await?;

        if direction.pushes() {
            self.ensure_remote_folder(remote_dir).await?;
            self.push(local_dir, remote_dir, cutoff, &mut report).await?;
        }
        if direction.pulls() {
            self.pull(local_dir, remote_dir, cutoff, &mut report).await?;
        }

        info!(
            "Synced {} <-> {} ({}): {} up, {} down, {} skipped, {} failed",
            local_dir.display(),
            remote_dir,
            direction,
            report.uploaded,
            report.downloaded,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    async fn ensure_remote_folder(&self, remote_dir: &str) -> Result<()> {
        match self.store.create_folder(remote_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                // Another client may have created it between our calls.
                match self.store.get_metadata(remote_dir).await? {
                    Some(entry) if !entry.is_file => {
                        debug!("Remote folder {} already exists", remote_dir);
                        Ok(())
                    }
                    _ => Err(e),
                }
            }
        }
    }

    async fn push(
        &self,
        local_dir: &Path,
        remote_dir: &str,
        cutoff: Option<DateTime<Utc>>,
        report: &mut FolderReport,
    ) -> Result<()> {
        let scan_root = local_dir.to_path_buf();
        let records = tokio::task::spawn_blocking(move || scan_local(&scan_root))
            .await
            .map_err(|e| TetherError::Internal(format!("Local scan panicked: {}", e)))??;

        for record in records {
            if before_cutoff(record.modified_at, cutoff) {
                report.record(
                    FileOutcome::new(&record.relative_path, SyncPhase::Push, FileAction::Skipped)
                        .with_reason("unchanged since last sync"),
                );
                continue;
            }

            let outcome = match self.push_file(local_dir, remote_dir, &record).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Failed to push {}: {}", record.relative_path, e);
                    FileOutcome::new(&record.relative_path, SyncPhase::Push, FileAction::Failed)
                        .with_reason(e.to_string())
                }
            };
            report.record(outcome);
        }
        Ok(())
    }

    async fn push_file(
        &self,
        local_dir: &Path,
        remote_dir: &str,
        record: &FileRecord,
    ) -> Result<FileOutcome> {
        let remote_path = join_remote(remote_dir, &record.relative_path);

        match self.store.get_metadata(&remote_path).await? {
            Some(remote) if !remote.is_file => {
                return Err(TetherError::Sync(format!(
                    "{} is a folder on the remote side",
                    remote_path
                )))
            }
            Some(remote) if record.modified_at <= remote.modified_at => {
                debug!("Remote copy of {} is current", record.relative_path);
                return Ok(FileOutcome::new(
                    &record.relative_path,
                    SyncPhase::Push,
                    FileAction::Skipped,
                )
                .with_reason("remote is as new or newer"));
            }
            _ => {}
        }

        let local_path = local_path_for(local_dir, &record.relative_path)?;
        let data = tokio::fs::read(&local_path).await?;
        self.store
            .upload(&remote_path, data, record.modified_at)
            .await?;

        debug!("Uploaded {}", remote_path);
        Ok(FileOutcome::new(
            &record.relative_path,
            SyncPhase::Push,
            FileAction::Uploaded,
        ))
    }

    async fn pull(
        &self,
        local_dir: &Path,
        remote_dir: &str,
        cutoff: Option<DateTime<Utc>>,
        report: &mut FolderReport,
    ) -> Result<()> {
        let entries = list_all(self.store, remote_dir, true).await?;

        for entry in entries.iter().filter(|e| e.is_file) {
            let Some(relative) = relative_remote(remote_dir, &entry.path) else {
                debug!("Ignoring {} outside {}", entry.path, remote_dir);
                continue;
            };

            if before_cutoff(entry.modified_at, cutoff) {
                report.record(
                    FileOutcome::new(relative, SyncPhase::Pull, FileAction::Skipped)
                        .with_reason("unchanged since last sync"),
                );
                continue;
            }

            let outcome = match self.pull_file(local_dir, relative, entry).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Failed to pull {}: {}", relative, e);
                    FileOutcome::new(relative, SyncPhase::Pull, FileAction::Failed)
                        .with_reason(e.to_string())
                }
            };
            report.record(outcome);
        }
        Ok(())
    }

    async fn pull_file(
        &self,
        local_dir: &Path,
        relative: &str,
        entry: &RemoteEntry,
    ) -> Result<FileOutcome> {
        let local_path = local_path_for(local_dir, relative)?;

        if let Some(local_modified) = local_mtime(&local_path).await? {
            if entry.modified_at <= local_modified {
                debug!("Local copy of {} is current", relative);
                return Ok(
                    FileOutcome::new(relative, SyncPhase::Pull, FileAction::Skipped)
                        .with_reason("local is as new or newer"),
                );
            }
        }

        let data = self.store.download(&entry.path).await?;
        let modified_at = entry.modified_at;
        let target = local_path.clone();
        tokio::task::spawn_blocking(move || write_with_mtime(&target, &data, modified_at))
            .await
            .map_err(|e| TetherError::Internal(format!("Local write panicked: {}", e)))??;

        debug!("Downloaded {} to {}", entry.path, local_path.display());
        Ok(FileOutcome::new(
            relative,
            SyncPhase::Pull,
            FileAction::Downloaded,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{FailureKind, MemoryRemoteStore, RemoteOp};
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn write_local(dir: &Path, rel: &str, data: &[u8], mtime: DateTime<Utc>) {
        write_with_mtime(&dir.join(rel), data, mtime).unwrap();
    }

    #[test]
    fn test_scan_local_is_recursive_and_relative() {
        let dir = tempfile::tempdir().unwrap();
        write_local(dir.path(), "a.txt", b"a", ts(10));
        write_local(dir.path(), "sub/b.txt", b"bb", ts(20));

        let records = scan_local(dir.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].relative_path, "a.txt");
        assert_eq!(records[0].modified_at, ts(10));
        assert_eq!(records[1].relative_path, "sub/b.txt");
        assert_eq!(records[1].size, 2);
    }

    #[test]
    fn test_scan_ignores_partial_downloads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("x.txt{}", PARTIAL_SUFFIX)), b"x").unwrap();
        assert!(scan_local(dir.path()).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        write_local(outside.path(), "target.txt", b"t", ts(10));
        write_local(dir.path(), "real.txt", b"r", ts(10));
        let target = outside.path().join("target.txt");
        std::os::unix::fs::symlink(&target, dir.path().join("link.txt")).unwrap();

        let records = scan_local(dir.path()).unwrap();
        let names: Vec<_> = records.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(names, vec!["real.txt"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_scan_skips_non_utf8_names() {
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        write_local(dir.path(), "ok.txt", b"o", ts(10));
        let bad = std::ffi::OsStr::from_bytes(b"bad\xff.txt");
        std::fs::write(dir.path().join(bad), b"b").unwrap();

        let records = scan_local(dir.path()).unwrap();
        let names: Vec<_> = records.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(names, vec!["ok.txt"]);
    }

    #[test]
    fn test_local_path_rejects_traversal() {
        let root = Path::new("/data/Notes");
        assert_eq!(
            local_path_for(root, "a/b.txt").unwrap(),
            PathBuf::from("/data/Notes/a/b.txt")
        );
        assert!(local_path_for(root, "../escape.txt").is_err());
        assert!(local_path_for(root, "a//b.txt").is_err());
        assert!(local_path_for(root, "./a.txt").is_err());
    }

    #[test]
    fn test_before_cutoff_is_inclusive() {
        assert!(before_cutoff(ts(5), Some(ts(5))));
        assert!(before_cutoff(ts(4), Some(ts(5))));
        assert!(!before_cutoff(ts(6), Some(ts(5))));
        assert!(!before_cutoff(ts(0), None));
    }

    #[tokio::test]
    async fn test_push_uploads_newer_only() {
        let dir = tempfile::tempdir().unwrap();
        write_local(dir.path(), "new.txt", b"new", ts(100));
        write_local(dir.path(), "newer.txt", b"local", ts(200));
        write_local(dir.path(), "older.txt", b"local", ts(100));
        write_local(dir.path(), "same.txt", b"local", ts(300));

        let store = MemoryRemoteStore::new();
        store.put_file("/Notes/newer.txt", b"remote".to_vec(), ts(150));
        store.put_file("/Notes/older.txt", b"remote".to_vec(), ts(150));
        store.put_file("/Notes/same.txt", b"remote".to_vec(), ts(300));

        let report = FolderSyncer::new(&store)
            .sync(dir.path(), "/Notes", SyncDirection::PushOnly, SyncMode::Full, None)
            .await
            .unwrap();

        assert_eq!(report.uploaded, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(store.file("/Notes/newer.txt").unwrap().0, b"local".to_vec());
        assert_eq!(store.file("/Notes/older.txt").unwrap().0, b"remote".to_vec());
        assert_eq!(store.file("/Notes/same.txt").unwrap().0, b"remote".to_vec());
        assert_eq!(store.file("/Notes/new.txt").unwrap().1, ts(100));
    }

    #[tokio::test]
    async fn test_pull_sets_local_mtime_to_remote() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryRemoteStore::new();
        store.put_file("/Images/deep/pic.png", vec![1, 2, 3], ts(1_700_000_000));

        let report = FolderSyncer::new(&store)
            .sync(dir.path(), "/Images", SyncDirection::PullOnly, SyncMode::Full, None)
            .await
            .unwrap();

        assert_eq!(report.downloaded, 1);
        let local = dir.path().join("deep").join("pic.png");
        assert_eq!(std::fs::read(&local).unwrap(), vec![1, 2, 3]);
        let mtime = system_time_to_utc(std::fs::metadata(&local).unwrap().modified().unwrap());
        assert_eq!(mtime, ts(1_700_000_000));
    }

    #[tokio::test]
    async fn test_push_failure_is_per_file() {
        let dir = tempfile::tempdir().unwrap();
        write_local(dir.path(), "ok.txt", b"ok", ts(10));
        write_local(dir.path(), "bad.txt", b"bad", ts(10));

        let store = MemoryRemoteStore::new();
        store.inject_failure(RemoteOp::Upload, "/Notes/bad.txt", FailureKind::Transient);

        let report = FolderSyncer::new(&store)
            .sync(dir.path(), "/Notes", SyncDirection::PushOnly, SyncMode::Full, None)
            .await
            .unwrap();

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.failed, 1);
        let failed: Vec<_> = report.failures().map(|o| o.relative_path.as_str()).collect();
        assert_eq!(failed, vec!["bad.txt"]);
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_folder() {
        let dir = tempfile::tempdir().unwrap();
        write_local(dir.path(), "a.txt", b"a", ts(10));

        let store = MemoryRemoteStore::new();
        store.inject_failure(RemoteOp::Metadata, "/Notes/a.txt", FailureKind::Auth);

        let err = FolderSyncer::new(&store)
            .sync(dir.path(), "/Notes", SyncDirection::PushOnly, SyncMode::Full, None)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_create_folder_race_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryRemoteStore::new();
        store.put_file("/Notes/existing.txt", b"x".to_vec(), ts(1));
        store.inject_failure(RemoteOp::CreateFolder, "/Notes", FailureKind::Transient);

        let report = FolderSyncer::new(&store)
            .sync(dir.path(), "/Notes", SyncDirection::Both, SyncMode::Full, None)
            .await
            .unwrap();
        assert_eq!(report.downloaded, 1);
    }

    #[tokio::test]
    async fn test_local_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("not").join("yet");
        let store = MemoryRemoteStore::new();

        FolderSyncer::new(&store)
            .sync(&local, "/History", SyncDirection::Both, SyncMode::Full, None)
            .await
            .unwrap();

        assert!(local.is_dir());
        assert!(store.folder_exists("/History"));
    }
}
