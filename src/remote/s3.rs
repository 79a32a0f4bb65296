//! S3-compatible remote store (S3, R2, GCS interop, MinIO)

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use super::{ListPage, RemoteEntry, RemoteStore};
use crate::error::{Result, TetherError};
use crate::types::normalize_mtime;

/// Object metadata key holding the content modification time
const MTIME_METADATA_KEY: &str = "tether-mtime";

/// Metadata lookups in flight per listing page
const HEAD_CONCURRENCY: usize = 8;

/// Remote store over an S3 bucket, rooted at a key prefix
pub struct S3RemoteStore {
    client: S3Client,
    bucket: String,
    prefix: String,
}

/// Everything needed to resume a `list_objects_v2` call
#[derive(Serialize, Deserialize)]
struct ListCursor {
    prefix: String,
    recursive: bool,
    token: String,
}

impl S3RemoteStore {
    /// Create from S3-compatible URI (s3://bucket/optional/prefix)
    pub async fn from_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("s3://")
            .ok_or_else(|| TetherError::Config("URI must start with s3://".to_string()))?;

        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(TetherError::Config(
                "URI must be s3://bucket[/prefix]".to_string(),
            ));
        }

        // Load AWS config from environment
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let client = S3Client::new(&config);

        Ok(Self::with_client(client, bucket, prefix))
    }

    /// Use an already configured client
    pub fn with_client(client: S3Client, bucket: &str, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn key_for(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if self.prefix.is_empty() {
            path.to_string()
        } else if path.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }

    fn path_for(&self, key: &str) -> String {
        let key = key.trim_end_matches('/');
        let rel = if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(self.prefix.as_str())
                .map(|k| k.trim_start_matches('/'))
                .unwrap_or(key)
        };
        format!("/{}", rel)
    }

    async fn fetch_page(&self, cursor: ListCursor) -> Result<ListPage> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&cursor.prefix);
        if !cursor.recursive {
            request = request.delimiter("/");
        }
        if !cursor.token.is_empty() {
            request = request.continuation_token(&cursor.token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| listing_error(&self.bucket, map_sdk_error(e)))?;

        let mut entries = Vec::new();
        for common in response.common_prefixes() {
            if let Some(p) = common.prefix() {
                entries.push(RemoteEntry {
                    path: self.path_for(p),
                    is_file: false,
                    modified_at: Utc::now(),
                    size: 0,
                });
            }
        }
        let mut listed = Vec::new();
        for object in response.contents() {
            let Some(key) = object.key() else { continue };
            if key == cursor.prefix {
                continue;
            }
            if key.ends_with('/') {
                entries.push(RemoteEntry {
                    path: self.path_for(key),
                    is_file: false,
                    modified_at: Utc::now(),
                    size: 0,
                });
                continue;
            }
            listed.push(RemoteEntry {
                path: self.path_for(key),
                is_file: true,
                modified_at: object
                    .last_modified()
                    .and_then(smithy_to_utc)
                    .unwrap_or_else(Utc::now),
                size: object.size().unwrap_or(0).max(0) as u64,
            });
        }

        // Listings only carry the upload time; the content time lives in
        // object metadata.
        for chunk in listed.chunks(HEAD_CONCURRENCY) {
            let heads = join_all(chunk.iter().map(|entry| self.get_metadata(&entry.path))).await;
            for (entry, head) in chunk.iter().zip(heads) {
                entries.extend(resolve_listed(entry.clone(), head)?);
            }
        }

        let next = response.next_continuation_token().map(String::from);
        let has_more = response.is_truncated().unwrap_or(false) && next.is_some();
        let cursor = match next {
            Some(token) if has_more => Some(serde_json::to_string(&ListCursor {
                prefix: cursor.prefix,
                recursive: cursor.recursive,
                token,
            })?),
            _ => None,
        };

        Ok(ListPage {
            entries,
            cursor,
            has_more,
        })
    }
}

/// Classify an SDK failure into the engine's error taxonomy
fn map_sdk_error<E>(err: SdkError<E>) -> TetherError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = DisplayErrorContext(&err).to_string();
    match (&err, status) {
        (_, Some(401)) | (_, Some(403)) => TetherError::Auth(message),
        (_, Some(404)) => TetherError::NotFound(message),
        (SdkError::DispatchFailure(_), _) | (SdkError::TimeoutError(_), _) => {
            TetherError::Connection(message)
        }
        _ => TetherError::CloudStorage(message),
    }
}

/// A missing bucket is the only way a listing can 404; it must not read as an
/// empty folder
fn listing_error(bucket: &str, err: TetherError) -> TetherError {
    if err.is_not_found() {
        TetherError::Config(format!("Bucket {} does not exist: {}", bucket, err))
    } else {
        err
    }
}

/// Pick the entry for a listed object once its metadata lookup has finished.
///
/// A lookup failure that is not fatal falls back to the listing's own upload
/// time, so one bad HEAD does not sink the listing.
fn resolve_listed(
    listed: RemoteEntry,
    head: Result<Option<RemoteEntry>>,
) -> Result<Option<RemoteEntry>> {
    match head {
        Ok(Some(entry)) => Ok(Some(entry)),
        Ok(None) => {
            tracing::debug!("{} vanished while listing", listed.path);
            Ok(None)
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!(
                "Metadata lookup for {} failed, using listing time: {}",
                listed.path,
                e
            );
            Ok(Some(listed))
        }
    }
}

fn parse_mtime(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| normalize_mtime(dt.with_timezone(&Utc)))
}

fn smithy_to_utc(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos()).map(normalize_mtime)
}

#[async_trait]
impl RemoteStore for S3RemoteStore {
    async fn list_folder(&self, path: &str, recursive: bool) -> Result<ListPage> {
        let mut prefix = self.key_for(path);
        if !prefix.is_empty() {
            prefix.push('/');
        }
        self.fetch_page(ListCursor {
            prefix,
            recursive,
            token: String::new(),
        })
        .await
    }

    async fn list_folder_continue(&self, cursor: &str) -> Result<ListPage> {
        let cursor: ListCursor = serde_json::from_str(cursor)
            .map_err(|e| TetherError::Sync(format!("Invalid listing cursor: {}", e)))?;
        self.fetch_page(cursor).await
    }

    async fn get_metadata(&self, path: &str) -> Result<Option<RemoteEntry>> {
        let key = self.key_for(path);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(response) => {
                let stored = response
                    .metadata()
                    .and_then(|m| m.get(MTIME_METADATA_KEY))
                    .map(String::as_str);
                let modified_at = parse_mtime(stored)
                    .or_else(|| response.last_modified().and_then(smithy_to_utc))
                    .unwrap_or_else(Utc::now);
                Ok(Some(RemoteEntry {
                    path: path.to_string(),
                    is_file: true,
                    modified_at,
                    size: response.content_length().unwrap_or(0).max(0) as u64,
                }))
            }
            Err(e) => {
                let status = e.raw_response().map(|r| r.status().as_u16());
                let service_error = e.into_service_error();
                if service_error.is_not_found() || status == Some(404) {
                    Ok(None)
                } else if matches!(status, Some(401) | Some(403)) {
                    Err(TetherError::Auth(service_error.to_string()))
                } else {
                    Err(TetherError::CloudStorage(service_error.to_string()))
                }
            }
        }
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key_for(path))
            .send()
            .await
            .map_err(map_sdk_error)?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| TetherError::Connection(e.to_string()))?
            .into_bytes();

        tracing::debug!(
            "Downloaded {} bytes from s3://{}/{}",
            data.len(),
            self.bucket,
            self.key_for(path)
        );
        Ok(data.to_vec())
    }

    async fn upload(&self, path: &str, data: Vec<u8>, modified_at: DateTime<Utc>) -> Result<()> {
        let size = data.len();
        let key = self.key_for(path);
        let mtime = normalize_mtime(modified_at).to_rfc3339_opts(SecondsFormat::Millis, true);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .metadata(MTIME_METADATA_KEY, mtime)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(map_sdk_error)?;

        tracing::debug!("Uploaded {} bytes to s3://{}/{}", size, self.bucket, key);
        Ok(())
    }

    async fn create_folder(&self, path: &str) -> Result<()> {
        let key = format!("{}/", self.key_for(path));
        // Putting the same empty marker twice is harmless.
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(Vec::new()))
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn revoke_token(&self) -> Result<()> {
        // Credentials come from the AWS environment; nothing to revoke server-side.
        tracing::info!(
            "Dropping S3 session for bucket {}; environment credentials remain valid",
            self.bucket
        );
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    "Connection test for bucket {} failed: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                );
                false
            }
        }
    }
}
