//! src/services/object_store.rs
//!
//! Object store seam used by the pipeline plus `FsObjectStore`, a local-disk
//! implementation sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.
//! Writes land in a temp file and are renamed into place only once the whole
//! body has been written and synced. Each object's `StoredObject` record,
//! content type included, is kept as JSON under `base_path/.meta/`.

use crate::models::object::{ObjectLocation, StoredObject};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

/// Chunked byte stream flowing between store, engine and transforms.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{path}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, path: String },
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    /// The body handed to `write_stream` failed; nothing was committed.
    #[error("body stream failed: {0}")]
    Body(io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    fn not_found(location: &ObjectLocation) -> Self {
        StoreError::NotFound {
            bucket: location.bucket.clone(),
            path: location.path.clone(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable byte storage as the pipeline sees it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open a streaming reader; `StoreError::NotFound` if the object is missing.
    async fn open_read(&self, location: &ObjectLocation) -> StoreResult<ByteStream>;

    /// Stream `body` into `location`. The object becomes visible only if the
    /// whole body succeeds; a body error aborts the write.
    async fn write_stream(
        &self,
        location: &ObjectLocation,
        body: ByteStream,
        content_type: Option<&str>,
    ) -> StoreResult<StoredObject>;

    /// Stored record for an object; `StoreError::NotFound` if it is missing.
    async fn stat(&self, location: &ObjectLocation) -> StoreResult<StoredObject>;

    async fn delete(&self, location: &ObjectLocation) -> StoreResult<()>;

    async fn exists(&self, location: &ObjectLocation) -> StoreResult<bool>;
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
/// Bucket names cannot start with a dot, so this never collides with one.
const META_DIR: &str = ".meta";

/// Local filesystem object store.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl FsObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Rejects empty or oversized keys, absolute keys, `..` and control bytes.
    fn ensure_key_safe(key: &str) -> StoreResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.ends_with('/')
            || key.contains("..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if invalid {
            return Err(StoreError::InvalidObjectKey(key.to_string()));
        }
        Ok(())
    }

    /// S3-like bucket naming: 3–63 chars of `[a-z0-9.-]`, alphanumeric at both
    /// ends, no `..`/`.-`/`-.` runs, not shaped like an IPv4 address.
    fn ensure_bucket_name_safe(name: &str) -> StoreResult<()> {
        let reject = |reason: &str| {
            Err(StoreError::InvalidBucketName {
                name: name.to_string(),
                reason: reason.into(),
            })
        };

        if name.len() < BUCKET_NAME_MIN_LEN || name.len() > BUCKET_NAME_MAX_LEN {
            return reject("must be between 3 and 63 characters");
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return reject("allowed characters are lowercase letters, digits, dots, and hyphens");
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return reject("must start and end with a lowercase letter or digit");
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return reject("cannot contain consecutive dots or dot-hyphen combinations");
        }
        if is_ipv4_like(name) {
            return reject("must not be formatted like an IP address");
        }
        Ok(())
    }

    fn ensure_location_safe(location: &ObjectLocation) -> StoreResult<()> {
        Self::ensure_bucket_name_safe(&location.bucket)?;
        Self::ensure_key_safe(&location.path)
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard from MD5(bucket/key); keeps directories small.
    fn object_shards(location: &ObjectLocation) -> (String, String) {
        let digest = md5::compute(location.to_string());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, location: &ObjectLocation) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(location);
        let mut path = self.bucket_root(&location.bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(&location.path);
        path
    }

    fn meta_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(META_DIR).join(bucket)
    }

    fn meta_path(&self, location: &ObjectLocation) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(location);
        let mut path = self.meta_root(&location.bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(format!("{}.json", location.path));
        path
    }

    async fn write_meta(&self, object: &StoredObject) -> StoreResult<()> {
        let meta_path = self.meta_path(&object.location);
        let parent = parent_dir(&meta_path)?;
        fs::create_dir_all(&parent).await?;
        let encoded = serde_json::to_vec(object)
            .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        fs::write(&tmp_path, encoded).await?;
        if let Err(err) = fs::rename(&tmp_path, &meta_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        Ok(())
    }

    /// Walk up from `start` removing empty directories, stopping at `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn open_read(&self, location: &ObjectLocation) -> StoreResult<ByteStream> {
        Self::ensure_location_safe(location)?;
        let file = File::open(self.object_path(location))
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => StoreError::not_found(location),
                _ => StoreError::Io(err),
            })?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn write_stream(
        &self,
        location: &ObjectLocation,
        mut body: ByteStream,
        content_type: Option<&str>,
    ) -> StoreResult<StoredObject> {
        Self::ensure_location_safe(location)?;

        let file_path = self.object_path(location);
        let parent = parent_dir(&file_path)?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: u64 = 0;
        let mut digest = Context::new();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Body(err));
                }
            };
            size_bytes += chunk.len() as u64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        // Drop the body before committing so upstream producers see completion.
        drop(body);

        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        let object = StoredObject {
            location: location.clone(),
            size_bytes,
            etag: format!("{:x}", digest.compute()),
            content_type: content_type.map(str::to_string),
            last_modified: Utc::now(),
        };
        self.write_meta(&object).await?;
        debug!(object = %location, size_bytes, content_type, "object committed");

        Ok(object)
    }

    async fn stat(&self, location: &ObjectLocation) -> StoreResult<StoredObject> {
        Self::ensure_location_safe(location)?;
        let raw = fs::read(self.meta_path(location))
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => StoreError::not_found(location),
                _ => StoreError::Io(err),
            })?;
        serde_json::from_slice(&raw)
            .map_err(|err| StoreError::Io(io::Error::new(ErrorKind::InvalidData, err)))
    }

    async fn delete(&self, location: &ObjectLocation) -> StoreResult<()> {
        Self::ensure_location_safe(location)?;
        let file_path = self.object_path(location);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::not_found(location));
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&location.bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        let meta_path = self.meta_path(location);
        match fs::remove_file(&meta_path).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => debug!("failed to remove metadata {}: {}", meta_path.display(), err),
        }
        if let Some(parent) = meta_path.parent() {
            let meta_root = self.meta_root(&location.bucket);
            self.prune_empty_dirs(parent, &meta_root).await;
        }
        Ok(())
    }

    async fn exists(&self, location: &ObjectLocation) -> StoreResult<bool> {
        Self::ensure_location_safe(location)?;
        Ok(fs::try_exists(self.object_path(location)).await?)
    }
}

fn parent_dir(path: &Path) -> StoreResult<PathBuf> {
    path.parent().map(Path::to_path_buf).ok_or_else(|| {
        StoreError::Io(io::Error::new(
            ErrorKind::Other,
            "object path missing parent directory",
        ))
    })
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

/// Wrap in-memory chunks as a `ByteStream`.
pub fn stream_from_chunks<I>(chunks: I) -> ByteStream
where
    I: IntoIterator<Item = io::Result<Bytes>>,
    I::IntoIter: Send + 'static,
{
    Box::pin(futures::stream::iter(chunks))
}

/// Drain a `ByteStream` into one buffer.
#[cfg(test)]
pub async fn collect_stream(mut stream: ByteStream) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}
