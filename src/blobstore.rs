//! Content-addressed external file storage, filesystem-local, hash-dir
//! plus alias scheme.
//!
//! Grounded on `holo-blobstore`'s `LocalContentAddressableBlobStore`: a
//! writer hashes the content as it streams to a temp file, then the store
//! commits it into place with an atomic rename. That crate hashes with
//! blake3 and names blobs by a base64 content id with no further
//! structure; this one hashes with SHA-256 (shared with the chain hasher)
//! and lays blobs out as
//! `<root>/<pod>/<stream_path>/.storage/<hash_hex>` plus a logical alias
//! layout instead of a single flat CAS directory, since aliases are what
//! let `get`/`soft_delete` address a blob by record name without the
//! caller tracking hashes.

use crate::errors::{AppError, ErrorKind};
use crate::hash::content_hash;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    url_template: String,
}

#[derive(Debug, Clone)]
pub struct PutResult {
    pub hash: String,
    pub size: u64,
    pub url: String,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>, url_template: impl Into<String>) -> Self {
        BlobStore { root: root.into(), url_template: url_template.into() }
    }

    fn stream_dir(&self, pod: &str, stream_path: &str) -> PathBuf {
        self.root.join(pod).join(stream_path.trim_start_matches('/'))
    }

    fn storage_dir(&self, pod: &str, stream_path: &str) -> PathBuf {
        self.stream_dir(pod, stream_path).join(".storage")
    }

    fn canonical_path(&self, pod: &str, stream_path: &str, hash: &str) -> PathBuf {
        let hex = hash.strip_prefix("sha256:").unwrap_or(hash);
        self.storage_dir(pod, stream_path).join(hex)
    }

    fn alias_path(&self, pod: &str, stream_path: &str, record_name: &str) -> PathBuf {
        self.stream_dir(pod, stream_path).join(record_name)
    }

    pub fn url_for(&self, pod: &str, stream_path: &str, record_name: &str) -> String {
        self.url_template
            .replace("{pod}", pod)
            .replace("{stream_path}", stream_path.trim_start_matches('/'))
            .replace("{record_name}", record_name)
    }

    /// Writes the canonical file if absent (idempotent), then refreshes the alias.
    pub fn put(
        &self,
        pod: &str,
        stream_path: &str,
        record_name: &str,
        bytes: &[u8],
    ) -> Result<PutResult, AppError> {
        let hash = content_hash(bytes);
        let storage_dir = self.storage_dir(pod, stream_path);
        fs::create_dir_all(&storage_dir)?;

        let canonical = self.canonical_path(pod, stream_path, &hash);
        if !canonical.is_file() {
            let tmp = storage_dir.join(format!(".tmp-{}", std::process::id()));
            fs::write(&tmp, bytes)?;
            fs::rename(&tmp, &canonical)?;
        }

        let alias = self.alias_path(pod, stream_path, record_name);
        if let Some(parent) = alias.parent() {
            fs::create_dir_all(parent)?;
        }
        atomic_copy(&canonical, &alias)?;

        Ok(PutResult {
            hash,
            size: bytes.len() as u64,
            url: self.url_for(pod, stream_path, record_name),
        })
    }

    pub fn get(
        &self,
        pod: &str,
        stream_path: &str,
        record_name: &str,
    ) -> Result<Option<Vec<u8>>, AppError> {
        let alias = self.alias_path(pod, stream_path, record_name);
        match fs::read(&alias) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes only the alias; the canonical file remains.
    pub fn soft_delete(&self, pod: &str, stream_path: &str, record_name: &str) -> Result<(), AppError> {
        let alias = self.alias_path(pod, stream_path, record_name);
        match fs::remove_file(&alias) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the canonical file if no alias in the stream still references it.
    pub fn purge(&self, pod: &str, stream_path: &str, hash: &str) -> Result<(), AppError> {
        let canonical = self.canonical_path(pod, stream_path, hash);
        let stream_dir = self.stream_dir(pod, stream_path);
        if still_referenced(&stream_dir, &canonical)? {
            return Ok(());
        }
        match fs::remove_file(&canonical) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::new(ErrorKind::StorageError, e.to_string())),
        }
    }
}

fn still_referenced(stream_dir: &Path, canonical: &Path) -> Result<bool, AppError> {
    let entries = match fs::read_dir(stream_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let canonical_contents = fs::read(canonical).ok();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        if let (Some(want), Ok(got)) = (&canonical_contents, fs::read(&path)) {
            if &got == want && path != canonical {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn atomic_copy(src: &Path, dest: &Path) -> io::Result<()> {
    let tmp = dest.with_extension(format!("tmp-{}", std::process::id()));
    fs::copy(src, &tmp)?;
    fs::rename(&tmp, dest)
}
