use std::collections::HashSet;
use std::path::Path as LocalPath;
use std::sync::Arc;

use anyhow::Context;
use futures::stream::TryStreamExt;
use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::config::S3Config;

/// Builds an S3 store from the config credentials. `endpoint` overrides the
/// one in the config, for minio or another S3 compatible API.
pub fn new(config: &S3Config, endpoint: Option<&str>) -> Result<Store, anyhow::Error> {
    let mut builder = AmazonS3Builder::new()
        .with_region(&config.region)
        .with_bucket_name(&config.bucket)
        .with_access_key_id(&config.access_key)
        .with_secret_access_key(&config.secret_key)
        .with_allow_http(config.allow_http);

    if let Some(endpoint) = endpoint.or(config.endpoint.as_deref()) {
        let url =
            Url::parse(endpoint).with_context(|| format!("Invalid endpoint URL: {}", endpoint))?;
        if url.scheme() == "http" {
            builder = builder.with_allow_http(true);
        }
        builder = builder.with_endpoint(url.as_str().trim_end_matches('/'));
    }

    let store = builder
        .build()
        .with_context(|| format!("connect to bucket {}", config.bucket))?;

    Ok(Store::from_object_store(Arc::new(store)))
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid key '{0}': {1}")]
    InvalidKey(String, #[source] object_store::path::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] object_store::Error),
    #[error("Local file error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct Store {
    store: Arc<dyn ObjectStore>,
}

impl Store {
    pub fn from_object_store(store: Arc<dyn ObjectStore>) -> Self {
        Store { store }
    }

    /// Lists key names starting with `prefix` in the order the store returns
    /// them, leaving out directory markers.
    ///
    /// `prefix` is a plain key-name prefix, so "201612" matches
    /// "201612/a.log" as well as "20161213-a.log" at the bucket root.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // object_store prefixes match whole segments, so list the enclosing
        // "directory" and start right after the prefix itself
        let parent = prefix.rsplit_once('/').map(|(dir, _)| Path::from(dir));
        let offset = Path::from(prefix);
        let mut list_stream = self.store.list_with_offset(parent.as_ref(), &offset);

        let mut entries = Vec::new();
        while let Some(meta) = list_stream.try_next().await? {
            let key = meta.location.to_string();
            // listings are sorted, nothing after this can share the prefix
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, meta.size));
        }

        Ok(retain_files(entries))
    }

    /// fetches `key` into `local_path`, replacing anything already there.
    /// Returns the number of bytes written.
    pub async fn download(&self, key: &str, local_path: &LocalPath) -> Result<u64, StoreError> {
        let location =
            Path::parse(key).map_err(|e| StoreError::InvalidKey(key.to_string(), e))?;
        let content = self.store.get(&location).await?;
        let mut stream = content.into_stream();

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(local_path)
            .await?;

        let mut written = 0u64;
        while let Some(item) = stream.try_next().await? {
            file.write_all(&item).await?;
            written += item.len() as u64;
        }

        file.sync_all().await?;
        log::debug!("downloaded {} ({} bytes) to {}", key, written, local_path.display());

        Ok(written)
    }
}

pub fn is_directory_marker(key: &str) -> bool {
    key.ends_with('/')
}

/// Drops directory markers from listed `(key, size)` entries.
///
/// object_store strips the trailing `/` of S3 "folder" objects, so besides
/// keys ending in `/` this drops zero byte objects and keys other listed keys
/// are nested under.
pub fn retain_files(entries: Vec<(String, usize)>) -> Vec<String> {
    let parents: HashSet<&str> = entries
        .iter()
        .flat_map(|(key, _)| key.match_indices('/').map(move |(i, _)| &key[..i]))
        .collect();

    entries
        .iter()
        .filter(|(key, size)| {
            let marker = *size == 0 || is_directory_marker(key) || parents.contains(key.as_str());
            if marker {
                log::trace!("skipping directory marker {}", key);
            }
            !marker
        })
        .map(|(key, _)| key.clone())
        .collect()
}
