//! Store access for the gridded dataset
//!
//! Resolves a store location to a synchronous Zarr storage handle. `s3://`
//! locations go through `object_store` (anonymous requests for public
//! buckets) wrapped by an async-to-sync adapter; anything else is opened as a
//! local filesystem store.

use crate::config::StoreConfig;
use crate::errors::{AnomalyError, Result};
use object_store::aws::AmazonS3Builder;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use zarrs::storage::ReadableStorage;
use zarrs_filesystem::FilesystemStore;
use zarrs_object_store::AsyncObjectStore;
use zarrs_storage::storage_adapter::async_to_sync::{AsyncToSyncBlockOn, AsyncToSyncStorageAdapter};

/// Where the Zarr store lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Bucket plus key prefix of the store root (may be empty)
    S3 { bucket: String, prefix: String },
    Local(PathBuf),
}

impl StoreLocation {
    /// Parse `s3://bucket/prefix` or a filesystem path.
    pub fn parse(url: &str) -> Result<Self> {
        let Some(rest) = url.strip_prefix("s3://") else {
            return Ok(StoreLocation::Local(PathBuf::from(url)));
        };

        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(AnomalyError::ConfigError(format!(
                "Invalid S3 location, expected 's3://bucket/prefix': {url}"
            )));
        }

        Ok(StoreLocation::S3 {
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        })
    }

    /// Key prefix under which the store's nodes live.
    pub fn root(&self) -> &str {
        match self {
            StoreLocation::S3 { prefix, .. } => prefix,
            StoreLocation::Local(_) => "",
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, StoreLocation::S3 { .. })
    }
}

/// Drives object store futures from synchronous Zarr calls.
///
/// Holds the runtime handle explicitly so rayon worker threads, which are
/// outside any runtime context, can block on store requests too.
#[derive(Clone)]
pub struct RuntimeBlockOn {
    handle: Handle,
}

impl RuntimeBlockOn {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl AsyncToSyncBlockOn for RuntimeBlockOn {
    fn block_on<F: core::future::Future>(&self, future: F) -> F::Output {
        if Handle::try_current().is_ok() {
            // On a runtime worker: move off it before blocking
            tokio::task::block_in_place(|| self.handle.block_on(future))
        } else {
            self.handle.block_on(future)
        }
    }
}

/// Open the storage behind `location`.
///
/// `runtime` is required for S3 locations and ignored for local ones.
pub fn open_store(
    location: &StoreLocation,
    config: &StoreConfig,
    runtime: Option<Handle>,
) -> Result<ReadableStorage> {
    match location {
        StoreLocation::Local(path) => {
            if !path.is_dir() {
                return Err(AnomalyError::ConnectivityError(format!(
                    "Zarr store path is not a directory: {}",
                    path.display()
                )));
            }
            let store = FilesystemStore::new(path).map_err(|e| {
                AnomalyError::ConnectivityError(format!("Failed to open {}: {e}", path.display()))
            })?;
            Ok(Arc::new(store))
        }
        StoreLocation::S3 { bucket, .. } => {
            let handle = runtime.ok_or_else(|| {
                AnomalyError::ConfigError("an async runtime is required for S3 stores".to_string())
            })?;

            let mut builder = AmazonS3Builder::new()
                .with_bucket_name(bucket)
                .with_region(&config.region)
                .with_skip_signature(config.anonymous);
            if let Some(endpoint) = &config.endpoint {
                builder = builder
                    .with_endpoint(endpoint)
                    .with_allow_http(endpoint.starts_with("http://"));
            }

            let s3 = builder.build().map_err(|e| {
                AnomalyError::ConnectivityError(format!("Failed to create S3 client: {e}"))
            })?;

            let async_store = Arc::new(AsyncObjectStore::new(s3));
            let sync_store = AsyncToSyncStorageAdapter::new(async_store, RuntimeBlockOn::new(handle));
            Ok(Arc::new(sync_store))
        }
    }
}
