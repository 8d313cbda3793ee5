use crate::artifacts::{code_hash, ProxyKind};
use crate::ledger::DeploySpec;
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("failed to read deployment cache {path}: {error}")]
    Read { path: String, error: String },
    #[error("failed to parse deployment cache {path}: {error}")]
    Parse { path: String, error: String },
    #[error("failed to write deployment cache {path}: {error}")]
    Write { path: String, error: String },
}

/// What was deployed under a logical name, and with which parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub address: Address,
    pub constructor_args: Vec<String>,
    pub proxy_kind: ProxyKind,
    pub content_hash: B256,
}

impl DeploymentRecord {
    pub fn new(address: Address, spec: &DeploySpec) -> Self {
        DeploymentRecord {
            address,
            constructor_args: spec.constructor_args.clone(),
            proxy_kind: spec.proxy_kind,
            content_hash: code_hash(&spec.code),
        }
    }

    /// Names of the fields that differ from `spec`; empty when the record
    /// can be reused as is.
    pub fn mismatches(&self, spec: &DeploySpec) -> Vec<&'static str> {
        let mut fields = vec![];
        if self.constructor_args != spec.constructor_args {
            fields.push("constructorArgs");
        }
        if self.proxy_kind != spec.proxy_kind {
            fields.push("proxyKind");
        }
        if self.content_hash != code_hash(&spec.code) {
            fields.push("contentHash");
        }
        fields
    }
}

/// Durable name -> record map. One reconcile run at a time may write it.
#[allow(async_fn_in_trait)]
pub trait CacheStore {
    fn get(&self, name: &str) -> Option<DeploymentRecord>;

    /// Must be durable once this returns.
    async fn put(&mut self, name: &str, record: DeploymentRecord) -> Result<(), CacheError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryCache {
    records: BTreeMap<String, DeploymentRecord>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, name: &str) -> Option<DeploymentRecord> {
        self.records.get(name).cloned()
    }

    async fn put(&mut self, name: &str, record: DeploymentRecord) -> Result<(), CacheError> {
        self.records.insert(name.to_string(), record);
        Ok(())
    }
}

/// JSON file cache, rewritten in full after every put so that a run which
/// fails halfway still remembers what it deployed.
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    records: BTreeMap<String, DeploymentRecord>,
}

impl FileCache {
    /// Opens the cache at `path`; a missing file is an empty cache.
    pub async fn open(path: &Path) -> Result<Self, CacheError> {
        let records = match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|e| CacheError::Parse {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no deployment cache at {}", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                return Err(CacheError::Read {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })
            }
        };
        Ok(FileCache {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(|k| k.as_str())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        let write_error = |error: String| CacheError::Write {
            path: self.path.display().to_string(),
            error,
        };
        let contents =
            serde_json::to_string_pretty(&self.records).map_err(|e| write_error(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_error(e.to_string()))?;
        }
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|e| write_error(e.to_string()))
    }
}

impl CacheStore for FileCache {
    fn get(&self, name: &str) -> Option<DeploymentRecord> {
        self.records.get(name).cloned()
    }

    async fn put(&mut self, name: &str, record: DeploymentRecord) -> Result<(), CacheError> {
        if let Some(previous) = self.records.insert(name.to_string(), record) {
            warn!("replacing cached {name} at {}", previous.address);
        }
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> DeploySpec {
        DeploySpec {
            code: "AssetToken".to_string(),
            constructor_args: vec!["0x01".to_string(), "Dollar".to_string(), "USD".to_string()],
            proxy_kind: ProxyKind::Uups,
        }
    }

    #[test]
    fn test_matching_record_has_no_mismatches() {
        let record = DeploymentRecord::new(Address::repeat_byte(1), &spec());
        assert!(record.mismatches(&spec()).is_empty());
    }

    #[test]
    fn test_mismatched_fields_are_named() {
        let record = DeploymentRecord::new(Address::repeat_byte(1), &spec());
        let mut changed = spec();
        changed.constructor_args[1] = "Dollars".to_string();
        changed.code = "AssetTokenV2".to_string();
        assert_eq!(record.mismatches(&changed), vec!["constructorArgs", "contentHash"]);

        changed = spec();
        changed.proxy_kind = ProxyKind::None;
        assert_eq!(record.mismatches(&changed), vec!["proxyKind"]);
    }

    #[tokio::test]
    async fn test_file_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deployments.json");

        let mut cache = FileCache::open(&path).await.unwrap();
        assert!(cache.get("token-USD").is_none());
        let record = DeploymentRecord::new(Address::repeat_byte(7), &spec());
        cache.put("token-USD", record.clone()).await.unwrap();

        let reopened = FileCache::open(&path).await.unwrap();
        assert_eq!(reopened.get("token-USD"), Some(record));
        assert_eq!(reopened.names().collect::<Vec<_>>(), vec!["token-USD"]);
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployments.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        assert!(matches!(
            FileCache::open(&path).await.unwrap_err(),
            CacheError::Parse { .. }
        ));
    }
}
