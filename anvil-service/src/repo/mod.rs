// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory, observable record stores with one backing file per record.
//!
//! Reads are served from memory. A mutation persists the record first (write
//! to a temporary file, fsync, rename over the target), then updates the map
//! and notifies observers, so a crash can lose at most the mutation that was
//! in flight. Writers of one store are serialised; readers are not blocked
//! by writers beyond the map swap.

pub mod query;
pub mod stores;

use anvil_common::SafeDisplay;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, Weak};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// A record kind that lives in its own store directory.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Directory name under the data root; also used in error messages.
    const STORE: &'static str;

    /// Unique key; doubles as the backing file name.
    fn key(&self) -> String;
}

/// Gets told about store mutations, synchronously and in mutation order.
/// Callbacks must not block.
pub trait RecordObserver<R: Record>: Send + Sync {
    fn added(&self, record: &R) {
        let _ = record;
    }
    fn updated(&self, record: &R) {
        let _ = record;
    }
    fn removed(&self, record: &R) {
        let _ = record;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("{store} record already exists: {key}")]
    Duplicate { store: &'static str, key: String },
    #[error("{store} record not found: {key}")]
    NotFound { store: &'static str, key: String },
    #[error("invalid {store} record key: {key}")]
    InvalidKey { store: &'static str, key: String },
    #[error("store I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("store codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

impl SafeDisplay for RepoError {
    fn to_safe_string(&self) -> String {
        match self {
            RepoError::Duplicate { store, key } => format!("{store} \"{key}\" already exists"),
            RepoError::NotFound { store, key } => format!("{store} \"{key}\" does not exist"),
            RepoError::InvalidKey { store, key } => format!("invalid {store} name \"{key}\""),
            RepoError::Io(_) | RepoError::Codec(_) => "internal storage failure".to_string(),
        }
    }
}

/// Record keys become file names and URL path segments, so only a restricted
/// character set is accepted.
pub fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() || "+_-".contains(first) => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || ".+_ -".contains(c))
}

pub struct RecordStore<R: Record> {
    dir: PathBuf,
    records: RwLock<BTreeMap<String, Arc<R>>>,
    observers: RwLock<Vec<Weak<dyn RecordObserver<R>>>>,
    writer: tokio::sync::Mutex<()>,
}

impl<R: Record> RecordStore<R> {
    /// Opens the store rooted at `<data_dir>/<STORE>`, loading every record
    /// into memory. Files that fail to parse abort the startup rather than
    /// being skipped silently.
    pub async fn open(data_dir: &Path) -> Result<Self, RepoError> {
        let dir = data_dir.join(R::STORE);
        tokio::fs::create_dir_all(&dir).await?;

        let mut records = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let record: R = serde_json::from_slice(&bytes)?;
            records.insert(record.key(), Arc::new(record));
        }
        debug!("Loaded {} {} record(s)", records.len(), R::STORE);

        Ok(Self {
            dir,
            records: RwLock::new(records),
            observers: RwLock::new(Vec::new()),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    pub fn get(&self, key: &str) -> Option<Arc<R>> {
        self.records.read().expect("store lock poisoned").get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.read().expect("store lock poisoned").contains_key(key)
    }

    /// All records, ordered by key.
    pub fn values(&self) -> Vec<Arc<R>> {
        self.records
            .read()
            .expect("store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.records
            .read()
            .expect("store lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds a new record; fails with `Duplicate` if the key is taken.
    pub async fn add(&self, record: R) -> Result<Arc<R>, RepoError> {
        let key = Self::checked_key(&record)?;
        let _writer = self.writer.lock().await;
        if self.contains(&key) {
            return Err(RepoError::Duplicate {
                store: R::STORE,
                key,
            });
        }
        self.persist(&key, &record).await?;
        let record = Arc::new(record);
        self.records
            .write()
            .expect("store lock poisoned")
            .insert(key, record.clone());
        self.notify(|observer| observer.added(&record));
        Ok(record)
    }

    /// Replaces an existing record; fails with `NotFound` if it never existed.
    pub async fn update(&self, record: R) -> Result<Arc<R>, RepoError> {
        let key = Self::checked_key(&record)?;
        let _writer = self.writer.lock().await;
        if !self.contains(&key) {
            return Err(RepoError::NotFound {
                store: R::STORE,
                key,
            });
        }
        self.persist(&key, &record).await?;
        let record = Arc::new(record);
        self.records
            .write()
            .expect("store lock poisoned")
            .insert(key, record.clone());
        self.notify(|observer| observer.updated(&record));
        Ok(record)
    }

    pub async fn remove(&self, key: &str) -> Result<Arc<R>, RepoError> {
        let _writer = self.writer.lock().await;
        let removed = self
            .records
            .write()
            .expect("store lock poisoned")
            .remove(key)
            .ok_or_else(|| RepoError::NotFound {
                store: R::STORE,
                key: key.to_string(),
            })?;
        if let Err(err) = tokio::fs::remove_file(self.record_path(key)).await {
            warn!("Failed to delete {} record file {key}: {err}", R::STORE);
        }
        self.notify(|observer| observer.removed(&removed));
        Ok(removed)
    }

    /// Registers an observer. The store holds a weak reference; dropping the
    /// observer unregisters it.
    pub fn add_observer(&self, observer: &Arc<dyn RecordObserver<R>>) {
        self.observers
            .write()
            .expect("observer lock poisoned")
            .push(Arc::downgrade(observer));
    }

    fn notify(&self, f: impl Fn(&Arc<dyn RecordObserver<R>>)) {
        let mut observers = self.observers.write().expect("observer lock poisoned");
        observers.retain(|weak| match weak.upgrade() {
            Some(observer) => {
                f(&observer);
                true
            }
            None => false,
        });
    }

    fn checked_key(record: &R) -> Result<String, RepoError> {
        let key = record.key();
        if is_valid_key(&key) {
            Ok(key)
        } else {
            Err(RepoError::InvalidKey {
                store: R::STORE,
                key,
            })
        }
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    async fn persist(&self, key: &str, record: &R) -> Result<(), RepoError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let target = self.record_path(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }
}

/// A store holding exactly one record under a fixed file name.
pub struct SingletonStore<R> {
    path: PathBuf,
    value: RwLock<Arc<R>>,
    writer: tokio::sync::Mutex<()>,
}

impl<R: Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static> SingletonStore<R> {
    pub async fn open(data_dir: &Path, name: &str) -> Result<Self, RepoError> {
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(format!("{name}.json"));
        let value = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => R::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            value: RwLock::new(Arc::new(value)),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    pub fn get(&self) -> Arc<R> {
        self.value.read().expect("store lock poisoned").clone()
    }

    pub async fn set(&self, value: R) -> Result<Arc<R>, RepoError> {
        let _writer = self.writer.lock().await;
        let bytes = serde_json::to_vec_pretty(&value)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        let value = Arc::new(value);
        *self.value.write().expect("store lock poisoned") = value.clone();
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use test_r::test;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Probe {
        id: String,
        payload: u32,
    }

    impl Record for Probe {
        const STORE: &'static str = "probes";

        fn key(&self) -> String {
            self.id.clone()
        }
    }

    #[test]
    fn key_validation() {
        assert!(is_valid_key("build-linux_x64"));
        assert!(is_valid_key("a"));
        assert!(is_valid_key("2nd try.v1"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key(".hidden"));
        assert!(!is_valid_key("../escape"));
        assert!(!is_valid_key("nul\0byte"));
    }

    #[test]
    async fn add_get_update_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store: RecordStore<Probe> = RecordStore::open(dir.path()).await.unwrap();

        let record = Probe {
            id: "p1".to_string(),
            payload: 1,
        };
        store.add(record.clone()).await.unwrap();
        assert!(matches!(
            store.add(record.clone()).await,
            Err(RepoError::Duplicate { .. })
        ));
        assert_eq!(store.get("p1").as_deref(), Some(&record));

        let mut changed = record.clone();
        changed.payload = 2;
        store.update(changed.clone()).await.unwrap();

        // A reopened store sees exactly what was persisted.
        let reopened: RecordStore<Probe> = RecordStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get("p1").as_deref(), Some(&changed));

        store.remove("p1").await.unwrap();
        assert!(store.get("p1").is_none());
        assert!(matches!(
            store.remove("p1").await,
            Err(RepoError::NotFound { .. })
        ));
    }

    #[test]
    async fn observers_see_mutations_in_order() {
        #[derive(Default)]
        struct Log(std::sync::Mutex<Vec<String>>);

        impl RecordObserver<Probe> for Log {
            fn added(&self, record: &Probe) {
                self.0.lock().unwrap().push(format!("+{}", record.id));
            }
            fn updated(&self, record: &Probe) {
                self.0.lock().unwrap().push(format!("~{}", record.id));
            }
            fn removed(&self, record: &Probe) {
                self.0.lock().unwrap().push(format!("-{}", record.id));
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store: RecordStore<Probe> = RecordStore::open(dir.path()).await.unwrap();
        let log = Arc::new(Log::default());
        let observer: Arc<dyn RecordObserver<Probe>> = log.clone();
        store.add_observer(&observer);

        let record = Probe {
            id: "p1".to_string(),
            payload: 1,
        };
        store.add(record.clone()).await.unwrap();
        store.update(record).await.unwrap();
        store.remove("p1").await.unwrap();

        assert_eq!(*log.0.lock().unwrap(), vec!["+p1", "~p1", "-p1"]);
    }
}
