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

//! Mid-level data reported by wrappers and extractions.
//!
//! Values are stored as `results/<taskdef>/<key>/<runid>`, one small file per
//! value, so the per-key history of a task definition can be read without
//! touching job records.

use crate::repo::{is_valid_key, RepoError};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Key reported for every run without the wrapper's involvement.
pub const DURATION_KEY: &str = "sf.duration";

#[derive(Clone)]
pub struct ResultsStore {
    dir: PathBuf,
}

impl ResultsStore {
    pub fn new(data_dir: &std::path::Path) -> Self {
        Self {
            dir: data_dir.join("results"),
        }
    }

    /// Stores the data of one run. Keys are validated before anything is
    /// written; a key that was stored earlier but is absent from `data` is
    /// removed, so re-reporting replaces the run's data as a whole.
    pub async fn put_data(
        &self,
        task_def: &str,
        run_id: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), RepoError> {
        for key in data.keys() {
            if !is_valid_key(key) || key.starts_with("sf.") {
                return Err(RepoError::InvalidKey {
                    store: "results",
                    key: key.clone(),
                });
            }
        }

        let task_dir = self.dir.join(task_def);
        for key in self.keys(task_def).await {
            if !data.contains_key(&key) && key != DURATION_KEY {
                let stale = task_dir.join(&key).join(run_id);
                match tokio::fs::remove_file(&stale).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }

        for (key, value) in data {
            let key_dir = task_dir.join(key);
            tokio::fs::create_dir_all(&key_dir).await?;
            tokio::fs::write(key_dir.join(run_id), value.as_bytes()).await?;
        }
        Ok(())
    }

    /// `(run, value)` pairs for the given runs, in the given order; runs
    /// without a stored value are skipped.
    pub async fn get_data(
        &self,
        task_def: &str,
        run_ids: &[String],
        key: &str,
    ) -> Vec<(String, String)> {
        let key_dir = self.dir.join(task_def).join(key);
        let mut values = Vec::new();
        for run_id in run_ids {
            if let Ok(value) = tokio::fs::read_to_string(key_dir.join(run_id)).await {
                values.push((run_id.clone(), value));
            }
        }
        values
    }

    /// The keys for which at least one run of this task definition stored a
    /// value; always includes the synthetic duration key.
    pub async fn keys(&self, task_def: &str) -> BTreeSet<String> {
        let mut keys = BTreeSet::from([DURATION_KEY.to_string()]);
        let task_dir = self.dir.join(task_def);
        if let Ok(mut entries) = tokio::fs::read_dir(&task_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Some(name) = entry.file_name().to_str() {
                    keys.insert(name.to_string());
                }
            }
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    async fn data_round_trips_and_is_replaced_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(dir.path());

        let mut data = BTreeMap::new();
        data.insert("passed".to_string(), "17".to_string());
        data.insert("failed".to_string(), "2".to_string());
        store.put_data("test", "run-1", &data).await.unwrap();

        let values = store
            .get_data("test", &["run-1".to_string(), "run-2".to_string()], "passed")
            .await;
        assert_eq!(values, vec![("run-1".to_string(), "17".to_string())]);

        // A later report without "failed" drops the stale value.
        let mut data = BTreeMap::new();
        data.insert("passed".to_string(), "19".to_string());
        store.put_data("test", "run-1", &data).await.unwrap();
        assert!(store
            .get_data("test", &["run-1".to_string()], "failed")
            .await
            .is_empty());
    }

    #[test]
    async fn malicious_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::new(dir.path());
        let mut data = BTreeMap::new();
        data.insert("../escape".to_string(), "x".to_string());
        assert!(store.put_data("test", "run-1", &data).await.is_err());
    }
}
