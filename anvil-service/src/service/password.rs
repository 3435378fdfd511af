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

//! Salted password hashes, kept in files separate from the record stores.

use anvil_common::SafeDisplay;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use rand::distr::Alphanumeric;
use rand::Rng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("authentication failure: {0}")]
    Internal(String),
}

impl SafeDisplay for AuthError {
    fn to_safe_string(&self) -> String {
        match self {
            AuthError::InvalidCredentials => "invalid credentials".to_string(),
            AuthError::AccessDenied(message) => format!("access denied: {message}"),
            AuthError::Internal(_) => "internal authentication failure".to_string(),
        }
    }
}

impl From<std::io::Error> for AuthError {
    fn from(value: std::io::Error) -> Self {
        AuthError::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(value: serde_json::Error) -> Self {
        AuthError::Internal(value.to_string())
    }
}

/// Random password for freshly created accounts and tokens; shown once,
/// stored only as a hash.
pub fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// One password file: a JSON map from name to argon2 hash, updated by
/// temp-write-and-rename like the record stores.
pub struct PasswordStore {
    path: PathBuf,
    hashes: RwLock<BTreeMap<String, String>>,
    writer: tokio::sync::Mutex<()>,
}

impl PasswordStore {
    pub async fn open(data_dir: &Path, name: &str) -> Result<Self, AuthError> {
        let dir = data_dir.join("passwords");
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{name}.json"));
        let hashes = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            hashes: RwLock::new(hashes),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// Hashes and stores a password; hashing runs on a blocking worker so
    /// the request loop never stalls on key derivation.
    pub async fn set_password(&self, name: &str, password: &str) -> Result<(), AuthError> {
        let password = password.to_string();
        let hash = tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
        })
        .await
        .map_err(|err| AuthError::Internal(err.to_string()))?
        .map_err(|err| AuthError::Internal(err.to_string()))?;

        let _writer = self.writer.lock().await;
        let snapshot = {
            let mut hashes = self.hashes.write().expect("password lock poisoned");
            hashes.insert(name.to_string(), hash);
            hashes.clone()
        };
        self.persist(&snapshot).await
    }

    pub async fn verify(&self, name: &str, password: &str) -> Result<bool, AuthError> {
        let Some(hash) = self
            .hashes
            .read()
            .expect("password lock poisoned")
            .get(name)
            .cloned()
        else {
            return Ok(false);
        };
        let password = password.to_string();
        tokio::task::spawn_blocking(move || match PasswordHash::new(&hash) {
            Ok(parsed) => Ok(Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()),
            Err(err) => Err(AuthError::Internal(err.to_string())),
        })
        .await
        .map_err(|err| AuthError::Internal(err.to_string()))?
    }

    /// Returns whether the entry existed.
    pub async fn delete(&self, name: &str) -> Result<bool, AuthError> {
        let _writer = self.writer.lock().await;
        let (existed, snapshot) = {
            let mut hashes = self.hashes.write().expect("password lock poisoned");
            let existed = hashes.remove(name).is_some();
            (existed, hashes.clone())
        };
        if existed {
            self.persist(&snapshot).await?;
        }
        Ok(existed)
    }

    async fn persist(&self, hashes: &BTreeMap<String, String>) -> Result<(), AuthError> {
        let bytes = serde_json::to_vec_pretty(hashes)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    async fn passwords_verify_and_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = PasswordStore::open(dir.path(), "users").await.unwrap();
        store.set_password("alice", "s3cret").await.unwrap();

        assert!(store.verify("alice", "s3cret").await.unwrap());
        assert!(!store.verify("alice", "wrong").await.unwrap());
        assert!(!store.verify("bob", "s3cret").await.unwrap());

        let reloaded = PasswordStore::open(dir.path(), "users").await.unwrap();
        assert!(reloaded.verify("alice", "s3cret").await.unwrap());

        assert!(store.delete("alice").await.unwrap());
        assert!(!store.delete("alice").await.unwrap());
        assert!(!store.verify("alice", "s3cret").await.unwrap());
    }
}
