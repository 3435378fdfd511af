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

use super::password::{generate_password, AuthError, PasswordStore};
use crate::model::user::User;
use crate::repo::stores::Stores;
use crate::repo::RepoError;
use anvil_common::model::{Role, UserId};
use anvil_common::SafeDisplay;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("user not found: {0}")]
    UnknownUser(UserId),
    #[error("user already exists: {0}")]
    Duplicate(UserId),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Internal(RepoError),
}

impl From<RepoError> for UserError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Duplicate { key, .. } => UserError::Duplicate(UserId::new(key)),
            RepoError::NotFound { key, .. } => UserError::UnknownUser(UserId::new(key)),
            other => UserError::Internal(other),
        }
    }
}

impl SafeDisplay for UserError {
    fn to_safe_string(&self) -> String {
        match self {
            UserError::Auth(inner) => inner.to_safe_string(),
            UserError::Internal(inner) => inner.to_safe_string(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
pub trait UserService: Send + Sync {
    /// Creates an account and returns its initial password (shown once).
    async fn add(&self, id: &UserId, role: Role) -> Result<(Arc<User>, String), UserError>;

    /// Deactivates the account and destroys its password. The record stays
    /// so old jobs keep resolving their owner.
    async fn remove(&self, id: &UserId) -> Result<(), UserError>;

    fn get(&self, id: &UserId) -> Option<Arc<User>>;

    fn list(&self) -> Vec<Arc<User>>;

    async fn set_role(&self, id: &UserId, role: Role) -> Result<Arc<User>, UserError>;

    async fn reset_password(&self, id: &UserId) -> Result<String, UserError>;
}

pub struct UserServiceDefault {
    stores: Stores,
    user_passwords: Arc<PasswordStore>,
}

impl UserServiceDefault {
    pub fn new(stores: Stores, user_passwords: Arc<PasswordStore>) -> Self {
        Self {
            stores,
            user_passwords,
        }
    }

    fn active_user(&self, id: &UserId) -> Result<Arc<User>, UserError> {
        self.stores
            .users
            .get(id.as_str())
            .filter(|user| !user.inactive)
            .ok_or_else(|| UserError::UnknownUser(id.clone()))
    }
}

#[async_trait]
impl UserService for UserServiceDefault {
    async fn add(&self, id: &UserId, role: Role) -> Result<(Arc<User>, String), UserError> {
        if let Some(existing) = self.stores.users.get(id.as_str()) {
            if existing.inactive {
                // Reactivating keeps the history attached to the old record.
                let mut user = (*existing).clone();
                user.inactive = false;
                user.role = role;
                let user = self.stores.users.update(user).await?;
                let password = generate_password();
                self.user_passwords
                    .set_password(id.as_str(), &password)
                    .await?;
                info!("Reactivated user {id}");
                return Ok((user, password));
            }
            return Err(UserError::Duplicate(id.clone()));
        }

        let user = self
            .stores
            .users
            .add(User::new(id.clone(), role, Utc::now()))
            .await?;
        let password = generate_password();
        self.user_passwords
            .set_password(id.as_str(), &password)
            .await?;
        info!("Created user {id} with role {role}");
        Ok((user, password))
    }

    async fn remove(&self, id: &UserId) -> Result<(), UserError> {
        let user = self.active_user(id)?;
        let mut user = (*user).clone();
        user.inactive = true;
        self.stores.users.update(user).await?;
        self.user_passwords.delete(id.as_str()).await?;
        info!("Deactivated user {id}");
        Ok(())
    }

    fn get(&self, id: &UserId) -> Option<Arc<User>> {
        self.stores.users.get(id.as_str())
    }

    fn list(&self) -> Vec<Arc<User>> {
        self.stores.users.values()
    }

    async fn set_role(&self, id: &UserId, role: Role) -> Result<Arc<User>, UserError> {
        let user = self.active_user(id)?;
        let mut user = (*user).clone();
        user.role = role;
        Ok(self.stores.users.update(user).await?)
    }

    async fn reset_password(&self, id: &UserId) -> Result<String, UserError> {
        self.active_user(id)?;
        let password = generate_password();
        self.user_passwords
            .set_password(id.as_str(), &password)
            .await?;
        Ok(password)
    }
}
