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

use super::password::{AuthError, PasswordStore};
use crate::auth::{Authorisation, Identity};
use crate::repo::stores::Stores;
use anvil_common::model::{Role, TokenId, TokenRole, UserId};
use async_trait::async_trait;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait AuthService: Send + Sync {
    /// Resolves basic credentials to an identity. The username is a token id
    /// for agents, a user name for people.
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Authorisation, AuthError>;
}

pub struct AuthServiceDefault {
    stores: Stores,
    user_passwords: Arc<PasswordStore>,
    token_passwords: Arc<PasswordStore>,
    enabled: bool,
}

impl AuthServiceDefault {
    pub fn new(
        stores: Stores,
        user_passwords: Arc<PasswordStore>,
        token_passwords: Arc<PasswordStore>,
        enabled: bool,
    ) -> Self {
        Self {
            stores,
            user_passwords,
            token_passwords,
            enabled,
        }
    }

    async fn authenticate_token(
        &self,
        token_id: TokenId,
        password: &str,
    ) -> Result<Authorisation, AuthError> {
        let token = self
            .stores
            .tokens
            .get(&token_id.to_string())
            .ok_or(AuthError::InvalidCredentials)?;
        if token.expired(Utc::now()) {
            return Err(AuthError::InvalidCredentials);
        }
        if !self
            .token_passwords
            .verify(&token_id.to_string(), password)
            .await?
        {
            return Err(AuthError::InvalidCredentials);
        }
        match token.role {
            TokenRole::Resource => {
                let resource_id = token.resource_id().ok_or_else(|| {
                    AuthError::Internal(format!("resource token {token_id} names no resource"))
                })?;
                Ok(Authorisation::new(Identity::Runner {
                    token_id,
                    resource_id,
                }))
            }
            TokenRole::PasswordReset => {
                let user = token
                    .params
                    .get("user")
                    .cloned()
                    .map(UserId::new)
                    .ok_or_else(|| {
                        AuthError::Internal(format!("reset token {token_id} names no user"))
                    })?;
                Ok(Authorisation::new(Identity::PasswordReset {
                    token_id,
                    user,
                }))
            }
        }
    }

    async fn authenticate_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Authorisation, AuthError> {
        let user = self
            .stores
            .users
            .get(username)
            .filter(|user| !user.inactive)
            .ok_or(AuthError::InvalidCredentials)?;
        if !self.user_passwords.verify(username, password).await? {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(Authorisation::new(Identity::User {
            id: user.id.clone(),
            role: user.role,
        }))
    }
}

#[async_trait]
impl AuthService for AuthServiceDefault {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Authorisation, AuthError> {
        if !self.enabled {
            debug!("Authentication disabled; granting operator access");
            return Ok(Authorisation::new(Identity::User {
                id: UserId::new(if username.is_empty() {
                    "anonymous"
                } else {
                    username
                }),
                role: Role::Operator,
            }));
        }

        // Token ids are UUIDs, user names are not; this keeps the two
        // namespaces apart without a prefix convention.
        if let Ok(token_id) = TokenId::from_str(username) {
            self.authenticate_token(token_id, password).await
        } else {
            self.authenticate_user(username, password).await
        }
    }
}
