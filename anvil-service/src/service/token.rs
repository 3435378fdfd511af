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
use crate::model::token::{Token, RESOURCE_ID_PARAM};
use crate::repo::stores::Stores;
use crate::repo::RepoError;
use anvil_common::model::{TokenId, TokenRole};
use anvil_common::SafeDisplay;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token not found: {0}")]
    UnknownToken(TokenId),
    #[error("invalid token request: {0}")]
    Validation(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Internal(#[from] RepoError),
}

impl SafeDisplay for TokenError {
    fn to_safe_string(&self) -> String {
        match self {
            TokenError::Auth(inner) => inner.to_safe_string(),
            TokenError::Internal(inner) => inner.to_safe_string(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
pub trait TokenService: Send + Sync {
    /// Creates a token and returns it together with its password. The
    /// password is shown exactly once; only a hash is kept.
    async fn create(
        &self,
        role: TokenRole,
        params: BTreeMap<String, String>,
    ) -> Result<(Arc<Token>, String), TokenError>;

    /// Replaces the token's password with a fresh random one.
    async fn reset_password(&self, id: &TokenId) -> Result<String, TokenError>;

    async fn delete(&self, id: &TokenId) -> Result<(), TokenError>;

    fn get(&self, id: &TokenId) -> Option<Arc<Token>>;

    fn list(&self) -> Vec<Arc<Token>>;
}

pub struct TokenServiceDefault {
    stores: Stores,
    token_passwords: Arc<PasswordStore>,
}

impl TokenServiceDefault {
    pub fn new(stores: Stores, token_passwords: Arc<PasswordStore>) -> Self {
        Self {
            stores,
            token_passwords,
        }
    }
}

#[async_trait]
impl TokenService for TokenServiceDefault {
    async fn create(
        &self,
        role: TokenRole,
        params: BTreeMap<String, String>,
    ) -> Result<(Arc<Token>, String), TokenError> {
        if role == TokenRole::Resource {
            let resource_id = params.get(RESOURCE_ID_PARAM).ok_or_else(|| {
                TokenError::Validation(format!(
                    "resource tokens need a \"{RESOURCE_ID_PARAM}\" parameter"
                ))
            })?;
            if !self.stores.resources.contains(resource_id) {
                return Err(TokenError::Validation(format!(
                    "resource \"{resource_id}\" does not exist"
                )));
            }
        }

        let token = self
            .stores
            .tokens
            .add(Token::new(role, params, Utc::now()))
            .await?;
        let password = generate_password();
        self.token_passwords
            .set_password(&token.id.to_string(), &password)
            .await?;
        info!("Created {:?} token {}", token.role, token.id);
        Ok((token, password))
    }

    async fn reset_password(&self, id: &TokenId) -> Result<String, TokenError> {
        if !self.stores.tokens.contains(&id.to_string()) {
            return Err(TokenError::UnknownToken(*id));
        }
        let password = generate_password();
        self.token_passwords
            .set_password(&id.to_string(), &password)
            .await?;
        Ok(password)
    }

    async fn delete(&self, id: &TokenId) -> Result<(), TokenError> {
        match self.stores.tokens.remove(&id.to_string()).await {
            Ok(_) => {}
            Err(RepoError::NotFound { .. }) => return Err(TokenError::UnknownToken(*id)),
            Err(err) => return Err(err.into()),
        }
        self.token_passwords.delete(&id.to_string()).await?;
        Ok(())
    }

    fn get(&self, id: &TokenId) -> Option<Arc<Token>> {
        self.stores.tokens.get(&id.to_string())
    }

    fn list(&self) -> Vec<Arc<Token>> {
        self.stores.tokens.values()
    }
}
