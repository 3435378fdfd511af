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

use super::{authorize, ApiResult, ApiTags};
use crate::auth::ApiBasicAuth;
use crate::service::auth::AuthService;
use crate::service::token::{TokenError, TokenService};
use anvil_common::model::{Role, TokenId, TokenRole};
use chrono::{DateTime, Utc};
use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct TokenView {
    pub id: TokenId,
    pub role: TokenRole,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct CreateTokenRequest {
    pub role: TokenRole,
    #[serde(default)]
    #[oai(default)]
    pub params: BTreeMap<String, String>,
}

/// The password is returned exactly once, at creation or reset.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct UnsafeTokenView {
    pub token: TokenView,
    pub password: String,
}

fn view(token: &crate::model::token::Token) -> TokenView {
    TokenView {
        id: token.id,
        role: token.role,
        created_at: token.created_at,
        expires_at: token.expires_at,
        params: token.params.clone(),
    }
}

pub struct TokensApi {
    pub auth_service: Arc<dyn AuthService>,
    pub token_service: Arc<dyn TokenService>,
}

#[OpenApi(prefix_path = "/v1", tag = ApiTags::Tokens)]
impl TokensApi {
    /// List tokens
    #[oai(path = "/tokens", method = "get", operation_id = "list_tokens")]
    async fn list_tokens(&self, auth: ApiBasicAuth) -> ApiResult<Json<Vec<TokenView>>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        Ok(Json(
            self.token_service
                .list()
                .iter()
                .map(|token| view(token))
                .collect(),
        ))
    }

    /// Create a token
    ///
    /// The response carries the password; it cannot be retrieved later.
    #[oai(path = "/tokens", method = "post", operation_id = "create_token")]
    async fn create_token(
        &self,
        request: Json<CreateTokenRequest>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<UnsafeTokenView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        let (token, password) = self
            .token_service
            .create(request.0.role, request.0.params)
            .await?;
        Ok(Json(UnsafeTokenView {
            token: view(&token),
            password,
        }))
    }

    /// Get a token
    #[oai(path = "/tokens/:id", method = "get", operation_id = "get_token")]
    async fn get_token(
        &self,
        id: Path<TokenId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<TokenView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        let token = self
            .token_service
            .get(&id.0)
            .ok_or(TokenError::UnknownToken(id.0))?;
        Ok(Json(view(&token)))
    }

    /// Reset a token's password
    #[oai(path = "/tokens/:id/reset", method = "post", operation_id = "reset_token")]
    async fn reset_token(
        &self,
        id: Path<TokenId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<UnsafeTokenView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        let password = self.token_service.reset_password(&id.0).await?;
        let token = self
            .token_service
            .get(&id.0)
            .ok_or(TokenError::UnknownToken(id.0))?;
        Ok(Json(UnsafeTokenView {
            token: view(&token),
            password,
        }))
    }

    /// Delete a token
    #[oai(path = "/tokens/:id", method = "delete", operation_id = "delete_token")]
    async fn delete_token(
        &self,
        id: Path<TokenId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<anvil_common::model::Empty>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        self.token_service.delete(&id.0).await?;
        Ok(Json(anvil_common::model::Empty {}))
    }
}
