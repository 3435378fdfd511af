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
use crate::model::user::User;
use crate::service::auth::AuthService;
use crate::service::user::{UserError, UserService};
use anvil_common::model::{Role, UserId};
use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub id: UserId,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct SetRoleRequest {
    pub role: Role,
}

/// The initial password is returned exactly once.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct UserWithPassword {
    pub user: User,
    pub password: String,
}

pub struct UsersApi {
    pub auth_service: Arc<dyn AuthService>,
    pub user_service: Arc<dyn UserService>,
}

#[OpenApi(prefix_path = "/v1", tag = ApiTags::Users)]
impl UsersApi {
    /// List user accounts
    #[oai(path = "/users", method = "get", operation_id = "list_users")]
    async fn list_users(&self, auth: ApiBasicAuth) -> ApiResult<Json<Vec<User>>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        Ok(Json(
            self.user_service
                .list()
                .iter()
                .map(|user| (**user).clone())
                .collect(),
        ))
    }

    /// Create a user account
    #[oai(path = "/users", method = "post", operation_id = "create_user")]
    async fn create_user(
        &self,
        request: Json<CreateUserRequest>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<UserWithPassword>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        let (user, password) = self
            .user_service
            .add(&request.0.id, request.0.role)
            .await?;
        Ok(Json(UserWithPassword {
            user: (*user).clone(),
            password,
        }))
    }

    /// Get a user account
    #[oai(path = "/users/:id", method = "get", operation_id = "get_user")]
    async fn get_user(&self, id: Path<UserId>, auth: ApiBasicAuth) -> ApiResult<Json<User>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        let user = self
            .user_service
            .get(&id.0)
            .ok_or_else(|| UserError::UnknownUser(id.0.clone()))?;
        Ok(Json((*user).clone()))
    }

    /// Deactivate a user account
    #[oai(path = "/users/:id", method = "delete", operation_id = "remove_user")]
    async fn remove_user(
        &self,
        id: Path<UserId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<anvil_common::model::Empty>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        self.user_service.remove(&id.0).await?;
        Ok(Json(anvil_common::model::Empty {}))
    }

    /// Change a user's role
    #[oai(path = "/users/:id/role", method = "put", operation_id = "set_user_role")]
    async fn set_user_role(
        &self,
        id: Path<UserId>,
        request: Json<SetRoleRequest>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<User>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        let user = self.user_service.set_role(&id.0, request.0.role).await?;
        Ok(Json((*user).clone()))
    }

    /// Reset a user's password
    #[oai(
        path = "/users/:id/reset-password",
        method = "post",
        operation_id = "reset_user_password"
    )]
    async fn reset_user_password(
        &self,
        id: Path<UserId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<UserWithPassword>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        let password = self.user_service.reset_password(&id.0).await?;
        let user = self
            .user_service
            .get(&id.0)
            .ok_or_else(|| UserError::UnknownUser(id.0.clone()))?;
        Ok(Json(UserWithPassword {
            user: (*user).clone(),
            password,
        }))
    }
}
