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

use super::dto::ConfigurationDto;
use super::{authorize, ApiError, ApiResult, ApiTags};
use crate::auth::ApiBasicAuth;
use crate::repo::stores::Stores;
use crate::service::auth::AuthService;
use crate::service::job::JobService;
use anvil_common::model::{ConfigId, Role};
use chrono::Utc;
use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};
use std::sync::Arc;

/// Whether a configuration can be instantiated right now.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ConfigValidity {
    pub valid: bool,
    pub reason: Option<String>,
}

pub struct ConfigurationsApi {
    pub auth_service: Arc<dyn AuthService>,
    pub job_service: Arc<dyn JobService>,
    pub stores: Stores,
}

#[OpenApi(prefix_path = "/v1", tag = ApiTags::Configurations)]
impl ConfigurationsApi {
    /// List configurations
    #[oai(path = "/configs", method = "get", operation_id = "list_configs")]
    async fn list_configs(&self, auth: ApiBasicAuth) -> ApiResult<Json<Vec<ConfigurationDto>>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        Ok(Json(
            self.stores
                .configs
                .values()
                .iter()
                .map(|config| ConfigurationDto::from_record(config))
                .collect(),
        ))
    }

    /// Save a configuration
    #[oai(path = "/configs", method = "post", operation_id = "create_config")]
    async fn create_config(
        &self,
        request: Json<ConfigurationDto>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ConfigurationDto>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        let user = authz.require_role(Role::User)?;
        let mut config = request.0.into_record(Utc::now());
        if config.owner.is_none() {
            config.owner = Some(user.clone());
        }
        let created = self.stores.configs.add(config).await?;
        Ok(Json(ConfigurationDto::from_record(&created)))
    }

    /// Update a configuration
    ///
    /// Running jobs are unaffected; they were instantiated from a snapshot.
    #[oai(path = "/configs/:id", method = "put", operation_id = "update_config")]
    async fn update_config(
        &self,
        id: Path<ConfigId>,
        request: Json<ConfigurationDto>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ConfigurationDto>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        if request.0.id != id.0 {
            return Err(ApiError::bad_request("configuration id cannot change"));
        }
        let created_at = self
            .stores
            .configs
            .get(id.0.as_str())
            .map(|existing| existing.created_at)
            .unwrap_or_else(Utc::now);
        let updated = self
            .stores
            .configs
            .update(request.0.into_record(created_at))
            .await?;
        Ok(Json(ConfigurationDto::from_record(&updated)))
    }

    /// Get a configuration
    #[oai(path = "/configs/:id", method = "get", operation_id = "get_config")]
    async fn get_config(
        &self,
        id: Path<ConfigId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ConfigurationDto>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        let config = self.stores.configs.get(id.0.as_str()).ok_or_else(|| {
            ApiError::not_found(format!("configuration \"{}\" does not exist", id.0))
        })?;
        Ok(Json(ConfigurationDto::from_record(&config)))
    }

    /// Delete a configuration
    #[oai(path = "/configs/:id", method = "delete", operation_id = "delete_config")]
    async fn delete_config(
        &self,
        id: Path<ConfigId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<anvil_common::model::Empty>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        let referencing_schedule = self.stores.schedules.values().into_iter().any(|schedule| {
            matches!(
                &schedule.target,
                crate::model::schedule::ScheduleTarget::Config { config_id } if config_id == &id.0
            )
        });
        if referencing_schedule {
            return Err(ApiError::bad_request(format!(
                "configuration \"{}\" is targeted by a schedule",
                id.0
            )));
        }
        self.stores.configs.remove(id.0.as_str()).await?;
        Ok(Json(anvil_common::model::Empty {}))
    }

    /// Check whether a configuration has valid inputs
    #[oai(path = "/configs/:id/validity", method = "get", operation_id = "get_config_validity")]
    async fn get_config_validity(
        &self,
        id: Path<ConfigId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ConfigValidity>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        let config = self.stores.configs.get(id.0.as_str()).ok_or_else(|| {
            ApiError::not_found(format!("configuration \"{}\" does not exist", id.0))
        })?;
        Ok(Json(match self.job_service.config_valid(&config) {
            Ok(()) => ConfigValidity {
                valid: true,
                reason: None,
            },
            Err(err) => ConfigValidity {
                valid: false,
                reason: Some(anvil_common::SafeDisplay::to_safe_string(&err)),
            },
        }))
    }
}
