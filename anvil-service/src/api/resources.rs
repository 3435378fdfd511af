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

use super::dto::ResourceView;
use super::{authorize, ApiError, ApiResult, ApiTags};
use crate::auth::ApiBasicAuth;
use crate::config::SyncConfig;
use crate::model::resource::{Reservation, Resource};
use crate::repo::stores::Stores;
use crate::service::auth::AuthService;
use anvil_common::model::{ResTypeId, ResourceId, Role};
use chrono::Utc;
use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ResourceRequest {
    pub id: ResourceId,
    pub res_type: ResTypeId,
    #[serde(default)]
    #[oai(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    #[oai(default)]
    pub locator: String,
    #[serde(default)]
    #[oai(default)]
    pub description: String,
    #[serde(default)]
    #[oai(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct SuspendRequest {
    pub suspended: bool,
}

pub struct ResourcesApi {
    pub auth_service: Arc<dyn AuthService>,
    pub stores: Stores,
    pub sync_config: SyncConfig,
}

#[OpenApi(prefix_path = "/v1", tag = ApiTags::Resources)]
impl ResourcesApi {
    /// List resources with their availability
    #[oai(path = "/resources", method = "get", operation_id = "list_resources")]
    async fn list_resources(&self, auth: ApiBasicAuth) -> ApiResult<Json<Vec<ResourceView>>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        let now = Utc::now();
        Ok(Json(
            self.stores
                .resources
                .values()
                .iter()
                .map(|resource| ResourceView::of(resource, now, &self.sync_config))
                .collect(),
        ))
    }

    /// Register a resource
    ///
    /// Resources of the agent type start tracking sync state; everything
    /// else is a passive resource.
    #[oai(path = "/resources", method = "post", operation_id = "create_resource")]
    async fn create_resource(
        &self,
        request: Json<ResourceRequest>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ResourceView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        let request = request.0;
        if !self.stores.res_types.contains(request.res_type.as_str()) {
            return Err(ApiError::bad_request(format!(
                "resource type \"{}\" does not exist",
                request.res_type
            )));
        }
        let mut resource = Resource::new(
            request.id,
            request.res_type,
            request.locator,
            request.description,
            request.capabilities,
        );
        resource.params = request.params;
        let created = self.stores.resources.add(resource).await?;
        Ok(Json(ResourceView::of(&created, Utc::now(), &self.sync_config)))
    }

    /// Get a resource
    #[oai(path = "/resources/:id", method = "get", operation_id = "get_resource")]
    async fn get_resource(
        &self,
        id: Path<ResourceId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ResourceView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        let resource = self.stores.resources.get(id.0.as_str()).ok_or_else(|| {
            ApiError::not_found(format!("resource \"{}\" does not exist", id.0))
        })?;
        Ok(Json(ResourceView::of(&resource, Utc::now(), &self.sync_config)))
    }

    /// Update a resource's description, locator, capabilities or parameters
    #[oai(path = "/resources/:id", method = "put", operation_id = "update_resource")]
    async fn update_resource(
        &self,
        id: Path<ResourceId>,
        request: Json<ResourceRequest>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ResourceView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        let request = request.0;
        if request.id != id.0 {
            return Err(ApiError::bad_request("resource id cannot change"));
        }
        let existing = self.stores.resources.get(id.0.as_str()).ok_or_else(|| {
            ApiError::not_found(format!("resource \"{}\" does not exist", id.0))
        })?;
        if existing.res_type != request.res_type {
            return Err(ApiError::bad_request("resource type cannot change"));
        }
        let mut resource = (*existing).clone();
        resource.capabilities = request.capabilities;
        resource.locator = request.locator;
        resource.description = request.description;
        resource.params = request.params;
        let updated = self.stores.resources.update(resource).await?;
        Ok(Json(ResourceView::of(&updated, Utc::now(), &self.sync_config)))
    }

    /// Remove a resource
    ///
    /// Refused while the resource is reserved.
    #[oai(path = "/resources/:id", method = "delete", operation_id = "delete_resource")]
    async fn delete_resource(
        &self,
        id: Path<ResourceId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<anvil_common::model::Empty>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        if let Some(resource) = self.stores.resources.get(id.0.as_str()) {
            if resource.is_reserved() {
                return Err(ApiError::bad_request(format!(
                    "resource \"{}\" is currently reserved",
                    id.0
                )));
            }
        }
        self.stores.resources.remove(id.0.as_str()).await?;
        Ok(Json(anvil_common::model::Empty {}))
    }

    /// Suspend or resume a resource
    ///
    /// A suspended resource finishes its current reservation but is not
    /// handed out again until resumed.
    #[oai(path = "/resources/:id/suspend", method = "post", operation_id = "suspend_resource")]
    async fn suspend_resource(
        &self,
        id: Path<ResourceId>,
        request: Json<SuspendRequest>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ResourceView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        let user = authz.require_role(Role::User)?.clone();
        let existing = self.stores.resources.get(id.0.as_str()).ok_or_else(|| {
            ApiError::not_found(format!("resource \"{}\" does not exist", id.0))
        })?;
        let now = Utc::now();
        let mut resource = (*existing).clone();
        if resource.set_suspended(request.0.suspended, &user, now) {
            let updated = self.stores.resources.update(resource).await?;
            Ok(Json(ResourceView::of(&updated, now, &self.sync_config)))
        } else {
            Ok(Json(ResourceView::of(&existing, now, &self.sync_config)))
        }
    }

    /// Reserve a resource for manual use
    #[oai(path = "/resources/:id/reserve", method = "post", operation_id = "reserve_resource")]
    async fn reserve_resource(
        &self,
        id: Path<ResourceId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ResourceView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        let user = authz.require_role(Role::User)?.clone();
        let existing = self.stores.resources.get(id.0.as_str()).ok_or_else(|| {
            ApiError::not_found(format!("resource \"{}\" does not exist", id.0))
        })?;
        if existing.is_reserved() {
            return Err(ApiError::bad_request(format!(
                "resource \"{}\" is already reserved",
                id.0
            )));
        }
        let mut resource = (*existing).clone();
        resource.reserved = Some(Reservation::User(user));
        let updated = self.stores.resources.update(resource).await?;
        Ok(Json(ResourceView::of(&updated, Utc::now(), &self.sync_config)))
    }

    /// Release a manual reservation
    #[oai(path = "/resources/:id/release", method = "post", operation_id = "release_resource")]
    async fn release_resource(
        &self,
        id: Path<ResourceId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ResourceView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        let existing = self.stores.resources.get(id.0.as_str()).ok_or_else(|| {
            ApiError::not_found(format!("resource \"{}\" does not exist", id.0))
        })?;
        match &existing.reserved {
            Some(Reservation::User(_)) | None => {}
            Some(Reservation::Run(run)) => {
                return Err(ApiError::bad_request(format!(
                    "resource \"{}\" is held by run {run}",
                    id.0
                )));
            }
        }
        let mut resource = (*existing).clone();
        resource.reserved = None;
        let updated = self.stores.resources.update(resource).await?;
        Ok(Json(ResourceView::of(&updated, Utc::now(), &self.sync_config)))
    }
}
