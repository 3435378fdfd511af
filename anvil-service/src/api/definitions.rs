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

use super::{authorize, ApiError, ApiResult, ApiTags};
use crate::auth::ApiBasicAuth;
use crate::model::definitions::{Framework, ProductDef, ResType, ResourceSpec, TaskDef};
use crate::model::project::ProjectSettings;
use crate::repo::stores::Stores;
use crate::service::auth::AuthService;
use crate::service::definitions::DefinitionService;
use anvil_common::model::{FrameworkId, ProductDefId, ResTypeId, Role, TaskDefId};
use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};
use std::sync::Arc;

/// Project-wide settings plus derived flags the UI needs.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub settings: ProjectSettings,
    /// True iff some framework requests extraction.
    pub any_extract: bool,
}

pub struct DefinitionsApi {
    pub auth_service: Arc<dyn AuthService>,
    pub definition_service: Arc<dyn DefinitionService>,
    pub stores: Stores,
}

#[OpenApi(prefix_path = "/v1", tag = ApiTags::Definitions)]
impl DefinitionsApi {
    /// List product definitions
    #[oai(path = "/products", method = "get", operation_id = "list_products")]
    async fn list_products(&self, auth: ApiBasicAuth) -> ApiResult<Json<Vec<ProductDef>>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        Ok(Json(
            self.stores
                .product_defs
                .values()
                .iter()
                .map(|def| (**def).clone())
                .collect(),
        ))
    }

    /// Declare a product
    #[oai(path = "/products", method = "post", operation_id = "create_product")]
    async fn create_product(
        &self,
        request: Json<ProductDef>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ProductDef>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        let created = self.definition_service.create_product_def(request.0).await?;
        Ok(Json((*created).clone()))
    }

    /// Get a product definition
    #[oai(path = "/products/:id", method = "get", operation_id = "get_product")]
    async fn get_product(
        &self,
        id: Path<ProductDefId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ProductDef>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        let def = self
            .stores
            .product_defs
            .get(id.0.as_str())
            .ok_or_else(|| ApiError::not_found(format!("product \"{}\" does not exist", id.0)))?;
        Ok(Json((*def).clone()))
    }

    /// Update a product definition
    ///
    /// Fails once any framework references the product; referenced products
    /// are immutable.
    #[oai(path = "/products/:id", method = "put", operation_id = "update_product")]
    async fn update_product(
        &self,
        id: Path<ProductDefId>,
        request: Json<ProductDef>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ProductDef>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        if request.0.id != id.0 {
            return Err(ApiError::bad_request("product id cannot change"));
        }
        let updated = self.definition_service.update_product_def(request.0).await?;
        Ok(Json((*updated).clone()))
    }

    /// Delete a product definition
    ///
    /// Fails while any framework still references the product.
    #[oai(path = "/products/:id", method = "delete", operation_id = "delete_product")]
    async fn delete_product(
        &self,
        id: Path<ProductDefId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<anvil_common::model::Empty>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        self.definition_service.delete_product_def(&id.0).await?;
        Ok(Json(anvil_common::model::Empty {}))
    }

    /// List frameworks
    #[oai(path = "/frameworks", method = "get", operation_id = "list_frameworks")]
    async fn list_frameworks(&self, auth: ApiBasicAuth) -> ApiResult<Json<Vec<Framework>>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        Ok(Json(
            self.stores
                .frameworks
                .values()
                .iter()
                .map(|framework| (**framework).clone())
                .collect(),
        ))
    }

    /// Create a framework
    #[oai(path = "/frameworks", method = "post", operation_id = "create_framework")]
    async fn create_framework(
        &self,
        request: Json<Framework>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<Framework>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        let created = self.definition_service.create_framework(request.0).await?;
        Ok(Json((*created).clone()))
    }

    /// Update a framework
    ///
    /// Existing jobs keep the version they were created from.
    #[oai(path = "/frameworks/:id", method = "put", operation_id = "update_framework")]
    async fn update_framework(
        &self,
        id: Path<FrameworkId>,
        request: Json<Framework>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<Framework>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        if request.0.id != id.0 {
            return Err(ApiError::bad_request("framework id cannot change"));
        }
        let updated = self.definition_service.update_framework(request.0).await?;
        Ok(Json((*updated).clone()))
    }

    /// Get a framework
    #[oai(path = "/frameworks/:id", method = "get", operation_id = "get_framework")]
    async fn get_framework(
        &self,
        id: Path<FrameworkId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<Framework>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        let framework = self.stores.frameworks.get(id.0.as_str()).ok_or_else(|| {
            ApiError::not_found(format!("framework \"{}\" does not exist", id.0))
        })?;
        Ok(Json((*framework).clone()))
    }

    /// Delete a framework
    #[oai(path = "/frameworks/:id", method = "delete", operation_id = "delete_framework")]
    async fn delete_framework(
        &self,
        id: Path<FrameworkId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<anvil_common::model::Empty>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        self.definition_service.delete_framework(&id.0).await?;
        Ok(Json(anvil_common::model::Empty {}))
    }

    /// List task definitions
    #[oai(path = "/taskdefs", method = "get", operation_id = "list_task_defs")]
    async fn list_task_defs(&self, auth: ApiBasicAuth) -> ApiResult<Json<Vec<TaskDef>>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        Ok(Json(
            self.stores
                .task_defs
                .values()
                .iter()
                .map(|def| (**def).clone())
                .collect(),
        ))
    }

    /// Create a task definition
    #[oai(path = "/taskdefs", method = "post", operation_id = "create_task_def")]
    async fn create_task_def(
        &self,
        request: Json<TaskDef>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<TaskDef>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        let created = self.definition_service.create_task_def(request.0).await?;
        Ok(Json((*created).clone()))
    }

    /// Update a task definition
    #[oai(path = "/taskdefs/:id", method = "put", operation_id = "update_task_def")]
    async fn update_task_def(
        &self,
        id: Path<TaskDefId>,
        request: Json<TaskDef>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<TaskDef>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        if request.0.id != id.0 {
            return Err(ApiError::bad_request("task definition id cannot change"));
        }
        let updated = self.definition_service.update_task_def(request.0).await?;
        Ok(Json((*updated).clone()))
    }

    /// Get a task definition
    #[oai(path = "/taskdefs/:id", method = "get", operation_id = "get_task_def")]
    async fn get_task_def(
        &self,
        id: Path<TaskDefId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<TaskDef>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        let def = self.stores.task_defs.get(id.0.as_str()).ok_or_else(|| {
            ApiError::not_found(format!("task definition \"{}\" does not exist", id.0))
        })?;
        Ok(Json((*def).clone()))
    }

    /// Delete a task definition
    #[oai(path = "/taskdefs/:id", method = "delete", operation_id = "delete_task_def")]
    async fn delete_task_def(
        &self,
        id: Path<TaskDefId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<anvil_common::model::Empty>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        self.definition_service.delete_task_def(&id.0).await?;
        Ok(Json(anvil_common::model::Empty {}))
    }

    /// Effective resource claim of a task definition
    ///
    /// The merge of the framework's and the definition's requirements,
    /// including the implicit agent slot.
    #[oai(path = "/taskdefs/:id/claim", method = "get", operation_id = "get_task_def_claim")]
    async fn get_task_def_claim(
        &self,
        id: Path<TaskDefId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<Vec<ResourceSpec>>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        let def = self.stores.task_defs.get(id.0.as_str()).ok_or_else(|| {
            ApiError::not_found(format!("task definition \"{}\" does not exist", id.0))
        })?;
        let claim = self.definition_service.resource_claim(&def)?;
        Ok(Json(claim.iter().cloned().collect()))
    }

    /// List resource types
    #[oai(path = "/restypes", method = "get", operation_id = "list_res_types")]
    async fn list_res_types(&self, auth: ApiBasicAuth) -> ApiResult<Json<Vec<ResType>>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        Ok(Json(
            self.stores
                .res_types
                .values()
                .iter()
                .map(|res_type| (**res_type).clone())
                .collect(),
        ))
    }

    /// Create a resource type
    #[oai(path = "/restypes", method = "post", operation_id = "create_res_type")]
    async fn create_res_type(
        &self,
        request: Json<ResType>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ResType>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        let created = self.definition_service.create_res_type(request.0).await?;
        Ok(Json((*created).clone()))
    }

    /// Delete a resource type
    #[oai(path = "/restypes/:id", method = "delete", operation_id = "delete_res_type")]
    async fn delete_res_type(
        &self,
        id: Path<ResTypeId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<anvil_common::model::Empty>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        self.definition_service.delete_res_type(&id.0).await?;
        Ok(Json(anvil_common::model::Empty {}))
    }

    /// Project settings
    #[oai(path = "/project", method = "get", operation_id = "get_project")]
    async fn get_project(&self, auth: ApiBasicAuth) -> ApiResult<Json<ProjectInfo>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        Ok(Json(ProjectInfo {
            settings: (*self.stores.project.get()).clone(),
            any_extract: self.definition_service.any_extract(),
        }))
    }

    /// Update project settings
    #[oai(path = "/project", method = "put", operation_id = "update_project")]
    async fn update_project(
        &self,
        request: Json<ProjectSettings>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ProjectSettings>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Operator)?;
        let updated = self.stores.project.set(request.0).await?;
        Ok(Json((*updated).clone()))
    }
}
