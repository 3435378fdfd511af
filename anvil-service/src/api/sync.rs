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

//! The agent-facing endpoints: sync long-poll and completion reports.

use super::{authorize, ApiResult, ApiTags};
use crate::auth::ApiBasicAuth;
use crate::model::protocol::{ShadowReport, SyncRequest, SyncResponse, TaskReport};
use crate::service::auth::AuthService;
use crate::service::dispatch::DispatcherService;
use poem_openapi::payload::Json;
use poem_openapi::OpenApi;
use std::sync::Arc;

pub struct SyncApi {
    pub auth_service: Arc<dyn AuthService>,
    pub dispatcher: Arc<DispatcherService>,
}

#[OpenApi(prefix_path = "/v1", tag = ApiTags::Sync)]
impl SyncApi {
    /// Agent sync
    ///
    /// Reports the agent's state and receives exactly one of: new work, an
    /// abort, permission to exit, or a wait interval.
    #[oai(path = "/sync", method = "post", operation_id = "sync")]
    async fn sync(
        &self,
        request: Json<SyncRequest>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<SyncResponse>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        let runner_id = authz.require_runner()?.clone();
        Ok(Json(self.dispatcher.sync(&runner_id, request.0).await?))
    }

    /// Report a finished task run
    #[oai(path = "/done", method = "post", operation_id = "task_done")]
    async fn task_done(
        &self,
        request: Json<TaskReport>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<anvil_common::model::Empty>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        let runner_id = authz.require_runner()?.clone();
        self.dispatcher.task_done(&runner_id, request.0).await?;
        Ok(Json(anvil_common::model::Empty {}))
    }

    /// Report a finished extraction
    #[oai(path = "/shadow-done", method = "post", operation_id = "shadow_done")]
    async fn shadow_done(
        &self,
        request: Json<ShadowReport>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<anvil_common::model::Empty>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        let runner_id = authz.require_runner()?.clone();
        self.dispatcher.shadow_done(&runner_id, request.0).await?;
        Ok(Json(anvil_common::model::Empty {}))
    }
}
