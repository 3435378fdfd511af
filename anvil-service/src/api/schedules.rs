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

use super::dto::{ScheduleDto, ScheduleView};
use super::{authorize, ApiError, ApiResult, ApiTags};
use crate::auth::ApiBasicAuth;
use crate::model::schedule::RepeatKind;
use crate::repo::stores::Stores;
use crate::service::auth::AuthService;
use crate::service::scheduler::SchedulerService;
use anvil_common::model::{Role, ScheduleId};
use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::OpenApi;
use std::sync::Arc;

pub struct SchedulesApi {
    pub auth_service: Arc<dyn AuthService>,
    pub scheduler: Arc<SchedulerService>,
    pub stores: Stores,
}

#[OpenApi(prefix_path = "/v1", tag = ApiTags::Schedules)]
impl SchedulesApi {
    /// List schedules with their computed status
    #[oai(path = "/schedules", method = "get", operation_id = "list_schedules")]
    async fn list_schedules(&self, auth: ApiBasicAuth) -> ApiResult<Json<Vec<ScheduleView>>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        Ok(Json(
            self.stores
                .schedules
                .values()
                .iter()
                .map(|schedule| ScheduleView::of(schedule, self.scheduler.status(schedule)))
                .collect(),
        ))
    }

    /// Create a schedule
    #[oai(path = "/schedules", method = "post", operation_id = "create_schedule")]
    async fn create_schedule(
        &self,
        request: Json<ScheduleDto>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ScheduleView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        let user = authz.require_role(Role::User)?.clone();
        let mut schedule = request.0.into_record().map_err(ApiError::bad_request)?;
        if schedule.owner.is_none() {
            schedule.owner = Some(user);
        }
        let created = self.stores.schedules.add(schedule).await?;
        self.scheduler.poke();
        Ok(Json(ScheduleView::of(
            &created,
            self.scheduler.status(&created),
        )))
    }

    /// Get a schedule
    #[oai(path = "/schedules/:id", method = "get", operation_id = "get_schedule")]
    async fn get_schedule(
        &self,
        id: Path<ScheduleId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ScheduleView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        let schedule = self.stores.schedules.get(id.0.as_str()).ok_or_else(|| {
            ApiError::not_found(format!("schedule \"{}\" does not exist", id.0))
        })?;
        Ok(Json(ScheduleView::of(
            &schedule,
            self.scheduler.status(&schedule),
        )))
    }

    /// Delete a schedule
    #[oai(path = "/schedules/:id", method = "delete", operation_id = "delete_schedule")]
    async fn delete_schedule(
        &self,
        id: Path<ScheduleId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<anvil_common::model::Empty>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        self.stores.schedules.remove(id.0.as_str()).await?;
        Ok(Json(anvil_common::model::Empty {}))
    }

    /// Suspend or resume a schedule
    #[oai(path = "/schedules/:id/suspend", method = "post", operation_id = "suspend_schedule")]
    async fn suspend_schedule(
        &self,
        id: Path<ScheduleId>,
        request: Json<super::resources::SuspendRequest>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ScheduleView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        let schedule = self.stores.schedules.get(id.0.as_str()).ok_or_else(|| {
            ApiError::not_found(format!("schedule \"{}\" does not exist", id.0))
        })?;
        let mut updated = (*schedule).clone();
        updated.suspended = request.0.suspended;
        let stored = self.stores.schedules.update(updated).await?;
        self.scheduler.poke();
        Ok(Json(ScheduleView::of(
            &stored,
            self.scheduler.status(&stored),
        )))
    }

    /// Fire a triggered schedule by hand
    #[oai(path = "/schedules/:id/trigger", method = "post", operation_id = "trigger_schedule")]
    async fn trigger_schedule(
        &self,
        id: Path<ScheduleId>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<ScheduleView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        let schedule = self.stores.schedules.get(id.0.as_str()).ok_or_else(|| {
            ApiError::not_found(format!("schedule \"{}\" does not exist", id.0))
        })?;
        if !matches!(schedule.repeat, RepeatKind::Triggered) {
            return Err(ApiError::bad_request(format!(
                "schedule \"{}\" is not a triggered schedule",
                id.0
            )));
        }
        let mut updated = (*schedule).clone();
        updated.trigger_fired = true;
        let stored = self.stores.schedules.update(updated).await?;
        self.scheduler.poke();
        Ok(Json(ScheduleView::of(
            &stored,
            self.scheduler.status(&stored),
        )))
    }
}
