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

use super::dto::{ConfigurationDto, JobSummary, JobView};
use super::{authorize, ApiError, ApiResult, ApiTags};
use crate::auth::ApiBasicAuth;
use crate::repo::stores::Stores;
use crate::service::auth::AuthService;
use crate::service::job::{AbortOutcome, JobOrigin, JobService};
use crate::service::results::ResultsStore;
use anvil_common::model::{ConfigId, JobId, Role};
use chrono::Utc;
use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};
use std::sync::Arc;

/// Job submission: either a saved configuration by id, or an inline one for
/// ad hoc execution.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub config_id: Option<ConfigId>,
    pub config: Option<ConfigurationDto>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct AbortResponse {
    pub outcome: AbortOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct WaitReasonsResponse {
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct TaskDataResponse {
    /// `(run id, value)` pairs in run order.
    pub values: Vec<Vec<String>>,
}

pub struct JobsApi {
    pub auth_service: Arc<dyn AuthService>,
    pub job_service: Arc<dyn JobService>,
    pub results: ResultsStore,
    pub stores: Stores,
}

#[OpenApi(prefix_path = "/v1", tag = ApiTags::Jobs)]
impl JobsApi {
    /// List jobs
    #[oai(path = "/jobs", method = "get", operation_id = "list_jobs")]
    async fn list_jobs(&self, auth: ApiBasicAuth) -> ApiResult<Json<Vec<JobSummary>>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        Ok(Json(
            self.job_service
                .jobs()
                .iter()
                .map(|job| JobSummary::of(job, self.job_service.is_final(job)))
                .collect(),
        ))
    }

    /// Submit a job
    #[oai(path = "/jobs", method = "post", operation_id = "create_job")]
    async fn create_job(
        &self,
        request: Json<CreateJobRequest>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<JobView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        let user = authz.require_role(Role::User)?.clone();
        let request = request.0;

        let (config, config_id) = match (request.config_id, request.config) {
            (Some(config_id), None) => {
                let config = self.stores.configs.get(config_id.as_str()).ok_or_else(|| {
                    ApiError::not_found(format!(
                        "configuration \"{config_id}\" does not exist"
                    ))
                })?;
                ((*config).clone(), Some(config_id))
            }
            (None, Some(inline)) => (inline.into_record(Utc::now()), None),
            _ => {
                return Err(ApiError::bad_request(
                    "exactly one of configId / config must be given",
                ))
            }
        };

        let job = self
            .job_service
            .create_job(
                &config,
                JobOrigin {
                    owner: Some(user),
                    config_id,
                    schedule_id: None,
                    comment: request.comment,
                },
            )
            .await?;
        Ok(Json(JobView::of(&job, self.job_service.is_final(&job))))
    }

    /// Get a job
    #[oai(path = "/jobs/:id", method = "get", operation_id = "get_job")]
    async fn get_job(&self, id: Path<JobId>, auth: ApiBasicAuth) -> ApiResult<Json<JobView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        let job = self
            .job_service
            .get(&id.0)
            .ok_or_else(|| ApiError::not_found(format!("job {} does not exist", id.0)))?;
        Ok(Json(JobView::of(&job, self.job_service.is_final(&job))))
    }

    /// Abort a task
    ///
    /// A waiting attempt is cancelled immediately; a running attempt is
    /// aborted through the agent's next sync.
    #[oai(path = "/jobs/:id/tasks/:task/abort", method = "post", operation_id = "abort_task")]
    async fn abort_task(
        &self,
        id: Path<JobId>,
        task: Path<String>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<AbortResponse>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        let user = authz.require_role(Role::User)?.clone();
        let outcome = self
            .job_service
            .abort_task(&id.0, &task.0, Some(&user), Utc::now())
            .await?;
        Ok(Json(AbortResponse { outcome }))
    }

    /// Re-execute a task
    ///
    /// Appends a fresh attempt; upstream products are kept.
    #[oai(path = "/jobs/:id/tasks/:task/retry", method = "post", operation_id = "retry_task")]
    async fn retry_task(
        &self,
        id: Path<JobId>,
        task: Path<String>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<JobView>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::User)?;
        let job = self
            .job_service
            .retry_task(&id.0, &task.0, Utc::now())
            .await?;
        Ok(Json(JobView::of(&job, self.job_service.is_final(&job))))
    }

    /// Why a task is still waiting
    #[oai(
        path = "/jobs/:id/tasks/:task/wait-reasons",
        method = "get",
        operation_id = "get_wait_reasons"
    )]
    async fn get_wait_reasons(
        &self,
        id: Path<JobId>,
        task: Path<String>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<WaitReasonsResponse>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        let reasons = self
            .job_service
            .why_waiting(&id.0, &task.0, Utc::now())?
            .iter()
            .map(|reason| reason.to_string())
            .collect();
        Ok(Json(WaitReasonsResponse { reasons }))
    }

    /// Mid-level data of one task, one key, across its runs
    #[oai(
        path = "/jobs/:id/tasks/:task/data/:key",
        method = "get",
        operation_id = "get_task_data"
    )]
    async fn get_task_data(
        &self,
        id: Path<JobId>,
        task: Path<String>,
        key: Path<String>,
        auth: ApiBasicAuth,
    ) -> ApiResult<Json<TaskDataResponse>> {
        let authz = authorize(&self.auth_service, &auth).await?;
        authz.require_role(Role::Guest)?;
        let job = self
            .job_service
            .get(&id.0)
            .ok_or_else(|| ApiError::not_found(format!("job {} does not exist", id.0)))?;
        let task = job
            .tasks
            .get(&task.0)
            .ok_or_else(|| ApiError::not_found(format!("no task \"{}\" in job {}", task.0, id.0)))?;
        let run_ids: Vec<String> = task.runs.iter().map(|run| run.id.0.clone()).collect();
        let values = self
            .results
            .get_data(task.task_def.as_str(), &run_ids, &key.0)
            .await
            .into_iter()
            .map(|(run, value)| vec![run, value])
            .collect();
        Ok(Json(TaskDataResponse { values }))
    }
}
