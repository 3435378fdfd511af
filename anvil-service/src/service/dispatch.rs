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

//! Serves the agent long-poll protocol: reconciles what an agent believes it
//! is doing with what the controller believes, then hands out new work.
//!
//! Syncs of one agent are serialised against each other; syncs of different
//! agents run concurrently and only meet inside the engine's state lock
//! during assignment.

use super::job::{EngineError, JobService, TaskDoneOutcome};
use crate::config::SyncConfig;
use crate::metrics::Metrics;
use crate::model::definitions::TASK_RUNNER_TYPE;
use crate::model::protocol::{
    AbortPayload, ExitPayload, ShadowAssignmentPayload, ShadowReport, SyncRequest, SyncResponse,
    TaskReport, WaitPayload,
};
use crate::model::resource::{Resource, RunnerState};
use crate::model::RunState;
use crate::repo::stores::Stores;
use anvil_common::model::ResourceId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct DispatcherService {
    stores: Stores,
    engine: Arc<dyn JobService>,
    sync_config: SyncConfig,
    metrics: Arc<Metrics>,
    runner_locks: std::sync::Mutex<HashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>>,
}

impl DispatcherService {
    pub fn new(
        stores: Stores,
        engine: Arc<dyn JobService>,
        sync_config: SyncConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            stores,
            engine,
            sync_config,
            metrics,
            runner_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn runner_lock(&self, runner_id: &ResourceId) -> Arc<tokio::sync::Mutex<()>> {
        self.runner_locks
            .lock()
            .expect("runner lock table poisoned")
            .entry(runner_id.clone())
            .or_default()
            .clone()
    }

    fn load_runner(&self, runner_id: &ResourceId) -> Result<Arc<Resource>, EngineError> {
        let resource = self
            .stores
            .resources
            .get(runner_id.as_str())
            .ok_or_else(|| {
                EngineError::InvalidRequest(format!("agent \"{runner_id}\" is not registered"))
            })?;
        if resource.res_type.as_str() != TASK_RUNNER_TYPE {
            return Err(EngineError::InvalidRequest(format!(
                "resource \"{runner_id}\" is not an execution agent"
            )));
        }
        Ok(resource)
    }

    async fn update_runner_state(
        &self,
        current: &Arc<Resource>,
        mutate: impl FnOnce(&mut RunnerState),
    ) -> Result<Arc<Resource>, EngineError> {
        let mut record = (**current).clone();
        if let Some(state) = record.runner_state_mut() {
            mutate(state);
        }
        Ok(self.stores.resources.update(record).await?)
    }

    /// One long-poll round trip of one agent.
    pub async fn sync(
        &self,
        runner_id: &ResourceId,
        request: SyncRequest,
    ) -> Result<SyncResponse, EngineError> {
        self.metrics.sync_requests.inc();
        if &request.runner_id != runner_id {
            return Err(EngineError::InvalidRequest(format!(
                "token authenticates agent \"{runner_id}\", request names \"{}\"",
                request.runner_id
            )));
        }

        let lock = self.runner_lock(runner_id);
        let _guard = lock.lock().await;
        let now = Utc::now();

        let resource = self.load_runner(runner_id)?;
        let mut record = (*resource).clone();
        record.capabilities = request.capabilities.clone();
        if let Some(state) = record.runner_state_mut() {
            state.last_sync = Some(now);
            state.runner_version = request.runner_version.clone();
            state.exit_on_idle = request.exit_on_idle;
        }
        let mut current = self.stores.resources.update(record).await?;

        // Reconcile the reported run against the controller's view.
        let believed = current
            .runner_state()
            .and_then(|state| state.running_run.clone());
        match (&request.run, &believed) {
            (Some(reported), Some(ours)) if reported.run_id == ours.run_id => {
                if self.abort_requested(reported, now).await? {
                    return Ok(SyncResponse::Abort(AbortPayload {}));
                }
                // Agent is busy; check back soon.
                return Ok(SyncResponse::Wait(WaitPayload {
                    seconds: self.sync_config.eager_wait_secs,
                }));
            }
            (Some(reported), ours) => {
                // The controller has no record of what the agent is running:
                // the run is not authoritative and must stop.
                if let Some(ours) = ours {
                    self.engine.abandon_run(ours, now).await?;
                }
                self.update_runner_state(&current, |state| state.running_run = None)
                    .await?;
                warn!(
                    "Agent {runner_id} reports unknown run {}; telling it to abort",
                    reported.run_id
                );
                return Ok(SyncResponse::Abort(AbortPayload {}));
            }
            (None, Some(ours)) => {
                // Agent reports idle while a run was assigned: the run is
                // over, one way or the other.
                self.engine.abandon_run(ours, now).await?;
                current = self
                    .update_runner_state(&current, |state| state.running_run = None)
                    .await?;
            }
            (None, None) => {}
        }

        // Reconcile the reported shadow run.
        let believed_shadow = current
            .runner_state()
            .and_then(|state| state.shadow_run.clone());
        match (&request.shadow_run, &believed_shadow) {
            (Some(reported), Some(ours)) if reported == ours => {
                let running = self
                    .stores
                    .shadow_runs
                    .get(reported.as_str())
                    .is_some_and(|shadow| shadow.state == RunState::Running);
                if running {
                    return Ok(SyncResponse::Wait(WaitPayload {
                        seconds: self.sync_config.eager_wait_secs,
                    }));
                }
                return Ok(SyncResponse::Abort(AbortPayload {}));
            }
            (Some(_), _) => {
                return Ok(SyncResponse::Abort(AbortPayload {}));
            }
            (None, Some(ours)) => {
                let dropped = self
                    .stores
                    .shadow_runs
                    .get(ours.as_str())
                    .is_some_and(|shadow| shadow.state == RunState::Running);
                if dropped {
                    self.engine.abandon_shadow(ours, now).await?;
                }
                current = self
                    .update_runner_state(&current, |state| state.shadow_run = None)
                    .await?;
            }
            (None, None) => {}
        }

        // The agent is idle now.
        if request.exit_on_idle {
            self.update_runner_state(&current, |state| state.exit_on_idle = false)
                .await?;
            debug!("Agent {runner_id} released to exit");
            return Ok(SyncResponse::Exit(ExitPayload {}));
        }

        // Extractions bound to this agent come before new work.
        if let Some(shadow) = self.engine.waiting_shadow_for(runner_id) {
            let started = self.engine.start_shadow(&shadow.id, now).await?;
            if let Some(payload) = self.shadow_payload(&started) {
                self.update_runner_state(&current, |state| {
                    state.shadow_run = Some(started.id.clone())
                })
                .await?;
                return Ok(SyncResponse::ShadowAssignment(payload));
            }
            // The parent job vanished; write the extraction off.
            self.engine.abandon_shadow(&started.id, now).await?;
        }

        if let Some(assignment) = self.engine.find_assignment(&current, now).await? {
            self.update_runner_state(&current, |state| {
                state.running_run = Some(assignment.run.clone())
            })
            .await?;
            return Ok(SyncResponse::Assignment(assignment));
        }

        let seconds = if self.engine.unfinished_ids().is_empty() {
            self.sync_config.idle_wait_secs
        } else {
            self.sync_config.eager_wait_secs
        };
        Ok(SyncResponse::Wait(WaitPayload { seconds }))
    }

    /// Completion report for a task run, forwarded to the engine; clears the
    /// agent's bookkeeping and parks a created extraction for its next sync.
    pub async fn task_done(
        &self,
        runner_id: &ResourceId,
        report: TaskReport,
    ) -> Result<TaskDoneOutcome, EngineError> {
        let lock = self.runner_lock(runner_id);
        let _guard = lock.lock().await;
        let now = Utc::now();

        let outcome = self.engine.task_done(runner_id, report, now).await?;

        if let Ok(resource) = self.load_runner(runner_id) {
            let shadow = outcome.shadow.clone();
            self.update_runner_state(&resource, |state| {
                state.running_run = None;
                state.shadow_run = shadow;
            })
            .await?;
        }
        Ok(outcome)
    }

    pub async fn shadow_done(
        &self,
        runner_id: &ResourceId,
        report: ShadowReport,
    ) -> Result<(), EngineError> {
        let lock = self.runner_lock(runner_id);
        let _guard = lock.lock().await;
        let now = Utc::now();

        let shadow_id = report.shadow_id.clone();
        self.engine.shadow_done(runner_id, report, now).await?;

        if let Ok(resource) = self.load_runner(runner_id) {
            self.update_runner_state(&resource, |state| {
                if state.shadow_run.as_ref() == Some(&shadow_id) {
                    state.shadow_run = None;
                }
            })
            .await?;
        }
        Ok(())
    }

    async fn abort_requested(
        &self,
        run: &crate::model::resource::RunRef,
        _now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let Some(job) = self.engine.get(&run.job_id) else {
            return Ok(true);
        };
        let Some(task) = job.tasks.get(&run.task_name) else {
            return Ok(true);
        };
        let current = task.current_run();
        if current.id != run.run_id || current.state != RunState::Running {
            // The run the agent is executing is no longer the active one.
            return Ok(true);
        }
        Ok(current.abort_requested)
    }

    fn shadow_payload(
        &self,
        shadow: &crate::model::job::ShadowRun,
    ) -> Option<ShadowAssignmentPayload> {
        let job = self.engine.get(&shadow.job_id)?;
        let task = job.tasks.get(&shadow.task_name)?;
        Some(ShadowAssignmentPayload {
            shadow_id: shadow.id.clone(),
            job_id: shadow.job_id.clone(),
            task_name: shadow.task_name.clone(),
            run_id: shadow.run_id.clone(),
            wrapper: task.wrapper.clone(),
            params: task.params.clone(),
        })
    }
}
