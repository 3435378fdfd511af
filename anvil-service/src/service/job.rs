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

//! The job lifecycle engine: instantiates configurations into jobs, drives
//! the task state machines, propagates product availability and detects
//! termination.
//!
//! All mutating entry points serialise on one internal lock, so assignment
//! is linearisable across agents and user actions (abort, retry) cannot
//! interleave with a sync halfway through a state change.

use super::broker::{ResourceBroker, WaitReason};
use super::definitions::{DefinitionError, DefinitionService};
use super::notification::Notifier;
use super::results::ResultsStore;
use crate::metrics::Metrics;
use crate::model::definitions::{ProductType, TIMEOUT_PARAM};
use crate::model::job::{Job, Product, ShadowRun, Task, TaskRun};
use crate::model::protocol::{AssignmentPayload, ShadowReport, TaskReport};
use crate::model::resource::{Resource, RunRef};
use crate::model::{configuration::Configuration, ProductState, ResultCode, RunState};
use crate::repo::query::UnfinishedJobQueue;
use crate::repo::stores::Stores;
use crate::repo::{RecordObserver, RepoError};
use anvil_common::model::{
    ConfigId, JobId, ProductDefId, ResourceId, ScheduleId, ShadowRunId, TaskRunId, UserId,
};
use anvil_common::SafeDisplay;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Client-supplied data is malformed or references missing entities.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The reporter does not hold the active run (or reported it already).
    #[error("run mismatch: {0}")]
    Mismatch(String),
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Internal(#[from] RepoError),
}

impl SafeDisplay for EngineError {
    fn to_safe_string(&self) -> String {
        match self {
            EngineError::Definition(inner) => inner.to_safe_string(),
            EngineError::Internal(inner) => inner.to_safe_string(),
            other => other.to_string(),
        }
    }
}

/// How the job came to exist.
#[derive(Debug, Clone, Default)]
pub struct JobOrigin {
    pub owner: Option<UserId>,
    pub config_id: Option<ConfigId>,
    pub schedule_id: Option<ScheduleId>,
    pub comment: Option<String>,
}

/// What happened to an abort request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, poem_openapi::Enum)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum AbortOutcome {
    /// The attempt had not started; it was cancelled on the spot.
    Cancelled,
    /// The agent will be told to abort on its next sync.
    Pending,
    /// The task had already reached a terminal state.
    AlreadyDone,
}

/// Result of processing a completion report.
#[derive(Debug, Clone)]
pub struct TaskDoneOutcome {
    /// Extraction queued for the same agent, if the framework wants one.
    pub shadow: Option<ShadowRunId>,
}

#[async_trait]
pub trait JobService: Send + Sync {
    /// Instantiates a configuration into a job. The configuration does not
    /// have to be stored; ad hoc submissions pass one inline.
    async fn create_job(
        &self,
        config: &Configuration,
        origin: JobOrigin,
    ) -> Result<Arc<Job>, EngineError>;

    fn get(&self, id: &JobId) -> Option<Arc<Job>>;

    fn jobs(&self) -> Vec<Arc<Job>>;

    fn unfinished_ids(&self) -> Vec<JobId>;

    /// A job is final iff every task and every extraction of it terminated.
    fn is_final(&self, job: &Job) -> bool;

    /// Checks that every external input has a locator (or is a token) and
    /// every local input is bound to an agent.
    fn config_valid(&self, config: &Configuration) -> Result<(), EngineError>;

    /// Offers the oldest ready task the agent can execute, reserving its
    /// whole resource claim. Returns `None` when nothing matches; that is
    /// not an error.
    async fn find_assignment(
        &self,
        runner: &Arc<Resource>,
        now: DateTime<Utc>,
    ) -> Result<Option<AssignmentPayload>, EngineError>;

    async fn task_done(
        &self,
        runner_id: &ResourceId,
        report: TaskReport,
        now: DateTime<Utc>,
    ) -> Result<TaskDoneOutcome, EngineError>;

    async fn shadow_done(
        &self,
        runner_id: &ResourceId,
        report: ShadowReport,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// The agent reported idle while the controller believed it was running:
    /// the run is over, one way or the other.
    async fn abandon_run(&self, run: &RunRef, now: DateTime<Utc>) -> Result<(), EngineError>;

    async fn abort_task(
        &self,
        job_id: &JobId,
        task_name: &str,
        user: Option<&UserId>,
        now: DateTime<Utc>,
    ) -> Result<AbortOutcome, EngineError>;

    /// Appends a fresh attempt to a finished task without resetting upstream
    /// products.
    async fn retry_task(
        &self,
        job_id: &JobId,
        task_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Arc<Job>, EngineError>;

    /// The oldest waiting extraction bound to the given agent.
    fn waiting_shadow_for(&self, runner_id: &ResourceId) -> Option<Arc<ShadowRun>>;

    async fn start_shadow(
        &self,
        shadow_id: &ShadowRunId,
        now: DateTime<Utc>,
    ) -> Result<Arc<ShadowRun>, EngineError>;

    /// The agent an extraction was bound to dropped it; record the failure
    /// so the parent job can still terminate.
    async fn abandon_shadow(
        &self,
        shadow_id: &ShadowRunId,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// Why a waiting task has not been dispatched yet.
    fn why_waiting(
        &self,
        job_id: &JobId,
        task_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<WaitReason>, EngineError>;
}

pub struct JobServiceDefault {
    stores: Stores,
    definitions: Arc<dyn DefinitionService>,
    broker: ResourceBroker,
    results: ResultsStore,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
    /// Wakes the scheduler driver when a job reaches its final state.
    scheduler_wakeup: Arc<Notify>,
    unfinished: Arc<UnfinishedJobQueue>,
    // The queue registration is weak; keep the observer alive.
    _queue_observer: Arc<dyn RecordObserver<Job>>,
    id_gen: JobIdGenerator,
    state_lock: tokio::sync::Mutex<()>,
}

impl JobServiceDefault {
    pub fn new(
        stores: Stores,
        definitions: Arc<dyn DefinitionService>,
        broker: ResourceBroker,
        results: ResultsStore,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<Metrics>,
        scheduler_wakeup: Arc<Notify>,
    ) -> Self {
        let (unfinished, queue_observer) = UnfinishedJobQueue::attach(&stores.jobs);
        Self {
            stores,
            definitions,
            broker,
            results,
            notifier,
            metrics,
            scheduler_wakeup,
            unfinished,
            _queue_observer: queue_observer,
            id_gen: JobIdGenerator::default(),
            state_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Resolves the product definitions a configuration touches and splits
    /// them into external inputs and produced outputs.
    fn resolve_products(
        &self,
        config: &Configuration,
    ) -> Result<ResolvedProducts, EngineError> {
        let mut inputs: BTreeSet<ProductDefId> = BTreeSet::new();
        let mut outputs: BTreeSet<ProductDefId> = BTreeSet::new();
        for template in config.tasks.values() {
            let def = self
                .stores
                .task_defs
                .get(template.task_def.as_str())
                .ok_or_else(|| {
                    EngineError::InvalidRequest(format!(
                        "task definition \"{}\" does not exist",
                        template.task_def
                    ))
                })?;
            let framework = self.definitions.framework_of(&def)?;
            inputs.extend(framework.inputs.iter().cloned());
            outputs.extend(framework.outputs.iter().cloned());
        }
        let external: BTreeSet<ProductDefId> =
            inputs.difference(&outputs).cloned().collect();
        Ok(ResolvedProducts {
            all: inputs.union(&outputs).cloned().collect(),
            external,
        })
    }

    fn product_record(
        &self,
        name: &ProductDefId,
        config: &Configuration,
        external: bool,
    ) -> Result<Product, EngineError> {
        let def = self.stores.product_defs.get(name.as_str()).ok_or_else(|| {
            EngineError::InvalidRequest(format!("product \"{name}\" does not exist"))
        })?;
        let input = config.inputs.get(name);
        let mut product = Product {
            name: name.clone(),
            product_type: def.product_type,
            local: def.local,
            combined: def.combined,
            state: ProductState::Waiting,
            local_at: input.and_then(|spec| spec.local_at.clone()),
            locator: None,
            producers: BTreeMap::new(),
        };
        if external {
            if def.product_type == ProductType::Token {
                // A token input carries no data; it is available by decree.
                product.locator = Some(crate::model::job::TOKEN_LOCATOR.to_string());
                product.state = ProductState::Done;
            } else if let Some(locator) = input.and_then(|spec| spec.locator.clone()) {
                product.locator = Some(locator);
                product.state = ProductState::Done;
            } else if def.local && product.local_at.is_some() {
                // Local inputs live on the bound agent; the binding is the
                // availability.
                product.state = ProductState::Done;
            }
        }
        Ok(product)
    }

    async fn store_new_job(&self, mut job: Job, now: DateTime<Utc>) -> Result<Arc<Job>, EngineError> {
        // The id is derived from the creation time plus a sequence number;
        // collisions can only happen across a restart within one second, in
        // which case we simply draw again.
        loop {
            job.id = self.id_gen.next(now);
            match self.stores.jobs.add(job.clone()).await {
                Ok(stored) => return Ok(stored),
                Err(RepoError::Duplicate { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn job_shadow_runs(&self, job_id: &JobId) -> Vec<Arc<ShadowRun>> {
        self.stores
            .shadow_runs
            .values()
            .into_iter()
            .filter(|shadow| &shadow.job_id == job_id)
            .collect()
    }

    /// Checks for termination and performs the end-of-job effects exactly
    /// once: releasing per-job reservations, notifying, waking the
    /// scheduler.
    async fn finalize_if_terminal(&self, job: &Job) -> Result<(), EngineError> {
        if !job.tasks_terminal() {
            return Ok(());
        }
        if !self
            .job_shadow_runs(&job.id)
            .iter()
            .all(|shadow| shadow.state.is_terminal())
        {
            return Ok(());
        }
        self.broker.release_job(&job.all_run_ids()).await?;
        self.metrics.jobs_finished.inc();
        info!("Job {} finished with result {}", job.id, job.result());
        self.notifier.job_finished(job).await;
        self.scheduler_wakeup.notify_one();
        Ok(())
    }

    fn assignment_payload(job: &Job, task: &Task, resources: &BTreeMap<String, Arc<Resource>>) -> AssignmentPayload {
        let mut inputs = BTreeMap::new();
        for name in &task.inputs {
            if let Some(locator) = job.products.get(name).and_then(|p| p.locator.clone()) {
                inputs.insert(name.0.clone(), locator);
            }
        }
        AssignmentPayload {
            run: RunRef {
                job_id: job.id.clone(),
                task_name: task.name.clone(),
                run_id: task.current_run().id.clone(),
            },
            wrapper: task.wrapper.clone(),
            params: task.params.clone(),
            inputs,
            outputs: task.outputs.iter().map(|name| name.0.clone()).collect(),
            resources: resources
                .iter()
                .map(|(reference, resource)| (reference.clone(), resource.locator.clone()))
                .collect(),
            timeout_minutes: task.timeout_minutes,
        }
    }
}

struct ResolvedProducts {
    all: BTreeSet<ProductDefId>,
    external: BTreeSet<ProductDefId>,
}

#[async_trait]
impl JobService for JobServiceDefault {
    async fn create_job(
        &self,
        config: &Configuration,
        origin: JobOrigin,
    ) -> Result<Arc<Job>, EngineError> {
        let _state = self.state_lock.lock().await;
        let now = Utc::now();

        self.config_valid(config)?;
        let products = self.resolve_products(config)?;
        let project = self.stores.project.get();

        let mut tasks = indexmap::IndexMap::new();
        for (name, template) in &config.tasks {
            let snapshot = self.definitions.snapshot(&template.task_def).await?;
            let mut params = self.definitions.effective_params(&snapshot.task_def)?;
            for (key, value) in config.params.iter().chain(template.params.iter()) {
                if self.definitions.is_final(&snapshot.task_def, key)? {
                    debug!("Ignoring override of final parameter {key} in {name}");
                } else {
                    params.insert(key.clone(), value.clone());
                }
            }
            let timeout_minutes = params
                .get(TIMEOUT_PARAM)
                .and_then(|value| value.parse::<u32>().ok())
                .filter(|minutes| *minutes > 0);
            let claim = self.definitions.resource_claim(&snapshot.task_def)?;
            let task = Task {
                name: name.clone(),
                task_def: snapshot.task_def.id.clone(),
                def_key: snapshot.def_key,
                framework: snapshot.framework.id.clone(),
                framework_key: snapshot.framework_key,
                priority: project.clamp_priority(template.priority),
                params,
                runners: template.runners.clone(),
                inputs: snapshot.framework.inputs.clone(),
                outputs: snapshot.framework.outputs.clone(),
                wrapper: snapshot.framework.wrapper(),
                extractor: snapshot.framework.extractor(),
                timeout_minutes,
                claim,
                runs: vec![TaskRun::new(new_run_id())],
            };
            tasks.insert(name.clone(), task);
        }

        let mut product_map = BTreeMap::new();
        for name in &products.all {
            let product =
                self.product_record(name, config, products.external.contains(name))?;
            product_map.insert(name.clone(), product);
        }

        let mut job = Job {
            id: JobId::new("pending"),
            created_at: now,
            owner: origin.owner,
            target: config.target.clone(),
            config_id: origin.config_id,
            schedule_id: origin.schedule_id,
            comment: origin.comment.unwrap_or_else(|| config.comment.clone()),
            params: config.params.clone(),
            tasks,
            products: product_map,
            runners: config.runners.clone(),
        };
        job.propagate_blocking(now);

        let stored = self.store_new_job(job, now).await?;
        self.metrics.jobs_created.inc();
        info!(
            "Created job {} with {} task(s)",
            stored.id,
            stored.tasks.len()
        );
        self.finalize_if_terminal(&stored).await?;
        Ok(stored)
    }

    fn get(&self, id: &JobId) -> Option<Arc<Job>> {
        self.stores.jobs.get(id.as_str())
    }

    fn jobs(&self) -> Vec<Arc<Job>> {
        self.stores.jobs.values()
    }

    fn unfinished_ids(&self) -> Vec<JobId> {
        self.unfinished.ids()
    }

    fn is_final(&self, job: &Job) -> bool {
        job.tasks_terminal()
            && self
                .job_shadow_runs(&job.id)
                .iter()
                .all(|shadow| shadow.state.is_terminal())
    }

    fn config_valid(&self, config: &Configuration) -> Result<(), EngineError> {
        let products = self.resolve_products(config)?;
        for name in &products.external {
            let def = self.stores.product_defs.get(name.as_str()).ok_or_else(|| {
                EngineError::InvalidRequest(format!("product \"{name}\" does not exist"))
            })?;
            if def.product_type == ProductType::Token {
                continue;
            }
            let input = config.inputs.get(name);
            if def.local {
                if input.and_then(|spec| spec.local_at.as_ref()).is_none() {
                    return Err(EngineError::InvalidRequest(format!(
                        "local input \"{name}\" has no agent assigned"
                    )));
                }
            } else if input.and_then(|spec| spec.locator.as_ref()).is_none() {
                return Err(EngineError::InvalidRequest(format!(
                    "input \"{name}\" has no locator"
                )));
            }
        }
        Ok(())
    }

    async fn find_assignment(
        &self,
        runner: &Arc<Resource>,
        now: DateTime<Utc>,
    ) -> Result<Option<AssignmentPayload>, EngineError> {
        let _state = self.state_lock.lock().await;

        for job_id in self.unfinished.ids() {
            let Some(job) = self.stores.jobs.get(job_id.as_str()) else {
                continue;
            };
            if let Some(target) = &job.target {
                if !runner.capabilities.contains(target) {
                    continue;
                }
            }
            let candidates: Vec<String> = job
                .ready_tasks()
                .into_iter()
                .filter(|task| job.admits_runner(task, &runner.id))
                .map(|task| task.name.clone())
                .collect();
            for task_name in candidates {
                let task = &job.tasks[&task_name];
                let run_id = task.current_run().id.clone();
                let Some(resources) = self
                    .broker
                    .reserve(&task.claim, runner, &run_id, now)
                    .await?
                else {
                    continue;
                };

                let mut updated = (*job).clone();
                {
                    let task = updated
                        .tasks
                        .get_mut(&task_name)
                        .expect("task exists in cloned job");
                    let run = task.current_run_mut();
                    run.state = RunState::Running;
                    run.runner = Some(runner.id.clone());
                    run.started_at = Some(now);
                }
                let stored = self.stores.jobs.update(updated).await?;
                let task = &stored.tasks[&task_name];
                let payload = Self::assignment_payload(&stored, task, &resources);
                self.metrics.tasks_dispatched.inc();
                debug!(
                    "Assigned task {task_name} of job {} to agent {}",
                    stored.id, runner.id
                );
                return Ok(Some(payload));
            }
        }
        Ok(None)
    }

    async fn task_done(
        &self,
        runner_id: &ResourceId,
        report: TaskReport,
        now: DateTime<Utc>,
    ) -> Result<TaskDoneOutcome, EngineError> {
        let _state = self.state_lock.lock().await;

        let job = self
            .stores
            .jobs
            .get(report.job_id.as_str())
            .ok_or_else(|| EngineError::JobNotFound(report.job_id.clone()))?;
        let task = job.tasks.get(&report.task_name).ok_or_else(|| {
            EngineError::InvalidRequest(format!(
                "job {} has no task \"{}\"",
                job.id, report.task_name
            ))
        })?;

        // All validation happens before the first mutation.
        let run = task.current_run();
        if run.state != RunState::Running {
            return Err(EngineError::Mismatch(format!(
                "task \"{}\" has no active run",
                report.task_name
            )));
        }
        if run.runner.as_ref() != Some(runner_id) {
            return Err(EngineError::Mismatch(format!(
                "run {} is not held by agent {runner_id}",
                run.id
            )));
        }
        if let Some(reported_run) = &report.run_id {
            if reported_run != &run.id {
                return Err(EngineError::Mismatch(format!(
                    "run {reported_run} is not the active run of task \"{}\"",
                    report.task_name
                )));
            }
        }
        for output in report.outputs.keys() {
            if !task.outputs.contains(&ProductDefId::new(output.clone())) {
                return Err(EngineError::InvalidRequest(format!(
                    "task \"{}\" does not produce \"{output}\"",
                    report.task_name
                )));
            }
        }

        let result: ResultCode = report.result.into();
        let run_id = run.id.clone();
        let wants_shadow = task.extractor && result != ResultCode::Error;

        let mut updated = (*job).clone();
        {
            let task = updated
                .tasks
                .get_mut(&report.task_name)
                .expect("validated above");
            let run = task.current_run_mut();
            run.state = RunState::Done;
            run.result = Some(result);
            run.summary = report.summary.clone();
            run.report_url = report.report.clone();
            run.stopped_at = Some(now);
            run.alert = result >= ResultCode::Inspect;
        }
        for (output, locator) in &report.outputs {
            let product = updated
                .products
                .get_mut(&ProductDefId::new(output.clone()))
                .expect("outputs are declared products");
            product.store_locator(locator, &report.task_name);
            product.done();
            if product.local && product.local_at.is_none() {
                product.local_at = Some(runner_id.clone());
            }
        }
        updated.propagate_blocking(now);

        if !report.data.is_empty() {
            let task_def = updated.tasks[&report.task_name].task_def.clone();
            self.results
                .put_data(task_def.as_str(), run_id.as_str(), &report.data)
                .await?;
        }

        let shadow = if wants_shadow {
            let shadow = ShadowRun {
                id: new_shadow_id(),
                job_id: updated.id.clone(),
                task_name: report.task_name.clone(),
                run_id: run_id.clone(),
                runner: runner_id.clone(),
                created_at: now,
                started_at: None,
                stopped_at: None,
                state: RunState::Waiting,
                result: None,
            };
            let task = updated
                .tasks
                .get_mut(&report.task_name)
                .expect("validated above");
            task.current_run_mut().shadow_run = Some(shadow.id.clone());
            Some(self.stores.shadow_runs.add(shadow).await?)
        } else {
            None
        };

        let stored = self.stores.jobs.update(updated).await?;
        self.broker.release_task(&run_id).await?;
        self.finalize_if_terminal(&stored).await?;

        Ok(TaskDoneOutcome {
            shadow: shadow.map(|s| s.id.clone()),
        })
    }

    async fn shadow_done(
        &self,
        runner_id: &ResourceId,
        report: ShadowReport,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let _state = self.state_lock.lock().await;

        let shadow = self
            .stores
            .shadow_runs
            .get(report.shadow_id.as_str())
            .ok_or_else(|| {
                EngineError::InvalidRequest(format!(
                    "shadow run {} does not exist",
                    report.shadow_id
                ))
            })?;
        if shadow.state != RunState::Running {
            return Err(EngineError::Mismatch(format!(
                "shadow run {} is not running",
                shadow.id
            )));
        }
        if &shadow.runner != runner_id {
            return Err(EngineError::Mismatch(format!(
                "shadow run {} is not held by agent {runner_id}",
                shadow.id
            )));
        }

        let mut updated = (*shadow).clone();
        updated.state = RunState::Done;
        updated.result = Some(report.result.into());
        updated.stopped_at = Some(now);
        let stored = self.stores.shadow_runs.update(updated).await?;

        if !report.data.is_empty() {
            if let Some(job) = self.stores.jobs.get(stored.job_id.as_str()) {
                if let Some(task) = job.tasks.get(&stored.task_name) {
                    self.results
                        .put_data(
                            task.task_def.as_str(),
                            stored.run_id.as_str(),
                            &report.data,
                        )
                        .await?;
                }
            }
        }

        if let Some(job) = self.stores.jobs.get(stored.job_id.as_str()) {
            self.finalize_if_terminal(&job).await?;
        }
        Ok(())
    }

    async fn abandon_run(&self, run: &RunRef, now: DateTime<Utc>) -> Result<(), EngineError> {
        let _state = self.state_lock.lock().await;

        let Some(job) = self.stores.jobs.get(run.job_id.as_str()) else {
            return Ok(());
        };
        let Some(task) = job.tasks.get(&run.task_name) else {
            return Ok(());
        };
        let current = task.current_run();
        if current.id != run.run_id || current.state != RunState::Running {
            return Ok(());
        }
        let aborting = current.abort_requested;

        let mut updated = (*job).clone();
        {
            let task = updated
                .tasks
                .get_mut(&run.task_name)
                .expect("checked above");
            let current = task.current_run_mut();
            if aborting {
                current.state = RunState::Cancelled;
                current.result = Some(ResultCode::Cancelled);
                current.summary = Some("aborted on user request".to_string());
            } else {
                current.state = RunState::Done;
                current.result = Some(ResultCode::Error);
                current.summary = Some("run abandoned: agent reported idle".to_string());
                current.alert = true;
            }
            current.stopped_at = Some(now);
        }
        updated.propagate_blocking(now);
        let stored = self.stores.jobs.update(updated).await?;
        self.broker.release_task(&run.run_id).await?;
        warn!(
            "Run {} of job {} ended without a report ({})",
            run.run_id,
            run.job_id,
            if aborting { "aborted" } else { "abandoned" }
        );
        self.finalize_if_terminal(&stored).await?;
        Ok(())
    }

    async fn abort_task(
        &self,
        job_id: &JobId,
        task_name: &str,
        user: Option<&UserId>,
        now: DateTime<Utc>,
    ) -> Result<AbortOutcome, EngineError> {
        let _state = self.state_lock.lock().await;

        let job = self
            .stores
            .jobs
            .get(job_id.as_str())
            .ok_or_else(|| EngineError::JobNotFound(job_id.clone()))?;
        let task = job.tasks.get(task_name).ok_or_else(|| {
            EngineError::InvalidRequest(format!("job {job_id} has no task \"{task_name}\""))
        })?;

        match task.state() {
            RunState::Done | RunState::Cancelled => Ok(AbortOutcome::AlreadyDone),
            RunState::Waiting => {
                let run_id = task.current_run().id.clone();
                let mut updated = (*job).clone();
                {
                    let task = updated.tasks.get_mut(task_name).expect("checked above");
                    let run = task.current_run_mut();
                    run.state = RunState::Cancelled;
                    run.result = Some(ResultCode::Cancelled);
                    run.summary =
                        Some(format!("aborted by {}", display_user(user)));
                    run.stopped_at = Some(now);
                }
                updated.propagate_blocking(now);
                let stored = self.stores.jobs.update(updated).await?;
                self.broker.release_task(&run_id).await?;
                info!("Task {task_name} of job {job_id} cancelled before start");
                self.finalize_if_terminal(&stored).await?;
                Ok(AbortOutcome::Cancelled)
            }
            RunState::Running => {
                let mut updated = (*job).clone();
                {
                    let task = updated.tasks.get_mut(task_name).expect("checked above");
                    task.current_run_mut().abort_requested = true;
                }
                self.stores.jobs.update(updated).await?;
                info!(
                    "Abort of task {task_name} in job {job_id} requested by {}",
                    display_user(user)
                );
                Ok(AbortOutcome::Pending)
            }
        }
    }

    async fn retry_task(
        &self,
        job_id: &JobId,
        task_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Arc<Job>, EngineError> {
        let _state = self.state_lock.lock().await;

        let job = self
            .stores
            .jobs
            .get(job_id.as_str())
            .ok_or_else(|| EngineError::JobNotFound(job_id.clone()))?;
        let task = job.tasks.get(task_name).ok_or_else(|| {
            EngineError::InvalidRequest(format!("job {job_id} has no task \"{task_name}\""))
        })?;
        if !task.is_terminal() {
            return Err(EngineError::InvalidRequest(format!(
                "task \"{task_name}\" is still active"
            )));
        }

        let mut updated = (*job).clone();
        updated
            .tasks
            .get_mut(task_name)
            .expect("checked above")
            .runs
            .push(TaskRun::new(new_run_id()));
        // A retry whose inputs are blocked cancels itself again right away.
        updated.propagate_blocking(now);
        let stored = self.stores.jobs.update(updated).await?;
        info!("Task {task_name} of job {job_id} queued for re-execution");
        Ok(stored)
    }

    fn waiting_shadow_for(&self, runner_id: &ResourceId) -> Option<Arc<ShadowRun>> {
        self.stores
            .shadow_runs
            .values()
            .into_iter()
            .filter(|shadow| &shadow.runner == runner_id && shadow.state == RunState::Waiting)
            .min_by(|a, b| a.created_at.cmp(&b.created_at))
    }

    async fn start_shadow(
        &self,
        shadow_id: &ShadowRunId,
        now: DateTime<Utc>,
    ) -> Result<Arc<ShadowRun>, EngineError> {
        let _state = self.state_lock.lock().await;
        let shadow = self
            .stores
            .shadow_runs
            .get(shadow_id.as_str())
            .ok_or_else(|| {
                EngineError::InvalidRequest(format!("shadow run {shadow_id} does not exist"))
            })?;
        if shadow.state != RunState::Waiting {
            return Err(EngineError::Mismatch(format!(
                "shadow run {shadow_id} is not waiting"
            )));
        }
        let mut updated = (*shadow).clone();
        updated.state = RunState::Running;
        updated.started_at = Some(now);
        Ok(self.stores.shadow_runs.update(updated).await?)
    }

    async fn abandon_shadow(
        &self,
        shadow_id: &ShadowRunId,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let _state = self.state_lock.lock().await;
        let Some(shadow) = self.stores.shadow_runs.get(shadow_id.as_str()) else {
            return Ok(());
        };
        if shadow.state.is_terminal() {
            return Ok(());
        }
        let mut updated = (*shadow).clone();
        updated.state = RunState::Done;
        updated.result = Some(ResultCode::Error);
        updated.stopped_at = Some(now);
        let stored = self.stores.shadow_runs.update(updated).await?;
        warn!("Extraction {} was dropped by its agent", stored.id);
        if let Some(job) = self.stores.jobs.get(stored.job_id.as_str()) {
            self.finalize_if_terminal(&job).await?;
        }
        Ok(())
    }

    fn why_waiting(
        &self,
        job_id: &JobId,
        task_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<WaitReason>, EngineError> {
        let job = self
            .stores
            .jobs
            .get(job_id.as_str())
            .ok_or_else(|| EngineError::JobNotFound(job_id.clone()))?;
        let task = job.tasks.get(task_name).ok_or_else(|| {
            EngineError::InvalidRequest(format!("job {job_id} has no task \"{task_name}\""))
        })?;
        Ok(self.broker.explain(&task.claim, now))
    }
}

fn display_user(user: Option<&UserId>) -> String {
    user.map(|user| user.0.clone())
        .unwrap_or_else(|| "operator".to_string())
}

fn new_run_id() -> TaskRunId {
    TaskRunId::new(Uuid::new_v4().to_string())
}

fn new_shadow_id() -> ShadowRunId {
    ShadowRunId::new(Uuid::new_v4().to_string())
}

/// Sortable job ids: creation timestamp plus a per-second sequence number.
#[derive(Default)]
struct JobIdGenerator {
    last: std::sync::Mutex<(String, u32)>,
}

impl JobIdGenerator {
    fn next(&self, now: DateTime<Utc>) -> JobId {
        let prefix = now.format("%y%m%d-%H%M%S").to_string();
        let mut last = self.last.lock().expect("id lock poisoned");
        if last.0 == prefix {
            last.1 += 1;
        } else {
            *last = (prefix.clone(), 0);
        }
        JobId::new(format!("{prefix}-{:04}", last.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_r::test;

    #[test]
    fn job_ids_sort_by_creation_time() {
        let id_gen = JobIdGenerator::default();
        let t1 = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 1).unwrap();
        let a = id_gen.next(t1);
        let b = id_gen.next(t1);
        let c = id_gen.next(t2);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.as_str(), "260801-100000-0000");
        assert_eq!(b.as_str(), "260801-100000-0001");
    }
}
