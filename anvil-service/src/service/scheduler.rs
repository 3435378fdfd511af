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

//! Time- and event-driven instantiation of configurations.
//!
//! A single driver task sleeps until the next schedule's start time and is
//! woken early by external triggers and by job completions (the signal
//! continuous schedules wait for).

use super::job::{EngineError, JobOrigin, JobService};
use crate::model::configuration::Configuration;
use crate::model::schedule::{RepeatKind, Schedule, ScheduleStatus, ScheduleTarget};
use crate::repo::stores::Stores;
use anvil_common::model::{JobId, ResourceId, ScheduleId};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, warn};

pub struct SchedulerService {
    stores: Stores,
    engine: Arc<dyn JobService>,
    wakeup: Arc<Notify>,
}

impl SchedulerService {
    pub fn new(stores: Stores, engine: Arc<dyn JobService>, wakeup: Arc<Notify>) -> Self {
        Self {
            stores,
            engine,
            wakeup,
        }
    }

    /// Nudges the driver to re-examine the schedule set, e.g. after an edit.
    pub fn poke(&self) {
        self.wakeup.notify_one();
    }

    /// The driver loop; runs until the process stops.
    pub async fn run_driver(self: Arc<Self>) {
        loop {
            if let Err(err) = self.tick(Utc::now()).await {
                error!("Schedule processing failed: {err}");
            }
            match self.next_wake(Utc::now()) {
                Some(duration) => {
                    tokio::select! {
                        _ = self.wakeup.notified() => {}
                        _ = tokio::time::sleep(duration) => {}
                    }
                }
                None => self.wakeup.notified().await,
            }
        }
    }

    /// Time until the earliest future start time, if any schedule has one.
    fn next_wake(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        self.stores
            .schedules
            .values()
            .into_iter()
            .filter(|schedule| !schedule.done && !schedule.suspended)
            .filter_map(|schedule| schedule.start_time)
            .filter(|start| *start > now)
            .min()
            .map(|start| (start - now).to_std().unwrap_or(std::time::Duration::ZERO))
    }

    /// Fires every schedule whose moment has come.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<(), EngineError> {
        for schedule in self.stores.schedules.values() {
            if !schedule.due(now) {
                continue;
            }
            match &schedule.repeat {
                RepeatKind::Triggered if !schedule.trigger_fired => continue,
                RepeatKind::Continuously { .. } if !self.last_jobs_final(&schedule) => {
                    // Backpressure: the previous batch is still running.
                    continue;
                }
                _ => {}
            }

            let configs = self.matching_configs(&schedule.target);
            let mut created: Vec<JobId> = Vec::new();
            for config in &configs {
                if let Err(err) = self.engine.config_valid(config) {
                    warn!(
                        "Schedule {} skips configuration {}: {err}",
                        schedule.id, config.id
                    );
                    continue;
                }
                let job = self
                    .engine
                    .create_job(
                        config,
                        JobOrigin {
                            owner: schedule.owner.clone(),
                            config_id: Some(config.id.clone()),
                            schedule_id: Some(schedule.id.clone()),
                            comment: None,
                        },
                    )
                    .await?;
                created.push(job.id.clone());
            }

            if created.is_empty() {
                // Nothing could start; leave the schedule as is so the next
                // tick retries.
                continue;
            }

            info!(
                "Schedule {} started {} job(s)",
                schedule.id,
                created.len()
            );
            let mut updated = (*schedule).clone();
            updated.last_started = Some(now);
            updated.last_jobs = created;
            updated.trigger_fired = false;
            updated.advance(now);
            self.stores.schedules.update(updated).await?;
        }
        Ok(())
    }

    fn last_jobs_final(&self, schedule: &Schedule) -> bool {
        schedule.last_jobs.iter().all(|job_id| {
            self.engine
                .get(job_id)
                .map(|job| self.engine.is_final(&job))
                .unwrap_or(true)
        })
    }

    fn matching_configs(&self, target: &ScheduleTarget) -> Vec<Arc<Configuration>> {
        match target {
            ScheduleTarget::Config { config_id } => self
                .stores
                .configs
                .get(config_id.as_str())
                .into_iter()
                .collect(),
            ScheduleTarget::Tag { key, value } => self
                .stores
                .configs
                .values()
                .into_iter()
                .filter(|config| config.has_tag(key, value))
                .collect(),
        }
    }

    /// Raises the trigger flag on every schedule listening for one of the
    /// given branches and wakes the driver. Returns the triggered ids.
    pub async fn trigger(
        &self,
        repo_id: &ResourceId,
        branches: &BTreeSet<String>,
    ) -> Result<Vec<ScheduleId>, EngineError> {
        let values: BTreeSet<String> = branches
            .iter()
            .map(|branch| format!("{repo_id}/{branch}"))
            .collect();

        let mut triggered = Vec::new();
        for schedule in self.stores.schedules.values() {
            if schedule.done || schedule.trigger_fired {
                continue;
            }
            if schedule.trigger_filters.is_disjoint(&values) {
                continue;
            }
            let mut updated = (*schedule).clone();
            updated.trigger_fired = true;
            self.stores.schedules.update(updated).await?;
            triggered.push(schedule.id.clone());
        }
        if !triggered.is_empty() {
            self.wakeup.notify_one();
        }
        Ok(triggered)
    }

    /// Presentation status; computed, never stored.
    pub fn status(&self, schedule: &Schedule) -> ScheduleStatus {
        if schedule.done {
            return ScheduleStatus::Done;
        }
        if schedule.suspended {
            return ScheduleStatus::Suspended;
        }
        let configs = self.matching_configs(&schedule.target);
        if configs.is_empty() {
            return match &schedule.target {
                ScheduleTarget::Tag { .. } => ScheduleStatus::Warning,
                ScheduleTarget::Config { .. } => ScheduleStatus::Error,
            };
        }
        if configs
            .iter()
            .any(|config| self.engine.config_valid(config).is_err())
        {
            return ScheduleStatus::Error;
        }
        if !self.last_jobs_final(schedule) {
            return ScheduleStatus::Running;
        }
        ScheduleStatus::Ok
    }
}
