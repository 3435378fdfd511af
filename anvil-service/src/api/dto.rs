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

//! Presentation views of the domain records. The record types that need an
//! insertion-ordered task list (configurations, jobs) are mapped to list
//! shaped DTOs here.

use crate::config::SyncConfig;
use crate::model::configuration::{Configuration, InputSpec, TaskTemplate};
use crate::model::job::{Job, Product, Task, TaskRun};
use crate::model::resource::{Reservation, Resource};
use crate::model::schedule::{RepeatKind, Schedule, ScheduleStatus, ScheduleTarget};
use crate::model::{ConnectionStatus, ProductState, ResultCode, RunState, StatusLevel};
use anvil_common::model::{
    ConfigId, JobId, ProductDefId, ResourceId, ScheduleId, TaskDefId, UserId,
};
use chrono::{DateTime, Utc};
use poem_openapi::Object;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct TaskEntry {
    pub name: String,
    pub task_def: TaskDefId,
    #[serde(default)]
    #[oai(default)]
    pub priority: i32,
    #[serde(default)]
    #[oai(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    #[oai(default)]
    pub runners: BTreeSet<ResourceId>,
}

/// Wire shape of a configuration; `tasks` keeps execution-preference order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ConfigurationDto {
    pub id: ConfigId,
    pub owner: Option<UserId>,
    #[serde(default)]
    #[oai(default)]
    pub comment: String,
    pub target: Option<String>,
    #[serde(default)]
    #[oai(default)]
    pub params: BTreeMap<String, String>,
    pub tasks: Vec<TaskEntry>,
    #[serde(default)]
    #[oai(default)]
    pub inputs: BTreeMap<String, InputSpec>,
    #[serde(default)]
    #[oai(default)]
    pub runners: BTreeSet<ResourceId>,
    #[serde(default)]
    #[oai(default)]
    pub tags: BTreeMap<String, BTreeSet<String>>,
}

impl ConfigurationDto {
    pub fn into_record(self, created_at: DateTime<Utc>) -> Configuration {
        Configuration {
            id: self.id,
            owner: self.owner,
            created_at,
            comment: self.comment,
            target: self.target,
            params: self.params,
            tasks: self
                .tasks
                .into_iter()
                .map(|entry| {
                    (
                        entry.name,
                        TaskTemplate {
                            task_def: entry.task_def,
                            priority: entry.priority,
                            params: entry.params,
                            runners: entry.runners,
                        },
                    )
                })
                .collect(),
            inputs: self
                .inputs
                .into_iter()
                .map(|(name, spec)| (ProductDefId::new(name), spec))
                .collect(),
            runners: self.runners,
            tags: self.tags,
        }
    }

    pub fn from_record(config: &Configuration) -> Self {
        Self {
            id: config.id.clone(),
            owner: config.owner.clone(),
            comment: config.comment.clone(),
            target: config.target.clone(),
            params: config.params.clone(),
            tasks: config
                .tasks
                .iter()
                .map(|(name, template)| TaskEntry {
                    name: name.clone(),
                    task_def: template.task_def.clone(),
                    priority: template.priority,
                    params: template.params.clone(),
                    runners: template.runners.clone(),
                })
                .collect(),
            inputs: config
                .inputs
                .iter()
                .map(|(name, spec)| (name.0.clone(), spec.clone()))
                .collect(),
            runners: config.runners.clone(),
            tags: config.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct RunView {
    pub id: String,
    pub state: RunState,
    pub runner: Option<ResourceId>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub result: Option<ResultCode>,
    pub summary: Option<String>,
    pub report_url: Option<String>,
    pub alert: bool,
}

impl RunView {
    fn of(run: &TaskRun) -> Self {
        Self {
            id: run.id.0.clone(),
            state: run.state,
            runner: run.runner.clone(),
            started_at: run.started_at,
            stopped_at: run.stopped_at,
            result: run.result,
            summary: run.summary.clone(),
            report_url: run.report_url.clone(),
            alert: run.alert,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct TaskView {
    pub name: String,
    pub task_def: TaskDefId,
    pub priority: i32,
    pub state: RunState,
    pub result: Option<ResultCode>,
    pub runs: Vec<RunView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ProductView {
    pub name: String,
    pub state: ProductState,
    pub local: bool,
    pub local_at: Option<ResourceId>,
    pub locator: Option<String>,
    pub producers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct JobView {
    pub id: JobId,
    pub created_at: DateTime<Utc>,
    pub owner: Option<UserId>,
    pub target: Option<String>,
    pub config_id: Option<ConfigId>,
    pub schedule_id: Option<ScheduleId>,
    pub comment: String,
    /// Set once every task and extraction terminated.
    pub result: Option<ResultCode>,
    pub tasks: Vec<TaskView>,
    pub products: Vec<ProductView>,
}

impl JobView {
    pub fn of(job: &Job, is_final: bool) -> Self {
        Self {
            id: job.id.clone(),
            created_at: job.created_at,
            owner: job.owner.clone(),
            target: job.target.clone(),
            config_id: job.config_id.clone(),
            schedule_id: job.schedule_id.clone(),
            comment: job.comment.clone(),
            result: is_final.then(|| job.result()),
            tasks: job.tasks.values().map(task_view).collect(),
            products: job.products.values().map(product_view).collect(),
        }
    }
}

fn task_view(task: &Task) -> TaskView {
    TaskView {
        name: task.name.clone(),
        task_def: task.task_def.clone(),
        priority: task.priority,
        state: task.state(),
        result: task.result(),
        runs: task.runs.iter().map(RunView::of).collect(),
    }
}

fn product_view(product: &Product) -> ProductView {
    ProductView {
        name: product.name.0.clone(),
        state: product.state,
        local: product.local,
        local_at: product.local_at.clone(),
        locator: product.locator.clone(),
        producers: product.producers.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub created_at: DateTime<Utc>,
    pub owner: Option<UserId>,
    pub config_id: Option<ConfigId>,
    pub result: Option<ResultCode>,
    pub waiting_tasks: u32,
    pub running_tasks: u32,
    pub finished_tasks: u32,
}

impl JobSummary {
    pub fn of(job: &Job, is_final: bool) -> Self {
        let (waiting, running, terminal) = job.task_counts();
        Self {
            id: job.id.clone(),
            created_at: job.created_at,
            owner: job.owner.clone(),
            config_id: job.config_id.clone(),
            result: is_final.then(|| job.result()),
            waiting_tasks: waiting as u32,
            running_tasks: running as u32,
            finished_tasks: terminal as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ResourceView {
    pub id: ResourceId,
    pub res_type: String,
    pub capabilities: BTreeSet<String>,
    pub locator: String,
    pub description: String,
    pub suspended: bool,
    /// Empty, a user id, or a run id.
    pub reserved_by: Option<String>,
    pub status: StatusLevel,
    pub connection: ConnectionStatus,
    pub changed_time: Option<DateTime<Utc>>,
    pub changed_user: Option<UserId>,
    pub runner_version: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub running_job: Option<JobId>,
    pub running_task: Option<String>,
}

impl ResourceView {
    pub fn of(resource: &Resource, now: DateTime<Utc>, sync: &SyncConfig) -> Self {
        let state = resource.runner_state();
        Self {
            id: resource.id.clone(),
            res_type: resource.res_type.0.clone(),
            capabilities: resource.capabilities.clone(),
            locator: resource.locator.clone(),
            description: resource.description.clone(),
            suspended: resource.suspended,
            reserved_by: resource.reserved.as_ref().map(|reservation| match reservation {
                Reservation::User(user) => user.0.clone(),
                Reservation::Run(run) => run.0.clone(),
            }),
            status: resource.status_level(now, sync.warn_after, sync.lost_after),
            connection: resource.connection_status(now, sync.warn_after, sync.lost_after),
            changed_time: resource.changed_time,
            changed_user: resource.changed_user.clone(),
            runner_version: state.map(|s| s.runner_version.clone()),
            last_sync: state.and_then(|s| s.last_sync),
            running_job: state
                .and_then(|s| s.running_run.as_ref())
                .map(|run| run.job_id.clone()),
            running_task: state
                .and_then(|s| s.running_run.as_ref())
                .map(|run| run.task_name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ScheduleDto {
    pub id: ScheduleId,
    /// once | daily | weekly | continuously | triggered
    pub repeat: String,
    /// Weekly only: enabled days, Monday first.
    pub days: Option<Vec<bool>>,
    /// Continuous only.
    pub min_delay_minutes: Option<u32>,
    pub config_id: Option<ConfigId>,
    pub tag_key: Option<String>,
    pub tag_value: Option<String>,
    /// Absent means "as soon as possible".
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    #[oai(default)]
    pub suspended: bool,
    pub owner: Option<UserId>,
    #[serde(default)]
    #[oai(default)]
    pub comment: String,
    #[serde(default)]
    #[oai(default)]
    pub trigger_filters: BTreeSet<String>,
}

impl ScheduleDto {
    pub fn into_record(self) -> Result<Schedule, String> {
        let repeat = match self.repeat.as_str() {
            "once" => RepeatKind::Once,
            "daily" => RepeatKind::Daily,
            "weekly" => {
                let days = self
                    .days
                    .as_ref()
                    .ok_or("weekly schedules need \"days\"")?;
                if days.len() != 7 {
                    return Err("\"days\" must list all 7 days, Monday first".to_string());
                }
                let mut week = [false; 7];
                week.copy_from_slice(days);
                RepeatKind::Weekly { days: week }
            }
            "continuously" => RepeatKind::Continuously {
                min_delay_minutes: self.min_delay_minutes.unwrap_or(0),
            },
            "triggered" => RepeatKind::Triggered,
            other => return Err(format!("unknown repeat kind \"{other}\"")),
        };
        let target = match (self.config_id, self.tag_key) {
            (Some(config_id), None) => ScheduleTarget::Config { config_id },
            (None, Some(key)) => ScheduleTarget::Tag {
                key,
                value: self.tag_value.unwrap_or_default(),
            },
            _ => return Err("exactly one of configId / tagKey must be given".to_string()),
        };
        Ok(Schedule {
            id: self.id,
            repeat,
            target,
            start_time: self.start_time,
            suspended: self.suspended,
            owner: self.owner,
            comment: self.comment,
            trigger_filters: self.trigger_filters,
            trigger_fired: false,
            last_started: None,
            last_jobs: vec![],
            done: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ScheduleView {
    pub id: ScheduleId,
    pub repeat: String,
    pub days: Option<Vec<bool>>,
    pub min_delay_minutes: Option<u32>,
    pub config_id: Option<ConfigId>,
    pub tag_key: Option<String>,
    pub tag_value: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub suspended: bool,
    pub owner: Option<UserId>,
    pub comment: String,
    pub trigger_filters: BTreeSet<String>,
    pub trigger_fired: bool,
    pub last_started: Option<DateTime<Utc>>,
    pub last_jobs: Vec<JobId>,
    pub done: bool,
    pub status: ScheduleStatus,
}

impl ScheduleView {
    pub fn of(schedule: &Schedule, status: ScheduleStatus) -> Self {
        let (repeat, days, min_delay_minutes) = match &schedule.repeat {
            RepeatKind::Once => ("once", None, None),
            RepeatKind::Daily => ("daily", None, None),
            RepeatKind::Weekly { days } => ("weekly", Some(days.to_vec()), None),
            RepeatKind::Continuously { min_delay_minutes } => {
                ("continuously", None, Some(*min_delay_minutes))
            }
            RepeatKind::Triggered => ("triggered", None, None),
        };
        let (config_id, tag_key, tag_value) = match &schedule.target {
            ScheduleTarget::Config { config_id } => (Some(config_id.clone()), None, None),
            ScheduleTarget::Tag { key, value } => {
                (None, Some(key.clone()), Some(value.clone()))
            }
        };
        Self {
            id: schedule.id.clone(),
            repeat: repeat.to_string(),
            days,
            min_delay_minutes,
            config_id,
            tag_key,
            tag_value,
            start_time: schedule.start_time,
            suspended: schedule.suspended,
            owner: schedule.owner.clone(),
            comment: schedule.comment.clone(),
            trigger_filters: schedule.trigger_filters.clone(),
            trigger_fired: schedule.trigger_fired,
            last_started: schedule.last_started,
            last_jobs: schedule.last_jobs.clone(),
            done: schedule.done,
            status,
        }
    }
}
