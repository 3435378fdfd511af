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

use super::{ConnectionStatus, StatusLevel};
use crate::model::definitions::TASK_RUNNER_TYPE;
use anvil_common::model::{JobId, ResTypeId, ResourceId, ShadowRunId, TaskRunId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Who or what holds a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "by", content = "id")]
pub enum Reservation {
    /// Reserved manually by an operator, e.g. for maintenance.
    User(UserId),
    /// Reserved for a single execution attempt.
    Run(TaskRunId),
}

/// The run an agent is (believed to be) executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, poem_openapi::Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct RunRef {
    pub job_id: JobId,
    pub task_name: String,
    pub run_id: TaskRunId,
}

/// Extra state carried by resources that are execution agents.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerState {
    pub runner_version: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub running_run: Option<RunRef>,
    pub shadow_run: Option<ShadowRunId>,
    pub exit_on_idle: bool,
}

/// What kind of resource a record describes. Agents carry extra state; all
/// other resources are plain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ResourceKind {
    Plain,
    Runner(RunnerState),
}

/// A concrete instance of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub res_type: ResTypeId,
    pub capabilities: BTreeSet<String>,
    /// Opaque string wrappers use to access the resource.
    pub locator: String,
    pub description: String,
    /// Free-form settings, e.g. the webhook `secret` of a repository.
    pub params: BTreeMap<String, String>,
    pub suspended: bool,
    pub reserved: Option<Reservation>,
    pub changed_time: Option<DateTime<Utc>>,
    pub changed_user: Option<UserId>,
    pub kind: ResourceKind,
}

impl Resource {
    pub fn new(
        id: impl Into<ResourceId>,
        res_type: impl Into<ResTypeId>,
        locator: impl Into<String>,
        description: impl Into<String>,
        capabilities: impl IntoIterator<Item = String>,
    ) -> Self {
        let res_type = res_type.into();
        let kind = if res_type.as_str() == TASK_RUNNER_TYPE {
            ResourceKind::Runner(RunnerState::default())
        } else {
            ResourceKind::Plain
        };
        Self {
            id: id.into(),
            res_type,
            capabilities: capabilities.into_iter().collect(),
            locator: locator.into(),
            description: description.into(),
            params: BTreeMap::new(),
            suspended: false,
            reserved: None,
            changed_time: None,
            changed_user: None,
            kind,
        }
    }

    pub fn runner_state(&self) -> Option<&RunnerState> {
        match &self.kind {
            ResourceKind::Runner(state) => Some(state),
            ResourceKind::Plain => None,
        }
    }

    pub fn runner_state_mut(&mut self) -> Option<&mut RunnerState> {
        match &mut self.kind {
            ResourceKind::Runner(state) => Some(state),
            ResourceKind::Plain => None,
        }
    }

    pub fn is_runner(&self) -> bool {
        matches!(self.kind, ResourceKind::Runner(_))
    }

    /// Tie breaker between otherwise equivalent assignments: richer resources
    /// are more likely to satisfy future requests, so they are held back.
    pub fn cost(&self) -> u64 {
        self.capabilities.len() as u64
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved.is_some()
    }

    pub fn reserved_by_run(&self) -> Option<&TaskRunId> {
        match &self.reserved {
            Some(Reservation::Run(run_id)) => Some(run_id),
            _ => None,
        }
    }

    pub fn connection_status(
        &self,
        now: DateTime<Utc>,
        warn_after: Duration,
        lost_after: Duration,
    ) -> ConnectionStatus {
        match self.runner_state() {
            None => ConnectionStatus::Connected,
            Some(state) => match state.last_sync {
                None => ConnectionStatus::Unknown,
                Some(last_sync) => {
                    let age = (now - last_sync).to_std().unwrap_or(Duration::ZERO);
                    if age >= lost_after {
                        ConnectionStatus::Lost
                    } else if age >= warn_after {
                        ConnectionStatus::Warning
                    } else {
                        ConnectionStatus::Connected
                    }
                }
            },
        }
    }

    /// Availability for matching. Only `Free` resources can actually be
    /// reserved; the other levels exist to explain why a task is waiting.
    pub fn status_level(
        &self,
        now: DateTime<Utc>,
        warn_after: Duration,
        lost_after: Duration,
    ) -> StatusLevel {
        if self.connection_status(now, warn_after, lost_after) != ConnectionStatus::Connected {
            StatusLevel::Lost
        } else if self.suspended {
            StatusLevel::Suspended
        } else if self.is_reserved() {
            StatusLevel::Reserved
        } else {
            StatusLevel::Free
        }
    }

    pub fn set_suspended(&mut self, suspended: bool, user: &UserId, now: DateTime<Utc>) -> bool {
        if self.suspended == suspended {
            return false;
        }
        self.suspended = suspended;
        self.changed_time = Some(now);
        self.changed_user = Some(user.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    fn runner(id: &str) -> Resource {
        Resource::new(id, TASK_RUNNER_TYPE, "", "", vec!["build".to_string()])
    }

    const WARN: Duration = Duration::from_secs(60);
    const LOST: Duration = Duration::from_secs(300);

    #[test]
    fn plain_resources_are_always_connected() {
        let resource = Resource::new("lab-db", "postgres", "db://lab", "", vec![]);
        assert_eq!(
            resource.connection_status(Utc::now(), WARN, LOST),
            ConnectionStatus::Connected
        );
    }

    #[test]
    fn runner_status_follows_sync_age() {
        let now = Utc::now();
        let mut agent = runner("agent-1");
        assert_eq!(
            agent.connection_status(now, WARN, LOST),
            ConnectionStatus::Unknown
        );

        let state = agent.runner_state_mut().unwrap();
        state.last_sync = Some(now - chrono::Duration::seconds(10));
        assert_eq!(
            agent.connection_status(now, WARN, LOST),
            ConnectionStatus::Connected
        );

        agent.runner_state_mut().unwrap().last_sync = Some(now - chrono::Duration::seconds(90));
        assert_eq!(
            agent.connection_status(now, WARN, LOST),
            ConnectionStatus::Warning
        );

        agent.runner_state_mut().unwrap().last_sync = Some(now - chrono::Duration::seconds(600));
        assert_eq!(
            agent.connection_status(now, WARN, LOST),
            ConnectionStatus::Lost
        );
    }

    #[test]
    fn lost_dominates_suspend_and_reservation() {
        let now = Utc::now();
        let mut agent = runner("agent-2");
        agent.suspended = true;
        agent.reserved = Some(Reservation::Run(TaskRunId::new("r1")));
        assert_eq!(agent.status_level(now, WARN, LOST), StatusLevel::Lost);

        agent.runner_state_mut().unwrap().last_sync = Some(now);
        assert_eq!(agent.status_level(now, WARN, LOST), StatusLevel::Suspended);

        agent.suspended = false;
        assert_eq!(agent.status_level(now, WARN, LOST), StatusLevel::Reserved);

        agent.reserved = None;
        assert_eq!(agent.status_level(now, WARN, LOST), StatusLevel::Free);
    }
}
