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

//! The wire contract between execution agents and the controller.

use super::resource::RunRef;
use super::ResultCode;
use anvil_common::model::{JobId, ResourceId, ShadowRunId, TaskRunId};
use poem_openapi::{Enum, Object, Union};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What an agent tells the controller on every sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct SyncRequest {
    pub runner_id: ResourceId,
    pub runner_version: String,
    /// Capabilities currently advertised by the agent.
    #[serde(default)]
    #[oai(default)]
    pub capabilities: BTreeSet<String>,
    /// Present iff the agent believes it is executing a run.
    pub run: Option<RunRef>,
    /// Present iff the agent believes it is executing a shadow run.
    pub shadow_run: Option<ShadowRunId>,
    /// Ask to be sent `exit` instead of new work once idle.
    #[serde(default)]
    #[oai(default)]
    pub exit_on_idle: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct WaitPayload {
    /// Seconds until the agent should sync again.
    pub seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Object)]
pub struct ExitPayload {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Object)]
pub struct AbortPayload {}

/// Everything an agent needs to execute one task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct AssignmentPayload {
    pub run: RunRef,
    pub wrapper: String,
    pub params: BTreeMap<String, String>,
    /// Locator per input product.
    pub inputs: BTreeMap<String, String>,
    /// Names of the products the wrapper may report locators for.
    pub outputs: BTreeSet<String>,
    /// Locator per claim reference label, including the agent's own under
    /// `SF_TR`.
    pub resources: BTreeMap<String, String>,
    pub timeout_minutes: Option<u32>,
}

/// An extraction to perform over an earlier run's output, on the same agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ShadowAssignmentPayload {
    pub shadow_id: ShadowRunId,
    pub job_id: JobId,
    pub task_name: String,
    pub run_id: TaskRunId,
    pub wrapper: String,
    pub params: BTreeMap<String, String>,
}

/// The controller's answer to a sync; exactly one alternative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Union)]
#[serde(rename_all = "camelCase", tag = "action")]
#[oai(discriminator_name = "action", rename_all = "camelCase")]
pub enum SyncResponse {
    Wait(WaitPayload),
    Exit(ExitPayload),
    /// The run the agent reported is no longer authoritative; stop it.
    Abort(AbortPayload),
    Assignment(AssignmentPayload),
    ShadowAssignment(ShadowAssignmentPayload),
}

/// Results an agent may report; cancellation is controller-initiated and
/// cannot be reported from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum ReportedResult {
    Ok,
    Warning,
    Error,
    Inspect,
}

impl From<ReportedResult> for ResultCode {
    fn from(value: ReportedResult) -> Self {
        match value {
            ReportedResult::Ok => ResultCode::Ok,
            ReportedResult::Warning => ResultCode::Warning,
            ReportedResult::Error => ResultCode::Error,
            ReportedResult::Inspect => ResultCode::Inspect,
        }
    }
}

/// Completion report for a task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct TaskReport {
    pub job_id: JobId,
    pub task_name: String,
    /// When present, must match the active run.
    pub run_id: Option<TaskRunId>,
    pub result: ReportedResult,
    pub summary: Option<String>,
    /// Where the run's report was published.
    pub report: Option<String>,
    /// Locator per output product the wrapper produced.
    #[serde(default)]
    #[oai(default)]
    pub outputs: BTreeMap<String, String>,
    /// Mid-level data extracted by the wrapper itself.
    #[serde(default)]
    #[oai(default)]
    pub data: BTreeMap<String, String>,
}

/// Completion report for an extraction shadow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ShadowReport {
    pub shadow_id: ShadowRunId,
    pub result: ReportedResult,
    /// Mid-level data produced by the extraction.
    #[serde(default)]
    #[oai(default)]
    pub data: BTreeMap<String, String>,
}
