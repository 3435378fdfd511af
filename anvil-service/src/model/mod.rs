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

pub mod configuration;
pub mod definitions;
pub mod job;
pub mod project;
pub mod protocol;
pub mod resource;
pub mod schedule;
pub mod storage;
pub mod token;
pub mod user;

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Outcome of a run, a task or a whole job.
///
/// The variant order is the severity order used when merging results; the
/// interaction between `Cancelled` and `Error` at the job level is handled
/// separately (see [`job::Job::result`]).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    poem_openapi::Enum,
)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum ResultCode {
    Ok,
    Warning,
    /// The wrapper could not determine a verdict; a human has to look.
    Inspect,
    Error,
    Cancelled,
}

impl Display for ResultCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultCode::Ok => write!(f, "ok"),
            ResultCode::Warning => write!(f, "warning"),
            ResultCode::Inspect => write!(f, "inspect"),
            ResultCode::Error => write!(f, "error"),
            ResultCode::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Lifecycle state of a single execution attempt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, poem_openapi::Enum,
)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum RunState {
    Waiting,
    Running,
    Done,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Cancelled)
    }
}

/// State of a product within a job. `Done` and `Blocked` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, poem_openapi::Enum,
)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum ProductState {
    Waiting,
    Done,
    Blocked,
}

/// Classification of the connection between an agent and the controller,
/// derived from the age of its last sync. Never stored.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, poem_openapi::Enum,
)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No sync seen yet since the controller started.
    Unknown,
    Connected,
    Warning,
    Lost,
}

/// Availability level of a resource, used when matching and when explaining
/// to the user why a task is still waiting. The order is the order in which
/// the matcher widens its candidate set in diagnostic mode.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    poem_openapi::Enum,
)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum StatusLevel {
    Free,
    Reserved,
    Suspended,
    Lost,
}

impl StatusLevel {
    pub const ALL: [StatusLevel; 4] = [
        StatusLevel::Free,
        StatusLevel::Reserved,
        StatusLevel::Suspended,
        StatusLevel::Lost,
    ];
}

impl Display for StatusLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusLevel::Free => write!(f, "free"),
            StatusLevel::Reserved => write!(f, "reserved"),
            StatusLevel::Suspended => write!(f, "suspended"),
            StatusLevel::Lost => write!(f, "lost"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn result_codes_order_by_severity() {
        assert!(ResultCode::Ok < ResultCode::Warning);
        assert!(ResultCode::Warning < ResultCode::Inspect);
        assert!(ResultCode::Inspect < ResultCode::Error);
        assert!(ResultCode::Error < ResultCode::Cancelled);
    }
}
