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

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Singleton project-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, poem_openapi::Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ProjectSettings {
    pub name: String,
    /// Capabilities that job configurations may target.
    pub targets: BTreeSet<String>,
    /// Whether users may raise task priorities at all.
    pub task_priorities: bool,
    /// Upper bound of the priority range when priorities are enabled.
    pub max_priority: i32,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            name: "Anvil".to_string(),
            targets: BTreeSet::new(),
            task_priorities: false,
            max_priority: 100,
        }
    }
}

impl ProjectSettings {
    /// Clamps a requested priority into the enabled range.
    pub fn clamp_priority(&self, priority: i32) -> i32 {
        if self.task_priorities {
            priority.clamp(0, self.max_priority)
        } else {
            0
        }
    }
}
