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

use anvil_common::model::{ConfigId, ProductDefId, ResourceId, TaskDefId, UserId};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How an input product of a configuration is satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, poem_openapi::Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct InputSpec {
    /// Locator of the externally provided product instance.
    pub locator: Option<String>,
    /// For local products: the agent the product lives on.
    pub local_at: Option<ResourceId>,
}

/// One task entry of a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, poem_openapi::Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct TaskTemplate {
    pub task_def: TaskDefId,
    #[serde(default)]
    #[oai(default)]
    pub priority: i32,
    /// Overrides on top of the definition chain; final parameters cannot be
    /// overridden here.
    #[serde(default)]
    #[oai(default)]
    pub params: BTreeMap<String, String>,
    /// Agents allowed to run this task; empty means the job-level set (or any
    /// agent) applies.
    #[serde(default)]
    #[oai(default)]
    pub runners: BTreeSet<ResourceId>,
}

/// A saved set of tasks that can be instantiated into jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub id: ConfigId,
    pub owner: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub comment: String,
    /// Target capability every agent used by the job must advertise.
    pub target: Option<String>,
    /// Job-level parameters, visible to every task.
    pub params: BTreeMap<String, String>,
    /// Tasks in execution-preference order; the name is the key.
    pub tasks: IndexMap<String, TaskTemplate>,
    /// Locators / agent bindings for externally provided input products.
    pub inputs: BTreeMap<ProductDefId, InputSpec>,
    /// Agents allowed to run any task of the job; empty means all.
    pub runners: BTreeSet<ResourceId>,
    pub tags: BTreeMap<String, BTreeSet<String>>,
}

impl Configuration {
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags
            .get(key)
            .is_some_and(|values| values.contains(value))
    }
}
