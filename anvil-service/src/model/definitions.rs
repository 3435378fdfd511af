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

use anvil_common::model::{FrameworkId, ProductDefId, ResTypeId, TaskDefId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

/// Reference label under which every executable task requires its execution
/// agent.
pub const TASK_RUNNER_REF: &str = "SF_TR";

/// Reserved resource type of execution agents.
pub const TASK_RUNNER_TYPE: &str = "sf.tr";

/// Reserved resource type of version control repositories.
pub const REPO_TYPE: &str = "sf.repo";

/// Prefix of parameter names reserved for the controller itself
/// (`sf.wrapper`, `sf.extractor`, `sf.timeout`, `sf.summary`).
pub const RESERVED_PARAM_PREFIX: &str = "sf.";

pub const WRAPPER_PARAM: &str = "sf.wrapper";
pub const EXTRACTOR_PARAM: &str = "sf.extractor";
pub const TIMEOUT_PARAM: &str = "sf.timeout";
pub const SUMMARY_PARAM: &str = "sf.summary";

pub fn is_reserved_param(name: &str) -> bool {
    name.starts_with(RESERVED_PARAM_PREFIX)
}

/// Parameters declared at the top of the inheritance hierarchy, shared by
/// every framework.
pub fn top_level_params() -> BTreeMap<String, String> {
    BTreeMap::from([(SUMMARY_PARAM.to_string(), "log.txt".to_string())])
}

/// What kind of artifact a product is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, poem_openapi::Enum,
)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum ProductType {
    File,
    String,
    Url,
    /// Carries no data; only signals that a stage has been passed.
    Token,
}

/// Declares a logical artifact class that tasks can produce and consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, poem_openapi::Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ProductDef {
    pub id: ProductDefId,
    #[serde(rename = "type")]
    #[oai(rename = "type")]
    pub product_type: ProductType,
    /// Bound to the agent that created it; consumers must run on that agent.
    pub local: bool,
    /// May be produced by more than one task in the same job.
    pub combined: bool,
}

/// One required resource slot of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, poem_openapi::Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// Reference label, unique within a claim; wrappers receive the assigned
    /// resource's locator under this label.
    pub reference: String,
    pub res_type: ResTypeId,
    pub capabilities: BTreeSet<String>,
}

impl ResourceSpec {
    pub fn new(
        reference: impl Into<String>,
        res_type: impl Into<ResTypeId>,
        capabilities: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            reference: reference.into(),
            res_type: res_type.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }

    /// The implicit agent slot every executable task carries.
    pub fn task_runner(capabilities: impl IntoIterator<Item = String>) -> Self {
        Self::new(TASK_RUNNER_REF, TASK_RUNNER_TYPE, capabilities)
    }
}

/// Immutable collection of [`ResourceSpec`]s, indexed by reference label.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceClaim {
    specs: IndexMap<String, ResourceSpec>,
}

impl ResourceClaim {
    pub fn create(specs: impl IntoIterator<Item = ResourceSpec>) -> Self {
        Self {
            specs: specs
                .into_iter()
                .map(|spec| (spec.reference.clone(), spec))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn get(&self, reference: &str) -> Option<&ResourceSpec> {
        self.specs.get(reference)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.specs.values()
    }

    pub fn res_types(&self) -> BTreeSet<ResTypeId> {
        self.specs.values().map(|spec| spec.res_type.clone()).collect()
    }

    pub fn specs_of_type<'a>(
        &'a self,
        res_type: &'a ResTypeId,
    ) -> impl Iterator<Item = &'a ResourceSpec> {
        self.specs
            .values()
            .filter(move |spec| &spec.res_type == res_type)
    }

    /// Returns a new claim containing the specs from this claim and the given
    /// claim. Specs with the same reference have their capability sets united
    /// if the resource types match; otherwise the given claim's spec
    /// overrides this claim's.
    pub fn merge(&self, other: &ResourceClaim) -> ResourceClaim {
        let mut specs = self.specs.clone();
        for (reference, spec) in &other.specs {
            match specs.get(reference) {
                None => {
                    specs.insert(reference.clone(), spec.clone());
                }
                Some(ours) if ours.res_type == spec.res_type => {
                    let mut merged = spec.clone();
                    merged
                        .capabilities
                        .extend(ours.capabilities.iter().cloned());
                    specs.insert(reference.clone(), merged);
                }
                Some(_) => {
                    specs.insert(reference.clone(), spec.clone());
                }
            }
        }
        ResourceClaim { specs }
    }
}

impl FromIterator<ResourceSpec> for ResourceClaim {
    fn from_iter<T: IntoIterator<Item = ResourceSpec>>(iter: T) -> Self {
        Self::create(iter)
    }
}

/// Resource type metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, poem_openapi::Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ResType {
    pub id: ResTypeId,
    /// Reserved for a single task at a time.
    pub per_task_exclusive: bool,
    /// Once reserved, held until the whole job terminates.
    pub per_job_exclusive: bool,
    pub description: String,
}

impl ResType {
    pub fn task_runner() -> Self {
        Self {
            id: ResTypeId::new(TASK_RUNNER_TYPE),
            per_task_exclusive: true,
            per_job_exclusive: false,
            description: "Task execution agent".to_string(),
        }
    }

    pub fn repository() -> Self {
        Self {
            id: ResTypeId::new(REPO_TYPE),
            per_task_exclusive: false,
            per_job_exclusive: false,
            description: "Version control repository".to_string(),
        }
    }
}

/// Content key addressing one immutable version of a framework or task
/// definition. Jobs pin the versions they were created from.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    poem_openapi::NewType,
)]
#[serde(transparent)]
pub struct VersionKey(pub String);

impl VersionKey {
    pub fn of<T: Serialize>(value: &T) -> Self {
        let canonical =
            serde_json::to_vec(value).expect("definition records serialize infallibly");
        Self(blake3::hash(&canonical).to_hex().to_string())
    }
}

impl Display for VersionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reusable execution template: the shape of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, poem_openapi::Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct Framework {
    pub id: FrameworkId,
    pub inputs: BTreeSet<ProductDefId>,
    pub outputs: BTreeSet<ProductDefId>,
    pub params: BTreeMap<String, String>,
    pub final_params: BTreeSet<String>,
    pub resources: Vec<ResourceSpec>,
}

impl Framework {
    /// The wrapper script name; defaults to the framework id.
    pub fn wrapper(&self) -> String {
        self.params
            .get(WRAPPER_PARAM)
            .cloned()
            .unwrap_or_else(|| self.id.0.clone())
    }

    /// True iff runs of this framework are followed by an extraction shadow
    /// run on the same agent.
    pub fn extractor(&self) -> bool {
        matches!(
            self.params.get(EXTRACTOR_PARAM).map(String::as_str),
            Some("true") | Some("True") | Some("1")
        )
    }

    pub fn resource_claim(&self) -> ResourceClaim {
        ResourceClaim::create(self.resources.iter().cloned())
    }

    /// True if the parameter cannot be overridden further down the
    /// inheritance chain.
    pub fn is_final(&self, name: &str) -> bool {
        is_reserved_param(name) || self.final_params.contains(name)
    }
}

/// Binds a name to a parent framework with parameter overrides, tags and
/// extra resource requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, poem_openapi::Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct TaskDef {
    pub id: TaskDefId,
    pub framework: FrameworkId,
    pub params: BTreeMap<String, String>,
    pub final_params: BTreeSet<String>,
    pub tags: BTreeMap<String, BTreeSet<String>>,
    pub resources: Vec<ResourceSpec>,
}

impl TaskDef {
    pub fn resource_claim(&self) -> ResourceClaim {
        ResourceClaim::create(self.resources.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    fn spec(reference: &str, res_type: &str, caps: &[&str]) -> ResourceSpec {
        ResourceSpec::new(
            reference,
            res_type,
            caps.iter().map(|cap| cap.to_string()),
        )
    }

    #[test]
    fn merge_unites_capabilities_of_matching_types() {
        let base = ResourceClaim::create([spec("db", "postgres", &["large"])]);
        let extra = ResourceClaim::create([spec("db", "postgres", &["replicated"])]);
        let merged = base.merge(&extra);
        assert_eq!(merged.len(), 1);
        let caps = &merged.get("db").unwrap().capabilities;
        assert!(caps.contains("large") && caps.contains("replicated"));
    }

    #[test]
    fn merge_overrides_on_type_conflict() {
        let base = ResourceClaim::create([spec("db", "postgres", &["large"])]);
        let extra = ResourceClaim::create([spec("db", "mysql", &["small"])]);
        let merged = base.merge(&extra);
        assert_eq!(merged.get("db").unwrap().res_type, ResTypeId::new("mysql"));
        assert_eq!(
            merged.get("db").unwrap().capabilities,
            BTreeSet::from(["small".to_string()])
        );
    }

    #[test]
    fn merge_keeps_unrelated_specs() {
        let base = ResourceClaim::create([spec("db", "postgres", &[])]);
        let extra = ResourceClaim::create([spec("repo", REPO_TYPE, &[])]);
        let merged = base.merge(&extra);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn version_key_is_content_addressed() {
        let framework = Framework {
            id: FrameworkId::new("build"),
            inputs: BTreeSet::new(),
            outputs: BTreeSet::from([ProductDefId::new("bin")]),
            params: BTreeMap::new(),
            final_params: BTreeSet::new(),
            resources: vec![],
        };
        let mut changed = framework.clone();
        changed
            .params
            .insert("MAKE_TARGET".to_string(), "all".to_string());
        assert_eq!(VersionKey::of(&framework), VersionKey::of(&framework));
        assert_ne!(VersionKey::of(&framework), VersionKey::of(&changed));
    }

    #[test]
    fn reserved_params_are_always_final() {
        let framework = Framework {
            id: FrameworkId::new("build"),
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            params: BTreeMap::new(),
            final_params: BTreeSet::new(),
            resources: vec![],
        };
        assert!(framework.is_final(WRAPPER_PARAM));
        assert!(framework.is_final(EXTRACTOR_PARAM));
        assert!(!framework.is_final("MAKE_TARGET"));
    }
}
