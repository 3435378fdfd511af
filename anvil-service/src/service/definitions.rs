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

//! Versioned CRUD over product definitions, frameworks, task definitions and
//! resource types, plus the parameter inheritance chain.

use crate::model::definitions::{
    is_reserved_param, top_level_params, Framework, ProductDef, ResType, ResourceClaim,
    ResourceSpec, TaskDef, VersionKey, TASK_RUNNER_REF, TASK_RUNNER_TYPE,
};
use crate::repo::stores::{FrameworkVersion, Stores, TaskDefVersion};
use crate::repo::RepoError;
use anvil_common::model::{FrameworkId, ProductDefId, ResTypeId, TaskDefId};
use anvil_common::SafeDisplay;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("{kind} already exists: {id}")]
    Duplicate { kind: &'static str, id: String },
    #[error("invalid reference: {0}")]
    Reference(String),
    #[error("parameter \"{param}\" is final and cannot be overridden")]
    FinalOverride { param: String },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error(transparent)]
    Internal(RepoError),
}

impl From<RepoError> for DefinitionError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Duplicate { store, key } => DefinitionError::Duplicate {
                kind: store,
                id: key,
            },
            RepoError::NotFound { store, key } => DefinitionError::NotFound {
                kind: store,
                id: key,
            },
            other => DefinitionError::Internal(other),
        }
    }
}

impl SafeDisplay for DefinitionError {
    fn to_safe_string(&self) -> String {
        match self {
            DefinitionError::Internal(inner) => inner.to_safe_string(),
            other => other.to_string(),
        }
    }
}

/// Everything a job needs to pin one task to the definition state it was
/// created from.
#[derive(Debug, Clone)]
pub struct DefinitionSnapshot {
    pub task_def: Arc<TaskDef>,
    pub def_key: VersionKey,
    pub framework: Arc<Framework>,
    pub framework_key: VersionKey,
}

#[async_trait]
pub trait DefinitionService: Send + Sync {
    async fn create_product_def(&self, def: ProductDef)
        -> Result<Arc<ProductDef>, DefinitionError>;
    async fn update_product_def(&self, def: ProductDef)
        -> Result<Arc<ProductDef>, DefinitionError>;
    async fn delete_product_def(&self, id: &ProductDefId) -> Result<(), DefinitionError>;

    async fn create_framework(&self, framework: Framework)
        -> Result<Arc<Framework>, DefinitionError>;
    async fn update_framework(&self, framework: Framework)
        -> Result<Arc<Framework>, DefinitionError>;
    async fn delete_framework(&self, id: &FrameworkId) -> Result<(), DefinitionError>;

    async fn create_task_def(&self, def: TaskDef) -> Result<Arc<TaskDef>, DefinitionError>;
    async fn update_task_def(&self, def: TaskDef) -> Result<Arc<TaskDef>, DefinitionError>;
    async fn delete_task_def(&self, id: &TaskDefId) -> Result<(), DefinitionError>;

    async fn create_res_type(&self, res_type: ResType) -> Result<Arc<ResType>, DefinitionError>;
    async fn delete_res_type(&self, id: &ResTypeId) -> Result<(), DefinitionError>;

    /// The merged resource claim of a task, always including the implicit
    /// agent slot.
    fn resource_claim(&self, def: &TaskDef) -> Result<ResourceClaim, DefinitionError>;

    /// Parameters resolved through taskdef -> framework -> top-level
    /// defaults.
    fn effective_params(&self, def: &TaskDef)
        -> Result<BTreeMap<String, String>, DefinitionError>;

    /// True if the parameter is declared final anywhere up the chain.
    fn is_final(&self, def: &TaskDef, name: &str) -> Result<bool, DefinitionError>;

    /// True iff some framework wants extraction; lets the UI decide whether
    /// to surface extraction settings at all.
    fn any_extract(&self) -> bool;

    /// Stores content-addressed versions of the task definition and its
    /// framework and returns the keys, so a job can pin them.
    async fn snapshot(&self, id: &TaskDefId) -> Result<DefinitionSnapshot, DefinitionError>;

    fn framework_of(&self, def: &TaskDef) -> Result<Arc<Framework>, DefinitionError>;
}

pub struct DefinitionServiceDefault {
    stores: Stores,
}

impl DefinitionServiceDefault {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    fn check_products(&self, framework: &Framework) -> Result<(), DefinitionError> {
        for product in framework.inputs.iter().chain(framework.outputs.iter()) {
            if !self.stores.product_defs.contains(product.as_str()) {
                return Err(DefinitionError::Reference(format!(
                    "product \"{product}\" does not exist"
                )));
            }
        }
        for product in &framework.outputs {
            let def = self
                .stores
                .product_defs
                .get(product.as_str())
                .expect("checked above");
            if !def.combined {
                let other_producer = self.stores.frameworks.values().into_iter().any(|other| {
                    other.id != framework.id && other.outputs.contains(product)
                });
                if other_producer {
                    return Err(DefinitionError::Reference(format!(
                        "product \"{product}\" is not combined and already has a producer"
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_claim_types(&self, specs: &[ResourceSpec]) -> Result<(), DefinitionError> {
        for spec in specs {
            if !self.stores.res_types.contains(spec.res_type.as_str()) {
                return Err(DefinitionError::Reference(format!(
                    "resource type \"{}\" does not exist",
                    spec.res_type
                )));
            }
        }
        Ok(())
    }

    /// Specs of the agent type always use the fixed reference label.
    fn normalise_claim(specs: &mut [ResourceSpec]) {
        for spec in specs.iter_mut() {
            if spec.res_type.as_str() == TASK_RUNNER_TYPE {
                spec.reference = TASK_RUNNER_REF.to_string();
            }
        }
    }

    fn product_def_referenced(&self, id: &ProductDefId) -> bool {
        self.stores
            .frameworks
            .values()
            .into_iter()
            .any(|framework| framework.inputs.contains(id) || framework.outputs.contains(id))
    }
}

#[async_trait]
impl DefinitionService for DefinitionServiceDefault {
    async fn create_product_def(
        &self,
        def: ProductDef,
    ) -> Result<Arc<ProductDef>, DefinitionError> {
        Ok(self.stores.product_defs.add(def).await?)
    }

    async fn update_product_def(
        &self,
        def: ProductDef,
    ) -> Result<Arc<ProductDef>, DefinitionError> {
        if self.product_def_referenced(&def.id) {
            return Err(DefinitionError::Reference(format!(
                "product \"{}\" is referenced by a framework and cannot change",
                def.id
            )));
        }
        Ok(self.stores.product_defs.update(def).await?)
    }

    async fn delete_product_def(&self, id: &ProductDefId) -> Result<(), DefinitionError> {
        if self.product_def_referenced(id) {
            return Err(DefinitionError::Reference(format!(
                "product \"{id}\" is referenced by a framework"
            )));
        }
        self.stores.product_defs.remove(id.as_str()).await?;
        Ok(())
    }

    async fn create_framework(
        &self,
        mut framework: Framework,
    ) -> Result<Arc<Framework>, DefinitionError> {
        if self.stores.frameworks.contains(framework.id.as_str()) {
            return Err(DefinitionError::Duplicate {
                kind: "framework",
                id: framework.id.0.clone(),
            });
        }
        self.check_products(&framework)?;
        Self::normalise_claim(&mut framework.resources);
        self.check_claim_types(&framework.resources)?;
        Ok(self.stores.frameworks.add(framework).await?)
    }

    async fn update_framework(
        &self,
        mut framework: Framework,
    ) -> Result<Arc<Framework>, DefinitionError> {
        self.check_products(&framework)?;
        Self::normalise_claim(&mut framework.resources);
        self.check_claim_types(&framework.resources)?;
        Ok(self.stores.frameworks.update(framework).await?)
    }

    async fn delete_framework(&self, id: &FrameworkId) -> Result<(), DefinitionError> {
        let dependent = self
            .stores
            .task_defs
            .values()
            .into_iter()
            .any(|def| &def.framework == id);
        if dependent {
            return Err(DefinitionError::Reference(format!(
                "framework \"{id}\" is referenced by a task definition"
            )));
        }
        self.stores.frameworks.remove(id.as_str()).await?;
        Ok(())
    }

    async fn create_task_def(&self, mut def: TaskDef) -> Result<Arc<TaskDef>, DefinitionError> {
        if self.stores.task_defs.contains(def.id.as_str()) {
            return Err(DefinitionError::Duplicate {
                kind: "task definition",
                id: def.id.0.clone(),
            });
        }
        let framework = self
            .stores
            .frameworks
            .get(def.framework.as_str())
            .ok_or_else(|| {
                DefinitionError::Reference(format!(
                    "framework \"{}\" does not exist",
                    def.framework
                ))
            })?;
        for param in def.params.keys() {
            if framework.is_final(param) {
                return Err(DefinitionError::FinalOverride {
                    param: param.clone(),
                });
            }
        }
        Self::normalise_claim(&mut def.resources);
        self.check_claim_types(&def.resources)?;
        Ok(self.stores.task_defs.add(def).await?)
    }

    async fn update_task_def(&self, mut def: TaskDef) -> Result<Arc<TaskDef>, DefinitionError> {
        let framework = self.framework_of(&def)?;
        for param in def.params.keys() {
            if framework.is_final(param) {
                return Err(DefinitionError::FinalOverride {
                    param: param.clone(),
                });
            }
        }
        Self::normalise_claim(&mut def.resources);
        self.check_claim_types(&def.resources)?;
        Ok(self.stores.task_defs.update(def).await?)
    }

    async fn delete_task_def(&self, id: &TaskDefId) -> Result<(), DefinitionError> {
        let dependent = self.stores.configs.values().into_iter().any(|config| {
            config
                .tasks
                .values()
                .any(|template| &template.task_def == id)
        });
        if dependent {
            return Err(DefinitionError::Reference(format!(
                "task definition \"{id}\" is used by a configuration"
            )));
        }
        self.stores.task_defs.remove(id.as_str()).await?;
        Ok(())
    }

    async fn create_res_type(&self, res_type: ResType) -> Result<Arc<ResType>, DefinitionError> {
        if res_type.id.as_str().starts_with("sf.") {
            return Err(DefinitionError::Reference(
                "the \"sf.\" resource type namespace is reserved".to_string(),
            ));
        }
        Ok(self.stores.res_types.add(res_type).await?)
    }

    async fn delete_res_type(&self, id: &ResTypeId) -> Result<(), DefinitionError> {
        if id.as_str().starts_with("sf.") {
            return Err(DefinitionError::Reference(format!(
                "resource type \"{id}\" is reserved"
            )));
        }
        if !self.stores.resources_of_type(id).is_empty() {
            return Err(DefinitionError::Reference(format!(
                "resources of type \"{id}\" still exist"
            )));
        }
        self.stores.res_types.remove(id.as_str()).await?;
        Ok(())
    }

    fn resource_claim(&self, def: &TaskDef) -> Result<ResourceClaim, DefinitionError> {
        let framework = self.framework_of(def)?;
        let implicit = ResourceClaim::create([ResourceSpec::task_runner([])]);
        Ok(implicit
            .merge(&framework.resource_claim())
            .merge(&def.resource_claim()))
    }

    fn effective_params(
        &self,
        def: &TaskDef,
    ) -> Result<BTreeMap<String, String>, DefinitionError> {
        let framework = self.framework_of(def)?;
        let mut params = top_level_params();
        params.extend(framework.params.clone());
        params
            .entry(crate::model::definitions::WRAPPER_PARAM.to_string())
            .or_insert_with(|| framework.id.0.clone());
        params.extend(def.params.clone());
        Ok(params)
    }

    fn is_final(&self, def: &TaskDef, name: &str) -> Result<bool, DefinitionError> {
        let framework = self.framework_of(def)?;
        Ok(is_reserved_param(name)
            || def.final_params.contains(name)
            || framework.is_final(name))
    }

    fn any_extract(&self) -> bool {
        self.stores
            .frameworks
            .values()
            .into_iter()
            .any(|framework| framework.extractor())
    }

    async fn snapshot(&self, id: &TaskDefId) -> Result<DefinitionSnapshot, DefinitionError> {
        let task_def = self.stores.task_defs.get(id.as_str()).ok_or_else(|| {
            DefinitionError::Reference(format!("task definition \"{id}\" does not exist"))
        })?;
        let framework = self.framework_of(&task_def)?;

        let def_key = VersionKey::of(task_def.as_ref());
        if !self.stores.task_def_versions.contains(&def_key.0) {
            self.stores
                .task_def_versions
                .add(TaskDefVersion {
                    key: def_key.clone(),
                    task_def: (*task_def).clone(),
                })
                .await?;
        }

        let framework_key = VersionKey::of(framework.as_ref());
        if !self.stores.framework_versions.contains(&framework_key.0) {
            self.stores
                .framework_versions
                .add(FrameworkVersion {
                    key: framework_key.clone(),
                    framework: (*framework).clone(),
                })
                .await?;
        }

        Ok(DefinitionSnapshot {
            task_def,
            def_key,
            framework,
            framework_key,
        })
    }

    fn framework_of(&self, def: &TaskDef) -> Result<Arc<Framework>, DefinitionError> {
        self.stores
            .frameworks
            .get(def.framework.as_str())
            .ok_or_else(|| {
                DefinitionError::Reference(format!(
                    "framework \"{}\" does not exist anymore",
                    def.framework
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::definitions::ProductType;
    use std::collections::BTreeSet;
    use test_r::test;

    async fn service() -> (tempfile::TempDir, DefinitionServiceDefault) {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).await.unwrap();
        (dir, DefinitionServiceDefault::new(stores))
    }

    fn product(id: &str) -> ProductDef {
        ProductDef {
            id: ProductDefId::new(id),
            product_type: ProductType::File,
            local: false,
            combined: false,
        }
    }

    fn framework(id: &str, inputs: &[&str], outputs: &[&str]) -> Framework {
        Framework {
            id: FrameworkId::new(id),
            inputs: inputs.iter().map(|p| ProductDefId::new(*p)).collect(),
            outputs: outputs.iter().map(|p| ProductDefId::new(*p)).collect(),
            params: BTreeMap::new(),
            final_params: BTreeSet::new(),
            resources: vec![],
        }
    }

    fn task_def(id: &str, framework: &str) -> TaskDef {
        TaskDef {
            id: TaskDefId::new(id),
            framework: FrameworkId::new(framework),
            params: BTreeMap::new(),
            final_params: BTreeSet::new(),
            tags: BTreeMap::new(),
            resources: vec![],
        }
    }

    #[test]
    async fn framework_creation_validates_references() {
        let (_dir, service) = service().await;
        let err = service
            .create_framework(framework("build", &[], &["bin"]))
            .await
            .unwrap_err();
        assert!(matches!(err, DefinitionError::Reference(_)));

        service.create_product_def(product("bin")).await.unwrap();
        service
            .create_framework(framework("build", &[], &["bin"]))
            .await
            .unwrap();
        let err = service
            .create_framework(framework("build", &[], &["bin"]))
            .await
            .unwrap_err();
        assert!(matches!(err, DefinitionError::Duplicate { .. }));

        // "bin" is not combined, so a second producer is rejected.
        let err = service
            .create_framework(framework("build2", &[], &["bin"]))
            .await
            .unwrap_err();
        assert!(matches!(err, DefinitionError::Reference(_)));
    }

    #[test]
    async fn final_params_cannot_be_overridden() {
        let (_dir, service) = service().await;
        service.create_product_def(product("bin")).await.unwrap();
        let mut fw = framework("build", &[], &["bin"]);
        fw.params
            .insert("TOOLCHAIN".to_string(), "gcc".to_string());
        fw.final_params.insert("TOOLCHAIN".to_string());
        service.create_framework(fw).await.unwrap();

        let mut def = task_def("b", "build");
        def.params
            .insert("TOOLCHAIN".to_string(), "clang".to_string());
        let err = service.create_task_def(def).await.unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::FinalOverride { param } if param == "TOOLCHAIN"
        ));

        // Reserved parameters are final even without a declaration.
        let mut def = task_def("b", "build");
        def.params
            .insert("sf.wrapper".to_string(), "other".to_string());
        let err = service.create_task_def(def).await.unwrap_err();
        assert!(matches!(err, DefinitionError::FinalOverride { .. }));
    }

    #[test]
    async fn claim_always_contains_the_agent_slot() {
        let (_dir, service) = service().await;
        service.create_product_def(product("bin")).await.unwrap();
        service
            .create_framework(framework("build", &[], &["bin"]))
            .await
            .unwrap();
        let def = service.create_task_def(task_def("b", "build")).await.unwrap();

        let claim = service.resource_claim(&def).unwrap();
        assert!(claim.get(TASK_RUNNER_REF).is_some());
        assert_eq!(claim.len(), 1);
    }

    #[test]
    async fn effective_params_inherit_and_default() {
        let (_dir, service) = service().await;
        service.create_product_def(product("bin")).await.unwrap();
        let mut fw = framework("build", &[], &["bin"]);
        fw.params
            .insert("TOOLCHAIN".to_string(), "gcc".to_string());
        service.create_framework(fw).await.unwrap();
        let mut def = task_def("b", "build");
        def.params
            .insert("TARGET".to_string(), "release".to_string());
        let def = service.create_task_def(def).await.unwrap();

        let params = service.effective_params(&def).unwrap();
        assert_eq!(params["TOOLCHAIN"], "gcc");
        assert_eq!(params["TARGET"], "release");
        // Top-level default and derived wrapper name.
        assert_eq!(params["sf.summary"], "log.txt");
        assert_eq!(params["sf.wrapper"], "build");
    }

    #[test]
    async fn snapshot_is_stable_until_an_edit() {
        let (_dir, service) = service().await;
        service.create_product_def(product("bin")).await.unwrap();
        service
            .create_framework(framework("build", &[], &["bin"]))
            .await
            .unwrap();
        service.create_task_def(task_def("b", "build")).await.unwrap();

        let id = TaskDefId::new("b");
        let first = service.snapshot(&id).await.unwrap();
        let second = service.snapshot(&id).await.unwrap();
        assert_eq!(first.def_key, second.def_key);
        assert_eq!(first.framework_key, second.framework_key);

        let mut fw = (*first.framework).clone();
        fw.params
            .insert("TOOLCHAIN".to_string(), "clang".to_string());
        service.update_framework(fw).await.unwrap();
        let third = service.snapshot(&id).await.unwrap();
        assert_ne!(first.framework_key, third.framework_key);
        // The pinned version is still resolvable.
        assert!(service
            .stores
            .framework_versions
            .contains(&first.framework_key.0));
    }
}
