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

use super::{Record, RecordStore, RepoError, SingletonStore};
use crate::model::configuration::Configuration;
use crate::model::definitions::{Framework, ProductDef, ResType, TaskDef, VersionKey};
use crate::model::job::{Job, ShadowRun};
use crate::model::project::ProjectSettings;
use crate::model::resource::Resource;
use crate::model::schedule::Schedule;
use crate::model::storage::Storage;
use crate::model::token::Token;
use crate::model::user::User;
use anvil_common::model::ResTypeId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

impl Record for ProductDef {
    const STORE: &'static str = "productdefs";

    fn key(&self) -> String {
        self.id.0.clone()
    }
}

impl Record for Framework {
    const STORE: &'static str = "frameworks";

    fn key(&self) -> String {
        self.id.0.clone()
    }
}

impl Record for TaskDef {
    const STORE: &'static str = "taskdefs";

    fn key(&self) -> String {
        self.id.0.clone()
    }
}

/// One immutable, content-addressed version of a framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkVersion {
    pub key: VersionKey,
    pub framework: Framework,
}

impl Record for FrameworkVersion {
    const STORE: &'static str = "framework-versions";

    fn key(&self) -> String {
        self.key.0.clone()
    }
}

/// One immutable, content-addressed version of a task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefVersion {
    pub key: VersionKey,
    pub task_def: TaskDef,
}

impl Record for TaskDefVersion {
    const STORE: &'static str = "taskdef-versions";

    fn key(&self) -> String {
        self.key.0.clone()
    }
}

impl Record for ResType {
    const STORE: &'static str = "restypes";

    fn key(&self) -> String {
        self.id.0.clone()
    }
}

impl Record for Resource {
    const STORE: &'static str = "resources";

    fn key(&self) -> String {
        self.id.0.clone()
    }
}

impl Record for Configuration {
    const STORE: &'static str = "configs";

    fn key(&self) -> String {
        self.id.0.clone()
    }
}

impl Record for Job {
    const STORE: &'static str = "jobs";

    fn key(&self) -> String {
        self.id.0.clone()
    }
}

impl Record for ShadowRun {
    const STORE: &'static str = "shadow";

    fn key(&self) -> String {
        self.id.0.clone()
    }
}

impl Record for Schedule {
    const STORE: &'static str = "schedules";

    fn key(&self) -> String {
        self.id.0.clone()
    }
}

impl Record for Token {
    const STORE: &'static str = "tokens";

    fn key(&self) -> String {
        self.id.0.to_string()
    }
}

impl Record for User {
    const STORE: &'static str = "users";

    fn key(&self) -> String {
        self.id.0.clone()
    }
}

impl Record for Storage {
    const STORE: &'static str = "storages";

    fn key(&self) -> String {
        self.id.0.clone()
    }
}

/// All record stores of one controller instance.
#[derive(Clone)]
pub struct Stores {
    pub product_defs: Arc<RecordStore<ProductDef>>,
    pub frameworks: Arc<RecordStore<Framework>>,
    pub framework_versions: Arc<RecordStore<FrameworkVersion>>,
    pub task_defs: Arc<RecordStore<TaskDef>>,
    pub task_def_versions: Arc<RecordStore<TaskDefVersion>>,
    pub res_types: Arc<RecordStore<ResType>>,
    pub resources: Arc<RecordStore<Resource>>,
    pub configs: Arc<RecordStore<Configuration>>,
    pub jobs: Arc<RecordStore<Job>>,
    pub shadow_runs: Arc<RecordStore<ShadowRun>>,
    pub schedules: Arc<RecordStore<Schedule>>,
    pub tokens: Arc<RecordStore<Token>>,
    pub users: Arc<RecordStore<User>>,
    pub storages: Arc<RecordStore<Storage>>,
    pub project: Arc<SingletonStore<ProjectSettings>>,
}

impl Stores {
    pub async fn open(data_dir: &Path) -> Result<Self, RepoError> {
        let stores = Self {
            product_defs: Arc::new(RecordStore::open(data_dir).await?),
            frameworks: Arc::new(RecordStore::open(data_dir).await?),
            framework_versions: Arc::new(RecordStore::open(data_dir).await?),
            task_defs: Arc::new(RecordStore::open(data_dir).await?),
            task_def_versions: Arc::new(RecordStore::open(data_dir).await?),
            res_types: Arc::new(RecordStore::open(data_dir).await?),
            resources: Arc::new(RecordStore::open(data_dir).await?),
            configs: Arc::new(RecordStore::open(data_dir).await?),
            jobs: Arc::new(RecordStore::open(data_dir).await?),
            shadow_runs: Arc::new(RecordStore::open(data_dir).await?),
            schedules: Arc::new(RecordStore::open(data_dir).await?),
            tokens: Arc::new(RecordStore::open(data_dir).await?),
            users: Arc::new(RecordStore::open(data_dir).await?),
            storages: Arc::new(RecordStore::open(data_dir).await?),
            project: Arc::new(SingletonStore::open(data_dir, "project").await?),
        };

        // The two reserved resource types exist at all times.
        for reserved in [ResType::task_runner(), ResType::repository()] {
            if !stores.res_types.contains(&reserved.key()) {
                stores.res_types.add(reserved).await?;
            }
        }

        Ok(stores)
    }

    pub fn resources_of_type(&self, res_type: &ResTypeId) -> Vec<Arc<Resource>> {
        self.resources
            .values()
            .into_iter()
            .filter(|resource| &resource.res_type == res_type)
            .collect()
    }
}
