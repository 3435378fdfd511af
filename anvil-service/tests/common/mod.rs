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

use anvil_common::model::{ConfigId, FrameworkId, ProductDefId, ResourceId, TaskDefId};
use anvil_service::bootstrap::Services;
use anvil_service::config::ControllerConfig;
use anvil_service::model::configuration::{Configuration, InputSpec, TaskTemplate};
use anvil_service::model::definitions::{
    Framework, ProductDef, ProductType, TaskDef, TASK_RUNNER_TYPE,
};
use anvil_service::model::protocol::{ReportedResult, SyncRequest, TaskReport};
use anvil_service::model::resource::Resource;
use chrono::Utc;
use indexmap::IndexMap;
use prometheus::Registry;
use std::collections::{BTreeMap, BTreeSet};

pub struct TestBed {
    // Dropping the TempDir deletes the store directories.
    pub _dir: tempfile::TempDir,
    pub services: Services,
}

pub async fn testbed() -> TestBed {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = ControllerConfig {
        data_dir: dir.path().to_path_buf(),
        ..ControllerConfig::default()
    };
    let services = Services::new(&config, &Registry::new())
        .await
        .expect("failed to initialise services");
    TestBed {
        _dir: dir,
        services,
    }
}

pub fn product(id: &str, product_type: ProductType) -> ProductDef {
    ProductDef {
        id: ProductDefId::new(id),
        product_type,
        local: false,
        combined: false,
    }
}

pub fn framework(id: &str, inputs: &[&str], outputs: &[&str]) -> Framework {
    Framework {
        id: FrameworkId::new(id),
        inputs: inputs.iter().map(|name| ProductDefId::new(*name)).collect(),
        outputs: outputs.iter().map(|name| ProductDefId::new(*name)).collect(),
        params: BTreeMap::new(),
        final_params: BTreeSet::new(),
        resources: vec![],
    }
}

pub fn task_def(id: &str, framework: &str) -> TaskDef {
    TaskDef {
        id: TaskDefId::new(id),
        framework: FrameworkId::new(framework),
        params: BTreeMap::new(),
        final_params: BTreeSet::new(),
        tags: BTreeMap::new(),
        resources: vec![],
    }
}

pub fn configuration(id: &str, tasks: &[&str]) -> Configuration {
    let mut task_map = IndexMap::new();
    for name in tasks {
        task_map.insert(
            name.to_string(),
            TaskTemplate {
                task_def: TaskDefId::new(*name),
                priority: 0,
                params: BTreeMap::new(),
                runners: BTreeSet::new(),
            },
        );
    }
    Configuration {
        id: ConfigId::new(id),
        owner: None,
        created_at: Utc::now(),
        comment: String::new(),
        target: None,
        params: BTreeMap::new(),
        tasks: task_map,
        inputs: BTreeMap::new(),
        runners: BTreeSet::new(),
        tags: BTreeMap::new(),
    }
}

pub fn agent(id: &str, capabilities: &[&str]) -> Resource {
    Resource::new(
        id,
        TASK_RUNNER_TYPE,
        format!("http://{id}.local"),
        "test agent",
        capabilities.iter().map(|cap| cap.to_string()),
    )
}

pub fn sync_request(runner_id: &str, capabilities: &[&str]) -> SyncRequest {
    SyncRequest {
        runner_id: ResourceId::new(runner_id),
        runner_version: "3.0".to_string(),
        capabilities: capabilities.iter().map(|cap| cap.to_string()).collect(),
        run: None,
        shadow_run: None,
        exit_on_idle: false,
    }
}

pub fn report_ok(job_id: &str, task_name: &str, outputs: &[(&str, &str)]) -> TaskReport {
    TaskReport {
        job_id: anvil_common::model::JobId::new(job_id),
        task_name: task_name.to_string(),
        run_id: None,
        result: ReportedResult::Ok,
        summary: Some("done".to_string()),
        report: None,
        outputs: outputs
            .iter()
            .map(|(name, locator)| (name.to_string(), locator.to_string()))
            .collect(),
        data: BTreeMap::new(),
    }
}

/// Seeds the build/test pipeline: product `bin`, frameworks `build`/`test`,
/// task definitions `b`/`t`, configuration `C1`, agent `A1`.
pub async fn seed_build_test(services: &Services) {
    let defs = &services.definition_service;
    defs.create_product_def(product("bin", ProductType::File))
        .await
        .unwrap();
    defs.create_framework(framework("build", &[], &["bin"]))
        .await
        .unwrap();
    defs.create_framework(framework("test", &["bin"], &[]))
        .await
        .unwrap();
    defs.create_task_def(task_def("b", "build")).await.unwrap();
    defs.create_task_def(task_def("t", "test")).await.unwrap();

    services
        .stores
        .configs
        .add(configuration("C1", &["b", "t"]))
        .await
        .unwrap();

    services
        .stores
        .resources
        .add(agent("A1", &["build", "test"]))
        .await
        .unwrap();
}

pub fn external_input(config: &mut Configuration, name: &str, locator: Option<&str>) {
    config.inputs.insert(
        ProductDefId::new(name),
        InputSpec {
            locator: locator.map(|value| value.to_string()),
            local_at: None,
        },
    );
}

pub use anvil_service::model::protocol::SyncResponse;

pub fn unwrap_assignment(
    response: SyncResponse,
) -> anvil_service::model::protocol::AssignmentPayload {
    match response {
        SyncResponse::Assignment(payload) => payload,
        other => panic!("expected an assignment, got {other:?}"),
    }
}
