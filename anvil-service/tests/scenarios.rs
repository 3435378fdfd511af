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

//! End-to-end scenarios driven through the dispatcher, the way a fleet of
//! agents would drive the controller.

use crate::common::*;
use anvil_common::model::{ProductDefId, ResourceId, UserId};
use anvil_service::model::definitions::{ProductType, ResourceSpec, TASK_RUNNER_REF, TASK_RUNNER_TYPE};
use anvil_service::model::job::TOKEN_LOCATOR;
use anvil_service::model::protocol::{ReportedResult, ShadowReport, SyncResponse};
use anvil_service::model::{ProductState, ResultCode, RunState};
use anvil_service::service::broker::WaitReason;
use anvil_service::service::job::{AbortOutcome, EngineError, JobOrigin};
use anvil_service::model::StatusLevel;
use chrono::Utc;
use test_r::test;

#[test]
async fn s1_trivial_success() {
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;

    let config = services.stores.configs.get("C1").unwrap();
    let job = services
        .job_service
        .create_job(&config, JobOrigin::default())
        .await
        .unwrap();
    let a1 = ResourceId::new("A1");

    // First sync executes the build task.
    let assignment = unwrap_assignment(
        services
            .dispatcher
            .sync(&a1, sync_request("A1", &["build", "test"]))
            .await
            .unwrap(),
    );
    assert_eq!(assignment.run.task_name, "b");
    assert_eq!(assignment.wrapper, "build");
    assert!(assignment.outputs.contains("bin"));
    assert_eq!(
        assignment.resources.get(TASK_RUNNER_REF).map(String::as_str),
        Some("http://A1.local")
    );

    services
        .dispatcher
        .task_done(&a1, report_ok(job.id.as_str(), "b", &[("bin", "sf://bin/1")]))
        .await
        .unwrap();

    // The produced binary unblocks the test task.
    let assignment = unwrap_assignment(
        services
            .dispatcher
            .sync(&a1, sync_request("A1", &["build", "test"]))
            .await
            .unwrap(),
    );
    assert_eq!(assignment.run.task_name, "t");
    assert_eq!(
        assignment.inputs.get("bin").map(String::as_str),
        Some("sf://bin/1")
    );

    services
        .dispatcher
        .task_done(&a1, report_ok(job.id.as_str(), "t", &[]))
        .await
        .unwrap();

    let job = services.job_service.get(&job.id).unwrap();
    assert!(services.job_service.is_final(&job));
    assert_eq!(job.result(), ResultCode::Ok);

    // Nothing left: the agent is told to back off.
    let response = services
        .dispatcher
        .sync(&a1, sync_request("A1", &["build", "test"]))
        .await
        .unwrap();
    assert!(matches!(response, SyncResponse::Wait(_)));
}

#[test]
async fn s2_blocked_propagation() {
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;

    let config = services.stores.configs.get("C1").unwrap();
    let job = services
        .job_service
        .create_job(&config, JobOrigin::default())
        .await
        .unwrap();
    let a1 = ResourceId::new("A1");

    let assignment = unwrap_assignment(
        services
            .dispatcher
            .sync(&a1, sync_request("A1", &["build", "test"]))
            .await
            .unwrap(),
    );
    assert_eq!(assignment.run.task_name, "b");

    // Build fails without producing the binary.
    let mut report = report_ok(job.id.as_str(), "b", &[]);
    report.result = ReportedResult::Error;
    services.dispatcher.task_done(&a1, report).await.unwrap();

    let job = services.job_service.get(&job.id).unwrap();
    assert_eq!(
        job.products[&ProductDefId::new("bin")].state,
        ProductState::Blocked
    );
    assert_eq!(job.tasks["t"].state(), RunState::Cancelled);
    assert!(services.job_service.is_final(&job));
    assert_eq!(job.result(), ResultCode::Error);

    // The cancelled task is never offered to an agent.
    let response = services
        .dispatcher
        .sync(&a1, sync_request("A1", &["build", "test"]))
        .await
        .unwrap();
    assert!(matches!(response, SyncResponse::Wait(_)));
}

#[test]
async fn s3_capability_mismatch() {
    let bed = testbed().await;
    let services = &bed.services;
    let defs = &services.definition_service;

    let mut gpu_framework = framework("train", &[], &[]);
    gpu_framework.resources.push(ResourceSpec::new(
        TASK_RUNNER_REF,
        TASK_RUNNER_TYPE,
        ["gpu".to_string()],
    ));
    defs.create_framework(gpu_framework).await.unwrap();
    defs.create_task_def(task_def("z", "train")).await.unwrap();
    services
        .stores
        .configs
        .add(configuration("CG", &["z"]))
        .await
        .unwrap();
    services
        .stores
        .resources
        .add(agent("A1", &["cpu"]))
        .await
        .unwrap();

    let config = services.stores.configs.get("CG").unwrap();
    let job = services
        .job_service
        .create_job(&config, JobOrigin::default())
        .await
        .unwrap();
    let a1 = ResourceId::new("A1");

    // The agent never gets the task.
    for _ in 0..3 {
        let response = services
            .dispatcher
            .sync(&a1, sync_request("A1", &["cpu"]))
            .await
            .unwrap();
        assert!(matches!(response, SyncResponse::Wait(_)));
    }

    let reasons = services
        .job_service
        .why_waiting(&job.id, "z", Utc::now())
        .unwrap();
    assert!(reasons.iter().any(|reason| matches!(
        reason,
        WaitReason::NoCapableResource { reference, level: StatusLevel::Free, .. }
            if reference == TASK_RUNNER_REF
    )));
}

#[test]
async fn s6_abort_of_waiting_task() {
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;

    let config = services.stores.configs.get("C1").unwrap();
    let job = services
        .job_service
        .create_job(&config, JobOrigin::default())
        .await
        .unwrap();
    let a1 = ResourceId::new("A1");

    // Build is running; test still waits on its input.
    let assignment = unwrap_assignment(
        services
            .dispatcher
            .sync(&a1, sync_request("A1", &["build", "test"]))
            .await
            .unwrap(),
    );
    assert_eq!(assignment.run.task_name, "b");

    let outcome = services
        .job_service
        .abort_task(&job.id, "t", Some(&UserId::new("alice")), Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, AbortOutcome::Cancelled);

    let current = services.job_service.get(&job.id).unwrap();
    assert_eq!(current.tasks["t"].state(), RunState::Cancelled);
    assert_eq!(current.tasks["b"].state(), RunState::Running);

    // Build still completes and its product becomes available, but the
    // cancelled consumer is not re-enabled.
    services
        .dispatcher
        .task_done(&a1, report_ok(job.id.as_str(), "b", &[("bin", "sf://bin/1")]))
        .await
        .unwrap();

    let done = services.job_service.get(&job.id).unwrap();
    assert_eq!(
        done.products[&ProductDefId::new("bin")].state,
        ProductState::Done
    );
    assert_eq!(done.tasks["t"].state(), RunState::Cancelled);
    assert!(services.job_service.is_final(&done));
    assert_eq!(done.result(), ResultCode::Cancelled);
}

#[test]
async fn duplicate_task_done_is_rejected() {
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;

    let config = services.stores.configs.get("C1").unwrap();
    let job = services
        .job_service
        .create_job(&config, JobOrigin::default())
        .await
        .unwrap();
    let a1 = ResourceId::new("A1");

    unwrap_assignment(
        services
            .dispatcher
            .sync(&a1, sync_request("A1", &["build", "test"]))
            .await
            .unwrap(),
    );
    let report = report_ok(job.id.as_str(), "b", &[("bin", "sf://bin/1")]);
    services
        .dispatcher
        .task_done(&a1, report.clone())
        .await
        .unwrap();

    let second = services.dispatcher.task_done(&a1, report).await;
    assert!(matches!(second, Err(EngineError::Mismatch(_))));
}

#[test]
async fn empty_configuration_is_immediately_final() {
    let bed = testbed().await;
    let services = &bed.services;

    let config = configuration("empty", &[]);
    let job = services
        .job_service
        .create_job(&config, JobOrigin::default())
        .await
        .unwrap();
    assert!(services.job_service.is_final(&job));
    assert_eq!(job.result(), ResultCode::Ok);
}

#[test]
async fn token_input_is_ready_from_creation() {
    let bed = testbed().await;
    let services = &bed.services;
    let defs = &services.definition_service;

    defs.create_product_def(product("approval", ProductType::Token))
        .await
        .unwrap();
    defs.create_framework(framework("deploy", &["approval"], &[]))
        .await
        .unwrap();
    defs.create_task_def(task_def("d", "deploy")).await.unwrap();
    services
        .stores
        .resources
        .add(agent("A1", &[]))
        .await
        .unwrap();

    let config = configuration("CD", &["d"]);
    let job = services
        .job_service
        .create_job(&config, JobOrigin::default())
        .await
        .unwrap();
    assert_eq!(
        job.products[&ProductDefId::new("approval")].state,
        ProductState::Done
    );

    let assignment = unwrap_assignment(
        services
            .dispatcher
            .sync(&ResourceId::new("A1"), sync_request("A1", &[]))
            .await
            .unwrap(),
    );
    assert_eq!(assignment.run.task_name, "d");
    assert_eq!(
        assignment.inputs.get("approval").map(String::as_str),
        Some(TOKEN_LOCATOR)
    );
}

#[test]
async fn abort_of_running_task_goes_through_the_agent() {
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;

    let config = services.stores.configs.get("C1").unwrap();
    let job = services
        .job_service
        .create_job(&config, JobOrigin::default())
        .await
        .unwrap();
    let a1 = ResourceId::new("A1");

    let assignment = unwrap_assignment(
        services
            .dispatcher
            .sync(&a1, sync_request("A1", &["build", "test"]))
            .await
            .unwrap(),
    );

    let outcome = services
        .job_service
        .abort_task(&job.id, "b", None, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, AbortOutcome::Pending);

    // The agent still believes it is running; it is told to abort.
    let mut busy = sync_request("A1", &["build", "test"]);
    busy.run = Some(assignment.run.clone());
    let response = services.dispatcher.sync(&a1, busy).await.unwrap();
    assert!(matches!(response, SyncResponse::Abort(_)));

    // Once the agent reports idle, the run is cancelled, not failed.
    let response = services
        .dispatcher
        .sync(&a1, sync_request("A1", &["build", "test"]))
        .await
        .unwrap();
    assert!(!matches!(response, SyncResponse::Abort(_)));
    let current = services.job_service.get(&job.id).unwrap();
    assert_eq!(current.tasks["b"].state(), RunState::Cancelled);
    assert_eq!(current.tasks["b"].result(), Some(ResultCode::Cancelled));
}

#[test]
async fn abandoned_run_fails_with_error() {
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;

    let config = services.stores.configs.get("C1").unwrap();
    let job = services
        .job_service
        .create_job(&config, JobOrigin::default())
        .await
        .unwrap();
    let a1 = ResourceId::new("A1");

    unwrap_assignment(
        services
            .dispatcher
            .sync(&a1, sync_request("A1", &["build", "test"]))
            .await
            .unwrap(),
    );

    // The agent comes back idle without reporting a result: crash.
    services
        .dispatcher
        .sync(&a1, sync_request("A1", &["build", "test"]))
        .await
        .unwrap();

    let current = services.job_service.get(&job.id).unwrap();
    assert_eq!(current.tasks["b"].result(), Some(ResultCode::Error));
    // The agent itself was released again.
    let agent = services.stores.resources.get("A1").unwrap();
    assert!(!agent.is_reserved());
}

#[test]
async fn exit_on_idle_releases_the_agent() {
    let bed = testbed().await;
    let services = &bed.services;
    services
        .stores
        .resources
        .add(agent("A1", &[]))
        .await
        .unwrap();

    let mut request = sync_request("A1", &[]);
    request.exit_on_idle = true;
    let response = services
        .dispatcher
        .sync(&ResourceId::new("A1"), request)
        .await
        .unwrap();
    assert!(matches!(response, SyncResponse::Exit(_)));

    // The flag does not stick.
    let agent = services.stores.resources.get("A1").unwrap();
    assert!(!agent.runner_state().unwrap().exit_on_idle);
}

#[test]
async fn retry_appends_a_fresh_attempt() {
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;

    let config = services.stores.configs.get("C1").unwrap();
    let job = services
        .job_service
        .create_job(&config, JobOrigin::default())
        .await
        .unwrap();
    let a1 = ResourceId::new("A1");

    unwrap_assignment(
        services
            .dispatcher
            .sync(&a1, sync_request("A1", &["build", "test"]))
            .await
            .unwrap(),
    );
    let mut report = report_ok(job.id.as_str(), "b", &[]);
    report.result = ReportedResult::Error;
    services.dispatcher.task_done(&a1, report).await.unwrap();

    let retried = services
        .job_service
        .retry_task(&job.id, "b", Utc::now())
        .await
        .unwrap();
    assert_eq!(retried.tasks["b"].runs.len(), 2);
    assert_eq!(retried.tasks["b"].state(), RunState::Waiting);
    // The failure stays on record until the new attempt terminates.
    assert_eq!(retried.tasks["b"].result(), Some(ResultCode::Error));

    let assignment = unwrap_assignment(
        services
            .dispatcher
            .sync(&a1, sync_request("A1", &["build", "test"]))
            .await
            .unwrap(),
    );
    assert_eq!(assignment.run.task_name, "b");
    services
        .dispatcher
        .task_done(&a1, report_ok(job.id.as_str(), "b", &[("bin", "sf://bin/2")]))
        .await
        .unwrap();

    let current = services.job_service.get(&job.id).unwrap();
    assert_eq!(current.tasks["b"].result(), Some(ResultCode::Ok));
}

#[test]
async fn extraction_shadow_run_follows_the_task() {
    let bed = testbed().await;
    let services = &bed.services;
    let defs = &services.definition_service;

    let mut fw = framework("measure", &[], &[]);
    fw.params
        .insert("sf.extractor".to_string(), "true".to_string());
    defs.create_framework(fw).await.unwrap();
    defs.create_task_def(task_def("m", "measure")).await.unwrap();
    services
        .stores
        .resources
        .add(agent("A1", &[]))
        .await
        .unwrap();

    let config = configuration("CM", &["m"]);
    let job = services
        .job_service
        .create_job(&config, JobOrigin::default())
        .await
        .unwrap();
    let a1 = ResourceId::new("A1");

    unwrap_assignment(
        services
            .dispatcher
            .sync(&a1, sync_request("A1", &[]))
            .await
            .unwrap(),
    );
    services
        .dispatcher
        .task_done(&a1, report_ok(job.id.as_str(), "m", &[]))
        .await
        .unwrap();

    // The job is not final until the extraction ran.
    let current = services.job_service.get(&job.id).unwrap();
    assert!(current.tasks_terminal());
    assert!(!services.job_service.is_final(&current));

    let shadow = match services
        .dispatcher
        .sync(&a1, sync_request("A1", &[]))
        .await
        .unwrap()
    {
        SyncResponse::ShadowAssignment(payload) => payload,
        other => panic!("expected a shadow assignment, got {other:?}"),
    };
    assert_eq!(shadow.task_name, "m");

    let mut data = std::collections::BTreeMap::new();
    data.insert("memory".to_string(), "512".to_string());
    services
        .dispatcher
        .shadow_done(
            &a1,
            ShadowReport {
                shadow_id: shadow.shadow_id,
                result: ReportedResult::Ok,
                data,
            },
        )
        .await
        .unwrap();

    let current = services.job_service.get(&job.id).unwrap();
    assert!(services.job_service.is_final(&current));

    let values = services
        .results
        .get_data("m", &[shadow.run_id.0.clone()], "memory")
        .await;
    assert_eq!(values, vec![(shadow.run_id.0.clone(), "512".to_string())]);
}

#[test]
async fn assignment_is_refused_for_foreign_reports(){
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;
    services
        .stores
        .resources
        .add(agent("A2", &["build", "test"]))
        .await
        .unwrap();

    let config = services.stores.configs.get("C1").unwrap();
    let job = services
        .job_service
        .create_job(&config, JobOrigin::default())
        .await
        .unwrap();
    let a1 = ResourceId::new("A1");
    let a2 = ResourceId::new("A2");

    let assignment = unwrap_assignment(
        services
            .dispatcher
            .sync(&a1, sync_request("A1", &["build", "test"]))
            .await
            .unwrap(),
    );
    assert_eq!(assignment.run.task_name, "b");

    // Only one task is ready; the second agent has to wait.
    let response = services
        .dispatcher
        .sync(&a2, sync_request("A2", &["build", "test"]))
        .await
        .unwrap();
    assert!(matches!(response, SyncResponse::Wait(_)));

    // A completion report from the wrong agent is rejected.
    let foreign = services
        .dispatcher
        .task_done(&a2, report_ok(job.id.as_str(), "b", &[]))
        .await;
    assert!(matches!(foreign, Err(EngineError::Mismatch(_))));
}

#[test]
async fn job_target_gates_agents(){
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;

    let mut config = (*services.stores.configs.get("C1").unwrap()).clone();
    config.target = Some("embedded".to_string());
    let job = services
        .job_service
        .create_job(&config, JobOrigin::default())
        .await
        .unwrap();
    let a1 = ResourceId::new("A1");

    // The agent lacks the target capability.
    let response = services
        .dispatcher
        .sync(&a1, sync_request("A1", &["build", "test"]))
        .await
        .unwrap();
    assert!(matches!(response, SyncResponse::Wait(_)));

    // Advertising the target makes the job eligible.
    let assignment = unwrap_assignment(
        services
            .dispatcher
            .sync(&a1, sync_request("A1", &["build", "test", "embedded"]))
            .await
            .unwrap(),
    );
    assert_eq!(assignment.run.job_id, job.id);
}
