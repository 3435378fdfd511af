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

use crate::common::*;
use anvil_common::model::ResourceId;
use anvil_service::repo::stores::Stores;
use anvil_service::service::job::JobOrigin;
use test_r::test;

#[test]
async fn records_survive_a_restart_byte_for_byte() {
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;

    let config = services.stores.configs.get("C1").unwrap();
    let job = services
        .job_service
        .create_job(&config, JobOrigin::default())
        .await
        .unwrap();

    // A second Stores instance over the same directory sees identical
    // records.
    let reopened = Stores::open(bed._dir.path()).await.unwrap();
    assert_eq!(
        reopened.jobs.get(job.id.as_str()).as_deref(),
        Some(&*job)
    );
    assert_eq!(
        reopened.configs.get("C1").as_deref(),
        Some(&*config)
    );
    assert_eq!(reopened.frameworks.len(), 2);
    assert_eq!(reopened.task_defs.len(), 2);
    assert_eq!(
        reopened.resources.get("A1").as_deref(),
        services.stores.resources.get("A1").as_deref()
    );
}

#[test]
async fn reservation_and_release_restore_the_resource_store() {
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;

    let before: Vec<_> = services.stores.resources.values();

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

    // While running, the agent is reserved by the run.
    let held = services.stores.resources.get("A1").unwrap();
    assert_eq!(
        held.reserved_by_run(),
        Some(&assignment.run.run_id)
    );

    services
        .dispatcher
        .task_done(&a1, report_ok(job.id.as_str(), "b", &[("bin", "sf://bin/1")]))
        .await
        .unwrap();

    // Releasing an already-released run is a no-op, not an error.
    services
        .broker
        .release_task(&assignment.run.run_id)
        .await
        .unwrap();

    let after = services.stores.resources.get("A1").unwrap();
    assert!(!after.is_reserved());
    // Suspension bookkeeping was never touched by reserve/release.
    let before_a1 = before
        .iter()
        .find(|resource| resource.id == a1)
        .unwrap();
    assert_eq!(after.changed_time, before_a1.changed_time);
    assert_eq!(after.suspended, before_a1.suspended);
}
