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
use anvil_common::model::{ConfigId, ResourceId, ScheduleId};
use anvil_service::model::schedule::{
    RepeatKind, Schedule, ScheduleStatus, ScheduleTarget,
};
use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use test_r::test;

fn schedule(id: &str, repeat: RepeatKind, target: ScheduleTarget) -> Schedule {
    Schedule {
        id: ScheduleId::new(id),
        repeat,
        target,
        start_time: None,
        suspended: false,
        owner: None,
        comment: String::new(),
        trigger_filters: BTreeSet::new(),
        trigger_fired: false,
        last_started: None,
        last_jobs: vec![],
        done: false,
    }
}

#[test]
async fn s5_continuous_schedule_backpressure() {
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;

    let t0 = Utc::now();
    services
        .stores
        .schedules
        .add(schedule(
            "S",
            RepeatKind::Continuously {
                min_delay_minutes: 5,
            },
            ScheduleTarget::Config {
                config_id: ConfigId::new("C1"),
            },
        ))
        .await
        .unwrap();

    // First batch starts right away; the earliest restart is five minutes
    // out.
    services.scheduler.tick(t0).await.unwrap();
    let sched = services.stores.schedules.get("S").unwrap();
    assert_eq!(sched.last_jobs.len(), 1);
    assert_eq!(sched.start_time, Some(t0 + Duration::minutes(5)));
    let first_job = sched.last_jobs[0].clone();

    // At the five minute mark the batch is still running: no new jobs.
    services
        .scheduler
        .tick(t0 + Duration::minutes(5))
        .await
        .unwrap();
    let sched = services.stores.schedules.get("S").unwrap();
    assert_eq!(sched.last_jobs, vec![first_job.clone()]);
    assert_eq!(services.scheduler.status(&sched), ScheduleStatus::Running);

    // The batch finishes at t+7; driving both tasks to completion.
    let a1 = ResourceId::new("A1");
    for _ in 0..2 {
        let assignment = unwrap_assignment(
            services
                .dispatcher
                .sync(&a1, sync_request("A1", &["build", "test"]))
                .await
                .unwrap(),
        );
        let outputs: Vec<(&str, &str)> = if assignment.run.task_name == "b" {
            vec![("bin", "sf://bin/1")]
        } else {
            vec![]
        };
        services
            .dispatcher
            .task_done(
                &a1,
                report_ok(first_job.as_str(), &assignment.run.task_name, &outputs),
            )
            .await
            .unwrap();
    }

    // The next batch starts at t+7, not t+5, and the following earliest
    // start is t+12.
    let t7 = t0 + Duration::minutes(7);
    services.scheduler.tick(t7).await.unwrap();
    let sched = services.stores.schedules.get("S").unwrap();
    assert_eq!(sched.last_jobs.len(), 1);
    assert_ne!(sched.last_jobs[0], first_job);
    assert_eq!(sched.start_time, Some(t7 + Duration::minutes(5)));
}

#[test]
async fn once_schedule_fires_a_single_time() {
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;

    services
        .stores
        .schedules
        .add(schedule(
            "once",
            RepeatKind::Once,
            ScheduleTarget::Config {
                config_id: ConfigId::new("C1"),
            },
        ))
        .await
        .unwrap();

    let now = Utc::now();
    services.scheduler.tick(now).await.unwrap();
    let sched = services.stores.schedules.get("once").unwrap();
    assert!(sched.done);
    assert_eq!(sched.last_jobs.len(), 1);
    assert_eq!(services.scheduler.status(&sched), ScheduleStatus::Done);

    // A later tick creates nothing new.
    services
        .scheduler
        .tick(now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(services.stores.jobs.len(), 1);
}

#[test]
async fn tag_selector_fans_out_over_configurations() {
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;

    // A second configuration carrying the same tag.
    let mut other = configuration("C2", &["b"]);
    other
        .tags
        .entry("branch".to_string())
        .or_default()
        .insert("main".to_string());
    services.stores.configs.add(other).await.unwrap();

    let mut tagged = (*services.stores.configs.get("C1").unwrap()).clone();
    tagged
        .tags
        .entry("branch".to_string())
        .or_default()
        .insert("main".to_string());
    services.stores.configs.update(tagged).await.unwrap();

    services
        .stores
        .schedules
        .add(schedule(
            "per-branch",
            RepeatKind::Once,
            ScheduleTarget::Tag {
                key: "branch".to_string(),
                value: "main".to_string(),
            },
        ))
        .await
        .unwrap();

    services.scheduler.tick(Utc::now()).await.unwrap();
    let sched = services.stores.schedules.get("per-branch").unwrap();
    assert_eq!(sched.last_jobs.len(), 2);
}

#[test]
async fn triggered_schedule_waits_for_its_webhook() {
    let bed = testbed().await;
    let services = &bed.services;
    seed_build_test(services).await;

    let mut sched = schedule(
        "on-push",
        RepeatKind::Triggered,
        ScheduleTarget::Config {
            config_id: ConfigId::new("C1"),
        },
    );
    sched
        .trigger_filters
        .insert("central-repo/main".to_string());
    services.stores.schedules.add(sched).await.unwrap();

    // No trigger yet: nothing happens.
    services.scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(services.stores.jobs.len(), 0);

    // A push on an unrelated branch does not raise the flag.
    let triggered = services
        .scheduler
        .trigger(
            &ResourceId::new("central-repo"),
            &BTreeSet::from(["feature-x".to_string()]),
        )
        .await
        .unwrap();
    assert!(triggered.is_empty());

    let triggered = services
        .scheduler
        .trigger(
            &ResourceId::new("central-repo"),
            &BTreeSet::from(["main".to_string()]),
        )
        .await
        .unwrap();
    assert_eq!(triggered, vec![ScheduleId::new("on-push")]);

    services.scheduler.tick(Utc::now()).await.unwrap();
    let sched = services.stores.schedules.get("on-push").unwrap();
    assert_eq!(sched.last_jobs.len(), 1);
    assert!(!sched.trigger_fired);

    // The flag was consumed; the next tick stays quiet.
    services.scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(services.stores.jobs.len(), 1);
}

#[test]
async fn invalid_configuration_leaves_schedule_in_error() {
    let bed = testbed().await;
    let services = &bed.services;
    let defs = &services.definition_service;

    // A framework with an external, non-token input and a configuration
    // that does not supply a locator for it.
    defs.create_product_def(product(
        "spec-sheet",
        anvil_service::model::definitions::ProductType::File,
    ))
    .await
    .unwrap();
    defs.create_framework(framework("check", &["spec-sheet"], &[]))
        .await
        .unwrap();
    defs.create_task_def(task_def("c", "check")).await.unwrap();
    services
        .stores
        .configs
        .add(configuration("CC", &["c"]))
        .await
        .unwrap();

    services
        .stores
        .schedules
        .add(schedule(
            "broken",
            RepeatKind::Once,
            ScheduleTarget::Config {
                config_id: ConfigId::new("CC"),
            },
        ))
        .await
        .unwrap();

    services.scheduler.tick(Utc::now()).await.unwrap();
    let sched = services.stores.schedules.get("broken").unwrap();
    // The schedule stays pending so the next tick can retry after the
    // configuration is fixed.
    assert!(!sched.done);
    assert!(sched.last_jobs.is_empty());
    assert_eq!(services.scheduler.status(&sched), ScheduleStatus::Error);

    // Supplying the input repairs the schedule.
    let mut fixed = (*services.stores.configs.get("CC").unwrap()).clone();
    external_input(&mut fixed, "spec-sheet", Some("sf://sheets/7"));
    services.stores.configs.update(fixed).await.unwrap();

    services.scheduler.tick(Utc::now()).await.unwrap();
    let sched = services.stores.schedules.get("broken").unwrap();
    assert!(sched.done);
    assert_eq!(sched.last_jobs.len(), 1);
}
