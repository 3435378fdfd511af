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

use prometheus::{IntCounter, Registry};

/// Counters exposed on `/metrics`. Carried as an explicit value through the
/// bootstrap instead of process-wide statics.
#[derive(Clone)]
pub struct Metrics {
    pub jobs_created: IntCounter,
    pub jobs_finished: IntCounter,
    pub tasks_dispatched: IntCounter,
    pub sync_requests: IntCounter,
}

impl Metrics {
    pub fn register(registry: &Registry) -> Self {
        let jobs_created =
            IntCounter::new("anvil_jobs_created_total", "Jobs created").expect("valid metric");
        let jobs_finished = IntCounter::new("anvil_jobs_finished_total", "Jobs finished")
            .expect("valid metric");
        let tasks_dispatched = IntCounter::new(
            "anvil_tasks_dispatched_total",
            "Task runs handed to agents",
        )
        .expect("valid metric");
        let sync_requests =
            IntCounter::new("anvil_sync_requests_total", "Agent sync requests")
                .expect("valid metric");
        for counter in [
            &jobs_created,
            &jobs_finished,
            &tasks_dispatched,
            &sync_requests,
        ] {
            registry
                .register(Box::new(counter.clone()))
                .expect("metric registered once");
        }
        Self {
            jobs_created,
            jobs_finished,
            tasks_dispatched,
            sync_requests,
        }
    }
}
