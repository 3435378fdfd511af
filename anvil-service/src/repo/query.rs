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

use super::{Record, RecordObserver, RecordStore};
use crate::model::job::Job;
use anvil_common::model::JobId;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

/// Observer-maintained sorted view of the jobs that still have work left.
///
/// Job ids sort by creation time, so iterating this set yields the dispatch
/// order: oldest job first. The filter must only ever shrink for a given
/// record (a job never becomes unfinished again), which keeps membership
/// maintenance trivial.
pub struct UnfinishedJobQueue {
    ids: RwLock<BTreeSet<String>>,
}

impl UnfinishedJobQueue {
    /// Builds the initial view from the store contents and registers for
    /// updates. The returned queue must be kept alive by the caller; the
    /// store only holds a weak registration.
    pub fn attach(store: &RecordStore<Job>) -> (Arc<Self>, Arc<dyn RecordObserver<Job>>) {
        let ids = store
            .values()
            .into_iter()
            .filter(|job| !job.tasks_terminal())
            .map(|job| job.key())
            .collect();
        let queue = Arc::new(Self {
            ids: RwLock::new(ids),
        });
        let observer: Arc<dyn RecordObserver<Job>> = queue.clone();
        store.add_observer(&observer);
        (queue, observer)
    }

    /// Unfinished job ids in creation order.
    pub fn ids(&self) -> Vec<JobId> {
        self.ids
            .read()
            .expect("queue lock poisoned")
            .iter()
            .map(|id| JobId::new(id.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ids.read().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.read().expect("queue lock poisoned").is_empty()
    }
}

impl RecordObserver<Job> for UnfinishedJobQueue {
    fn added(&self, job: &Job) {
        if !job.tasks_terminal() {
            self.ids
                .write()
                .expect("queue lock poisoned")
                .insert(job.key());
        }
    }

    fn updated(&self, job: &Job) {
        let mut ids = self.ids.write().expect("queue lock poisoned");
        if job.tasks_terminal() {
            ids.remove(&job.key());
        } else {
            ids.insert(job.key());
        }
    }

    fn removed(&self, job: &Job) {
        self.ids
            .write()
            .expect("queue lock poisoned")
            .remove(&job.key());
    }
}
