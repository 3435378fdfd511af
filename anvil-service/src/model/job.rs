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

use super::definitions::{ProductType, ResourceClaim, VersionKey};
use super::{ProductState, ResultCode, RunState};
use anvil_common::model::{
    ConfigId, FrameworkId, JobId, ProductDefId, ResourceId, ScheduleId, ShadowRunId, TaskDefId,
    TaskRunId, UserId,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Marker locator stored for token products, which carry no data.
pub const TOKEN_LOCATOR: &str = "token";

/// A typed artifact flowing between the tasks of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub name: ProductDefId,
    pub product_type: ProductType,
    pub local: bool,
    pub combined: bool,
    pub state: ProductState,
    /// For local products: the agent holding the concrete instance.
    pub local_at: Option<ResourceId>,
    /// First reported locator; the default one consumers receive.
    pub locator: Option<String>,
    /// Locator per producing task, in report order.
    pub producers: BTreeMap<String, String>,
}

impl Product {
    pub fn is_available(&self) -> bool {
        self.state == ProductState::Done
    }

    pub fn is_blocked(&self) -> bool {
        self.state == ProductState::Blocked
    }

    /// Remembers a locator and the task that produced it. A second locator
    /// from the same task is ignored. Token locators are normalised to a
    /// fixed marker.
    pub fn store_locator(&mut self, locator: &str, task_name: &str) {
        let locator = if self.product_type == ProductType::Token {
            TOKEN_LOCATOR
        } else {
            locator
        };
        if self.locator.is_none() {
            self.locator = Some(locator.to_string());
        }
        self.producers
            .entry(task_name.to_string())
            .or_insert_with(|| locator.to_string());
    }

    /// `Done` and `Blocked` are terminal; these transitions fire at most once.
    pub fn done(&mut self) -> bool {
        if self.state == ProductState::Waiting {
            self.state = ProductState::Done;
            true
        } else {
            false
        }
    }

    pub fn blocked(&mut self) -> bool {
        if self.state == ProductState::Waiting {
            self.state = ProductState::Blocked;
            true
        } else {
            false
        }
    }
}

/// A single execution attempt of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub id: TaskRunId,
    pub state: RunState,
    /// Once set, never reassigned.
    pub runner: Option<ResourceId>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub result: Option<ResultCode>,
    pub summary: Option<String>,
    pub report_url: Option<String>,
    pub alert: bool,
    pub abort_requested: bool,
    /// Extraction bound to this run, if the framework asked for one.
    pub shadow_run: Option<ShadowRunId>,
}

impl TaskRun {
    pub fn new(id: TaskRunId) -> Self {
        Self {
            id,
            state: RunState::Waiting,
            runner: None,
            started_at: None,
            stopped_at: None,
            result: None,
            summary: None,
            report_url: None,
            alert: false,
            abort_requested: false,
            shadow_run: None,
        }
    }
}

/// A task within a job. Definition data is snapshotted at job creation so
/// later edits of the framework or task definition cannot change a running
/// job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub name: String,
    pub task_def: TaskDefId,
    pub def_key: VersionKey,
    pub framework: FrameworkId,
    pub framework_key: VersionKey,
    pub priority: i32,
    /// Effective parameters, resolved through the inheritance chain.
    pub params: BTreeMap<String, String>,
    /// Agents allowed to run this task; empty defers to the job-level set.
    pub runners: BTreeSet<ResourceId>,
    pub inputs: BTreeSet<ProductDefId>,
    pub outputs: BTreeSet<ProductDefId>,
    pub wrapper: String,
    pub extractor: bool,
    pub timeout_minutes: Option<u32>,
    pub claim: ResourceClaim,
    pub runs: Vec<TaskRun>,
}

impl Task {
    pub fn current_run(&self) -> &TaskRun {
        self.runs.last().expect("every task has at least one run")
    }

    pub fn current_run_mut(&mut self) -> &mut TaskRun {
        self.runs.last_mut().expect("every task has at least one run")
    }

    pub fn state(&self) -> RunState {
        self.current_run().state
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// The result of the last terminal run, if any run finished yet.
    pub fn result(&self) -> Option<ResultCode> {
        self.runs.iter().rev().find_map(|run| match run.state {
            RunState::Done => run.result,
            RunState::Cancelled => Some(ResultCode::Cancelled),
            _ => None,
        })
    }
}

/// A running (or completed) instance of a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub created_at: DateTime<Utc>,
    pub owner: Option<UserId>,
    pub target: Option<String>,
    pub config_id: Option<ConfigId>,
    pub schedule_id: Option<ScheduleId>,
    pub comment: String,
    pub params: BTreeMap<String, String>,
    pub tasks: IndexMap<String, Task>,
    pub products: BTreeMap<ProductDefId, Product>,
    /// Agents allowed to run any task; empty means all.
    pub runners: BTreeSet<ResourceId>,
}

impl Job {
    /// A task is ready iff it has a waiting attempt, every input it consumes
    /// is available and no input is blocked.
    pub fn task_ready(&self, task: &Task) -> bool {
        task.state() == RunState::Waiting
            && task.inputs.iter().all(|input| {
                self.products
                    .get(input)
                    .is_some_and(|product| product.is_available())
            })
    }

    /// Ready tasks ordered by (priority descending, insertion order
    /// ascending).
    pub fn ready_tasks(&self) -> Vec<&Task> {
        let mut ready: Vec<(usize, &Task)> = self
            .tasks
            .values()
            .enumerate()
            .filter(|(_, task)| self.task_ready(task))
            .collect();
        ready.sort_by_key(|(index, task)| (-task.priority, *index));
        ready.into_iter().map(|(_, task)| task).collect()
    }

    /// Agents admitted for the given task: the task-level set, or the
    /// job-level set if the task does not restrict, or any agent.
    pub fn admits_runner(&self, task: &Task, runner: &ResourceId) -> bool {
        let set = if task.runners.is_empty() {
            &self.runners
        } else {
            &task.runners
        };
        set.is_empty() || set.contains(runner)
    }

    /// The tasks that can produce the given product.
    pub fn producers_of<'a>(&'a self, product: &ProductDefId) -> impl Iterator<Item = &'a Task> {
        self.tasks
            .values()
            .filter(move |task| task.outputs.contains(product))
    }

    /// Drives products to `Blocked` and consumer tasks to `Cancelled` until
    /// a fixpoint is reached. Returns the names of the tasks cancelled by
    /// this pass.
    pub fn propagate_blocking(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut cancelled = Vec::new();
        loop {
            // Products whose every potential producer is terminal without
            // having reported a locator can never become available.
            let mut newly_blocked = Vec::new();
            for (name, product) in &self.products {
                if product.state != ProductState::Waiting {
                    continue;
                }
                let mut producers = self.producers_of(name).peekable();
                let externally_supplied = producers.peek().is_none();
                if externally_supplied || producers.all(|task| task.is_terminal()) {
                    newly_blocked.push(name.clone());
                }
            }
            for name in &newly_blocked {
                if let Some(product) = self.products.get_mut(name) {
                    product.blocked();
                }
            }

            // Consumers of a blocked input are cancelled without running.
            let mut newly_cancelled = Vec::new();
            for task in self.tasks.values() {
                if task.state() != RunState::Waiting {
                    continue;
                }
                let blocked_input = task.inputs.iter().any(|input| {
                    self.products
                        .get(input)
                        .is_some_and(|product| product.is_blocked())
                });
                if blocked_input {
                    newly_cancelled.push(task.name.clone());
                }
            }
            if newly_blocked.is_empty() && newly_cancelled.is_empty() {
                break;
            }
            for name in newly_cancelled {
                if let Some(task) = self.tasks.get_mut(&name) {
                    let run = task.current_run_mut();
                    run.state = RunState::Cancelled;
                    run.result = Some(ResultCode::Cancelled);
                    run.stopped_at = Some(now);
                    cancelled.push(name);
                }
            }
        }
        cancelled
    }

    /// A job is final iff every task reached a terminal state. (Pending
    /// extraction shadow runs are tracked outside the job record and checked
    /// by the engine.)
    pub fn tasks_terminal(&self) -> bool {
        self.tasks.values().all(|task| task.is_terminal())
    }

    /// Worst-case merge of the task results. Cancellation only dominates when
    /// nothing failed harder: an error that caused downstream cancellations
    /// is still reported as an error.
    pub fn result(&self) -> ResultCode {
        let mut worst = ResultCode::Ok;
        let mut any_cancelled = false;
        for task in self.tasks.values() {
            match task.result() {
                Some(ResultCode::Cancelled) => any_cancelled = true,
                Some(result) => worst = worst.max(result),
                None => {}
            }
        }
        if any_cancelled && worst < ResultCode::Error {
            ResultCode::Cancelled
        } else {
            worst
        }
    }

    /// (waiting, running, done-or-cancelled) task counts.
    pub fn task_counts(&self) -> (usize, usize, usize) {
        let mut waiting = 0;
        let mut running = 0;
        let mut terminal = 0;
        for task in self.tasks.values() {
            match task.state() {
                RunState::Waiting => waiting += 1,
                RunState::Running => running += 1,
                RunState::Done | RunState::Cancelled => terminal += 1,
            }
        }
        (waiting, running, terminal)
    }

    /// All run ids ever issued for this job; used to release per-job
    /// exclusive reservations at termination.
    pub fn all_run_ids(&self) -> Vec<TaskRunId> {
        self.tasks
            .values()
            .flat_map(|task| task.runs.iter().map(|run| run.id.clone()))
            .collect()
    }
}

/// A secondary execution bound to the same agent as its parent run; today
/// always a mid-level data extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowRun {
    pub id: ShadowRunId,
    pub job_id: JobId,
    pub task_name: String,
    pub run_id: TaskRunId,
    pub runner: ResourceId,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub state: RunState,
    pub result: Option<ResultCode>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    fn run(state: RunState, result: Option<ResultCode>) -> TaskRun {
        let mut run = TaskRun::new(TaskRunId::new("r"));
        run.state = state;
        run.result = result;
        run
    }

    fn task(name: &str, runs: Vec<TaskRun>) -> Task {
        Task {
            name: name.to_string(),
            task_def: TaskDefId::new(name),
            def_key: VersionKey("d".to_string()),
            framework: FrameworkId::new("fw"),
            framework_key: VersionKey("f".to_string()),
            priority: 0,
            params: BTreeMap::new(),
            runners: BTreeSet::new(),
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            wrapper: "fw".to_string(),
            extractor: false,
            timeout_minutes: None,
            claim: ResourceClaim::default(),
            runs,
        }
    }

    fn job(tasks: Vec<Task>) -> Job {
        Job {
            id: JobId::new("260801-120000-0000"),
            created_at: Utc::now(),
            owner: None,
            target: None,
            config_id: None,
            schedule_id: None,
            comment: String::new(),
            params: BTreeMap::new(),
            tasks: tasks.into_iter().map(|t| (t.name.clone(), t)).collect(),
            products: BTreeMap::new(),
            runners: BTreeSet::new(),
        }
    }

    #[test]
    fn task_result_is_last_terminal_run() {
        let t = task(
            "t",
            vec![
                run(RunState::Done, Some(ResultCode::Error)),
                run(RunState::Done, Some(ResultCode::Ok)),
            ],
        );
        assert_eq!(t.result(), Some(ResultCode::Ok));

        let retried = task(
            "t",
            vec![
                run(RunState::Done, Some(ResultCode::Error)),
                run(RunState::Waiting, None),
            ],
        );
        assert_eq!(retried.result(), Some(ResultCode::Error));
        assert!(!retried.is_terminal());
    }

    #[test]
    fn cancelled_run_without_done_yields_cancelled() {
        let t = task("t", vec![run(RunState::Cancelled, None)]);
        assert_eq!(t.result(), Some(ResultCode::Cancelled));
    }

    #[test]
    fn error_dominates_downstream_cancellation() {
        let j = job(vec![
            task("b", vec![run(RunState::Done, Some(ResultCode::Error))]),
            task("t", vec![run(RunState::Cancelled, None)]),
        ]);
        assert_eq!(j.result(), ResultCode::Error);
    }

    #[test]
    fn cancellation_dominates_success() {
        let j = job(vec![
            task("one", vec![run(RunState::Done, Some(ResultCode::Ok))]),
            task("two", vec![run(RunState::Cancelled, None)]),
        ]);
        assert_eq!(j.result(), ResultCode::Cancelled);
    }

    #[test]
    fn empty_job_is_final_with_ok_result() {
        let j = job(vec![]);
        assert!(j.tasks_terminal());
        assert_eq!(j.result(), ResultCode::Ok);
    }

    #[test]
    fn ready_tasks_order_by_priority_then_insertion() {
        let mut low = task("low", vec![run(RunState::Waiting, None)]);
        low.priority = 1;
        let mut high = task("high", vec![run(RunState::Waiting, None)]);
        high.priority = 5;
        let plain = task("plain", vec![run(RunState::Waiting, None)]);
        let j = job(vec![low, plain, high]);
        let names: Vec<&str> = j.ready_tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["high", "low", "plain"]);
    }

    #[test]
    fn token_locator_is_normalised() {
        let mut product = Product {
            name: ProductDefId::new("approved"),
            product_type: ProductType::Token,
            local: false,
            combined: false,
            state: ProductState::Waiting,
            local_at: None,
            locator: None,
            producers: BTreeMap::new(),
        };
        product.store_locator("ignored-value", "sign-off");
        assert_eq!(product.locator.as_deref(), Some(TOKEN_LOCATOR));
        assert_eq!(product.producers["sign-off"], TOKEN_LOCATOR);
    }

    #[test]
    fn product_transitions_are_one_way() {
        let mut product = Product {
            name: ProductDefId::new("bin"),
            product_type: ProductType::File,
            local: false,
            combined: false,
            state: ProductState::Waiting,
            local_at: None,
            locator: None,
            producers: BTreeMap::new(),
        };
        assert!(product.done());
        assert!(!product.blocked());
        assert_eq!(product.state, ProductState::Done);
    }
}
