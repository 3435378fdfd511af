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

//! Matches resource claims against the current resource fleet and tracks
//! reservations.

use super::matching::find_match;
use crate::config::SyncConfig;
use crate::model::definitions::{ResourceClaim, TASK_RUNNER_TYPE};
use crate::model::resource::{Reservation, Resource};
use crate::model::StatusLevel;
use crate::repo::stores::Stores;
use crate::repo::RepoError;
use anvil_common::model::{ResTypeId, ResourceId, TaskRunId};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::{debug, error};

/// Why a claim could not be satisfied, per status level, so users can see
/// what a waiting task is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitReason {
    /// Fewer resources of this type exist than the claim needs.
    TooFewResources {
        res_type: ResTypeId,
        shortage: usize,
        level: StatusLevel,
    },
    /// No resource at this level offers the capabilities one spec requires.
    NoCapableResource {
        reference: String,
        res_type: ResTypeId,
        level: StatusLevel,
    },
    /// The computed assignment would violate a capability requirement.
    CapabilityMismatch {
        res_type: ResTypeId,
        level: StatusLevel,
    },
}

impl WaitReason {
    pub fn level(&self) -> StatusLevel {
        match self {
            WaitReason::TooFewResources { level, .. }
            | WaitReason::NoCapableResource { level, .. }
            | WaitReason::CapabilityMismatch { level, .. } => *level,
        }
    }
}

impl Display for WaitReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitReason::TooFewResources {
                res_type,
                shortage,
                level,
            } => write!(
                f,
                "{shortage} more \"{res_type}\" resource(s) needed, counting those currently {level}"
            ),
            WaitReason::NoCapableResource {
                reference,
                res_type,
                level,
            } => write!(
                f,
                "no \"{res_type}\" resource with the capabilities required by \"{reference}\", counting those currently {level}"
            ),
            WaitReason::CapabilityMismatch { res_type, level } => write!(
                f,
                "no capability-respecting assignment of \"{res_type}\" resources, counting those currently {level}"
            ),
        }
    }
}

/// Finds a reservation satisfying `claim` among `candidates`.
///
/// Only `Free` resources can end up in the returned assignment. When
/// `why_not` is given, the matcher keeps widening the candidate set level by
/// level and records, per level, what still prevents a match, yielding the
/// diagnostic a user sees for a waiting task.
pub fn pick_resources(
    claim: &ResourceClaim,
    candidates: &BTreeMap<ResourceId, Arc<Resource>>,
    now: DateTime<Utc>,
    sync: &SyncConfig,
    mut why_not: Option<&mut Vec<WaitReason>>,
) -> Option<BTreeMap<String, Arc<Resource>>> {
    let levels: &[StatusLevel] = if why_not.is_some() {
        &StatusLevel::ALL
    } else {
        &[StatusLevel::Free]
    };

    let mut reservation: BTreeMap<String, Arc<Resource>> = BTreeMap::new();

    for res_type in claim.res_types() {
        let specs: Vec<_> = claim.specs_of_type(&res_type).collect();

        let mut by_level: BTreeMap<StatusLevel, Vec<&Arc<Resource>>> = BTreeMap::new();
        for resource in candidates.values() {
            if resource.res_type == res_type {
                by_level
                    .entry(resource.status_level(now, sync.warn_after, sync.lost_after))
                    .or_default()
                    .push(resource);
            }
        }

        let mut pool: Vec<&Arc<Resource>> = Vec::new();
        for level in levels {
            let new_resources = by_level.get(level).map(Vec::as_slice).unwrap_or(&[]);
            if new_resources.is_empty() && *level != StatusLevel::Free {
                continue;
            }
            // Sorted insertion keeps the column order deterministic, which is
            // what breaks cost ties by ascending resource id.
            pool.extend(
                new_resources
                    .iter()
                    .copied()
                    .sorted_by(|a, b| a.id.cmp(&b.id)),
            );

            if specs.len() > pool.len() {
                if let Some(reasons) = why_not.as_deref_mut() {
                    reasons.push(WaitReason::TooFewResources {
                        res_type: res_type.clone(),
                        shortage: specs.len() - pool.len(),
                        level: *level,
                    });
                }
                continue;
            }

            // Cells that would violate a capability requirement get a cost
            // that is always worse than any valid assignment.
            let infinity: u64 = pool.iter().map(|resource| resource.cost()).sum::<u64>() + 1;
            let mut matrix: Vec<Vec<u64>> = Vec::with_capacity(specs.len());
            let mut rows_complete = true;
            for spec in &specs {
                let row: Vec<u64> = pool
                    .iter()
                    .map(|resource| {
                        if spec.capabilities.is_subset(&resource.capabilities) {
                            resource.cost()
                        } else {
                            infinity
                        }
                    })
                    .collect();
                if row.iter().all(|&cost| cost == infinity) {
                    rows_complete = false;
                    if let Some(reasons) = why_not.as_deref_mut() {
                        reasons.push(WaitReason::NoCapableResource {
                            reference: spec.reference.clone(),
                            res_type: res_type.clone(),
                            level: *level,
                        });
                    }
                } else {
                    matrix.push(row);
                }
            }
            if !rows_complete {
                continue;
            }

            let Some(matched) = find_match(&mut matrix) else {
                continue;
            };

            let mut assignment: BTreeMap<String, Arc<Resource>> = BTreeMap::new();
            let mut valid = true;
            for (spec, &column) in specs.iter().zip(matched.iter()) {
                let resource = pool[column];
                if spec.capabilities.is_subset(&resource.capabilities) {
                    assignment.insert(spec.reference.clone(), Arc::clone(resource));
                } else {
                    if let Some(reasons) = why_not.as_deref_mut() {
                        reasons.push(WaitReason::CapabilityMismatch {
                            res_type: res_type.clone(),
                            level: *level,
                        });
                    }
                    valid = false;
                    break;
                }
            }
            if valid {
                if *level == StatusLevel::Free {
                    reservation.extend(assignment);
                }
                // A match at this level makes wider levels uninteresting.
                break;
            }
        }
    }

    if reservation.len() == claim.len() {
        Some(reservation)
    } else {
        None
    }
}

/// Reserves and releases resources on behalf of task runs.
#[derive(Clone)]
pub struct ResourceBroker {
    stores: Stores,
    sync: SyncConfig,
}

impl ResourceBroker {
    pub fn new(stores: Stores, sync: SyncConfig) -> Self {
        Self { stores, sync }
    }

    fn candidates_for(
        &self,
        claim: &ResourceClaim,
        runner: Option<&Arc<Resource>>,
    ) -> BTreeMap<ResourceId, Arc<Resource>> {
        let mut candidates = BTreeMap::new();
        for res_type in claim.res_types() {
            if res_type.as_str() == TASK_RUNNER_TYPE {
                // The agent slot is pinned to the syncing agent; other
                // runners must not be picked on its behalf.
                if let Some(runner) = runner {
                    candidates.insert(runner.id.clone(), Arc::clone(runner));
                } else {
                    for resource in self.stores.resources_of_type(&res_type) {
                        candidates.insert(resource.id.clone(), resource);
                    }
                }
            } else {
                for resource in self.stores.resources_of_type(&res_type) {
                    candidates.insert(resource.id.clone(), resource);
                }
            }
        }
        candidates
    }

    /// Atomically reserves a full claim for `run_id`, with the given agent
    /// pinned under the `SF_TR` reference. Returns `None` if no assignment
    /// over free resources exists; this is never an error.
    pub async fn reserve(
        &self,
        claim: &ResourceClaim,
        runner: &Arc<Resource>,
        run_id: &TaskRunId,
        now: DateTime<Utc>,
    ) -> Result<Option<BTreeMap<String, Arc<Resource>>>, RepoError> {
        let candidates = self.candidates_for(claim, Some(runner));
        let Some(assignment) = pick_resources(claim, &candidates, now, &self.sync, None) else {
            return Ok(None);
        };

        let mut reserved = BTreeMap::new();
        for (reference, resource) in assignment {
            // Shared resource types (neither per-task nor per-job exclusive)
            // are handed out without being locked; many runs may use them at
            // once.
            let exclusive = self
                .stores
                .res_types
                .get(resource.res_type.as_str())
                .map(|res_type| res_type.per_task_exclusive || res_type.per_job_exclusive)
                .unwrap_or(true);
            if exclusive {
                let mut record = (*resource).clone();
                record.reserved = Some(Reservation::Run(run_id.clone()));
                let updated = self.stores.resources.update(record).await?;
                reserved.insert(reference, updated);
            } else {
                reserved.insert(reference, resource);
            }
        }
        debug!(
            "Reserved {} resource(s) for run {run_id}",
            reserved.len()
        );
        Ok(Some(reserved))
    }

    /// Releases the resources a finished run holds. Resources whose type is
    /// per-job exclusive stay reserved until the whole job terminates.
    /// Releasing an already-released run is a no-op.
    pub async fn release_task(&self, run_id: &TaskRunId) -> Result<(), RepoError> {
        self.release(run_id, false).await
    }

    /// Releases everything the given runs still hold, including per-job
    /// exclusive resources; called on job termination.
    pub async fn release_job(&self, run_ids: &[TaskRunId]) -> Result<(), RepoError> {
        for run_id in run_ids {
            self.release(run_id, true).await?;
        }
        Ok(())
    }

    async fn release(&self, run_id: &TaskRunId, include_per_job: bool) -> Result<(), RepoError> {
        for resource in self.stores.resources.values() {
            if resource.reserved_by_run() != Some(run_id) {
                continue;
            }
            if !include_per_job {
                let per_job = self
                    .stores
                    .res_types
                    .get(resource.res_type.as_str())
                    .map(|res_type| res_type.per_job_exclusive)
                    .unwrap_or(false);
                if per_job {
                    continue;
                }
            }
            let mut record = (*resource).clone();
            record.reserved = None;
            if let Err(err) = self.stores.resources.update(record).await {
                // The resource may have been deleted concurrently; releasing
                // must stay idempotent.
                error!("Failed to release resource {}: {err}", resource.id);
            }
        }
        Ok(())
    }

    /// Diagnostic matching over the whole fleet: why is this claim waiting?
    pub fn explain(&self, claim: &ResourceClaim, now: DateTime<Utc>) -> Vec<WaitReason> {
        let candidates = self.candidates_for(claim, None);
        let mut reasons = Vec::new();
        pick_resources(claim, &candidates, now, &self.sync, Some(&mut reasons));
        reasons.sort_by_key(|reason| reason.level());
        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::definitions::{ResourceSpec, TASK_RUNNER_REF};
    use test_r::test;

    fn resource(id: &str, res_type: &str, caps: &[&str]) -> Arc<Resource> {
        Arc::new(Resource::new(
            id,
            res_type,
            format!("res://{id}"),
            "",
            caps.iter().map(|cap| cap.to_string()),
        ))
    }

    fn candidates(resources: Vec<Arc<Resource>>) -> BTreeMap<ResourceId, Arc<Resource>> {
        resources
            .into_iter()
            .map(|resource| (resource.id.clone(), resource))
            .collect()
    }

    fn claim(specs: Vec<ResourceSpec>) -> ResourceClaim {
        ResourceClaim::create(specs)
    }

    fn spec(reference: &str, res_type: &str, caps: &[&str]) -> ResourceSpec {
        ResourceSpec::new(reference, res_type, caps.iter().map(|cap| cap.to_string()))
    }

    #[test]
    fn empty_claim_succeeds_with_empty_reservation() {
        let picked = pick_resources(
            &claim(vec![]),
            &candidates(vec![]),
            Utc::now(),
            &SyncConfig::default(),
            None,
        );
        assert_eq!(picked, Some(BTreeMap::new()));
    }

    #[test]
    fn cheapest_capable_resources_win() {
        // Two equal specs; the single-capability resource must always be
        // part of the assignment, and the tie between r2/r3 goes to the
        // lower id.
        let picked = pick_resources(
            &claim(vec![spec("a", "ate", &["c1"]), spec("b", "ate", &["c1"])]),
            &candidates(vec![
                resource("r3", "ate", &["c1", "c3"]),
                resource("r1", "ate", &["c1"]),
                resource("r2", "ate", &["c1", "c2"]),
            ]),
            Utc::now(),
            &SyncConfig::default(),
            None,
        )
        .unwrap();
        let ids: BTreeSet<&str> = picked.values().map(|r| r.id.as_str()).collect();
        assert!(ids.contains("r1"));
        assert!(ids.contains("r2"));
        assert!(!ids.contains("r3"));
    }

    #[test]
    fn capability_subset_is_enforced() {
        let now = Utc::now();
        let mut agent = (*resource("agent-1", "sf.tr", &["cpu"])).clone();
        agent.runner_state_mut().unwrap().last_sync = Some(now);

        let mut reasons = Vec::new();
        let picked = pick_resources(
            &claim(vec![spec(TASK_RUNNER_REF, "sf.tr", &["gpu"])]),
            &candidates(vec![Arc::new(agent)]),
            now,
            &SyncConfig::default(),
            Some(&mut reasons),
        );
        assert_eq!(picked, None);
        assert!(reasons.iter().any(|reason| matches!(
            reason,
            WaitReason::NoCapableResource { reference, level: StatusLevel::Free, .. }
                if reference == TASK_RUNNER_REF
        )));
    }

    #[test]
    fn reserved_resources_are_not_free() {
        let r1 = resource("r1", "ate", &["c1"]);
        let mut taken = (*r1).clone();
        taken.reserved = Some(Reservation::Run(TaskRunId::new("other")));

        let mut reasons = Vec::new();
        let picked = pick_resources(
            &claim(vec![spec("a", "ate", &["c1"])]),
            &candidates(vec![Arc::new(taken)]),
            Utc::now(),
            &SyncConfig::default(),
            Some(&mut reasons),
        );
        assert_eq!(picked, None);
        // The only obstacle sits at the Free level; the match succeeds once
        // reserved resources are counted, so no further reasons accumulate.
        assert!(reasons
            .iter()
            .all(|reason| reason.level() == StatusLevel::Free));
    }

    #[test]
    fn claim_larger_than_fleet_reports_shortage() {
        let mut reasons = Vec::new();
        let picked = pick_resources(
            &claim(vec![spec("a", "ate", &[]), spec("b", "ate", &[])]),
            &candidates(vec![resource("r1", "ate", &[])]),
            Utc::now(),
            &SyncConfig::default(),
            Some(&mut reasons),
        );
        assert_eq!(picked, None);
        assert!(reasons.iter().any(|reason| matches!(
            reason,
            WaitReason::TooFewResources { shortage: 1, .. }
        )));
    }
}
