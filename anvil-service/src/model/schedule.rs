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

use anvil_common::model::{ConfigId, JobId, ScheduleId, UserId};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// When and how often a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum RepeatKind {
    /// Fire once, then the schedule is done.
    Once,
    Daily,
    Weekly {
        /// Enabled days, Monday first.
        days: [bool; 7],
    },
    /// Fire again as soon as the previous batch finished, but no earlier
    /// than `min_delay_minutes` after the previous start.
    Continuously { min_delay_minutes: u32 },
    /// Fires only when an external trigger (webhook) raises the flag.
    Triggered,
}

/// What a schedule instantiates: a single configuration, or every
/// configuration carrying a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "select")]
pub enum ScheduleTarget {
    Config { config_id: ConfigId },
    Tag { key: String, value: String },
}

/// Computed presentation status of a schedule; never stored.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, poem_openapi::Enum,
)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Done,
    Running,
    Error,
    Warning,
    Suspended,
    Ok,
}

/// A rule that creates jobs over time or on external trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: ScheduleId,
    pub repeat: RepeatKind,
    pub target: ScheduleTarget,
    /// `None` means "as soon as possible".
    pub start_time: Option<DateTime<Utc>>,
    pub suspended: bool,
    pub owner: Option<UserId>,
    pub comment: String,
    /// `<repo-id>/<branch>` values that raise the trigger flag.
    pub trigger_filters: BTreeSet<String>,
    pub trigger_fired: bool,
    pub last_started: Option<DateTime<Utc>>,
    pub last_jobs: Vec<JobId>,
    /// Set once a one-shot schedule has fired.
    pub done: bool,
}

impl Schedule {
    /// Whether the time component of the schedule allows firing now.
    pub fn due(&self, now: DateTime<Utc>) -> bool {
        if self.done || self.suspended {
            return false;
        }
        match self.start_time {
            None => true,
            Some(start) => start <= now,
        }
    }

    /// Moves `start_time` past `now` according to the repeat rule. Fires
    /// missed occurrences only once: a controller that was down for a week
    /// runs a daily schedule once, not seven times.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        match &self.repeat {
            RepeatKind::Once => {
                self.done = true;
            }
            RepeatKind::Daily => {
                let mut next = self.start_time.unwrap_or(now);
                while next <= now {
                    next += Duration::days(1);
                }
                self.start_time = Some(next);
            }
            RepeatKind::Weekly { days } => {
                if days.iter().any(|enabled| *enabled) {
                    let mut next = self.start_time.unwrap_or(now);
                    loop {
                        next += Duration::days(1);
                        let weekday = next.weekday().num_days_from_monday() as usize;
                        if next > now && days[weekday] {
                            break;
                        }
                    }
                    self.start_time = Some(next);
                } else {
                    // No enabled day can ever match.
                    self.done = true;
                }
            }
            RepeatKind::Continuously { min_delay_minutes } => {
                self.start_time = Some(now + Duration::minutes(*min_delay_minutes as i64));
            }
            RepeatKind::Triggered => {
                // Time never advances; only the trigger flag matters.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_r::test;

    fn schedule(repeat: RepeatKind, start: DateTime<Utc>) -> Schedule {
        Schedule {
            id: ScheduleId::new("nightly"),
            repeat,
            target: ScheduleTarget::Config {
                config_id: ConfigId::new("c1"),
            },
            start_time: Some(start),
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
    fn daily_advances_in_whole_days() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 2, 30, 0).unwrap();
        let mut s = schedule(RepeatKind::Daily, start);
        s.advance(start);
        assert_eq!(
            s.start_time,
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 2, 30, 0).unwrap())
        );
        // The n-th fire lands exactly n days after the first.
        for _ in 0..5 {
            let now = s.start_time.unwrap();
            s.advance(now);
        }
        assert_eq!(
            s.start_time,
            Some(Utc.with_ymd_and_hms(2026, 3, 7, 2, 30, 0).unwrap())
        );
    }

    #[test]
    fn daily_fires_missed_days_only_once() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 2, 30, 0).unwrap();
        let mut s = schedule(RepeatKind::Daily, start);
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        s.advance(now);
        assert_eq!(
            s.start_time,
            Some(Utc.with_ymd_and_hms(2026, 3, 10, 2, 30, 0).unwrap())
        );
    }

    #[test]
    fn weekly_advances_to_next_enabled_weekday() {
        // 2026-03-02 is a Monday.
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap();
        let mut days = [false; 7];
        days[0] = true; // Monday
        days[3] = true; // Thursday
        let mut s = schedule(RepeatKind::Weekly { days }, start);
        s.advance(start);
        assert_eq!(
            s.start_time,
            Some(Utc.with_ymd_and_hms(2026, 3, 5, 6, 0, 0).unwrap())
        );
        let now = s.start_time.unwrap();
        s.advance(now);
        assert_eq!(
            s.start_time,
            Some(Utc.with_ymd_and_hms(2026, 3, 9, 6, 0, 0).unwrap())
        );
    }

    #[test]
    fn once_marks_done() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut s = schedule(RepeatKind::Once, start);
        s.advance(start);
        assert!(s.done);
        assert!(!s.due(start + Duration::hours(1)));
    }

    #[test]
    fn continuous_advance_is_relative_to_now() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut s = schedule(
            RepeatKind::Continuously {
                min_delay_minutes: 5,
            },
            start,
        );
        // Previous batch finished two minutes past the minimum delay.
        let now = start + Duration::minutes(7);
        s.advance(now);
        assert_eq!(s.start_time, Some(now + Duration::minutes(5)));
    }
}
