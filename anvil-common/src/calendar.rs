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

//! Week arithmetic for schedules and reports.
//!
//! Weeks start on Monday and belong to the year the majority of their days
//! fall into, equivalent to ISO 8601 week numbering, except that the week
//! containing January 1st may be reported as week 0 of the current year
//! (meaning: the last week of the previous year).

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};

/// Returns the week number for the given date. Returns 0 if the date belongs
/// to the last week of the previous year.
pub fn week_number(date: NaiveDate) -> i32 {
    let yday = date.ordinal() as i32;
    let wday = date.weekday().num_days_from_monday() as i32;
    let last_monday = yday - wday;
    (last_monday + 9).div_euclid(7)
}

/// Returns the highest week number (52 or 53) in the given year.
pub fn weeks_in_year(year: i32) -> i32 {
    // Weekday of January 1st, 0 = Monday.
    let jan1 = NaiveDate::from_ymd_opt(year, 1, 1).expect("January 1st always exists");
    let weekday = jan1.weekday().num_days_from_monday() as i32;
    let days = if jan1.leap_year() { 366 } else { 365 };
    // If fewer than 4 days of week 1 fall into this year, that week belongs
    // to the previous year.
    let mut days_in_week1 = 7 - weekday;
    if days_in_week1 < 4 {
        days_in_week1 = 7;
    }
    let days_in_week53 = days - days_in_week1 - 7 * 51;
    if days_in_week53 < 4 { 52 } else { 53 }
}

/// Takes a year and a week number that may be out of range and returns the
/// equivalent (year, week) pair where the week is an existing week of that
/// year. Week 0 of year N maps to the last week (52 or 53) of year N - 1;
/// week `weeks_in_year(N) + 1` maps to week 1 of year N + 1.
pub fn normalize_week(mut year: i32, mut week: i32) -> (i32, i32) {
    while week < 1 {
        year -= 1;
        week += weeks_in_year(year);
    }
    while week > weeks_in_year(year) {
        week -= weeks_in_year(year);
        year += 1;
    }
    (year, week)
}

/// Truncates a timestamp to the start of its (UTC) day.
pub fn day_start(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), 0, 0, 0)
        .single()
        .expect("UTC dates are unambiguous")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn week_zero_is_last_week_of_previous_year() {
        // 2027-01-01 is a Friday, so it falls into the last week of 2026.
        let date = NaiveDate::from_ymd_opt(2027, 1, 1).unwrap();
        assert_eq!(week_number(date), 0);
        assert_eq!(normalize_week(2027, 0), (2026, weeks_in_year(2026)));
    }

    #[test]
    fn week_overflow_wraps_into_next_year() {
        let last = weeks_in_year(2026);
        assert_eq!(normalize_week(2026, last + 1), (2027, 1));
    }

    #[test]
    fn known_week_counts() {
        assert_eq!(weeks_in_year(2020), 53);
        assert_eq!(weeks_in_year(2021), 52);
        assert_eq!(weeks_in_year(2026), 53);
    }

    #[test]
    fn in_range_weeks_are_untouched() {
        assert_eq!(normalize_week(2025, 17), (2025, 17));
    }
}
