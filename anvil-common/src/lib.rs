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

pub mod calendar;
pub mod config;
pub mod model;
pub mod tracing;

#[cfg(test)]
test_r::enable!();

/// Producing display messages that are safe to return to clients.
///
/// Regular `Display` implementations (and especially `Debug` ones) tend to
/// leak internals: backing file paths, wrapped lower-level errors, secrets
/// held in configuration. Types that cross the API boundary implement this
/// trait instead and decide explicitly what the outside world may see.
pub trait SafeDisplay {
    fn to_safe_string(&self) -> String;

    fn to_safe_string_indented(&self) -> String {
        self.to_safe_string()
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
