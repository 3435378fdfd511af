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

use anvil_common::model::{Role, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user account. Accounts are deactivated rather than deleted so that the
/// owner fields of old jobs and schedules keep resolving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, poem_openapi::Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub inactive: bool,
}

impl User {
    pub fn new(id: UserId, role: Role, now: DateTime<Utc>) -> Self {
        Self {
            id,
            role,
            created_at: now,
            inactive: false,
        }
    }
}
