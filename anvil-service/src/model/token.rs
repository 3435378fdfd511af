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

use anvil_common::model::{ResourceId, TokenId, TokenRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameter under which a resource token names the agent it acts for.
pub const RESOURCE_ID_PARAM: &str = "resourceId";

/// An API credential. The password belonging to a token is kept as a salted
/// hash in the store's separate password file, never in the record itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: TokenId,
    pub role: TokenRole,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub params: BTreeMap<String, String>,
}

impl Token {
    pub fn new(role: TokenRole, params: BTreeMap<String, String>, now: DateTime<Utc>) -> Self {
        let expires_at = role
            .expiry_secs()
            .map(|secs| now + chrono::Duration::seconds(secs as i64));
        Self {
            id: TokenId::new_v4(),
            role,
            created_at: now,
            expires_at,
            params,
        }
    }

    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// For resource tokens: the agent this token acts on behalf of.
    pub fn resource_id(&self) -> Option<ResourceId> {
        match self.role {
            TokenRole::Resource => self
                .params
                .get(RESOURCE_ID_PARAM)
                .map(|id| ResourceId::new(id.clone())),
            _ => None,
        }
    }
}
