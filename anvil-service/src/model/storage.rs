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

use anvil_common::model::StorageId;
use serde::{Deserialize, Serialize};

/// A place agents upload reports to. Runs reference their storage so report
/// URLs keep resolving after a storage is renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, poem_openapi::Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct Storage {
    pub id: StorageId,
    pub name: String,
    /// Base URL reports of this storage are served from.
    pub url: String,
    /// Whether report exports from this storage are offered in the UI.
    pub export: bool,
}

impl Storage {
    /// Resolves a run directory against this storage's base URL.
    pub fn report_url(&self, run_dir: &str) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            run_dir.trim_start_matches('/')
        )
    }
}
