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

use anvil_common::config::ConfigLoader;
use anvil_common::tracing::TracingConfig;
use anvil_common::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "anvil.toml";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub tracing: TracingConfig,
    pub http_port: u16,
    /// Root of the record stores, resolved relative to the directory passed
    /// on the command line.
    pub data_dir: PathBuf,
    /// Base URL under which task reports are published.
    pub report_root_url: Option<String>,
    pub auth: AuthConfig,
    pub sync: SyncConfig,
    pub mail: MailConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::local_dev("anvil-service"),
            http_port: 8180,
            data_dir: PathBuf::from("."),
            report_root_url: None,
            auth: AuthConfig::default(),
            sync: SyncConfig::default(),
            mail: MailConfig::default(),
        }
    }
}

impl SafeDisplay for ControllerConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "tracing:");
        let _ = writeln!(&mut result, "{}", self.tracing.to_safe_string_indented());
        let _ = writeln!(&mut result, "HTTP port: {}", self.http_port);
        let _ = writeln!(&mut result, "data dir: {}", self.data_dir.display());
        let _ = writeln!(
            &mut result,
            "report root URL: {}",
            self.report_root_url.as_deref().unwrap_or("-")
        );
        let _ = writeln!(&mut result, "auth:");
        let _ = writeln!(&mut result, "{}", self.auth.to_safe_string_indented());
        let _ = writeln!(&mut result, "sync:");
        let _ = writeln!(&mut result, "{}", self.sync.to_safe_string_indented());
        let _ = writeln!(&mut result, "mail:");
        let _ = writeln!(&mut result, "{}", self.mail.to_safe_string_indented());
        result
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// When disabled, any credentials are accepted with operator rights.
    /// Development only.
    pub enabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl SafeDisplay for AuthConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "enabled: {}", self.enabled);
        result
    }
}

/// Timing of the agent long-poll protocol and of connection status
/// derivation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Wait returned to an agent while work may show up shortly.
    pub eager_wait_secs: u32,
    /// Wait returned when nothing is pending at all.
    pub idle_wait_secs: u32,
    /// Sync age after which an agent's connection shows a warning.
    #[serde(with = "humantime_serde")]
    pub warn_after: Duration,
    /// Sync age after which an agent counts as lost and stops being a match
    /// candidate.
    #[serde(with = "humantime_serde")]
    pub lost_after: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            eager_wait_secs: 5,
            idle_wait_secs: 30,
            warn_after: Duration::from_secs(60),
            lost_after: Duration::from_secs(300),
        }
    }
}

impl SafeDisplay for SyncConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "eager wait: {}s", self.eager_wait_secs);
        let _ = writeln!(&mut result, "idle wait: {}s", self.idle_wait_secs);
        let _ = writeln!(&mut result, "warn after: {:?}", self.warn_after);
        let _ = writeln!(&mut result, "lost after: {:?}", self.lost_after);
        result
    }
}

/// Where job notifications are sent from. Actual delivery is performed by an
/// external relay; the controller only hands messages over.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MailConfig {
    pub sender: Option<String>,
    pub smtp_relay: Option<String>,
}

impl SafeDisplay for MailConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(
            &mut result,
            "sender: {}",
            self.sender.as_deref().unwrap_or("-")
        );
        let _ = writeln!(
            &mut result,
            "SMTP relay: {}",
            self.smtp_relay.as_deref().unwrap_or("-")
        );
        result
    }
}

/// Loads the configuration rooted at the given data directory; the defaults
/// make a fresh directory usable without writing a config file first.
pub fn make_config_loader(dir: &Path) -> ConfigLoader<ControllerConfig> {
    ConfigLoader::new(&dir.join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    pub fn config_is_loadable() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let config = make_config_loader(dir.path())
            .load()
            .expect("failed to load config");
        assert!(config.auth.enabled);
        assert_eq!(config.sync.lost_after, Duration::from_secs(300));
    }
}
