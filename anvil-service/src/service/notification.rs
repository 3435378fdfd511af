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

use crate::config::MailConfig;
use crate::model::job::Job;
use async_trait::async_trait;
use tracing::info;

/// Delivery of job completion notices. Actual transport (SMTP relay) is an
/// external collaborator; the engine only hands finished jobs over.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn job_finished(&self, job: &Job);
}

/// Default notifier: writes the notice to the log, addressed per the mail
/// configuration when one is present.
pub struct LogNotifier {
    mail: MailConfig,
}

impl LogNotifier {
    pub fn new(mail: MailConfig) -> Self {
        Self { mail }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn job_finished(&self, job: &Job) {
        match (&self.mail.sender, &self.mail.smtp_relay) {
            (Some(sender), Some(relay)) => info!(
                "Notification: job {} finished with result {} (from {sender} via {relay})",
                job.id,
                job.result()
            ),
            _ => info!(
                "Notification: job {} finished with result {}",
                job.id,
                job.result()
            ),
        }
    }
}
