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

use crate::config::{ControllerConfig, SyncConfig};
use crate::metrics::Metrics;
use crate::repo::stores::Stores;
use crate::service;
use crate::service::broker::ResourceBroker;
use crate::service::dispatch::DispatcherService;
use crate::service::notification::LogNotifier;
use crate::service::password::PasswordStore;
use crate::service::results::ResultsStore;
use crate::service::scheduler::SchedulerService;
use prometheus::Registry;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct Services {
    pub stores: Stores,
    pub definition_service: Arc<dyn service::definitions::DefinitionService>,
    pub job_service: Arc<dyn service::job::JobService>,
    pub dispatcher: Arc<DispatcherService>,
    pub scheduler: Arc<SchedulerService>,
    pub broker: Arc<ResourceBroker>,
    pub auth_service: Arc<dyn service::auth::AuthService>,
    pub token_service: Arc<dyn service::token::TokenService>,
    pub user_service: Arc<dyn service::user::UserService>,
    pub results: ResultsStore,
    pub metrics: Arc<Metrics>,
    pub sync_config: SyncConfig,
}

impl Services {
    pub async fn new(
        config: &ControllerConfig,
        prometheus_registry: &Registry,
    ) -> Result<Self, String> {
        let stores = Stores::open(&config.data_dir)
            .await
            .map_err(|err| format!("failed to open record stores: {err}"))?;

        let metrics = Arc::new(Metrics::register(prometheus_registry));

        let user_passwords = Arc::new(
            PasswordStore::open(&config.data_dir, "users")
                .await
                .map_err(|err| format!("failed to open user password store: {err}"))?,
        );
        let token_passwords = Arc::new(
            PasswordStore::open(&config.data_dir, "tokens")
                .await
                .map_err(|err| format!("failed to open token password store: {err}"))?,
        );

        let definition_service: Arc<dyn service::definitions::DefinitionService> = Arc::new(
            service::definitions::DefinitionServiceDefault::new(stores.clone()),
        );

        let broker = Arc::new(ResourceBroker::new(stores.clone(), config.sync.clone()));
        let results = ResultsStore::new(&config.data_dir);
        let notifier = Arc::new(LogNotifier::new(config.mail.clone()));
        let scheduler_wakeup = Arc::new(Notify::new());

        let job_service: Arc<dyn service::job::JobService> =
            Arc::new(service::job::JobServiceDefault::new(
                stores.clone(),
                definition_service.clone(),
                (*broker).clone(),
                results.clone(),
                notifier,
                metrics.clone(),
                scheduler_wakeup.clone(),
            ));

        let dispatcher = Arc::new(DispatcherService::new(
            stores.clone(),
            job_service.clone(),
            config.sync.clone(),
            metrics.clone(),
        ));

        let scheduler = Arc::new(SchedulerService::new(
            stores.clone(),
            job_service.clone(),
            scheduler_wakeup,
        ));

        let auth_service: Arc<dyn service::auth::AuthService> =
            Arc::new(service::auth::AuthServiceDefault::new(
                stores.clone(),
                user_passwords.clone(),
                token_passwords.clone(),
                config.auth.enabled,
            ));

        let token_service: Arc<dyn service::token::TokenService> = Arc::new(
            service::token::TokenServiceDefault::new(stores.clone(), token_passwords),
        );

        let user_service: Arc<dyn service::user::UserService> = Arc::new(
            service::user::UserServiceDefault::new(stores.clone(), user_passwords),
        );

        Ok(Self {
            stores,
            definition_service,
            job_service,
            dispatcher,
            scheduler,
            broker,
            auth_service,
            token_service,
            user_service,
            results,
            metrics,
            sync_config: config.sync.clone(),
        })
    }
}
