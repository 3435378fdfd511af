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

use crate::auth::{ApiBasicAuth, Authorisation};
use crate::bootstrap::Services;
use crate::repo::RepoError;
use crate::service::auth::AuthService;
use crate::service::definitions::DefinitionError;
use crate::service::job::EngineError;
use crate::service::password::AuthError;
use crate::service::token::TokenError;
use crate::service::user::UserError;
use anvil_common::model::error::{ErrorBody, ErrorsBody};
use anvil_common::SafeDisplay;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, OpenApiService, Tags};
use std::sync::Arc;
use tracing::error;

mod configurations;
mod definitions;
pub mod dto;
mod healthcheck;
mod jobs;
mod resources;
mod schedules;
mod sync;
mod tokens;
mod users;
pub mod webhook;

#[derive(Tags)]
pub enum ApiTags {
    Definitions,
    Configurations,
    Jobs,
    Resources,
    Schedules,
    Sync,
    Tokens,
    Users,
    Healthcheck,
}

#[derive(ApiResponse, Debug, Clone)]
pub enum ApiError {
    /// Invalid request, returning with a list of issues detected in the request
    #[oai(status = 400)]
    BadRequest(Json<ErrorsBody>),
    /// Unauthorized request
    #[oai(status = 401)]
    Unauthorized(Json<ErrorBody>),
    /// Forbidden Request
    #[oai(status = 403)]
    Forbidden(Json<ErrorBody>),
    /// Entity not found
    #[oai(status = 404)]
    NotFound(Json<ErrorBody>),
    #[oai(status = 409)]
    Conflict(Json<ErrorBody>),
    /// Internal server error
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

impl ApiError {
    pub fn bad_request(error: impl Into<String>) -> Self {
        ApiError::BadRequest(Json(ErrorsBody {
            errors: vec![error.into()],
        }))
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        ApiError::NotFound(Json(ErrorBody {
            error: error.into(),
        }))
    }

    fn internal(safe: String) -> Self {
        ApiError::InternalError(Json(ErrorBody { error: safe }))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        match &value {
            AuthError::InvalidCredentials => ApiError::Unauthorized(Json(ErrorBody {
                error: value.to_safe_string(),
            })),
            AuthError::AccessDenied(_) => ApiError::Forbidden(Json(ErrorBody {
                error: value.to_safe_string(),
            })),
            AuthError::Internal(detail) => {
                error!("Authentication failure: {detail}");
                ApiError::internal(value.to_safe_string())
            }
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(value: RepoError) -> Self {
        match &value {
            RepoError::Duplicate { .. } => ApiError::Conflict(Json(ErrorBody {
                error: value.to_safe_string(),
            })),
            RepoError::NotFound { .. } => ApiError::not_found(value.to_safe_string()),
            RepoError::InvalidKey { .. } => ApiError::bad_request(value.to_safe_string()),
            RepoError::Io(_) | RepoError::Codec(_) => {
                error!("Store failure: {value}");
                ApiError::internal(value.to_safe_string())
            }
        }
    }
}

impl From<DefinitionError> for ApiError {
    fn from(value: DefinitionError) -> Self {
        match &value {
            DefinitionError::Duplicate { .. } => ApiError::Conflict(Json(ErrorBody {
                error: value.to_safe_string(),
            })),
            DefinitionError::Reference(_) | DefinitionError::FinalOverride { .. } => {
                ApiError::bad_request(value.to_safe_string())
            }
            DefinitionError::NotFound { .. } => ApiError::not_found(value.to_safe_string()),
            DefinitionError::Internal(inner) => {
                error!("Definition store failure: {inner}");
                ApiError::internal(value.to_safe_string())
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(value: EngineError) -> Self {
        let safe = value.to_safe_string();
        match value {
            EngineError::InvalidRequest(_) => ApiError::bad_request(safe),
            EngineError::Mismatch(_) => ApiError::Conflict(Json(ErrorBody { error: safe })),
            EngineError::JobNotFound(_) => ApiError::not_found(safe),
            EngineError::Definition(inner) => inner.into(),
            EngineError::Internal(inner) => {
                error!("Engine failure: {inner}");
                ApiError::internal(safe)
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::UnknownToken(_) => ApiError::not_found(value.to_safe_string()),
            TokenError::Validation(_) => ApiError::bad_request(value.to_safe_string()),
            TokenError::Auth(inner) => inner.into(),
            TokenError::Internal(inner) => inner.into(),
        }
    }
}

impl From<UserError> for ApiError {
    fn from(value: UserError) -> Self {
        match value {
            UserError::UnknownUser(_) => ApiError::not_found(value.to_safe_string()),
            UserError::Duplicate(_) => ApiError::Conflict(Json(ErrorBody {
                error: value.to_safe_string(),
            })),
            UserError::Auth(inner) => inner.into(),
            UserError::Internal(inner) => inner.into(),
        }
    }
}

/// Resolves the request's basic credentials through the auth service.
pub(crate) async fn authorize(
    auth_service: &Arc<dyn AuthService>,
    auth: &ApiBasicAuth,
) -> ApiResult<Authorisation> {
    Ok(auth_service
        .authenticate(&auth.0.username, &auth.0.password)
        .await?)
}

pub type Apis = (
    definitions::DefinitionsApi,
    configurations::ConfigurationsApi,
    jobs::JobsApi,
    resources::ResourcesApi,
    schedules::SchedulesApi,
    sync::SyncApi,
    tokens::TokensApi,
    users::UsersApi,
    healthcheck::HealthcheckApi,
);

pub fn make_open_api_service(services: &Services) -> OpenApiService<Apis, ()> {
    OpenApiService::new(
        (
            definitions::DefinitionsApi {
                auth_service: services.auth_service.clone(),
                definition_service: services.definition_service.clone(),
                stores: services.stores.clone(),
            },
            configurations::ConfigurationsApi {
                auth_service: services.auth_service.clone(),
                job_service: services.job_service.clone(),
                stores: services.stores.clone(),
            },
            jobs::JobsApi {
                auth_service: services.auth_service.clone(),
                job_service: services.job_service.clone(),
                results: services.results.clone(),
                stores: services.stores.clone(),
            },
            resources::ResourcesApi {
                auth_service: services.auth_service.clone(),
                stores: services.stores.clone(),
                sync_config: services.sync_config.clone(),
            },
            schedules::SchedulesApi {
                auth_service: services.auth_service.clone(),
                scheduler: services.scheduler.clone(),
                stores: services.stores.clone(),
            },
            sync::SyncApi {
                auth_service: services.auth_service.clone(),
                dispatcher: services.dispatcher.clone(),
            },
            tokens::TokensApi {
                auth_service: services.auth_service.clone(),
                token_service: services.token_service.clone(),
            },
            users::UsersApi {
                auth_service: services.auth_service.clone(),
                user_service: services.user_service.clone(),
            },
            healthcheck::HealthcheckApi,
        ),
        "Anvil Controller API",
        "1.0",
    )
}
