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

use crate::service::password::AuthError;
use anvil_common::model::{ResourceId, Role, TokenId, UserId};
use poem_openapi::auth::Basic;
use poem_openapi::SecurityScheme;

/// HTTP basic authentication: the username is either a user name or a token
/// id, the password the matching secret.
#[derive(SecurityScheme)]
#[oai(rename = "BasicAuth", ty = "basic")]
pub struct ApiBasicAuth(pub Basic);

/// Who an authenticated request acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User {
        id: UserId,
        role: Role,
    },
    /// A resource token acting for one execution agent.
    Runner {
        token_id: TokenId,
        resource_id: ResourceId,
    },
    /// A single-purpose password reset token.
    PasswordReset {
        token_id: TokenId,
        user: UserId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorisation {
    pub identity: Identity,
}

impl Authorisation {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match &self.identity {
            Identity::User { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Fails unless the request acts as a user with at least the given role.
    pub fn require_role(&self, role: Role) -> Result<&UserId, AuthError> {
        match &self.identity {
            Identity::User { id, role: held } if *held >= role => Ok(id),
            Identity::User { .. } => Err(AuthError::AccessDenied(format!(
                "{role} privileges required"
            ))),
            _ => Err(AuthError::AccessDenied(
                "a user account is required".to_string(),
            )),
        }
    }

    /// Fails unless the request carries a resource token; returns the agent
    /// it acts for.
    pub fn require_runner(&self) -> Result<&ResourceId, AuthError> {
        match &self.identity {
            Identity::Runner { resource_id, .. } => Ok(resource_id),
            _ => Err(AuthError::AccessDenied(
                "a resource token is required".to_string(),
            )),
        }
    }

    pub fn display_name(&self) -> String {
        match &self.identity {
            Identity::User { id, .. } => id.0.clone(),
            Identity::Runner { resource_id, .. } => format!("agent:{resource_id}"),
            Identity::PasswordReset { user, .. } => format!("reset:{user}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn roles_are_ordered_privileges() {
        let operator = Authorisation::new(Identity::User {
            id: UserId::new("op"),
            role: Role::Operator,
        });
        assert!(operator.require_role(Role::Guest).is_ok());
        assert!(operator.require_role(Role::Operator).is_ok());

        let guest = Authorisation::new(Identity::User {
            id: UserId::new("visitor"),
            role: Role::Guest,
        });
        assert!(guest.require_role(Role::User).is_err());
        assert!(guest.require_runner().is_err());
    }

    #[test]
    fn runner_tokens_are_not_users() {
        let runner = Authorisation::new(Identity::Runner {
            token_id: TokenId::new_v4(),
            resource_id: ResourceId::new("agent-1"),
        });
        assert!(runner.require_role(Role::Guest).is_err());
        assert_eq!(
            runner.require_runner().unwrap(),
            &ResourceId::new("agent-1")
        );
    }
}
