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

pub mod error;

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Declares a string-valued identifier newtype with the conversions the rest
/// of the codebase expects (serde, poem path/query parameters, `Display`).
#[macro_export]
macro_rules! newtype_string_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
            poem_openapi::NewType,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_string()))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

newtype_string_id!(UserId);
newtype_string_id!(JobId);
newtype_string_id!(TaskRunId);
newtype_string_id!(ShadowRunId);
newtype_string_id!(ScheduleId);
newtype_string_id!(ConfigId);
newtype_string_id!(ResourceId);
newtype_string_id!(ResTypeId);
newtype_string_id!(ProductDefId);
newtype_string_id!(FrameworkId);
newtype_string_id!(TaskDefId);
newtype_string_id!(StorageId);

/// Identifies an access token record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    poem_openapi::NewType,
)]
#[serde(transparent)]
pub struct TokenId(pub Uuid);

impl TokenId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for TokenId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TokenId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::parse_str(s).map_err(|err| format!("Invalid token id: {err}"))?;
        Ok(Self(uuid))
    }
}

/// Privilege level of a user account.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    poem_openapi::Enum,
)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum Role {
    /// Read-only access.
    Guest,
    /// May submit jobs and edit definitions.
    User,
    /// Full control, including user management.
    Operator,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Guest => write!(f, "guest"),
            Role::User => write!(f, "user"),
            Role::Operator => write!(f, "operator"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guest" => Ok(Role::Guest),
            "user" => Ok(Role::User),
            "operator" => Ok(Role::Operator),
            _ => Err(format!("Invalid role: {s}")),
        }
    }
}

/// The purpose for which a token can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, poem_openapi::Enum)]
#[serde(rename_all = "snake_case")]
#[oai(rename_all = "snake_case")]
pub enum TokenRole {
    /// Authenticates an execution agent or other remote resource.
    Resource,
    /// Single-purpose token handed out to let a user reset their password.
    PasswordReset,
}

impl TokenRole {
    /// Expiry in seconds, for roles that define one.
    pub fn expiry_secs(&self) -> Option<u64> {
        match self {
            TokenRole::Resource => None,
            TokenRole::PasswordReset => Some(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, poem_openapi::Object)]
pub struct Empty {}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn role_round_trips_through_strings() {
        for role in [Role::Guest, Role::User, Role::Operator] {
            assert_eq!(role.to_string().parse::<Role>(), Ok(role));
        }
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn token_ids_reject_malformed_input() {
        assert!("not-a-uuid".parse::<TokenId>().is_err());
        let id = TokenId::new_v4();
        assert_eq!(id.to_string().parse::<TokenId>(), Ok(id));
    }
}
