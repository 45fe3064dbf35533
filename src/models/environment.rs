//! # Runtime Environment
//!
//! The minimal, already-authenticated view of a tenant environment that the
//! enqueue path needs for routing and denormalisation.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeEnvironmentType {
    Production,
    Staging,
    Development,
    Preview,
}

impl RuntimeEnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "PRODUCTION",
            Self::Staging => "STAGING",
            Self::Development => "DEVELOPMENT",
            Self::Preview => "PREVIEW",
        }
    }
}

impl fmt::Display for RuntimeEnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RuntimeEnvironmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRODUCTION" => Ok(Self::Production),
            "STAGING" => Ok(Self::Staging),
            "DEVELOPMENT" => Ok(Self::Development),
            "PREVIEW" => Ok(Self::Preview),
            _ => Err(format!("Invalid environment type: {s}")),
        }
    }
}

/// An environment whose caller has already been authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedEnvironment {
    pub id: String,
    pub environment_type: RuntimeEnvironmentType,
    pub organization_id: String,
    pub project_id: String,
}

impl AuthenticatedEnvironment {
    pub fn new(
        id: impl Into<String>,
        environment_type: RuntimeEnvironmentType,
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            environment_type,
            organization_id: organization_id.into(),
            project_id: project_id.into(),
        }
    }
}
