//! Pipeline domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Branch checked out when neither the trigger nor the pipeline names one
pub const DEFAULT_BRANCH: &str = "main";

/// Pipeline definition
///
/// Structure shared between orchestrator (persists) and runner (executes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub repository: String,
    pub default_branch: String,
    /// Target environments this pipeline may run against. Empty means all.
    pub environments: Vec<Environment>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub config: PipelineConfig,
}

impl Pipeline {
    /// Whether an execution against `environment` may be triggered
    pub fn allows(&self, environment: Environment) -> bool {
        self.environments.is_empty() || self.environments.contains(&environment)
    }
}

/// Commands run by the configurable steps of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub build_command: String,
    pub test_command: String,
    pub deploy_command: String,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            build_command: "npm run build".to_string(),
            test_command: "npm test".to_string(),
            deploy_command: "npm run deploy:prod".to_string(),
            env_vars: HashMap::new(),
        }
    }
}

/// Environment an execution targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub const ALL: [Environment; 3] = [
        Environment::Development,
        Environment::Staging,
        Environment::Production,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// Only production executions run the deploy step
    pub fn deploys(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown environment name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized environment '{0}' (expected development, staging or production)")]
pub struct UnknownEnvironment(pub String);

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(UnknownEnvironment(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(environments: Vec<Environment>) -> Pipeline {
        let now = chrono::Utc::now();
        Pipeline {
            id: Uuid::new_v4(),
            name: "web".to_string(),
            description: None,
            repository: "https://example.com/web.git".to_string(),
            default_branch: DEFAULT_BRANCH.to_string(),
            environments,
            created_at: now,
            updated_at: now,
            config: PipelineConfig::default(),
        }
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!("staging".parse::<Environment>(), Ok(Environment::Staging));
        assert_eq!(
            "production".parse::<Environment>(),
            Ok(Environment::Production)
        );
        assert!("Production".parse::<Environment>().is_err());
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_environment_serde_is_lowercase() {
        let json = serde_json::to_string(&Environment::Development).unwrap();
        assert_eq!(json, "\"development\"");
    }

    #[test]
    fn test_only_production_deploys() {
        assert!(Environment::Production.deploys());
        assert!(!Environment::Staging.deploys());
        assert!(!Environment::Development.deploys());
    }

    #[test]
    fn test_empty_environment_set_allows_all() {
        let p = pipeline(vec![]);
        for env in Environment::ALL {
            assert!(p.allows(env));
        }

        let p = pipeline(vec![Environment::Staging]);
        assert!(p.allows(Environment::Staging));
        assert!(!p.allows(Environment::Production));
    }
}
