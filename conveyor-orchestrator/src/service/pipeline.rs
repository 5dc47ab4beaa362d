//! Pipeline Service
//!
//! Business logic for pipeline management.

use conveyor_core::domain::pipeline::Pipeline;
use conveyor_core::dto::pipeline::CreatePipeline;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::pipeline_repository;

/// Service error type
#[derive(Debug)]
pub enum PipelineError {
    NotFound(Uuid),
    ValidationError(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::DatabaseError(err)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Create a new pipeline
pub async fn create_pipeline(pool: &PgPool, req: CreatePipeline) -> Result<Pipeline> {
    let req = normalize_pipeline_request(req)?;

    let pipeline = pipeline_repository::create(pool, req).await?;

    tracing::info!("Pipeline created: {} ({})", pipeline.name, pipeline.id);

    Ok(pipeline)
}

/// Get a pipeline by ID
pub async fn get_pipeline(pool: &PgPool, id: Uuid) -> Result<Pipeline> {
    let pipeline = pipeline_repository::find_by_id(pool, id)
        .await?
        .ok_or(PipelineError::NotFound(id))?;

    Ok(pipeline)
}

/// List all pipelines
pub async fn list_pipelines(pool: &PgPool) -> Result<Vec<Pipeline>> {
    let pipelines = pipeline_repository::list_all(pool).await?;
    Ok(pipelines)
}

/// Delete a pipeline and its execution history
pub async fn delete_pipeline(pool: &PgPool, id: Uuid) -> Result<()> {
    let deleted = pipeline_repository::delete(pool, id).await?;

    if !deleted {
        return Err(PipelineError::NotFound(id));
    }

    tracing::info!("Pipeline deleted: {}", id);

    Ok(())
}

// =============================================================================
// Validation
// =============================================================================

/// Validates a create request and trims it into its stored form
fn normalize_pipeline_request(mut req: CreatePipeline) -> Result<CreatePipeline> {
    req.name = req.name.trim().to_string();
    req.repository = req.repository.trim().to_string();

    if req.name.is_empty() {
        return Err(PipelineError::ValidationError(
            "Pipeline name cannot be empty".to_string(),
        ));
    }

    if req.name.len() > 255 {
        return Err(PipelineError::ValidationError(
            "Pipeline name is too long (max 255 characters)".to_string(),
        ));
    }

    if req.repository.is_empty() {
        return Err(PipelineError::ValidationError(
            "Pipeline repository cannot be empty".to_string(),
        ));
    }

    if let Some(branch) = &req.default_branch {
        if branch.is_empty() || branch.chars().any(char::is_whitespace) {
            return Err(PipelineError::ValidationError(format!(
                "Invalid default branch '{}'",
                branch
            )));
        }
    }

    if let Some(config) = &req.config {
        for (step, command) in [
            ("build", &config.build_command),
            ("test", &config.test_command),
            ("deploy", &config.deploy_command),
        ] {
            if command.trim().is_empty() {
                return Err(PipelineError::ValidationError(format!(
                    "Pipeline {} command cannot be empty",
                    step
                )));
            }
        }
    }

    let mut environments = Vec::with_capacity(req.environments.len());
    for environment in req.environments {
        if !environments.contains(&environment) {
            environments.push(environment);
        }
    }
    req.environments = environments;

    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::pipeline::{Environment, PipelineConfig};

    fn request() -> CreatePipeline {
        CreatePipeline {
            name: "Web".to_string(),
            description: Some("Storefront".to_string()),
            repository: "https://example.com/web.git".to_string(),
            default_branch: None,
            environments: vec![],
            config: None,
        }
    }

    #[test]
    fn test_validate_empty_name() {
        let req = CreatePipeline {
            name: "  ".to_string(),
            ..request()
        };

        let result = normalize_pipeline_request(req);
        assert!(matches!(result, Err(PipelineError::ValidationError(_))));
    }

    #[test]
    fn test_validate_empty_repository() {
        let req = CreatePipeline {
            repository: "".to_string(),
            ..request()
        };

        let result = normalize_pipeline_request(req);
        assert!(matches!(result, Err(PipelineError::ValidationError(_))));
    }

    #[test]
    fn test_validate_default_branch() {
        let req = CreatePipeline {
            default_branch: Some("feature one".to_string()),
            ..request()
        };

        let result = normalize_pipeline_request(req);
        assert!(matches!(result, Err(PipelineError::ValidationError(_))));
    }

    #[test]
    fn test_validate_empty_command() {
        let req = CreatePipeline {
            config: Some(PipelineConfig {
                test_command: " ".to_string(),
                ..PipelineConfig::default()
            }),
            ..request()
        };

        let result = normalize_pipeline_request(req);
        assert!(matches!(result, Err(PipelineError::ValidationError(msg)) if msg.contains("test")));
    }

    #[test]
    fn test_validate_valid_request() {
        let req = CreatePipeline {
            name: "  Web  ".to_string(),
            environments: vec![
                Environment::Staging,
                Environment::Production,
                Environment::Staging,
            ],
            ..request()
        };

        let normalized = normalize_pipeline_request(req).unwrap();
        assert_eq!(normalized.name, "Web");
        assert_eq!(
            normalized.environments,
            vec![Environment::Staging, Environment::Production]
        );
    }
}
