//! ID resolver module
//!
//! Resolves UUID prefixes to full UUIDs by querying the API, so users can
//! type short, unambiguous prefixes instead of full ids.

use anyhow::{Context, Result, anyhow};
use conveyor_client::OrchestratorClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a pipeline ID or prefix to a full UUID
///
/// Full UUIDs are returned without contacting the orchestrator.
pub async fn resolve_pipeline_id(
    client: &OrchestratorClient,
    id_or_prefix: &IdOrPrefix,
) -> Result<Uuid> {
    let prefix = match id_or_prefix {
        IdOrPrefix::Full(uuid) => return Ok(*uuid),
        IdOrPrefix::Prefix(prefix) => prefix,
    };

    let pipelines = client
        .list_pipelines()
        .await
        .context("Failed to fetch pipelines for ID resolution")?;

    match_prefix("pipeline", prefix, pipelines.iter().map(|p| p.id))
}

/// Resolve an execution ID or prefix to a full UUID
///
/// Executions are only listed per pipeline, so a prefix is matched against
/// the history of every pipeline.
pub async fn resolve_execution_id(
    client: &OrchestratorClient,
    id_or_prefix: &IdOrPrefix,
) -> Result<Uuid> {
    let prefix = match id_or_prefix {
        IdOrPrefix::Full(uuid) => return Ok(*uuid),
        IdOrPrefix::Prefix(prefix) => prefix,
    };

    let pipelines = client
        .list_pipelines()
        .await
        .context("Failed to fetch pipelines for ID resolution")?;

    let mut ids = Vec::new();
    for pipeline in pipelines {
        let executions = client
            .list_pipeline_executions(pipeline.id)
            .await
            .with_context(|| format!("Failed to fetch executions of pipeline {}", pipeline.id))?;
        ids.extend(executions.iter().map(|e| e.id));
    }

    match_prefix("execution", prefix, ids)
}

/// Pick the single id starting with `prefix`
fn match_prefix(kind: &str, prefix: &str, ids: impl IntoIterator<Item = Uuid>) -> Result<Uuid> {
    if prefix.is_empty() {
        return Err(anyhow!("Empty {} ID", kind));
    }

    let matches: Vec<Uuid> = ids
        .into_iter()
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No {} found with ID starting with '{}'", kind, prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple {}s: {}",
                prefix,
                kind,
                ids.join(", ")
            ))
        }
    }
}
