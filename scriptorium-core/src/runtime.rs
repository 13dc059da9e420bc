//! Collaborator seams for the lifecycle engine
//!
//! The engine decides *when* workers start and stop; the mechanics of
//! spawning and sandboxing them live behind [`ProcessRuntime`]. Likewise,
//! team membership is somebody else's domain; the engine only validates and
//! re-asserts associations through [`TeamDirectory`].

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::AnalysisKind;

/// Everything a runtime needs to bring up one worker.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub name: String,
    pub kind: AnalysisKind,
    /// Live source file the worker should execute
    pub source_path: PathBuf,
}

/// Starts and stops worker processes on the engine's behalf.
///
/// `start` must be idempotent: asking to start an already-running worker
/// must not spawn a duplicate. Both calls return once the runtime has
/// acknowledged the signal.
#[async_trait]
pub trait ProcessRuntime: Send + Sync {
    async fn start(&self, request: &StartRequest) -> Result<()>;
    async fn stop(&self, name: &str) -> Result<()>;
}

/// Runtime that only records transitions via tracing. Useful for
/// deployments that attach a real runtime later, and as the CLI default.
#[derive(Debug, Default)]
pub struct LoggingRuntime;

#[async_trait]
impl ProcessRuntime for LoggingRuntime {
    async fn start(&self, request: &StartRequest) -> Result<()> {
        tracing::info!(
            analysis = %request.name,
            kind = %request.kind,
            source = %request.source_path.display(),
            "start signal acknowledged"
        );
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        tracing::info!(analysis = %name, "stop signal acknowledged");
        Ok(())
    }
}

/// Team existence checks and association upkeep.
#[async_trait]
pub trait TeamDirectory: Send + Sync {
    async fn team_exists(&self, team_id: &str) -> Result<bool>;

    /// Re-assert that `analysis` is tracked under `team_id` (called after
    /// create and rename). Default: nothing to do.
    async fn ensure_analysis_team(&self, analysis: &str, team_id: &str) -> Result<()> {
        let _ = (analysis, team_id);
        Ok(())
    }
}

/// Directory that accepts every team id. Callers are pre-authorized and team
/// CRUD is external, so this is the permissive default.
#[derive(Debug, Default)]
pub struct OpenTeamDirectory;

#[async_trait]
impl TeamDirectory for OpenTeamDirectory {
    async fn team_exists(&self, _team_id: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Directory backed by a fixed set of team ids.
#[derive(Debug, Default)]
pub struct StaticTeamDirectory {
    teams: Vec<String>,
}

impl StaticTeamDirectory {
    pub fn new(teams: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            teams: teams.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl TeamDirectory for StaticTeamDirectory {
    async fn team_exists(&self, team_id: &str) -> Result<bool> {
        Ok(team_id == crate::types::UNCATEGORIZED_TEAM
            || self.teams.iter().any(|t| t == team_id))
    }
}
