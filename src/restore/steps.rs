//! Ordered step log of a restore run.

use sea_orm::DatabaseConnection;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::restore_operation::Model as RestoreOperationModel;
use crate::models::restore_step::StepResult;
use crate::repositories::{Registries, RestoreStepRepository};

/// Final result of one unit of restore work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub result: StepResult,
    pub detail: String,
}

impl StepOutcome {
    pub fn done(detail: impl Into<String>) -> Self {
        Self {
            result: StepResult::Done,
            detail: detail.into(),
        }
    }

    pub fn skipped(detail: impl Into<String>) -> Self {
        Self {
            result: StepResult::Skipped,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            result: StepResult::Failed,
            detail: detail.into(),
        }
    }
}

/// Appends steps at increasing positions.
pub(crate) struct StepTracker {
    steps: RestoreStepRepository,
    operation: RestoreOperationModel,
    next_position: i32,
}

impl StepTracker {
    /// Continues after any steps already recorded for the operation.
    pub async fn resume(
        db: DatabaseConnection,
        operation: RestoreOperationModel,
    ) -> Result<Self, RepositoryError> {
        let steps = Registries::service(db).restore_steps();
        let recorded = steps.list(operation.id).await?;
        let next_position = recorded
            .last()
            .map_or(0, |step| step.position.saturating_add(1));
        Ok(Self {
            steps,
            operation,
            next_position,
        })
    }

    pub async fn begin(&mut self, name: &str) -> Result<Uuid, RepositoryError> {
        let step = self
            .steps
            .begin(&self.operation, self.next_position, name)
            .await?;
        self.next_position += 1;
        Ok(step.id)
    }

    pub async fn finish(&self, step_id: Uuid, outcome: StepOutcome) -> Result<(), RepositoryError> {
        self.steps
            .finish(step_id, outcome.result, Some(outcome.detail))
            .await
    }
}
