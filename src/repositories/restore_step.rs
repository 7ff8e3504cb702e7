//! # Restore Step Repository
//!
//! Steps are appended with result `todo` and finalized exactly once.

use chrono::Utc;
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use super::scope::Scope;
use crate::error::RepositoryError;
use crate::models::restore_operation::Model as RestoreOperationModel;
use crate::models::restore_step::{ActiveModel, Column, Entity as RestoreStep, Model, StepResult};

#[derive(Debug, Clone)]
pub struct RestoreStepRepository {
    db: DatabaseConnection,
    scope: Scope,
}

impl RestoreStepRepository {
    pub fn new(db: DatabaseConnection, scope: Scope) -> Self {
        Self { db, scope }
    }

    /// Appends a `todo` step owned by the operation's user.
    pub async fn begin(
        &self,
        operation: &RestoreOperationModel,
        position: i32,
        name: &str,
    ) -> Result<Model, RepositoryError> {
        let now = Utc::now().fixed_offset();
        ActiveModel {
            id: Set(Uuid::new_v4()),
            restore_operation_id: Set(operation.id),
            tenant_id: Set(operation.tenant_id),
            user_id: Set(operation.user_id),
            position: Set(position),
            name: Set(name.to_string()),
            result: Set(StepResult::Todo),
            detail: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    /// Moves a `todo` step to its final result.
    ///
    /// Fails with `StepFinalized` when the step already left `todo`, and with
    /// `InvalidTransition` when asked to move a step back to `todo`.
    pub async fn finish(
        &self,
        step_id: Uuid,
        result: StepResult,
        detail: Option<String>,
    ) -> Result<(), RepositoryError> {
        if result == StepResult::Todo {
            return Err(RepositoryError::InvalidTransition(
                "restore steps cannot return to todo".to_string(),
            ));
        }

        let query = RestoreStep::update_many()
            .col_expr(Column::Result, Expr::value(result))
            .col_expr(Column::Detail, Expr::value(detail))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(step_id))
            .filter(Column::Result.eq(StepResult::Todo));
        let outcome = self
            .scope
            .restrict(query, Column::TenantId, Column::UserId)
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if outcome.rows_affected == 1 {
            return Ok(());
        }

        let exists = self
            .scope
            .restrict(RestoreStep::find_by_id(step_id), Column::TenantId, Column::UserId)
            .one(&self.db)
            .await
            .map_err(RepositoryError::database_error)?
            .is_some();
        if exists {
            Err(RepositoryError::StepFinalized(step_id))
        } else {
            Err(RepositoryError::NotFound(format!("restore step {step_id}")))
        }
    }

    /// Steps of an operation in recorded order.
    pub async fn list(&self, operation_id: Uuid) -> Result<Vec<Model>, RepositoryError> {
        let query = RestoreStep::find()
            .filter(Column::RestoreOperationId.eq(operation_id))
            .order_by_asc(Column::Position);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}
