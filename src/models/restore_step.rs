//! RestoreStep entity model
//!
//! Steps are append-only. A step starts as `todo` and moves to exactly one
//! final result.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    #[sea_orm(string_value = "todo")]
    Todo,
    #[sea_orm(string_value = "done")]
    Done,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "skipped")]
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "restore_steps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub restore_operation_id: Uuid,

    pub tenant_id: Uuid,

    pub user_id: Uuid,

    /// Zero-based order within the operation
    pub position: i32,

    pub name: String,

    pub result: StepResult,

    /// Human readable outcome, e.g. the reason a link was rejected
    pub detail: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::restore_operation::Entity",
        from = "Column::RestoreOperationId",
        to = "super::restore_operation::Column::Id"
    )]
    RestoreOperation,
}

impl Related<super::restore_operation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RestoreOperation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
