//! RestoreOperation entity model
//!
//! A restore replays an export archive into the acting user's inventory.
//! Progress is tracked per step in `restore_steps`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl RestoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// How archive records interact with existing data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStrategy {
    /// Remove the user's inventory first, then add everything
    FullReplace,
    /// Add new records, leave existing ones untouched
    #[default]
    MergeAdd,
    /// Add new records and overwrite existing ones with archive values
    MergeUpdate,
}

/// Options stored on each restore operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RestoreOptions {
    #[serde(default)]
    pub strategy: RestoreStrategy,
    #[serde(default)]
    pub include_file_data: bool,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "restore_operations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub user_id: Uuid,

    /// Export whose archive is replayed
    pub export_id: Uuid,

    pub description: String,

    /// Serialized `RestoreOptions`
    #[sea_orm(column_type = "JsonBinary")]
    pub options: JsonValue,

    pub status: RestoreStatus,

    pub location_count: i32,

    pub area_count: i32,

    pub commodity_count: i32,

    pub image_count: i32,

    pub invoice_count: i32,

    pub manual_count: i32,

    pub binary_data_size: i64,

    /// Steps that ended in `failed`
    pub error_count: i32,

    pub error_message: Option<String>,

    pub lease_expires_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub completed_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    pub fn options(&self) -> RestoreOptions {
        serde_json::from_value(self.options.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::export::Entity",
        from = "Column::ExportId",
        to = "super::export::Column::Id"
    )]
    Export,
    #[sea_orm(has_many = "super::restore_step::Entity")]
    RestoreStep,
}

impl Related<super::export::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Export.def()
    }
}

impl Related<super::restore_step::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RestoreStep.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
