//! Export entity model
//!
//! Exports are background jobs that produce an XML archive of a user's
//! inventory. Uploaded archives are also tracked here with
//! `export_type = imported` so they can be restored like any other export.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

/// Lifecycle of an export job
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    /// Created by the API, waiting for a worker
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Claimed by a worker
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Which slice of the inventory an export covers
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ExportType {
    #[sea_orm(string_value = "full_database")]
    FullDatabase,
    #[sea_orm(string_value = "locations")]
    Locations,
    #[sea_orm(string_value = "areas")]
    Areas,
    #[sea_orm(string_value = "commodities")]
    Commodities,
    #[sea_orm(string_value = "selected_items")]
    SelectedItems,
    /// Archive uploaded by a user rather than generated here
    #[sea_orm(string_value = "imported")]
    Imported,
}

impl ExportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullDatabase => "full_database",
            Self::Locations => "locations",
            Self::Areas => "areas",
            Self::Commodities => "commodities",
            Self::SelectedItems => "selected_items",
            Self::Imported => "imported",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full_database" => Some(Self::FullDatabase),
            "locations" => Some(Self::Locations),
            "areas" => Some(Self::Areas),
            "commodities" => Some(Self::Commodities),
            "selected_items" => Some(Self::SelectedItems),
            "imported" => Some(Self::Imported),
            _ => None,
        }
    }
}

/// Kind of an item picked for a `selected_items` export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SelectedItemKind {
    Location,
    Area,
    Commodity,
}

/// One entry of `selected_items`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SelectedItem {
    pub id: Uuid,
    pub kind: SelectedItemKind,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "exports")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub user_id: Uuid,

    pub export_type: ExportType,

    /// Embed base64 file contents in the archive
    pub include_file_data: bool,

    /// JSON array of `SelectedItem` for `selected_items` exports
    #[sea_orm(column_type = "JsonBinary")]
    pub selected_items: JsonValue,

    pub description: String,

    pub status: ExportStatus,

    /// Blob key of the archive once written
    pub file_path: Option<String>,

    /// File entity that tracks the archive blob
    pub file_id: Option<Uuid>,

    /// Archive size in bytes
    pub file_size: Option<i64>,

    pub location_count: i32,

    pub area_count: i32,

    pub commodity_count: i32,

    pub image_count: i32,

    pub invoice_count: i32,

    pub manual_count: i32,

    /// Total decoded size of embedded file data
    pub binary_data_size: i64,

    pub error_message: Option<String>,

    /// Worker lease deadline while `in_progress`
    pub lease_expires_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub completed_at: Option<DateTimeWithTimeZone>,

    /// Soft delete marker
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Decodes `selected_items`, ignoring malformed entries.
    pub fn selected_items(&self) -> Vec<SelectedItem> {
        match &self.selected_items {
            JsonValue::Array(values) => values
                .iter()
                .filter_map(|value| serde_json::from_value(value.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::restore_operation::Entity")]
    RestoreOperation,
}

impl Related<super::restore_operation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RestoreOperation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
