//! File entity model
//!
//! Metadata for a blob held in storage. Files are linked to at most one
//! entity; files without a link are orphaned and kept for manual review.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// What kind of content a file holds
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    #[sea_orm(string_value = "images")]
    Images,
    #[sea_orm(string_value = "invoices")]
    Invoices,
    #[sea_orm(string_value = "manuals")]
    Manuals,
    #[sea_orm(string_value = "exports")]
    Exports,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Images => "images",
            Self::Invoices => "invoices",
            Self::Manuals => "manuals",
            Self::Exports => "exports",
        }
    }
}

/// Entity kinds a file can be linked to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum LinkedEntityKind {
    #[sea_orm(string_value = "commodity")]
    Commodity,
    #[sea_orm(string_value = "area")]
    Area,
    #[sea_orm(string_value = "location")]
    Location,
    #[sea_orm(string_value = "export")]
    Export,
}

impl LinkedEntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commodity => "commodity",
            Self::Area => "area",
            Self::Location => "location",
            Self::Export => "export",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "commodity" => Some(Self::Commodity),
            "area" => Some(Self::Area),
            "location" => Some(Self::Location),
            "export" => Some(Self::Export),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "files")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub user_id: Uuid,

    /// Display title, usually the file name without directories
    pub title: String,

    /// Path the file had when it was first uploaded or exported
    pub original_path: String,

    /// Key of the blob in the configured bucket
    pub blob_key: String,

    pub mime_type: String,

    pub size_bytes: i64,

    pub category: FileCategory,

    /// Kind of the linked entity, `None` for orphaned files
    pub linked_entity_type: Option<LinkedEntityKind>,

    /// Id of the linked entity, `None` for orphaned files
    pub linked_entity_id: Option<Uuid>,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn is_orphaned(&self) -> bool {
        self.linked_entity_id.is_none()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
