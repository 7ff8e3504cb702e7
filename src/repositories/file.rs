//! # File Repository
//!
//! Metadata rows for blobs. Deleting rows here never touches the bucket;
//! callers remove blobs themselves using the returned keys.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use super::scope::Scope;
use crate::error::RepositoryError;
use crate::models::file::{
    ActiveModel, Column, Entity as File, FileCategory, LinkedEntityKind, Model,
};

/// Values for a new file row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub title: String,
    pub original_path: String,
    pub blob_key: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub category: FileCategory,
    /// `None` stores the file orphaned
    pub link: Option<(LinkedEntityKind, Uuid)>,
}

#[derive(Debug, Clone)]
pub struct FileRepository {
    db: DatabaseConnection,
    scope: Scope,
}

impl FileRepository {
    pub fn new(db: DatabaseConnection, scope: Scope) -> Self {
        Self { db, scope }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Model>, RepositoryError> {
        let query = File::find_by_id(id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .one(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Files linked to one entity, optionally narrowed to a category.
    pub async fn list_linked(
        &self,
        kind: LinkedEntityKind,
        entity_id: Uuid,
        category: Option<FileCategory>,
    ) -> Result<Vec<Model>, RepositoryError> {
        let mut query = File::find()
            .filter(Column::LinkedEntityType.eq(kind))
            .filter(Column::LinkedEntityId.eq(entity_id))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id);
        if let Some(category) = category {
            query = query.filter(Column::Category.eq(category));
        }
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list_orphaned(&self) -> Result<Vec<Model>, RepositoryError> {
        let query = File::find()
            .filter(Column::LinkedEntityId.is_null())
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// One page of [`Self::list_orphaned`], zero-based.
    pub async fn list_orphaned_page(
        &self,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<Model>, RepositoryError> {
        let query = File::find()
            .filter(Column::LinkedEntityId.is_null())
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id);
        self.scope
            .restrict(query, Column::TenantId, Column::UserId)
            .paginate(&self.db, page_size)
            .fetch_page(page)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn create(&self, input: NewFile) -> Result<Model, RepositoryError> {
        let actor = self.scope.actor().ok_or(RepositoryError::ScopeRequired)?;
        let (linked_entity_type, linked_entity_id) = match input.link {
            Some((kind, id)) => (Some(kind), Some(id)),
            None => (None, None),
        };

        ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(actor.tenant_id),
            user_id: Set(actor.user_id),
            title: Set(input.title),
            original_path: Set(input.original_path),
            blob_key: Set(input.blob_key),
            mime_type: Set(input.mime_type),
            size_bytes: Set(input.size_bytes),
            category: Set(input.category),
            linked_entity_type: Set(linked_entity_type),
            linked_entity_id: Set(linked_entity_id),
            created_at: Set(Utc::now().fixed_offset()),
        }
        .insert(&self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    /// Deletes the acting user's attachment files (images, invoices, manuals)
    /// and returns their blob keys. Export archives are kept.
    pub async fn delete_attachments(&self) -> Result<Vec<String>, RepositoryError> {
        let actor = self.scope.actor().ok_or(RepositoryError::ScopeRequired)?;
        let attachment_categories = [
            FileCategory::Images,
            FileCategory::Invoices,
            FileCategory::Manuals,
        ];

        let doomed = File::find()
            .filter(Column::TenantId.eq(actor.tenant_id))
            .filter(Column::UserId.eq(actor.user_id))
            .filter(Column::Category.is_in(attachment_categories))
            .all(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if doomed.is_empty() {
            return Ok(Vec::new());
        }

        File::delete_many()
            .filter(Column::Id.is_in(doomed.iter().map(|file| file.id)))
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(doomed.into_iter().map(|file| file.blob_key).collect())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let query = File::delete_many().filter(Column::Id.eq(id));
        let result = self
            .scope
            .restrict(query, Column::TenantId, Column::UserId)
            .exec(&self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected == 1)
    }
}
