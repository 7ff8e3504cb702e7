//! Privileged owner resolution.

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use uuid::Uuid;

use super::SecurityError;
use crate::error::RepositoryError;
use crate::models::file::LinkedEntityKind;
use crate::repositories::Registries;

/// Owner of a linkable entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityOwner {
    pub kind: LinkedEntityKind,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
}

/// Resolves an entity id to its owner regardless of the caller's scope.
#[async_trait]
pub trait OwnershipLookup: Send + Sync {
    async fn owner_of(&self, entity_id: Uuid) -> Result<Option<EntityOwner>, SecurityError>;
}

/// Looks the id up as a commodity, then an area, a location and an export.
pub struct RegistryOwnershipLookup {
    registries: Registries,
}

impl RegistryOwnershipLookup {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            registries: Registries::service(db),
        }
    }
}

fn lookup_failed(error: RepositoryError) -> SecurityError {
    SecurityError::Lookup(error.to_string())
}

#[async_trait]
impl OwnershipLookup for RegistryOwnershipLookup {
    async fn owner_of(&self, entity_id: Uuid) -> Result<Option<EntityOwner>, SecurityError> {
        if let Some(commodity) = self
            .registries
            .commodities()
            .get(entity_id)
            .await
            .map_err(lookup_failed)?
        {
            return Ok(Some(EntityOwner {
                kind: LinkedEntityKind::Commodity,
                tenant_id: commodity.tenant_id,
                user_id: commodity.user_id,
            }));
        }

        if let Some(area) = self
            .registries
            .areas()
            .get(entity_id)
            .await
            .map_err(lookup_failed)?
        {
            return Ok(Some(EntityOwner {
                kind: LinkedEntityKind::Area,
                tenant_id: area.tenant_id,
                user_id: area.user_id,
            }));
        }

        if let Some(location) = self
            .registries
            .locations()
            .get(entity_id)
            .await
            .map_err(lookup_failed)?
        {
            return Ok(Some(EntityOwner {
                kind: LinkedEntityKind::Location,
                tenant_id: location.tenant_id,
                user_id: location.user_id,
            }));
        }

        let export = self
            .registries
            .exports()
            .get(entity_id)
            .await
            .map_err(lookup_failed)?;
        Ok(export.map(|export| EntityOwner {
            kind: LinkedEntityKind::Export,
            tenant_id: export.tenant_id,
            user_id: export.user_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{new_actor, seed_inventory, setup_db};

    #[tokio::test]
    async fn resolves_owner_across_entity_kinds() {
        let db = setup_db().await;
        let actor = new_actor(&db).await;
        let inventory = seed_inventory(&db, actor, "garage").await;
        let lookup = RegistryOwnershipLookup::new(db);

        for (id, kind) in [
            (inventory.commodity.id, LinkedEntityKind::Commodity),
            (inventory.area.id, LinkedEntityKind::Area),
            (inventory.location.id, LinkedEntityKind::Location),
        ] {
            let owner = lookup.owner_of(id).await.unwrap().unwrap();
            assert_eq!(owner.kind, kind);
            assert!(actor.owns(owner.tenant_id, owner.user_id));
        }

        assert!(lookup.owner_of(Uuid::new_v4()).await.unwrap().is_none());
    }
}
