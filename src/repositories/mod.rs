//! # Repository Layer
//!
//! Repositories encapsulate SeaORM access to the inventory registries and the
//! job tables. Each repository carries a [`Scope`]; [`Registries`] hands out
//! repositories that share one scope.

pub mod area;
pub mod commodity;
pub mod export;
pub mod file;
pub mod location;
pub mod restore_operation;
pub mod restore_step;
pub mod scope;
pub mod tenant;

use sea_orm::DatabaseConnection;

pub use area::{AreaInput, AreaRepository};
pub use commodity::{CommodityInput, CommodityRepository};
pub use export::{CompletedExport, ExportQueue, ExportRepository, InventoryCounts, NewExport};
pub use file::{FileRepository, NewFile};
pub use location::{LocationInput, LocationRepository};
pub use restore_operation::{RestoreOperationRepository, RestoreProgress};
pub use restore_step::RestoreStepRepository;
pub use scope::{ActingUser, Scope};
pub use tenant::TenantRepository;

/// Factory for repositories bound to one scope
#[derive(Debug, Clone)]
pub struct Registries {
    db: DatabaseConnection,
    scope: Scope,
}

impl Registries {
    /// Registries restricted to rows owned by `actor`.
    pub fn for_user(db: DatabaseConnection, actor: ActingUser) -> Self {
        Self {
            db,
            scope: Scope::User(actor),
        }
    }

    /// Unrestricted registries for workers and privileged lookups.
    pub fn service(db: DatabaseConnection) -> Self {
        Self {
            db,
            scope: Scope::Service,
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn locations(&self) -> LocationRepository {
        LocationRepository::new(self.db.clone(), self.scope)
    }

    pub fn areas(&self) -> AreaRepository {
        AreaRepository::new(self.db.clone(), self.scope)
    }

    pub fn commodities(&self) -> CommodityRepository {
        CommodityRepository::new(self.db.clone(), self.scope)
    }

    pub fn files(&self) -> FileRepository {
        FileRepository::new(self.db.clone(), self.scope)
    }

    pub fn exports(&self) -> ExportRepository {
        ExportRepository::new(self.db.clone(), self.scope)
    }

    pub fn restore_operations(&self) -> RestoreOperationRepository {
        RestoreOperationRepository::new(self.db.clone(), self.scope)
    }

    pub fn restore_steps(&self) -> RestoreStepRepository {
        RestoreStepRepository::new(self.db.clone(), self.scope)
    }
}
