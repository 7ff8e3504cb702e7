//! Fixtures shared by unit tests.

use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

use crate::models::{area, commodity, location};
use crate::repositories::{
    ActingUser, AreaInput, CommodityInput, LocationInput, Registries, TenantRepository,
};

/// In-memory SQLite with every migration applied.
pub async fn setup_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

/// Creates a tenant and returns a fresh user inside it.
pub async fn new_actor(db: &DatabaseConnection) -> ActingUser {
    let tenant = TenantRepository::new(db)
        .create_tenant(None, Some("Test Tenant".to_string()))
        .await
        .unwrap();
    ActingUser::new(tenant.id, Uuid::new_v4())
}

pub struct Inventory {
    pub location: location::Model,
    pub area: area::Model,
    pub commodity: commodity::Model,
}

/// One location holding one area holding one commodity.
pub async fn seed_inventory(db: &DatabaseConnection, actor: ActingUser, name: &str) -> Inventory {
    let registries = Registries::for_user(db.clone(), actor);
    let location = registries
        .locations()
        .create(LocationInput {
            name: format!("{name} house"),
            address: format!("{name} street 1"),
        })
        .await
        .unwrap();
    let area = registries
        .areas()
        .create(AreaInput {
            location_id: location.id,
            name: format!("{name} room"),
        })
        .await
        .unwrap();
    let commodity = registries
        .commodities()
        .create(CommodityInput::named(area.id, format!("{name} lamp")))
        .await
        .unwrap();
    Inventory {
        location,
        area,
        commodity,
    }
}
