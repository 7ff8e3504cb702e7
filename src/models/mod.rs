//! # Data Models
//!
//! SeaORM entities for the inventory registries and the pipeline jobs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod area;
pub mod commodity;
pub mod concurrency_slot;
pub mod concurrency_slot_guard;
pub mod export;
pub mod file;
pub mod location;
pub mod restore_operation;
pub mod restore_step;
pub mod tenant;

pub use area::Entity as Area;
pub use commodity::Entity as Commodity;
pub use concurrency_slot::Entity as ConcurrencySlot;
pub use concurrency_slot_guard::Entity as ConcurrencySlotGuard;
pub use export::Entity as Export;
pub use file::Entity as File;
pub use location::Entity as Location;
pub use restore_operation::Entity as RestoreOperation;
pub use restore_step::Entity as RestoreStep;
pub use tenant::Entity as Tenant;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "stockpile".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
