//! Commodity entity model
//!
//! A commodity is a tracked item stored in an area. Images, invoices and
//! manuals attach to commodities through the files table.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "commodities")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub user_id: Uuid,

    /// Area the commodity is stored in
    pub area_id: Uuid,

    pub name: String,

    pub short_name: String,

    /// Free-form classification (e.g. electronics, furniture)
    pub commodity_type: String,

    /// Number of identical units
    pub count: i32,

    /// Lifecycle label (e.g. in_use, sold, lost)
    pub status: String,

    pub original_price: Option<f64>,

    /// ISO 4217 currency code for `original_price`
    pub original_price_currency: Option<String>,

    pub serial_number: Option<String>,

    pub comments: Option<String>,

    /// Drafts are incomplete entries hidden from reports
    pub draft: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::area::Entity",
        from = "Column::AreaId",
        to = "super::area::Column::Id"
    )]
    Area,
}

impl Related<super::area::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Area.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
