//! # Inventory Archive
//!
//! The export document is XML:
//!
//! ```text
//! <inventory exportDate="..." exportType="...">
//!   <locations><location id="..."><name/><address/></location>...</locations>
//!   <areas><area id="..." locationId="..."><name/></area>...</areas>
//!   <commodities>
//!     <commodity id="..." areaId="...">
//!       <name/><shortName/><type/><count/><status/>...
//!       <images><file id="..."><path/><originalPath/><mimeType/><data/></file></images>
//!       <invoices>...</invoices><manuals>...</manuals>
//!     </commodity>
//!   </commodities>
//!   <files><file id="..." type="image" linkedEntityType="commodity" linkedEntityId="...">...</file></files>
//! </inventory>
//! ```
//!
//! [`ArchiveWriter`] emits it incrementally into an async sink and
//! [`ArchiveReader`] pulls it back one record at a time, so neither side
//! holds more than one record in memory.

mod reader;
mod writer;

use thiserror::Error;
use uuid::Uuid;

use crate::models::{area, commodity, file::FileCategory, location};

pub use reader::ArchiveReader;
pub use writer::ArchiveWriter;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("<{element}> is missing attribute {attribute}")]
    MissingAttribute { element: String, attribute: String },

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("invalid embedded file data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("malformed archive: {0}")]
    Structure(String),
}

/// Top-level sections, in the order they are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Locations,
    Areas,
    Commodities,
    Files,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locations => "locations",
            Self::Areas => "areas",
            Self::Commodities => "commodities",
            Self::Files => "files",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "locations" => Some(Self::Locations),
            "areas" => Some(Self::Areas),
            "commodities" => Some(Self::Commodities),
            "files" => Some(Self::Files),
            _ => None,
        }
    }

    fn record_element(&self) -> &'static str {
        match self {
            Self::Locations => "location",
            Self::Areas => "area",
            Self::Commodities => "commodity",
            Self::Files => "file",
        }
    }
}

/// Attributes of the `<inventory>` root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub export_date: Option<String>,
    pub export_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationRecord {
    pub id: Uuid,
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AreaRecord {
    pub id: Uuid,
    pub location_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommodityRecord {
    pub id: Uuid,
    pub area_id: Uuid,
    pub name: String,
    pub short_name: String,
    pub commodity_type: String,
    pub count: i32,
    pub status: String,
    pub original_price: Option<f64>,
    pub original_price_currency: Option<String>,
    pub serial_number: Option<String>,
    pub comments: Option<String>,
    pub draft: bool,
    /// Attachments grouped under `<images>`, `<invoices>` and `<manuals>`
    pub files: Vec<FileRecord>,
}

/// Target of a standalone `<files>` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLink {
    pub entity_type: String,
    pub entity_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: Uuid,
    /// `image`, `invoice`, `manual` or `export`; unknown kinds are kept verbatim.
    pub kind: String,
    pub link: Option<FileLink>,
    pub title: String,
    pub original_path: String,
    pub mime_type: String,
    pub data: Option<Vec<u8>>,
}

impl FileRecord {
    /// Archive kind for a stored file category.
    pub fn kind_for(category: FileCategory) -> &'static str {
        match category {
            FileCategory::Images => "image",
            FileCategory::Invoices => "invoice",
            FileCategory::Manuals => "manual",
            FileCategory::Exports => "export",
        }
    }

    pub fn data_len(&self) -> i64 {
        self.data.as_ref().map_or(0, |data| data.len() as i64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveRecord {
    Header(ArchiveHeader),
    Location(LocationRecord),
    Area(AreaRecord),
    Commodity(CommodityRecord),
    File(FileRecord),
}

impl From<&location::Model> for LocationRecord {
    fn from(model: &location::Model) -> Self {
        Self {
            id: model.id,
            name: model.name.clone(),
            address: model.address.clone(),
        }
    }
}

impl From<&area::Model> for AreaRecord {
    fn from(model: &area::Model) -> Self {
        Self {
            id: model.id,
            location_id: model.location_id,
            name: model.name.clone(),
        }
    }
}

impl CommodityRecord {
    pub fn from_model(model: &commodity::Model, files: Vec<FileRecord>) -> Self {
        Self {
            id: model.id,
            area_id: model.area_id,
            name: model.name.clone(),
            short_name: model.short_name.clone(),
            commodity_type: model.commodity_type.clone(),
            count: model.count,
            status: model.status.clone(),
            original_price: model.original_price,
            original_price_currency: model.original_price_currency.clone(),
            serial_number: model.serial_number.clone(),
            comments: model.comments.clone(),
            draft: model.draft,
            files,
        }
    }
}
