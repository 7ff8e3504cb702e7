use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tokio::io::{AsyncRead, BufReader};
use uuid::Uuid;

use super::{
    AreaRecord, ArchiveError, ArchiveHeader, ArchiveRecord, CommodityRecord, FileLink,
    FileRecord, LocationRecord, Section,
};

/// Owned view of the parser events the reader cares about
enum Node {
    Open {
        name: String,
        attrs: HashMap<String, String>,
    },
    Close(String),
    Text(String),
    Eof,
}

/// Pull parser yielding one [`ArchiveRecord`] per call.
///
/// The first record is always the header. `Ok(None)` is returned once the
/// root element is closed; a document that ends before that is an error.
pub struct ArchiveReader<R> {
    reader: Reader<BufReader<R>>,
    buf: Vec<u8>,
    header_seen: bool,
    finished: bool,
    section: Option<Section>,
}

impl<R: AsyncRead + Unpin> ArchiveReader<R> {
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(BufReader::new(source));
        reader.trim_text(true);
        reader.expand_empty_elements(true);
        Self {
            reader,
            buf: Vec::new(),
            header_seen: false,
            finished: false,
            section: None,
        }
    }

    pub async fn next_record(&mut self) -> Result<Option<ArchiveRecord>, ArchiveError> {
        if self.finished {
            return Ok(None);
        }

        loop {
            match self.next_node().await? {
                Node::Open { name, attrs } => {
                    if !self.header_seen {
                        if name != "inventory" {
                            return Err(ArchiveError::Structure(format!(
                                "expected <inventory> root, found <{name}>"
                            )));
                        }
                        self.header_seen = true;
                        return Ok(Some(ArchiveRecord::Header(ArchiveHeader {
                            export_date: attrs.get("exportDate").cloned(),
                            export_type: attrs.get("exportType").cloned(),
                        })));
                    }

                    match self.section {
                        None => match Section::parse(&name) {
                            Some(section) => self.section = Some(section),
                            None => self.skip_element(&name).await?,
                        },
                        Some(section) if name == section.record_element() => {
                            let record = match section {
                                Section::Locations => {
                                    ArchiveRecord::Location(self.read_location(&attrs).await?)
                                }
                                Section::Areas => ArchiveRecord::Area(self.read_area(&attrs).await?),
                                Section::Commodities => {
                                    ArchiveRecord::Commodity(self.read_commodity(&attrs).await?)
                                }
                                Section::Files => {
                                    ArchiveRecord::File(self.read_standalone_file(&attrs).await?)
                                }
                            };
                            return Ok(Some(record));
                        }
                        Some(_) => self.skip_element(&name).await?,
                    }
                }
                Node::Close(name) => {
                    if name == "inventory" {
                        self.finished = true;
                        return Ok(None);
                    }
                    if self.section.is_some_and(|section| section.as_str() == name) {
                        self.section = None;
                    }
                }
                Node::Text(_) => {}
                Node::Eof => {
                    let message = if self.header_seen {
                        "document ended before </inventory>"
                    } else {
                        "document has no root element"
                    };
                    return Err(ArchiveError::Structure(message.to_string()));
                }
            }
        }
    }

    async fn next_node(&mut self) -> Result<Node, ArchiveError> {
        loop {
            self.buf.clear();
            let node = match self.reader.read_event_into_async(&mut self.buf).await? {
                Event::Start(start) => Node::Open {
                    name: element_name(start.name().as_ref()),
                    attrs: attributes(&start)?,
                },
                Event::End(end) => Node::Close(element_name(end.name().as_ref())),
                Event::Text(text) => Node::Text(text.unescape()?.into_owned()),
                Event::CData(data) => {
                    Node::Text(String::from_utf8_lossy(&data.into_inner()).into_owned())
                }
                Event::Eof => Node::Eof,
                _ => continue,
            };
            return Ok(node);
        }
    }

    async fn skip_element(&mut self, name: &str) -> Result<(), ArchiveError> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.next_node().await? {
                Node::Open { .. } => depth += 1,
                Node::Close(_) => depth -= 1,
                Node::Text(_) => {}
                Node::Eof => {
                    return Err(ArchiveError::Structure(format!("unterminated <{name}>")));
                }
            }
        }
        Ok(())
    }

    async fn read_text(&mut self, name: &str) -> Result<String, ArchiveError> {
        let mut text = String::new();
        loop {
            match self.next_node().await? {
                Node::Text(chunk) => text.push_str(&chunk),
                Node::Close(closed) if closed == name => return Ok(text),
                Node::Open { name: child, .. } => {
                    return Err(ArchiveError::Structure(format!(
                        "unexpected <{child}> inside <{name}>"
                    )));
                }
                Node::Close(_) | Node::Eof => {
                    return Err(ArchiveError::Structure(format!("unterminated <{name}>")));
                }
            }
        }
    }

    /// Collects the text of every child element of `name`.
    async fn read_fields(&mut self, name: &str) -> Result<HashMap<String, String>, ArchiveError> {
        let mut fields = HashMap::new();
        loop {
            match self.next_node().await? {
                Node::Open { name: child, .. } => {
                    let value = self.read_text(&child).await?;
                    fields.insert(child, value);
                }
                Node::Close(closed) if closed == name => return Ok(fields),
                Node::Text(_) => {}
                Node::Close(_) | Node::Eof => {
                    return Err(ArchiveError::Structure(format!("unterminated <{name}>")));
                }
            }
        }
    }

    async fn read_location(
        &mut self,
        attrs: &HashMap<String, String>,
    ) -> Result<LocationRecord, ArchiveError> {
        let id = required_uuid(attrs, "location", "id")?;
        let mut fields = self.read_fields("location").await?;
        Ok(LocationRecord {
            id,
            name: fields.remove("name").unwrap_or_default(),
            address: fields.remove("address").unwrap_or_default(),
        })
    }

    async fn read_area(
        &mut self,
        attrs: &HashMap<String, String>,
    ) -> Result<AreaRecord, ArchiveError> {
        let id = required_uuid(attrs, "area", "id")?;
        let location_id = required_uuid(attrs, "area", "locationId")?;
        let mut fields = self.read_fields("area").await?;
        Ok(AreaRecord {
            id,
            location_id,
            name: fields.remove("name").unwrap_or_default(),
        })
    }

    async fn read_commodity(
        &mut self,
        attrs: &HashMap<String, String>,
    ) -> Result<CommodityRecord, ArchiveError> {
        let id = required_uuid(attrs, "commodity", "id")?;
        let area_id = required_uuid(attrs, "commodity", "areaId")?;
        let mut fields = HashMap::new();
        let mut files = Vec::new();

        loop {
            match self.next_node().await? {
                Node::Open { name, .. } => match attachment_kind(&name) {
                    Some(kind) => self.read_attachment_group(&name, kind, &mut files).await?,
                    None => {
                        let value = self.read_text(&name).await?;
                        fields.insert(name, value);
                    }
                },
                Node::Close(closed) if closed == "commodity" => break,
                Node::Text(_) => {}
                Node::Close(_) | Node::Eof => {
                    return Err(ArchiveError::Structure("unterminated <commodity>".to_string()));
                }
            }
        }

        let count = match fields.remove("count") {
            Some(raw) => parse_value("count", &raw)?,
            None => 1,
        };
        let original_price = fields
            .remove("originalPrice")
            .map(|raw| parse_value("originalPrice", &raw))
            .transpose()?;
        let draft = match fields.remove("draft") {
            Some(raw) => parse_value("draft", &raw)?,
            None => false,
        };

        Ok(CommodityRecord {
            id,
            area_id,
            name: fields.remove("name").unwrap_or_default(),
            short_name: fields.remove("shortName").unwrap_or_default(),
            commodity_type: fields.remove("type").unwrap_or_default(),
            count,
            status: fields.remove("status").unwrap_or_default(),
            original_price,
            original_price_currency: non_empty(fields.remove("originalPriceCurrency")),
            serial_number: non_empty(fields.remove("serialNumber")),
            comments: non_empty(fields.remove("comments")),
            draft,
            files,
        })
    }

    async fn read_attachment_group(
        &mut self,
        group: &str,
        kind: &str,
        files: &mut Vec<FileRecord>,
    ) -> Result<(), ArchiveError> {
        loop {
            match self.next_node().await? {
                Node::Open { name, attrs } if name == "file" => {
                    let id = required_uuid(&attrs, "file", "id")?;
                    files.push(self.read_file_body(id, kind.to_string(), None).await?);
                }
                Node::Open { name, .. } => self.skip_element(&name).await?,
                Node::Close(closed) if closed == group => return Ok(()),
                Node::Text(_) => {}
                Node::Close(_) | Node::Eof => {
                    return Err(ArchiveError::Structure(format!("unterminated <{group}>")));
                }
            }
        }
    }

    async fn read_standalone_file(
        &mut self,
        attrs: &HashMap<String, String>,
    ) -> Result<FileRecord, ArchiveError> {
        let id = required_uuid(attrs, "file", "id")?;
        let kind = attrs.get("type").cloned().unwrap_or_default();
        let link = match (attrs.get("linkedEntityType"), attrs.get("linkedEntityId")) {
            (Some(entity_type), Some(_)) => Some(FileLink {
                entity_type: entity_type.clone(),
                entity_id: required_uuid(attrs, "file", "linkedEntityId")?,
            }),
            _ => None,
        };
        self.read_file_body(id, kind, link).await
    }

    async fn read_file_body(
        &mut self,
        id: Uuid,
        kind: String,
        link: Option<FileLink>,
    ) -> Result<FileRecord, ArchiveError> {
        let mut fields = self.read_fields("file").await?;
        let data = match non_empty(fields.remove("data")) {
            Some(encoded) => Some(STANDARD.decode(encoded.trim())?),
            None => None,
        };
        Ok(FileRecord {
            id,
            kind,
            link,
            title: fields.remove("path").unwrap_or_default(),
            original_path: fields.remove("originalPath").unwrap_or_default(),
            mime_type: fields
                .remove("mimeType")
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            data,
        })
    }
}

fn attachment_kind(group: &str) -> Option<&'static str> {
    match group {
        "images" => Some("image"),
        "invoices" => Some("invoice"),
        "manuals" => Some("manual"),
        _ => None,
    }
}

fn element_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn attributes(start: &BytesStart<'_>) -> Result<HashMap<String, String>, ArchiveError> {
    let mut attrs = HashMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = element_name(attr.key.as_ref());
        let value = attr.unescape_value()?.into_owned();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn required_uuid(
    attrs: &HashMap<String, String>,
    element: &str,
    attribute: &str,
) -> Result<Uuid, ArchiveError> {
    let raw = attrs
        .get(attribute)
        .ok_or_else(|| ArchiveError::MissingAttribute {
            element: element.to_string(),
            attribute: attribute.to_string(),
        })?;
    parse_value(&format!("{element}@{attribute}"), raw)
}

fn parse_value<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, ArchiveError> {
    raw.trim().parse().map_err(|_| ArchiveError::InvalidValue {
        field: field.to_string(),
        value: raw.to_string(),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
