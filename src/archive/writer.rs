use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{AreaRecord, ArchiveError, CommodityRecord, FileRecord, LocationRecord, Section};

const ATTACHMENT_GROUPS: [(&str, &str); 3] =
    [("images", "image"), ("invoices", "invoice"), ("manuals", "manual")];

/// Streams an inventory document into `sink`.
///
/// Events are encoded into a small buffer that is drained into the sink
/// after every element, so memory use is bounded by the largest record.
pub struct ArchiveWriter<W> {
    sink: W,
    xml: Writer<Vec<u8>>,
    written: u64,
}

impl<W: AsyncWrite + Unpin> ArchiveWriter<W> {
    /// Writes the XML declaration and opens the `<inventory>` root.
    pub async fn start(
        sink: W,
        export_type: &str,
        export_date: DateTime<Utc>,
    ) -> Result<Self, ArchiveError> {
        let mut writer = Self {
            sink,
            xml: Writer::new_with_indent(Vec::new(), b' ', 2),
            written: 0,
        };

        let date = export_date.to_rfc3339_opts(SecondsFormat::Secs, true);
        writer
            .xml
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.xml.write_event(Event::Start(
            BytesStart::new("inventory")
                .with_attributes([("exportDate", date.as_str()), ("exportType", export_type)]),
        ))?;
        writer.drain().await?;
        Ok(writer)
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub async fn begin_section(&mut self, section: Section) -> Result<(), ArchiveError> {
        self.xml
            .write_event(Event::Start(BytesStart::new(section.as_str())))?;
        self.drain().await
    }

    pub async fn end_section(&mut self, section: Section) -> Result<(), ArchiveError> {
        self.xml.write_event(Event::End(BytesEnd::new(section.as_str())))?;
        self.drain().await
    }

    pub async fn write_location(&mut self, record: &LocationRecord) -> Result<(), ArchiveError> {
        let id = record.id.to_string();
        self.xml.write_event(Event::Start(
            BytesStart::new("location").with_attributes([("id", id.as_str())]),
        ))?;
        self.text_element("name", &record.name)?;
        self.text_element("address", &record.address)?;
        self.xml.write_event(Event::End(BytesEnd::new("location")))?;
        self.drain().await
    }

    pub async fn write_area(&mut self, record: &AreaRecord) -> Result<(), ArchiveError> {
        let id = record.id.to_string();
        let location_id = record.location_id.to_string();
        self.xml.write_event(Event::Start(BytesStart::new("area").with_attributes([
            ("id", id.as_str()),
            ("locationId", location_id.as_str()),
        ])))?;
        self.text_element("name", &record.name)?;
        self.xml.write_event(Event::End(BytesEnd::new("area")))?;
        self.drain().await
    }

    pub async fn write_commodity(&mut self, record: &CommodityRecord) -> Result<(), ArchiveError> {
        let id = record.id.to_string();
        let area_id = record.area_id.to_string();
        self.xml
            .write_event(Event::Start(BytesStart::new("commodity").with_attributes([
                ("id", id.as_str()),
                ("areaId", area_id.as_str()),
            ])))?;

        self.text_element("name", &record.name)?;
        self.text_element("shortName", &record.short_name)?;
        self.text_element("type", &record.commodity_type)?;
        self.text_element("count", &record.count.to_string())?;
        self.text_element("status", &record.status)?;
        if let Some(price) = record.original_price {
            self.text_element("originalPrice", &price.to_string())?;
        }
        if let Some(currency) = &record.original_price_currency {
            self.text_element("originalPriceCurrency", currency)?;
        }
        if let Some(serial) = &record.serial_number {
            self.text_element("serialNumber", serial)?;
        }
        if let Some(comments) = &record.comments {
            self.text_element("comments", comments)?;
        }
        self.text_element("draft", if record.draft { "true" } else { "false" })?;
        self.drain().await?;

        for (group, kind) in ATTACHMENT_GROUPS {
            let files: Vec<&FileRecord> = record.files.iter().filter(|file| file.kind == kind).collect();
            if files.is_empty() {
                continue;
            }
            self.xml.write_event(Event::Start(BytesStart::new(group)))?;
            for file in files {
                self.file_element(file, false)?;
                self.drain().await?;
            }
            self.xml.write_event(Event::End(BytesEnd::new(group)))?;
        }

        self.xml.write_event(Event::End(BytesEnd::new("commodity")))?;
        self.drain().await
    }

    /// Writes an entry of the `<files>` section.
    pub async fn write_file(&mut self, record: &FileRecord) -> Result<(), ArchiveError> {
        self.file_element(record, true)?;
        self.drain().await
    }

    /// Closes the root, flushes and shuts the sink down.
    pub async fn finish(mut self) -> Result<(W, u64), ArchiveError> {
        self.xml.write_event(Event::End(BytesEnd::new("inventory")))?;
        self.xml.get_mut().push(b'\n');
        self.drain().await?;
        self.sink.flush().await?;
        self.sink.shutdown().await?;
        Ok((self.sink, self.written))
    }

    fn file_element(&mut self, record: &FileRecord, standalone: bool) -> Result<(), ArchiveError> {
        let id = record.id.to_string();
        let mut start = BytesStart::new("file").with_attributes([("id", id.as_str())]);
        if standalone {
            start.push_attribute(("type", record.kind.as_str()));
            if let Some(link) = &record.link {
                let entity_id = link.entity_id.to_string();
                start.push_attribute(("linkedEntityType", link.entity_type.as_str()));
                start.push_attribute(("linkedEntityId", entity_id.as_str()));
            }
        }
        self.xml.write_event(Event::Start(start))?;
        self.text_element("path", &record.title)?;
        self.text_element("originalPath", &record.original_path)?;
        self.text_element("mimeType", &record.mime_type)?;
        if let Some(data) = &record.data {
            self.text_element("data", &STANDARD.encode(data))?;
        }
        self.xml.write_event(Event::End(BytesEnd::new("file")))?;
        Ok(())
    }

    fn text_element(&mut self, name: &str, value: &str) -> Result<(), ArchiveError> {
        self.xml
            .create_element(name)
            .write_text_content(BytesText::new(value))?;
        Ok(())
    }

    async fn drain(&mut self) -> Result<(), ArchiveError> {
        let buffer = self.xml.get_mut();
        if buffer.is_empty() {
            return Ok(());
        }
        self.sink.write_all(buffer).await?;
        self.written += buffer.len() as u64;
        buffer.clear();
        Ok(())
    }
}
