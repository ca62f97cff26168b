//! XML rendering for `urlset` and `sitemapindex` documents.

use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::types::SitemapEntry;
use crate::{Error, Result};

/// Namespace of the sitemap protocol.
pub const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

/// Timestamp layout used for every `<lastmod>`.
pub const LASTMOD_FORMAT: &str = "%Y-%m-%dT%H:%M:%S+00:00";

/// One `<sitemap>` reference inside an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Absolute or relative location of the referenced file.
    pub loc: String,
    /// Modification time reported for the file.
    pub lastmod: DateTime<Utc>,
}

/// Format a timestamp for `<lastmod>`.
pub fn format_lastmod(at: &DateTime<Utc>) -> String {
    at.format(LASTMOD_FORMAT).to_string()
}

/// Render a `urlset` document, entries in the given order.
pub fn render_urlset(entries: &[SitemapEntry]) -> Result<Vec<u8>> {
    let mut writer = start_document("urlset")?;
    for entry in entries {
        open(&mut writer, "url")?;
        text_element(&mut writer, "loc", &entry.url)?;
        if let Some(lastmod) = &entry.lastmod {
            text_element(&mut writer, "lastmod", &format_lastmod(lastmod))?;
        }
        text_element(&mut writer, "changefreq", entry.changefreq.as_str())?;
        close(&mut writer, "url")?;
    }
    finish_document(writer, "urlset")
}

/// Render a `sitemapindex` document.
pub fn render_index(entries: &[IndexEntry]) -> Result<Vec<u8>> {
    let mut writer = start_document("sitemapindex")?;
    for entry in entries {
        open(&mut writer, "sitemap")?;
        text_element(&mut writer, "loc", &entry.loc)?;
        text_element(&mut writer, "lastmod", &format_lastmod(&entry.lastmod))?;
        close(&mut writer, "sitemap")?;
    }
    finish_document(writer, "sitemapindex")
}

fn start_document(root: &str) -> Result<Writer<Vec<u8>>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Start(
            BytesStart::new(root).with_attributes([("xmlns", SITEMAP_NS)]),
        ))
        .map_err(xml_error)?;
    Ok(writer)
}

fn finish_document(mut writer: Writer<Vec<u8>>, root: &str) -> Result<Vec<u8>> {
    close(&mut writer, root)?;
    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn open(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_error)
}

fn close(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_error)
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    writer
        .create_element(name)
        .write_text_content(BytesText::new(text))
        .map_err(xml_error)?;
    Ok(())
}

fn xml_error(e: impl std::fmt::Display) -> Error {
    Error::Processing(format!("XML write failed: {e}"))
}
