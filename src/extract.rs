//! Per-format text extraction for uploaded documents.
//!
//! Dispatch is by file extension: `.txt` is decoded directly, `.docx` and
//! `.xlsx` are read as OOXML (ZIP + XML), and `.pdf` goes through
//! `pdf-extract`. A PDF without a usable text layer still yields page markers
//! and a placeholder so ingestion succeeds with reduced fidelity. Every other
//! failure on a supported format is an [`SupportError::ExtractionFailure`].

use std::collections::HashMap;
use std::io::Read;

use quick_xml::events::Event;
use tracing::{debug, warn};

use crate::error::{Result, SupportError};

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extensions accepted by the upload endpoint.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "docx", "xlsx", "pdf"];

/// A supported upload format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Text,
    Docx,
    Xlsx,
    Pdf,
}

impl FileFormat {
    /// Resolve the format from a file name's extension (case-insensitive).
    pub fn from_file_name(file_name: &str) -> Result<FileFormat> {
        let ext = file_extension(file_name)
            .ok_or_else(|| SupportError::UnsupportedFormat(file_name.to_string()))?;
        match ext.as_str() {
            "txt" => Ok(FileFormat::Text),
            "docx" => Ok(FileFormat::Docx),
            "xlsx" => Ok(FileFormat::Xlsx),
            "pdf" => Ok(FileFormat::Pdf),
            other => Err(SupportError::UnsupportedFormat(format!(".{}", other))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Text => "txt",
            FileFormat::Docx => "docx",
            FileFormat::Xlsx => "xlsx",
            FileFormat::Pdf => "pdf",
        }
    }
}

/// Lower-case extension of `file_name`, without the dot.
pub fn file_extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Extract raw text from an uploaded file.
pub fn extract_text(file_name: &str, bytes: &[u8]) -> Result<String> {
    let format = FileFormat::from_file_name(file_name)?;
    debug!(file_name, ?format, size = bytes.len(), "extracting text");
    match format {
        FileFormat::Text => Ok(decode_text(bytes)),
        FileFormat::Docx => extract_docx(bytes),
        FileFormat::Xlsx => extract_xlsx(bytes),
        FileFormat::Pdf => extract_pdf(bytes),
    }
}

fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn ooxml_err(e: impl std::fmt::Display) -> SupportError {
    SupportError::ExtractionFailure(e.to_string())
}

// ============ PDF ============

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    // pdf-extract panics on some malformed font tables; treat that like "no text layer".
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes));

    match pages {
        Ok(Ok(pages)) if pages.iter().any(|p| !p.trim().is_empty()) => {
            let mut out = String::new();
            for (i, page) in pages.iter().enumerate() {
                out.push_str(&page_marker(i + 1));
                out.push('\n');
                out.push_str(page.trim());
                out.push_str("\n\n");
            }
            Ok(out)
        }
        Ok(Ok(_)) => degraded_pdf(bytes, "no text layer"),
        Ok(Err(e)) => degraded_pdf(bytes, &e.to_string()),
        Err(_) => degraded_pdf(bytes, "text extractor panicked"),
    }
}

fn page_marker(page: usize) -> String {
    format!("--- Page {} ---", page)
}

/// Emit one marker and placeholder per page when no text is extractable.
/// Bytes that do not even parse as a PDF are a hard failure.
fn degraded_pdf(bytes: &[u8], reason: &str) -> Result<String> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| SupportError::ExtractionFailure(format!("invalid PDF: {}", e)))?;
    let page_count = doc.get_pages().len();
    if page_count == 0 {
        return Err(SupportError::ExtractionFailure(
            "PDF contains no pages".to_string(),
        ));
    }
    warn!(page_count, reason, "PDF has no extractable text, storing page placeholders");

    let mut out = String::new();
    for page in 1..=page_count {
        out.push_str(&page_marker(page));
        out.push('\n');
        out.push_str("[No extractable text on this page]\n\n");
    }
    Ok(out)
}

// ============ OOXML helpers ============

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>> {
    let entry = archive.by_name(name).map_err(|e| {
        SupportError::ExtractionFailure(format!("{} not readable: {}", name, e))
    })?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(ooxml_err)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(SupportError::ExtractionFailure(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == local {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

// ============ DOCX ============

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = open_archive(bytes)?;
    if !has_entry(&archive, "word/document.xml") {
        return Err(SupportError::ExtractionFailure(
            "word/document.xml not found".to_string(),
        ));
    }
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    docx_paragraphs(&xml)
}

/// Concatenate `<w:t>` runs per `<w:p>` paragraph, one paragraph per line.
fn docx_paragraphs(xml: &[u8]) -> Result<String> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                current.push_str(&te.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n"))
}

// ============ XLSX ============

fn extract_xlsx(bytes: &[u8]) -> Result<String> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if has_entry(&archive, "xl/sharedStrings.xml") {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml")?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let sheets = list_sheets(&mut archive)?;
    if sheets.is_empty() {
        return Err(SupportError::ExtractionFailure(
            "workbook contains no worksheets".to_string(),
        ));
    }

    let mut out = String::new();
    for (name, path) in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        if !has_entry(&archive, &path) {
            warn!(sheet = %name, path = %path, "worksheet part missing, skipping");
            continue;
        }
        let sheet_xml = read_zip_entry_bounded(&mut archive, &path)?;
        let rows = sheet_rows(&sheet_xml, &shared_strings)?;
        if rows.is_empty() {
            continue;
        }
        out.push_str(&format!("Sheet: {}\n", name));
        out.push_str(&rows.join("\n"));
        out.push_str("\n\n");
    }
    Ok(out)
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                current.push_str(&te.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Worksheets in workbook order as `(sheet name, zip path)`.
///
/// Names come from `xl/workbook.xml`, resolved to parts through the workbook
/// relationships. Workbooks missing either part fall back to the numbered
/// `xl/worksheets/sheetN.xml` entries with generated names.
fn list_sheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>> {
    if has_entry(archive, "xl/workbook.xml") && has_entry(archive, "xl/_rels/workbook.xml.rels")
    {
        let rels_xml = read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels")?;
        let targets = workbook_relationships(&rels_xml)?;
        let workbook_xml = read_zip_entry_bounded(archive, "xl/workbook.xml")?;
        let mut sheets = Vec::new();
        for (name, rel_id) in workbook_sheets(&workbook_xml)? {
            if let Some(target) = targets.get(&rel_id) {
                sheets.push((name, resolve_part_path(target)));
            }
        }
        if !sheets.is_empty() {
            return Ok(sheets);
        }
    }

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| sheet_number(name));
    Ok(names
        .into_iter()
        .map(|path| (format!("Sheet{}", sheet_number(&path)), path))
        .collect())
}

fn sheet_number(path: &str) -> u32 {
    path.trim_start_matches("xl/worksheets/sheet")
        .trim_end_matches(".xml")
        .parse::<u32>()
        .unwrap_or(u32::MAX)
}

fn resolve_part_path(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

fn workbook_relationships(xml: &[u8]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    if let (Some(id), Some(target)) =
                        (attr_value(&e, b"Id"), attr_value(&e, b"Target"))
                    {
                        map.insert(id, target);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(map)
}

fn workbook_sheets(xml: &[u8]) -> Result<Vec<(String, String)>> {
    let mut sheets = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    if let (Some(name), Some(id)) = (attr_value(&e, b"name"), attr_value(&e, b"id"))
                    {
                        sheets.push((name, id));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// One line per used row, non-empty cells joined with `" | "`.
fn sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<String>> {
    let mut rows = Vec::new();
    let mut row_cells: Vec<String> = Vec::new();
    let mut cell_type = String::new();
    let mut cell_value = String::new();
    let mut in_v = false;
    let mut in_inline_t = false;
    let mut cell_count = 0usize;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    cell_type = attr_value(&e, b"t").unwrap_or_default();
                    cell_value.clear();
                }
                b"v" => in_v = true,
                b"t" if cell_type == "inlineStr" => in_inline_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_v || in_inline_t => {
                cell_value.push_str(&te.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"t" => in_inline_t = false,
                b"c" => {
                    if let Some(text) = resolve_cell(&cell_type, cell_value.trim(), shared_strings)
                    {
                        row_cells.push(text);
                        cell_count += 1;
                    }
                    cell_type.clear();
                }
                b"row" => {
                    if !row_cells.is_empty() {
                        rows.push(row_cells.join(" | "));
                        row_cells.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    if !row_cells.is_empty() {
        rows.push(row_cells.join(" | "));
    }
    Ok(rows)
}

fn resolve_cell(cell_type: &str, raw: &str, shared_strings: &[String]) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let text = match cell_type {
        "s" => raw
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i))
            .cloned()?,
        "b" => if raw == "1" { "TRUE" } else { "FALSE" }.to_string(),
        _ => raw.to_string(),
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
