use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use zip::ZipArchive;

use crate::{DocumentError, ExtractLimits, Result};

pub fn extract_pdf_text(path: &Path) -> Result<String> {
    pdf_extract::extract_text(path).map_err(|e| {
        DocumentError::ExtractionFailed(format!("PDF text extraction failed for {:?}: {e}", path))
    })
}

/// Open an OOXML container streaming from disk; the archive directory is
/// seekable so nothing is buffered beyond the entries actually read.
fn open_archive(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(path)?;
    ZipArchive::new(BufReader::new(file)).map_err(|e| {
        DocumentError::InvalidDocument(format!("failed to open zip container {:?}: {e}", path))
    })
}

fn read_zip_entry(path: &Path, inner_path: &str, max_bytes: usize) -> Result<Vec<u8>> {
    let mut zip = open_archive(path)?;
    let entry = zip.by_name(inner_path).map_err(|e| {
        DocumentError::InvalidDocument(format!(
            "zip entry '{inner_path}' not found in {:?}: {e}",
            path
        ))
    })?;

    let mut out = Vec::new();
    entry
        .take(max_bytes as u64)
        .read_to_end(&mut out)
        .map_err(|e| DocumentError::ExtractionFailed(format!("failed reading zip entry: {e}")))?;
    Ok(out)
}

pub fn extract_docx_text(path: &Path, limits: &ExtractLimits) -> Result<String> {
    let xml = read_zip_entry(path, "word/document.xml", limits.max_xml_bytes)?;
    wordprocessingml_to_text(&xml)
}

fn slide_number(entry_name: &str) -> Option<usize> {
    entry_name
        .strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

pub fn extract_pptx_text(path: &Path, limits: &ExtractLimits) -> Result<String> {
    let mut zip = open_archive(path)?;

    let mut slides: Vec<(usize, String)> = Vec::new();
    for i in 0..zip.len() {
        let Ok(entry) = zip.by_index(i) else {
            continue;
        };
        let Some(number) = slide_number(entry.name()) else {
            continue;
        };
        let mut buf = Vec::new();
        entry
            .take(limits.max_xml_bytes as u64)
            .read_to_end(&mut buf)
            .map_err(|e| {
                DocumentError::ExtractionFailed(format!("failed reading slide XML: {e}"))
            })?;
        slides.push((number, presentationml_to_text(&buf)?));
    }

    if slides.is_empty() {
        return Err(DocumentError::InvalidDocument(format!(
            "no slide XML found in {:?}",
            path
        )));
    }

    // deck order, not the archive's lexicographic entry order
    slides.sort_by_key(|(number, _)| *number);

    let mut out = String::new();
    for (number, text) in slides {
        let _ = writeln!(out, "## Slide {number}");
        out.push_str(text.trim());
        out.push_str("\n\n");
    }
    Ok(out)
}

pub fn extract_spreadsheet_text(path: &Path, limits: &ExtractLimits) -> Result<String> {
    let mut workbook = open_workbook_auto(path).map_err(|e| {
        DocumentError::InvalidDocument(format!("failed to open spreadsheet {:?}: {e}", path))
    })?;

    let sheet_names = workbook.sheet_names().to_vec();
    let total_sheets = sheet_names.len();
    let mut out = String::new();

    for (idx, sheet) in sheet_names.into_iter().enumerate() {
        if idx >= limits.max_sheets {
            let _ = writeln!(out, "...{} more sheet(s) omitted", total_sheets - idx);
            break;
        }
        let Ok(range) = workbook.worksheet_range(&sheet) else {
            continue;
        };
        let (height, width) = range.get_size();
        let _ = writeln!(out, "# Sheet: {sheet} ({height}x{width})");

        for row in range.rows().take(limits.max_rows) {
            let cells: Vec<String> = row
                .iter()
                .take(limits.max_cols)
                .map(|cell| match cell {
                    Data::Empty => String::new(),
                    other => other.to_string(),
                })
                .collect();
            let _ = writeln!(out, "{}", cells.join(" | "));
        }
        if height > limits.max_rows {
            let _ = writeln!(out, "...{} more row(s) omitted", height - limits.max_rows);
        }
        if width > limits.max_cols {
            let _ = writeln!(
                out,
                "...{} more column(s) omitted per row",
                width - limits.max_cols
            );
        }
        out.push('\n');
    }

    Ok(out)
}

fn wordprocessingml_to_text(xml: &[u8]) -> Result<String> {
    ooxml_runs_to_text(xml, true)
}

fn presentationml_to_text(xml: &[u8]) -> Result<String> {
    ooxml_runs_to_text(xml, false)
}

/// Walk `<t>` runs in an OOXML body. Word documents additionally encode
/// tabs and explicit line breaks; slides only need paragraph separation.
fn ooxml_runs_to_text(xml: &[u8], word_breaks: bool) -> Result<String> {
    let mut reader = XmlReader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut out = String::new();
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.name();
                let name = name.as_ref();
                if name.ends_with(b"t") {
                    in_text = true;
                } else if word_breaks && name.ends_with(b"tab") {
                    out.push('\t');
                } else if word_breaks && name.ends_with(b"br") {
                    out.push('\n');
                } else if name.ends_with(b"p") && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(Event::End(_)) => {
                in_text = false;
            }
            Ok(Event::Text(t)) => {
                if in_text {
                    let text = t.decode().map_err(|e| {
                        DocumentError::ExtractionFailed(format!("XML decode error: {e}"))
                    })?;
                    out.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DocumentError::ExtractionFailed(format!(
                    "failed parsing OOXML body: {e}"
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
