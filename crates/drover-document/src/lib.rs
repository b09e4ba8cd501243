pub mod office;
pub mod strategy;
pub mod structured;
pub mod text;

pub use strategy::{resolve_strategy, ProcessingStrategy};

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

use crate::structured::{summarize_delimited, summarize_json};
use crate::text::read_text_with_fallback;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),
}

pub type Result<T> = std::result::Result<T, DocumentError>;

/// Per-source toggles carried on the input descriptor.
#[derive(Debug, Clone)]
pub struct PreprocessOptions {
    /// Skip extraction entirely and hand the raw bytes to a multimodal
    /// model, where the format allows it.
    pub skip_preprocessing: bool,
    pub preprocess_image: bool,
    pub is_document_with_text: bool,
    pub replace_images_with_descriptions: bool,
    pub contains_images: bool,
    pub extract_images_as_text: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            skip_preprocessing: false,
            preprocess_image: true,
            is_document_with_text: true,
            replace_images_with_descriptions: true,
            contains_images: true,
            extract_images_as_text: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractLimits {
    pub max_file_bytes: u64,
    pub max_output_chars: usize,
    pub max_xml_bytes: usize,
    pub max_sheets: usize,
    pub max_rows: usize,
    pub max_cols: usize,
    pub max_json_chars: usize,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 50 * 1024 * 1024,
            max_output_chars: 200_000,
            max_xml_bytes: 5 * 1024 * 1024,
            max_sheets: 6,
            max_rows: 200,
            max_cols: 30,
            max_json_chars: 10_000,
        }
    }
}

/// Outcome of preprocessing one downloaded source.
#[derive(Debug, Clone, Default)]
pub struct ProcessedFile {
    pub processed_content: String,
    pub content_preview: String,
    /// Set only in raw-passthrough mode.
    pub binary_data: Option<Vec<u8>>,
    pub media_type: Option<String>,
    pub raw_file_mode: bool,
}

impl ProcessedFile {
    fn text(content: String, preview_chars: usize) -> Self {
        let content_preview = preview(&content, preview_chars);
        Self {
            processed_content: content,
            content_preview,
            ..Default::default()
        }
    }
}

fn preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() > max_chars {
        let head: String = content.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        content.to_string()
    }
}

pub fn truncate_output(s: String, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    if s.chars().count() <= max_chars {
        return s;
    }
    let mut out = String::with_capacity(max_chars + 64);
    for (i, ch) in s.chars().enumerate() {
        if i >= max_chars {
            break;
        }
        out.push(ch);
    }
    out.push_str("\n\n...[truncated]...\n");
    out
}

fn lower_ext(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn fallback_media_type(extension: &str) -> &'static str {
    match extension {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "tiff" | "tif" => "image/tiff",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Placeholder text used when an extractor cannot handle a file; the
/// execution keeps going with this in place of the content.
pub fn extraction_failed_placeholder(kind: &str, name: &str, message: &str) -> String {
    format!("[{kind} file: {name} — extraction failed: {message}]")
}

/// Run the strategy table over one downloaded file and produce prompt-ready
/// content.
pub fn process_file(
    path: &Path,
    content_type: &str,
    options: &PreprocessOptions,
    limits: &ExtractLimits,
) -> Result<ProcessedFile> {
    if !path.exists() {
        return Err(DocumentError::NotFound(format!(
            "file does not exist: {}",
            path.display()
        )));
    }
    let meta = fs::metadata(path)?;
    if meta.len() > limits.max_file_bytes {
        return Err(DocumentError::InvalidDocument(format!(
            "file too large for preprocessing: {} bytes (limit: {} bytes)",
            meta.len(),
            limits.max_file_bytes
        )));
    }

    let ext = lower_ext(path);
    let name = display_name(path);
    let strategy = resolve_strategy(content_type, &ext);

    match strategy {
        ProcessingStrategy::AlwaysText => {
            let content = read_text_with_fallback(path)?;
            Ok(ProcessedFile::text(
                truncate_output(content, limits.max_output_chars),
                500,
            ))
        }
        ProcessingStrategy::StructuredData => {
            let content = match ext.as_str() {
                "csv" => summarize_delimited(path, b',', limits),
                "tsv" => summarize_delimited(path, b'\t', limits),
                "json" | "jsonl" => summarize_json(path, &ext, limits),
                // content-type driven: csv wins over xml-ish types
                _ if content_type == "text/csv" => summarize_delimited(path, b',', limits),
                _ => summarize_json(path, &ext, limits),
            };
            match content {
                Ok(content) => Ok(ProcessedFile::text(content, 500)),
                Err(e) => {
                    warn!("structured parse failed for {name}: {e}");
                    // fall back to the raw text so the model still sees it
                    let content = read_text_with_fallback(path)?;
                    Ok(ProcessedFile::text(
                        truncate_output(content, limits.max_output_chars),
                        500,
                    ))
                }
            }
        }
        ProcessingStrategy::BinaryCapable => {
            if options.skip_preprocessing {
                return raw_passthrough(path, content_type, &ext, &name);
            }
            if ext == "pdf" || content_type == "application/pdf" {
                match office::extract_pdf_text(path) {
                    Ok(content) => Ok(ProcessedFile::text(
                        truncate_output(content, limits.max_output_chars),
                        500,
                    )),
                    Err(e) => Ok(ProcessedFile::text(
                        extraction_failed_placeholder("pdf", &name, &e.to_string()),
                        500,
                    )),
                }
            } else {
                // Images have no local text extractor; describe the file and
                // point the user at raw passthrough.
                let placeholder = extraction_failed_placeholder(
                    "image",
                    &name,
                    "no local converter; enable skip_preprocessing for multimodal passthrough",
                );
                let mut processed = ProcessedFile::text(placeholder, 200);
                processed.media_type = Some(
                    if content_type.starts_with("image/") {
                        content_type.to_string()
                    } else {
                        fallback_media_type(&ext).to_string()
                    },
                );
                Ok(processed)
            }
        }
        ProcessingStrategy::DocumentProcessing => {
            let extracted = match ext.as_str() {
                "docx" | "dotx" | "docm" | "dotm" => office::extract_docx_text(path, limits),
                "pptx" | "potx" | "ppsx" | "pptm" | "potm" | "ppsm" => {
                    office::extract_pptx_text(path, limits)
                }
                "xlsx" | "xlsm" | "xls" | "ods" | "xlsb" => {
                    office::extract_spreadsheet_text(path, limits)
                }
                other => Err(DocumentError::ExtractionFailed(format!(
                    "no converter available for .{other}"
                ))),
            };
            match extracted {
                Ok(content) => Ok(ProcessedFile::text(
                    truncate_output(content, limits.max_output_chars),
                    500,
                )),
                Err(e) => Ok(ProcessedFile::text(
                    extraction_failed_placeholder("document", &name, &e.to_string()),
                    500,
                )),
            }
        }
        ProcessingStrategy::Unknown => match read_text_with_fallback(path) {
            Ok(content) => Ok(ProcessedFile::text(
                truncate_output(content, limits.max_output_chars),
                500,
            )),
            Err(_) => {
                let mut processed =
                    ProcessedFile::text(format!("Binary or unreadable file: {name}"), 500);
                processed.content_preview = format!("[Unknown file type: {name}]");
                Ok(processed)
            }
        },
    }
}

fn raw_passthrough(
    path: &Path,
    content_type: &str,
    ext: &str,
    name: &str,
) -> Result<ProcessedFile> {
    let bytes = fs::read(path)?;
    let media_type = if content_type.is_empty() || content_type == "application/octet-stream" {
        fallback_media_type(ext).to_string()
    } else {
        content_type.to_string()
    };
    let kind = if media_type.starts_with("image/") {
        "IMAGE"
    } else {
        "PDF"
    };
    Ok(ProcessedFile {
        processed_content: format!("Binary file: {name}"),
        content_preview: preview(&format!("[{kind} file: {name}]"), 200),
        binary_data: Some(bytes),
        media_type: Some(media_type),
        raw_file_mode: true,
    })
}
