use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{error, info};
use uuid::Uuid;

use crate::{IngestError, Result};

/// Ephemeral working directory for one execution's downloads.
///
/// The directory is removed when the sandbox drops, covering success and
/// failure paths alike; `close` is available where the caller wants the
/// cleanup error surfaced.
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub const DEFAULT_BASE_NAME: &'static str = "agent_task_sandbox";

    pub fn create() -> Result<Self> {
        Self::with_base_name(Self::DEFAULT_BASE_NAME)
    }

    pub fn with_base_name(base_name: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{base_name}_"))
            .tempdir()
            .map_err(|e| {
                error!("failed to create sandbox directory: {e}");
                IngestError::Sandbox(e.to_string())
            })?;
        info!("created sandbox directory: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, filename: &str) -> PathBuf {
        self.dir.path().join(filename)
    }

    pub fn close(self) -> Result<()> {
        let path = self.dir.path().display().to_string();
        self.dir
            .close()
            .map_err(|e| IngestError::Sandbox(format!("failed to remove {path}: {e}")))?;
        info!("cleaned up sandbox directory: {path}");
        Ok(())
    }
}

const SAFE_FILENAME_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789.-_";

/// Derive a collision-free filename from a URL path.
///
/// Unsafe characters become `_`, long names are truncated preserving the
/// extension, and a random 8-character suffix keeps repeated downloads of
/// the same URL distinct within a sandbox.
pub fn safe_filename(url: &str, max_length: usize) -> String {
    let fallback = || format!("downloaded_file_{}", random_suffix());

    let Ok(parsed) = url::Url::parse(url) else {
        return fallback();
    };

    let path = parsed.path().trim_matches('/');
    let raw_name = path.rsplit('/').next().unwrap_or("");
    let raw_name = if raw_name.is_empty() {
        "downloaded_file"
    } else {
        raw_name
    };

    let mut filename: String = raw_name
        .chars()
        .map(|c| if SAFE_FILENAME_CHARS.contains(c) { c } else { '_' })
        .collect();

    if filename.len() > max_length {
        let ext = extension_of(&filename);
        let keep = max_length.saturating_sub(10);
        let name_part: String = filename.chars().take(keep).collect();
        filename = format!("{name_part}{}", truncate(&ext, 10));
    }

    let (stem, ext) = split_extension(&filename);
    format!("{stem}_{}{ext}", random_suffix())
}

fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx..].to_string(),
        _ => String::new(),
    }
}

fn split_extension(name: &str) -> (String, String) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (name[..idx].to_string(), name[idx..].to_string()),
        _ => (name.to_string(), String::new()),
    }
}

/// Stat-based size check used before handing a file to the preprocessor.
pub fn validate_file_size(path: &Path, max_size_mb: u64) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let max_bytes = max_size_mb * 1024 * 1024;
            if meta.len() > max_bytes {
                tracing::warn!(
                    "file {} size {} bytes exceeds limit of {} bytes",
                    path.display(),
                    meta.len(),
                    max_bytes
                );
                false
            } else {
                true
            }
        }
        Err(e) => {
            error!("failed to stat {}: {e}", path.display());
            false
        }
    }
}

/// Coarse classification by extension, used when the content type is
/// missing or unhelpful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionClass {
    Text,
    Image,
    Document,
    Unknown,
}

impl ExtensionClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtensionClass::Text => "text",
            ExtensionClass::Image => "image",
            ExtensionClass::Document => "document",
            ExtensionClass::Unknown => "unknown",
        }
    }
}

pub fn classify_by_extension(path: &Path) -> ExtensionClass {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "md" | "py" | "js" | "html" | "css" | "json" | "xml" | "yml" | "yaml" | "csv" => {
            ExtensionClass::Text
        }
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "svg" | "webp" | "tiff" | "tif" => {
            ExtensionClass::Image
        }
        "pdf" | "doc" | "docx" | "ppt" | "pptx" | "xls" | "xlsx" => ExtensionClass::Document,
        _ => ExtensionClass::Unknown,
    }
}
