use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::sandbox::{classify_by_extension, safe_filename, ExtensionClass, Sandbox};
use crate::urls::{parse_agent_output_url, parse_s3_url, validate_url, S3Location};
use crate::{IngestError, Result};

/// Content types the fetcher will accept from remote servers.
const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "text/plain",
    "text/html",
    "text/markdown",
    "text/csv",
    "application/json",
    "application/xml",
    "text/xml",
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/tiff",
    "image/bmp",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/msword",
    "application/vnd.ms-powerpoint",
    "application/vnd.ms-excel",
];

/// Disk writes happen in 8 KiB slices with the cap checked before each
/// slice, so the partial file never exceeds the limit no matter how large
/// the network frames are.
const DOWNLOAD_CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Enables loopback / private-range URL blocking.
    pub production: bool,
    pub max_file_size_mb: u64,
    pub timeout_secs: u64,
    /// Buckets owned by this deployment, used for source-type detection.
    pub our_s3_buckets: Vec<String>,
    pub aws_region: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            production: true,
            max_file_size_mb: 50,
            timeout_secs: 30,
            our_s3_buckets: Vec::new(),
            aws_region: None,
        }
    }
}

/// Broad handling category assigned at download time; the preprocessor
/// refines it with its strategy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Json,
    Image,
    Pdf,
    Document,
    Unknown,
}

impl FileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::Text => "text",
            FileKind::Json => "json",
            FileKind::Image => "image",
            FileKind::Pdf => "pdf",
            FileKind::Document => "document",
            FileKind::Unknown => "unknown",
        }
    }
}

/// A source downloaded into the sandbox, ready for preprocessing.
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub file_path: PathBuf,
    pub content_type: String,
    pub file_type: FileKind,
    pub size_bytes: u64,
    pub filename: String,
    pub source_url: String,
}

/// Resolves `agent-output://` URLs to the producing execution's output.
#[async_trait]
pub trait ExecutionOutputSource: Send + Sync {
    async fn completed_output(&self, execution_id: Uuid) -> Option<String>;
}

pub struct InputFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl InputFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Drover/0.2 (content fetcher)")
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| IngestError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Download one source into the sandbox, routing by URL shape.
    pub async fn fetch(
        &self,
        url: &str,
        sandbox: &Sandbox,
        outputs: &dyn ExecutionOutputSource,
    ) -> Result<FetchedFile> {
        validate_url(url, self.config.production)?;

        if let Some(execution_id) = parse_agent_output_url(url) {
            return self.fetch_agent_output(url, execution_id, sandbox, outputs).await;
        }

        if let Some(location) = parse_s3_url(url) {
            match self.fetch_from_s3(url, &location, sandbox).await {
                Ok(fetched) => return Ok(fetched),
                Err(e) if url.starts_with("http") => {
                    warn!("S3 fetch failed for {url}, falling back to HTTP: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        self.fetch_from_http(url, sandbox).await
    }

    async fn fetch_agent_output(
        &self,
        url: &str,
        execution_id: Uuid,
        sandbox: &Sandbox,
        outputs: &dyn ExecutionOutputSource,
    ) -> Result<FetchedFile> {
        let Some(output) = outputs.completed_output(execution_id).await else {
            return Err(IngestError::NotFound(format!(
                "no completed output for execution {execution_id}"
            )));
        };

        let filename = format!("agent_output_{execution_id}.txt");
        let file_path = sandbox.join(&filename);
        tokio::fs::write(&file_path, output.as_bytes()).await?;

        Ok(FetchedFile {
            file_path,
            content_type: "text/plain".to_string(),
            file_type: FileKind::Text,
            size_bytes: output.len() as u64,
            filename,
            source_url: url.to_string(),
        })
    }

    async fn fetch_from_http(&self, url: &str, sandbox: &Sandbox) -> Result<FetchedFile> {
        info!("downloading content from: {url}");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();

        if !ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
            return Err(IngestError::UnsupportedContentType(content_type));
        }

        let max_bytes = self.config.max_file_size_mb * 1024 * 1024;
        if let Some(length) = response.content_length() {
            if length > max_bytes {
                return Err(IngestError::TooLarge(format!(
                    "{:.2}MB (max: {}MB)",
                    length as f64 / (1024.0 * 1024.0),
                    self.config.max_file_size_mb
                )));
            }
        }

        let mut filename = safe_filename(url, 100);
        if Path::new(&filename).extension().is_none() {
            if let Some(ext) = extension_for_content_type(&content_type) {
                filename.push_str(ext);
            }
        }
        let file_path = sandbox.join(&filename);

        let mut file = tokio::fs::File::create(&file_path).await?;
        let mut stream = response.bytes_stream();
        let mut total: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&file_path).await;
                    return Err(IngestError::Network(e.to_string()));
                }
            };
            if let Err(e) = self
                .append_capped(&mut file, &chunk, &mut total, max_bytes, "download")
                .await
            {
                drop(file);
                let _ = tokio::fs::remove_file(&file_path).await;
                return Err(e);
            }
        }
        file.flush().await?;

        let file_type = determine_file_type(&file_path, &content_type);
        info!("downloaded {total} bytes to {}", file_path.display());

        Ok(FetchedFile {
            file_path,
            content_type,
            file_type,
            size_bytes: total,
            filename,
            source_url: url.to_string(),
        })
    }

    async fn fetch_from_s3(
        &self,
        url: &str,
        location: &S3Location,
        sandbox: &Sandbox,
    ) -> Result<FetchedFile> {
        info!(
            "fetching s3://{}/{} via configured credentials",
            location.bucket, location.key
        );

        let region = self
            .config
            .aws_region
            .clone()
            .unwrap_or_else(|| location.region.clone());
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region))
            .load()
            .await;
        let s3 = aws_sdk_s3::Client::new(&shared);

        let object = s3
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| IngestError::Network(format!("S3 get_object failed: {e}")))?;

        let content_type = object
            .content_type()
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_lowercase())
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let filename = safe_filename(url, 100);
        let file_path = sandbox.join(&filename);
        let max_bytes = self.config.max_file_size_mb * 1024 * 1024;

        let mut body = object.body;
        let mut file = tokio::fs::File::create(&file_path).await?;
        let mut total: u64 = 0;
        loop {
            let chunk = match body.try_next().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&file_path).await;
                    return Err(IngestError::Network(format!("S3 stream failed: {e}")));
                }
            };
            if let Err(e) = self
                .append_capped(&mut file, &chunk, &mut total, max_bytes, "S3 download")
                .await
            {
                drop(file);
                let _ = tokio::fs::remove_file(&file_path).await;
                return Err(e);
            }
        }
        file.flush().await?;

        let file_type = determine_file_type(&file_path, &content_type);

        Ok(FetchedFile {
            file_path,
            content_type,
            file_type,
            size_bytes: total,
            filename,
            source_url: url.to_string(),
        })
    }

    /// Write one network frame to disk in 8 KiB slices, checking the
    /// cumulative cap before each slice lands.
    async fn append_capped(
        &self,
        file: &mut tokio::fs::File,
        chunk: &[u8],
        total: &mut u64,
        max_bytes: u64,
        label: &str,
    ) -> Result<()> {
        for slice in chunk.chunks(DOWNLOAD_CHUNK_SIZE) {
            if *total + slice.len() as u64 > max_bytes {
                return Err(IngestError::TooLarge(format!(
                    "exceeded {}MB during {label}",
                    self.config.max_file_size_mb
                )));
            }
            file.write_all(slice).await?;
            *total += slice.len() as u64;
        }
        Ok(())
    }
}

fn determine_file_type(file_path: &Path, content_type: &str) -> FileKind {
    if content_type.starts_with("text/") {
        return FileKind::Text;
    }
    if content_type.starts_with("image/") {
        return FileKind::Image;
    }
    match content_type {
        "application/pdf" => return FileKind::Pdf,
        "application/json" => return FileKind::Json,
        _ => {}
    }

    match classify_by_extension(file_path) {
        ExtensionClass::Text => FileKind::Text,
        ExtensionClass::Image => FileKind::Image,
        ExtensionClass::Document => FileKind::Document,
        ExtensionClass::Unknown => FileKind::Unknown,
    }
}

fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    match content_type {
        "text/plain" => Some(".txt"),
        "text/html" => Some(".html"),
        "text/markdown" => Some(".md"),
        "text/csv" => Some(".csv"),
        "application/json" => Some(".json"),
        "application/xml" | "text/xml" => Some(".xml"),
        "application/pdf" => Some(".pdf"),
        "image/jpeg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/gif" => Some(".gif"),
        "image/webp" => Some(".webp"),
        "image/tiff" => Some(".tiff"),
        "image/bmp" => Some(".bmp"),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Some(".docx"),
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
            Some(".pptx")
        }
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some(".xlsx"),
        _ => None,
    }
}
