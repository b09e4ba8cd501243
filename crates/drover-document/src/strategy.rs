/// How a downloaded file should be turned into prompt content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStrategy {
    /// Plain text formats, read with the encoding cascade.
    AlwaysText,
    /// CSV/TSV/JSON: parse and summarise rather than inline verbatim.
    StructuredData,
    /// PDFs and images: raw multimodal passthrough when preprocessing is
    /// skipped, text extraction otherwise.
    BinaryCapable,
    /// Office formats that always go through a converter.
    DocumentProcessing,
    Unknown,
}

/// Content type wins; extension is the fallback.
pub fn resolve_strategy(content_type: &str, extension: &str) -> ProcessingStrategy {
    let content_type = content_type.to_lowercase();
    if !content_type.is_empty() {
        if content_type.starts_with("image/") {
            return ProcessingStrategy::BinaryCapable;
        }
        if let Some(strategy) = strategy_for_content_type(&content_type) {
            return strategy;
        }
    }
    strategy_for_extension(&extension.to_lowercase())
}

fn strategy_for_content_type(content_type: &str) -> Option<ProcessingStrategy> {
    use ProcessingStrategy::*;
    let strategy = match content_type {
        "text/plain" | "text/html" | "text/markdown" | "text/x-markdown" => AlwaysText,
        "text/csv" | "application/json" | "application/xml" | "text/xml" => StructuredData,
        "application/pdf" => BinaryCapable,
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        | "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        | "application/msword"
        | "application/vnd.ms-word"
        | "application/vnd.ms-powerpoint"
        | "application/vnd.ms-excel" => DocumentProcessing,
        _ => return None,
    };
    Some(strategy)
}

fn strategy_for_extension(extension: &str) -> ProcessingStrategy {
    use ProcessingStrategy::*;
    match extension {
        "txt" | "md" | "markdown" | "html" | "htm" | "xml" | "adoc" | "asciidoc" | "asc"
        | "rst" => AlwaysText,
        "csv" | "tsv" | "json" | "jsonl" => StructuredData,
        "pdf" | "jpg" | "jpeg" | "png" | "gif" | "webp" | "tiff" | "tif" | "bmp" => BinaryCapable,
        "docx" | "dotx" | "docm" | "dotm" | "doc" | "pptx" | "potx" | "ppsx" | "pptm" | "potm"
        | "ppsm" | "ppt" | "xlsx" | "xlsm" | "xls" => DocumentProcessing,
        _ => Unknown,
    }
}
