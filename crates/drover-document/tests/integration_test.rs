use std::fs;
use std::path::PathBuf;

use drover_document::{process_file, DocumentError, ExtractLimits, PreprocessOptions};
use tempfile::TempDir;

#[test]
fn plain_text_passes_through() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notes.txt");
    let content = "Hello, World!\nThis is a test file.";
    fs::write(&path, content).unwrap();

    let processed = process_file(
        &path,
        "text/plain",
        &PreprocessOptions::default(),
        &ExtractLimits::default(),
    )
    .unwrap();

    assert_eq!(processed.processed_content, content);
    assert_eq!(processed.content_preview, content);
    assert!(!processed.raw_file_mode);
    assert!(processed.binary_data.is_none());
}

#[test]
fn missing_file_is_not_found() {
    let missing = PathBuf::from("/tmp/drover_missing_file_12345.txt");
    let result = process_file(
        &missing,
        "text/plain",
        &PreprocessOptions::default(),
        &ExtractLimits::default(),
    );
    assert!(matches!(result, Err(DocumentError::NotFound(_))));
}

#[test]
fn oversized_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("large.txt");
    fs::write(&path, "x".repeat(4096)).unwrap();

    let limits = ExtractLimits {
        max_file_bytes: 1024,
        ..ExtractLimits::default()
    };
    let result = process_file(&path, "text/plain", &PreprocessOptions::default(), &limits);
    assert!(matches!(result, Err(DocumentError::InvalidDocument(_))));
}

#[test]
fn long_text_is_truncated_with_marker() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("long.txt");
    fs::write(&path, "a".repeat(300_000)).unwrap();

    let limits = ExtractLimits {
        max_output_chars: 1000,
        ..ExtractLimits::default()
    };
    let processed = process_file(&path, "text/plain", &PreprocessOptions::default(), &limits).unwrap();
    assert!(processed.processed_content.contains("...[truncated]..."));
}

#[test]
fn csv_is_summarised_not_inlined() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.csv");
    fs::write(&path, "day,requests\nmon,100\ntue,250\n").unwrap();

    let processed = process_file(
        &path,
        "text/csv",
        &PreprocessOptions::default(),
        &ExtractLimits::default(),
    )
    .unwrap();
    assert!(processed.processed_content.contains("CSV summary: 2 rows x 2 columns"));
    assert!(processed.processed_content.contains("requests (int)"));
}

#[test]
fn raw_passthrough_keeps_bytes_and_media_type() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chart.png");
    let bytes = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3];
    fs::write(&path, bytes).unwrap();

    let options = PreprocessOptions {
        skip_preprocessing: true,
        ..PreprocessOptions::default()
    };
    let processed = process_file(&path, "image/png", &options, &ExtractLimits::default()).unwrap();

    assert!(processed.raw_file_mode);
    assert_eq!(processed.media_type.as_deref(), Some("image/png"));
    assert_eq!(processed.binary_data.as_deref(), Some(&bytes[..]));
    assert!(processed.content_preview.contains("[IMAGE file: chart.png]"));
}

#[test]
fn image_without_passthrough_gets_placeholder() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scan.png");
    fs::write(&path, [1u8, 2, 3]).unwrap();

    let processed = process_file(
        &path,
        "image/png",
        &PreprocessOptions::default(),
        &ExtractLimits::default(),
    )
    .unwrap();
    assert!(!processed.raw_file_mode);
    assert!(processed.processed_content.contains("extraction failed"));
}

#[test]
fn unknown_binary_reports_filename_only() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blob.qz");
    fs::write(&path, [0u8, 159, 146, 150]).unwrap();

    let processed = process_file(
        &path,
        "",
        &PreprocessOptions::default(),
        &ExtractLimits::default(),
    )
    .unwrap();
    // unreadable as strict text but still produces content via the cascade
    assert!(!processed.processed_content.is_empty());
}

#[test]
fn legacy_doc_formats_degrade_to_placeholder() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("old.doc");
    fs::write(&path, b"\xD0\xCF\x11\xE0legacy").unwrap();

    let processed = process_file(
        &path,
        "application/msword",
        &PreprocessOptions::default(),
        &ExtractLimits::default(),
    )
    .unwrap();
    assert!(processed.processed_content.contains("extraction failed"));
    assert!(processed.processed_content.contains("old.doc"));
}
