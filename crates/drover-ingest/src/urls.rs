use regex::Regex;
use url::Url;
use uuid::Uuid;

use drover_types::{InputSource, SourceType};

use crate::{IngestError, Result};

pub const AGENT_OUTPUT_SCHEME: &str = "agent-output";

/// Parsed location of an object on S3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
    pub region: String,
}

/// Recognise `s3://bucket/key`, virtual-hosted
/// (`bucket.s3[.region].amazonaws.com/key`) and path-style
/// (`s3[.region].amazonaws.com/bucket/key`) URLs.
pub fn parse_s3_url(url: &str) -> Option<S3Location> {
    let parsed = Url::parse(url).ok()?;

    if parsed.scheme() == "s3" {
        let bucket = parsed.host_str()?.to_string();
        let key = parsed.path().trim_start_matches('/').to_string();
        return Some(S3Location {
            bucket,
            key,
            region: "us-east-1".to_string(),
        });
    }

    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let hostname = parsed.host_str()?;
    let path = parsed.path().trim_start_matches('/');

    let virtual_hosted =
        Regex::new(r"^([a-z0-9][a-z0-9\-]*[a-z0-9])\.s3\.([a-z0-9\-]*\.)?amazonaws\.com$")
            .expect("static regex");
    if let Some(captures) = virtual_hosted.captures(hostname) {
        let bucket = captures.get(1).map(|m| m.as_str().to_string())?;
        let region = captures
            .get(2)
            .map(|m| m.as_str().trim_end_matches('.').to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "us-east-1".to_string());
        return Some(S3Location {
            bucket,
            key: path.to_string(),
            region,
        });
    }

    let path_style = Regex::new(r"^s3\.([a-z0-9\-]*\.)?amazonaws\.com$").expect("static regex");
    if let Some(captures) = path_style.captures(hostname) {
        let mut parts = path.splitn(2, '/');
        let bucket = parts.next().filter(|b| !b.is_empty())?.to_string();
        let key = parts.next().unwrap_or("").to_string();
        let region = captures
            .get(1)
            .map(|m| m.as_str().trim_end_matches('.').to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "us-east-1".to_string());
        return Some(S3Location { bucket, key, region });
    }

    None
}

/// Extract the execution id from an `agent-output://<uuid>` URL.
pub fn parse_agent_output_url(url: &str) -> Option<Uuid> {
    let rest = url.strip_prefix("agent-output://")?;
    let id = rest.trim_matches('/');
    Uuid::parse_str(id).ok()
}

/// Classify a URL into the source types the scheduler persists.
pub fn detect_source_type(url: &str, our_buckets: &[String]) -> SourceType {
    if parse_agent_output_url(url).is_some() {
        return SourceType::AgentOutput;
    }
    if let Some(location) = parse_s3_url(url) {
        return if our_buckets.contains(&location.bucket) {
            SourceType::OurS3
        } else {
            SourceType::UserS3
        };
    }
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {
            SourceType::PublicUrl
        }
        _ => SourceType::Unknown,
    }
}

/// Build a standard input-source descriptor for a URL: detected source
/// type plus a filename derived from the URL path when none is given.
pub fn create_input_source(
    url: &str,
    filename: Option<String>,
    size: Option<u64>,
    content_type: Option<String>,
    our_buckets: &[String],
) -> InputSource {
    let filename = filename.or_else(|| {
        Url::parse(url).ok().and_then(|parsed| {
            parsed
                .path()
                .trim_matches('/')
                .rsplit('/')
                .next()
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        })
    });

    InputSource {
        url: url.to_string(),
        source_type: detect_source_type(url, our_buckets),
        filename: filename.or_else(|| Some("unknown_file".to_string())),
        content_type,
        size,
        ..Default::default()
    }
}

/// Reject URLs the fetcher must never dereference.
///
/// In production the loopback addresses and private ranges are blocked so a
/// task cannot be pointed at internal services.
pub fn validate_url(url: &str, production: bool) -> Result<()> {
    if parse_agent_output_url(url).is_some() {
        return Ok(());
    }

    let parsed =
        Url::parse(url).map_err(|_| IngestError::UnsafeUrl(format!("invalid URL format: {url}")))?;

    match parsed.scheme() {
        "s3" => return Ok(()),
        "http" | "https" => {}
        other => {
            return Err(IngestError::UnsafeUrl(format!(
                "unsupported URL scheme: {other}"
            )))
        }
    }

    let Some(hostname) = parsed.host_str() else {
        return Err(IngestError::UnsafeUrl(format!("missing hostname: {url}")));
    };

    if production {
        let lowered = hostname.to_lowercase();
        if matches!(lowered.as_str(), "localhost" | "127.0.0.1" | "0.0.0.0") {
            return Err(IngestError::UnsafeUrl(format!(
                "blocked local hostname: {hostname}"
            )));
        }
        if lowered.starts_with("10.") || lowered.starts_with("172.") || lowered.starts_with("192.168.")
        {
            return Err(IngestError::UnsafeUrl(format!(
                "blocked private address range: {hostname}"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_s3_scheme_urls() {
        let location = parse_s3_url("s3://my-bucket/path/to/file.csv").unwrap();
        assert_eq!(location.bucket, "my-bucket");
        assert_eq!(location.key, "path/to/file.csv");
        assert_eq!(location.region, "us-east-1");
    }

    #[test]
    fn parses_virtual_hosted_urls_with_region() {
        let location =
            parse_s3_url("https://reports.s3.eu-west-1.amazonaws.com/q3/summary.pdf").unwrap();
        assert_eq!(location.bucket, "reports");
        assert_eq!(location.key, "q3/summary.pdf");
        assert_eq!(location.region, "eu-west-1");
    }

    #[test]
    fn parses_path_style_urls() {
        let location = parse_s3_url("https://s3.amazonaws.com/reports/q3.pdf").unwrap();
        assert_eq!(location.bucket, "reports");
        assert_eq!(location.key, "q3.pdf");
    }

    #[test]
    fn ordinary_urls_are_not_s3() {
        assert!(parse_s3_url("https://example.com/file.txt").is_none());
    }

    #[test]
    fn agent_output_urls_parse_to_execution_ids() {
        let id = Uuid::new_v4();
        let parsed = parse_agent_output_url(&format!("agent-output://{id}")).unwrap();
        assert_eq!(parsed, id);
        assert!(parse_agent_output_url("agent-output://not-a-uuid").is_none());
        assert!(parse_agent_output_url("https://example.com").is_none());
    }

    #[test]
    fn source_type_detection() {
        let ours = vec!["drover-storage".to_string()];
        assert_eq!(
            detect_source_type("s3://drover-storage/a.txt", &ours),
            SourceType::OurS3
        );
        assert_eq!(
            detect_source_type("s3://theirs/a.txt", &ours),
            SourceType::UserS3
        );
        assert_eq!(
            detect_source_type("https://example.com/a.txt", &ours),
            SourceType::PublicUrl
        );
        assert_eq!(
            detect_source_type(&format!("agent-output://{}", Uuid::new_v4()), &ours),
            SourceType::AgentOutput
        );
        assert_eq!(detect_source_type("ftp://example.com/a", &ours), SourceType::Unknown);
    }

    #[test]
    fn descriptor_builder_derives_filename_and_type() {
        let source = create_input_source(
            "https://example.com/reports/q3-summary.pdf",
            None,
            Some(1024),
            Some("application/pdf".to_string()),
            &[],
        );
        assert_eq!(source.filename.as_deref(), Some("q3-summary.pdf"));
        assert_eq!(source.source_type, SourceType::PublicUrl);
        assert_eq!(source.size, Some(1024));

        let bare = create_input_source("https://example.com", None, None, None, &[]);
        assert_eq!(bare.filename.as_deref(), Some("unknown_file"));

        let explicit = create_input_source(
            "https://example.com/a.txt",
            Some("renamed.txt".to_string()),
            None,
            None,
            &[],
        );
        assert_eq!(explicit.filename.as_deref(), Some("renamed.txt"));
    }

    #[test]
    fn production_blocks_private_addresses() {
        for url in [
            "http://localhost/secret",
            "http://127.0.0.1:8000/admin",
            "http://0.0.0.0/",
            "http://10.0.0.5/secret",
            "http://192.168.1.10/router",
        ] {
            assert!(
                matches!(validate_url(url, true), Err(IngestError::UnsafeUrl(_))),
                "expected {url} to be rejected"
            );
            assert!(validate_url(url, false).is_ok(), "{url} allowed in dev");
        }
        assert!(validate_url("https://example.com/data.json", true).is_ok());
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        assert!(matches!(
            validate_url("ftp://example.com/a", false),
            Err(IngestError::UnsafeUrl(_))
        ));
        assert!(matches!(
            validate_url("not a url", false),
            Err(IngestError::UnsafeUrl(_))
        ));
    }
}
