use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Where an input source's content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    PublicUrl,
    OurS3,
    UserS3,
    AgentOutput,
    Unknown,
}

impl Default for SourceType {
    fn default() -> Self {
        SourceType::Unknown
    }
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::PublicUrl => "public_url",
            SourceType::OurS3 => "our_s3",
            SourceType::UserS3 => "user_s3",
            SourceType::AgentOutput => "agent_output",
            SourceType::Unknown => "unknown",
        }
    }
}

/// Descriptor for one piece of external content merged into a task prompt.
///
/// Unknown keys survive round-trips through the `extra` map so descriptors
/// written by newer clients are not stripped on save.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InputSource {
    pub url: String,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_preprocessing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preprocess_image: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_document_with_text: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_images_with_descriptions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_images: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_images_as_text: Option<bool>,
    /// Set on chain-trigger entries: the upstream execution that produced
    /// the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_execution_id: Option<Uuid>,
    /// Pre-resolved content for chain-trigger entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_content: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InputSource {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source_type: SourceType::PublicUrl,
            ..Default::default()
        }
    }

    /// Copy the preprocessing toggles (and only those) from another source.
    pub fn copy_preprocessing_flags(&mut self, from: &InputSource) {
        self.skip_preprocessing = from.skip_preprocessing;
        self.preprocess_image = from.preprocess_image;
        self.is_document_with_text = from.is_document_with_text;
        self.replace_images_with_descriptions = from.replace_images_with_descriptions;
        self.contains_images = from.contains_images;
        self.extract_images_as_text = from.extract_images_as_text;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_round_trip() {
        let raw = r#"{"url":"https://example.com/a.txt","source_type":"public_url","future_flag":true}"#;
        let source: InputSource = serde_json::from_str(raw).unwrap();
        assert_eq!(source.extra.get("future_flag"), Some(&Value::Bool(true)));
        let back = serde_json::to_value(&source).unwrap();
        assert_eq!(back.get("future_flag"), Some(&Value::Bool(true)));
    }

    #[test]
    fn preprocessing_flags_copy_over() {
        let mut upstream = InputSource::from_url("https://example.com/doc.pdf");
        upstream.skip_preprocessing = Some(true);
        upstream.contains_images = Some(false);

        let mut chained = InputSource::from_url("agent-output://abc");
        chained.copy_preprocessing_flags(&upstream);
        assert_eq!(chained.skip_preprocessing, Some(true));
        assert_eq!(chained.contains_images, Some(false));
        assert_eq!(chained.preprocess_image, None);
    }
}
