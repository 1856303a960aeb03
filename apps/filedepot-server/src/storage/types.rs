//! Storage types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata about a storage object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

impl ObjectMetadata {
    /// Whether the object was last written before `cutoff`
    ///
    /// Objects without a modification time are never considered stale.
    pub fn modified_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_modified.map(|t| t < cutoff).unwrap_or(false)
    }
}

/// List of objects with optional continuation token
#[derive(Debug, Clone, Serialize)]
pub struct ObjectList {
    pub objects: Vec<ObjectMetadata>,
    pub continuation_token: Option<String>,
    pub is_truncated: bool,
}

/// Options for listing objects
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub max_keys: Option<i32>,
    pub continuation_token: Option<String>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_max_keys(mut self, max_keys: i32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    pub fn with_continuation_token(mut self, token: impl Into<String>) -> Self {
        self.continuation_token = Some(token.into());
        self
    }
}

/// Guess a content type from a key's extension
pub fn guess_content_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_list_options_builder() {
        let options = ListOptions::new()
            .with_prefix("exports/")
            .with_max_keys(100);

        assert_eq!(options.prefix, Some("exports/".to_string()));
        assert_eq!(options.max_keys, Some(100));
        assert!(options.continuation_token.is_none());
    }

    #[test]
    fn test_modified_before() {
        let now = Utc::now();
        let mut meta = ObjectMetadata {
            key: "exports/a.zip".to_string(),
            size: 1,
            last_modified: Some(now - Duration::hours(3)),
            content_type: None,
            etag: None,
        };
        assert!(meta.modified_before(now - Duration::hours(2)));

        meta.last_modified = None;
        assert!(!meta.modified_before(now));
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("exports/x.zip"), "application/zip");
        assert_eq!(guess_content_type("abc_report.pdf"), "application/pdf");
        assert_eq!(guess_content_type("blob"), "application/octet-stream");
    }
}
