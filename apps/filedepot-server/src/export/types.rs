//! Export job types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an export job; only Processing → Completed | Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

/// Pollable record of one export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub job_id: String,
    #[serde(skip_serializing)]
    pub owner_id: String,
    pub status: JobStatus,
    /// "Started", "<done>/<total>" while building, "Ready" once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Number of objects requested after access filtering
    pub file_count: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ExportJob {
    pub fn new(
        job_id: impl Into<String>,
        owner_id: impl Into<String>,
        file_count: usize,
        retention: std::time::Duration,
    ) -> Self {
        let now = Utc::now();
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::hours(2));

        Self {
            job_id: job_id.into(),
            owner_id: owner_id.into(),
            status: JobStatus::Processing,
            progress: Some("Started".to_string()),
            error: None,
            result_path: None,
            download_url: None,
            file_count,
            created_at: now,
            expires_at: now + retention,
        }
    }
}

/// Body of `POST /export`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportRequest {
    #[serde(alias = "fileIds")]
    pub object_ids: Vec<String>,
}

/// Body of the 202 answer to `POST /export`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportAccepted {
    pub job_id: String,
    pub status: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_serializes_camel_case() {
        let job = ExportJob::new("j1", "alice", 3, std::time::Duration::from_secs(7200));
        let json = serde_json::to_value(&job).unwrap();

        assert_eq!(json["jobId"], "j1");
        assert_eq!(json["status"], "Processing");
        assert_eq!(json["progress"], "Started");
        assert_eq!(json["fileCount"], 3);
        assert!(json.get("ownerId").is_none());
        assert!(json.get("downloadUrl").is_none());
    }

    #[test]
    fn test_request_accepts_both_field_names() {
        let request: ExportRequest = serde_json::from_str(r#"{"objectIds":["a","b"]}"#).unwrap();
        assert_eq!(request.object_ids.len(), 2);

        let request: ExportRequest = serde_json::from_str(r#"{"fileIds":["a"]}"#).unwrap();
        assert_eq!(request.object_ids, vec!["a"]);

        let request: ExportRequest = serde_json::from_str("{}").unwrap();
        assert!(request.object_ids.is_empty());
    }
}
