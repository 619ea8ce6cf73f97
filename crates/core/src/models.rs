use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Queued,
    Processing,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Finished | Self::Failed) }
}

impl FromStr for JobStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Parameters for a new publish job, as submitted by the upload route.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub access_token: String,
    pub archive_path: String,
    pub repo_name: String,
    pub is_private: bool,
}

/// A claimed job, as handed to the worker. The access token and archive path
/// stay with the job for its entire lifetime.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: String,
    pub access_token: String,
    pub archive_path: String,
    pub repo_name: String,
    pub is_private: bool,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub step: String,
    pub percentage: u8,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn ok(repo_url: String, repo_name: String) -> Self {
        Self { success: true, repo_url: Some(repo_url), repo_name: Some(repo_name), error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, repo_url: None, repo_name: None, error: Some(message.into()) }
    }
}

/// Read-only projection served to the polling client.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_round_trip() {
        for status in
            [JobStatus::Queued, JobStatus::Processing, JobStatus::Finished, JobStatus::Failed]
        {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_result_serialization_omits_absent_fields() {
        let ok = serde_json::to_value(JobResult::ok("https://x".into(), "x".into())).unwrap();
        assert_eq!(ok.get("error"), None);
        let err = serde_json::to_value(JobResult::err("boom")).unwrap();
        assert_eq!(err.get("repo_url"), None);
        assert_eq!(err["error"], "boom");
    }
}
