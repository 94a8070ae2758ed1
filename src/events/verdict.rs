// Outbound events: review verdicts and (optionally) pipeline fault reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::POST_REVIEW_FAILED;

/// The pass/fail outcome of one review, as sent to the posts service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictEvent {
    pub pattern: String,
    pub data: VerdictData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictData {
    pub post_id: String,
    pub message: String,
    pub success: bool,
}

impl VerdictEvent {
    pub fn new(pattern: &str, post_id: &str, message: &str, success: bool) -> Self {
        Self {
            pattern: pattern.to_string(),
            data: VerdictData {
                post_id: post_id.to_string(),
                message: message.to_string(),
                success,
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Report of a review that broke before reaching a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultEvent {
    pub pattern: String,
    pub data: FaultData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultData {
    /// None when the payload was too broken to carry a string id.
    pub post_id: Option<String>,
    pub workflow: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl FaultEvent {
    pub fn new(post_id: Option<&str>, workflow: &str, error: &str) -> Self {
        Self {
            pattern: POST_REVIEW_FAILED.to_string(),
            data: FaultData {
                post_id: post_id.map(str::to_string),
                workflow: workflow.to_string(),
                error: error.to_string(),
                failed_at: Utc::now(),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
