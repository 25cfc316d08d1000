use crate::layout::FEATURE_COUNT;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Fixed-width input vector for the classifier. Slots past the populated
/// layout are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    /// Places each value at its slot; every other slot stays zero. Slots past
    /// the vector width are dropped.
    pub fn from_slots(values: &[(usize, f64)]) -> Self {
        let mut slots = [0.0; FEATURE_COUNT];
        for &(index, value) in values {
            if let Some(slot) = slots.get_mut(index) {
                *slot = value;
            }
        }
        Self(slots)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, index: usize) -> f64 {
        self.0.get(index).copied().unwrap_or(0.0)
    }
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self([0.0; FEATURE_COUNT])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Legitimate,
    Phishing,
    Suspicious,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Legitimate => "legitimate",
            Label::Phishing => "phishing",
            Label::Suspicious => "suspicious",
        }
    }

    /// Wording shown to end users.
    pub fn display_text(&self) -> &'static str {
        match self {
            Label::Legitimate => "Not phishing",
            Label::Phishing => "Phishing",
            Label::Suspicious => "Suspicious",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration data for a domain as reported by the domain-info service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub creation_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub domain_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub decision_id: Uuid,
    pub label: Label,
    pub url: String,
    pub reasons: Vec<String>,
    pub block_eligible: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub result: String,
    pub label: Label,
    pub url: String,
    pub reasons: Vec<String>,
    pub block_option: bool,
    pub decision_id: Uuid,
}

impl From<ClassificationResult> for PredictResponse {
    fn from(result: ClassificationResult) -> Self {
        Self {
            result: result.label.display_text().to_string(),
            label: result.label,
            url: result.url,
            reasons: result.reasons,
            block_option: result.block_eligible,
            decision_id: result.decision_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl StatusResponse {
    pub fn success(message: &str) -> Self {
        Self {
            status: "success".to_string(),
            message: message.to_string(),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            status: "error".to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedUrlsResponse {
    pub blocked_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Safe,
    Suspicious,
}

impl Vote {
    /// Anything other than `"safe"` counts against the URL.
    pub fn parse(feedback: &str) -> Self {
        if feedback == "safe" {
            Vote::Safe
        } else {
            Vote::Suspicious
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackRequest {
    pub url: String,
    pub feedback: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackTally {
    pub safe_votes: u64,
    pub suspicious_votes: u64,
    pub reason: Option<String>,
}
