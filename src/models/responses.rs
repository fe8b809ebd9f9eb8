use serde::{Deserialize, Serialize};

use crate::models::domain::{
    BusinessRecord, Intent, MatchInfo, RiskLevel, SecurityVerdict, ValidationPath,
};

/// States visited while composing a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryStage {
    Start,
    SecurityCheck,
    FastPath,
    FullPath,
    Intent,
    Match,
    Exact,
    Disambiguate,
    NoMatch,
    Default,
    Narrate,
    Sanitize,
    Done,
    Blocked,
}

/// Shape of the composed answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Exact,
    Disambiguation,
    NoMatch,
    Default,
    Blocked,
    Error,
}

impl ResponseType {
    /// Stage the composer enters for this shape
    pub fn stage(self) -> DiscoveryStage {
        match self {
            ResponseType::Exact => DiscoveryStage::Exact,
            ResponseType::Disambiguation => DiscoveryStage::Disambiguate,
            ResponseType::NoMatch => DiscoveryStage::NoMatch,
            ResponseType::Default | ResponseType::Error => DiscoveryStage::Default,
            ResponseType::Blocked => DiscoveryStage::Blocked,
        }
    }
}

/// Follow-up the client can offer the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    pub description: String,
}

impl Action {
    pub fn new(kind: &str, label: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            label: label.into(),
            description: description.into(),
        }
    }
}

/// Security outcome reported back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySummary {
    pub path: ValidationPath,
    pub risk_level: RiskLevel,
    pub blocked: bool,
}

impl From<&SecurityVerdict> for SecuritySummary {
    fn from(verdict: &SecurityVerdict) -> Self {
        Self {
            path: verdict.path,
            risk_level: verdict.risk_level,
            blocked: !verdict.is_valid,
        }
    }
}

/// Diagnostic data attached to every response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub request_id: uuid::Uuid,
    pub response_type: ResponseType,
    pub ai_powered: bool,
    pub provider: Option<String>,
    pub match_info: Option<MatchInfo>,
    pub intent: Option<Intent>,
    pub security: Option<SecuritySummary>,
    pub stages: Vec<DiscoveryStage>,
    pub suggestions: Vec<String>,
    pub processing_time_ms: u64,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

impl ResponseMetadata {
    pub fn new(request_id: uuid::Uuid, response_type: ResponseType) -> Self {
        Self {
            request_id,
            response_type,
            ai_powered: false,
            provider: None,
            match_info: None,
            intent: None,
            security: None,
            stages: Vec::new(),
            suggestions: Vec::new(),
            processing_time_ms: 0,
            generated_at: chrono::Utc::now(),
        }
    }
}

/// Final answer for a discovery query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedResponse {
    pub understanding: String,
    pub recommendations: Vec<BusinessRecord>,
    pub insights: Vec<String>,
    pub actions: Vec<Action>,
    pub metadata: ResponseMetadata,
}

impl ComposedResponse {
    /// Static answer used when nothing else could be produced
    pub fn last_resort(request_id: uuid::Uuid) -> Self {
        let suggestions = vec![
            "Browse all businesses".to_string(),
            "Restaurants near you".to_string(),
            "Hair and beauty".to_string(),
        ];
        let mut metadata = ResponseMetadata::new(request_id, ResponseType::Error);
        metadata.stages = vec![DiscoveryStage::Default, DiscoveryStage::Done];
        metadata.suggestions = suggestions.clone();

        Self {
            understanding: "I couldn't process that right now. Please try again in a moment."
                .to_string(),
            recommendations: Vec::new(),
            insights: Vec::new(),
            actions: suggestions
                .into_iter()
                .map(|s| Action::new("try_search", s, "Start a new search"))
                .collect(),
            metadata,
        }
    }

    pub fn response_type(&self) -> ResponseType {
        self.metadata.response_type
    }

    pub fn visited(&self, stage: DiscoveryStage) -> bool {
        self.metadata.stages.contains(&stage)
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub catalog_size: usize,
    pub catalog_refreshed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub active_provider: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

/// Catalog refresh response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub success: bool,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_resort_is_safe() {
        let response = ComposedResponse::last_resort(uuid::Uuid::new_v4());

        assert!(response.recommendations.is_empty());
        assert!(!response.metadata.ai_powered);
        assert_eq!(response.response_type(), ResponseType::Error);
        assert!(!response.actions.is_empty());
    }

    #[test]
    fn test_metadata_serializes_snake_case_flags() {
        let response = ComposedResponse::last_resort(uuid::Uuid::new_v4());
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["metadata"]["ai_powered"], serde_json::json!(false));
        assert_eq!(json["metadata"]["response_type"], serde_json::json!("error"));
        assert_eq!(json["actions"][0]["type"], serde_json::json!("try_search"));
    }
}
