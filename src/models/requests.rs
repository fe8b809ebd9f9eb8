use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::domain::QueryContext;

/// Request to discover businesses from a free-text query
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DiscoverRequest {
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub query: String,
    #[validate(custom(function = "validate_context"))]
    #[serde(default)]
    pub context: QueryContext,
}

impl DiscoverRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context: QueryContext::default(),
        }
    }

    pub fn with_context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }
}

fn validate_context(context: &QueryContext) -> Result<(), validator::ValidationError> {
    if context.conversation_history.len() > 50 {
        return Err(validator::ValidationError::new("conversation_history_too_long"));
    }
    if context
        .user_location
        .as_ref()
        .is_some_and(|location| location.chars().count() > 120)
    {
        return Err(validator::ValidationError::new("user_location_too_long"));
    }
    Ok(())
}
