// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    BlockedReason, BusinessRecord, ConversationTurn, Intent, IntentSource, MatchCandidate,
    MatchInfo, QueryContext, RiskLevel, ScoringWeights, SearchMethod, SecurityVerdict,
    ValidationPath,
};
pub use requests::DiscoverRequest;
pub use responses::{
    Action, ComposedResponse, DiscoveryStage, ErrorResponse, HealthResponse, RefreshResponse,
    ResponseMetadata, ResponseType, SecuritySummary,
};
