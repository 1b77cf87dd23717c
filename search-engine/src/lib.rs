pub mod cache;
pub mod fallback;
pub mod orchestrator;
pub mod scoring;

pub use cache::{CacheKey, ResultCache};
pub use fallback::fallback_comments;
pub use orchestrator::{ResultSource, SearchOrchestrator, SearchOutcome};
pub use scoring::{ParsedQuery, ScoreBreakdown, ScoringEngine, ScoringWeights};
