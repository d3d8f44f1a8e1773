pub mod batch;
pub mod risk;
pub mod service;

pub use batch::{BatchError, RiskCounts, ScoredBatch};
pub use risk::classify_risk;
pub use service::{ScoringError, ScoringService};
