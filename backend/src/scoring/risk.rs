use risk_shared::RiskLevel;

pub const HIGH_RISK_THRESHOLD: f64 = 0.7;
pub const MEDIUM_RISK_THRESHOLD: f64 = 0.4;

/// Map a default probability onto its risk tier and score.
pub fn classify_risk(probability: f64) -> (RiskLevel, u8) {
    let level = if probability >= HIGH_RISK_THRESHOLD {
        RiskLevel::High
    } else if probability >= MEDIUM_RISK_THRESHOLD {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };
    (level, level.score())
}
