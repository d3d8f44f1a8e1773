use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Feature columns in the order the classifier was fitted on.
pub const REQUIRED_FEATURES: [&str; 6] = [
    "age",
    "income",
    "loan_amount",
    "credit_history",
    "employment_length",
    "debt_to_income",
];

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CreditApplication {
    pub age: f64,
    pub income: f64,
    pub loan_amount: f64,
    pub credit_history: f64,
    pub employment_length: f64,
    pub debt_to_income: f64,
}

impl CreditApplication {
    /// Feature values laid out in `REQUIRED_FEATURES` order.
    pub fn features(&self) -> [f64; 6] {
        [
            self.age,
            self.income,
            self.loan_amount,
            self.credit_history,
            self.employment_length,
            self.debt_to_income,
        ]
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn score(self) -> u8 {
        match self {
            RiskLevel::Low => 1,
            RiskLevel::Medium => 2,
            RiskLevel::High => 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PredictionResult {
    pub default_probability: f64,
    pub risk_level: RiskLevel,
    pub risk_score: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BatchResult {
    pub total_records: usize,
    pub high_risk: usize,
    pub medium_risk: usize,
    pub low_risk: usize,
    pub download_link: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ModelInfo {
    pub model_type: String,
    pub expected_features: usize,
    pub required_features: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceMessage {
    pub message: String,
}
