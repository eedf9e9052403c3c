//! Buyer risk scoring.
//!
//! Pure functions only. Scores are advisory: they feed limit recommendations
//! but never touch a credit account directly.

pub mod scorer;

pub use scorer::{
    BuyerActivity, RepaymentRecord, RiskAssessment, RiskInputs, RiskLevel, RiskPolicy,
    recommend_limit, score,
};
