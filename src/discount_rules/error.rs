// Error types for the discount rules engine
// Every variant is recoverable: engines catch them per rule and fall back to
// the undiscounted price or cart, so none of these ever reach a shopper.

use thiserror::Error;
use uuid::Uuid;

use crate::models::RuleId;

/// Main error type for the discount rules engine
///
/// Raised by rule validation, condition evaluators, and repository lookups.
/// Public evaluation operations never return it; they log it and treat the
/// offending rule as contributing nothing.
#[derive(Debug, Error)]
pub enum DiscountRulesError {
    /// Malformed rule: missing discount value, bad tier, unknown offer kind
    #[error("Invalid rule configuration: {0}")]
    Configuration(String),

    /// A condition evaluator failed; the condition is treated as not satisfied
    #[error("Condition '{condition_type}' could not be evaluated: {reason}")]
    ConditionEvaluation {
        condition_type: String,
        reason: String,
    },

    /// Repository or catalog lookup failed
    #[error("Data access error: {0}")]
    DataAccess(String),

    /// Rule referenced by id does not exist
    #[error("Rule not found: {0}")]
    RuleNotFound(RuleId),

    /// Rule record failed field validation
    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// Rule record could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Gift lines are owned by reconciliation and cannot be edited directly
    #[error("Cart line {0} is a gift line and cannot be modified")]
    GiftLineLocked(Uuid),

    /// Cart line referenced by key does not exist
    #[error("Cart line not found: {0}")]
    LineNotFound(Uuid),
}

/// Result type alias for discount rules operations
pub type DRResult<T> = Result<T, DiscountRulesError>;

impl DiscountRulesError {
    /// Shorthand for a condition evaluator failure
    pub fn condition(condition_type: &str, reason: impl Into<String>) -> Self {
        DiscountRulesError::ConditionEvaluation {
            condition_type: condition_type.to_string(),
            reason: reason.into(),
        }
    }
}
