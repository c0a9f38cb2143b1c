// Validation utilities module
// Custom validator functions for rule records loaded from storage

use rust_decimal::Decimal;
use validator::ValidationError;

use crate::discount_rules::rule::{QuantityTier, Rule};
use crate::discount_rules::types::{DiscountType, RuleKind, PromotionKind};

/// Discount values are never negative
pub fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        Err(ValidationError::new("discount_value_must_be_non_negative"))
    } else {
        Ok(())
    }
}

/// Percentage values cannot exceed 100%
pub fn validate_percentage(discount_type: DiscountType, value: Decimal) -> Result<(), ValidationError> {
    if discount_type == DiscountType::Percentage && value > Decimal::ONE_HUNDRED {
        Err(ValidationError::new("percentage_cannot_exceed_100"))
    } else {
        Ok(())
    }
}

/// A tier's upper bound cannot sit below its lower bound
pub fn validate_tier_bounds(tier: &QuantityTier) -> Result<(), ValidationError> {
    validate_non_negative(&tier.discount_value)?;
    validate_percentage(tier.discount_type, tier.discount_value)?;

    match tier.max_quantity {
        Some(max) if max < tier.min_quantity => Err(ValidationError::new("tier_max_below_min")),
        _ => Ok(()),
    }
}

/// Cross-field checks on a whole rule
///
/// The base discount must be in range for its type, the schedule window must
/// not be inverted, and an event sale's own discount obeys the same limits.
pub fn validate_rule(rule: &Rule) -> Result<(), ValidationError> {
    if let Some(value) = rule.discount_value {
        validate_percentage(rule.discount_type, value)?;
    }

    if let (Some(from), Some(to)) = (rule.schedule_from, rule.schedule_to) {
        if to < from {
            return Err(ValidationError::new("schedule_ends_before_it_starts"));
        }
    }

    if let RuleKind::Promotion {
        offer: PromotionKind::EventSale {
            discount_type,
            discount_value: Some(value),
        },
    } = &rule.kind
    {
        validate_non_negative(value)?;
        validate_percentage(*discount_type, *value)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_non_negative() {
        assert!(validate_non_negative(&dec!(0)).is_ok());
        assert!(validate_non_negative(&dec!(-0.01)).is_err());
    }

    #[test]
    fn test_percentage_limit_only_for_percentages() {
        assert!(validate_percentage(DiscountType::Percentage, dec!(100)).is_ok());
        assert!(validate_percentage(DiscountType::Percentage, dec!(100.5)).is_err());
        assert!(validate_percentage(DiscountType::Fixed, dec!(250)).is_ok());
    }

    #[test]
    fn test_tier_bounds() {
        let tier = QuantityTier::new(5, Some(4), DiscountType::Percentage, dec!(10));
        assert!(validate_tier_bounds(&tier).is_err());

        let tier = QuantityTier::new(5, None, DiscountType::Fixed, dec!(2));
        assert!(validate_tier_bounds(&tier).is_ok());
    }
}
