// Quantity Tier Resolver
//
// Picks the discount formula for a rule at a given quantity. Tiers replace the
// rule's base discount when one matches; the two are never layered.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::discount_rules::{error::DRResult, rule::Rule, types::DiscountType};

/// Discount formula chosen for one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedDiscount {
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
}

impl ResolvedDiscount {
    /// Amount taken off `base`, clamped to [0, base]
    pub fn amount(&self, base: Decimal) -> Decimal {
        self.discount_type.discount_amount(base, self.discount_value)
    }
}

pub struct QuantityTierResolver;

impl QuantityTierResolver {
    /// First tier (ascending min_quantity) containing `quantity`, else the
    /// rule's own discount
    ///
    /// Errors only when no tier matches and the rule has no discount_value.
    pub fn resolve(rule: &Rule, quantity: u32) -> DRResult<ResolvedDiscount> {
        let mut tiers: Vec<_> = rule.quantity_tiers.iter().collect();
        tiers.sort_by_key(|tier| tier.min_quantity);

        if let Some(tier) = tiers.into_iter().find(|tier| tier.contains(quantity)) {
            return Ok(ResolvedDiscount {
                discount_type: tier.discount_type,
                discount_value: tier.discount_value,
            });
        }

        let (discount_type, discount_value) = rule.base_discount()?;
        Ok(ResolvedDiscount {
            discount_type,
            discount_value,
        })
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::discount_rules::rule::QuantityTier;
    use crate::discount_rules::types::RuleKind;
    use proptest::prelude::*;

    /// A resolved discount never exceeds the base it is applied to
    #[test]
    fn prop_resolved_amount_within_base() {
        proptest!(|(
            quantity in 0u32..=50,
            base_cents in 0u32..=100000,
            value in 0u32..=100,
        )| {
            let base = Decimal::from(base_cents) / Decimal::from(100);
            let rule = Rule::new(1, "Prop", RuleKind::Price)
                .with_discount(DiscountType::Fixed, Decimal::from(value))
                .with_tier(QuantityTier::new(10, Some(20), DiscountType::Percentage, Decimal::from(value)));

            let amount = QuantityTierResolver::resolve(&rule, quantity).unwrap().amount(base);
            prop_assert!(amount >= Decimal::ZERO);
            prop_assert!(amount <= base);
        });
    }
}
