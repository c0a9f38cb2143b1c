// Price Engine
//
// Resolves the final unit price of one product from the active price rules and
// event sales. Each discount is computed against the regular price and deducted
// from the running total; an exclusive rule ends the pass.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::sync::Arc;

use crate::config::EngineSettings;
use crate::discount_rules::{
    conditions::ConditionRegistry,
    context::EvaluationContext,
    error::{DRResult, DiscountRulesError},
    exclusions::ExclusionRegistry,
    metrics::EngineMetrics,
    repository::RuleRepository,
    rule::{sort_by_priority, Rule},
    tiers::{QuantityTierResolver, ResolvedDiscount},
    types::{DiscountType, PromotionKind, RuleKind, RuleType},
};
use crate::models::{Product, RuleId};

/// One rule's deduction from the regular price
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedDiscount {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub discount_type: DiscountType,
    pub amount: Decimal,
}

/// Result of pricing one product
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceBreakdown {
    pub regular_price: Decimal,
    pub final_price: Decimal,
    pub applied: Vec<AppliedDiscount>,
}

impl PriceBreakdown {
    fn unchanged(regular_price: Decimal) -> Self {
        Self {
            regular_price,
            final_price: regular_price,
            applied: Vec::new(),
        }
    }

    pub fn total_discount(&self) -> Decimal {
        self.regular_price - self.final_price
    }
}

/// Price Engine
///
/// Pure with respect to durable state: reads rules, never writes them.
pub struct PriceEngine {
    repository: Arc<dyn RuleRepository>,
    conditions: Arc<ConditionRegistry>,
    exclusions: Arc<ExclusionRegistry>,
    settings: Arc<EngineSettings>,
    metrics: EngineMetrics,
}

impl PriceEngine {
    pub fn new(
        repository: Arc<dyn RuleRepository>,
        conditions: Arc<ConditionRegistry>,
        exclusions: Arc<ExclusionRegistry>,
        settings: Arc<EngineSettings>,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            repository,
            conditions,
            exclusions,
            settings,
            metrics,
        }
    }

    /// Final unit price of `product`
    pub fn calculate_price(
        &self,
        ctx: &EvaluationContext,
        product: &Product,
        regular_price: Decimal,
        quantity: u32,
    ) -> Decimal {
        self.price_breakdown(ctx, product, regular_price, quantity)
            .final_price
    }

    /// Final unit price of `product` with the deductions that produced it
    ///
    /// Returns `regular_price` untouched when the engine is disabled, when a
    /// sale-priced product is not eligible, when re-entered for the same product,
    /// or when no rule is a candidate.
    pub fn price_breakdown(
        &self,
        ctx: &EvaluationContext,
        product: &Product,
        regular_price: Decimal,
        quantity: u32,
    ) -> PriceBreakdown {
        let _timer = self.metrics.start_price_calculation();

        if !self.settings.enabled {
            return PriceBreakdown::unchanged(regular_price);
        }
        if product.is_on_sale() && !self.settings.apply_to_sale_products {
            tracing::debug!("Product {} is on sale, skipping price rules", product.id);
            return PriceBreakdown::unchanged(regular_price);
        }

        let Some(_guard) = ctx.enter_pricing(product.id) else {
            self.metrics.record_reentrant_call();
            tracing::debug!("Re-entrant price read for product {}", product.id);
            return PriceBreakdown::unchanged(regular_price);
        };

        let candidates = self.candidates(ctx, product);
        if candidates.is_empty() {
            return PriceBreakdown::unchanged(regular_price);
        }

        let quantity = effective_quantity(ctx, product, quantity);
        let mut final_price = regular_price;
        let mut applied = Vec::new();

        for rule in &candidates {
            if self.exclusions.is_excluded(ctx, product, rule) {
                continue;
            }
            if !self.conditions.check(rule, ctx) {
                continue;
            }

            let discount = match discount_formula(rule, quantity) {
                Ok(discount) => discount,
                Err(e) => {
                    self.metrics.record_skipped_rule();
                    tracing::warn!("Skipping price rule {}: {}", rule.id, e);
                    continue;
                }
            };

            let amount = discount.amount(regular_price);
            final_price = (final_price - amount).max(Decimal::ZERO);

            if amount > Decimal::ZERO {
                tracing::debug!("Rule {} takes {} off product {}", rule.id, amount, product.id);
                applied.push(AppliedDiscount {
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    discount_type: discount.discount_type,
                    amount,
                });
            }

            if rule.exclusive {
                tracing::debug!("Exclusive rule {} stops evaluation", rule.id);
                break;
            }
        }

        PriceBreakdown {
            regular_price,
            final_price: round_money(final_price, self.settings.currency_decimals),
            applied,
        }
    }

    /// Active price rules and event sales whose scope covers `product`
    ///
    /// A failing repository yields no candidates.
    fn candidates(&self, ctx: &EvaluationContext, product: &Product) -> Vec<Rule> {
        let now = ctx.now();
        let fetched = self
            .repository
            .get_active_rules(RuleType::PriceRule, now)
            .and_then(|mut rules| {
                let offers = self.repository.get_active_rules(RuleType::SpecialOffer, now)?;
                rules.extend(offers.into_iter().filter(is_event_sale));
                Ok(rules)
            });

        let mut rules = match fetched {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!("Price rule lookup failed, using regular price: {}", e);
                return Vec::new();
            }
        };

        rules.retain(|rule| rule.is_active_at(now) && rule.matches_product(product));
        sort_by_priority(&mut rules);
        rules
    }
}

fn is_event_sale(rule: &Rule) -> bool {
    matches!(&rule.kind, RuleKind::Promotion { offer } if offer.is_event_sale())
}

/// Formula for one rule: event sales carry their own, price rules go through tiers
fn discount_formula(rule: &Rule, quantity: u32) -> DRResult<ResolvedDiscount> {
    match &rule.kind {
        RuleKind::Promotion {
            offer:
                PromotionKind::EventSale {
                    discount_type,
                    discount_value,
                },
        } => {
            let discount_value = discount_value.ok_or_else(|| {
                DiscountRulesError::Configuration(format!(
                    "event sale {} has no discount_value",
                    rule.id
                ))
            })?;
            Ok(ResolvedDiscount {
                discount_type: *discount_type,
                discount_value,
            })
        }
        _ => QuantityTierResolver::resolve(rule, quantity),
    }
}

/// Requested quantity when it says more than one, else what the cart holds
fn effective_quantity(ctx: &EvaluationContext, product: &Product, requested: u32) -> u32 {
    if requested > 1 {
        return requested;
    }
    ctx.cart().quantity_of(product.id).max(1)
}

/// Round to currency precision, halves away from zero
pub fn round_money(amount: Decimal, decimals: u32) -> Decimal {
    amount.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::discount_rules::repository::InMemoryRuleStore;
    use crate::models::{Cart, Customer};
    use chrono::Utc;
    use proptest::prelude::*;

    fn discount_type() -> impl Strategy<Value = DiscountType> {
        prop_oneof![
            Just(DiscountType::Percentage),
            Just(DiscountType::Fixed),
            Just(DiscountType::FixedPrice),
        ]
    }

    /// Final price stays within [0, regular price] and repeated calls agree
    #[test]
    fn prop_price_bounded_and_idempotent() {
        proptest!(|(
            price_cents in 0u32..=100000,
            rules in prop::collection::vec((discount_type(), 0u32..=100, any::<bool>()), 0..=4),
        )| {
            let store = Arc::new(InMemoryRuleStore::new());
            for (index, (discount_type, value, exclusive)) in rules.iter().enumerate() {
                let mut rule = Rule::new(index as u64 + 1, "Prop", RuleKind::Price)
                    .with_discount(*discount_type, Decimal::from(*value))
                    .activate();
                rule.exclusive = *exclusive;
                store.save_rule(rule).unwrap();
            }

            let metrics = EngineMetrics::new();
            let engine = PriceEngine::new(
                store.clone(),
                Arc::new(ConditionRegistry::with_builtins()),
                Arc::new(ExclusionRegistry::new(store.clone(), metrics.clone())),
                Arc::new(EngineSettings::default()),
                metrics,
            );

            let price = Decimal::from(price_cents) / Decimal::from(100);
            let product = Product::new(1, price);
            let ctx = EvaluationContext::new(Customer::guest(), Cart::new(), Utc::now());

            let first = engine.calculate_price(&ctx, &product, price, 1);
            let second = engine.calculate_price(&ctx, &product, price, 1);

            prop_assert!(first >= Decimal::ZERO);
            prop_assert!(first <= price);
            prop_assert_eq!(first, second);
        });
    }
}
