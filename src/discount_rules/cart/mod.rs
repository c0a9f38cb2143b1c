// Cart Engine
//
// Cart-level discounts expressed as negative fee lines, plus the free-shipping
// flag carried by cart rules.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::config::EngineSettings;
use crate::discount_rules::{
    conditions::ConditionRegistry,
    context::EvaluationContext,
    exclusions::ExclusionRegistry,
    metrics::EngineMetrics,
    pricing::round_money,
    repository::RuleRepository,
    rule::{sort_by_priority, Rule},
    types::{ApplyTo, RuleKind, RuleType},
};
use crate::models::{AppliedRule, Fee};

/// Cart rule outcome for one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CartDiscounts {
    pub fees: Vec<Fee>,
    pub applied_rules: Vec<AppliedRule>,
    pub free_shipping: bool,
}

pub struct CartEngine {
    repository: Arc<dyn RuleRepository>,
    conditions: Arc<ConditionRegistry>,
    exclusions: Arc<ExclusionRegistry>,
    settings: Arc<EngineSettings>,
    metrics: EngineMetrics,
}

impl CartEngine {
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

    /// Fees and free shipping for the context's cart
    ///
    /// Rules run in priority order; the first exclusive rule that produces a
    /// fee ends fee evaluation. Free shipping is decided over every eligible rule.
    pub fn apply_cart_discounts(&self, ctx: &EvaluationContext) -> CartDiscounts {
        let now = ctx.now();
        let mut rules = match self.repository.get_active_rules(RuleType::CartRule, now) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!("Cart rule lookup failed, no cart discounts: {}", e);
                return CartDiscounts::default();
            }
        };
        sort_by_priority(&mut rules);

        let eligible: Vec<&Rule> = rules
            .iter()
            .filter(|rule| rule.is_active_at(now) && self.conditions.check(rule, ctx))
            .collect();

        let mut result = CartDiscounts {
            free_shipping: eligible.iter().any(|rule| grants_free_shipping(rule)),
            ..CartDiscounts::default()
        };

        for rule in eligible {
            let (discount_type, value) = match rule.base_discount() {
                Ok(discount) => discount,
                Err(e) => {
                    // free-shipping-only rules carry no discount value
                    if !grants_free_shipping(rule) {
                        self.metrics.record_skipped_rule();
                        tracing::warn!("Skipping cart rule {}: {}", rule.id, e);
                    }
                    continue;
                }
            };

            let base = self.discount_base(ctx, rule);
            let amount = round_money(
                discount_type.discount_amount(base, value),
                self.settings.currency_decimals,
            );
            if amount <= Decimal::ZERO {
                continue;
            }

            tracing::debug!("Cart rule {} takes {} off a base of {}", rule.id, amount, base);
            result.fees.push(Fee {
                rule_id: rule.id,
                label: self
                    .settings
                    .cart_fee_label
                    .clone()
                    .unwrap_or_else(|| rule.name.clone()),
                amount: -amount,
            });
            result.applied_rules.push(AppliedRule {
                rule_id: rule.id,
                amount,
            });

            if rule.exclusive {
                tracing::debug!("Exclusive cart rule {} stops evaluation", rule.id);
                break;
            }
        }

        result
    }

    /// Amount the rule's formula applies to
    fn discount_base(&self, ctx: &EvaluationContext, rule: &Rule) -> Decimal {
        let cart = ctx.cart();
        if rule.apply_to == ApplyTo::AllProducts {
            return cart.subtotal();
        }

        cart.regular_lines()
            .filter(|line| rule.matches_product(&line.product))
            .filter(|line| !self.exclusions.is_excluded(ctx, &line.product, rule))
            .map(|line| line.subtotal())
            .sum()
    }
}

/// Free-shipping cart rule gated on a cart total threshold
fn grants_free_shipping(rule: &Rule) -> bool {
    matches!(rule.kind, RuleKind::Cart { free_shipping: true }) && rule.condition("cart_total").is_some()
}
