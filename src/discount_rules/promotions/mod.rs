// Promotion Engine
//
// Multi-buy special offers (BOGO and its variants) computed per cart line.
// Offer parameters live in the rule's condition list under parameter tags.
// When several offers match a line, the last one in priority order with a
// non-zero discount wins.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::discount_rules::{
    conditions::ConditionRegistry,
    context::EvaluationContext,
    error::{DRResult, DiscountRulesError},
    exclusions::ExclusionRegistry,
    metrics::EngineMetrics,
    pricing::round_money,
    repository::RuleRepository,
    rule::{sort_by_priority, Rule},
    types::{OfferKind, RuleKind, RuleType},
};
use crate::models::{AppliedRule, CartLine, RuleId};

/// Offer kind used when a rule names none
pub const DEFAULT_OFFER: OfferKind = OfferKind::Bogo;

/// Parameters read from a rule's parameter conditions
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OfferParams {
    pub buy_qty: Option<u32>,
    pub get_qty: Option<u32>,
    pub get_discount: Option<Decimal>,
    pub fixed_price: Option<Decimal>,
    pub pay_qty: Option<u32>,
}

impl OfferParams {
    pub fn from_rule(rule: &Rule) -> DRResult<Self> {
        Ok(Self {
            buy_qty: quantity_param(rule, "buy_qty")?,
            get_qty: quantity_param(rule, "get_qty")?,
            get_discount: decimal_param(rule, "get_discount")?,
            fixed_price: decimal_param(rule, "fixed_price")?,
            pay_qty: quantity_param(rule, "pay_qty")?,
        })
    }
}

fn decimal_param(rule: &Rule, tag: &str) -> DRResult<Option<Decimal>> {
    rule.condition(tag)
        .map(|condition| condition.value_as_decimal())
        .transpose()
}

fn quantity_param(rule: &Rule, tag: &str) -> DRResult<Option<u32>> {
    let Some(value) = decimal_param(rule, tag)? else {
        return Ok(None);
    };

    let count = if value.fract().is_zero() { value.to_u32() } else { None };
    count.map(Some).ok_or_else(|| {
        DiscountRulesError::Configuration(format!("rule {}: {} must be a whole count", rule.id, tag))
    })
}

fn required<T>(value: Option<T>, rule: &Rule, name: &str) -> DRResult<T> {
    value.ok_or_else(|| {
        DiscountRulesError::Configuration(format!("rule {} is missing {}", rule.id, name))
    })
}

/// Offer kind for a rule
///
/// An `offer_type` condition wins over the declared subtype; a rule that
/// declares no multi-buy subtype uses [`DEFAULT_OFFER`].
pub fn resolve_offer_kind(rule: &Rule) -> DRResult<OfferKind> {
    if let Some(condition) = rule.condition("offer_type") {
        let raw = condition.value.as_str().unwrap_or_default();
        return OfferKind::from_str(raw.trim()).map_err(|e| {
            DiscountRulesError::Configuration(format!("rule {}: {}", rule.id, e))
        });
    }

    Ok(match &rule.kind {
        RuleKind::Promotion { offer } => offer.offer_kind().unwrap_or(DEFAULT_OFFER),
        _ => DEFAULT_OFFER,
    })
}

/// Discount an offer grants on one line, clamped to the line subtotal
pub fn offer_discount(
    kind: OfferKind,
    rule: &Rule,
    params: &OfferParams,
    unit_price: Decimal,
    quantity: u32,
) -> DRResult<Decimal> {
    let hundred = Decimal::ONE_HUNDRED;
    let positive = |value: Option<u32>, name: &str| -> DRResult<u32> {
        match required(value, rule, name)? {
            0 => Err(DiscountRulesError::Configuration(format!(
                "rule {}: {} must be positive",
                rule.id, name
            ))),
            n => Ok(n),
        }
    };

    // parameters are shop-entered; an overflow is a misconfigured rule
    let out_of_range = || {
        DiscountRulesError::Configuration(format!("rule {}: offer parameters out of range", rule.id))
    };
    let mul = |a: Decimal, b: Decimal| a.checked_mul(b).ok_or_else(out_of_range);

    let discount = match kind {
        OfferKind::Bogo => {
            let (_, value) = rule.base_discount()?;
            let free_sets = Decimal::from(quantity / 2);
            mul(mul(unit_price, free_sets)?, value)? / hundred
        }
        OfferKind::BuyXGetY => {
            let buy = positive(params.buy_qty, "buy_qty")?;
            let get = positive(params.get_qty, "get_qty")?;
            let get_discount = params.get_discount.unwrap_or(hundred);
            let set_size = buy.checked_add(get).ok_or_else(out_of_range)?;
            let sets = Decimal::from(quantity / set_size);
            mul(mul(mul(unit_price, Decimal::from(get))?, sets)?, get_discount)? / hundred
        }
        OfferKind::BuyXForY => {
            let buy = positive(params.buy_qty, "buy_qty")?;
            let fixed_price = required(params.fixed_price, rule, "fixed_price")?;
            let sets = Decimal::from(quantity / buy);
            let regular = mul(mul(unit_price, Decimal::from(buy))?, sets)?;
            let bundled = mul(fixed_price, sets)?;
            regular
                .checked_sub(bundled)
                .ok_or_else(out_of_range)?
                .max(Decimal::ZERO)
        }
        OfferKind::XForPriceOfY => {
            let get = positive(params.get_qty, "get_qty")?;
            let pay = required(params.pay_qty, rule, "pay_qty")?;
            let sets = Decimal::from(quantity / get);
            mul(mul(unit_price, Decimal::from(get.saturating_sub(pay)))?, sets)?
        }
    };

    let subtotal = mul(unit_price, Decimal::from(quantity))?;
    Ok(discount.max(Decimal::ZERO).min(subtotal.max(Decimal::ZERO)))
}

/// New unit price for one cart line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinePriceOverride {
    pub line_key: Uuid,
    pub rule_id: RuleId,
    pub offer: OfferKind,
    pub original_unit_price: Decimal,
    pub unit_price: Decimal,
    pub discount: Decimal,
}

pub struct PromotionEngine {
    repository: Arc<dyn RuleRepository>,
    conditions: Arc<ConditionRegistry>,
    exclusions: Arc<ExclusionRegistry>,
    settings: Arc<EngineSettings>,
    metrics: EngineMetrics,
}

impl PromotionEngine {
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

    /// Per-line price overrides from multi-buy offers, in cart order
    pub fn apply_promotions(&self, ctx: &EvaluationContext) -> Vec<LinePriceOverride> {
        let now = ctx.now();
        let mut rules = match self.repository.get_active_rules(RuleType::SpecialOffer, now) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!("Special offer lookup failed, no promotions: {}", e);
                return Vec::new();
            }
        };
        rules.retain(|rule| rule.is_active_at(now) && !is_event_sale(rule));
        sort_by_priority(&mut rules);

        let lines: Vec<&CartLine> = ctx.cart().regular_lines().collect();
        let mut winners: Vec<Option<LinePriceOverride>> = vec![None; lines.len()];

        for rule in &rules {
            if !self.conditions.check(rule, ctx) {
                continue;
            }

            let offer = resolve_offer_kind(rule).and_then(|kind| Ok((kind, OfferParams::from_rule(rule)?)));
            let (kind, params) = match offer {
                Ok(offer) => offer,
                Err(e) => {
                    self.metrics.record_skipped_rule();
                    tracing::warn!("Skipping special offer {}: {}", rule.id, e);
                    continue;
                }
            };

            for (slot, line) in winners.iter_mut().zip(&lines) {
                if line.quantity == 0 || !rule.matches_product(&line.product) {
                    continue;
                }
                if self.exclusions.is_excluded(ctx, &line.product, rule) {
                    continue;
                }

                let discount = match offer_discount(kind, rule, &params, line.unit_price, line.quantity) {
                    Ok(discount) => discount,
                    Err(e) => {
                        self.metrics.record_skipped_rule();
                        tracing::warn!("Skipping special offer {}: {}", rule.id, e);
                        break;
                    }
                };

                if discount > Decimal::ZERO {
                    if let Some(previous) = slot.as_ref() {
                        tracing::debug!(
                            "Offer {} replaces offer {} on line {}",
                            rule.id,
                            previous.rule_id,
                            line.key
                        );
                    }
                    *slot = Some(self.line_override(line, rule.id, kind, discount));
                }
            }
        }

        winners.into_iter().flatten().collect()
    }

    fn line_override(
        &self,
        line: &CartLine,
        rule_id: RuleId,
        offer: OfferKind,
        discount: Decimal,
    ) -> LinePriceOverride {
        let quantity = Decimal::from(line.quantity);
        let unit_price = ((line.unit_price * quantity - discount) / quantity).max(Decimal::ZERO);

        LinePriceOverride {
            line_key: line.key,
            rule_id,
            offer,
            original_unit_price: line.unit_price,
            unit_price: round_money(unit_price, self.settings.currency_decimals),
            discount,
        }
    }
}

fn is_event_sale(rule: &Rule) -> bool {
    matches!(&rule.kind, RuleKind::Promotion { offer } if offer.is_event_sale())
}

/// Savings per rule across all overrides, in first-seen order
pub fn applied_offers(overrides: &[LinePriceOverride]) -> Vec<AppliedRule> {
    let mut totals: BTreeMap<RuleId, Decimal> = BTreeMap::new();
    let mut order = Vec::new();
    for item in overrides {
        if !totals.contains_key(&item.rule_id) {
            order.push(item.rule_id);
        }
        *totals.entry(item.rule_id).or_default() += item.discount;
    }

    order
        .into_iter()
        .map(|rule_id| AppliedRule {
            rule_id,
            amount: totals.get(&rule_id).copied().unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discount_rules::repository::InMemoryRuleStore;
    use crate::discount_rules::rule::Condition;
    use crate::discount_rules::types::{ApplyTo, DiscountType, ExclusionType, Operator, PromotionKind};
    use crate::models::{Cart, Customer, Product};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn offer(id: RuleId, kind: PromotionKind) -> Rule {
        Rule::new(id, "Offer", RuleKind::Promotion { offer: kind })
            .with_discount(DiscountType::Percentage, dec!(100))
            .activate()
    }

    fn param(tag: &str, value: serde_json::Value) -> Condition {
        Condition::new(tag, Operator::Equals, value)
    }

    fn engine(rules: Vec<Rule>) -> PromotionEngine {
        let store = Arc::new(InMemoryRuleStore::new());
        for rule in rules {
            store.save_rule(rule).unwrap();
        }
        let metrics = EngineMetrics::new();
        PromotionEngine::new(
            store.clone(),
            Arc::new(ConditionRegistry::with_builtins()),
            Arc::new(ExclusionRegistry::new(store, metrics.clone())),
            Arc::new(EngineSettings::default()),
            metrics,
        )
    }

    fn ctx(lines: &[(Product, u32)]) -> EvaluationContext {
        let mut cart = Cart::new();
        for (product, quantity) in lines {
            cart.add_product(product.clone(), *quantity);
        }
        EvaluationContext::new(Customer::guest(), cart, Utc::now())
    }

    fn discount(kind: OfferKind, rule: &Rule, quantity: u32) -> Decimal {
        let params = OfferParams::from_rule(rule).unwrap();
        offer_discount(kind, rule, &params, dec!(10), quantity).unwrap()
    }

    #[test]
    fn test_bogo() {
        let rule = offer(1, PromotionKind::Bogo);
        assert_eq!(discount(OfferKind::Bogo, &rule, 3), dec!(10));
        assert_eq!(discount(OfferKind::Bogo, &rule, 4), dec!(20));
        assert_eq!(discount(OfferKind::Bogo, &rule, 1), dec!(0));

        let half = rule.with_discount(DiscountType::Percentage, dec!(50));
        assert_eq!(discount(OfferKind::Bogo, &half, 2), dec!(5));
    }

    #[test]
    fn test_buy_x_get_y() {
        let rule = offer(1, PromotionKind::BuyXGetY)
            .with_condition(param("buy_qty", json!(2)))
            .with_condition(param("get_qty", json!(1)))
            .with_condition(param("get_discount", json!(50)));
        assert_eq!(discount(OfferKind::BuyXGetY, &rule, 6), dec!(10));
        assert_eq!(discount(OfferKind::BuyXGetY, &rule, 5), dec!(5));
    }

    #[test]
    fn test_buy_x_for_y() {
        let rule = offer(1, PromotionKind::BuyXForY)
            .with_condition(param("buy_qty", json!(3)))
            .with_condition(param("fixed_price", json!("25")));
        assert_eq!(discount(OfferKind::BuyXForY, &rule, 7), dec!(10));

        let worse = offer(1, PromotionKind::BuyXForY)
            .with_condition(param("buy_qty", json!(3)))
            .with_condition(param("fixed_price", json!(40)));
        assert_eq!(discount(OfferKind::BuyXForY, &worse, 3), dec!(0));
    }

    #[test]
    fn test_x_for_price_of_y() {
        let rule = offer(1, PromotionKind::XForPriceOfY)
            .with_condition(param("get_qty", json!(3)))
            .with_condition(param("pay_qty", json!(2)));
        assert_eq!(discount(OfferKind::XForPriceOfY, &rule, 7), dec!(20));
    }

    #[test]
    fn test_missing_parameters_are_configuration_errors() {
        let rule = offer(1, PromotionKind::BuyXGetY).with_condition(param("buy_qty", json!(2)));
        let params = OfferParams::from_rule(&rule).unwrap();
        assert!(matches!(
            offer_discount(OfferKind::BuyXGetY, &rule, &params, dec!(10), 6),
            Err(DiscountRulesError::Configuration(_))
        ));

        let rule = offer(1, PromotionKind::BuyXForY).with_condition(param("buy_qty", json!(0)));
        let params = OfferParams::from_rule(&rule).unwrap();
        assert!(offer_discount(OfferKind::BuyXForY, &rule, &params, dec!(10), 6).is_err());

        let rule = offer(1, PromotionKind::BuyXGetY).with_condition(param("buy_qty", json!(1.5)));
        assert!(OfferParams::from_rule(&rule).is_err());
    }

    #[test]
    fn test_offer_type_condition_overrides_declared_kind() {
        let rule = offer(1, PromotionKind::Bogo).with_condition(param("offer_type", json!("x_for_price_of_y")));
        assert_eq!(resolve_offer_kind(&rule).unwrap(), OfferKind::XForPriceOfY);
        assert_eq!(resolve_offer_kind(&offer(1, PromotionKind::BuyXForY)).unwrap(), OfferKind::BuyXForY);

        let bad = offer(1, PromotionKind::Bogo).with_condition(param("offer_type", json!("three_for_one")));
        assert!(resolve_offer_kind(&bad).is_err());
    }

    #[test]
    fn test_line_override_price() {
        let engine = engine(vec![offer(1, PromotionKind::Bogo)]);
        let ctx = ctx(&[(Product::new(1, dec!(10)), 3)]);
        let overrides = engine.apply_promotions(&ctx);

        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].discount, dec!(10));
        assert_eq!(overrides[0].unit_price, dec!(6.67));
        assert_eq!(overrides[0].original_unit_price, dec!(10));
    }

    #[test]
    fn test_last_applicable_offer_wins() {
        let buy_x_get_y = offer(2, PromotionKind::BuyXGetY)
            .with_priority(2)
            .with_condition(param("buy_qty", json!(3)))
            .with_condition(param("get_qty", json!(1)));
        let engine = engine(vec![offer(1, PromotionKind::Bogo).with_priority(1), buy_x_get_y]);

        let ctx = ctx(&[(Product::new(1, dec!(10)), 4), (Product::new(2, dec!(10)), 2)]);
        let overrides = engine.apply_promotions(&ctx);

        // 4 units: buy-3-get-1 replaces BOGO; 2 units: buy-3-get-1 grants nothing, BOGO stays
        assert_eq!(overrides[0].rule_id, 2);
        assert_eq!(overrides[0].discount, dec!(10));
        assert_eq!(overrides[1].rule_id, 1);
        assert_eq!(overrides[1].discount, dec!(10));

        let applied = applied_offers(&overrides);
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].rule_id, 2);
    }

    #[test]
    fn test_scope_exclusions_and_event_sales() {
        let scoped = offer(1, PromotionKind::Bogo)
            .with_scope(ApplyTo::SpecificProducts, &[1, 2])
            .with_exclusion(ExclusionType::Product, 2);
        let event_sale = Rule::new(
            2,
            "Event",
            RuleKind::Promotion {
                offer: PromotionKind::EventSale {
                    discount_type: DiscountType::Fixed,
                    discount_value: Some(dec!(1)),
                },
            },
        )
        .activate();
        let engine = engine(vec![scoped, event_sale]);

        let ctx = ctx(&[
            (Product::new(1, dec!(5)), 2),
            (Product::new(2, dec!(5)), 2),
            (Product::new(3, dec!(5)), 2),
        ]);
        let overrides = engine.apply_promotions(&ctx);

        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].line_key, ctx.cart().lines[0].key);
        assert_eq!(overrides[0].unit_price, dec!(2.50));
    }

    #[test]
    fn test_broken_offer_does_not_block_others() {
        let broken = offer(1, PromotionKind::BuyXForY);
        let engine = engine(vec![broken, offer(2, PromotionKind::Bogo)]);
        let ctx = ctx(&[(Product::new(1, dec!(8)), 2)]);

        let overrides = engine.apply_promotions(&ctx);
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].rule_id, 2);
        assert_eq!(engine.metrics.summary().skipped_rules, 1);
    }

    #[test]
    fn test_overflowing_offer_params_skip_the_rule() {
        let huge_set = offer(1, PromotionKind::BuyXGetY)
            .with_condition(param("buy_qty", json!(u32::MAX)))
            .with_condition(param("get_qty", json!(1)));
        let huge_price = offer(2, PromotionKind::BuyXForY)
            .with_condition(param("buy_qty", json!(1)))
            .with_condition(param("fixed_price", json!("10000000000000000000000000000")));
        let healthy = offer(3, PromotionKind::Bogo);
        let engine = engine(vec![huge_set, huge_price, healthy]);
        let ctx = ctx(&[(Product::new(1, dec!(8)), 10)]);

        let overrides = engine.apply_promotions(&ctx);
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].rule_id, 3);
        assert_eq!(overrides[0].discount, dec!(40));
        assert_eq!(engine.metrics.summary().skipped_rules, 2);
    }
}
