// Gift Resolver
//
// Reconciles synthetic gift lines against the gift rules that currently qualify.
// Desired lines carry deterministic keys so repeated passes produce no churn.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::discount_rules::{
    conditions::ConditionRegistry,
    context::EvaluationContext,
    exclusions::ExclusionRegistry,
    repository::{ProductCatalog, RuleRepository},
    rule::{sort_by_priority, GiftProduct, Rule},
    types::RuleType,
};
use crate::models::{AppliedRule, CartLine, ProductId, RuleId};

/// Edits the cart collaborator applies to reach the desired gift lines
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GiftLineChanges {
    pub add: Vec<CartLine>,
    /// Keys of gift lines to drop
    pub remove: Vec<Uuid>,
}

impl GiftLineChanges {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Stable key of the gift line `rule_id` grants for `product_id`
pub fn gift_line_key(rule_id: RuleId, product_id: ProductId) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("gift:{}:{}", rule_id, product_id).as_bytes(),
    )
}

pub struct GiftResolver {
    repository: Arc<dyn RuleRepository>,
    catalog: Arc<dyn ProductCatalog>,
    conditions: Arc<ConditionRegistry>,
    exclusions: Arc<ExclusionRegistry>,
}

impl GiftResolver {
    pub fn new(
        repository: Arc<dyn RuleRepository>,
        catalog: Arc<dyn ProductCatalog>,
        conditions: Arc<ConditionRegistry>,
        exclusions: Arc<ExclusionRegistry>,
    ) -> Self {
        Self {
            repository,
            catalog,
            conditions,
            exclusions,
        }
    }

    /// Gift line additions and removals for the context's cart
    pub fn reconcile(&self, ctx: &EvaluationContext) -> GiftLineChanges {
        let desired = self.desired_lines(ctx);
        let cart = ctx.cart();

        // a quantity or price drift is a remove plus a re-add under the same key
        let up_to_date = |line: &CartLine| {
            desired.iter().any(|wanted| {
                wanted.key == line.key
                    && wanted.quantity == line.quantity
                    && wanted.unit_price == line.unit_price
            })
        };

        let remove: Vec<Uuid> = cart
            .gift_lines()
            .filter(|line| !up_to_date(*line))
            .map(|line| line.key)
            .collect();

        let add: Vec<CartLine> = desired
            .iter()
            .filter(|wanted| {
                !cart
                    .gift_lines()
                    .any(|line| line.key == wanted.key && up_to_date(line))
            })
            .cloned()
            .collect();

        if !add.is_empty() || !remove.is_empty() {
            tracing::debug!("Gift reconciliation: {} to add, {} to remove", add.len(), remove.len());
        }
        GiftLineChanges { add, remove }
    }

    /// Savings granted by the desired gift lines, per rule
    pub fn applied_gifts(&self, ctx: &EvaluationContext) -> Vec<AppliedRule> {
        let mut applied: Vec<AppliedRule> = Vec::new();
        for line in self.desired_lines(ctx) {
            let Some(rule_id) = line.originating_rule_id else {
                continue;
            };
            let saved = (line.product.regular_price - line.unit_price) * Decimal::from(line.quantity);
            match applied.iter_mut().find(|entry| entry.rule_id == rule_id) {
                Some(entry) => entry.amount += saved,
                None => applied.push(AppliedRule { rule_id, amount: saved }),
            }
        }
        applied
    }

    fn desired_lines(&self, ctx: &EvaluationContext) -> Vec<CartLine> {
        let now = ctx.now();
        let mut rules = match self.repository.get_active_rules(RuleType::Gift, now) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!("Gift rule lookup failed, no gifts: {}", e);
                return Vec::new();
            }
        };
        rules.retain(|rule| rule.is_active_at(now));
        sort_by_priority(&mut rules);

        let mut desired: Vec<CartLine> = Vec::new();
        for rule in rules.iter().filter(|rule| self.is_gated(ctx, rule)) {
            for gift in &rule.gift_products {
                // one line per gift product; the earliest rule by priority owns it
                if desired.iter().any(|line| line.product.id == gift.product_id) {
                    continue;
                }
                let key = gift_line_key(rule.id, gift.product_id);
                if let Some(line) = self.gift_line(rule, gift, key) {
                    desired.push(line);
                }
            }
        }
        desired
    }

    /// Conditions pass and some other shopper-added line is in the trigger scope
    fn is_gated(&self, ctx: &EvaluationContext, rule: &Rule) -> bool {
        if !self.conditions.check(rule, ctx) {
            return false;
        }

        ctx.cart().regular_lines().any(|line| {
            let is_gift_product = rule
                .gift_products
                .iter()
                .any(|gift| line.product.lineage().any(|id| id == gift.product_id));

            !is_gift_product
                && rule.matches_product(&line.product)
                && !self.exclusions.is_excluded(ctx, &line.product, rule)
        })
    }

    fn gift_line(&self, rule: &Rule, gift: &GiftProduct, key: Uuid) -> Option<CartLine> {
        let product = match self.catalog.product(gift.product_id) {
            Ok(Some(product)) => product,
            Ok(None) => {
                tracing::warn!("Gift rule {} names unknown product {}", rule.id, gift.product_id);
                return None;
            }
            Err(e) => {
                tracing::warn!("Gift product {} lookup failed: {}", gift.product_id, e);
                return None;
            }
        };

        let regular = product.regular_price;
        let unit_price = regular - gift.discount_type.discount_amount(regular, gift.discount_value);

        Some(CartLine {
            key,
            unit_price,
            quantity: gift.quantity,
            is_gift: true,
            originating_rule_id: Some(rule.id),
            product,
        })
    }
}
