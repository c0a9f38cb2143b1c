// Discount Rules Module
//
// Evaluates storefront discount rules against products and carts:
// - Price rules and event sales: per-product unit price
// - Cart rules: negative fee lines and free shipping
// - Special offers: multi-buy line price overrides (BOGO and variants)
// - Gift rules: synthetic free-gift cart lines
//
// Rules live behind the RuleRepository seam; every request brings its own
// EvaluationContext with the shopper, cart, and clock.

pub mod error;
pub mod types;
pub mod rule;
pub mod context;
pub mod repository;
pub mod conditions;
pub mod exclusions;
pub mod tiers;
pub mod pricing;
pub mod cart;
pub mod promotions;
pub mod gifts;
pub mod usage;
pub mod metrics;

// Re-export commonly used types for convenience
pub use error::{DiscountRulesError, DRResult};
pub use types::{
    ApplyTo,
    DiscountType,
    ExclusionType,
    OfferKind,
    Operator,
    PromotionKind,
    RuleKind,
    RuleStatus,
    RuleType,
};
pub use rule::{Condition, Exclusion, GiftProduct, QuantityTier, Rule};
pub use context::{EvaluationContext, MemorySession, SessionStore};
pub use repository::{InMemoryRuleStore, ProductCatalog, RuleRepository};
pub use conditions::{ConditionEvaluator, ConditionRegistry};
pub use exclusions::ExclusionRegistry;
pub use tiers::{QuantityTierResolver, ResolvedDiscount};
pub use pricing::{AppliedDiscount, PriceBreakdown, PriceEngine};
pub use cart::{CartDiscounts, CartEngine};
pub use promotions::{LinePriceOverride, OfferParams, PromotionEngine};
pub use gifts::{gift_line_key, GiftLineChanges, GiftResolver};
pub use usage::{UsageRecorder, UsageReport};
pub use metrics::EngineMetrics;

// Discount Engine - Orchestrator
//
// Wires the sub-engines to shared collaborators and runs a cart pass in order.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::config::EngineSettings;
use crate::models::{AppliedRule, Cart, Customer, Fee, OrderId, Product};

/// Everything one cart recalculation asks the storefront to apply
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CartAdjustments {
    pub fees: Vec<Fee>,
    pub line_price_overrides: Vec<LinePriceOverride>,
    pub gift_line_changes: GiftLineChanges,
    pub free_shipping: bool,
    pub applied_rules: Vec<AppliedRule>,
}

impl CartAdjustments {
    /// Sum of all savings the pass granted
    pub fn total_savings(&self) -> Decimal {
        self.applied_rules.iter().map(|rule| rule.amount).sum()
    }
}

/// Discount Engine
///
/// Orchestrates the price, cart, promotion, and gift engines over one shared
/// repository, condition registry, and exclusion registry.
pub struct DiscountEngine {
    price_engine: PriceEngine,
    cart_engine: CartEngine,
    promotion_engine: PromotionEngine,
    gift_resolver: GiftResolver,
    usage_recorder: UsageRecorder,
    settings: Arc<EngineSettings>,
    metrics: EngineMetrics,
}

impl DiscountEngine {
    /// Engine with the built-in condition types
    pub fn new(
        repository: Arc<dyn RuleRepository>,
        catalog: Arc<dyn ProductCatalog>,
        settings: EngineSettings,
    ) -> Self {
        Self::with_conditions(repository, catalog, settings, ConditionRegistry::with_builtins())
    }

    /// Engine with a caller-supplied condition registry
    pub fn with_conditions(
        repository: Arc<dyn RuleRepository>,
        catalog: Arc<dyn ProductCatalog>,
        settings: EngineSettings,
        conditions: ConditionRegistry,
    ) -> Self {
        let metrics = EngineMetrics::new();
        let settings = Arc::new(settings);
        let conditions = Arc::new(conditions);
        let exclusions = Arc::new(
            ExclusionRegistry::new(repository.clone(), metrics.clone()).with_catalog(catalog.clone()),
        );

        Self {
            price_engine: PriceEngine::new(
                repository.clone(),
                conditions.clone(),
                exclusions.clone(),
                settings.clone(),
                metrics.clone(),
            ),
            cart_engine: CartEngine::new(
                repository.clone(),
                conditions.clone(),
                exclusions.clone(),
                settings.clone(),
                metrics.clone(),
            ),
            promotion_engine: PromotionEngine::new(
                repository.clone(),
                conditions.clone(),
                exclusions.clone(),
                settings.clone(),
                metrics.clone(),
            ),
            gift_resolver: GiftResolver::new(repository.clone(), catalog, conditions, exclusions),
            usage_recorder: UsageRecorder::new(repository),
            settings,
            metrics,
        }
    }

    /// Engine over an in-memory store acting as both repository and catalog
    pub fn from_store(store: Arc<InMemoryRuleStore>, settings: EngineSettings) -> Self {
        Self::new(store.clone(), store, settings)
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// New evaluation context in the store's timezone
    pub fn context(&self, customer: Customer, cart: Cart, now: DateTime<Utc>) -> EvaluationContext {
        EvaluationContext::new(customer, cart, now)
            .with_utc_offset_minutes(self.settings.utc_offset_minutes)
    }

    /// Final unit price of `product`
    pub fn calculate_price(
        &self,
        ctx: &EvaluationContext,
        product: &Product,
        regular_price: Decimal,
        quantity: u32,
    ) -> Decimal {
        self.price_engine
            .calculate_price(ctx, product, regular_price, quantity)
    }

    /// Final unit price of `product` with each rule's deduction
    pub fn price_breakdown(
        &self,
        ctx: &EvaluationContext,
        product: &Product,
        regular_price: Decimal,
        quantity: u32,
    ) -> PriceBreakdown {
        self.price_engine
            .price_breakdown(ctx, product, regular_price, quantity)
    }

    /// Run one cart pass: cart rules, then special offers, then gift lines
    ///
    /// Repeated calls against an unchanged cart return the memoized result of
    /// the first. The applied rules are written to the session for checkout.
    pub fn recalculate_cart(&self, ctx: &EvaluationContext) -> CartAdjustments {
        if let Some(adjustments) = ctx.completed_pass() {
            tracing::debug!("Cart pass already complete, reusing result");
            return adjustments;
        }

        let _timer = self.metrics.start_cart_pass();

        let cart = self.cart_engine.apply_cart_discounts(ctx);
        let line_price_overrides = self.promotion_engine.apply_promotions(ctx);
        let gift_line_changes = self.gift_resolver.reconcile(ctx);

        let mut applied_rules = cart.applied_rules;
        applied_rules.extend(promotions::applied_offers(&line_price_overrides));
        applied_rules.extend(self.gift_resolver.applied_gifts(ctx));

        let adjustments = CartAdjustments {
            fees: cart.fees,
            line_price_overrides,
            gift_line_changes,
            free_shipping: cart.free_shipping,
            applied_rules,
        };

        ctx.session().set_applied_rules(adjustments.applied_rules.clone());
        ctx.finish_pass(adjustments.clone());

        tracing::debug!(
            "Cart pass: {} fees, {} line overrides, {} gift changes, savings {}",
            adjustments.fees.len(),
            adjustments.line_price_overrides.len(),
            adjustments.gift_line_changes.add.len() + adjustments.gift_line_changes.remove.len(),
            adjustments.total_savings()
        );
        adjustments
    }

    /// Record the session's applied rules against a completed order
    ///
    /// The session is cleared afterwards; a repeated call for the same order
    /// is harmless either way.
    pub fn complete_order(&self, order_id: OrderId, ctx: &EvaluationContext) -> UsageReport {
        let applied = ctx.session().applied_rules();
        let report = self.record_applied_rules(order_id, &applied);
        ctx.session().clear();
        report
    }

    /// Credit each rule once for `order_id`
    pub fn record_applied_rules(&self, order_id: OrderId, applied: &[AppliedRule]) -> UsageReport {
        self.usage_recorder.record_applied_rules(order_id, applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RuleId;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn store() -> Arc<InMemoryRuleStore> {
        let store = Arc::new(InMemoryRuleStore::new());
        store.add_product(Product::new(99, dec!(12))).unwrap();
        store
            .load_rules(json!([
                {"id": 1, "name": "Ten off", "status": "active",
                 "kind": {"rule_type": "cart_rule"},
                 "discount_type": "fixed", "discount_value": 10},
                {"id": 2, "name": "BOGO", "status": "active",
                 "kind": {"rule_type": "special_offer", "offer": {"special_offer_type": "bogo"}},
                 "discount_type": "percentage", "discount_value": 100,
                 "apply_to": "specific_products", "items": [1]},
                {"id": 3, "name": "Free mug", "status": "active",
                 "kind": {"rule_type": "gift"},
                 "gift_products": [{"product_id": 99}]}
            ]))
            .unwrap();
        store
    }

    fn cart() -> Cart {
        let mut cart = Cart::new();
        cart.add_product(Product::new(1, dec!(8)), 2);
        cart.add_product(Product::new(2, dec!(20)), 1);
        cart
    }

    fn ids(rules: &[AppliedRule]) -> Vec<RuleId> {
        rules.iter().map(|rule| rule.rule_id).collect()
    }

    #[test]
    fn test_cart_pass_runs_every_engine() {
        let engine = DiscountEngine::from_store(store(), EngineSettings::default());
        let ctx = engine.context(Customer::guest(), cart(), Utc::now());

        let adjustments = engine.recalculate_cart(&ctx);
        assert_eq!(adjustments.fees[0].amount, dec!(-10));
        assert_eq!(adjustments.line_price_overrides[0].unit_price, dec!(4));
        assert_eq!(adjustments.gift_line_changes.add.len(), 1);
        assert_eq!(ids(&adjustments.applied_rules), vec![1, 2, 3]);
        assert_eq!(adjustments.total_savings(), dec!(30));
        assert_eq!(ids(&ctx.session().applied_rules()), vec![1, 2, 3]);
    }

    #[test]
    fn test_cart_pass_runs_once_per_cart_state() {
        let engine = DiscountEngine::from_store(store(), EngineSettings::default());
        let mut ctx = engine.context(Customer::guest(), cart(), Utc::now());

        let first = engine.recalculate_cart(&ctx);
        let second = engine.recalculate_cart(&ctx);
        assert_eq!(first, second);
        assert_eq!(engine.metrics().summary().cart_passes, 1);

        let mut cart = ctx.cart().clone();
        cart.apply_gift_changes(&first.gift_line_changes);
        ctx.set_cart(cart);
        let third = engine.recalculate_cart(&ctx);
        assert!(third.gift_line_changes.is_empty());
        assert_eq!(engine.metrics().summary().cart_passes, 2);
    }

    #[test]
    fn test_complete_order_counts_once() {
        let store = store();
        let engine = DiscountEngine::from_store(store.clone(), EngineSettings::default());
        let ctx = engine.context(Customer::guest(), cart(), Utc::now());
        engine.recalculate_cart(&ctx);

        let report = engine.complete_order(500, &ctx);
        assert_eq!(report.recorded, vec![1, 2, 3]);
        assert!(ctx.session().applied_rules().is_empty());

        let report = engine.record_applied_rules(500, &[AppliedRule { rule_id: 1, amount: dec!(10) }]);
        assert_eq!(report.skipped, vec![1]);
        assert_eq!(store.usage_count(1).unwrap(), Some(1));
    }

    #[test]
    fn test_context_uses_configured_offset() {
        let engine = DiscountEngine::from_store(
            store(),
            EngineSettings {
                utc_offset_minutes: 120,
                ..EngineSettings::default()
            },
        );
        let now = Utc::now();
        let ctx = engine.context(Customer::guest(), Cart::new(), now);
        assert_eq!(ctx.local_now().offset().local_minus_utc(), 7200);
        assert_eq!(ctx.local_now(), now);
    }
}
