// Evaluation Context
//
// Everything one request knows about: the shopper, the cart snapshot, the clock,
// and the session that carries applied rules across checkout. Also owns the
// request-scoped state: exclusion cache, re-entrancy visited-set, and the memo
// that keeps a cart recalculation to one run per pass.

use chrono::{DateTime, FixedOffset, Utc};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::discount_rules::CartAdjustments;
use crate::models::{AppliedRule, Cart, Customer, ProductId, RuleId};

/// Session storage for rules applied to the current cart
///
/// The storefront keeps this across the checkout boundary so the order
/// record can be credited with the rules the shopper saw.
pub trait SessionStore: Send + Sync {
    fn set_applied_rules(&self, rules: Vec<AppliedRule>);
    fn applied_rules(&self) -> Vec<AppliedRule>;
    fn clear(&self);
}

/// In-memory session store
#[derive(Debug, Default)]
pub struct MemorySession {
    applied: Mutex<Vec<AppliedRule>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySession {
    fn set_applied_rules(&self, rules: Vec<AppliedRule>) {
        *self.applied.lock().unwrap_or_else(PoisonError::into_inner) = rules;
    }

    fn applied_rules(&self) -> Vec<AppliedRule> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn clear(&self) {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Per-request evaluation context
pub struct EvaluationContext {
    customer: Customer,
    cart: Cart,
    now: DateTime<Utc>,
    utc_offset: Option<FixedOffset>,
    session: Arc<dyn SessionStore>,
    exclusion_cache: RefCell<HashMap<(ProductId, RuleId), bool>>,
    pricing_stack: RefCell<HashSet<ProductId>>,
    cart_pass: RefCell<Option<(Cart, CartAdjustments)>>,
}

impl EvaluationContext {
    pub fn new(customer: Customer, cart: Cart, now: DateTime<Utc>) -> Self {
        Self {
            customer,
            cart,
            now,
            utc_offset: None,
            session: Arc::new(MemorySession::new()),
            exclusion_cache: RefCell::new(HashMap::new()),
            pricing_stack: RefCell::new(HashSet::new()),
            cart_pass: RefCell::new(None),
        }
    }

    /// Use an existing session instead of a fresh one
    pub fn with_session(mut self, session: Arc<dyn SessionStore>) -> Self {
        self.session = session;
        self
    }

    /// Store timezone used by weekday and time-of-day conditions
    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset = FixedOffset::east_opt(minutes * 60);
        self
    }

    pub fn customer(&self) -> &Customer {
        &self.customer
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// `now` in the store's timezone
    pub fn local_now(&self) -> DateTime<FixedOffset> {
        match self.utc_offset {
            Some(offset) => self.now.with_timezone(&offset),
            None => self.now.into(),
        }
    }

    pub fn session(&self) -> &dyn SessionStore {
        self.session.as_ref()
    }

    /// Replace the cart snapshot after the storefront applied changes
    pub fn set_cart(&mut self, cart: Cart) {
        self.cart = cart;
    }

    pub(crate) fn cached_exclusion(&self, product_id: ProductId, rule_id: RuleId) -> Option<bool> {
        self.exclusion_cache
            .borrow()
            .get(&(product_id, rule_id))
            .copied()
    }

    pub(crate) fn cache_exclusion(&self, product_id: ProductId, rule_id: RuleId, excluded: bool) {
        self.exclusion_cache
            .borrow_mut()
            .insert((product_id, rule_id), excluded);
    }

    /// Drop cached exclusion results for a product after it was updated
    pub fn invalidate_product(&self, product_id: ProductId) {
        self.exclusion_cache
            .borrow_mut()
            .retain(|(product, _), _| *product != product_id);
    }

    /// Drop cached exclusion results for a rule after it was saved or deleted
    pub fn invalidate_rule(&self, rule_id: RuleId) {
        self.exclusion_cache
            .borrow_mut()
            .retain(|(_, rule), _| *rule != rule_id);
        self.cart_pass.borrow_mut().take();
    }

    /// Mark `product_id` as being priced
    ///
    /// Returns `None` if it is already being priced further up the call stack.
    /// The mark is released when the guard drops.
    pub fn enter_pricing(&self, product_id: ProductId) -> Option<PricingGuard<'_>> {
        if self.pricing_stack.borrow_mut().insert(product_id) {
            Some(PricingGuard {
                ctx: self,
                product_id,
            })
        } else {
            None
        }
    }

    pub fn is_pricing(&self, product_id: ProductId) -> bool {
        self.pricing_stack.borrow().contains(&product_id)
    }

    /// Result of the last pass if the cart has not changed since
    pub(crate) fn completed_pass(&self) -> Option<CartAdjustments> {
        self.cart_pass
            .borrow()
            .as_ref()
            .filter(|(cart, _)| *cart == self.cart)
            .map(|(_, adjustments)| adjustments.clone())
    }

    pub(crate) fn finish_pass(&self, adjustments: CartAdjustments) {
        *self.cart_pass.borrow_mut() = Some((self.cart.clone(), adjustments));
    }
}

/// Scoped re-entrancy mark for one product
pub struct PricingGuard<'a> {
    ctx: &'a EvaluationContext,
    product_id: ProductId,
}

impl Drop for PricingGuard<'_> {
    fn drop(&mut self) {
        self.ctx.pricing_stack.borrow_mut().remove(&self.product_id);
    }
}
