// Rule Repository
//
// Collaborator seams for rule storage and the product catalog, plus an in-memory
// store that loads rule records from JSON, validates them, and keeps the usage
// ledger. Malformed records are skipped at load time so they can never reach
// an engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use validator::Validate;

use crate::discount_rules::{
    error::{DRResult, DiscountRulesError},
    rule::{sort_by_priority, Rule},
    types::RuleType,
};
use crate::models::{OrderId, Product, ProductId, RuleId};

/// Rule storage as seen by the engines
///
/// `get_active_rules` returns rules already filtered by status, schedule, and
/// usage limit, ordered by (priority asc, id asc). Engines still re-check
/// activeness against their own clock.
pub trait RuleRepository: Send + Sync {
    fn get_active_rules(&self, rule_type: RuleType, now: DateTime<Utc>) -> DRResult<Vec<Rule>>;

    fn get_rule(&self, id: RuleId) -> DRResult<Option<Rule>>;

    /// Products opted out of every rule
    fn global_exclusions(&self) -> DRResult<HashSet<ProductId>>;

    /// Whether usage of `rule_id` was already recorded for `order_id`
    fn has_usage(&self, rule_id: RuleId, order_id: OrderId) -> DRResult<bool>;

    fn increment_usage(&self, rule_id: RuleId) -> DRResult<()>;

    /// Write one usage ledger row; returns false if the row already existed
    fn record_usage(&self, rule_id: RuleId, order_id: OrderId, amount: Decimal) -> DRResult<bool>;
}

/// Product lookup used to price synthesized gift lines
pub trait ProductCatalog: Send + Sync {
    fn product(&self, id: ProductId) -> DRResult<Option<Product>>;
}

#[derive(Debug, Default)]
struct StoreState {
    rules: BTreeMap<RuleId, Rule>,
    usage_ledger: HashMap<(RuleId, OrderId), Decimal>,
    global_exclusions: HashSet<ProductId>,
    products: HashMap<ProductId, Product>,
}

/// In-memory rule store and product catalog
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    state: RwLock<StoreState>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a JSON array of rule records
    ///
    /// Records that fail to parse or validate are skipped.
    pub fn from_json(json: &str) -> DRResult<Self> {
        let store = Self::new();
        let records: JsonValue = serde_json::from_str(json)?;
        store.load_rules(records)?;
        Ok(store)
    }

    /// Load rule records, returning how many were accepted
    pub fn load_rules(&self, records: JsonValue) -> DRResult<usize> {
        let records = match records {
            JsonValue::Array(records) => records,
            other => {
                return Err(DiscountRulesError::Configuration(format!(
                    "expected an array of rules, got {}",
                    other
                )))
            }
        };

        let mut loaded = 0;
        for record in records {
            match parse_rule(record) {
                Ok(rule) => {
                    self.write()?.rules.insert(rule.id, rule);
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping malformed rule record: {}", e);
                }
            }
        }

        tracing::debug!("Loaded {} rule records", loaded);
        Ok(loaded)
    }

    /// Insert or replace a rule after validating it
    ///
    /// Callers holding an evaluation context should invalidate the rule there.
    pub fn save_rule(&self, rule: Rule) -> DRResult<()> {
        rule.validate()?;
        self.write()?.rules.insert(rule.id, rule);
        Ok(())
    }

    pub fn delete_rule(&self, id: RuleId) -> DRResult<bool> {
        Ok(self.write()?.rules.remove(&id).is_some())
    }

    pub fn add_product(&self, product: Product) -> DRResult<()> {
        self.write()?.products.insert(product.id, product);
        Ok(())
    }

    pub fn set_global_exclusion(&self, product_id: ProductId, excluded: bool) -> DRResult<()> {
        let mut state = self.write()?;
        if excluded {
            state.global_exclusions.insert(product_id);
        } else {
            state.global_exclusions.remove(&product_id);
        }
        Ok(())
    }

    /// Current usage_count of a rule, if it exists
    pub fn usage_count(&self, rule_id: RuleId) -> DRResult<Option<u32>> {
        Ok(self.read()?.rules.get(&rule_id).map(|rule| rule.usage_count))
    }

    /// Number of ledger rows for a rule
    pub fn ledger_rows(&self, rule_id: RuleId) -> DRResult<usize> {
        Ok(self
            .read()?
            .usage_ledger
            .keys()
            .filter(|(rule, _)| *rule == rule_id)
            .count())
    }

    fn read(&self) -> DRResult<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| DiscountRulesError::DataAccess("rule store lock poisoned".to_string()))
    }

    fn write(&self) -> DRResult<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| DiscountRulesError::DataAccess("rule store lock poisoned".to_string()))
    }
}

fn parse_rule(record: JsonValue) -> DRResult<Rule> {
    let rule: Rule = serde_json::from_value(record)?;
    rule.validate()?;
    Ok(rule)
}

impl RuleRepository for InMemoryRuleStore {
    fn get_active_rules(&self, rule_type: RuleType, now: DateTime<Utc>) -> DRResult<Vec<Rule>> {
        let mut rules: Vec<Rule> = self
            .read()?
            .rules
            .values()
            .filter(|rule| rule.kind.rule_type() == rule_type && rule.is_active_at(now))
            .cloned()
            .collect();

        sort_by_priority(&mut rules);
        Ok(rules)
    }

    fn get_rule(&self, id: RuleId) -> DRResult<Option<Rule>> {
        Ok(self.read()?.rules.get(&id).cloned())
    }

    fn global_exclusions(&self) -> DRResult<HashSet<ProductId>> {
        Ok(self.read()?.global_exclusions.clone())
    }

    fn has_usage(&self, rule_id: RuleId, order_id: OrderId) -> DRResult<bool> {
        Ok(self.read()?.usage_ledger.contains_key(&(rule_id, order_id)))
    }

    fn increment_usage(&self, rule_id: RuleId) -> DRResult<()> {
        let mut state = self.write()?;
        let rule = state
            .rules
            .get_mut(&rule_id)
            .ok_or(DiscountRulesError::RuleNotFound(rule_id))?;
        rule.usage_count = rule.usage_count.saturating_add(1);
        Ok(())
    }

    fn record_usage(&self, rule_id: RuleId, order_id: OrderId, amount: Decimal) -> DRResult<bool> {
        let mut state = self.write()?;
        if state.usage_ledger.contains_key(&(rule_id, order_id)) {
            return Ok(false);
        }
        state.usage_ledger.insert((rule_id, order_id), amount);
        Ok(true)
    }
}

impl ProductCatalog for InMemoryRuleStore {
    fn product(&self, id: ProductId) -> DRResult<Option<Product>> {
        Ok(self.read()?.products.get(&id).cloned())
    }
}
