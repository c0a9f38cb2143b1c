// Rule entity
//
// One stored discount definition: scope, conditions, schedule, usage limit,
// discount formula, and the sub-records (tiers, gifts, exclusions) loaded with it.
// Activeness is always computed from these fields at read time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::Validate;

use crate::discount_rules::{
    error::{DRResult, DiscountRulesError},
    types::{ApplyTo, DiscountType, ExclusionType, Operator, RuleKind, RuleStatus},
};
use crate::models::{Product, ProductId, RuleId};
use crate::validation::{validate_non_negative, validate_rule, validate_tier_bounds};

/// A predicate gating rule eligibility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    #[serde(default)]
    pub operator: Operator,
    #[serde(default)]
    pub value: JsonValue,
}

impl Condition {
    pub fn new(condition_type: &str, operator: Operator, value: JsonValue) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            operator,
            value,
        }
    }

    /// Value as a decimal, accepting JSON numbers and numeric strings
    pub fn value_as_decimal(&self) -> DRResult<Decimal> {
        json_to_decimal(&self.value).ok_or_else(|| {
            DiscountRulesError::condition(
                &self.condition_type,
                format!("expected a number, got {}", self.value),
            )
        })
    }

    /// Value as a list of strings; a scalar becomes a one-element list
    pub fn value_as_strings(&self) -> Vec<String> {
        match &self.value {
            JsonValue::Array(items) => items.iter().filter_map(json_to_string).collect(),
            JsonValue::Null => Vec::new(),
            other => json_to_string(other).into_iter().collect(),
        }
    }

    /// Value as a list of ids; a scalar becomes a one-element list
    pub fn value_as_ids(&self) -> DRResult<Vec<u64>> {
        let ids: Option<Vec<u64>> = match &self.value {
            JsonValue::Array(items) => items.iter().map(json_to_u64).collect(),
            other => json_to_u64(other).map(|id| vec![id]),
        };

        ids.ok_or_else(|| {
            DiscountRulesError::condition(
                &self.condition_type,
                format!("expected a list of ids, got {}", self.value),
            )
        })
    }
}

fn json_to_decimal(value: &JsonValue) -> Option<Decimal> {
    match value {
        JsonValue::Number(n) => n.to_string().parse().ok(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_to_u64(value: &JsonValue) -> Option<u64> {
    match value {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A [min, max] quantity band with its own discount formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_tier_bounds"))]
pub struct QuantityTier {
    pub min_quantity: u32,
    #[serde(default)]
    pub max_quantity: Option<u32>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
}

impl QuantityTier {
    pub fn new(
        min_quantity: u32,
        max_quantity: Option<u32>,
        discount_type: DiscountType,
        discount_value: Decimal,
    ) -> Self {
        Self {
            min_quantity,
            max_quantity,
            discount_type,
            discount_value,
        }
    }

    pub fn contains(&self, quantity: u32) -> bool {
        quantity >= self.min_quantity && self.max_quantity.map_or(true, |max| quantity <= max)
    }
}

fn default_gift_quantity() -> u32 {
    1
}

fn default_gift_discount() -> Decimal {
    Decimal::ONE_HUNDRED
}

/// Product granted by a gift rule; defaults to one unit at 100% off
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GiftProduct {
    pub product_id: ProductId,
    #[serde(default = "default_gift_quantity")]
    #[validate(range(min = 1, message = "Gift quantity must be at least 1"))]
    pub quantity: u32,
    #[serde(default)]
    pub discount_type: DiscountType,
    #[serde(default = "default_gift_discount")]
    #[validate(custom = "validate_non_negative")]
    pub discount_value: Decimal,
}

impl GiftProduct {
    pub fn free(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
            discount_type: DiscountType::Percentage,
            discount_value: Decimal::ONE_HUNDRED,
        }
    }
}

/// Opt-out of one product or category from a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Exclusion {
    #[serde(rename = "type")]
    pub exclusion_type: ExclusionType,
    pub id: u64,
}

/// Stored discount definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_rule"))]
pub struct Rule {
    pub id: RuleId,
    #[validate(length(min = 1, message = "Rule name must not be empty"))]
    pub name: String,
    pub kind: RuleKind,
    #[serde(default)]
    pub status: RuleStatus,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub discount_type: DiscountType,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub discount_value: Option<Decimal>,
    #[serde(default)]
    pub apply_to: ApplyTo,
    /// Product, category, or tag ids depending on `apply_to`
    #[serde(default)]
    pub items: Vec<u64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub schedule_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub schedule_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    #[validate]
    pub quantity_tiers: Vec<QuantityTier>,
    #[serde(default)]
    #[validate]
    pub gift_products: Vec<GiftProduct>,
    #[serde(default)]
    pub exclusions: Vec<Exclusion>,
}

impl Rule {
    /// New rule, inactive until activated
    pub fn new(id: RuleId, name: &str, kind: RuleKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            status: RuleStatus::Inactive,
            priority: 0,
            discount_type: DiscountType::Percentage,
            discount_value: None,
            apply_to: ApplyTo::AllProducts,
            items: Vec::new(),
            conditions: Vec::new(),
            schedule_from: None,
            schedule_to: None,
            usage_limit: None,
            usage_count: 0,
            exclusive: false,
            quantity_tiers: Vec::new(),
            gift_products: Vec::new(),
            exclusions: Vec::new(),
        }
    }

    pub fn activate(mut self) -> Self {
        self.status = RuleStatus::Active;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_discount(mut self, discount_type: DiscountType, value: Decimal) -> Self {
        self.discount_type = discount_type;
        self.discount_value = Some(value);
        self
    }

    pub fn with_scope(mut self, apply_to: ApplyTo, items: &[u64]) -> Self {
        self.apply_to = apply_to;
        self.items = items.to_vec();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_schedule(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.schedule_from = from;
        self.schedule_to = to;
        self
    }

    pub fn with_usage_limit(mut self, limit: u32) -> Self {
        self.usage_limit = Some(limit);
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn with_tier(mut self, tier: QuantityTier) -> Self {
        self.quantity_tiers.push(tier);
        self
    }

    pub fn with_gift(mut self, gift: GiftProduct) -> Self {
        self.gift_products.push(gift);
        self
    }

    pub fn with_exclusion(mut self, exclusion_type: ExclusionType, id: u64) -> Self {
        self.exclusions.push(Exclusion { exclusion_type, id });
        self
    }

    /// Effective evaluation order: priority ascending, then id ascending
    pub fn sort_key(&self) -> (i32, RuleId) {
        (self.priority, self.id)
    }

    /// Whether the usage limit still allows another use
    pub fn has_usage_remaining(&self) -> bool {
        self.usage_limit
            .map_or(true, |limit| self.usage_count < limit)
    }

    /// Whether the rule is within its inclusive schedule window at `now`
    pub fn is_scheduled_at(&self, now: DateTime<Utc>) -> bool {
        if let Some(from) = self.schedule_from {
            if now < from {
                return false;
            }
        }
        if let Some(to) = self.schedule_to {
            if now > to {
                return false;
            }
        }
        true
    }

    /// Active status, inside schedule, and under the usage limit
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == RuleStatus::Active && self.is_scheduled_at(now) && self.has_usage_remaining()
    }

    /// The rule's own discount formula
    pub fn base_discount(&self) -> DRResult<(DiscountType, Decimal)> {
        let value = self.discount_value.ok_or_else(|| {
            DiscountRulesError::Configuration(format!("rule {} has no discount_value", self.id))
        })?;
        Ok((self.discount_type, value))
    }

    /// Whether `product` falls inside this rule's apply_to scope
    ///
    /// Variants match through their parent as well.
    pub fn matches_product(&self, product: &Product) -> bool {
        match self.apply_to {
            ApplyTo::AllProducts => true,
            ApplyTo::SpecificProducts => product.lineage().any(|id| self.items.contains(&id)),
            ApplyTo::Categories => product
                .category_ids
                .iter()
                .any(|category| self.items.contains(category)),
            ApplyTo::Tags => product.tag_ids.iter().any(|tag| self.items.contains(tag)),
        }
    }

    /// First condition with the given type tag
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|condition| condition.condition_type == condition_type)
    }
}

/// Sort rules into effective evaluation order (stable)
pub fn sort_by_priority(rules: &mut [Rule]) {
    rules.sort_by_key(Rule::sort_key);
}
