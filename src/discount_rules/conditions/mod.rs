// Condition Evaluator
//
// Gates rule eligibility on the shopper, the cart, and the clock. Every condition
// type maps to a registered evaluator; tags without one resolve through a
// replaceable fallback that accepts. Evaluators that error fail closed.

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

use crate::discount_rules::{
    context::EvaluationContext,
    error::{DRResult, DiscountRulesError},
    rule::{Condition, Rule},
    types::Operator,
};

/// Tags that carry promotion parameters rather than predicates
pub const PARAMETER_TAGS: [&str; 6] = [
    "offer_type",
    "buy_qty",
    "get_qty",
    "get_discount",
    "fixed_price",
    "pay_qty",
];

/// Evaluates one condition type
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool>;
}

impl<F> ConditionEvaluator for F
where
    F: Fn(&Condition, &EvaluationContext) -> DRResult<bool> + Send + Sync,
{
    fn evaluate(&self, condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool> {
        self(condition, ctx)
    }
}

/// Tag → evaluator map with an explicit fallback entry
#[derive(Clone)]
pub struct ConditionRegistry {
    evaluators: HashMap<String, Arc<dyn ConditionEvaluator>>,
    fallback: Arc<dyn ConditionEvaluator>,
}

impl Default for ConditionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ConditionRegistry {
    /// Registry with no evaluators; every tag goes to the accepting fallback
    pub fn empty() -> Self {
        Self {
            evaluators: HashMap::new(),
            fallback: Arc::new(accept_unregistered),
        }
    }

    /// Registry with all built-in condition types and parameter tags
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        registry.register("cart_total", cart_total);
        registry.register("cart_quantity", cart_quantity);
        registry.register("cart_items", cart_items);
        registry.register("product_in_cart", product_in_cart);
        registry.register("category_in_cart", category_in_cart);
        registry.register("user_logged_in", user_logged_in);
        registry.register("user_role", user_role);
        registry.register("total_spent", total_spent);
        registry.register("order_count", order_count);
        registry.register("weekday", weekday);
        registry.register("time_range", time_range);
        registry.register("date", date);
        registry.register("coupon_applied", coupon_applied);

        for tag in PARAMETER_TAGS {
            registry.register(tag, parameter);
        }

        registry
    }

    /// Register or replace the evaluator for `tag`
    pub fn register<E>(&mut self, tag: &str, evaluator: E)
    where
        E: ConditionEvaluator + 'static,
    {
        self.evaluators.insert(tag.to_string(), Arc::new(evaluator));
    }

    /// Replace the evaluator used for unregistered tags
    pub fn set_fallback<E>(&mut self, evaluator: E)
    where
        E: ConditionEvaluator + 'static,
    {
        self.fallback = Arc::new(evaluator);
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.evaluators.contains_key(tag)
    }

    /// Evaluate one condition; an evaluator error counts as not satisfied
    pub fn evaluate(&self, condition: &Condition, ctx: &EvaluationContext) -> bool {
        let evaluator = self
            .evaluators
            .get(&condition.condition_type)
            .unwrap_or(&self.fallback);

        match evaluator.evaluate(condition, ctx) {
            Ok(satisfied) => satisfied,
            Err(e) => {
                tracing::warn!("Condition '{}' failed closed: {}", condition.condition_type, e);
                false
            }
        }
    }

    /// AND of all of the rule's conditions; true for an empty list
    pub fn check(&self, rule: &Rule, ctx: &EvaluationContext) -> bool {
        let eligible = rule
            .conditions
            .iter()
            .all(|condition| self.evaluate(condition, ctx));

        if !eligible {
            tracing::debug!("Rule {} ineligible: conditions not met", rule.id);
        }
        eligible
    }
}

fn accept_unregistered(condition: &Condition, _ctx: &EvaluationContext) -> DRResult<bool> {
    tracing::debug!(
        "No evaluator registered for condition '{}', accepting",
        condition.condition_type
    );
    Ok(true)
}

fn parameter(_condition: &Condition, _ctx: &EvaluationContext) -> DRResult<bool> {
    Ok(true)
}

fn unsupported_operator(condition: &Condition) -> DiscountRulesError {
    DiscountRulesError::condition(
        &condition.condition_type,
        format!("operator '{}' is not supported", condition.operator),
    )
}

/// Ordering comparison of `actual` against the condition's numeric value
fn compare_number(condition: &Condition, actual: Decimal) -> DRResult<bool> {
    let expected = condition.value_as_decimal()?;
    condition
        .operator
        .compare(&actual, &expected)
        .ok_or_else(|| unsupported_operator(condition))
}

/// Membership test: in/equals want a hit, not_in/not_equals want none
fn membership(condition: &Condition, contained: bool) -> DRResult<bool> {
    match condition.operator {
        Operator::In | Operator::Equals => Ok(contained),
        Operator::NotIn | Operator::NotEquals => Ok(!contained),
        _ => Err(unsupported_operator(condition)),
    }
}

fn cart_total(condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool> {
    compare_number(condition, ctx.cart().subtotal())
}

fn cart_quantity(condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool> {
    compare_number(condition, Decimal::from(ctx.cart().item_quantity()))
}

fn cart_items(condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool> {
    let lines = ctx.cart().regular_lines().count();
    compare_number(condition, Decimal::from(lines))
}

fn product_in_cart(condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool> {
    let wanted = condition.value_as_ids()?;
    let present = ctx
        .cart()
        .regular_lines()
        .any(|line| line.product.lineage().any(|id| wanted.contains(&id)));
    membership(condition, present)
}

fn category_in_cart(condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool> {
    let wanted = condition.value_as_ids()?;
    let present = ctx.cart().regular_lines().any(|line| {
        line.product
            .category_ids
            .iter()
            .any(|category| wanted.contains(category))
    });
    membership(condition, present)
}

fn user_logged_in(condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool> {
    let expected = match &condition.value {
        JsonValue::Bool(flag) => *flag,
        JsonValue::Null => true,
        JsonValue::Number(n) => n.as_u64().map_or(false, |n| n != 0),
        JsonValue::String(s) => matches!(s.to_ascii_lowercase().as_str(), "yes" | "true" | "1"),
        other => {
            return Err(DiscountRulesError::condition(
                &condition.condition_type,
                format!("expected a flag, got {}", other),
            ))
        }
    };

    let logged_in = ctx.customer().logged_in;
    match condition.operator {
        Operator::Equals => Ok(logged_in == expected),
        Operator::NotEquals => Ok(logged_in != expected),
        _ => Err(unsupported_operator(condition)),
    }
}

fn user_role(condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool> {
    let wanted = condition.value_as_strings();
    let customer = ctx.customer();
    let has_role = customer.logged_in
        && customer
            .roles
            .iter()
            .any(|role| wanted.iter().any(|w| w.eq_ignore_ascii_case(role)));
    membership(condition, has_role)
}

fn total_spent(condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool> {
    compare_number(condition, ctx.customer().effective_total_spent())
}

fn order_count(condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool> {
    compare_number(condition, Decimal::from(ctx.customer().effective_order_count()))
}

/// 0 = Monday .. 6 = Sunday; also accepts day names and three-letter forms
fn parse_weekday(value: &str) -> Option<u32> {
    const DAYS: [&str; 7] = [
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
        "sunday",
    ];

    let value = value.trim().to_ascii_lowercase();
    if let Ok(index) = value.parse::<u32>() {
        return (index < 7).then_some(index);
    }
    DAYS.iter()
        .position(|day| *day == value || (value.len() == 3 && day.starts_with(&value)))
        .map(|index| index as u32)
}

fn weekday(condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool> {
    let days: Option<Vec<u32>> = condition
        .value_as_strings()
        .iter()
        .map(|day| parse_weekday(day))
        .collect();
    let days = days.ok_or_else(|| {
        DiscountRulesError::condition(
            &condition.condition_type,
            format!("unrecognised weekday in {}", condition.value),
        )
    })?;

    let today = ctx.local_now().weekday().num_days_from_monday();
    membership(condition, days.contains(&today))
}

/// Parse "HH:MM-HH:MM" into a start and end time
fn parse_time_range(value: &str) -> Option<(NaiveTime, NaiveTime)> {
    let (start, end) = value.split_once('-')?;
    let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
    Some((start, end))
}

fn time_in_range(time: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        time >= start && time <= end
    } else {
        // overnight, e.g. 22:00-02:00
        time >= start || time <= end
    }
}

fn time_range(condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool> {
    let raw = condition.value.as_str().unwrap_or_default();
    let (start, end) = parse_time_range(raw).ok_or_else(|| {
        DiscountRulesError::condition(
            &condition.condition_type,
            format!("expected HH:MM-HH:MM, got {}", condition.value),
        )
    })?;

    let local = ctx.local_now();
    let now = NaiveTime::from_hms_opt(local.hour(), local.minute(), 0).unwrap_or(start);
    membership(condition, time_in_range(now, start, end))
}

fn date(condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool> {
    let raw = condition.value.as_str().unwrap_or_default();
    let expected = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
        DiscountRulesError::condition(&condition.condition_type, format!("bad date '{}': {}", raw, e))
    })?;

    let today = ctx.local_now().date_naive();
    condition
        .operator
        .compare(&today, &expected)
        .ok_or_else(|| unsupported_operator(condition))
}

fn coupon_applied(condition: &Condition, ctx: &EvaluationContext) -> DRResult<bool> {
    let wanted = condition.value_as_strings();
    let applied = &ctx.cart().applied_coupons;

    // no codes listed means "any coupon"
    let hit = if wanted.is_empty() {
        !applied.is_empty()
    } else {
        applied
            .iter()
            .any(|code| wanted.iter().any(|w| w.eq_ignore_ascii_case(code)))
    };
    membership(condition, hit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discount_rules::types::RuleKind;
    use crate::models::{Cart, Customer, Product};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn cart() -> Cart {
        let mut cart = Cart::new();
        cart.add_product(Product::new(1, dec!(20)).with_categories(&[7]), 2);
        cart.add_product(Product::new(2, dec!(15)).with_parent(3), 1);
        cart.applied_coupons.push("SPRING".to_string());
        cart
    }

    fn ctx_with(customer: Customer) -> EvaluationContext {
        // 2024-03-06 is a Wednesday
        let now = Utc.with_ymd_and_hms(2024, 3, 6, 23, 30, 0).unwrap();
        EvaluationContext::new(customer, cart(), now)
    }

    fn ctx() -> EvaluationContext {
        ctx_with(Customer::guest())
    }

    fn holds(tag: &str, operator: Operator, value: JsonValue, ctx: &EvaluationContext) -> bool {
        ConditionRegistry::with_builtins().evaluate(&Condition::new(tag, operator, value), ctx)
    }

    #[test]
    fn test_empty_condition_list_is_eligible() {
        let rule = Rule::new(1, "No conditions", RuleKind::Price);
        assert!(ConditionRegistry::with_builtins().check(&rule, &ctx()));
    }

    #[test]
    fn test_all_conditions_must_hold() {
        let registry = ConditionRegistry::with_builtins();
        let rule = Rule::new(1, "Big carts", RuleKind::Price)
            .with_condition(Condition::new("cart_total", Operator::GreaterEqual, json!(55)))
            .with_condition(Condition::new("cart_quantity", Operator::Equals, json!(3)));
        assert!(registry.check(&rule, &ctx()));

        let rule = rule.with_condition(Condition::new("cart_items", Operator::Greater, json!(2)));
        assert!(!registry.check(&rule, &ctx()));
    }

    #[test]
    fn test_cart_conditions() {
        let ctx = ctx();
        assert!(holds("cart_total", Operator::Greater, json!("54.99"), &ctx));
        assert!(!holds("cart_total", Operator::Less, json!(55), &ctx));
        assert!(holds("product_in_cart", Operator::In, json!([3]), &ctx));
        assert!(holds("product_in_cart", Operator::NotIn, json!([9]), &ctx));
        assert!(holds("category_in_cart", Operator::In, json!([7]), &ctx));
        assert!(!holds("category_in_cart", Operator::NotIn, json!([7]), &ctx));
        assert!(holds("coupon_applied", Operator::In, json!(["spring"]), &ctx));
        assert!(holds("coupon_applied", Operator::In, json!([]), &ctx));
    }

    #[test]
    fn test_anonymous_history_is_zero() {
        let ctx = ctx_with(Customer {
            total_spent: dec!(900),
            order_count: 4,
            ..Customer::guest()
        });
        assert!(holds("total_spent", Operator::Less, json!(100), &ctx));
        assert!(holds("order_count", Operator::Equals, json!(0), &ctx));
        assert!(holds("user_logged_in", Operator::Equals, json!(false), &ctx));
        assert!(!holds("user_role", Operator::In, json!(["wholesale"]), &ctx));
    }

    #[test]
    fn test_member_conditions() {
        let member = Customer {
            total_spent: dec!(250),
            order_count: 2,
            ..Customer::member(5, &["Wholesale"])
        };
        let ctx = ctx_with(member);
        assert!(holds("total_spent", Operator::GreaterEqual, json!(250), &ctx));
        assert!(holds("order_count", Operator::Greater, json!(1), &ctx));
        assert!(holds("user_logged_in", Operator::Equals, json!("yes"), &ctx));
        assert!(holds("user_role", Operator::In, json!(["wholesale"]), &ctx));
        assert!(!holds("user_role", Operator::NotIn, json!("wholesale"), &ctx));
    }

    #[test]
    fn test_time_conditions_use_store_offset() {
        let ctx = ctx();
        assert!(holds("weekday", Operator::In, json!(["wed", "fri"]), &ctx));
        assert!(holds("weekday", Operator::Equals, json!(2), &ctx));
        assert!(holds("time_range", Operator::In, json!("22:00-02:00"), &ctx));
        assert!(!holds("time_range", Operator::In, json!("09:00-17:00"), &ctx));
        assert!(holds("date", Operator::Equals, json!("2024-03-06"), &ctx));

        // one hour ahead it is already Thursday
        let shifted = ctx_with(Customer::guest()).with_utc_offset_minutes(60);
        assert!(holds("weekday", Operator::Equals, json!("thursday"), &shifted));
        assert!(holds("date", Operator::Greater, json!("2024-03-06"), &shifted));
    }

    #[test]
    fn test_bad_values_and_operators_fail_closed() {
        let ctx = ctx();
        assert!(!holds("cart_total", Operator::Greater, json!("lots"), &ctx));
        assert!(!holds("cart_total", Operator::In, json!([1, 2]), &ctx));
        assert!(!holds("weekday", Operator::Greater, json!("mon"), &ctx));
        assert!(!holds("weekday", Operator::In, json!(["someday"]), &ctx));
        assert!(!holds("time_range", Operator::In, json!("noon"), &ctx));
        assert!(!holds("time_range", Operator::NotIn, json!("noon"), &ctx));
    }

    #[test]
    fn test_unregistered_tags_use_fallback() {
        let ctx = ctx();
        let mut registry = ConditionRegistry::with_builtins();
        let condition = Condition::new("customer_segment", Operator::Equals, json!("vip"));

        assert!(!registry.is_registered("customer_segment"));
        assert!(registry.evaluate(&condition, &ctx));

        registry.set_fallback(|_: &Condition, _: &EvaluationContext| -> DRResult<bool> { Ok(false) });
        assert!(!registry.evaluate(&condition, &ctx));
    }

    #[test]
    fn test_parameter_tags_always_hold() {
        let ctx = ctx();
        for tag in PARAMETER_TAGS {
            assert!(holds(tag, Operator::Equals, json!(2), &ctx));
        }
    }

    #[test]
    fn test_erroring_custom_evaluator_fails_closed() {
        let mut registry = ConditionRegistry::with_builtins();
        registry.register("loyalty_tier", |condition: &Condition, _: &EvaluationContext| -> DRResult<bool> {
            Err(DiscountRulesError::condition(&condition.condition_type, "service unavailable"))
        });

        let rule = Rule::new(1, "Gold only", RuleKind::Price)
            .with_condition(Condition::new("loyalty_tier", Operator::Equals, json!("gold")));
        assert!(!registry.check(&rule, &ctx()));
    }

    #[test]
    fn test_parse_weekday_forms() {
        assert_eq!(parse_weekday("0"), Some(0));
        assert_eq!(parse_weekday("Sun"), Some(6));
        assert_eq!(parse_weekday("saturday"), Some(5));
        assert_eq!(parse_weekday("7"), None);
        assert_eq!(parse_weekday("th"), None);
    }
}
