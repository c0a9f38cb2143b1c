use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::discount_rules::error::{DRResult, DiscountRulesError};
use crate::discount_rules::gifts::GiftLineChanges;

pub type RuleId = u64;
pub type ProductId = u64;
pub type CategoryId = u64;
pub type TagId = u64;
pub type OrderId = u64;

/// Storefront product as seen by the engine
///
/// `parent_id` is set for variants; rules targeting the parent also match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    #[serde(default)]
    pub parent_id: Option<ProductId>,
    #[serde(default)]
    pub name: String,
    pub regular_price: Decimal,
    /// Manual sale price set by the merchant, if any
    #[serde(default)]
    pub sale_price: Option<Decimal>,
    #[serde(default)]
    pub category_ids: Vec<CategoryId>,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
}

impl Product {
    pub fn new(id: ProductId, regular_price: Decimal) -> Self {
        Self {
            id,
            parent_id: None,
            name: format!("Product {}", id),
            regular_price,
            sale_price: None,
            category_ids: Vec::new(),
            tag_ids: Vec::new(),
        }
    }

    pub fn with_categories(mut self, category_ids: &[CategoryId]) -> Self {
        self.category_ids = category_ids.to_vec();
        self
    }

    pub fn with_tags(mut self, tag_ids: &[TagId]) -> Self {
        self.tag_ids = tag_ids.to_vec();
        self
    }

    pub fn with_parent(mut self, parent_id: ProductId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_sale_price(mut self, sale_price: Decimal) -> Self {
        self.sale_price = Some(sale_price);
        self
    }

    /// True when the merchant set a sale price below the regular price
    pub fn is_on_sale(&self) -> bool {
        self.sale_price
            .map(|sale| sale < self.regular_price)
            .unwrap_or(false)
    }

    /// The product id and, for variants, the parent id
    pub fn lineage(&self) -> impl Iterator<Item = ProductId> {
        std::iter::once(self.id).chain(self.parent_id)
    }
}

/// Current shopper
///
/// Anonymous shoppers have `id = None`, `logged_in = false`, and zero history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub total_spent: Decimal,
    #[serde(default)]
    pub order_count: u32,
}

impl Customer {
    pub fn guest() -> Self {
        Self::default()
    }

    pub fn member(id: u64, roles: &[&str]) -> Self {
        Self {
            id: Some(id),
            logged_in: true,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            total_spent: Decimal::ZERO,
            order_count: 0,
        }
    }

    /// Lifetime spend, zero for anonymous shoppers
    pub fn effective_total_spent(&self) -> Decimal {
        if self.logged_in {
            self.total_spent
        } else {
            Decimal::ZERO
        }
    }

    /// Completed orders, zero for anonymous shoppers
    pub fn effective_order_count(&self) -> u32 {
        if self.logged_in {
            self.order_count
        } else {
            0
        }
    }
}

/// A single cart line
///
/// Gift lines are synthesized by gift reconciliation; `originating_rule_id`
/// names the gift rule that added them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub key: Uuid,
    pub product: Product,
    pub unit_price: Decimal,
    pub quantity: u32,
    #[serde(default)]
    pub is_gift: bool,
    #[serde(default)]
    pub originating_rule_id: Option<RuleId>,
}

impl CartLine {
    pub fn new(product: Product, quantity: u32) -> Self {
        let unit_price = product.regular_price;
        Self {
            key: Uuid::new_v4(),
            product,
            unit_price,
            quantity,
            is_gift: false,
            originating_rule_id: None,
        }
    }

    /// unit_price × quantity
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Cart snapshot handed to the engine for one recalculation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    #[serde(default)]
    pub lines: Vec<CartLine>,
    #[serde(default)]
    pub applied_coupons: Vec<String>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a regular line and return its key
    pub fn add_product(&mut self, product: Product, quantity: u32) -> Uuid {
        let line = CartLine::new(product, quantity);
        let key = line.key;
        self.lines.push(line);
        key
    }

    /// Sum of all line subtotals
    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::subtotal).sum()
    }

    /// Total item count across shopper-added lines
    pub fn item_quantity(&self) -> u32 {
        self.regular_lines().map(|line| line.quantity).sum()
    }

    /// Quantity of one product across shopper-added lines
    pub fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.regular_lines()
            .filter(|line| line.product.lineage().any(|id| id == product_id))
            .map(|line| line.quantity)
            .sum()
    }

    pub fn regular_lines(&self) -> impl Iterator<Item = &CartLine> {
        self.lines.iter().filter(|line| !line.is_gift)
    }

    pub fn gift_lines(&self) -> impl Iterator<Item = &CartLine> {
        self.lines.iter().filter(|line| line.is_gift)
    }

    pub fn line(&self, key: Uuid) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.key == key)
    }

    /// Shopper-initiated quantity change; gift lines are locked
    pub fn set_quantity(&mut self, key: Uuid, quantity: u32) -> DRResult<()> {
        let line = self
            .lines
            .iter_mut()
            .find(|line| line.key == key)
            .ok_or(DiscountRulesError::LineNotFound(key))?;

        if line.is_gift {
            return Err(DiscountRulesError::GiftLineLocked(key));
        }

        if quantity == 0 {
            self.lines.retain(|line| line.key != key);
        } else {
            line.quantity = quantity;
        }
        Ok(())
    }

    /// Shopper-initiated removal; gift lines only leave via reconciliation
    pub fn remove_line(&mut self, key: Uuid) -> DRResult<CartLine> {
        let index = self
            .lines
            .iter()
            .position(|line| line.key == key)
            .ok_or(DiscountRulesError::LineNotFound(key))?;

        if self.lines[index].is_gift {
            return Err(DiscountRulesError::GiftLineLocked(key));
        }

        Ok(self.lines.remove(index))
    }

    /// Apply a gift reconciliation result; only gift lines are touched
    pub fn apply_gift_changes(&mut self, changes: &GiftLineChanges) {
        self.lines
            .retain(|line| !(line.is_gift && changes.remove.contains(&line.key)));
        self.lines.extend(changes.add.iter().cloned());
    }
}

/// Negative fee line emitted by a cart rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub rule_id: RuleId,
    pub label: String,
    /// Always negative
    pub amount: Decimal,
}

/// A rule that took effect, with the amount it saved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRule {
    pub rule_id: RuleId,
    pub amount: Decimal,
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    /// Cart subtotal equals the sum of quantity × unit price over all lines
    #[test]
    fn prop_cart_subtotal_invariant() {
        proptest!(|(
            lines in prop::collection::vec((1u32..=50, 1u32..=10000u32), 0..=10)
        )| {
            let mut cart = Cart::new();
            let mut expected = Decimal::ZERO;
            for (index, (quantity, price_cents)) in lines.iter().enumerate() {
                let price = Decimal::from(*price_cents) / Decimal::from(100);
                cart.add_product(Product::new(index as u64, price), *quantity);
                expected += price * Decimal::from(*quantity);
            }

            prop_assert_eq!(cart.subtotal(), expected);
            prop_assert!(cart.subtotal() >= Decimal::ZERO);
        });
    }
}
