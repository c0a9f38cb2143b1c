// Domain type definitions for the discount rules engine
// Provides shared enums used across multiple engines

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Lifecycle status of a rule as toggled by the management surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Active,

    /// Rules are created inactive unless explicitly activated
    #[default]
    Inactive,
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleStatus::Active => write!(f, "active"),
            RuleStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// Type of discount applied by a rule, tier, or gift
///
/// Determines how the discount value should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// Value is a percentage of the base (e.g., 10 = 10% off)
    #[default]
    Percentage,

    /// Value is an amount subtracted from the base (e.g., 5.00 = $5 off)
    Fixed,

    /// Value is the target price; the discount is base minus value
    FixedPrice,
}

impl DiscountType {
    /// Discount amount this formula takes off `base`
    ///
    /// Clamped to `[0, base]` so a discounted price never goes negative.
    pub fn discount_amount(&self, base: Decimal, value: Decimal) -> Decimal {
        let raw = match self {
            DiscountType::Percentage => base * value / Decimal::ONE_HUNDRED,
            DiscountType::Fixed => value,
            DiscountType::FixedPrice => base - value,
        };

        raw.max(Decimal::ZERO).min(base.max(Decimal::ZERO))
    }
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscountType::Percentage => write!(f, "percentage"),
            DiscountType::Fixed => write!(f, "fixed"),
            DiscountType::FixedPrice => write!(f, "fixed_price"),
        }
    }
}

impl std::str::FromStr for DiscountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(DiscountType::Percentage),
            "fixed" => Ok(DiscountType::Fixed),
            "fixed_price" => Ok(DiscountType::FixedPrice),
            _ => Err(format!("Invalid discount type: {}", s)),
        }
    }
}

/// Which products a rule targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApplyTo {
    #[default]
    AllProducts,
    SpecificProducts,
    Categories,
    Tags,
}

impl fmt::Display for ApplyTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyTo::AllProducts => write!(f, "all_products"),
            ApplyTo::SpecificProducts => write!(f, "specific_products"),
            ApplyTo::Categories => write!(f, "categories"),
            ApplyTo::Tags => write!(f, "tags"),
        }
    }
}

/// Stored rule type, used to query the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    PriceRule,
    CartRule,
    SpecialOffer,
    Gift,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleType::PriceRule => write!(f, "price_rule"),
            RuleType::CartRule => write!(f, "cart_rule"),
            RuleType::SpecialOffer => write!(f, "special_offer"),
            RuleType::Gift => write!(f, "gift"),
        }
    }
}

/// What a rule does, carrying only the fields relevant to that kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum RuleKind {
    /// Per-product price adjustment
    #[serde(rename = "price_rule")]
    Price,

    /// Cart-level fee adjustment
    #[serde(rename = "cart_rule")]
    Cart {
        #[serde(default)]
        free_shipping: bool,
    },

    /// Multi-buy promotion or single-item event sale
    #[serde(rename = "special_offer")]
    Promotion { offer: PromotionKind },

    /// Automatic free-gift line
    #[serde(rename = "gift")]
    Gift,
}

impl RuleKind {
    pub fn rule_type(&self) -> RuleType {
        match self {
            RuleKind::Price => RuleType::PriceRule,
            RuleKind::Cart { .. } => RuleType::CartRule,
            RuleKind::Promotion { .. } => RuleType::SpecialOffer,
            RuleKind::Gift => RuleType::Gift,
        }
    }
}

/// Special offer subtype
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "special_offer_type", rename_all = "snake_case")]
pub enum PromotionKind {
    Bogo,
    BuyXGetY,
    BuyXForY,
    XForPriceOfY,

    /// Single-item flat discount handled by the price engine
    EventSale {
        #[serde(default)]
        discount_type: DiscountType,
        discount_value: Option<Decimal>,
    },
}

impl PromotionKind {
    /// Multi-buy algorithm for this subtype; `None` for event sales
    pub fn offer_kind(&self) -> Option<OfferKind> {
        match self {
            PromotionKind::Bogo => Some(OfferKind::Bogo),
            PromotionKind::BuyXGetY => Some(OfferKind::BuyXGetY),
            PromotionKind::BuyXForY => Some(OfferKind::BuyXForY),
            PromotionKind::XForPriceOfY => Some(OfferKind::XForPriceOfY),
            PromotionKind::EventSale { .. } => None,
        }
    }

    pub fn is_event_sale(&self) -> bool {
        matches!(self, PromotionKind::EventSale { .. })
    }
}

/// The four multi-buy algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferKind {
    Bogo,
    BuyXGetY,
    BuyXForY,
    XForPriceOfY,
}

impl fmt::Display for OfferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferKind::Bogo => write!(f, "bogo"),
            OfferKind::BuyXGetY => write!(f, "buy_x_get_y"),
            OfferKind::BuyXForY => write!(f, "buy_x_for_y"),
            OfferKind::XForPriceOfY => write!(f, "x_for_price_of_y"),
        }
    }
}

impl std::str::FromStr for OfferKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bogo" => Ok(OfferKind::Bogo),
            "buy_x_get_y" => Ok(OfferKind::BuyXGetY),
            "buy_x_for_y" => Ok(OfferKind::BuyXForY),
            "x_for_price_of_y" => Ok(OfferKind::XForPriceOfY),
            _ => Err(format!("Invalid offer type: {}", s)),
        }
    }
}

/// Comparison operator used by conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Equals,
    NotEquals,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    In,
    NotIn,
}

impl Operator {
    /// Apply an ordering-based operator to `actual` vs `expected`
    ///
    /// Returns `None` for set operators (`in` / `not_in`), which need a list.
    pub fn compare<T: PartialOrd>(&self, actual: &T, expected: &T) -> Option<bool> {
        let ordering = actual.partial_cmp(expected)?;
        let result = match self {
            Operator::Equals => ordering == Ordering::Equal,
            Operator::NotEquals => ordering != Ordering::Equal,
            Operator::Greater => ordering == Ordering::Greater,
            Operator::Less => ordering == Ordering::Less,
            Operator::GreaterEqual => ordering != Ordering::Less,
            Operator::LessEqual => ordering != Ordering::Greater,
            Operator::In | Operator::NotIn => return None,
        };
        Some(result)
    }

    pub fn is_set_operator(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Greater => "greater",
            Operator::Less => "less",
            Operator::GreaterEqual => "greater_equal",
            Operator::LessEqual => "less_equal",
            Operator::In => "in",
            Operator::NotIn => "not_in",
        };
        write!(f, "{}", name)
    }
}

/// What an exclusion record refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionType {
    Product,
    Category,
}
