// Discount rule evaluation engine for storefront pricing
//
// Prices products, adjusts carts, reconciles gift lines, and accounts rule
// usage on completed orders. Storage, sessions, and display are collaborators.

pub mod config;
pub mod discount_rules;
pub mod models;
pub mod validation;

pub use config::EngineSettings;
pub use discount_rules::{
    CartAdjustments, DiscountEngine, DiscountRulesError, DRResult, EvaluationContext,
    InMemoryRuleStore, Rule,
};
pub use models::{AppliedRule, Cart, CartLine, Customer, Fee, Product};
