// Engine configuration
// Settings come from the environment (optionally a .env file loaded by the binary)

use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const ENV_ENABLED: &str = "DISCOUNT_ENABLED";
pub const ENV_APPLY_TO_SALE_PRODUCTS: &str = "DISCOUNT_APPLY_TO_SALE_PRODUCTS";
pub const ENV_CURRENCY_DECIMALS: &str = "DISCOUNT_CURRENCY_DECIMALS";
pub const ENV_CART_FEE_LABEL: &str = "DISCOUNT_CART_FEE_LABEL";
pub const ENV_UTC_OFFSET_MINUTES: &str = "DISCOUNT_UTC_OFFSET_MINUTES";

/// Store-wide discount settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Master switch for per-product price rules
    pub enabled: bool,
    /// Whether price rules also apply to products carrying a manual sale price
    pub apply_to_sale_products: bool,
    pub currency_decimals: u32,
    /// Label for cart fee lines; the rule name is used when unset
    pub cart_fee_label: Option<String>,
    /// Store timezone for weekday, time and date conditions
    pub utc_offset_minutes: i32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            apply_to_sale_products: false,
            currency_decimals: 2,
            cart_fee_label: None,
            utc_offset_minutes: 0,
        }
    }
}

impl EngineSettings {
    /// Read settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; unset or invalid values keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            enabled: parse_or(&lookup, ENV_ENABLED, defaults.enabled, parse_flag),
            apply_to_sale_products: parse_or(
                &lookup,
                ENV_APPLY_TO_SALE_PRODUCTS,
                defaults.apply_to_sale_products,
                parse_flag,
            ),
            currency_decimals: parse_or(
                &lookup,
                ENV_CURRENCY_DECIMALS,
                defaults.currency_decimals,
                |raw| u32::from_str(raw).ok().filter(|decimals| *decimals <= 10),
            ),
            cart_fee_label: lookup(ENV_CART_FEE_LABEL)
                .map(|label| label.trim().to_string())
                .filter(|label| !label.is_empty()),
            utc_offset_minutes: parse_or(
                &lookup,
                ENV_UTC_OFFSET_MINUTES,
                defaults.utc_offset_minutes,
                |raw| i32::from_str(raw).ok().filter(|minutes| minutes.abs() < 24 * 60),
            ),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_or<F, T, P>(lookup: &F, key: &str, default: T, parse: P) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::fmt::Debug,
    P: Fn(&str) -> Option<T>,
{
    match lookup(key) {
        None => default,
        Some(raw) => parse(raw.trim()).unwrap_or_else(|| {
            tracing::warn!("Invalid {}='{}', using default {:?}", key, raw, default);
            default
        }),
    }
}
