// Demo driver for the discount engine
//
// Loads rules and a cart from JSON files, prices every line, runs one cart pass,
// and prints the result as JSON.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use discount_engine::discount_rules::{DRResult, InMemoryRuleStore, PriceBreakdown};
use discount_engine::{CartAdjustments, Cart, Customer, DiscountEngine, EngineSettings, Product};

/// Cart file layout: the shopper, their cart, and catalog products for gifts
#[derive(Debug, Deserialize)]
struct CartFile {
    #[serde(default)]
    customer: Customer,
    cart: Cart,
    #[serde(default)]
    catalog: Vec<Product>,
}

#[derive(Debug, Serialize)]
struct Report {
    prices: Vec<PriceBreakdown>,
    adjustments: CartAdjustments,
}

fn run(rules_path: &str, cart_path: &str) -> DRResult<Report> {
    let rules_json = read(rules_path)?;
    let store = Arc::new(InMemoryRuleStore::from_json(&rules_json)?);

    let cart_file: CartFile = serde_json::from_str(&read(cart_path)?)?;
    for product in cart_file.catalog {
        store.add_product(product)?;
    }

    let engine = DiscountEngine::from_store(store, EngineSettings::from_env());
    let ctx = engine.context(cart_file.customer, cart_file.cart, Utc::now());

    let prices = ctx
        .cart()
        .regular_lines()
        .map(|line| engine.price_breakdown(&ctx, &line.product, line.product.regular_price, line.quantity))
        .collect();
    let adjustments = engine.recalculate_cart(&ctx);

    engine.metrics().log_summary();
    Ok(Report { prices, adjustments })
}

fn read(path: &str) -> DRResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        discount_engine::DiscountRulesError::DataAccess(format!("cannot read {}: {}", path, e))
    })
}

fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let rules_path = std::env::var("RULES_FILE").unwrap_or_else(|_| "rules.json".to_string());
    let cart_path = std::env::var("CART_FILE").unwrap_or_else(|_| "cart.json".to_string());
    tracing::info!("Evaluating {} against {}", cart_path, rules_path);

    let report = match run(&rules_path, &cart_path) {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            tracing::error!("Failed to serialize report: {}", e);
            std::process::exit(1);
        }
    }
}
