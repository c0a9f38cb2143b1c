// Exclusion Registry
//
// Product and category opt-outs, per rule or global. Per-rule answers are cached
// in the evaluation context under a (product, rule) key. Variants inherit their
// parent's categories when a catalog is attached.

use std::sync::Arc;

use crate::discount_rules::{
    context::EvaluationContext,
    metrics::EngineMetrics,
    repository::{ProductCatalog, RuleRepository},
    rule::Rule,
    types::ExclusionType,
};
use crate::models::{CategoryId, Product};

pub struct ExclusionRegistry {
    repository: Arc<dyn RuleRepository>,
    catalog: Option<Arc<dyn ProductCatalog>>,
    metrics: EngineMetrics,
}

impl ExclusionRegistry {
    pub fn new(repository: Arc<dyn RuleRepository>, metrics: EngineMetrics) -> Self {
        Self {
            repository,
            catalog: None,
            metrics,
        }
    }

    /// Look up parent products so variants inherit their categories
    pub fn with_catalog(mut self, catalog: Arc<dyn ProductCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Whether `product` (or its parent) is opted out of every rule
    ///
    /// A failing lookup counts as no global exclusions.
    pub fn is_globally_excluded(&self, product: &Product) -> bool {
        match self.repository.global_exclusions() {
            Ok(excluded) => product.lineage().any(|id| excluded.contains(&id)),
            Err(e) => {
                tracing::warn!("Global exclusion lookup failed: {}", e);
                false
            }
        }
    }

    /// Whether `rule` excludes `product` directly, through its parent, or
    /// through any of its categories
    pub fn is_product_excluded(&self, ctx: &EvaluationContext, product: &Product, rule: &Rule) -> bool {
        if let Some(excluded) = ctx.cached_exclusion(product.id, rule.id) {
            self.metrics.record_cache_hit();
            return excluded;
        }
        self.metrics.record_cache_miss();

        let product_hit = rule.exclusions.iter().any(|exclusion| {
            exclusion.exclusion_type == ExclusionType::Product
                && product.lineage().any(|id| id == exclusion.id)
        });
        let excluded = product_hit || {
            let excluded_categories: Vec<CategoryId> = rule
                .exclusions
                .iter()
                .filter(|exclusion| exclusion.exclusion_type == ExclusionType::Category)
                .map(|exclusion| exclusion.id)
                .collect();
            !excluded_categories.is_empty()
                && self
                    .lineage_categories(product)
                    .iter()
                    .any(|category| excluded_categories.contains(category))
        };

        ctx.cache_exclusion(product.id, rule.id, excluded);
        excluded
    }

    /// Categories of `product` plus, for variants, those of its parent
    ///
    /// A failed or missing parent lookup contributes no categories.
    fn lineage_categories(&self, product: &Product) -> Vec<CategoryId> {
        let mut categories = product.category_ids.clone();
        let (Some(parent_id), Some(catalog)) = (product.parent_id, &self.catalog) else {
            return categories;
        };

        match catalog.product(parent_id) {
            Ok(Some(parent)) => categories.extend(parent.category_ids),
            Ok(None) => tracing::debug!("Parent product {} not in catalog", parent_id),
            Err(e) => tracing::warn!("Parent product {} lookup failed: {}", parent_id, e),
        }
        categories
    }

    /// Global check first, then the rule's own exclusions
    pub fn is_excluded(&self, ctx: &EvaluationContext, product: &Product, rule: &Rule) -> bool {
        let excluded =
            self.is_globally_excluded(product) || self.is_product_excluded(ctx, product, rule);
        if excluded {
            tracing::debug!("Product {} excluded from rule {}", product.id, rule.id);
        }
        excluded
    }
}
