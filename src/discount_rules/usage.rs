// Usage Recorder
//
// Credits rules with their use on a completed order. Each (rule, order) pair is
// counted at most once; a failure on one rule never blocks the others.

use serde::Serialize;
use std::sync::Arc;

use crate::discount_rules::{error::DRResult, repository::RuleRepository};
use crate::models::{AppliedRule, OrderId, RuleId};

/// Outcome of one order's usage recording
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageReport {
    pub order_id: OrderId,
    /// Rules whose usage was counted by this call
    pub recorded: Vec<RuleId>,
    /// Rules already counted for this order
    pub skipped: Vec<RuleId>,
    /// Rules whose recording failed
    pub failed: Vec<RuleId>,
}

pub struct UsageRecorder {
    repository: Arc<dyn RuleRepository>,
}

impl UsageRecorder {
    pub fn new(repository: Arc<dyn RuleRepository>) -> Self {
        Self { repository }
    }

    /// Record every applied rule against `order_id`
    ///
    /// Safe to call repeatedly for the same order: already-recorded pairs are
    /// skipped, so usage_count moves at most once per rule and order.
    pub fn record_applied_rules(&self, order_id: OrderId, applied: &[AppliedRule]) -> UsageReport {
        let mut report = UsageReport {
            order_id,
            ..UsageReport::default()
        };

        let mut seen: Vec<RuleId> = Vec::new();
        for rule in applied {
            if seen.contains(&rule.rule_id) {
                continue;
            }
            seen.push(rule.rule_id);

            match self.record_one(order_id, rule) {
                Ok(true) => report.recorded.push(rule.rule_id),
                Ok(false) => report.skipped.push(rule.rule_id),
                Err(e) => {
                    // Log error but don't propagate; order completion must not fail on accounting
                    tracing::warn!("Failed to record usage of rule {} on order {}: {}", rule.rule_id, order_id, e);
                    report.failed.push(rule.rule_id);
                }
            }
        }

        tracing::info!(
            "Order {}: usage recorded for {} rules ({} already recorded, {} failed)",
            order_id,
            report.recorded.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    /// Write the ledger row first; only a new row bumps the counter
    fn record_one(&self, order_id: OrderId, rule: &AppliedRule) -> DRResult<bool> {
        if self.repository.has_usage(rule.rule_id, order_id)? {
            return Ok(false);
        }
        if !self.repository.record_usage(rule.rule_id, order_id, rule.amount)? {
            return Ok(false);
        }
        self.repository.increment_usage(rule.rule_id)?;
        Ok(true)
    }
}
