//! Depth guard: tiered recursion limits for routed work
//!
//! Tiers are evaluated in a fixed precedence regardless of tags:
//! absolute first, then emergency, then the item's own tier limit.
//! Every non-Continue outcome is counted and appended to a bounded
//! exhaustion log.

use crate::config::DepthConfig;
use chrono::Utc;
use dispatch_types::{
    DepthAction, DepthCheck, DepthError, DepthStatus, DepthTier, ExhaustionEvent, WorkItem,
    TAG_EMERGENCY, TAG_EXTENDED_LOOP,
};
use std::collections::VecDeque;

/// Headroom at or below which an item is reported at risk
const AT_RISK_HEADROOM: u32 = 2;

/// Tracks recursion depth against tiered limits
#[derive(Clone, Debug)]
pub struct DepthGuard {
    config: DepthConfig,
    exhaustion_log: VecDeque<ExhaustionEvent>,
    exhaustion_count: u64,
    max_depth_observed: u32,
}

impl DepthGuard {
    /// Create a guard with the default 7/12/21/33 tiers
    pub fn new() -> Self {
        Self::with_config(DepthConfig::default())
    }

    pub fn with_config(config: DepthConfig) -> Self {
        Self {
            config,
            exhaustion_log: VecDeque::new(),
            exhaustion_count: 0,
            max_depth_observed: 0,
        }
    }

    pub fn config(&self) -> &DepthConfig {
        &self.config
    }

    /// The tier that bounds an item. Emergency wins over extended.
    pub fn tier_for(&self, item: &WorkItem) -> DepthTier {
        if item.has_tag(TAG_EMERGENCY) {
            DepthTier::Emergency
        } else if item.has_tag(TAG_EXTENDED_LOOP) {
            DepthTier::Extended
        } else {
            DepthTier::Standard
        }
    }

    /// The depth limit of a tier
    pub fn limit_of(&self, tier: DepthTier) -> u32 {
        match tier {
            DepthTier::Standard => self.config.standard,
            DepthTier::Extended => self.config.extended,
            DepthTier::Emergency => self.config.emergency,
            DepthTier::Absolute => self.config.absolute,
        }
    }

    /// The depth limit that applies to an item
    pub fn limit_for(&self, item: &WorkItem) -> u32 {
        self.limit_of(self.tier_for(item))
    }

    /// Check an item's depth and choose the action the caller must take
    pub fn check(&mut self, item: &WorkItem) -> DepthCheck {
        let depth = item.depth;
        self.observe(depth);

        let check = if depth >= self.config.absolute {
            DepthCheck {
                action: DepthAction::PanicStop,
                depth,
                limit: self.config.absolute,
                tier: DepthTier::Absolute,
            }
        } else if depth >= self.config.emergency {
            DepthCheck {
                action: DepthAction::ForceTerminateAlert,
                depth,
                limit: self.config.emergency,
                tier: DepthTier::Emergency,
            }
        } else {
            let tier = self.tier_for(item);
            let limit = self.limit_of(tier);
            let action = if depth < limit {
                DepthAction::Continue
            } else if tier == DepthTier::Standard {
                DepthAction::EscalateToReview
            } else {
                DepthAction::ForceTerminateIncomplete
            };
            DepthCheck {
                action,
                depth,
                limit,
                tier,
            }
        };

        if !check.action.is_continue() {
            self.record_exhaustion(item, &check);
        }
        check
    }

    /// Strict variant of [`check`](Self::check) for callers that want errors
    pub fn check_or_fail(&mut self, item: &WorkItem) -> Result<DepthCheck, DepthError> {
        let check = self.check(item);
        match check.action {
            DepthAction::Continue => Ok(check),
            DepthAction::PanicStop => Err(DepthError::PanicStop { depth: check.depth }),
            action => Err(DepthError::LimitExceeded {
                action,
                depth: check.depth,
                limit: check.limit,
                tier: check.tier,
            }),
        }
    }

    /// Increment an item's depth, returning the new depth
    pub fn increment(&mut self, item: &mut WorkItem) -> u32 {
        item.depth = item.depth.saturating_add(1);
        self.observe(item.depth);
        item.depth
    }

    pub fn reset(&mut self, item: &mut WorkItem) {
        item.depth = 0;
    }

    /// Current headroom for an item
    pub fn status(&self, item: &WorkItem) -> DepthStatus {
        let tier = self.tier_for(item);
        let limit = self.limit_of(tier);
        let remaining = limit.saturating_sub(item.depth);
        let percent_used = if limit == 0 {
            100.0
        } else {
            (item.depth as f64 / limit as f64 * 100.0).min(100.0)
        };

        DepthStatus {
            depth: item.depth,
            limit,
            tier,
            remaining,
            at_risk: remaining <= AT_RISK_HEADROOM,
            percent_used,
        }
    }

    // ── Query ────────────────────────────────────────────────────────

    /// Retained exhaustion events, oldest first
    pub fn exhaustion_log(&self) -> impl Iterator<Item = &ExhaustionEvent> {
        self.exhaustion_log.iter()
    }

    /// Total non-Continue checks, including events evicted from the log
    pub fn exhaustion_count(&self) -> u64 {
        self.exhaustion_count
    }

    pub fn max_depth_observed(&self) -> u32 {
        self.max_depth_observed
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn observe(&mut self, depth: u32) {
        self.max_depth_observed = self.max_depth_observed.max(depth);
    }

    fn record_exhaustion(&mut self, item: &WorkItem, check: &DepthCheck) {
        self.exhaustion_count += 1;

        if check.action.is_fatal() {
            tracing::error!(
                item_id = %item.id,
                depth = check.depth,
                "Absolute depth breached, panic stop"
            );
        } else {
            tracing::warn!(
                item_id = %item.id,
                depth = check.depth,
                limit = check.limit,
                tier = %check.tier,
                action = %check.action,
                "Depth limit reached"
            );
        }

        if self.config.exhaustion_log_capacity == 0 {
            return;
        }
        while self.exhaustion_log.len() >= self.config.exhaustion_log_capacity {
            self.exhaustion_log.pop_front();
        }
        self.exhaustion_log.push_back(ExhaustionEvent {
            timestamp: Utc::now(),
            item_id: item.id.clone(),
            depth: check.depth,
            limit: check.limit,
            action: check.action,
        });
    }
}

impl Default for DepthGuard {
    fn default() -> Self {
        Self::new()
    }
}
