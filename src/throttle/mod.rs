// Throttling & rate-limit controller: admits or rejects requests against
// global and per-tenant budgets. Each request passes a global check, then a
// tenant check; a successful check must be followed by `record_request` so
// the algorithm observes the draw.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::common::TenantId;
use crate::config::{RateLimitAlgorithmConfig, RateLimitAlgorithmType, TenantThrottleConfig, ThrottlingConfig};

pub mod algorithms;

pub use algorithms::{FixedWindow, LeakyBucket, RateLimitAlgorithm, SlidingWindow, TokenBucket};

/// Resource category being throttled, used only for future per-resource
/// budgets; today all categories share one admission decision per scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleResource {
    EventProcessing,
    SubscriptionCreation,
    ConnectionEstablishment,
    BulkOperation,
    SchemaChange,
    Replay,
}

#[derive(Debug, Clone)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub retry_after_seconds: Option<f64>,
    pub remaining_requests: Option<f64>,
    pub reset_time: Option<Instant>,
}

impl AdmissionDecision {
    fn allow(remaining: f64) -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after_seconds: None,
            remaining_requests: Some(remaining),
            reset_time: None,
        }
    }

    fn deny(reason: impl Into<String>, retry_after: Duration, now: Instant) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            retry_after_seconds: Some(retry_after.as_secs_f64()),
            remaining_requests: Some(0.0),
            reset_time: Some(now + retry_after),
        }
    }
}

fn build_algorithm(config: &RateLimitAlgorithmConfig, capacity: f64, refill_per_second: f64) -> Box<dyn RateLimitAlgorithm> {
    match config.kind {
        RateLimitAlgorithmType::TokenBucket => Box::new(TokenBucket::new(capacity, refill_per_second)),
        RateLimitAlgorithmType::SlidingWindow => {
            Box::new(SlidingWindow::new(capacity, Duration::from_secs(config.window_size_seconds), config.number_of_windows))
        }
        RateLimitAlgorithmType::FixedWindow => {
            Box::new(FixedWindow::new(capacity, Duration::from_secs(config.window_size_seconds)))
        }
        RateLimitAlgorithmType::LeakyBucket => Box::new(LeakyBucket::new(capacity, refill_per_second)),
    }
}

struct TenantThrottler {
    algorithm: Mutex<Box<dyn RateLimitAlgorithm>>,
    config: TenantThrottleConfig,
}

pub struct ThrottleController {
    config: ThrottlingConfig,
    global: Mutex<Box<dyn RateLimitAlgorithm>>,
    tenants: DashMap<TenantId, Arc<TenantThrottler>>,
    tenant_creation_lock: Mutex<()>,
}

impl ThrottleController {
    pub fn new(config: ThrottlingConfig) -> Self {
        let global = build_algorithm(
            &config.algorithm,
            config.global.max_events_per_second * config.global.burst_multiplier,
            config.global.max_events_per_second,
        );
        Self {
            config,
            global: Mutex::new(global),
            tenants: DashMap::new(),
            tenant_creation_lock: Mutex::new(()),
        }
    }

    fn tenant_throttler(&self, tenant: &str) -> Arc<TenantThrottler> {
        if let Some(existing) = self.tenants.get(tenant) {
            return existing.clone();
        }
        // Serialize tenant creation so concurrent first-requests from the
        // same tenant don't create duplicate throttler state.
        let _guard = self.tenant_creation_lock.lock();
        if let Some(existing) = self.tenants.get(tenant) {
            return existing.clone();
        }
        let tenant_config = self
            .config
            .per_tenant
            .tenant_configs
            .get(tenant)
            .cloned()
            .unwrap_or_else(|| self.config.per_tenant.default.clone());

        let algorithm = build_algorithm(
            &self.config.algorithm,
            tenant_config.max_events_per_second * tenant_config.burst_multiplier,
            tenant_config.max_events_per_second,
        );
        let throttler = Arc::new(TenantThrottler {
            algorithm: Mutex::new(algorithm),
            config: tenant_config,
        });
        self.tenants.insert(tenant.to_string(), throttler.clone());
        throttler
    }

    /// Check admission for `tenant`, global first then tenant. Does not
    /// consume budget by itself; call `record_request` after admission.
    pub fn check(&self, tenant: &str, _resource: ThrottleResource, now: Instant) -> AdmissionDecision {
        let global_check = self.global.lock().check(now);
        if !global_check.allowed {
            return AdmissionDecision::deny("global rate limit exceeded", global_check.retry_after, now);
        }

        let throttler = self.tenant_throttler(tenant);
        let tenant_check = throttler.algorithm.lock().check(now);
        if !tenant_check.allowed {
            return AdmissionDecision::deny(
                format!("tenant '{tenant}' rate limit exceeded"),
                tenant_check.retry_after,
                now,
            );
        }

        AdmissionDecision::allow(tenant_check.remaining)
    }

    /// Record that an admitted request was actually made, so the algorithm
    /// sees the draw against both the global and tenant budgets.
    pub fn record_request(&self, tenant: &str, now: Instant) {
        self.global.lock().record(now);
        self.tenant_throttler(tenant).algorithm.lock().record(now);
    }

    pub fn tenant_priority(&self, tenant: &str) -> crate::config::TenantPriority {
        self.tenant_throttler(tenant).config.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PerTenantThrottleConfig, RateLimitAlgorithmConfig, RateLimitAlgorithmType};

    fn controller_with_tenant_limit(limit: f64) -> ThrottleController {
        let mut config = ThrottlingConfig::default();
        config.algorithm = RateLimitAlgorithmConfig {
            kind: RateLimitAlgorithmType::TokenBucket,
            ..config.algorithm
        };
        config.per_tenant = PerTenantThrottleConfig {
            default: TenantThrottleConfig {
                max_events_per_second: limit,
                burst_multiplier: 1.0,
                ..TenantThrottleConfig::default()
            },
            tenant_configs: Default::default(),
        };
        config.global.max_events_per_second = 1_000_000.0;
        config.global.burst_multiplier = 1.0;
        ThrottleController::new(config)
    }

    #[test]
    fn first_n_requests_admitted_then_rejected() {
        let controller = controller_with_tenant_limit(5.0);
        let now = Instant::now();
        let mut admitted = 0;
        let mut rejected = 0;
        for _ in 0..10 {
            let decision = controller.check("t1", ThrottleResource::EventProcessing, now);
            if decision.allowed {
                admitted += 1;
                controller.record_request("t1", now);
            } else {
                rejected += 1;
                assert!(decision.retry_after_seconds.unwrap_or(0.0) >= 0.0);
            }
        }
        assert_eq!(admitted, 5);
        assert_eq!(rejected, 5);
    }

    #[test]
    fn separate_tenants_have_independent_budgets() {
        let controller = controller_with_tenant_limit(2.0);
        let now = Instant::now();
        for _ in 0..2 {
            assert!(controller.check("t1", ThrottleResource::EventProcessing, now).allowed);
            controller.record_request("t1", now);
        }
        assert!(!controller.check("t1", ThrottleResource::EventProcessing, now).allowed);
        assert!(controller.check("t2", ThrottleResource::EventProcessing, now).allowed);
    }
}
