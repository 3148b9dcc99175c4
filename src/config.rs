// Recognized configuration options for the pipeline. The crate does not read
// files or environment variables itself (out of scope); every struct here is
// `Deserialize` so a host binary can parse TOML/YAML/env into it and hand the
// result to the pipeline's constructors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration recognized by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_batch_size: usize,
    pub default_flush_interval_ms: u64,
    pub default_max_degree_of_parallelism: usize,
    pub enable_metrics: bool,
    pub enable_health_checks: bool,
    pub default_serializer: SerializerFormat,
    pub exactly_once: ExactlyOnceConfig,
    pub transactional: TransactionalConfig,
    pub throttling: ThrottlingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_batch_size: 100,
            default_flush_interval_ms: 1_000,
            default_max_degree_of_parallelism: 4,
            enable_metrics: true,
            enable_health_checks: true,
            default_serializer: SerializerFormat::Json,
            exactly_once: ExactlyOnceConfig::default(),
            transactional: TransactionalConfig::default(),
            throttling: ThrottlingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializerFormat {
    Json,
    MessagePack,
    Protobuf,
    Avro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    Offset,
    ContentHash,
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupAlgorithm {
    Sha1,
    Sha256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcknowledgmentStrategy {
    AutoOnDeliver,
    ExplicitOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    ExponentialBackoff,
    FixedDelay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub key_strategy: KeyStrategy,
    pub key_ttl_seconds: u64,
    pub max_keys: usize,
    pub cleanup_interval_minutes: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            key_strategy: KeyStrategy::Composite,
            key_ttl_seconds: 86_400,
            max_keys: 1_000_000,
            cleanup_interval_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeduplicationConfig {
    pub enabled: bool,
    pub window_seconds: u64,
    pub algorithm: DedupAlgorithm,
    pub max_entries: usize,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: 3_600,
            algorithm: DedupAlgorithm::Sha256,
            max_entries: 500_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcknowledgmentConfig {
    pub required: bool,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub strategy: AcknowledgmentStrategy,
}

impl Default for AcknowledgmentConfig {
    fn default() -> Self {
        Self {
            required: false,
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 5,
            strategy: AcknowledgmentStrategy::AutoOnDeliver,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_seconds: f64,
    pub max_delay_seconds: f64,
    pub backoff_multiplier: f64,
    pub strategy: RetryStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_seconds: 0.5,
            max_delay_seconds: 30.0,
            backoff_multiplier: 2.0,
            strategy: RetryStrategy::ExponentialBackoff,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExactlyOnceConfig {
    pub enabled: bool,
    pub guarantee: DeliveryGuarantee,
    pub idempotency: IdempotencyConfig,
    pub deduplication: DeduplicationConfig,
    pub acknowledgment: AcknowledgmentConfig,
    pub retry: RetryConfig,
    pub max_concurrent_deliveries: usize,
}

impl Default for ExactlyOnceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            guarantee: DeliveryGuarantee::ExactlyOnce,
            idempotency: IdempotencyConfig::default(),
            deduplication: DeduplicationConfig::default(),
            acknowledgment: AcknowledgmentConfig::default(),
            retry: RetryConfig::default(),
            max_concurrent_deliveries: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionalConfig {
    pub max_concurrent_transactions: usize,
    pub default_timeout_seconds: u64,
    pub max_events_per_transaction: usize,
    pub require_exactly_once: bool,
    pub retention_days: u32,
    pub cleanup_interval_minutes: u64,
    pub timeout_processing_interval_minutes: u64,
    pub enable_checksums: bool,
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl Default for TransactionalConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transactions: 1_000,
            default_timeout_seconds: 300,
            max_events_per_transaction: 10_000,
            require_exactly_once: true,
            retention_days: 7,
            cleanup_interval_minutes: 60,
            timeout_processing_interval_minutes: 1,
            enable_checksums: true,
            checksum_algorithm: ChecksumAlgorithm::Sha256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithmType {
    TokenBucket,
    SlidingWindow,
    FixedWindow,
    LeakyBucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TenantPriority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalThrottleConfig {
    pub max_events_per_second: f64,
    pub max_concurrent_connections: usize,
    pub max_concurrent_subscriptions: usize,
    pub max_memory_mb: u64,
    pub max_cpu_usage: f64,
    pub burst_multiplier: f64,
}

impl Default for GlobalThrottleConfig {
    fn default() -> Self {
        Self {
            max_events_per_second: 10_000.0,
            max_concurrent_connections: 500,
            max_concurrent_subscriptions: 2_000,
            max_memory_mb: 4_096,
            max_cpu_usage: 0.85,
            burst_multiplier: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantThrottleConfig {
    pub max_events_per_second: f64,
    pub max_concurrent_connections: usize,
    pub max_concurrent_subscriptions: usize,
    pub max_memory_mb: u64,
    pub max_cpu_usage: f64,
    pub burst_multiplier: f64,
    pub priority: TenantPriority,
}

impl Default for TenantThrottleConfig {
    fn default() -> Self {
        Self {
            max_events_per_second: 100.0,
            max_concurrent_connections: 20,
            max_concurrent_subscriptions: 50,
            max_memory_mb: 256,
            max_cpu_usage: 0.5,
            burst_multiplier: 1.0,
            priority: TenantPriority::Normal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerTenantThrottleConfig {
    pub default: TenantThrottleConfig,
    pub tenant_configs: HashMap<String, TenantThrottleConfig>,
}

impl Default for PerTenantThrottleConfig {
    fn default() -> Self {
        Self {
            default: TenantThrottleConfig::default(),
            tenant_configs: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitAlgorithmConfig {
    #[serde(rename = "type")]
    pub kind: RateLimitAlgorithmType,
    pub window_size_seconds: u64,
    pub number_of_windows: usize,
    pub bucket_size: f64,
    pub refill_rate: f64,
    pub refill_interval_ms: u64,
}

impl Default for RateLimitAlgorithmConfig {
    fn default() -> Self {
        Self {
            kind: RateLimitAlgorithmType::SlidingWindow,
            window_size_seconds: 1,
            number_of_windows: 10,
            bucket_size: 100.0,
            refill_rate: 100.0,
            refill_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottlingConfig {
    pub global: GlobalThrottleConfig,
    pub per_tenant: PerTenantThrottleConfig,
    pub algorithm: RateLimitAlgorithmConfig,
}

impl Default for ThrottlingConfig {
    fn default() -> Self {
        Self {
            global: GlobalThrottleConfig::default(),
            per_tenant: PerTenantThrottleConfig::default(),
            algorithm: RateLimitAlgorithmConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.default_batch_size, cfg.default_batch_size);
        assert_eq!(
            back.exactly_once.idempotency.max_keys,
            cfg.exactly_once.idempotency.max_keys
        );
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let json = r#"{"default_batch_size": 250}"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.default_batch_size, 250);
        assert_eq!(cfg.transactional.retention_days, 7);
    }
}
