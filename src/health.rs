// Aggregate health reporting across adapters and publishers, reusing the
// shared `HealthStatus` enum.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::common::HealthStatus;

#[derive(Debug, Clone)]
pub struct StreamHealth {
    pub status: HealthStatus,
    pub last_error: Option<String>,
    pub lag_seconds: Option<f64>,
}

impl Default for StreamHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_error: None,
            lag_seconds: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub first_unhealthy_stream: Option<String>,
    pub last_error: Option<String>,
    pub lag_seconds: Option<f64>,
}

/// Tracks health per adapter and per publisher, and rolls them up into one
/// overall status: the worst-ranked status among all components.
#[derive(Default)]
pub struct HealthRegistry {
    adapters: RwLock<HashMap<String, StreamHealth>>,
    publishers: RwLock<HashMap<String, StreamHealth>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_adapter(&self, name: &str, status: HealthStatus, last_error: Option<String>, lag_seconds: Option<f64>) {
        self.adapters.write().insert(
            name.to_string(),
            StreamHealth {
                status,
                last_error,
                lag_seconds,
            },
        );
    }

    pub fn report_publisher(&self, name: &str, status: HealthStatus, last_error: Option<String>) {
        self.publishers.write().insert(
            name.to_string(),
            StreamHealth {
                status,
                last_error,
                lag_seconds: None,
            },
        );
    }

    pub fn adapter_health(&self, name: &str) -> Option<StreamHealth> {
        self.adapters.read().get(name).cloned()
    }

    pub fn publisher_health(&self, name: &str) -> Option<StreamHealth> {
        self.publishers.read().get(name).cloned()
    }

    /// Aggregate into one `HealthReport`: overall status is the worst
    /// status across every tracked adapter and publisher; the first
    /// unhealthy stream encountered (by name) is reported alongside its
    /// error and lag.
    pub fn aggregate(&self) -> HealthReport {
        let adapters = self.adapters.read();
        let publishers = self.publishers.read();

        let mut overall = HealthStatus::Healthy;
        let mut first_unhealthy_stream = None;
        let mut last_error = None;
        let mut lag_seconds = None;

        let mut names: Vec<&String> = adapters.keys().collect();
        names.sort();
        for name in names {
            let health = &adapters[name];
            if health.status > overall {
                overall = health.status;
            }
            if health.status != HealthStatus::Healthy && first_unhealthy_stream.is_none() {
                first_unhealthy_stream = Some(name.clone());
                last_error = health.last_error.clone();
                lag_seconds = health.lag_seconds;
            }
        }

        let mut pub_names: Vec<&String> = publishers.keys().collect();
        pub_names.sort();
        for name in pub_names {
            let health = &publishers[name];
            if health.status > overall {
                overall = health.status;
            }
            if health.status != HealthStatus::Healthy && first_unhealthy_stream.is_none() {
                first_unhealthy_stream = Some(name.clone());
                last_error = health.last_error.clone();
            }
        }

        HealthReport {
            overall,
            first_unhealthy_stream,
            last_error,
            lag_seconds,
        }
    }
}
