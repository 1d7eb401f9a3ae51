//! Runtime-mutable response delay configuration.
//!
//! Every reply is held back by a (possibly randomized) delay before
//! emission, emulating backend latency. A per-port entry takes
//! precedence over the global setting; a disabled port entry and a
//! disabled global setting mean zero delay. Ranges are validated at
//! the configuration boundary and a rejected update leaves the
//! previous configuration in place.

use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info};

/// One delay range, keyed globally or by listening port.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DelayRange {
    pub enabled: bool,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const OFF: DelayRange = DelayRange {
        enabled: false,
        min_ms: 0,
        max_ms: 0,
    };

    fn fixed(ms: u64) -> DelayRange {
        DelayRange {
            enabled: true,
            min_ms: ms,
            max_ms: ms,
        }
    }

    /// Uniform sample from `[min_ms, max_ms]`.
    fn sample(&self) -> u64 {
        if self.min_ms == self.max_ms {
            return self.min_ms;
        }
        rand::thread_rng().gen_range(self.min_ms..=self.max_ms)
    }
}

/// Delay configuration errors.
#[derive(Debug, PartialEq, Eq)]
pub enum DelayError {
    /// `min_ms > max_ms`; the previous configuration is retained.
    InvalidRange { min_ms: u64, max_ms: u64 },
}

impl std::fmt::Display for DelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DelayError::InvalidRange { min_ms, max_ms } => {
                write!(f, "Invalid delay range: {}-{}ms", min_ms, max_ms)
            }
        }
    }
}

impl std::error::Error for DelayError {}

/// Shared delay configuration, one instance per process.
pub struct DelayConfig {
    global: RwLock<DelayRange>,
    ports: RwLock<HashMap<u16, DelayRange>>,
}

impl DelayConfig {
    /// A non-zero default delay enables the global setting as a fixed
    /// range; zero leaves delays off until the management API turns
    /// them on.
    pub fn new(default_delay_ms: u64) -> Self {
        let global = if default_delay_ms > 0 {
            DelayRange::fixed(default_delay_ms)
        } else {
            DelayRange::OFF
        };
        DelayConfig {
            global: RwLock::new(global),
            ports: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the delay for a reply on the given listening port.
    /// Port entry first, then the global fallback, else zero.
    pub fn delay_for_port(&self, port: u16) -> Duration {
        if let Ok(ports) = self.ports.read() {
            if let Some(range) = ports.get(&port) {
                if range.enabled {
                    let ms = range.sample();
                    debug!(port, delay_ms = ms, "Port delay applied");
                    return Duration::from_millis(ms);
                }
                return Duration::ZERO;
            }
        }

        if let Ok(global) = self.global.read() {
            if global.enabled {
                let ms = global.sample();
                debug!(port, delay_ms = ms, "Global delay applied");
                return Duration::from_millis(ms);
            }
        }

        Duration::ZERO
    }

    pub fn set_global_enabled(&self, enabled: bool) {
        if let Ok(mut global) = self.global.write() {
            global.enabled = enabled;
            info!(enabled, "Global delay toggled");
        }
    }

    pub fn set_global_range(&self, min_ms: u64, max_ms: u64) -> Result<(), DelayError> {
        if min_ms > max_ms {
            return Err(DelayError::InvalidRange { min_ms, max_ms });
        }
        if let Ok(mut global) = self.global.write() {
            global.min_ms = min_ms;
            global.max_ms = max_ms;
            info!(min_ms, max_ms, "Global delay range updated");
        }
        Ok(())
    }

    pub fn set_port(
        &self,
        port: u16,
        enabled: bool,
        min_ms: u64,
        max_ms: u64,
    ) -> Result<(), DelayError> {
        if min_ms > max_ms {
            return Err(DelayError::InvalidRange { min_ms, max_ms });
        }
        if let Ok(mut ports) = self.ports.write() {
            ports.insert(
                port,
                DelayRange {
                    enabled,
                    min_ms,
                    max_ms,
                },
            );
            info!(port, enabled, min_ms, max_ms, "Port delay configured");
        }
        Ok(())
    }

    pub fn remove_port(&self, port: u16) {
        if let Ok(mut ports) = self.ports.write() {
            if ports.remove(&port).is_some() {
                info!(port, "Port delay entry removed");
            }
        }
    }

    /// Current configuration for the management API.
    pub fn snapshot(&self) -> DelaySnapshot {
        let global = self.global.read().map(|g| *g).unwrap_or(DelayRange::OFF);
        let ports = self
            .ports
            .read()
            .map(|p| p.clone())
            .unwrap_or_default();
        DelaySnapshot { global, ports }
    }

    /// Apply a bulk JSON update of the form
    /// `{"global":{"enabled":..,"min":..,"max":..},
    ///   "ports":{"18000":{"enabled":..,"min":..,"max":..}}}`.
    /// A disabled port entry removes the per-port override.
    pub fn apply_json(&self, json: &serde_json::Value) -> Result<(), DelayError> {
        if let Some(global) = json.get("global") {
            if let Some(enabled) = global.get("enabled").and_then(|v| v.as_bool()) {
                self.set_global_enabled(enabled);
            }
            if let (Some(min), Some(max)) = (
                global.get("min").and_then(|v| v.as_u64()),
                global.get("max").and_then(|v| v.as_u64()),
            ) {
                self.set_global_range(min, max)?;
            }
        }

        if let Some(ports) = json.get("ports").and_then(|v| v.as_object()) {
            for (key, entry) in ports {
                let Ok(port) = key.parse::<u16>() else {
                    debug!(port = %key, "Skipping unparseable port key");
                    continue;
                };
                let enabled = entry
                    .get("enabled")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                if !enabled {
                    self.remove_port(port);
                    continue;
                }
                let min = entry.get("min").and_then(|v| v.as_u64()).unwrap_or(0);
                let max = entry.get("max").and_then(|v| v.as_u64()).unwrap_or(0);
                self.set_port(port, true, min, max)?;
            }
        }

        Ok(())
    }
}

/// Serializable view of the whole delay configuration.
#[derive(Debug, Serialize)]
pub struct DelaySnapshot {
    pub global: DelayRange,
    pub ports: HashMap<u16, DelayRange>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default() {
        let config = DelayConfig::new(0);
        assert_eq!(config.delay_for_port(18000), Duration::ZERO);
    }

    #[test]
    fn test_default_delay_enables_global() {
        let config = DelayConfig::new(100);
        assert_eq!(config.delay_for_port(18000), Duration::from_millis(100));
    }

    #[test]
    fn test_port_entry_overrides_global() {
        let config = DelayConfig::new(100);
        config.set_port(18000, true, 5, 5).unwrap();
        assert_eq!(config.delay_for_port(18000), Duration::from_millis(5));
        assert_eq!(config.delay_for_port(19000), Duration::from_millis(100));
    }

    #[test]
    fn test_disabled_port_entry_means_no_delay() {
        let config = DelayConfig::new(100);
        config.set_port(18000, false, 0, 0).unwrap();
        assert_eq!(config.delay_for_port(18000), Duration::ZERO);
    }

    #[test]
    fn test_sampled_delay_stays_in_range() {
        let config = DelayConfig::new(0);
        config.set_port(18000, true, 10, 50).unwrap();
        for _ in 0..100 {
            let d = config.delay_for_port(18000);
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(50));
        }
    }

    #[test]
    fn test_invalid_range_rejected_and_previous_kept() {
        let config = DelayConfig::new(0);
        config.set_port(18000, true, 10, 20).unwrap();

        let err = config.set_port(18000, true, 30, 20).unwrap_err();
        assert_eq!(
            err,
            DelayError::InvalidRange {
                min_ms: 30,
                max_ms: 20
            }
        );

        let snap = config.snapshot();
        let entry = snap.ports.get(&18000).unwrap();
        assert_eq!((entry.min_ms, entry.max_ms), (10, 20));
    }

    #[test]
    fn test_invalid_global_range_rejected() {
        let config = DelayConfig::new(50);
        assert!(config.set_global_range(100, 10).is_err());
        assert_eq!(config.delay_for_port(1), Duration::from_millis(50));
    }

    #[test]
    fn test_apply_json_bulk_update() {
        let config = DelayConfig::new(0);
        let json = serde_json::json!({
            "global": {"enabled": true, "min": 10, "max": 10},
            "ports": {
                "18000": {"enabled": true, "min": 1, "max": 1},
                "19000": {"enabled": false}
            }
        });
        config.apply_json(&json).unwrap();
        assert_eq!(config.delay_for_port(18000), Duration::from_millis(1));
        // disabled entry removed, so the port falls back to global
        assert_eq!(config.delay_for_port(19000), Duration::from_millis(10));
    }

    #[test]
    fn test_apply_json_invalid_range_errors() {
        let config = DelayConfig::new(0);
        let json = serde_json::json!({"global": {"min": 50, "max": 10}});
        assert!(config.apply_json(&json).is_err());
    }
}
