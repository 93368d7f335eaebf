//! Bridge configuration, validation, and error types.
//!
//! [`BridgeConfig`] is the input for [`Bridge::new`](crate::Bridge::new).
//! [`validate()`](BridgeConfig::validate) checks it before any thread is
//! spawned.

use thiserror::Error;

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected during [`BridgeConfig::validate()`].
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    /// The log queue must hold at least one message.
    #[error("log_queue_capacity must be at least 1")]
    LogQueueZero,
    /// start_time is NaN or infinite.
    #[error("start_time must be finite, got {value}")]
    InvalidStartTime {
        /// The invalid value.
        value: f64,
    },
    /// stop_time is NaN, infinite, or earlier than start_time.
    #[error("stop_time must be finite and not before start_time ({start}), got {value}")]
    InvalidStopTime {
        /// The invalid value.
        value: f64,
        /// The configured start time.
        start: f64,
    },
    /// tolerance is NaN, infinite, zero, or negative.
    #[error("tolerance must be finite and positive, got {value}")]
    InvalidTolerance {
        /// The invalid value.
        value: f64,
    },
    /// The kernel thread name is empty or contains a NUL byte.
    #[error("invalid kernel thread name {name:?}")]
    InvalidThreadName {
        /// The rejected name.
        name: String,
    },
}

// ── BridgeConfig ───────────────────────────────────────────────────

/// Configuration for one bridged kernel instance.
#[derive(Clone, Debug, PartialEq)]
pub struct BridgeConfig {
    /// Instance name, used for the kernel thread name and log fields.
    pub instance_name: String,
    /// Simulated start time in seconds. Default: 0.
    pub start_time: f64,
    /// Simulated stop time in seconds, if the master declared one.
    pub stop_time: Option<f64>,
    /// Relative tolerance requested by the master. Recorded, not used by
    /// the bridge itself.
    pub tolerance: Option<f64>,
    /// Maximum kernel log messages buffered between master calls.
    /// Default: 256. The oldest message is dropped when full.
    pub log_queue_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            instance_name: "baton".to_string(),
            start_time: 0.0,
            stop_time: None,
            tolerance: None,
            log_queue_capacity: 256,
        }
    }
}

impl BridgeConfig {
    /// Default configuration for a named instance.
    pub fn named(instance_name: &str) -> Self {
        Self {
            instance_name: instance_name.to_string(),
            ..Self::default()
        }
    }

    /// Name given to the kernel thread.
    pub fn thread_name(&self) -> String {
        format!("baton-kernel-{}", self.instance_name)
    }

    /// Validate all invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_queue_capacity == 0 {
            return Err(ConfigError::LogQueueZero);
        }
        if !self.start_time.is_finite() {
            return Err(ConfigError::InvalidStartTime {
                value: self.start_time,
            });
        }
        if let Some(stop) = self.stop_time {
            if !stop.is_finite() || stop < self.start_time {
                return Err(ConfigError::InvalidStopTime {
                    value: stop,
                    start: self.start_time,
                });
            }
        }
        if let Some(tol) = self.tolerance {
            if !tol.is_finite() || tol <= 0.0 {
                return Err(ConfigError::InvalidTolerance { value: tol });
            }
        }
        if self.instance_name.is_empty() || self.instance_name.contains('\0') {
            return Err(ConfigError::InvalidThreadName {
                name: self.instance_name.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(BridgeConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_log_queue_fails() {
        let cfg = BridgeConfig {
            log_queue_capacity: 0,
            ..BridgeConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::LogQueueZero));
    }

    #[test]
    fn stop_before_start_fails() {
        let cfg = BridgeConfig {
            start_time: 100.0,
            stop_time: Some(50.0),
            ..BridgeConfig::default()
        };
        match cfg.validate() {
            Err(ConfigError::InvalidStopTime { value, start }) => {
                assert_eq!(value, 50.0);
                assert_eq!(start, 100.0);
            }
            other => panic!("expected InvalidStopTime, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_times_fail() {
        let cfg = BridgeConfig {
            start_time: f64::NAN,
            ..BridgeConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidStartTime { .. })
        ));

        let cfg = BridgeConfig {
            stop_time: Some(f64::INFINITY),
            ..BridgeConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidStopTime { .. })
        ));
    }

    #[test]
    fn non_positive_tolerance_fails() {
        for tol in [0.0, -1e-6, f64::NAN] {
            let cfg = BridgeConfig {
                tolerance: Some(tol),
                ..BridgeConfig::default()
            };
            assert!(matches!(
                cfg.validate(),
                Err(ConfigError::InvalidTolerance { .. })
            ));
        }
    }

    #[test]
    fn empty_instance_name_fails() {
        let cfg = BridgeConfig::named("");
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidThreadName { .. })
        ));
        assert_eq!(BridgeConfig::named("zone").thread_name(), "baton-kernel-zone");
    }
}
