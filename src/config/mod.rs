use std::env;

use crate::auto_apply::AutoApplyConfig;
use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Orchestrator configuration
    pub orchestrator: OrchestratorConfig,
    /// Auto-apply gate configuration
    pub auto_apply: AutoApplyConfig,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable
    Pretty,
    /// One JSON object per line
    Json,
}

/// Orchestrator execution configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wrap every executor with its agent's timeout/retry policy
    pub enforce_timeouts: bool,
    /// Delay between retries of a failed stage
    pub retry_delay_ms: u64,
    /// Anomaly count after performance analysis that forces a deep run
    pub escalation_anomaly_threshold: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enforce_timeouts: true,
            retry_delay_ms: 250,
            escalation_anomaly_threshold: 3,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let orchestrator = OrchestratorConfig {
            enforce_timeouts: env::var("ORCH_ENFORCE_TIMEOUTS")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
            retry_delay_ms: parse_var("ORCH_RETRY_DELAY_MS")?.unwrap_or(250),
            escalation_anomaly_threshold: parse_var("ORCH_ESCALATION_ANOMALY_THRESHOLD")?
                .unwrap_or(3),
        };

        let auto_apply = AutoApplyConfig::from_env()?;

        let config = Config {
            logging,
            orchestrator,
            auto_apply,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values outside their documented domains.
    pub fn validate(&self) -> Result<(), AppError> {
        if !(0.0..=1.0).contains(&self.auto_apply.min_confidence) {
            return Err(AppError::Config {
                message: format!(
                    "AUTO_APPLY_MIN_CONFIDENCE must be within [0, 1], got {}",
                    self.auto_apply.min_confidence
                ),
            });
        }
        if self.orchestrator.escalation_anomaly_threshold == 0 {
            return Err(AppError::Config {
                message: "ORCH_ESCALATION_ANOMALY_THRESHOLD must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse an optional environment variable, failing on malformed values.
pub(crate) fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, AppError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| AppError::Config {
            message: format!("{} has an invalid value: '{}'", name, raw),
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.orchestrator.enforce_timeouts);
        assert_eq!(config.orchestrator.escalation_anomaly_threshold, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_confidence() {
        let mut config = Config::default();
        config.auto_apply.min_confidence = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("AUTO_APPLY_MIN_CONFIDENCE"));
    }

    #[test]
    fn test_validate_rejects_zero_escalation_threshold() {
        let mut config = Config::default();
        config.orchestrator.escalation_anomaly_threshold = 0;
        assert!(config.validate().is_err());
    }
}
