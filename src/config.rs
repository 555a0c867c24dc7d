//! Operator Configuration
//!
//! `ResolverConfig` holds the platform-level policy the resolvers fall back
//! to; `OperatorConfig` holds runtime settings for the controller and API.

use crate::classes::Quantity;
use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;

// =============================================================================
// Resolver Configuration
// =============================================================================

/// Platform defaults passed to the resolvers alongside the class snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    /// Memory for containers whose class has no bounds, or that have no class
    pub workload_memory_default: Option<Quantity>,
    /// Upper limit on memory for containers without a class
    pub workload_memory_maximum: Option<Quantity>,
    /// Size for volumes whose class has no bounds, or that have no class
    pub default_volume_size: Quantity,
    /// Resolve against the platform defaults when no class applies
    pub allow_unclassed: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            workload_memory_default: None,
            workload_memory_maximum: None,
            default_volume_size: Quantity::from_value(10_000_000_000),
            allow_unclassed: false,
        }
    }
}

impl ResolverConfig {
    /// Build from CLI literals
    pub fn from_literals(
        workload_memory_default: Option<&str>,
        workload_memory_maximum: Option<&str>,
        default_volume_size: &str,
        allow_unclassed: bool,
    ) -> Result<Self> {
        let parse = |flag: &str, value: &str| {
            Quantity::parse(value)
                .map_err(|e| Error::Configuration(format!("--{flag}: {e}")))
        };

        let config = Self {
            workload_memory_default: workload_memory_default
                .map(|v| parse("workload-memory-default", v))
                .transpose()?,
            workload_memory_maximum: workload_memory_maximum
                .map(|v| parse("workload-memory-maximum", v))
                .transpose()?,
            default_volume_size: parse("default-volume-size", default_volume_size)?,
            allow_unclassed,
        };

        if let (Some(default), Some(maximum)) =
            (&config.workload_memory_default, &config.workload_memory_maximum)
        {
            if default > maximum {
                return Err(Error::Configuration(format!(
                    "workload memory default {default} exceeds maximum {maximum}"
                )));
            }
        }
        if config.default_volume_size.is_zero() {
            return Err(Error::Configuration(
                "default volume size must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }
}

// =============================================================================
// Operator Configuration
// =============================================================================

/// Runtime settings for the operator process
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// API (health, metrics, webhook, diagnostics) bind address
    pub api_addr: SocketAddr,
    /// Restrict application instance watches to one namespace
    pub watch_namespace: Option<String>,
    /// Periodic requeue of converged instances
    pub resync_interval: Duration,
    /// Platform resolution defaults
    pub resolver: ResolverConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            api_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            watch_namespace: None,
            resync_interval: Duration::from_secs(300),
            resolver: ResolverConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_volume_size() {
        let config = ResolverConfig::default();
        assert_eq!(config.default_volume_size, Quantity::parse("10G").unwrap());
        assert_eq!(config.default_volume_size.to_string(), "10G");
        assert!(!config.allow_unclassed);
    }

    #[test]
    fn test_from_literals() {
        let config = ResolverConfig::from_literals(Some("512Mi"), Some("4Gi"), "5Gi", true).unwrap();
        assert_eq!(
            config.workload_memory_default,
            Some(Quantity::parse("512Mi").unwrap())
        );
        assert_eq!(config.default_volume_size.to_string(), "5Gi");
        assert!(config.allow_unclassed);
    }

    #[test]
    fn test_from_literals_rejects_bad_values() {
        assert_matches!(
            ResolverConfig::from_literals(Some("lots"), None, "10G", false),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            ResolverConfig::from_literals(Some("8Gi"), Some("4Gi"), "10G", false),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            ResolverConfig::from_literals(None, None, "0", false),
            Err(Error::Configuration(_))
        );
    }
}
