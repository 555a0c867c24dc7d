//! Class Policies
//!
//! Defines the bounds a class places on a quantity (volume size or container
//! memory) and the access modes a volume class allows.

use super::quantity::{format_list, Quantity};
use crate::crd::QuantityBoundsSpec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Access Mode
// =============================================================================

/// Volume access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadWriteMany,
    ReadOnlyMany,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::ReadWriteOnce => write!(f, "ReadWriteOnce"),
            AccessMode::ReadWriteMany => write!(f, "ReadWriteMany"),
            AccessMode::ReadOnlyMany => write!(f, "ReadOnlyMany"),
        }
    }
}

/// Render access modes as "[A, B]"
pub fn format_access_modes(modes: &[AccessMode]) -> String {
    let items: Vec<String> = modes.iter().map(ToString::to_string).collect();
    format!("[{}]", items.join(", "))
}

// =============================================================================
// Quantity Bounds
// =============================================================================

/// Constraint a class places on a quantity
///
/// Ranged and enumerated forms are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantityBounds {
    /// Inclusive range; either end may be open
    Range {
        min: Option<Quantity>,
        max: Option<Quantity>,
    },
    /// Only these exact values are allowed
    Values(Vec<Quantity>),
}

/// Why a quantity failed a class's bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsViolation {
    /// Below min or above max of a ranged class
    OutOfRange,
    /// Not a member of an enumerated class
    NotAllowed,
}

impl QuantityBounds {
    /// Check a quantity against these bounds
    pub fn check(&self, quantity: &Quantity) -> Result<(), BoundsViolation> {
        match self {
            QuantityBounds::Range { min, max } => {
                if min.as_ref().is_some_and(|min| quantity < min) {
                    return Err(BoundsViolation::OutOfRange);
                }
                if max.as_ref().is_some_and(|max| quantity > max) {
                    return Err(BoundsViolation::OutOfRange);
                }
                Ok(())
            }
            QuantityBounds::Values(values) => {
                if values.contains(quantity) {
                    Ok(())
                } else {
                    Err(BoundsViolation::NotAllowed)
                }
            }
        }
    }

    /// Human readable form used in error messages
    pub fn describe(&self) -> String {
        match self {
            QuantityBounds::Range { min, max } => format!(
                "[{}, {}]",
                min.as_ref().map(Quantity::as_str).unwrap_or("0"),
                max.as_ref().map(Quantity::as_str).unwrap_or("unbounded"),
            ),
            QuantityBounds::Values(values) => format_list(values),
        }
    }

    /// Whether the bounds accept any quantity
    pub fn is_unbounded(&self) -> bool {
        matches!(self, QuantityBounds::Range { min: None, max: None })
    }
}

// =============================================================================
// Quantity Policy
// =============================================================================

/// Validated bounds plus default for one quantity dimension of a class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantityPolicy {
    pub bounds: QuantityBounds,
    pub default: Option<Quantity>,
}

impl Default for QuantityPolicy {
    fn default() -> Self {
        Self {
            bounds: QuantityBounds::Range {
                min: None,
                max: None,
            },
            default: None,
        }
    }
}

impl QuantityPolicy {
    /// Validate raw class bounds, returning the reason on failure
    pub fn from_spec(spec: &QuantityBoundsSpec) -> Result<Self, String> {
        let parse = |field: &str, value: &Option<String>| -> Result<Option<Quantity>, String> {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(|v| Quantity::parse(v).map_err(|e| format!("{field}: {e}")))
                .transpose()
        };

        let min = parse("min", &spec.min)?;
        let max = parse("max", &spec.max)?;
        let default = parse("default", &spec.default)?;

        let bounds = if spec.values.is_empty() {
            if let (Some(min), Some(max)) = (&min, &max) {
                if min > max {
                    return Err(format!("min {min} is greater than max {max}"));
                }
            }
            QuantityBounds::Range { min, max }
        } else {
            if min.is_some() || max.is_some() {
                return Err("min and max cannot be set together with values".to_string());
            }
            let values = spec
                .values
                .iter()
                .map(|v| Quantity::parse(v).map_err(|e| format!("values: {e}")))
                .collect::<Result<Vec<_>, _>>()?;
            QuantityBounds::Values(values)
        };

        if let Some(default) = &default {
            match bounds.check(default) {
                Ok(()) => {}
                Err(BoundsViolation::OutOfRange) => {
                    return Err(format!(
                        "default {default} is outside {}",
                        bounds.describe()
                    ))
                }
                Err(BoundsViolation::NotAllowed) => {
                    return Err(format!(
                        "default {default} is not one of {}",
                        bounds.describe()
                    ))
                }
            }
        }

        Ok(Self { bounds, default })
    }

    /// Default used when a request omits the quantity
    ///
    /// An explicit default wins; a ranged class falls back to max then min,
    /// an enumerated class to its first value.
    pub fn effective_default(&self) -> Option<&Quantity> {
        if let Some(default) = &self.default {
            return Some(default);
        }
        match &self.bounds {
            QuantityBounds::Range { min, max } => max.as_ref().or(min.as_ref()),
            QuantityBounds::Values(values) => values.first(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity::parse(s).unwrap()
    }

    fn spec(min: Option<&str>, max: Option<&str>, default: Option<&str>, values: &[&str]) -> QuantityBoundsSpec {
        QuantityBoundsSpec {
            min: min.map(String::from),
            max: max.map(String::from),
            default: default.map(String::from),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_range_is_inclusive() {
        let bounds = QuantityBounds::Range {
            min: Some(q("10Gi")),
            max: Some(q("100Gi")),
        };
        assert_eq!(bounds.check(&q("10Gi")), Ok(()));
        assert_eq!(bounds.check(&q("100Gi")), Ok(()));
        assert_eq!(bounds.check(&q("50Gi")), Ok(()));
        assert_eq!(bounds.check(&q("0.5Gi")), Err(BoundsViolation::OutOfRange));
        assert_eq!(bounds.check(&q("150Gi")), Err(BoundsViolation::OutOfRange));
        assert_eq!(
            bounds.check(&Quantity::from_millis(q("10Gi").millis() - 1)),
            Err(BoundsViolation::OutOfRange)
        );
        assert_eq!(
            bounds.check(&Quantity::from_millis(q("100Gi").millis() + 1)),
            Err(BoundsViolation::OutOfRange)
        );
    }

    #[test]
    fn test_values_require_exact_membership() {
        let bounds = QuantityBounds::Values(vec![q("1Gi"), q("2Gi")]);
        assert_eq!(bounds.check(&q("1Gi")), Ok(()));
        assert_eq!(bounds.check(&q("1024Mi")), Ok(()));
        assert_eq!(bounds.check(&q("1.5Gi")), Err(BoundsViolation::NotAllowed));
        assert_eq!(bounds.check(&q("1G")), Err(BoundsViolation::NotAllowed));
    }

    #[test]
    fn test_from_spec_accepts_valid_classes() {
        assert!(QuantityPolicy::from_spec(&spec(None, Some("512Mi"), None, &[])).is_ok());
        assert!(QuantityPolicy::from_spec(&spec(Some("512Mi"), None, None, &[])).is_ok());
        assert!(QuantityPolicy::from_spec(&spec(None, None, Some("512Mi"), &[])).is_ok());
        assert!(QuantityPolicy::from_spec(&spec(None, None, Some("1Gi"), &["1Gi", "2Gi"])).is_ok());
        assert!(QuantityPolicy::from_spec(&spec(None, None, None, &[])).is_ok());
    }

    #[test]
    fn test_from_spec_rejects_invalid_classes() {
        let cases = [
            spec(None, None, Some("invalid"), &[]),
            spec(Some("invalid"), None, None, &[]),
            spec(None, Some("invalid"), None, &[]),
            spec(None, None, None, &["invalid"]),
            spec(Some("512Mi"), None, Some("128Mi"), &[]),
            spec(None, Some("512Mi"), Some("1Gi"), &[]),
            spec(Some("1Gi"), Some("512Mi"), None, &[]),
            spec(None, None, Some("128Mi"), &["512Mi"]),
            spec(Some("512Mi"), Some("4Gi"), None, &["2Gi", "3Gi"]),
        ];
        for case in cases {
            assert!(
                QuantityPolicy::from_spec(&case).is_err(),
                "expected {case:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_effective_default() {
        let policy = QuantityPolicy::from_spec(&spec(Some("512Mi"), Some("1Gi"), None, &[])).unwrap();
        assert_eq!(policy.effective_default(), Some(&q("1Gi")));

        let policy = QuantityPolicy::from_spec(&spec(Some("512Mi"), None, None, &[])).unwrap();
        assert_eq!(policy.effective_default(), Some(&q("512Mi")));

        let policy =
            QuantityPolicy::from_spec(&spec(Some("512Mi"), Some("1Gi"), Some("768Mi"), &[])).unwrap();
        assert_eq!(policy.effective_default(), Some(&q("768Mi")));

        let policy = QuantityPolicy::from_spec(&spec(None, None, None, &["2Gi", "4Gi"])).unwrap();
        assert_eq!(policy.effective_default(), Some(&q("2Gi")));

        assert_eq!(QuantityPolicy::default().effective_default(), None);
    }

    #[test]
    fn test_describe() {
        let bounds = QuantityBounds::Range {
            min: Some(q("1G")),
            max: None,
        };
        assert_eq!(bounds.describe(), "[1G, unbounded]");
        assert_eq!(
            QuantityBounds::Values(vec![q("1Gi"), q("2Gi")]).describe(),
            "[1Gi, 2Gi]"
        );
    }

    #[test]
    fn test_access_mode_display() {
        assert_eq!(AccessMode::ReadWriteOnce.to_string(), "ReadWriteOnce");
        assert_eq!(
            format_access_modes(&[AccessMode::ReadWriteOnce, AccessMode::ReadOnlyMany]),
            "[ReadWriteOnce, ReadOnlyMany]"
        );
    }
}
