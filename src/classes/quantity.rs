//! Resource Quantities
//!
//! Parses human-readable size and memory literals ("512Mi", "1G", "0.5Gi",
//! "250m") into an exact, comparable representation. Values are normalized
//! to thousandths of the base unit so binary, decimal and milli suffixes can
//! be compared without floating point error.

use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Constants
// =============================================================================

/// Bytes in one GiB
pub const GIB: i128 = 1 << 30;

/// Scale of the internal representation (thousandths of the base unit)
const MILLI: i128 = 1000;

/// Longest magnitude accepted, keeps every supported suffix inside i128
const MAX_DIGITS: usize = 18;

/// Supported suffixes and their multipliers, longest first so "Mi" wins over "M"
const SUFFIXES: &[(&str, i128)] = &[
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("Ei", 1 << 60),
    ("k", 1_000),
    ("K", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

// =============================================================================
// Quantity
// =============================================================================

/// A parsed resource quantity
///
/// Equality and ordering use the normalized value only, so `1Gi == 1024Mi`.
/// The literal it was parsed from is kept for display and serialization.
#[derive(Debug, Clone)]
pub struct Quantity {
    /// Value in thousandths of the base unit (bytes, or CPU cores)
    millis: i128,
    /// Canonical textual form
    repr: String,
}

impl Quantity {
    /// Parse a quantity literal
    pub fn parse(input: &str) -> Result<Self> {
        let literal = input.trim();
        if literal.is_empty() {
            return Err(invalid(input, "empty quantity"));
        }
        if literal.starts_with('-') {
            return Err(invalid(input, "quantities must not be negative"));
        }
        let literal = literal.strip_prefix('+').unwrap_or(literal);

        let split = literal
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(literal.len());
        let (number, suffix) = literal.split_at(split);

        let (whole, fraction) = match number.split_once('.') {
            Some((w, f)) => (w, f),
            None => (number, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid(input, "missing numeric magnitude"));
        }
        if fraction.contains('.') {
            return Err(invalid(input, "more than one decimal point"));
        }
        if whole.len() + fraction.len() > MAX_DIGITS {
            return Err(invalid(input, "magnitude too large"));
        }

        let digits = format!("{whole}{fraction}");
        let mantissa: i128 = digits
            .parse()
            .map_err(|_| invalid(input, "invalid numeric magnitude"))?;
        let divisor = 10i128.pow(fraction.len() as u32);

        // "m" scales down to thousandths; every other suffix scales up
        let numerator = if suffix == "m" {
            mantissa
        } else {
            let multiplier = match suffix {
                "" => 1,
                s => SUFFIXES
                    .iter()
                    .find(|(name, _)| *name == s)
                    .map(|(_, m)| *m)
                    .ok_or_else(|| invalid(input, &format!("unknown unit suffix {s:?}")))?,
            };
            mantissa
                .checked_mul(multiplier)
                .and_then(|v| v.checked_mul(MILLI))
                .ok_or_else(|| invalid(input, "magnitude too large"))?
        };

        // Sub-milli precision rounds up, matching Kubernetes quantities
        let mut millis = numerator / divisor;
        if numerator % divisor != 0 {
            millis += 1;
        }

        Ok(Self {
            millis,
            repr: format!("{number}{suffix}"),
        })
    }

    /// Build a quantity from thousandths of the base unit, rendered with the "m" suffix
    pub fn from_millis(millis: i128) -> Self {
        Self {
            millis,
            repr: format!("{millis}m"),
        }
    }

    /// Build a quantity from whole base units (bytes)
    ///
    /// Rendered with the largest suffix that divides it exactly, decimal
    /// suffixes first, so 10_000_000_000 displays as "10G".
    pub fn from_value(value: i128) -> Self {
        let suffix = SUFFIXES
            .iter()
            .rev()
            .filter(|(name, _)| *name != "k")
            .find(|(_, m)| value != 0 && value % m == 0 && value >= *m);
        let repr = match suffix {
            Some((name, m)) => format!("{}{}", value / m, name),
            None => value.to_string(),
        };
        Self {
            millis: value * MILLI,
            repr,
        }
    }

    /// Value in thousandths of the base unit
    #[inline]
    pub fn millis(&self) -> i128 {
        self.millis
    }

    /// Value in whole base units, rounded up
    pub fn value(&self) -> i128 {
        (self.millis + MILLI - 1) / MILLI
    }

    /// Value expressed in GiB (memory)
    pub fn as_gib(&self) -> f64 {
        self.millis as f64 / (GIB * MILLI) as f64
    }

    /// Whether the quantity is zero
    pub fn is_zero(&self) -> bool {
        self.millis == 0
    }

    /// Literal form of this quantity
    pub fn as_str(&self) -> &str {
        &self.repr
    }

    /// Kubernetes form; Kubernetes only spells the kilo suffix lowercase
    pub fn to_k8s(&self) -> K8sQuantity {
        match self.repr.strip_suffix('K') {
            Some(number) => K8sQuantity(format!("{number}k")),
            None => K8sQuantity(self.repr.clone()),
        }
    }
}

fn invalid(value: &str, reason: &str) -> Error {
    Error::InvalidQuantity {
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.millis == other.millis
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.millis.cmp(&other.millis)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl FromStr for Quantity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Quantity {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.repr)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Quantity::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for Quantity {
    fn schema_name() -> String {
        "Quantity".to_string()
    }

    fn json_schema(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        schemars::schema::Schema::Object(schemars::schema::SchemaObject {
            instance_type: Some(schemars::schema::InstanceType::String.into()),
            metadata: Some(Box::new(schemars::schema::Metadata {
                description: Some(
                    "Resource quantity such as 512Mi, 10Gi, 1G or 250m".to_string(),
                ),
                ..Default::default()
            })),
            ..Default::default()
        })
    }
}

/// Render a list of quantities as "[a, b, c]"
pub fn format_list(values: &[Quantity]) -> String {
    let items: Vec<&str> = values.iter().map(Quantity::as_str).collect();
    format!("[{}]", items.join(", "))
}
