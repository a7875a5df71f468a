//! Market data values: the latest field snapshot for one identifier.
//!
//! A [`MarketValue`] is immutable once published. Consumers share it as a
//! [`Value`] (`Arc<MarketValue>`), so handing the same snapshot to the cache,
//! a coalescing slot and a subscriber costs one reference-count bump. A newer
//! value for the same identifier replaces the old one in full; fields are
//! never merged.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A single field value. Untagged, so JSON scalars map onto it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Integer(i64),
    Number(f64),
    Bool(bool),
    Text(String),
}

impl Scalar {
    /// Numeric view of the field. Integers widen to `f64`; text and booleans yield `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Integer(i) => write!(f, "{i}"),
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Number(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Integer(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

/// The field bag for one identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketValue {
    fields: BTreeMap<String, Scalar>,
}

/// Shared handle to a published value.
pub type Value = Arc<MarketValue>;

impl MarketValue {
    pub fn new(fields: BTreeMap<String, Scalar>) -> Self {
        Self { fields }
    }

    /// Convenience constructor for the common single-field case.
    pub fn single(name: &str, value: impl Into<Scalar>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(name.to_string(), value.into());
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&Scalar> {
        self.fields.get(name)
    }

    /// Numeric value of `name`, if present and numeric.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Scalar::as_f64)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Freeze into a shareable [`Value`].
    pub fn into_value(self) -> Value {
        Arc::new(self)
    }
}

impl fmt::Display for MarketValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_scalars_map_to_variants() {
        let json = r#"{"LAST":52.07,"SIZE":100,"VENUE":"XLON","HALTED":false}"#;
        let v: MarketValue = serde_json::from_str(json).unwrap();
        assert_eq!(v.field("LAST"), Some(&Scalar::Number(52.07)));
        assert_eq!(v.field("SIZE"), Some(&Scalar::Integer(100)));
        assert_eq!(v.field("VENUE").and_then(Scalar::as_str), Some("XLON"));
        assert_eq!(v.field("HALTED"), Some(&Scalar::Bool(false)));
        assert_eq!(v.number("SIZE"), Some(100.0));
        assert_eq!(v.number("VENUE"), None);
    }

    #[test]
    fn display_lists_fields_in_key_order() {
        let mut fields = BTreeMap::new();
        fields.insert("BID".to_string(), Scalar::from(52.05));
        fields.insert("ASK".to_string(), Scalar::from(52.1));
        assert_eq!(MarketValue::new(fields).to_string(), "{ASK=52.1, BID=52.05}");
    }

    #[test]
    fn single_field_value() {
        let v = MarketValue::single("LAST", 52.17).into_value();
        assert_eq!(v.len(), 1);
        assert_eq!(v.number("LAST"), Some(52.17));
    }
}
