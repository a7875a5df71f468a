//! Shared JSON parsing helpers for feed handlers.
//!
//! Feeds commonly encode prices as either JSON strings (`"52.05"`) or native
//! numbers (`52.05`); these helpers normalise both into [`Scalar`]s.

use std::collections::BTreeMap;

use fh_core::{MarketValue, Scalar};

/// Parse a JSON value (string or number) as `f64`.
#[inline]
pub fn parse_str_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        fast_float2::parse::<f64, _>(s).ok()
    } else {
        v.as_f64()
    }
}

/// Convert one JSON field into a [`Scalar`].
///
/// Integers stay integers, numeric strings become numbers, other strings stay
/// text. Nulls, arrays and objects have no scalar form and yield `None`.
pub fn parse_scalar(v: &serde_json::Value) -> Option<Scalar> {
    match v {
        serde_json::Value::Bool(b) => Some(Scalar::Bool(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Some(Scalar::Integer(i)),
            None => n.as_f64().map(Scalar::Number),
        },
        serde_json::Value::String(s) => match parse_str_f64(Some(v)) {
            Some(n) if n.is_finite() => Some(Scalar::Number(n)),
            _ => Some(Scalar::Text(s.clone())),
        },
        _ => None,
    }
}

/// Build a [`MarketValue`] from a JSON object, skipping fields with no scalar form.
pub fn parse_fields(obj: &serde_json::Map<String, serde_json::Value>) -> MarketValue {
    let fields: BTreeMap<String, Scalar> =
        obj.iter().filter_map(|(k, v)| parse_scalar(v).map(|s| (k.clone(), s))).collect();
    MarketValue::new(fields)
}
