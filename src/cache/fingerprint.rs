// Request fingerprinting.
// Derives a stable hash from request parameters to detect unchanged queries.

use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

// Largest magnitude below which every integral f64 is exact.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Compute the fingerprint of a parameter value.
///
/// Object keys are sorted and `null` members are dropped, so key order and
/// absent-vs-null fields never change the result. Arrays keep their order.
/// A top-level `null` is treated as an empty parameter set.
pub fn fingerprint(value: &Value) -> String {
    let mut canonical = String::new();
    match value {
        Value::Null => canonical.push_str("{}"),
        other => write_canonical(other, &mut canonical),
    }

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Write the canonical text form of a JSON value.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> =
                map.iter().filter(|(_, v)| !v.is_null()).collect();
            members.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, member)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(member, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Number(number) => out.push_str(&canonical_number(number)),
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Integral floats render as integers so `10` and `10.0` hash alike.
fn canonical_number(number: &Number) -> String {
    match number.as_f64() {
        Some(f) if number.is_f64() && f.fract() == 0.0 && f.abs() < MAX_EXACT_INTEGER => {
            (f as i64).to_string()
        }
        _ => number.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        assert_eq!(
            fingerprint(&json!({"a": 1, "b": 2})),
            fingerprint(&json!({"b": 2, "a": 1}))
        );
    }

    #[test]
    fn test_extra_key_changes_fingerprint() {
        assert_ne!(
            fingerprint(&json!({"a": 1})),
            fingerprint(&json!({"a": 1, "b": 2}))
        );
    }

    #[test]
    fn test_null_members_equal_omitted() {
        assert_eq!(
            fingerprint(&json!({"a": 1, "b": null})),
            fingerprint(&json!({"a": 1}))
        );
        assert_eq!(fingerprint(&Value::Null), fingerprint(&json!({})));
    }

    #[test]
    fn test_nested_objects_are_canonical() {
        assert_eq!(
            fingerprint(&json!({"filter": {"x": [1, 2], "y": "z"}, "org": "o1"})),
            fingerprint(&json!({"org": "o1", "filter": {"y": "z", "x": [1, 2]}}))
        );
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(
            fingerprint(&json!({"ids": [1, 2]})),
            fingerprint(&json!({"ids": [2, 1]}))
        );
    }

    #[test]
    fn test_value_types_are_distinguished() {
        assert_ne!(fingerprint(&json!({"a": 1})), fingerprint(&json!({"a": "1"})));
    }

    #[test]
    fn test_integral_floats_match_integers() {
        assert_eq!(
            fingerprint(&json!({"limit": 10})),
            fingerprint(&json!({"limit": 10.0}))
        );
        assert_eq!(fingerprint(&json!([-3])), fingerprint(&json!([-3.0])));
        assert_ne!(
            fingerprint(&json!({"limit": 10})),
            fingerprint(&json!({"limit": 10.5}))
        );
    }
}
