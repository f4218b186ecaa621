//! Canonical JSON serialization for signed payloads.
//!
//! The bytes fed to the signer must be reproducible by any independent
//! implementation: object keys sorted lexicographically, integers in plain
//! decimal, strings escaped per JSON, no insignificant whitespace, and no
//! floating-point numbers at all (a float would make byte-identical output
//! depend on formatting internals).

use serde_json::Value;

use crate::error::SignalError;

/// Render a JSON value in canonical form.
pub fn canonical_json(value: &Value) -> Result<String, SignalError> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut String) -> Result<(), SignalError> {
    match value {
        Value::Null => {
            out.push_str("null");
            Ok(())
        }
        Value::Bool(b) => {
            out.push_str(if *b { "true" } else { "false" });
            Ok(())
        }
        Value::Number(n) => {
            if n.as_i64().is_none() && n.as_u64().is_none() {
                return Err(SignalError::Serialization(format!(
                    "non-integer number {n} is not canonicalizable"
                )));
            }
            out.push_str(&n.to_string());
            Ok(())
        }
        Value::String(s) => {
            // serde_json escapes strings exactly as RFC 8259 requires.
            out.push_str(
                &serde_json::to_string(s)
                    .map_err(|e| SignalError::Serialization(e.to_string()))?,
            );
            Ok(())
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
            Ok(())
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(
                    &serde_json::to_string(key)
                        .map_err(|e| SignalError::Serialization(e.to_string()))?,
                );
                out.push(':');
                write_value(&map[key.as_str()], out)?;
            }
            out.push('}');
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_and_whitespace_free() {
        let value = json!({"b": 1, "a": {"z": true, "y": null}, "c": [1, 2]});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"a":{"y":null,"z":true},"b":1,"c":[1,2]}"#
        );
    }

    #[test]
    fn output_is_independent_of_insertion_order() {
        let mut forward = serde_json::Map::new();
        forward.insert("alpha".into(), json!(1));
        forward.insert("beta".into(), json!("x"));

        let mut reverse = serde_json::Map::new();
        reverse.insert("beta".into(), json!("x"));
        reverse.insert("alpha".into(), json!(1));

        assert_eq!(
            canonical_json(&Value::Object(forward)).unwrap(),
            canonical_json(&Value::Object(reverse)).unwrap()
        );
    }

    #[test]
    fn strings_are_escaped() {
        let value = json!({"msg": "a \"quote\" and \\ backslash"});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"msg":"a \"quote\" and \\ backslash"}"#
        );
    }

    #[test]
    fn floats_are_rejected() {
        let err = canonical_json(&json!({"x": 1.5})).unwrap_err();
        assert!(matches!(err, SignalError::Serialization(_)));
    }

    #[test]
    fn integers_render_in_decimal() {
        let value = json!({"big": 9007199254740993i64, "neg": -42});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"big":9007199254740993,"neg":-42}"#
        );
    }

    proptest::proptest! {
        /// Canonical output depends only on logical content, never on the
        /// order fields were inserted.
        #[test]
        fn canonical_is_order_independent(
            entries in proptest::collection::btree_map("[a-z]{1,8}", -1000i64..1000, 1..8)
        ) {
            let pairs: Vec<(String, i64)> = entries.into_iter().collect();
            let mut forward = serde_json::Map::new();
            for (key, value) in &pairs {
                forward.insert(key.clone(), json!(value));
            }
            let mut reverse = serde_json::Map::new();
            for (key, value) in pairs.iter().rev() {
                reverse.insert(key.clone(), json!(value));
            }
            proptest::prop_assert_eq!(
                canonical_json(&Value::Object(forward)).unwrap(),
                canonical_json(&Value::Object(reverse)).unwrap()
            );
        }
    }
}
