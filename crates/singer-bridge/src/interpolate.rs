use serde_json::Value;
use std::collections::BTreeMap;

/// Substitutes `{NAME}` placeholders in every string leaf of `value` using `values`.
/// Recurses into objects and arrays; non-string leaves (numbers, bools, null) pass
/// through untouched. A placeholder whose name isn't in `values` is left as-is,
/// same as the original `str.format` behavior when a key is missing is avoided by
/// only ever substituting names we actually have.
pub fn interpolate(value: &Value, values: &BTreeMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_str(s, values)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| interpolate(v, values)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, values)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn interpolate_str(s: &str, values: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            out.push_str(rest);
            return out;
        };
        let close = open + close;
        let name = &rest[open + 1..close];
        out.push_str(&rest[..open]);
        match values.get(name) {
            Some(value) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_string_leaves() {
        let config = json!({
            "key1": "value1",
            "key2": "Hello {WORLD}",
        });
        let result = interpolate(&config, &values(&[("WORLD", "world")]));
        assert_eq!(
            result,
            json!({
                "key1": "value1",
                "key2": "Hello world",
            })
        );
    }

    #[test]
    fn recurses_into_nested_structures() {
        let config = json!({
            "nested": {
                "list": ["{A}", "{B}", 3, null, true],
            },
        });
        let result = interpolate(&config, &values(&[("A", "a"), ("B", "b")]));
        assert_eq!(
            result,
            json!({
                "nested": {
                    "list": ["a", "b", 3, null, true],
                },
            })
        );
    }

    #[test]
    fn leaves_unknown_placeholders_untouched() {
        let config = json!("{KNOWN} and {UNKNOWN}");
        let result = interpolate(&config, &values(&[("KNOWN", "yes")]));
        assert_eq!(result, json!("yes and {UNKNOWN}"));
    }

    #[test]
    fn non_string_leaves_pass_through() {
        let config = json!({"a": 1, "b": false, "c": null});
        let result = interpolate(&config, &BTreeMap::new());
        assert_eq!(result, config);
    }
}
