//! Dotted-path lookup against the caller's data context.

use serde_json::Value;

static EMPTY: Value = Value::String(String::new());

/// Look up `path` in `context`. Missing segments, nulls and non-container
/// intermediates all resolve to the empty string; this never fails.
///
/// A path that is itself a top-level key (`"logo.width"`) wins over the
/// dotted walk. Array elements are addressed by index (`items.0.name`).
pub fn resolve<'a>(path: &str, context: &'a Value) -> &'a Value {
    lookup(path, context).unwrap_or(&EMPTY)
}

fn lookup<'a>(path: &str, context: &'a Value) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    if let Some(direct) = context.as_object().and_then(|map| map.get(path)) {
        return non_null(direct);
    }

    let mut current = context;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    non_null(current)
}

fn non_null(value: &Value) -> Option<&Value> {
    if value.is_null() { None } else { Some(value) }
}

/// Render a value the way it appears in document text.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Loose truthiness: null, false, 0, NaN and "" are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric view of a value: numbers as-is, strings parsed after trimming
/// (empty string is 0), booleans as 0/1, anything else NaN.
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() { 0.0 } else { s.parse().unwrap_or(f64::NAN) }
        }
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Null => 0.0,
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// Leading integer of a value, like `parseInt`: `"300px"` is 300.
pub fn parse_leading_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim_start();
            let (sign, digits) = match s.strip_prefix('-') {
                Some(rest) => (-1, rest),
                None => (1, s.strip_prefix('+').unwrap_or(s)),
            };
            let end = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            digits[..end].parse::<i64>().ok().map(|n| sign * n)
        }
        _ => None,
    }
}

/// Leading float of a string, like `parseFloat`: `" 12.5kg"` is 12.5.
pub fn parse_leading_float(text: &str) -> f64 {
    let text = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_digit = false;
    for (i, c) in text.char_indices() {
        match c {
            '+' | '-' if i == 0 => {}
            '.' if !seen_dot => seen_dot = true,
            c if c.is_ascii_digit() => seen_digit = true,
            _ => break,
        }
        end = i + c.len_utf8();
    }
    if !seen_digit {
        return f64::NAN;
    }
    text[..end].trim_end_matches('.').parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_paths() {
        let data = json!({"invoice": {"number": "INV-1", "lines": [{"name": "A"}]}});
        assert_eq!(resolve("invoice.number", &data), &json!("INV-1"));
        assert_eq!(resolve("invoice.lines.0.name", &data), &json!("A"));
        assert_eq!(resolve("invoice", &data)["number"], json!("INV-1"));
    }

    #[test]
    fn missing_paths_are_empty_string() {
        let data = json!({"a": {"b": null}, "n": 5});
        for path in ["x", "a.b", "a.b.c", "n.value", "", "a.c.d.e", "a.0"] {
            assert_eq!(resolve(path, &data), &json!(""), "path {path:?}");
        }
        assert_eq!(resolve("a", &Value::Null), &json!(""));
    }

    #[test]
    fn literal_key_takes_precedence() {
        let data = json!({"logo.width": 300, "logo": {"width": 100}});
        assert_eq!(resolve("logo.width", &data), &json!(300));
    }

    #[test]
    fn stringify_matches_document_rendering() {
        assert_eq!(stringify(&json!(3)), "3");
        assert_eq!(stringify(&json!(3.0)), "3");
        assert_eq!(stringify(&json!(2.5)), "2.5");
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&json!(null)), "");
        assert_eq!(stringify(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!(false)));
        assert!(truthy(&json!("0")));
        assert!(truthy(&json!([])));
    }

    #[test]
    fn leading_numbers() {
        assert_eq!(parse_leading_int(&json!("300px")), Some(300));
        assert_eq!(parse_leading_int(&json!(" -4")), Some(-4));
        assert_eq!(parse_leading_int(&json!("wide")), None);
        assert_eq!(parse_leading_int(&json!(12.9)), Some(12));
        assert_eq!(parse_leading_float("12.5kg"), 12.5);
        assert_eq!(parse_leading_float("-3"), -3.0);
        assert!(parse_leading_float("abc").is_nan());
    }
}
