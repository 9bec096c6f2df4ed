//! Normalization of authored property values into the engine's string form.
//!
//! Node properties are stored as raw strings so the template resolver can operate on
//! every value uniformly. Scalars are stringified; structured values become compact
//! JSON text that handlers parse on demand.

use serde_yaml::Value as YamlValue;

/// Converts an authored YAML value into its property string.
///
/// Returns `None` for `null`, which callers treat as an absent property.
pub fn property_text(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::Null => None,
        YamlValue::String(text) => Some(text.clone()),
        YamlValue::Bool(flag) => Some(flag.to_string()),
        YamlValue::Number(number) => Some(number.to_string()),
        YamlValue::Tagged(tagged) => property_text(&tagged.value),
        structured => Some(serde_json::to_string(structured).unwrap_or_default()),
    }
}

/// Interprets a resolved property as a boolean flag.
///
/// Accepts `true`, `yes`, `1` and `on` (case-insensitive); everything else is false.
pub fn is_truthy_flag(value: Option<&str>) -> bool {
    value
        .map(|text| matches!(text.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_become_plain_text() {
        assert_eq!(property_text(&YamlValue::from(3)), Some("3".to_string()));
        assert_eq!(property_text(&YamlValue::from(true)), Some("true".to_string()));
        assert_eq!(property_text(&YamlValue::from("abc")), Some("abc".to_string()));
        assert_eq!(property_text(&YamlValue::Null), None);
    }

    #[test]
    fn mappings_become_json_text() {
        let value: YamlValue = serde_yaml::from_str("{ a: 1, b: [x, y] }").expect("yaml");
        assert_eq!(property_text(&value), Some(r#"{"a":1,"b":["x","y"]}"#.to_string()));
    }

    #[test]
    fn truthy_flags() {
        assert!(is_truthy_flag(Some("TRUE")));
        assert!(is_truthy_flag(Some(" yes ")));
        assert!(!is_truthy_flag(Some("false")));
        assert!(!is_truthy_flag(None));
    }
}
