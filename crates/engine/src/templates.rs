//! # Template Resolution
//!
//! Node properties may embed `{{ ... }}` placeholders that are substituted from the
//! run's variables before a handler reads them.
//!
//! ## Token syntax
//!
//! - `{{name}}`: the variable's raw text, or an empty string when undefined.
//! - `{{name.key.other}}`, `{{name[0]}}`, `{{name[idx]}}`: the variable is parsed as
//!   JSON and walked. A bracket holding a variable name uses that variable's value as
//!   the index.
//! - `{{...:json}}`: the value is escaped for embedding inside a JSON string literal.
//!
//! Resolution is best effort. Lookups return `Option` internally and the public
//! resolver collapses `None` to an empty string, so a missing variable, invalid JSON or
//! an out-of-range index never raises an error. Token bodies that are not references
//! (for example `{{ a + b }}`) are kept verbatim.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::context::ExecutionContext;

static REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][\w-]*)((?:\.[\w-]+|\[\s*[\w-]+\s*\])*)(:json)?$").expect("reference pattern compiles")
});
static SEGMENT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.([\w-]+)|\[\s*([\w-]+)\s*\]").expect("segment pattern compiles"));

/// One step of a reference path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object key, or an array index written with dot syntax (`items.0`).
    Key(String),
    /// Literal bracket index (`items[2]`).
    Index(usize),
    /// Bracket index taken from another variable (`items[i]`).
    Variable(String),
}

/// Parsed body of a `{{ ... }}` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateReference {
    pub variable: String,
    pub path: Vec<PathSegment>,
    pub json_escape: bool,
}

impl TemplateReference {
    /// Parses a token body such as `items[0].name:json`.
    ///
    /// Returns `None` when the body is not a variable reference.
    pub fn parse(body: &str) -> Option<Self> {
        let captures = REFERENCE_PATTERN.captures(body.trim())?;
        let variable = captures.get(1)?.as_str().to_string();
        let path_text = captures.get(2).map(|path| path.as_str()).unwrap_or_default();
        let json_escape = captures.get(3).is_some();

        let path = SEGMENT_PATTERN
            .captures_iter(path_text)
            .filter_map(|segment| {
                if let Some(key) = segment.get(1) {
                    return Some(PathSegment::Key(key.as_str().to_string()));
                }
                let inner = segment.get(2)?.as_str();
                Some(match inner.parse::<usize>() {
                    Ok(index) => PathSegment::Index(index),
                    Err(_) => PathSegment::Variable(inner.to_string()),
                })
            })
            .collect();

        Some(Self {
            variable,
            path,
            json_escape,
        })
    }

    /// Looks the reference up without applying the `:json` modifier.
    pub fn lookup(&self, context: &ExecutionContext) -> Option<String> {
        let raw = context.get(&self.variable)?;
        if self.path.is_empty() {
            return Some(raw.to_string());
        }

        let root: Value = serde_json::from_str(raw).ok()?;
        let mut current = &root;
        for segment in &self.path {
            current = match segment {
                PathSegment::Key(key) => match current {
                    Value::Object(map) => map.get(key)?,
                    Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                    _ => return None,
                },
                PathSegment::Index(index) => current.as_array()?.get(*index)?,
                PathSegment::Variable(name) => {
                    let index = context.get(name)?.trim().parse::<usize>().ok()?;
                    current.as_array()?.get(index)?
                }
            };
        }

        Some(format_json_value(current))
    }
}

/// Resolves every template token in `input` against the variables.
pub fn resolve(input: &str, context: &ExecutionContext) -> String {
    if !input.contains("{{") {
        return input.to_string();
    }

    let mut output = String::with_capacity(input.len());
    let mut remaining = input;

    while let Some(start) = remaining.find("{{") {
        let (before, after_start) = remaining.split_at(start);
        output.push_str(before);

        let Some(end) = after_start[2..].find("}}") else {
            output.push_str(after_start);
            return output;
        };
        let body = &after_start[2..2 + end];
        let token_text = &after_start[..end + 4];

        match TemplateReference::parse(body) {
            Some(reference) => {
                let value = reference.lookup(context).unwrap_or_default();
                if reference.json_escape {
                    output.push_str(&escape_json_string(&value));
                } else {
                    output.push_str(&value);
                }
            }
            None => output.push_str(token_text),
        }
        remaining = &after_start[end + 4..];
    }

    output.push_str(remaining);
    output
}

/// Resolves a single reference expression, keeping the "missing" case visible.
pub fn lookup_reference(expression: &str, context: &ExecutionContext) -> Option<String> {
    TemplateReference::parse(expression)?.lookup(context)
}

/// Resolves every property value of a node.
pub fn resolve_properties(properties: &IndexMap<String, String>, context: &ExecutionContext) -> IndexMap<String, String> {
    properties
        .iter()
        .map(|(key, value)| (key.clone(), resolve(value, context)))
        .collect()
}

/// Escapes text for embedding inside a JSON string literal, without the quotes.
pub fn escape_json_string(text: &str) -> String {
    let quoted = Value::String(text.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Renders a walked JSON value as template text.
///
/// - **Strings**: returned as-is
/// - **Numbers / booleans**: their canonical text
/// - **Null**: empty string
/// - **Objects / arrays**: compact JSON
pub fn format_json_value(value: &Value) -> String {
    match value {
        Value::String(string_value) => string_value.clone(),
        Value::Number(number_value) => number_value.to_string(),
        Value::Bool(boolean_value) => boolean_value.to_string(),
        Value::Null => String::new(),
        other_value => other_value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ExecutionContext {
        ExecutionContext::with_variables([
            ("name", "World"),
            ("x", r#"{"a":[{"n":"v"}],"count":3,"flag":true,"none":null}"#),
            ("items", r#"["zero","one","two"]"#),
            ("i", "2"),
            ("quote", "say \"hi\"\n"),
        ])
    }

    #[test]
    fn text_without_tokens_is_unchanged() {
        assert_eq!(resolve("plain text { not a token }", &context()), "plain text { not a token }");
    }

    #[test]
    fn undefined_variable_resolves_to_empty() {
        assert_eq!(resolve("{{missing}}", &context()), "");
        assert_eq!(resolve("a{{missing}}b", &context()), "ab");
    }

    #[test]
    fn bare_names_and_whitespace() {
        assert_eq!(resolve("Hello, {{ name }}!", &context()), "Hello, World!");
    }

    #[test]
    fn json_paths_walk_objects_and_arrays() {
        let context = context();
        assert_eq!(resolve("{{x.a[0].n}}", &context), "v");
        assert_eq!(resolve("{{x.a[9].n}}", &context), "");
        assert_eq!(resolve("{{x.count}}", &context), "3");
        assert_eq!(resolve("{{x.flag}}", &context), "true");
        assert_eq!(resolve("{{x.none}}", &context), "");
        assert_eq!(resolve("{{x.a}}", &context), r#"[{"n":"v"}]"#);
        assert_eq!(resolve("{{items.1}}", &context), "one");
    }

    #[test]
    fn variable_indices_resolve_through_context() {
        let context = context();
        assert_eq!(resolve("{{items[i]}}", &context), "two");
        assert_eq!(resolve("{{items[unknown]}}", &context), "");
    }

    #[test]
    fn path_into_non_json_is_empty() {
        assert_eq!(resolve("{{name.length}}", &context()), "");
    }

    #[test]
    fn json_modifier_escapes_value() {
        assert_eq!(resolve(r#"{"text":"{{quote:json}}"}"#, &context()), r#"{"text":"say \"hi\"\n"}"#);
    }

    #[test]
    fn non_reference_tokens_and_unterminated_braces_are_kept() {
        let context = context();
        assert_eq!(resolve("{{ a + b }}", &context), "{{ a + b }}");
        assert_eq!(resolve("value: {{name", &context), "value: {{name");
    }

    #[test]
    fn lookup_reference_distinguishes_missing_values() {
        let context = context();
        assert_eq!(lookup_reference("name", &context), Some("World".to_string()));
        assert_eq!(lookup_reference("missing", &context), None);
    }
}
