//! `${name}` placeholder substitution and the state predicate grammar.
//!
//! Substitution applies to string values only: a value that *is* a single
//! placeholder is replaced by the bound value with its JSON type intact
//! (loop counters stay numbers); a string that merely *contains*
//! placeholders gets textual replacement. Non-string values pass through
//! unchanged.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap())
}

/// Substitute placeholders in one JSON value.
pub fn substitute_value(value: &Value, bindings: &HashMap<String, Value>) -> Value {
    let Value::String(text) = value else {
        return value.clone();
    };

    // Whole-string placeholder keeps the bound value's type.
    if let Some(caps) = placeholder_pattern().captures(text) {
        if caps.get(0).is_some_and(|m| m.as_str() == text) {
            if let Some(bound) = bindings.get(&caps[1]) {
                return bound.clone();
            }
            return value.clone();
        }
    }

    let replaced = placeholder_pattern().replace_all(text, |caps: &regex::Captures<'_>| {
        match bindings.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            // Unbound placeholders stay verbatim.
            None => caps[0].to_string(),
        }
    });
    Value::String(replaced.into_owned())
}

/// Substitute placeholders across an argument map.
pub fn substitute_args(
    args: &HashMap<String, Value>,
    bindings: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    args.iter()
        .map(|(name, value)| (name.clone(), substitute_value(value, bindings)))
        .collect()
}

/// Placeholder names referenced anywhere in a string.
pub fn referenced_placeholders(text: &str) -> Vec<String> {
    placeholder_pattern()
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Evaluate a predicate over boolean state flags.
///
/// Grammar, smallest that covers the contract: the empty predicate is
/// vacuously true; `name` reads a flag (absent means false); a leading
/// `!` negates.
pub fn evaluate_predicate(predicate: &str, state: &HashMap<String, bool>) -> bool {
    let predicate = predicate.trim();
    if predicate.is_empty() {
        return true;
    }
    if let Some(negated) = predicate.strip_prefix('!') {
        return !evaluate_predicate(negated, state);
    }
    state.get(predicate).copied().unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn whole_string_placeholder_keeps_type() {
        let bound = bindings(&[("i", json!(3))]);
        assert_eq!(substitute_value(&json!("${i}"), &bound), json!(3));
    }

    #[test]
    fn embedded_placeholder_replaces_textually() {
        let bound = bindings(&[("name", json!("batch")), ("i", json!(2))]);
        assert_eq!(
            substitute_value(&json!("run-${name}-${i}"), &bound),
            json!("run-batch-2")
        );
    }

    #[test]
    fn unbound_placeholders_stay_verbatim() {
        let bound = bindings(&[]);
        assert_eq!(substitute_value(&json!("${missing}"), &bound), json!("${missing}"));
        assert_eq!(
            substitute_value(&json!("x-${missing}"), &bound),
            json!("x-${missing}")
        );
    }

    #[test]
    fn non_strings_pass_through() {
        let bound = bindings(&[("i", json!(1))]);
        assert_eq!(substitute_value(&json!(42), &bound), json!(42));
        assert_eq!(substitute_value(&json!(null), &bound), json!(null));
    }

    #[test]
    fn args_map_substitution_covers_every_entry() {
        let bound = bindings(&[("count", json!(10))]);
        let mut args = HashMap::new();
        args.insert("n".to_string(), json!("${count}"));
        args.insert("label".to_string(), json!("batch ${count}"));
        let out = substitute_args(&args, &bound);
        assert_eq!(out["n"], json!(10));
        assert_eq!(out["label"], json!("batch 10"));
    }

    #[test]
    fn referenced_placeholders_lists_names() {
        assert_eq!(
            referenced_placeholders("a ${x} and ${y_2}"),
            vec!["x", "y_2"]
        );
        assert!(referenced_placeholders("plain").is_empty());
    }

    #[test]
    fn empty_predicate_is_vacuously_true() {
        assert!(evaluate_predicate("", &HashMap::new()));
        assert!(evaluate_predicate("  ", &HashMap::new()));
    }

    #[test]
    fn predicates_read_flags_with_negation() {
        let mut state = HashMap::new();
        state.insert("ready".to_string(), true);
        assert!(evaluate_predicate("ready", &state));
        assert!(!evaluate_predicate("!ready", &state));
        assert!(!evaluate_predicate("absent", &state));
        assert!(evaluate_predicate("!absent", &state));
    }
}
