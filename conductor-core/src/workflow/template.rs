//! Minimal `{{ vars.path }}` template expansion.
//!
//! Deliberately not a general expression language (Design Notes, `spec.md`
//! §9): the only supported token is a dotted path into the run's variable
//! scope. Unknown paths expand to the empty string; attempting to expand a
//! token inside a non-string JSON value is a definition error caught at load
//! time, not at run time.

use serde_json::Value;

use crate::error::{Result, RuntimeError};

/// Looks up a dotted path (`step.0.ok`, `trigger.city`) in `vars`. Path
/// segments that parse as an integer index into an array, otherwise as an
/// object key. Returns `None` if any segment is missing.
pub fn lookup<'a>(vars: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = vars;
    for segment in path.split('.') {
        cur = match cur {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Expands every `{{ vars.path }}` token found in `template` against `vars`.
/// Paths are always rooted at `vars.` — other prefixes are left untouched as
/// literal text (they're not template tokens).
pub fn expand_str(template: &str, vars: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let token = after[..end].trim();
        if let Some(path) = token.strip_prefix("vars.") {
            let value = lookup(vars, path.trim()).map(scalar_to_string).unwrap_or_default();
            out.push_str(&value);
        } else {
            // Not a recognized token shape; leave the braces as written.
            out.push_str("{{");
            out.push_str(token);
            out.push_str("}}");
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Recursively expands every string leaf of a JSON value's string fields.
/// `inputs` values are either literals (expanded verbatim, which is a no-op
/// for non-templated strings) or template expressions; non-string JSON
/// values (numbers, bools, arrays, objects) pass through unexpanded, since a
/// `{{ }}` token can only ever appear inside a string.
pub fn expand_value(value: &Value, vars: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(expand_str(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), expand_value(v, vars))).collect()),
        other => other.clone(),
    }
}

/// Definition-time validation: rejects `inputs` shapes where a template
/// token appears somewhere a string can't later be substituted in (this
/// implementation's `expand_value` never actually hits that case, since
/// JSON strings are the only place a token can appear — kept as an explicit
/// check so malformed definitions fail at load time with a clear message
/// rather than silently no-op'ing).
pub fn validate_inputs(inputs: &Value) -> Result<()> {
    fn walk(value: &Value) -> Result<()> {
        match value {
            Value::String(s) => {
                let mut rest = s.as_str();
                while let Some(start) = rest.find("{{") {
                    let after = &rest[start + 2..];
                    if after.find("}}").is_none() {
                        return Err(RuntimeError::usage(format!("unterminated template token in '{s}'")));
                    }
                    rest = &after[after.find("}}").unwrap() + 2..];
                }
                Ok(())
            }
            Value::Array(items) => items.iter().try_for_each(walk),
            Value::Object(map) => map.values().try_for_each(walk),
            _ => Ok(()),
        }
    }
    walk(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expands_known_path() {
        let vars = json!({"trigger": {"city": "nyc"}});
        assert_eq!(expand_str("hello {{ vars.trigger.city }}!", &vars), "hello nyc!");
    }

    #[test]
    fn unknown_path_expands_to_empty_string() {
        let vars = json!({});
        assert_eq!(expand_str("x={{ vars.missing.path }}", &vars), "x=");
    }

    #[test]
    fn non_vars_token_is_left_verbatim() {
        let vars = json!({});
        assert_eq!(expand_str("{{ not.a.vars.token }}", &vars), "{{ not.a.vars.token }}");
    }

    #[test]
    fn array_index_path_is_supported() {
        let vars = json!({"step": [{"ok": true}, {"ok": false}]});
        assert_eq!(expand_str("{{ vars.step.1.ok }}", &vars), "false");
    }

    #[test]
    fn expand_value_recurses_through_object_and_array() {
        let vars = json!({"name": "alice"});
        let inputs = json!({"greeting": "hi {{ vars.name }}", "nested": ["{{ vars.name }}", 3]});
        let expanded = expand_value(&inputs, &vars);
        assert_eq!(expanded, json!({"greeting": "hi alice", "nested": ["alice", 3]}));
    }

    #[test]
    fn validate_inputs_rejects_unterminated_token() {
        let bad = json!({"a": "{{ vars.x"});
        assert!(validate_inputs(&bad).is_err());
    }

    #[test]
    fn validate_inputs_accepts_well_formed_templates() {
        let ok = json!({"a": "{{ vars.x }}", "b": 3, "c": [true, "{{ vars.y }}"]});
        assert!(validate_inputs(&ok).is_ok());
    }
}
