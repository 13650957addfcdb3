//! Run-scoped context: request variables, step outputs, and template resolution.
//!
//! `RunContext` is owned by the scheduler of a single run. Step configuration
//! is resolved against it right before dispatch, so actions only ever see
//! concrete values.

use std::collections::HashMap;

use serde_json::{Value, json};
use uuid::Uuid;

/// Maximum size of a single step output (1 MB).
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

/// Variables and step outputs visible to templates of one run.
///
/// Supported placeholders:
/// - `{{ vars.<name> }}` (alias `{{ variables.<name> }}`)
/// - `{{ steps.<id>.output }}` and `{{ steps.<id>.output.<field>.<field> }}`
/// - `{{ run.id }}`
///
/// Unknown references are left as-is.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub variables: HashMap<String, Value>,
    step_outputs: HashMap<String, Value>,
}

impl RunContext {
    pub fn new(run_id: Uuid, variables: HashMap<String, Value>) -> Self {
        Self {
            run_id,
            variables,
            step_outputs: HashMap::new(),
        }
    }

    /// Store the output of a completed step and return what was stored.
    ///
    /// Outputs larger than `MAX_STEP_OUTPUT_SIZE` once serialized are replaced
    /// by a truncation marker.
    pub fn set_step_output(&mut self, step_id: &str, output: Value) -> Value {
        let size = serde_json::to_string(&output).map(|s| s.len()).unwrap_or(0);
        let stored = if size > MAX_STEP_OUTPUT_SIZE {
            tracing::warn!(
                step_id,
                size,
                max = MAX_STEP_OUTPUT_SIZE,
                "step output exceeds size limit, truncating"
            );
            json!({
                "_truncated": true,
                "_original_size": size,
            })
        } else {
            output
        };
        self.step_outputs.insert(step_id.to_string(), stored.clone());
        stored
    }

    pub fn step_output(&self, step_id: &str) -> Option<&Value> {
        self.step_outputs.get(step_id)
    }

    /// Resolve every placeholder inside a step configuration map.
    pub fn resolve_config(&self, config: &HashMap<String, Value>) -> HashMap<String, Value> {
        config
            .iter()
            .map(|(k, v)| (k.clone(), self.resolve_value(v)))
            .collect()
    }

    /// Resolve placeholders recursively inside a JSON value.
    ///
    /// A string made of exactly one placeholder is replaced by the referenced
    /// value itself, keeping its JSON type. Placeholders embedded in longer
    /// strings are spliced in as text.
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => {
                if let Some(expr) = sole_placeholder(s) {
                    if let Some(found) = self.lookup(expr) {
                        return found;
                    }
                }
                Value::String(self.resolve_template(s))
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.resolve_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Replace every resolvable `{{ ... }}` placeholder in a string.
    pub fn resolve_template(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start..].find("}}") else {
                break;
            };
            let end = start + len + 2;
            out.push_str(&rest[..start]);

            let expr = rest[start + 2..end - 2].trim();
            match self.lookup(expr) {
                Some(value) => out.push_str(&value_to_string(&value)),
                None => out.push_str(&rest[start..end]),
            }
            rest = &rest[end..];
        }

        out.push_str(rest);
        out
    }

    fn lookup(&self, expr: &str) -> Option<Value> {
        let mut parts = expr.split('.');
        match parts.next()? {
            "vars" | "variables" => {
                let name = parts.next()?;
                let root = self.variables.get(name)?;
                walk(root, parts)
            }
            "steps" => {
                let step_id = parts.next()?;
                if parts.next()? != "output" {
                    return None;
                }
                let root = self.step_outputs.get(step_id)?;
                walk(root, parts)
            }
            "run" => match parts.next()? {
                "id" => Some(Value::String(self.run_id.to_string())),
                _ => None,
            },
            _ => None,
        }
    }
}

fn walk<'a>(root: &Value, fields: impl Iterator<Item = &'a str>) -> Option<Value> {
    let mut current = root;
    for field in fields {
        current = match current {
            Value::Array(items) => items.get(field.parse::<usize>().ok()?)?,
            other => other.get(field)?,
        };
    }
    Some(current.clone())
}

fn sole_placeholder(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Render a JSON value as template text: strings without quotes, everything
/// else as compact JSON.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
