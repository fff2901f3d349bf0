//! JSON-Schema sanitizer for the Responses wire dialect.
//!
//! The upstream function-call schema language accepts a narrow subset of
//! JSON Schema. This normalizer collapses what it can, deletes what it must,
//! and is idempotent: `sanitize(sanitize(s)) == sanitize(s)`.

use serde_json::{Map, Value, json};

/// Keywords the wire dialect rejects outright.
const DISALLOWED_KEYS: &[&str] = &[
    "additionalProperties",
    "default",
    "$schema",
    "$defs",
    "definitions",
    "$id",
    "$comment",
    "minLength",
    "maxLength",
    "minItems",
    "maxItems",
    "pattern",
    "format",
    "examples",
    "const",
];

/// Placeholder for schemas that sanitize away to nothing; the model still
/// needs one parameter to fill in.
fn reason_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "reason": { "type": "string" } },
        "required": ["reason"]
    })
}

/// Normalize one schema node to the accepted subset.
#[must_use]
pub fn sanitize_schema(schema: &Value) -> Value {
    let Some(source) = schema.as_object() else {
        // Booleans and other non-object schemas carry no usable shape.
        return reason_schema();
    };
    let mut node = source.clone();

    // $ref: no definitions survive, so point the model at the name instead.
    if let Some(reference) = node.get("$ref").and_then(Value::as_str) {
        let segment = reference.rsplit('/').next().unwrap_or(reference);
        return json!({
            "type": "object",
            "description": format!("See: {segment}")
        });
    }

    merge_all_of(&mut node);
    flatten_one_branch(&mut node, "anyOf");
    flatten_one_branch(&mut node, "oneOf");

    // type: [T, "null"] -> first non-null entry.
    if let Some(Value::Array(types)) = node.get("type") {
        let first = types
            .iter()
            .find(|t| t.as_str() != Some("null"))
            .or_else(|| types.first())
            .cloned();
        match first {
            Some(first) => {
                node.insert("type".to_string(), first);
            }
            None => {
                node.remove("type");
            }
        }
    }

    for key in DISALLOWED_KEYS {
        node.remove(*key);
    }

    if let Some(Value::Object(properties)) = node.get_mut("properties") {
        for value in properties.values_mut() {
            *value = sanitize_schema(value);
        }
    }
    if let Some(items) = node.get_mut("items") {
        *items = match items {
            // Tuple form: keep each entry normalized.
            Value::Array(entries) => Value::Array(entries.iter().map(sanitize_schema).collect()),
            ref other => sanitize_schema(other),
        };
    }

    intersect_required(&mut node);

    if node.is_empty() {
        return reason_schema();
    }
    Value::Object(node)
}

/// Top-level function parameters must be an object schema; wrap anything
/// else as a single `input` property.
#[must_use]
pub fn sanitize_parameters(schema: &Value) -> Value {
    let sanitized = sanitize_schema(schema);
    let is_object = sanitized.get("type").and_then(Value::as_str) == Some("object")
        || (sanitized.get("type").is_none() && sanitized.get("properties").is_some());
    if is_object {
        sanitized
    } else {
        json!({
            "type": "object",
            "properties": { "input": sanitized },
            "required": ["input"]
        })
    }
}

/// Merge every `allOf` part into the parent: union of properties, union of
/// required, other keys only where the parent has none.
fn merge_all_of(node: &mut Map<String, Value>) {
    let Some(Value::Array(parts)) = node.remove("allOf") else {
        return;
    };
    for part in parts {
        let Value::Object(part) = part else { continue };
        for (key, value) in part {
            match key.as_str() {
                "properties" => {
                    let target = node
                        .entry("properties")
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let (Value::Object(target), Value::Object(incoming)) = (target, value) {
                        for (name, prop) in incoming {
                            target.entry(name).or_insert(prop);
                        }
                    }
                }
                "required" => {
                    let target = node
                        .entry("required")
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let (Value::Array(target), Value::Array(incoming)) = (target, value) {
                        for entry in incoming {
                            if !target.contains(&entry) {
                                target.push(entry);
                            }
                        }
                    }
                }
                _ => {
                    node.entry(key).or_insert(value);
                }
            }
        }
    }
}

/// Replace `anyOf`/`oneOf` with a single branch, preferring branches with
/// `properties`, then `items`, then any typed branch.
fn flatten_one_branch(node: &mut Map<String, Value>, key: &str) {
    let Some(Value::Array(branches)) = node.remove(key) else {
        return;
    };
    let rank = |branch: &Value| -> u8 {
        match branch.as_object() {
            Some(o) if o.contains_key("properties") => 4,
            Some(o) if o.contains_key("items") => 3,
            Some(o) if o.get("type").is_some_and(|t| t.as_str() != Some("null")) => 2,
            Some(o) if o.contains_key("type") => 1,
            _ => 0,
        }
    };
    // First branch wins ties, so the pick is deterministic.
    let mut best: Option<(&Value, u8)> = None;
    for branch in &branches {
        let branch_rank = rank(branch);
        if best.is_none_or(|(_, current)| branch_rank > current) {
            best = Some((branch, branch_rank));
        }
    }
    if let Some((Value::Object(branch), _)) = best.map(|(b, r)| (b.clone(), r)) {
        for (branch_key, value) in branch {
            node.entry(branch_key).or_insert(value);
        }
    }
}

/// `required` keeps only declared properties; an empty list is dropped.
fn intersect_required(node: &mut Map<String, Value>) {
    let declared: Vec<String> = match node.get("properties") {
        Some(Value::Object(properties)) => properties.keys().cloned().collect(),
        _ => Vec::new(),
    };
    let Some(Value::Array(required)) = node.get("required") else {
        return;
    };
    let kept: Vec<Value> = required
        .iter()
        .filter(|entry| {
            entry
                .as_str()
                .is_some_and(|name| declared.iter().any(|d| d == name))
        })
        .cloned()
        .collect();
    if kept.is_empty() {
        node.remove("required");
    } else {
        node.insert("required".to_string(), Value::Array(kept));
    }
}
