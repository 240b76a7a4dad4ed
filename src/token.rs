//! Deploy-time values: intrinsic functions and pseudo parameters.
//!
//! A token is any JSON value the provisioning engine resolves when it applies
//! the template. Tokens are plain `serde_json::Value`s so they can sit anywhere
//! inside resource properties; the helpers here build them and find the
//! resource references hidden inside them.

use serde_json::{Value, json};
use std::collections::BTreeSet;

/// Pseudo parameters supplied by the provisioning engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pseudo {
    AccountId,
    Region,
    Partition,
    StackId,
    StackName,
    UrlSuffix,
}

impl Pseudo {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AccountId => "AWS::AccountId",
            Self::Region => "AWS::Region",
            Self::Partition => "AWS::Partition",
            Self::StackId => "AWS::StackId",
            Self::StackName => "AWS::StackName",
            Self::UrlSuffix => "AWS::URLSuffix",
        }
    }

    pub fn token(&self) -> Value {
        reference(self.name())
    }
}

/// `{ "Ref": target }`
pub fn reference(target: &str) -> Value {
    json!({ "Ref": target })
}

/// `{ "Fn::GetAtt": [target, attribute] }`
pub fn get_att(target: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [target, attribute] })
}

/// `{ "Fn::Join": [separator, parts] }`
///
/// Adjacent literal strings are merged and a join made only of literals
/// collapses into a plain string.
pub fn join(separator: &str, parts: Vec<Value>) -> Value {
    let mut merged: Vec<Value> = Vec::with_capacity(parts.len());
    for part in parts {
        match (merged.last_mut(), part) {
            (Some(Value::String(prev)), Value::String(next)) => {
                prev.push_str(separator);
                prev.push_str(&next);
            }
            (_, part) => merged.push(part),
        }
    }

    match merged.as_slice() {
        [] => Value::String(String::new()),
        [Value::String(only)] => Value::String(only.clone()),
        _ => json!({ "Fn::Join": [separator, merged] }),
    }
}

/// `{ "Fn::Select": [index, list] }`
pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index, list] })
}

/// `{ "Fn::GetAZs": region }`; an empty region means the stack's own.
pub fn get_azs(region: &str) -> Value {
    json!({ "Fn::GetAZs": region })
}

/// `{ "Fn::Base64": value }`
pub fn base64(value: Value) -> Value {
    json!({ "Fn::Base64": value })
}

/// True if the value contains anything resolved at deploy time.
pub fn is_unresolved(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.keys().any(|k| k == "Ref" || k.starts_with("Fn::"))
                || map.values().any(is_unresolved)
        }
        Value::Array(items) => items.iter().any(is_unresolved),
        _ => false,
    }
}

/// Collect the logical IDs referenced through `Ref` and `Fn::GetAtt`.
///
/// Pseudo parameters (`AWS::*`) are not resources and are skipped.
pub fn references(value: &Value) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    collect_references(value, &mut found);
    found
}

fn collect_references(value: &Value, found: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(target)) = map.get("Ref") {
                if !target.starts_with("AWS::") {
                    found.insert(target.clone());
                }
            }
            if let Some(Value::Array(args)) = map.get("Fn::GetAtt") {
                if let Some(Value::String(target)) = args.first() {
                    found.insert(target.clone());
                }
            }
            for nested in map.values() {
                collect_references(nested, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, found);
            }
        }
        _ => {}
    }
}
