use serde_json::{Map, Value};
use std::path::PathBuf;

// Every entry carries the same keys; unknown ones are null.
const REQUIRED_KEYS: [&str; 6] = ["ts", "op", "wallet", "generation", "result", "error_code"];

pub fn normalize_entry(v: Value) -> Value {
    let mut obj = match v {
        Value::Object(m) => m,
        other @ (Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Array(_)) => {
            let mut m = Map::new();
            m.insert("raw".to_owned(), other);
            m
        }
    };

    if !obj.contains_key("ts") {
        obj.insert(
            "ts".to_owned(),
            Value::String(crate::keystore::utc_now_iso()),
        );
    }
    for k in REQUIRED_KEYS {
        obj.entry(k).or_insert(Value::Null);
    }

    Value::Object(obj)
}

/// Append-only JSONL record of custody operations. Never receives share or secret material.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub const fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub const fn disabled() -> Self {
        Self { path: None }
    }

    pub fn append(&self, entry: Value) -> eyre::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let line = normalize_entry(entry).to_string();
        crate::fsutil::append_line_restrictive(path, &line)
    }
}
