//! Deterministic content hashing for cache keys.
//!
//! Inputs and params are JSON-like maps; their hash must be stable
//! across platforms and process restarts, so serialization is canonical:
//! object keys sorted lexicographically at every level, no whitespace,
//! numbers in their shortest round-trippable form, explicit nulls
//! preserved, missing keys omitted.

use sha2::{Digest, Sha256};

/// Hash a JSON value to 64 lowercase hex chars of Sha256.
pub fn hash_value(value: &serde_json::Value) -> String {
  let mut canonical = String::new();
  write_canonical(value, &mut canonical);
  digest(&canonical)
}

/// Hash a JSON object map without cloning it into a `Value`.
pub fn hash_map(map: &serde_json::Map<String, serde_json::Value>) -> String {
  let mut canonical = String::new();
  write_object(map, &mut canonical);
  digest(&canonical)
}

fn digest(canonical: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(canonical.as_bytes());
  format!("{:x}", hasher.finalize())
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
  match value {
    serde_json::Value::Null => out.push_str("null"),
    serde_json::Value::Bool(true) => out.push_str("true"),
    serde_json::Value::Bool(false) => out.push_str("false"),
    // serde_json renders numbers in their shortest round-trippable form.
    serde_json::Value::Number(n) => out.push_str(&n.to_string()),
    serde_json::Value::String(s) => write_escaped(s, out),
    serde_json::Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    serde_json::Value::Object(map) => write_object(map, out),
  }
}

fn write_object(map: &serde_json::Map<String, serde_json::Value>, out: &mut String) {
  let mut keys: Vec<&String> = map.keys().collect();
  keys.sort();

  out.push('{');
  for (i, key) in keys.iter().enumerate() {
    if i > 0 {
      out.push(',');
    }
    write_escaped(key, out);
    out.push(':');
    if let Some(value) = map.get(*key) {
      write_canonical(value, out);
    }
  }
  out.push('}');
}

fn write_escaped(s: &str, out: &mut String) {
  out.push('"');
  for c in s.chars() {
    match c {
      '"' => out.push_str("\\\""),
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      '\t' => out.push_str("\\t"),
      c if (c as u32) < 0x20 => {
        out.push_str(&format!("\\u{:04x}", c as u32));
      }
      c => out.push(c),
    }
  }
  out.push('"');
}
