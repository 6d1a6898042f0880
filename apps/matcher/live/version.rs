use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize `value` with object keys sorted at every level and no
/// whitespace, independent of how the map type orders its entries.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Content version of a document: hex SHA-256 of its canonical JSON.
pub fn content_version(document: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(document).as_bytes());
    format!("{:x}", hasher.finalize())
}
