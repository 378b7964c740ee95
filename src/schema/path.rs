//! Dot-path access into JSON documents (`"place.grid_lat"`).

use serde_json::{Map, Value};

pub fn get<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |node, part| node.as_object()?.get(part))
}

pub fn contains(doc: &Value, path: &str) -> bool {
    get(doc, path).is_some()
}

/// Sets `value` at `path`, creating intermediate objects. Non-object intermediates are replaced.
pub fn set(doc: &mut Value, path: &str, value: Value) {
    let mut parts = path.split('.').peekable();
    let mut node = doc;
    while let Some(part) = parts.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        node = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}
