//! Writing values into target documents by dotted path.
//!
//! Target paths use dot notation with optional array indices:
//! `c8y_TemperatureMeasurement.T.value`, `_TOPIC_LEVEL_[1]`, `$.source.id`.

use serde_json::{Map, Value};

/// One step of a target path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Parse a dotted target path into segments.
pub fn parse_path(path: &str) -> Result<Vec<Segment>, String> {
    let trimmed = path.trim();
    let trimmed = trimmed
        .strip_prefix("$.")
        .or_else(|| trimmed.strip_prefix('$'))
        .unwrap_or(trimmed);

    let mut segments = Vec::new();
    for part in trimmed.split('.') {
        if part.is_empty() {
            return Err(format!("empty segment in path '{}'", path));
        }
        let (key, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if !key.is_empty() {
            segments.push(Segment::Key(key.to_string()));
        }
        while !rest.is_empty() {
            let close = rest
                .find(']')
                .ok_or_else(|| format!("unclosed '[' in path '{}'", path))?;
            let index = rest[1..close]
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid index '{}' in path '{}'", &rest[1..close], path))?;
            segments.push(Segment::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(format!("unexpected '{}' in path '{}'", rest, path));
            }
        }
    }
    if segments.is_empty() {
        return Err(format!("path '{}' addresses no field", path));
    }
    Ok(segments)
}

/// Whether a path addresses a nested field rather than a root-level key.
pub fn is_nested(path: &str) -> bool {
    path.contains('.') || path.contains('[')
}

/// How far past the end of an array an index may point.
pub const MAX_INDEX_GAP: usize = 1024;

/// Set `value` at `path`, creating intermediate objects and arrays.
///
/// Arrays shorter than an addressed index are padded with `null`, up to
/// [`MAX_INDEX_GAP`] entries past their end.
pub fn set_path(document: &mut Value, path: &str, value: Value) -> Result<(), String> {
    let segments = parse_path(path)?;
    let mut current = document;
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        let next_container = || match segments.get(i + 1) {
            Some(Segment::Index(_)) => Value::Array(Vec::new()),
            _ => Value::Object(Map::new()),
        };
        current = match segment {
            Segment::Key(key) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                let object = current.as_object_mut().ok_or_else(|| {
                    format!("'{}' is not inside an object in path '{}'", key, path)
                })?;
                if last {
                    object.insert(key.clone(), value);
                    return Ok(());
                }
                let child = object.entry(key.clone()).or_insert_with(next_container);
                if child.is_null() {
                    *child = next_container();
                }
                child
            }
            Segment::Index(index) => {
                if current.is_null() {
                    *current = Value::Array(Vec::new());
                }
                let array = current.as_array_mut().ok_or_else(|| {
                    format!("[{}] is not inside an array in path '{}'", index, path)
                })?;
                if array.len() <= *index {
                    let new_len = index
                        .checked_add(1)
                        .filter(|n| *n <= array.len().saturating_add(MAX_INDEX_GAP))
                        .ok_or_else(|| {
                            format!(
                                "index {} is too far past the end of a {} entry array in path '{}'",
                                index,
                                array.len(),
                                path
                            )
                        })?;
                    array.resize(new_len, Value::Null);
                }
                if last {
                    array[*index] = value;
                    return Ok(());
                }
                if array[*index].is_null() {
                    array[*index] = next_container();
                }
                &mut array[*index]
            }
        };
    }
    Ok(())
}

/// Remove the field at `path`. Returns the removed value, if any.
pub fn delete_path(document: &mut Value, path: &str) -> Option<Value> {
    let mut segments = parse_path(path).ok()?;
    let leaf = segments.pop()?;
    let mut parent = document;
    for segment in &segments {
        parent = match segment {
            Segment::Key(key) => parent.get_mut(key.as_str())?,
            Segment::Index(index) => parent.get_mut(*index)?,
        };
    }
    match leaf {
        Segment::Key(key) => parent.as_object_mut()?.remove(&key),
        Segment::Index(index) => {
            let array = parent.as_array_mut()?;
            (index < array.len()).then(|| array.remove(index))
        }
    }
}

/// Copy the keys of `source` into the root object of `document`.
pub fn merge_into_root(document: &mut Value, source: &Value) -> Result<(), String> {
    let source = source
        .as_object()
        .ok_or_else(|| "only an object can be merged into the document root".to_string())?;
    if document.is_null() {
        *document = Value::Object(Map::new());
    }
    let root = document
        .as_object_mut()
        .ok_or_else(|| "document root is not an object".to_string())?;
    for (key, value) in source {
        root.insert(key.clone(), value.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("$.a.b[2].c").unwrap(),
            vec![
                Segment::Key("a".into()),
                Segment::Key("b".into()),
                Segment::Index(2),
                Segment::Key("c".into())
            ]
        );
        assert_eq!(
            parse_path("_TOPIC_LEVEL_[1]").unwrap(),
            vec![Segment::Key("_TOPIC_LEVEL_".into()), Segment::Index(1)]
        );
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a[x]").is_err());
        assert!(parse_path("$").is_err());
    }

    #[test]
    fn test_set_existing_and_new_paths() {
        let mut doc = json!({"c8y_T": {"T": {"value": 0, "unit": "C"}}});
        set_path(&mut doc, "c8y_T.T.value", json!(21.5)).unwrap();
        set_path(&mut doc, "source.id", json!("4711")).unwrap();
        set_path(&mut doc, "list[1].x", json!(1)).unwrap();
        assert_eq!(
            doc,
            json!({
                "c8y_T": {"T": {"value": 21.5, "unit": "C"}},
                "source": {"id": "4711"},
                "list": [null, {"x": 1}]
            })
        );
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut doc = json!({"a": 1});
        assert!(set_path(&mut doc, "a.b", json!(2)).is_err());
        assert_eq!(doc, json!({"a": 1}));
    }

    #[test]
    fn test_delete() {
        let mut doc = json!({"a": {"b": [1, 2]}, "c": null});
        assert_eq!(delete_path(&mut doc, "a.b[0]"), Some(json!(1)));
        assert_eq!(delete_path(&mut doc, "c"), Some(Value::Null));
        assert_eq!(delete_path(&mut doc, "missing.x"), None);
        assert_eq!(doc, json!({"a": {"b": [2]}}));
    }

    #[test]
    fn test_index_far_past_array_end_fails() {
        let mut doc = json!({"list": [1]});
        assert!(set_path(&mut doc, "list[18446744073709551615]", json!(2)).is_err());
        assert!(set_path(&mut doc, "list[5000]", json!(2)).is_err());
        assert!(set_path(&mut doc, "other[4096].x", json!(2)).is_err());
        assert_eq!(doc["list"], json!([1]));

        set_path(&mut doc, "list[3]", json!(4)).unwrap();
        assert_eq!(doc["list"], json!([1, null, null, 4]));
    }

    #[test]
    fn test_merge_into_root() {
        let mut doc = json!({"type": "t", "keep": 1});
        merge_into_root(&mut doc, &json!({"type": "u", "extra": true})).unwrap();
        assert_eq!(doc, json!({"type": "u", "keep": 1, "extra": true}));
        assert!(merge_into_root(&mut doc, &json!([1])).is_err());
    }

    #[test]
    fn test_is_nested() {
        assert!(is_nested("a.b"));
        assert!(is_nested("a[0]"));
        assert!(!is_nested("a"));
    }
}
