/// Query fingerprints
///
/// A fingerprint is the hex SHA-1 of `op ++ collection ++ filter ++ options`,
/// where filter and options are written as JSON with object keys sorted at
/// every depth. Processes sharing one cache store must agree on these bytes,
/// so the canonical writer below does not rely on serde_json's map ordering.

use crate::error::CacheResult;
use serde::Serialize;
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::fmt;

/// Operation kind mixed into every fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Find,
    FindOne,
    CollectionSize,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Find => "find",
            OpKind::FindOne => "find-one",
            OpKind::CollectionSize => "collection-size",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the fingerprint of a query
pub fn fingerprint<F, O>(op: OpKind, collection: &str, filter: &F, options: Option<&O>) -> CacheResult<String>
where
    F: Serialize + ?Sized,
    O: Serialize + ?Sized,
{
    let mut hasher = Sha1::new();
    hasher.update(op.as_str().as_bytes());
    hasher.update(collection.as_bytes());
    hasher.update(canonical_json(filter)?);
    if let Some(options) = options {
        hasher.update(canonical_json(options)?);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Serialize a value as JSON with recursively sorted object keys
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> CacheResult<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> CacheResult<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(item, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::types::{FindOptions, Sort};
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap, HashSet};

    #[test]
    fn test_fingerprint_is_deterministic() {
        let filter = Filter::new().eq("owner", "abc").eq("status", 3);
        let a = fingerprint(OpKind::Find, "emotes", &filter, None::<&FindOptions>).unwrap();
        let b = fingerprint(OpKind::Find, "emotes", &filter, None::<&FindOptions>).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn test_fingerprint_ignores_map_insertion_order() {
        let mut first: HashMap<&str, serde_json::Value> = HashMap::new();
        first.insert("status", json!(3));
        first.insert("owner", json!({"name": "x", "id": 1}));
        first.insert("tags", json!(["a"]));

        let mut second: HashMap<&str, serde_json::Value> = HashMap::new();
        second.insert("tags", json!(["a"]));
        second.insert("owner", json!({"id": 1, "name": "x"}));
        second.insert("status", json!(3));

        let a = fingerprint(OpKind::Find, "users", &first, None::<&FindOptions>).unwrap();
        let b = fingerprint(OpKind::Find, "users", &second, None::<&FindOptions>).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_any_input() {
        let filter = Filter::new().eq("owner", "abc");
        let options = FindOptions {
            sort: Sort::default().desc("created_at"),
            skip: None,
            limit: Some(10),
        };

        let variants = vec![
            fingerprint(OpKind::Find, "emotes", &filter, None::<&FindOptions>).unwrap(),
            fingerprint(OpKind::FindOne, "emotes", &filter, None::<&FindOptions>).unwrap(),
            fingerprint(OpKind::CollectionSize, "emotes", &filter, None::<&FindOptions>).unwrap(),
            fingerprint(OpKind::Find, "users", &filter, None::<&FindOptions>).unwrap(),
            fingerprint(OpKind::Find, "emotes", &Filter::new().eq("owner", "abd"), None::<&FindOptions>).unwrap(),
            fingerprint(OpKind::Find, "emotes", &filter, Some(&options)).unwrap(),
            fingerprint(
                OpKind::Find,
                "emotes",
                &filter,
                Some(&FindOptions {
                    limit: Some(11),
                    ..options.clone()
                }),
            )
            .unwrap(),
        ];

        let unique: HashSet<&String> = variants.iter().collect();
        assert_eq!(unique.len(), variants.len());
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let mut inner = BTreeMap::new();
        inner.insert("b", 2);
        inner.insert("a", 1);
        let value = json!({"z": inner, "m": [{"y": 1, "x": 2}]});
        let bytes = canonical_json(&value).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"m":[{"x":2,"y":1}],"z":{"a":1,"b":2}}"#);
    }

    #[test]
    fn test_known_digest() {
        // sha1("find" ++ "users" ++ "{}")
        let digest = fingerprint(OpKind::Find, "users", &Filter::new(), None::<&FindOptions>).unwrap();
        let mut hasher = Sha1::new();
        hasher.update(b"findusers{}");
        assert_eq!(digest, hex::encode(hasher.finalize()));
    }
}
