/// Generic document decoding
///
/// Projects loosely typed documents onto caller-defined types. Fields are
/// matched by their serde (external) name. A field absent from the document
/// keeps the value it has in `T::default()`, fields marked `#[serde(skip)]`
/// are never touched by stored data, and unknown document fields are ignored.
/// Type mismatches are reported as [`CacheError::Decode`].

use crate::error::{CacheError, CacheResult};
use crate::types::Document;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Decode a single document
pub fn decode_one<T>(doc: &Document) -> CacheResult<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    let mut base = match serde_json::to_value(T::default()) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(CacheError::Decode(format!(
                "destination type must serialize as an object, got {}",
                other
            )))
        }
        Err(e) => return Err(CacheError::Decode(format!("failed to build defaults: {}", e))),
    };

    // Keys serde does not map (unknown or skipped) are ignored on deserialize
    for (key, value) in doc {
        base.insert(key.clone(), value.clone());
    }

    serde_json::from_value(Value::Object(base)).map_err(|e| CacheError::Decode(e.to_string()))
}

/// Decode a sequence of documents, preserving order
pub fn decode_many<T>(docs: &[Document]) -> CacheResult<Vec<T>>
where
    T: DeserializeOwned + Serialize + Default,
{
    docs.iter().map(decode_one).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Emote {
        #[serde(rename = "_id")]
        id: String,
        name: String,
        #[serde(rename = "owner_id")]
        owner: String,
        width: Vec<i32>,
        status: i32,
        animated: Option<bool>,
        #[serde(skip)]
        channel_count: Option<u32>,
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_assigns_fields_by_external_name() {
        let emote: Emote = decode_one(&doc(json!({
            "_id": "e1",
            "name": "pepeD",
            "owner_id": "u1",
            "width": [28, 56],
            "status": 3,
            "animated": true
        })))
        .unwrap();

        assert_eq!(emote.id, "e1");
        assert_eq!(emote.owner, "u1");
        assert_eq!(emote.width, vec![28, 56]);
        assert_eq!(emote.animated, Some(true));
    }

    #[test]
    fn test_absent_fields_take_zero_values() {
        let emote: Emote = decode_one(&doc(json!({"_id": "e2", "name": "kekw"}))).unwrap();
        assert_eq!(emote.owner, "");
        assert!(emote.width.is_empty());
        assert_eq!(emote.status, 0);
        assert_eq!(emote.animated, None);
    }

    #[test]
    fn test_unmapped_fields_are_ignored() {
        let emote: Emote = decode_one(&doc(json!({
            "_id": "e3",
            "channel_count": 99,
            "unknown": {"nested": true}
        })))
        .unwrap();
        assert_eq!(emote.channel_count, None);
    }

    #[test]
    fn test_type_mismatch_fails() {
        let err = decode_one::<Emote>(&doc(json!({"_id": "e4", "status": "three"}))).unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));

        let err = decode_one::<Emote>(&doc(json!({"_id": "e4", "status": 3.5}))).unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
    }

    #[test]
    fn test_decode_many_preserves_order() {
        let docs = vec![
            doc(json!({"_id": "b", "name": "second"})),
            doc(json!({"_id": "a", "name": "first"})),
        ];
        let emotes: Vec<Emote> = decode_many(&docs).unwrap();
        let ids: Vec<&str> = emotes.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sticker {
        #[serde(rename = "_id")]
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        animated: Option<bool>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tags: Vec<String>,
    }

    #[test]
    fn test_fields_omitted_from_defaults_are_still_assigned() {
        let sticker: Sticker = decode_one(&doc(json!({
            "_id": "s1",
            "animated": true,
            "tags": ["a"]
        })))
        .unwrap();

        assert_eq!(sticker.animated, Some(true));
        assert_eq!(sticker.tags, vec!["a".to_string()]);

        let bare: Sticker = decode_one(&doc(json!({"_id": "s2"}))).unwrap();
        assert_eq!(bare, Sticker { id: "s2".to_string(), ..Default::default() });
    }

    #[test]
    fn test_non_struct_destination_is_rejected() {
        let err = decode_one::<Vec<String>>(&doc(json!({"_id": "x"}))).unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
    }
}
