//! Wire protocol shared by the harness client and the fixture server
//!
//! Newline-delimited JSON over TCP: one request object per line, one response
//! object per line. The harness does not own the target server's wire format;
//! this is the generic command surface the harness requires (process lifecycle
//! aside): schema administration, mutation, counting through a chosen access
//! path, and structural validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document is an arbitrary JSON object.
pub type Document = serde_json::Map<String, Value>;

/// Equality filter: every named field must match.
///
/// BTreeMap keeps serialization deterministic, which keeps commit-log
/// checksums stable across replays.
pub type Filter = BTreeMap<String, Value>;

/// Index kinds the harness exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Ascending single-field index
    Ascending,
    /// Hashed single-field index
    Hashed,
}

/// A named single-field secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub field: String,
    pub kind: IndexKind,
}

impl IndexSpec {
    pub fn ascending(name: &str, field: &str) -> Self {
        IndexSpec {
            name: name.to_string(),
            field: field.to_string(),
            kind: IndexKind::Ascending,
        }
    }

    pub fn hashed(name: &str, field: &str) -> Self {
        IndexSpec {
            name: name.to_string(),
            field: field.to_string(),
            kind: IndexKind::Hashed,
        }
    }
}

/// Capped-collection option: byte-size bound, oldest records evicted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CappedSpec {
    pub size: u64,
}

/// One request line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Shutdown,
    DropCollection {
        collection: String,
    },
    CreateCollection {
        collection: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capped: Option<CappedSpec>,
    },
    CreateIndexes {
        collection: String,
        indexes: Vec<IndexSpec>,
    },
    InsertOne {
        collection: String,
        document: Document,
    },
    InsertMany {
        collection: String,
        documents: Vec<Document>,
    },
    UpdateOne {
        collection: String,
        filter: Filter,
        set: Document,
    },
    DeleteOne {
        collection: String,
        filter: Filter,
    },
    DeleteMany {
        collection: String,
        filter: Filter,
    },
    Count {
        collection: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<Filter>,
        /// Index name forcing the access path; `_id` names the primary index.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
    Validate {
        collection: String,
    },
}

/// One response line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Response {
    pub fn ok() -> Self {
        Response {
            ok: true,
            error: None,
            count: None,
            valid: None,
            details: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response {
            ok: false,
            error: Some(msg.into()),
            count: None,
            valid: None,
            details: None,
        }
    }

    pub fn count(n: u64) -> Self {
        Response {
            count: Some(n),
            ..Response::ok()
        }
    }

    pub fn validation(valid: bool, details: Value) -> Self {
        Response {
            valid: Some(valid),
            details: Some(details),
            ..Response::ok()
        }
    }
}

/// Equality match with multikey semantics: a filter value matches a scalar
/// field directly, or any element of an array field.
pub fn matches_filter(doc: &Document, filter: &Filter) -> bool {
    filter.iter().all(|(field, want)| match doc.get(field) {
        Some(Value::Array(items)) => items.contains(want) || Value::Array(items.clone()) == *want,
        Some(have) => have == want,
        None => want.is_null(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    fn filter(v: Value) -> Filter {
        v.as_object()
            .cloned()
            .unwrap()
            .into_iter()
            .collect::<Filter>()
    }

    #[test]
    fn filter_matches_scalar_equality() {
        let d = doc(json!({"a": "a", "b": 2}));
        assert!(matches_filter(&d, &filter(json!({"a": "a"}))));
        assert!(matches_filter(&d, &filter(json!({"a": "a", "b": 2}))));
        assert!(!matches_filter(&d, &filter(json!({"a": "b"}))));
        assert!(!matches_filter(&d, &filter(json!({"a": "a", "b": 3}))));
    }

    #[test]
    fn filter_matches_array_element() {
        // Multikey semantics: {b: 2} matches {b: [1, 2, 3]}
        let d = doc(json!({"a": "a", "b": [1, 2, 3]}));
        assert!(matches_filter(&d, &filter(json!({"b": 1}))));
        assert!(matches_filter(&d, &filter(json!({"b": 3}))));
        assert!(!matches_filter(&d, &filter(json!({"b": 4}))));
    }

    #[test]
    fn filter_missing_field_matches_only_null() {
        let d = doc(json!({"a": "a"}));
        assert!(!matches_filter(&d, &filter(json!({"b": "b"}))));
        assert!(matches_filter(&d, &filter(json!({"b": null}))));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let d = doc(json!({"a": 1}));
        assert!(matches_filter(&d, &Filter::new()));
    }

    #[test]
    fn request_roundtrips_with_cmd_tag() {
        let req = Request::Count {
            collection: "testt".to_string(),
            filter: Some(filter(json!({"a": "a"}))),
            hint: Some("a".to_string()),
        };
        let line = serde_json::to_string(&req).unwrap();
        assert!(line.contains("\"cmd\":\"count\""));
        let back: Request = serde_json::from_str(&line).unwrap();
        match back {
            Request::Count { hint, .. } => assert_eq!(hint.as_deref(), Some("a")),
            other => panic!("unexpected request: {:?}", other),
        }
    }
}
