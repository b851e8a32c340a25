//! In-memory document store
//!
//! Documents are the source of truth; indexes are derived state rebuilt from
//! the commit log on startup and updated in the same apply step as the
//! document they cover. `apply` is deterministic: replaying the same log
//! always reproduces the same store, including capped-collection evictions.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::protocol::{matches_filter, CappedSpec, Document, Filter, IndexKind, IndexSpec};

use super::{EngineError, EngineResult};

pub type DocId = u64;

/// One committed state transition. Mutations carry resolved document ids so
/// replay never re-runs filter matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogOp {
    CreateCollection {
        collection: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capped: Option<CappedSpec>,
    },
    DropCollection {
        collection: String,
    },
    CreateIndexes {
        collection: String,
        indexes: Vec<IndexSpec>,
    },
    Insert {
        collection: String,
        docs: Vec<(DocId, Document)>,
    },
    Update {
        collection: String,
        id: DocId,
        set: Document,
    },
    Delete {
        collection: String,
        ids: Vec<DocId>,
    },
}

/// Canonical key encoding; serde_json maps are sorted, so this is stable.
fn encode_key(value: &Value) -> String {
    value.to_string()
}

fn hash_key(value: &Value) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(encode_key(value).as_bytes());
    format!("{:08x}", hasher.finalize())
}

#[derive(Debug, Clone)]
struct Index {
    spec: IndexSpec,
    entries: BTreeMap<String, BTreeSet<DocId>>,
}

impl Index {
    fn new(spec: IndexSpec) -> Self {
        Index {
            spec,
            entries: BTreeMap::new(),
        }
    }

    /// Keys a document contributes. A missing field indexes as null so every
    /// document appears in every index; an array field indexes per element
    /// (multikey) plus the whole array, so a full-array equality lookup
    /// resolves through the index the same way it does through a scan.
    fn keys_for(&self, doc: &Document) -> Vec<String> {
        let value = doc.get(&self.spec.field).cloned().unwrap_or(Value::Null);
        match self.spec.kind {
            IndexKind::Ascending => match &value {
                Value::Array(items) if !items.is_empty() => {
                    let mut keys: BTreeSet<String> = items.iter().map(encode_key).collect();
                    keys.insert(encode_key(&value));
                    keys.into_iter().collect()
                }
                _ => vec![encode_key(&value)],
            },
            IndexKind::Hashed => vec![hash_key(&value)],
        }
    }

    /// Key a lookup value resolves to under this index.
    fn lookup_key(&self, value: &Value) -> String {
        match self.spec.kind {
            IndexKind::Ascending => encode_key(value),
            IndexKind::Hashed => hash_key(value),
        }
    }

    fn add(&mut self, id: DocId, doc: &Document) {
        for key in self.keys_for(doc) {
            self.entries.entry(key).or_default().insert(id);
        }
    }

    fn remove(&mut self, id: DocId, doc: &Document) {
        for key in self.keys_for(doc) {
            if let Some(ids) = self.entries.get_mut(&key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    fn distinct_ids(&self) -> BTreeSet<DocId> {
        self.entries.values().flatten().copied().collect()
    }
}

#[derive(Debug, Clone, Default)]
struct Collection {
    capped: Option<CappedSpec>,
    docs: BTreeMap<DocId, Document>,
    sizes: BTreeMap<DocId, u64>,
    total_bytes: u64,
    indexes: BTreeMap<String, Index>,
}

impl Collection {
    fn insert(&mut self, id: DocId, doc: Document) {
        let size = doc_size(&doc);
        for index in self.indexes.values_mut() {
            index.add(id, &doc);
        }
        self.docs.insert(id, doc);
        self.sizes.insert(id, size);
        self.total_bytes += size;
        self.evict_to_cap();
    }

    /// Oldest-first eviction; ids are monotonic, so the first key is the
    /// oldest record. Runs after every size-changing mutation so a capped
    /// collection never stays over its bound.
    fn evict_to_cap(&mut self) {
        let Some(capped) = self.capped else {
            return;
        };
        while self.total_bytes > capped.size {
            let oldest = match self.docs.keys().next() {
                Some(id) => *id,
                None => break,
            };
            self.remove(oldest);
        }
    }

    fn remove(&mut self, id: DocId) {
        if let Some(doc) = self.docs.remove(&id) {
            for index in self.indexes.values_mut() {
                index.remove(id, &doc);
            }
            if let Some(size) = self.sizes.remove(&id) {
                self.total_bytes -= size;
            }
        }
    }

    fn update(&mut self, id: DocId, set: &Document) {
        let Some(old) = self.docs.get(&id).cloned() else {
            return;
        };
        let mut new = old.clone();
        for (field, value) in set {
            new.insert(field.clone(), value.clone());
        }

        for index in self.indexes.values_mut() {
            index.remove(id, &old);
            index.add(id, &new);
        }
        let new_size = doc_size(&new);
        if let Some(size) = self.sizes.insert(id, new_size) {
            self.total_bytes -= size;
        }
        self.total_bytes += new_size;
        self.docs.insert(id, new);
        self.evict_to_cap();
    }
}

fn doc_size(doc: &Document) -> u64 {
    Value::Object(doc.clone()).to_string().len() as u64
}

/// The whole store: collections plus the id allocator.
#[derive(Debug)]
pub struct Store {
    collections: BTreeMap<String, Collection>,
    next_id: DocId,
}

impl Store {
    pub fn new() -> Self {
        Store {
            collections: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Rebuild from a replayed operation sequence.
    pub fn replay(ops: &[LogOp]) -> EngineResult<Self> {
        let mut store = Store::new();
        for op in ops {
            store.apply(op)?;
        }
        Ok(store)
    }

    pub fn collection_exists(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn index_exists(&self, collection: &str, index: &str) -> bool {
        self.collections
            .get(collection)
            .is_some_and(|c| c.indexes.contains_key(index))
    }

    /// Reserve `n` consecutive document ids.
    pub fn allocate_ids(&mut self, n: usize) -> Vec<DocId> {
        let start = self.next_id;
        self.next_id += n as DocId;
        (start..self.next_id).collect()
    }

    /// First document matching `filter`, in insertion order.
    pub fn find_first(&self, collection: &str, filter: &Filter) -> Option<DocId> {
        let coll = self.collections.get(collection)?;
        coll.docs
            .iter()
            .find(|(_, doc)| matches_filter(doc, filter))
            .map(|(id, _)| *id)
    }

    /// Every document matching `filter`, in insertion order.
    pub fn find_all(&self, collection: &str, filter: &Filter) -> Vec<DocId> {
        match self.collections.get(collection) {
            Some(coll) => coll
                .docs
                .iter()
                .filter(|(_, doc)| matches_filter(doc, filter))
                .map(|(id, _)| *id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Apply one committed operation. Must stay deterministic: this runs both
    /// on the live path (after the log append) and during replay.
    pub fn apply(&mut self, op: &LogOp) -> EngineResult<()> {
        match op {
            LogOp::CreateCollection { collection, capped } => {
                self.collections
                    .entry(collection.clone())
                    .or_insert_with(|| Collection {
                        capped: *capped,
                        ..Collection::default()
                    });
            }
            LogOp::DropCollection { collection } => {
                self.collections.remove(collection);
            }
            LogOp::CreateIndexes {
                collection,
                indexes,
            } => {
                let coll = self
                    .collections
                    .get_mut(collection)
                    .ok_or_else(|| EngineError::UnknownCollection(collection.clone()))?;
                for spec in indexes {
                    if coll.indexes.contains_key(&spec.name) {
                        continue;
                    }
                    let mut index = Index::new(spec.clone());
                    for (id, doc) in &coll.docs {
                        index.add(*id, doc);
                    }
                    coll.indexes.insert(spec.name.clone(), index);
                }
            }
            LogOp::Insert { collection, docs } => {
                let coll = self.collections.entry(collection.clone()).or_default();
                for (id, doc) in docs {
                    coll.insert(*id, doc.clone());
                    self.next_id = self.next_id.max(id + 1);
                }
            }
            LogOp::Update {
                collection,
                id,
                set,
            } => {
                if let Some(coll) = self.collections.get_mut(collection) {
                    coll.update(*id, set);
                }
            }
            LogOp::Delete { collection, ids } => {
                if let Some(coll) = self.collections.get_mut(collection) {
                    for id in ids {
                        coll.remove(*id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Count records through the chosen access path.
    ///
    /// `hint` forces the path: `_id` scans the primary order, any other name
    /// must be an existing secondary index. Without a hint this is a full
    /// scan with a residual filter.
    pub fn count(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        hint: Option<&str>,
    ) -> EngineResult<u64> {
        let Some(coll) = self.collections.get(collection) else {
            return Ok(0);
        };

        let matches = |id: &DocId| match (coll.docs.get(id), filter) {
            (Some(doc), Some(f)) => matches_filter(doc, f),
            (Some(_), None) => true,
            (None, _) => false,
        };

        match hint {
            None | Some("_id") => Ok(coll
                .docs
                .iter()
                .filter(|(_, doc)| filter.map_or(true, |f| matches_filter(doc, f)))
                .count() as u64),
            Some(name) => {
                let index = coll
                    .indexes
                    .get(name)
                    .ok_or_else(|| EngineError::UnknownIndex(name.to_string()))?;

                // Use the index for the equality lookup when the filter
                // covers the indexed field; residual-filter the candidates
                // either way.
                let candidates: BTreeSet<DocId> = match filter
                    .and_then(|f| f.get(&index.spec.field))
                {
                    Some(value) => index
                        .entries
                        .get(&index.lookup_key(value))
                        .cloned()
                        .unwrap_or_default(),
                    None => index.distinct_ids(),
                };
                Ok(candidates.iter().filter(|id| matches(id)).count() as u64)
            }
        }
    }

    /// Structural self-check: rebuild every index from the documents and
    /// compare against the live index.
    pub fn validate(&self, collection: &str) -> (bool, Value) {
        let Some(coll) = self.collections.get(collection) else {
            return (true, json!({"collection": collection, "note": "no such collection"}));
        };

        let mut valid = true;
        let mut index_reports = Vec::new();
        for (name, index) in &coll.indexes {
            let mut rebuilt = Index::new(index.spec.clone());
            for (id, doc) in &coll.docs {
                rebuilt.add(*id, doc);
            }
            let consistent = rebuilt.entries == index.entries;
            valid &= consistent;
            index_reports.push(json!({
                "name": name,
                "keys": index.entries.len(),
                "entries": index.entries.values().map(|ids| ids.len()).sum::<usize>(),
                "consistent": consistent,
            }));
        }

        let details = json!({
            "collection": collection,
            "record_count": coll.docs.len(),
            "bytes": coll.total_bytes,
            "capped": coll.capped.map(|c| c.size),
            "indexes": index_reports,
        });
        (valid, details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    fn filter(v: Value) -> Filter {
        v.as_object().cloned().unwrap().into_iter().collect()
    }

    fn store_with_indexes(indexes: Vec<IndexSpec>) -> Store {
        let mut store = Store::new();
        store
            .apply(&LogOp::CreateCollection {
                collection: "testt".to_string(),
                capped: None,
            })
            .unwrap();
        store
            .apply(&LogOp::CreateIndexes {
                collection: "testt".to_string(),
                indexes,
            })
            .unwrap();
        store
    }

    fn insert(store: &mut Store, docs: Vec<Value>) {
        let ids = store.allocate_ids(docs.len());
        let docs = ids.into_iter().zip(docs.into_iter().map(doc)).collect();
        store
            .apply(&LogOp::Insert {
                collection: "testt".to_string(),
                docs,
            })
            .unwrap();
    }

    #[test]
    fn full_scan_and_index_counts_agree() {
        let mut store = store_with_indexes(vec![
            IndexSpec::ascending("a", "a"),
            IndexSpec::ascending("b", "b"),
        ]);
        insert(
            &mut store,
            vec![json!({"a": "a", "b": "b"}), json!({"a": "a", "b": "c"})],
        );

        assert_eq!(store.count("testt", None, None).unwrap(), 2);
        assert_eq!(store.count("testt", None, Some("_id")).unwrap(), 2);
        assert_eq!(store.count("testt", None, Some("a")).unwrap(), 2);
        assert_eq!(
            store
                .count("testt", Some(&filter(json!({"a": "a"}))), Some("a"))
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .count("testt", Some(&filter(json!({"b": "b"}))), Some("b"))
                .unwrap(),
            1
        );
    }

    #[test]
    fn multikey_index_counts_by_element() {
        let mut store = store_with_indexes(vec![IndexSpec::ascending("b", "b")]);
        insert(&mut store, vec![json!({"a": "a", "b": [1, 2, 3]})]);

        for element in [1, 2, 3] {
            assert_eq!(
                store
                    .count("testt", Some(&filter(json!({"b": element}))), Some("b"))
                    .unwrap(),
                1
            );
        }
        // One document, several index keys, one distinct id.
        assert_eq!(store.count("testt", None, Some("b")).unwrap(), 1);
    }

    #[test]
    fn whole_array_filter_agrees_between_scan_and_index() {
        let mut store = store_with_indexes(vec![IndexSpec::ascending("b", "b")]);
        insert(&mut store, vec![json!({"a": "a", "b": [1, 2, 3]})]);

        let f = filter(json!({"b": [1, 2, 3]}));
        let scanned = store.count("testt", Some(&f), None).unwrap();
        let hinted = store.count("testt", Some(&f), Some("b")).unwrap();
        assert_eq!(scanned, 1);
        assert_eq!(hinted, scanned);

        let miss = filter(json!({"b": [1, 2]}));
        assert_eq!(store.count("testt", Some(&miss), None).unwrap(), 0);
        assert_eq!(store.count("testt", Some(&miss), Some("b")).unwrap(), 0);
        let (valid, _) = store.validate("testt");
        assert!(valid);
    }

    #[test]
    fn hashed_index_counts_by_value() {
        let mut store = store_with_indexes(vec![IndexSpec::hashed("h", "h")]);
        insert(&mut store, vec![json!({"h": 1, "h2": 2})]);

        assert_eq!(
            store
                .count("testt", Some(&filter(json!({"h": 1}))), Some("h"))
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .count("testt", Some(&filter(json!({"h": 2}))), Some("h"))
                .unwrap(),
            0
        );
    }

    #[test]
    fn unknown_index_hint_is_an_error() {
        let store = store_with_indexes(vec![]);
        assert!(matches!(
            store.count("testt", None, Some("nope")),
            Err(EngineError::UnknownIndex(_))
        ));
    }

    #[test]
    fn update_moves_document_across_index_keys() {
        let mut store = store_with_indexes(vec![IndexSpec::ascending("a", "a")]);
        insert(&mut store, vec![json!({"a": "a"})]);

        let id = store.find_first("testt", &filter(json!({"a": "a"}))).unwrap();
        store
            .apply(&LogOp::Update {
                collection: "testt".to_string(),
                id,
                set: doc(json!({"a": "b"})),
            })
            .unwrap();

        assert_eq!(
            store
                .count("testt", Some(&filter(json!({"a": "a"}))), Some("a"))
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .count("testt", Some(&filter(json!({"a": "b"}))), Some("a"))
                .unwrap(),
            1
        );
        let (valid, _) = store.validate("testt");
        assert!(valid);
    }

    #[test]
    fn capped_collection_evicts_oldest_and_stays_consistent() {
        let mut store = Store::new();
        store
            .apply(&LogOp::CreateCollection {
                collection: "testt".to_string(),
                capped: Some(CappedSpec { size: 64 }),
            })
            .unwrap();
        store
            .apply(&LogOp::CreateIndexes {
                collection: "testt".to_string(),
                indexes: vec![IndexSpec::ascending("a", "a")],
            })
            .unwrap();

        for i in 0..10 {
            insert(&mut store, vec![json!({"a": i, "pad": "xxxxxxxxxx"})]);
        }

        let total = store.count("testt", None, None).unwrap();
        assert!(total < 10, "eviction must have removed old records");
        assert!(total > 0);
        assert_eq!(store.count("testt", None, Some("a")).unwrap(), total);
        // The survivors are the newest records.
        assert_eq!(
            store
                .count("testt", Some(&filter(json!({"a": 0}))), Some("a"))
                .unwrap(),
            0
        );
        let (valid, _) = store.validate("testt");
        assert!(valid);
    }

    #[test]
    fn update_that_grows_a_document_evicts_from_capped_collection() {
        let mut store = Store::new();
        store
            .apply(&LogOp::CreateCollection {
                collection: "testt".to_string(),
                capped: Some(CappedSpec { size: 64 }),
            })
            .unwrap();
        store
            .apply(&LogOp::CreateIndexes {
                collection: "testt".to_string(),
                indexes: vec![IndexSpec::ascending("a", "a")],
            })
            .unwrap();

        // Two records just under the bound.
        insert(
            &mut store,
            vec![
                json!({"a": "a", "pad": "xxxxxxxxxx"}),
                json!({"a": "b", "pad": "xxxxxxxxxx"}),
            ],
        );
        assert_eq!(store.count("testt", None, None).unwrap(), 2);

        // Growing the newer record pushes the collection over the bound; the
        // oldest record must go.
        let id = store.find_first("testt", &filter(json!({"a": "b"}))).unwrap();
        store
            .apply(&LogOp::Update {
                collection: "testt".to_string(),
                id,
                set: doc(json!({"pad": "xxxxxxxxxxxxxxxxxxxx"})),
            })
            .unwrap();

        assert_eq!(store.count("testt", None, None).unwrap(), 1);
        assert_eq!(store.count("testt", None, Some("a")).unwrap(), 1);
        assert_eq!(
            store
                .count("testt", Some(&filter(json!({"a": "a"}))), Some("a"))
                .unwrap(),
            0
        );
        let (valid, _) = store.validate("testt");
        assert!(valid);
    }

    #[test]
    fn replay_reproduces_the_same_state() {
        let ops = vec![
            LogOp::CreateCollection {
                collection: "testt".to_string(),
                capped: Some(CappedSpec { size: 200 }),
            },
            LogOp::CreateIndexes {
                collection: "testt".to_string(),
                indexes: vec![IndexSpec::ascending("a", "a")],
            },
            LogOp::Insert {
                collection: "testt".to_string(),
                docs: vec![(1, doc(json!({"a": "a"}))), (2, doc(json!({"a": "b"})))],
            },
            LogOp::Update {
                collection: "testt".to_string(),
                id: 2,
                set: doc(json!({"a": "c"})),
            },
            LogOp::Delete {
                collection: "testt".to_string(),
                ids: vec![1],
            },
        ];

        let first = Store::replay(&ops).unwrap();
        let second = Store::replay(&ops).unwrap();
        for f in [json!({"a": "a"}), json!({"a": "b"}), json!({"a": "c"})] {
            let f = filter(f);
            assert_eq!(
                first.count("testt", Some(&f), Some("a")).unwrap(),
                second.count("testt", Some(&f), Some("a")).unwrap(),
            );
        }
        assert_eq!(first.count("testt", None, None).unwrap(), 1);
        assert_eq!(first.count("testt", None, Some("a")).unwrap(), 1);
    }

    #[test]
    fn find_first_respects_insertion_order() {
        let mut store = store_with_indexes(vec![]);
        insert(&mut store, vec![json!({"a": "a", "n": 1}), json!({"a": "a", "n": 2})]);
        let id = store.find_first("testt", &filter(json!({"a": "a"}))).unwrap();
        let all = store.find_all("testt", &filter(json!({"a": "a"})));
        assert_eq!(all.first(), Some(&id));
        assert_eq!(all.len(), 2);
    }
}
