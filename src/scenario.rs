//! Scenario model and the built-in scenario table
//!
//! A scenario is an immutable description: schema setup, seed records, the
//! racing operation, and the post-recovery count assertions. The table is
//! plain data; the orchestrator is the single piece of control flow.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::protocol::{CappedSpec, Document, Filter, IndexSpec};

/// The single mutating call whose completion relative to the hard kill is
/// deliberately left nondeterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RacingOp {
    InsertOne { document: Document },
    InsertMany { documents: Vec<Document> },
    UpdateOne { filter: Filter, set: Document },
    DeleteOne { filter: Filter },
    DeleteMany { filter: Filter },
}

/// A way of counting records that should agree with a full scan: an equality
/// filter, an index hint by name, or both. No filter and no hint is the full
/// scan itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPath {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl AccessPath {
    /// Count through a named index with no filter.
    pub fn hinted(index: &str) -> Self {
        AccessPath {
            name: format!("hint:{}", index),
            filter: None,
            hint: Some(index.to_string()),
        }
    }

    /// Count documents matching an equality filter through a named index.
    pub fn filtered(index: &str, filter: Value) -> Self {
        let filter = as_filter(filter);
        let desc = filter
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        AccessPath {
            name: format!("{}[{}]", index, desc),
            filter: Some(filter),
            hint: Some(index.to_string()),
        }
    }
}

/// One post-recovery count assertion.
///
/// `MatchesFullScan` is the core oracle: presence or absence of the racing
/// write must be consistent between the full scan and the access path.
/// `Partition` covers update races: the record is wholly in its old state or
/// wholly in its new state, so the two counts sum to the full scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CountAssertion {
    MatchesFullScan { path: AccessPath },
    AllEqual { paths: Vec<AccessPath> },
    Partition { paths: Vec<AccessPath> },
}

impl CountAssertion {
    /// Short label used in reports.
    pub fn label(&self) -> String {
        match self {
            CountAssertion::MatchesFullScan { path } => format!("full_scan == {}", path.name),
            CountAssertion::AllEqual { paths } => format!(
                "equal({})",
                paths.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ")
            ),
            CountAssertion::Partition { paths } => format!(
                "full_scan == sum({})",
                paths.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ")
            ),
        }
    }

    /// All access paths this assertion needs counted.
    pub fn paths(&self) -> &[AccessPath] {
        match self {
            CountAssertion::MatchesFullScan { path } => std::slice::from_ref(path),
            CountAssertion::AllEqual { paths } | CountAssertion::Partition { paths } => paths,
        }
    }
}

/// Immutable description of one crash/recover run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capped: Option<CappedSpec>,
    pub indexes: Vec<IndexSpec>,
    pub seed: Vec<Document>,
    pub racing_op: RacingOp,
    pub assertions: Vec<CountAssertion>,
}

fn as_doc(v: Value) -> Document {
    match v {
        Value::Object(map) => map,
        other => panic!("scenario document must be a JSON object, got {}", other),
    }
}

fn as_filter(v: Value) -> Filter {
    as_doc(v).into_iter().collect()
}

fn full_scan_matches(path: AccessPath) -> CountAssertion {
    CountAssertion::MatchesFullScan { path }
}

/// The built-in scenario table.
///
/// Every scenario seeds through the orchestrator, races exactly one mutating
/// call against the kill, and asserts count consistency after recovery. The
/// mix covers single and compound index sets, multikey arrays, hashed keys,
/// capped collections, and bulk inserts.
pub fn builtin_scenarios() -> Vec<Scenario> {
    let coll = "testt".to_string();
    vec![
        Scenario {
            name: "delete_one_single_index".to_string(),
            collection: coll.clone(),
            capped: None,
            indexes: vec![IndexSpec::ascending("a", "a")],
            seed: vec![as_doc(json!({"a": "a"}))],
            racing_op: RacingOp::DeleteOne {
                filter: as_filter(json!({"a": "a"})),
            },
            assertions: vec![full_scan_matches(AccessPath::filtered("a", json!({"a": "a"})))],
        },
        Scenario {
            name: "delete_one_two_indexes".to_string(),
            collection: coll.clone(),
            capped: None,
            indexes: vec![IndexSpec::ascending("a", "a"), IndexSpec::ascending("b", "b")],
            seed: vec![as_doc(json!({"a": "a", "b": "b"}))],
            racing_op: RacingOp::DeleteOne {
                filter: as_filter(json!({"a": "a", "b": "b"})),
            },
            assertions: vec![
                full_scan_matches(AccessPath::filtered("a", json!({"a": "a"}))),
                full_scan_matches(AccessPath::filtered("b", json!({"b": "b"}))),
            ],
        },
        Scenario {
            name: "delete_many_four_indexes".to_string(),
            collection: coll.clone(),
            capped: None,
            indexes: vec![
                IndexSpec::ascending("a", "a"),
                IndexSpec::ascending("b", "b"),
                IndexSpec::ascending("c", "c"),
                IndexSpec::ascending("d", "d"),
            ],
            seed: vec![
                as_doc(json!({"a": "a", "b": "b", "c": "c", "d": "d"})),
                as_doc(json!({"a": "a", "b": "b", "c": "c", "d": "d"})),
            ],
            racing_op: RacingOp::DeleteMany {
                filter: as_filter(json!({"a": "a", "b": "b", "c": "c", "d": "d"})),
            },
            assertions: vec![
                full_scan_matches(AccessPath::filtered("a", json!({"a": "a"}))),
                full_scan_matches(AccessPath::filtered("b", json!({"b": "b"}))),
                full_scan_matches(AccessPath::filtered("c", json!({"c": "c"}))),
                full_scan_matches(AccessPath::filtered("d", json!({"d": "d"}))),
            ],
        },
        Scenario {
            name: "insert_one_primary_only".to_string(),
            collection: coll.clone(),
            capped: None,
            indexes: vec![],
            seed: vec![],
            racing_op: RacingOp::InsertOne {
                document: as_doc(json!({"a": "a"})),
            },
            assertions: vec![full_scan_matches(AccessPath::hinted("_id"))],
        },
        Scenario {
            name: "insert_one_two_indexes".to_string(),
            collection: coll.clone(),
            capped: None,
            indexes: vec![IndexSpec::ascending("a", "a"), IndexSpec::ascending("b", "b")],
            seed: vec![],
            racing_op: RacingOp::InsertOne {
                document: as_doc(json!({"a": "a", "b": "b"})),
            },
            assertions: vec![
                full_scan_matches(AccessPath::hinted("_id")),
                full_scan_matches(AccessPath::hinted("a")),
                full_scan_matches(AccessPath::hinted("b")),
            ],
        },
        Scenario {
            name: "insert_one_multikey".to_string(),
            collection: coll.clone(),
            capped: None,
            indexes: vec![IndexSpec::ascending("a", "a"), IndexSpec::ascending("b", "b")],
            seed: vec![],
            racing_op: RacingOp::InsertOne {
                document: as_doc(json!({"a": "a", "b": [1, 2, 3]})),
            },
            assertions: vec![
                full_scan_matches(AccessPath::hinted("_id")),
                full_scan_matches(AccessPath::hinted("a")),
                full_scan_matches(AccessPath::filtered("b", json!({"b": 1}))),
                full_scan_matches(AccessPath::filtered("b", json!({"b": 2}))),
                full_scan_matches(AccessPath::filtered("b", json!({"b": 3}))),
            ],
        },
        Scenario {
            name: "insert_one_hashed_index".to_string(),
            collection: coll.clone(),
            capped: None,
            indexes: vec![IndexSpec::hashed("h", "h")],
            seed: vec![],
            racing_op: RacingOp::InsertOne {
                document: as_doc(json!({"h": 1, "h2": 2})),
            },
            assertions: vec![
                full_scan_matches(AccessPath::hinted("_id")),
                full_scan_matches(AccessPath::filtered("h", json!({"h": 1}))),
            ],
        },
        Scenario {
            name: "insert_one_capped_two_indexes".to_string(),
            collection: coll.clone(),
            capped: Some(CappedSpec { size: 100_000 }),
            indexes: vec![IndexSpec::ascending("a", "a"), IndexSpec::ascending("b", "b")],
            seed: vec![],
            racing_op: RacingOp::InsertOne {
                document: as_doc(json!({"a": 1, "b": 0})),
            },
            assertions: vec![
                full_scan_matches(AccessPath::hinted("_id")),
                full_scan_matches(AccessPath::hinted("a")),
                full_scan_matches(AccessPath::hinted("b")),
            ],
        },
        Scenario {
            name: "insert_many_four_indexes".to_string(),
            collection: coll.clone(),
            capped: None,
            indexes: vec![
                IndexSpec::ascending("a", "a"),
                IndexSpec::ascending("b", "b"),
                IndexSpec::ascending("c", "c"),
                IndexSpec::ascending("d", "d"),
            ],
            seed: vec![],
            racing_op: RacingOp::InsertMany {
                documents: std::iter::repeat_with(|| {
                    as_doc(json!({"a": "a", "b": "b", "c": "x", "d": "d"}))
                })
                .take(101)
                .collect(),
            },
            assertions: vec![
                full_scan_matches(AccessPath::hinted("_id")),
                full_scan_matches(AccessPath::hinted("a")),
                full_scan_matches(AccessPath::hinted("b")),
                full_scan_matches(AccessPath::hinted("c")),
                full_scan_matches(AccessPath::hinted("d")),
            ],
        },
        Scenario {
            name: "update_one_single_index".to_string(),
            collection: coll.clone(),
            capped: None,
            indexes: vec![IndexSpec::ascending("a", "a")],
            seed: vec![as_doc(json!({"a": "a"}))],
            racing_op: RacingOp::UpdateOne {
                filter: as_filter(json!({"a": "a"})),
                set: as_doc(json!({"a": "b"})),
            },
            // The record must be wholly old or wholly new, never both or
            // neither.
            assertions: vec![CountAssertion::Partition {
                paths: vec![
                    AccessPath::filtered("a", json!({"a": "a"})),
                    AccessPath::filtered("a", json!({"a": "b"})),
                ],
            }],
        },
        Scenario {
            name: "update_one_capped_two_indexes".to_string(),
            collection: coll.clone(),
            capped: Some(CappedSpec { size: 100_000 }),
            indexes: vec![IndexSpec::ascending("a", "a"), IndexSpec::ascending("b", "b")],
            seed: vec![as_doc(json!({"a": "a", "b": "b"}))],
            racing_op: RacingOp::UpdateOne {
                filter: as_filter(json!({"a": "a", "b": "b"})),
                set: as_doc(json!({"a": "c", "b": "d"})),
            },
            // Partial application (a updated but not b) must never be
            // observable through the indexes.
            assertions: vec![
                CountAssertion::AllEqual {
                    paths: vec![
                        AccessPath::filtered("a", json!({"a": "c"})),
                        AccessPath::filtered("b", json!({"b": "d"})),
                    ],
                },
                CountAssertion::AllEqual {
                    paths: vec![
                        AccessPath::filtered("a", json!({"a": "a"})),
                        AccessPath::filtered("b", json!({"b": "b"})),
                    ],
                },
                CountAssertion::Partition {
                    paths: vec![
                        AccessPath::filtered("a", json!({"a": "a"})),
                        AccessPath::filtered("a", json!({"a": "c"})),
                    ],
                },
                CountAssertion::Partition {
                    paths: vec![
                        AccessPath::filtered("b", json!({"b": "b"})),
                        AccessPath::filtered("b", json!({"b": "d"})),
                    ],
                },
            ],
        },
    ]
}

/// Look up a built-in scenario by name.
pub fn find_builtin(name: &str) -> Option<Scenario> {
    builtin_scenarios().into_iter().find(|s| s.name == name)
}
