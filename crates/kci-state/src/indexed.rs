//! Indexed-sequence keys.
//!
//! Stages record ordered facts as a family of scalar keys sharing a prefix:
//! `mergerepo_00`, `mergerepo_01`, ... On load each family is folded back into
//! one list under a collection key, ordered by the numeric suffix, so stage
//! code never re-parses the naming scheme.

use serde_json::Value;
use std::collections::BTreeMap;

/// How a family's collection treats repeated values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Every entry kept, in index order.
    Sequence,
    /// Index order, first occurrence of each value only.
    Distinct,
}

/// A `prefix_NN` key family and the collection key it is folded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedFamily {
    pub prefix: &'static str,
    pub collection: &'static str,
    pub kind: CollectionKind,
}

/// Families the pipeline writes.
pub const FAMILIES: &[IndexedFamily] = &[
    IndexedFamily {
        prefix: "jobid",
        collection: "jobs",
        kind: CollectionKind::Distinct,
    },
    IndexedFamily {
        prefix: "mergerepo",
        collection: "mergerepos",
        kind: CollectionKind::Sequence,
    },
    IndexedFamily {
        prefix: "mergehead",
        collection: "mergeheads",
        kind: CollectionKind::Sequence,
    },
    IndexedFamily {
        prefix: "localpatch",
        collection: "localpatches",
        kind: CollectionKind::Sequence,
    },
    IndexedFamily {
        prefix: "patchwork",
        collection: "patchworks",
        kind: CollectionKind::Sequence,
    },
];

/// Key for entry `index` of the `prefix` family, e.g. `jobid_03`.
pub fn indexed_key(prefix: &str, index: usize) -> String {
    format!("{prefix}_{index:02}")
}

/// Split `key` into its family and numeric index, if it belongs to one.
pub fn parse_indexed(key: &str) -> Option<(&'static IndexedFamily, usize)> {
    let (prefix, suffix) = key.rsplit_once('_')?;
    if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let family = FAMILIES.iter().find(|f| f.prefix == prefix)?;
    let index = suffix.parse().ok()?;
    Some((family, index))
}

/// Accumulates family entries while a record is being read.
#[derive(Debug, Default)]
pub(crate) struct Collector {
    entries: BTreeMap<&'static str, BTreeMap<usize, String>>,
}

impl Collector {
    /// Offer one persisted entry. Non-family keys are ignored.
    pub(crate) fn offer(&mut self, key: &str, value: &str) {
        if let Some((family, index)) = parse_indexed(key) {
            self.entries
                .entry(family.collection)
                .or_default()
                .insert(index, value.to_string());
        }
    }

    /// Collection key and list value for every family seen.
    pub(crate) fn finish(self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        for family in FAMILIES {
            let Some(entries) = self.entries.get(family.collection) else {
                continue;
            };
            let mut values: Vec<String> = Vec::with_capacity(entries.len());
            for value in entries.values() {
                if family.kind == CollectionKind::Distinct && values.contains(value) {
                    continue;
                }
                values.push(value.clone());
            }
            out.push((family.collection, Value::from(values)));
        }
        out
    }
}
