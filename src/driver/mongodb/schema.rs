//! Schema inference for schemaless collections
//!
//! A collection's shape is guessed from a sample of its documents. The result
//! depends only on the sampled documents, not on their order: `_id` comes
//! first, the remaining fields are sorted by name, and a field seen with
//! several BSON types reports them joined with `" | "`.

use std::collections::{BTreeMap, BTreeSet};

use mongodb::bson::{Bson, Document};

use crate::driver::mongodb::convert::bson_type_name;
use crate::model::{ColumnInfo, TableSchema};

/// Documents sampled per collection
pub const SAMPLE_SIZE: i64 = 100;

#[derive(Default)]
struct FieldStats {
    types: BTreeSet<&'static str>,
    seen: usize,
    has_null: bool,
}

/// Infer a table schema from sampled documents
#[must_use]
pub fn infer_schema(collection: &str, documents: &[Document]) -> TableSchema {
    let mut fields: BTreeMap<&str, FieldStats> = BTreeMap::new();

    for doc in documents {
        for (name, value) in doc {
            let stats = fields.entry(name.as_str()).or_default();
            stats.seen += 1;
            if matches!(value, Bson::Null) {
                stats.has_null = true;
            } else {
                stats.types.insert(bson_type_name(value));
            }
        }
    }

    let id_stats = fields.remove("_id");
    let mut columns = Vec::with_capacity(fields.len() + 1);

    // `_id` always exists in a stored document, even for an empty sample
    let mut id = match id_stats {
        Some(stats) => column("_id", &stats, documents.len()),
        None => ColumnInfo::new("_id", "objectId", false),
    };
    id.nullable = false;
    id.is_primary_key = true;
    id.is_unique = true;
    columns.push(id);

    columns.extend(fields.iter().map(|(name, stats)| column(name, stats, documents.len())));

    let mut schema = TableSchema::from_catalog(collection, columns, vec!["_id".to_string()], Vec::new());
    schema.inferred = true;
    schema
}

fn column(name: &str, stats: &FieldStats, sampled: usize) -> ColumnInfo {
    let data_type = if stats.types.is_empty() {
        "null".to_string()
    } else {
        stats.types.iter().copied().collect::<Vec<_>>().join(" | ")
    };
    ColumnInfo::new(name, data_type, stats.has_null || stats.seen < sampled)
}
