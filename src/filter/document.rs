//! BSON filter builder
//!
//! Maps [`Filter`] predicates onto MongoDB query operators. LIKE patterns use
//! SQL wildcards (`%`, `_`) and become case-insensitive regular expressions;
//! every other regex metacharacter is escaped.

use mongodb::bson::{doc, oid::ObjectId, Bson, Document, Regex};
use serde_json::Value;

use crate::driver::mongodb::convert::json_to_bson;
use crate::error::Result;
use crate::filter::validate_filters;
use crate::model::{Filter, FilterOperator, SortDirection, SortSpec};

/// Build the filter document for a list of AND-joined filters
pub fn build_filter(filters: &[Filter]) -> Result<Document> {
    validate_filters(filters)?;

    let mut clauses = filters.iter().map(filter_clause).collect::<Result<Vec<_>>>()?;
    Ok(match clauses.len() {
        0 => Document::new(),
        1 => clauses.remove(0),
        _ => doc! { "$and": clauses.into_iter().map(Bson::Document).collect::<Vec<_>>() },
    })
}

/// Translate one validated filter
pub fn filter_clause(filter: &Filter) -> Result<Document> {
    let column = filter.column.as_str();
    let value = filter.value.as_ref().unwrap_or(&Value::Null);

    let condition: Bson = match filter.operator {
        FilterOperator::Eq => field_value(column, value)?,
        FilterOperator::NotEq => doc! { "$ne": field_value(column, value)? }.into(),
        FilterOperator::Gt => doc! { "$gt": field_value(column, value)? }.into(),
        FilterOperator::Lt => doc! { "$lt": field_value(column, value)? }.into(),
        FilterOperator::Gte => doc! { "$gte": field_value(column, value)? }.into(),
        FilterOperator::Lte => doc! { "$lte": field_value(column, value)? }.into(),
        FilterOperator::Like => Bson::RegularExpression(like_regex(value)),
        FilterOperator::NotLike => doc! { "$not": Bson::RegularExpression(like_regex(value)) }.into(),
        FilterOperator::In => doc! { "$in": field_values(column, value)? }.into(),
        FilterOperator::NotIn => doc! { "$nin": field_values(column, value)? }.into(),
        FilterOperator::IsNull => Bson::Null,
        FilterOperator::IsNotNull => doc! { "$ne": Bson::Null }.into(),
        FilterOperator::Between => range(column, value)?.into(),
        FilterOperator::NotBetween => doc! { "$not": range(column, value)? }.into(),
    };

    let mut clause = Document::new();
    clause.insert(column, condition);
    Ok(clause)
}

/// Sort document: `{column: 1 | -1}` in the given order
#[must_use]
pub fn build_sort(order_by: &[SortSpec]) -> Document {
    order_by
        .iter()
        .map(|s| {
            let dir = match s.direction {
                SortDirection::Asc => 1,
                SortDirection::Desc => -1,
            };
            (s.column.clone(), Bson::Int32(dir))
        })
        .collect()
}

/// Convert a filter value, turning ObjectId hex strings on `_id` into ObjectIds
fn field_value(column: &str, value: &Value) -> Result<Bson> {
    if column == "_id" {
        if let Value::String(hex) = value {
            if let Ok(oid) = ObjectId::parse_str(hex) {
                return Ok(Bson::ObjectId(oid));
            }
        }
    }
    json_to_bson(value)
}

fn field_values(column: &str, value: &Value) -> Result<Vec<Bson>> {
    match value {
        Value::Array(items) => items.iter().map(|v| field_value(column, v)).collect(),
        other => Ok(vec![field_value(column, other)?]),
    }
}

fn range(column: &str, value: &Value) -> Result<Document> {
    let (low, high) = match value {
        Value::Array(items) if items.len() == 2 => (&items[0], &items[1]),
        other => (other, other),
    };
    Ok(doc! { "$gte": field_value(column, low)?, "$lte": field_value(column, high)? })
}

/// SQL LIKE pattern to a case-insensitive regex
fn like_regex(value: &Value) -> Regex {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Regex { pattern: like_to_regex(&text), options: "i".to_string() }
}

/// `%` matches any run, `_` any single character, everything else literally
#[must_use]
pub fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' | '.' | '^' | '$' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '/' => {
                regex.push('\\');
                regex.push(c);
            }
            _ => regex.push(c),
        }
    }
    regex
}
