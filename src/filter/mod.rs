//! Filter Translator
//!
//! Turns backend-neutral [`Filter`] predicates into native query fragments:
//! - [`sql`]: quoted, escaped SQL text per dialect
//! - [`document`]: BSON filter documents (MongoDB)
//!
//! Filters are always joined with AND. Validation runs before any translation
//! so both translators can assume well-shaped values.

pub mod sql;

#[cfg(feature = "mongodb")]
pub mod document;

use serde_json::Value;

use crate::error::{OmniDbError, Result};
use crate::model::{Filter, FilterOperator};

/// Validate that a filter's value has the shape its operator needs
pub fn validate_filter(filter: &Filter) -> Result<()> {
    if filter.column.trim().is_empty() {
        return Err(OmniDbError::invalid_input("Filter column cannot be empty"));
    }

    let op = filter.operator;
    match (op, filter.value.as_ref()) {
        (FilterOperator::IsNull | FilterOperator::IsNotNull, None | Some(Value::Null)) => Ok(()),
        (FilterOperator::IsNull | FilterOperator::IsNotNull, Some(_)) => {
            Err(shape_error(filter, "takes no value"))
        }
        (FilterOperator::In | FilterOperator::NotIn, Some(Value::Array(items))) if !items.is_empty() => {
            Ok(())
        }
        (FilterOperator::In | FilterOperator::NotIn, _) => {
            Err(shape_error(filter, "requires a non-empty array"))
        }
        (FilterOperator::Between | FilterOperator::NotBetween, Some(Value::Array(items)))
            if items.len() == 2 =>
        {
            Ok(())
        }
        (FilterOperator::Between | FilterOperator::NotBetween, _) => {
            Err(shape_error(filter, "requires an array of exactly two values"))
        }
        (_, Some(value)) if is_scalar(value) => Ok(()),
        (_, _) => Err(shape_error(filter, "requires a scalar value")),
    }
}

/// Validate every filter, stopping at the first bad one
pub fn validate_filters(filters: &[Filter]) -> Result<()> {
    filters.iter().try_for_each(validate_filter)
}

/// Strings, numbers and booleans
const fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn shape_error(filter: &Filter, detail: &str) -> OmniDbError {
    OmniDbError::invalid_input(format!(
        "Operator {} on column '{}' {detail}",
        filter.operator, filter.column
    ))
}
