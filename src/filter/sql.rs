//! SQL statement builder
//!
//! Builds the SQL text for structured table reads and row edits in each
//! backend's dialect. Every identifier is quoted and every value is rendered
//! as an escaped literal, so no caller text is ever spliced in verbatim.
//!
//! # Dialect differences
//! | dialect    | identifiers | booleans     | backslashes | offset-only paging     |
//! |------------|-------------|--------------|-------------|------------------------|
//! | postgres   | `"x"`       | `TRUE/FALSE` | literal     | `OFFSET n`             |
//! | mysql      | `` `x` ``   | `TRUE/FALSE` | doubled     | `LIMIT <max> OFFSET n` |
//! | clickhouse | `` `x` ``   | `TRUE/FALSE` | doubled     | `OFFSET n ROWS`        |
//! | sqlite     | `"x"`       | `1/0`        | literal     | `LIMIT -1 OFFSET n`    |
//!
//! ClickHouse row edits are mutations (`ALTER TABLE … UPDATE/DELETE`).

use serde_json::Value;

use crate::driver::DatabaseType;
use crate::error::{OmniDbError, Result};
use crate::filter::validate_filters;
use crate::model::{BulkOperation, Filter, FilterOperator, SortDirection, SortSpec, TableQueryOptions, ValueMap};

/// SQL dialect of a SQL-family backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    Postgres,
    MySql,
    ClickHouse,
    SQLite,
}

impl SqlDialect {
    /// Dialect for a backend type; `None` for document backends
    #[must_use]
    pub const fn for_type(database_type: DatabaseType) -> Option<Self> {
        match database_type {
            DatabaseType::Postgres => Some(Self::Postgres),
            DatabaseType::MySql => Some(Self::MySql),
            DatabaseType::ClickHouse => Some(Self::ClickHouse),
            DatabaseType::SQLite => Some(Self::SQLite),
            DatabaseType::MongoDb => None,
        }
    }

    const fn quote_char(self) -> char {
        match self {
            Self::Postgres | Self::SQLite => '"',
            Self::MySql | Self::ClickHouse => '`',
        }
    }

    const fn escapes_backslash(self) -> bool {
        matches!(self, Self::MySql | Self::ClickHouse)
    }

    /// Quote an identifier, doubling embedded quote characters
    #[must_use]
    pub fn quote_identifier(self, name: &str) -> String {
        let q = self.quote_char();
        let mut quoted = String::with_capacity(name.len() + 2);
        quoted.push(q);
        for c in name.chars() {
            if c == q {
                quoted.push(q);
            }
            quoted.push(c);
        }
        quoted.push(q);
        quoted
    }

    /// `"table"` or `"database"."table"`
    ///
    /// For PostgreSQL the qualifier is the schema.
    #[must_use]
    pub fn table_reference(self, database: Option<&str>, table: &str) -> String {
        match database.filter(|db| !db.is_empty()) {
            Some(db) => format!("{}.{}", self.quote_identifier(db), self.quote_identifier(table)),
            None => self.quote_identifier(table),
        }
    }

    /// Single-quoted string literal
    #[must_use]
    pub fn quote_string(self, text: &str) -> String {
        let mut quoted = String::with_capacity(text.len() + 2);
        quoted.push('\'');
        for c in text.chars() {
            match c {
                '\'' => quoted.push_str("''"),
                '\\' if self.escapes_backslash() => quoted.push_str("\\\\"),
                _ => quoted.push(c),
            }
        }
        quoted.push('\'');
        quoted
    }

    /// Render a JSON value as a SQL literal
    ///
    /// Arrays and objects are stored as their JSON text.
    #[must_use]
    pub fn literal(self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => match (self, b) {
                (Self::SQLite, true) => "1".to_string(),
                (Self::SQLite, false) => "0".to_string(),
                (_, true) => "TRUE".to_string(),
                (_, false) => "FALSE".to_string(),
            },
            Value::Number(n) => n.to_string(),
            Value::String(s) => self.quote_string(s),
            Value::Array(_) | Value::Object(_) => self.quote_string(&value.to_string()),
        }
    }

    fn literal_list(self, values: &[Value]) -> String {
        values.iter().map(|v| self.literal(v)).collect::<Vec<_>>().join(", ")
    }

    /// Translate one validated filter into a boolean SQL expression
    pub fn condition(self, filter: &Filter) -> Result<String> {
        let column = self.quote_identifier(&filter.column);
        let value = filter.value.as_ref().unwrap_or(&Value::Null);

        let expr = match filter.operator {
            FilterOperator::Eq => format!("{column} = {}", self.literal(value)),
            FilterOperator::NotEq => format!("{column} <> {}", self.literal(value)),
            FilterOperator::Gt => format!("{column} > {}", self.literal(value)),
            FilterOperator::Lt => format!("{column} < {}", self.literal(value)),
            FilterOperator::Gte => format!("{column} >= {}", self.literal(value)),
            FilterOperator::Lte => format!("{column} <= {}", self.literal(value)),
            FilterOperator::Like => format!("{column} LIKE {}", self.like_pattern(value)),
            FilterOperator::NotLike => format!("{column} NOT LIKE {}", self.like_pattern(value)),
            FilterOperator::In => format!("{column} IN ({})", self.literal_list(array(filter)?)),
            FilterOperator::NotIn => format!("{column} NOT IN ({})", self.literal_list(array(filter)?)),
            FilterOperator::IsNull => format!("{column} IS NULL"),
            FilterOperator::IsNotNull => format!("{column} IS NOT NULL"),
            FilterOperator::Between | FilterOperator::NotBetween => {
                let bounds = array(filter)?;
                let [low, high] = bounds else {
                    return Err(OmniDbError::invalid_input(format!(
                        "{} requires exactly two values",
                        filter.operator
                    )));
                };
                format!("{column} {} {} AND {}", filter.operator, self.literal(low), self.literal(high))
            }
        };
        Ok(expr)
    }

    /// Contains-match pattern: `'%value%'`
    fn like_pattern(self, value: &Value) -> String {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.quote_string(&format!("%{text}%"))
    }

    /// `" WHERE a AND b"`, or an empty string without filters
    pub fn where_clause(self, filters: &[Filter]) -> Result<String> {
        if filters.is_empty() {
            return Ok(String::new());
        }
        validate_filters(filters)?;
        let conditions = filters.iter().map(|f| self.condition(f)).collect::<Result<Vec<_>>>()?;
        Ok(format!(" WHERE {}", conditions.join(" AND ")))
    }

    #[must_use]
    pub fn order_by_clause(self, order_by: &[SortSpec]) -> String {
        if order_by.is_empty() {
            return String::new();
        }
        let terms = order_by
            .iter()
            .map(|s| {
                let dir = match s.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                format!("{} {dir}", self.quote_identifier(&s.column))
            })
            .collect::<Vec<_>>();
        format!(" ORDER BY {}", terms.join(", "))
    }

    #[must_use]
    pub fn limit_clause(self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (None, Some(offset)) => match self {
                Self::Postgres => format!(" OFFSET {offset}"),
                Self::MySql => format!(" LIMIT 18446744073709551615 OFFSET {offset}"),
                Self::ClickHouse => format!(" OFFSET {offset} ROWS"),
                Self::SQLite => format!(" LIMIT -1 OFFSET {offset}"),
            },
        }
    }

    /// Filtered, sorted, paged read
    pub fn select_query(self, options: &TableQueryOptions) -> Result<String> {
        let table = self.checked_table(options.database.as_deref(), &options.table)?;
        Ok(format!(
            "SELECT * FROM {table}{}{}{}",
            self.where_clause(&options.filters)?,
            self.order_by_clause(&options.order_by),
            self.limit_clause(options.limit, options.offset)
        ))
    }

    /// Row count under the same predicate as [`Self::select_query`]
    pub fn count_query(self, options: &TableQueryOptions) -> Result<String> {
        let table = self.checked_table(options.database.as_deref(), &options.table)?;
        Ok(format!("SELECT COUNT(*) AS total FROM {table}{}", self.where_clause(&options.filters)?))
    }

    pub fn insert_statement(self, database: Option<&str>, table: &str, data: &ValueMap) -> Result<String> {
        let table = self.checked_table(database, table)?;
        if data.is_empty() {
            return Err(OmniDbError::invalid_input("Insert requires at least one column value"));
        }
        let columns = data.keys().map(|k| self.quote_identifier(k)).collect::<Vec<_>>().join(", ");
        let values = data.values().map(|v| self.literal(v)).collect::<Vec<_>>().join(", ");
        Ok(format!("INSERT INTO {table} ({columns}) VALUES ({values})"))
    }

    pub fn update_statement(
        self,
        database: Option<&str>,
        table: &str,
        primary_key: &ValueMap,
        data: &ValueMap,
    ) -> Result<String> {
        let table = self.checked_table(database, table)?;
        if data.is_empty() {
            return Err(OmniDbError::invalid_input("Update requires at least one column value"));
        }
        let key = self.key_predicate(primary_key)?;
        let assignments = data
            .iter()
            .map(|(k, v)| format!("{} = {}", self.quote_identifier(k), self.literal(v)))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(match self {
            Self::ClickHouse => format!("ALTER TABLE {table} UPDATE {assignments} WHERE {key}"),
            _ => format!("UPDATE {table} SET {assignments} WHERE {key}"),
        })
    }

    pub fn delete_statement(self, database: Option<&str>, table: &str, primary_key: &ValueMap) -> Result<String> {
        let table = self.checked_table(database, table)?;
        let key = self.key_predicate(primary_key)?;
        Ok(match self {
            Self::ClickHouse => format!("ALTER TABLE {table} DELETE WHERE {key}"),
            _ => format!("DELETE FROM {table} WHERE {key}"),
        })
    }

    /// Statement for one bulk step
    pub fn operation_statement(self, operation: &BulkOperation) -> Result<String> {
        match operation {
            BulkOperation::Insert { table, database, data } => {
                self.insert_statement(database.as_deref(), table, data)
            }
            BulkOperation::Update { table, database, primary_key, data } => {
                self.update_statement(database.as_deref(), table, primary_key, data)
            }
            BulkOperation::Delete { table, database, primary_key } => {
                self.delete_statement(database.as_deref(), table, primary_key)
            }
        }
    }

    fn key_predicate(self, primary_key: &ValueMap) -> Result<String> {
        if primary_key.is_empty() {
            return Err(OmniDbError::invalid_input("A primary key is required to address the row"));
        }
        Ok(primary_key
            .iter()
            .map(|(k, v)| match v {
                Value::Null => format!("{} IS NULL", self.quote_identifier(k)),
                _ => format!("{} = {}", self.quote_identifier(k), self.literal(v)),
            })
            .collect::<Vec<_>>()
            .join(" AND "))
    }

    fn checked_table(self, database: Option<&str>, table: &str) -> Result<String> {
        if table.trim().is_empty() {
            return Err(OmniDbError::invalid_input("Table name cannot be empty"));
        }
        Ok(self.table_reference(database, table))
    }
}

fn array(filter: &Filter) -> Result<&[Value]> {
    match filter.value.as_ref() {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(OmniDbError::invalid_input(format!(
            "{} on column '{}' requires an array value",
            filter.operator, filter.column
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn map(value: Value) -> ValueMap {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(SqlDialect::Postgres.quote_identifier("users"), r#""users""#);
        assert_eq!(SqlDialect::Postgres.quote_identifier(r#"we"ird"#), r#""we""ird""#);
        assert_eq!(SqlDialect::MySql.quote_identifier("order"), "`order`");
        assert_eq!(SqlDialect::ClickHouse.quote_identifier("a`b"), "`a``b`");
        assert_eq!(SqlDialect::SQLite.table_reference(Some("main"), "t"), r#""main"."t""#);
        assert_eq!(SqlDialect::Postgres.table_reference(Some(""), "t"), r#""t""#);
    }

    #[test]
    fn test_literals() {
        assert_eq!(SqlDialect::Postgres.literal(&json!(null)), "NULL");
        assert_eq!(SqlDialect::Postgres.literal(&json!(42)), "42");
        assert_eq!(SqlDialect::Postgres.literal(&json!(1.5)), "1.5");
        assert_eq!(SqlDialect::Postgres.literal(&json!(true)), "TRUE");
        assert_eq!(SqlDialect::SQLite.literal(&json!(true)), "1");
        assert_eq!(SqlDialect::SQLite.literal(&json!(false)), "0");
        assert_eq!(SqlDialect::Postgres.literal(&json!("O'Brien")), "'O''Brien'");
        assert_eq!(SqlDialect::Postgres.literal(&json!(r"a\b")), r"'a\b'");
        assert_eq!(SqlDialect::MySql.literal(&json!(r"a\b")), r"'a\\b'");
        assert_eq!(SqlDialect::MySql.literal(&json!({"k": [1]})), r#"'{"k":[1]}'"#);
    }

    #[test]
    fn test_every_operator() {
        let d = SqlDialect::Postgres;
        let cases = [
            (Filter::new("a", FilterOperator::Eq, 1), r#""a" = 1"#),
            (Filter::new("a", FilterOperator::NotEq, 1), r#""a" <> 1"#),
            (Filter::new("a", FilterOperator::Gt, 1), r#""a" > 1"#),
            (Filter::new("a", FilterOperator::Lt, 1), r#""a" < 1"#),
            (Filter::new("a", FilterOperator::Gte, 1), r#""a" >= 1"#),
            (Filter::new("a", FilterOperator::Lte, 1), r#""a" <= 1"#),
            (Filter::new("a", FilterOperator::Like, "x"), r#""a" LIKE '%x%'"#),
            (Filter::new("a", FilterOperator::NotLike, "x"), r#""a" NOT LIKE '%x%'"#),
            (Filter::new("a", FilterOperator::In, json!([1, 2])), r#""a" IN (1, 2)"#),
            (Filter::new("a", FilterOperator::NotIn, json!(["x"])), r#""a" NOT IN ('x')"#),
            (Filter::null_check("a", FilterOperator::IsNull), r#""a" IS NULL"#),
            (Filter::null_check("a", FilterOperator::IsNotNull), r#""a" IS NOT NULL"#),
            (Filter::new("a", FilterOperator::Between, json!([1, 9])), r#""a" BETWEEN 1 AND 9"#),
            (Filter::new("a", FilterOperator::NotBetween, json!([1, 9])), r#""a" NOT BETWEEN 1 AND 9"#),
        ];
        for (filter, expected) in cases {
            assert_eq!(d.condition(&filter).unwrap(), expected);
        }
    }

    #[test]
    fn test_select_query_postgres() {
        let options = TableQueryOptions {
            database: Some("public".into()),
            table: "users".into(),
            filters: vec![
                Filter::new("age", FilterOperator::Gte, 18),
                Filter::new("name", FilterOperator::Like, "ali"),
            ],
            order_by: vec![SortSpec::desc("age"), SortSpec::asc("id")],
            limit: Some(10),
            offset: Some(5),
        };
        assert_snapshot!(
            SqlDialect::Postgres.select_query(&options).unwrap(),
            @r#"SELECT * FROM "public"."users" WHERE "age" >= 18 AND "name" LIKE '%ali%' ORDER BY "age" DESC, "id" ASC LIMIT 10 OFFSET 5"#
        );
        assert_snapshot!(
            SqlDialect::Postgres.count_query(&options).unwrap(),
            @r#"SELECT COUNT(*) AS total FROM "public"."users" WHERE "age" >= 18 AND "name" LIKE '%ali%'"#
        );
    }

    #[test]
    fn test_offset_only_paging() {
        let mut options = TableQueryOptions::new("t");
        options.offset = Some(20);
        assert_snapshot!(SqlDialect::MySql.select_query(&options).unwrap(), @"SELECT * FROM `t` LIMIT 18446744073709551615 OFFSET 20");
        assert_snapshot!(SqlDialect::SQLite.select_query(&options).unwrap(), @r#"SELECT * FROM "t" LIMIT -1 OFFSET 20"#);
        assert_snapshot!(SqlDialect::Postgres.select_query(&options).unwrap(), @r#"SELECT * FROM "t" OFFSET 20"#);
        assert_snapshot!(SqlDialect::ClickHouse.select_query(&options).unwrap(), @"SELECT * FROM `t` OFFSET 20 ROWS");
    }

    #[test]
    fn test_select_without_filters() {
        let options = TableQueryOptions::new("users");
        assert_eq!(SqlDialect::MySql.select_query(&options).unwrap(), "SELECT * FROM `users`");
    }

    #[test]
    fn test_invalid_filter_rejected_before_building() {
        let mut options = TableQueryOptions::new("users");
        options.filters.push(Filter::new("id", FilterOperator::In, json!([])));
        assert!(SqlDialect::Postgres.select_query(&options).is_err());
    }

    #[test]
    fn test_insert_statement() {
        let data = map(json!({"active": true, "name": "Ann", "score": null}));
        assert_snapshot!(
            SqlDialect::SQLite.insert_statement(None, "users", &data).unwrap(),
            @r#"INSERT INTO "users" ("active", "name", "score") VALUES (1, 'Ann', NULL)"#
        );
        assert!(SqlDialect::SQLite.insert_statement(None, "users", &ValueMap::new()).is_err());
    }

    #[test]
    fn test_update_and_delete_statements() {
        let pk = map(json!({"id": 7}));
        let data = map(json!({"name": "O'Neil"}));
        assert_snapshot!(
            SqlDialect::MySql.update_statement(Some("shop"), "users", &pk, &data).unwrap(),
            @"UPDATE `shop`.`users` SET `name` = 'O''Neil' WHERE `id` = 7"
        );
        assert_snapshot!(
            SqlDialect::Postgres.delete_statement(None, "users", &pk).unwrap(),
            @r#"DELETE FROM "users" WHERE "id" = 7"#
        );
        assert!(SqlDialect::Postgres.delete_statement(None, "users", &ValueMap::new()).is_err());
        assert!(SqlDialect::Postgres.update_statement(None, "users", &pk, &ValueMap::new()).is_err());
    }

    #[test]
    fn test_clickhouse_mutations() {
        let pk = map(json!({"id": 1, "tenant": "a"}));
        let data = map(json!({"status": "done"}));
        assert_snapshot!(
            SqlDialect::ClickHouse.update_statement(None, "jobs", &pk, &data).unwrap(),
            @"ALTER TABLE `jobs` UPDATE `status` = 'done' WHERE `id` = 1 AND `tenant` = 'a'"
        );
        assert_snapshot!(
            SqlDialect::ClickHouse.delete_statement(Some("default"), "jobs", &pk).unwrap(),
            @"ALTER TABLE `default`.`jobs` DELETE WHERE `id` = 1 AND `tenant` = 'a'"
        );
    }

    #[test]
    fn test_null_primary_key_component() {
        let pk = map(json!({"id": null}));
        assert_eq!(
            SqlDialect::Postgres.delete_statement(None, "t", &pk).unwrap(),
            r#"DELETE FROM "t" WHERE "id" IS NULL"#
        );
    }

    #[test]
    fn test_operation_statement() {
        let op: BulkOperation = serde_json::from_value(json!({
            "type": "delete", "table": "users", "primaryKey": {"id": 3}
        }))
        .unwrap();
        assert_eq!(
            SqlDialect::SQLite.operation_statement(&op).unwrap(),
            r#"DELETE FROM "users" WHERE "id" = 3"#
        );
    }

    #[test]
    fn test_empty_table_name() {
        assert!(SqlDialect::Postgres.select_query(&TableQueryOptions::new(" ")).is_err());
    }
}
