//! MongoDB command language
//!
//! Raw MongoDB query text is parsed into a [`MongoCommand`], never evaluated.
//! Two spellings are accepted:
//!
//! ```text
//! db.users.find({"age": {"$gte": 18}}, {"name": 1});
//! db.getCollectionNames()
//! db.createCollection("events")
//! {"collection": "users", "operation": "find", "filter": {"age": 30}, "limit": 10}
//! ```
//!
//! Shell-style arguments are strict JSON, parsed together as one JSON array.
//! Method chaining (`.limit(5)`) is not part of the language; the JSON form
//! carries `sort`, `limit` and `skip` instead.

use mongodb::bson::Document;
use serde::Deserialize;
use serde_json::Value;

use crate::capability::QueryCategory;
use crate::driver::mongodb::convert::json_to_document;
use crate::error::{OmniDbError, Result};

/// One parsed operation
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOp {
    Find { filter: Document, projection: Option<Document>, sort: Option<Document>, limit: Option<i64>, skip: Option<u64> },
    FindOne { filter: Document, projection: Option<Document> },
    Aggregate { pipeline: Vec<Document> },
    CountDocuments { filter: Document },
    Distinct { field: String, filter: Document },
    GetCollectionNames,
    InsertOne { document: Document },
    InsertMany { documents: Vec<Document> },
    UpdateOne { filter: Document, update: Document },
    UpdateMany { filter: Document, update: Document },
    DeleteOne { filter: Document },
    DeleteMany { filter: Document },
    Drop,
    CreateCollection,
}

impl CommandOp {
    /// Method name as written in the shell form
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::Find { .. } => "find",
            Self::FindOne { .. } => "findOne",
            Self::Aggregate { .. } => "aggregate",
            Self::CountDocuments { .. } => "countDocuments",
            Self::Distinct { .. } => "distinct",
            Self::GetCollectionNames => "getCollectionNames",
            Self::InsertOne { .. } => "insertOne",
            Self::InsertMany { .. } => "insertMany",
            Self::UpdateOne { .. } => "updateOne",
            Self::UpdateMany { .. } => "updateMany",
            Self::DeleteOne { .. } => "deleteOne",
            Self::DeleteMany { .. } => "deleteMany",
            Self::Drop => "drop",
            Self::CreateCollection => "createCollection",
        }
    }

    /// Statement category, on the same scale as SQL statements
    #[must_use]
    pub const fn category(&self) -> QueryCategory {
        match self {
            Self::Find { .. }
            | Self::FindOne { .. }
            | Self::Aggregate { .. }
            | Self::CountDocuments { .. }
            | Self::Distinct { .. } => QueryCategory::Read,
            Self::GetCollectionNames => QueryCategory::System,
            Self::InsertOne { .. } | Self::InsertMany { .. } => QueryCategory::Insert,
            Self::UpdateOne { .. } | Self::UpdateMany { .. } => QueryCategory::Update,
            Self::DeleteOne { .. } | Self::DeleteMany { .. } => QueryCategory::Delete,
            Self::Drop | Self::CreateCollection => QueryCategory::Ddl,
        }
    }
}

/// A parsed command addressed to a collection (or to the database)
#[derive(Debug, Clone, PartialEq)]
pub struct MongoCommand {
    /// Target collection; `None` only for `getCollectionNames`
    pub collection: Option<String>,
    pub op: CommandOp,
}

/// Arguments shared by both spellings, before per-method validation
#[derive(Debug, Default)]
struct Args {
    filter: Option<Value>,
    projection: Option<Value>,
    sort: Option<Value>,
    limit: Option<i64>,
    skip: Option<u64>,
    pipeline: Option<Vec<Value>>,
    document: Option<Value>,
    documents: Option<Vec<Value>>,
    update: Option<Value>,
    field: Option<String>,
}

/// JSON spelling
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonCommand {
    #[serde(default)]
    collection: Option<String>,
    operation: String,
    #[serde(default)]
    filter: Option<Value>,
    #[serde(default)]
    projection: Option<Value>,
    #[serde(default)]
    sort: Option<Value>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    skip: Option<u64>,
    #[serde(default)]
    pipeline: Option<Vec<Value>>,
    #[serde(default)]
    document: Option<Value>,
    #[serde(default)]
    documents: Option<Vec<Value>>,
    #[serde(default)]
    update: Option<Value>,
    #[serde(default)]
    field: Option<String>,
}

impl JsonCommand {
    fn into_parts(self) -> (Option<String>, String, Args) {
        let args = Args {
            filter: self.filter,
            projection: self.projection,
            sort: self.sort,
            limit: self.limit,
            skip: self.skip,
            pipeline: self.pipeline,
            document: self.document,
            documents: self.documents,
            update: self.update,
            field: self.field,
        };
        (self.collection, self.operation, args)
    }
}

impl MongoCommand {
    #[must_use]
    pub const fn category(&self) -> QueryCategory {
        self.op.category()
    }

    /// Parse either spelling
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let text = text.strip_suffix(';').unwrap_or(text).trim_end();

        if text.is_empty() {
            return Err(OmniDbError::invalid_input("Query cannot be empty"));
        }
        if text.starts_with('{') {
            return Self::parse_json(text);
        }
        if let Some(rest) = text.strip_prefix("db.") {
            return Self::parse_shell(rest);
        }
        Err(OmniDbError::invalid_input(
            "MongoDB queries must be db.<collection>.<method>(...) or a JSON command object",
        ))
    }

    fn parse_json(text: &str) -> Result<Self> {
        let command: JsonCommand = serde_json::from_str(text)
            .map_err(|e| OmniDbError::invalid_input(format!("Invalid JSON command: {e}")))?;
        let (collection, operation, args) = command.into_parts();
        build(collection, &operation, args)
    }

    /// `rest` is the text after `db.`
    fn parse_shell(rest: &str) -> Result<Self> {
        let open = rest
            .find('(')
            .ok_or_else(|| OmniDbError::invalid_input("Expected a method call, e.g. db.users.find({})"))?;
        let body = rest[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| OmniDbError::invalid_input("Method call must end with ')'"))?;

        let target = &rest[..open];
        let (collection, method) = match target.rsplit_once('.') {
            Some((collection, method)) if !collection.is_empty() => (Some(collection.to_string()), method),
            Some(_) => return Err(OmniDbError::invalid_input("Collection name cannot be empty")),
            None => (None, target),
        };

        let positional: Vec<Value> = serde_json::from_str(&format!("[{body}]")).map_err(|e| {
            OmniDbError::invalid_input(format!("Arguments of {method}() must be strict JSON: {e}"))
        })?;

        if collection.is_none() {
            return match method {
                "getCollectionNames" if positional.is_empty() => build(None, method, Args::default()),
                "createCollection" => match positional.as_slice() {
                    [Value::String(name)] => build(Some(name.clone()), method, Args::default()),
                    _ => Err(OmniDbError::invalid_input("createCollection expects one collection name")),
                },
                _ => Err(OmniDbError::invalid_input(format!("Unsupported database method '{method}'"))),
            };
        }

        let args = shell_args(method, positional)?;
        build(collection, method, args)
    }
}

/// Map shell positional arguments onto named arguments
fn shell_args(method: &str, positional: Vec<Value>) -> Result<Args> {
    let max = match method {
        "find" | "findOne" | "distinct" | "updateOne" | "updateMany" => 2,
        "aggregate" | "countDocuments" | "insertOne" | "insertMany" | "deleteOne" | "deleteMany" => 1,
        "drop" => 0,
        other => return Err(OmniDbError::invalid_input(format!("Unsupported MongoDB method '{other}'"))),
    };
    if positional.len() > max {
        return Err(OmniDbError::invalid_input(format!(
            "{method}() takes at most {max} argument(s), got {}",
            positional.len()
        )));
    }

    let mut it = positional.into_iter();
    let mut args = Args::default();
    match method {
        "find" | "findOne" => {
            args.filter = it.next();
            args.projection = it.next();
        }
        "aggregate" => {
            args.pipeline = match it.next() {
                Some(Value::Array(stages)) => Some(stages),
                Some(_) => return Err(OmniDbError::invalid_input("aggregate expects an array of stages")),
                None => None,
            };
        }
        "countDocuments" | "deleteOne" | "deleteMany" => args.filter = it.next(),
        "distinct" => {
            args.field = match it.next() {
                Some(Value::String(field)) => Some(field),
                Some(_) => return Err(OmniDbError::invalid_input("distinct expects a field name")),
                None => None,
            };
            args.filter = it.next();
        }
        "insertOne" => args.document = it.next(),
        "insertMany" => {
            args.documents = match it.next() {
                Some(Value::Array(docs)) => Some(docs),
                Some(_) => return Err(OmniDbError::invalid_input("insertMany expects an array of documents")),
                None => None,
            };
        }
        "updateOne" | "updateMany" => {
            args.filter = it.next();
            args.update = it.next();
        }
        _ => {}
    }
    Ok(args)
}

fn document(value: Option<Value>) -> Result<Document> {
    value.map_or_else(|| Ok(Document::new()), |v| json_to_document(&v))
}

fn optional_document(value: Option<Value>) -> Result<Option<Document>> {
    value.map(|v| json_to_document(&v)).transpose()
}

fn required<T>(value: Option<T>, method: &str, what: &str) -> Result<T> {
    value.ok_or_else(|| OmniDbError::invalid_input(format!("{method} requires {what}")))
}

/// Validate arguments for a method and build the command
fn build(collection: Option<String>, method: &str, args: Args) -> Result<MongoCommand> {
    let op = match method {
        "find" => CommandOp::Find {
            filter: document(args.filter)?,
            projection: optional_document(args.projection)?,
            sort: optional_document(args.sort)?,
            limit: args.limit,
            skip: args.skip,
        },
        "findOne" => {
            CommandOp::FindOne { filter: document(args.filter)?, projection: optional_document(args.projection)? }
        }
        "aggregate" => CommandOp::Aggregate {
            pipeline: required(args.pipeline, method, "a pipeline")?
                .iter()
                .map(json_to_document)
                .collect::<Result<_>>()?,
        },
        "countDocuments" => CommandOp::CountDocuments { filter: document(args.filter)? },
        "distinct" => CommandOp::Distinct {
            field: required(args.field, method, "a field name")?,
            filter: document(args.filter)?,
        },
        "getCollectionNames" => CommandOp::GetCollectionNames,
        "insertOne" => CommandOp::InsertOne { document: json_to_document(&required(args.document, method, "a document")?)? },
        "insertMany" => {
            let documents = required(args.documents, method, "documents")?;
            if documents.is_empty() {
                return Err(OmniDbError::invalid_input("insertMany requires at least one document"));
            }
            CommandOp::InsertMany { documents: documents.iter().map(json_to_document).collect::<Result<_>>()? }
        }
        "updateOne" | "updateMany" => {
            let filter = json_to_document(&required(args.filter, method, "a filter")?)?;
            let update = json_to_document(&required(args.update, method, "an update document")?)?;
            if update.is_empty() {
                return Err(OmniDbError::invalid_input(format!("{method} requires a non-empty update document")));
            }
            if method == "updateOne" {
                CommandOp::UpdateOne { filter, update }
            } else {
                CommandOp::UpdateMany { filter, update }
            }
        }
        "deleteOne" => CommandOp::DeleteOne { filter: json_to_document(&required(args.filter, method, "a filter")?)? },
        "deleteMany" => CommandOp::DeleteMany { filter: json_to_document(&required(args.filter, method, "a filter")?)? },
        "drop" => CommandOp::Drop,
        "createCollection" => CommandOp::CreateCollection,
        other => return Err(OmniDbError::invalid_input(format!("Unsupported MongoDB method '{other}'"))),
    };

    if collection.as_deref().is_some_and(str::is_empty) {
        return Err(OmniDbError::invalid_input("Collection name cannot be empty"));
    }
    if collection.is_none() && !matches!(op, CommandOp::GetCollectionNames) {
        return Err(OmniDbError::invalid_input(format!("{method} requires a collection")));
    }

    Ok(MongoCommand { collection, op })
}
