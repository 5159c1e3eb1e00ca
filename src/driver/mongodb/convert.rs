//! JSON <-> BSON conversion
//!
//! Incoming JSON understands two extended-JSON wrappers, `{"$oid": "<hex>"}`
//! and `{"$date": "<rfc3339>" | <millis>}`. Outgoing BSON is flattened to plain
//! JSON: ObjectIds become hex strings, dates RFC 3339 strings, binary Base64.

use base64::Engine;
use mongodb::bson::{self, oid::ObjectId, Bson, Document};
use serde_json::Value;

use crate::error::{OmniDbError, Result};

/// Convert JSON to BSON, honouring `$oid` / `$date` wrappers
pub fn json_to_bson(value: &Value) -> Result<Bson> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i32::try_from(i).map_or(Bson::Int64(i), Bson::Int32)
            } else {
                Bson::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect::<Result<_>>()?),
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(hex)) = map.get("$oid") {
                    return ObjectId::parse_str(hex)
                        .map(Bson::ObjectId)
                        .map_err(|e| OmniDbError::invalid_input(format!("Invalid $oid '{hex}': {e}")));
                }
                match map.get("$date") {
                    Some(Value::String(text)) => {
                        return bson::DateTime::parse_rfc3339_str(text)
                            .map(Bson::DateTime)
                            .map_err(|e| OmniDbError::invalid_input(format!("Invalid $date '{text}': {e}")));
                    }
                    Some(Value::Number(millis)) => {
                        let millis = millis
                            .as_i64()
                            .ok_or_else(|| OmniDbError::invalid_input("$date must be integer milliseconds"))?;
                        return Ok(Bson::DateTime(bson::DateTime::from_millis(millis)));
                    }
                    _ => {}
                }
            }
            let mut doc = Document::new();
            for (k, v) in map {
                doc.insert(k.clone(), json_to_bson(v)?);
            }
            Bson::Document(doc)
        }
    })
}

/// Convert a JSON object to a BSON document
pub fn json_to_document(value: &Value) -> Result<Document> {
    match json_to_bson(value)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(OmniDbError::invalid_input(format!(
            "Expected a JSON object, got {}",
            bson_type_name(&other)
        ))),
    }
}

/// Convert a BSON value to plain JSON
pub fn bson_to_json(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::Number((*i).into()),
        Bson::Int64(i) => Value::Number((*i).into()),
        Bson::Double(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Bson::String(s) | Bson::Symbol(s) => Value::String(s.clone()),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => Value::String(dt.try_to_rfc3339_string().unwrap_or_else(|_| dt.to_string())),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(doc) => document_to_json(doc),
        Bson::Binary(bin) => Value::String(base64::engine::general_purpose::STANDARD.encode(&bin.bytes)),
        Bson::RegularExpression(regex) => Value::String(format!("/{}/{}", regex.pattern, regex.options)),
        Bson::Timestamp(ts) => Value::String(format!("Timestamp({}, {})", ts.time, ts.increment)),
        other => Value::String(format!("{other}")),
    }
}

/// Convert a whole document, keeping field order
pub fn document_to_json(doc: &Document) -> Value {
    Value::Object(doc.iter().map(|(k, v)| (k.clone(), bson_to_json(v))).collect())
}

/// Human-readable type name used by schema inference
#[must_use]
pub fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Null => "null",
        Bson::Boolean(_) => "bool",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::Double(_) => "double",
        Bson::Decimal128(_) => "decimal128",
        Bson::String(_) => "string",
        Bson::ObjectId(_) => "objectId",
        Bson::DateTime(_) => "date",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Binary(_) => "binary",
        Bson::RegularExpression(_) => "regex",
        Bson::Timestamp(_) => "timestamp",
        _ => "unknown",
    }
}
