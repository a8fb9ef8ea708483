//! Payload filter grammar for the vector store: a filter is a conjunction
//! of predicates over payload keys — `equals`, `in_set`, `range`
//! (numeric/time fields), `contains_all`/`contains_any` (tag arrays),
//! `exists` — compiled directly into SQL.

use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MnemosyneError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    Equals(Value),
    InSet(Vec<Value>),
    Range {
        #[serde(skip_serializing_if = "Option::is_none")]
        gte: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lte: Option<Value>,
    },
    ContainsAll(Vec<String>),
    ContainsAny(Vec<String>),
    Exists(bool),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PayloadFilter {
    /// Field name -> predicate; all predicates must hold (AND).
    #[serde(flatten)]
    pub predicates: std::collections::HashMap<String, PredicateOp>,
}

impl PayloadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, op: PredicateOp) -> Self {
        self.predicates.insert(field.into(), op);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

/// One of the fixed payload columns, or a `metadata.<path>` lookup.
enum Field {
    Memory,
    Category,
    ChunkIndex,
    Importance,
    CreatedAt,
    UpdatedAt,
    LastAccessedAt,
    AccessCount,
    Tags,
    Metadata(String),
}

fn parse_field(name: &str) -> Result<Field> {
    Ok(match name {
        "memory_id" => Field::Memory,
        "category" => Field::Category,
        "chunk_index" => Field::ChunkIndex,
        "importance" => Field::Importance,
        "created_at" => Field::CreatedAt,
        "updated_at" => Field::UpdatedAt,
        "last_accessed_at" => Field::LastAccessedAt,
        "access_count" => Field::AccessCount,
        "tags" => Field::Tags,
        s if s.starts_with("metadata.") => Field::Metadata(s["metadata.".len()..].to_string()),
        other => {
            return Err(MnemosyneError::InvalidInput(format!(
                "unknown filter field: {other}"
            )))
        }
    })
}

impl Field {
    fn column(&self) -> String {
        match self {
            Field::Memory => "memory_id".to_string(),
            Field::Category => "category".to_string(),
            Field::ChunkIndex => "chunk_index".to_string(),
            Field::Importance => "importance".to_string(),
            Field::CreatedAt => "created_at".to_string(),
            Field::UpdatedAt => "updated_at".to_string(),
            Field::LastAccessedAt => "last_accessed_at".to_string(),
            Field::AccessCount => "access_count".to_string(),
            Field::Tags => "tags".to_string(),
            Field::Metadata(path) => format!("json_extract(metadata, '$.{path}')"),
        }
    }
}

fn json_to_sql(value: &Value) -> Result<Box<dyn ToSql>> {
    match value {
        Value::String(s) => Ok(Box::new(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Box::new(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Box::new(f))
            } else {
                Err(MnemosyneError::InvalidInput("invalid number in filter".to_string()))
            }
        }
        Value::Bool(b) => Ok(Box::new(*b)),
        other => Err(MnemosyneError::InvalidInput(format!(
            "unsupported filter value: {other}"
        ))),
    }
}

/// Compile a `PayloadFilter` into a `WHERE` clause fragment (without the
/// leading `WHERE`) plus its bound parameters, in clause order.
pub fn compile(filter: &PayloadFilter) -> Result<(String, Vec<Box<dyn ToSql>>)> {
    if filter.is_empty() {
        return Ok(("1=1".to_string(), Vec::new()));
    }

    let mut clauses = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    for (name, op) in &filter.predicates {
        let field = parse_field(name)?;
        let column = field.column();
        match op {
            PredicateOp::Equals(v) => {
                params.push(json_to_sql(v)?);
                clauses.push(format!("{column} = ?"));
            }
            PredicateOp::InSet(values) => {
                if values.is_empty() {
                    clauses.push("1=0".to_string());
                    continue;
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                for v in values {
                    params.push(json_to_sql(v)?);
                }
                clauses.push(format!("{column} IN ({placeholders})"));
            }
            PredicateOp::Range { gte, lte } => {
                if let Some(v) = gte {
                    params.push(json_to_sql(v)?);
                    clauses.push(format!("{column} >= ?"));
                }
                if let Some(v) = lte {
                    params.push(json_to_sql(v)?);
                    clauses.push(format!("{column} <= ?"));
                }
            }
            PredicateOp::ContainsAll(tags) => {
                if !matches!(field, Field::Tags) {
                    return Err(MnemosyneError::InvalidInput(
                        "contains_all is only valid on tags".to_string(),
                    ));
                }
                for tag in tags {
                    params.push(Box::new(tag.clone()));
                    clauses.push(
                        "EXISTS (SELECT 1 FROM json_each(tags) WHERE json_each.value = ?)"
                            .to_string(),
                    );
                }
            }
            PredicateOp::ContainsAny(tags) => {
                if !matches!(field, Field::Tags) {
                    return Err(MnemosyneError::InvalidInput(
                        "contains_any is only valid on tags".to_string(),
                    ));
                }
                if tags.is_empty() {
                    clauses.push("1=0".to_string());
                    continue;
                }
                let placeholders = vec!["?"; tags.len()].join(", ");
                for tag in tags {
                    params.push(Box::new(tag.clone()));
                }
                clauses.push(format!(
                    "EXISTS (SELECT 1 FROM json_each(tags) WHERE json_each.value IN ({placeholders}))"
                ));
            }
            PredicateOp::Exists(exists) => {
                let predicate = if *exists { "IS NOT NULL" } else { "IS NULL" };
                clauses.push(format!("{column} {predicate}"));
            }
        }
    }

    Ok((clauses.join(" AND "), params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equals_compiles_to_eq_clause() {
        let filter = PayloadFilter::new().with("importance", PredicateOp::Equals(json!(0.8)));
        let (sql, params) = compile(&filter).unwrap();
        assert_eq!(sql, "importance = ?");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn metadata_path_uses_json_extract() {
        let filter =
            PayloadFilter::new().with("metadata.project", PredicateOp::Equals(json!("engine")));
        let (sql, _) = compile(&filter).unwrap();
        assert!(sql.contains("json_extract(metadata, '$.project')"));
    }

    #[test]
    fn contains_all_requires_tags_field() {
        let filter =
            PayloadFilter::new().with("importance", PredicateOp::ContainsAll(vec!["x".into()]));
        assert!(compile(&filter).is_err());
    }

    #[test]
    fn empty_filter_matches_everything() {
        let (sql, params) = compile(&PayloadFilter::new()).unwrap();
        assert_eq!(sql, "1=1");
        assert!(params.is_empty());
    }

    #[test]
    fn multiple_predicates_conjoin_with_and() {
        let filter = PayloadFilter::new()
            .with("importance", PredicateOp::Range { gte: Some(json!(0.5)), lte: None })
            .with("access_count", PredicateOp::Range { gte: None, lte: Some(json!(10)) });
        let (sql, params) = compile(&filter).unwrap();
        assert!(sql.contains("AND"));
        assert_eq!(params.len(), 2);
    }
}
