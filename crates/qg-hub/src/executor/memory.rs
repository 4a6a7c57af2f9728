//! In-memory executor over JSON fixture tables.
//!
//! Evaluates single-table SELECTs: projection, WHERE, LIMIT and OFFSET.
//! Joins and aggregations are rejected as unsupported.

use super::{ExecutionError, QueryExecutor};
use async_trait::async_trait;
use qg_core::sql::{self, CompareOp, Condition};
use qg_core::Row;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryExecutor {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{ "table": [ {row}, ... ], ... }`.
    pub fn from_json(value: Value) -> Result<Self, String> {
        let Value::Object(tables) = value else {
            return Err("Fixture must be a JSON object of tables".into());
        };
        let mut out = HashMap::new();
        for (name, rows) in tables {
            let Value::Array(rows) = rows else {
                return Err(format!("Table '{}' must be an array of rows", name));
            };
            let rows = rows
                .into_iter()
                .map(|r| match r {
                    Value::Object(row) => Ok(row),
                    other => Err(format!("Row in '{}' is not an object: {}", name, other)),
                })
                .collect::<Result<Vec<Row>, String>>()?;
            out.insert(name.to_lowercase(), rows);
        }
        Ok(Self {
            tables: RwLock::new(out),
        })
    }

    pub fn from_json_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read fixtures {:?}: {}", path, e))?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse fixtures {:?}: {}", path, e))?;
        Self::from_json(value)
    }

    pub async fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    async fn execute(&self, query: &str) -> Result<Vec<Row>, ExecutionError> {
        let parsed = sql::parse(query).map_err(ExecutionError::Malformed)?;

        if !parsed.joins.is_empty() || parsed.from.len() != 1 {
            return Err(ExecutionError::Unsupported(
                "only single-table queries are supported".into(),
            ));
        }
        if parsed.columns.iter().any(|c| c.contains('(')) {
            return Err(ExecutionError::Unsupported(
                "aggregate functions are not supported".into(),
            ));
        }

        let tables = self.tables.read().await;
        let table = &parsed.from[0];
        let rows = lookup(&tables, table)
            .ok_or_else(|| ExecutionError::Backend(format!("no such table '{}'", table)))?;

        let rows = rows
            .iter()
            .filter(|row| parsed.conditions.iter().all(|c| evaluate(row, c)))
            .skip(parsed.offset)
            .take(parsed.limit.unwrap_or(usize::MAX))
            .map(|row| project(row, &parsed.columns))
            .collect();
        Ok(rows)
    }
}

/// Exact lowercase name first, then without a `schema.` prefix.
fn lookup<'a>(tables: &'a HashMap<String, Vec<Row>>, name: &str) -> Option<&'a Vec<Row>> {
    let name = name.to_lowercase();
    tables.get(&name).or_else(|| {
        name.rsplit_once('.')
            .and_then(|(_, bare)| tables.get(bare))
    })
}

fn project(row: &Row, columns: &[String]) -> Row {
    if columns.is_empty() || columns.iter().any(|c| c == "*") {
        return row.clone();
    }
    columns
        .iter()
        .map(|c| {
            let bare = c.rsplit('.').next().unwrap_or(c);
            (bare.to_string(), field(row, bare).cloned().unwrap_or(Value::Null))
        })
        .collect()
}

fn field<'a>(row: &'a Row, name: &str) -> Option<&'a Value> {
    row.get(name).or_else(|| {
        row.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

fn evaluate(row: &Row, cond: &Condition) -> bool {
    match field(row, cond.column()) {
        Some(val) => compare(val, &cond.op, &cond.value),
        None => false,
    }
}

fn compare(a: &Value, op: &CompareOp, b: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(a, b),
        CompareOp::Neq => !values_equal(a, b),
        CompareOp::Gt => numeric_cmp(a, b).map_or(false, |o| o == std::cmp::Ordering::Greater),
        CompareOp::Gte => numeric_cmp(a, b).map_or(false, |o| o != std::cmp::Ordering::Less),
        CompareOp::Lt => numeric_cmp(a, b).map_or(false, |o| o == std::cmp::Ordering::Less),
        CompareOp::Lte => numeric_cmp(a, b).map_or(false, |o| o != std::cmp::Ordering::Greater),
        CompareOp::Contains => value_to_string(a).contains(&value_to_string(b)),
        CompareOp::StartsWith => value_to_string(a).starts_with(&value_to_string(b)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(an), Some(bn)) = (value_to_f64(a), value_to_f64(b)) {
        return (an - bn).abs() < f64::EPSILON;
    }
    value_to_string(a) == value_to_string(b)
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    let an = value_to_f64(a)?;
    let bn = value_to_f64(b)?;
    an.partial_cmp(&bn)
}

fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executor() -> MemoryExecutor {
        MemoryExecutor::from_json(json!({
            "Contacts": [
                { "id": 1, "name": "Ada", "email": "ada@example.com", "score": 90 },
                { "id": 5, "name": "Grace", "email": "grace@example.com", "score": 75 },
                { "id": 7, "name": "Alan", "email": "alan@example.org", "score": 60 },
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_indexed_lookup_projects_columns() {
        let rows = executor()
            .execute("SELECT name FROM contacts WHERE id = 5")
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({ "name": "Grace" }).as_object().unwrap().clone()]);
    }

    #[tokio::test]
    async fn test_star_limit_offset() {
        let rows = executor()
            .execute("SELECT * FROM contacts WHERE score >= 60 LIMIT 1 OFFSET 1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Grace");
        assert_eq!(rows[0].len(), 4);
    }

    #[tokio::test]
    async fn test_string_operators() {
        let exec = executor();
        let rows = exec
            .execute("SELECT id FROM contacts WHERE email CONTAINS 'example.com'")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let rows = exec
            .execute("SELECT id FROM contacts WHERE name STARTSWITH 'Al'")
            .await
            .unwrap();
        assert_eq!(rows[0]["id"], 7);
    }

    #[tokio::test]
    async fn test_schema_prefix_and_qualified_columns() {
        let rows = executor()
            .execute("SELECT c.name FROM crm.contacts WHERE c.id != 1 AND score < 70")
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({ "name": "Alan" }).as_object().unwrap().clone()]);
    }

    #[tokio::test]
    async fn test_missing_column_projects_null() {
        let rows = executor()
            .execute("SELECT phone FROM contacts WHERE id = 1")
            .await
            .unwrap();
        assert_eq!(rows[0]["phone"], Value::Null);
    }

    #[tokio::test]
    async fn test_errors() {
        let exec = executor();
        assert!(matches!(
            exec.execute("DROP TABLE contacts").await,
            Err(ExecutionError::Malformed(_))
        ));
        assert!(matches!(
            exec.execute("SELECT * FROM contacts c JOIN orders o ON o.cid = c.id").await,
            Err(ExecutionError::Unsupported(_))
        ));
        assert!(matches!(
            exec.execute("SELECT COUNT(*) FROM contacts").await,
            Err(ExecutionError::Unsupported(_))
        ));
        assert!(matches!(
            exec.execute("SELECT * FROM invoices WHERE id = 1").await,
            Err(ExecutionError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_table_names_are_lowercased() {
        let exec = MemoryExecutor::from_json(json!({ "Orders": [{ "id": 1 }] })).unwrap();
        assert_eq!(exec.table_names().await, vec!["orders"]);
        assert_eq!(
            exec.execute("SELECT * FROM ORDERS").await.unwrap().len(),
            1
        );
    }

    #[test]
    fn test_bad_fixture_shape() {
        assert!(MemoryExecutor::from_json(json!([1, 2])).is_err());
        assert!(MemoryExecutor::from_json(json!({ "t": { "id": 1 } })).is_err());
        assert!(MemoryExecutor::from_json(json!({ "t": [1] })).is_err());
    }
}
