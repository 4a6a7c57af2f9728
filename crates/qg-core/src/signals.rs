//! # Query Signals
//!
//! Coarse facts about a query that the admission policy decides on. The
//! policy only ever sees [`QuerySignals`], never the query text, so a real
//! planner or cost estimator can replace [`HeuristicExtractor`] behind the
//! [`SignalExtractor`] trait without touching policy code.

use serde::{Deserialize, Serialize};

use crate::sql;

/// What kind of work the query asks for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Projection,
    Join,
    Aggregation,
    Insert,
    Unknown,
}

impl OperationKind {
    /// Kinds that are never run inline.
    pub fn is_heavy(self) -> bool {
        matches!(self, Self::Join | Self::Aggregation | Self::Insert)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Projection => write!(f, "projection"),
            Self::Join => write!(f, "join"),
            Self::Aggregation => write!(f, "aggregation"),
            Self::Insert => write!(f, "insert"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Derived, read-only facts about one request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QuerySignals {
    pub uses_indexed_filter: bool,
    pub operation_kind: OperationKind,
    pub estimated_cost_seconds: f64,
}

/// Derives [`QuerySignals`] from query text.
///
/// Implementations must be total (unrecognised input yields conservative
/// signals rather than an error) and deterministic.
pub trait SignalExtractor: Send + Sync {
    fn extract(&self, query: &str) -> QuerySignals;
}

/// Estimated seconds per operation kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CostModel {
    pub projection_secs: f64,
    pub join_secs: f64,
    pub aggregation_secs: f64,
    pub insert_secs: f64,
    /// Deliberately high: anything unrecognised should not look cheap.
    pub unknown_secs: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            projection_secs: 3.0,
            join_secs: 10.0,
            aggregation_secs: 8.0,
            insert_secs: 10.0,
            unknown_secs: 60.0,
        }
    }
}

impl CostModel {
    pub fn estimate(&self, kind: OperationKind) -> f64 {
        match kind {
            OperationKind::Projection => self.projection_secs,
            OperationKind::Join => self.join_secs,
            OperationKind::Aggregation => self.aggregation_secs,
            OperationKind::Insert => self.insert_secs,
            OperationKind::Unknown => self.unknown_secs,
        }
    }
}

const AGGREGATE_CALLS: &[&str] = &["sum", "count", "avg", "min", "max"];

/// Keyword-driven stand-in for a query planner.
#[derive(Debug, Clone)]
pub struct HeuristicExtractor {
    indexed_columns: Vec<String>,
    costs: CostModel,
}

impl Default for HeuristicExtractor {
    fn default() -> Self {
        Self::new(vec!["id".to_string()], CostModel::default())
    }
}

impl HeuristicExtractor {
    pub fn new(indexed_columns: Vec<String>, costs: CostModel) -> Self {
        Self {
            indexed_columns: indexed_columns
                .into_iter()
                .map(|c| c.to_lowercase())
                .collect(),
            costs,
        }
    }

    fn operation_kind(&self, query: &str) -> OperationKind {
        let normalized = sql::normalize(query);
        let masked = mask_for_keywords(&normalized);
        let first = masked.split_whitespace().next().unwrap_or_default();

        // Stacked or compound statements are never classified by their first part
        if masked.contains(';') || has_word(&masked, "union") {
            OperationKind::Unknown
        } else if first == "insert" {
            OperationKind::Insert
        } else if has_word(&masked, "join") {
            OperationKind::Join
        } else if has_group_by(&masked) || has_aggregate_call(&masked) {
            OperationKind::Aggregation
        } else if first == "select" {
            OperationKind::Projection
        } else {
            OperationKind::Unknown
        }
    }

    fn uses_indexed_filter(&self, query: &str) -> bool {
        match sql::parse(query) {
            Ok(parsed) => parsed.conditions.iter().any(|c| {
                let column = c.column().to_lowercase();
                self.indexed_columns.iter().any(|idx| *idx == column)
            }),
            Err(_) => false,
        }
    }
}

impl SignalExtractor for HeuristicExtractor {
    fn extract(&self, query: &str) -> QuerySignals {
        let operation_kind = self.operation_kind(query);
        QuerySignals {
            uses_indexed_filter: self.uses_indexed_filter(query),
            operation_kind,
            estimated_cost_seconds: self.costs.estimate(operation_kind),
        }
    }
}

/// Drops quoted literals so words inside them never count as keywords.
fn mask_for_keywords(normalized: &str) -> String {
    let mut out = String::with_capacity(normalized.len());
    let mut quote: Option<char> = None;
    for c in normalized.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                out.push(' ');
            }
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None => out.push(c),
        }
    }
    out
}

fn words(masked: &str) -> impl Iterator<Item = &str> {
    masked
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
}

fn has_word(masked: &str, word: &str) -> bool {
    words(masked).any(|w| w == word)
}

fn has_group_by(masked: &str) -> bool {
    let mut prev = "";
    for w in words(masked) {
        if prev == "group" && w == "by" {
            return true;
        }
        prev = w;
    }
    false
}

fn has_aggregate_call(masked: &str) -> bool {
    AGGREGATE_CALLS.iter().any(|name| {
        masked.match_indices(name).any(|(pos, _)| {
            let before_ok = masked[..pos]
                .chars()
                .next_back()
                .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
            let after = masked[pos + name.len()..].trim_start();
            before_ok && after.starts_with('(')
        })
    })
}
