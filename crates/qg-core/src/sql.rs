//! # SQL Subset Parser
//!
//! Parses the small slice of SQL the gateway understands into a
//! [`ParsedQuery`]. This is not a planner: it exists so signal extraction
//! and the in-memory executor agree on what a query says.
//!
//! Syntax:
//! ```text
//! SELECT col1, col2 FROM table [JOIN other ON ...] WHERE field > 100 AND field2 = 'value' LIMIT 100 OFFSET 10
//! ```
//!
//! Keyword positions are found on a masked copy of the input where quoted
//! literals are blanked out, so `WHERE name = 'from here'` does not confuse
//! clause boundaries.

use serde::{Deserialize, Serialize};

/// A parsed `SELECT` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuery {
    /// Projected column expressions (`*` kept as-is).
    pub columns: Vec<String>,
    /// Tables named in the FROM list, aliases stripped.
    pub from: Vec<String>,
    /// Tables pulled in through JOIN clauses.
    pub joins: Vec<String>,
    pub conditions: Vec<Condition>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: CompareOp,
    pub value: serde_json::Value,
}

impl Condition {
    /// Field name without any `table.` qualifier.
    pub fn column(&self) -> &str {
        self.field.rsplit('.').next().unwrap_or(&self.field)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
}

const CLAUSE_KEYWORDS: &[&str] = &[
    "FROM", "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "JOIN", "INNER", "LEFT",
    "RIGHT", "FULL", "CROSS", "ON",
];

/// Parse a raw query string into a [`ParsedQuery`].
pub fn parse(input: &str) -> Result<ParsedQuery, String> {
    let input = input.trim().trim_end_matches(';').trim_end();
    let masked = mask_literals(input);

    if !starts_with_keyword(&masked, "SELECT") {
        return Err("Only SELECT statements are supported".to_string());
    }
    if masked.contains(';') {
        return Err("Multiple statements are not supported".to_string());
    }
    if find_keyword(&masked, "UNION", 0).is_some() {
        return Err("UNION is not supported".to_string());
    }

    let mut query = ParsedQuery {
        columns: Vec::new(),
        from: Vec::new(),
        joins: Vec::new(),
        conditions: Vec::new(),
        limit: None,
        offset: 0,
    };

    // Projection list runs from SELECT to FROM
    let from_pos = find_keyword(&masked, "FROM", 0).ok_or("Missing FROM clause")?;
    query.columns = input["SELECT".len()..from_pos]
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if query.columns.is_empty() {
        return Err("Empty projection list".to_string());
    }

    // FROM clause
    let from_start = from_pos + "FROM".len();
    let from_end = next_clause(&masked, from_start);
    query.from = input[from_start..from_end]
        .split(',')
        .filter_map(|t| t.split_whitespace().next())
        .map(str::to_string)
        .collect();
    if query.from.is_empty() {
        return Err("Empty FROM clause".to_string());
    }

    // JOIN targets
    let mut search = from_end;
    while let Some(pos) = find_keyword(&masked, "JOIN", search) {
        let start = pos + "JOIN".len();
        if let Some(table) = input[start..].split_whitespace().next() {
            query.joins.push(table.to_string());
        }
        search = start;
    }

    // WHERE clause
    if let Some(where_pos) = find_keyword(&masked, "WHERE", from_end) {
        let start = where_pos + "WHERE".len();
        let end = next_clause(&masked, start);
        query.conditions = parse_conditions(&input[start..end], &masked[start..end])?;
    }

    // LIMIT clause
    if let Some(limit_pos) = find_keyword(&masked, "LIMIT", from_end) {
        let start = limit_pos + "LIMIT".len();
        let end = next_clause(&masked, start);
        let limit = input[start..end].trim();
        query.limit = Some(
            limit
                .parse::<usize>()
                .map_err(|_| format!("Invalid LIMIT: '{}'", limit))?,
        );
    }

    // OFFSET clause
    if let Some(offset_pos) = find_keyword(&masked, "OFFSET", from_end) {
        let start = offset_pos + "OFFSET".len();
        let end = next_clause(&masked, start);
        let offset = input[start..end].trim();
        query.offset = offset
            .parse::<usize>()
            .map_err(|_| format!("Invalid OFFSET: '{}'", offset))?;
    }

    Ok(query)
}

/// Lowercase identifier tokens of `input`, literals included.
pub fn tokens(input: &str) -> impl Iterator<Item = String> + '_ {
    input
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Canonical form used for cache keys.
///
/// Whitespace runs collapse to one space and text outside quoted literals is
/// lowercased. Literals are kept byte-for-byte so `'Bob'` and `'bob'` stay
/// different queries.
pub fn normalize(input: &str) -> String {
    let input = input.trim().trim_end_matches(';').trim_end();
    let mut out = String::with_capacity(input.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    for c in input.chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c.is_whitespace() => pending_space = true,
            None => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                out.push(c.to_ascii_lowercase());
            }
        }
    }
    out
}

/// ASCII-uppercased copy of `input` with quoted literal bytes replaced by `_`.
/// Byte offsets line up with the input.
fn mask_literals(input: &str) -> String {
    let mut quote: Option<u8> = None;
    let masked: Vec<u8> = input
        .bytes()
        .map(|b| match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                    b
                } else {
                    b'_'
                }
            }
            None => {
                if b == b'\'' || b == b'"' {
                    quote = Some(b);
                }
                b.to_ascii_uppercase()
            }
        })
        .collect();
    String::from_utf8_lossy(&masked).into_owned()
}

fn is_boundary(b: Option<&u8>) -> bool {
    match b {
        None => true,
        // Non-ASCII bytes belong to a multi-byte letter
        Some(b) => !(b.is_ascii_alphanumeric() || *b == b'_' || !b.is_ascii()),
    }
}

fn starts_with_keyword(masked: &str, kw: &str) -> bool {
    masked.starts_with(kw) && is_boundary(masked.as_bytes().get(kw.len()))
}

/// Byte position of the first whole-word `kw` at or after `from`.
pub(crate) fn find_keyword(masked: &str, kw: &str, from: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    let mut search = from;
    while search <= masked.len() {
        let pos = search + masked.get(search..)?.find(kw)?;
        let before = if pos == 0 { None } else { bytes.get(pos - 1) };
        if is_boundary(before) && is_boundary(bytes.get(pos + kw.len())) {
            return Some(pos);
        }
        search = pos + kw.len();
    }
    None
}

fn next_clause(masked: &str, from: usize) -> usize {
    CLAUSE_KEYWORDS
        .iter()
        .filter_map(|kw| find_keyword(masked, kw, from))
        .min()
        .unwrap_or(masked.len())
}

fn parse_conditions(s: &str, masked: &str) -> Result<Vec<Condition>, String> {
    if find_keyword(masked, "OR", 0).is_some() {
        return Err("OR conditions are not supported".to_string());
    }

    let mut conditions = Vec::new();
    let mut last = 0;
    let mut parts = Vec::new();
    while let Some(pos) = find_keyword(masked, "AND", last) {
        parts.push((&s[last..pos], &masked[last..pos]));
        last = pos + "AND".len();
    }
    parts.push((&s[last..], &masked[last..]));

    for (part, part_masked) in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        // Offsets come from the masked text so operators inside literals are ignored
        let part_masked = part_masked.trim();

        let (pos, op, width) = if let Some(pos) = part_masked.find(">=") {
            (pos, CompareOp::Gte, 2)
        } else if let Some(pos) = part_masked.find("<=") {
            (pos, CompareOp::Lte, 2)
        } else if let Some(pos) = part_masked.find("!=") {
            (pos, CompareOp::Neq, 2)
        } else if let Some(pos) = part_masked.find("<>") {
            (pos, CompareOp::Neq, 2)
        } else if let Some(pos) = part_masked.find('>') {
            (pos, CompareOp::Gt, 1)
        } else if let Some(pos) = part_masked.find('<') {
            (pos, CompareOp::Lt, 1)
        } else if let Some(pos) = part_masked.find('=') {
            (pos, CompareOp::Eq, 1)
        } else if let Some(pos) = find_keyword(part_masked, "CONTAINS", 0) {
            (pos, CompareOp::Contains, "CONTAINS".len())
        } else if let Some(pos) = find_keyword(part_masked, "STARTSWITH", 0) {
            (pos, CompareOp::StartsWith, "STARTSWITH".len())
        } else {
            return Err(format!("Cannot parse condition: '{}'", part));
        };

        let field = part[..pos].trim();
        if field.is_empty() {
            return Err(format!("Missing field in condition: '{}'", part));
        }
        let value = parse_value(part[pos + width..].trim());

        conditions.push(Condition {
            field: field.to_string(),
            op,
            value,
        });
    }

    Ok(conditions)
}

fn parse_value(s: &str) -> serde_json::Value {
    let quoted = s.len() >= 2
        && ((s.starts_with('\'') && s.ends_with('\'')) || (s.starts_with('"') && s.ends_with('"')));
    if quoted {
        return serde_json::Value::String(s[1..s.len() - 1].to_string());
    }

    if let Ok(n) = s.parse::<i64>() {
        serde_json::Value::Number(n.into())
    } else if let Ok(n) = s.parse::<f64>() {
        serde_json::json!(n)
    } else if s.eq_ignore_ascii_case("true") {
        serde_json::Value::Bool(true)
    } else if s.eq_ignore_ascii_case("false") {
        serde_json::Value::Bool(false)
    } else if s.eq_ignore_ascii_case("null") {
        serde_json::Value::Null
    } else {
        serde_json::Value::String(s.to_string())
    }
}
