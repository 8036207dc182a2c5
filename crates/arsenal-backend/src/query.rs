use serde_json::Value;

use crate::Row;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq { column: String, value: Value },
    /// `column IS NULL`
    IsNull { column: String },
    /// Case-insensitive substring match of `term` in any of `columns`.
    ILikeAny { columns: Vec<String>, term: String },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull {
            column: column.into(),
        }
    }

    pub fn ilike_any<I, S>(columns: I, term: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ILikeAny {
            columns: columns.into_iter().map(Into::into).collect(),
            term: term.into(),
        }
    }

    /// Query-string pair in the REST filter syntax.
    pub fn to_query_pair(&self) -> (String, String) {
        match self {
            Self::Eq { column, value } => (column.clone(), format!("eq.{}", literal(value))),
            Self::IsNull { column } => (column.clone(), "is.null".to_string()),
            Self::ILikeAny { columns, term } => {
                let pattern = quote(&format!("*{term}*"));
                let clauses = columns
                    .iter()
                    .map(|c| format!("{c}.ilike.{pattern}"))
                    .collect::<Vec<_>>()
                    .join(",");
                ("or".to_string(), format!("({clauses})"))
            }
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Eq { column, value } => row.get(column).is_some_and(|v| loose_eq(v, value)),
            Self::IsNull { column } => row.get(column).is_none_or(Value::is_null),
            Self::ILikeAny { columns, term } => {
                let needle = term.to_lowercase();
                columns.iter().any(|c| {
                    row.get(c)
                        .and_then(Value::as_str)
                        .is_some_and(|s| s.to_lowercase().contains(&needle))
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub columns: String,
    pub filters: Vec<Filter>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            limit: None,
        }
    }

    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        let columns = columns.into();
        self.columns = if columns.trim().is_empty() {
            "*".to_string()
        } else {
            columns
        };
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), self.columns.clone())];
        pairs.extend(self.filters.iter().map(Filter::to_query_pair));
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }

    /// Column names requested, `None` for `*`.
    pub fn projected_columns(&self) -> Option<Vec<String>> {
        let cols = self
            .columns
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>();
        if cols.is_empty() || cols.contains(&"*") {
            return None;
        }
        Some(cols.into_iter().map(ToString::to_string).collect())
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn quote(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Equality that tolerates a string filter matching a numeric id.
fn loose_eq(stored: &Value, wanted: &Value) -> bool {
    if stored == wanted {
        return true;
    }
    match (stored, wanted) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            n.to_string() == *s
        }
        _ => false,
    }
}
