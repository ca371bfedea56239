use serde::{Deserialize, Serialize};
use std::fmt;

/// A single result value, kept with its SQLite storage class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    /// Blobs are not shown to the model, only their size.
    Blob { bytes: usize },
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("None"),
            Cell::Integer(v) => write!(f, "{v}"),
            Cell::Real(v) => write!(f, "{v:?}"),
            Cell::Text(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Cell::Blob { bytes } => write!(f, "<blob {bytes} bytes>"),
        }
    }
}

/// Rows returned by a successful query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    /// Set when more rows matched than were kept.
    pub truncated: bool,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render as a list of tuples, e.g. `[('North', 120.5), ('South', 98.0)]`.
    pub fn render(&self) -> String {
        let tuples: Vec<String> = self
            .rows
            .iter()
            .map(|row| {
                let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
                if cells.len() == 1 {
                    format!("({},)", cells[0])
                } else {
                    format!("({})", cells.join(", "))
                }
            })
            .collect();

        let mut out = format!("[{}]", tuples.join(", "));
        if self.truncated {
            out.push_str(&format!(
                "\n(showing first {} rows; add a LIMIT or narrower filter)",
                self.rows.len()
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_tuples() {
        let rows = QueryRows {
            columns: vec!["division".into(), "revenue".into()],
            rows: vec![
                vec![Cell::Text("North".into()), Cell::Real(120.5)],
                vec![Cell::Text("O'Hara".into()), Cell::Integer(3)],
            ],
            truncated: false,
        };
        assert_eq!(rows.render(), "[('North', 120.5), ('O\\'Hara', 3)]");
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_render_single_column_and_truncation_note() {
        let rows = QueryRows {
            columns: vec!["n".into()],
            rows: vec![vec![Cell::Null], vec![Cell::Real(2.0)]],
            truncated: true,
        };
        let rendered = rows.render();
        assert!(rendered.starts_with("[(None,), (2.0,)]"));
        assert!(rendered.contains("showing first 2 rows"));
    }
}
