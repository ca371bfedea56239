use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub create_sql: Option<String>,
    /// A few example rows, already rendered as text.
    #[serde(default)]
    pub sample_rows: Vec<Vec<String>>,
}

impl TableSchema {
    pub fn render(&self) -> String {
        let mut out = match &self.create_sql {
            Some(sql) => sql.trim().to_string(),
            None => {
                let cols: Vec<String> = self
                    .columns
                    .iter()
                    .map(|c| format!("\t\"{}\" {}", c.name, c.declared_type))
                    .collect();
                format!("CREATE TABLE \"{}\" (\n{}\n)", self.name, cols.join(",\n"))
            }
        };

        if !self.sample_rows.is_empty() {
            let header: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
            out.push_str(&format!(
                "\n\n/*\n{} rows from {} table:\n{}\n",
                self.sample_rows.len(),
                self.name,
                header.join("\t")
            ));
            for row in &self.sample_rows {
                out.push_str(&row.join("\t"));
                out.push('\n');
            }
            out.push_str("*/");
        }
        out
    }
}

/// Answer to a schema request: every known table plus the names that did not resolve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaReport {
    pub tables: Vec<TableSchema>,
    pub unknown: Vec<String>,
}

impl SchemaReport {
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = self.tables.iter().map(|t| t.render()).collect();
        for name in &self.unknown {
            parts.push(format!(
                "Error: table_names {{'{}'}} not found in database",
                name
            ));
        }
        parts.join("\n\n")
    }
}
