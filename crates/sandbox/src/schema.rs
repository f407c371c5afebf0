//! Schema introspection over the backing store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Full database schema, cached indefinitely after first load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub tables: BTreeMap<String, TableInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    /// `None` when the reference points at the target's primary key.
    pub references_column: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
}

impl SchemaInfo {
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn total_tables(&self) -> usize {
        self.tables.len()
    }

    /// One line per table listing the first `cols` column names, used in
    /// planner prompts.
    pub fn summary(&self, cols: usize) -> String {
        let mut lines = Vec::with_capacity(self.tables.len());
        for (name, info) in &self.tables {
            let mut shown: Vec<&str> =
                info.columns.iter().take(cols).map(|c| c.name.as_str()).collect();
            if info.columns.len() > cols {
                shown.push("…");
            }
            lines.push(format!("- {name}: {}", shown.join(", ")));
        }
        if lines.is_empty() {
            "(schema unavailable)".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// Introspect the schema via `sqlite_master` and the table PRAGMAs.
pub(crate) fn load_schema(conn: &rusqlite::Connection) -> rusqlite::Result<SchemaInfo> {
    let names: Vec<String> = {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let mut tables = BTreeMap::new();
    for name in names {
        let mut columns = Vec::new();
        {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({name})"))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                columns.push(ColumnInfo {
                    name: row.get(1)?,
                    type_name: row.get(2)?,
                    not_null: row.get::<_, i64>(3)? != 0,
                    primary_key: row.get::<_, i64>(5)? != 0,
                });
            }
        }

        let mut foreign_keys = Vec::new();
        {
            let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({name})"))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                foreign_keys.push(ForeignKey {
                    column: row.get(3)?,
                    references_table: row.get(2)?,
                    references_column: row.get(4)?,
                });
            }
        }

        let mut indexes = Vec::new();
        {
            let mut stmt = conn.prepare(&format!("PRAGMA index_list({name})"))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                indexes.push(IndexInfo {
                    name: row.get(1)?,
                    unique: row.get::<_, i64>(2)? != 0,
                });
            }
        }

        tables.insert(name, TableInfo { columns, foreign_keys, indexes });
    }

    Ok(SchemaInfo { tables })
}
