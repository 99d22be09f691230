//! Reflected database structure handed to the model in every prompt.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Table name to table structure. Rebuilt for every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    tables: BTreeMap<String, TableSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    /// Column name to `table.column` of the referenced column.
    pub foreign_keys: BTreeMap<String, String>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, table: TableSchema) {
        self.tables.insert(name.into(), table);
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableSchema)> {
        self.tables.iter().map(|(name, table)| (name.as_str(), table))
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Indented JSON, the form embedded in prompts.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl FromIterator<(String, TableSchema)> for Schema {
    fn from_iter<T: IntoIterator<Item = (String, TableSchema)>>(iter: T) -> Self {
        Self {
            tables: iter.into_iter().collect(),
        }
    }
}

impl TableSchema {
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}
