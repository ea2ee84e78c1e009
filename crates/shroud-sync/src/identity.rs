//! Mapping between a logical `(table, id)` pair and the single storage key.
//!
//! A storage key is `table + "_" + id`, split again at the *first* underscore.
//! Tables may therefore not contain an underscore; ids may. Keys whose table
//! or id half is empty (including `_design/...` style keys) are not ours.

use serde::{Deserialize, Serialize};
use shroud_core::{ShroudError, ShroudResult};

pub const SEPARATOR: char = '_';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentIdentity {
    pub table: String,
    pub id: String,
}

impl DocumentIdentity {
    pub fn new(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
        }
    }

    pub fn storage_key(&self) -> ShroudResult<String> {
        encode(&self.table, &self.id)
    }
}

impl std::fmt::Display for DocumentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.table, self.id)
    }
}

/// Build the storage key for `(table, id)`.
pub fn encode(table: &str, id: &str) -> ShroudResult<String> {
    if table.is_empty() {
        return Err(ShroudError::InvalidIdentity("table name is empty".into()));
    }
    if table.contains(SEPARATOR) {
        return Err(ShroudError::InvalidIdentity(format!(
            "table name '{table}' contains the key separator '{SEPARATOR}'"
        )));
    }
    if id.is_empty() {
        return Err(ShroudError::InvalidIdentity(format!(
            "document id in table '{table}' is empty"
        )));
    }
    Ok(format!("{table}{SEPARATOR}{id}"))
}

/// Split a storage key back into `(table, id)`.
pub fn decode(key: &str) -> ShroudResult<DocumentIdentity> {
    match key.split_once(SEPARATOR) {
        Some((table, id)) if !table.is_empty() && !id.is_empty() => {
            Ok(DocumentIdentity::new(table, id))
        }
        Some(_) => Err(ShroudError::InvalidIdentity(format!(
            "key '{key}' has an empty table or id"
        ))),
        None => Err(ShroudError::InvalidIdentity(format!(
            "key '{key}' has no '{SEPARATOR}' separator"
        ))),
    }
}
