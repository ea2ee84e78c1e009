//! Grouping classified documents by table and delivering them to the listener.

use serde::{Deserialize, Serialize};
use shroud_core::{DecryptionFailure, LogicalDocument};
use std::collections::HashMap;
use std::sync::Arc;

use crate::classifier::Classification;
use crate::listener::StoreListener;

/// All documents of one table within a batch, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableGroup<T = LogicalDocument> {
    pub table: String,
    pub documents: Vec<T>,
}

/// Stable grouping: tables appear in order of first arrival, and items keep
/// their relative order inside each table. Never yields an empty group.
pub fn group_by_table<T>(
    items: impl IntoIterator<Item = T>,
    table_of: impl Fn(&T) -> &str,
) -> Vec<TableGroup<T>> {
    let mut groups: Vec<TableGroup<T>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for item in items {
        let table = table_of(&item).to_string();
        match index.get(&table) {
            Some(&slot) => groups[slot].documents.push(item),
            None => {
                index.insert(table.clone(), groups.len());
                groups.push(TableGroup {
                    table,
                    documents: vec![item],
                });
            }
        }
    }
    groups
}

/// Results of classifying one load pass or one live change.
#[derive(Debug, Default, Clone)]
pub struct ClassifiedBatch {
    pub created: Vec<LogicalDocument>,
    pub updated: Vec<LogicalDocument>,
    pub deleted: Vec<LogicalDocument>,
    pub failures: Vec<DecryptionFailure>,
}

impl ClassifiedBatch {
    pub fn push(&mut self, classification: Classification, document: LogicalDocument) {
        match classification {
            Classification::Created => self.created.push(document),
            Classification::Updated => self.updated.push(document),
            Classification::Deleted => self.deleted.push(document),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && self.failures.is_empty()
    }
}

/// Delivers batches: one callback per non-empty category, failures last and
/// on their own channel.
#[derive(Clone)]
pub struct EventRouter {
    listener: Arc<dyn StoreListener>,
}

impl EventRouter {
    pub fn new(listener: Arc<dyn StoreListener>) -> Self {
        Self { listener }
    }

    pub fn listener(&self) -> &Arc<dyn StoreListener> {
        &self.listener
    }

    pub fn deliver(&self, batch: ClassifiedBatch) {
        if batch.is_empty() {
            return;
        }
        let ClassifiedBatch {
            created,
            updated,
            deleted,
            failures,
        } = batch;

        let by_table = |docs: Vec<LogicalDocument>| group_by_table(docs, |d| d.table.as_str());

        if !created.is_empty() {
            self.listener.on_created(&by_table(created));
        }
        if !updated.is_empty() {
            self.listener.on_updated(&by_table(updated));
        }
        if !deleted.is_empty() {
            self.listener.on_deleted(&by_table(deleted));
        }
        if !failures.is_empty() {
            for failure in &failures {
                tracing::warn!(key = %failure.key, cause = %failure.cause, "decryption failure");
            }
            self.listener.on_decryption_failure(&failures);
        }
    }
}
