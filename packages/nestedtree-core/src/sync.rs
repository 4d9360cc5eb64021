//! Reconciliation of an exported tree against the rows currently stored.

use std::collections::HashMap;

use tracing::debug;

use crate::config::{Role, TreeConfig};
use crate::error::{Error, Result};
use crate::forest::{ExportEntry, Forest, Structure};
use crate::ids::{NodeId, RowId};
use crate::sql::{placeholders, update_statement};
use crate::traits::{transaction, Store};
use crate::value::{Record, Value};

/// Rows per `DELETE ... IN (...)` statement.
const DELETE_CHUNK: usize = 500;

#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub id: RowId,
    pub node: NodeId,
    pub record: Record,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Insert {
    pub node: NodeId,
    pub record: Record,
}

/// Minimal set of writes that converges the table to the tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncPlan {
    pub removed: Vec<RowId>,
    pub modified: Vec<Update>,
    /// In ascending `left` order, so a new parent precedes its new children.
    pub created: Vec<Insert>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.modified.is_empty() && self.created.is_empty()
    }
}

/// Identifiers touched by one sync.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<RowId>,
    pub changed: Vec<RowId>,
    pub removed: Vec<RowId>,
}

/// A node still waits for its first insert: it has no id or is an unsaved copy.
fn is_pending(forest: &Forest, node: NodeId) -> bool {
    let node = forest.node(node);
    node.id().is_none() || node.is_copy()
}

fn differs(candidate: &Record, row: &Record) -> bool {
    let null = Value::Null;
    row.iter()
        .any(|(column, value)| candidate.get(column).unwrap_or(&null) != value)
        || candidate
            .iter()
            .any(|(column, value)| row.get(column).unwrap_or(&null) != value)
}

/// Compares `export` (the tree's desired state) against the stored `rows`.
///
/// Fails with [`Error::OrphanedReference`] when the tree tracks an id the store
/// no longer has.
pub fn plan(
    forest: &Forest,
    export: &[ExportEntry],
    rows: Vec<Record>,
    config: &TreeConfig,
) -> Result<SyncPlan> {
    let fields = &config.fields;
    let mut current: HashMap<RowId, (NodeId, Record)> = HashMap::new();
    let mut out = SyncPlan::default();

    for entry in export {
        let record = entry.to_record(fields);
        match entry.structure.id {
            Some(id) if !is_pending(forest, entry.node) => {
                current.insert(id, (entry.node, record));
            }
            _ => out.created.push(Insert {
                node: entry.node,
                record,
            }),
        }
    }

    for row in rows {
        let id = row
            .get(&fields.id)
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Storage(format!("stored row without a `{}` value", fields.id)))?;
        let Some((node, mut record)) = current.remove(&id) else {
            out.removed.push(id);
            continue;
        };
        // A column the node no longer carries is written back as NULL.
        for column in row.keys() {
            if *column != fields.id && !record.contains_key(column) {
                record.insert(column.clone(), Value::Null);
            }
        }
        let parent_pending = forest
            .parent(node)
            .map_or(false, |parent| is_pending(forest, parent));
        if parent_pending || differs(&record, &row) {
            out.modified.push(Update { id, node, record });
        }
    }

    if let Some(missing) = current.keys().min() {
        return Err(Error::OrphanedReference(*missing));
    }
    out.removed.sort_unstable();
    out.modified.sort_by_key(|u| u.id);
    debug!(
        removed = out.removed.len(),
        modified = out.modified.len(),
        created = out.created.len(),
        "computed sync plan"
    );
    Ok(out)
}

/// Parent column value as it stands now, after earlier inserts got their ids.
fn resolve_parent(forest: &Forest, node: NodeId, config: &TreeConfig, record: &mut Record) {
    if let Some(column) = config.fields.column(Role::Parent) {
        let parent = forest.parent(node).and_then(|p| forest.node(p).id());
        record.insert(column.to_owned(), parent.into());
    }
}

/// Copies columns the store filled in on insert (defaults, untouched data
/// columns) into the node's data, so the next plan sees them as unchanged.
fn adopt_stored_columns<S: Store + ?Sized>(
    store: &mut S,
    forest: &mut Forest,
    config: &TreeConfig,
    node: NodeId,
    id: RowId,
) -> Result<()> {
    let sql = format!("SELECT * FROM {} WHERE {} = ?", config.table, config.fields.id);
    let Some(row) = store.one(&sql, &[id.into()])? else {
        return Ok(());
    };
    let (_, stored) = Structure::split_record(row, &config.fields);
    let data = forest.node_mut(node).data_mut();
    for (column, value) in stored {
        data.entry(column).or_insert(value);
    }
    Ok(())
}

/// Applies `plan` inside one transaction: deletes, then inserts, then updates.
///
/// Inserts run before updates so that an existing node moved under a new node
/// can reference the id the store just assigned. New ids are written onto the
/// nodes; if anything fails they are cleared again and the store is rolled back.
#[tracing::instrument(skip_all, fields(table = %config.table))]
pub fn apply<S: Store + ?Sized>(
    store: &mut S,
    forest: &mut Forest,
    config: &TreeConfig,
    plan: &SyncPlan,
) -> Result<SyncReport> {
    if plan.is_empty() {
        debug!("nothing to sync");
        return Ok(SyncReport::default());
    }
    let table = config.table.as_str();
    let id_column = config.fields.id.as_str();
    let mut assigned: Vec<NodeId> = Vec::with_capacity(plan.created.len());

    let result = transaction(store, |store| {
        for chunk in plan.removed.chunks(DELETE_CHUNK) {
            let sql = format!(
                "DELETE FROM {table} WHERE {id_column} IN ({})",
                placeholders(chunk.len())
            );
            let params: Vec<Value> = chunk.iter().map(|id| Value::from(*id)).collect();
            store.query(&sql, &params)?;
        }

        let mut created = Vec::with_capacity(plan.created.len());
        for insert in &plan.created {
            let mut record = insert.record.clone();
            record.remove(id_column);
            resolve_parent(forest, insert.node, config, &mut record);
            let id = store.insert(table, id_column, &record)?;
            forest.set_id(insert.node, Some(id));
            assigned.push(insert.node);
            adopt_stored_columns(store, forest, config, insert.node, id)?;
            created.push(id);
        }

        let mut changed = Vec::with_capacity(plan.modified.len());
        for update in &plan.modified {
            let mut record = update.record.clone();
            resolve_parent(forest, update.node, config, &mut record);
            let (sql, params) = update_statement(table, id_column, update.id, &record)?;
            store.query(&sql, &params)?;
            changed.push(update.id);
        }

        Ok(SyncReport {
            created,
            changed,
            removed: plan.removed.clone(),
        })
    });

    if result.is_err() {
        for node in assigned {
            forest.set_id(node, None);
        }
    }
    result
}
