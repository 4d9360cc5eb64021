//! Reconstruction of a [`Forest`] from flat adjacency-list or nested-set rows.
//!
//! Serialization in the other direction is [`Forest::export`] followed by
//! [`ExportEntry::to_record`](crate::ExportEntry::to_record).

use std::collections::HashMap;

use crate::config::{FieldMap, Role};
use crate::error::{Error, Result};
use crate::forest::Forest;
use crate::ids::{NodeId, RowId};
use crate::value::Record;

fn int_field(record: &Record, column: Option<&str>) -> Option<i64> {
    column
        .and_then(|c| record.get(c))
        .and_then(|v| v.as_i64())
}

/// Builds a tree from `(id, parent, position?)` rows.
///
/// The root is the row whose id is `root_id` when given, otherwise the first
/// row without a parent. Rows whose parent is not part of the input stay
/// detached in the returned forest instead of failing the whole load.
pub fn from_adjacency(
    mut records: Vec<Record>,
    fields: &FieldMap,
    root_id: Option<RowId>,
) -> Result<(Forest, NodeId)> {
    let parent_key = fields.require(Role::Parent)?;
    let position_key = fields.column(Role::Position);

    // Stable sort keeps input order among siblings when no position is mapped.
    records.sort_by_key(|r| (int_field(r, Some(parent_key)), int_field(r, position_key)));

    let mut forest = Forest::new();
    let mut by_id: HashMap<RowId, NodeId> = HashMap::with_capacity(records.len());
    let mut root = None;
    let mut pending = Vec::with_capacity(records.len());
    for record in records {
        let node = forest.create_from_record(record, fields);
        let structure = forest.node(node).structure().clone();
        if let Some(id) = structure.id {
            by_id.insert(id, node);
        }
        let is_root = match root_id {
            Some(wanted) => structure.id == Some(wanted),
            None => structure.parent.is_none(),
        };
        if is_root && root.is_none() {
            root = Some(node);
        } else {
            pending.push((node, structure.parent));
        }
    }
    let root = root.ok_or(Error::NoRootFound)?;

    for (node, parent) in pending {
        if let Some(parent) = parent.and_then(|p| by_id.get(&p)) {
            forest.add_child(*parent, node, None)?;
        }
    }
    Ok((forest, root))
}

/// Builds a tree from `(id, left, right)` rows using interval adjacency only.
///
/// The row with `left == 1` is the root.
pub fn from_nested_set(records: Vec<Record>, fields: &FieldMap) -> Result<(Forest, NodeId)> {
    from_nested_set_at(records, fields, 1)
}

/// Like [`from_nested_set`], rooted at the row whose left value is `root_left`.
pub fn from_nested_set_at(
    mut records: Vec<Record>,
    fields: &FieldMap,
    root_left: i64,
) -> Result<(Forest, NodeId)> {
    let left_key = fields.require(Role::Left)?;
    let right_key = fields.require(Role::Right)?;
    records.sort_by_key(|r| int_field(r, Some(left_key)));

    let mut forest = Forest::new();
    let mut by_left: HashMap<i64, NodeId> = HashMap::with_capacity(records.len());
    let mut by_right: HashMap<i64, NodeId> = HashMap::with_capacity(records.len());
    let mut ordered = Vec::with_capacity(records.len());
    for record in records {
        let left = int_field(&record, Some(left_key));
        let right = int_field(&record, Some(right_key));
        let node = forest.create_from_record(record, fields);
        if let Some(left) = left {
            by_left.insert(left, node);
            ordered.push((node, left));
        }
        if let Some(right) = right {
            by_right.insert(right, node);
        }
    }
    let root = *by_left.get(&root_left).ok_or(Error::NoRootFound)?;

    for (node, left) in ordered {
        if node == root {
            continue;
        }
        if let Some(parent) = by_left.get(&(left - 1)) {
            // Opened right after the parent: first child.
            forest.add_child(*parent, node, Some(0))?;
        } else if let Some(prev) = by_right.get(&(left - 1)) {
            forest.move_after(node, *prev)?;
        }
    }
    Ok((forest, root))
}
