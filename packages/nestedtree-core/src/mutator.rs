//! Direct nested-set maintenance.
//!
//! [`Mutator`] changes the stored table one structural operation at a time with
//! closed-form index arithmetic. It never materializes a tree: the store is the
//! only state, and only the rows an operation touches are read.

use tracing::debug;

use crate::config::{Role, TreeConfig};
use crate::error::{Error, Result};
use crate::ids::RowId;
use crate::traits::{transaction, Store};
use crate::value::{Record, Value};

#[derive(Clone, Debug)]
struct Columns {
    table: String,
    id: String,
    left: String,
    right: String,
    level: String,
    parent: String,
    position: String,
}

/// One stored row with its structural columns decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredNode {
    pub id: RowId,
    pub parent: Option<RowId>,
    pub position: i64,
    pub level: i64,
    pub left: i64,
    pub right: i64,
    pub data: Record,
}

impl StoredNode {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// `right - left + 1`
    pub fn width(&self) -> i64 {
        self.right - self.left + 1
    }

    pub fn descendants_count(&self) -> i64 {
        (self.right - self.left - 1) / 2
    }

    /// Whether `other` is this node or lies inside its interval.
    pub fn encloses(&self, other: &StoredNode) -> bool {
        self.left <= other.left && self.right >= other.right
    }
}

fn take_int(record: &mut Record, column: &str) -> Option<i64> {
    record.remove(column).and_then(|v| v.as_i64())
}

/// Stateless engine applying single create/move/copy/remove operations.
#[derive(Clone, Debug)]
pub struct Mutator {
    config: TreeConfig,
    cols: Columns,
}

impl Mutator {
    /// Needs every structural role mapped.
    pub fn new(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let f = &config.fields;
        let cols = Columns {
            table: config.table.clone(),
            id: f.require(Role::Id)?.to_owned(),
            left: f.require(Role::Left)?.to_owned(),
            right: f.require(Role::Right)?.to_owned(),
            level: f.require(Role::Level)?.to_owned(),
            parent: f.require(Role::Parent)?.to_owned(),
            position: f.require(Role::Position)?.to_owned(),
        };
        Ok(Self { config, cols })
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    fn decode(&self, mut record: Record) -> Result<StoredNode> {
        let c = &self.cols;
        let id = take_int(&mut record, &c.id)
            .ok_or_else(|| Error::Storage(format!("stored row without a `{}` value", c.id)))?;
        let mut structural = |column: &str| {
            take_int(&mut record, column)
                .ok_or_else(|| Error::Storage(format!("row {id} has no `{column}` value")))
        };
        let left = structural(&c.left)?;
        let right = structural(&c.right)?;
        let level = structural(&c.level)?;
        let position = structural(&c.position)?;
        let parent = take_int(&mut record, &c.parent);
        Ok(StoredNode {
            id,
            parent,
            position,
            level,
            left,
            right,
            data: record,
        })
    }

    fn decode_all(&self, rows: Vec<Record>) -> Result<Vec<StoredNode>> {
        rows.into_iter().map(|r| self.decode(r)).collect()
    }

    /// Caller data without any structural column.
    fn payload(&self, data: &Record) -> Record {
        data.iter()
            .filter(|(k, _)| !self.config.fields.is_structural(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn row(
        &self,
        data: &Record,
        parent: Option<RowId>,
        position: i64,
        level: i64,
        left: i64,
        right: i64,
    ) -> Record {
        let c = &self.cols;
        let mut record = self.payload(data);
        record.insert(c.parent.clone(), parent.into());
        record.insert(c.position.clone(), position.into());
        record.insert(c.level.clone(), level.into());
        record.insert(c.left.clone(), left.into());
        record.insert(c.right.clone(), right.into());
        record
    }

    // Reads

    pub fn node<S: Store + ?Sized>(&self, store: &mut S, id: RowId) -> Result<StoredNode> {
        let Columns { table: t, id: idc, .. } = &self.cols;
        let row = store
            .one(&format!("SELECT * FROM {t} WHERE {idc} = ?"), &[id.into()])?
            .ok_or(Error::NodeNotFound(id))?;
        self.decode(row)
    }

    pub fn root<S: Store + ?Sized>(&self, store: &mut S) -> Result<Option<StoredNode>> {
        let Columns { table: t, parent: pid, left: lft, .. } = &self.cols;
        store
            .one(&format!("SELECT * FROM {t} WHERE {pid} IS NULL ORDER BY {lft} LIMIT 1"), &[])?
            .map(|row| self.decode(row))
            .transpose()
    }

    /// Direct children ordered by position.
    pub fn children<S: Store + ?Sized>(&self, store: &mut S, id: RowId) -> Result<Vec<StoredNode>> {
        let Columns { table: t, parent: pid, position: pos, .. } = &self.cols;
        let rows = store.all(
            &format!("SELECT * FROM {t} WHERE {pid} = ? ORDER BY {pos}"),
            &[id.into()],
        )?;
        self.decode_all(rows)
    }

    pub fn children_count<S: Store + ?Sized>(&self, store: &mut S, id: RowId) -> Result<usize> {
        self.count_children_except(store, id, None)
    }

    fn count_children_except<S: Store + ?Sized>(
        &self,
        store: &mut S,
        parent: RowId,
        except: Option<RowId>,
    ) -> Result<usize> {
        let Columns { table: t, id: idc, parent: pid, .. } = &self.cols;
        let row = match except {
            Some(except) => store.one(
                &format!("SELECT COUNT(*) AS cnt FROM {t} WHERE {pid} = ? AND {idc} <> ?"),
                &[parent.into(), except.into()],
            )?,
            None => store.one(
                &format!("SELECT COUNT(*) AS cnt FROM {t} WHERE {pid} = ?"),
                &[parent.into()],
            )?,
        };
        let count = row
            .as_ref()
            .and_then(|r| r.get("cnt"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Every node below `id` in ascending `left` order, optionally limited to
    /// `depth` levels below it.
    pub fn descendants<S: Store + ?Sized>(
        &self,
        store: &mut S,
        id: RowId,
        depth: Option<i64>,
    ) -> Result<Vec<StoredNode>> {
        let node = self.node(store, id)?;
        let Columns { table: t, left: lft, right: rgt, level: lvl, .. } = &self.cols;
        let rows = match depth {
            Some(depth) => store.all(
                &format!(
                    "SELECT * FROM {t} WHERE {lft} > ? AND {rgt} < ? AND {lvl} <= ? ORDER BY {lft}"
                ),
                &[node.left.into(), node.right.into(), (node.level + depth).into()],
            )?,
            None => store.all(
                &format!("SELECT * FROM {t} WHERE {lft} > ? AND {rgt} < ? ORDER BY {lft}"),
                &[node.left.into(), node.right.into()],
            )?,
        };
        self.decode_all(rows)
    }

    pub fn descendants_count<S: Store + ?Sized>(&self, store: &mut S, id: RowId) -> Result<i64> {
        Ok(self.node(store, id)?.descendants_count())
    }

    /// Enclosing nodes, nearest first.
    pub fn ancestors<S: Store + ?Sized>(
        &self,
        store: &mut S,
        id: RowId,
    ) -> Result<Vec<StoredNode>> {
        let node = self.node(store, id)?;
        let Columns { table: t, left: lft, right: rgt, .. } = &self.cols;
        let rows = store.all(
            &format!("SELECT * FROM {t} WHERE {lft} < ? AND {rgt} > ? ORDER BY {lft} DESC"),
            &[node.left.into(), node.right.into()],
        )?;
        self.decode_all(rows)
    }

    /// Left bound a subtree must take to land at `position` under `parent`.
    /// Rows parked at negative bounds by a move in progress are skipped.
    fn anchor_left<S: Store + ?Sized>(
        &self,
        store: &mut S,
        parent: RowId,
        parent_right: i64,
        position: usize,
        count: usize,
    ) -> Result<i64> {
        if position >= count {
            return Ok(parent_right);
        }
        let Columns { table: t, left: lft, parent: pid, position: pos, .. } = &self.cols;
        store
            .one(
                &format!(
                    "SELECT {lft} AS anchor FROM {t} WHERE {pid} = ? AND {pos} = ? AND {lft} > 0"
                ),
                &[parent.into(), position.into()],
            )?
            .and_then(|r| r.get("anchor").and_then(Value::as_i64))
            .ok_or_else(|| {
                Error::Storage(format!("node {parent} has no child at position {position}"))
            })
    }

    // Mutations

    /// Inserts a new leaf under `parent` (the root when `None`) at `position`
    /// (clamped; `None` appends). On an empty table without a parent this
    /// creates the root row.
    #[tracing::instrument(skip(self, store, data), fields(table = %self.config.table))]
    pub fn create<S: Store + ?Sized>(
        &self,
        store: &mut S,
        parent: Option<RowId>,
        position: Option<usize>,
        data: &Record,
    ) -> Result<RowId> {
        let target = match parent {
            Some(id) => Some(self.node(store, id)?),
            None => self.root(store)?,
        };
        let Columns { table: t, id: idc, left: lft, right: rgt, parent: pid, position: pos, .. } =
            &self.cols;

        let Some(target) = target else {
            let rows = store
                .one(&format!("SELECT COUNT(*) AS cnt FROM {t}"), &[])?
                .and_then(|r| r.get("cnt").and_then(Value::as_i64))
                .unwrap_or(0);
            if rows > 0 {
                return Err(Error::NoRootFound);
            }
            let record = self.row(data, None, 0, 0, 1, 2);
            let id = transaction(store, |store| store.insert(t, idc, &record))?;
            debug!(id, "created root");
            return Ok(id);
        };

        let count = self.children_count(store, target.id)?;
        let position = position.unwrap_or(count).min(count);
        let anchor = self.anchor_left(store, target.id, target.right, position, count)?;
        debug!(parent = target.id, position, anchor, "opening a gap of 2");

        let level = target.level + 1;
        let record = self.row(data, Some(target.id), position as i64, level, anchor, anchor + 1);
        let id = transaction(store, |store| {
            store.query(
                &format!("UPDATE {t} SET {pos} = {pos} + 1 WHERE {pid} = ? AND {pos} >= ?"),
                &[target.id.into(), position.into()],
            )?;
            store.query(
                &format!("UPDATE {t} SET {lft} = {lft} + 2 WHERE {lft} >= ?"),
                &[anchor.into()],
            )?;
            store.query(
                &format!("UPDATE {t} SET {rgt} = {rgt} + 2 WHERE {rgt} >= ?"),
                &[anchor.into()],
            )?;
            store.insert(t, idc, &record)
        })?;
        Ok(id)
    }

    fn reject_inside(node: &StoredNode, target: &StoredNode) -> Result<()> {
        if node.encloses(target) {
            return Err(Error::CycleDetected {
                node: node.id.to_string(),
                target: target.id.to_string(),
            });
        }
        Ok(())
    }

    /// Moves the subtree of `id` under `parent` at `position` (the final index
    /// among the new siblings, clamped; `None` appends).
    #[tracing::instrument(skip(self, store), fields(table = %self.config.table))]
    pub fn move_node<S: Store + ?Sized>(
        &self,
        store: &mut S,
        id: RowId,
        parent: RowId,
        position: Option<usize>,
    ) -> Result<()> {
        let node = self.node(store, id)?;
        if node.is_root() {
            return Err(Error::InvalidOperation("the root cannot be moved".into()));
        }
        let target = self.node(store, parent)?;
        Self::reject_inside(&node, &target)?;

        let width = node.width();
        let count = self.count_children_except(store, target.id, Some(node.id))?;
        let position = position.unwrap_or(count).min(count);
        let Columns {
            table: t,
            id: idc,
            left: lft,
            right: rgt,
            level: lvl,
            parent: pid,
            position: pos,
        } = &self.cols;
        // Coordinates of the target once the source gap is closed.
        let target_right = if target.right > node.right {
            target.right - width
        } else {
            target.right
        };

        transaction(store, |store| {
            // Park the subtree at negative bounds; every shift below compares
            // against positive bounds and so leaves it alone.
            store.query(
                &format!(
                    "UPDATE {t} SET {lft} = -{lft}, {rgt} = -{rgt} WHERE {lft} >= ? AND {rgt} <= ?"
                ),
                &[node.left.into(), node.right.into()],
            )?;

            // Close the gap left at the source.
            store.query(
                &format!("UPDATE {t} SET {pos} = {pos} - 1 WHERE {pid} = ? AND {pos} > ?"),
                &[node.parent.into(), node.position.into()],
            )?;
            store.query(
                &format!("UPDATE {t} SET {lft} = {lft} - ? WHERE {lft} > ?"),
                &[width.into(), node.right.into()],
            )?;
            store.query(
                &format!("UPDATE {t} SET {rgt} = {rgt} - ? WHERE {rgt} > ?"),
                &[width.into(), node.right.into()],
            )?;

            // Open a gap of the same width at the destination.
            let anchor = self.anchor_left(store, target.id, target_right, position, count)?;
            let delta = anchor - node.left;
            let level_delta = target.level + 1 - node.level;
            debug!(width, anchor, delta, level_delta, "relocating subtree");
            store.query(
                &format!(
                    "UPDATE {t} SET {pos} = {pos} + 1 WHERE {pid} = ? AND {pos} >= ? AND {lft} > 0"
                ),
                &[target.id.into(), position.into()],
            )?;
            store.query(
                &format!("UPDATE {t} SET {lft} = {lft} + ? WHERE {lft} >= ?"),
                &[width.into(), anchor.into()],
            )?;
            store.query(
                &format!("UPDATE {t} SET {rgt} = {rgt} + ? WHERE {rgt} >= ?"),
                &[width.into(), anchor.into()],
            )?;

            // Unpark the subtree into the gap.
            store.query(
                &format!(
                    "UPDATE {t} SET {lft} = ? - {lft}, {rgt} = ? - {rgt}, {lvl} = {lvl} + ? \
                     WHERE {lft} < 0"
                ),
                &[delta.into(), delta.into(), level_delta.into()],
            )?;
            store.query(
                &format!("UPDATE {t} SET {pid} = ?, {pos} = ? WHERE {idc} = ?"),
                &[target.id.into(), position.into(), node.id.into()],
            )?;
            Ok(())
        })
    }

    /// Copies the subtree of `id` under `parent` at `position` and returns the
    /// id of the copy's root. The original rows keep their content.
    #[tracing::instrument(skip(self, store), fields(table = %self.config.table))]
    pub fn copy<S: Store + ?Sized>(
        &self,
        store: &mut S,
        id: RowId,
        parent: RowId,
        position: Option<usize>,
    ) -> Result<RowId> {
        let node = self.node(store, id)?;
        let target = self.node(store, parent)?;
        Self::reject_inside(&node, &target)?;

        let Columns {
            table: t,
            id: idc,
            left: lft,
            right: rgt,
            level: lvl,
            parent: pid,
            position: pos,
        } = &self.cols;
        let source = self.decode_all(store.all(
            &format!("SELECT * FROM {t} WHERE {lft} >= ? AND {rgt} <= ? ORDER BY {lvl}, {lft}"),
            &[node.left.into(), node.right.into()],
        )?)?;
        let width = node.width();
        let count = self.children_count(store, target.id)?;
        let position = position.unwrap_or(count).min(count);
        let anchor = self.anchor_left(store, target.id, target.right, position, count)?;
        // Offsets are relative to the source as read above, before the gap opens.
        let delta = anchor - node.left;
        let level_delta = target.level + 1 - node.level;
        debug!(width, anchor, delta, level_delta, rows = source.len(), "copying subtree");

        transaction(store, |store| {
            store.query(
                &format!("UPDATE {t} SET {pos} = {pos} + 1 WHERE {pid} = ? AND {pos} >= ?"),
                &[target.id.into(), position.into()],
            )?;
            store.query(
                &format!("UPDATE {t} SET {lft} = {lft} + ? WHERE {lft} >= ?"),
                &[width.into(), anchor.into()],
            )?;
            store.query(
                &format!("UPDATE {t} SET {rgt} = {rgt} + ? WHERE {rgt} >= ?"),
                &[width.into(), anchor.into()],
            )?;

            // Ascending level: every parent is inserted before its children.
            let mut inserted: Vec<(RowId, i64, i64)> = Vec::with_capacity(source.len());
            for row in &source {
                let (left, right) = (row.left + delta, row.right + delta);
                let (parent, position) = if row.id == node.id {
                    (target.id, position as i64)
                } else {
                    let enclosing = inserted
                        .iter()
                        .filter(|(_, l, r)| *l < left && *r > right)
                        .max_by_key(|(_, l, _)| *l)
                        .map(|(id, _, _)| *id)
                        .ok_or_else(|| {
                            Error::Storage(format!(
                                "no enclosing interval for copy of row {}",
                                row.id
                            ))
                        })?;
                    (enclosing, row.position)
                };
                let level = row.level + level_delta;
                let record = self.row(&row.data, Some(parent), position, level, left, right);
                let new_id = store.insert(t, idc, &record)?;
                inserted.push((new_id, left, right));
            }
            inserted
                .first()
                .map(|(id, _, _)| *id)
                .ok_or(Error::NodeNotFound(node.id))
        })
    }

    /// Deletes the subtree of `id` and closes the gap it leaves.
    #[tracing::instrument(skip(self, store), fields(table = %self.config.table))]
    pub fn remove<S: Store + ?Sized>(&self, store: &mut S, id: RowId) -> Result<()> {
        let node = self.node(store, id)?;
        if node.is_root() {
            return Err(Error::InvalidOperation("the root cannot be removed".into()));
        }
        let width = node.width();
        let Columns { table: t, left: lft, right: rgt, parent: pid, position: pos, .. } =
            &self.cols;
        debug!(left = node.left, right = node.right, width, "removing subtree");

        transaction(store, |store| {
            store.query(
                &format!("DELETE FROM {t} WHERE {lft} >= ? AND {rgt} <= ?"),
                &[node.left.into(), node.right.into()],
            )?;
            store.query(
                &format!("UPDATE {t} SET {lft} = {lft} - ? WHERE {lft} > ?"),
                &[width.into(), node.right.into()],
            )?;
            store.query(
                &format!("UPDATE {t} SET {rgt} = {rgt} - ? WHERE {rgt} > ?"),
                &[width.into(), node.right.into()],
            )?;
            store.query(
                &format!("UPDATE {t} SET {pos} = {pos} - 1 WHERE {pid} = ? AND {pos} > ?"),
                &[node.parent.into(), node.position.into()],
            )?;
            Ok(())
        })
    }
}
