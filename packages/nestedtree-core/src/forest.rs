//! Arena of tree nodes.
//!
//! A [`Forest`] owns every node it creates. Children lists are the owning edges;
//! parent and copy-provenance links are plain [`NodeId`] back-references, so no
//! ownership cycle exists even though the graph looks cyclic.

use crate::config::{FieldMap, Role};
use crate::error::{Error, Result};
use crate::ids::{NodeId, RowId};
use crate::value::{Record, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Structural fields of a node as last loaded from or written to the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Structure {
    pub id: Option<RowId>,
    pub parent: Option<RowId>,
    pub position: Option<i64>,
    pub level: Option<i64>,
    pub left: Option<i64>,
    pub right: Option<i64>,
}

impl Structure {
    /// Splits a flat row into typed structural fields and the remaining caller data.
    pub fn split_record(mut record: Record, fields: &FieldMap) -> (Self, Record) {
        let mut take = |role: Role| {
            fields
                .column(role)
                .and_then(|column| record.remove(column))
                .and_then(|value| value.as_i64())
        };
        let structure = Self {
            id: take(Role::Id),
            parent: take(Role::Parent),
            position: take(Role::Position),
            level: take(Role::Level),
            left: take(Role::Left),
            right: take(Role::Right),
        };
        (structure, record)
    }
}

/// Structural tuple computed by [`Forest::export`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Placement {
    pub id: Option<RowId>,
    pub parent: Option<RowId>,
    pub position: i64,
    pub level: i64,
    pub left: i64,
    pub right: i64,
}

impl Placement {
    fn value(&self, role: Role) -> Value {
        match role {
            Role::Id => self.id.into(),
            Role::Parent => self.parent.into(),
            Role::Position => self.position.into(),
            Role::Level => self.level.into(),
            Role::Left => self.left.into(),
            Role::Right => self.right.into(),
        }
    }
}

impl From<&Placement> for Structure {
    fn from(p: &Placement) -> Self {
        Self {
            id: p.id,
            parent: p.parent,
            position: Some(p.position),
            level: Some(p.level),
            left: Some(p.left),
            right: Some(p.right),
        }
    }
}

/// One exported node.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExportEntry {
    pub node: NodeId,
    pub data: Record,
    pub structure: Placement,
}

impl ExportEntry {
    /// Flat row: caller data plus every mapped structural column.
    pub fn to_record(&self, fields: &FieldMap) -> Record {
        let mut record = self.data.clone();
        for (role, column) in fields.mapped() {
            record.insert(column.to_owned(), self.structure.value(role));
        }
        record
    }
}

#[derive(Clone, Debug, Default)]
pub struct Node {
    data: Record,
    structure: Structure,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    original: Option<NodeId>,
}

impl Node {
    pub fn data(&self) -> &Record {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Record {
        &mut self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    /// Persisted identifier, `None` until the node is stored.
    pub fn id(&self) -> Option<RowId> {
        self.structure.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The node this one was copied from, while the copy is not yet persisted.
    pub fn original(&self) -> Option<NodeId> {
        self.original
    }

    pub fn is_copy(&self) -> bool {
        self.original.is_some()
    }
}

/// Arena holding any number of detached or connected nodes.
#[derive(Clone, Debug, Default)]
pub struct Forest {
    nodes: Vec<Node>,
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bare node: no parent, no identifier.
    pub fn create(&mut self, data: Record) -> NodeId {
        self.push(Node {
            data,
            ..Node::default()
        })
    }

    /// Creates a node from a flat row, keeping structural columns as typed fields.
    pub fn create_from_record(&mut self, record: Record, fields: &FieldMap) -> NodeId {
        let (structure, data) = Structure::split_record(record, fields);
        self.push(Node {
            data,
            structure,
            ..Node::default()
        })
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        node.0 < self.nodes.len()
    }

    pub fn get(&self, node: NodeId) -> Option<&Node> {
        self.nodes.get(node.0)
    }

    pub fn get_mut(&mut self, node: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(node.0)
    }

    /// # Panics
    ///
    /// Panics if `node` was not created by this forest.
    pub fn node(&self, node: NodeId) -> &Node {
        &self.nodes[node.0]
    }

    /// # Panics
    ///
    /// Panics if `node` was not created by this forest.
    pub fn node_mut(&mut self, node: NodeId) -> &mut Node {
        &mut self.nodes[node.0]
    }

    pub(crate) fn set_structure(&mut self, node: NodeId, structure: Structure) {
        self.nodes[node.0].structure = structure;
    }

    pub(crate) fn set_id(&mut self, node: NodeId, id: Option<RowId>) {
        self.nodes[node.0].structure.id = id;
    }

    pub(crate) fn clear_original(&mut self, node: NodeId) {
        self.nodes[node.0].original = None;
    }

    // Mutation

    /// Attaches `child` under `parent` at `index` (clamped; `None` appends).
    ///
    /// A child that already has a parent is detached from it first, so `index`
    /// is the final position among `parent`'s children.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId, index: Option<usize>) -> Result<()> {
        self.ensure_contains(parent)?;
        self.ensure_contains(child)?;
        if parent == child || self.is_descendant_of(parent, child) {
            return Err(Error::CycleDetected {
                node: child.to_string(),
                target: parent.to_string(),
            });
        }
        self.detach(child);
        let children = &mut self.nodes[parent.0].children;
        let index = index.unwrap_or(children.len()).min(children.len());
        children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
        Ok(())
    }

    /// Unlinks `child` from `parent`. Returns `false` if it was not a child of `parent`.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if self.get(child).and_then(Node::parent) != Some(parent) {
            return false;
        }
        self.detach(child);
        true
    }

    /// Unlinks every child of `parent` and returns them in their former order.
    pub fn remove_children(&mut self, parent: NodeId) -> Vec<NodeId> {
        let children = std::mem::take(&mut self.nodes[parent.0].children);
        for child in &children {
            self.nodes[child.0].parent = None;
        }
        children
    }

    /// Detaches `node` from its parent. No-op for roots.
    pub fn remove(&mut self, node: NodeId) {
        self.detach(node);
    }

    pub fn move_to(&mut self, node: NodeId, parent: NodeId, index: Option<usize>) -> Result<()> {
        self.add_child(parent, node, index)
    }

    pub fn move_after(&mut self, node: NodeId, reference: NodeId) -> Result<()> {
        if node == reference {
            return Ok(());
        }
        let (parent, index) = self.sibling_slot(node, reference)?;
        self.add_child(parent, node, Some(index + 1))
    }

    pub fn move_before(&mut self, node: NodeId, reference: NodeId) -> Result<()> {
        if node == reference {
            return Ok(());
        }
        let (parent, index) = self.sibling_slot(node, reference)?;
        self.add_child(parent, node, Some(index))
    }

    /// Deep-clones the subtree of `node` and attaches the clone under `parent`.
    pub fn copy_to(
        &mut self,
        node: NodeId,
        parent: NodeId,
        index: Option<usize>,
    ) -> Result<NodeId> {
        self.ensure_contains(node)?;
        self.ensure_contains(parent)?;
        self.reject_copy_into_self(node, parent)?;
        let copy = self.clone_subtree(node);
        self.add_child(parent, copy, index)?;
        Ok(copy)
    }

    pub fn copy_after(&mut self, node: NodeId, reference: NodeId) -> Result<NodeId> {
        let (parent, index) = self.reference_slot(reference)?;
        self.copy_to(node, parent, Some(index + 1))
    }

    pub fn copy_before(&mut self, node: NodeId, reference: NodeId) -> Result<NodeId> {
        let (parent, index) = self.reference_slot(reference)?;
        self.copy_to(node, parent, Some(index))
    }

    fn reject_copy_into_self(&self, node: NodeId, parent: NodeId) -> Result<()> {
        if parent == node || self.is_descendant_of(parent, node) {
            return Err(Error::CycleDetected {
                node: node.to_string(),
                target: parent.to_string(),
            });
        }
        Ok(())
    }

    fn clone_subtree(&mut self, node: NodeId) -> NodeId {
        let data = self.nodes[node.0].data.clone();
        let copy = self.push(Node {
            data,
            original: Some(node),
            ..Node::default()
        });
        let children = self.nodes[node.0].children.clone();
        for child in children {
            let child_copy = self.clone_subtree(child);
            self.nodes[child_copy.0].parent = Some(copy);
            self.nodes[copy.0].children.push(child_copy);
        }
        copy
    }

    fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != node);
        }
    }

    fn ensure_contains(&self, node: NodeId) -> Result<()> {
        if self.contains(node) {
            Ok(())
        } else {
            Err(Error::InvalidReference(format!("node {node} does not belong to this forest")))
        }
    }

    /// Parent and index of `reference`; fails for rootless references.
    fn reference_slot(&self, reference: NodeId) -> Result<(NodeId, usize)> {
        self.ensure_contains(reference)?;
        let parent = self.nodes[reference.0].parent.ok_or_else(|| {
            Error::InvalidReference(format!(
                "node {reference} has no parent, siblings cannot be positioned relative to it"
            ))
        })?;
        Ok((parent, self.index(reference)))
    }

    /// Like [`Self::reference_slot`], but with `reference`'s index as it will be
    /// once `node` has left its current parent.
    fn sibling_slot(&self, node: NodeId, reference: NodeId) -> Result<(NodeId, usize)> {
        self.ensure_contains(node)?;
        let (parent, mut index) = self.reference_slot(reference)?;
        if self.nodes[node.0].parent == Some(parent) && self.index(node) < index {
            index -= 1;
        }
        Ok((parent, index))
    }

    // Queries

    /// Position among siblings, 0 for a root.
    pub fn index(&self, node: NodeId) -> usize {
        self.nodes[node.0]
            .parent
            .and_then(|p| self.nodes[p.0].children.iter().position(|c| *c == node))
            .unwrap_or(0)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    pub fn child(&self, node: NodeId, index: usize) -> Result<NodeId> {
        self.nodes[node.0]
            .children
            .get(index)
            .copied()
            .ok_or_else(|| Error::InvalidReference(format!("node {node} has no child at {index}")))
    }

    pub fn children_count(&self, node: NodeId) -> usize {
        self.nodes[node.0].children.len()
    }

    pub fn has_parent(&self, node: NodeId) -> bool {
        self.nodes[node.0].parent.is_some()
    }

    pub fn has_children(&self, node: NodeId) -> bool {
        !self.nodes[node.0].children.is_empty()
    }

    pub fn is_leaf(&self, node: NodeId) -> bool {
        !self.has_children(node)
    }

    /// Root-ward chain, nearest first.
    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.nodes[node.0].parent;
        while let Some(n) = current {
            out.push(n);
            current = self.nodes[n.0].parent;
        }
        out
    }

    pub fn depth(&self, node: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.nodes[node.0].parent;
        while let Some(n) = current {
            depth += 1;
            current = self.nodes[n.0].parent;
        }
        depth
    }

    /// Every node below `node`.
    ///
    /// Order: the direct children in sibling order, followed by each child's own
    /// descendant list in sibling order. This is neither pre- nor post-order.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let children = &self.nodes[node.0].children;
        let mut out = children.clone();
        for child in children {
            out.extend(self.descendants(*child));
        }
        out
    }

    pub fn descendants_count(&self, node: NodeId) -> usize {
        self.nodes[node.0]
            .children
            .iter()
            .map(|c| 1 + self.descendants_count(*c))
            .sum()
    }

    pub fn is_child_of(&self, node: NodeId, parent: NodeId) -> bool {
        self.nodes[node.0].parent == Some(parent)
    }

    pub fn is_parent_of(&self, node: NodeId, child: NodeId) -> bool {
        self.is_child_of(child, node)
    }

    pub fn is_descendant_of(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.nodes[node.0].parent;
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.nodes[n.0].parent;
        }
        false
    }

    pub fn is_ancestor_of(&self, node: NodeId, descendant: NodeId) -> bool {
        self.is_descendant_of(descendant, node)
    }

    // Export

    /// Recomputes the nested-set encoding of the subtree rooted at `node`.
    ///
    /// The subtree root gets `left = left_start`. Entries are returned in
    /// ascending `left` order.
    pub fn export(&self, node: NodeId, left_start: i64) -> Vec<ExportEntry> {
        let mut out = Vec::with_capacity(self.descendants_count(node) + 1);
        let position = self.index(node) as i64;
        self.export_into(node, left_start, position, self.depth(node) as i64, &mut out);
        out.sort_by_key(|entry| entry.structure.left);
        out
    }

    /// Children are pushed before their parent; the caller sorts.
    fn export_into(
        &self,
        node: NodeId,
        left: i64,
        position: i64,
        level: i64,
        out: &mut Vec<ExportEntry>,
    ) -> i64 {
        let mut cursor = left + 1;
        for (index, child) in self.nodes[node.0].children.iter().enumerate() {
            let child_right = self.export_into(*child, cursor, index as i64, level + 1, out);
            cursor = child_right + 1;
        }
        let entry = &self.nodes[node.0];
        out.push(ExportEntry {
            node,
            data: entry.data.clone(),
            structure: Placement {
                id: entry.structure.id,
                parent: entry.parent.and_then(|p| self.nodes[p.0].structure.id),
                position,
                level,
                left,
                right: cursor,
            },
        });
        cursor
    }
}
