use std::collections::HashMap;

use tracing::debug;

use crate::codec::{from_adjacency, from_nested_set_at};
use crate::config::{LoadMode, Role, TreeConfig};
use crate::error::{Error, Result};
use crate::forest::{ExportEntry, Forest, Structure};
use crate::ids::{NodeId, RowId};
use crate::sync::{self, SyncReport};
use crate::traits::Store;
use crate::value::Record;

/// What part of the table a [`Tree`] mirrors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Table,
    /// Loaded with [`Tree::load_subtree`]; read-only with respect to the store.
    Subtree(RowId),
}

/// A whole table held in memory as one [`Forest`] rooted at [`Tree::root`].
///
/// Mutate the nodes through [`Tree::forest_mut`], then [`Tree::sync`] writes
/// the minimal set of row changes back.
#[derive(Clone, Debug)]
pub struct Tree {
    config: TreeConfig,
    forest: Forest,
    root: NodeId,
    index: HashMap<RowId, NodeId>,
    scope: Scope,
}

impl Tree {
    /// An unsaved tree holding only a root with `data`.
    pub fn new(config: TreeConfig, data: Record) -> Result<Self> {
        config.validate()?;
        let mut forest = Forest::new();
        let root = forest.create(data);
        Ok(Self {
            config,
            forest,
            root,
            index: HashMap::new(),
            scope: Scope::Table,
        })
    }

    fn from_forest(config: TreeConfig, forest: Forest, root: NodeId, scope: Scope) -> Self {
        let mut tree = Self {
            config,
            forest,
            root,
            index: HashMap::new(),
            scope,
        };
        tree.reindex();
        tree
    }

    /// Reads the full table and rebuilds the tree, from `parent` links when
    /// that column is mapped, else from intervals.
    #[tracing::instrument(skip(store, config), fields(table = %config.table))]
    pub fn load<S: Store + ?Sized>(store: &mut S, config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let rows = store.all(&format!("SELECT * FROM {}", config.table), &[])?;
        let count = rows.len();
        let (forest, root) = match config.load_mode()? {
            LoadMode::Adjacency => from_adjacency(rows, &config.fields, None)?,
            LoadMode::NestedSet => from_nested_set_at(rows, &config.fields, 1)?,
        };
        let tree = Self::from_forest(config, forest, root, Scope::Table);
        debug!(rows = count, attached = tree.index.len(), "loaded tree");
        Ok(tree)
    }

    /// Loads only the subtree rooted at row `id`.
    ///
    /// Uses a range scan when `left`/`right` are mapped. The result cannot be
    /// synced since rows outside the subtree are unknown to it.
    #[tracing::instrument(skip(store, config), fields(table = %config.table))]
    pub fn load_subtree<S: Store + ?Sized>(
        store: &mut S,
        config: TreeConfig,
        id: RowId,
    ) -> Result<Self> {
        config.validate()?;
        let fields = &config.fields;
        let table = &config.table;
        let (forest, root) = match (fields.column(Role::Left), fields.column(Role::Right)) {
            (Some(lft), Some(rgt)) => {
                let top = store
                    .one(
                        &format!("SELECT {lft}, {rgt} FROM {table} WHERE {} = ?", fields.id),
                        &[id.into()],
                    )?
                    .ok_or(Error::NodeNotFound(id))?;
                let bound = |column: &str| {
                    top.get(column).and_then(|v| v.as_i64()).ok_or_else(|| {
                        Error::Storage(format!("row {id} has no `{column}` value"))
                    })
                };
                let (left, right) = (bound(lft)?, bound(rgt)?);
                let rows = store.all(
                    &format!("SELECT * FROM {table} WHERE {lft} >= ? AND {rgt} <= ?"),
                    &[left.into(), right.into()],
                )?;
                from_nested_set_at(rows, fields, left)?
            }
            _ => {
                let rows = store.all(&format!("SELECT * FROM {table}"), &[])?;
                from_adjacency(rows, fields, Some(id)).map_err(|e| match e {
                    Error::NoRootFound => Error::NodeNotFound(id),
                    other => other,
                })?
            }
        };
        Ok(Self::from_forest(config, forest, root, Scope::Subtree(id)))
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn forest_mut(&mut self) -> &mut Forest {
        &mut self.forest
    }

    /// Makes `node` the root, detaching it from its current parent. Nodes no
    /// longer reachable from the new root are removed from the table on sync.
    pub fn set_root(&mut self, node: NodeId) -> Result<()> {
        if !self.forest.contains(node) {
            return Err(Error::InvalidReference(format!("node {node} is not in this tree")));
        }
        self.forest.remove(node);
        self.root = node;
        self.reindex();
        Ok(())
    }

    /// Node currently holding row `id`, if it is still reachable from the root.
    pub fn node_by_id(&self, id: RowId) -> Option<NodeId> {
        let node = *self.index.get(&id)?;
        let reachable = node == self.root || self.forest.is_descendant_of(node, self.root);
        (reachable && self.forest.node(node).id() == Some(id)).then_some(node)
    }

    /// The nested-set encoding of the whole tree, ascending by `left`.
    pub fn export(&self) -> Vec<ExportEntry> {
        self.forest.export(self.root, 1)
    }

    /// Writes the tree's state to the store in one transaction.
    ///
    /// On success every reachable node carries its store id and the structural
    /// values just written, and copies stop being copies.
    #[tracing::instrument(skip(self, store), fields(table = %self.config.table))]
    pub fn sync<S: Store + ?Sized>(&mut self, store: &mut S) -> Result<SyncReport> {
        if let Scope::Subtree(id) = self.scope {
            return Err(Error::InvalidOperation(format!(
                "tree was loaded as the subtree of row {id} and cannot be synced"
            )));
        }
        let export = self.export();
        let rows = store.all(&format!("SELECT * FROM {}", self.config.table), &[])?;
        let plan = sync::plan(&self.forest, &export, rows, &self.config)?;
        let report = sync::apply(store, &mut self.forest, &self.config, &plan)?;

        for entry in &export {
            let mut structure = Structure::from(&entry.structure);
            structure.id = self.forest.node(entry.node).id();
            structure.parent = self
                .forest
                .parent(entry.node)
                .and_then(|p| self.forest.node(p).id());
            self.forest.set_structure(entry.node, structure);
            self.forest.clear_original(entry.node);
        }
        // Detached nodes whose rows are gone insert afresh if re-attached.
        if !report.removed.is_empty() {
            for index in 0..self.forest.len() {
                let node = NodeId(index);
                let stale = self
                    .forest
                    .node(node)
                    .id()
                    .map_or(false, |id| report.removed.contains(&id));
                if stale {
                    self.forest.set_id(node, None);
                }
            }
        }
        self.reindex();
        debug!(
            created = report.created.len(),
            changed = report.changed.len(),
            removed = report.removed.len(),
            "synced"
        );
        Ok(report)
    }

    fn reindex(&mut self) {
        self.index.clear();
        let mut nodes = self.forest.descendants(self.root);
        nodes.push(self.root);
        for node in nodes {
            if let Some(id) = self.forest.node(node).id() {
                self.index.insert(id, node);
            }
        }
    }
}
