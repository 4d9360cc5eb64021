use nestedtree_core::{
    Error, FieldMap, Forest, NodeId, Record, Result, RowId, Store, Tree, TreeConfig, Value,
};
use nestedtree_sqlite::SqliteStore;
use nestedtree_test_support::{assert_consistent, outline};

/// Passes everything through and counts the statements that write.
struct Counting<'a> {
    inner: &'a mut SqliteStore,
    writes: usize,
}

impl<'a> Counting<'a> {
    fn new(inner: &'a mut SqliteStore) -> Self {
        Self { inner, writes: 0 }
    }
}

impl Store for Counting<'_> {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.writes += 1;
        self.inner.query(sql, params)
    }

    fn all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        self.inner.all(sql, params)
    }

    fn begin(&mut self) -> Result<()> {
        self.writes += 1;
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.inner.rollback()
    }

    fn insert(&mut self, table: &str, id_column: &str, fields: &Record) -> Result<RowId> {
        self.writes += 1;
        self.inner.insert(table, id_column, fields)
    }
}

fn config() -> TreeConfig {
    TreeConfig::new("tree")
}

fn store() -> SqliteStore {
    let mut store = SqliteStore::new_in_memory().unwrap();
    store.ensure_schema(&config(), &["name", "weight", "blob"]).unwrap();
    store
}

fn named(name: &str) -> Record {
    let mut data = Record::new();
    data.insert("name".into(), name.into());
    data
}

fn add(forest: &mut Forest, parent: NodeId, name: &str) -> NodeId {
    let node = forest.create(named(name));
    forest.add_child(parent, node, None).unwrap();
    node
}

fn shape(forest: &Forest, node: NodeId) -> String {
    let name = forest.node(node).get("name").and_then(Value::as_str).unwrap_or("?").to_owned();
    if forest.is_leaf(node) {
        return name;
    }
    let inner: Vec<String> = forest.children(node).iter().map(|c| shape(forest, *c)).collect();
    format!("{name}({})", inner.join(","))
}

/// root -> [a -> [a1, a2], b], already synced.
fn seeded(store: &mut SqliteStore) -> Tree {
    let mut tree = Tree::new(config(), named("root")).unwrap();
    let root = tree.root();
    let f = tree.forest_mut();
    let a = add(f, root, "a");
    add(f, a, "a1");
    add(f, a, "a2");
    add(f, root, "b");
    tree.sync(store).unwrap();
    tree
}

fn id_of(tree: &Tree, name: &str) -> RowId {
    let f = tree.forest();
    let mut nodes = f.descendants(tree.root());
    nodes.push(tree.root());
    nodes
        .into_iter()
        .find(|n| f.node(*n).get("name").and_then(Value::as_str) == Some(name))
        .and_then(|n| f.node(n).id())
        .unwrap()
}

#[test]
fn new_tree_is_written_and_reloaded() {
    let mut store = store();
    let tree = seeded(&mut store);
    assert_consistent(&mut store, &config());
    assert_eq!(outline(&mut store, &config(), "name").unwrap(), "root(a(a1,a2),b)");
    assert!(tree.node_by_id(id_of(&tree, "a2")).is_some());

    let reloaded = Tree::load(&mut store, config()).unwrap();
    assert_eq!(shape(reloaded.forest(), reloaded.root()), "root(a(a1,a2),b)");
    let placements = |t: &Tree| -> Vec<_> { t.export().into_iter().map(|e| e.structure).collect() };
    assert_eq!(placements(&reloaded), placements(&tree));
}

#[test]
fn second_sync_writes_nothing() {
    let mut store = store();
    let mut tree = seeded(&mut store);
    let mut counting = Counting::new(&mut store);
    let report = tree.sync(&mut counting).unwrap();
    assert_eq!(report, Default::default());
    assert_eq!(counting.writes, 0);

    let a = tree.node_by_id(id_of(&tree, "a")).unwrap();
    tree.forest_mut().node_mut(a).set("weight", 3);
    let mut counting = Counting::new(&mut store);
    let report = tree.sync(&mut counting).unwrap();
    assert_eq!(report.changed, vec![id_of(&tree, "a")]);
    let first = counting.writes;
    let mut counting = Counting::new(&mut store);
    tree.sync(&mut counting).unwrap();
    assert!(first > 0);
    assert_eq!(counting.writes, 0);
}

#[test]
fn dropped_attribute_is_cleared_in_the_table() {
    let mut store = store();
    let mut data = named("root");
    data.insert("weight".into(), Value::Integer(3));
    let mut tree = Tree::new(config(), data).unwrap();
    tree.sync(&mut store).unwrap();
    let root = tree.root();
    let id = tree.forest().node(root).id().unwrap();

    tree.forest_mut().node_mut(root).data_mut().remove("weight");
    let report = tree.sync(&mut store).unwrap();
    assert_eq!(report.changed, vec![id]);
    let row = store
        .one("SELECT weight FROM tree WHERE id = ?", &[id.into()])
        .unwrap()
        .unwrap();
    assert_eq!(row.get("weight"), Some(&Value::Null));

    let mut counting = Counting::new(&mut store);
    assert_eq!(tree.sync(&mut counting).unwrap(), Default::default());
    assert_eq!(counting.writes, 0);
}

#[test]
fn column_defaults_do_not_count_as_changes() {
    let mut store = store();
    store
        .connection()
        .execute_batch("ALTER TABLE tree ADD COLUMN created TEXT DEFAULT 'now'")
        .unwrap();
    let mut tree = seeded(&mut store);
    let root = tree.root();
    assert_eq!(tree.forest().node(root).get("created"), Some(&Value::from("now")));

    for _ in 0..3 {
        let mut counting = Counting::new(&mut store);
        assert_eq!(tree.sync(&mut counting).unwrap(), Default::default());
        assert_eq!(counting.writes, 0);
    }
    let rows = store.all("SELECT created FROM tree", &[]).unwrap();
    assert!(rows.iter().all(|r| r.get("created") == Some(&Value::from("now"))));
}

#[test]
fn structural_edits_sync_to_consistent_rows() {
    let mut store = store();
    let mut tree = seeded(&mut store);
    let root = tree.root();
    let a = tree.node_by_id(id_of(&tree, "a")).unwrap();
    let a1 = tree.node_by_id(id_of(&tree, "a1")).unwrap();
    let b = tree.node_by_id(id_of(&tree, "b")).unwrap();
    let removed = id_of(&tree, "a2");
    let a2 = tree.node_by_id(removed).unwrap();

    let f = tree.forest_mut();
    let fresh = add(f, b, "new");
    f.move_to(a1, fresh, None).unwrap();
    f.remove(a2);
    f.copy_before(b, a).unwrap();

    let report = tree.sync(&mut store).unwrap();
    assert_eq!(report.removed, vec![removed]);
    assert_eq!(report.created.len(), 4);
    assert_consistent(&mut store, &config());
    assert_eq!(
        outline(&mut store, &config(), "name").unwrap(),
        "root(b(new(a1)),a,b(new(a1)))"
    );
    assert_eq!(tree.node_by_id(removed), None);
    assert_eq!(shape(tree.forest(), root), "root(b(new(a1)),a,b(new(a1)))");

    let reloaded = Tree::load(&mut store, config()).unwrap();
    assert_eq!(shape(reloaded.forest(), reloaded.root()), shape(tree.forest(), root));
}

#[test]
fn vanished_row_aborts_sync() {
    let mut store = store();
    let mut tree = seeded(&mut store);
    let b = id_of(&tree, "b");
    store.query("DELETE FROM tree WHERE id = ?", &[b.into()]).unwrap();
    let root = tree.root();
    add(tree.forest_mut(), root, "c");
    let before = store.all("SELECT * FROM tree ORDER BY id", &[]).unwrap();

    assert_eq!(tree.sync(&mut store), Err(Error::OrphanedReference(b)));
    assert_eq!(store.all("SELECT * FROM tree ORDER BY id", &[]).unwrap(), before);
}

#[test]
fn failed_sync_rolls_back_and_forgets_new_ids() {
    let mut store = store();
    let mut tree = seeded(&mut store);
    let before = store.all("SELECT * FROM tree ORDER BY id", &[]).unwrap();
    let root = tree.root();
    let good = add(tree.forest_mut(), root, "good");
    let bad = add(tree.forest_mut(), root, "bad");
    tree.forest_mut().node_mut(bad).set("missing", 1);

    assert!(matches!(tree.sync(&mut store), Err(Error::Storage(_))));
    assert_eq!(store.all("SELECT * FROM tree ORDER BY id", &[]).unwrap(), before);
    assert_eq!(tree.forest().node(good).id(), None);

    tree.forest_mut().node_mut(bad).data_mut().remove("missing");
    tree.sync(&mut store).unwrap();
    assert_consistent(&mut store, &config());
}

#[test]
fn caller_data_round_trips() {
    let mut store = store();
    let mut data = named("root");
    data.insert("weight".into(), Value::Real(2.5));
    data.insert("blob".into(), Value::Blob(vec![1, 2, 3]));
    let mut tree = Tree::new(config(), data.clone()).unwrap();
    tree.sync(&mut store).unwrap();

    let reloaded = Tree::load(&mut store, config()).unwrap();
    assert_eq!(reloaded.forest().node(reloaded.root()).data(), &data);
}

#[test]
fn subtree_loads_by_range_and_refuses_sync() {
    let mut store = store();
    let tree = seeded(&mut store);
    let a = id_of(&tree, "a");

    let mut sub = Tree::load_subtree(&mut store, config(), a).unwrap();
    assert_eq!(shape(sub.forest(), sub.root()), "a(a1,a2)");
    assert!(matches!(sub.sync(&mut store), Err(Error::InvalidOperation(_))));

    let mut adjacency_only = config();
    adjacency_only.fields.left = None;
    adjacency_only.fields.right = None;
    adjacency_only.fields.level = None;
    let sub = Tree::load_subtree(&mut store, adjacency_only, a).unwrap();
    assert_eq!(shape(sub.forest(), sub.root()), "a(a1,a2)");

    assert_eq!(
        Tree::load_subtree(&mut store, config(), 999).unwrap_err(),
        Error::NodeNotFound(999)
    );
}

#[test]
fn nested_set_columns_alone_rebuild_the_tree() {
    let mut store = store();
    seeded(&mut store);
    let config = TreeConfig {
        table: "tree".into(),
        fields: FieldMap {
            parent: None,
            position: None,
            level: None,
            ..FieldMap::default()
        },
    };
    let tree = Tree::load(&mut store, config).unwrap();
    assert_eq!(shape(tree.forest(), tree.root()), "root(a(a1,a2),b)");
}

#[test]
fn file_backed_table_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.db");
    {
        let mut store = SqliteStore::open(&path).unwrap();
        store.ensure_schema(&config(), &["name", "weight", "blob"]).unwrap();
        seeded(&mut store);
    }
    let mut store = SqliteStore::open(&path).unwrap();
    let tree = Tree::load(&mut store, config()).unwrap();
    assert_eq!(shape(tree.forest(), tree.root()), "root(a(a1,a2),b)");
    assert_consistent(&mut store, &config());
}
