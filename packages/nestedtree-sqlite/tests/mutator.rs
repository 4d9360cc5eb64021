use nestedtree_core::{Error, Mutator, Record, RowId, Store, TreeConfig, Value};
use nestedtree_sqlite::SqliteStore;
use nestedtree_test_support::{assert_consistent, outline};

fn setup() -> (SqliteStore, Mutator, TreeConfig) {
    let config = TreeConfig::new("tree");
    let mut store = SqliteStore::new_in_memory().unwrap();
    store.ensure_schema(&config, &["name"]).unwrap();
    (store, Mutator::new(config.clone()).unwrap(), config)
}

fn named(name: &str) -> Record {
    let mut data = Record::new();
    data.insert("name".into(), name.into());
    data
}

fn snapshot(store: &mut SqliteStore) -> Vec<Record> {
    store.all("SELECT * FROM tree ORDER BY id", &[]).unwrap()
}

fn bounds(
    store: &mut SqliteStore,
    mutator: &Mutator,
    id: RowId,
) -> (i64, i64, i64, Option<RowId>, i64) {
    let n = mutator.node(store, id).unwrap();
    (n.left, n.right, n.level, n.parent, n.position)
}

/// Creates `names` in order under `parent`, appending.
fn create_all(
    store: &mut SqliteStore,
    mutator: &Mutator,
    parent: RowId,
    names: &[&str],
) -> Vec<RowId> {
    names
        .iter()
        .map(|name| mutator.create(store, Some(parent), None, &named(name)).unwrap())
        .collect()
}

#[test]
fn first_create_makes_the_root_then_children() {
    let (mut store, mutator, config) = setup();
    assert_eq!(mutator.root(&mut store).unwrap(), None);

    let root = mutator.create(&mut store, None, None, &named("root")).unwrap();
    assert_eq!(bounds(&mut store, &mutator, root), (1, 2, 0, None, 0));

    let child = mutator.create(&mut store, Some(root), None, &named("child")).unwrap();
    assert_eq!(child, 2);
    assert_eq!(bounds(&mut store, &mutator, child), (2, 3, 1, Some(root), 0));
    assert_eq!(bounds(&mut store, &mutator, root), (1, 4, 0, None, 0));

    // Without a parent, later creates go under the root.
    let second = mutator.create(&mut store, None, None, &named("second")).unwrap();
    assert_eq!(mutator.node(&mut store, second).unwrap().parent, Some(root));
    assert_consistent(&mut store, &config);
}

#[test]
fn create_at_position_shifts_later_siblings() {
    let (mut store, mutator, config) = setup();
    let root = mutator.create(&mut store, None, None, &named("root")).unwrap();
    create_all(&mut store, &mutator, root, &["a", "b", "c"]);

    mutator.create(&mut store, Some(root), Some(1), &named("x")).unwrap();
    mutator.create(&mut store, Some(root), Some(0), &named("y")).unwrap();
    mutator.create(&mut store, Some(root), Some(99), &named("z")).unwrap();
    assert_eq!(outline(&mut store, &config, "name").unwrap(), "root(y,a,x,b,c,z)");
    assert_consistent(&mut store, &config);
}

#[test]
fn move_first_child_to_last_position() {
    let (mut store, mutator, config) = setup();
    let root = mutator.create(&mut store, None, None, &named("root")).unwrap();
    let kids = create_all(&mut store, &mutator, root, &["c0", "c1", "c2"]);

    mutator.move_node(&mut store, kids[0], root, Some(2)).unwrap();
    assert_eq!(outline(&mut store, &config, "name").unwrap(), "root(c1,c2,c0)");
    assert_eq!(bounds(&mut store, &mutator, kids[0]), (6, 7, 1, Some(root), 2));
    assert_eq!(bounds(&mut store, &mutator, kids[1]), (2, 3, 1, Some(root), 0));
    assert_consistent(&mut store, &config);

    mutator.move_node(&mut store, kids[0], root, Some(0)).unwrap();
    assert_eq!(outline(&mut store, &config, "name").unwrap(), "root(c0,c1,c2)");
    assert_consistent(&mut store, &config);
}

#[test]
fn move_subtree_across_parents_and_levels() {
    let (mut store, mutator, config) = setup();
    let root = mutator.create(&mut store, None, None, &named("root")).unwrap();
    let top = create_all(&mut store, &mutator, root, &["a", "b", "c"]);
    let a_kids = create_all(&mut store, &mutator, top[0], &["a1", "a2"]);
    create_all(&mut store, &mutator, a_kids[1], &["a2x"]);

    // Rightward into a deeper position.
    mutator.move_node(&mut store, top[0], top[2], None).unwrap();
    assert_eq!(
        outline(&mut store, &config, "name").unwrap(),
        "root(b,c(a(a1,a2(a2x))))"
    );
    assert_eq!(mutator.node(&mut store, a_kids[1]).unwrap().level, 3);
    assert_consistent(&mut store, &config);

    // Leftward and shallower.
    mutator.move_node(&mut store, a_kids[1], root, Some(0)).unwrap();
    assert_eq!(
        outline(&mut store, &config, "name").unwrap(),
        "root(a2(a2x),b,c(a(a1)))"
    );
    assert_consistent(&mut store, &config);
}

#[test]
fn copy_leaves_original_rows_untouched() {
    let (mut store, mutator, config) = setup();
    let root = mutator.create(&mut store, None, None, &named("root")).unwrap();
    let top = create_all(&mut store, &mutator, root, &["a", "b"]);
    let a_kids = create_all(&mut store, &mutator, top[0], &["a1", "a2"]);
    let original_ids = [top[0], a_kids[0], a_kids[1]];
    let before: Vec<Record> = original_ids
        .iter()
        .map(|id| store.one("SELECT * FROM tree WHERE id = ?", &[(*id).into()]).unwrap().unwrap())
        .collect();
    let rows_before = snapshot(&mut store).len();

    let copy = mutator.copy(&mut store, top[0], top[1], None).unwrap();
    assert!(!original_ids.contains(&copy));

    let after: Vec<Record> = original_ids
        .iter()
        .map(|id| store.one("SELECT * FROM tree WHERE id = ?", &[(*id).into()]).unwrap().unwrap())
        .collect();
    assert_eq!(before, after);
    assert_eq!(snapshot(&mut store).len(), rows_before + 3);
    assert_eq!(
        outline(&mut store, &config, "name").unwrap(),
        "root(a(a1,a2),b(a(a1,a2)))"
    );
    let copied = mutator.children(&mut store, copy).unwrap();
    assert_eq!(copied.len(), 2);
    assert!(copied.iter().all(|c| c.parent == Some(copy) && c.level == 3));
    assert_consistent(&mut store, &config);
}

#[test]
fn copy_before_source_shifts_the_source() {
    let (mut store, mutator, config) = setup();
    let root = mutator.create(&mut store, None, None, &named("root")).unwrap();
    let top = create_all(&mut store, &mutator, root, &["a", "b"]);
    create_all(&mut store, &mutator, top[1], &["b1"]);

    mutator.copy(&mut store, top[1], root, Some(0)).unwrap();
    assert_eq!(outline(&mut store, &config, "name").unwrap(), "root(b(b1),a,b(b1))");
    assert_consistent(&mut store, &config);
}

#[test]
fn remove_closes_the_gap() {
    let (mut store, mutator, config) = setup();
    let root = mutator.create(&mut store, None, None, &named("root")).unwrap();
    let top = create_all(&mut store, &mutator, root, &["x", "y", "z", "w", "t"]);
    let t_kids = create_all(&mut store, &mutator, top[4], &["t1", "t2"]);
    let u = create_all(&mut store, &mutator, root, &["u"])[0];
    assert_eq!(bounds(&mut store, &mutator, top[4]), (10, 15, 1, Some(root), 4));
    assert_eq!(bounds(&mut store, &mutator, u), (16, 17, 1, Some(root), 5));

    mutator.remove(&mut store, top[4]).unwrap();
    for gone in [top[4], t_kids[0], t_kids[1]] {
        assert_eq!(mutator.node(&mut store, gone), Err(Error::NodeNotFound(gone)));
    }
    assert_eq!(bounds(&mut store, &mutator, u), (10, 11, 1, Some(root), 4));
    assert_eq!(bounds(&mut store, &mutator, root), (1, 12, 0, None, 0));
    assert_eq!(bounds(&mut store, &mutator, top[3]), (8, 9, 1, Some(root), 3));
    assert_consistent(&mut store, &config);
}

#[test]
fn moves_and_copies_into_own_subtree_change_nothing() {
    let (mut store, mutator, _) = setup();
    let root = mutator.create(&mut store, None, None, &named("root")).unwrap();
    let a = create_all(&mut store, &mutator, root, &["a"])[0];
    let a1 = create_all(&mut store, &mutator, a, &["a1"])[0];
    let before = snapshot(&mut store);

    for target in [a, a1] {
        assert!(matches!(
            mutator.move_node(&mut store, a, target, None),
            Err(Error::CycleDetected { .. })
        ));
        assert!(matches!(
            mutator.copy(&mut store, a, target, None),
            Err(Error::CycleDetected { .. })
        ));
    }
    assert!(matches!(mutator.remove(&mut store, root), Err(Error::InvalidOperation(_))));
    assert_eq!(snapshot(&mut store), before);
}

#[test]
fn failed_statement_rolls_back_every_shift() {
    let (mut store, mutator, _) = setup();
    let root = mutator.create(&mut store, None, None, &named("root")).unwrap();
    create_all(&mut store, &mutator, root, &["a", "b"]);
    let before = snapshot(&mut store);

    let mut data = named("bad");
    data.insert("no_such_column".into(), Value::from(1));
    let err = mutator.create(&mut store, Some(root), Some(0), &data).unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert_eq!(snapshot(&mut store), before);
}

#[test]
fn store_side_reads() {
    let (mut store, mutator, _) = setup();
    let root = mutator.create(&mut store, None, None, &named("root")).unwrap();
    let top = create_all(&mut store, &mutator, root, &["a", "b"]);
    let a_kids = create_all(&mut store, &mutator, top[0], &["a1", "a2"]);
    let deep = create_all(&mut store, &mutator, a_kids[0], &["a1x"])[0];

    let name = |n: &nestedtree_core::StoredNode| n.data.get("name").cloned();
    let children: Vec<_> = mutator.children(&mut store, root).unwrap().iter().map(name).collect();
    assert_eq!(children, [Some(Value::from("a")), Some(Value::from("b"))]);
    assert_eq!(mutator.children_count(&mut store, top[0]).unwrap(), 2);
    assert_eq!(mutator.descendants_count(&mut store, root).unwrap(), 5);

    let all: Vec<RowId> = mutator
        .descendants(&mut store, root, None)
        .unwrap()
        .iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(all, [top[0], a_kids[0], deep, a_kids[1], top[1]]);
    let shallow = mutator.descendants(&mut store, root, Some(1)).unwrap();
    assert_eq!(shallow.len(), 2);

    let ancestors: Vec<RowId> = mutator
        .ancestors(&mut store, deep)
        .unwrap()
        .iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(ancestors, [a_kids[0], top[0], root]);
    assert_eq!(mutator.root(&mut store).unwrap().map(|r| r.id), Some(root));
    assert_eq!(mutator.node(&mut store, 99), Err(Error::NodeNotFound(99)));
}

#[test]
fn moving_a_subtree_wider_than_the_bind_limit() {
    let (mut store, mutator, _) = setup();
    let leaves: i64 = 40_000;
    let row = |name: &str, parent: Option<RowId>, pos: i64, lvl: i64, lft: i64, rgt: i64| {
        let mut r = named(name);
        r.insert("pid".into(), parent.into());
        r.insert("pos".into(), pos.into());
        r.insert("lvl".into(), lvl.into());
        r.insert("lft".into(), lft.into());
        r.insert("rgt".into(), rgt.into());
        r
    };
    // root -> [wide -> leaves.., target]
    store.begin().unwrap();
    let root = store.insert("tree", "id", &row("root", None, 0, 0, 1, 2 * leaves + 6)).unwrap();
    let wide = store
        .insert("tree", "id", &row("wide", Some(root), 0, 1, 2, 2 * leaves + 3))
        .unwrap();
    for i in 0..leaves {
        let leaf = row("leaf", Some(wide), i, 2, 3 + 2 * i, 4 + 2 * i);
        store.insert("tree", "id", &leaf).unwrap();
    }
    let target = store
        .insert("tree", "id", &row("target", Some(root), 1, 1, 2 * leaves + 4, 2 * leaves + 5))
        .unwrap();
    store.commit().unwrap();

    mutator.move_node(&mut store, wide, target, None).unwrap();

    assert_eq!(bounds(&mut store, &mutator, target), (2, 2 * leaves + 5, 1, Some(root), 0));
    assert_eq!(bounds(&mut store, &mutator, wide), (3, 2 * leaves + 4, 2, Some(target), 0));
    assert_eq!(mutator.descendants_count(&mut store, wide).unwrap(), leaves);
    let misplaced = store
        .all(
            "SELECT id FROM tree WHERE pid = ? AND (lvl != 3 OR lft < 4 OR rgt > ?)",
            &[wide.into(), (2 * leaves + 3).into()],
        )
        .unwrap();
    assert!(misplaced.is_empty());
    assert!(store.all("SELECT id FROM tree WHERE lft < 1", &[]).unwrap().is_empty());
}
