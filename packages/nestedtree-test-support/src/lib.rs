//! Conformance helpers shared by the backend test suites.

use std::collections::{BTreeMap, HashMap, HashSet};

use nestedtree_core::{Error, Result, Role, RowId, Store, TreeConfig, Value};

#[derive(Clone, Debug)]
struct Row {
    id: RowId,
    parent: Option<RowId>,
    position: i64,
    level: i64,
    left: i64,
    right: i64,
}

fn read_rows<S: Store + ?Sized>(store: &mut S, config: &TreeConfig) -> Result<Vec<Row>> {
    let f = &config.fields;
    let columns = [
        f.require(Role::Id)?,
        f.require(Role::Parent)?,
        f.require(Role::Position)?,
        f.require(Role::Level)?,
        f.require(Role::Left)?,
        f.require(Role::Right)?,
    ];
    let records = store.all(&format!("SELECT * FROM {}", config.table), &[])?;
    records
        .iter()
        .map(|record| {
            let int = |column: &str| record.get(column).and_then(Value::as_i64);
            let required = |column: &str| {
                int(column).ok_or_else(|| Error::Storage(format!("row without `{column}`")))
            };
            Ok(Row {
                id: required(columns[0])?,
                parent: int(columns[1]),
                position: required(columns[2])?,
                level: required(columns[3])?,
                left: required(columns[4])?,
                right: required(columns[5])?,
            })
        })
        .collect()
}

/// Checks every nested-set and adjacency invariant of the stored table and
/// returns one message per violation. An empty table is consistent.
pub fn analyze<S: Store + ?Sized>(store: &mut S, config: &TreeConfig) -> Result<Vec<String>> {
    let rows = read_rows(store, config)?;
    let mut problems = Vec::new();
    if rows.is_empty() {
        return Ok(problems);
    }
    let by_id: HashMap<RowId, &Row> = rows.iter().map(|r| (r.id, r)).collect();
    let mut children: HashMap<RowId, Vec<&Row>> = HashMap::new();

    let roots: Vec<&Row> = rows.iter().filter(|r| r.parent.is_none()).collect();
    match roots.as_slice() {
        [root] if root.left == 1 => {}
        [root] => problems.push(format!("root {} has left {}", root.id, root.left)),
        _ => problems.push(format!("expected exactly one root, found {}", roots.len())),
    }
    for row in &rows {
        if let Some(parent) = row.parent {
            if by_id.contains_key(&parent) {
                children.entry(parent).or_default().push(row);
            } else {
                problems.push(format!("row {} references missing parent {parent}", row.id));
            }
        }
    }

    let n = rows.len() as i64;
    let max_right = rows.iter().map(|r| r.right).max().unwrap_or(0);
    if max_right != 2 * n {
        problems.push(format!("max right is {max_right}, expected {}", 2 * n));
    }
    let mut bounds = HashSet::new();
    for row in &rows {
        if row.left >= row.right {
            problems.push(format!("row {} has left {} >= right {}", row.id, row.left, row.right));
        }
        for bound in [row.left, row.right] {
            if bound < 1 || !bounds.insert(bound) {
                problems.push(format!("bound {bound} of row {} is duplicated or negative", row.id));
            }
        }
    }

    for (parent, siblings) in &children {
        let mut ordered = siblings.clone();
        ordered.sort_by_key(|r| r.position);
        let positions: Vec<i64> = ordered.iter().map(|r| r.position).collect();
        let expected: Vec<i64> = (0..ordered.len() as i64).collect();
        if positions != expected {
            problems.push(format!("children of {parent} have positions {positions:?}"));
        }
        if ordered.windows(2).any(|w| w[0].left > w[1].left) {
            problems.push(format!("children of {parent} are not in left order"));
        }
    }

    for row in &rows {
        let ancestors = ancestor_count(row, &by_id);
        match ancestors {
            Some(count) if count == row.level => {}
            Some(count) => problems.push(format!(
                "row {} has level {} but {count} ancestors",
                row.id, row.level
            )),
            None => problems.push(format!("row {} sits on a parent cycle", row.id)),
        }
        let descendants = subtree_size(row.id, &children) - 1;
        if row.right - row.left != 2 * descendants + 1 {
            problems.push(format!(
                "row {} spans [{}, {}] but has {descendants} descendants",
                row.id, row.left, row.right
            ));
        }
        let enclosing = rows
            .iter()
            .filter(|r| r.left < row.left && r.right > row.right)
            .max_by_key(|r| r.left)
            .map(|r| r.id);
        if enclosing != row.parent {
            problems.push(format!(
                "row {} has parent {:?} but its nearest enclosing interval is {:?}",
                row.id, row.parent, enclosing
            ));
        }
    }
    Ok(problems)
}

fn ancestor_count(row: &Row, by_id: &HashMap<RowId, &Row>) -> Option<i64> {
    let mut count = 0;
    let mut current = row.parent;
    while let Some(id) = current {
        count += 1;
        if count > by_id.len() as i64 {
            return None;
        }
        current = by_id.get(&id).and_then(|r| r.parent);
    }
    Some(count)
}

fn subtree_size(id: RowId, children: &HashMap<RowId, Vec<&Row>>) -> i64 {
    1 + children
        .get(&id)
        .map(|c| c.iter().map(|r| subtree_size(r.id, children)).sum())
        .unwrap_or(0)
}

/// Panics with every violation [`analyze`] finds.
pub fn assert_consistent<S: Store + ?Sized>(store: &mut S, config: &TreeConfig) {
    let problems = analyze(store, config).expect("read tree table");
    assert!(problems.is_empty(), "inconsistent tree:\n{}", problems.join("\n"));
}

/// Renders the stored tree as `label(child,child)` following parent links and
/// positions, using column `label` for names. Rows whose label is not text
/// render their id.
pub fn outline<S: Store + ?Sized>(
    store: &mut S,
    config: &TreeConfig,
    label: &str,
) -> Result<String> {
    let records = store.all(&format!("SELECT * FROM {}", config.table), &[])?;
    let f = &config.fields;
    let (parent_col, position_col) = (f.require(Role::Parent)?, f.require(Role::Position)?);
    let mut names = HashMap::new();
    let mut children: BTreeMap<Option<RowId>, Vec<(i64, RowId)>> = BTreeMap::new();
    for record in &records {
        let int = |column: &str| record.get(column).and_then(Value::as_i64);
        let id = int(f.id.as_str()).ok_or_else(|| Error::Storage("row without id".into()))?;
        let name = match record.get(label) {
            Some(Value::Text(s)) => s.clone(),
            _ => id.to_string(),
        };
        names.insert(id, name);
        children
            .entry(int(parent_col))
            .or_default()
            .push((int(position_col).unwrap_or(0), id));
    }
    for list in children.values_mut() {
        list.sort_unstable();
    }
    fn render(
        id: RowId,
        names: &HashMap<RowId, String>,
        children: &BTreeMap<Option<RowId>, Vec<(i64, RowId)>>,
    ) -> String {
        let name = names.get(&id).cloned().unwrap_or_default();
        match children.get(&Some(id)) {
            Some(list) => {
                let inner: Vec<String> =
                    list.iter().map(|(_, c)| render(*c, names, children)).collect();
                format!("{name}({})", inner.join(","))
            }
            None => name,
        }
    }
    let roots: Vec<String> = children
        .get(&None)
        .map(|list| list.iter().map(|(_, id)| render(*id, &names, &children)).collect())
        .unwrap_or_default();
    Ok(roots.join(" "))
}
