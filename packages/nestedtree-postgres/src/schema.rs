use postgres::Client;

use nestedtree_core::sql::check_identifier;
use nestedtree_core::{Error, Result, Role, TreeConfig};

const SCHEMA_LOCK_KEY: i64 = 0x6e65_7374_6564_7472; // "nestedtr"

/// Column type names accepted for caller data columns.
fn check_type(sql_type: &str) -> Result<()> {
    let valid = !sql_type.is_empty()
        && sql_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ','));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("`{sql_type}` is not a column type")))
    }
}

fn schema_sql(config: &TreeConfig, data_columns: &[(&str, &str)]) -> Result<String> {
    config.validate()?;
    let f = &config.fields;
    let mut columns = vec![format!("{} BIGSERIAL PRIMARY KEY", f.id)];
    for (role, column) in f.mapped() {
        if role != Role::Id {
            columns.push(format!("{column} BIGINT"));
        }
    }
    for (column, sql_type) in data_columns {
        check_identifier(column)?;
        check_type(sql_type)?;
        columns.push(format!("{column} {sql_type}"));
    }
    let table = &config.table;
    let mut sql = format!("CREATE TABLE IF NOT EXISTS {table} ({});\n", columns.join(", "));
    if let (Some(lft), Some(rgt)) = (f.column(Role::Left), f.column(Role::Right)) {
        sql.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_bounds ON {table} ({lft}, {rgt});\n"
        ));
    }
    if let Some(pid) = f.column(Role::Parent) {
        sql.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_parent ON {table} ({pid});\n"
        ));
    }
    Ok(sql)
}

/// Creates the tree table for `config`: `BIGSERIAL` ids, `BIGINT` structural
/// columns and `data_columns` as `(name, type)` pairs.
pub fn ensure_schema(
    client: &mut Client,
    config: &TreeConfig,
    data_columns: &[(&str, &str)],
) -> Result<()> {
    let sql = schema_sql(config, data_columns)?;
    // Concurrent `CREATE TABLE IF NOT EXISTS` can still collide in the catalog.
    client
        .query_one("SELECT pg_advisory_lock($1)", &[&SCHEMA_LOCK_KEY])
        .map_err(|e| Error::Storage(format!("{e:?}")))?;

    let res = client
        .batch_execute(&sql)
        .map_err(|e| Error::Storage(format!("{e:?}")));

    // Locks are also released when the connection is dropped.
    let _ = client.query_one("SELECT pg_advisory_unlock($1)", &[&SCHEMA_LOCK_KEY]);

    res
}

pub fn drop_table(client: &mut Client, config: &TreeConfig) -> Result<()> {
    check_identifier(&config.table)?;
    client
        .batch_execute(&format!("DROP TABLE IF EXISTS {}", config.table))
        .map_err(|e| Error::Storage(format!("{e:?}")))
}
