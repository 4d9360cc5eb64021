use std::path::Path;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tracing::trace;

use nestedtree_core::error::Error;
use nestedtree_core::sql::{check_identifier, insert_statement};
use nestedtree_core::{Record, Result, RowId, Role, Store, TreeConfig, Value};

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Real(v) => SqlValue::Real(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Blob(v) => SqlValue::Blob(v.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Blob(v.to_vec()),
    }
}

/// SQLite-backed [`Store`] over one `rusqlite` connection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Ok(Self { conn })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Creates the tree table for `config` if it does not exist yet.
    ///
    /// Every mapped structural column is an `INTEGER`; the id column is the
    /// rowid. `data_columns` are declared without a type so values keep the
    /// storage class they were written with.
    pub fn ensure_schema(&mut self, config: &TreeConfig, data_columns: &[&str]) -> Result<()> {
        config.validate()?;
        let f = &config.fields;
        let mut columns = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", f.id)];
        for (role, column) in f.mapped() {
            if role != Role::Id {
                columns.push(format!("{column} INTEGER"));
            }
        }
        for column in data_columns {
            check_identifier(column)?;
            columns.push((*column).to_owned());
        }
        let table = &config.table;
        let mut ddl = format!("CREATE TABLE IF NOT EXISTS {table} ({});", columns.join(", "));
        if let (Some(lft), Some(rgt)) = (f.column(Role::Left), f.column(Role::Right)) {
            ddl.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS {table}_bounds ON {table}({lft}, {rgt});"
            ));
        }
        if let Some(pid) = f.column(Role::Parent) {
            ddl.push_str(&format!("CREATE INDEX IF NOT EXISTS {table}_parent ON {table}({pid});"));
        }
        self.conn.execute_batch(&ddl).map_err(storage_err)
    }
}

impl Store for SqliteStore {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        trace!(sql, params = params.len(), "execute");
        let affected = self
            .conn
            .execute(sql, params_from_iter(params.iter().map(to_sql)))
            .map_err(storage_err)?;
        Ok(affected as u64)
    }

    fn all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        trace!(sql, params = params.len(), "query");
        let mut stmt = self.conn.prepare(sql).map_err(storage_err)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_sql)))
            .map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(storage_err)? {
            let mut record = Record::new();
            for (i, name) in names.iter().enumerate() {
                let value = row.get_ref(i).map_err(storage_err)?;
                record.insert(name.clone(), from_sql(value));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN").map_err(storage_err)
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT").map_err(storage_err)
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").map_err(storage_err)
    }

    fn insert(&mut self, table: &str, _id_column: &str, fields: &Record) -> Result<RowId> {
        let (sql, params) = insert_statement(table, fields)?;
        self.query(&sql, &params)?;
        Ok(self.conn.last_insert_rowid())
    }
}
