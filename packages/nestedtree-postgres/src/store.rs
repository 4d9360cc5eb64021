use std::collections::HashMap;

use postgres::types::{ToSql, Type};
use postgres::{Client, NoTls, Row, Statement};
use tracing::trace;

use nestedtree_core::sql::{check_identifier, insert_statement, numbered_placeholders};
use nestedtree_core::{Error, Record, Result, RowId, Store, Value};

fn storage_debug<E: std::fmt::Debug>(e: E) -> Error {
    Error::Storage(format!("{e:?}"))
}

type Param = Box<dyn ToSql + Sync>;

fn mismatch(value: &Value, ty: &Type) -> Error {
    Error::Storage(format!("cannot bind {value:?} as {ty}"))
}

fn int_param(value: &Value, ty: &Type) -> Result<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        other => other.as_i64().map(Some).ok_or_else(|| mismatch(value, ty)),
    }
}

fn narrow<T: TryFrom<i64>>(value: &Value, ty: &Type) -> Result<Option<T>> {
    int_param(value, ty)?
        .map(|v| T::try_from(v).map_err(|_| mismatch(value, ty)))
        .transpose()
}

fn real_param(value: &Value, ty: &Type) -> Result<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        Value::Real(v) => Ok(Some(*v)),
        Value::Integer(v) => Ok(Some(*v as f64)),
        _ => Err(mismatch(value, ty)),
    }
}

/// Boxes `value` as the Rust type the server expects for `ty`.
fn bind(value: &Value, ty: &Type) -> Result<Param> {
    let param: Param = if *ty == Type::INT8 {
        Box::new(int_param(value, ty)?)
    } else if *ty == Type::INT4 {
        Box::new(narrow::<i32>(value, ty)?)
    } else if *ty == Type::INT2 {
        Box::new(narrow::<i16>(value, ty)?)
    } else if *ty == Type::FLOAT8 {
        Box::new(real_param(value, ty)?)
    } else if *ty == Type::FLOAT4 {
        Box::new(real_param(value, ty)?.map(|v| v as f32))
    } else if *ty == Type::BOOL {
        Box::new(int_param(value, ty)?.map(|v| v != 0))
    } else if *ty == Type::BYTEA {
        match value {
            Value::Null => Box::new(None::<Vec<u8>>),
            Value::Blob(v) => Box::new(Some(v.clone())),
            _ => return Err(mismatch(value, ty)),
        }
    } else if [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME, Type::UNKNOWN].contains(ty) {
        match value {
            Value::Null => Box::new(None::<String>),
            Value::Text(v) => Box::new(Some(v.clone())),
            Value::Integer(v) => Box::new(Some(v.to_string())),
            Value::Real(v) => Box::new(Some(v.to_string())),
            Value::Blob(_) => return Err(mismatch(value, ty)),
        }
    } else {
        return Err(Error::Storage(format!("unsupported parameter type {ty}")));
    };
    Ok(param)
}

fn column_value(row: &Row, index: usize) -> Result<Value> {
    let ty = row.columns()[index].type_();
    let value: Value = if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index).map_err(storage_debug)?.into()
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index).map_err(storage_debug)?.into()
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index)
            .map_err(storage_debug)?
            .map(i64::from)
            .into()
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(index).map_err(storage_debug)?.into()
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(index)
            .map_err(storage_debug)?
            .map(f64::from)
            .into()
    } else if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(index)
            .map_err(storage_debug)?
            .map(i64::from)
            .into()
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(index).map_err(storage_debug)?.into()
    } else if [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME].contains(ty) {
        row.try_get::<_, Option<String>>(index).map_err(storage_debug)?.into()
    } else {
        return Err(Error::Storage(format!(
            "unsupported column type {ty} for `{}`",
            row.columns()[index].name()
        )));
    };
    Ok(value)
}

fn record(row: &Row) -> Result<Record> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, column)| Ok((column.name().to_owned(), column_value(row, i)?)))
        .collect()
}

/// PostgreSQL-backed [`Store`] over one synchronous client.
///
/// Statements are prepared once per SQL text and reused. `?` placeholders are
/// numbered in order; a `?` inside a quoted literal is not a placeholder.
pub struct PostgresStore {
    client: Client,
    stmts: HashMap<String, Statement>,
}

impl PostgresStore {
    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::connect(url, NoTls).map_err(storage_debug)?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            stmts: HashMap::new(),
        }
    }

    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }

    fn stmt(&mut self, sql: &str) -> Result<Statement> {
        if let Some(stmt) = self.stmts.get(sql) {
            return Ok(stmt.clone());
        }
        let stmt = self.client.prepare(sql).map_err(storage_debug)?;
        self.stmts.insert(sql.to_owned(), stmt.clone());
        Ok(stmt)
    }

    fn prepare(&mut self, sql: &str, params: &[Value]) -> Result<(Statement, Vec<Param>)> {
        let stmt = self.stmt(&numbered_placeholders(sql))?;
        if stmt.params().len() != params.len() {
            return Err(Error::Storage(format!(
                "statement expects {} parameters, got {}",
                stmt.params().len(),
                params.len()
            )));
        }
        let bound = params
            .iter()
            .zip(stmt.params())
            .map(|(value, ty)| bind(value, ty))
            .collect::<Result<Vec<_>>>()?;
        Ok((stmt, bound))
    }
}

fn refs(params: &[Param]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p.as_ref()).collect()
}

impl Store for PostgresStore {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        trace!(sql, params = params.len(), "execute");
        let (stmt, bound) = self.prepare(sql, params)?;
        self.client.execute(&stmt, &refs(&bound)).map_err(storage_debug)
    }

    fn all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        trace!(sql, params = params.len(), "query");
        let (stmt, bound) = self.prepare(sql, params)?;
        let rows = self.client.query(&stmt, &refs(&bound)).map_err(storage_debug)?;
        rows.iter().map(record).collect()
    }

    fn begin(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN").map_err(storage_debug)
    }

    fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").map_err(storage_debug)
    }

    fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").map_err(storage_debug)
    }

    fn insert(&mut self, table: &str, id_column: &str, fields: &Record) -> Result<RowId> {
        check_identifier(id_column)?;
        let (sql, params) = insert_statement(table, fields)?;
        let sql = format!("{sql} RETURNING {id_column}");
        let (stmt, bound) = self.prepare(&sql, &params)?;
        let row = self.client.query_one(&stmt, &refs(&bound)).map_err(storage_debug)?;
        column_value(&row, 0)?
            .as_i64()
            .ok_or_else(|| Error::Storage(format!("`{id_column}` was not returned as an integer")))
    }
}
