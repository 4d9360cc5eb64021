use crate::error::Result;
use crate::ids::RowId;
use crate::value::{Record, Value};

/// Relational store holding the tree table.
///
/// Statements use `?` placeholders; implementations translate them to their
/// own dialect. Implementations must give `begin`/`commit`/`rollback` atomic
/// multi-statement semantics.
pub trait Store {
    /// Executes a statement and returns the number of affected rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    fn all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Record>>;

    fn one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Record>> {
        Ok(self.all(sql, params)?.into_iter().next())
    }

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Inserts one row and returns the identifier the store assigned to it.
    fn insert(&mut self, table: &str, id_column: &str, fields: &Record) -> Result<RowId>;
}

impl<S: Store + ?Sized> Store for &mut S {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        (**self).query(sql, params)
    }

    fn all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        (**self).all(sql, params)
    }

    fn one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Record>> {
        (**self).one(sql, params)
    }

    fn begin(&mut self) -> Result<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }

    fn insert(&mut self, table: &str, id_column: &str, fields: &Record) -> Result<RowId> {
        (**self).insert(table, id_column, fields)
    }
}

/// Runs `f` inside one transaction.
///
/// Commits on success. On failure the transaction is rolled back and the
/// original error is returned; a failing rollback does not mask it.
pub fn transaction<S, T, F>(store: &mut S, f: F) -> Result<T>
where
    S: Store + ?Sized,
    F: FnOnce(&mut S) -> Result<T>,
{
    store.begin()?;
    match f(store) {
        Ok(v) => match store.commit() {
            Ok(()) => Ok(v),
            Err(e) => {
                tracing::warn!(error = %e, "commit failed, rolling back");
                let _ = store.rollback();
                Err(e)
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "rolling back transaction");
            let _ = store.rollback();
            Err(e)
        }
    }
}
