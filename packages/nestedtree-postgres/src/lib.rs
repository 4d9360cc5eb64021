#![forbid(unsafe_code)]
//! PostgreSQL storage for nestedtree tables.
//!
//! Tree semantics stay in `nestedtree-core`; this crate only translates
//! statements to the server's dialect (`$n` placeholders, typed parameters,
//! `RETURNING` ids) so the same engines run on vanilla PostgreSQL.

mod schema;
mod store;

pub use schema::{drop_table, ensure_schema};
pub use store::PostgresStore;
