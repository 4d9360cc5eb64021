#![forbid(unsafe_code)]
//! SQLite storage for nestedtree tables.
//!
//! [`SqliteStore`] implements [`nestedtree_core::Store`] over a native
//! `rusqlite` connection, so both the diff-sync [`Tree`](nestedtree_core::Tree)
//! and the direct [`Mutator`](nestedtree_core::Mutator) can run against it.

mod store;

pub use store::SqliteStore;
