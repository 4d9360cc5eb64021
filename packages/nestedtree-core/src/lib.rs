#![forbid(unsafe_code)]
//! Core of a tree stored as one relational table in both adjacency-list and
//! nested-set form.
//!
//! Two persistence strategies share the same invariants:
//! - [`Tree`] loads the table into an in-memory [`Forest`], lets callers
//!   mutate it freely and writes back only the rows that changed ([`sync`]).
//! - [`Mutator`] edits the stored intervals directly, one structural change per
//!   call, without materializing the tree.
//!
//! This crate stays independent of concrete databases; adapters implement
//! [`Store`].

pub mod codec;
pub mod config;
pub mod error;
pub mod forest;
pub mod ids;
pub mod mutator;
pub mod sql;
pub mod sync;
pub mod traits;
pub mod tree;
pub mod value;

pub use codec::{from_adjacency, from_nested_set, from_nested_set_at};
pub use config::{FieldMap, LoadMode, Role, TreeConfig};
pub use error::{Error, Result};
pub use forest::{ExportEntry, Forest, Node, Placement, Structure};
pub use ids::{NodeId, RowId};
pub use mutator::{Mutator, StoredNode};
pub use sync::{SyncPlan, SyncReport};
pub use traits::{transaction, Store};
pub use tree::{Scope, Tree};
pub use value::{Record, Value};
