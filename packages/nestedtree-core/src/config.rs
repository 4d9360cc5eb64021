//! Table and column configuration.
//!
//! # Example
//!
//! ```
//! use nestedtree_core::{FieldMap, LoadMode, TreeConfig};
//!
//! // Default column names: id, lft, rgt, lvl, pid, pos
//! let config = TreeConfig::new("struct");
//! assert_eq!(config.load_mode().unwrap(), LoadMode::Adjacency);
//!
//! // Nested-set only table
//! let config = TreeConfig {
//!     table: "menu".into(),
//!     fields: FieldMap {
//!         parent: None,
//!         position: None,
//!         ..FieldMap::default()
//!     },
//! };
//! assert_eq!(config.load_mode().unwrap(), LoadMode::NestedSet);
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Structural roles a column can play.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Id,
    Left,
    Right,
    Level,
    Parent,
    Position,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Id,
        Role::Left,
        Role::Right,
        Role::Level,
        Role::Parent,
        Role::Position,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Role::Id => "id",
            Role::Left => "left",
            Role::Right => "right",
            Role::Level => "level",
            Role::Parent => "parent",
            Role::Position => "position",
        }
    }
}

/// Column names for the structural roles.
///
/// Only `id` is mandatory. Which of the others must be present depends on the
/// operation: loading needs either `parent` or `left`/`right`, the mutator needs
/// all of them.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FieldMap {
    pub id: String,
    pub left: Option<String>,
    pub right: Option<String>,
    pub level: Option<String>,
    pub parent: Option<String>,
    pub position: Option<String>,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            id: "id".into(),
            left: Some("lft".into()),
            right: Some("rgt".into()),
            level: Some("lvl".into()),
            parent: Some("pid".into()),
            position: Some("pos".into()),
        }
    }
}

impl FieldMap {
    /// Column mapped to `role`, if any.
    pub fn column(&self, role: Role) -> Option<&str> {
        match role {
            Role::Id => Some(&self.id),
            Role::Left => self.left.as_deref(),
            Role::Right => self.right.as_deref(),
            Role::Level => self.level.as_deref(),
            Role::Parent => self.parent.as_deref(),
            Role::Position => self.position.as_deref(),
        }
    }

    pub fn require(&self, role: Role) -> Result<&str> {
        self.column(role).ok_or_else(|| {
            Error::InvalidConfig(format!("no column is mapped to the `{}` role", role.name()))
        })
    }

    /// Whether `column` is one of the mapped structural columns.
    pub fn is_structural(&self, column: &str) -> bool {
        Role::ALL.iter().any(|role| self.column(*role) == Some(column))
    }

    /// All mapped `(role, column)` pairs.
    pub fn mapped(&self) -> impl Iterator<Item = (Role, &str)> + '_ {
        Role::ALL
            .into_iter()
            .filter_map(move |role| self.column(role).map(|column| (role, column)))
    }
}

/// How a full table scan is turned back into a tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadMode {
    Adjacency,
    NestedSet,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TreeConfig {
    pub table: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub fields: FieldMap,
}

impl TreeConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: FieldMap::default(),
        }
    }

    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every name that ends up inside SQL text is a plain identifier.
    pub fn validate(&self) -> Result<()> {
        check_identifier(&self.table)?;
        for (_, column) in self.fields.mapped() {
            check_identifier(column)?;
        }
        let mut seen: Vec<&str> = Vec::new();
        for (role, column) in self.fields.mapped() {
            if seen.contains(&column) {
                return Err(Error::InvalidConfig(format!(
                    "column `{column}` is mapped to more than one role (again as `{}`)",
                    role.name()
                )));
            }
            seen.push(column);
        }
        Ok(())
    }

    pub fn load_mode(&self) -> Result<LoadMode> {
        if self.fields.parent.is_some() {
            Ok(LoadMode::Adjacency)
        } else if self.fields.left.is_some() && self.fields.right.is_some() {
            Ok(LoadMode::NestedSet)
        } else {
            Err(Error::InvalidConfig(
                "either `parent` or both `left` and `right` must be mapped".into(),
            ))
        }
    }
}

/// Fails with [`Error::InvalidConfig`] unless `name` is `[A-Za-z_][A-Za-z0-9_]*`.
pub fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("`{name}` is not a valid SQL identifier")))
    }
}
