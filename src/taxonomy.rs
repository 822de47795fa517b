//! Declared "is-a" relationships between error kinds.
//!
//! Error kinds are flat string tags; hierarchy has to be declared. The
//! taxonomy is a child→parent table consulted by error callbacks when they
//! decide whether they apply to a raised error.

use std::collections::BTreeMap;

use crate::error::ErrorKind;

/// A child→parent table over [`ErrorKind`]s.
///
/// Each kind has at most one parent; chains of any depth are allowed.
/// Undeclared kinds are roots.
#[derive(Debug, Clone, Default)]
pub struct ErrorTaxonomy {
    parents: BTreeMap<ErrorKind, ErrorKind>,
}

impl ErrorTaxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `child` as a subtype of `parent`. Re-declaring a child
    /// replaces its parent edge.
    pub fn derive(&mut self, child: impl Into<ErrorKind>, parent: impl Into<ErrorKind>) {
        self.parents.insert(child.into(), parent.into());
    }

    /// The self-inclusive ancestor chain of `kind`, nearest first.
    ///
    /// Walks until a root is reached; a malformed cyclic declaration
    /// terminates instead of looping.
    pub fn ancestors<'a>(&'a self, kind: &'a ErrorKind) -> Vec<&'a ErrorKind> {
        let mut chain = vec![kind];
        let mut cursor = kind;

        while let Some(parent) = self.parents.get(cursor) {
            if chain.contains(&parent) {
                break;
            }
            chain.push(parent);
            cursor = parent;
        }

        chain
    }

    /// Whether `kind` is `ancestor` or derives from it.
    pub fn is_a(&self, kind: &ErrorKind, ancestor: &ErrorKind) -> bool {
        self.ancestors(kind).contains(&ancestor)
    }
}
