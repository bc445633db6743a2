//! Set algebra over condition scopes.
//!
//! A dimension's effective scope is either a finite set of identifiers or
//! "everything except" a finite set. The `All` sentinel is `Cofinite(∅)`, so
//! no tenant inventory is needed to intersect, union or complement scopes.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "form", content = "identifiers", rename_all = "camelCase")]
pub enum Scope {
    /// Exactly these identifiers.
    Finite(BTreeSet<String>),
    /// Every identifier except these.
    Cofinite(BTreeSet<String>),
}

impl Scope {
    pub fn universal() -> Self {
        Scope::Cofinite(BTreeSet::new())
    }

    pub fn empty() -> Self {
        Scope::Finite(BTreeSet::new())
    }

    pub fn finite<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Scope::Finite(ids.into_iter().map(Into::into).collect())
    }

    pub fn all_except<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Scope::Cofinite(ids.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Scope::Finite(ids) if ids.is_empty())
    }

    pub fn is_universal(&self) -> bool {
        matches!(self, Scope::Cofinite(ids) if ids.is_empty())
    }

    pub fn contains(&self, id: &str) -> bool {
        match self {
            Scope::Finite(ids) => ids.contains(id),
            Scope::Cofinite(ids) => !ids.contains(id),
        }
    }

    pub fn complement(&self) -> Scope {
        match self {
            Scope::Finite(ids) => Scope::Cofinite(ids.clone()),
            Scope::Cofinite(ids) => Scope::Finite(ids.clone()),
        }
    }

    pub fn intersect(&self, other: &Scope) -> Scope {
        match (self, other) {
            (Scope::Finite(a), Scope::Finite(b)) => Scope::Finite(a.intersection(b).cloned().collect()),
            (Scope::Finite(a), Scope::Cofinite(e)) | (Scope::Cofinite(e), Scope::Finite(a)) => {
                Scope::Finite(a.difference(e).cloned().collect())
            }
            (Scope::Cofinite(a), Scope::Cofinite(b)) => Scope::Cofinite(a.union(b).cloned().collect()),
        }
    }

    pub fn union(&self, other: &Scope) -> Scope {
        match (self, other) {
            (Scope::Finite(a), Scope::Finite(b)) => Scope::Finite(a.union(b).cloned().collect()),
            (Scope::Finite(a), Scope::Cofinite(e)) | (Scope::Cofinite(e), Scope::Finite(a)) => {
                Scope::Cofinite(e.difference(a).cloned().collect())
            }
            (Scope::Cofinite(a), Scope::Cofinite(b)) => {
                Scope::Cofinite(a.intersection(b).cloned().collect())
            }
        }
    }

    pub fn difference(&self, other: &Scope) -> Scope {
        self.intersect(&other.complement())
    }

    pub fn is_subset(&self, other: &Scope) -> bool {
        match (self, other) {
            (Scope::Finite(a), Scope::Finite(b)) => a.is_subset(b),
            (Scope::Finite(a), Scope::Cofinite(e)) => a.is_disjoint(e),
            (Scope::Cofinite(_), Scope::Finite(_)) => false,
            (Scope::Cofinite(a), Scope::Cofinite(b)) => b.is_subset(a),
        }
    }

    /// Finite members, when the scope is enumerable.
    pub fn members(&self) -> Option<&BTreeSet<String>> {
        match self {
            Scope::Finite(ids) => Some(ids),
            Scope::Cofinite(_) => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |ids: &BTreeSet<String>| ids.iter().cloned().collect::<Vec<_>>().join(", ");
        match self {
            Scope::Finite(ids) if ids.is_empty() => write!(f, "none"),
            Scope::Finite(ids) => write!(f, "{{{}}}", join(ids)),
            Scope::Cofinite(ids) if ids.is_empty() => write!(f, "All"),
            Scope::Cofinite(ids) => write!(f, "All except {{{}}}", join(ids)),
        }
    }
}
