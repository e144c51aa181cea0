//! Lexical environment for variable bindings

use std::fmt;

use im_rc::OrdMap;

use super::heap::Address;

/// Persistent mapping from identifier to heap address.
///
/// Closures capture an `Env` by value; clones share structure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Env {
    bindings: OrdMap<String, Address>,
}

impl Env {
    pub fn new() -> Self {
        Env {
            bindings: OrdMap::new(),
        }
    }

    /// Look up a variable by name
    pub fn get(&self, name: &str) -> Option<Address> {
        self.bindings.get(name).copied()
    }

    pub fn has(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Bind `name`, shadowing any previous binding
    pub fn set(&self, name: impl Into<String>, addr: Address) -> Env {
        Env {
            bindings: self.bindings.update(name.into(), addr),
        }
    }

    pub fn remove(&self, name: &str) -> Env {
        Env {
            bindings: self.bindings.without(name),
        }
    }

    pub fn add_offset(&self, offset: i64) -> Env {
        Env {
            bindings: self
                .bindings
                .iter()
                .map(|(name, addr)| (name.clone(), addr.add_offset(offset)))
                .collect(),
        }
    }

    /// Bindings of `other` take precedence
    pub fn merge(&self, other: &Env) -> Env {
        Env {
            bindings: other.bindings.clone().union(self.bindings.clone()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Address)> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, addr)) in self.bindings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} => {}", name, addr.0)?;
        }
        write!(f, "}}")
    }
}
