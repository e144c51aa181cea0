//! Persistent address-based store

use std::fmt;

use im_rc::OrdMap;
use tracing::trace;

use super::Value;
use crate::common::CodeSource;

/// Identifier of a heap slot.
///
/// Non-negative addresses are allocations of the current analysis; negative
/// addresses belong to a pre-built library heap merged in at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub i64);

impl Address {
    pub fn index(self) -> i64 {
        self.0
    }

    /// Shift a live address by `offset`. Negative addresses are already in the
    /// library range and stay put.
    pub fn add_offset(self, offset: i64) -> Address {
        if self.0 >= 0 { Address(self.0 + offset) } else { self }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Loc({})", self.0)
    }
}

/// Immutable heap snapshot.
///
/// Every update returns a new snapshot sharing structure with the old one; older
/// snapshots stay valid.
#[derive(Debug, Clone, PartialEq)]
pub struct Heap {
    values: OrdMap<Address, Value>,
    sites: OrdMap<Address, CodeSource>,
    addr_max: i64,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            values: OrdMap::new(),
            sites: OrdMap::new(),
            addr_max: -1,
        }
    }

    /// Highest address handed out so far (`-1` for an empty heap)
    pub fn addr_max(&self) -> i64 {
        self.addr_max
    }

    /// Reserve a fresh address. Nothing is bound there until [`Heap::set_val`].
    pub fn malloc(&self, source: Option<&CodeSource>) -> (Address, Heap) {
        let addr = Address(self.addr_max + 1);
        let mut heap = self.clone();
        heap.addr_max = addr.0;
        if let Some(source) = source {
            heap.sites.insert(addr, source.clone());
        }
        trace!(addr = addr.0, "malloc");
        (addr, heap)
    }

    /// Reserve a fresh address and bind `value` to it
    pub fn alloc(&self, value: Value, source: Option<&CodeSource>) -> (Address, Heap) {
        let (addr, heap) = self.malloc(source);
        (addr, heap.set_val(addr, value))
    }

    pub fn set_val(&self, addr: Address, value: Value) -> Heap {
        Heap {
            values: self.values.update(addr, value),
            sites: self.sites.clone(),
            addr_max: self.addr_max,
        }
    }

    /// Value stored at `addr`.
    ///
    /// Reading an address that was never bound is a bug in the caller; release
    /// builds answer `Undef` instead of panicking.
    pub fn get_val(&self, addr: Address) -> Value {
        match self.values.get(&addr) {
            Some(value) => value.clone(),
            None => {
                debug_assert!(false, "dereferenced unbound address {}", addr);
                Value::Undef(None)
            }
        }
    }

    pub fn try_get(&self, addr: Address) -> Option<&Value> {
        self.values.get(&addr)
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.values.contains_key(&addr)
    }

    /// Allocation site recorded by [`Heap::malloc`]
    pub fn site(&self, addr: Address) -> Option<&CodeSource> {
        self.sites.get(&addr)
    }

    /// Drop a slot that nothing reachable refers to any more
    pub fn free(&self, addr: Address) -> Heap {
        Heap {
            values: self.values.without(&addr),
            sites: self.sites.without(&addr),
            addr_max: self.addr_max,
        }
    }

    /// Shift every address, both keys and references inside stored values
    pub fn add_offset(&self, offset: i64) -> Heap {
        let values = self
            .values
            .iter()
            .map(|(addr, value)| (addr.add_offset(offset), value.add_offset(offset)))
            .collect();
        let sites = self
            .sites
            .iter()
            .map(|(addr, site)| (addr.add_offset(offset), site.clone()))
            .collect();
        Heap {
            values,
            sites,
            addr_max: self.addr_max + offset,
        }
    }

    /// Union with a heap whose addresses do not overlap with this one
    pub fn merge(&self, other: &Heap) -> Heap {
        Heap {
            values: self.values.clone().union(other.values.clone()),
            sites: self.sites.clone().union(other.sites.clone()),
            addr_max: self.addr_max.max(other.addr_max),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Value)> {
        self.values.iter()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        for (addr, value) in self.values.iter() {
            writeln!(f, "  {} => {},", addr.0, value)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::value::IntValue;

    #[test]
    fn test_malloc_is_fresh_and_persistent() {
        let h0 = Heap::new();
        let (a, h1) = h0.malloc(None);
        let h1 = h1.set_val(a, Value::Int(IntValue::Lit(7)));
        let (b, h2) = h1.malloc(None);

        assert_eq!(a, Address(0));
        assert_eq!(b, Address(1));
        assert!(h0.is_empty());
        assert_eq!(h2.get_val(a), Value::Int(IntValue::Lit(7)));
        assert!(!h2.contains(b));
    }

    #[test]
    fn test_shift_and_merge() {
        let (a, lib) = Heap::new().alloc(Value::Bool(true), None);
        let lib = lib.add_offset(-(lib.addr_max() + 1));
        assert_eq!(lib.addr_max(), -1);
        assert_eq!(lib.get_val(Address(a.0 - 1)), Value::Bool(true));

        let (b, user) = Heap::new().alloc(Value::Bool(false), None);
        let merged = user.merge(&lib);
        assert_eq!(b, Address(0));
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get_val(Address(-1)), Value::Bool(true));
    }

    #[test]
    fn test_negative_addresses_are_not_shifted_twice() {
        assert_eq!(Address(-3).add_offset(-10), Address(-3));
        assert_eq!(Address(2).add_offset(-10), Address(-8));
    }

    #[test]
    fn test_free_and_site() {
        let src = CodeSource::range(1, crate::common::Span::new(0, 4));
        let (a, heap) = Heap::new().alloc(Value::None(None), Some(&src));
        assert_eq!(heap.site(a), Some(&src));
        let heap = heap.free(a);
        assert!(!heap.contains(a));
        assert!(heap.site(a).is_none());
    }
}
