//! Deterministic hash-based identity for classes and methods.
//!
//! [`SymbolHash`] is a 64-bit hash computed from names, so a generated call
//! site can compute the key of the binding it needs without a registration
//! order dependency, and every table in the bridge is a single map lookup.
//!
//! # Examples
//!
//! ```
//! use extbridge_core::SymbolHash;
//!
//! let node = SymbolHash::from_class("Node");
//! assert_eq!(node, SymbolHash::from_class("Node"));
//!
//! let get_name = SymbolHash::from_method(node, "get_name");
//! assert_ne!(get_name, SymbolHash::from_method(node, "set_name"));
//! ```

use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Domain-specific mixing constants.
///
/// They keep a class and a method with the same name from colliding.
pub mod hash_constants {
    /// Domain marker for class hashes
    pub const CLASS: u64 = 0x2fac10b63a6cc57c;

    /// Domain marker for method hashes
    pub const METHOD: u64 = 0x7d3c8b4a92e15f6d;

    /// Domain marker for virtual method hashes
    pub const VIRTUAL: u64 = 0x3e9f5d2a8c7b1403;

    /// Separator between owner and member
    pub const SEP: u64 = 0x4bc94d6bd06053ad;
}

/// A deterministic 64-bit hash identifying a class, method or virtual.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SymbolHash(pub u64);

impl SymbolHash {
    /// Empty/invalid hash constant.
    pub const EMPTY: SymbolHash = SymbolHash(0);

    /// Hash of a class name.
    #[inline]
    pub fn from_class(name: &str) -> Self {
        SymbolHash(hash_constants::CLASS ^ xxh64(name.as_bytes(), 0))
    }

    /// Hash of a bound method on `owner`.
    #[inline]
    pub fn from_method(owner: SymbolHash, name: &str) -> Self {
        let hash = hash_constants::METHOD ^ xxh64(name.as_bytes(), 0);
        SymbolHash(owner.0.wrapping_mul(hash_constants::SEP).wrapping_add(hash))
    }

    /// Hash of a virtual method slot on `owner`.
    #[inline]
    pub fn from_virtual(owner: SymbolHash, name: &str) -> Self {
        let hash = hash_constants::VIRTUAL ^ xxh64(name.as_bytes(), 0);
        SymbolHash(owner.0.wrapping_mul(hash_constants::SEP).wrapping_add(hash))
    }

    /// Check if this is the empty hash.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for SymbolHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolHash({:#018x})", self.0)
    }
}

impl fmt::Display for SymbolHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(SymbolHash::from_class("Label"), SymbolHash::from_class("Label"));
    }

    #[test]
    fn domains_do_not_collide() {
        let owner = SymbolHash::from_class("MainLoop");
        assert_ne!(
            SymbolHash::from_method(owner, "_process"),
            SymbolHash::from_virtual(owner, "_process")
        );
        assert_ne!(SymbolHash::from_class("_process"), SymbolHash::from_method(owner, "_process"));
    }

    #[test]
    fn owner_matters() {
        let a = SymbolHash::from_method(SymbolHash::from_class("Node"), "get_name");
        let b = SymbolHash::from_method(SymbolHash::from_class("Label"), "get_name");
        assert_ne!(a, b);
    }

    #[test]
    fn empty() {
        assert!(SymbolHash::EMPTY.is_empty());
        assert!(!SymbolHash::from_class("Object").is_empty());
    }
}
