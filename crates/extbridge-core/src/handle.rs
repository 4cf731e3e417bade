//! Word-sized handles to native values.
//!
//! A [`RawHandle`] packs three things into a single `u64`:
//!
//! ```text
//!  63      58 57  56 55                                        0
//! +----------+------+-------------------------------------------+
//! |   kind   | own  |              payload (address / id)       |
//! +----------+------+-------------------------------------------+
//! ```
//!
//! Encoding and decoding are pure shifts and masks. The payload is what the
//! engine sees in a call frame slot; the kind and ownership bits never leave
//! the host side.
//!
//! [`Handle<K>`] adds a compile-time kind on top of a `RawHandle`. Converting
//! a raw handle into a typed one checks the runtime tag and stops the call path
//! on a mismatch rather than reinterpreting the bits.

use std::fmt;
use std::marker::PhantomData;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{ContractError, contract_violation};

const PAYLOAD_BITS: u32 = 56;
const PAYLOAD_MASK: u64 = (1 << PAYLOAD_BITS) - 1;
const OWNERSHIP_SHIFT: u32 = 56;
const KIND_SHIFT: u32 = 58;

/// The semantic type of a native value behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum HandleKind {
    /// An engine object instance.
    Object = 1,
    /// A native string.
    String = 2,
    /// An interned native string name.
    StringName = 3,
    /// A packed array of 64-bit integers.
    PackedInt64Array = 4,
    /// A resource ID owned by an engine server.
    Rid = 5,
    /// A dynamically typed engine value.
    Variant = 6,
}

impl HandleKind {
    /// Ownership a handle of this kind carries when it comes back as a return value.
    ///
    /// Heap payloads are handed to the caller. Objects and resource IDs stay
    /// under the engine's control.
    pub const fn returned_ownership(self) -> Ownership {
        match self {
            HandleKind::Object | HandleKind::Rid => Ownership::Borrowed,
            HandleKind::String
            | HandleKind::StringName
            | HandleKind::PackedInt64Array
            | HandleKind::Variant => Ownership::OwnedByCaller,
        }
    }
}

/// Who is responsible for releasing the native value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Ownership {
    /// Not owned by the host; never released by the bridge.
    Borrowed = 0,
    /// Owned by the scope that registered it; released exactly once at scope end.
    OwnedByCaller = 1,
    /// Owned by the function being called.
    OwnedByCallee = 2,
    /// Moved to another owner; must not be released by its former scope.
    Transferred = 3,
}

/// An untyped, word-sized handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawHandle(u64);

impl RawHandle {
    /// Pack a payload, kind and ownership into a handle.
    ///
    /// Payload bits above bit 55 are discarded.
    #[inline]
    pub const fn encode(payload: u64, kind: HandleKind, ownership: Ownership) -> Self {
        RawHandle(
            (payload & PAYLOAD_MASK)
                | ((kind as u64) << KIND_SHIFT)
                | ((ownership as u64) << OWNERSHIP_SHIFT),
        )
    }

    /// Reconstruct a handle from its packed bits.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        RawHandle(bits)
    }

    /// The packed bits.
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// The address or ID the engine knows this value by.
    #[inline]
    pub const fn payload(self) -> u64 {
        self.0 & PAYLOAD_MASK
    }

    /// Whether the payload is the engine's "no value" sentinel.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.payload() == 0
    }

    /// The kind tag.
    ///
    /// A tag that names no kind means the bits did not come from `encode`.
    #[inline]
    pub fn kind(self) -> HandleKind {
        let tag = (self.0 >> KIND_SHIFT) as u8;
        HandleKind::try_from(tag)
            .unwrap_or_else(|_| contract_violation(ContractError::MalformedHandle { tag }))
    }

    /// The ownership state.
    #[inline]
    pub fn ownership(self) -> Ownership {
        match (self.0 >> OWNERSHIP_SHIFT) & 0b11 {
            0 => Ownership::Borrowed,
            1 => Ownership::OwnedByCaller,
            2 => Ownership::OwnedByCallee,
            _ => Ownership::Transferred,
        }
    }

    /// Split into payload and kind.
    #[inline]
    pub fn decode(self) -> (u64, HandleKind) {
        (self.payload(), self.kind())
    }

    /// Return the payload, asserting the kind.
    #[inline]
    #[track_caller]
    pub fn expect_kind(self, expected: HandleKind) -> u64 {
        let actual = self.kind();
        if actual != expected {
            contract_violation(ContractError::HandleKindMismatch { expected, actual });
        }
        self.payload()
    }

    /// The same handle with a different ownership state.
    #[inline]
    pub const fn with_ownership(self, ownership: Ownership) -> Self {
        RawHandle((self.0 & !(0b11 << OWNERSHIP_SHIFT)) | ((ownership as u64) << OWNERSHIP_SHIFT))
    }

    /// Kind and payload without ownership; two handles to the same native
    /// value share an identity regardless of their ownership state.
    #[inline]
    pub const fn identity(self) -> u64 {
        self.0 & !(0b11 << OWNERSHIP_SHIFT)
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = (self.0 >> KIND_SHIFT) as u8;
        match HandleKind::try_from(tag) {
            Ok(kind) => write!(
                f,
                "RawHandle({:?}, {:#x}, {:?})",
                kind,
                self.payload(),
                self.ownership()
            ),
            Err(_) => write!(f, "RawHandle(<tag {:#x}>, {:#x})", tag, self.payload()),
        }
    }
}

/// Compile-time marker for a handle kind.
pub trait NativeKind: 'static {
    /// Runtime tag for this kind.
    const KIND: HandleKind;
}

/// Marker types for [`Handle`].
pub mod kind {
    use super::{HandleKind, NativeKind};

    macro_rules! kinds {
        ($($name:ident),* $(,)?) => {
            $(
                #[doc = concat!("Marker for `HandleKind::", stringify!($name), "`.")]
                #[derive(Debug)]
                pub enum $name {}

                impl NativeKind for $name {
                    const KIND: HandleKind = HandleKind::$name;
                }
            )*
        };
    }

    kinds!(Object, String, StringName, PackedInt64Array, Rid, Variant);
}

/// A handle whose kind is known at compile time.
///
/// Handles are plain values; they are neither `Send` nor `Sync` because the
/// engine does not sanction moving native values between threads implicitly.
#[repr(transparent)]
pub struct Handle<K: NativeKind> {
    raw: RawHandle,
    _kind: PhantomData<*const K>,
}

impl<K: NativeKind> Handle<K> {
    /// Wrap a payload of kind `K`.
    #[inline]
    pub const fn encode(payload: u64, ownership: Ownership) -> Self {
        Handle {
            raw: RawHandle::encode(payload, K::KIND, ownership),
            _kind: PhantomData,
        }
    }

    /// The null handle of kind `K`.
    #[inline]
    pub const fn null() -> Self {
        Self::encode(0, Ownership::Borrowed)
    }

    /// Check an untyped handle's kind and wrap it.
    #[inline]
    #[track_caller]
    pub fn from_raw(raw: RawHandle) -> Self {
        raw.expect_kind(K::KIND);
        Handle {
            raw,
            _kind: PhantomData,
        }
    }

    /// The untyped handle.
    #[inline]
    pub const fn raw(self) -> RawHandle {
        self.raw
    }

    /// The engine-visible payload.
    #[inline]
    pub const fn payload(self) -> u64 {
        self.raw.payload()
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.raw.is_null()
    }

    #[inline]
    pub fn ownership(self) -> Ownership {
        self.raw.ownership()
    }

    /// The same handle with a different ownership state.
    #[inline]
    pub const fn with_ownership(self, ownership: Ownership) -> Self {
        Handle {
            raw: self.raw.with_ownership(ownership),
            _kind: PhantomData,
        }
    }
}

impl<K: NativeKind> Clone for Handle<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: NativeKind> Copy for Handle<K> {}

impl<K: NativeKind> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.raw.identity() == other.raw.identity()
    }
}

impl<K: NativeKind> Eq for Handle<K> {}

impl<K: NativeKind> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.raw, f)
    }
}

impl<K: NativeKind> From<Handle<K>> for RawHandle {
    fn from(handle: Handle<K>) -> Self {
        handle.raw
    }
}

/// A handle to an engine object.
pub type ObjectRef = Handle<kind::Object>;
/// A handle to a native string.
pub type StringHandle = Handle<kind::String>;
/// A handle to a native string name.
pub type StringNameHandle = Handle<kind::StringName>;
/// A handle to a native packed `i64` array.
pub type PackedInt64Handle = Handle<kind::PackedInt64Array>;
/// A resource ID.
pub type Rid = Handle<kind::Rid>;
/// A handle to a native variant.
pub type VariantHandle = Handle<kind::Variant>;
