//! Conversion traits between host values and call frame slots.
//!
//! Two layers:
//!
//! - Slot level ([`SlotType`], [`IntoSlot`], [`FromSlot`]): a type with a fixed
//!   [`NativeType`] written to or read from exactly `layout().size` bytes. No
//!   engine calls happen at this level.
//! - Host level ([`ToNative`], [`ReturnValue`], [`FromArg`], [`IntoReturn`]):
//!   conversions that may create or read native heap values and therefore need
//!   a [`Scope`].
//!
//! ## Supported Types
//!
//! | Rust | NativeType |
//! |---|---|
//! | `bool` | `Bool` |
//! | `i8`..`i64`, `u8`..`u64` | `Int8`..`UInt64` |
//! | `f32`, `f64` | `Float32`, `Float64` |
//! | `Vector2`, `Vector3`, `Color`, `Transform2D` | inline math types |
//! | `Handle<K>` | the handle's kind |
//! | `&str`, `String` | `String` (outbound / inbound) |
//! | `&[i64]`, `Vec<i64>` | `PackedInt64Array` |
//! | `Option<ObjectRef>` | `Object`, `None` is the null sentinel |
//! | `Variant`, `&Variant` | `Variant` |

use crate::api::NativeApi;
use crate::handle::{Handle, HandleKind, NativeKind, ObjectRef, Ownership, RawHandle};
use crate::math::{Color, Transform2D, Vector2, Vector3};
use crate::runtime::Scope;
use crate::signature::{DefaultValue, NativeType};
use crate::variant::Variant;

// ============================================================================
// Slot level
// ============================================================================

/// A type with a statically known native slot type.
pub trait SlotType {
    const NATIVE: NativeType;
}

/// Write a value into a slot of `Self::NATIVE.layout().size` bytes.
pub trait IntoSlot: SlotType {
    fn write_slot(&self, slot: &mut [u8]);
}

/// Read a value from a slot of `Self::NATIVE.layout().size` bytes.
pub trait FromSlot: SlotType + Sized {
    /// `ownership` is applied to handle types and ignored by everything else.
    fn read_slot(slot: &[u8], ownership: Ownership) -> Self;
}

#[inline]
fn bytes<const N: usize>(slot: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&slot[..N]);
    out
}

#[inline]
fn put_f32s(slot: &mut [u8], values: &[f32]) {
    for (chunk, v) in slot.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&v.to_ne_bytes());
    }
}

#[inline]
fn get_f32s<const N: usize>(slot: &[u8]) -> [f32; N] {
    let mut out = [0f32; N];
    for (v, chunk) in out.iter_mut().zip(slot.chunks_exact(4)) {
        *v = f32::from_ne_bytes(bytes(chunk));
    }
    out
}

macro_rules! impl_scalar_slot {
    ($($ty:ty => $native:ident),* $(,)?) => {
        $(
            impl SlotType for $ty {
                const NATIVE: NativeType = NativeType::$native;
            }

            impl IntoSlot for $ty {
                #[inline]
                fn write_slot(&self, slot: &mut [u8]) {
                    slot.copy_from_slice(&self.to_ne_bytes());
                }
            }

            impl FromSlot for $ty {
                #[inline]
                fn read_slot(slot: &[u8], _: Ownership) -> Self {
                    <$ty>::from_ne_bytes(bytes(slot))
                }
            }
        )*
    };
}

impl_scalar_slot!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
);

impl SlotType for bool {
    const NATIVE: NativeType = NativeType::Bool;
}

impl IntoSlot for bool {
    #[inline]
    fn write_slot(&self, slot: &mut [u8]) {
        slot[0] = u8::from(*self);
    }
}

impl FromSlot for bool {
    #[inline]
    fn read_slot(slot: &[u8], _: Ownership) -> Self {
        slot[0] != 0
    }
}

macro_rules! impl_math_slot {
    ($ty:ident, $n:literal, |$v:ident| $to:expr, |$a:ident| $from:expr) => {
        impl SlotType for $ty {
            const NATIVE: NativeType = NativeType::$ty;
        }

        impl IntoSlot for $ty {
            #[inline]
            fn write_slot(&self, slot: &mut [u8]) {
                let $v = self;
                put_f32s(slot, &$to);
            }
        }

        impl FromSlot for $ty {
            #[inline]
            fn read_slot(slot: &[u8], _: Ownership) -> Self {
                let $a: [f32; $n] = get_f32s(slot);
                $from
            }
        }
    };
}

impl_math_slot!(Vector2, 2, |v| [v.x, v.y], |a| Vector2::new(a[0], a[1]));
impl_math_slot!(Vector3, 3, |v| [v.x, v.y, v.z], |a| Vector3::new(a[0], a[1], a[2]));
impl_math_slot!(Color, 4, |v| [v.r, v.g, v.b, v.a], |a| Color::rgba(a[0], a[1], a[2], a[3]));
impl_math_slot!(
    Transform2D,
    6,
    |v| [v.x.x, v.x.y, v.y.x, v.y.y, v.origin.x, v.origin.y],
    |a| Transform2D {
        x: Vector2::new(a[0], a[1]),
        y: Vector2::new(a[2], a[3]),
        origin: Vector2::new(a[4], a[5]),
    }
);

impl<K: NativeKind> SlotType for Handle<K> {
    const NATIVE: NativeType = NativeType::of_handle(K::KIND);
}

impl<K: NativeKind> IntoSlot for Handle<K> {
    #[inline]
    fn write_slot(&self, slot: &mut [u8]) {
        slot.copy_from_slice(&self.payload().to_ne_bytes());
    }
}

impl<K: NativeKind> FromSlot for Handle<K> {
    #[inline]
    fn read_slot(slot: &[u8], ownership: Ownership) -> Self {
        Handle::encode(u64::from_ne_bytes(bytes(slot)), ownership)
    }
}

// ============================================================================
// Outbound arguments
// ============================================================================

/// A host value that can be passed as an argument to a bound method.
pub trait ToNative {
    type Slot: IntoSlot;

    /// Convert, registering any native value created along the way in `scope`.
    fn to_native(self, scope: &Scope<'_>) -> Self::Slot;
}

macro_rules! impl_to_native_identity {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToNative for $ty {
                type Slot = $ty;

                #[inline]
                fn to_native(self, _: &Scope<'_>) -> $ty {
                    self
                }
            }
        )*
    };
}

impl_to_native_identity!(
    bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, Vector2, Vector3, Color, Transform2D,
);

impl<K: NativeKind> ToNative for Handle<K> {
    type Slot = Handle<K>;

    #[inline]
    fn to_native(self, _: &Scope<'_>) -> Handle<K> {
        self
    }
}

impl ToNative for &str {
    type Slot = Handle<crate::handle::kind::String>;

    fn to_native(self, scope: &Scope<'_>) -> Self::Slot {
        scope.new_string(self)
    }
}

impl ToNative for &String {
    type Slot = Handle<crate::handle::kind::String>;

    fn to_native(self, scope: &Scope<'_>) -> Self::Slot {
        scope.new_string(self)
    }
}

impl ToNative for String {
    type Slot = Handle<crate::handle::kind::String>;

    fn to_native(self, scope: &Scope<'_>) -> Self::Slot {
        scope.new_string(&self)
    }
}

impl ToNative for &[i64] {
    type Slot = Handle<crate::handle::kind::PackedInt64Array>;

    fn to_native(self, scope: &Scope<'_>) -> Self::Slot {
        scope.new_packed_int64(self)
    }
}

impl ToNative for Vec<i64> {
    type Slot = Handle<crate::handle::kind::PackedInt64Array>;

    fn to_native(self, scope: &Scope<'_>) -> Self::Slot {
        scope.new_packed_int64(&self)
    }
}

impl ToNative for Option<ObjectRef> {
    type Slot = ObjectRef;

    #[inline]
    fn to_native(self, _: &Scope<'_>) -> ObjectRef {
        self.unwrap_or_else(ObjectRef::null)
    }
}

impl ToNative for &Variant {
    type Slot = crate::handle::VariantHandle;

    fn to_native(self, scope: &Scope<'_>) -> Self::Slot {
        scope.new_variant(self)
    }
}

impl ToNative for Variant {
    type Slot = crate::handle::VariantHandle;

    fn to_native(self, scope: &Scope<'_>) -> Self::Slot {
        scope.new_variant(&self)
    }
}

// ============================================================================
// Outbound returns
// ============================================================================

/// A type a bound method's return slot can be decoded into.
pub trait ReturnValue: Sized {
    /// `None` for void.
    const RET: Option<NativeType>;

    fn read_return(slot: &[u8], ownership: Ownership) -> Self;

    /// The handle the caller's scope must take ownership of, if any.
    fn owned_handle(&self) -> Option<RawHandle> {
        None
    }
}

impl ReturnValue for () {
    const RET: Option<NativeType> = None;

    fn read_return(_: &[u8], _: Ownership) -> Self {}
}

macro_rules! impl_return_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ReturnValue for $ty {
                const RET: Option<NativeType> = Some(<$ty as SlotType>::NATIVE);

                #[inline]
                fn read_return(slot: &[u8], ownership: Ownership) -> Self {
                    <$ty as FromSlot>::read_slot(slot, ownership)
                }
            }
        )*
    };
}

impl_return_value!(
    bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, Vector2, Vector3, Color, Transform2D,
);

impl<K: NativeKind> ReturnValue for Handle<K> {
    const RET: Option<NativeType> = Some(NativeType::of_handle(K::KIND));

    #[inline]
    fn read_return(slot: &[u8], ownership: Ownership) -> Self {
        Handle::read_slot(slot, ownership)
    }

    fn owned_handle(&self) -> Option<RawHandle> {
        (self.ownership() == Ownership::OwnedByCaller && !self.is_null()).then(|| self.raw())
    }
}

impl ReturnValue for Option<ObjectRef> {
    const RET: Option<NativeType> = Some(NativeType::Object);

    fn read_return(slot: &[u8], ownership: Ownership) -> Self {
        let obj = ObjectRef::read_slot(slot, ownership);
        (!obj.is_null()).then_some(obj)
    }
}

// ============================================================================
// Inbound arguments and returns (virtual calls)
// ============================================================================

/// A host type an inbound virtual-call argument can be decoded into.
///
/// Inbound arguments are borrowed from the engine.
pub trait FromArg: Sized {
    const NATIVE: NativeType;

    fn from_arg(slot: &[u8], scope: &Scope<'_>) -> Self;
}

macro_rules! impl_from_arg_slot {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromArg for $ty {
                const NATIVE: NativeType = <$ty as SlotType>::NATIVE;

                #[inline]
                fn from_arg(slot: &[u8], _: &Scope<'_>) -> Self {
                    <$ty as FromSlot>::read_slot(slot, Ownership::Borrowed)
                }
            }
        )*
    };
}

impl_from_arg_slot!(
    bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, Vector2, Vector3, Color, Transform2D,
);

impl<K: NativeKind> FromArg for Handle<K> {
    const NATIVE: NativeType = NativeType::of_handle(K::KIND);

    #[inline]
    fn from_arg(slot: &[u8], _: &Scope<'_>) -> Self {
        Handle::read_slot(slot, Ownership::Borrowed)
    }
}

impl FromArg for Option<ObjectRef> {
    const NATIVE: NativeType = NativeType::Object;

    fn from_arg(slot: &[u8], _: &Scope<'_>) -> Self {
        let obj = ObjectRef::read_slot(slot, Ownership::Borrowed);
        (!obj.is_null()).then_some(obj)
    }
}

impl FromArg for String {
    const NATIVE: NativeType = NativeType::String;

    fn from_arg(slot: &[u8], scope: &Scope<'_>) -> Self {
        let handle = crate::handle::StringHandle::read_slot(slot, Ownership::Borrowed);
        match scope.read_string(handle) {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(error = %err, "lossy conversion of inbound string");
                String::from_utf8_lossy(&scope.api().string_bytes(handle.payload())).into_owned()
            }
        }
    }
}

impl FromArg for Vec<i64> {
    const NATIVE: NativeType = NativeType::PackedInt64Array;

    fn from_arg(slot: &[u8], scope: &Scope<'_>) -> Self {
        let handle = crate::handle::PackedInt64Handle::read_slot(slot, Ownership::Borrowed);
        scope.read_packed_int64(handle)
    }
}

impl FromArg for Variant {
    const NATIVE: NativeType = NativeType::Variant;

    fn from_arg(slot: &[u8], scope: &Scope<'_>) -> Self {
        let handle = crate::handle::VariantHandle::read_slot(slot, Ownership::Borrowed);
        scope.read_variant(handle).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "inbound variant read as nil");
            Variant::Nil
        })
    }
}

/// A host value an override can return to the engine.
///
/// Anything written into the return slot now belongs to the engine.
pub trait IntoReturn {
    /// `None` for void.
    const RET: Option<NativeType>;

    fn write_return(self, slot: &mut [u8], scope: &Scope<'_>);
}

impl IntoReturn for () {
    const RET: Option<NativeType> = None;

    fn write_return(self, _: &mut [u8], _: &Scope<'_>) {}
}

macro_rules! impl_into_return_slot {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReturn for $ty {
                const RET: Option<NativeType> = Some(<$ty as SlotType>::NATIVE);

                #[inline]
                fn write_return(self, slot: &mut [u8], _: &Scope<'_>) {
                    self.write_slot(slot);
                }
            }
        )*
    };
}

impl_into_return_slot!(
    bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, Vector2, Vector3, Color, Transform2D,
);

impl<K: NativeKind> IntoReturn for Handle<K> {
    const RET: Option<NativeType> = Some(NativeType::of_handle(K::KIND));

    fn write_return(self, slot: &mut [u8], scope: &Scope<'_>) {
        scope.transfer(self).write_slot(slot);
    }
}

impl IntoReturn for Option<ObjectRef> {
    const RET: Option<NativeType> = Some(NativeType::Object);

    fn write_return(self, slot: &mut [u8], _: &Scope<'_>) {
        self.unwrap_or_else(ObjectRef::null).write_slot(slot);
    }
}

impl IntoReturn for String {
    const RET: Option<NativeType> = Some(NativeType::String);

    fn write_return(self, slot: &mut [u8], scope: &Scope<'_>) {
        slot.copy_from_slice(&scope.api().new_string(&self).to_ne_bytes());
    }
}

impl IntoReturn for Vec<i64> {
    const RET: Option<NativeType> = Some(NativeType::PackedInt64Array);

    fn write_return(self, slot: &mut [u8], scope: &Scope<'_>) {
        slot.copy_from_slice(&scope.api().new_packed_int64(&self).to_ne_bytes());
    }
}

impl IntoReturn for Variant {
    const RET: Option<NativeType> = Some(NativeType::Variant);

    fn write_return(self, slot: &mut [u8], scope: &Scope<'_>) {
        let payload = crate::runtime::variant_payload(scope, &self);
        slot.copy_from_slice(&payload.to_ne_bytes());
    }
}

// ============================================================================
// Defaults
// ============================================================================

/// Encode a default value into a slot of type `ty`.
///
/// Heap defaults (strings, arrays, variants) are created through `api` and
/// returned as an unregistered `OwnedByCaller` handle; the caller decides who
/// owns it.
pub fn write_default(
    ty: NativeType,
    value: &DefaultValue,
    slot: &mut [u8],
    api: &NativeApi,
) -> Option<RawHandle> {
    debug_assert!(value.fits(ty), "{value:?} does not fit {ty:?}");
    let (payload, kind) = match (value, ty) {
        (DefaultValue::String(s), _) => (api.new_string(s), HandleKind::String),
        (DefaultValue::StringName(s), _) => (api.new_string_name(s), HandleKind::StringName),
        (DefaultValue::EmptyArray, _) => (api.new_packed_int64(&[]), HandleKind::PackedInt64Array),
        (DefaultValue::Nil, _) => (api.new_variant_nil(), HandleKind::Variant),
        _ => {
            write_inline_default(ty, value, slot);
            return None;
        }
    };
    slot.copy_from_slice(&payload.to_ne_bytes());
    Some(RawHandle::encode(payload, kind, Ownership::OwnedByCaller))
}

fn write_inline_default(ty: NativeType, value: &DefaultValue, slot: &mut [u8]) {
    match (value, ty) {
        (DefaultValue::Bool(v), _) => v.write_slot(slot),
        (DefaultValue::Int(v), NativeType::Int8) => (*v as i8).write_slot(slot),
        (DefaultValue::Int(v), NativeType::Int16) => (*v as i16).write_slot(slot),
        (DefaultValue::Int(v), NativeType::Int32) => (*v as i32).write_slot(slot),
        (DefaultValue::Int(v), NativeType::UInt8) => (*v as u8).write_slot(slot),
        (DefaultValue::Int(v), NativeType::UInt16) => (*v as u16).write_slot(slot),
        (DefaultValue::Int(v), NativeType::UInt32) => (*v as u32).write_slot(slot),
        (DefaultValue::Int(v), NativeType::UInt64) => (*v as u64).write_slot(slot),
        (DefaultValue::Int(v), _) => v.write_slot(slot),
        (DefaultValue::Float(v), NativeType::Float32) => (*v as f32).write_slot(slot),
        (DefaultValue::Float(v), _) => v.write_slot(slot),
        (DefaultValue::Vector2(v), _) => v.write_slot(slot),
        (DefaultValue::Vector3(v), _) => v.write_slot(slot),
        (DefaultValue::Color(v), _) => v.write_slot(slot),
        (DefaultValue::Transform2D(v), _) => v.write_slot(slot),
        (DefaultValue::Null, _)
        | (DefaultValue::String(_), _)
        | (DefaultValue::StringName(_), _)
        | (DefaultValue::EmptyArray, _)
        | (DefaultValue::Nil, _) => slot.fill(0),
    }
}
