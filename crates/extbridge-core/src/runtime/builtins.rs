//! Creating and reading builtin heap values through a scope.
//!
//! Everything created here is registered `OwnedByCaller` in the scope that
//! created it. Reading never changes ownership.

use crate::convert::{FromSlot, IntoSlot};
use crate::error::ConversionError;
use crate::handle::{
    HandleKind, ObjectRef, Ownership, PackedInt64Handle, StringHandle, StringNameHandle,
    VariantHandle,
};
use crate::math::{Color, Transform2D, Vector2, Vector3};
use crate::variant::{Variant, VariantSlot, VariantType};

use super::Scope;

impl Scope<'_> {
    /// Create a native string owned by this scope.
    pub fn new_string(&self, s: &str) -> StringHandle {
        let payload = self.api().new_string(s);
        self.register(StringHandle::encode(payload, Ownership::OwnedByCaller))
    }

    /// Copy a native string into a host string.
    pub fn read_string(&self, handle: StringHandle) -> Result<String, ConversionError> {
        String::from_utf8(self.api().string_bytes(handle.payload())).map_err(|_| {
            ConversionError::InvalidUtf8 {
                kind: HandleKind::String,
                payload: handle.payload(),
            }
        })
    }

    /// Create a native string name owned by this scope.
    pub fn new_string_name(&self, s: &str) -> StringNameHandle {
        let payload = self.api().new_string_name(s);
        self.register(StringNameHandle::encode(payload, Ownership::OwnedByCaller))
    }

    pub fn read_string_name(&self, handle: StringNameHandle) -> Result<String, ConversionError> {
        String::from_utf8(self.api().string_name_bytes(handle.payload())).map_err(|_| {
            ConversionError::InvalidUtf8 {
                kind: HandleKind::StringName,
                payload: handle.payload(),
            }
        })
    }

    /// Create a native packed array owned by this scope.
    pub fn new_packed_int64(&self, values: &[i64]) -> PackedInt64Handle {
        let payload = self.api().new_packed_int64(values);
        self.register(PackedInt64Handle::encode(payload, Ownership::OwnedByCaller))
    }

    /// Copy a native packed array into a host vector.
    pub fn read_packed_int64(&self, handle: PackedInt64Handle) -> Vec<i64> {
        let api = self.api();
        let payload = handle.payload();
        (0..api.packed_int64_len(payload))
            .map_while(|i| api.packed_int64_get(payload, i))
            .collect()
    }

    /// Create a native variant owned by this scope.
    ///
    /// Heap values inside `value` are created in this scope too and copied by
    /// the engine, so they are released with the scope.
    pub fn new_variant(&self, value: &Variant) -> VariantHandle {
        let payload = variant_payload(self, value);
        self.register(VariantHandle::encode(payload, Ownership::OwnedByCaller))
    }

    /// Copy a native variant into a host value.
    pub fn read_variant(&self, handle: VariantHandle) -> Result<Variant, ConversionError> {
        let api = self.api();
        let payload = handle.payload();
        let tag = api.variant_type(payload);
        let unsupported = ConversionError::UnsupportedVariant { payload, tag };
        let ty = VariantType::try_from(tag).map_err(|_| unsupported.clone())?;
        let Some(native) = ty.native() else {
            return Ok(Variant::Nil);
        };

        let mut buf = VariantSlot::zeroed();
        let slot = buf.as_slot(native);
        // SAFETY: `slot` is laid out for `native`.
        if !unsafe { api.variant_to(ty, payload, slot.as_mut_ptr().cast()) } {
            return Err(unsupported);
        }
        let owned = Ownership::OwnedByCaller;
        Ok(match ty {
            VariantType::Nil => Variant::Nil,
            VariantType::Bool => Variant::Bool(bool::read_slot(slot, owned)),
            VariantType::Int => Variant::Int(i64::read_slot(slot, owned)),
            VariantType::Float => Variant::Float(f64::read_slot(slot, owned)),
            VariantType::Vector2 => Variant::Vector2(Vector2::read_slot(slot, owned)),
            VariantType::Vector3 => Variant::Vector3(Vector3::read_slot(slot, owned)),
            VariantType::Transform2D => Variant::Transform2D(Transform2D::read_slot(slot, owned)),
            VariantType::Color => Variant::Color(Color::read_slot(slot, owned)),
            VariantType::Object => Variant::Object(ObjectRef::read_slot(slot, Ownership::Borrowed)),
            VariantType::String => {
                let copy = self.register(StringHandle::read_slot(slot, owned));
                Variant::String(self.read_string(copy)?)
            }
            VariantType::StringName => {
                let copy = self.register(StringNameHandle::read_slot(slot, owned));
                Variant::StringName(self.read_string_name(copy)?)
            }
            VariantType::PackedInt64Array => {
                let copy = self.register(PackedInt64Handle::read_slot(slot, owned));
                Variant::PackedInt64Array(self.read_packed_int64(copy))
            }
        })
    }
}

/// Create an unregistered variant holding `value`.
pub(crate) fn variant_payload(scope: &Scope<'_>, value: &Variant) -> u64 {
    let ty = value.variant_type();
    let Some(native) = ty.native() else {
        return scope.api().new_variant_nil();
    };
    let mut buf = VariantSlot::zeroed();
    let slot = buf.as_slot(native);
    match value {
        Variant::Nil => {}
        Variant::Bool(v) => v.write_slot(slot),
        Variant::Int(v) => v.write_slot(slot),
        Variant::Float(v) => v.write_slot(slot),
        Variant::Vector2(v) => v.write_slot(slot),
        Variant::Vector3(v) => v.write_slot(slot),
        Variant::Transform2D(v) => v.write_slot(slot),
        Variant::Color(v) => v.write_slot(slot),
        Variant::Object(v) => v.write_slot(slot),
        Variant::String(s) => scope.new_string(s).write_slot(slot),
        Variant::StringName(s) => scope.new_string_name(s).write_slot(slot),
        Variant::PackedInt64Array(v) => scope.new_packed_int64(v).write_slot(slot),
    }
    // SAFETY: `slot` is laid out for `native`.
    unsafe { scope.api().new_variant_from(ty, slot.as_ptr().cast()) }
}
