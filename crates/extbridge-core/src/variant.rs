//! Dynamically typed engine values.
//!
//! A variant lives on the engine heap like a string does and is passed by
//! handle. The host side is [`Variant`], an owned copy of the value; moving
//! between the two goes through a [`Scope`](crate::runtime::Scope)
//! (`new_variant` / `read_variant`).
//!
//! Only the types the bridge can marshal are representable. The engine tags a
//! variant with a [`VariantType`] using its own numbering.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::handle::ObjectRef;
use crate::math::{Color, Transform2D, Vector2, Vector3};
use crate::signature::NativeType;

/// The engine's tag for the type held in a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum VariantType {
    Nil = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Vector2 = 5,
    Vector3 = 9,
    Transform2D = 11,
    Color = 20,
    StringName = 21,
    Object = 24,
    PackedInt64Array = 31,
}

impl VariantType {
    /// The slot type used to move a value of this type in or out of a
    /// variant. `None` for `Nil`, which carries no value.
    pub const fn native(self) -> Option<NativeType> {
        Some(match self {
            VariantType::Nil => return None,
            VariantType::Bool => NativeType::Bool,
            VariantType::Int => NativeType::Int64,
            VariantType::Float => NativeType::Float64,
            VariantType::String => NativeType::String,
            VariantType::Vector2 => NativeType::Vector2,
            VariantType::Vector3 => NativeType::Vector3,
            VariantType::Transform2D => NativeType::Transform2D,
            VariantType::Color => NativeType::Color,
            VariantType::StringName => NativeType::StringName,
            VariantType::Object => NativeType::Object,
            VariantType::PackedInt64Array => NativeType::PackedInt64Array,
        })
    }
}

/// A host copy of a variant's value.
///
/// Objects are held as borrowed references; the variant does not keep them
/// alive.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    StringName(String),
    Vector2(Vector2),
    Vector3(Vector3),
    Transform2D(Transform2D),
    Color(Color),
    Object(ObjectRef),
    PackedInt64Array(Vec<i64>),
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::Nil => VariantType::Nil,
            Variant::Bool(_) => VariantType::Bool,
            Variant::Int(_) => VariantType::Int,
            Variant::Float(_) => VariantType::Float,
            Variant::String(_) => VariantType::String,
            Variant::StringName(_) => VariantType::StringName,
            Variant::Vector2(_) => VariantType::Vector2,
            Variant::Vector3(_) => VariantType::Vector3,
            Variant::Transform2D(_) => VariantType::Transform2D,
            Variant::Color(_) => VariantType::Color,
            Variant::Object(_) => VariantType::Object,
            Variant::PackedInt64Array(_) => VariantType::PackedInt64Array,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Variant::Nil)
    }
}

macro_rules! impl_from_for_variant {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Variant::$variant(value)
                }
            }
        )*
    };
}

impl_from_for_variant!(
    bool => Bool,
    i64 => Int,
    f64 => Float,
    String => String,
    Vector2 => Vector2,
    Vector3 => Vector3,
    Transform2D => Transform2D,
    Color => Color,
    ObjectRef => Object,
    Vec<i64> => PackedInt64Array,
);

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

/// Scratch space for one value on its way in or out of a variant.
///
/// Sized and aligned for the largest inline type.
#[repr(C, align(8))]
pub(crate) struct VariantSlot([u8; 24]);

impl VariantSlot {
    pub(crate) const fn zeroed() -> Self {
        VariantSlot([0; 24])
    }

    pub(crate) fn as_slot(&mut self, ty: NativeType) -> &mut [u8] {
        &mut self.0[..ty.layout().size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_use_engine_numbering() {
        assert_eq!(u32::from(VariantType::Color), 20);
        assert_eq!(u32::from(VariantType::PackedInt64Array), 31);
        assert_eq!(VariantType::try_from(24u32), Ok(VariantType::Object));
        assert!(VariantType::try_from(6u32).is_err());
    }

    #[test]
    fn every_native_slot_fits_the_scratch_space() {
        let types = [
            VariantType::Bool,
            VariantType::Int,
            VariantType::Float,
            VariantType::String,
            VariantType::Vector2,
            VariantType::Vector3,
            VariantType::Transform2D,
            VariantType::Color,
            VariantType::StringName,
            VariantType::Object,
            VariantType::PackedInt64Array,
        ];
        let mut slot = VariantSlot::zeroed();
        for ty in types {
            let native = ty.native().unwrap();
            assert_eq!(slot.as_slot(native).len(), native.layout().size);
        }
        assert_eq!(VariantType::Nil.native(), None);
    }

    #[test]
    fn host_values_know_their_tag() {
        assert_eq!(Variant::from("x").variant_type(), VariantType::String);
        assert_eq!(Variant::from(vec![1, 2]).variant_type(), VariantType::PackedInt64Array);
        assert!(Variant::default().is_nil());
    }
}
