//! Static per-method metadata.
//!
//! Everything the marshaller needs to lay out a call frame is derived from
//! these types, which the generated call sites declare as `static` items.
//! Nothing here looks at argument values.

use std::fmt;

use bitflags::bitflags;

use crate::handle::HandleKind;
use crate::math::{Color, Transform2D, Vector2, Vector3};

/// How a value travels through a call frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassBy {
    /// The value's bytes are copied into the slot.
    Inline,
    /// The slot holds the payload of a handle of this kind.
    Handle(HandleKind),
}

/// Size, alignment and passing convention of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub size: usize,
    pub align: usize,
    pub pass: PassBy,
}

impl SlotLayout {
    const fn inline(size: usize, align: usize) -> Self {
        Self {
            size,
            align,
            pass: PassBy::Inline,
        }
    }

    const fn handle(kind: HandleKind) -> Self {
        Self {
            size: 8,
            align: 8,
            pass: PassBy::Handle(kind),
        }
    }
}

/// The declared native type of a parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NativeType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Vector2,
    Vector3,
    Color,
    Transform2D,
    Rid,
    String,
    StringName,
    PackedInt64Array,
    Object,
    Variant,
}

impl NativeType {
    /// The declared type carried by a handle of `kind`.
    pub const fn of_handle(kind: HandleKind) -> Self {
        match kind {
            HandleKind::Object => NativeType::Object,
            HandleKind::String => NativeType::String,
            HandleKind::StringName => NativeType::StringName,
            HandleKind::PackedInt64Array => NativeType::PackedInt64Array,
            HandleKind::Rid => NativeType::Rid,
            HandleKind::Variant => NativeType::Variant,
        }
    }

    /// The slot layout the engine expects for this type.
    pub const fn layout(self) -> SlotLayout {
        match self {
            NativeType::Bool | NativeType::Int8 | NativeType::UInt8 => SlotLayout::inline(1, 1),
            NativeType::Int16 | NativeType::UInt16 => SlotLayout::inline(2, 2),
            NativeType::Int32 | NativeType::UInt32 | NativeType::Float32 => {
                SlotLayout::inline(4, 4)
            }
            NativeType::Int64 | NativeType::UInt64 | NativeType::Float64 => {
                SlotLayout::inline(8, 8)
            }
            NativeType::Vector2 => SlotLayout::inline(8, 4),
            NativeType::Vector3 => SlotLayout::inline(12, 4),
            NativeType::Color => SlotLayout::inline(16, 4),
            NativeType::Transform2D => SlotLayout::inline(24, 4),
            NativeType::Rid => SlotLayout::handle(HandleKind::Rid),
            NativeType::String => SlotLayout::handle(HandleKind::String),
            NativeType::StringName => SlotLayout::handle(HandleKind::StringName),
            NativeType::PackedInt64Array => SlotLayout::handle(HandleKind::PackedInt64Array),
            NativeType::Object => SlotLayout::handle(HandleKind::Object),
            NativeType::Variant => SlotLayout::handle(HandleKind::Variant),
        }
    }
}

bitflags! {
    /// Method flags as the engine reports them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodFlags: u32 {
        const NORMAL = 1 << 0;
        const EDITOR = 1 << 1;
        const CONST = 1 << 2;
        const VIRTUAL = 1 << 3;
        const VARARG = 1 << 4;
        const STATIC = 1 << 5;
    }
}

impl Default for MethodFlags {
    fn default() -> Self {
        MethodFlags::NORMAL
    }
}

/// A default value for a parameter or a virtual's return.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Vector2(Vector2),
    Vector3(Vector3),
    Color(Color),
    Transform2D(Transform2D),
    String(&'static str),
    StringName(&'static str),
    EmptyArray,
    /// The null object or the zero resource ID.
    Null,
    /// An empty variant.
    Nil,
}

impl DefaultValue {
    /// The zero value of a type.
    pub const fn zero_of(ty: NativeType) -> Self {
        match ty {
            NativeType::Bool => DefaultValue::Bool(false),
            NativeType::Int8
            | NativeType::Int16
            | NativeType::Int32
            | NativeType::Int64
            | NativeType::UInt8
            | NativeType::UInt16
            | NativeType::UInt32
            | NativeType::UInt64 => DefaultValue::Int(0),
            NativeType::Float32 | NativeType::Float64 => DefaultValue::Float(0.0),
            NativeType::Vector2 => DefaultValue::Vector2(Vector2::ZERO),
            NativeType::Vector3 => DefaultValue::Vector3(Vector3::ZERO),
            NativeType::Color => DefaultValue::Color(Color::rgba(0.0, 0.0, 0.0, 0.0)),
            NativeType::Transform2D => DefaultValue::Transform2D(Transform2D::IDENTITY),
            NativeType::String => DefaultValue::String(""),
            NativeType::StringName => DefaultValue::StringName(""),
            NativeType::PackedInt64Array => DefaultValue::EmptyArray,
            NativeType::Rid | NativeType::Object => DefaultValue::Null,
            NativeType::Variant => DefaultValue::Nil,
        }
    }

    /// Whether this default can fill a slot of `ty`.
    pub const fn fits(&self, ty: NativeType) -> bool {
        matches!(
            (self, ty),
            (DefaultValue::Bool(_), NativeType::Bool)
                | (
                    DefaultValue::Int(_),
                    NativeType::Int8
                        | NativeType::Int16
                        | NativeType::Int32
                        | NativeType::Int64
                        | NativeType::UInt8
                        | NativeType::UInt16
                        | NativeType::UInt32
                        | NativeType::UInt64
                )
                | (DefaultValue::Float(_), NativeType::Float32 | NativeType::Float64)
                | (DefaultValue::Vector2(_), NativeType::Vector2)
                | (DefaultValue::Vector3(_), NativeType::Vector3)
                | (DefaultValue::Color(_), NativeType::Color)
                | (DefaultValue::Transform2D(_), NativeType::Transform2D)
                | (DefaultValue::String(_), NativeType::String)
                | (DefaultValue::StringName(_), NativeType::StringName)
                | (DefaultValue::EmptyArray, NativeType::PackedInt64Array)
                | (DefaultValue::Null, NativeType::Object | NativeType::Rid)
                | (DefaultValue::Nil, NativeType::Variant)
        )
    }
}

/// A declared parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamInfo {
    pub name: &'static str,
    pub ty: NativeType,
    pub default: Option<DefaultValue>,
}

impl ParamInfo {
    pub const fn new(name: &'static str, ty: NativeType) -> Self {
        Self {
            name,
            ty,
            default: None,
        }
    }

    pub const fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }
}

/// Parameter and return types of a method, in declared order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MethodSignature {
    pub params: &'static [ParamInfo],
    pub ret: Option<NativeType>,
}

impl MethodSignature {
    pub const fn new(params: &'static [ParamInfo], ret: Option<NativeType>) -> Self {
        Self { params, ret }
    }

    /// Whether parameter and return types equal the given list.
    pub fn matches(&self, params: &[NativeType], ret: Option<NativeType>) -> bool {
        self.ret == ret
            && self.params.len() == params.len()
            && self.params.iter().zip(params).all(|(p, ty)| p.ty == *ty)
    }

    /// Parameter types in declared order.
    pub fn param_types(&self) -> impl Iterator<Item = NativeType> + '_ {
        self.params.iter().map(|p| p.ty)
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<NativeType> = self.param_types().collect();
        write!(f, "{}", TypeList(&params, self.ret))
    }
}

/// `(A, B) -> R` rendering of a type list, for diagnostics.
pub struct TypeList<'a>(pub &'a [NativeType], pub Option<NativeType>);

impl fmt::Display for TypeList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, ty) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{ty:?}")?;
        }
        write!(f, ")")?;
        match self.1 {
            Some(ret) => write!(f, " -> {ret:?}"),
            None => Ok(()),
        }
    }
}

/// A bound engine method as a generated call site declares it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MethodSpec {
    pub class: &'static str,
    pub name: &'static str,
    /// The engine's compatibility hash for this method's signature.
    pub hash: i64,
    pub flags: MethodFlags,
    pub signature: MethodSignature,
}

impl MethodSpec {
    pub const fn new(
        class: &'static str,
        name: &'static str,
        hash: i64,
        signature: MethodSignature,
    ) -> Self {
        Self {
            class,
            name,
            hash,
            flags: MethodFlags::NORMAL,
            signature,
        }
    }

    pub const fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// A virtual method an engine class lets subclasses override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualMethodInfo {
    pub name: &'static str,
    pub signature: MethodSignature,
    /// Written to the return slot when no override runs. `None` for void.
    pub default: Option<DefaultValue>,
}

impl VirtualMethodInfo {
    /// A virtual whose default is the zero value of its return type.
    pub const fn new(name: &'static str, signature: MethodSignature) -> Self {
        let default = match signature.ret {
            Some(ty) => Some(DefaultValue::zero_of(ty)),
            None => None,
        };
        Self {
            name,
            signature,
            default,
        }
    }

    pub const fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }
}
