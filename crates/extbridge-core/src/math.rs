//! Small fixed-size value types passed inline in call frames.
//!
//! Layouts are `#[repr(C)]` and match the engine's single-precision builds.

/// A 2D vector.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2::new(0.0, 0.0);

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A 3D vector.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// An RGBA color.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

/// A 2D affine transform: two basis columns and an origin.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct Transform2D {
    pub x: Vector2,
    pub y: Vector2,
    pub origin: Vector2,
}

impl Transform2D {
    pub const IDENTITY: Transform2D = Transform2D {
        x: Vector2::new(1.0, 0.0),
        y: Vector2::new(0.0, 1.0),
        origin: Vector2::ZERO,
    };

    pub const fn from_translation(origin: Vector2) -> Self {
        Transform2D {
            origin,
            ..Self::IDENTITY
        }
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_engine_layout() {
        assert_eq!(std::mem::size_of::<Vector2>(), 8);
        assert_eq!(std::mem::size_of::<Vector3>(), 12);
        assert_eq!(std::mem::size_of::<Color>(), 16);
        assert_eq!(std::mem::size_of::<Transform2D>(), 24);
        assert_eq!(std::mem::align_of::<Transform2D>(), 4);
    }

    #[test]
    fn translation_keeps_identity_basis() {
        let t = Transform2D::from_translation(Vector2::new(3.0, 4.0));
        assert_eq!(t.x, Vector2::new(1.0, 0.0));
        assert_eq!(t.origin, Vector2::new(3.0, 4.0));
    }
}
