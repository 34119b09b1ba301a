//! Small helpers for the column-major texture transforms carried by frames.

use crate::frame::Transform;

pub const IDENTITY: Transform = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Axis flips applied to a frame before drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MirrorMode {
    #[default]
    Normal,
    Horizontal,
    Vertical,
    Both,
}

/// Sets the sign of the X and Y scale components in place, leaving the rest
/// of the transform untouched.
pub fn set_mirror(transform: &mut Transform, mode: MirrorMode) {
    let (flip_x, flip_y) = match mode {
        MirrorMode::Normal => (false, false),
        MirrorMode::Horizontal => (true, false),
        MirrorMode::Vertical => (false, true),
        MirrorMode::Both => (true, true),
    };
    let sx = transform[0].abs();
    let sy = transform[5].abs();
    transform[0] = if flip_x { -sx } else { sx };
    transform[5] = if flip_y { -sy } else { sy };
}

/// Rotates the transform by `degrees` around the texture centre. Multiples
/// of 360 are a no-op.
pub fn rotate(transform: &mut Transform, degrees: i32) {
    let degrees = degrees.rem_euclid(360);
    if degrees == 0 {
        return;
    }
    let theta = (degrees as f32).to_radians();
    let (sin, cos) = theta.sin_cos();
    // translate(0.5, 0.5) * rotZ(theta) * translate(-0.5, -0.5)
    let rotation: Transform = [
        cos,
        sin,
        0.0,
        0.0,
        -sin,
        cos,
        0.0,
        0.0,
        0.0,
        0.0,
        1.0,
        0.0,
        0.5 - 0.5 * cos + 0.5 * sin,
        0.5 - 0.5 * sin - 0.5 * cos,
        0.0,
        1.0,
    ];
    *transform = multiply(transform, &rotation);
}

/// `a * b` for column-major 4x4 matrices.
pub fn multiply(a: &Transform, b: &Transform) -> Transform {
    let mut out = [0.0f32; 16];
    for col in 0..4 {
        for row in 0..4 {
            let mut sum = 0.0;
            for k in 0..4 {
                sum += a[k * 4 + row] * b[col * 4 + k];
            }
            out[col * 4 + row] = sum;
        }
    }
    out
}

/// Applies the transform to a texture coordinate, ignoring perspective.
pub fn apply(transform: &Transform, u: f32, v: f32) -> (f32, f32) {
    let x = transform[0] * u + transform[4] * v + transform[12];
    let y = transform[1] * u + transform[5] * v + transform[13];
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-5, "{a} != {b}");
    }

    #[test]
    fn identity_maps_coordinates_unchanged() {
        let (u, v) = apply(&IDENTITY, 0.25, 0.75);
        assert_close(u, 0.25);
        assert_close(v, 0.75);
    }

    #[test]
    fn horizontal_mirror_flips_x_scale_only() {
        let mut m = IDENTITY;
        set_mirror(&mut m, MirrorMode::Horizontal);
        assert_close(m[0], -1.0);
        assert_close(m[5], 1.0);
        set_mirror(&mut m, MirrorMode::Normal);
        assert_close(m[0], 1.0);
    }

    #[test]
    fn both_mirror_flips_both_axes() {
        let mut m = IDENTITY;
        set_mirror(&mut m, MirrorMode::Both);
        assert_close(m[0], -1.0);
        assert_close(m[5], -1.0);
    }

    #[test]
    fn quarter_turn_rotates_about_centre() {
        let mut m = IDENTITY;
        rotate(&mut m, 90);
        // Centre is a fixed point.
        let (u, v) = apply(&m, 0.5, 0.5);
        assert_close(u, 0.5);
        assert_close(v, 0.5);
        // The origin corner moves to (1, 0) under a 90 degree turn.
        let (u, v) = apply(&m, 0.0, 0.0);
        assert_close(u, 1.0);
        assert_close(v, 0.0);
    }

    #[test]
    fn full_turn_is_identity() {
        let mut m = IDENTITY;
        rotate(&mut m, 360);
        assert_eq!(m, IDENTITY);
    }
}
