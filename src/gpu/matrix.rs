// SPDX-License-Identifier: GPL-3.0-only

//! Column-major 4x4 matrices as used by the quad shaders
//!
//! Layout matches WGSL `mat4x4<f32>` and GL uniform upload: element `(row, col)`
//! lives at index `col * 4 + row`.

/// 4x4 float matrix, column-major
pub type Mat4 = [f32; 16];

/// Identity matrix
pub const IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Scale matrix
pub fn scale(x: f32, y: f32, z: f32) -> Mat4 {
    let mut m = IDENTITY;
    m[0] = x;
    m[5] = y;
    m[10] = z;
    m
}

/// Matrix product `a * b`
pub fn multiply(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [0.0f32; 16];
    for col in 0..4 {
        for row in 0..4 {
            out[col * 4 + row] = (0..4).map(|k| a[k * 4 + row] * b[col * 4 + k]).sum();
        }
    }
    out
}

/// Transform a point `(x, y, 0, 1)` and return the resulting `(x, y)`
pub fn transform_point(m: &Mat4, x: f32, y: f32) -> (f32, f32) {
    (
        m[0] * x + m[4] * y + m[12],
        m[1] * x + m[5] * y + m[13],
    )
}

/// Texture transform for frames delivered top row first.
///
/// Maps texture coordinate `t` to `1 - t`, which is what a capture stream hands
/// out for buffers whose first row is the top of the image.
pub fn flip_vertical() -> Mat4 {
    let mut m = IDENTITY;
    m[5] = -1.0;
    m[13] = 1.0;
    m
}

/// Texture transform mirroring the image horizontally (`s` to `1 - s`)
pub fn flip_horizontal() -> Mat4 {
    let mut m = IDENTITY;
    m[0] = -1.0;
    m[12] = 1.0;
    m
}

/// Inverse of the 2D affine part of `m` (x/y scale, shear and translation).
///
/// Returns `None` when the xy block is singular. Used by the CPU rasterizer to
/// map framebuffer positions back into quad space.
pub fn inverse_affine_2d(m: &Mat4) -> Option<[f32; 6]> {
    let (a, b, c, d) = (m[0], m[4], m[1], m[5]);
    let (tx, ty) = (m[12], m[13]);
    let det = a * d - b * c;
    if det.abs() < f32::EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let ia = d * inv_det;
    let ib = -b * inv_det;
    let ic = -c * inv_det;
    let id = a * inv_det;
    Some([ia, ib, ic, id, -(ia * tx + ib * ty), -(ic * tx + id * ty)])
}
