/// Lane-group helpers on top of glam's 4-wide `Vec4`
/// glam supplies the arithmetic, compares, selects and swizzles; this module
/// only adds the pieces the coverage rasterizer needs on top of them.
use glam::Vec4;

/// Number of depth samples processed together.
pub const LANES: usize = 4;

/// Horizontal offsets of the four lanes inside a lane group.
pub const LANE_RAMP: Vec4 = Vec4::new(0.0, 1.0, 2.0, 3.0);

/// Sign mask with every lane set.
pub const ALL_LANES: u32 = 0b1111;

/// Broadcast lane `0` of `v` to all lanes.
#[inline(always)]
pub fn splat_x(v: Vec4) -> Vec4 {
    Vec4::splat(v.x)
}

#[inline(always)]
pub fn splat_y(v: Vec4) -> Vec4 {
    Vec4::splat(v.y)
}

#[inline(always)]
pub fn splat_z(v: Vec4) -> Vec4 {
    Vec4::splat(v.z)
}

#[inline(always)]
pub fn splat_w(v: Vec4) -> Vec4 {
    Vec4::splat(v.w)
}

/// Bit `i` set when vertex `i` lies behind the camera plane (negative z).
/// Only the low three bits are meaningful.
#[inline(always)]
pub fn behind_mask(v0: Vec4, v1: Vec4, v2: Vec4) -> u32 {
    Vec4::new(v0.z, v1.z, v2.z, v2.z).is_negative_bitmask() & 0b111
}

/// Linear interpolation of a full homogeneous vertex: `a + (b - a) * t`.
#[inline(always)]
pub fn lerp_vertex(a: Vec4, b: Vec4, t: Vec4) -> Vec4 {
    (b - a).mul_add(t, a)
}

/// Transform a position by the four columns of a matrix:
/// `m0 * x + m1 * y + m2 * z + m3`.
#[inline(always)]
pub fn transform_point(m: &[Vec4; 4], x: f32, y: f32, z: f32) -> Vec4 {
    Vec4::splat(x).mul_add(m[0], Vec4::splat(y).mul_add(m[1], Vec4::splat(z).mul_add(m[2], m[3])))
}

/// Index of the lane group holding pixel `(x, y)` in a plane of `size_x` columns.
#[inline(always)]
pub fn group_index(x: usize, y: usize, size_x: usize) -> usize {
    (x + y * size_x) / LANES
}

/// Number of lane groups in one row of `size_x` pixels.
#[inline(always)]
pub const fn groups_per_row(size_x: usize) -> usize {
    size_x / LANES
}
