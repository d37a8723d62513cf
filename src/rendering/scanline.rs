/// Lane-group scanline rasterizer for the coverage buffer
/// Evaluates three incremental edge functions four pixels at a time and either
/// writes the nearer depth (occluders) or reports whether any sample survived
/// the depth test (cull queries).
///
/// The four behaviour axes are compile-time parameters so each instantiation
/// has a branch-free inner loop:
/// - write vs. read-only comes from the `DepthTarget` type
/// - `CULL` tracks whether any lane group was left uncovered
/// - `PROJECT` performs the perspective divide and edge setup in place
/// - `CULL_BACKFACES` rejects triangles with a non-positive determinant
use super::lane::{self, ALL_LANES, LANE_RAMP, LANES};
use crate::perf::FUNCTION_COUNTERS;
use crate::{count_add, count_call};
use glam::{Vec4, Vec4Swizzles};

/// Depth-plane access used by the rasterizer.
///
/// Implemented for a read-only view (cull queries) and a mutable view
/// (occluder writes). `WRITE` selects the instantiation at compile time.
pub trait DepthTarget {
    const WRITE: bool;

    /// Load the lane group at `index`.
    fn load(&self, index: usize) -> Vec4;

    /// Store the lane group at `index`. Never called when `WRITE` is false.
    fn store(&mut self, index: usize, value: Vec4);
}

/// Read-only depth plane view for visibility queries.
pub struct ReadPlane<'a>(pub &'a [Vec4]);

/// Mutable depth plane view for occluder rasterization.
pub struct WritePlane<'a>(pub &'a mut [Vec4]);

impl DepthTarget for ReadPlane<'_> {
    const WRITE: bool = false;

    #[inline(always)]
    fn load(&self, index: usize) -> Vec4 {
        self.0[index]
    }

    #[inline(always)]
    fn store(&mut self, _index: usize, _value: Vec4) {}
}

impl DepthTarget for WritePlane<'_> {
    const WRITE: bool = true;

    #[inline(always)]
    fn load(&self, index: usize) -> Vec4 {
        self.0[index]
    }

    #[inline(always)]
    fn store(&mut self, index: usize, value: Vec4) {
        self.0[index] = value;
    }
}

/// Integer pixel bounds of a projected primitive, clamped to the buffer.
/// `max_x`/`max_y` are exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenRect {
    pub min_x: usize,
    pub min_y: usize,
    pub max_x: usize,
    pub max_y: usize,
}

impl ScreenRect {
    /// Bounds of three projected vertices: `floor(min) .. floor(max) + 1`,
    /// clamped to `[0, max_xy]`. `max_xy` is `(SIZE_X, SIZE_Y, SIZE_X, SIZE_Y)`.
    #[inline(always)]
    pub fn from_vertices(p0: Vec4, p1: Vec4, p2: Vec4, max_xy: Vec4) -> Self {
        let v_min = p0.min(p1).min(p2);
        let v_max = p0.max(p1).max(p2) + Vec4::ONE;
        let min_max = Vec4::new(v_min.x, v_min.y, v_max.x, v_max.y)
            .max(Vec4::ZERO)
            .min(max_xy);

        // NaN from a zero w collapses to 0 here, which yields an empty rect.
        Self {
            min_x: min_max.x as usize,
            min_y: min_max.y as usize,
            max_x: min_max.z as usize,
            max_y: min_max.w as usize,
        }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.min_x >= self.max_x || self.min_y >= self.max_y
    }
}

/// Per-triangle setup shared between the in-place (`PROJECT`) path and the
/// batched path that prepares four triangles at once.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriangleSetup {
    pub rect: ScreenRect,
    /// `(x1 - x0, y1 - y0, x2 - x0, y2 - y0) / det`
    pub gradients: Vec4,
}

/// Perspective divide of x/y. Depth stays in clip units (linear in view depth
/// for coverage projections) and w becomes 1.
#[inline(always)]
pub fn project(v: Vec4) -> Vec4 {
    let inv_w = v.w.recip();
    Vec4::new(v.x * inv_w, v.y * inv_w, v.z, 1.0)
}

/// Signed screen-space area term of a projected triangle, together with the
/// packed edge vectors it was computed from.
#[inline(always)]
pub fn edge_determinant(p0: Vec4, p1: Vec4, p2: Vec4) -> (Vec4, f32) {
    let v210 = Vec4::new(p1.x, p1.y, p2.x, p2.y) - p0.xyxy();
    let det = v210 * v210.wzwz();
    (v210, det.x - det.y)
}

/// Edge setup for an already projected triangle. Returns `None` when the
/// triangle is back-facing (with `CULL_BACKFACES`) or covers no pixel.
#[inline(always)]
pub fn setup_triangle<const CULL_BACKFACES: bool>(
    p0: Vec4,
    p1: Vec4,
    p2: Vec4,
    max_xy: Vec4,
) -> Option<TriangleSetup> {
    let (v210, det) = edge_determinant(p0, p1, p2);
    if CULL_BACKFACES && det <= f32::EPSILON {
        count_call!(FUNCTION_COUNTERS.triangles_backface_rejected);
        return None;
    }
    setup_with_determinant(p0, p1, p2, v210, det, max_xy)
}

/// Finish edge setup from a determinant computed elsewhere (the batched path
/// evaluates four determinants at once). A zero determinant is nudged to a
/// tiny negative value instead of dividing by zero.
#[inline(always)]
pub fn setup_with_determinant(
    p0: Vec4,
    p1: Vec4,
    p2: Vec4,
    v210: Vec4,
    mut det: f32,
    max_xy: Vec4,
) -> Option<TriangleSetup> {
    if det == 0.0 {
        det = -f32::EPSILON;
    }

    let rect = ScreenRect::from_vertices(p0, p1, p2, max_xy);
    if rect.is_empty() {
        return None;
    }

    Some(TriangleSetup {
        rect,
        gradients: v210 / det,
    })
}

/// Rasterize one triangle into `target`.
///
/// With `PROJECT` the inputs are raw clip-space vertices and `prepared` is
/// ignored; otherwise the inputs are already projected and `prepared` holds
/// their edge setup.
///
/// Returns `true` when `CULL` is set and at least one covered sample was not
/// blocked by nearer or equal depth already in the buffer.
#[inline(always)]
pub fn rasterize_triangle<
    T: DepthTarget,
    const SIZE_X: usize,
    const CULL: bool,
    const PROJECT: bool,
    const CULL_BACKFACES: bool,
>(
    target: &mut T,
    max_xy: Vec4,
    v0: Vec4,
    v1: Vec4,
    v2: Vec4,
    prepared: &TriangleSetup,
) -> bool {
    count_call!(FUNCTION_COUNTERS.triangles_rasterized);

    let (p0, p1, p2, setup) = if PROJECT {
        let p0 = project(v0);
        let p1 = project(v1);
        let p2 = project(v2);
        match setup_triangle::<CULL_BACKFACES>(p0, p1, p2, max_xy) {
            Some(setup) => (p0, p1, p2, setup),
            None => return false,
        }
    } else {
        (v0, v1, v2, *prepared)
    };

    scan_triangle::<T, SIZE_X, CULL>(target, p0, p1, p2, &setup)
}

/// Walk the triangle's bounding rectangle one lane group at a time.
#[inline(always)]
fn scan_triangle<T: DepthTarget, const SIZE_X: usize, const CULL: bool>(
    target: &mut T,
    p0: Vec4,
    p1: Vec4,
    p2: Vec4,
    setup: &TriangleSetup,
) -> bool {
    let rect = setup.rect;
    let min_x = rect.min_x & !(LANES - 1);
    let row_groups = lane::groups_per_row(SIZE_X);
    let first_group = min_x / LANES;
    let end_group = (rect.max_x + LANES - 1) / LANES;

    let min_z = Vec4::splat(p0.z.min(p1.z).min(p2.z));
    let v0z = Vec4::splat(p0.z);
    let z10 = Vec4::splat(p1.z) - v0z;
    let z20 = Vec4::splat(p2.z) - v0z;

    let g = setup.gradients;
    let x20 = lane::splat_x(g);
    let y20 = lane::splat_y(g);
    let x10 = -lane::splat_z(g);
    let y10 = lane::splat_w(g);

    let dx4 = Vec4::splat(min_x as f32 - p0.x) + LANE_RAMP;
    let y1x = y10 * dx4;
    let y2x = -(y20 * dx4);
    let mut dy4 = Vec4::splat(rect.min_y as f32 - p0.y);

    let y14 = y10 * 4.0;
    let y24 = -(y20 * 4.0);
    let y34 = y14 + y24;

    let mut blocked_lanes = ALL_LANES;
    for y in rect.min_y..rect.max_y {
        let mut px = x10.mul_add(dy4, y1x);
        let mut py = x20.mul_add(dy4, y2x);
        let mut pz = Vec4::ONE - py - px;

        let row = y * row_groups;
        count_add!(
            FUNCTION_COUNTERS.lane_groups_tested,
            (end_group - first_group) as u64
        );
        for index in row + first_group..row + end_group {
            let stored = target.load(index);
            let outside = px.cmplt(Vec4::ZERO) | py.cmplt(Vec4::ZERO) | pz.cmplt(Vec4::ZERO);

            if T::WRITE {
                let z = z10.mul_add(px, z20.mul_add(py, v0z));
                let blocked = outside | stored.cmple(z);
                if CULL {
                    blocked_lanes &= blocked.bitmask();
                }
                target.store(index, Vec4::select(blocked, stored, z));
            } else if CULL {
                let blocked = outside | stored.cmple(min_z);
                blocked_lanes &= blocked.bitmask();
            }

            px += y14;
            py += y24;
            pz -= y34;
        }

        if !T::WRITE && CULL && blocked_lanes != ALL_LANES {
            return true;
        }
        dy4 += Vec4::ONE;
    }

    CULL && blocked_lanes != ALL_LANES
}
