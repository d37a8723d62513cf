/// Near-plane clipping for clip-space triangles
/// A vertex is behind the near plane when its clip z is negative. Each of the
/// eight behind/in-front classifications maps to a fixed vertex pairing, so no
/// general polygon clipper is needed.
use super::lane::{self, behind_mask};
use super::scanline::{rasterize_triangle, DepthTarget, TriangleSetup};
use crate::count_call;
use crate::perf::FUNCTION_COUNTERS;
use glam::Vec4;

/// Zero, one or two triangles left after clipping. Winding is preserved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippedTriangles {
    triangles: [[Vec4; 3]; 2],
    count: usize,
}

impl ClippedTriangles {
    const EMPTY: Self = Self {
        triangles: [[Vec4::ZERO; 3]; 2],
        count: 0,
    };

    fn one(a: Vec4, b: Vec4, c: Vec4) -> Self {
        Self {
            triangles: [[a, b, c], [Vec4::ZERO; 3]],
            count: 1,
        }
    }

    fn two(first: [Vec4; 3], second: [Vec4; 3]) -> Self {
        Self {
            triangles: [first, second],
            count: 2,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[[Vec4; 3]] {
        &self.triangles[..self.count]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Point where edge `outside -> inside` crosses the near plane (z = 0).
#[inline(always)]
fn crossing(outside: Vec4, inside: Vec4) -> Vec4 {
    let t = outside.z / (outside.z - inside.z);
    lane::lerp_vertex(outside, inside, Vec4::splat(t))
}

/// Clip a clip-space triangle against the near plane.
pub fn clip_near(v0: Vec4, v1: Vec4, v2: Vec4) -> ClippedTriangles {
    match behind_mask(v0, v1, v2) {
        0b000 => ClippedTriangles::one(v0, v1, v2),
        0b001 => {
            let p0 = crossing(v0, v2);
            let p1 = crossing(v0, v1);
            ClippedTriangles::two([p0, p1, v1], [p0, v1, v2])
        }
        0b010 => {
            let p0 = crossing(v1, v0);
            let p1 = crossing(v1, v2);
            ClippedTriangles::two([p0, p1, v2], [v0, p0, v2])
        }
        0b100 => {
            let p0 = crossing(v2, v1);
            let p1 = crossing(v2, v0);
            ClippedTriangles::two([v0, p0, p1], [v0, v1, p0])
        }
        0b011 => ClippedTriangles::one(crossing(v0, v2), crossing(v1, v2), v2),
        0b101 => ClippedTriangles::one(crossing(v0, v1), v1, crossing(v2, v1)),
        0b110 => ClippedTriangles::one(v0, crossing(v1, v0), crossing(v2, v0)),
        _ => ClippedTriangles::EMPTY,
    }
}

/// Clip against the near plane, then rasterize every surviving piece with
/// in-place projection. In cull mode the pieces' results are OR'd.
#[inline]
pub fn rasterize_clipped<T: DepthTarget, const SIZE_X: usize, const CULL: bool, const CULL_BACKFACES: bool>(
    target: &mut T,
    max_xy: Vec4,
    v0: Vec4,
    v1: Vec4,
    v2: Vec4,
) -> bool {
    if behind_mask(v0, v1, v2) != 0 {
        count_call!(FUNCTION_COUNTERS.triangles_clipped);
    }
    let clipped = clip_near(v0, v1, v2);

    let mut visible = false;
    for &[a, b, c] in clipped.as_slice() {
        visible |= rasterize_triangle::<T, SIZE_X, CULL, true, CULL_BACKFACES>(
            target,
            max_xy,
            a,
            b,
            c,
            &TriangleSetup::default(),
        );
        if visible && CULL && !T::WRITE {
            return true;
        }
    }
    visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::scanline::edge_determinant;

    fn v(x: f32, y: f32, z: f32) -> Vec4 {
        Vec4::new(x, y, z, 1.0)
    }

    fn all_in_front(triangles: &ClippedTriangles) -> bool {
        triangles
            .as_slice()
            .iter()
            .flatten()
            .all(|p| p.z >= -1e-6)
    }

    #[test]
    fn unclipped_and_fully_behind() {
        let a = v(0.0, 0.0, 1.0);
        let b = v(1.0, 0.0, 2.0);
        let c = v(0.0, 1.0, 3.0);
        assert_eq!(clip_near(a, b, c).as_slice(), &[[a, b, c]]);

        let behind = clip_near(v(0.0, 0.0, -1.0), v(1.0, 0.0, -2.0), v(0.0, 1.0, -3.0));
        assert!(behind.is_empty());
    }

    #[test]
    fn one_vertex_behind_yields_two_triangles() {
        for rotation in 0..3 {
            let mut verts = [v(0.0, 0.0, -2.0), v(4.0, 0.0, 2.0), v(0.0, 4.0, 2.0)];
            verts.rotate_left(rotation);
            let clipped = clip_near(verts[0], verts[1], verts[2]);
            assert_eq!(clipped.len(), 2, "rotation {rotation}");
            assert!(all_in_front(&clipped), "rotation {rotation}");
        }
    }

    #[test]
    fn two_vertices_behind_yields_visible_corner() {
        for rotation in 0..3 {
            let mut verts = [v(0.0, 0.0, 2.0), v(4.0, 0.0, -2.0), v(0.0, 4.0, -2.0)];
            verts.rotate_left(rotation);
            let clipped = clip_near(verts[0], verts[1], verts[2]);
            assert_eq!(clipped.len(), 1, "rotation {rotation}");
            assert!(all_in_front(&clipped), "rotation {rotation}");

            // The surviving corner is untouched; the other two sit on the plane.
            let tri = clipped.as_slice()[0];
            assert!(tri.contains(&v(0.0, 0.0, 2.0)), "rotation {rotation}");
            assert_eq!(tri.iter().filter(|p| p.z.abs() < 1e-6).count(), 2);
        }
    }

    #[test]
    fn crossing_interpolates_whole_vertex() {
        let p = crossing(Vec4::new(0.0, 0.0, -1.0, 1.0), Vec4::new(4.0, 8.0, 3.0, 5.0));
        assert!((p - Vec4::new(1.0, 2.0, 0.0, 2.0)).abs().max_element() < 1e-6);
    }

    #[test]
    fn clipping_preserves_winding() {
        // Front-facing in y-down screen space when projected.
        let a = Vec4::new(0.0, 0.0, -1.0, 1.0);
        let b = Vec4::new(8.0, 0.0, 2.0, 1.0);
        let c = Vec4::new(0.0, 8.0, 2.0, 1.0);
        let original = edge_determinant(a, b, c).1;

        for rotation in 0..3 {
            let mut verts = [a, b, c];
            verts.rotate_left(rotation);
            let clipped = clip_near(verts[0], verts[1], verts[2]);
            for &[p0, p1, p2] in clipped.as_slice() {
                let det = edge_determinant(p0, p1, p2).1;
                assert!(det * original >= 0.0, "rotation {rotation} flipped winding");
            }
        }
    }
}
