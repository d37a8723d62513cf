/// Volume test façade of the coverage renderer
/// Occluder submission (batched triangles and indexed meshes) writes the
/// coverage buffer; box and quad queries read it. Every entry point transforms
/// its vertices once, decides between the near-clipping path and the cheaper
/// pre-projected path, and hands triangles to the scanline rasterizer.
///
/// Winding: occluders and box faces are counter-clockwise seen from their
/// front side in a right-handed world. The y-down screen flip reverses that,
/// so every triangle is passed to the rasterizer as `(v0, v2, v1)`.
use super::clipper::rasterize_clipped;
use super::depth_store::CullRenderer;
use super::lane::{self, LANES};
use super::scanline::{
    project, rasterize_triangle, setup_triangle, setup_with_determinant, DepthTarget, ReadPlane,
    WritePlane,
};
use crate::perf::FUNCTION_COUNTERS;
use crate::{count_add, count_call};
use glam::{Mat4, Vec3, Vec4};

/// Largest number of triangles accepted by one batched submission.
pub const MAX_BATCH_TRIANGLES: usize = 65535;

/// Default capacity of a [`VertexCache`].
pub const VERTEX_CACHE_COUNT: usize = 64 * 1024;

/// Index type of indexed occluder meshes.
pub type MeshIndex = u16;

/// [`CullRenderer::aabb_in_frustum`] flag: a tested face reached an uncovered sample.
pub const AABB_FACE_VISIBLE: u32 = 1;
/// [`CullRenderer::aabb_in_frustum`] flag: the box crosses the near plane.
pub const AABB_NEAR_CROSSING: u32 = 2;

/// Outward faces of a box as counter-clockwise corner quads.
/// Corner `i` takes max x when `i & 2`, max y when `i & 1`, max z when `i & 4`.
pub static BOX_FACES: [[usize; 4]; 6] = [
    [6, 2, 3, 7], // +X
    [0, 4, 5, 1], // -X
    [5, 7, 3, 1], // +Y
    [0, 2, 6, 4], // -Y
    [4, 6, 7, 5], // +Z
    [2, 0, 1, 3], // -Z
];

/// Clip-space vertices of an indexed mesh, kept between submissions so the
/// allocation is reused.
#[derive(Debug, Clone)]
pub struct VertexCache {
    vertices: Vec<Vec4>,
}

impl VertexCache {
    pub fn new() -> Self {
        Self::with_capacity(VERTEX_CACHE_COUNT)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.vertices.capacity()
    }

    #[inline]
    pub fn vertices(&self) -> &[Vec4] {
        &self.vertices
    }

    /// Transform every vertex of a strided position stream (`stride` floats per
    /// vertex, position first). Returns `true` if any vertex is behind the
    /// near plane. Grows the cache when the mesh is larger than its capacity.
    pub fn transform(&mut self, cols: &[Vec4; 4], vertices: &[f32], stride: usize) -> bool {
        self.vertices.clear();
        if stride < 3 {
            return false;
        }

        let mut behind = 0;
        self.vertices.extend(
            vertices
                .chunks(stride)
                .take_while(|v| v.len() >= 3)
                .map(|v| {
                    let clip = lane::transform_point(cols, v[0], v[1], v[2]);
                    behind |= clip.z.is_sign_negative() as u32;
                    clip
                }),
        );
        behind != 0
    }

    /// Perspective divide in place. Only valid when no vertex is behind.
    fn project_all(&mut self) {
        for v in &mut self.vertices {
            *v = project(*v);
        }
    }
}

impl Default for VertexCache {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn matrix_columns(m: &Mat4) -> [Vec4; 4] {
    [m.x_axis, m.y_axis, m.z_axis, m.w_axis]
}

/// Clip-space corners of an axis-aligned box, indexed as in [`BOX_FACES`].
#[inline]
fn box_corners(cols: &[Vec4; 4], min: Vec3, max: Vec3) -> [Vec4; 8] {
    std::array::from_fn(|i| {
        let x = if i & 2 != 0 { max.x } else { min.x };
        let y = if i & 1 != 0 { max.y } else { min.y };
        let z = if i & 4 != 0 { max.z } else { min.z };
        lane::transform_point(cols, x, y, z)
    })
}

/// Faces that can face a viewer at `view_pos`: at most one per axis.
fn facing_faces(min: Vec3, max: Vec3, view_pos: Vec3) -> impl Iterator<Item = &'static [usize; 4]> {
    let pick = |lo: f32, hi: f32, eye: f32, positive: usize| {
        if hi < eye {
            Some(&BOX_FACES[positive])
        } else if lo > eye {
            Some(&BOX_FACES[positive + 1])
        } else {
            None
        }
    };

    [
        pick(min.x, max.x, view_pos.x, 0),
        pick(min.y, max.y, view_pos.y, 2),
        pick(min.z, max.z, view_pos.z, 4),
    ]
    .into_iter()
    .flatten()
}

impl<const SIZE_X: usize, const SIZE_Y: usize> CullRenderer<SIZE_X, SIZE_Y> {
    /// Rasterize a batch of occluder triangles (three positions each, counter
    /// clockwise from the front). At most [`MAX_BATCH_TRIANGLES`] are used.
    pub fn rasterize_triangles(&mut self, view_proj: &Mat4, vertices: &[Vec3]) {
        let mut triangle_count = vertices.len() / 3;
        if triangle_count > MAX_BATCH_TRIANGLES {
            log::warn!(
                "occluder batch of {} triangles truncated to {}",
                triangle_count,
                MAX_BATCH_TRIANGLES
            );
            triangle_count = MAX_BATCH_TRIANGLES;
        }
        if triangle_count == 0 {
            return;
        }

        self.stats.record_submission(triangle_count);
        count_add!(FUNCTION_COUNTERS.triangles_submitted, triangle_count as u64);

        let cols = matrix_columns(view_proj);
        let mut target = WritePlane(self.zbuffer.groups_mut());

        for chunk in vertices[..triangle_count * 3].chunks(3 * LANES) {
            let mut clip = [Vec4::ZERO; 3 * LANES];
            let mut behind = 0;
            for (out, p) in clip.iter_mut().zip(chunk) {
                *out = lane::transform_point(&cols, p.x, p.y, p.z);
                behind |= out.z.is_sign_negative() as u32;
            }
            let in_chunk = chunk.len() / 3;

            if behind != 0 {
                for tri in clip[..in_chunk * 3].chunks_exact(3) {
                    rasterize_clipped::<_, SIZE_X, false, true>(
                        &mut target,
                        Self::MAX_XY,
                        tri[0],
                        tri[2],
                        tri[1],
                    );
                }
            } else {
                rasterize_unclipped_chunk::<SIZE_X>(&mut target, Self::MAX_XY, &clip, in_chunk);
            }
        }
    }

    /// Rasterize an indexed occluder mesh. Returns `true` if any triangle
    /// changed the coverage buffer.
    pub fn rasterize_mesh(
        &mut self,
        view_proj: &Mat4,
        cache: &mut VertexCache,
        indices: &[MeshIndex],
        vertices: &[f32],
        stride: usize,
    ) -> bool {
        if indices.len() < 3 || vertices.len() < 3 {
            return false;
        }
        self.stats.record_submission(indices.len() / 3);
        count_add!(FUNCTION_COUNTERS.triangles_submitted, (indices.len() / 3) as u64);

        let mut target = WritePlane(self.zbuffer.groups_mut());
        rasterize_indexed::<_, SIZE_X>(
            &mut target,
            Self::MAX_XY,
            view_proj,
            cache,
            indices,
            vertices,
            stride,
        )
    }

    /// Test an indexed mesh against the coverage buffer without writing.
    /// Returns `true` as soon as one triangle reaches an uncovered sample.
    pub fn test_mesh(
        &self,
        view_proj: &Mat4,
        cache: &mut VertexCache,
        indices: &[MeshIndex],
        vertices: &[f32],
        stride: usize,
    ) -> bool {
        if indices.len() < 3 || vertices.len() < 3 {
            return false;
        }
        let mut target = ReadPlane(self.zbuffer.groups());
        rasterize_indexed::<_, SIZE_X>(
            &mut target,
            Self::MAX_XY,
            view_proj,
            cache,
            indices,
            vertices,
            stride,
        )
    }

    /// Coarse box visibility with frustum rejection.
    ///
    /// Returns `0` when the box is fully behind the camera, off screen, or
    /// every face facing `view_pos` is covered. Otherwise returns
    /// [`AABB_FACE_VISIBLE`] (or'd with [`AABB_NEAR_CROSSING`] when the box
    /// crosses the near plane). A viewer inside the box's slab on every axis
    /// tests no face and the box is reported visible.
    pub fn aabb_in_frustum(&self, view_proj: &Mat4, min: Vec3, max: Vec3, view_pos: Vec3) -> u32 {
        count_call!(FUNCTION_COUNTERS.volumes_tested);
        let cols = matrix_columns(view_proj);
        let corners = box_corners(&cols, min, max);

        let behind = corners.iter().filter(|c| c.z < 0.0).count();
        if behind == corners.len() {
            return 0;
        }
        let crossing = behind > 0;

        let projected = corners.map(project);
        if !crossing && Self::outside_screen(&projected) {
            return 0;
        }

        let flags = if crossing { AABB_NEAR_CROSSING } else { 0 };
        let mut tested = false;
        for face in facing_faces(min, max, view_pos) {
            tested = true;
            if self.face_visible(face, &corners, &projected, crossing) {
                return AABB_FACE_VISIBLE | flags;
            }
        }

        if tested {
            count_call!(FUNCTION_COUNTERS.volumes_occluded);
            0
        } else {
            AABB_FACE_VISIBLE | flags
        }
    }

    /// Whether any face of the box facing `view_pos` reaches an uncovered
    /// sample. Boxes entirely in front of the near plane skip clipping.
    pub fn test_aabb(&self, view_proj: &Mat4, min: Vec3, max: Vec3, view_pos: Vec3) -> bool {
        count_call!(FUNCTION_COUNTERS.volumes_tested);
        let cols = matrix_columns(view_proj);
        let corners = box_corners(&cols, min, max);
        let crossing = corners.iter().any(|c| c.z < 0.0);
        let projected = if crossing {
            corners
        } else {
            corners.map(project)
        };

        let mut tested = false;
        for face in facing_faces(min, max, view_pos) {
            tested = true;
            if self.face_visible(face, &corners, &projected, crossing) {
                return true;
            }
        }

        if tested {
            count_call!(FUNCTION_COUNTERS.volumes_occluded);
        }
        !tested
    }

    /// Whether the quad `center ± axis_x ± axis_y` reaches an uncovered
    /// sample. Both windings are tested.
    pub fn test_quad(&self, view_proj: &Mat4, center: Vec3, axis_x: Vec3, axis_y: Vec3) -> bool {
        count_call!(FUNCTION_COUNTERS.volumes_tested);
        let cols = matrix_columns(view_proj);
        let corner = |p: Vec3| lane::transform_point(&cols, p.x, p.y, p.z);
        let v0 = corner(center - axis_x - axis_y);
        let v1 = corner(center - axis_x + axis_y);
        let v2 = corner(center + axis_x + axis_y);
        let v3 = corner(center + axis_x - axis_y);

        let mut target = ReadPlane(self.zbuffer.groups());
        let visible = rasterize_clipped::<_, SIZE_X, true, false>(&mut target, Self::MAX_XY, v2, v0, v3)
            || rasterize_clipped::<_, SIZE_X, true, false>(&mut target, Self::MAX_XY, v1, v0, v2);
        if !visible {
            count_call!(FUNCTION_COUNTERS.volumes_occluded);
        }
        visible
    }

    /// All projected corners beyond the same screen edge.
    fn outside_screen(projected: &[Vec4; 8]) -> bool {
        let size = Vec4::new(SIZE_X as f32, SIZE_Y as f32, 0.0, 0.0);
        let left_or_top = projected
            .iter()
            .fold(0b11, |mask, p| mask & (p.is_negative_bitmask() & 0b11));
        let right_or_bottom = projected
            .iter()
            .fold(0b11, |mask, p| mask & ((size - *p).is_negative_bitmask() & 0b11));
        left_or_top != 0 || right_or_bottom != 0
    }

    /// Rasterize one box face in cull mode. `projected` holds the divided
    /// corners unless the box crosses the near plane.
    fn face_visible(&self, face: &[usize; 4], corners: &[Vec4; 8], projected: &[Vec4; 8], crossing: bool) -> bool {
        let [a, b, c, d] = *face;
        let mut target = ReadPlane(self.zbuffer.groups());

        if crossing {
            return rasterize_clipped::<_, SIZE_X, true, true>(
                &mut target,
                Self::MAX_XY,
                corners[a],
                corners[c],
                corners[b],
            ) || rasterize_clipped::<_, SIZE_X, true, true>(
                &mut target,
                Self::MAX_XY,
                corners[a],
                corners[d],
                corners[c],
            );
        }

        [[a, c, b], [a, d, c]].into_iter().any(|[i0, i1, i2]| {
            let (p0, p1, p2) = (projected[i0], projected[i1], projected[i2]);
            match setup_triangle::<true>(p0, p1, p2, Self::MAX_XY) {
                Some(setup) => rasterize_triangle::<_, SIZE_X, true, false, true>(
                    &mut target,
                    Self::MAX_XY,
                    p0,
                    p1,
                    p2,
                    &setup,
                ),
                None => false,
            }
        })
    }
}

/// Up to four triangles fully in front of the near plane. Determinants of all
/// four are evaluated lane-parallel; back-facing or degenerate ones are
/// dropped before any per-pixel work.
fn rasterize_unclipped_chunk<const SIZE_X: usize>(
    target: &mut WritePlane<'_>,
    max_xy: Vec4,
    clip: &[Vec4; 3 * LANES],
    count: usize,
) {
    let p: [Vec4; 3 * LANES] = clip.map(project);

    // Screen order (v0, v2, v1) per triangle.
    let lanes = |vertex: usize, axis: usize| {
        Vec4::from_array(std::array::from_fn(|t| p[t * 3 + vertex][axis]))
    };
    let (x0, y0) = (lanes(0, 0), lanes(0, 1));
    let x10 = lanes(2, 0) - x0;
    let y10 = lanes(2, 1) - y0;
    let x20 = lanes(1, 0) - x0;
    let y20 = lanes(1, 1) - y0;
    let det = x10 * y20 - y10 * x20;
    let front = (det.cmpgt(Vec4::splat(f32::EPSILON)).bitmask()) & ((1 << count) - 1);

    for t in 0..count {
        if front & (1 << t) == 0 {
            count_call!(FUNCTION_COUNTERS.triangles_backface_rejected);
            continue;
        }
        let (p0, p1, p2) = (p[t * 3], p[t * 3 + 2], p[t * 3 + 1]);
        let v210 = Vec4::new(x10[t], y10[t], x20[t], y20[t]);
        if let Some(setup) = setup_with_determinant(p0, p1, p2, v210, det[t], max_xy) {
            rasterize_triangle::<_, SIZE_X, false, false, true>(target, max_xy, p0, p1, p2, &setup);
        }
    }
}

/// Shared walk of an indexed mesh for both write and cull targets.
fn rasterize_indexed<T: DepthTarget, const SIZE_X: usize>(
    target: &mut T,
    max_xy: Vec4,
    view_proj: &Mat4,
    cache: &mut VertexCache,
    indices: &[MeshIndex],
    vertices: &[f32],
    stride: usize,
) -> bool {
    let cols = matrix_columns(view_proj);
    let any_behind = cache.transform(&cols, vertices, stride);
    if !any_behind {
        cache.project_all();
    }
    let cached = cache.vertices();

    let mut visible = false;
    for tri in indices.chunks_exact(3) {
        let (Some(&v0), Some(&v1), Some(&v2)) = (
            cached.get(tri[0] as usize),
            cached.get(tri[1] as usize),
            cached.get(tri[2] as usize),
        ) else {
            continue;
        };

        visible |= if any_behind {
            rasterize_clipped::<T, SIZE_X, true, false>(target, max_xy, v0, v2, v1)
        } else {
            match setup_triangle::<false>(v0, v2, v1, max_xy) {
                Some(setup) => rasterize_triangle::<T, SIZE_X, true, false, false>(
                    target, max_xy, v0, v2, v1, &setup,
                ),
                None => false,
            }
        };

        if visible && !T::WRITE {
            return true;
        }
    }
    visible
}
