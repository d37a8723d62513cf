/// Temporal reprojection of a hardware depth snapshot into the coverage buffer
///
/// Four stages run in order, each over disjoint row bands:
/// 1. `download_hardware_depth` copies the snapshot into the primary plane
/// 2. `reproject_hw_depth_buffer` scatters every sample into the current
///    camera's screen, one scratch plane per worker
/// 3. `merge_reproject_hw_depth_buffer` folds the scratch planes together
/// 4. `reproject_hw_depth_buffer_after_merge` fills scatter holes from the
///    3x3 neighbourhood, applies the bias and writes the primary plane
///
/// The row-band entry points are meant to be driven by an external job
/// system; [`CullRenderer::reproject_parallel`] drives all three parallel
/// stages on rayon.
use super::depth_store::{CullRenderer, DepthPlane};
use super::lane::{self, LANES};
use crate::error::CullError;
use crate::perf::FUNCTION_COUNTERS;
use crate::{count_add, perf_scope};
use glam::{Mat4, Vec4};
use rayon::prelude::*;
use std::ops::Range;

/// Worker-thread queries of the job system driving the stages.
pub trait JobSystem {
    fn num_worker_threads(&self) -> usize;

    /// Index of the calling worker, or `None` off the worker pool.
    fn worker_thread_id(&self) -> Option<usize>;
}

/// The global rayon pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayonJobs;

impl JobSystem for RayonJobs {
    fn num_worker_threads(&self) -> usize {
        rayon::current_num_threads()
    }

    fn worker_thread_id(&self) -> Option<usize> {
        rayon::current_thread_index()
    }
}

/// Source of the previous frame's hardware depth.
pub trait OcclusionSource {
    /// Fill `depth` (row-major, one non-linear 0..1 sample per coverage pixel)
    /// and `view_proj` (the view-projection the samples were rendered with).
    /// Returns `false` when no snapshot is available this frame.
    fn occlusion_buffer(&mut self, depth: &mut [f32], view_proj: &mut Mat4) -> bool;
}

/// Camera planes and tuning for one reprojection pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReprojectionParams {
    pub near_plane: f32,
    pub far_plane: f32,
    /// Snapshot depths below this are written in place, at the stored depth
    /// of the view distance `nearest_max` encodes, instead of being
    /// reprojected. 0 disables it.
    pub nearest_max: f32,
    /// Negative: added as `-bias`. Positive: `depth += bias * depth + bias`.
    pub bias: f32,
}

impl Default for ReprojectionParams {
    fn default() -> Self {
        Self {
            near_plane: 0.1,
            far_plane: 1000.0,
            nearest_max: 0.0,
            bias: 0.0,
        }
    }
}

impl ReprojectionParams {
    pub fn validate(&self) -> Result<(), CullError> {
        if !(self.near_plane.is_finite() && self.near_plane > 0.0) {
            return Err(CullError::InvalidParams(format!(
                "near plane must be positive, got {}",
                self.near_plane
            )));
        }
        if !(self.far_plane.is_finite() && self.far_plane > self.near_plane) {
            return Err(CullError::InvalidParams(format!(
                "far plane {} must lie beyond near plane {}",
                self.far_plane, self.near_plane
            )));
        }
        if !(0.0..=1.0).contains(&self.nearest_max) {
            return Err(CullError::InvalidParams(format!(
                "nearest max {} outside 0..1",
                self.nearest_max
            )));
        }
        if !self.bias.is_finite() {
            return Err(CullError::InvalidParams("bias must be finite".to_string()));
        }
        Ok(())
    }
}

/// Everything the scatter stage needs, derived once per pass.
#[derive(Debug, Clone, Copy)]
struct ReprojectTransform {
    /// Pixel (x, y, hardware depth) to homogeneous world position.
    to_world: Mat4,
    current: Mat4,
    nearest_max: f32,
    /// Stored depth of the view distance whose hardware depth is `nearest_max`.
    nearest_depth: f32,
    far_plane: f32,
}

impl ReprojectTransform {
    fn new<const SIZE_X: usize, const SIZE_Y: usize>(
        snapshot_view_proj: &Mat4,
        current: &Mat4,
        params: &ReprojectionParams,
    ) -> Self {
        let (near, far) = (params.near_plane, params.far_plane);
        let a = far / (far - near);
        let b = far * near / (near - far);

        let (w, h) = (SIZE_X as f32, SIZE_Y as f32);
        // Pixel index to NDC at the pixel centre, y flipped.
        let from_screen = Mat4::from_cols(
            Vec4::new(2.0 / w, 0.0, 0.0, 0.0),
            Vec4::new(0.0, -2.0 / h, 0.0, 0.0),
            Vec4::new(0.0, 0.0, 1.0, 0.0),
            Vec4::new(-1.0 + 1.0 / w, 1.0 - 1.0 / h, 0.0, 1.0),
        );

        Self {
            to_world: snapshot_view_proj.inverse() * from_screen,
            current: *current,
            nearest_max: params.nearest_max,
            nearest_depth: a.mul_add(b / (params.nearest_max - a), b),
            far_plane: far,
        }
    }
}

/// Clamp a `[start, start + count)` row band to the buffer height.
#[inline]
fn row_band(start_line: usize, num_lines: usize, size_y: usize) -> Range<usize> {
    let start = start_line.min(size_y);
    start..start.saturating_add(num_lines).min(size_y)
}

/// Stage 2 over `rows` of the snapshot in `src`, scattering into `scratch`.
fn reproject_rows<const SIZE_X: usize, const SIZE_Y: usize>(
    src: &[Vec4],
    scratch: &mut [Vec4],
    xf: &ReprojectTransform,
    rows: Range<usize>,
) {
    let row_groups = lane::groups_per_row(SIZE_X);
    count_add!(
        FUNCTION_COUNTERS.pixels_reprojected,
        (rows.len() * SIZE_X) as u64
    );

    for y in rows {
        for gx in 0..row_groups {
            let depths = src[y * row_groups + gx];
            for l in 0..LANES {
                let x = gx * LANES + l;
                let d = depths[l];

                let world = xf.to_world * Vec4::new(x as f32, y as f32, d, 1.0);
                let world = world / world.w.max(f32::EPSILON);
                let screen = xf.current * world;
                let new_depth = screen.z;
                if !(new_depth > 0.0) {
                    continue;
                }

                let (dst_x, dst_y, depth) = if d < xf.nearest_max {
                    (x as i64, y as i64, xf.nearest_depth)
                } else {
                    let inv_w = screen.w.max(f32::EPSILON).recip();
                    (
                        (screen.x * inv_w).floor() as i64,
                        (screen.y * inv_w).floor() as i64,
                        new_depth,
                    )
                };

                if dst_x < 0 || dst_y < 0 || dst_x >= SIZE_X as i64 || dst_y >= SIZE_Y as i64 {
                    continue;
                }
                let index = dst_x as usize + dst_y as usize * SIZE_X;
                let group = &mut scratch[index / LANES];
                let existing = group[index % LANES];
                let existing = if existing <= 0.0 { xf.far_plane } else { existing };
                group[index % LANES] = existing.min(depth);
            }
        }
    }
}

/// Stage 3: fold every worker plane into `merged`, which starts at
/// `first_group` of the full plane. Zeros are "no sample" and never win.
fn merge_rows(workers: &[DepthPlane], merged: &mut [Vec4], first_group: usize) {
    for plane in workers {
        let src = &plane.groups()[first_group..first_group + merged.len()];
        for (dst, &s) in merged.iter_mut().zip(src) {
            let d = Vec4::select(dst.cmple(Vec4::ZERO), s, *dst);
            let s = Vec4::select(s.cmple(Vec4::ZERO), d, s);
            *dst = d.max(s);
        }
    }
}

/// Stage 4 for the rows held in `dst` (starting at `first_row`), reading the
/// fully merged plane.
fn dilate_rows<const SIZE_X: usize, const SIZE_Y: usize>(
    merged: &[Vec4],
    dst: &mut [Vec4],
    first_row: usize,
    far_plane: f32,
    bias: f32,
) {
    let row_groups = lane::groups_per_row(SIZE_X);
    let far = Vec4::splat(far_plane);
    let bias_add = Vec4::splat(if bias < 0.0 { -bias } else { 0.0 });
    let bias_mul = Vec4::splat(if bias > 0.0 { bias } else { 0.0 });

    for (r, row) in dst.chunks_exact_mut(row_groups).enumerate() {
        let y = first_row + r;
        let (up, down) = (y.saturating_sub(1), (y + 1).min(SIZE_Y - 1));
        let column_max = |g: usize| {
            merged[up * row_groups + g]
                .max(merged[y * row_groups + g])
                .max(merged[down * row_groups + g])
        };

        // Columns outside the buffer contribute nothing.
        let mut left = Vec4::ZERO;
        let mut centre = column_max(0);
        for (g, out) in row.iter_mut().enumerate() {
            let right = if g + 1 < row_groups {
                column_max(g + 1)
            } else {
                Vec4::ZERO
            };

            let from_left = Vec4::new(left.w, centre.x, centre.y, centre.z);
            let from_right = Vec4::new(centre.y, centre.z, centre.w, right.x);
            let neighbourhood = centre.max(from_left).max(from_right);
            let filled = Vec4::select(neighbourhood.cmple(Vec4::ZERO), far, neighbourhood);

            let own = merged[y * row_groups + g];
            let mut depth = Vec4::select(own.cmple(Vec4::ZERO), filled, own);
            depth += bias_add;
            depth += bias_mul.mul_add(depth, bias_mul);
            *out = depth;

            left = centre;
            centre = right;
        }
    }
}

impl<const SIZE_X: usize, const SIZE_Y: usize> CullRenderer<SIZE_X, SIZE_Y> {
    /// Stage 2 for rows `[start_line, start_line + num_lines)`, scattering into
    /// the calling worker's scratch plane.
    ///
    /// # Panics
    /// If called off the job system's workers, or by a worker whose id is not
    /// below the count passed to [`Self::prepare`].
    pub fn reproject_hw_depth_buffer<J: JobSystem + ?Sized>(
        &mut self,
        jobs: &J,
        current: &Mat4,
        params: &ReprojectionParams,
        start_line: usize,
        num_lines: usize,
    ) {
        let workers = self.worker_planes.len();
        let worker = match jobs.worker_thread_id() {
            Some(id) if id < workers => id,
            Some(id) => panic!(
                "{}",
                CullError::WorkerOutOfRange {
                    worker: id,
                    workers
                }
            ),
            None => panic!("reproject_hw_depth_buffer called from a non-worker thread"),
        };

        let xf = ReprojectTransform::new::<SIZE_X, SIZE_Y>(&self.reproject, current, params);
        let rows = row_band(start_line, num_lines, SIZE_Y);
        reproject_rows::<SIZE_X, SIZE_Y>(
            self.zbuffer.groups(),
            self.worker_planes[worker].groups_mut(),
            &xf,
            rows,
        );
    }

    /// Stage 3 for rows `[start_line, start_line + num_lines)`.
    pub fn merge_reproject_hw_depth_buffer(&mut self, start_line: usize, num_lines: usize) {
        let row_groups = lane::groups_per_row(SIZE_X);
        let rows = row_band(start_line, num_lines, SIZE_Y);
        let groups = rows.start * row_groups..rows.end * row_groups;

        merge_rows(
            &self.worker_planes,
            &mut self.merged.groups_mut()[groups.clone()],
            groups.start,
        );
    }

    /// Stage 4 for rows `[start_line, start_line + num_lines)`. Stage 3 must
    /// have finished for every row first.
    pub fn reproject_hw_depth_buffer_after_merge(
        &mut self,
        params: &ReprojectionParams,
        start_line: usize,
        num_lines: usize,
    ) {
        let row_groups = lane::groups_per_row(SIZE_X);
        let rows = row_band(start_line, num_lines, SIZE_Y);

        dilate_rows::<SIZE_X, SIZE_Y>(
            self.merged.groups(),
            &mut self.zbuffer.groups_mut()[rows.start * row_groups..rows.end * row_groups],
            rows.start,
            params.far_plane,
            params.bias,
        );
    }

    /// Run stages 2 to 4 on the rayon pool, one row band per prepared worker,
    /// joining between stages. Call after a successful
    /// [`Self::download_hardware_depth`].
    pub fn reproject_parallel(&mut self, current: &Mat4, params: &ReprojectionParams) -> Result<(), CullError> {
        params.validate()?;
        if !self.is_prepared() {
            return Err(CullError::NotPrepared);
        }
        perf_scope!("reproject_parallel");

        let xf = ReprojectTransform::new::<SIZE_X, SIZE_Y>(&self.reproject, current, params);
        let row_groups = lane::groups_per_row(SIZE_X);
        let band = SIZE_Y.div_ceil(self.worker_planes.len());

        let Self {
            zbuffer,
            worker_planes,
            merged,
            ..
        } = self;

        {
            perf_scope!("reproject_scatter");
            let src = zbuffer.groups();
            worker_planes
                .par_iter_mut()
                .enumerate()
                .for_each(|(k, plane)| {
                    let rows = row_band(k * band, band, SIZE_Y);
                    reproject_rows::<SIZE_X, SIZE_Y>(src, plane.groups_mut(), &xf, rows);
                });
        }

        {
            perf_scope!("reproject_merge");
            let workers: &[DepthPlane] = worker_planes;
            merged
                .groups_mut()
                .par_chunks_mut(band * row_groups)
                .enumerate()
                .for_each(|(k, chunk)| merge_rows(workers, chunk, k * band * row_groups));
        }

        {
            perf_scope!("reproject_dilate");
            let merged = merged.groups();
            zbuffer
                .groups_mut()
                .par_chunks_mut(band * row_groups)
                .enumerate()
                .for_each(|(k, chunk)| {
                    dilate_rows::<SIZE_X, SIZE_Y>(merged, chunk, k * band, params.far_plane, params.bias)
                });
        }

        Ok(())
    }
}
