/// Depth buffer store for the coverage renderer
/// Owns the primary coverage plane, the per-worker reprojection scratch planes
/// and the merged plane. Planes are stored as 4-wide lane groups so every
/// rasterizer load/store is aligned by construction.
use super::lane::{self, LANES};
use super::reprojection::{JobSystem, OcclusionSource};
use crate::perf::FUNCTION_COUNTERS;
use crate::{count_call, perf_scope};
use glam::{Mat4, Vec4};

/// Depth of a cell nothing has been rasterized into. Larger than any real
/// linear depth, so a freshly cleared buffer never occludes anything.
pub const FAR_SENTINEL: f32 = 9_999_999_999.0;

/// One coverage-buffer-shaped array of depths, grouped in lanes of four.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthPlane {
    groups: Vec<Vec4>,
}

impl DepthPlane {
    /// Plane of `pixels` samples (a multiple of 4), every sample set to `value`.
    pub fn new(pixels: usize, value: f32) -> Self {
        Self {
            groups: vec![Vec4::splat(value); pixels / LANES],
        }
    }

    #[inline]
    pub fn fill(&mut self, value: f32) {
        self.groups.fill(Vec4::splat(value));
    }

    #[inline]
    pub fn groups(&self) -> &[Vec4] {
        &self.groups
    }

    #[inline]
    pub fn groups_mut(&mut self) -> &mut [Vec4] {
        &mut self.groups
    }

    /// Number of scalar samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len() * LANES
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Scalar sample at linear pixel index `index` (`x + y * width`).
    #[inline]
    pub fn get(&self, index: usize) -> f32 {
        self.groups[index / LANES][index % LANES]
    }

    #[inline]
    pub fn set(&mut self, index: usize, value: f32) {
        self.groups[index / LANES][index % LANES] = value;
    }
}

/// Per-pass instrumentation, reset by [`CullRenderer::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CullStats {
    /// Occluder submissions (batched or indexed).
    pub draw_calls: u32,
    /// Occluder triangles submitted.
    pub poly_count: u32,
}

impl CullStats {
    /// Count one occluder submission. Saturates instead of overflowing on
    /// very long passes.
    #[inline]
    pub(crate) fn record_submission(&mut self, triangles: usize) {
        self.draw_calls = self.draw_calls.saturating_add(1);
        let triangles = u32::try_from(triangles).unwrap_or(u32::MAX);
        self.poly_count = self.poly_count.saturating_add(triangles);
    }
}

/// Software coverage buffer of `SIZE_X` x `SIZE_Y` depth samples.
///
/// Occluders are rasterized into it with the write paths, volumes are tested
/// against it with the read-only paths, and the reprojection pipeline can
/// seed it from the previous frame's hardware depth.
pub struct CullRenderer<const SIZE_X: usize, const SIZE_Y: usize> {
    pub(crate) zbuffer: DepthPlane,
    /// View-projection the last hardware snapshot was rendered with.
    pub(crate) reproject: Mat4,
    pub(crate) worker_planes: Vec<DepthPlane>,
    pub(crate) merged: DepthPlane,
    pub(crate) snapshot: Vec<f32>,
    pub(crate) stats: CullStats,
}

impl<const SIZE_X: usize, const SIZE_Y: usize> CullRenderer<SIZE_X, SIZE_Y> {
    const SIZE_CHECK: () = assert!(
        SIZE_X > 0 && SIZE_Y > 0 && SIZE_X % LANES == 0 && SIZE_Y % LANES == 0,
        "coverage buffer dimensions must be non-zero multiples of 4"
    );

    /// `(SIZE_X, SIZE_Y, SIZE_X, SIZE_Y)`, the clamp bound for screen rects.
    pub(crate) const MAX_XY: Vec4 = Vec4::new(
        SIZE_X as f32,
        SIZE_Y as f32,
        SIZE_X as f32,
        SIZE_Y as f32,
    );

    pub const PIXELS: usize = SIZE_X * SIZE_Y;

    pub fn new() -> Self {
        let () = Self::SIZE_CHECK;

        Self {
            zbuffer: DepthPlane::new(Self::PIXELS, FAR_SENTINEL),
            reproject: Mat4::IDENTITY,
            worker_planes: Vec::new(),
            merged: DepthPlane::new(Self::PIXELS, 0.0),
            snapshot: vec![0.0; Self::PIXELS],
            stats: CullStats::default(),
        }
    }

    #[inline]
    pub const fn size_x(&self) -> usize {
        SIZE_X
    }

    #[inline]
    pub const fn size_y(&self) -> usize {
        SIZE_Y
    }

    /// Allocate one reprojection scratch plane per worker. Does nothing if
    /// the renderer is already prepared or `num_workers` is zero.
    pub fn prepare(&mut self, num_workers: usize) {
        if self.is_prepared() || num_workers == 0 {
            return;
        }
        self.worker_planes = (0..num_workers)
            .map(|_| DepthPlane::new(Self::PIXELS, 0.0))
            .collect();
        log::debug!(
            "coverage buffer {}x{} prepared for {} workers",
            SIZE_X,
            SIZE_Y,
            num_workers
        );
    }

    /// [`Self::prepare`] with one scratch plane per worker of `jobs`.
    pub fn prepare_for<J: JobSystem + ?Sized>(&mut self, jobs: &J) {
        self.prepare(jobs.num_worker_threads());
    }

    #[inline]
    pub fn is_prepared(&self) -> bool {
        !self.worker_planes.is_empty()
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.worker_planes.len()
    }

    /// Reset every sample to [`FAR_SENTINEL`] and the per-pass counters.
    pub fn clear(&mut self) {
        count_call!(FUNCTION_COUNTERS.buffer_clears);
        self.zbuffer.fill(FAR_SENTINEL);
        self.stats = CullStats::default();
    }

    /// Snapshot the hardware depth buffer and its view-projection.
    ///
    /// On success the primary plane holds the raw non-linear depth samples
    /// (input of [`Self::reproject_hw_depth_buffer`]) and the scratch and
    /// merged planes are zeroed. On failure the primary plane is cleared so
    /// every volume tests visible, and `false` is returned.
    pub fn download_hardware_depth<S: OcclusionSource + ?Sized>(&mut self, source: &mut S) -> bool {
        perf_scope!("download_hardware_depth");

        let mut view_proj = Mat4::IDENTITY;
        if !source.occlusion_buffer(&mut self.snapshot, &mut view_proj) {
            log::warn!("hardware depth snapshot unavailable, coverage buffer cleared to far");
            self.clear();
            return false;
        }

        self.reproject = view_proj;
        for (group, samples) in self
            .zbuffer
            .groups_mut()
            .iter_mut()
            .zip(self.snapshot.chunks_exact(LANES))
        {
            *group = Vec4::from_slice(samples);
        }

        for plane in &mut self.worker_planes {
            plane.fill(0.0);
        }
        self.merged.fill(0.0);
        true
    }

    /// View-projection of the last successful hardware snapshot.
    #[inline]
    pub fn snapshot_view_proj(&self) -> Mat4 {
        self.reproject
    }

    #[inline]
    pub fn stats(&self) -> CullStats {
        self.stats
    }

    /// Stored depth at pixel `(x, y)`.
    #[inline]
    pub fn depth_at(&self, x: usize, y: usize) -> f32 {
        self.zbuffer.groups()[lane::group_index(x, y, SIZE_X)][x % LANES]
    }

    /// The primary coverage plane.
    #[inline]
    pub fn depth_plane(&self) -> &DepthPlane {
        &self.zbuffer
    }

    /// The merged reprojection plane of the last pass.
    #[inline]
    pub fn merged_plane(&self) -> &DepthPlane {
        &self.merged
    }
}

impl<const SIZE_X: usize, const SIZE_Y: usize> Default for CullRenderer<SIZE_X, SIZE_Y> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSnapshot {
        depth: f32,
        view_proj: Mat4,
        available: bool,
    }

    impl OcclusionSource for FixedSnapshot {
        fn occlusion_buffer(&mut self, depth: &mut [f32], view_proj: &mut Mat4) -> bool {
            if !self.available {
                return false;
            }
            depth.fill(self.depth);
            *view_proj = self.view_proj;
            true
        }
    }

    #[test]
    fn new_buffer_is_far_everywhere() {
        let renderer = CullRenderer::<16, 8>::new();
        assert_eq!(renderer.size_x(), 16);
        assert_eq!(renderer.size_y(), 8);
        assert_eq!(renderer.depth_plane().len(), 128);
        for y in 0..8 {
            for x in 0..16 {
                assert_eq!(renderer.depth_at(x, y), FAR_SENTINEL);
            }
        }
    }

    #[test]
    fn prepare_is_idempotent() {
        let mut renderer = CullRenderer::<8, 8>::new();
        assert!(!renderer.is_prepared());

        renderer.prepare(0);
        assert!(!renderer.is_prepared(), "zero workers leaves the store unprepared");

        renderer.prepare(3);
        assert_eq!(renderer.num_workers(), 3);

        renderer.prepare(8);
        assert_eq!(renderer.num_workers(), 3, "second prepare must not reallocate");
    }

    #[test]
    fn clear_resets_depth_and_stats() {
        let mut renderer = CullRenderer::<8, 4>::new();
        renderer.zbuffer.set(5, 1.0);
        renderer.stats.draw_calls = 4;
        renderer.stats.poly_count = 100;

        renderer.clear();

        assert_eq!(renderer.depth_at(5, 0), FAR_SENTINEL);
        assert_eq!(renderer.stats(), CullStats::default());
    }

    #[test]
    fn stats_saturate_instead_of_overflowing() {
        let mut stats = CullStats {
            draw_calls: u32::MAX,
            poly_count: u32::MAX - 2,
        };
        stats.record_submission(10);
        assert_eq!(stats.draw_calls, u32::MAX);
        assert_eq!(stats.poly_count, u32::MAX);

        let mut fresh = CullStats::default();
        fresh.record_submission(7);
        assert_eq!(fresh, CullStats { draw_calls: 1, poly_count: 7 });
    }

    #[test]
    fn download_copies_snapshot_and_zeroes_scratch() {
        let mut renderer = CullRenderer::<8, 4>::new();
        renderer.prepare(2);
        renderer.worker_planes[1].fill(3.0);
        renderer.merged.fill(7.0);

        let view_proj = Mat4::from_scale(glam::Vec3::splat(2.0));
        let mut source = FixedSnapshot {
            depth: 0.25,
            view_proj,
            available: true,
        };

        assert!(renderer.download_hardware_depth(&mut source));
        assert_eq!(renderer.depth_at(7, 3), 0.25);
        assert_eq!(renderer.snapshot_view_proj(), view_proj);
        assert!(renderer.worker_planes.iter().all(|p| p.groups().iter().all(|g| *g == Vec4::ZERO)));
        assert!(renderer.merged.groups().iter().all(|g| *g == Vec4::ZERO));
    }

    #[test]
    fn failed_download_clears_to_far() {
        let mut renderer = CullRenderer::<8, 4>::new();
        renderer.zbuffer.fill(1.0);

        let mut source = FixedSnapshot {
            depth: 0.5,
            view_proj: Mat4::IDENTITY,
            available: false,
        };

        assert!(!renderer.download_hardware_depth(&mut source));
        assert_eq!(renderer.depth_at(0, 0), FAR_SENTINEL);
        assert_eq!(renderer.depth_at(7, 3), FAR_SENTINEL);
    }
}
