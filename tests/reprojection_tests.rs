//! Reprojection pipeline driven through the public API
//!
//! A synthetic hardware snapshot of a wall at a fixed view depth is
//! reprojected into cameras that stay put, back away or turn around.
use coverage_cull::{
    coverage_projection, CullError, CullRenderer, OcclusionSource, RayonJobs, ReprojectionParams,
    FAR_SENTINEL,
};
use glam::{Mat4, Vec3, Vec4};

const SIZE: usize = 64;
const NEAR: f32 = 0.5;
const FAR: f32 = 50.0;
const WALL_DEPTH: f32 = 10.0;

type Renderer = CullRenderer<SIZE, SIZE>;

fn projection() -> Mat4 {
    Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, NEAR, FAR)
}

fn params() -> ReprojectionParams {
    ReprojectionParams {
        near_plane: NEAR,
        far_plane: FAR,
        ..Default::default()
    }
}

fn coverage_depth(view_depth: f32) -> f32 {
    FAR / (FAR - NEAR) * (view_depth - NEAR)
}

/// Hardware depth of a wall facing the camera at `WALL_DEPTH`.
struct WallSnapshot {
    available: bool,
}

impl OcclusionSource for WallSnapshot {
    fn occlusion_buffer(&mut self, depth: &mut [f32], view_proj: &mut Mat4) -> bool {
        if !self.available {
            return false;
        }
        let ndc = projection() * Vec4::new(0.0, 0.0, -WALL_DEPTH, 1.0);
        depth.fill(ndc.z / ndc.w);
        *view_proj = projection();
        true
    }
}

fn downloaded(workers: usize) -> Renderer {
    let mut renderer = Renderer::new();
    renderer.prepare(workers);
    assert!(renderer.download_hardware_depth(&mut WallSnapshot { available: true }));
    renderer
}

#[test]
fn static_camera_recovers_wall_depth() {
    let mut renderer = downloaded(3);
    let current = coverage_projection(&projection(), SIZE, SIZE);
    renderer
        .reproject_parallel(&current, &params())
        .expect("valid pass");

    let expected = coverage_depth(WALL_DEPTH);
    for y in 0..SIZE {
        for x in 0..SIZE {
            let got = renderer.depth_at(x, y);
            assert!(
                (got - expected).abs() < expected * 1e-2,
                "pixel ({x}, {y}) = {got}, expected {expected}"
            );
        }
    }
}

#[test]
fn camera_backing_away_sees_wall_further_and_smaller() {
    let mut renderer = downloaded(4);
    let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0));
    let current = coverage_projection(&(projection() * view), SIZE, SIZE);
    renderer
        .reproject_parallel(&current, &params())
        .expect("valid pass");

    let expected = coverage_depth(WALL_DEPTH + 1.0);
    for y in 8..56 {
        for x in 8..56 {
            let got = renderer.depth_at(x, y);
            assert!(
                (got - expected).abs() < expected * 1e-2,
                "pixel ({x}, {y}) = {got}, expected {expected}"
            );
        }
    }

    // The shrunken wall leaves the corners without samples.
    assert_eq!(renderer.depth_at(0, 0), FAR);
    assert_eq!(renderer.depth_at(SIZE - 1, SIZE - 1), FAR);
}

#[test]
fn camera_turned_around_falls_back_to_far_plane() {
    let mut renderer = downloaded(2);
    let view = Mat4::from_rotation_y(std::f32::consts::PI);
    let current = coverage_projection(&(projection() * view), SIZE, SIZE);
    renderer
        .reproject_parallel(&current, &params())
        .expect("valid pass");

    assert!(renderer.merged_plane().groups().iter().all(|g| *g == Vec4::ZERO));
    assert!(renderer.depth_plane().groups().iter().all(|g| *g == Vec4::splat(FAR)));
}

#[test]
fn nearest_samples_stay_in_place_at_fixed_depth() {
    let mut renderer = downloaded(2);
    let current = coverage_projection(&projection(), SIZE, SIZE);
    // Every sample is below 1.0, and hardware depth 1.0 is the far plane.
    let params = ReprojectionParams {
        nearest_max: 1.0,
        ..params()
    };
    renderer.reproject_parallel(&current, &params).expect("valid pass");

    for y in 0..SIZE {
        for x in 0..SIZE {
            assert!((renderer.depth_at(x, y) - FAR).abs() < FAR * 1e-3);
        }
    }
}

#[test]
fn stages_driven_by_external_pool_match_parallel_driver() {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(2)
        .build()
        .expect("thread pool");
    let view = Mat4::from_translation(Vec3::new(0.5, 0.0, -2.0));
    let current = coverage_projection(&(projection() * view), SIZE, SIZE);
    let params = ReprojectionParams {
        bias: 0.05,
        ..params()
    };

    let mut staged = downloaded(2);
    pool.install(|| {
        for band in (0..SIZE).step_by(16) {
            staged.reproject_hw_depth_buffer(&RayonJobs, &current, &params, band, 16);
        }
    });
    for band in (0..SIZE).step_by(16) {
        staged.merge_reproject_hw_depth_buffer(band, 16);
    }
    for band in (0..SIZE).step_by(16) {
        staged.reproject_hw_depth_buffer_after_merge(&params, band, 16);
    }

    let mut driven = downloaded(2);
    driven.reproject_parallel(&current, &params).expect("valid pass");

    assert_eq!(staged.merged_plane(), driven.merged_plane());
    assert_eq!(staged.depth_plane(), driven.depth_plane());
}

#[test]
fn reprojected_wall_occludes_volumes_behind_it() {
    let mut renderer = downloaded(2);
    let current = coverage_projection(&projection(), SIZE, SIZE);
    renderer
        .reproject_parallel(&current, &params())
        .expect("valid pass");

    assert!(!renderer.test_aabb(
        &current,
        Vec3::new(-1.0, -1.0, -20.0),
        Vec3::new(1.0, 1.0, -18.0),
        Vec3::ZERO
    ));
    assert!(renderer.test_aabb(
        &current,
        Vec3::new(-1.0, -1.0, -6.0),
        Vec3::new(1.0, 1.0, -4.0),
        Vec3::ZERO
    ));
}

#[test]
fn missing_snapshot_leaves_everything_visible() {
    let mut renderer = Renderer::new();
    renderer.prepare(2);
    let current = coverage_projection(&projection(), SIZE, SIZE);
    let wall = [
        Vec3::new(-50.0, -50.0, -5.0),
        Vec3::new(50.0, -50.0, -5.0),
        Vec3::new(0.0, 60.0, -5.0),
    ];
    renderer.rasterize_triangles(&current, &wall);
    let (min, max) = (Vec3::new(-1.0, -1.0, -9.0), Vec3::new(1.0, 1.0, -8.0));
    assert!(!renderer.test_aabb(&current, min, max, Vec3::ZERO));

    assert!(!renderer.download_hardware_depth(&mut WallSnapshot { available: false }));
    assert_eq!(renderer.depth_at(SIZE / 2, SIZE / 2), FAR_SENTINEL);
    assert!(renderer.test_aabb(&current, min, max, Vec3::ZERO));
}

#[test]
fn unprepared_renderer_refuses_parallel_pass() {
    let mut renderer = Renderer::new();
    assert!(renderer.download_hardware_depth(&mut WallSnapshot { available: true }));
    assert_eq!(
        renderer.reproject_parallel(&Mat4::IDENTITY, &params()),
        Err(CullError::NotPrepared)
    );
}
