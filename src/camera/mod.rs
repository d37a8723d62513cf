/// Cull camera and coverage-buffer projection
/// The rasterizer consumes clip coordinates whose x/y are already scaled to
/// pixels (y down) and whose z is zero at the near plane, growing linearly
/// with view depth.
use glam::{Mat4, Quat, Vec3, Vec4};

/// Turn a right-handed, 0..1 depth view-projection into the matrix the
/// coverage rasterizer expects for a `width` x `height` buffer.
///
/// x' = (x + w) * width / 2, y' = (w - y) * height / 2, z and w unchanged.
/// After the divide x'/w and y'/w are pixel coordinates. For a
/// `perspective_rh` projection z equals `far / (far - near) * (depth - near)`,
/// which is the depth value stored in the buffer.
pub fn coverage_projection(view_proj: &Mat4, width: usize, height: usize) -> Mat4 {
    let half_w = width as f32 * 0.5;
    let half_h = height as f32 * 0.5;
    let to_pixels = Mat4::from_cols(
        Vec4::new(half_w, 0.0, 0.0, 0.0),
        Vec4::new(0.0, -half_h, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
        Vec4::new(half_w, half_h, 0.0, 1.0),
    );
    to_pixels * *view_proj
}

/// Camera the occlusion pass is rendered from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullCamera {
    pub position: Vec3,
    pub yaw: f32,   // Rotation around Y axis (radians)
    pub pitch: f32, // Rotation around X axis (radians)
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub aspect_ratio: f32,
}

impl CullCamera {
    pub fn new(position: Vec3, aspect_ratio: f32) -> Self {
        Self {
            position,
            yaw: 0.0,
            pitch: 0.0,
            fov: 70.0f32.to_radians(),
            near: 0.1,
            far: 1000.0,
            aspect_ratio,
        }
    }

    /// Update camera orientation to look at a specific target point.
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let view_matrix = Mat4::look_at_rh(self.position, target, up);
        let rotation_quat = Quat::from_mat4(&view_matrix.inverse());
        let (yaw, pitch, _roll) = rotation_quat.to_euler(glam::EulerRot::YXZ);
        self.yaw = yaw;
        self.pitch = pitch;
    }

    pub fn view_matrix(&self) -> Mat4 {
        let rotation = self.rotation_quat();
        let forward = rotation * Vec3::NEG_Z;
        let up = rotation * Vec3::Y;

        Mat4::look_at_rh(self.position, self.position + forward, up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect_ratio, self.near, self.far)
    }

    /// Hardware-style view-projection (NDC x/y in -1..1, depth 0..1).
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// View-projection for a `SIZE_X` x `SIZE_Y` coverage buffer.
    pub fn coverage_view_projection<const SIZE_X: usize, const SIZE_Y: usize>(&self) -> Mat4 {
        coverage_projection(&self.view_projection_matrix(), SIZE_X, SIZE_Y)
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation_quat() * Vec3::NEG_Z
    }

    fn rotation_quat(&self) -> Quat {
        Quat::from_rotation_y(self.yaw) * Quat::from_rotation_x(self.pitch)
    }
}
