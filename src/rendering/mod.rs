/// Software coverage rasterization for occlusion culling
/// Optimized for performance with minimal branching
pub mod clipper;
pub mod depth_store;
pub mod lane;
pub mod reprojection;
pub mod scanline;
pub mod volume;

pub use clipper::{clip_near, ClippedTriangles};
pub use depth_store::{CullRenderer, CullStats, DepthPlane, FAR_SENTINEL};
pub use reprojection::{JobSystem, OcclusionSource, RayonJobs, ReprojectionParams};
pub use scanline::{ScreenRect, TriangleSetup};
pub use volume::{
    MeshIndex, VertexCache, AABB_FACE_VISIBLE, AABB_NEAR_CROSSING, BOX_FACES, MAX_BATCH_TRIANGLES,
    VERTEX_CACHE_COUNT,
};
