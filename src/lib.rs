/// Coverage Cull - software occlusion culling on a small CPU depth buffer
/// Occluders are rasterized into a coverage buffer, volumes are tested against
/// it, and the previous frame's hardware depth can be reprojected to seed it.
pub mod camera;
pub mod error;
pub mod perf;
pub mod rendering;

pub use camera::{coverage_projection, CullCamera};
pub use error::CullError;
pub use perf::{CounterSnapshot, FunctionCounters, FUNCTION_COUNTERS};
pub use rendering::{
    CullRenderer, CullStats, JobSystem, MeshIndex, OcclusionSource, RayonJobs, ReprojectionParams,
    VertexCache, AABB_FACE_VISIBLE, AABB_NEAR_CROSSING, FAR_SENTINEL, MAX_BATCH_TRIANGLES,
};
