//! Resource limits checked during validation.
//!
//! A distillation of the large per-implementation limit table graphics
//! drivers expose: only the limits the validator actually enforces are kept.
//! Defaults match common Vulkan minimums.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceLimits {
    /// Per-dimension bound for `layout(local_size_*)`.
    pub max_compute_work_group_size: [u32; 3],
    /// Product bound across all three dimensions.
    pub max_compute_work_group_invocations: u32,
    /// Bound for `layout(max_vertices = N)` in geometry shaders.
    pub max_geometry_output_vertices: u32,
    /// Bound for `layout(vertices = N)` in tessellation control shaders,
    /// and the size of `gl_in` in tessellation stages.
    pub max_patch_vertices: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_compute_work_group_size: [1024, 1024, 64],
            max_compute_work_group_invocations: 1024,
            max_geometry_output_vertices: 256,
            max_patch_vertices: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.max_compute_work_group_size[2], 64);
        assert!(limits.max_compute_work_group_invocations <= 1024);
    }
}
