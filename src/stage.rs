//! Shader pipeline stages and the file-extension mapping used by
//! [`Compiler::compile_file`](crate::compiler::Compiler::compile_file).

use serde::Serialize;
use std::fmt;
use std::path::Path;

/// One of the six shader pipeline roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// All stages, in pipeline order (compute last, it has no ordering).
    pub const ALL: [ShaderStage; 6] = [
        ShaderStage::Vertex,
        ShaderStage::TessControl,
        ShaderStage::TessEvaluation,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
        ShaderStage::Compute,
    ];

    /// Map a file extension (without the dot) to a stage.
    pub fn from_extension(ext: &str) -> Option<ShaderStage> {
        match ext {
            "vert" => Some(ShaderStage::Vertex),
            "tesc" => Some(ShaderStage::TessControl),
            "tese" => Some(ShaderStage::TessEvaluation),
            "geom" => Some(ShaderStage::Geometry),
            "frag" => Some(ShaderStage::Fragment),
            "comp" => Some(ShaderStage::Compute),
            _ => None,
        }
    }

    /// Derive the stage from a file path's extension.
    pub fn from_path(path: &Path) -> Option<ShaderStage> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// The SPIR-V execution model for this stage.
    pub fn execution_model(self) -> spirv::ExecutionModel {
        match self {
            ShaderStage::Vertex => spirv::ExecutionModel::Vertex,
            ShaderStage::TessControl => spirv::ExecutionModel::TessellationControl,
            ShaderStage::TessEvaluation => spirv::ExecutionModel::TessellationEvaluation,
            ShaderStage::Geometry => spirv::ExecutionModel::Geometry,
            ShaderStage::Fragment => spirv::ExecutionModel::Fragment,
            ShaderStage::Compute => spirv::ExecutionModel::GLCompute,
        }
    }

    /// Position of the stage in the rasterization pipeline, for link-order
    /// checks. Compute is not part of the graphics pipeline.
    pub fn pipeline_order(self) -> Option<u8> {
        match self {
            ShaderStage::Vertex => Some(0),
            ShaderStage::TessControl => Some(1),
            ShaderStage::TessEvaluation => Some(2),
            ShaderStage::Geometry => Some(3),
            ShaderStage::Fragment => Some(4),
            ShaderStage::Compute => None,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::TessControl => "tessellation-control",
            ShaderStage::TessEvaluation => "tessellation-evaluation",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_mapping() {
        assert_eq!(ShaderStage::from_extension("vert"), Some(ShaderStage::Vertex));
        assert_eq!(ShaderStage::from_extension("frag"), Some(ShaderStage::Fragment));
        assert_eq!(ShaderStage::from_extension("comp"), Some(ShaderStage::Compute));
        assert_eq!(ShaderStage::from_extension("tesc"), Some(ShaderStage::TessControl));
        assert_eq!(ShaderStage::from_extension("tese"), Some(ShaderStage::TessEvaluation));
        assert_eq!(ShaderStage::from_extension("geom"), Some(ShaderStage::Geometry));
        assert_eq!(ShaderStage::from_extension("xyz"), None);
        assert_eq!(ShaderStage::from_extension("glsl"), None);
    }

    #[test]
    fn test_from_path() {
        assert_eq!(
            ShaderStage::from_path(Path::new("shaders/pbr.frag")),
            Some(ShaderStage::Fragment)
        );
        assert_eq!(ShaderStage::from_path(Path::new("no_extension")), None);
    }
}
