//! Cross-stage interface linking.
//!
//! Each compiled stage carries its `in`/`out` interface alongside the binary
//! words. Linking orders the stages along the rasterization pipeline and
//! checks that every input a stage consumes is produced by the previous
//! stage at the same location with the same type. Builtin variables are not
//! part of the checked interface.

use log::debug;
use thiserror::Error;

use crate::stage::ShaderStage;

/// One `in` or `out` interface variable of a compiled stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceVar {
    pub name: String,
    pub location: u32,
    /// Type rendered as GLSL source text, stable across compile calls.
    pub ty: String,
}

/// The output of one compile call, as consumed by [`Program::link`].
#[derive(Debug, Clone)]
pub struct CompileArtifact {
    pub stage: ShaderStage,
    /// The SPIR-V module.
    pub words: Vec<u32>,
    pub inputs: Vec<InterfaceVar>,
    pub outputs: Vec<InterfaceVar>,
}

/// Unsatisfied cross-stage interface.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no shader stages to link")]
    Empty,

    #[error("stage `{0}` appears more than once")]
    DuplicateStage(ShaderStage),

    #[error("compute shaders link alone, not with graphics stages")]
    MixedPipeline,

    #[error(
        "{consumer} input `{name}` at location {location} has no matching {producer} output"
    )]
    MissingInput {
        producer: ShaderStage,
        consumer: ShaderStage,
        name: String,
        location: u32,
    },

    #[error(
        "interface mismatch at location {location}: {producer} writes `{name}` as {produced}, {consumer} reads {consumed}"
    )]
    TypeMismatch {
        producer: ShaderStage,
        consumer: ShaderStage,
        name: String,
        location: u32,
        produced: String,
        consumed: String,
    },
}

/// A set of stages whose interfaces have been checked against each other.
#[derive(Debug)]
pub struct Program {
    stages: Vec<CompileArtifact>,
}

impl Program {
    /// Link compiled stages into a program.
    ///
    /// Stages may be given in any order. A compute artifact must be the only
    /// one; graphics artifacts are ordered by pipeline position and each
    /// consecutive producer/consumer pair is checked.
    pub fn link(artifacts: Vec<CompileArtifact>) -> Result<Program, LinkError> {
        if artifacts.is_empty() {
            return Err(LinkError::Empty);
        }

        let mut stages = artifacts;
        if stages.iter().any(|a| a.stage == ShaderStage::Compute) {
            if stages.len() > 1 {
                return Err(LinkError::MixedPipeline);
            }
            return Ok(Program { stages });
        }

        stages.sort_by_key(|a| a.stage.pipeline_order());
        for pair in stages.windows(2) {
            if pair[0].stage == pair[1].stage {
                return Err(LinkError::DuplicateStage(pair[0].stage));
            }
        }

        for pair in stages.windows(2) {
            check_interface(&pair[0], &pair[1])?;
        }

        debug!("linked {} stage(s)", stages.len());
        Ok(Program { stages })
    }

    pub fn stages(&self) -> impl Iterator<Item = &CompileArtifact> {
        self.stages.iter()
    }

    /// The binary for `stage`, when the program contains it.
    pub fn stage_binary(&self, stage: ShaderStage) -> Option<&[u32]> {
        self.stages
            .iter()
            .find(|a| a.stage == stage)
            .map(|a| a.words.as_slice())
    }
}

fn check_interface(
    producer: &CompileArtifact,
    consumer: &CompileArtifact,
) -> Result<(), LinkError> {
    for input in &consumer.inputs {
        let produced = producer
            .outputs
            .iter()
            .find(|o| o.location == input.location);
        match produced {
            None => {
                return Err(LinkError::MissingInput {
                    producer: producer.stage,
                    consumer: consumer.stage,
                    name: input.name.clone(),
                    location: input.location,
                });
            }
            Some(output) if output.ty != input.ty => {
                return Err(LinkError::TypeMismatch {
                    producer: producer.stage,
                    consumer: consumer.stage,
                    name: output.name.clone(),
                    location: input.location,
                    produced: output.ty.clone(),
                    consumed: input.ty.clone(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, location: u32, ty: &str) -> InterfaceVar {
        InterfaceVar {
            name: name.to_string(),
            location,
            ty: ty.to_string(),
        }
    }

    fn artifact(
        stage: ShaderStage,
        inputs: Vec<InterfaceVar>,
        outputs: Vec<InterfaceVar>,
    ) -> CompileArtifact {
        CompileArtifact {
            stage,
            words: vec![spirv::MAGIC_NUMBER],
            inputs,
            outputs,
        }
    }

    #[test]
    fn test_link_vertex_fragment() {
        let vert = artifact(
            ShaderStage::Vertex,
            vec![var("position", 0, "vec3")],
            vec![var("v_color", 0, "vec4")],
        );
        let frag = artifact(
            ShaderStage::Fragment,
            vec![var("v_color", 0, "vec4")],
            vec![var("out_color", 0, "vec4")],
        );

        // Order must not matter.
        let program = Program::link(vec![frag, vert]).unwrap();
        let order: Vec<ShaderStage> = program.stages().map(|a| a.stage).collect();
        assert_eq!(order, vec![ShaderStage::Vertex, ShaderStage::Fragment]);
        assert!(program.stage_binary(ShaderStage::Vertex).is_some());
        assert!(program.stage_binary(ShaderStage::Geometry).is_none());
    }

    #[test]
    fn test_missing_input() {
        let vert = artifact(ShaderStage::Vertex, vec![], vec![]);
        let frag = artifact(
            ShaderStage::Fragment,
            vec![var("v_uv", 2, "vec2")],
            vec![],
        );

        let err = Program::link(vec![vert, frag]).unwrap_err();
        match err {
            LinkError::MissingInput { name, location, .. } => {
                assert_eq!(name, "v_uv");
                assert_eq!(location, 2);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_type_mismatch() {
        let vert = artifact(
            ShaderStage::Vertex,
            vec![],
            vec![var("v_color", 0, "vec3")],
        );
        let frag = artifact(
            ShaderStage::Fragment,
            vec![var("v_color", 0, "vec4")],
            vec![],
        );

        let err = Program::link(vec![vert, frag]).unwrap_err();
        assert!(matches!(err, LinkError::TypeMismatch { .. }));
        assert!(err.to_string().contains("vec3"));
    }

    #[test]
    fn test_extra_producer_outputs_allowed() {
        // A producer may write more than the consumer reads.
        let vert = artifact(
            ShaderStage::Vertex,
            vec![],
            vec![var("v_color", 0, "vec4"), var("v_unused", 1, "vec2")],
        );
        let frag = artifact(
            ShaderStage::Fragment,
            vec![var("v_color", 0, "vec4")],
            vec![],
        );
        assert!(Program::link(vec![vert, frag]).is_ok());
    }

    #[test]
    fn test_duplicate_stage() {
        let a = artifact(ShaderStage::Vertex, vec![], vec![]);
        let b = artifact(ShaderStage::Vertex, vec![], vec![]);
        assert!(matches!(
            Program::link(vec![a, b]),
            Err(LinkError::DuplicateStage(ShaderStage::Vertex))
        ));
    }

    #[test]
    fn test_compute_links_alone() {
        let comp = artifact(ShaderStage::Compute, vec![], vec![]);
        assert!(Program::link(vec![comp.clone()]).is_ok());

        let vert = artifact(ShaderStage::Vertex, vec![], vec![]);
        assert!(matches!(
            Program::link(vec![comp, vert]),
            Err(LinkError::MixedPipeline)
        ));
    }

    #[test]
    fn test_empty() {
        assert!(matches!(Program::link(vec![]), Err(LinkError::Empty)));
    }
}
