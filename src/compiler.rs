//! Compiler driver.
//!
//! A [`Compiler`] is bound to one target environment for its lifetime and
//! runs the full pipeline per call: preprocess, parse, validate, lower,
//! emit. Output is all-or-nothing; any error-severity diagnostic stops the
//! pipeline before the next stage. The info log (rendered diagnostics) and
//! the debug log (pipeline trace) are cleared at the start of every call.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use thiserror::Error;

use crate::context::CompilerContext;
use crate::diagnostic::{Code, Diagnostic};
use crate::ir;
use crate::limits::ResourceLimits;
use crate::preprocess::{FileIncludeResolver, IncludeResolver, PreprocessError, Preprocessor};
use crate::program::{CompileArtifact, InterfaceVar, LinkError};
use crate::sema::{self, CheckedUnit, GlobalKind};
use crate::spv;
use crate::stage::ShaderStage;
use crate::syntax::{self, ParseError};
use crate::target::TargetEnv;

/// Why a compile call failed. Detailed per-construct messages are in the
/// info log; this is the caller-facing classification.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unknown shader stage for `{path}` (expected .vert/.frag/.comp/.tesc/.tese/.geom)")]
    UnknownShaderStage { path: String },

    #[error("inconsistent target environment: {0}")]
    InconsistentTarget(TargetEnv),

    #[error("include not found: `{header}` (included from {chain})")]
    IncludeNotFound { header: String, chain: String },

    #[error("include depth exceeded: more than {limit} nested includes")]
    IncludeDepthExceeded { limit: usize },

    #[error("preprocessing failed: {0}")]
    Preprocess(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("compilation failed with {errors} error(s); see the info log")]
    Semantic { errors: usize },

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Live compiler instances in this process.
static PROCESS_REFS: AtomicUsize = AtomicUsize::new(0);

/// RAII share of the process-wide compiler state. The original design had
/// explicit process initialize/finalize calls; here each instance holds a
/// reference and the last drop releases everything.
struct ProcessGuard;

impl ProcessGuard {
    fn acquire() -> Self {
        PROCESS_REFS.fetch_add(1, Ordering::SeqCst);
        ProcessGuard
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        PROCESS_REFS.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Number of live [`Compiler`] instances in the process.
pub fn process_compiler_count() -> usize {
    PROCESS_REFS.load(Ordering::SeqCst)
}

/// A GLSL to SPIR-V compiler bound to one target environment.
pub struct Compiler {
    target: TargetEnv,
    limits: ResourceLimits,
    /// External include search paths, in registration order.
    include_paths: Vec<PathBuf>,
    /// `#define` lines injected before every compiled source.
    preamble: String,
    info_log: String,
    debug_log: String,
    _process: ProcessGuard,
}

impl Compiler {
    pub fn new(target: TargetEnv) -> Self {
        Self {
            target,
            limits: ResourceLimits::default(),
            include_paths: Vec::new(),
            preamble: String::new(),
            info_log: String::new(),
            debug_log: String::new(),
            _process: ProcessGuard::acquire(),
        }
    }

    pub fn target(&self) -> TargetEnv {
        self.target
    }

    pub fn set_resource_limits(&mut self, limits: ResourceLimits) {
        self.limits = limits;
    }

    /// Register an include search directory. The most recently added
    /// directory is searched first.
    pub fn add_include_path(&mut self, dir: impl Into<PathBuf>) {
        self.include_paths.push(dir.into());
    }

    /// Add a `#define name value` to the preamble applied to every compile
    /// call. An empty value defines the macro without a body.
    pub fn add_compile_time_definition(&mut self, name: &str, value: &str) {
        if value.is_empty() {
            self.preamble.push_str(&format!("#define {}\n", name));
        } else {
            self.preamble.push_str(&format!("#define {} {}\n", name, value));
        }
    }

    /// Rendered diagnostics from the most recent compile call.
    pub fn info_log(&self) -> &str {
        &self.info_log
    }

    /// Pipeline trace from the most recent compile call.
    pub fn debug_log(&self) -> &str {
        &self.debug_log
    }

    /// Compile `source` for `stage` and return the binary module words.
    pub fn compile(
        &mut self,
        source: &str,
        stage: ShaderStage,
    ) -> Result<Vec<u32>, CompileError> {
        self.compile_artifact(source, "<source>", stage).map(|a| a.words)
    }

    /// Compile and keep the stage interface for later linking.
    pub fn compile_artifact(
        &mut self,
        source: &str,
        name: &str,
        stage: ShaderStage,
    ) -> Result<CompileArtifact, CompileError> {
        let mut resolver = self.file_resolver();
        self.run(source, name, stage, &mut resolver)
    }

    /// Compile with a caller-supplied include resolver instead of the
    /// filesystem resolver.
    pub fn compile_with_resolver(
        &mut self,
        source: &str,
        name: &str,
        stage: ShaderStage,
        resolver: &mut dyn IncludeResolver,
    ) -> Result<CompileArtifact, CompileError> {
        self.run(source, name, stage, resolver)
    }

    /// Compile a shader file, deriving the stage from its extension. The
    /// extension is checked before the file is read; the file's own
    /// directory participates in include resolution.
    pub fn compile_file(&mut self, path: impl AsRef<Path>) -> Result<Vec<u32>, CompileError> {
        let path = path.as_ref();
        let stage =
            ShaderStage::from_path(path).ok_or_else(|| CompileError::UnknownShaderStage {
                path: path.display().to_string(),
            })?;
        let source = std::fs::read_to_string(path)?;
        let name = path.to_string_lossy().into_owned();
        let mut resolver = self.file_resolver();
        self.run(&source, &name, stage, &mut resolver).map(|a| a.words)
    }

    fn file_resolver(&self) -> FileIncludeResolver {
        let mut resolver = FileIncludeResolver::new();
        for dir in &self.include_paths {
            resolver.push_external_directory(dir);
        }
        resolver
    }

    fn run(
        &mut self,
        source: &str,
        name: &str,
        stage: ShaderStage,
        resolver: &mut dyn IncludeResolver,
    ) -> Result<CompileArtifact, CompileError> {
        self.info_log.clear();
        self.debug_log.clear();

        if !self.target.is_consistent() {
            return Err(CompileError::InconsistentTarget(self.target));
        }

        let preprocessed = Preprocessor::new(resolver).run(source, name, &self.preamble);
        let output = match preprocessed {
            Ok(output) => output,
            Err(e) => return Err(self.preprocess_error(e)),
        };
        self.trace(format!(
            "preprocessed {}: {} bytes, version {:?}",
            name,
            output.text.len(),
            output.version
        ));

        let mut ctx = CompilerContext::new();
        let id = ctx.source_map.add_derived(name.to_string(), output.text.clone());

        let unit = match syntax::parse(&output.text, id) {
            Ok(unit) => unit,
            Err(e) => {
                let mut diag = Diagnostic::error(e.to_string()).with_code(Code::Syntax);
                if let Some(span) = e.span() {
                    diag = diag.with_span(span);
                }
                ctx.diagnostics.push(diag);
                self.info_log = ctx.render_diagnostics();
                return Err(CompileError::Parse(e));
            }
        };
        self.trace(format!("parsed {} declaration(s)", unit.decls.len()));

        let checked = sema::check_with_limits(&mut ctx, &unit, stage, self.limits);
        self.info_log = ctx.render_diagnostics();
        if ctx.has_errors() {
            return Err(CompileError::Semantic {
                errors: ctx.diagnostics.error_count(),
            });
        }

        let (inputs, outputs) = interface_of(&ctx, &checked);

        let module = ir::lower(&mut ctx, checked);
        let words = spv::emit(&ctx, &module, self.target);
        self.trace(format!(
            "emitted {} words for the {} stage",
            words.len(),
            stage
        ));

        Ok(CompileArtifact {
            stage,
            words,
            inputs,
            outputs,
        })
    }

    fn preprocess_error(&mut self, e: PreprocessError) -> CompileError {
        self.info_log.push_str(&e.to_string());
        self.info_log.push('\n');
        match e {
            PreprocessError::IncludeNotFound { header, chain } => {
                CompileError::IncludeNotFound { header, chain }
            }
            PreprocessError::IncludeDepthExceeded { limit } => {
                CompileError::IncludeDepthExceeded { limit }
            }
            PreprocessError::Io(e) => CompileError::Io(e),
            other => CompileError::Preprocess(other.to_string()),
        }
    }

    fn trace(&mut self, line: String) {
        debug!("{}", line);
        self.debug_log.push_str(&line);
        self.debug_log.push('\n');
    }
}

/// Location-decorated `in`/`out` variables of a checked unit, for linking.
fn interface_of(
    ctx: &CompilerContext,
    checked: &CheckedUnit,
) -> (Vec<InterfaceVar>, Vec<InterfaceVar>) {
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for global in checked.globals.iter() {
        let var = |location: u32| InterfaceVar {
            name: ctx.str(global.name),
            location,
            ty: ctx.types.name(global.ty),
        };
        match global.kind {
            GlobalKind::Input { location } => inputs.push(var(location)),
            GlobalKind::Output { location } => outputs.push(var(location)),
            _ => {}
        }
    }
    inputs.sort_by_key(|v| v.location);
    outputs.sort_by_key(|v| v.location);
    (inputs, outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::MemoryIncludeResolver;
    use crate::program::Program;
    use crate::target::{ClientVersion, SpirvVersion};
    use spirv::Op;

    fn compiler() -> Compiler {
        // RUST_LOG=debug surfaces the pipeline trace when a test fails.
        let _ = env_logger::builder().is_test(true).try_init();
        Compiler::new(TargetEnv::default())
    }

    const MINIMAL: &[(&str, ShaderStage)] = &[
        (
            "void main() { gl_Position = vec4(0.0); }\n",
            ShaderStage::Vertex,
        ),
        (
            "layout(location = 0) out vec4 color;\nvoid main() { color = vec4(1.0); }\n",
            ShaderStage::Fragment,
        ),
        (
            "layout(local_size_x = 1) in;\nvoid main() {}\n",
            ShaderStage::Compute,
        ),
        (
            concat!(
                "layout(triangles) in;\n",
                "layout(triangle_strip, max_vertices = 3) out;\n",
                "void main() {\n",
                "    gl_Position = gl_in[0].gl_Position;\n",
                "    EmitVertex();\n",
                "    EndPrimitive();\n",
                "}\n",
            ),
            ShaderStage::Geometry,
        ),
        (
            concat!(
                "layout(vertices = 3) out;\n",
                "void main() {\n",
                "    gl_out[gl_InvocationID].gl_Position = gl_in[gl_InvocationID].gl_Position;\n",
                "}\n",
            ),
            ShaderStage::TessControl,
        ),
        (
            concat!(
                "layout(triangles) in;\n",
                "void main() { gl_Position = gl_in[0].gl_Position * gl_TessCoord.x; }\n",
            ),
            ShaderStage::TessEvaluation,
        ),
    ];

    /// Operand index of the result id for an opcode our emitter produces,
    /// or None for instructions without one.
    fn result_index(op: u32) -> Option<usize> {
        let result_only = [Op::ExtInstImport as u32, Op::Label as u32];
        let no_result = [
            Op::Capability as u32,
            Op::MemoryModel as u32,
            Op::EntryPoint as u32,
            Op::ExecutionMode as u32,
            Op::Source as u32,
            Op::Name as u32,
            Op::MemberName as u32,
            Op::Decorate as u32,
            Op::MemberDecorate as u32,
            Op::Store as u32,
            Op::Branch as u32,
            Op::BranchConditional as u32,
            Op::Switch as u32,
            Op::Return as u32,
            Op::ReturnValue as u32,
            Op::Kill as u32,
            Op::Unreachable as u32,
            Op::LoopMerge as u32,
            Op::SelectionMerge as u32,
            Op::FunctionEnd as u32,
            Op::EmitVertex as u32,
            Op::EndPrimitive as u32,
            Op::ControlBarrier as u32,
            Op::MemoryBarrier as u32,
        ];
        if result_only.contains(&op)
            || (Op::TypeVoid as u32..=Op::TypeForwardPointer as u32).contains(&op)
        {
            Some(0)
        } else if no_result.contains(&op) {
            None
        } else {
            // Everything else we emit carries (result type, result).
            Some(1)
        }
    }

    fn max_result_id(words: &[u32]) -> u32 {
        let mut max = 0;
        let mut i = 5;
        while i < words.len() {
            let count = (words[i] >> 16) as usize;
            let op = words[i] & 0xffff;
            assert!(count >= 1 && i + count <= words.len());
            if let Some(idx) = result_index(op) {
                max = max.max(words[i + 1 + idx]);
            }
            i += count;
        }
        max
    }

    #[test]
    fn test_six_stage_round_trip() {
        for &(src, stage) in MINIMAL {
            let mut c = compiler();
            let words = match c.compile(src, stage) {
                Ok(words) => words,
                Err(e) => panic!("{stage} failed: {e}\n{}", c.info_log()),
            };
            assert!(words.len() > 5, "{stage}: module too small");
            assert_eq!(words[0], spirv::MAGIC_NUMBER, "{stage}: bad magic");
            assert_eq!(words[1], 0x0001_0000, "{stage}: bad version word");
            assert_eq!(
                words[3],
                max_result_id(&words) + 1,
                "{stage}: bound is not max id + 1"
            );
        }
    }

    #[test]
    fn test_determinism() {
        let src = MINIMAL[1].0;
        let mut c = compiler();
        let first = c.compile(src, ShaderStage::Fragment).unwrap();
        let second = c.compile(src, ShaderStage::Fragment).unwrap();
        assert_eq!(first, second);

        // A fresh instance with the same configuration agrees too.
        let third = compiler().compile(src, ShaderStage::Fragment).unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn test_include_substitution() {
        let mut resolver = MemoryIncludeResolver::new();
        resolver.add_file(
            "inc/common.glsl",
            b"vec4 tint() { return vec4(1.0, 0.0, 0.0, 1.0); }\n".to_vec(),
        );
        resolver.push_external_directory("inc");

        let src = "#include \"common.glsl\"\nvoid main() { gl_Position = tint(); }\n";
        let mut c = compiler();
        let artifact = c
            .compile_with_resolver(src, "main.vert", ShaderStage::Vertex, &mut resolver)
            .unwrap();
        assert_eq!(artifact.words[0], spirv::MAGIC_NUMBER);
    }

    #[test]
    fn test_include_not_found() {
        let mut resolver = MemoryIncludeResolver::new();
        let src = "#include \"nothing.glsl\"\nvoid main() {}\n";
        let mut c = compiler();
        let err = c
            .compile_with_resolver(src, "main.vert", ShaderStage::Vertex, &mut resolver)
            .unwrap_err();
        match err {
            CompileError::IncludeNotFound { header, .. } => assert_eq!(header, "nothing.glsl"),
            other => panic!("unexpected: {other}"),
        }
        assert!(c.info_log().contains("include not found"));
    }

    #[test]
    fn test_nested_include_scope_restored() {
        // `a.glsl` lives in deep/ and includes deep/b.glsl; the top-level
        // source's own `#include "b.glsl"` must still resolve in top-level
        // scope. If scope leaked, FROM_TOP_B would be missing and the
        // shader would have no main.
        let mut resolver = MemoryIncludeResolver::new();
        resolver.add_file("deep/a.glsl", b"#include \"b.glsl\"\n".to_vec());
        resolver.add_file("deep/b.glsl", b"#define FROM_DEEP_B 1\n".to_vec());
        resolver.add_file("top/b.glsl", b"#define FROM_TOP_B 1\n".to_vec());
        resolver.push_external_directory("deep");

        let src = concat!(
            "#include \"a.glsl\"\n",
            "#include \"b.glsl\"\n",
            "#ifdef FROM_TOP_B\n",
            "void main() { gl_Position = vec4(0.0); }\n",
            "#endif\n",
        );
        let mut c = compiler();
        let result =
            c.compile_with_resolver(src, "top/main.vert", ShaderStage::Vertex, &mut resolver);
        assert!(result.is_ok(), "{:?}\n{}", result.err(), c.info_log());
    }

    #[test]
    fn test_binding_collision_fails() {
        let src = concat!(
            "layout(set = 0, binding = 0) uniform sampler2D a;\n",
            "layout(set = 0, binding = 0) uniform sampler2D b;\n",
            "void main() { gl_Position = vec4(0.0); }\n",
        );
        let mut c = compiler();
        let err = c.compile(src, ShaderStage::Vertex).unwrap_err();
        assert!(matches!(err, CompileError::Semantic { .. }));
        assert!(c.info_log().contains("binding"));
    }

    #[test]
    fn test_unknown_extension_before_io() {
        // The path does not exist; the stage check must fire first.
        let mut c = compiler();
        let err = c.compile_file("does-not-exist/shader.xyz").unwrap_err();
        assert!(matches!(err, CompileError::UnknownShaderStage { .. }));

        let err = c.compile_file("does-not-exist/shader.vert").unwrap_err();
        assert!(matches!(err, CompileError::Io(_)));
    }

    #[test]
    fn test_compile_file_with_sibling_include() {
        let dir = std::env::temp_dir().join(format!("spirvc-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("common.glsl"),
            "vec4 base() { return vec4(0.5); }\n",
        )
        .unwrap();
        let main = dir.join("main.vert");
        std::fs::write(
            &main,
            "#include \"common.glsl\"\nvoid main() { gl_Position = base(); }\n",
        )
        .unwrap();

        let mut c = compiler();
        let result = c.compile_file(&main);
        let _ = std::fs::remove_dir_all(&dir);
        let words = match result {
            Ok(words) => words,
            Err(e) => panic!("compile_file failed: {e}\n{}", c.info_log()),
        };
        assert_eq!(words[0], spirv::MAGIC_NUMBER);
    }

    #[test]
    fn test_preamble_definitions() {
        let src = concat!(
            "#ifdef USE_SCALE\n",
            "void main() { gl_Position = vec4(0.0) * SCALE; }\n",
            "#else\n",
            "this is not glsl\n",
            "#endif\n",
        );
        let mut c = compiler();
        c.add_compile_time_definition("USE_SCALE", "");
        c.add_compile_time_definition("SCALE", "2.0");
        assert!(c.compile(src, ShaderStage::Vertex).is_ok());

        // Without the definitions the #else branch is a syntax error.
        let mut plain = compiler();
        assert!(matches!(
            plain.compile(src, ShaderStage::Vertex),
            Err(CompileError::Parse(_))
        ));
    }

    #[test]
    fn test_logs_reset_per_call() {
        let mut c = compiler();
        let err = c.compile("void main() { undefined_fn(); }\n", ShaderStage::Vertex);
        assert!(err.is_err());
        assert!(!c.info_log().is_empty());

        c.compile(MINIMAL[0].0, ShaderStage::Vertex).unwrap();
        assert!(c.info_log().is_empty());
        assert!(c.debug_log().contains("emitted"));
    }

    #[test]
    fn test_parse_error_surfaces() {
        let mut c = compiler();
        let err = c.compile("void main( {\n", ShaderStage::Vertex).unwrap_err();
        assert!(matches!(err, CompileError::Parse(_)));
        assert!(c.info_log().contains("error"));
    }

    #[test]
    fn test_inconsistent_target() {
        let mut c = Compiler::new(TargetEnv::new(ClientVersion::Vulkan1_0, SpirvVersion::V1_4));
        assert!(matches!(
            c.compile(MINIMAL[0].0, ShaderStage::Vertex),
            Err(CompileError::InconsistentTarget(_))
        ));
    }

    #[test]
    fn test_process_guard() {
        let a = compiler();
        assert!(process_compiler_count() >= 1);
        let b = compiler();
        assert!(process_compiler_count() >= 2);
        drop(a);
        drop(b);
    }

    #[test]
    fn test_link_artifacts_end_to_end() {
        let vert = concat!(
            "layout(location = 0) out vec4 v_color;\n",
            "void main() { v_color = vec4(1.0); gl_Position = vec4(0.0); }\n",
        );
        let frag = concat!(
            "layout(location = 0) in vec4 v_color;\n",
            "layout(location = 0) out vec4 color;\n",
            "void main() { color = v_color; }\n",
        );

        let mut c = compiler();
        let v = c
            .compile_artifact(vert, "a.vert", ShaderStage::Vertex)
            .unwrap();
        let f = c
            .compile_artifact(frag, "a.frag", ShaderStage::Fragment)
            .unwrap();
        assert_eq!(v.outputs.len(), 1);
        assert_eq!(v.outputs[0].ty, "vec4");

        let program = Program::link(vec![v.clone(), f]).unwrap();
        assert!(program.stage_binary(ShaderStage::Fragment).is_some());

        // A consumer the producer does not feed fails to link.
        let hungry = concat!(
            "layout(location = 3) in vec2 v_uv;\n",
            "layout(location = 0) out vec4 color;\n",
            "void main() { color = vec4(v_uv, 0.0, 1.0); }\n",
        );
        let h = c
            .compile_artifact(hungry, "b.frag", ShaderStage::Fragment)
            .unwrap();
        assert!(matches!(
            Program::link(vec![v, h]),
            Err(LinkError::MissingInput { .. })
        ));
    }
}
