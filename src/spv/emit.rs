//! Translation from the structured IR to a SPIR-V binary module.
//!
//! Sections are assembled in the order the format mandates: capabilities,
//! extension instruction imports, memory model, entry point and execution
//! modes, debug names, annotations, types with constants and module-scope
//! variables, then function bodies. The id bound in the header is the
//! highest allocated id plus one.

use std::collections::{BTreeSet, HashMap, HashSet};

use spirv::{
    BuiltIn, Capability, Decoration, Dim, ExecutionMode, ImageOperands, Op, StorageClass,
};

use crate::context::CompilerContext;
use crate::ids::{FuncId, StructId, ValueId};
use crate::ir::{Block, InstKind, IrFunction, IrModule, PtrBase, Terminator};
use crate::sema::builtins::BuiltinOp;
use crate::sema::check::{ConstValue, GeometryInput, GeometryOutput, GlobalKind, TessMode, TessSpacing};
use crate::sema::types::{ImageDim, ImageType, Ty, TyKind};
use crate::spv::instruction::Instruction;
use crate::stage::ShaderStage;
use crate::syntax::ast::{BinaryOp, InterpQualifier, UnaryOp};
use crate::target::{SpirvVersion, TargetEnv};

type Word = u32;

/// Explicit layout applied to types reachable from an interface block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LayoutClass {
    None,
    Std140,
    Std430,
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum TypeKey {
    Void,
    Bool,
    Int,
    Uint,
    Float,
    Double,
    Vector(Word, u8),
    /// Column type and column count.
    Matrix(Word, u8),
    /// Element type, length constant, array stride (0 for unlaid arrays).
    Array(Word, Word, u32),
    RuntimeArray(Word, u32),
    Struct(u32, LayoutClass),
    Image(ImageType),
    SampledImage(Word),
    Sampler,
    Pointer(u32, Word),
    Function(Word, Vec<Word>),
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Scalar(Word, u64),
    True,
    False,
    Composite(Word, Vec<Word>),
}

/// Emit `module` as a SPIR-V binary.
pub fn emit(ctx: &CompilerContext, module: &IrModule, target: TargetEnv) -> Vec<u32> {
    Emitter::new(ctx, module, target).run()
}

struct Emitter<'a> {
    ctx: &'a CompilerContext,
    module: &'a IrModule,
    target: TargetEnv,

    next_id: Word,
    capabilities: BTreeSet<u32>,
    glsl_import: Word,

    debug: Vec<u32>,
    annotations: Vec<u32>,
    /// Types, constants, and module-scope variables, in creation order.
    globals_section: Vec<u32>,
    functions_section: Vec<u32>,

    types: HashMap<TypeKey, Word>,
    consts: HashMap<ConstKey, Word>,
    decorated: HashSet<(Word, u32)>,

    global_words: Vec<Word>,
    global_layouts: Vec<LayoutClass>,
    global_storage: Vec<StorageClass>,
    func_words: Vec<Word>,
}

impl<'a> Emitter<'a> {
    fn new(ctx: &'a CompilerContext, module: &'a IrModule, target: TargetEnv) -> Self {
        Self {
            ctx,
            module,
            target,
            next_id: 1,
            capabilities: BTreeSet::new(),
            glsl_import: 0,
            debug: Vec::new(),
            annotations: Vec::new(),
            globals_section: Vec::new(),
            functions_section: Vec::new(),
            types: HashMap::new(),
            consts: HashMap::new(),
            decorated: HashSet::new(),
            global_words: Vec::new(),
            global_layouts: Vec::new(),
            global_storage: Vec::new(),
            func_words: Vec::new(),
        }
    }

    fn id(&mut self) -> Word {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn cap(&mut self, c: Capability) {
        self.capabilities.insert(c as u32);
    }

    fn run(mut self) -> Vec<u32> {
        self.cap(Capability::Shader);
        match self.module.stage {
            ShaderStage::Geometry => self.cap(Capability::Geometry),
            ShaderStage::TessControl | ShaderStage::TessEvaluation => {
                self.cap(Capability::Tessellation)
            }
            _ => {}
        }

        self.glsl_import = self.id();

        for global in self.module.globals.iter() {
            self.emit_global(global);
        }

        // Allocate function ids up front so calls can be forward.
        for (_, f) in self.module.functions.iter_enumerated() {
            let word = self.id();
            self.func_words.push(word);
            let name = self.ctx.str(f.name);
            Instruction::new(Op::Name)
                .word(word)
                .string(&name)
                .write(&mut self.debug);
        }

        for (id, f) in self.module.functions.iter_enumerated() {
            self.emit_function(id, f);
        }

        self.assemble()
    }

    fn assemble(self) -> Vec<u32> {
        let mut out = Vec::new();
        out.push(spirv::MAGIC_NUMBER);
        out.push(self.target.spirv.word());
        out.push(0); // generator
        out.push(self.next_id); // bound
        out.push(0); // schema

        for &c in &self.capabilities {
            Instruction::new(Op::Capability).word(c).write(&mut out);
        }
        Instruction::new(Op::ExtInstImport)
            .word(self.glsl_import)
            .string("GLSL.std.450")
            .write(&mut out);
        Instruction::new(Op::MemoryModel)
            .word(spirv::AddressingModel::Logical as u32)
            .word(spirv::MemoryModel::GLSL450 as u32)
            .write(&mut out);

        self.write_entry_point(&mut out);
        self.write_execution_modes(&mut out);

        Instruction::new(Op::Source)
            .word(spirv::SourceLanguage::GLSL as u32)
            .word(450)
            .write(&mut out);
        out.extend_from_slice(&self.debug);
        out.extend_from_slice(&self.annotations);
        out.extend_from_slice(&self.globals_section);
        out.extend_from_slice(&self.functions_section);
        out
    }

    fn write_entry_point(&self, out: &mut Vec<u32>) {
        // Before SPIR-V 1.4 the interface lists only Input and Output
        // variables; from 1.4 on it lists every referenced module-scope
        // variable.
        let all = self.target.spirv >= SpirvVersion::V1_4;
        let mut inst = Instruction::new(Op::EntryPoint)
            .word(self.module.stage.execution_model() as u32)
            .word(self.func_words[self.module.entry.index()])
            .string("main");
        for (id, _) in self.module.globals.iter_enumerated() {
            let storage = self.global_storage[id.index()];
            if all || storage == StorageClass::Input || storage == StorageClass::Output {
                inst = inst.word(self.global_words[id.index()]);
            }
        }
        inst.write(out);
    }

    fn write_execution_modes(&self, out: &mut Vec<u32>) {
        let main = self.func_words[self.module.entry.index()];
        let mode = |out: &mut Vec<u32>, m: ExecutionMode, extra: &[u32]| {
            Instruction::new(Op::ExecutionMode)
                .word(main)
                .word(m as u32)
                .words(extra)
                .write(out);
        };
        let exec = &self.module.exec;

        match self.module.stage {
            ShaderStage::Fragment => {
                mode(out, ExecutionMode::OriginUpperLeft, &[]);
                if exec.depth_replacing {
                    mode(out, ExecutionMode::DepthReplacing, &[]);
                }
                if exec.early_fragment_tests {
                    mode(out, ExecutionMode::EarlyFragmentTests, &[]);
                }
            }
            ShaderStage::Compute => {
                let [x, y, z] = exec.local_size.unwrap_or([1, 1, 1]);
                mode(out, ExecutionMode::LocalSize, &[x, y, z]);
            }
            ShaderStage::Geometry => {
                if let Some(input) = exec.geometry_input {
                    let m = match input {
                        GeometryInput::Points => ExecutionMode::InputPoints,
                        GeometryInput::Lines => ExecutionMode::InputLines,
                        GeometryInput::LinesAdjacency => ExecutionMode::InputLinesAdjacency,
                        GeometryInput::Triangles => ExecutionMode::Triangles,
                        GeometryInput::TrianglesAdjacency => {
                            ExecutionMode::InputTrianglesAdjacency
                        }
                    };
                    mode(out, m, &[]);
                }
                mode(
                    out,
                    ExecutionMode::Invocations,
                    &[exec.invocations.unwrap_or(1)],
                );
                if let Some(output) = exec.geometry_output {
                    let m = match output {
                        GeometryOutput::Points => ExecutionMode::OutputPoints,
                        GeometryOutput::LineStrip => ExecutionMode::OutputLineStrip,
                        GeometryOutput::TriangleStrip => ExecutionMode::OutputTriangleStrip,
                    };
                    mode(out, m, &[]);
                }
                if let Some(n) = exec.max_vertices {
                    mode(out, ExecutionMode::OutputVertices, &[n]);
                }
            }
            ShaderStage::TessControl => {
                if let Some(n) = exec.tess_vertices {
                    mode(out, ExecutionMode::OutputVertices, &[n]);
                }
            }
            ShaderStage::TessEvaluation => {
                if let Some(m) = exec.tess_mode {
                    let m = match m {
                        TessMode::Triangles => ExecutionMode::Triangles,
                        TessMode::Quads => ExecutionMode::Quads,
                        TessMode::Isolines => ExecutionMode::Isolines,
                    };
                    mode(out, m, &[]);
                }
                let spacing = match exec.tess_spacing.unwrap_or(TessSpacing::Equal) {
                    TessSpacing::Equal => ExecutionMode::SpacingEqual,
                    TessSpacing::FractionalEven => ExecutionMode::SpacingFractionalEven,
                    TessSpacing::FractionalOdd => ExecutionMode::SpacingFractionalOdd,
                };
                mode(out, spacing, &[]);
                let order = if exec.tess_cw == Some(true) {
                    ExecutionMode::VertexOrderCw
                } else {
                    ExecutionMode::VertexOrderCcw
                };
                mode(out, order, &[]);
            }
            ShaderStage::Vertex => {}
        }
    }

    // ---- types -------------------------------------------------------------

    fn intern_type(&mut self, key: TypeKey, write: impl FnOnce(&mut Self, Word)) -> Word {
        if let Some(&word) = self.types.get(&key) {
            return word;
        }
        let word = self.id();
        self.types.insert(key, word);
        write(self, word);
        word
    }

    fn type_id(&mut self, ty: Ty, layout: LayoutClass) -> Word {
        match self.ctx.types.kind(ty).clone() {
            TyKind::Error | TyKind::Void => self.intern_type(TypeKey::Void, |e, w| {
                Instruction::new(Op::TypeVoid).word(w).write(&mut e.globals_section);
            }),
            TyKind::Bool => self.intern_type(TypeKey::Bool, |e, w| {
                Instruction::new(Op::TypeBool).word(w).write(&mut e.globals_section);
            }),
            TyKind::Int => self.intern_type(TypeKey::Int, |e, w| {
                Instruction::new(Op::TypeInt)
                    .word(w)
                    .word(32)
                    .word(1)
                    .write(&mut e.globals_section);
            }),
            TyKind::Uint => self.intern_type(TypeKey::Uint, |e, w| {
                Instruction::new(Op::TypeInt)
                    .word(w)
                    .word(32)
                    .word(0)
                    .write(&mut e.globals_section);
            }),
            TyKind::Float => self.intern_type(TypeKey::Float, |e, w| {
                Instruction::new(Op::TypeFloat)
                    .word(w)
                    .word(32)
                    .write(&mut e.globals_section);
            }),
            TyKind::Double => {
                self.cap(Capability::Float64);
                self.intern_type(TypeKey::Double, |e, w| {
                    Instruction::new(Op::TypeFloat)
                        .word(w)
                        .word(64)
                        .write(&mut e.globals_section);
                })
            }
            TyKind::Vector { elem, size } => {
                let elem_id = self.type_id(elem, LayoutClass::None);
                self.intern_type(TypeKey::Vector(elem_id, size), |e, w| {
                    Instruction::new(Op::TypeVector)
                        .word(w)
                        .word(elem_id)
                        .word(size as u32)
                        .write(&mut e.globals_section);
                })
            }
            TyKind::Matrix { cols, rows, elem } => {
                let elem_id = self.type_id(elem, LayoutClass::None);
                let col = self.intern_type(TypeKey::Vector(elem_id, rows), |e, w| {
                    Instruction::new(Op::TypeVector)
                        .word(w)
                        .word(elem_id)
                        .word(rows as u32)
                        .write(&mut e.globals_section);
                });
                self.intern_type(TypeKey::Matrix(col, cols), |e, w| {
                    Instruction::new(Op::TypeMatrix)
                        .word(w)
                        .word(col)
                        .word(cols as u32)
                        .write(&mut e.globals_section);
                })
            }
            TyKind::Array { elem, size } => {
                let elem_id = self.type_id(elem, layout);
                let stride = match layout {
                    LayoutClass::None => 0,
                    _ => self.array_stride(elem, layout == LayoutClass::Std140),
                };
                match size {
                    Some(n) => {
                        let len = self.const_scalar(ConstValue::Uint(n as u64), Ty::UINT);
                        self.intern_type(TypeKey::Array(elem_id, len, stride), |e, w| {
                            Instruction::new(Op::TypeArray)
                                .word(w)
                                .word(elem_id)
                                .word(len)
                                .write(&mut e.globals_section);
                            if stride != 0 {
                                Instruction::new(Op::Decorate)
                                    .word(w)
                                    .word(Decoration::ArrayStride as u32)
                                    .word(stride)
                                    .write(&mut e.annotations);
                            }
                        })
                    }
                    None => self.intern_type(TypeKey::RuntimeArray(elem_id, stride), |e, w| {
                        Instruction::new(Op::TypeRuntimeArray)
                            .word(w)
                            .word(elem_id)
                            .write(&mut e.globals_section);
                        if stride != 0 {
                            Instruction::new(Op::Decorate)
                                .word(w)
                                .word(Decoration::ArrayStride as u32)
                                .word(stride)
                                .write(&mut e.annotations);
                        }
                    }),
                }
            }
            TyKind::Struct(sid) => self.struct_type_id(sid, layout),
            TyKind::Image(image) => self.image_type_id(image),
            TyKind::SampledImage(img_ty) => {
                let TyKind::Image(image) = *self.ctx.types.kind(img_ty) else {
                    return self.type_id(Ty::VOID, LayoutClass::None);
                };
                let img = self.image_type_id(image);
                self.intern_type(TypeKey::SampledImage(img), |e, w| {
                    Instruction::new(Op::TypeSampledImage)
                        .word(w)
                        .word(img)
                        .write(&mut e.globals_section);
                })
            }
            TyKind::Sampler => self.intern_type(TypeKey::Sampler, |e, w| {
                Instruction::new(Op::TypeSampler).word(w).write(&mut e.globals_section);
            }),
        }
    }

    fn image_type_id(&mut self, image: ImageType) -> Word {
        if image.dim == ImageDim::D1 {
            self.cap(Capability::Sampled1D);
        }
        let sampled_id = self.type_id(image.sampled, LayoutClass::None);
        self.intern_type(TypeKey::Image(image), |e, w| {
            let dim = match image.dim {
                ImageDim::D1 => Dim::Dim1D,
                ImageDim::D2 => Dim::Dim2D,
                ImageDim::D3 => Dim::Dim3D,
                ImageDim::Cube => Dim::DimCube,
            };
            Instruction::new(Op::TypeImage)
                .word(w)
                .word(sampled_id)
                .word(dim as u32)
                .word(if image.depth { 1 } else { 0 })
                .word(if image.arrayed { 1 } else { 0 })
                .word(if image.ms { 1 } else { 0 })
                .word(1) // sampled
                .word(spirv::ImageFormat::Unknown as u32)
                .write(&mut e.globals_section);
        })
    }

    fn struct_type_id(&mut self, sid: StructId, layout: LayoutClass) -> Word {
        if let Some(&word) = self.types.get(&TypeKey::Struct(sid.0, layout)) {
            return word;
        }

        let def = self.ctx.types.struct_def(sid);
        let member_tys: Vec<Ty> = def.members.iter().map(|m| m.ty).collect();
        let member_names: Vec<String> = def.members.iter().map(|m| m.name.clone()).collect();
        let name = def.name.clone();

        let member_ids: Vec<Word> = member_tys
            .iter()
            .map(|&t| self.type_id(t, layout))
            .collect();

        let word = self.id();
        self.types.insert(TypeKey::Struct(sid.0, layout), word);

        Instruction::new(Op::TypeStruct)
            .word(word)
            .words(&member_ids)
            .write(&mut self.globals_section);

        Instruction::new(Op::Name)
            .word(word)
            .string(&name)
            .write(&mut self.debug);
        for (i, mname) in member_names.iter().enumerate() {
            Instruction::new(Op::MemberName)
                .word(word)
                .word(i as u32)
                .string(mname)
                .write(&mut self.debug);
        }

        if layout != LayoutClass::None {
            let std140 = layout == LayoutClass::Std140;
            let mut offset = 0u32;
            for (i, &mty) in member_tys.iter().enumerate() {
                let (size, align) = self.size_align(mty, std140);
                offset = round_up(offset, align);
                Instruction::new(Op::MemberDecorate)
                    .word(word)
                    .word(i as u32)
                    .word(Decoration::Offset as u32)
                    .word(offset)
                    .write(&mut self.annotations);
                if let TyKind::Matrix { rows, elem, .. } = *self.ctx.types.kind(mty) {
                    let stride = self.matrix_stride(rows, elem, std140);
                    Instruction::new(Op::MemberDecorate)
                        .word(word)
                        .word(i as u32)
                        .word(Decoration::ColMajor as u32)
                        .write(&mut self.annotations);
                    Instruction::new(Op::MemberDecorate)
                        .word(word)
                        .word(i as u32)
                        .word(Decoration::MatrixStride as u32)
                        .word(stride)
                        .write(&mut self.annotations);
                }
                offset += size;
            }
        }

        word
    }

    fn pointer_type(&mut self, storage: StorageClass, pointee: Word) -> Word {
        self.intern_type(TypeKey::Pointer(storage as u32, pointee), |e, w| {
            Instruction::new(Op::TypePointer)
                .word(w)
                .word(storage as u32)
                .word(pointee)
                .write(&mut e.globals_section);
        })
    }

    fn function_type(&mut self, ret: Word, params: Vec<Word>) -> Word {
        self.intern_type(TypeKey::Function(ret, params.clone()), |e, w| {
            Instruction::new(Op::TypeFunction)
                .word(w)
                .word(ret)
                .words(&params)
                .write(&mut e.globals_section);
        })
    }

    // ---- explicit layout ---------------------------------------------------

    fn size_align(&self, ty: Ty, std140: bool) -> (u32, u32) {
        match *self.ctx.types.kind(ty) {
            TyKind::Double => (8, 8),
            TyKind::Bool | TyKind::Int | TyKind::Uint | TyKind::Float => (4, 4),
            TyKind::Vector { elem, size } => {
                let (s, _) = self.size_align(elem, std140);
                let align = match size {
                    2 => 2 * s,
                    _ => 4 * s,
                };
                (s * size as u32, align)
            }
            TyKind::Matrix { cols, rows, elem } => {
                let stride = self.matrix_stride(rows, elem, std140);
                (stride * cols as u32, stride)
            }
            TyKind::Array { elem, size } => {
                let stride = self.array_stride(elem, std140);
                (stride * size.unwrap_or(0), stride)
            }
            TyKind::Struct(sid) => {
                let def = self.ctx.types.struct_def(sid);
                let mut offset = 0u32;
                let mut max_align = 0u32;
                for member in &def.members {
                    let (size, align) = self.size_align(member.ty, std140);
                    offset = round_up(offset, align) + size;
                    max_align = max_align.max(align);
                }
                if std140 {
                    max_align = round_up(max_align, 16);
                }
                (round_up(offset, max_align.max(1)), max_align.max(1))
            }
            _ => (4, 4),
        }
    }

    fn matrix_stride(&self, rows: u8, elem: Ty, std140: bool) -> u32 {
        let col = match *self.ctx.types.kind(elem) {
            TyKind::Double => 8,
            _ => 4,
        };
        let mut align = match rows {
            2 => 2 * col,
            _ => 4 * col,
        };
        if std140 {
            align = round_up(align, 16);
        }
        round_up(col * rows as u32, align)
    }

    fn array_stride(&self, elem: Ty, std140: bool) -> u32 {
        let (size, mut align) = self.size_align(elem, std140);
        if std140 {
            align = round_up(align, 16);
        }
        round_up(size, align)
    }

    // ---- constants ---------------------------------------------------------

    fn const_scalar(&mut self, value: ConstValue, ty: Ty) -> Word {
        let ty_id = self.type_id(ty, LayoutClass::None);
        let key = match value {
            ConstValue::Bool(true) => ConstKey::True,
            ConstValue::Bool(false) => ConstKey::False,
            ConstValue::Int(v) => ConstKey::Scalar(ty_id, v as u64),
            ConstValue::Uint(v) => ConstKey::Scalar(ty_id, v),
            ConstValue::Float(v) => {
                if *self.ctx.types.kind(ty) == TyKind::Double {
                    ConstKey::Scalar(ty_id, v.to_bits())
                } else {
                    ConstKey::Scalar(ty_id, (v as f32).to_bits() as u64)
                }
            }
        };
        if let Some(&word) = self.consts.get(&key) {
            return word;
        }
        let word = self.id();
        self.consts.insert(key, word);
        match value {
            ConstValue::Bool(true) => {
                Instruction::new(Op::ConstantTrue)
                    .word(ty_id)
                    .word(word)
                    .write(&mut self.globals_section);
            }
            ConstValue::Bool(false) => {
                Instruction::new(Op::ConstantFalse)
                    .word(ty_id)
                    .word(word)
                    .write(&mut self.globals_section);
            }
            ConstValue::Int(v) => {
                Instruction::new(Op::Constant)
                    .word(ty_id)
                    .word(word)
                    .word(v as i32 as u32)
                    .write(&mut self.globals_section);
            }
            ConstValue::Uint(v) => {
                Instruction::new(Op::Constant)
                    .word(ty_id)
                    .word(word)
                    .word(v as u32)
                    .write(&mut self.globals_section);
            }
            ConstValue::Float(v) => {
                if *self.ctx.types.kind(ty) == TyKind::Double {
                    let bits = v.to_bits();
                    Instruction::new(Op::Constant)
                        .word(ty_id)
                        .word(word)
                        .word(bits as u32)
                        .word((bits >> 32) as u32)
                        .write(&mut self.globals_section);
                } else {
                    Instruction::new(Op::Constant)
                        .word(ty_id)
                        .word(word)
                        .word((v as f32).to_bits())
                        .write(&mut self.globals_section);
                }
            }
        }
        word
    }

    fn const_composite(&mut self, ty_id: Word, parts: Vec<Word>) -> Word {
        let key = ConstKey::Composite(ty_id, parts.clone());
        if let Some(&word) = self.consts.get(&key) {
            return word;
        }
        let word = self.id();
        self.consts.insert(key, word);
        Instruction::new(Op::ConstantComposite)
            .word(ty_id)
            .word(word)
            .words(&parts)
            .write(&mut self.globals_section);
        word
    }

    /// The constant zero or one of `ty`, splatted for vectors.
    fn const_splat(&mut self, ty: Ty, value: f64) -> Word {
        let elem = self.ctx.types.scalar_base(ty).unwrap_or(ty);
        let scalar = match *self.ctx.types.kind(elem) {
            TyKind::Float | TyKind::Double => {
                self.const_scalar(ConstValue::Float(value), elem)
            }
            TyKind::Uint => self.const_scalar(ConstValue::Uint(value as u64), elem),
            TyKind::Bool => self.const_scalar(ConstValue::Bool(value != 0.0), elem),
            _ => self.const_scalar(ConstValue::Int(value as i64), elem),
        };
        match *self.ctx.types.kind(ty) {
            TyKind::Vector { size, .. } => {
                let ty_id = self.type_id(ty, LayoutClass::None);
                self.const_composite(ty_id, vec![scalar; size as usize])
            }
            _ => scalar,
        }
    }

    // ---- globals -----------------------------------------------------------

    fn emit_global(&mut self, global: &crate::sema::check::Global) {
        let legacy_ssbo = self.target.spirv < SpirvVersion::V1_3;
        let (storage, layout) = match global.kind {
            GlobalKind::Input { .. } => (StorageClass::Input, LayoutClass::None),
            GlobalKind::Output { .. } => (StorageClass::Output, LayoutClass::None),
            GlobalKind::Builtin { output, .. } => (
                if output {
                    StorageClass::Output
                } else {
                    StorageClass::Input
                },
                LayoutClass::None,
            ),
            GlobalKind::UniformBlock { .. } => (StorageClass::Uniform, LayoutClass::Std140),
            GlobalKind::StorageBlock { .. } => (
                if legacy_ssbo {
                    StorageClass::Uniform
                } else {
                    StorageClass::StorageBuffer
                },
                LayoutClass::Std430,
            ),
            GlobalKind::PushConstant => (StorageClass::PushConstant, LayoutClass::Std430),
            GlobalKind::Opaque { .. } => (StorageClass::UniformConstant, LayoutClass::None),
            GlobalKind::Private { .. } => (StorageClass::Private, LayoutClass::None),
            GlobalKind::Shared => (StorageClass::Workgroup, LayoutClass::None),
        };

        let type_word = self.type_id(global.ty, layout);
        let ptr = self.pointer_type(storage, type_word);
        let word = self.id();
        Instruction::new(Op::Variable)
            .word(ptr)
            .word(word)
            .word(storage as u32)
            .write(&mut self.globals_section);

        let name = self.ctx.str(global.name);
        Instruction::new(Op::Name)
            .word(word)
            .string(&name)
            .write(&mut self.debug);

        match global.kind {
            GlobalKind::Input { location } | GlobalKind::Output { location } => {
                self.decorate(word, Decoration::Location, &[location]);
            }
            GlobalKind::Builtin { builtin, .. } => {
                self.decorate(word, Decoration::BuiltIn, &[builtin as u32]);
                if matches!(builtin, BuiltIn::TessLevelOuter | BuiltIn::TessLevelInner) {
                    self.decorate(word, Decoration::Patch, &[]);
                }
            }
            GlobalKind::UniformBlock { set, binding } => {
                self.decorate_block(global.ty, Decoration::Block);
                self.decorate(word, Decoration::DescriptorSet, &[set]);
                self.decorate(word, Decoration::Binding, &[binding]);
            }
            GlobalKind::StorageBlock { set, binding } => {
                let deco = if legacy_ssbo {
                    Decoration::BufferBlock
                } else {
                    Decoration::Block
                };
                self.decorate_block(global.ty, deco);
                self.decorate(word, Decoration::DescriptorSet, &[set]);
                self.decorate(word, Decoration::Binding, &[binding]);
            }
            GlobalKind::PushConstant => {
                self.decorate_block(global.ty, Decoration::Block);
            }
            GlobalKind::Opaque { set, binding } => {
                self.decorate(word, Decoration::DescriptorSet, &[set]);
                self.decorate(word, Decoration::Binding, &[binding]);
            }
            GlobalKind::Private { .. } | GlobalKind::Shared => {}
        }

        match global.interp {
            Some(InterpQualifier::Flat) => self.decorate(word, Decoration::Flat, &[]),
            Some(InterpQualifier::NoPerspective) => {
                self.decorate(word, Decoration::NoPerspective, &[])
            }
            _ => {}
        }

        self.global_words.push(word);
        self.global_layouts.push(layout);
        self.global_storage.push(storage);
    }

    /// Block decoration goes on the underlying struct type, through any
    /// instancing array.
    fn decorate_block(&mut self, ty: Ty, deco: Decoration) {
        let struct_ty = match *self.ctx.types.kind(ty) {
            TyKind::Array { elem, .. } => elem,
            _ => ty,
        };
        // The struct was interned when the variable's type was built; try
        // both layout classes.
        let sid = match *self.ctx.types.kind(struct_ty) {
            TyKind::Struct(sid) => sid,
            _ => return,
        };
        for layout in [LayoutClass::Std140, LayoutClass::Std430] {
            if let Some(&word) = self.types.get(&TypeKey::Struct(sid.0, layout)) {
                self.decorate(word, deco, &[]);
            }
        }
    }

    fn decorate(&mut self, target: Word, deco: Decoration, extra: &[u32]) {
        if !self.decorated.insert((target, deco as u32)) {
            return;
        }
        Instruction::new(Op::Decorate)
            .word(target)
            .word(deco as u32)
            .words(extra)
            .write(&mut self.annotations);
    }

    // ---- functions ---------------------------------------------------------

    fn emit_function(&mut self, id: FuncId, f: &IrFunction) {
        let ret_id = self.type_id(f.ret, LayoutClass::None);
        let mut param_ptrs = Vec::with_capacity(f.params.len());
        for &p in &f.params {
            let ty = self.type_id(f.locals[p].ty, LayoutClass::None);
            param_ptrs.push(self.pointer_type(StorageClass::Function, ty));
        }
        let fn_type = self.function_type(ret_id, param_ptrs.clone());

        Instruction::new(Op::Function)
            .word(ret_id)
            .word(self.func_words[id.index()])
            .word(spirv::FunctionControl::NONE.bits())
            .word(fn_type)
            .write(&mut self.functions_section);

        let mut local_words = vec![0u32; f.locals.len()];
        for (i, &p) in f.params.iter().enumerate() {
            let word = self.id();
            Instruction::new(Op::FunctionParameter)
                .word(param_ptrs[i])
                .word(word)
                .write(&mut self.functions_section);
            local_words[p.index()] = word;
        }

        let block_labels: Vec<Word> = f.blocks.iter().map(|_| self.id()).collect();

        // Entry block label, then all Function-storage variables.
        Instruction::new(Op::Label)
            .word(block_labels[0])
            .write(&mut self.functions_section);
        for (local, slot) in f.locals.iter_enumerated() {
            if slot.is_param {
                continue;
            }
            let ty = self.type_id(slot.ty, LayoutClass::None);
            let ptr = self.pointer_type(StorageClass::Function, ty);
            let word = self.id();
            Instruction::new(Op::Variable)
                .word(ptr)
                .word(word)
                .word(StorageClass::Function as u32)
                .write(&mut self.functions_section);
            local_words[local.index()] = word;
        }

        let mut cx = FnCx {
            f,
            local_words,
            block_labels,
            value_words: vec![0; f.value_types.len()],
            ptr_meta: HashMap::new(),
        };

        for (block_id, block) in f.blocks.iter_enumerated() {
            if block_id.index() != 0 {
                Instruction::new(Op::Label)
                    .word(cx.block_labels[block_id.index()])
                    .write(&mut self.functions_section);
            }
            for inst in &block.insts {
                self.emit_inst(&mut cx, inst.result, &inst.kind);
            }
            self.emit_terminator(&cx, block);
        }

        Instruction::new(Op::FunctionEnd).write(&mut self.functions_section);
    }

    fn emit_terminator(&mut self, cx: &FnCx<'_>, block: &Block) {
        if let Some((merge, cont)) = block.loop_merge {
            Instruction::new(Op::LoopMerge)
                .word(cx.block_labels[merge.index()])
                .word(cx.block_labels[cont.index()])
                .word(0) // loop control
                .write(&mut self.functions_section);
        } else if let Some(merge) = block.selection_merge {
            Instruction::new(Op::SelectionMerge)
                .word(cx.block_labels[merge.index()])
                .word(0) // selection control
                .write(&mut self.functions_section);
        }

        match &block.term {
            Terminator::Branch(target) => {
                Instruction::new(Op::Branch)
                    .word(cx.block_labels[target.index()])
                    .write(&mut self.functions_section);
            }
            Terminator::CondBranch {
                cond,
                then_block,
                else_block,
            } => {
                Instruction::new(Op::BranchConditional)
                    .word(cx.value(*cond))
                    .word(cx.block_labels[then_block.index()])
                    .word(cx.block_labels[else_block.index()])
                    .write(&mut self.functions_section);
            }
            Terminator::Switch {
                scrutinee,
                default,
                cases,
            } => {
                let mut inst = Instruction::new(Op::Switch)
                    .word(cx.value(*scrutinee))
                    .word(cx.block_labels[default.index()]);
                for &(value, target) in cases {
                    inst = inst
                        .word(value as u32)
                        .word(cx.block_labels[target.index()]);
                }
                inst.write(&mut self.functions_section);
            }
            Terminator::Return(None) => {
                Instruction::new(Op::Return).write(&mut self.functions_section);
            }
            Terminator::Return(Some(v)) => {
                Instruction::new(Op::ReturnValue)
                    .word(cx.value(*v))
                    .write(&mut self.functions_section);
            }
            Terminator::Kill => {
                Instruction::new(Op::Kill).write(&mut self.functions_section);
            }
            Terminator::Unreachable => {
                Instruction::new(Op::Unreachable).write(&mut self.functions_section);
            }
        }
    }

    fn emit_inst(&mut self, cx: &mut FnCx<'_>, result: Option<ValueId>, kind: &InstKind) {
        match kind {
            InstKind::Const(value) => {
                let Some(result) = result else { return };
                let ty = cx.f.value_types[result];
                let word = self.const_scalar(*value, ty);
                cx.set(result, word);
            }
            InstKind::Undef => {
                let Some(result) = result else { return };
                let ty = self.type_id(cx.f.value_types[result], LayoutClass::None);
                let word = self.id();
                Instruction::new(Op::Undef)
                    .word(ty)
                    .word(word)
                    .write(&mut self.functions_section);
                cx.set(result, word);
            }
            InstKind::Ptr { base, indices } => {
                let Some(result) = result else { return };
                let (storage, layout, var) = match base {
                    PtrBase::Local(local) => (
                        StorageClass::Function,
                        LayoutClass::None,
                        cx.local_words[local.index()],
                    ),
                    PtrBase::Global(global) => (
                        self.global_storage[global.index()],
                        self.global_layouts[global.index()],
                        self.global_words[global.index()],
                    ),
                };
                if indices.is_empty() {
                    cx.set(result, var);
                    cx.ptr_meta.insert(result, (storage, layout));
                    return;
                }
                let pointee = self.type_id(cx.f.value_types[result], layout);
                let ptr_ty = self.pointer_type(storage, pointee);
                let word = self.id();
                let mut inst = Instruction::new(Op::AccessChain).word(ptr_ty).word(word);
                for &idx in indices {
                    inst = inst.word(cx.value(idx));
                }
                inst.write(&mut self.functions_section);
                cx.set(result, word);
                cx.ptr_meta.insert(result, (storage, layout));
            }
            InstKind::Load { ptr } => {
                let Some(result) = result else { return };
                let ty = cx.f.value_types[result];
                let (_, layout) = cx
                    .ptr_meta
                    .get(ptr)
                    .copied()
                    .unwrap_or((StorageClass::Function, LayoutClass::None));
                let laid = self.type_id(ty, layout);
                let word = self.id();
                Instruction::new(Op::Load)
                    .word(laid)
                    .word(word)
                    .word(cx.value(*ptr))
                    .write(&mut self.functions_section);
                let normalized = self.rebuild_value(word, ty, layout, LayoutClass::None);
                cx.set(result, normalized);
            }
            InstKind::Store { ptr, value } => {
                let (_, layout) = cx
                    .ptr_meta
                    .get(ptr)
                    .copied()
                    .unwrap_or((StorageClass::Function, LayoutClass::None));
                let value_ty = cx.f.value_types[*value];
                let stored =
                    self.rebuild_value(cx.value(*value), value_ty, LayoutClass::None, layout);
                Instruction::new(Op::Store)
                    .word(cx.value(*ptr))
                    .word(stored)
                    .write(&mut self.functions_section);
            }
            InstKind::Convert { value } => {
                let Some(result) = result else { return };
                self.emit_convert(cx, result, *value);
            }
            InstKind::Unary { op, operand } => {
                let Some(result) = result else { return };
                let ty = cx.f.value_types[result];
                let opcode = match op {
                    UnaryOp::Neg => {
                        if self.is_float_based(ty) {
                            Op::FNegate
                        } else {
                            Op::SNegate
                        }
                    }
                    UnaryOp::Not => Op::LogicalNot,
                    UnaryOp::BitNot => Op::Not,
                    _ => Op::Undef,
                };
                let ty_id = self.type_id(ty, LayoutClass::None);
                let word = self.id();
                Instruction::new(opcode)
                    .word(ty_id)
                    .word(word)
                    .word(cx.value(*operand))
                    .write(&mut self.functions_section);
                cx.set(result, word);
            }
            InstKind::Binary { op, lhs, rhs } => {
                let Some(result) = result else { return };
                self.emit_binary(cx, result, *op, *lhs, *rhs);
            }
            InstKind::CompositeConstruct { parts } => {
                let Some(result) = result else { return };
                let ty = self.type_id(cx.f.value_types[result], LayoutClass::None);
                let word = self.id();
                let mut inst = Instruction::new(Op::CompositeConstruct).word(ty).word(word);
                for &p in parts {
                    inst = inst.word(cx.value(p));
                }
                inst.write(&mut self.functions_section);
                cx.set(result, word);
            }
            InstKind::CompositeExtract { base, indices } => {
                let Some(result) = result else { return };
                let ty = self.type_id(cx.f.value_types[result], LayoutClass::None);
                let word = self.id();
                Instruction::new(Op::CompositeExtract)
                    .word(ty)
                    .word(word)
                    .word(cx.value(*base))
                    .words(indices)
                    .write(&mut self.functions_section);
                cx.set(result, word);
            }
            InstKind::VectorShuffle { vector, indices } => {
                let Some(result) = result else { return };
                let ty = self.type_id(cx.f.value_types[result], LayoutClass::None);
                let word = self.id();
                let v = cx.value(*vector);
                Instruction::new(Op::VectorShuffle)
                    .word(ty)
                    .word(word)
                    .word(v)
                    .word(v)
                    .words(indices)
                    .write(&mut self.functions_section);
                cx.set(result, word);
            }
            InstKind::VectorInsert {
                vector,
                value,
                index,
            } => {
                let Some(result) = result else { return };
                let ty = self.type_id(cx.f.value_types[result], LayoutClass::None);
                let word = self.id();
                Instruction::new(Op::CompositeInsert)
                    .word(ty)
                    .word(word)
                    .word(cx.value(*value))
                    .word(cx.value(*vector))
                    .word(*index)
                    .write(&mut self.functions_section);
                cx.set(result, word);
            }
            InstKind::Call { func, args } => {
                let ret_ty = self.module.functions[*func].ret;
                let ret = self.type_id(ret_ty, LayoutClass::None);
                let word = self.id();
                let mut inst = Instruction::new(Op::FunctionCall)
                    .word(ret)
                    .word(word)
                    .word(self.func_words[func.index()]);
                for &a in args {
                    inst = inst.word(cx.value(a));
                }
                inst.write(&mut self.functions_section);
                if let Some(result) = result {
                    cx.set(result, word);
                }
            }
            InstKind::Builtin { op, args } => {
                self.emit_builtin(cx, result, *op, args);
            }
        }
    }

    fn is_float_based(&self, ty: Ty) -> bool {
        matches!(
            self.ctx.types.scalar_base(ty).map(|b| self.ctx.types.kind(b).clone()),
            Some(TyKind::Float) | Some(TyKind::Double)
        )
    }

    fn is_signed_based(&self, ty: Ty) -> bool {
        matches!(
            self.ctx.types.scalar_base(ty).map(|b| self.ctx.types.kind(b).clone()),
            Some(TyKind::Int)
        )
    }

    fn emit_binary(&mut self, cx: &mut FnCx<'_>, result: ValueId, op: BinaryOp, lhs: ValueId, rhs: ValueId) {
        let lhs_ty = cx.f.value_types[lhs];
        let rhs_ty = cx.f.value_types[rhs];
        let result_ty = cx.f.value_types[result];

        let lhs_mat = matches!(self.ctx.types.kind(lhs_ty), TyKind::Matrix { .. });
        let rhs_mat = matches!(self.ctx.types.kind(rhs_ty), TyKind::Matrix { .. });
        let lhs_vec = matches!(self.ctx.types.kind(lhs_ty), TyKind::Vector { .. });
        let rhs_scalar = self.ctx.types.is_scalar(rhs_ty);

        let float = self.is_float_based(lhs_ty);
        let signed = self.is_signed_based(lhs_ty);
        let boolean = lhs_ty == Ty::BOOL;

        let opcode = match op {
            BinaryOp::Mul if lhs_mat && rhs_mat => Op::MatrixTimesMatrix,
            BinaryOp::Mul if lhs_mat && rhs_scalar => Op::MatrixTimesScalar,
            BinaryOp::Mul if lhs_mat => Op::MatrixTimesVector,
            BinaryOp::Mul if lhs_vec && rhs_mat => Op::VectorTimesMatrix,
            BinaryOp::Mul if lhs_vec && rhs_scalar => Op::VectorTimesScalar,
            BinaryOp::Mul if float => Op::FMul,
            BinaryOp::Mul => Op::IMul,
            BinaryOp::Add if float => Op::FAdd,
            BinaryOp::Add => Op::IAdd,
            BinaryOp::Sub if float => Op::FSub,
            BinaryOp::Sub => Op::ISub,
            BinaryOp::Div if float => Op::FDiv,
            BinaryOp::Div if signed => Op::SDiv,
            BinaryOp::Div => Op::UDiv,
            BinaryOp::Mod if float => Op::FMod,
            BinaryOp::Mod if signed => Op::SMod,
            BinaryOp::Mod => Op::UMod,
            BinaryOp::Shl => Op::ShiftLeftLogical,
            BinaryOp::Shr if signed => Op::ShiftRightArithmetic,
            BinaryOp::Shr => Op::ShiftRightLogical,
            BinaryOp::BitAnd => Op::BitwiseAnd,
            BinaryOp::BitOr => Op::BitwiseOr,
            BinaryOp::BitXor => Op::BitwiseXor,
            BinaryOp::LogicalAnd => Op::LogicalAnd,
            BinaryOp::LogicalOr => Op::LogicalOr,
            BinaryOp::LogicalXor => Op::LogicalNotEqual,
            BinaryOp::Eq if boolean => Op::LogicalEqual,
            BinaryOp::Eq if float => Op::FOrdEqual,
            BinaryOp::Eq => Op::IEqual,
            BinaryOp::Ne if boolean => Op::LogicalNotEqual,
            BinaryOp::Ne if float => Op::FUnordNotEqual,
            BinaryOp::Ne => Op::INotEqual,
            BinaryOp::Lt if float => Op::FOrdLessThan,
            BinaryOp::Lt if signed => Op::SLessThan,
            BinaryOp::Lt => Op::ULessThan,
            BinaryOp::Gt if float => Op::FOrdGreaterThan,
            BinaryOp::Gt if signed => Op::SGreaterThan,
            BinaryOp::Gt => Op::UGreaterThan,
            BinaryOp::Le if float => Op::FOrdLessThanEqual,
            BinaryOp::Le if signed => Op::SLessThanEqual,
            BinaryOp::Le => Op::ULessThanEqual,
            BinaryOp::Ge if float => Op::FOrdGreaterThanEqual,
            BinaryOp::Ge if signed => Op::SGreaterThanEqual,
            BinaryOp::Ge => Op::UGreaterThanEqual,
        };

        let ty = self.type_id(result_ty, LayoutClass::None);
        let word = self.id();
        Instruction::new(opcode)
            .word(ty)
            .word(word)
            .word(cx.value(lhs))
            .word(cx.value(rhs))
            .write(&mut self.functions_section);
        cx.set(result, word);
    }

    fn emit_convert(&mut self, cx: &mut FnCx<'_>, result: ValueId, value: ValueId) {
        let from = cx.f.value_types[value];
        let to = cx.f.value_types[result];
        let from_base = self.ctx.types.scalar_base(from).unwrap_or(from);
        let to_base = self.ctx.types.scalar_base(to).unwrap_or(to);

        let from_kind = self.ctx.types.kind(from_base).clone();
        let to_kind = self.ctx.types.kind(to_base).clone();

        // Boolean conversions have no direct opcode.
        if from_kind == TyKind::Bool {
            let one = self.const_splat(to, 1.0);
            let zero = self.const_splat(to, 0.0);
            let ty = self.type_id(to, LayoutClass::None);
            let word = self.id();
            Instruction::new(Op::Select)
                .word(ty)
                .word(word)
                .word(cx.value(value))
                .word(one)
                .word(zero)
                .write(&mut self.functions_section);
            cx.set(result, word);
            return;
        }
        if to_kind == TyKind::Bool {
            let zero = self.const_splat(from, 0.0);
            let opcode = if matches!(from_kind, TyKind::Float | TyKind::Double) {
                Op::FUnordNotEqual
            } else {
                Op::INotEqual
            };
            let ty = self.type_id(to, LayoutClass::None);
            let word = self.id();
            Instruction::new(opcode)
                .word(ty)
                .word(word)
                .word(cx.value(value))
                .word(zero)
                .write(&mut self.functions_section);
            cx.set(result, word);
            return;
        }

        let opcode = match (from_kind, to_kind) {
            (TyKind::Int, TyKind::Float | TyKind::Double) => Op::ConvertSToF,
            (TyKind::Uint, TyKind::Float | TyKind::Double) => Op::ConvertUToF,
            (TyKind::Float | TyKind::Double, TyKind::Int) => Op::ConvertFToS,
            (TyKind::Float | TyKind::Double, TyKind::Uint) => Op::ConvertFToU,
            (TyKind::Float, TyKind::Double) | (TyKind::Double, TyKind::Float) => Op::FConvert,
            (TyKind::Int, TyKind::Uint) | (TyKind::Uint, TyKind::Int) => Op::Bitcast,
            _ => Op::CopyObject,
        };
        let ty = self.type_id(to, LayoutClass::None);
        let word = self.id();
        Instruction::new(opcode)
            .word(ty)
            .word(word)
            .word(cx.value(value))
            .write(&mut self.functions_section);
        cx.set(result, word);
    }

    fn emit_builtin(
        &mut self,
        cx: &mut FnCx<'_>,
        result: Option<ValueId>,
        op: BuiltinOp,
        args: &[ValueId],
    ) {
        let arg = |i: usize| args.get(i).copied().unwrap_or_default();

        // Void builtins first.
        match op {
            BuiltinOp::EmitVertex => {
                Instruction::new(Op::EmitVertex).write(&mut self.functions_section);
                return;
            }
            BuiltinOp::EndPrimitive => {
                Instruction::new(Op::EndPrimitive).write(&mut self.functions_section);
                return;
            }
            BuiltinOp::Barrier => {
                let workgroup = self.const_scalar(ConstValue::Uint(2), Ty::UINT);
                let (mem_scope, semantics) = if self.module.stage == ShaderStage::TessControl {
                    (self.const_scalar(ConstValue::Uint(4), Ty::UINT), 0)
                } else {
                    // AcquireRelease | WorkgroupMemory
                    (workgroup, 0x108)
                };
                let sem = self.const_scalar(ConstValue::Uint(semantics), Ty::UINT);
                Instruction::new(Op::ControlBarrier)
                    .word(workgroup)
                    .word(mem_scope)
                    .word(sem)
                    .write(&mut self.functions_section);
                return;
            }
            BuiltinOp::MemoryBarrier
            | BuiltinOp::MemoryBarrierShared
            | BuiltinOp::GroupMemoryBarrier => {
                let (scope, semantics) = match op {
                    // AcquireRelease | Uniform | Workgroup | Image
                    BuiltinOp::MemoryBarrier => (1u64, 0x948u64),
                    BuiltinOp::MemoryBarrierShared => (1, 0x108),
                    _ => (2, 0x948),
                };
                let scope = self.const_scalar(ConstValue::Uint(scope), Ty::UINT);
                let sem = self.const_scalar(ConstValue::Uint(semantics), Ty::UINT);
                Instruction::new(Op::MemoryBarrier)
                    .word(scope)
                    .word(sem)
                    .write(&mut self.functions_section);
                return;
            }
            _ => {}
        }

        let Some(result) = result else { return };
        let result_ty = cx.f.value_types[result];
        let ty = self.type_id(result_ty, LayoutClass::None);
        let word = self.id();

        match op {
            BuiltinOp::Ext(glop) => {
                let mut inst = Instruction::new(Op::ExtInst)
                    .word(ty)
                    .word(word)
                    .word(self.glsl_import)
                    .word(glop as u32);
                for &a in args {
                    inst = inst.word(cx.value(a));
                }
                inst.write(&mut self.functions_section);
            }
            BuiltinOp::Dot => {
                Instruction::new(Op::Dot)
                    .word(ty)
                    .word(word)
                    .word(cx.value(arg(0)))
                    .word(cx.value(arg(1)))
                    .write(&mut self.functions_section);
            }
            BuiltinOp::OuterProduct => {
                Instruction::new(Op::OuterProduct)
                    .word(ty)
                    .word(word)
                    .word(cx.value(arg(0)))
                    .word(cx.value(arg(1)))
                    .write(&mut self.functions_section);
            }
            BuiltinOp::Transpose => {
                Instruction::new(Op::Transpose)
                    .word(ty)
                    .word(word)
                    .word(cx.value(arg(0)))
                    .write(&mut self.functions_section);
            }
            BuiltinOp::FMod => {
                Instruction::new(Op::FMod)
                    .word(ty)
                    .word(word)
                    .word(cx.value(arg(0)))
                    .word(cx.value(arg(1)))
                    .write(&mut self.functions_section);
            }
            BuiltinOp::CompareLess
            | BuiltinOp::CompareLessEqual
            | BuiltinOp::CompareGreater
            | BuiltinOp::CompareGreaterEqual
            | BuiltinOp::CompareEqual
            | BuiltinOp::CompareNotEqual => {
                let operand_ty = cx.f.value_types[arg(0)];
                let float = self.is_float_based(operand_ty);
                let signed = self.is_signed_based(operand_ty);
                let boolean = self.ctx.types.scalar_base(operand_ty) == Some(Ty::BOOL);
                let opcode = match (op, float, signed) {
                    (BuiltinOp::CompareLess, true, _) => Op::FOrdLessThan,
                    (BuiltinOp::CompareLess, _, true) => Op::SLessThan,
                    (BuiltinOp::CompareLess, ..) => Op::ULessThan,
                    (BuiltinOp::CompareLessEqual, true, _) => Op::FOrdLessThanEqual,
                    (BuiltinOp::CompareLessEqual, _, true) => Op::SLessThanEqual,
                    (BuiltinOp::CompareLessEqual, ..) => Op::ULessThanEqual,
                    (BuiltinOp::CompareGreater, true, _) => Op::FOrdGreaterThan,
                    (BuiltinOp::CompareGreater, _, true) => Op::SGreaterThan,
                    (BuiltinOp::CompareGreater, ..) => Op::UGreaterThan,
                    (BuiltinOp::CompareGreaterEqual, true, _) => Op::FOrdGreaterThanEqual,
                    (BuiltinOp::CompareGreaterEqual, _, true) => Op::SGreaterThanEqual,
                    (BuiltinOp::CompareGreaterEqual, ..) => Op::UGreaterThanEqual,
                    (BuiltinOp::CompareEqual, true, _) => Op::FOrdEqual,
                    (BuiltinOp::CompareEqual, ..) if boolean => Op::LogicalEqual,
                    (BuiltinOp::CompareEqual, ..) => Op::IEqual,
                    (_, true, _) => Op::FUnordNotEqual,
                    _ if boolean => Op::LogicalNotEqual,
                    _ => Op::INotEqual,
                };
                Instruction::new(opcode)
                    .word(ty)
                    .word(word)
                    .word(cx.value(arg(0)))
                    .word(cx.value(arg(1)))
                    .write(&mut self.functions_section);
            }
            BuiltinOp::Any => {
                Instruction::new(Op::Any)
                    .word(ty)
                    .word(word)
                    .word(cx.value(arg(0)))
                    .write(&mut self.functions_section);
            }
            BuiltinOp::All => {
                Instruction::new(Op::All)
                    .word(ty)
                    .word(word)
                    .word(cx.value(arg(0)))
                    .write(&mut self.functions_section);
            }
            BuiltinOp::LogicalNot => {
                Instruction::new(Op::LogicalNot)
                    .word(ty)
                    .word(word)
                    .word(cx.value(arg(0)))
                    .write(&mut self.functions_section);
            }
            BuiltinOp::IsNan => {
                Instruction::new(Op::IsNan)
                    .word(ty)
                    .word(word)
                    .word(cx.value(arg(0)))
                    .write(&mut self.functions_section);
            }
            BuiltinOp::IsInf => {
                Instruction::new(Op::IsInf)
                    .word(ty)
                    .word(word)
                    .word(cx.value(arg(0)))
                    .write(&mut self.functions_section);
            }
            BuiltinOp::Bitcast => {
                Instruction::new(Op::Bitcast)
                    .word(ty)
                    .word(word)
                    .word(cx.value(arg(0)))
                    .write(&mut self.functions_section);
            }
            BuiltinOp::DPdx | BuiltinOp::DPdy | BuiltinOp::Fwidth => {
                let opcode = match op {
                    BuiltinOp::DPdx => Op::DPdx,
                    BuiltinOp::DPdy => Op::DPdy,
                    _ => Op::Fwidth,
                };
                Instruction::new(opcode)
                    .word(ty)
                    .word(word)
                    .word(cx.value(arg(0)))
                    .write(&mut self.functions_section);
            }
            BuiltinOp::Texture => self.emit_texture(cx, word, ty, args, None),
            BuiltinOp::TextureLod => {
                let lod = cx.value(arg(2));
                self.emit_texture(cx, word, ty, &args[..2], Some(lod));
            }
            BuiltinOp::TexelFetch => {
                let image = self.op_image(cx, arg(0));
                let lod = cx.value(arg(2));
                Instruction::new(Op::ImageFetch)
                    .word(ty)
                    .word(word)
                    .word(image)
                    .word(cx.value(arg(1)))
                    .word(ImageOperands::LOD.bits())
                    .word(lod)
                    .write(&mut self.functions_section);
            }
            BuiltinOp::TextureSize => {
                self.cap(Capability::ImageQuery);
                let image = self.op_image(cx, arg(0));
                Instruction::new(Op::ImageQuerySizeLod)
                    .word(ty)
                    .word(word)
                    .word(image)
                    .word(cx.value(arg(1)))
                    .write(&mut self.functions_section);
            }
            BuiltinOp::EmitVertex
            | BuiltinOp::EndPrimitive
            | BuiltinOp::Barrier
            | BuiltinOp::MemoryBarrier
            | BuiltinOp::MemoryBarrierShared
            | BuiltinOp::GroupMemoryBarrier => {}
        }
        cx.set(result, word);
    }

    /// Sampling: implicit-lod with optional bias, or explicit-lod; depth
    /// images split the reference value out of the coordinate.
    fn emit_texture(
        &mut self,
        cx: &FnCx<'_>,
        word: Word,
        ty: Word,
        args: &[ValueId],
        lod: Option<Word>,
    ) {
        let sampler = args.first().copied().unwrap_or_default();
        let coord = args.get(1).copied().unwrap_or_default();
        let image_ty = cx.f.value_types[sampler];
        let depth = match self.ctx.types.kind(image_ty) {
            TyKind::SampledImage(img) => match self.ctx.types.kind(*img) {
                TyKind::Image(image) => image.depth,
                _ => false,
            },
            _ => false,
        };

        if depth {
            // The last coordinate component is the depth reference.
            let coord_ty = cx.f.value_types[coord];
            let size = self.ctx.types.vector_size(coord_ty).unwrap_or(3);
            let float = self.type_id(Ty::FLOAT, LayoutClass::None);
            let dref = self.id();
            Instruction::new(Op::CompositeExtract)
                .word(float)
                .word(dref)
                .word(cx.value(coord))
                .word(size as u32 - 1)
                .write(&mut self.functions_section);
            Instruction::new(Op::ImageSampleDrefImplicitLod)
                .word(ty)
                .word(word)
                .word(cx.value(sampler))
                .word(cx.value(coord))
                .word(dref)
                .write(&mut self.functions_section);
            return;
        }

        match lod {
            Some(lod) => {
                Instruction::new(Op::ImageSampleExplicitLod)
                    .word(ty)
                    .word(word)
                    .word(cx.value(sampler))
                    .word(cx.value(coord))
                    .word(ImageOperands::LOD.bits())
                    .word(lod)
                    .write(&mut self.functions_section);
            }
            None => {
                let mut inst = Instruction::new(Op::ImageSampleImplicitLod)
                    .word(ty)
                    .word(word)
                    .word(cx.value(sampler))
                    .word(cx.value(coord));
                if let Some(&bias) = args.get(2) {
                    inst = inst.word(ImageOperands::BIAS.bits()).word(cx.value(bias));
                }
                inst.write(&mut self.functions_section);
            }
        }
    }

    /// Extract the image from a sampled image value.
    fn op_image(&mut self, cx: &FnCx<'_>, sampler: ValueId) -> Word {
        let sampled_ty = cx.f.value_types[sampler];
        let img_ty = match self.ctx.types.kind(sampled_ty) {
            TyKind::SampledImage(img) => *img,
            _ => sampled_ty,
        };
        let ty = self.type_id(img_ty, LayoutClass::None);
        let word = self.id();
        Instruction::new(Op::Image)
            .word(ty)
            .word(word)
            .word(cx.value(sampler))
            .write(&mut self.functions_section);
        word
    }

    /// Rebuild an aggregate value across layout classes. Scalars, vectors,
    /// and matrices share type ids between layouts and pass through; arrays
    /// and structs inside blocks carry stride/offset decorations and need a
    /// member-wise copy.
    fn rebuild_value(&mut self, value: Word, ty: Ty, from: LayoutClass, to: LayoutClass) -> Word {
        if from == to {
            return value;
        }
        let from_id = self.type_id(ty, from);
        let to_id = self.type_id(ty, to);
        if from_id == to_id {
            return value;
        }

        match self.ctx.types.kind(ty).clone() {
            TyKind::Array {
                elem,
                size: Some(n),
            } => {
                let elem_from = self.type_id(elem, from);
                let mut parts = Vec::with_capacity(n as usize);
                for i in 0..n {
                    let part = self.id();
                    Instruction::new(Op::CompositeExtract)
                        .word(elem_from)
                        .word(part)
                        .word(value)
                        .word(i)
                        .write(&mut self.functions_section);
                    parts.push(self.rebuild_value(part, elem, from, to));
                }
                let word = self.id();
                Instruction::new(Op::CompositeConstruct)
                    .word(to_id)
                    .word(word)
                    .words(&parts)
                    .write(&mut self.functions_section);
                word
            }
            TyKind::Struct(sid) => {
                let member_tys: Vec<Ty> = self
                    .ctx
                    .types
                    .struct_def(sid)
                    .members
                    .iter()
                    .map(|m| m.ty)
                    .collect();
                let mut parts = Vec::with_capacity(member_tys.len());
                for (i, &mty) in member_tys.iter().enumerate() {
                    let m_from = self.type_id(mty, from);
                    let part = self.id();
                    Instruction::new(Op::CompositeExtract)
                        .word(m_from)
                        .word(part)
                        .word(value)
                        .word(i as u32)
                        .write(&mut self.functions_section);
                    parts.push(self.rebuild_value(part, mty, from, to));
                }
                let word = self.id();
                Instruction::new(Op::CompositeConstruct)
                    .word(to_id)
                    .word(word)
                    .words(&parts)
                    .write(&mut self.functions_section);
                word
            }
            _ => value,
        }
    }
}

fn round_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

/// Per-function emission state.
struct FnCx<'f> {
    f: &'f IrFunction,
    local_words: Vec<Word>,
    block_labels: Vec<Word>,
    value_words: Vec<Word>,
    ptr_meta: HashMap<ValueId, (StorageClass, LayoutClass)>,
}

impl FnCx<'_> {
    fn value(&self, v: ValueId) -> Word {
        self.value_words[v.index()]
    }

    fn set(&mut self, v: ValueId, word: Word) {
        self.value_words[v.index()] = word;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir;
    use crate::sema;
    use crate::syntax;
    use spirv::GLOp;

    fn compile(src: &str, stage: ShaderStage, target: TargetEnv) -> Vec<u32> {
        let mut ctx = CompilerContext::new();
        let id = ctx.source_map.add_inline(src.to_string());
        let unit = match syntax::parse(src, id) {
            Ok(unit) => unit,
            Err(e) => panic!("parse failed: {e}"),
        };
        let checked = sema::check(&mut ctx, &unit, stage);
        assert!(
            !ctx.has_errors(),
            "validation failed:\n{}",
            ctx.render_diagnostics()
        );
        let module = ir::lower(&mut ctx, checked);
        emit(&ctx, &module, target)
    }

    /// Iterate `(opcode, operand words)` over the instruction stream.
    fn instructions(binary: &[u32]) -> Vec<(u32, Vec<u32>)> {
        let mut out = Vec::new();
        let mut i = 5;
        while i < binary.len() {
            let count = (binary[i] >> 16) as usize;
            let opcode = binary[i] & 0xffff;
            assert!(count >= 1, "zero-length instruction");
            out.push((opcode, binary[i + 1..i + count].to_vec()));
            i += count;
        }
        assert_eq!(i, binary.len(), "trailing words");
        out
    }

    const VERT: &str = r#"
layout(location = 0) in vec3 position;
void main() {
    gl_Position = vec4(position, 1.0);
}
"#;

    #[test]
    fn test_header() {
        let binary = compile(VERT, ShaderStage::Vertex, TargetEnv::default());
        assert_eq!(binary[0], spirv::MAGIC_NUMBER);
        assert_eq!(binary[1], 0x0001_0000);
        assert_eq!(binary[4], 0);
        let bound = binary[3];
        assert!(bound > 1);
        // Every referenced id stays under the bound.
        for (op, operands) in instructions(&binary) {
            if op == Op::Constant as u32 {
                assert!(operands[1] < bound);
            }
        }
    }

    #[test]
    fn test_section_order() {
        let binary = compile(VERT, ShaderStage::Vertex, TargetEnv::default());
        let ops: Vec<u32> = instructions(&binary).iter().map(|(op, _)| *op).collect();
        let pos = |needle: u32| ops.iter().position(|&o| o == needle).unwrap();

        assert_eq!(ops[0], Op::Capability as u32);
        assert!(pos(Op::ExtInstImport as u32) < pos(Op::MemoryModel as u32));
        assert!(pos(Op::MemoryModel as u32) < pos(Op::EntryPoint as u32));
        assert!(pos(Op::EntryPoint as u32) < pos(Op::TypeVoid as u32));
        assert!(pos(Op::TypeVoid as u32) < pos(Op::Function as u32));
    }

    #[test]
    fn test_entry_point_interface() {
        let binary = compile(VERT, ShaderStage::Vertex, TargetEnv::default());
        let insts = instructions(&binary);
        let entries: Vec<_> = insts
            .iter()
            .filter(|(op, _)| *op == Op::EntryPoint as u32)
            .collect();
        assert_eq!(entries.len(), 1);
        let (_, operands) = entries[0];
        assert_eq!(operands[0], spirv::ExecutionModel::Vertex as u32);
        // "main" + nul fits in two words; interface ids follow: the input
        // and the gl_Position builtin.
        let interface = &operands[4..];
        assert_eq!(interface.len(), 2);
    }

    #[test]
    fn test_fragment_origin_mode() {
        let src = "layout(location = 0) out vec4 c;\nvoid main() { c = vec4(1.0); }\n";
        let binary = compile(src, ShaderStage::Fragment, TargetEnv::default());
        let has_origin = instructions(&binary).iter().any(|(op, operands)| {
            *op == Op::ExecutionMode as u32
                && operands[1] == ExecutionMode::OriginUpperLeft as u32
        });
        assert!(has_origin);
    }

    #[test]
    fn test_compute_local_size_mode() {
        let src = "layout(local_size_x = 8, local_size_y = 4) in;\nvoid main() {}\n";
        let binary = compile(src, ShaderStage::Compute, TargetEnv::default());
        let found = instructions(&binary).iter().any(|(op, operands)| {
            *op == Op::ExecutionMode as u32
                && operands[1] == ExecutionMode::LocalSize as u32
                && operands[2..5] == [8, 4, 1]
        });
        assert!(found);
    }

    #[test]
    fn test_uniform_block_decorations() {
        let src = r#"
layout(set = 1, binding = 2) uniform Params { mat4 mvp; float t; };
layout(location = 0) in vec3 p;
void main() { gl_Position = mvp * vec4(p, t); }
"#;
        let binary = compile(src, ShaderStage::Vertex, TargetEnv::default());
        let insts = instructions(&binary);
        let has = |deco: Decoration, value: Option<u32>| {
            insts.iter().any(|(op, operands)| {
                *op == Op::Decorate as u32
                    && operands[1] == deco as u32
                    && value.is_none_or(|v| operands.get(2) == Some(&v))
            })
        };
        assert!(has(Decoration::Block, None));
        assert!(has(Decoration::DescriptorSet, Some(1)));
        assert!(has(Decoration::Binding, Some(2)));

        // mat4 member: offset 0, ColMajor, stride 16; float at offset 64.
        let member_offsets: Vec<u32> = insts
            .iter()
            .filter(|(op, operands)| {
                *op == Op::MemberDecorate as u32 && operands[2] == Decoration::Offset as u32
            })
            .map(|(_, operands)| operands[3])
            .collect();
        assert_eq!(member_offsets, vec![0, 64]);
    }

    #[test]
    fn test_deterministic_output() {
        let a = compile(VERT, ShaderStage::Vertex, TargetEnv::default());
        let b = compile(VERT, ShaderStage::Vertex, TargetEnv::default());
        assert_eq!(a, b);
    }

    #[test]
    fn test_constant_dedup() {
        let src = r#"
void main() {
    float a = 1.0;
    float b = 1.0 + 1.0;
}
"#;
        let binary = compile(src, ShaderStage::Vertex, TargetEnv::default());
        let one_bits = 1.0f32.to_bits();
        let ones = instructions(&binary)
            .iter()
            .filter(|(op, operands)| {
                *op == Op::Constant as u32 && operands.get(2) == Some(&one_bits)
            })
            .count();
        assert_eq!(ones, 1);
    }

    #[test]
    fn test_texture_sampling_ops() {
        let src = r#"
layout(set = 0, binding = 0) uniform sampler2D tex;
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 color;
void main() { color = texture(tex, uv); }
"#;
        let binary = compile(src, ShaderStage::Fragment, TargetEnv::default());
        let ops: Vec<u32> = instructions(&binary).iter().map(|(op, _)| *op).collect();
        assert!(ops.contains(&(Op::TypeSampledImage as u32)));
        assert!(ops.contains(&(Op::ImageSampleImplicitLod as u32)));
    }

    #[test]
    fn test_storage_buffer_class_by_version() {
        let src = r#"
layout(set = 0, binding = 0) buffer Data { float values[]; };
layout(local_size_x = 64) in;
void main() { values[gl_GlobalInvocationID.x] *= 2.0; }
"#;
        let legacy = compile(src, ShaderStage::Compute, TargetEnv::default());
        let legacy_insts = instructions(&legacy);
        assert!(legacy_insts.iter().any(|(op, operands)| {
            *op == Op::Decorate as u32 && operands[1] == Decoration::BufferBlock as u32
        }));

        let modern = compile(
            src,
            ShaderStage::Compute,
            TargetEnv::new(
                crate::target::ClientVersion::Vulkan1_1,
                SpirvVersion::V1_3,
            ),
        );
        assert!(instructions(&modern).iter().any(|(op, operands)| {
            *op == Op::TypePointer as u32
                && operands[1] == StorageClass::StorageBuffer as u32
        }));
    }

    #[test]
    fn test_loop_merge_emitted() {
        let src = r#"
void main() {
    float acc = 0.0;
    for (int i = 0; i < 8; ++i) { acc += 1.0; }
}
"#;
        let binary = compile(src, ShaderStage::Vertex, TargetEnv::default());
        let ops: Vec<u32> = instructions(&binary).iter().map(|(op, _)| *op).collect();
        assert!(ops.contains(&(Op::LoopMerge as u32)));
        assert!(ops.contains(&(Op::BranchConditional as u32)));
    }

    #[test]
    fn test_glsl_ext_inst() {
        let src = "void main() { float s = sqrt(2.0); }\n";
        let binary = compile(src, ShaderStage::Vertex, TargetEnv::default());
        let found = instructions(&binary).iter().any(|(op, operands)| {
            *op == Op::ExtInst as u32 && operands[3] == GLOp::Sqrt as u32
        });
        assert!(found);
    }

    #[test]
    fn test_double_enables_float64() {
        let src = "void main() { double d = 1.0lf; }\n";
        let binary = compile(src, ShaderStage::Vertex, TargetEnv::default());
        let caps: Vec<u32> = instructions(&binary)
            .iter()
            .filter(|(op, _)| *op == Op::Capability as u32)
            .map(|(_, operands)| operands[0])
            .collect();
        assert!(caps.contains(&(Capability::Float64 as u32)));
    }

    #[test]
    fn test_interface_lists_all_globals_on_spirv14() {
        let src = r#"
layout(set = 0, binding = 0) uniform Params { float t; };
layout(location = 0) in vec3 p;
void main() { gl_Position = vec4(p * t, 1.0); }
"#;
        let target = TargetEnv::new(crate::target::ClientVersion::Vulkan1_2, SpirvVersion::V1_4);
        let binary = compile(src, ShaderStage::Vertex, target);
        let insts = instructions(&binary);
        let (_, operands) = insts
            .iter()
            .find(|(op, _)| *op == Op::EntryPoint as u32)
            .unwrap();
        // Input, gl_Position, and the uniform block.
        assert_eq!(operands[4..].len(), 3);
    }
}
