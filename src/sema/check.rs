//! Semantic validation.
//!
//! Turns a parsed translation unit into a typed unit: names resolved,
//! every expression annotated with its interned type, implicit conversions
//! made explicit, overloads selected, and the stage's interface and
//! execution layout collected. IR lowering consumes the typed tree and
//! never reports errors of its own.

use crate::context::CompilerContext;
use crate::diagnostic::Code;
use crate::ids::{FuncId, GlobalId, LocalId};
use crate::index_vec::IndexVec;
use crate::interner::Name;
use crate::limits::ResourceLimits;
use crate::sema::builtins::{select_overload, BuiltinOp, Builtins, OverloadChoice};
use crate::sema::scope::{ScopeStack, Symbol};
use crate::sema::types::{StructDef, StructMember, Ty, TyKind, Types};
use crate::source::Span;
use crate::stage::ShaderStage;
use crate::syntax::ast::{
    self, ArrayDim, BinaryOp, CaseLabel, Decl, FullType, Initializer, InterpQualifier, LayoutItem,
    LayoutValue, Qualifier, Spanned, Stmt, StorageQualifier, TranslationUnit, TypeSpecifier,
    UnaryOp,
};
use std::collections::{HashMap, HashSet};

// ---- typed tree -----------------------------------------------------------

/// A fully validated shader, ready for IR lowering.
pub struct CheckedUnit {
    pub stage: ShaderStage,
    pub globals: IndexVec<GlobalId, Global>,
    pub functions: IndexVec<FuncId, Function>,
    /// The `main` function.
    pub entry: FuncId,
    pub exec: ExecInfo,
}

/// A module-level variable.
pub struct Global {
    pub name: Name,
    pub ty: Ty,
    pub kind: GlobalKind,
    pub interp: Option<InterpQualifier>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlobalKind {
    Input { location: u32 },
    Output { location: u32 },
    /// A `gl_*` variable, emitted with a BuiltIn decoration.
    Builtin { builtin: spirv::BuiltIn, output: bool },
    UniformBlock { set: u32, binding: u32 },
    StorageBlock { set: u32, binding: u32 },
    PushConstant,
    /// Opaque descriptor (combined image-sampler).
    Opaque { set: u32, binding: u32 },
    Private { init: Option<TypedExpr> },
    Shared,
}

pub struct Function {
    pub name: Name,
    pub ret: Ty,
    pub params: Vec<LocalId>,
    pub locals: IndexVec<LocalId, LocalVar>,
    pub body: Vec<TypedStmt>,
    pub span: Span,
}

pub struct LocalVar {
    pub name: Name,
    pub ty: Ty,
    /// Set for function parameters.
    pub param: Option<ParamQual>,
    pub is_const: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamQual {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedStmt {
    Compound(Vec<TypedStmt>),
    Local { local: LocalId, init: Option<TypedExpr> },
    Expr(TypedExpr),
    If {
        cond: TypedExpr,
        then_branch: Box<TypedStmt>,
        else_branch: Option<Box<TypedStmt>>,
    },
    /// Unified loop: `while` (`check_after = false`, no step), `for`
    /// (optional init and step), `do`/`while` (`check_after = true`).
    Loop {
        init: Option<Box<TypedStmt>>,
        cond: Option<TypedExpr>,
        step: Option<TypedExpr>,
        body: Box<TypedStmt>,
        check_after: bool,
    },
    Switch {
        scrutinee: TypedExpr,
        arms: Vec<SwitchArm>,
    },
    Return(Option<TypedExpr>),
    Break,
    Continue,
    Discard,
    Empty,
}

/// One switch arm. Fallthrough is preserved: an arm whose body does not
/// end in a jump flows into the next arm.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchArm {
    pub values: Vec<i64>,
    pub default: bool,
    pub body: Vec<TypedStmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedExpr {
    pub ty: Ty,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(ConstValue),
    Local(LocalId),
    Global(GlobalId),
    Member { base: Box<TypedExpr>, index: u32 },
    Swizzle { base: Box<TypedExpr>, indices: Vec<u8> },
    Index { base: Box<TypedExpr>, index: Box<TypedExpr> },
    Unary { op: UnaryOp, operand: Box<TypedExpr> },
    Binary { op: BinaryOp, lhs: Box<TypedExpr>, rhs: Box<TypedExpr> },
    /// Numeric conversion to `ty`.
    Convert { value: Box<TypedExpr> },
    Assign {
        op: Option<BinaryOp>,
        lhs: Box<TypedExpr>,
        rhs: Box<TypedExpr>,
    },
    Ternary {
        cond: Box<TypedExpr>,
        then_expr: Box<TypedExpr>,
        else_expr: Box<TypedExpr>,
    },
    Call { func: FuncId, args: Vec<TypedExpr> },
    Builtin { op: BuiltinOp, args: Vec<TypedExpr> },
    /// Composite construction. A single scalar argument for a vector type
    /// is a splat; a single wider vector argument is a truncation.
    Construct { args: Vec<TypedExpr> },
    /// Scalar on the diagonal, zero elsewhere.
    MatrixDiag { value: Box<TypedExpr> },
    Error,
}

impl TypedExpr {
    fn error(span: Span) -> Self {
        Self {
            ty: Ty::ERROR,
            span,
            kind: ExprKind::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.ty == Ty::ERROR
    }
}

// ---- execution layout -----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryInput {
    Points,
    Lines,
    LinesAdjacency,
    Triangles,
    TrianglesAdjacency,
}

impl GeometryInput {
    /// Vertices per input primitive, which sizes the `gl_in` arrays.
    pub fn vertex_count(self) -> u32 {
        match self {
            GeometryInput::Points => 1,
            GeometryInput::Lines => 2,
            GeometryInput::LinesAdjacency => 4,
            GeometryInput::Triangles => 3,
            GeometryInput::TrianglesAdjacency => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryOutput {
    Points,
    LineStrip,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TessMode {
    Triangles,
    Quads,
    Isolines,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TessSpacing {
    Equal,
    FractionalEven,
    FractionalOdd,
}

/// Execution-mode state collected from layout declarations and builtin
/// variable uses.
#[derive(Debug, Clone, Default)]
pub struct ExecInfo {
    pub local_size: Option<[u32; 3]>,
    pub geometry_input: Option<GeometryInput>,
    pub geometry_output: Option<GeometryOutput>,
    pub max_vertices: Option<u32>,
    pub invocations: Option<u32>,
    /// `layout(vertices = N) out` in a tessellation control shader.
    pub tess_vertices: Option<u32>,
    pub tess_mode: Option<TessMode>,
    pub tess_spacing: Option<TessSpacing>,
    pub tess_cw: Option<bool>,
    pub early_fragment_tests: bool,
    /// Set when the shader writes `gl_FragDepth`.
    pub depth_replacing: bool,
}

// ---- checker --------------------------------------------------------------

/// Validate a translation unit for `stage` with default resource limits.
pub fn check(ctx: &mut CompilerContext, unit: &TranslationUnit, stage: ShaderStage) -> CheckedUnit {
    check_with_limits(ctx, unit, stage, ResourceLimits::default())
}

/// Validate a translation unit for `stage`.
pub fn check_with_limits(
    ctx: &mut CompilerContext,
    unit: &TranslationUnit,
    stage: ShaderStage,
    limits: ResourceLimits,
) -> CheckedUnit {
    let builtins = Builtins::new(&mut ctx.types);
    let checker = Checker {
        ctx,
        stage,
        builtins,
        limits,
        globals: IndexVec::new(),
        global_consts: HashMap::new(),
        functions: IndexVec::new(),
        overloads: HashMap::new(),
        struct_names: HashMap::new(),
        scopes: ScopeStack::new(),
        exec: ExecInfo::default(),
        builtin_vars: HashMap::new(),
        per_vertex_globals: Vec::new(),
        locals: IndexVec::new(),
        current_ret: Ty::VOID,
        loop_depth: 0,
        switch_depth: 0,
        call_edges: HashMap::new(),
        current_fn: FuncId::INVALID,
    };
    checker.run(unit)
}

/// Where a `gl_in`/`gl_out` style arrayed builtin belongs, for the size
/// fixup once the execution layout is known.
enum PerVertexSide {
    Input,
    Output,
}

struct Checker<'a> {
    ctx: &'a mut CompilerContext,
    stage: ShaderStage,
    builtins: Builtins,
    limits: ResourceLimits,

    globals: IndexVec<GlobalId, Global>,
    /// Values of global `const` scalars, for constant folding.
    global_consts: HashMap<GlobalId, ConstValue>,
    functions: IndexVec<FuncId, Function>,
    overloads: HashMap<Name, Vec<FuncId>>,
    struct_names: HashMap<Name, Ty>,
    scopes: ScopeStack,
    exec: ExecInfo,
    /// Materialized `gl_*` variables, by name.
    builtin_vars: HashMap<String, GlobalId>,
    /// Arrayed per-vertex builtins whose length depends on the layout.
    per_vertex_globals: Vec<(GlobalId, PerVertexSide)>,

    // Per-function state.
    locals: IndexVec<LocalId, LocalVar>,
    current_ret: Ty,
    loop_depth: usize,
    switch_depth: usize,
    call_edges: HashMap<FuncId, HashSet<FuncId>>,
    current_fn: FuncId,
}

impl<'a> Checker<'a> {
    fn run(mut self, unit: &TranslationUnit) -> CheckedUnit {
        // Collect struct types, globals, interface blocks, layout
        // declarations, and function signatures.
        let mut bodies: Vec<(FuncId, &ast::FunctionDecl)> = Vec::new();
        for decl in &unit.decls {
            match &decl.node {
                Decl::Global(g) => self.declare_global(g),
                Decl::Block(b) => self.declare_block(b, decl.span),
                Decl::QualifierOnly { qualifiers } => self.layout_declaration(qualifiers),
                Decl::Precision { .. } => {} // accepted, no effect under Vulkan
                Decl::Function(f) => {
                    if let Some(id) = self.declare_function(f) {
                        if f.body.is_some() {
                            bodies.push((id, f));
                        }
                    }
                }
            }
        }

        for (id, f) in bodies {
            self.check_function_body(id, f);
        }

        let entry = self.find_entry();
        self.check_recursion();
        self.check_binding_collisions();
        self.finalize_exec_layout();
        self.fixup_per_vertex_arrays();

        CheckedUnit {
            stage: self.stage,
            globals: self.globals,
            functions: self.functions,
            entry,
            exec: self.exec,
        }
    }

    fn err(&mut self, code: Code, span: Span, message: impl Into<String>) {
        self.ctx.diagnostics.error_with_code(code, span, message);
    }

    fn type_name(&self, ty: Ty) -> String {
        self.ctx.types.name(ty)
    }

    // ---- types ------------------------------------------------------------

    /// Resolve a type specifier, registering inline struct definitions.
    fn resolve_type_spec(&mut self, spec: &TypeSpecifier) -> Ty {
        match spec {
            TypeSpecifier::Named { name, span } => {
                let interned = self.ctx.intern(name);
                if let Some(&ty) = self.struct_names.get(&interned) {
                    return ty;
                }
                if let Some(ty) = self.ctx.types.from_name(name) {
                    return ty;
                }
                self.err(Code::Type, *span, format!("unknown type `{}`", name));
                Ty::ERROR
            }
            TypeSpecifier::Struct {
                name,
                members,
                span,
            } => {
                let mut fields = Vec::new();
                for member in members {
                    let base = self.resolve_type_spec(&member.ty.spec);
                    let base = self.apply_array_dims(base, &member.ty.arrays);
                    for d in &member.declarators {
                        let ty = self.apply_array_dims(base, &d.arrays);
                        if self.ctx.types.is_opaque(ty) {
                            self.err(
                                Code::Type,
                                d.name_span,
                                "opaque types cannot be struct members",
                            );
                        }
                        fields.push(StructMember {
                            name: d.name.clone(),
                            ty,
                            span: d.name_span,
                        });
                    }
                }
                let struct_name = name.clone().unwrap_or_else(|| "<anonymous>".to_string());
                let ty = self.ctx.types.declare_struct(StructDef {
                    name: struct_name,
                    members: fields,
                    is_block: false,
                });
                if let Some(name) = name {
                    let interned = self.ctx.intern(name);
                    if self.struct_names.insert(interned, ty).is_some() {
                        self.err(Code::Type, *span, format!("redefinition of struct `{}`", name));
                    }
                }
                ty
            }
        }
    }

    /// Apply array dimensions, outermost first.
    fn apply_array_dims(&mut self, base: Ty, dims: &[ArrayDim]) -> Ty {
        let mut ty = base;
        for dim in dims.iter().rev() {
            let size = match &dim.size {
                Some(expr) => {
                    let typed = self.check_expr(expr);
                    match self.const_int(&typed) {
                        Some(n) if n > 0 => Some(n as u32),
                        Some(_) => {
                            self.err(Code::Type, dim.span, "array size must be positive");
                            Some(1)
                        }
                        None => {
                            if !typed.is_error() {
                                self.err(
                                    Code::Type,
                                    dim.span,
                                    "array size must be a constant integer expression",
                                );
                            }
                            Some(1)
                        }
                    }
                }
                None => None,
            };
            ty = self.ctx.types.array(ty, size);
        }
        ty
    }

    fn resolve_full_type(&mut self, ft: &FullType, declarator_dims: &[ArrayDim]) -> Ty {
        let base = self.resolve_type_spec(&ft.spec);
        let base = self.apply_array_dims(base, &ft.arrays);
        self.apply_array_dims(base, declarator_dims)
    }

    // ---- layout qualifiers -------------------------------------------------

    fn layout_items<'q>(qualifiers: &'q [Spanned<Qualifier>]) -> Vec<&'q LayoutItem> {
        let mut items = Vec::new();
        for q in qualifiers {
            if let Qualifier::Layout(list) = &q.node {
                items.extend(list.iter());
            }
        }
        items
    }

    fn layout_value(items: &[&LayoutItem], name: &str) -> Option<u64> {
        items.iter().find(|i| i.name == name).and_then(|i| match i.value {
            Some(LayoutValue::Int(v)) => Some(v),
            _ => None,
        })
    }

    fn layout_flag(items: &[&LayoutItem], name: &str) -> bool {
        items.iter().any(|i| i.name == name && i.value.is_none())
    }

    fn storage_of(qualifiers: &[Spanned<Qualifier>]) -> Option<(StorageQualifier, Span)> {
        qualifiers.iter().find_map(|q| match q.node {
            Qualifier::Storage(s) => Some((s, q.span)),
            _ => None,
        })
    }

    fn interp_of(qualifiers: &[Spanned<Qualifier>]) -> Option<InterpQualifier> {
        qualifiers.iter().find_map(|q| match q.node {
            Qualifier::Interpolation(i) => Some(i),
            _ => None,
        })
    }

    // ---- globals ----------------------------------------------------------

    fn declare_global(&mut self, g: &ast::GlobalDecl) {
        // A bare struct definition has no declarators; resolving the type
        // is the whole declaration.
        if g.declarators.is_empty() {
            self.resolve_type_spec(&g.ty.spec);
            return;
        }

        let storage = Self::storage_of(&g.ty.qualifiers);
        let interp = Self::interp_of(&g.ty.qualifiers);
        let items = Self::layout_items(&g.ty.qualifiers);
        let location = Self::layout_value(&items, "location").map(|v| v as u32);
        let set = Self::layout_value(&items, "set").map(|v| v as u32);
        let binding = Self::layout_value(&items, "binding").map(|v| v as u32);

        for d in &g.declarators {
            let ty = self.resolve_full_type(&g.ty, &d.arrays);
            let name = self.ctx.intern(&d.name);
            let is_opaque = self.ctx.types.is_opaque(ty);

            let kind = match storage.map(|(s, _)| s) {
                Some(StorageQualifier::Const) => {
                    let init = match &d.init {
                        Some(init) => Some(self.check_initializer(init, ty)),
                        None => {
                            self.err(
                                Code::Type,
                                d.name_span,
                                "const variable requires an initializer",
                            );
                            None
                        }
                    };
                    GlobalKind::Private { init }
                }
                Some(StorageQualifier::In) => {
                    self.reject_init(d, "input");
                    match location {
                        Some(location) => GlobalKind::Input { location },
                        None => {
                            self.err(
                                Code::Type,
                                d.name_span,
                                format!("input `{}` requires layout(location = N)", d.name),
                            );
                            GlobalKind::Input { location: 0 }
                        }
                    }
                }
                Some(StorageQualifier::Out) => {
                    self.reject_init(d, "output");
                    match location {
                        Some(location) => GlobalKind::Output { location },
                        None => {
                            self.err(
                                Code::Type,
                                d.name_span,
                                format!("output `{}` requires layout(location = N)", d.name),
                            );
                            GlobalKind::Output { location: 0 }
                        }
                    }
                }
                Some(StorageQualifier::Uniform) => {
                    if !is_opaque {
                        self.err(
                            Code::UnsupportedConstruct,
                            d.name_span,
                            format!(
                                "non-opaque uniform `{}` must be inside a uniform block",
                                d.name
                            ),
                        );
                        GlobalKind::Private { init: None }
                    } else {
                        match binding {
                            Some(b) => GlobalKind::Opaque {
                                set: set.unwrap_or(0),
                                binding: b,
                            },
                            None => {
                                self.err(
                                    Code::Type,
                                    d.name_span,
                                    format!("`{}` requires layout(binding = N)", d.name),
                                );
                                GlobalKind::Opaque {
                                    set: set.unwrap_or(0),
                                    binding: 0,
                                }
                            }
                        }
                    }
                }
                Some(StorageQualifier::Buffer) => {
                    self.err(
                        Code::Type,
                        d.name_span,
                        "buffer storage requires an interface block",
                    );
                    GlobalKind::Private { init: None }
                }
                Some(StorageQualifier::Shared) => {
                    if self.stage != ShaderStage::Compute {
                        self.err(
                            Code::Stage,
                            d.name_span,
                            "shared variables are only available in compute shaders",
                        );
                    }
                    self.reject_init(d, "shared");
                    GlobalKind::Shared
                }
                Some(StorageQualifier::Attribute) | Some(StorageQualifier::Varying) => {
                    let word = if storage.map(|(s, _)| s) == Some(StorageQualifier::Attribute) {
                        "attribute"
                    } else {
                        "varying"
                    };
                    self.err(
                        Code::UnsupportedConstruct,
                        d.name_span,
                        format!("legacy `{}` storage is not supported; use in/out", word),
                    );
                    GlobalKind::Private { init: None }
                }
                Some(StorageQualifier::InOut) => {
                    self.err(Code::Type, d.name_span, "inout is only valid on parameters");
                    GlobalKind::Private { init: None }
                }
                None => {
                    let init = d.init.as_ref().map(|init| self.check_initializer(init, ty));
                    GlobalKind::Private { init }
                }
            };

            if let GlobalKind::Private {
                init: Some(ref init),
            } = kind
            {
                if storage.map(|(s, _)| s) == Some(StorageQualifier::Const) {
                    if let Some(value) = self.const_value(init) {
                        self.global_consts.insert(self.globals.next_idx(), value);
                    }
                }
            }

            let id = self.globals.push(Global {
                name,
                ty,
                kind,
                interp,
                span: d.name_span,
            });
            if self.scopes.declare(name, Symbol::Global(id)).is_some() {
                self.err(
                    Code::Resolve,
                    d.name_span,
                    format!("redefinition of `{}`", d.name),
                );
            }
        }
    }

    fn reject_init(&mut self, d: &ast::Declarator, what: &str) {
        if d.init.is_some() {
            self.err(
                Code::Type,
                d.name_span,
                format!("{} variables cannot have initializers", what),
            );
        }
    }

    fn declare_block(&mut self, b: &ast::BlockDecl, span: Span) {
        let storage = Self::storage_of(&b.qualifiers);
        let items = Self::layout_items(&b.qualifiers);
        let set = Self::layout_value(&items, "set").unwrap_or(0) as u32;
        let binding = Self::layout_value(&items, "binding").map(|v| v as u32);
        let push_constant = Self::layout_flag(&items, "push_constant");

        let mut members = Vec::new();
        for m in &b.members {
            let base = self.resolve_type_spec(&m.ty.spec);
            let base = self.apply_array_dims(base, &m.ty.arrays);
            for d in &m.declarators {
                let ty = self.apply_array_dims(base, &d.arrays);
                if self.ctx.types.is_opaque(ty) {
                    self.err(
                        Code::Type,
                        d.name_span,
                        "opaque types cannot be block members",
                    );
                }
                members.push(StructMember {
                    name: d.name.clone(),
                    ty,
                    span: d.name_span,
                });
            }
        }
        let struct_ty = self.ctx.types.declare_struct(StructDef {
            name: b.type_name.clone(),
            members,
            is_block: true,
        });

        let kind = if push_constant {
            GlobalKind::PushConstant
        } else {
            let b_val = match binding {
                Some(v) => v,
                None => {
                    self.err(
                        Code::Type,
                        b.type_name_span,
                        format!("block `{}` requires layout(binding = N)", b.type_name),
                    );
                    0
                }
            };
            match storage.map(|(s, _)| s) {
                Some(StorageQualifier::Buffer) => GlobalKind::StorageBlock {
                    set,
                    binding: b_val,
                },
                Some(StorageQualifier::Uniform) => GlobalKind::UniformBlock {
                    set,
                    binding: b_val,
                },
                _ => {
                    self.err(
                        Code::Type,
                        b.type_name_span,
                        "interface blocks must be declared uniform or buffer",
                    );
                    GlobalKind::UniformBlock {
                        set,
                        binding: b_val,
                    }
                }
            }
        };

        let (ty, instance_name, name_span) = match &b.instance {
            Some((name, nspan, dims)) => {
                let ty = self.apply_array_dims(struct_ty, dims);
                (ty, name.clone(), *nspan)
            }
            None => (struct_ty, format!("<{}>", b.type_name), span),
        };

        let name = self.ctx.intern(&instance_name);
        let id = self.globals.push(Global {
            name,
            ty,
            kind,
            interp: None,
            span: name_span,
        });

        match &b.instance {
            Some(_) => {
                if self.scopes.declare(name, Symbol::Global(id)).is_some() {
                    self.err(
                        Code::Resolve,
                        name_span,
                        format!("redefinition of `{}`", instance_name),
                    );
                }
            }
            None => {
                // Anonymous block: members enter the global scope directly.
                let TyKind::Struct(sid) = *self.ctx.types.kind(struct_ty) else {
                    return;
                };
                let member_names: Vec<(String, Span)> = self
                    .ctx
                    .types
                    .struct_def(sid)
                    .members
                    .iter()
                    .map(|m| (m.name.clone(), m.span))
                    .collect();
                for (idx, (mname, mspan)) in member_names.into_iter().enumerate() {
                    let interned = self.ctx.intern(&mname);
                    if self
                        .scopes
                        .declare(interned, Symbol::BlockMember(id, idx as u32))
                        .is_some()
                    {
                        self.err(
                            Code::Resolve,
                            mspan,
                            format!("redefinition of `{}`", mname),
                        );
                    }
                }
            }
        }
    }

    // ---- layout declarations ----------------------------------------------

    fn layout_declaration(&mut self, qualifiers: &[Spanned<Qualifier>]) {
        let storage = Self::storage_of(qualifiers);
        let items = Self::layout_items(qualifiers);
        let is_in = matches!(storage, Some((StorageQualifier::In, _)));
        let is_out = matches!(storage, Some((StorageQualifier::Out, _)));
        let geometry = self.stage == ShaderStage::Geometry;
        let tes = self.stage == ShaderStage::TessEvaluation;

        for item in &items {
            let value = match item.value {
                Some(LayoutValue::Int(v)) => Some(v as u32),
                _ => None,
            };
            match (item.name.as_str(), is_in, is_out) {
                ("local_size_x", true, _) => self.set_local_size(0, value, item.span),
                ("local_size_y", true, _) => self.set_local_size(1, value, item.span),
                ("local_size_z", true, _) => self.set_local_size(2, value, item.span),

                ("points", true, _) if geometry => {
                    self.set_geom_in(GeometryInput::Points, item.span)
                }
                ("lines", true, _) if geometry => {
                    self.set_geom_in(GeometryInput::Lines, item.span)
                }
                ("lines_adjacency", true, _) if geometry => {
                    self.set_geom_in(GeometryInput::LinesAdjacency, item.span)
                }
                ("triangles", true, _) if geometry => {
                    self.set_geom_in(GeometryInput::Triangles, item.span)
                }
                ("triangles_adjacency", true, _) if geometry => {
                    self.set_geom_in(GeometryInput::TrianglesAdjacency, item.span)
                }
                ("invocations", true, _) if geometry => self.exec.invocations = value,

                ("points", _, true) if geometry => {
                    self.exec.geometry_output = Some(GeometryOutput::Points)
                }
                ("line_strip", _, true) if geometry => {
                    self.exec.geometry_output = Some(GeometryOutput::LineStrip)
                }
                ("triangle_strip", _, true) if geometry => {
                    self.exec.geometry_output = Some(GeometryOutput::TriangleStrip)
                }
                ("max_vertices", _, true) if geometry => self.exec.max_vertices = value,

                ("vertices", _, true) if self.stage == ShaderStage::TessControl => {
                    self.exec.tess_vertices = value
                }

                ("triangles", true, _) if tes => self.exec.tess_mode = Some(TessMode::Triangles),
                ("quads", true, _) if tes => self.exec.tess_mode = Some(TessMode::Quads),
                ("isolines", true, _) if tes => self.exec.tess_mode = Some(TessMode::Isolines),
                ("equal_spacing", true, _) if tes => {
                    self.exec.tess_spacing = Some(TessSpacing::Equal)
                }
                ("fractional_even_spacing", true, _) if tes => {
                    self.exec.tess_spacing = Some(TessSpacing::FractionalEven)
                }
                ("fractional_odd_spacing", true, _) if tes => {
                    self.exec.tess_spacing = Some(TessSpacing::FractionalOdd)
                }
                ("cw", true, _) if tes => self.exec.tess_cw = Some(true),
                ("ccw", true, _) if tes => self.exec.tess_cw = Some(false),

                ("early_fragment_tests", true, _) if self.stage == ShaderStage::Fragment => {
                    self.exec.early_fragment_tests = true
                }

                _ => {
                    self.err(
                        Code::Stage,
                        item.span,
                        format!(
                            "layout qualifier `{}` is not valid here in a {} shader",
                            item.name, self.stage
                        ),
                    );
                }
            }
        }
    }

    fn set_local_size(&mut self, axis: usize, value: Option<u32>, span: Span) {
        if self.stage != ShaderStage::Compute {
            self.err(
                Code::Stage,
                span,
                "local_size is only valid in compute shaders",
            );
            return;
        }
        let size = self.exec.local_size.get_or_insert([1, 1, 1]);
        size[axis] = value.unwrap_or(1);
    }

    fn set_geom_in(&mut self, input: GeometryInput, span: Span) {
        match self.stage {
            ShaderStage::Geometry => self.exec.geometry_input = Some(input),
            ShaderStage::TessEvaluation if input == GeometryInput::Triangles => {
                self.exec.tess_mode = Some(TessMode::Triangles)
            }
            _ => {
                self.err(
                    Code::Stage,
                    span,
                    "primitive layout is only valid in geometry shaders",
                );
            }
        }
    }

    fn finalize_exec_layout(&mut self) {
        match self.stage {
            ShaderStage::Compute => {
                let size = *self.exec.local_size.get_or_insert([1, 1, 1]);
                let max = self.limits.max_compute_work_group_size;
                if size.iter().zip(max).any(|(&s, m)| s == 0 || s > m) {
                    self.missing_layout(&format!(
                        "workgroup size {:?} exceeds the per-dimension limit {:?}",
                        size, max
                    ));
                } else if size.iter().product::<u32>()
                    > self.limits.max_compute_work_group_invocations
                {
                    self.missing_layout(&format!(
                        "workgroup invocation count {} exceeds the limit {}",
                        size.iter().product::<u32>(),
                        self.limits.max_compute_work_group_invocations
                    ));
                }
            }
            ShaderStage::Geometry => {
                if self.exec.geometry_input.is_none() {
                    self.missing_layout("geometry shaders require an input primitive layout");
                }
                if self.exec.geometry_output.is_none() || self.exec.max_vertices.is_none() {
                    self.missing_layout(
                        "geometry shaders require an output primitive layout with max_vertices",
                    );
                }
                if let Some(n) = self.exec.max_vertices {
                    if n == 0 || n > self.limits.max_geometry_output_vertices {
                        self.missing_layout(&format!(
                            "max_vertices = {} is outside the supported range 1..={}",
                            n, self.limits.max_geometry_output_vertices
                        ));
                    }
                }
            }
            ShaderStage::TessControl => {
                match self.exec.tess_vertices {
                    None => self.missing_layout(
                        "tessellation control shaders require layout(vertices = N) out",
                    ),
                    Some(n) if n == 0 || n > self.limits.max_patch_vertices => {
                        self.missing_layout(&format!(
                            "vertices = {} is outside the supported range 1..={}",
                            n, self.limits.max_patch_vertices
                        ));
                    }
                    Some(_) => {}
                }
            }
            ShaderStage::TessEvaluation => {
                if self.exec.tess_mode.is_none() {
                    self.missing_layout(
                        "tessellation evaluation shaders require a primitive mode layout",
                    );
                }
            }
            _ => {}
        }
    }

    fn missing_layout(&mut self, message: &str) {
        self.ctx
            .diagnostics
            .push(crate::diagnostic::Diagnostic::error(message).with_code(Code::Stage));
    }

    // ---- builtin variables -------------------------------------------------

    fn builtin_variable(&mut self, name: &str, span: Span) -> Option<GlobalId> {
        if let Some(&id) = self.builtin_vars.get(name) {
            return Some(id);
        }

        use spirv::BuiltIn;
        use ShaderStage::*;
        let vec2 = self.ctx.types.vector(Ty::FLOAT, 2);
        let vec3 = self.ctx.types.vector(Ty::FLOAT, 3);
        let vec4 = self.ctx.types.vector(Ty::FLOAT, 4);
        let uvec3 = self.ctx.types.vector(Ty::UINT, 3);
        let float4 = self.ctx.types.array(Ty::FLOAT, Some(4));
        let float2 = self.ctx.types.array(Ty::FLOAT, Some(2));

        let stage = self.stage;
        let (ty, builtin, output): (Ty, BuiltIn, bool) = match (name, stage) {
            ("gl_Position", Vertex | TessEvaluation | Geometry) => (vec4, BuiltIn::Position, true),
            ("gl_PointSize", Vertex | TessEvaluation | Geometry) => {
                (Ty::FLOAT, BuiltIn::PointSize, true)
            }
            ("gl_VertexIndex", Vertex) => (Ty::INT, BuiltIn::VertexIndex, false),
            ("gl_InstanceIndex", Vertex) => (Ty::INT, BuiltIn::InstanceIndex, false),
            ("gl_FragCoord", Fragment) => (vec4, BuiltIn::FragCoord, false),
            ("gl_FrontFacing", Fragment) => (Ty::BOOL, BuiltIn::FrontFacing, false),
            ("gl_PointCoord", Fragment) => (vec2, BuiltIn::PointCoord, false),
            ("gl_FragDepth", Fragment) => {
                self.exec.depth_replacing = true;
                (Ty::FLOAT, BuiltIn::FragDepth, true)
            }
            ("gl_PrimitiveID", Fragment | TessControl | TessEvaluation) => {
                (Ty::INT, BuiltIn::PrimitiveId, false)
            }
            ("gl_PrimitiveID", Geometry) => (Ty::INT, BuiltIn::PrimitiveId, true),
            ("gl_InvocationID", TessControl | Geometry) => {
                (Ty::INT, BuiltIn::InvocationId, false)
            }
            ("gl_Layer", Geometry) => (Ty::INT, BuiltIn::Layer, true),
            ("gl_GlobalInvocationID", Compute) => (uvec3, BuiltIn::GlobalInvocationId, false),
            ("gl_LocalInvocationID", Compute) => (uvec3, BuiltIn::LocalInvocationId, false),
            ("gl_WorkGroupID", Compute) => (uvec3, BuiltIn::WorkgroupId, false),
            ("gl_NumWorkGroups", Compute) => (uvec3, BuiltIn::NumWorkgroups, false),
            ("gl_LocalInvocationIndex", Compute) => {
                (Ty::UINT, BuiltIn::LocalInvocationIndex, false)
            }
            ("gl_TessCoord", TessEvaluation) => (vec3, BuiltIn::TessCoord, false),
            ("gl_TessLevelOuter", TessControl) => (float4, BuiltIn::TessLevelOuter, true),
            ("gl_TessLevelOuter", TessEvaluation) => (float4, BuiltIn::TessLevelOuter, false),
            ("gl_TessLevelInner", TessControl) => (float2, BuiltIn::TessLevelInner, true),
            ("gl_TessLevelInner", TessEvaluation) => (float2, BuiltIn::TessLevelInner, false),
            ("gl_PatchVerticesIn", TessControl | TessEvaluation) => {
                (Ty::INT, BuiltIn::PatchVertices, false)
            }
            _ => return None,
        };

        let interned = self.ctx.intern(name);
        let id = self.globals.push(Global {
            name: interned,
            ty,
            kind: GlobalKind::Builtin { builtin, output },
            interp: None,
            span,
        });
        self.builtin_vars.insert(name.to_string(), id);
        Some(id)
    }

    /// Materialize an arrayed per-vertex builtin used through `gl_in` or
    /// `gl_out`. The array length is patched once the layout is final.
    fn per_vertex_builtin(
        &mut self,
        array: &str,
        field: &str,
        span: Span,
    ) -> Option<(GlobalId, Ty)> {
        let output = array == "gl_out";
        match (array, self.stage) {
            ("gl_in", ShaderStage::Geometry | ShaderStage::TessControl | ShaderStage::TessEvaluation) => {}
            ("gl_out", ShaderStage::TessControl) => {}
            _ => return None,
        }

        let (elem, builtin) = match field {
            "gl_Position" => (self.ctx.types.vector(Ty::FLOAT, 4), spirv::BuiltIn::Position),
            "gl_PointSize" => (Ty::FLOAT, spirv::BuiltIn::PointSize),
            _ => return None,
        };

        let key = format!("{}.{}", array, field);
        if let Some(&id) = self.builtin_vars.get(&key) {
            return Some((id, elem));
        }

        let count = self.per_vertex_count(output);
        let ty = self.ctx.types.array(elem, Some(count));
        let interned = self.ctx.intern(&key);
        let id = self.globals.push(Global {
            name: interned,
            ty,
            kind: GlobalKind::Builtin { builtin, output },
            interp: None,
            span,
        });
        self.builtin_vars.insert(key, id);
        self.per_vertex_globals.push((
            id,
            if output {
                PerVertexSide::Output
            } else {
                PerVertexSide::Input
            },
        ));
        Some((id, elem))
    }

    fn per_vertex_count(&self, output: bool) -> u32 {
        if output {
            return self.exec.tess_vertices.unwrap_or(1);
        }
        match self.stage {
            ShaderStage::Geometry => self
                .exec
                .geometry_input
                .map(GeometryInput::vertex_count)
                .unwrap_or(3),
            _ => self.limits.max_patch_vertices,
        }
    }

    /// Layout declarations may follow the first use of `gl_in`/`gl_out`;
    /// recompute the array lengths now that the layout is final.
    fn fixup_per_vertex_arrays(&mut self) {
        let mut fixups = Vec::new();
        for (id, side) in &self.per_vertex_globals {
            let output = matches!(side, PerVertexSide::Output);
            let count = self.per_vertex_count(output);
            let ty = self.globals[*id].ty;
            if let TyKind::Array { elem, .. } = *self.ctx.types.kind(ty) {
                fixups.push((*id, elem, count));
            }
        }
        for (id, elem, count) in fixups {
            self.globals[id].ty = self.ctx.types.array(elem, Some(count));
        }
    }

    // ---- functions ---------------------------------------------------------

    fn declare_function(&mut self, f: &ast::FunctionDecl) -> Option<FuncId> {
        let ret = self.resolve_full_type(&f.return_type, &[]);
        let name = self.ctx.intern(&f.name);

        let mut param_types = Vec::new();
        let mut param_vars = Vec::new();
        for p in &f.params {
            let base = self.resolve_type_spec(&p.type_spec);
            let ty = self.apply_array_dims(base, &p.arrays);
            if self.ctx.types.is_opaque(ty) {
                self.err(
                    Code::UnsupportedConstruct,
                    p.span,
                    "opaque types cannot be function parameters",
                );
            }
            let qual = p
                .node
                .qualifiers
                .iter()
                .find_map(|q| match q.node {
                    Qualifier::Storage(StorageQualifier::Out) => Some(ParamQual::Out),
                    Qualifier::Storage(StorageQualifier::InOut) => Some(ParamQual::InOut),
                    Qualifier::Storage(StorageQualifier::In) => Some(ParamQual::In),
                    _ => None,
                })
                .unwrap_or(ParamQual::In);
            param_types.push(ty);
            param_vars.push((p.node.name.clone(), ty, qual, p.node.name_span));
        }

        // Match against existing overloads of the same name: a prototype
        // followed by its definition shares a FuncId.
        if let Some(ids) = self.overloads.get(&name) {
            for &id in ids {
                let existing = &self.functions[id];
                let same_sig = existing.params.len() == param_types.len()
                    && existing
                        .params
                        .iter()
                        .zip(&param_types)
                        .all(|(&l, t)| existing.locals[l].ty == *t);
                if same_sig {
                    if existing.ret != ret {
                        self.err(
                            Code::Type,
                            f.name_span,
                            format!("overload of `{}` differs only in return type", f.name),
                        );
                        return None;
                    }
                    if f.body.is_some() && !existing.body.is_empty() {
                        self.err(
                            Code::Resolve,
                            f.name_span,
                            format!("redefinition of function `{}`", f.name),
                        );
                        return None;
                    }
                    return Some(id);
                }
            }
        }

        let mut locals = IndexVec::new();
        let mut params = Vec::new();
        for (pname, ty, qual, pspan) in param_vars {
            let pname = pname.unwrap_or_default();
            let interned = self.ctx.intern(&pname);
            let local = locals.push(LocalVar {
                name: interned,
                ty,
                param: Some(qual),
                is_const: false,
                span: pspan,
            });
            params.push(local);
        }

        let id = self.functions.push(Function {
            name,
            ret,
            params,
            locals,
            body: Vec::new(),
            span: f.name_span,
        });
        self.overloads.entry(name).or_default().push(id);
        Some(id)
    }

    fn check_function_body(&mut self, id: FuncId, f: &ast::FunctionDecl) {
        self.locals = std::mem::take(&mut self.functions[id].locals);
        self.current_ret = self.functions[id].ret;
        self.current_fn = id;
        self.loop_depth = 0;
        self.switch_depth = 0;

        self.scopes.push();
        let params = self.functions[id].params.clone();
        for &local in &params {
            let name = self.locals[local].name;
            self.scopes.declare(name, Symbol::Local(local));
        }

        let mut body = Vec::new();
        if let Some(stmts) = &f.body {
            for stmt in stmts {
                body.push(self.check_stmt(stmt));
            }
        }
        self.scopes.pop();

        self.functions[id].locals = std::mem::take(&mut self.locals);
        self.functions[id].body = body;
    }

    fn find_entry(&mut self) -> FuncId {
        let main = self.ctx.intern("main");
        if let Some(ids) = self.overloads.get(&main) {
            for &id in ids {
                let f = &self.functions[id];
                if f.params.is_empty() && f.ret == Ty::VOID {
                    return id;
                }
            }
        }
        self.ctx.diagnostics.push(
            crate::diagnostic::Diagnostic::error("no entry point: expected `void main()`")
                .with_code(Code::Resolve),
        );
        FuncId::INVALID
    }

    fn check_recursion(&mut self) {
        // DFS over the call graph; any back edge is a cycle.
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Visiting,
            Done,
        }
        let mut states: HashMap<FuncId, State> = HashMap::new();
        let mut stack: Vec<(FuncId, Vec<FuncId>)> = Vec::new();
        let all: Vec<FuncId> = self.functions.iter_enumerated().map(|(id, _)| id).collect();

        for root in all {
            if states.contains_key(&root) {
                continue;
            }
            stack.push((root, self.callees(root)));
            states.insert(root, State::Visiting);
            while let Some((func, pending)) = stack.last_mut() {
                match pending.pop() {
                    Some(next) => match states.get(&next) {
                        Some(State::Visiting) => {
                            let span = self.functions[next].span;
                            let name = self.ctx.str(self.functions[next].name);
                            self.err(
                                Code::UnsupportedConstruct,
                                span,
                                format!("recursive call involving `{}`", name),
                            );
                            states.insert(next, State::Done);
                        }
                        Some(State::Done) => {}
                        None => {
                            states.insert(next, State::Visiting);
                            let callees = self.callees(next);
                            stack.push((next, callees));
                        }
                    },
                    None => {
                        states.insert(*func, State::Done);
                        stack.pop();
                    }
                }
            }
        }
    }

    fn callees(&self, id: FuncId) -> Vec<FuncId> {
        self.call_edges
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    fn check_binding_collisions(&mut self) {
        let mut seen: HashMap<(u32, u32), (Name, Span)> = HashMap::new();
        let mut errors = Vec::new();
        for (_, global) in self.globals.iter_enumerated() {
            let key = match global.kind {
                GlobalKind::UniformBlock { set, binding }
                | GlobalKind::StorageBlock { set, binding }
                | GlobalKind::Opaque { set, binding } => (set, binding),
                _ => continue,
            };
            if let Some((other, _)) = seen.get(&key) {
                errors.push((global.span, global.name, *other, key));
            } else {
                seen.insert(key, (global.name, global.span));
            }
        }
        for (span, name, other, (set, binding)) in errors {
            let name = self.ctx.str(name);
            let other = self.ctx.str(other);
            self.err(
                Code::BindingCollision,
                span,
                format!(
                    "`{}` and `{}` both use set {}, binding {}",
                    name, other, set, binding
                ),
            );
        }
    }

    // ---- statements --------------------------------------------------------

    fn check_stmt(&mut self, stmt: &Spanned<Stmt>) -> TypedStmt {
        match &stmt.node {
            Stmt::Compound(stmts) => {
                self.scopes.push();
                let body = stmts.iter().map(|s| self.check_stmt(s)).collect();
                self.scopes.pop();
                TypedStmt::Compound(body)
            }
            Stmt::Decl(decl) => self.check_local_decl(decl),
            Stmt::Expr(expr) => TypedStmt::Expr(self.check_expr(expr)),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.check_condition(cond);
                let then_branch = Box::new(self.check_stmt(then_branch));
                let else_branch = else_branch
                    .as_ref()
                    .map(|s| Box::new(self.check_stmt(s)));
                TypedStmt::If {
                    cond,
                    then_branch,
                    else_branch,
                }
            }
            Stmt::While { cond, body } => {
                let cond = self.check_condition(cond);
                self.loop_depth += 1;
                let body = Box::new(self.check_stmt(body));
                self.loop_depth -= 1;
                TypedStmt::Loop {
                    init: None,
                    cond: Some(cond),
                    step: None,
                    body,
                    check_after: false,
                }
            }
            Stmt::DoWhile { body, cond } => {
                self.loop_depth += 1;
                let body = Box::new(self.check_stmt(body));
                self.loop_depth -= 1;
                let cond = self.check_condition(cond);
                TypedStmt::Loop {
                    init: None,
                    cond: Some(cond),
                    step: None,
                    body,
                    check_after: true,
                }
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                self.scopes.push();
                let init = init.as_ref().map(|s| Box::new(self.check_stmt(s)));
                let cond = cond.as_ref().map(|c| self.check_condition(c));
                let step = step.as_ref().map(|e| self.check_expr(e));
                self.loop_depth += 1;
                let body = Box::new(self.check_stmt(body));
                self.loop_depth -= 1;
                self.scopes.pop();
                TypedStmt::Loop {
                    init,
                    cond,
                    step,
                    body,
                    check_after: false,
                }
            }
            Stmt::Switch { scrutinee, cases } => self.check_switch(scrutinee, cases),
            Stmt::Return(value) => {
                let value = value.as_ref().map(|e| self.check_expr(e));
                match (&value, self.current_ret) {
                    (None, ret) if ret != Ty::VOID => {
                        self.err(
                            Code::Type,
                            stmt.span,
                            format!("return without a value in a `{}` function", self.type_name(ret)),
                        );
                    }
                    (Some(v), ret) if ret == Ty::VOID => {
                        if !v.is_error() {
                            self.err(Code::Type, v.span, "void function cannot return a value");
                        }
                    }
                    (Some(v), ret) => {
                        let converted = self.convert_to(v.clone(), ret);
                        return TypedStmt::Return(Some(converted));
                    }
                    _ => {}
                }
                TypedStmt::Return(value)
            }
            Stmt::Break => {
                if self.loop_depth == 0 && self.switch_depth == 0 {
                    self.err(Code::Type, stmt.span, "break outside of loop or switch");
                }
                TypedStmt::Break
            }
            Stmt::Continue => {
                if self.loop_depth == 0 {
                    self.err(Code::Type, stmt.span, "continue outside of loop");
                }
                TypedStmt::Continue
            }
            Stmt::Discard => {
                if self.stage != ShaderStage::Fragment {
                    self.err(
                        Code::Stage,
                        stmt.span,
                        "discard is only available in fragment shaders",
                    );
                }
                TypedStmt::Discard
            }
            Stmt::Empty => TypedStmt::Empty,
        }
    }

    fn check_condition(&mut self, cond: &Spanned<ast::Expr>) -> TypedExpr {
        let typed = self.check_expr(cond);
        if !typed.is_error() && typed.ty != Ty::BOOL {
            self.err(
                Code::Type,
                typed.span,
                format!("condition must be bool, found `{}`", self.type_name(typed.ty)),
            );
        }
        typed
    }

    fn check_local_decl(&mut self, decl: &ast::GlobalDecl) -> TypedStmt {
        let is_const = decl
            .ty
            .qualifiers
            .iter()
            .any(|q| matches!(q.node, Qualifier::Storage(StorageQualifier::Const)));

        let mut stmts = Vec::new();
        for d in &decl.declarators {
            let mut ty = self.resolve_full_type(&decl.ty, &d.arrays);

            let init = d.init.as_ref().map(|init| {
                // Unsized arrays take their length from the initializer.
                if let TyKind::Array { elem, size: None } = *self.ctx.types.kind(ty) {
                    if let Some(len) = Self::initializer_len(init) {
                        ty = self.ctx.types.array(elem, Some(len));
                    }
                }
                self.check_initializer(init, ty)
            });

            if init.is_none() {
                if let TyKind::Array { size: None, .. } = self.ctx.types.kind(ty) {
                    self.err(
                        Code::Type,
                        d.name_span,
                        "unsized array requires an initializer",
                    );
                }
                if is_const {
                    self.err(Code::Type, d.name_span, "const variable requires an initializer");
                }
            }

            let name = self.ctx.intern(&d.name);
            let local = self.locals.push(LocalVar {
                name,
                ty,
                param: None,
                is_const,
                span: d.name_span,
            });
            if self.scopes.declare(name, Symbol::Local(local)).is_some() {
                self.err(
                    Code::Resolve,
                    d.name_span,
                    format!("redefinition of `{}` in the same scope", d.name),
                );
            }
            stmts.push(TypedStmt::Local { local, init });
        }
        if stmts.len() == 1 {
            stmts.pop().unwrap_or(TypedStmt::Empty)
        } else {
            TypedStmt::Compound(stmts)
        }
    }

    fn initializer_len(init: &Spanned<Initializer>) -> Option<u32> {
        match &init.node {
            Initializer::List(items) => Some(items.len() as u32),
            Initializer::Expr(e) => match &e.node {
                ast::Expr::ArrayCtor { args, .. } => Some(args.len() as u32),
                _ => None,
            },
        }
    }

    fn check_initializer(&mut self, init: &Spanned<Initializer>, expected: Ty) -> TypedExpr {
        match &init.node {
            Initializer::Expr(e) => {
                let typed = self.check_expr(e);
                self.convert_to(typed, expected)
            }
            Initializer::List(items) => self.check_init_list(items, expected, init.span),
        }
    }

    /// Aggregate initializer: `{ a, b, c }` against an array, struct,
    /// vector, or matrix type.
    fn check_init_list(
        &mut self,
        items: &[Spanned<Initializer>],
        expected: Ty,
        span: Span,
    ) -> TypedExpr {
        let kind = self.ctx.types.kind(expected).clone();
        let elem_types: Vec<Ty> = match kind {
            TyKind::Array { elem, size } => {
                let n = size.unwrap_or(items.len() as u32) as usize;
                vec![elem; n]
            }
            TyKind::Struct(id) => self
                .ctx
                .types
                .struct_def(id)
                .members
                .iter()
                .map(|m| m.ty)
                .collect(),
            TyKind::Vector { elem, size } => vec![elem; size as usize],
            TyKind::Matrix { cols, rows, elem } => {
                let col = self.ctx.types.vector(elem, rows);
                vec![col; cols as usize]
            }
            _ => {
                self.err(
                    Code::Type,
                    span,
                    format!(
                        "aggregate initializer is not valid for `{}`",
                        self.type_name(expected)
                    ),
                );
                return TypedExpr::error(span);
            }
        };

        if elem_types.len() != items.len() {
            self.err(
                Code::Type,
                span,
                format!(
                    "initializer has {} elements, `{}` needs {}",
                    items.len(),
                    self.type_name(expected),
                    elem_types.len()
                ),
            );
            return TypedExpr::error(span);
        }

        let args = items
            .iter()
            .zip(elem_types)
            .map(|(item, ty)| self.check_initializer(item, ty))
            .collect();
        TypedExpr {
            ty: expected,
            span,
            kind: ExprKind::Construct { args },
        }
    }

    fn check_switch(
        &mut self,
        scrutinee: &Spanned<ast::Expr>,
        cases: &[ast::SwitchCase],
    ) -> TypedStmt {
        let scrutinee = self.check_expr(scrutinee);
        if !scrutinee.is_error() && !self.ctx.types.is_integer_scalar(scrutinee.ty) {
            self.err(
                Code::Type,
                scrutinee.span,
                "switch expression must be int or uint",
            );
        }

        let mut seen_values = HashSet::new();
        let mut seen_default = false;
        let mut arms = Vec::new();

        self.switch_depth += 1;
        for case in cases {
            let mut values = Vec::new();
            let mut default = false;
            for label in &case.labels {
                match label {
                    CaseLabel::Case(expr) => {
                        let typed = self.check_expr(expr);
                        match self.const_int(&typed) {
                            Some(v) => {
                                if !seen_values.insert(v) {
                                    self.err(
                                        Code::Type,
                                        typed.span,
                                        format!("duplicate case label {}", v),
                                    );
                                }
                                values.push(v);
                            }
                            None => {
                                if !typed.is_error() {
                                    self.err(
                                        Code::Type,
                                        typed.span,
                                        "case label must be a constant integer",
                                    );
                                }
                            }
                        }
                    }
                    CaseLabel::Default(dspan) => {
                        if seen_default {
                            self.err(Code::Type, *dspan, "duplicate default label");
                        }
                        seen_default = true;
                        default = true;
                    }
                }
            }
            self.scopes.push();
            let body = case.body.iter().map(|s| self.check_stmt(s)).collect();
            self.scopes.pop();
            arms.push(SwitchArm {
                values,
                default,
                body,
            });
        }
        self.switch_depth -= 1;

        TypedStmt::Switch { scrutinee, arms }
    }

    // ---- expressions -------------------------------------------------------

    fn check_expr(&mut self, expr: &Spanned<ast::Expr>) -> TypedExpr {
        let span = expr.span;
        match &expr.node {
            ast::Expr::IntLit { value, unsigned } => {
                let (ty, value) = if *unsigned {
                    (Ty::UINT, ConstValue::Uint(*value))
                } else {
                    (Ty::INT, ConstValue::Int(*value as i64))
                };
                TypedExpr {
                    ty,
                    span,
                    kind: ExprKind::Literal(value),
                }
            }
            ast::Expr::FloatLit { value, double } => TypedExpr {
                ty: if *double { Ty::DOUBLE } else { Ty::FLOAT },
                span,
                kind: ExprKind::Literal(ConstValue::Float(*value)),
            },
            ast::Expr::BoolLit(v) => TypedExpr {
                ty: Ty::BOOL,
                span,
                kind: ExprKind::Literal(ConstValue::Bool(*v)),
            },
            ast::Expr::Ident(name) => self.check_ident(name, span),
            ast::Expr::Unary { op, operand } => self.check_unary(*op, operand, span),
            ast::Expr::Binary { op, lhs, rhs } => {
                let lhs = self.check_expr(lhs);
                let rhs = self.check_expr(rhs);
                self.check_binary(*op, lhs, rhs, span)
            }
            ast::Expr::Assign { op, lhs, rhs } => self.check_assign(*op, lhs, rhs, span),
            ast::Expr::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                let cond = self.check_condition(cond);
                let then_expr = self.check_expr(then_expr);
                let else_expr = self.check_expr(else_expr);
                if then_expr.is_error() || else_expr.is_error() {
                    return TypedExpr::error(span);
                }
                match self.ctx.types.common_type(then_expr.ty, else_expr.ty) {
                    Some(ty) => {
                        let then_expr = self.convert_to(then_expr, ty);
                        let else_expr = self.convert_to(else_expr, ty);
                        TypedExpr {
                            ty,
                            span,
                            kind: ExprKind::Ternary {
                                cond: Box::new(cond),
                                then_expr: Box::new(then_expr),
                                else_expr: Box::new(else_expr),
                            },
                        }
                    }
                    None => {
                        let t = self.type_name(then_expr.ty);
                        let e = self.type_name(else_expr.ty);
                        self.err(
                            Code::Type,
                            span,
                            format!("ternary branches have incompatible types `{}` and `{}`", t, e),
                        );
                        TypedExpr::error(span)
                    }
                }
            }
            ast::Expr::Call { callee, args } => self.check_call(callee, args, span),
            ast::Expr::ArrayCtor {
                type_name,
                dims,
                args,
            } => self.check_array_ctor(type_name, dims, args, span),
            ast::Expr::Index { base, index } => self.check_index(base, index, span),
            ast::Expr::Member {
                base,
                field,
                field_span,
            } => self.check_member(base, field, *field_span, span),
        }
    }

    fn check_ident(&mut self, name: &str, span: Span) -> TypedExpr {
        let interned = self.ctx.intern(name);
        if let Some(symbol) = self.scopes.lookup(interned) {
            return self.symbol_expr(symbol, span);
        }
        if name.starts_with("gl_") {
            if let Some(id) = self.builtin_variable(name, span) {
                return TypedExpr {
                    ty: self.globals[id].ty,
                    span,
                    kind: ExprKind::Global(id),
                };
            }
            self.err(
                Code::Stage,
                span,
                format!("`{}` is not available in {} shaders", name, self.stage),
            );
            return TypedExpr::error(span);
        }
        self.err(Code::Resolve, span, format!("unknown identifier `{}`", name));
        TypedExpr::error(span)
    }

    fn symbol_expr(&mut self, symbol: Symbol, span: Span) -> TypedExpr {
        match symbol {
            Symbol::Local(local) => TypedExpr {
                ty: self.locals[local].ty,
                span,
                kind: ExprKind::Local(local),
            },
            Symbol::Global(id) => TypedExpr {
                ty: self.globals[id].ty,
                span,
                kind: ExprKind::Global(id),
            },
            Symbol::BlockMember(id, index) => {
                let base = TypedExpr {
                    ty: self.globals[id].ty,
                    span,
                    kind: ExprKind::Global(id),
                };
                let ty = self.member_type(base.ty, index).unwrap_or(Ty::ERROR);
                TypedExpr {
                    ty,
                    span,
                    kind: ExprKind::Member {
                        base: Box::new(base),
                        index,
                    },
                }
            }
        }
    }

    fn member_type(&self, ty: Ty, index: u32) -> Option<Ty> {
        match self.ctx.types.kind(ty) {
            TyKind::Struct(id) => self
                .ctx
                .types
                .struct_def(*id)
                .members
                .get(index as usize)
                .map(|m| m.ty),
            _ => None,
        }
    }

    fn check_unary(
        &mut self,
        op: UnaryOp,
        operand: &Spanned<ast::Expr>,
        span: Span,
    ) -> TypedExpr {
        let typed = self.check_expr(operand);
        if typed.is_error() {
            return TypedExpr::error(span);
        }
        let base = self.ctx.types.scalar_base(typed.ty);

        let ok = match op {
            UnaryOp::Plus | UnaryOp::Neg => {
                base.is_some_and(|b| b != Ty::BOOL) && self.is_scalar_or_vector_or_matrix(typed.ty)
            }
            UnaryOp::Not => typed.ty == Ty::BOOL,
            UnaryOp::BitNot => base.is_some_and(|b| b == Ty::INT || b == Ty::UINT),
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                let numeric = base.is_some_and(|b| b != Ty::BOOL);
                if numeric {
                    self.require_lvalue(&typed);
                }
                numeric
            }
        };
        if !ok {
            self.err(
                Code::Type,
                span,
                format!(
                    "invalid operand type `{}` for unary operator",
                    self.type_name(typed.ty)
                ),
            );
            return TypedExpr::error(span);
        }
        TypedExpr {
            ty: typed.ty,
            span,
            kind: ExprKind::Unary {
                op,
                operand: Box::new(typed),
            },
        }
    }

    fn is_scalar_or_vector_or_matrix(&self, ty: Ty) -> bool {
        matches!(
            self.ctx.types.kind(ty),
            TyKind::Int
                | TyKind::Uint
                | TyKind::Float
                | TyKind::Double
                | TyKind::Bool
                | TyKind::Vector { .. }
                | TyKind::Matrix { .. }
        )
    }

    fn check_binary(
        &mut self,
        op: BinaryOp,
        lhs: TypedExpr,
        rhs: TypedExpr,
        span: Span,
    ) -> TypedExpr {
        if lhs.is_error() || rhs.is_error() {
            return TypedExpr::error(span);
        }
        match self.binary_result(op, lhs.ty, rhs.ty) {
            Some((result, lconv, rconv)) => {
                let lhs = self.convert_to(lhs, lconv);
                let rhs = self.convert_to(rhs, rconv);
                TypedExpr {
                    ty: result,
                    span,
                    kind: ExprKind::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                }
            }
            None => {
                let l = self.type_name(lhs.ty);
                let r = self.type_name(rhs.ty);
                self.err(
                    Code::Type,
                    span,
                    format!("operator `{}` cannot combine `{}` and `{}`", op.symbol(), l, r),
                );
                TypedExpr::error(span)
            }
        }
    }

    /// Result and converted operand types for a binary operator, or `None`
    /// when the combination is invalid.
    fn binary_result(&mut self, op: BinaryOp, lty: Ty, rty: Ty) -> Option<(Ty, Ty, Ty)> {
        use BinaryOp::*;
        match op {
            LogicalAnd | LogicalOr | LogicalXor => {
                (lty == Ty::BOOL && rty == Ty::BOOL).then_some((Ty::BOOL, Ty::BOOL, Ty::BOOL))
            }
            Lt | Gt | Le | Ge => {
                let base = self.ctx.types.common_type(lty, rty)?;
                (self.ctx.types.is_scalar(base) && base != Ty::BOOL)
                    .then_some((Ty::BOOL, base, base))
            }
            Eq | Ne => {
                // Scalars, vectors, and matrices only; aggregate comparison
                // is not supported.
                let comparable = |t: &Types, ty: Ty| {
                    matches!(
                        t.kind(ty),
                        TyKind::Bool
                            | TyKind::Int
                            | TyKind::Uint
                            | TyKind::Float
                            | TyKind::Double
                            | TyKind::Vector { .. }
                            | TyKind::Matrix { .. }
                    )
                };
                if !comparable(&self.ctx.types, lty) || !comparable(&self.ctx.types, rty) {
                    return None;
                }
                let common = self.ctx.types.common_type(lty, rty)?;
                Some((Ty::BOOL, common, common))
            }
            Shl | Shr => {
                let lbase = self.ctx.types.scalar_base(lty)?;
                let rbase = self.ctx.types.scalar_base(rty)?;
                let ints = matches!(self.ctx.types.kind(lbase), TyKind::Int | TyKind::Uint)
                    && matches!(self.ctx.types.kind(rbase), TyKind::Int | TyKind::Uint);
                ints.then_some((lty, lty, rty))
            }
            BitAnd | BitOr | BitXor => {
                let base = self.ctx.types.common_type(lty, rty)?;
                let b = self.ctx.types.scalar_base(base)?;
                matches!(self.ctx.types.kind(b), TyKind::Int | TyKind::Uint)
                    .then_some((base, base, base))
            }
            Mod => {
                let (result, l, r) = self.componentwise_result(lty, rty)?;
                let b = self.ctx.types.scalar_base(result)?;
                matches!(self.ctx.types.kind(b), TyKind::Int | TyKind::Uint)
                    .then_some((result, l, r))
            }
            Mul => self
                .linear_algebra_mul(lty, rty)
                .or_else(|| self.componentwise_result(lty, rty)),
            Add | Sub | Div => self.componentwise_result(lty, rty),
        }
    }

    /// Matrix-matrix, matrix-vector, and vector-matrix products.
    fn linear_algebra_mul(&mut self, lty: Ty, rty: Ty) -> Option<(Ty, Ty, Ty)> {
        let lk = self.ctx.types.kind(lty).clone();
        let rk = self.ctx.types.kind(rty).clone();
        match (lk, rk) {
            (
                TyKind::Matrix {
                    cols: c1,
                    rows: r1,
                    elem,
                },
                TyKind::Matrix { cols: c2, rows: r2, .. },
            ) => (c1 == r2).then(|| {
                let result = self.ctx.types.matrix(c2, r1, elem);
                (result, lty, rty)
            }),
            (TyKind::Matrix { cols, rows, elem }, TyKind::Vector { size, .. }) => {
                (cols == size).then(|| {
                    let result = self.ctx.types.vector(elem, rows);
                    let vec = self.ctx.types.vector(elem, size);
                    (result, lty, vec)
                })
            }
            (TyKind::Vector { size, .. }, TyKind::Matrix { cols, rows, elem }) => {
                (size == rows).then(|| {
                    let result = self.ctx.types.vector(elem, cols);
                    let vec = self.ctx.types.vector(elem, size);
                    (result, vec, rty)
                })
            }
            _ => None,
        }
    }

    /// Component-wise arithmetic: same shape, vector-scalar, matrix-scalar.
    fn componentwise_result(&mut self, lty: Ty, rty: Ty) -> Option<(Ty, Ty, Ty)> {
        let lbase = self.ctx.types.scalar_base(lty)?;
        let rbase = self.ctx.types.scalar_base(rty)?;
        if lbase == Ty::BOOL || rbase == Ty::BOOL {
            return None;
        }
        let scalar = self.ctx.types.common_type(lbase, rbase)?;

        let l_is_scalar = self.ctx.types.is_scalar(lty);
        let r_is_scalar = self.ctx.types.is_scalar(rty);
        match (l_is_scalar, r_is_scalar) {
            (true, true) => Some((scalar, scalar, scalar)),
            (false, true) => {
                let shaped = self.ctx.types.with_scalar(lty, scalar);
                Some((shaped, shaped, scalar))
            }
            (true, false) => {
                let shaped = self.ctx.types.with_scalar(rty, scalar);
                Some((shaped, scalar, shaped))
            }
            (false, false) => {
                // Shapes must agree.
                let lshaped = self.ctx.types.with_scalar(lty, scalar);
                let rshaped = self.ctx.types.with_scalar(rty, scalar);
                (lshaped == rshaped).then_some((lshaped, lshaped, rshaped))
            }
        }
    }

    fn check_assign(
        &mut self,
        op: ast::AssignOp,
        lhs: &Spanned<ast::Expr>,
        rhs: &Spanned<ast::Expr>,
        span: Span,
    ) -> TypedExpr {
        let lhs = self.check_expr(lhs);
        let rhs = self.check_expr(rhs);
        if lhs.is_error() || rhs.is_error() {
            return TypedExpr::error(span);
        }
        self.require_lvalue(&lhs);

        let binop = op.binary_op();
        let rhs = match binop {
            None => self.convert_to(rhs, lhs.ty),
            Some(bop) => match self.binary_result(bop, lhs.ty, rhs.ty) {
                Some((result, _, rconv)) if self.ctx.types.implicitly_converts(result, lhs.ty) => {
                    self.convert_to(rhs, rconv)
                }
                _ => {
                    let l = self.type_name(lhs.ty);
                    let r = self.type_name(rhs.ty);
                    self.err(
                        Code::Type,
                        span,
                        format!("cannot apply `{}=` to `{}` and `{}`", bop.symbol(), l, r),
                    );
                    return TypedExpr::error(span);
                }
            },
        };

        TypedExpr {
            ty: lhs.ty,
            span,
            kind: ExprKind::Assign {
                op: binop,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        }
    }

    /// Report (once) if `expr` cannot be written to.
    fn require_lvalue(&mut self, expr: &TypedExpr) {
        if let Err(reason) = self.lvalue_status(expr) {
            self.err(Code::Type, expr.span, format!("cannot assign to {}", reason));
        }
    }

    fn lvalue_status(&self, expr: &TypedExpr) -> Result<(), String> {
        match &expr.kind {
            ExprKind::Local(local) => {
                // Parameters, `in` included, are writable copies.
                let var = &self.locals[*local];
                if var.is_const {
                    return Err(format!("const variable `{}`", self.ctx.str(var.name)));
                }
                Ok(())
            }
            ExprKind::Global(id) => {
                let global = &self.globals[*id];
                match &global.kind {
                    GlobalKind::Output { .. }
                    | GlobalKind::Shared
                    | GlobalKind::StorageBlock { .. }
                    | GlobalKind::Private { .. } => Ok(()),
                    GlobalKind::Builtin { output: true, .. } => Ok(()),
                    _ => Err(format!("read-only variable `{}`", self.ctx.str(global.name))),
                }
            }
            ExprKind::Member { base, .. } | ExprKind::Index { base, .. } => {
                self.lvalue_status(base)
            }
            ExprKind::Swizzle { base, indices } => {
                let mut seen = [false; 4];
                for &i in indices {
                    if seen[i as usize] {
                        return Err("a swizzle with repeated components".to_string());
                    }
                    seen[i as usize] = true;
                }
                self.lvalue_status(base)
            }
            _ => Err("this expression".to_string()),
        }
    }

    fn check_index(
        &mut self,
        base: &Spanned<ast::Expr>,
        index: &Spanned<ast::Expr>,
        span: Span,
    ) -> TypedExpr {
        // `gl_in[i].gl_Position` is handled as a whole in check_member; a
        // bare `gl_in[i]` has no usable type of its own.
        if let ast::Expr::Ident(name) = &base.node {
            if name == "gl_in" || name == "gl_out" {
                self.err(
                    Code::Type,
                    span,
                    format!("`{}[...]` must be followed by a member access", name),
                );
                return TypedExpr::error(span);
            }
        }

        let base = self.check_expr(base);
        let index = self.check_expr(index);
        if base.is_error() || index.is_error() {
            return TypedExpr::error(span);
        }
        if !self.ctx.types.is_integer_scalar(index.ty) {
            self.err(Code::Type, index.span, "index must be int or uint");
            return TypedExpr::error(span);
        }

        let elem = match *self.ctx.types.kind(base.ty) {
            TyKind::Array { elem, size } => {
                if let (Some(size), Some(v)) = (size, self.const_int(&index)) {
                    if v < 0 || v as u32 >= size {
                        self.err(
                            Code::Type,
                            index.span,
                            format!("index {} out of range for `{}`", v, self.type_name(base.ty)),
                        );
                    }
                }
                elem
            }
            TyKind::Vector { elem, size } => {
                if let Some(v) = self.const_int(&index) {
                    if v < 0 || v as u8 >= size {
                        self.err(Code::Type, index.span, format!("component {} out of range", v));
                    }
                }
                elem
            }
            TyKind::Matrix { .. } => match self.ctx.types.column_type(base.ty) {
                Some(col) => col,
                None => return TypedExpr::error(span),
            },
            _ => {
                self.err(
                    Code::Type,
                    span,
                    format!("`{}` cannot be indexed", self.type_name(base.ty)),
                );
                return TypedExpr::error(span);
            }
        };

        TypedExpr {
            ty: elem,
            span,
            kind: ExprKind::Index {
                base: Box::new(base),
                index: Box::new(index),
            },
        }
    }

    fn check_member(
        &mut self,
        base: &Spanned<ast::Expr>,
        field: &str,
        field_span: Span,
        span: Span,
    ) -> TypedExpr {
        // Per-vertex builtin access: gl_in[i].gl_Position.
        if let ast::Expr::Index {
            base: array,
            index,
        } = &base.node
        {
            if let ast::Expr::Ident(array_name) = &array.node {
                if array_name == "gl_in" || array_name == "gl_out" {
                    let Some((global, elem)) =
                        self.per_vertex_builtin(array_name, field, span)
                    else {
                        self.err(
                            Code::Stage,
                            span,
                            format!("`{}.{}` is not available in {} shaders", array_name, field, self.stage),
                        );
                        return TypedExpr::error(span);
                    };
                    let index = self.check_expr(index);
                    let base = TypedExpr {
                        ty: self.globals[global].ty,
                        span: array.span,
                        kind: ExprKind::Global(global),
                    };
                    return TypedExpr {
                        ty: elem,
                        span,
                        kind: ExprKind::Index {
                            base: Box::new(base),
                            index: Box::new(index),
                        },
                    };
                }
            }
        }

        let base = self.check_expr(base);
        if base.is_error() {
            return TypedExpr::error(span);
        }

        match self.ctx.types.kind(base.ty) {
            TyKind::Vector { elem, size } => {
                let elem = *elem;
                let size = *size;
                let Some(indices) = swizzle_indices(field) else {
                    self.err(
                        Code::Type,
                        field_span,
                        format!("invalid swizzle `{}`", field),
                    );
                    return TypedExpr::error(span);
                };
                if indices.len() > 4 || indices.iter().any(|&i| i >= size) {
                    self.err(
                        Code::Type,
                        field_span,
                        format!(
                            "swizzle `{}` out of range for `{}`",
                            field,
                            self.type_name(base.ty)
                        ),
                    );
                    return TypedExpr::error(span);
                }
                let ty = if indices.len() == 1 {
                    elem
                } else {
                    self.ctx.types.vector(elem, indices.len() as u8)
                };
                TypedExpr {
                    ty,
                    span,
                    kind: ExprKind::Swizzle {
                        base: Box::new(base),
                        indices,
                    },
                }
            }
            TyKind::Struct(id) => {
                let def = self.ctx.types.struct_def(*id);
                match def.member_index(field) {
                    Some(index) => {
                        let ty = def.members[index].ty;
                        TypedExpr {
                            ty,
                            span,
                            kind: ExprKind::Member {
                                base: Box::new(base),
                                index: index as u32,
                            },
                        }
                    }
                    None => {
                        let name = def.name.clone();
                        self.err(
                            Code::Type,
                            field_span,
                            format!("`{}` has no member `{}`", name, field),
                        );
                        TypedExpr::error(span)
                    }
                }
            }
            _ => {
                self.err(
                    Code::Type,
                    field_span,
                    format!("`{}` has no members", self.type_name(base.ty)),
                );
                TypedExpr::error(span)
            }
        }
    }

    // ---- calls and constructors --------------------------------------------

    fn check_call(
        &mut self,
        callee: &Spanned<ast::Expr>,
        args: &[Spanned<ast::Expr>],
        span: Span,
    ) -> TypedExpr {
        // `.length()` on arrays and vectors.
        if let ast::Expr::Member { base, field, .. } = &callee.node {
            if field == "length" && args.is_empty() {
                let base = self.check_expr(base);
                let len = match self.ctx.types.kind(base.ty) {
                    TyKind::Array { size: Some(n), .. } => Some(*n as i64),
                    TyKind::Vector { size, .. } => Some(*size as i64),
                    _ => None,
                };
                return match len {
                    Some(n) => TypedExpr {
                        ty: Ty::INT,
                        span,
                        kind: ExprKind::Literal(ConstValue::Int(n)),
                    },
                    None => {
                        self.err(Code::Type, span, ".length() requires a sized array or vector");
                        TypedExpr::error(span)
                    }
                };
            }
        }

        let ast::Expr::Ident(name) = &callee.node else {
            self.err(Code::Syntax, callee.span, "called object is not a function");
            return TypedExpr::error(span);
        };

        let typed_args: Vec<TypedExpr> = args.iter().map(|a| self.check_expr(a)).collect();
        if typed_args.iter().any(TypedExpr::is_error) {
            return TypedExpr::error(span);
        }
        let arg_types: Vec<Ty> = typed_args.iter().map(|a| a.ty).collect();

        // Type constructors.
        let interned = self.ctx.intern(name);
        let ctor_ty = self
            .struct_names
            .get(&interned)
            .copied()
            .or_else(|| self.ctx.types.from_name(name));
        if let Some(ty) = ctor_ty {
            return self.check_constructor(ty, typed_args, span);
        }

        // User functions.
        if let Some(ids) = self.overloads.get(&interned).cloned() {
            let candidates: Vec<(Vec<Ty>, FuncId)> = ids
                .iter()
                .map(|&id| {
                    let f = &self.functions[id];
                    let params = f.params.iter().map(|&l| f.locals[l].ty).collect();
                    (params, id)
                })
                .collect();
            match select_overload(
                &self.ctx.types,
                candidates.iter().map(|(p, id)| (p.as_slice(), *id)),
                &arg_types,
            ) {
                OverloadChoice::Unique(id) => return self.finish_user_call(id, typed_args, span),
                OverloadChoice::Ambiguous => {
                    self.err(
                        Code::AmbiguousOverload,
                        span,
                        format!("call to `{}` is ambiguous", name),
                    );
                    return TypedExpr::error(span);
                }
                OverloadChoice::NoMatch => {
                    // Fall through to builtins, mirroring redeclaration of
                    // builtin names.
                }
            }
        }

        // Builtins.
        if let Some(sigs) = self.builtins.get(name) {
            let sigs = sigs.to_vec();
            return match select_overload(
                &self.ctx.types,
                sigs.iter().map(|s| (s.params.as_slice(), s)),
                &arg_types,
            ) {
                OverloadChoice::Unique(sig) => {
                    if let Some(stages) = sig.stages {
                        if !stages.contains(&self.stage) {
                            self.err(
                                Code::Stage,
                                span,
                                format!("`{}` is not available in {} shaders", name, self.stage),
                            );
                            return TypedExpr::error(span);
                        }
                    }
                    let converted: Vec<TypedExpr> = typed_args
                        .into_iter()
                        .zip(&sig.params)
                        .map(|(a, &p)| self.convert_to(a, p))
                        .collect();
                    TypedExpr {
                        ty: sig.ret,
                        span,
                        kind: ExprKind::Builtin {
                            op: sig.op,
                            args: converted,
                        },
                    }
                }
                OverloadChoice::Ambiguous => {
                    self.err(
                        Code::AmbiguousOverload,
                        span,
                        format!("call to `{}` is ambiguous", name),
                    );
                    TypedExpr::error(span)
                }
                OverloadChoice::NoMatch => {
                    let types: Vec<String> =
                        arg_types.iter().map(|&t| self.type_name(t)).collect();
                    self.err(
                        Code::Type,
                        span,
                        format!("no overload of `{}` matches ({})", name, types.join(", ")),
                    );
                    TypedExpr::error(span)
                }
            };
        }

        if self.overloads.contains_key(&interned) {
            let types: Vec<String> = arg_types.iter().map(|&t| self.type_name(t)).collect();
            self.err(
                Code::Type,
                span,
                format!("no overload of `{}` matches ({})", name, types.join(", ")),
            );
        } else {
            self.err(
                Code::Resolve,
                span,
                format!("unknown function `{}`", name),
            );
        }
        TypedExpr::error(span)
    }

    fn finish_user_call(&mut self, id: FuncId, args: Vec<TypedExpr>, span: Span) -> TypedExpr {
        if self.current_fn.is_valid() {
            self.call_edges
                .entry(self.current_fn)
                .or_default()
                .insert(id);
        }

        let params: Vec<(Ty, Option<ParamQual>)> = {
            let f = &self.functions[id];
            f.params
                .iter()
                .map(|&l| (f.locals[l].ty, f.locals[l].param))
                .collect()
        };
        let converted: Vec<TypedExpr> = args
            .into_iter()
            .zip(&params)
            .map(|(a, &(p, qual))| {
                if matches!(qual, Some(ParamQual::Out) | Some(ParamQual::InOut)) {
                    // Out arguments are written back; they must be exact
                    // lvalues.
                    self.require_lvalue(&a);
                    if a.ty != p {
                        self.err(
                            Code::Type,
                            a.span,
                            format!(
                                "out argument must match parameter type `{}` exactly",
                                self.type_name(p)
                            ),
                        );
                    }
                    a
                } else {
                    self.convert_to(a, p)
                }
            })
            .collect();

        TypedExpr {
            ty: self.functions[id].ret,
            span,
            kind: ExprKind::Call {
                func: id,
                args: converted,
            },
        }
    }

    fn check_constructor(&mut self, ty: Ty, args: Vec<TypedExpr>, span: Span) -> TypedExpr {
        match self.ctx.types.kind(ty).clone() {
            TyKind::Bool | TyKind::Int | TyKind::Uint | TyKind::Float | TyKind::Double => {
                if args.len() != 1 {
                    self.err(
                        Code::Type,
                        span,
                        format!("`{}` constructor takes one argument", self.type_name(ty)),
                    );
                    return TypedExpr::error(span);
                }
                let arg = args.into_iter().next().unwrap_or_else(|| unreachable!());
                // Scalar constructors take the first component of any
                // scalar or vector argument.
                let arg = match self.ctx.types.kind(arg.ty) {
                    TyKind::Vector { .. } => {
                        let elem = self
                            .ctx
                            .types
                            .scalar_base(arg.ty)
                            .unwrap_or(Ty::ERROR);
                        TypedExpr {
                            ty: elem,
                            span: arg.span,
                            kind: ExprKind::Swizzle {
                                base: Box::new(arg),
                                indices: vec![0],
                            },
                        }
                    }
                    _ => arg,
                };
                if !self.ctx.types.is_scalar(arg.ty) {
                    self.err(
                        Code::Type,
                        span,
                        format!(
                            "cannot construct `{}` from `{}`",
                            self.type_name(ty),
                            self.type_name(arg.ty)
                        ),
                    );
                    return TypedExpr::error(span);
                }
                self.explicit_convert(arg, ty, span)
            }
            TyKind::Vector { elem, size } => self.check_vector_ctor(ty, elem, size, args, span),
            TyKind::Matrix { cols, rows, elem } => {
                self.check_matrix_ctor(ty, cols, rows, elem, args, span)
            }
            TyKind::Struct(id) => {
                let member_types: Vec<Ty> = self
                    .ctx
                    .types
                    .struct_def(id)
                    .members
                    .iter()
                    .map(|m| m.ty)
                    .collect();
                if member_types.len() != args.len() {
                    self.err(
                        Code::Type,
                        span,
                        format!(
                            "`{}` constructor takes {} arguments, found {}",
                            self.type_name(ty),
                            member_types.len(),
                            args.len()
                        ),
                    );
                    return TypedExpr::error(span);
                }
                let converted = args
                    .into_iter()
                    .zip(member_types)
                    .map(|(a, t)| self.convert_to(a, t))
                    .collect();
                TypedExpr {
                    ty,
                    span,
                    kind: ExprKind::Construct { args: converted },
                }
            }
            _ => {
                self.err(
                    Code::Type,
                    span,
                    format!("`{}` is not constructible", self.type_name(ty)),
                );
                TypedExpr::error(span)
            }
        }
    }

    fn check_vector_ctor(
        &mut self,
        ty: Ty,
        elem: Ty,
        size: u8,
        args: Vec<TypedExpr>,
        span: Span,
    ) -> TypedExpr {
        if args.is_empty() {
            self.err(Code::Type, span, "vector constructor needs arguments");
            return TypedExpr::error(span);
        }

        // Single argument: splat a scalar or truncate a wider vector.
        if args.len() == 1 {
            let arg = args.into_iter().next().unwrap_or_else(|| unreachable!());
            if self.ctx.types.is_scalar(arg.ty) {
                let arg = self.explicit_convert(arg, elem, span);
                return TypedExpr {
                    ty,
                    span,
                    kind: ExprKind::Construct { args: vec![arg] },
                };
            }
            if let TyKind::Vector { size: asize, .. } = *self.ctx.types.kind(arg.ty) {
                if asize >= size {
                    let target = self.ctx.types.vector(elem, asize);
                    let arg = self.explicit_convert(arg, target, span);
                    return TypedExpr {
                        ty,
                        span,
                        kind: ExprKind::Construct { args: vec![arg] },
                    };
                }
            }
            self.err(
                Code::Type,
                span,
                format!(
                    "cannot construct `{}` from `{}`",
                    self.type_name(ty),
                    self.type_name(arg.ty)
                ),
            );
            return TypedExpr::error(span);
        }

        // Multiple arguments must supply exactly `size` components.
        let mut total = 0u32;
        let mut converted = Vec::with_capacity(args.len());
        for arg in args {
            let count = match self.ctx.types.component_count(arg.ty) {
                Some(c) if !matches!(self.ctx.types.kind(arg.ty), TyKind::Matrix { .. }) => c,
                _ => {
                    self.err(
                        Code::Type,
                        arg.span,
                        format!(
                            "`{}` is not a valid vector constructor argument",
                            self.type_name(arg.ty)
                        ),
                    );
                    return TypedExpr::error(span);
                }
            };
            total += count;
            let target = self.ctx.types.with_scalar(arg.ty, elem);
            converted.push(self.explicit_convert(arg, target, span));
        }
        if total != size as u32 {
            self.err(
                Code::Type,
                span,
                format!(
                    "`{}` constructor needs {} components, found {}",
                    self.type_name(ty),
                    size,
                    total
                ),
            );
            return TypedExpr::error(span);
        }
        TypedExpr {
            ty,
            span,
            kind: ExprKind::Construct { args: converted },
        }
    }

    fn check_matrix_ctor(
        &mut self,
        ty: Ty,
        cols: u8,
        rows: u8,
        elem: Ty,
        args: Vec<TypedExpr>,
        span: Span,
    ) -> TypedExpr {
        // Single scalar: diagonal matrix.
        if args.len() == 1 && self.ctx.types.is_scalar(args[0].ty) {
            let arg = args.into_iter().next().unwrap_or_else(|| unreachable!());
            let arg = self.explicit_convert(arg, elem, span);
            return TypedExpr {
                ty,
                span,
                kind: ExprKind::MatrixDiag {
                    value: Box::new(arg),
                },
            };
        }

        // Column vectors.
        if args.len() == cols as usize
            && args
                .iter()
                .all(|a| matches!(self.ctx.types.kind(a.ty), TyKind::Vector { .. }))
        {
            let col_ty = self.ctx.types.vector(elem, rows);
            let mut converted = Vec::with_capacity(args.len());
            for a in args {
                if self.ctx.types.vector_size(a.ty) != Some(rows) {
                    self.err(
                        Code::Type,
                        a.span,
                        format!(
                            "matrix column must be `{}`, found `{}`",
                            self.type_name(col_ty),
                            self.type_name(a.ty)
                        ),
                    );
                    return TypedExpr::error(span);
                }
                converted.push(self.explicit_convert(a, col_ty, span));
            }
            return TypedExpr {
                ty,
                span,
                kind: ExprKind::Construct { args: converted },
            };
        }

        // Full scalar list, column-major.
        if args.len() == (cols as usize * rows as usize)
            && args.iter().all(|a| self.ctx.types.is_scalar(a.ty))
        {
            let converted = args
                .into_iter()
                .map(|a| self.explicit_convert(a, elem, span))
                .collect();
            return TypedExpr {
                ty,
                span,
                kind: ExprKind::Construct { args: converted },
            };
        }

        self.err(
            Code::Type,
            span,
            format!(
                "`{}` constructor takes a scalar, {} column vectors, or {} scalars",
                self.type_name(ty),
                cols,
                cols as usize * rows as usize
            ),
        );
        TypedExpr::error(span)
    }

    fn check_array_ctor(
        &mut self,
        type_name: &str,
        dims: &[ArrayDim],
        args: &[Spanned<ast::Expr>],
        span: Span,
    ) -> TypedExpr {
        let interned = self.ctx.intern(type_name);
        let elem = self
            .struct_names
            .get(&interned)
            .copied()
            .or_else(|| self.ctx.types.from_name(type_name));
        let Some(elem) = elem else {
            self.err(
                Code::Type,
                span,
                format!("unknown type `{}` in array constructor", type_name),
            );
            return TypedExpr::error(span);
        };

        let ty = self.apply_array_dims(elem, dims);
        let (elem_ty, expected_len) = match *self.ctx.types.kind(ty) {
            TyKind::Array { elem, size } => (elem, size),
            _ => (elem, None),
        };

        let expected_len = expected_len.unwrap_or(args.len() as u32);
        if args.len() as u32 != expected_len {
            self.err(
                Code::Type,
                span,
                format!(
                    "array constructor needs {} elements, found {}",
                    expected_len,
                    args.len()
                ),
            );
            return TypedExpr::error(span);
        }

        let ty = self.ctx.types.array(elem_ty, Some(expected_len));
        let converted = args
            .iter()
            .map(|a| {
                let typed = self.check_expr(a);
                self.convert_to(typed, elem_ty)
            })
            .collect();
        TypedExpr {
            ty,
            span,
            kind: ExprKind::Construct { args: converted },
        }
    }

    // ---- conversions and constants -----------------------------------------

    /// Insert an implicit conversion to `to`, or report a type error.
    fn convert_to(&mut self, expr: TypedExpr, to: Ty) -> TypedExpr {
        if expr.is_error() || expr.ty == to || to == Ty::ERROR {
            return expr;
        }
        if self.ctx.types.implicitly_converts(expr.ty, to) {
            return TypedExpr {
                ty: to,
                span: expr.span,
                kind: ExprKind::Convert {
                    value: Box::new(expr),
                },
            };
        }
        let from = self.type_name(expr.ty);
        let target = self.type_name(to);
        self.err(
            Code::Type,
            expr.span,
            format!("expected `{}`, found `{}`", target, from),
        );
        TypedExpr::error(expr.span)
    }

    /// Constructor-style conversion: any numeric scalar shape to any other.
    fn explicit_convert(&mut self, expr: TypedExpr, to: Ty, span: Span) -> TypedExpr {
        if expr.is_error() || expr.ty == to {
            return expr;
        }
        let from_base = self.ctx.types.scalar_base(expr.ty);
        let to_base = self.ctx.types.scalar_base(to);
        let convertible = match (from_base, to_base) {
            (Some(f), Some(t)) => {
                // Shapes must match; bool participates in explicit
                // constructor conversions.
                let _ = (f, t);
                self.ctx.types.with_scalar(expr.ty, t) == to
            }
            _ => false,
        };
        if !convertible {
            let from = self.type_name(expr.ty);
            let target = self.type_name(to);
            self.err(
                Code::Type,
                span,
                format!("cannot convert `{}` to `{}`", from, target),
            );
            return TypedExpr::error(span);
        }
        TypedExpr {
            ty: to,
            span: expr.span,
            kind: ExprKind::Convert {
                value: Box::new(expr),
            },
        }
    }

    fn const_value(&self, expr: &TypedExpr) -> Option<ConstValue> {
        match &expr.kind {
            ExprKind::Literal(v) => Some(*v),
            ExprKind::Global(id) => self.global_consts.get(id).copied(),
            ExprKind::Convert { value } => {
                let inner = self.const_value(value)?;
                match self.ctx.types.kind(expr.ty) {
                    TyKind::Int => Some(ConstValue::Int(const_as_i64(inner)?)),
                    TyKind::Uint => Some(ConstValue::Uint(const_as_i64(inner)? as u64)),
                    TyKind::Float | TyKind::Double => Some(ConstValue::Float(match inner {
                        ConstValue::Float(f) => f,
                        ConstValue::Int(i) => i as f64,
                        ConstValue::Uint(u) => u as f64,
                        ConstValue::Bool(_) => return None,
                    })),
                    _ => None,
                }
            }
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } => match self.const_value(operand)? {
                ConstValue::Int(v) => Some(ConstValue::Int(-v)),
                ConstValue::Float(v) => Some(ConstValue::Float(-v)),
                _ => None,
            },
            ExprKind::Binary { op, lhs, rhs } => {
                let l = const_as_i64(self.const_value(lhs)?)?;
                let r = const_as_i64(self.const_value(rhs)?)?;
                let v = match op {
                    BinaryOp::Add => l.wrapping_add(r),
                    BinaryOp::Sub => l.wrapping_sub(r),
                    BinaryOp::Mul => l.wrapping_mul(r),
                    BinaryOp::Div if r != 0 => l.wrapping_div(r),
                    BinaryOp::Mod if r != 0 => l.wrapping_rem(r),
                    BinaryOp::Shl => l.wrapping_shl(r as u32),
                    BinaryOp::Shr => l.wrapping_shr(r as u32),
                    BinaryOp::BitAnd => l & r,
                    BinaryOp::BitOr => l | r,
                    BinaryOp::BitXor => l ^ r,
                    _ => return None,
                };
                Some(ConstValue::Int(v))
            }
            _ => None,
        }
    }

    fn const_int(&self, expr: &TypedExpr) -> Option<i64> {
        const_as_i64(self.const_value(expr)?)
    }
}

fn const_as_i64(v: ConstValue) -> Option<i64> {
    match v {
        ConstValue::Int(v) => Some(v),
        ConstValue::Uint(v) => Some(v as i64),
        _ => None,
    }
}

/// Map swizzle characters to component indices. The xyzw, rgba, and stpq
/// sets cannot be mixed.
fn swizzle_indices(field: &str) -> Option<Vec<u8>> {
    const SETS: [&[char; 4]; 3] = [&['x', 'y', 'z', 'w'], &['r', 'g', 'b', 'a'], &['s', 't', 'p', 'q']];
    if field.is_empty() || field.len() > 4 {
        return None;
    }
    'sets: for set in SETS {
        let mut indices = Vec::with_capacity(field.len());
        for c in field.chars() {
            match set.iter().position(|&s| s == c) {
                Some(i) => indices.push(i as u8),
                None => continue 'sets,
            }
        }
        return Some(indices);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax;

    fn check_src(src: &str, stage: ShaderStage) -> (CompilerContext, Option<CheckedUnit>) {
        let mut ctx = CompilerContext::new();
        let id = ctx.source_map.add_inline(src.to_string());
        let unit = match syntax::parse(src, id) {
            Ok(unit) => unit,
            Err(e) => panic!("parse failed: {e}"),
        };
        let checked = check(&mut ctx, &unit, stage);
        (ctx, Some(checked))
    }

    fn assert_clean(src: &str, stage: ShaderStage) -> CheckedUnit {
        let (ctx, checked) = check_src(src, stage);
        assert!(
            !ctx.has_errors(),
            "unexpected errors:\n{}",
            ctx.render_diagnostics()
        );
        checked.unwrap()
    }

    fn assert_code(src: &str, stage: ShaderStage, code: Code) {
        let (ctx, _) = check_src(src, stage);
        assert!(
            ctx.diagnostics.has_code(code),
            "expected {code} diagnostic, got:\n{}",
            ctx.render_diagnostics()
        );
    }

    const MINIMAL_VERT: &str = r#"
layout(location = 0) in vec3 position;
void main() {
    gl_Position = vec4(position, 1.0);
}
"#;

    #[test]
    fn test_minimal_vertex_shader() {
        let unit = assert_clean(MINIMAL_VERT, ShaderStage::Vertex);
        assert!(unit.entry.is_valid());
        // position plus the materialized gl_Position.
        assert_eq!(unit.globals.len(), 2);
    }

    #[test]
    fn test_unknown_identifier() {
        assert_code(
            "void main() { x = 1.0; }\n",
            ShaderStage::Vertex,
            Code::Resolve,
        );
    }

    #[test]
    fn test_type_mismatch() {
        assert_code(
            "void main() { float x = true; }\n",
            ShaderStage::Vertex,
            Code::Type,
        );
    }

    #[test]
    fn test_implicit_int_to_float() {
        assert_clean(
            "void main() { float x = 1; vec3 v = vec3(1, 2, 3); }\n",
            ShaderStage::Vertex,
        );
    }

    #[test]
    fn test_aggregate_initializers() {
        assert_clean(
            r#"
void main() {
    float a[3] = { 1.0, 2.0, 3.0 };
    vec2 v = { 0.0, 1.0 };
    mat2 m = { { 1.0, 0.0 }, { 0.0, 1.0 } };
}
"#,
            ShaderStage::Vertex,
        );
        // Wrong arity still reports through the same path.
        assert_code(
            "void main() { mat2 m = { { 1.0, 0.0 } }; }\n",
            ShaderStage::Vertex,
            Code::Type,
        );
    }

    #[test]
    fn test_no_float_to_int() {
        assert_code(
            "void main() { int x = 1.5; }\n",
            ShaderStage::Vertex,
            Code::Type,
        );
    }

    #[test]
    fn test_missing_entry_point() {
        assert_code(
            "float helper() { return 1.0; }\n",
            ShaderStage::Vertex,
            Code::Resolve,
        );
    }

    #[test]
    fn test_binding_collision() {
        let src = r#"
layout(set = 0, binding = 1) uniform A { float a; };
layout(set = 0, binding = 1) uniform B { float b; };
void main() {}
"#;
        assert_code(src, ShaderStage::Vertex, Code::BindingCollision);
    }

    #[test]
    fn test_distinct_bindings_ok() {
        let src = r#"
layout(set = 0, binding = 0) uniform A { float a; };
layout(set = 1, binding = 0) uniform B { float b; };
void main() { float x = a + b; }
"#;
        assert_clean(src, ShaderStage::Vertex);
    }

    #[test]
    fn test_loose_uniform_rejected() {
        assert_code(
            "uniform float scale;\nvoid main() {}\n",
            ShaderStage::Vertex,
            Code::UnsupportedConstruct,
        );
    }

    #[test]
    fn test_legacy_attribute_rejected() {
        assert_code(
            "attribute vec3 pos;\nvoid main() {}\n",
            ShaderStage::Vertex,
            Code::UnsupportedConstruct,
        );
    }

    #[test]
    fn test_recursion_rejected() {
        let src = r#"
float a(float x);
float b(float x) { return a(x); }
float a(float x) { return b(x); }
void main() { float v = a(1.0); }
"#;
        assert_code(src, ShaderStage::Vertex, Code::UnsupportedConstruct);
    }

    #[test]
    fn test_overload_resolution() {
        let src = r#"
float pick(float x) { return x; }
float pick(vec2 x) { return x.x; }
void main() { float a = pick(1.0) + pick(vec2(1.0)); }
"#;
        assert_clean(src, ShaderStage::Vertex);
    }

    #[test]
    fn test_ambiguous_user_overload() {
        let src = r#"
float pick(float x, uint y) { return x; }
float pick(uint x, float y) { return y; }
void main() { float a = pick(1, 1); }
"#;
        assert_code(src, ShaderStage::Vertex, Code::AmbiguousOverload);
    }

    #[test]
    fn test_swizzle_types() {
        let src = r#"
void main() {
    vec4 v = vec4(1.0);
    vec2 xy = v.xy;
    float r = v.r;
    vec3 sw = v.zyx;
}
"#;
        assert_clean(src, ShaderStage::Vertex);
    }

    #[test]
    fn test_bad_swizzle() {
        assert_code(
            "void main() { vec2 v = vec2(1.0); float z = v.z; }\n",
            ShaderStage::Vertex,
            Code::Type,
        );
    }

    #[test]
    fn test_swizzle_write_no_duplicates() {
        assert_code(
            "void main() { vec3 v; v.xx = vec2(1.0); }\n",
            ShaderStage::Vertex,
            Code::Type,
        );
    }

    #[test]
    fn test_const_is_readonly() {
        assert_code(
            "void main() { const float x = 1.0; x = 2.0; }\n",
            ShaderStage::Vertex,
            Code::Type,
        );
    }

    #[test]
    fn test_input_is_readonly() {
        assert_code(
            "layout(location = 0) in vec3 pos;\nvoid main() { pos = vec3(0.0); }\n",
            ShaderStage::Vertex,
            Code::Type,
        );
    }

    #[test]
    fn test_matrix_vector_product() {
        let src = r#"
layout(set = 0, binding = 0) uniform M { mat4 mvp; };
layout(location = 0) in vec3 pos;
void main() { gl_Position = mvp * vec4(pos, 1.0); }
"#;
        assert_clean(src, ShaderStage::Vertex);
    }

    #[test]
    fn test_matrix_shape_mismatch() {
        assert_code(
            "void main() { mat4 m = mat4(1.0); vec3 v = vec3(1.0); vec3 r = m * v; }\n",
            ShaderStage::Vertex,
            Code::Type,
        );
    }

    #[test]
    fn test_stage_builtin_wrong_stage() {
        assert_code(
            "void main() { vec4 c = gl_FragCoord; }\n",
            ShaderStage::Vertex,
            Code::Stage,
        );
    }

    #[test]
    fn test_discard_outside_fragment() {
        assert_code(
            "void main() { discard; }\n",
            ShaderStage::Vertex,
            Code::Stage,
        );
    }

    #[test]
    fn test_derivative_outside_fragment() {
        assert_code(
            "void main() { float d = dFdx(1.0); }\n",
            ShaderStage::Vertex,
            Code::Stage,
        );
    }

    #[test]
    fn test_fragment_shader_texture() {
        let src = r#"
layout(set = 0, binding = 0) uniform sampler2D tex;
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 color;
void main() { color = texture(tex, uv); }
"#;
        let unit = assert_clean(src, ShaderStage::Fragment);
        assert_eq!(unit.stage, ShaderStage::Fragment);
    }

    #[test]
    fn test_sampler_without_binding() {
        assert_code(
            "uniform sampler2D tex;\nvoid main() {}\n",
            ShaderStage::Fragment,
            Code::Type,
        );
    }

    #[test]
    fn test_compute_local_size() {
        let src = r#"
layout(local_size_x = 8, local_size_y = 4) in;
void main() { uvec3 id = gl_GlobalInvocationID; }
"#;
        let unit = assert_clean(src, ShaderStage::Compute);
        assert_eq!(unit.exec.local_size, Some([8, 4, 1]));
    }

    #[test]
    fn test_local_size_over_limit() {
        assert_code(
            "layout(local_size_x = 4096) in;\nvoid main() {}\n",
            ShaderStage::Compute,
            Code::Stage,
        );
        assert_code(
            "layout(local_size_x = 64, local_size_y = 64) in;\nvoid main() {}\n",
            ShaderStage::Compute,
            Code::Stage,
        );
    }

    #[test]
    fn test_local_size_outside_compute() {
        assert_code(
            "layout(local_size_x = 8) in;\nvoid main() {}\n",
            ShaderStage::Vertex,
            Code::Stage,
        );
    }

    #[test]
    fn test_geometry_layout_and_gl_in() {
        let src = r#"
layout(triangles) in;
layout(triangle_strip, max_vertices = 3) out;
void main() {
    for (int i = 0; i < 3; ++i) {
        gl_Position = gl_in[i].gl_Position;
        EmitVertex();
    }
    EndPrimitive();
}
"#;
        let unit = assert_clean(src, ShaderStage::Geometry);
        assert_eq!(unit.exec.geometry_input, Some(GeometryInput::Triangles));
        assert_eq!(unit.exec.max_vertices, Some(3));
        // gl_in.gl_Position must be sized by the input primitive.
        let pv = unit
            .globals
            .iter_enumerated()
            .find(|(_, g)| matches!(g.kind, GlobalKind::Builtin { builtin: spirv::BuiltIn::Position, output: false }))
            .map(|(_, g)| g.ty);
        assert!(pv.is_some());
    }

    #[test]
    fn test_geometry_requires_layout() {
        assert_code(
            "void main() { EmitVertex(); }\n",
            ShaderStage::Geometry,
            Code::Stage,
        );
    }

    #[test]
    fn test_frag_depth_sets_depth_replacing() {
        let src = "void main() { gl_FragDepth = 0.5; }\n";
        let unit = assert_clean(src, ShaderStage::Fragment);
        assert!(unit.exec.depth_replacing);
    }

    #[test]
    fn test_const_array_size() {
        assert_clean(
            "const int N = 4;\nvoid main() { float w[N]; w[3] = 1.0; }\n",
            ShaderStage::Vertex,
        );
    }

    #[test]
    fn test_array_index_out_of_range() {
        assert_code(
            "void main() { float w[2]; w[5] = 1.0; }\n",
            ShaderStage::Vertex,
            Code::Type,
        );
    }

    #[test]
    fn test_switch_duplicate_case() {
        let src = r#"
void main() {
    int x = 1;
    switch (x) {
        case 1: break;
        case 1: break;
    }
}
"#;
        assert_code(src, ShaderStage::Vertex, Code::Type);
    }

    #[test]
    fn test_struct_and_member_access() {
        let src = r#"
struct Light { vec3 pos; float intensity; };
void main() {
    Light l = Light(vec3(0.0), 2.0);
    float i = l.intensity;
    l.pos.y = 1.0;
}
"#;
        assert_clean(src, ShaderStage::Vertex);
    }

    #[test]
    fn test_unknown_member() {
        let src = r#"
struct Light { vec3 pos; };
void main() { Light l = Light(vec3(0.0)); float x = l.power; }
"#;
        assert_code(src, ShaderStage::Vertex, Code::Type);
    }

    #[test]
    fn test_out_param_writeback() {
        let src = r#"
void split(float v, out float a, out float b) { a = v; b = v * 2.0; }
void main() { float x; float y; split(1.0, x, y); }
"#;
        assert_clean(src, ShaderStage::Vertex);
    }

    #[test]
    fn test_ternary_common_type() {
        assert_clean(
            "void main() { float x = true ? 1 : 2.0; }\n",
            ShaderStage::Vertex,
        );
    }

    #[test]
    fn test_anonymous_block_members_visible() {
        let src = r#"
layout(set = 0, binding = 0) uniform Globals { float time; vec2 resolution; };
void main() { float t = time + resolution.x; }
"#;
        assert_clean(src, ShaderStage::Vertex);
    }

    #[test]
    fn test_push_constant_block() {
        let src = r#"
layout(push_constant) uniform Push { mat4 transform; } pc;
layout(location = 0) in vec3 pos;
void main() { gl_Position = pc.transform * vec4(pos, 1.0); }
"#;
        let unit = assert_clean(src, ShaderStage::Vertex);
        assert!(unit
            .globals
            .iter_enumerated()
            .any(|(_, g)| g.kind == GlobalKind::PushConstant));
    }

    #[test]
    fn test_tess_eval_layout() {
        let src = r#"
layout(triangles) in;
void main() {
    gl_Position = gl_in[0].gl_Position * gl_TessCoord.x
                + gl_in[1].gl_Position * gl_TessCoord.y
                + gl_in[2].gl_Position * gl_TessCoord.z;
}
"#;
        let unit = assert_clean(src, ShaderStage::TessEvaluation);
        assert_eq!(unit.exec.tess_mode, Some(TessMode::Triangles));
    }
}
