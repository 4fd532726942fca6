//! Abstract syntax tree for GLSL translation units.
//!
//! The tree is deliberately close to the source text: type names are plain
//! identifiers, qualifiers are kept in source order, and array dimensions
//! carry their (unevaluated) size expressions. All resolution happens in the
//! semantic pass.

use crate::source::Span;
use serde::Serialize;

/// A node with source location information.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

impl<T> std::ops::Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.node
    }
}

/// One preprocessed shader file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationUnit {
    pub decls: Vec<Spanned<Decl>>,
}

/// A top-level declaration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Decl {
    /// Function definition or prototype.
    Function(FunctionDecl),
    /// Global variable, constant, or bare struct definition.
    Global(GlobalDecl),
    /// Interface block (`uniform Block { ... } instance;`).
    Block(BlockDecl),
    /// `precision highp float;`. Parsed and ignored under Vulkan rules.
    Precision {
        precision: String,
        type_name: String,
    },
    /// Qualifiers with no declarator, e.g. `layout(local_size_x = 8) in;`.
    QualifierOnly { qualifiers: Vec<Spanned<Qualifier>> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDecl {
    pub return_type: FullType,
    pub name: String,
    pub name_span: Span,
    pub params: Vec<Spanned<Param>>,
    /// `None` for prototypes.
    pub body: Option<Vec<Spanned<Stmt>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub qualifiers: Vec<Spanned<Qualifier>>,
    pub type_spec: TypeSpecifier,
    pub arrays: Vec<ArrayDim>,
    /// Unnamed parameters are legal (`void main(float)` and `f(void)`).
    pub name: Option<String>,
    pub name_span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalDecl {
    pub ty: FullType,
    pub declarators: Vec<Declarator>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Declarator {
    pub name: String,
    pub name_span: Span,
    /// Array dimensions on the declarator itself (`float x[4]`).
    pub arrays: Vec<ArrayDim>,
    pub init: Option<Spanned<Initializer>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Initializer {
    Expr(Spanned<Expr>),
    List(Vec<Spanned<Initializer>>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockDecl {
    pub qualifiers: Vec<Spanned<Qualifier>>,
    /// The block type name (`Block` in `uniform Block { ... }`).
    pub type_name: String,
    pub type_name_span: Span,
    pub members: Vec<Spanned<MemberDecl>>,
    /// Optional instance name with its array dimensions.
    pub instance: Option<(String, Span, Vec<ArrayDim>)>,
}

/// A struct or block member line (`vec3 a, b;`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberDecl {
    pub ty: FullType,
    pub declarators: Vec<Declarator>,
}

/// Qualifiers plus type specifier plus type-level array dimensions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullType {
    pub qualifiers: Vec<Spanned<Qualifier>>,
    pub spec: TypeSpecifier,
    pub arrays: Vec<ArrayDim>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TypeSpecifier {
    /// Builtin type name or a previously declared struct name.
    Named { name: String, span: Span },
    /// Inline struct definition.
    Struct {
        name: Option<String>,
        members: Vec<Spanned<MemberDecl>>,
        span: Span,
    },
}

impl TypeSpecifier {
    pub fn span(&self) -> Span {
        match self {
            TypeSpecifier::Named { span, .. } | TypeSpecifier::Struct { span, .. } => *span,
        }
    }
}

/// One array dimension; `None` size means unsized (`[]`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrayDim {
    pub size: Option<Spanned<Expr>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Qualifier {
    Layout(Vec<LayoutItem>),
    Storage(StorageQualifier),
    Interpolation(InterpQualifier),
    Precision(String),
    Memory(String),
    /// `centroid`, `patch`, `sample`, `invariant`.
    Auxiliary(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutItem {
    pub name: String,
    pub value: Option<LayoutValue>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LayoutValue {
    Int(u64),
    Ident(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StorageQualifier {
    Const,
    In,
    Out,
    InOut,
    Uniform,
    Buffer,
    Shared,
    /// Legacy; rejected during validation.
    Attribute,
    /// Legacy; rejected during validation.
    Varying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InterpQualifier {
    Flat,
    Smooth,
    NoPerspective,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stmt {
    Compound(Vec<Spanned<Stmt>>),
    Decl(GlobalDecl),
    Expr(Spanned<Expr>),
    If {
        cond: Spanned<Expr>,
        then_branch: Box<Spanned<Stmt>>,
        else_branch: Option<Box<Spanned<Stmt>>>,
    },
    For {
        init: Option<Box<Spanned<Stmt>>>,
        cond: Option<Spanned<Expr>>,
        step: Option<Spanned<Expr>>,
        body: Box<Spanned<Stmt>>,
    },
    While {
        cond: Spanned<Expr>,
        body: Box<Spanned<Stmt>>,
    },
    DoWhile {
        body: Box<Spanned<Stmt>>,
        cond: Spanned<Expr>,
    },
    Switch {
        scrutinee: Spanned<Expr>,
        cases: Vec<SwitchCase>,
    },
    Return(Option<Spanned<Expr>>),
    Break,
    Continue,
    Discard,
    Empty,
}

/// One arm of a switch: its labels and the statements up to the next label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchCase {
    pub labels: Vec<CaseLabel>,
    pub body: Vec<Spanned<Stmt>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CaseLabel {
    Case(Spanned<Expr>),
    Default(Span),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    IntLit {
        value: u64,
        unsigned: bool,
    },
    FloatLit {
        value: f64,
        /// `lf`/`LF` suffix.
        double: bool,
    },
    BoolLit(bool),
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Spanned<Expr>>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },
    Assign {
        op: AssignOp,
        lhs: Box<Spanned<Expr>>,
        rhs: Box<Spanned<Expr>>,
    },
    Ternary {
        cond: Box<Spanned<Expr>>,
        then_expr: Box<Spanned<Expr>>,
        else_expr: Box<Spanned<Expr>>,
    },
    /// Function call or type constructor; the callee is an identifier, or a
    /// member access for `.length()`.
    Call {
        callee: Box<Spanned<Expr>>,
        args: Vec<Spanned<Expr>>,
    },
    /// Array constructor: `float[3](1.0, 2.0, 3.0)`.
    ArrayCtor {
        type_name: String,
        dims: Vec<ArrayDim>,
        args: Vec<Spanned<Expr>>,
    },
    Index {
        base: Box<Spanned<Expr>>,
        index: Box<Spanned<Expr>>,
    },
    /// Field access or swizzle.
    Member {
        base: Box<Spanned<Expr>>,
        field: String,
        field_span: Span,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Plus,
    Neg,
    Not,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    LogicalAnd,
    LogicalXor,
    LogicalOr,
}

impl BinaryOp {
    /// Operator text for diagnostics.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::BitOr => "|",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalXor => "^^",
            BinaryOp::LogicalOr => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    And,
    Xor,
    Or,
}

impl AssignOp {
    /// The arithmetic operator a compound assignment applies, if any.
    pub fn binary_op(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Mod => Some(BinaryOp::Mod),
            AssignOp::Shl => Some(BinaryOp::Shl),
            AssignOp::Shr => Some(BinaryOp::Shr),
            AssignOp::And => Some(BinaryOp::BitAnd),
            AssignOp::Xor => Some(BinaryOp::BitXor),
            AssignOp::Or => Some(BinaryOp::BitOr),
        }
    }
}
