//! Structured intermediate representation.
//!
//! The IR sits between the typed tree and SPIR-V emission. Control flow is
//! already linearized into basic blocks, with the structured merge
//! information (selection and loop merges) SPIR-V requires attached to the
//! blocks that branch. Expression-level detail is reduced to loads, stores,
//! access chains, and typed value-producing instructions, so the emitter is
//! a plain single-pass translation.

pub mod lower;

pub use lower::lower;

use crate::ids::{BlockId, FuncId, GlobalId, LocalId};
use crate::index_vec::IndexVec;
use crate::interner::Name;
use crate::sema::builtins::BuiltinOp;
use crate::sema::check::{ConstValue, ExecInfo, Global};
use crate::sema::types::Ty;
use crate::stage::ShaderStage;
use crate::syntax::ast::{BinaryOp, UnaryOp};

/// A lowered shader module.
pub struct IrModule {
    pub stage: ShaderStage,
    pub exec: ExecInfo,
    pub globals: IndexVec<GlobalId, Global>,
    pub functions: IndexVec<FuncId, IrFunction>,
    pub entry: FuncId,
}

/// One lowered function. All locals (parameters, user variables, and
/// compiler temporaries) are Function-storage variables; values are an SSA
/// register file whose types live in `value_types`.
pub struct IrFunction {
    pub name: Name,
    pub ret: Ty,
    pub params: Vec<LocalId>,
    pub locals: IndexVec<LocalId, LocalSlot>,
    pub blocks: IndexVec<BlockId, Block>,
    pub value_types: IndexVec<ValueId, Ty>,
}

pub use crate::ids::ValueId;

#[derive(Debug, Clone)]
pub struct LocalSlot {
    pub name: Name,
    pub ty: Ty,
    /// Set for function parameters (passed by pointer).
    pub is_param: bool,
}

/// A basic block. `loop_merge` and `selection_merge` carry the structured
/// control-flow declarations emitted just before the terminator.
#[derive(Debug, Clone)]
pub struct Block {
    pub insts: Vec<Inst>,
    pub term: Terminator,
    /// `(merge block, continue target)` for loop headers.
    pub loop_merge: Option<(BlockId, BlockId)>,
    /// Merge block for conditional branches and switches.
    pub selection_merge: Option<BlockId>,
}

impl Block {
    pub fn new() -> Self {
        Self {
            insts: Vec::new(),
            term: Terminator::Unreachable,
            loop_merge: None,
            selection_merge: None,
        }
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Inst {
    /// Result register; `None` for stores, barriers, and other void ops.
    pub result: Option<ValueId>,
    pub kind: InstKind,
}

/// Where a pointer chain starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrBase {
    Global(GlobalId),
    Local(LocalId),
}

#[derive(Debug, Clone)]
pub enum InstKind {
    /// A literal; the emitter dedupes these into module-level constants.
    Const(ConstValue),
    Undef,
    /// Pointer into a variable. No indices means the variable itself.
    Ptr { base: PtrBase, indices: Vec<ValueId> },
    Load { ptr: ValueId },
    Store { ptr: ValueId, value: ValueId },
    /// Numeric or boolean conversion; semantics depend on the operand and
    /// result scalar types.
    Convert { value: ValueId },
    Unary { op: UnaryOp, operand: ValueId },
    /// Operand types select the instruction (OpFAdd vs OpIAdd, the matrix
    /// product family, ordered float compares vs integer compares).
    Binary { op: BinaryOp, lhs: ValueId, rhs: ValueId },
    CompositeConstruct { parts: Vec<ValueId> },
    CompositeExtract { base: ValueId, indices: Vec<u32> },
    /// Swizzle of a loaded vector.
    VectorShuffle { vector: ValueId, indices: Vec<u32> },
    /// Write one or more components of a loaded vector, yielding the
    /// updated vector.
    VectorInsert { vector: ValueId, value: ValueId, index: u32 },
    Call { func: FuncId, args: Vec<ValueId> },
    /// Builtin function application (GLSL.std.450 or a core opcode).
    Builtin { op: BuiltinOp, args: Vec<ValueId> },
}

#[derive(Debug, Clone)]
pub enum Terminator {
    Branch(BlockId),
    CondBranch {
        cond: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Switch {
        scrutinee: ValueId,
        default: BlockId,
        /// `(literal, target)` pairs, in source order.
        cases: Vec<(i64, BlockId)>,
    },
    Return(Option<ValueId>),
    /// Fragment discard.
    Kill,
    Unreachable,
}
