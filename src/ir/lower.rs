//! Lowering from the typed tree to the structured IR.
//!
//! Short-circuit operators and ternaries become control flow writing
//! through compiler temporaries, loops take the header/body/continue/merge
//! shape SPIR-V structured control flow requires, and every lvalue becomes
//! an explicit pointer chain.

use crate::context::CompilerContext;
use crate::ids::{BlockId, FuncId, GlobalId, LocalId, ValueId};
use crate::index_vec::IndexVec;
use crate::ir::{Block, Inst, InstKind, IrFunction, IrModule, LocalSlot, PtrBase, Terminator};
use crate::sema::builtins::BuiltinOp;
use crate::sema::check::{
    CheckedUnit, ConstValue, ExprKind, Function, GlobalKind, ParamQual, SwitchArm, TypedExpr,
    TypedStmt,
};
use crate::sema::types::{Ty, TyKind};
use crate::syntax::ast::{BinaryOp, UnaryOp};

/// Lower a validated unit. Must only be called when validation produced no
/// errors; the lowering itself cannot fail.
pub fn lower(ctx: &mut CompilerContext, unit: CheckedUnit) -> IrModule {
    let CheckedUnit {
        stage,
        mut globals,
        functions,
        entry,
        exec,
    } = unit;

    // Pull out the global initializers; they run in the entry prologue.
    let mut global_inits: Vec<(GlobalId, TypedExpr)> = Vec::new();
    for (id, global) in globals.iter_enumerated_mut() {
        if let GlobalKind::Private { init } = &mut global.kind {
            if let Some(expr) = init.take() {
                global_inits.push((id, expr));
            }
        }
    }

    let signatures: IndexVec<FuncId, FnSig> = {
        let mut sigs = IndexVec::new();
        for (_, f) in functions.iter_enumerated() {
            sigs.push(FnSig {
                ret: f.ret,
                params: f
                    .params
                    .iter()
                    .map(|&l| {
                        (
                            f.locals[l].ty,
                            f.locals[l].param.unwrap_or(ParamQual::In),
                        )
                    })
                    .collect(),
            });
        }
        sigs
    };

    let mut lowered = IndexVec::new();
    for (id, func) in functions.into_iter_enumerated() {
        let inits = if id == entry {
            std::mem::take(&mut global_inits)
        } else {
            Vec::new()
        };
        let f = FunctionLowerer::new(ctx, &signatures).lower(func, inits);
        lowered.push(f);
    }

    IrModule {
        stage,
        exec,
        globals,
        functions: lowered,
        entry,
    }
}

struct FnSig {
    ret: Ty,
    params: Vec<(Ty, ParamQual)>,
}

/// A pointer-shaped location, possibly seen through a swizzle.
enum Lvalue {
    Place(Place),
    /// Multi-component swizzle over a vector place.
    Swizzled {
        place: Place,
        indices: Vec<u8>,
        vector_ty: Ty,
    },
}

struct Place {
    base: PtrBase,
    indices: Vec<ValueId>,
    /// Pointee type.
    ty: Ty,
}

struct FunctionLowerer<'a> {
    ctx: &'a mut CompilerContext,
    signatures: &'a IndexVec<FuncId, FnSig>,

    locals: IndexVec<LocalId, LocalSlot>,
    blocks: IndexVec<BlockId, Block>,
    value_types: IndexVec<ValueId, Ty>,
    current: BlockId,
    /// Set once the current block has a terminator; further statements in
    /// the source block are unreachable and dropped.
    sealed: bool,
    break_targets: Vec<BlockId>,
    continue_targets: Vec<BlockId>,
}

impl<'a> FunctionLowerer<'a> {
    fn new(ctx: &'a mut CompilerContext, signatures: &'a IndexVec<FuncId, FnSig>) -> Self {
        let mut blocks = IndexVec::new();
        let entry = blocks.push(Block::new());
        Self {
            ctx,
            signatures,
            locals: IndexVec::new(),
            blocks,
            value_types: IndexVec::new(),
            current: entry,
            sealed: false,
            break_targets: Vec::new(),
            continue_targets: Vec::new(),
        }
    }

    fn lower(mut self, func: Function, global_inits: Vec<(GlobalId, TypedExpr)>) -> IrFunction {
        for (_, var) in func.locals.iter_enumerated() {
            self.locals.push(LocalSlot {
                name: var.name,
                ty: var.ty,
                is_param: var.param.is_some(),
            });
        }

        for (global, init) in &global_inits {
            let value = self.lower_expr(init);
            let ptr = self.emit_ptr(PtrBase::Global(*global), Vec::new(), init.ty);
            self.emit_void(InstKind::Store { ptr, value });
        }

        for stmt in &func.body {
            self.lower_stmt(stmt);
        }

        if !self.sealed {
            if func.ret == Ty::VOID {
                self.terminate(Terminator::Return(None));
            } else {
                let undef = self.emit(InstKind::Undef, func.ret);
                self.terminate(Terminator::Return(Some(undef)));
            }
        }

        IrFunction {
            name: func.name,
            ret: func.ret,
            params: func.params,
            locals: self.locals,
            blocks: self.blocks,
            value_types: self.value_types,
        }
    }

    // ---- block machinery ---------------------------------------------------

    fn new_block(&mut self) -> BlockId {
        self.blocks.push(Block::new())
    }

    fn switch_to(&mut self, block: BlockId) {
        self.current = block;
        self.sealed = false;
    }

    fn terminate(&mut self, term: Terminator) {
        if !self.sealed {
            self.blocks[self.current].term = term;
            self.sealed = true;
        }
    }

    fn emit(&mut self, kind: InstKind, ty: Ty) -> ValueId {
        let result = self.value_types.push(ty);
        if !self.sealed {
            self.blocks[self.current].insts.push(Inst {
                result: Some(result),
                kind,
            });
        }
        result
    }

    fn emit_void(&mut self, kind: InstKind) {
        if !self.sealed {
            self.blocks[self.current]
                .insts
                .push(Inst { result: None, kind });
        }
    }

    fn emit_ptr(&mut self, base: PtrBase, indices: Vec<ValueId>, pointee: Ty) -> ValueId {
        self.emit(InstKind::Ptr { base, indices }, pointee)
    }

    /// A placeholder id for void-returning calls; no instruction is emitted
    /// and the id is never referenced.
    fn void_value(&mut self) -> ValueId {
        self.value_types.push(Ty::VOID)
    }

    fn const_value(&mut self, value: ConstValue, ty: Ty) -> ValueId {
        self.emit(InstKind::Const(value), ty)
    }

    fn const_int(&mut self, v: i64) -> ValueId {
        self.const_value(ConstValue::Int(v), Ty::INT)
    }

    fn temp_local(&mut self, ty: Ty) -> LocalId {
        let name = self.ctx.intern("_tmp");
        self.locals.push(LocalSlot {
            name,
            ty,
            is_param: false,
        })
    }

    // ---- lvalues -----------------------------------------------------------

    fn lower_lvalue(&mut self, expr: &TypedExpr) -> Option<Lvalue> {
        match &expr.kind {
            ExprKind::Local(local) => Some(Lvalue::Place(Place {
                base: PtrBase::Local(*local),
                indices: Vec::new(),
                ty: expr.ty,
            })),
            ExprKind::Global(id) => Some(Lvalue::Place(Place {
                base: PtrBase::Global(*id),
                indices: Vec::new(),
                ty: expr.ty,
            })),
            ExprKind::Member { base, index } => {
                let Some(Lvalue::Place(mut place)) = self.lower_lvalue(base) else {
                    return None;
                };
                let idx = self.const_int(*index as i64);
                place.indices.push(idx);
                place.ty = expr.ty;
                Some(Lvalue::Place(place))
            }
            ExprKind::Index { base, index } => {
                let Some(Lvalue::Place(mut place)) = self.lower_lvalue(base) else {
                    return None;
                };
                let idx = self.lower_expr(index);
                place.indices.push(idx);
                place.ty = expr.ty;
                Some(Lvalue::Place(place))
            }
            ExprKind::Swizzle { base, indices } => {
                let vector_ty = base.ty;
                let Some(Lvalue::Place(mut place)) = self.lower_lvalue(base) else {
                    return None;
                };
                if indices.len() == 1 {
                    let idx = self.const_int(indices[0] as i64);
                    place.indices.push(idx);
                    place.ty = expr.ty;
                    Some(Lvalue::Place(place))
                } else {
                    Some(Lvalue::Swizzled {
                        place,
                        indices: indices.clone(),
                        vector_ty,
                    })
                }
            }
            _ => None,
        }
    }

    fn load_place(&mut self, place: &Place) -> ValueId {
        let ptr = self.emit_ptr(place.base, place.indices.clone(), place.ty);
        self.emit(InstKind::Load { ptr }, place.ty)
    }

    fn store_place(&mut self, place: &Place, value: ValueId) {
        let ptr = self.emit_ptr(place.base, place.indices.clone(), place.ty);
        self.emit_void(InstKind::Store { ptr, value });
    }

    fn load_lvalue(&mut self, lv: &Lvalue, ty: Ty) -> ValueId {
        match lv {
            Lvalue::Place(place) => self.load_place(place),
            Lvalue::Swizzled {
                place,
                indices,
                vector_ty,
            } => {
                let ptr = self.emit_ptr(place.base, place.indices.clone(), *vector_ty);
                let vector = self.emit(InstKind::Load { ptr }, *vector_ty);
                self.emit(
                    InstKind::VectorShuffle {
                        vector,
                        indices: indices.iter().map(|&i| i as u32).collect(),
                    },
                    ty,
                )
            }
        }
    }

    fn store_lvalue(&mut self, lv: &Lvalue, value: ValueId) {
        match lv {
            Lvalue::Place(place) => self.store_place(place, value),
            Lvalue::Swizzled {
                place,
                indices,
                vector_ty,
            } => {
                // Read-modify-write of the whole vector.
                let ptr = self.emit_ptr(place.base, place.indices.clone(), *vector_ty);
                let mut vector = self.emit(InstKind::Load { ptr }, *vector_ty);
                let elem = self.scalar_elem(*vector_ty);
                for (i, &component) in indices.iter().enumerate() {
                    let part = self.emit(
                        InstKind::CompositeExtract {
                            base: value,
                            indices: vec![i as u32],
                        },
                        elem,
                    );
                    vector = self.emit(
                        InstKind::VectorInsert {
                            vector,
                            value: part,
                            index: component as u32,
                        },
                        *vector_ty,
                    );
                }
                let ptr = self.emit_ptr(place.base, place.indices.clone(), *vector_ty);
                self.emit_void(InstKind::Store { ptr, value: vector });
            }
        }
    }

    fn scalar_elem(&self, ty: Ty) -> Ty {
        self.ctx.types.scalar_base(ty).unwrap_or(ty)
    }

    // ---- expressions -------------------------------------------------------

    fn lower_expr(&mut self, expr: &TypedExpr) -> ValueId {
        match &expr.kind {
            ExprKind::Literal(v) => self.const_value(*v, expr.ty),
            ExprKind::Local(_)
            | ExprKind::Global(_)
            | ExprKind::Member { .. }
            | ExprKind::Index { .. }
            | ExprKind::Swizzle { .. } => match self.lower_lvalue(expr) {
                Some(lv) => self.load_lvalue(&lv, expr.ty),
                None => self.lower_projection(expr),
            },
            ExprKind::Convert { value } => {
                let v = self.lower_expr(value);
                self.emit(InstKind::Convert { value: v }, expr.ty)
            }
            ExprKind::Unary { op, operand } => self.lower_unary(*op, operand, expr.ty),
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                    self.lower_short_circuit(*op, lhs, rhs)
                }
                _ => {
                    let l = self.lower_expr(lhs);
                    let r = self.lower_expr(rhs);
                    self.lower_binary(*op, expr.ty, l, lhs.ty, r, rhs.ty)
                }
            },
            ExprKind::Assign { op, lhs, rhs } => self.lower_assign(*op, lhs, rhs),
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => self.lower_ternary(cond, then_expr, else_expr, expr.ty),
            ExprKind::Call { func, args } => self.lower_call(*func, args),
            ExprKind::Builtin { op, args } => {
                let lowered: Vec<ValueId> = args.iter().map(|a| self.lower_expr(a)).collect();
                if expr.ty == Ty::VOID {
                    self.emit_void(InstKind::Builtin {
                        op: *op,
                        args: lowered,
                    });
                    self.void_value()
                } else {
                    self.emit(
                        InstKind::Builtin {
                            op: *op,
                            args: lowered,
                        },
                        expr.ty,
                    )
                }
            }
            ExprKind::Construct { args } => self.lower_construct(expr.ty, args),
            ExprKind::MatrixDiag { value } => self.lower_matrix_diag(expr.ty, value),
            ExprKind::Error => self.emit(InstKind::Undef, expr.ty),
        }
    }

    /// Member/swizzle/index applied to a value that is not a place, e.g.
    /// `(a + b).x` or `getLight().pos`.
    fn lower_projection(&mut self, expr: &TypedExpr) -> ValueId {
        match &expr.kind {
            ExprKind::Member { base, index } => {
                let b = self.lower_expr(base);
                self.emit(
                    InstKind::CompositeExtract {
                        base: b,
                        indices: vec![*index],
                    },
                    expr.ty,
                )
            }
            ExprKind::Swizzle { base, indices } => {
                let b = self.lower_expr(base);
                if indices.len() == 1 {
                    self.emit(
                        InstKind::CompositeExtract {
                            base: b,
                            indices: vec![indices[0] as u32],
                        },
                        expr.ty,
                    )
                } else {
                    self.emit(
                        InstKind::VectorShuffle {
                            vector: b,
                            indices: indices.iter().map(|&i| i as u32).collect(),
                        },
                        expr.ty,
                    )
                }
            }
            ExprKind::Index { base, index } => {
                // Dynamic indexing of an rvalue: spill to a temporary.
                let b = self.lower_expr(base);
                let tmp = self.temp_local(base.ty);
                let ptr = self.emit_ptr(PtrBase::Local(tmp), Vec::new(), base.ty);
                self.emit_void(InstKind::Store { ptr, value: b });
                let idx = self.lower_expr(index);
                let elem_ptr = self.emit_ptr(PtrBase::Local(tmp), vec![idx], expr.ty);
                self.emit(InstKind::Load { ptr: elem_ptr }, expr.ty)
            }
            _ => self.emit(InstKind::Undef, expr.ty),
        }
    }

    fn lower_unary(&mut self, op: UnaryOp, operand: &TypedExpr, ty: Ty) -> ValueId {
        match op {
            UnaryOp::Plus => self.lower_expr(operand),
            UnaryOp::Neg | UnaryOp::Not | UnaryOp::BitNot => {
                let v = self.lower_expr(operand);
                self.emit(InstKind::Unary { op, operand: v }, ty)
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                let lv = match self.lower_lvalue(operand) {
                    Some(lv) => lv,
                    None => return self.emit(InstKind::Undef, ty),
                };
                let old = self.load_lvalue(&lv, ty);
                let one = self.one_like(ty);
                let bop = match op {
                    UnaryOp::PreInc | UnaryOp::PostInc => BinaryOp::Add,
                    _ => BinaryOp::Sub,
                };
                let new = self.emit(
                    InstKind::Binary {
                        op: bop,
                        lhs: old,
                        rhs: one,
                    },
                    ty,
                );
                self.store_lvalue(&lv, new);
                match op {
                    UnaryOp::PostInc | UnaryOp::PostDec => old,
                    _ => new,
                }
            }
        }
    }

    /// The constant 1 with the shape of `ty` (scalar or splatted vector).
    fn one_like(&mut self, ty: Ty) -> ValueId {
        let elem = self.scalar_elem(ty);
        let one = match self.ctx.types.kind(elem) {
            TyKind::Float | TyKind::Double => ConstValue::Float(1.0),
            TyKind::Uint => ConstValue::Uint(1),
            _ => ConstValue::Int(1),
        };
        let scalar = self.const_value(one, elem);
        self.splat(scalar, ty)
    }

    /// Replicate a scalar value into the shape of `ty`. Returns the value
    /// unchanged when `ty` is scalar.
    fn splat(&mut self, scalar: ValueId, ty: Ty) -> ValueId {
        match *self.ctx.types.kind(ty) {
            TyKind::Vector { size, .. } => self.emit(
                InstKind::CompositeConstruct {
                    parts: vec![scalar; size as usize],
                },
                ty,
            ),
            TyKind::Matrix { cols, rows, elem } => {
                let col_ty = self.ctx.types.vector(elem, rows);
                let col = self.emit(
                    InstKind::CompositeConstruct {
                        parts: vec![scalar; rows as usize],
                    },
                    col_ty,
                );
                self.emit(
                    InstKind::CompositeConstruct {
                        parts: vec![col; cols as usize],
                    },
                    ty,
                )
            }
            _ => scalar,
        }
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        ty: Ty,
        lhs: ValueId,
        lhs_ty: Ty,
        rhs: ValueId,
        rhs_ty: Ty,
    ) -> ValueId {
        // Vector and matrix equality reduce to a single bool.
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) && !self.ctx.types.is_scalar(lhs_ty) {
            return self.lower_aggregate_compare(op, lhs, rhs, lhs_ty);
        }

        // The matrix product family and vector/matrix-times-scalar have
        // dedicated instructions; everything else is component-wise and
        // needs matching shapes.
        let (lhs, rhs) = if op == BinaryOp::Mul && self.is_linear_algebra(lhs_ty, rhs_ty) {
            self.orient_product(lhs, lhs_ty, rhs, rhs_ty)
        } else {
            let lhs = self.splat_to(lhs, lhs_ty, ty, op);
            let rhs = self.splat_to(rhs, rhs_ty, ty, op);
            (lhs, rhs)
        };
        self.emit(InstKind::Binary { op, lhs, rhs }, ty)
    }

    fn is_linear_algebra(&self, lhs_ty: Ty, rhs_ty: Ty) -> bool {
        let mat = |ty| matches!(self.ctx.types.kind(ty), TyKind::Matrix { .. });
        let scalar_or_vec = |ty| {
            self.ctx.types.is_scalar(ty)
                || matches!(self.ctx.types.kind(ty), TyKind::Vector { .. })
        };
        (mat(lhs_ty) || mat(rhs_ty))
            || (self.ctx.types.is_scalar(lhs_ty) != self.ctx.types.is_scalar(rhs_ty)
                && scalar_or_vec(lhs_ty)
                && scalar_or_vec(rhs_ty))
    }

    /// OpVectorTimesScalar and OpMatrixTimesScalar want the scalar on the
    /// right; multiplication commutes, so swap when needed.
    fn orient_product(
        &mut self,
        lhs: ValueId,
        lhs_ty: Ty,
        rhs: ValueId,
        _rhs_ty: Ty,
    ) -> (ValueId, ValueId) {
        if self.ctx.types.is_scalar(lhs_ty) {
            (rhs, lhs)
        } else {
            (lhs, rhs)
        }
    }

    /// Splat a scalar operand up to the result shape for component-wise
    /// operators. Shifts keep integer shapes of their own.
    fn splat_to(&mut self, value: ValueId, from: Ty, result: Ty, op: BinaryOp) -> ValueId {
        if self.ctx.types.is_scalar(from) && !self.ctx.types.is_scalar(result) {
            let elem = self.scalar_elem(if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
                from
            } else {
                result
            });
            let target = self.ctx.types.with_scalar(result, elem);
            return self.splat(value, target);
        }
        value
    }

    fn lower_aggregate_compare(
        &mut self,
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
        operand_ty: Ty,
    ) -> ValueId {
        match *self.ctx.types.kind(operand_ty) {
            TyKind::Vector { size, .. } => {
                let bvec = self.ctx.types.vector(Ty::BOOL, size);
                let (cmp, reduce) = match op {
                    BinaryOp::Eq => (BuiltinOp::CompareEqual, BuiltinOp::All),
                    _ => (BuiltinOp::CompareNotEqual, BuiltinOp::Any),
                };
                let per_component = self.emit(
                    InstKind::Builtin {
                        op: cmp,
                        args: vec![lhs, rhs],
                    },
                    bvec,
                );
                self.emit(
                    InstKind::Builtin {
                        op: reduce,
                        args: vec![per_component],
                    },
                    Ty::BOOL,
                )
            }
            TyKind::Matrix { cols, rows, elem } => {
                let col_ty = self.ctx.types.vector(elem, rows);
                let mut acc = None;
                for c in 0..cols {
                    let lcol = self.emit(
                        InstKind::CompositeExtract {
                            base: lhs,
                            indices: vec![c as u32],
                        },
                        col_ty,
                    );
                    let rcol = self.emit(
                        InstKind::CompositeExtract {
                            base: rhs,
                            indices: vec![c as u32],
                        },
                        col_ty,
                    );
                    let col_eq = self.lower_aggregate_compare(op, lcol, rcol, col_ty);
                    acc = Some(match acc {
                        None => col_eq,
                        Some(prev) => {
                            let combine = match op {
                                BinaryOp::Eq => BinaryOp::LogicalAnd,
                                _ => BinaryOp::LogicalOr,
                            };
                            self.emit(
                                InstKind::Binary {
                                    op: combine,
                                    lhs: prev,
                                    rhs: col_eq,
                                },
                                Ty::BOOL,
                            )
                        }
                    });
                }
                match acc {
                    Some(v) => v,
                    None => self.emit(InstKind::Undef, Ty::BOOL),
                }
            }
            _ => self.emit(InstKind::Undef, Ty::BOOL),
        }
    }

    fn lower_short_circuit(
        &mut self,
        op: BinaryOp,
        lhs: &TypedExpr,
        rhs: &TypedExpr,
    ) -> ValueId {
        let tmp = self.temp_local(Ty::BOOL);
        let lhs_val = self.lower_expr(lhs);
        let ptr = self.emit_ptr(PtrBase::Local(tmp), Vec::new(), Ty::BOOL);
        self.emit_void(InstKind::Store {
            ptr,
            value: lhs_val,
        });

        let eval_rhs = self.new_block();
        let merge = self.new_block();

        // `a && b`: evaluate b only when a is true. `a || b`: only when a
        // is false.
        let (then_block, else_block) = match op {
            BinaryOp::LogicalAnd => (eval_rhs, merge),
            _ => (merge, eval_rhs),
        };
        self.blocks[self.current].selection_merge = Some(merge);
        self.terminate(Terminator::CondBranch {
            cond: lhs_val,
            then_block,
            else_block,
        });

        self.switch_to(eval_rhs);
        let rhs_val = self.lower_expr(rhs);
        let ptr = self.emit_ptr(PtrBase::Local(tmp), Vec::new(), Ty::BOOL);
        self.emit_void(InstKind::Store {
            ptr,
            value: rhs_val,
        });
        self.terminate(Terminator::Branch(merge));

        self.switch_to(merge);
        let ptr = self.emit_ptr(PtrBase::Local(tmp), Vec::new(), Ty::BOOL);
        self.emit(InstKind::Load { ptr }, Ty::BOOL)
    }

    fn lower_ternary(
        &mut self,
        cond: &TypedExpr,
        then_expr: &TypedExpr,
        else_expr: &TypedExpr,
        ty: Ty,
    ) -> ValueId {
        let tmp = self.temp_local(ty);
        let cond_val = self.lower_expr(cond);

        let then_block = self.new_block();
        let else_block = self.new_block();
        let merge = self.new_block();

        self.blocks[self.current].selection_merge = Some(merge);
        self.terminate(Terminator::CondBranch {
            cond: cond_val,
            then_block,
            else_block,
        });

        self.switch_to(then_block);
        let v = self.lower_expr(then_expr);
        let ptr = self.emit_ptr(PtrBase::Local(tmp), Vec::new(), ty);
        self.emit_void(InstKind::Store { ptr, value: v });
        self.terminate(Terminator::Branch(merge));

        self.switch_to(else_block);
        let v = self.lower_expr(else_expr);
        let ptr = self.emit_ptr(PtrBase::Local(tmp), Vec::new(), ty);
        self.emit_void(InstKind::Store { ptr, value: v });
        self.terminate(Terminator::Branch(merge));

        self.switch_to(merge);
        let ptr = self.emit_ptr(PtrBase::Local(tmp), Vec::new(), ty);
        self.emit(InstKind::Load { ptr }, ty)
    }

    fn lower_assign(
        &mut self,
        op: Option<BinaryOp>,
        lhs: &TypedExpr,
        rhs: &TypedExpr,
    ) -> ValueId {
        let lv = match self.lower_lvalue(lhs) {
            Some(lv) => lv,
            None => return self.emit(InstKind::Undef, lhs.ty),
        };
        let value = match op {
            None => self.lower_expr(rhs),
            Some(bop) => {
                let old = self.load_lvalue(&lv, lhs.ty);
                let r = self.lower_expr(rhs);
                self.lower_binary(bop, lhs.ty, old, lhs.ty, r, rhs.ty)
            }
        };
        self.store_lvalue(&lv, value);
        value
    }

    fn lower_call(&mut self, func: FuncId, args: &[TypedExpr]) -> ValueId {
        let (ret, params): (Ty, Vec<(Ty, ParamQual)>) = {
            let sig = &self.signatures[func];
            (sig.ret, sig.params.clone())
        };

        // Arguments pass by pointer: copy in, call, copy out.
        let mut arg_ptrs = Vec::with_capacity(args.len());
        let mut writebacks: Vec<(LocalId, &TypedExpr, Ty)> = Vec::new();
        for (arg, &(param_ty, qual)) in args.iter().zip(&params) {
            let tmp = self.temp_local(param_ty);
            if qual != ParamQual::Out {
                let v = self.lower_expr(arg);
                let ptr = self.emit_ptr(PtrBase::Local(tmp), Vec::new(), param_ty);
                self.emit_void(InstKind::Store { ptr, value: v });
            }
            if qual != ParamQual::In {
                writebacks.push((tmp, arg, param_ty));
            }
            let ptr = self.emit_ptr(PtrBase::Local(tmp), Vec::new(), param_ty);
            arg_ptrs.push(ptr);
        }

        let result = if ret == Ty::VOID {
            self.emit_void(InstKind::Call {
                func,
                args: arg_ptrs,
            });
            self.void_value()
        } else {
            self.emit(
                InstKind::Call {
                    func,
                    args: arg_ptrs,
                },
                ret,
            )
        };

        for (tmp, arg, param_ty) in writebacks {
            let ptr = self.emit_ptr(PtrBase::Local(tmp), Vec::new(), param_ty);
            let v = self.emit(InstKind::Load { ptr }, param_ty);
            if let Some(lv) = self.lower_lvalue(arg) {
                self.store_lvalue(&lv, v);
            }
        }

        result
    }

    fn lower_construct(&mut self, ty: Ty, args: &[TypedExpr]) -> ValueId {
        let kind = self.ctx.types.kind(ty).clone();

        if args.len() == 1 {
            if let TyKind::Vector { size, .. } = kind {
                let arg = &args[0];
                let v = self.lower_expr(arg);
                if self.ctx.types.is_scalar(arg.ty) {
                    return self.emit(
                        InstKind::CompositeConstruct {
                            parts: vec![v; size as usize],
                        },
                        ty,
                    );
                }
                // Same-size vector is already converted; wider one is
                // truncated with a shuffle.
                if arg.ty == ty {
                    return v;
                }
                return self.emit(
                    InstKind::VectorShuffle {
                        vector: v,
                        indices: (0..size as u32).collect(),
                    },
                    ty,
                );
            }
        }

        // Matrix from a full scalar list: group into columns.
        if let TyKind::Matrix { cols, rows, elem } = kind {
            let all_scalar = args.iter().all(|a| self.ctx.types.is_scalar(a.ty));
            if all_scalar && args.len() == cols as usize * rows as usize {
                let col_ty = self.ctx.types.vector(elem, rows);
                let values: Vec<ValueId> = args.iter().map(|a| self.lower_expr(a)).collect();
                let columns: Vec<ValueId> = values
                    .chunks(rows as usize)
                    .map(|chunk| {
                        self.emit(
                            InstKind::CompositeConstruct {
                                parts: chunk.to_vec(),
                            },
                            col_ty,
                        )
                    })
                    .collect();
                return self.emit(InstKind::CompositeConstruct { parts: columns }, ty);
            }
        }

        let parts: Vec<ValueId> = args.iter().map(|a| self.lower_expr(a)).collect();
        self.emit(InstKind::CompositeConstruct { parts }, ty)
    }

    fn lower_matrix_diag(&mut self, ty: Ty, value: &TypedExpr) -> ValueId {
        let TyKind::Matrix { cols, rows, elem } = *self.ctx.types.kind(ty) else {
            return self.emit(InstKind::Undef, ty);
        };
        let diag = self.lower_expr(value);
        let zero = match self.ctx.types.kind(elem) {
            TyKind::Double | TyKind::Float => ConstValue::Float(0.0),
            TyKind::Uint => ConstValue::Uint(0),
            _ => ConstValue::Int(0),
        };
        let zero = self.const_value(zero, elem);
        let col_ty = self.ctx.types.vector(elem, rows);

        let columns: Vec<ValueId> = (0..cols)
            .map(|c| {
                let parts: Vec<ValueId> = (0..rows)
                    .map(|r| if r == c { diag } else { zero })
                    .collect();
                self.emit(InstKind::CompositeConstruct { parts }, col_ty)
            })
            .collect();
        self.emit(InstKind::CompositeConstruct { parts: columns }, ty)
    }

    // ---- statements --------------------------------------------------------

    fn lower_stmt(&mut self, stmt: &TypedStmt) {
        if self.sealed {
            return;
        }
        match stmt {
            TypedStmt::Compound(stmts) => {
                for s in stmts {
                    self.lower_stmt(s);
                }
            }
            TypedStmt::Local { local, init } => {
                if let Some(init) = init {
                    let ty = self.locals[*local].ty;
                    let v = self.lower_expr(init);
                    let ptr = self.emit_ptr(PtrBase::Local(*local), Vec::new(), ty);
                    self.emit_void(InstKind::Store { ptr, value: v });
                }
            }
            TypedStmt::Expr(expr) => {
                self.lower_expr(expr);
            }
            TypedStmt::If {
                cond,
                then_branch,
                else_branch,
            } => self.lower_if(cond, then_branch, else_branch.as_deref()),
            TypedStmt::Loop {
                init,
                cond,
                step,
                body,
                check_after,
            } => self.lower_loop(init.as_deref(), cond.as_ref(), step.as_ref(), body, *check_after),
            TypedStmt::Switch { scrutinee, arms } => self.lower_switch(scrutinee, arms),
            TypedStmt::Return(value) => {
                let v = value.as_ref().map(|e| self.lower_expr(e));
                self.terminate(Terminator::Return(v));
            }
            TypedStmt::Break => {
                if let Some(&target) = self.break_targets.last() {
                    self.terminate(Terminator::Branch(target));
                }
            }
            TypedStmt::Continue => {
                if let Some(&target) = self.continue_targets.last() {
                    self.terminate(Terminator::Branch(target));
                }
            }
            TypedStmt::Discard => self.terminate(Terminator::Kill),
            TypedStmt::Empty => {}
        }
    }

    fn lower_if(
        &mut self,
        cond: &TypedExpr,
        then_branch: &TypedStmt,
        else_branch: Option<&TypedStmt>,
    ) {
        let cond_val = self.lower_expr(cond);
        let then_block = self.new_block();
        let merge = self.new_block();
        let else_block = match else_branch {
            Some(_) => self.new_block(),
            None => merge,
        };

        self.blocks[self.current].selection_merge = Some(merge);
        self.terminate(Terminator::CondBranch {
            cond: cond_val,
            then_block,
            else_block,
        });

        self.switch_to(then_block);
        self.lower_stmt(then_branch);
        self.terminate(Terminator::Branch(merge));

        if let Some(else_branch) = else_branch {
            self.switch_to(else_block);
            self.lower_stmt(else_branch);
            self.terminate(Terminator::Branch(merge));
        }

        self.switch_to(merge);
    }

    fn lower_loop(
        &mut self,
        init: Option<&TypedStmt>,
        cond: Option<&TypedExpr>,
        step: Option<&TypedExpr>,
        body: &TypedStmt,
        check_after: bool,
    ) {
        if let Some(init) = init {
            self.lower_stmt(init);
        }

        let header = self.new_block();
        let body_block = self.new_block();
        let continue_block = self.new_block();
        let merge = self.new_block();

        self.terminate(Terminator::Branch(header));

        // The header carries the OpLoopMerge; condition evaluation gets its
        // own block so the header stays a pure branch point.
        self.switch_to(header);
        self.blocks[header].loop_merge = Some((merge, continue_block));
        if check_after || cond.is_none() {
            self.terminate(Terminator::Branch(body_block));
        } else {
            let cond_block = self.new_block();
            self.terminate(Terminator::Branch(cond_block));
            self.switch_to(cond_block);
            let c = self.lower_expr(cond.unwrap_or_else(|| unreachable!()));
            self.terminate(Terminator::CondBranch {
                cond: c,
                then_block: body_block,
                else_block: merge,
            });
        }

        self.break_targets.push(merge);
        self.continue_targets.push(continue_block);
        self.switch_to(body_block);
        self.lower_stmt(body);
        self.terminate(Terminator::Branch(continue_block));
        self.break_targets.pop();
        self.continue_targets.pop();

        self.switch_to(continue_block);
        if let Some(step) = step {
            self.lower_expr(step);
        }
        if check_after {
            match cond {
                Some(cond) => {
                    let c = self.lower_expr(cond);
                    self.terminate(Terminator::CondBranch {
                        cond: c,
                        then_block: header,
                        else_block: merge,
                    });
                }
                None => self.terminate(Terminator::Branch(header)),
            }
        } else {
            self.terminate(Terminator::Branch(header));
        }

        self.switch_to(merge);
    }

    fn lower_switch(&mut self, scrutinee: &TypedExpr, arms: &[SwitchArm]) {
        let value = self.lower_expr(scrutinee);
        let merge = self.new_block();
        let arm_blocks: Vec<BlockId> = arms.iter().map(|_| self.new_block()).collect();

        let mut cases = Vec::new();
        let mut default = merge;
        for (arm, &block) in arms.iter().zip(&arm_blocks) {
            for &v in &arm.values {
                cases.push((v, block));
            }
            if arm.default {
                default = block;
            }
        }

        self.blocks[self.current].selection_merge = Some(merge);
        self.terminate(Terminator::Switch {
            scrutinee: value,
            default,
            cases,
        });

        self.break_targets.push(merge);
        for (i, (arm, &block)) in arms.iter().zip(&arm_blocks).enumerate() {
            self.switch_to(block);
            for stmt in &arm.body {
                self.lower_stmt(stmt);
            }
            // Fallthrough: an arm that does not jump flows into the next
            // arm, or into the merge for the last one.
            let next = arm_blocks.get(i + 1).copied().unwrap_or(merge);
            self.terminate(Terminator::Branch(next));
        }
        self.break_targets.pop();

        self.switch_to(merge);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema;
    use crate::stage::ShaderStage;
    use crate::syntax;

    fn lower_src(src: &str, stage: ShaderStage) -> (CompilerContext, IrModule) {
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
        let module = lower(&mut ctx, checked);
        (ctx, module)
    }

    fn entry_fn(module: &IrModule) -> &IrFunction {
        &module.functions[module.entry]
    }

    #[test]
    fn test_straight_line_returns() {
        let (_, module) = lower_src(
            "layout(location = 0) in vec3 p;\nvoid main() { gl_Position = vec4(p, 1.0); }\n",
            ShaderStage::Vertex,
        );
        let main = entry_fn(&module);
        assert_eq!(main.blocks.len(), 1);
        let entry = &main.blocks[BlockId::new(0)];
        assert!(matches!(entry.term, Terminator::Return(None)));
        assert!(entry
            .insts
            .iter()
            .any(|i| matches!(i.kind, InstKind::Store { .. })));
    }

    #[test]
    fn test_if_produces_selection_merge() {
        let src = r#"
layout(location = 0) out vec4 color;
void main() {
    if (gl_FragCoord.x > 0.5) {
        color = vec4(1.0);
    } else {
        color = vec4(0.0);
    }
}
"#;
        let (_, module) = lower_src(src, ShaderStage::Fragment);
        let main = entry_fn(&module);
        let header = main
            .blocks
            .iter()
            .find(|b| b.selection_merge.is_some())
            .unwrap();
        assert!(matches!(header.term, Terminator::CondBranch { .. }));
    }

    #[test]
    fn test_loop_shape() {
        let src = r#"
void main() {
    float acc = 0.0;
    for (int i = 0; i < 4; ++i) {
        acc += float(i);
    }
}
"#;
        let (_, module) = lower_src(src, ShaderStage::Vertex);
        let main = entry_fn(&module);
        let (header_id, header) = main
            .blocks
            .iter_enumerated()
            .find(|(_, b)| b.loop_merge.is_some())
            .unwrap();
        let (merge, cont) = header.loop_merge.unwrap_or_else(|| unreachable!());
        assert_ne!(merge, cont);
        // The continue block must branch back to the header.
        assert!(matches!(
            main.blocks[cont].term,
            Terminator::Branch(target) if target == header_id
        ));
    }

    #[test]
    fn test_do_while_checks_after() {
        let src = r#"
void main() {
    int i = 0;
    do { i++; } while (i < 3);
}
"#;
        let (_, module) = lower_src(src, ShaderStage::Vertex);
        let main = entry_fn(&module);
        let (_, header) = main
            .blocks
            .iter_enumerated()
            .find(|(_, b)| b.loop_merge.is_some())
            .unwrap();
        let (_, cont) = header.loop_merge.unwrap_or_else(|| unreachable!());
        // Condition lives in the continue block for do-while.
        assert!(matches!(
            main.blocks[cont].term,
            Terminator::CondBranch { .. }
        ));
    }

    #[test]
    fn test_discard_becomes_kill() {
        let src = r#"
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 color;
void main() {
    if (uv.x < 0.0) {
        discard;
    }
    color = vec4(uv, 0.0, 1.0);
}
"#;
        let (_, module) = lower_src(src, ShaderStage::Fragment);
        let main = entry_fn(&module);
        assert!(main
            .blocks
            .iter()
            .any(|b| matches!(b.term, Terminator::Kill)));
    }

    #[test]
    fn test_switch_terminator_and_fallthrough() {
        let src = r#"
void main() {
    int x = 2;
    int y = 0;
    switch (x) {
        case 0:
        case 1:
            y = 1;
        case 2:
            y = 2;
            break;
        default:
            y = 3;
    }
}
"#;
        let (_, module) = lower_src(src, ShaderStage::Vertex);
        let main = entry_fn(&module);
        let switch_block = main
            .blocks
            .iter()
            .find(|b| matches!(b.term, Terminator::Switch { .. }))
            .unwrap();
        let Terminator::Switch { ref cases, .. } = switch_block.term else {
            unreachable!();
        };
        // Labels 0, 1, 2 all present; 0 and 1 share a target.
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].1, cases[1].1);
        assert!(switch_block.selection_merge.is_some());
    }

    #[test]
    fn test_short_circuit_branches() {
        let src = r#"
void main() {
    float a = 1.0;
    bool ok = a > 0.0 && a < 2.0;
}
"#;
        let (_, module) = lower_src(src, ShaderStage::Vertex);
        let main = entry_fn(&module);
        // Short-circuit AND introduces control flow.
        assert!(main.blocks.len() >= 3);
        assert!(main
            .blocks
            .iter()
            .any(|b| matches!(b.term, Terminator::CondBranch { .. })));
    }

    #[test]
    fn test_ternary_through_temporary() {
        let src = "void main() { float x = true ? 1.0 : 2.0; }\n";
        let (_, module) = lower_src(src, ShaderStage::Vertex);
        let main = entry_fn(&module);
        // Both arms store into the same temporary local.
        assert!(main.locals.iter().any(|l| !l.is_param));
        assert!(main.blocks.len() >= 4);
    }

    #[test]
    fn test_out_param_writeback() {
        let src = r#"
void pair(float v, out float doubled) { doubled = v * 2.0; }
void main() {
    float d;
    pair(3.0, d);
}
"#;
        let (_, module) = lower_src(src, ShaderStage::Vertex);
        let main = entry_fn(&module);
        let entry = &main.blocks[BlockId::new(0)];
        let call_pos = entry
            .insts
            .iter()
            .position(|i| matches!(i.kind, InstKind::Call { .. }))
            .unwrap();
        // A load of the temporary and a store back to `d` follow the call.
        assert!(entry.insts[call_pos..]
            .iter()
            .any(|i| matches!(i.kind, InstKind::Store { .. })));
    }

    #[test]
    fn test_global_initializer_runs_in_entry() {
        let src = r#"
float scale = 2.5;
void main() { float x = scale; }
"#;
        let (_, module) = lower_src(src, ShaderStage::Vertex);
        let main = entry_fn(&module);
        let entry = &main.blocks[BlockId::new(0)];
        // First instructions materialize and store the initializer.
        assert!(matches!(
            entry.insts.first().map(|i| &i.kind),
            Some(InstKind::Const(ConstValue::Float(_)))
        ));
    }

    #[test]
    fn test_swizzle_write_read_modify_write() {
        let src = r#"
void main() {
    vec4 v = vec4(0.0);
    v.xy = vec2(1.0, 2.0);
}
"#;
        let (_, module) = lower_src(src, ShaderStage::Vertex);
        let main = entry_fn(&module);
        let entry = &main.blocks[BlockId::new(0)];
        assert!(entry
            .insts
            .iter()
            .any(|i| matches!(i.kind, InstKind::VectorInsert { .. })));
    }

    #[test]
    fn test_matrix_diagonal_constructor() {
        let src = "void main() { mat3 m = mat3(1.0); }\n";
        let (_, module) = lower_src(src, ShaderStage::Vertex);
        let main = entry_fn(&module);
        let entry = &main.blocks[BlockId::new(0)];
        let constructs = entry
            .insts
            .iter()
            .filter(|i| matches!(i.kind, InstKind::CompositeConstruct { .. }))
            .count();
        // Three columns plus the matrix itself.
        assert_eq!(constructs, 4);
    }
}
