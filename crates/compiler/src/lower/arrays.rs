//! Array lowering: descriptor addressing, bounds checks, DIM/REDIM, and
//! the whole-array loop skeletons.
//!
//! Element addresses are computed inline from the descriptor's fixed field
//! offsets (`fb_core::array_desc`); the runtime is only called to allocate,
//! erase, and redim. The element size always loads from offset 40 and the
//! rank from offset 48, the two fields with decoy neighbours.

use super::{FuncLowerer, width_of};
use crate::ast::{BinOp, Expr, ExprKind, UnOp};
use crate::codegen::CodeGenError;
use crate::ir::{
    ArrayOpInst, ArrayOpKind, BinOp as IrBin, BroadcastOp, CmpOp, Inst, MTy, MemWidth, Term, Val,
};
use crate::lexer::Suffix;
use crate::semantic::var_key;
use crate::types::Type;
use fb_core::array_desc;

impl FuncLowerer<'_> {
    /// Compute the byte address of `desc(indices...)`. Returns the address
    /// value, a zero constant offset, and the element's memory width.
    pub fn array_element_addr(
        &mut self,
        desc: Val,
        key: &str,
        indices: &[Expr],
        line: i32,
    ) -> Result<(Val, i32, MemWidth), CodeGenError> {
        let ty = self
            .var_types
            .get(key)
            .cloned()
            .or_else(|| self.globals_map.get(key).map(|(_, t)| t.clone()))
            .ok_or_else(|| CodeGenError::ice(format!("unresolved array `{}`", key)))?;
        let Type::Array { elem, rank } = ty else {
            return Err(CodeGenError::ice(format!("`{}` is not an array", key)));
        };
        let width = self.element_width(&elem)?;

        let i1 = self.lower_expr_as(&indices[0], &Type::Int64)?;
        let lb1 = self.load_desc_i32(desc, array_desc::LOWER_BOUND_1);
        if self.bounds_check {
            let ub1 = self.load_desc_i32(desc, array_desc::UPPER_BOUND_1);
            self.emit_bounds_check(i1, lb1, ub1, line);
        }
        let off1 = self.sub_l(i1, lb1);

        let linear = if rank == 2 {
            let i2 = self.lower_expr_as(&indices[1], &Type::Int64)?;
            let lb2 = self.load_desc_i32(desc, array_desc::LOWER_BOUND_2);
            let ub2 = self.load_desc_i32(desc, array_desc::UPPER_BOUND_2);
            if self.bounds_check {
                self.emit_bounds_check(i2, lb2, ub2, line);
            }
            let extent2 = self.sub_l(ub2, lb2);
            let extent2 = self.bin_l(IrBin::Add, extent2, Val::I(1));
            let row = self.bin_l(IrBin::Mul, off1, extent2);
            let off2 = self.sub_l(i2, lb2);
            self.bin_l(IrBin::Add, row, off2)
        } else {
            off1
        };

        let data = self.fresh_temp();
        self.emit(Inst::Load {
            dst: data,
            width: MemWidth::Ptr,
            addr: desc,
            offset: array_desc::DATA_POINTER,
        });
        // Element size lives at offset 40 (not the dimension-2 bound at 24).
        let esize = self.load_desc_i32(desc, array_desc::ELEMENT_SIZE);
        let byte_off = self.bin_l(IrBin::Mul, linear, esize);
        let addr = self.bin_l(IrBin::Add, Val::Temp(data), byte_off);
        Ok((addr, 0, width))
    }

    fn element_width(&self, elem: &Type) -> Result<MemWidth, CodeGenError> {
        if let Type::Udt(_) = elem {
            // Record elements are addressed, never loaded whole.
            return Ok(MemWidth::Ptr);
        }
        Ok(width_of(elem))
    }

    /// Load an i32 descriptor field and widen it to l for address math.
    fn load_desc_i32(&mut self, desc: Val, offset: i32) -> Val {
        let raw = self.fresh_temp();
        self.emit(Inst::Load { dst: raw, width: MemWidth::W32, addr: desc, offset });
        self.convert(Val::Temp(raw), MTy::W, MTy::L)
    }

    fn bin_l(&mut self, op: IrBin, a: Val, b: Val) -> Val {
        let dst = self.fresh_temp();
        self.emit(Inst::Bin { dst, ty: MTy::L, op, a, b });
        Val::Temp(dst)
    }

    fn sub_l(&mut self, a: Val, b: Val) -> Val {
        self.bin_l(IrBin::Sub, a, b)
    }

    /// `index < lb || index > ub` raises subscript-out-of-range.
    fn emit_bounds_check(&mut self, index: Val, lb: Val, ub: Val, line: i32) {
        let below = self.fresh_temp();
        self.emit(Inst::Cmp { dst: below, ty: MTy::L, op: CmpOp::Lt, a: index, b: lb });
        let above = self.fresh_temp();
        self.emit(Inst::Cmp { dst: above, ty: MTy::L, op: CmpOp::Gt, a: index, b: ub });
        let out = self.fresh_temp();
        self.emit(Inst::Bin {
            dst: out,
            ty: MTy::W,
            op: IrBin::Or,
            a: Val::Temp(below),
            b: Val::Temp(above),
        });
        let fail = self.new_block("bounds_fail");
        let ok = self.new_block("bounds_ok");
        self.seal(Term::Br { cond: Val::Temp(out), then_to: fail, else_to: ok });
        self.open_block(fail);
        self.call("array_bounds_fail", vec![(Val::I(line as i64), MTy::W)], None);
        self.seal(Term::Unreachable);
        self.open_block(ok);
    }

    // ------------------------------------------------------------------
    // DIM / REDIM

    pub fn lower_dim(
        &mut self,
        name: &str,
        suffix: Suffix,
        bounds: &[(Option<Expr>, Expr)],
        _as_type: Option<&Type>,
        line: i32,
    ) -> Result<(), CodeGenError> {
        let _ = line;
        let key = var_key(name, suffix);
        let (storage, ty) = self.storage_of(&key)?;
        match &ty {
            Type::Hashmap => {
                let map = self
                    .call("hashmap_new", Vec::new(), Some(MTy::P))
                    .expect("call returns");
                let addr = self.address_of_storage(storage);
                self.emit(Inst::Store { width: MemWidth::Ptr, val: map, addr, offset: 0 });
                Ok(())
            }
            Type::List => {
                let list = self
                    .call("list_create", Vec::new(), Some(MTy::P))
                    .expect("call returns");
                let addr = self.address_of_storage(storage);
                self.emit(Inst::Store { width: MemWidth::Ptr, val: list, addr, offset: 0 });
                Ok(())
            }
            Type::Array { elem, rank } => {
                let (elem_size, elem_code) = self.element_layout(elem)?;
                let mut lowered: Vec<(Val, Val)> = Vec::new();
                for (lo, hi) in bounds {
                    let lo = match lo {
                        Some(lo) => self.lower_expr_as(lo, &Type::Int32)?,
                        None => Val::I(0),
                    };
                    let hi = self.lower_expr_as(hi, &Type::Int32)?;
                    lowered.push((lo, hi));
                }
                let (lb1, ub1) = lowered[0];
                let (lb2, ub2) = if lowered.len() > 1 { lowered[1] } else { (Val::I(0), Val::I(0)) };
                let desc = self
                    .call(
                        "array_descriptor_alloc",
                        vec![
                            (Val::I(*rank as i64), MTy::W),
                            (lb1, MTy::W),
                            (ub1, MTy::W),
                            (lb2, MTy::W),
                            (ub2, MTy::W),
                            (Val::I(elem_size as i64), MTy::W),
                            (Val::I(elem_code as i64), MTy::W),
                        ],
                        Some(MTy::P),
                    )
                    .expect("call returns");
                let addr = self.address_of_storage(storage);
                self.emit(Inst::Store { width: MemWidth::Ptr, val: desc, addr, offset: 0 });
                Ok(())
            }
            // Scalar DIM: the slot exists and the prologue zeroes it.
            _ => Ok(()),
        }
    }

    fn element_layout(&self, elem: &Type) -> Result<(i32, i32), CodeGenError> {
        if let Type::Udt(name) = elem {
            let info = self
                .analyzed
                .udts
                .get(name)
                .ok_or_else(|| CodeGenError::ice(format!("unknown TYPE `{}`", name)))?;
            return Ok((info.size, fb_core::ElementType::Udt as i32));
        }
        let code = elem
            .element_code()
            .ok_or_else(|| CodeGenError::ice(format!("`{}` cannot be an array element", elem)))?;
        Ok((code.size(), code as i32))
    }

    pub fn lower_redim(
        &mut self,
        name: &str,
        suffix: Suffix,
        preserve: bool,
        new_upper: &Expr,
    ) -> Result<(), CodeGenError> {
        let key = var_key(name, suffix);
        let (storage, ty) = self.storage_of(&key)?;
        let desc = self.load_var(storage, &ty);
        let new_ub = self.lower_expr_as(new_upper, &Type::Int32)?;
        self.call(
            "array_descriptor_redim",
            vec![
                (desc, MTy::P),
                (new_ub, MTy::W),
                (Val::I(preserve as i64), MTy::W),
            ],
            None,
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Whole-array statements

    /// Lower `dst() = <expr>` into one ArrayOp skeleton. The expression
    /// shapes are exactly the kind tags; anything else is a compiler bug
    /// because semantic analysis validated the shape.
    pub fn lower_array_statement(
        &mut self,
        target: &Expr,
        value: &Expr,
    ) -> Result<(), CodeGenError> {
        let Type::Array { elem, .. } = &target.ty else {
            return Err(CodeGenError::ice("whole-array target is not an array"));
        };
        let elem_ty = (**elem).clone();
        let elem_code = self
            .element_layout(&elem_ty)
            .ok()
            .and_then(|(_, code)| fb_core::ElementType::from_code(code))
            .ok_or_else(|| CodeGenError::ice("whole-array element type"))?;
        let line = value.loc.line as i32;
        let (dst, _) = self.lower_expr(target)?;

        let mut op = ArrayOpInst {
            kind: ArrayOpKind::Copy,
            elem: elem_code,
            dst,
            a: None,
            b: None,
            c: None,
            scalar: None,
            simd: false,
            line,
        };

        match &value.kind {
            // dst() = a()
            _ if self.is_array_ref(value) => {
                op.a = Some(self.lower_expr(value)?.0);
            }
            // dst() = scalar
            _ if value.ty.is_numeric() => {
                op.kind = ArrayOpKind::Fill;
                op.scalar = Some(self.lower_expr_as(value, &elem_ty)?);
            }
            // dst() = -a()
            ExprKind::Unary { op: UnOp::Neg, operand } if self.is_array_ref(operand) => {
                op.kind = ArrayOpKind::Neg;
                op.a = Some(self.lower_expr(operand)?.0);
            }
            // dst() = ABS(a()) / SQR(a())
            ExprKind::Call { name, suffix: Suffix::None, args }
                if (name == "ABS" || name == "SQR")
                    && args.len() == 1
                    && self.is_array_ref(&args[0]) =>
            {
                op.kind = if name == "ABS" { ArrayOpKind::Abs } else { ArrayOpKind::Sqrt };
                op.a = Some(self.lower_expr(&args[0])?.0);
            }
            ExprKind::Binary { op: bin, lhs, rhs } => {
                self.lower_array_binary(&mut op, *bin, lhs, rhs, &elem_ty)?;
            }
            _ => {
                return Err(CodeGenError::ice(
                    "whole-array expression does not match a loop skeleton",
                ));
            }
        }
        self.emit(Inst::ArrayOp(op));
        Ok(())
    }

    fn lower_array_binary(
        &mut self,
        op: &mut ArrayOpInst,
        bin: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        elem_ty: &Type,
    ) -> Result<(), CodeGenError> {
        let lhs_is_array = self.is_array_ref(lhs);
        let rhs_is_array = self.is_array_ref(rhs);

        // FMA: a() + b() * c(), either order of the addends.
        if bin == BinOp::Add {
            if let Some((a, b, c)) = self.match_fma(lhs, rhs)? {
                op.kind = ArrayOpKind::Fma;
                op.a = Some(a);
                op.b = Some(b);
                op.c = Some(c);
                return Ok(());
            }
        }

        let arith = |bin: BinOp| -> Result<ArrayOpKind, CodeGenError> {
            Ok(match bin {
                BinOp::Add => ArrayOpKind::Add,
                BinOp::Sub => ArrayOpKind::Sub,
                BinOp::Mul => ArrayOpKind::Mul,
                BinOp::Div => ArrayOpKind::Div,
                _ => {
                    return Err(CodeGenError::ice(
                        "whole-array operator outside + - * /",
                    ));
                }
            })
        };
        let broadcast = |bin: BinOp| -> Result<BroadcastOp, CodeGenError> {
            Ok(match bin {
                BinOp::Add => BroadcastOp::Add,
                BinOp::Sub => BroadcastOp::Sub,
                BinOp::Mul => BroadcastOp::Mul,
                BinOp::Div => BroadcastOp::Div,
                _ => {
                    return Err(CodeGenError::ice(
                        "whole-array operator outside + - * /",
                    ));
                }
            })
        };

        match (lhs_is_array, rhs_is_array) {
            (true, true) => {
                op.kind = arith(bin)?;
                op.a = Some(self.lower_expr(lhs)?.0);
                op.b = Some(self.lower_expr(rhs)?.0);
            }
            (true, false) => {
                op.kind = ArrayOpKind::BroadcastRight(broadcast(bin)?);
                op.a = Some(self.lower_expr(lhs)?.0);
                op.scalar = Some(self.lower_expr_as(rhs, elem_ty)?);
            }
            (false, true) => {
                op.kind = ArrayOpKind::BroadcastLeft(broadcast(bin)?);
                op.a = Some(self.lower_expr(rhs)?.0);
                op.scalar = Some(self.lower_expr_as(lhs, elem_ty)?);
            }
            (false, false) => {
                return Err(CodeGenError::ice(
                    "whole-array assignment with no array operand",
                ));
            }
        }
        Ok(())
    }

    /// `a() + b() * c()` in either addend order.
    fn match_fma(&mut self, lhs: &Expr, rhs: &Expr) -> Result<Option<(Val, Val, Val)>, CodeGenError> {
        let as_mul = |expr: &Expr| -> Option<(Expr, Expr)> {
            if let ExprKind::Binary { op: BinOp::Mul, lhs, rhs } = &expr.kind {
                Some(((**lhs).clone(), (**rhs).clone()))
            } else {
                None
            }
        };
        let (addend, b, c) = if let Some((b, c)) = as_mul(rhs) {
            (lhs, b, c)
        } else if let Some((b, c)) = as_mul(lhs) {
            (rhs, b, c)
        } else {
            return Ok(None);
        };
        if !(self.is_array_ref(addend) && self.is_array_ref(&b) && self.is_array_ref(&c)) {
            return Ok(None);
        }
        let a = self.lower_expr(addend)?.0;
        let b = self.lower_expr(&b)?.0;
        let c = self.lower_expr(&c)?.0;
        Ok(Some((a, b, c)))
    }

    /// A bare whole-array reference: `name()` typed as an array.
    pub fn is_array_ref(&self, expr: &Expr) -> bool {
        matches!(
            &expr.kind,
            ExprKind::Call { args, .. } if args.is_empty() && matches!(expr.ty, Type::Array { .. })
        )
    }
}
