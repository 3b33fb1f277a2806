//! Expression lowering.
//!
//! Every lowered expression yields a machine value and its machine type.
//! Comparisons produce -1/0 in a w register (classic truth values, so
//! bitwise AND/OR/NOT double as the logical forms); conditions branch on
//! nonzero. Implicit conversions are emitted here by comparing an
//! operand's language type against the type its context requires.

use super::{FuncLowerer, mangle, mty_of, width_of};
use crate::ast::{BinOp, Expr, ExprKind, UnOp};
use crate::codegen::CodeGenError;
use crate::ir::{
    BinOp as IrBin, CmpOp, Inst, MTy, MemWidth, ReduceInst, ReduceKind, Term, Val,
};
use crate::lexer::Suffix;
use crate::semantic::var_key;
use crate::types::Type;
use fb_core::error_code;

impl FuncLowerer<'_> {
    /// Convert a machine value between register classes.
    pub fn convert(&mut self, val: Val, from: MTy, to: MTy) -> Val {
        let from = if from == MTy::P { MTy::L } else { from };
        let to_norm = if to == MTy::P { MTy::L } else { to };
        if from == to_norm {
            return val;
        }
        // Fold constant conversions.
        match val {
            Val::I(v) if to_norm.is_float() => return Val::F(v as f64),
            Val::I(_) => {}
            Val::F(v) if !to_norm.is_float() => return Val::I(v.round_ties_even() as i64),
            Val::F(_) => {}
            Val::Temp(_) => {}
        }
        if let Val::I(_) | Val::F(_) = val {
            // Same register-class family; reuse as-is.
            if from.is_float() == to_norm.is_float() {
                return val;
            }
        }
        let dst = self.fresh_temp();
        self.emit(Inst::Conv { dst, from, to, src: val });
        Val::Temp(dst)
    }

    /// Lower an expression and convert the result to language type `want`.
    pub fn lower_expr_as(&mut self, expr: &Expr, want: &Type) -> Result<Val, CodeGenError> {
        let (val, mty) = self.lower_expr(expr)?;
        Ok(self.convert(val, mty, mty_of(want)))
    }

    /// Lower a condition: any nonzero machine value is true.
    pub fn lower_condition(&mut self, expr: &Expr) -> Result<Val, CodeGenError> {
        let (val, mty) = self.lower_expr(expr)?;
        if mty.is_float() {
            let dst = self.fresh_temp();
            self.emit(Inst::Cmp { dst, ty: mty, op: CmpOp::Ne, a: val, b: Val::F(0.0) });
            return Ok(Val::Temp(dst));
        }
        Ok(val)
    }

    pub fn lower_expr(&mut self, expr: &Expr) -> Result<(Val, MTy), CodeGenError> {
        match &expr.kind {
            ExprKind::Int(v) => Ok((Val::I(*v), mty_of(&expr.ty))),
            ExprKind::Float { value, .. } => Ok((Val::F(*value), mty_of(&expr.ty))),
            ExprKind::Str(text) => {
                let addr = self.str_addr(text);
                let desc = self
                    .call("string_new_ascii", vec![(addr, MTy::P)], Some(MTy::P))
                    .expect("call returns");
                Ok((desc, MTy::P))
            }
            ExprKind::Var { name, suffix } => {
                let key = var_key(name, *suffix);
                let (storage, ty) = self.storage_of(&key)?;
                if matches!(ty, Type::Udt(_)) {
                    // Records evaluate to their address.
                    return Ok((self.address_of_storage(storage), MTy::P));
                }
                Ok((self.load_var(storage, &ty), mty_of(&ty)))
            }
            ExprKind::Call { .. } => self.lower_call(expr),
            ExprKind::Field { .. } => {
                let (addr, offset, ty) = self.lower_address(expr)?;
                let dst = self.fresh_temp();
                self.emit(Inst::Load { dst, width: width_of(&ty), addr, offset });
                Ok((Val::Temp(dst), mty_of(&ty)))
            }
            ExprKind::Slice { base, lo, hi } => {
                let s = self.lower_expr_as(base, &Type::Str)?;
                let lo = match lo {
                    Some(lo) => self.lower_expr_as(lo, &Type::Int64)?,
                    None => Val::I(1),
                };
                let hi = match hi {
                    Some(hi) => self.lower_expr_as(hi, &Type::Int64)?,
                    None => Val::I(-1),
                };
                let out = self
                    .call(
                        "string_slice",
                        vec![(s, MTy::P), (lo, MTy::L), (hi, MTy::L)],
                        Some(MTy::P),
                    )
                    .expect("call returns");
                Ok((out, MTy::P))
            }
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(expr, *op, lhs, rhs),
            ExprKind::Unary { op, operand } => self.lower_unary(expr, *op, operand),
        }
    }

    fn lower_binary(
        &mut self,
        expr: &Expr,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<(Val, MTy), CodeGenError> {
        // String forms first.
        if lhs.ty == Type::Str && rhs.ty == Type::Str {
            let a = self.lower_expr_as(lhs, &Type::Str)?;
            let b = self.lower_expr_as(rhs, &Type::Str)?;
            if op == BinOp::Add {
                let out = self
                    .call("string_concat", vec![(a, MTy::P), (b, MTy::P)], Some(MTy::P))
                    .expect("call returns");
                return Ok((out, MTy::P));
            }
            if op.is_comparison() {
                let cmp = self
                    .call("string_compare", vec![(a, MTy::P), (b, MTy::P)], Some(MTy::W))
                    .expect("call returns");
                let dst = self.fresh_temp();
                self.emit(Inst::Cmp {
                    dst,
                    ty: MTy::W,
                    op: cmp_op(op),
                    a: cmp,
                    b: Val::I(0),
                });
                return Ok((Val::Temp(dst), MTy::W));
            }
            return Err(CodeGenError::ice("string operands on a numeric operator"));
        }

        if op.is_comparison() {
            let operand_ty = lhs
                .ty
                .widened(&rhs.ty)
                .ok_or_else(|| CodeGenError::ice("comparison on non-numeric operands"))?;
            let a = self.lower_expr_as(lhs, &operand_ty)?;
            let b = self.lower_expr_as(rhs, &operand_ty)?;
            let dst = self.fresh_temp();
            self.emit(Inst::Cmp { dst, ty: mty_of(&operand_ty), op: cmp_op(op), a, b });
            return Ok((Val::Temp(dst), MTy::W));
        }

        let result_ty = expr.ty.clone();
        let mty = mty_of(&result_ty);
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul => {
                let a = self.lower_expr_as(lhs, &result_ty)?;
                let b = self.lower_expr_as(rhs, &result_ty)?;
                let dst = self.fresh_temp();
                let ir_op = match op {
                    BinOp::Add => IrBin::Add,
                    BinOp::Sub => IrBin::Sub,
                    _ => IrBin::Mul,
                };
                self.emit(Inst::Bin { dst, ty: mty, op: ir_op, a, b });
                Ok((Val::Temp(dst), mty))
            }
            BinOp::Div => {
                let a = self.lower_expr_as(lhs, &result_ty)?;
                let b = self.lower_expr_as(rhs, &result_ty)?;
                let dst = self.fresh_temp();
                self.emit(Inst::Bin { dst, ty: mty, op: IrBin::Div, a, b });
                Ok((Val::Temp(dst), mty))
            }
            BinOp::IntDiv | BinOp::Mod => {
                let a = self.lower_expr_as(lhs, &result_ty)?;
                let b = self.lower_expr_as(rhs, &result_ty)?;
                self.guard_zero_divisor(b, mty, expr.loc.line as i32);
                let dst = self.fresh_temp();
                let ir_op = if op == BinOp::IntDiv { IrBin::Div } else { IrBin::Rem };
                self.emit(Inst::Bin { dst, ty: mty, op: ir_op, a, b });
                Ok((Val::Temp(dst), mty))
            }
            BinOp::Pow => {
                let a = self.lower_expr_as(lhs, &Type::Double)?;
                let b = self.lower_expr_as(rhs, &Type::Double)?;
                let out = self
                    .call("pow", vec![(a, MTy::D), (b, MTy::D)], Some(MTy::D))
                    .expect("call returns");
                Ok((out, MTy::D))
            }
            BinOp::And | BinOp::Or | BinOp::Xor => {
                let a = self.lower_logical_operand(lhs, &result_ty)?;
                let b = self.lower_logical_operand(rhs, &result_ty)?;
                let dst = self.fresh_temp();
                let ir_op = match op {
                    BinOp::And => IrBin::And,
                    BinOp::Or => IrBin::Or,
                    _ => IrBin::Xor,
                };
                self.emit(Inst::Bin { dst, ty: mty, op: ir_op, a, b });
                Ok((Val::Temp(dst), mty))
            }
            _ => Err(CodeGenError::ice("comparison handled above")),
        }
    }

    /// AND/OR/XOR operand: integers pass through (truth is -1/0 already);
    /// floats collapse to -1/0 through a != 0 compare.
    fn lower_logical_operand(&mut self, expr: &Expr, result_ty: &Type) -> Result<Val, CodeGenError> {
        if expr.ty.is_float() {
            let (val, mty) = self.lower_expr(expr)?;
            let dst = self.fresh_temp();
            self.emit(Inst::Cmp { dst, ty: mty, op: CmpOp::Ne, a: val, b: Val::F(0.0) });
            return Ok(self.convert(Val::Temp(dst), MTy::W, mty_of(result_ty)));
        }
        self.lower_expr_as(expr, result_ty)
    }

    fn lower_unary(
        &mut self,
        expr: &Expr,
        op: UnOp,
        operand: &Expr,
    ) -> Result<(Val, MTy), CodeGenError> {
        match op {
            UnOp::Neg => {
                let result_ty = expr.ty.clone();
                let mty = mty_of(&result_ty);
                let val = self.lower_expr_as(operand, &result_ty)?;
                let zero = if mty.is_float() { Val::F(0.0) } else { Val::I(0) };
                let dst = self.fresh_temp();
                self.emit(Inst::Bin { dst, ty: mty, op: IrBin::Sub, a: zero, b: val });
                Ok((Val::Temp(dst), mty))
            }
            UnOp::Not => {
                if operand.ty.is_float() {
                    // Logical: NOT nonzero = 0, NOT 0 = -1.
                    let (val, mty) = self.lower_expr(operand)?;
                    let dst = self.fresh_temp();
                    self.emit(Inst::Cmp { dst, ty: mty, op: CmpOp::Eq, a: val, b: Val::F(0.0) });
                    let out = self.convert(Val::Temp(dst), MTy::W, mty_of(&expr.ty));
                    return Ok((out, mty_of(&expr.ty)));
                }
                // Bitwise on integers; -1/0 truth values make it logical too.
                let result_ty = expr.ty.clone();
                let mty = mty_of(&result_ty);
                let val = self.lower_expr_as(operand, &result_ty)?;
                let dst = self.fresh_temp();
                self.emit(Inst::Bin { dst, ty: mty, op: IrBin::Xor, a: val, b: Val::I(-1) });
                Ok((Val::Temp(dst), mty))
            }
        }
    }

    /// Division-by-zero guard for integer `\` and MOD. Constant nonzero
    /// divisors skip the check.
    fn guard_zero_divisor(&mut self, divisor: Val, mty: MTy, line: i32) {
        if let Val::I(v) = divisor {
            if v != 0 {
                return;
            }
        }
        let is_zero = self.fresh_temp();
        self.emit(Inst::Cmp { dst: is_zero, ty: mty, op: CmpOp::Eq, a: divisor, b: Val::I(0) });
        let fail = self.new_block("divzero");
        let ok = self.new_block("divok");
        self.seal(Term::Br { cond: Val::Temp(is_zero), then_to: fail, else_to: ok });
        self.cur = fail;
        self.terminated = false;
        self.call(
            "basic_throw",
            vec![
                (Val::I(error_code::DIVISION_BY_ZERO as i64), MTy::W),
                (Val::I(line as i64), MTy::W),
            ],
            None,
        );
        self.seal(Term::Unreachable);
        self.cur = ok;
        self.terminated = false;
    }

    // ------------------------------------------------------------------
    // Calls

    fn lower_call(&mut self, expr: &Expr) -> Result<(Val, MTy), CodeGenError> {
        let ExprKind::Call { name, suffix, args } = &expr.kind else {
            return Err(CodeGenError::ice("lower_call on a non-call"));
        };
        let key = var_key(name, *suffix);

        // Variable-shaped: array index, whole-array ref, hashmap, list.
        if self.var_types.contains_key(&key) || self.globals_map.contains_key(&key) {
            let (storage, ty) = self.storage_of(&key)?;
            match ty {
                Type::Array { elem, .. } => {
                    let desc = self.load_var(storage, &Type::Array { elem: elem.clone(), rank: 1 });
                    if args.is_empty() {
                        // Whole-array reference: the descriptor pointer.
                        return Ok((desc, MTy::P));
                    }
                    let line = expr.loc.line as i32;
                    let (addr, offset, width) =
                        self.array_element_addr(desc, &key, args, line)?;
                    if matches!(*elem, Type::Udt(_)) {
                        // Record elements evaluate to their address.
                        return Ok((self.addr_plus(addr, offset), MTy::P));
                    }
                    let dst = self.fresh_temp();
                    self.emit(Inst::Load { dst, width, addr, offset });
                    Ok((Val::Temp(dst), width.reg_class()))
                }
                Type::Hashmap => {
                    let map = self.load_var(storage, &Type::Hashmap);
                    let k = self.lower_expr_as(&args[0], &Type::Str)?;
                    let out = self
                        .call("hashmap_get", vec![(map, MTy::P), (k, MTy::P)], Some(MTy::L))
                        .expect("call returns");
                    Ok((out, MTy::P))
                }
                Type::List => {
                    let list = self.load_var(storage, &Type::List);
                    let idx = self.lower_expr_as(&args[0], &Type::Int64)?;
                    let out = self
                        .call(
                            "list_get_float",
                            vec![(list, MTy::P), (idx, MTy::L)],
                            Some(MTy::D),
                        )
                        .expect("call returns");
                    Ok((out, MTy::D))
                }
                other => Err(CodeGenError::ice(format!(
                    "indexed access on `{}` of type {}",
                    key, other
                ))),
            }
        } else if let Some(result) = self.lower_builtin(expr, name, *suffix, args)? {
            Ok(result)
        } else if let Some(sig) = self.analyzed.procs.get(name).cloned() {
            let mut lowered = Vec::new();
            for (arg, param_ty) in args.iter().zip(sig.params.iter()) {
                let val = self.lower_expr_as(arg, param_ty)?;
                lowered.push((val, mty_of(param_ty)));
            }
            let symbol = format!("fb_{}", mangle(&sig.name));
            let ret_mty = mty_of(&sig.ret);
            let out = self
                .call(&symbol, lowered, Some(ret_mty))
                .expect("call returns");
            Ok((out, ret_mty))
        } else {
            Err(CodeGenError::ice(format!("unresolved call `{}`", key)))
        }
    }

    /// Builtins in expression position. `None` when the name is not a
    /// builtin (then it must be a user function).
    fn lower_builtin(
        &mut self,
        expr: &Expr,
        name: &str,
        suffix: Suffix,
        args: &[Expr],
    ) -> Result<Option<(Val, MTy)>, CodeGenError> {
        let full = format!("{}{}", name, suffix.sigil());
        let line = expr.loc.line as i32;
        let out = match full.as_str() {
            "ABS" => {
                let arg = &args[0];
                if matches!(arg.ty, Type::Array { .. }) {
                    return Err(CodeGenError::ice(
                        "whole-array ABS outside an array assignment",
                    ));
                }
                let (val, mty) = self.lower_expr(arg)?;
                match mty {
                    MTy::D => {
                        let out = self.call("fabs", vec![(val, MTy::D)], Some(MTy::D)).unwrap();
                        (out, MTy::D)
                    }
                    MTy::S => {
                        let out = self.call("fabsf", vec![(val, MTy::S)], Some(MTy::S)).unwrap();
                        (out, MTy::S)
                    }
                    _ => {
                        let wide = self.convert(val, mty, MTy::L);
                        let out = self.call("labs", vec![(wide, MTy::L)], Some(MTy::L)).unwrap();
                        (self.convert(out, MTy::L, mty), mty)
                    }
                }
            }
            "SQR" => {
                if matches!(args[0].ty, Type::Array { .. }) {
                    return Err(CodeGenError::ice(
                        "whole-array SQR outside an array assignment",
                    ));
                }
                let val = self.lower_expr_as(&args[0], &Type::Double)?;
                let out = self.call("sqrt", vec![(val, MTy::D)], Some(MTy::D)).unwrap();
                (out, MTy::D)
            }
            "INT" => {
                let val = self.lower_expr_as(&args[0], &Type::Double)?;
                let floored = self.call("floor", vec![(val, MTy::D)], Some(MTy::D)).unwrap();
                (self.convert(floored, MTy::D, MTy::L), MTy::L)
            }
            "LEN" => {
                let arg = &args[0];
                match &arg.ty {
                    Type::Str => {
                        let s = self.lower_expr_as(arg, &Type::Str)?;
                        let out = self
                            .call("string_length", vec![(s, MTy::P)], Some(MTy::L))
                            .unwrap();
                        (out, MTy::L)
                    }
                    Type::Array { .. } => {
                        let (desc, _) = self.lower_expr(arg)?;
                        let dst = self.fresh_temp();
                        self.emit(Inst::Load {
                            dst,
                            width: MemWidth::X64,
                            addr: desc,
                            offset: fb_core::array_desc::LENGTH,
                        });
                        (Val::Temp(dst), MTy::L)
                    }
                    Type::Hashmap => {
                        let (map, _) = self.lower_expr(arg)?;
                        let out = self
                            .call("hashmap_size", vec![(map, MTy::P)], Some(MTy::L))
                            .unwrap();
                        (out, MTy::L)
                    }
                    Type::List => {
                        let (list, _) = self.lower_expr(arg)?;
                        // Header layout: {head, tail, length, kind}.
                        let dst = self.fresh_temp();
                        self.emit(Inst::Load {
                            dst,
                            width: MemWidth::X64,
                            addr: list,
                            offset: 16,
                        });
                        (Val::Temp(dst), MTy::L)
                    }
                    other => {
                        return Err(CodeGenError::ice(format!("LEN of {}", other)));
                    }
                }
            }
            "STR$" => {
                let arg = &args[0];
                if arg.ty.is_integer() {
                    let val = self.lower_expr_as(arg, &Type::Int64)?;
                    let out = self
                        .call("string_from_int", vec![(val, MTy::L)], Some(MTy::P))
                        .unwrap();
                    (out, MTy::P)
                } else {
                    let val = self.lower_expr_as(arg, &Type::Double)?;
                    let out = self
                        .call("string_from_double", vec![(val, MTy::D)], Some(MTy::P))
                        .unwrap();
                    (out, MTy::P)
                }
            }
            "VAL" => {
                let s = self.lower_expr_as(&args[0], &Type::Str)?;
                let out = self
                    .call("string_to_number", vec![(s, MTy::P)], Some(MTy::D))
                    .unwrap();
                (out, MTy::D)
            }
            "CHR$" => {
                let code = self.lower_expr_as(&args[0], &Type::Int64)?;
                let out = self
                    .call("string_char", vec![(code, MTy::L)], Some(MTy::P))
                    .unwrap();
                (out, MTy::P)
            }
            "ASC" => {
                let s = self.lower_expr_as(&args[0], &Type::Str)?;
                let out = self.call("string_asc", vec![(s, MTy::P)], Some(MTy::L)).unwrap();
                (out, MTy::L)
            }
            "SUM" | "MAX" | "MIN" | "AVG" | "DOT" => {
                return self.lower_reduce(expr, &full, args, line).map(Some);
            }
            "EXP" | "SIN" | "COS" | "TAN" | "LOG" | "ATN" => {
                let libm = match full.as_str() {
                    "EXP" => "exp",
                    "SIN" => "sin",
                    "COS" => "cos",
                    "TAN" => "tan",
                    "LOG" => "log",
                    _ => "atan",
                };
                let val = self.lower_expr_as(&args[0], &Type::Double)?;
                let out = self.call(libm, vec![(val, MTy::D)], Some(MTy::D)).unwrap();
                (out, MTy::D)
            }
            "ERR" => {
                let out = self.call("basic_err", Vec::new(), Some(MTy::W)).unwrap();
                (out, MTy::W)
            }
            "ERL" => {
                let out = self.call("basic_erl", Vec::new(), Some(MTy::W)).unwrap();
                (out, MTy::W)
            }
            "EOF" => {
                let chan = self.lower_expr_as(&args[0], &Type::Int32)?;
                let out = self
                    .call(
                        "basic_eof",
                        vec![(chan, MTy::W), (Val::I(line as i64), MTy::W)],
                        Some(MTy::W),
                    )
                    .unwrap();
                (out, MTy::W)
            }
            "HASKEY" => {
                let map = self.lower_expr_as(&args[0], &Type::Hashmap)?;
                let k = self.lower_expr_as(&args[1], &Type::Str)?;
                let out = self
                    .call("hashmap_haskey", vec![(map, MTy::P), (k, MTy::P)], Some(MTy::W))
                    .unwrap();
                (out, MTy::W)
            }
            "LGET$" => {
                let list = self.lower_expr_as(&args[0], &Type::List)?;
                let idx = self.lower_expr_as(&args[1], &Type::Int64)?;
                let out = self
                    .call(
                        "list_get_string",
                        vec![(list, MTy::P), (idx, MTy::L)],
                        Some(MTy::P),
                    )
                    .unwrap();
                (out, MTy::P)
            }
            "INPUT$" => {
                let chan = self.lower_expr_as(&args[0], &Type::Int32)?;
                let out = self
                    .call(
                        "basic_input_line_channel",
                        vec![(chan, MTy::W), (Val::I(line as i64), MTy::W)],
                        Some(MTy::P),
                    )
                    .unwrap();
                (out, MTy::P)
            }
            _ => return Ok(None),
        };
        Ok(Some(out))
    }

    fn lower_reduce(
        &mut self,
        expr: &Expr,
        full: &str,
        args: &[Expr],
        line: i32,
    ) -> Result<(Val, MTy), CodeGenError> {
        let kind = match full {
            "SUM" => ReduceKind::Sum,
            "MAX" => ReduceKind::Max,
            "MIN" => ReduceKind::Min,
            "AVG" => ReduceKind::Avg,
            _ => ReduceKind::Dot,
        };
        let Type::Array { elem, .. } = &args[0].ty else {
            return Err(CodeGenError::ice("reduction over a non-array"));
        };
        let elem_code = elem
            .element_code()
            .ok_or_else(|| CodeGenError::ice("reduction element type"))?;
        let (a, _) = self.lower_expr(&args[0])?;
        let b = if kind == ReduceKind::Dot {
            Some(self.lower_expr(&args[1])?.0)
        } else {
            None
        };
        let dst = self.fresh_temp();
        let dst_ty = mty_of(&expr.ty);
        self.emit(Inst::Reduce(ReduceInst {
            kind,
            elem: elem_code,
            dst,
            dst_ty,
            a,
            b,
            simd: false,
            line,
        }));
        Ok((Val::Temp(dst), dst_ty))
    }

    // ------------------------------------------------------------------
    // Lvalue addressing

    /// Address of an assignable expression: `(base, byte_offset, type)`.
    pub fn lower_address(&mut self, expr: &Expr) -> Result<(Val, i32, Type), CodeGenError> {
        match &expr.kind {
            ExprKind::Var { name, suffix } => {
                let key = var_key(name, *suffix);
                let (storage, ty) = self.storage_of(&key)?;
                Ok((self.address_of_storage(storage), 0, ty))
            }
            ExprKind::Field { base, field } => {
                let (addr, offset, base_ty) = self.lower_address(base)?;
                let Type::Udt(udt_name) = base_ty else {
                    return Err(CodeGenError::ice("field access on a non-record"));
                };
                let info = self
                    .analyzed
                    .udts
                    .get(&udt_name)
                    .ok_or_else(|| CodeGenError::ice(format!("unknown TYPE `{}`", udt_name)))?;
                let f = info
                    .field(field)
                    .ok_or_else(|| CodeGenError::ice(format!("unknown field `{}`", field)))?;
                Ok((addr, offset + f.offset, f.ty.clone()))
            }
            ExprKind::Call { name, suffix, args } if !args.is_empty() => {
                let key = var_key(name, *suffix);
                let (storage, ty) = self.storage_of(&key)?;
                let Type::Array { elem, .. } = ty else {
                    return Err(CodeGenError::ice(format!("`{}` is not an array", key)));
                };
                let desc = self.load_var(storage, &Type::Array { elem: elem.clone(), rank: 1 });
                let line = expr.loc.line as i32;
                let (addr, offset, _) = self.array_element_addr(desc, &key, args, line)?;
                Ok((addr, offset, (*elem).clone()))
            }
            _ => Err(CodeGenError::ice("expression is not addressable")),
        }
    }
}

fn cmp_op(op: BinOp) -> CmpOp {
    match op {
        BinOp::Eq => CmpOp::Eq,
        BinOp::Ne => CmpOp::Ne,
        BinOp::Lt => CmpOp::Lt,
        BinOp::Le => CmpOp::Le,
        BinOp::Gt => CmpOp::Gt,
        BinOp::Ge => CmpOp::Ge,
        _ => unreachable!("not a comparison"),
    }
}
