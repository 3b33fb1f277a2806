//! IR → ARM64 instruction selection.
//!
//! One forward pass per function. Operands resolve through the emitter
//! state (register homes, spill reloads, immediate materialisation);
//! whole-array instructions expand in `neon.rs`.

use super::insts::*;
use super::neon;
use super::state::{FnEmitter, Scratch};
use crate::codegen::CodeGenError;
use crate::ir::*;

/// Emit one function: body instructions plus the finalized frame.
/// Returns the instruction stream and the function's FP literal pool.
pub fn emit_function(
    module: &Module,
    func: &IrFunction,
) -> Result<(Vec<AInst>, Vec<(u64, FSize)>), CodeGenError> {
    let mut em = FnEmitter::new(func);
    for (i, block) in func.blocks.iter().enumerate() {
        let label = em.block_label(BlockId(i));
        em.emit(AInst::Label(label));
        for inst in &block.insts {
            emit_inst(&mut em, module, inst)?;
            em.free_dead();
            em.idx += 1;
        }
        emit_term(&mut em, &block.term)?;
        em.free_dead();
        em.idx += 1;
    }
    Ok(em.finalize())
}

fn is_w(ty: MTy) -> bool {
    matches!(ty, MTy::W)
}

fn int_cond(op: CmpOp) -> Cond {
    match op {
        CmpOp::Eq => Cond::Eq,
        CmpOp::Ne => Cond::Ne,
        CmpOp::Lt => Cond::Lt,
        CmpOp::Le => Cond::Le,
        CmpOp::Gt => Cond::Gt,
        CmpOp::Ge => Cond::Ge,
    }
}

/// Float condition map; MI/LS make unordered compare false.
fn float_cond(op: CmpOp) -> Cond {
    match op {
        CmpOp::Eq => Cond::Eq,
        CmpOp::Ne => Cond::Ne,
        CmpOp::Lt => Cond::Mi,
        CmpOp::Le => Cond::Ls,
        CmpOp::Gt => Cond::Gt,
        CmpOp::Ge => Cond::Ge,
    }
}

fn emit_inst(em: &mut FnEmitter<'_>, module: &Module, inst: &Inst) -> Result<(), CodeGenError> {
    match inst {
        Inst::Copy { dst, ty, src } => {
            if em.live.is_dead(*dst) {
                return Ok(());
            }
            if ty.is_float() {
                let double = matches!(ty, MTy::D);
                match src {
                    Val::F(v) => {
                        let rd = em.def_fp(*dst);
                        em.float_const(rd, *v, double);
                    }
                    Val::I(v) => {
                        let rd = em.def_fp(*dst);
                        em.float_const(rd, *v as f64, double);
                    }
                    Val::Temp(_) => {
                        let rn = em.use_fp(src, double, Scratch::B)?;
                        let rd = em.def_fp(*dst);
                        em.emit(AInst::FMovReg { rd, rn, double });
                    }
                }
            } else {
                let w = is_w(*ty);
                match src {
                    Val::I(v) => {
                        let rd = em.def_int(*dst);
                        em.load_imm(rd, *v, w);
                    }
                    _ => {
                        let rm = em.use_int(src, w, Scratch::B)?;
                        let rd = em.def_int(*dst);
                        em.emit(AInst::MovReg { rd, rm, w });
                    }
                }
            }
            em.finish_def(*dst);
            Ok(())
        }
        Inst::Bin { dst, ty, op, a, b } => emit_bin(em, *dst, *ty, *op, a, b),
        Inst::Cmp { dst, ty, op, a, b } => {
            if ty.is_float() {
                let double = matches!(ty, MTy::D);
                let rn = em.use_fp(a, double, Scratch::A)?;
                let rm = em.use_fp(b, double, Scratch::B)?;
                em.emit(AInst::FCmp { rn, rm, double });
                let rd = em.def_int(*dst);
                em.emit(AInst::CSetM { rd, cond: float_cond(*op), w: true });
            } else {
                let w = is_w(*ty);
                let rn = em.use_int(a, w, Scratch::A)?;
                match b {
                    Val::I(v) if (0..=4095).contains(v) => {
                        em.emit(AInst::CmpImm { rn, imm: *v as u16, w });
                    }
                    _ => {
                        let rm = em.use_int(b, w, Scratch::B)?;
                        em.emit(AInst::CmpReg { rn, rm, w });
                    }
                }
                let rd = em.def_int(*dst);
                em.emit(AInst::CSetM { rd, cond: int_cond(*op), w: true });
            }
            em.finish_def(*dst);
            Ok(())
        }
        Inst::Conv { dst, from, to, src } => emit_conv(em, *dst, *from, *to, src),
        Inst::SlotAddr { dst, slot } => {
            let rd = em.def_int(*dst);
            em.emit_slot_addr(rd, *slot);
            em.finish_def(*dst);
            Ok(())
        }
        Inst::GlobalAddr { dst, id } => {
            let sym = module.globals[id.0].symbol.clone();
            let rd = em.def_int(*dst);
            em.emit(AInst::AddrOf { rd, sym });
            em.finish_def(*dst);
            Ok(())
        }
        Inst::StrAddr { dst, id } => {
            let rd = em.def_int(*dst);
            em.emit(AInst::AddrOf { rd, sym: format!(".Lstr{}", id.0) });
            em.finish_def(*dst);
            Ok(())
        }
        Inst::Load { dst, width, addr, offset } => {
            let base = em.use_int(addr, false, Scratch::A)?;
            match width {
                MemWidth::F32 => {
                    let rt = em.def_fp(*dst);
                    em.emit(AInst::LdrF { rt, base, offset: *offset, size: FSize::S });
                }
                MemWidth::F64 => {
                    let rt = em.def_fp(*dst);
                    em.emit(AInst::LdrF { rt, base, offset: *offset, size: FSize::D });
                }
                _ => {
                    let (size, sign_extend) = int_mem(*width);
                    let rt = em.def_int(*dst);
                    em.emit(AInst::Ldr { rt, base, offset: *offset, size, sign_extend });
                }
            }
            em.finish_def(*dst);
            Ok(())
        }
        Inst::Store { width, val, addr, offset } => {
            let base = em.use_int(addr, false, Scratch::A)?;
            match width {
                MemWidth::F32 => {
                    let rt = em.use_fp(val, false, Scratch::B)?;
                    em.emit(AInst::StrF { rt, base, offset: *offset, size: FSize::S });
                }
                MemWidth::F64 => {
                    let rt = em.use_fp(val, true, Scratch::B)?;
                    em.emit(AInst::StrF { rt, base, offset: *offset, size: FSize::D });
                }
                _ => {
                    let (size, _) = int_mem(*width);
                    let rt = em.use_int(val, matches!(size, MemSize::W), Scratch::B)?;
                    em.emit(AInst::Str { rt, base, offset: *offset, size });
                }
            }
            Ok(())
        }
        Inst::Call { dst, func, args } => {
            emit_call_args(em, args)?;
            em.emit(AInst::Bl { sym: func.clone() });
            if let Some((dst, ty)) = dst {
                if !em.live.is_dead(*dst) {
                    capture_result(em, *dst, *ty);
                }
            }
            Ok(())
        }
        Inst::Setjmp { dst, buf } => {
            // Direct call, by hard requirement: the jump context must
            // belong to this frame, with no wrapper in between.
            emit_call_args(em, &[(*buf, MTy::P)])?;
            em.emit(AInst::Bl { sym: "setjmp".to_string() });
            capture_result(em, *dst, MTy::W);
            Ok(())
        }
        Inst::MemCopy { dst, src, bytes } => {
            let rd = em.use_int(dst, false, Scratch::A)?;
            let rs = em.use_int(src, false, Scratch::B)?;
            // Through v30 so no integer scratch is disturbed.
            let mut offset = 0;
            while offset + 16 <= *bytes {
                em.emit(AInst::LdrF { rt: VReg(30), base: rs, offset, size: FSize::Q });
                em.emit(AInst::StrF { rt: VReg(30), base: rd, offset, size: FSize::Q });
                offset += 16;
            }
            while offset + 8 <= *bytes {
                em.emit(AInst::LdrF { rt: VReg(30), base: rs, offset, size: FSize::D });
                em.emit(AInst::StrF { rt: VReg(30), base: rd, offset, size: FSize::D });
                offset += 8;
            }
            while offset + 4 <= *bytes {
                em.emit(AInst::LdrF { rt: VReg(30), base: rs, offset, size: FSize::S });
                em.emit(AInst::StrF { rt: VReg(30), base: rd, offset, size: FSize::S });
                offset += 4;
            }
            Ok(())
        }
        Inst::ArrayOp(op) => neon::emit_array_op(em, op),
        Inst::Reduce(r) => neon::emit_reduce(em, r),
        Inst::UdtVec(u) => neon::emit_udt_vec(em, u),
    }
}

fn int_mem(width: MemWidth) -> (MemSize, bool) {
    match width {
        MemWidth::U8 => (MemSize::B, false),
        MemWidth::S16 => (MemSize::H, true),
        MemWidth::W32 => (MemSize::W, false),
        _ => (MemSize::X, false),
    }
}

fn emit_bin(
    em: &mut FnEmitter<'_>,
    dst: TempId,
    ty: MTy,
    op: BinOp,
    a: &Val,
    b: &Val,
) -> Result<(), CodeGenError> {
    if ty.is_float() {
        let double = matches!(ty, MTy::D);
        // 0.0 - x is a plain negate.
        if op == BinOp::Sub {
            if let Val::F(v) = a {
                if *v == 0.0 {
                    let rn = em.use_fp(b, double, Scratch::A)?;
                    let rd = em.def_fp(dst);
                    em.emit(AInst::FNeg { rd, rn, double });
                    em.finish_def(dst);
                    return Ok(());
                }
            }
        }
        let fop = match op {
            BinOp::Add => FOp::Add,
            BinOp::Sub => FOp::Sub,
            BinOp::Mul => FOp::Mul,
            BinOp::Div => FOp::Div,
            _ => return Err(CodeGenError::ice("integer operator on float operands")),
        };
        let rn = em.use_fp(a, double, Scratch::A)?;
        let rm = em.use_fp(b, double, Scratch::B)?;
        let rd = em.def_fp(dst);
        em.emit(AInst::FBin { op: fop, rd, rn, rm, double });
        em.finish_def(dst);
        return Ok(());
    }

    let w = is_w(ty);
    // Immediate add/sub fast path.
    if let (BinOp::Add | BinOp::Sub, Val::I(v)) = (op, b) {
        if (0..=4095).contains(v) {
            let rn = em.use_int(a, w, Scratch::A)?;
            let rd = em.def_int(dst);
            let imm = *v as u16;
            if op == BinOp::Add {
                em.emit(AInst::AddImm { rd, rn, imm, w });
            } else {
                em.emit(AInst::SubImm { rd, rn, imm, w });
            }
            em.finish_def(dst);
            return Ok(());
        }
    }
    // `\` by a power-of-two constant: arithmetic shift with the
    // round-toward-zero fixup.
    if op == BinOp::Div {
        if let Val::I(v) = b {
            if *v > 0 && (*v & (*v - 1)) == 0 {
                let k = v.trailing_zeros() as u8;
                let rn = em.use_int(a, w, Scratch::A)?;
                let rd = em.def_int(dst);
                if k == 0 {
                    em.emit(AInst::MovReg { rd, rm: rn, w });
                } else if *v - 1 <= 4095 {
                    em.emit(AInst::AddImm {
                        rd: Scratch::B.x(),
                        rn,
                        imm: (*v - 1) as u16,
                        w,
                    });
                    em.emit(AInst::CmpImm { rn, imm: 0, w });
                    em.emit(AInst::CSel {
                        rd: Scratch::B.x(),
                        rn: Scratch::B.x(),
                        rm: rn,
                        cond: Cond::Lt,
                        w,
                    });
                    em.emit(AInst::AsrImm { rd, rn: Scratch::B.x(), shift: k, w });
                } else {
                    // Bias doesn't fit the immediate; plain sdiv.
                    em.load_imm(Scratch::B.x(), *v, w);
                    em.emit(AInst::IBin { op: IOp::SDiv, rd, rn, rm: Scratch::B.x(), w });
                }
                em.finish_def(dst);
                return Ok(());
            }
        }
    }

    let rn = em.use_int(a, w, Scratch::A)?;
    let rm = em.use_int(b, w, Scratch::B)?;
    let rd = em.def_int(dst);
    match op {
        BinOp::Add => em.emit(AInst::IBin { op: IOp::Add, rd, rn, rm, w }),
        BinOp::Sub => em.emit(AInst::IBin { op: IOp::Sub, rd, rn, rm, w }),
        BinOp::Mul => em.emit(AInst::IBin { op: IOp::Mul, rd, rn, rm, w }),
        BinOp::Div => em.emit(AInst::IBin { op: IOp::SDiv, rd, rn, rm, w }),
        BinOp::Rem => {
            // rd = rn - (rn / rm) * rm
            em.emit(AInst::IBin { op: IOp::SDiv, rd, rn, rm, w });
            em.emit(AInst::MSub { rd, rn: rd, rm, ra: rn, w });
        }
        BinOp::And => em.emit(AInst::IBin { op: IOp::And, rd, rn, rm, w }),
        BinOp::Or => em.emit(AInst::IBin { op: IOp::Orr, rd, rn, rm, w }),
        BinOp::Xor => {
            // x ^ -1 is mvn.
            if matches!(b, Val::I(-1)) {
                em.emit(AInst::Mvn { rd, rm: rn, w });
            } else {
                em.emit(AInst::IBin { op: IOp::Eor, rd, rn, rm, w });
            }
        }
        BinOp::Shl => em.emit(AInst::IBin { op: IOp::Lsl, rd, rn, rm, w }),
        BinOp::Ashr => em.emit(AInst::IBin { op: IOp::Asr, rd, rn, rm, w }),
    }
    em.finish_def(dst);
    Ok(())
}

fn emit_conv(
    em: &mut FnEmitter<'_>,
    dst: TempId,
    from: MTy,
    to: MTy,
    src: &Val,
) -> Result<(), CodeGenError> {
    let from_n = if from == MTy::P { MTy::L } else { from };
    let to_n = if to == MTy::P { MTy::L } else { to };
    match (from_n, to_n) {
        (MTy::W, MTy::L) => {
            let rn = em.use_int(src, true, Scratch::A)?;
            let rd = em.def_int(dst);
            em.emit(AInst::SxtW { rd, rn });
        }
        (MTy::L, MTy::W) => {
            let rm = em.use_int(src, false, Scratch::A)?;
            let rd = em.def_int(dst);
            em.emit(AInst::MovReg { rd, rm, w: true });
        }
        (MTy::L, MTy::L) | (MTy::W, MTy::W) => {
            let rm = em.use_int(src, is_w(to_n), Scratch::A)?;
            let rd = em.def_int(dst);
            em.emit(AInst::MovReg { rd, rm, w: is_w(to_n) });
        }
        (MTy::W | MTy::L, MTy::S | MTy::D) => {
            let from64 = from_n == MTy::L;
            let double = to_n == MTy::D;
            let rn = em.use_int(src, !from64, Scratch::A)?;
            let vd = em.def_fp(dst);
            em.emit(AInst::SCvtF { vd, rn, double, from64 });
        }
        (MTy::S | MTy::D, MTy::W | MTy::L) => {
            // Round to nearest: BASIC's float→integer assignment rule.
            let double = from_n == MTy::D;
            let to64 = to_n == MTy::L;
            let vn = em.use_fp(src, double, Scratch::A)?;
            let rd = em.def_int(dst);
            em.emit(AInst::FCvtAs { rd, vn, double, to64 });
        }
        (MTy::S, MTy::D) => {
            let vn = em.use_fp(src, false, Scratch::A)?;
            let vd = em.def_fp(dst);
            em.emit(AInst::FCvt { vd, vn, to_double: true });
        }
        (MTy::D, MTy::S) => {
            let vn = em.use_fp(src, true, Scratch::A)?;
            let vd = em.def_fp(dst);
            em.emit(AInst::FCvt { vd, vn, to_double: false });
        }
        (MTy::S, MTy::S) | (MTy::D, MTy::D) => {
            let double = to_n == MTy::D;
            let rn = em.use_fp(src, double, Scratch::A)?;
            let rd = em.def_fp(dst);
            em.emit(AInst::FMovReg { rd, rn, double });
        }
        _ => return Err(CodeGenError::ice("unsupported conversion")),
    }
    em.finish_def(dst);
    Ok(())
}

/// Move call arguments into the ABI registers. Sources never live in
/// x0–x7/d0–d7 (the allocator pools exclude them), so argument setup
/// cannot clobber a pending source.
fn emit_call_args(em: &mut FnEmitter<'_>, args: &[(Val, MTy)]) -> Result<(), CodeGenError> {
    let mut next_x = 0u8;
    let mut next_v = 0u8;
    for (arg, ty) in args {
        if ty.is_float() {
            let double = matches!(ty, MTy::D);
            let target = VReg(next_v);
            next_v += 1;
            match arg {
                Val::F(v) => em.float_const(target, *v, double),
                Val::I(v) => em.float_const(target, *v as f64, double),
                Val::Temp(_) => {
                    let rn = em.use_fp(arg, double, Scratch::A)?;
                    em.emit(AInst::FMovReg { rd: target, rn, double });
                }
            }
        } else {
            let w = is_w(*ty);
            let target = XReg(next_x);
            next_x += 1;
            match arg {
                Val::I(v) => em.load_imm(target, *v, w),
                _ => {
                    let rm = em.use_int(arg, w, Scratch::A)?;
                    em.emit(AInst::MovReg { rd: target, rm, w });
                }
            }
        }
    }
    Ok(())
}

fn capture_result(em: &mut FnEmitter<'_>, dst: TempId, ty: MTy) {
    if ty.is_float() {
        let double = matches!(ty, MTy::D);
        let rd = em.def_fp(dst);
        em.emit(AInst::FMovReg { rd, rn: VReg(0), double });
    } else {
        let rd = em.def_int(dst);
        em.emit(AInst::MovReg { rd, rm: XReg(0), w: is_w(ty) });
    }
    em.finish_def(dst);
}

fn emit_term(em: &mut FnEmitter<'_>, term: &Term) -> Result<(), CodeGenError> {
    match term {
        Term::Jmp(to) => {
            let label = em.block_label(*to);
            em.emit(AInst::B { label });
            Ok(())
        }
        Term::Br { cond, then_to, else_to } => {
            // Full-width test: w-typed truth values zero-extend, and
            // l-typed conditions must not drop their high bits.
            let rn = em.use_int(cond, false, Scratch::A)?;
            let then_label = em.block_label(*then_to);
            let else_label = em.block_label(*else_to);
            em.emit(AInst::Cbnz { rn, label: then_label, w: false });
            em.emit(AInst::B { label: else_label });
            Ok(())
        }
        Term::Switch { value, base, targets, default } => {
            let rn = em.use_int(value, false, Scratch::A)?;
            // x16 = value - base; unsigned compare covers both below-range
            // and above-range in one branch.
            if (0..=4095).contains(base) {
                em.emit(AInst::SubImm {
                    rd: Scratch::A.x(),
                    rn,
                    imm: *base as u16,
                    w: false,
                });
            } else {
                em.load_imm(Scratch::B.x(), *base, false);
                em.emit(AInst::IBin {
                    op: IOp::Sub,
                    rd: Scratch::A.x(),
                    rn,
                    rm: Scratch::B.x(),
                    w: false,
                });
            }
            em.emit(AInst::CmpImm {
                rn: Scratch::A.x(),
                imm: targets.len() as u16,
                w: false,
            });
            let default_label = em.block_label(*default);
            em.emit(AInst::BCond { cond: Cond::Hs, label: default_label });
            let table = em.local_label("jumptable");
            em.emit(AInst::Adr { rd: Scratch::B.x(), label: table.clone() });
            em.emit(AInst::AddRegShifted {
                rd: Scratch::B.x(),
                rn: Scratch::B.x(),
                rm: Scratch::A.x(),
                shift: 2,
                sub: false,
                w: false,
            });
            em.emit(AInst::Br { rn: Scratch::B.x() });
            em.emit(AInst::Label(table));
            for target in targets {
                let label = em.block_label(*target);
                em.emit(AInst::B { label });
            }
            Ok(())
        }
        Term::Ret(value) => {
            if let Some((val, ty)) = value {
                if ty.is_float() {
                    let double = matches!(ty, MTy::D);
                    match val {
                        Val::F(v) => em.float_const(VReg(0), *v, double),
                        Val::I(v) => em.float_const(VReg(0), *v as f64, double),
                        Val::Temp(_) => {
                            let rn = em.use_fp(val, double, Scratch::A)?;
                            em.emit(AInst::FMovReg { rd: VReg(0), rn, double });
                        }
                    }
                } else {
                    let w = is_w(*ty);
                    match val {
                        Val::I(v) => em.load_imm(XReg(0), *v, w),
                        _ => {
                            let rm = em.use_int(val, w, Scratch::A)?;
                            em.emit(AInst::MovReg { rd: XReg(0), rm, w });
                        }
                    }
                }
            }
            let label = em.epilogue_label();
            em.emit(AInst::B { label });
            Ok(())
        }
        Term::Gosub { target, resume } => {
            // Push the address of the statement after the GOSUB, then jump.
            let resume_label = em.block_label(*resume);
            let target_label = em.block_label(*target);
            em.emit(AInst::Adr { rd: XReg(0), label: resume_label });
            em.emit(AInst::Bl { sym: "gosub_push".to_string() });
            em.emit(AInst::B { label: target_label });
            Ok(())
        }
        Term::GosubRet => {
            em.emit(AInst::Bl { sym: "gosub_pop".to_string() });
            em.emit(AInst::Br { rn: XReg(0) });
            Ok(())
        }
        Term::Unreachable => {
            em.emit(AInst::Brk);
            Ok(())
        }
    }
}
