//! Whole-array, reduction, and whole-UDT emission.
//!
//! Each tagged instruction expands into a vector loop over q registers
//! plus a scalar remainder, or into the scalar loop alone when the
//! vectoriser said no. The remainder and the fallback are the same code
//! path, so the scalar loop is the oracle the vector body is checked
//! against.
//!
//! Register use inside an expansion (clobbers like a call):
//! - x0 dst pointer, x1/x2/x6 source pointers, x3 length, x4 vector
//!   iterations, x5 scalar count
//! - w7/x7 integer element, w8/x8 integer scalar or second element
//! - v0–v2 float elements, v7 float scalar
//! - v28/v29 reserved vector scratch, v30 third vector operand
//!
//! The allocator keeps every value live across one of these expansions in
//! a callee-saved register, so the scratch set above is free.

use super::insts::*;
use super::state::{FnEmitter, Scratch};
use crate::codegen::CodeGenError;
use crate::ir::{
    ArrayOpInst, ArrayOpKind, BroadcastOp, MTy, ReduceInst, ReduceKind, UdtVecInst, UdtVecKind,
    Val,
};
use crate::semantic::SimdClass;
use crate::vectorize::lanes_for;
use fb_core::{ElementType, array_desc};

const DST_PTR: XReg = XReg(0);
const A_PTR: XReg = XReg(1);
const B_PTR: XReg = XReg(2);
const C_PTR: XReg = XReg(6);
const LEN: XReg = XReg(3);
const VEC_ITERS: XReg = XReg(4);
const SCALAR_COUNT: XReg = XReg(5);
const INT_ELEM: XReg = XReg(7);
const INT_SCALAR: XReg = XReg(8);

const VEC_A: VReg = VReg(28);
const VEC_B: VReg = VReg(29);
const VEC_C: VReg = VReg(30);
const F_ELEM_A: VReg = VReg(0);
const F_ELEM_B: VReg = VReg(1);
const F_ELEM_C: VReg = VReg(2);
const F_SCALAR: VReg = VReg(7);

fn is_float(elem: ElementType) -> bool {
    matches!(elem, ElementType::Single | ElementType::Double)
}

fn arrangement(elem: ElementType) -> Arr {
    match elem {
        ElementType::Byte => Arr::B16,
        ElementType::Short => Arr::H8,
        ElementType::Int32 | ElementType::Single => Arr::S4,
        _ => Arr::D2,
    }
}

fn fsize(elem: ElementType) -> FSize {
    if elem == ElementType::Double { FSize::D } else { FSize::S }
}

fn mem_size(elem: ElementType) -> (MemSize, bool) {
    match elem {
        ElementType::Byte => (MemSize::B, false),
        ElementType::Short => (MemSize::H, true),
        ElementType::Int32 => (MemSize::W, false),
        _ => (MemSize::X, false),
    }
}

fn vbin_for(elem: ElementType, op: BroadcastOp) -> VOp {
    if is_float(elem) {
        match op {
            BroadcastOp::Add => VOp::FAdd,
            BroadcastOp::Sub => VOp::FSub,
            BroadcastOp::Mul => VOp::FMul,
            BroadcastOp::Div => VOp::FDiv,
        }
    } else {
        match op {
            BroadcastOp::Add => VOp::Add,
            BroadcastOp::Sub => VOp::Sub,
            BroadcastOp::Mul => VOp::Mul,
            BroadcastOp::Div => VOp::Mul, // unreachable: gated by the vectoriser
        }
    }
}

fn fop_for(op: BroadcastOp) -> FOp {
    match op {
        BroadcastOp::Add => FOp::Add,
        BroadcastOp::Sub => FOp::Sub,
        BroadcastOp::Mul => FOp::Mul,
        BroadcastOp::Div => FOp::Div,
    }
}

fn iop_for(op: BroadcastOp) -> IOp {
    match op {
        BroadcastOp::Add => IOp::Add,
        BroadcastOp::Sub => IOp::Sub,
        BroadcastOp::Mul => IOp::Mul,
        BroadcastOp::Div => IOp::SDiv,
    }
}

/// Load `length` and the data pointers out of the descriptors.
fn load_array_headers(
    em: &mut FnEmitter<'_>,
    op: &ArrayOpInst,
) -> Result<(), CodeGenError> {
    let dst = em.use_int(&op.dst, false, Scratch::A)?;
    em.emit(AInst::Ldr {
        rt: LEN,
        base: dst,
        offset: array_desc::LENGTH,
        size: MemSize::X,
        sign_extend: false,
    });
    em.emit(AInst::Ldr {
        rt: DST_PTR,
        base: dst,
        offset: array_desc::DATA_POINTER,
        size: MemSize::X,
        sign_extend: false,
    });
    for (val, reg) in [(&op.a, A_PTR), (&op.b, B_PTR), (&op.c, C_PTR)] {
        if let Some(val) = val {
            let desc = em.use_int(val, false, Scratch::A)?;
            em.emit(AInst::Ldr {
                rt: reg,
                base: desc,
                offset: array_desc::DATA_POINTER,
                size: MemSize::X,
                sign_extend: false,
            });
        }
    }
    Ok(())
}

/// Move the scalar operand (fill/broadcast) into its conventional home.
fn load_scalar_operand(
    em: &mut FnEmitter<'_>,
    scalar: &Val,
    elem: ElementType,
) -> Result<(), CodeGenError> {
    if is_float(elem) {
        let double = elem == ElementType::Double;
        match scalar {
            Val::F(v) => em.float_const(F_SCALAR, *v, double),
            Val::I(v) => em.float_const(F_SCALAR, *v as f64, double),
            Val::Temp(_) => {
                let rn = em.use_fp(scalar, double, Scratch::A)?;
                em.emit(AInst::FMovReg { rd: F_SCALAR, rn, double });
            }
        }
    } else {
        match scalar {
            Val::I(v) => em.load_imm(INT_SCALAR, *v, false),
            _ => {
                let rm = em.use_int(scalar, false, Scratch::A)?;
                em.emit(AInst::MovReg { rd: INT_SCALAR, rm, w: false });
            }
        }
    }
    Ok(())
}

pub fn emit_array_op(em: &mut FnEmitter<'_>, op: &ArrayOpInst) -> Result<(), CodeGenError> {
    let elem = op.elem;
    if matches!(elem, ElementType::Str | ElementType::Udt) {
        return Err(CodeGenError::ice("whole-array op on a non-numeric element"));
    }
    let esize = elem.size();
    load_array_headers(em, op)?;
    if let Some(scalar) = &op.scalar {
        load_scalar_operand(em, scalar, elem)?;
    }

    let tail = em.local_label("arr_tail");
    if op.simd {
        let lanes = lanes_for(elem).ok_or_else(|| CodeGenError::ice("simd on bad element"))?;
        let k = lanes.trailing_zeros() as u8;
        em.emit(AInst::LsrImm { rd: VEC_ITERS, rn: LEN, shift: k, w: false });
        em.emit(AInst::AddRegShifted {
            rd: SCALAR_COUNT,
            rn: LEN,
            rm: VEC_ITERS,
            shift: k,
            sub: true,
            w: false,
        });
        // Broadcast the scalar across v29 once, outside the loop.
        if op.scalar.is_some() {
            if is_float(elem) {
                em.emit(AInst::DupLane0 { vd: VEC_B, vn: F_SCALAR, arr: arrangement(elem) });
            } else {
                em.emit(AInst::Dup { vd: VEC_B, rn: INT_SCALAR, arr: arrangement(elem) });
            }
        }
        em.emit(AInst::Cbz { rn: VEC_ITERS, label: tail.clone(), w: false });
        let loop_label = em.local_label("arr_vec");
        em.emit(AInst::Label(loop_label.clone()));
        emit_vector_body(em, op, elem);
        em.emit(AInst::SubImm { rd: VEC_ITERS, rn: VEC_ITERS, imm: 1, w: false });
        em.emit(AInst::Cbnz { rn: VEC_ITERS, label: loop_label, w: false });
    } else {
        em.emit(AInst::MovReg { rd: SCALAR_COUNT, rm: LEN, w: false });
    }
    em.emit(AInst::Label(tail));
    emit_scalar_loop(em, op, elem, esize);
    Ok(())
}

fn emit_vector_body(em: &mut FnEmitter<'_>, op: &ArrayOpInst, elem: ElementType) {
    let arr = arrangement(elem);
    let load_a = AInst::LdrFPost { rt: VEC_A, base: A_PTR, imm: 16, size: FSize::Q };
    let store = AInst::StrFPost { rt: VEC_A, base: DST_PTR, imm: 16, size: FSize::Q };
    match op.kind {
        ArrayOpKind::Copy => {
            em.emit(load_a);
            em.emit(store);
        }
        ArrayOpKind::Fill => {
            em.emit(AInst::StrFPost { rt: VEC_B, base: DST_PTR, imm: 16, size: FSize::Q });
        }
        ArrayOpKind::Neg => {
            em.emit(load_a);
            let op = if is_float(elem) { VUnOp::FNeg } else { VUnOp::Neg };
            em.emit(AInst::VUn { op, vd: VEC_A, vn: VEC_A, arr });
            em.emit(store);
        }
        ArrayOpKind::Abs => {
            em.emit(load_a);
            let op = if is_float(elem) { VUnOp::FAbs } else { VUnOp::Abs };
            em.emit(AInst::VUn { op, vd: VEC_A, vn: VEC_A, arr });
            em.emit(store);
        }
        ArrayOpKind::Sqrt => {
            em.emit(load_a);
            em.emit(AInst::VUn { op: VUnOp::FSqrt, vd: VEC_A, vn: VEC_A, arr });
            em.emit(store);
        }
        ArrayOpKind::Add | ArrayOpKind::Sub | ArrayOpKind::Mul | ArrayOpKind::Div => {
            em.emit(load_a);
            em.emit(AInst::LdrFPost { rt: VEC_B, base: B_PTR, imm: 16, size: FSize::Q });
            let vop = match (op.kind, is_float(elem)) {
                (ArrayOpKind::Add, true) => VOp::FAdd,
                (ArrayOpKind::Sub, true) => VOp::FSub,
                (ArrayOpKind::Mul, true) => VOp::FMul,
                (ArrayOpKind::Div, true) => VOp::FDiv,
                (ArrayOpKind::Add, false) => VOp::Add,
                (ArrayOpKind::Sub, false) => VOp::Sub,
                _ => VOp::Mul,
            };
            em.emit(AInst::VBin { op: vop, vd: VEC_A, vn: VEC_A, vm: VEC_B, arr });
            em.emit(store);
        }
        ArrayOpKind::Fma => {
            // acc = a; acc += b * c, fused.
            em.emit(load_a);
            em.emit(AInst::LdrFPost { rt: VEC_B, base: B_PTR, imm: 16, size: FSize::Q });
            em.emit(AInst::LdrFPost { rt: VEC_C, base: C_PTR, imm: 16, size: FSize::Q });
            em.emit(AInst::VBin { op: VOp::FMla, vd: VEC_A, vn: VEC_B, vm: VEC_C, arr });
            em.emit(store);
        }
        ArrayOpKind::BroadcastRight(bop) => {
            em.emit(load_a);
            em.emit(AInst::VBin { op: vbin_for(elem, bop), vd: VEC_A, vn: VEC_A, vm: VEC_B, arr });
            em.emit(store);
        }
        ArrayOpKind::BroadcastLeft(bop) => {
            em.emit(load_a);
            em.emit(AInst::VBin { op: vbin_for(elem, bop), vd: VEC_A, vn: VEC_B, vm: VEC_A, arr });
            em.emit(store);
        }
    }
}

/// The scalar loop: the remainder after a vector body, and the whole loop
/// when NEON is off. One element per iteration, same operation semantics.
fn emit_scalar_loop(em: &mut FnEmitter<'_>, op: &ArrayOpInst, elem: ElementType, esize: i32) {
    let loop_label = em.local_label("arr_sc");
    let done = em.local_label("arr_done");
    em.emit(AInst::Label(loop_label.clone()));
    em.emit(AInst::Cbz { rn: SCALAR_COUNT, label: done.clone(), w: false });

    let float = is_float(elem);
    let double = elem == ElementType::Double;
    let (isize_, sign) = mem_size(elem);
    let w = !matches!(isize_, MemSize::X);

    // Loads.
    if op.a.is_some() {
        if float {
            em.emit(AInst::LdrF { rt: F_ELEM_A, base: A_PTR, offset: 0, size: fsize(elem) });
        } else {
            em.emit(AInst::Ldr { rt: INT_ELEM, base: A_PTR, offset: 0, size: isize_, sign_extend: sign });
        }
    }
    if op.b.is_some() {
        if float {
            em.emit(AInst::LdrF { rt: F_ELEM_B, base: B_PTR, offset: 0, size: fsize(elem) });
        } else {
            em.emit(AInst::Ldr { rt: INT_SCALAR, base: B_PTR, offset: 0, size: isize_, sign_extend: sign });
        }
    }
    if op.c.is_some() {
        em.emit(AInst::LdrF { rt: F_ELEM_C, base: C_PTR, offset: 0, size: fsize(elem) });
    }

    // Compute into the store source.
    let mut store_float = F_ELEM_A;
    let mut store_int = INT_ELEM;
    match op.kind {
        ArrayOpKind::Copy => {}
        ArrayOpKind::Fill => {
            store_float = F_SCALAR;
            store_int = INT_SCALAR;
        }
        ArrayOpKind::Neg => {
            if float {
                em.emit(AInst::FNeg { rd: F_ELEM_A, rn: F_ELEM_A, double });
            } else {
                em.emit(AInst::IBin { op: IOp::Sub, rd: INT_ELEM, rn: XZR, rm: INT_ELEM, w });
            }
        }
        ArrayOpKind::Abs => {
            if float {
                em.emit(AInst::FAbs { rd: F_ELEM_A, rn: F_ELEM_A, double });
            } else {
                em.emit(AInst::IBin { op: IOp::Sub, rd: INT_SCALAR, rn: XZR, rm: INT_ELEM, w });
                em.emit(AInst::CmpImm { rn: INT_ELEM, imm: 0, w });
                em.emit(AInst::CSel {
                    rd: INT_ELEM,
                    rn: INT_ELEM,
                    rm: INT_SCALAR,
                    cond: Cond::Ge,
                    w,
                });
            }
        }
        ArrayOpKind::Sqrt => {
            em.emit(AInst::FSqrt { rd: F_ELEM_A, rn: F_ELEM_A, double });
        }
        ArrayOpKind::Add | ArrayOpKind::Sub | ArrayOpKind::Mul | ArrayOpKind::Div => {
            let bop = match op.kind {
                ArrayOpKind::Add => BroadcastOp::Add,
                ArrayOpKind::Sub => BroadcastOp::Sub,
                ArrayOpKind::Mul => BroadcastOp::Mul,
                _ => BroadcastOp::Div,
            };
            if float {
                em.emit(AInst::FBin {
                    op: fop_for(bop),
                    rd: F_ELEM_A,
                    rn: F_ELEM_A,
                    rm: F_ELEM_B,
                    double,
                });
            } else {
                em.emit(AInst::IBin {
                    op: iop_for(bop),
                    rd: INT_ELEM,
                    rn: INT_ELEM,
                    rm: INT_SCALAR,
                    w,
                });
            }
        }
        ArrayOpKind::Fma => {
            // Fused, exactly like the vector fmla.
            em.emit(AInst::FMadd {
                rd: F_ELEM_A,
                rn: F_ELEM_B,
                rm: F_ELEM_C,
                ra: F_ELEM_A,
                double,
            });
        }
        ArrayOpKind::BroadcastRight(bop) => {
            if float {
                em.emit(AInst::FBin {
                    op: fop_for(bop),
                    rd: F_ELEM_A,
                    rn: F_ELEM_A,
                    rm: F_SCALAR,
                    double,
                });
            } else {
                em.emit(AInst::IBin {
                    op: iop_for(bop),
                    rd: INT_ELEM,
                    rn: INT_ELEM,
                    rm: INT_SCALAR,
                    w,
                });
            }
        }
        ArrayOpKind::BroadcastLeft(bop) => {
            if float {
                em.emit(AInst::FBin {
                    op: fop_for(bop),
                    rd: F_ELEM_A,
                    rn: F_SCALAR,
                    rm: F_ELEM_A,
                    double,
                });
            } else {
                em.emit(AInst::IBin {
                    op: iop_for(bop),
                    rd: INT_ELEM,
                    rn: INT_SCALAR,
                    rm: INT_ELEM,
                    w,
                });
            }
        }
    }

    // Store and advance.
    if float {
        em.emit(AInst::StrF { rt: store_float, base: DST_PTR, offset: 0, size: fsize(elem) });
    } else {
        em.emit(AInst::Str { rt: store_int, base: DST_PTR, offset: 0, size: isize_ });
    }
    em.emit(AInst::AddImm { rd: DST_PTR, rn: DST_PTR, imm: esize as u16, w: false });
    for (val, reg) in [(&op.a, A_PTR), (&op.b, B_PTR), (&op.c, C_PTR)] {
        if val.is_some() {
            em.emit(AInst::AddImm { rd: reg, rn: reg, imm: esize as u16, w: false });
        }
    }
    em.emit(AInst::SubImm { rd: SCALAR_COUNT, rn: SCALAR_COUNT, imm: 1, w: false });
    em.emit(AInst::B { label: loop_label });
    em.emit(AInst::Label(done));
}

// ----------------------------------------------------------------------
// Reductions

pub fn emit_reduce(em: &mut FnEmitter<'_>, r: &ReduceInst) -> Result<(), CodeGenError> {
    let elem = r.elem;
    if matches!(elem, ElementType::Str | ElementType::Udt) {
        return Err(CodeGenError::ice("reduction over a non-numeric element"));
    }
    let esize = elem.size();
    let float = is_float(elem);
    let double = elem == ElementType::Double;

    // Headers.
    let a_desc = em.use_int(&r.a, false, Scratch::A)?;
    em.emit(AInst::Ldr {
        rt: LEN,
        base: a_desc,
        offset: array_desc::LENGTH,
        size: MemSize::X,
        sign_extend: false,
    });
    em.emit(AInst::Ldr {
        rt: A_PTR,
        base: a_desc,
        offset: array_desc::DATA_POINTER,
        size: MemSize::X,
        sign_extend: false,
    });
    if let Some(b) = &r.b {
        let b_desc = em.use_int(b, false, Scratch::A)?;
        em.emit(AInst::Ldr {
            rt: B_PTR,
            base: b_desc,
            offset: array_desc::DATA_POINTER,
            size: MemSize::X,
            sign_extend: false,
        });
    }

    match r.kind {
        ReduceKind::Sum | ReduceKind::Avg | ReduceKind::Dot => {
            emit_accumulating_reduce(em, r, elem, esize, float, double)
        }
        ReduceKind::Max | ReduceKind::Min => {
            emit_minmax_reduce(em, r, elem, esize, float, double)
        }
    }
}

fn emit_accumulating_reduce(
    em: &mut FnEmitter<'_>,
    r: &ReduceInst,
    elem: ElementType,
    esize: i32,
    float: bool,
    double: bool,
) -> Result<(), CodeGenError> {
    let tail = em.local_label("red_tail");
    // Zero accumulators: v28 for float lanes, x7 for the int sum.
    em.emit(AInst::MovI0 { vd: VEC_A });
    em.emit(AInst::MovZ { rd: INT_ELEM, imm: 0, shift: 0, w: false });

    if r.simd {
        let lanes = lanes_for(elem).ok_or_else(|| CodeGenError::ice("simd on bad element"))?;
        let k = lanes.trailing_zeros() as u8;
        em.emit(AInst::LsrImm { rd: VEC_ITERS, rn: LEN, shift: k, w: false });
        em.emit(AInst::AddRegShifted {
            rd: SCALAR_COUNT,
            rn: LEN,
            rm: VEC_ITERS,
            shift: k,
            sub: true,
            w: false,
        });
        em.emit(AInst::Cbz { rn: VEC_ITERS, label: tail.clone(), w: false });
        let loop_label = em.local_label("red_vec");
        em.emit(AInst::Label(loop_label.clone()));
        em.emit(AInst::LdrFPost { rt: VEC_B, base: A_PTR, imm: 16, size: FSize::Q });
        match (r.kind, elem) {
            (ReduceKind::Dot, _) => {
                em.emit(AInst::LdrFPost { rt: VEC_C, base: B_PTR, imm: 16, size: FSize::Q });
                em.emit(AInst::VBin {
                    op: VOp::FMla,
                    vd: VEC_A,
                    vn: VEC_B,
                    vm: VEC_C,
                    arr: arrangement(elem),
                });
            }
            (_, ElementType::Int32) => {
                // Widening pairwise accumulate keeps 64-bit lanes.
                em.emit(AInst::SAdalp { vd: VEC_A, vn: VEC_B });
            }
            _ => {
                em.emit(AInst::VBin {
                    op: VOp::FAdd,
                    vd: VEC_A,
                    vn: VEC_A,
                    vm: VEC_B,
                    arr: arrangement(elem),
                });
            }
        }
        em.emit(AInst::SubImm { rd: VEC_ITERS, rn: VEC_ITERS, imm: 1, w: false });
        em.emit(AInst::Cbnz { rn: VEC_ITERS, label: loop_label, w: false });
        // Horizontal fold into a scalar accumulator.
        if float {
            if double {
                em.emit(AInst::PairFold { mnemonic: "faddp", vd: VEC_A, vn: VEC_A, double: true });
            } else {
                em.emit(AInst::VBin { op: VOp::FAddP, vd: VEC_A, vn: VEC_A, vm: VEC_A, arr: Arr::S4 });
                em.emit(AInst::PairFold { mnemonic: "faddp", vd: VEC_A, vn: VEC_A, double: false });
            }
        } else {
            em.emit(AInst::PairFold { mnemonic: "addp", vd: VEC_A, vn: VEC_A, double: true });
            em.emit(AInst::UMovD0 { rd: INT_ELEM, vn: VEC_A });
        }
    } else {
        em.emit(AInst::MovReg { rd: SCALAR_COUNT, rm: LEN, w: false });
    }

    // Scalar remainder (or the whole array).
    em.emit(AInst::Label(tail));
    let loop_label = em.local_label("red_sc");
    let done = em.local_label("red_done");
    em.emit(AInst::Label(loop_label.clone()));
    em.emit(AInst::Cbz { rn: SCALAR_COUNT, label: done.clone(), w: false });
    if float {
        em.emit(AInst::LdrF { rt: F_ELEM_A, base: A_PTR, offset: 0, size: fsize(elem) });
        if r.kind == ReduceKind::Dot {
            em.emit(AInst::LdrF { rt: F_ELEM_B, base: B_PTR, offset: 0, size: fsize(elem) });
            em.emit(AInst::FMadd { rd: VEC_A, rn: F_ELEM_A, rm: F_ELEM_B, ra: VEC_A, double });
        } else {
            em.emit(AInst::FBin { op: FOp::Add, rd: VEC_A, rn: VEC_A, rm: F_ELEM_A, double });
        }
    } else {
        let (isize_, sign) = mem_size(elem);
        em.emit(AInst::Ldr { rt: INT_SCALAR, base: A_PTR, offset: 0, size: isize_, sign_extend: sign });
        if !matches!(isize_, MemSize::X) {
            em.emit(AInst::SxtW { rd: INT_SCALAR, rn: INT_SCALAR });
        }
        em.emit(AInst::IBin { op: IOp::Add, rd: INT_ELEM, rn: INT_ELEM, rm: INT_SCALAR, w: false });
    }
    em.emit(AInst::AddImm { rd: A_PTR, rn: A_PTR, imm: esize as u16, w: false });
    if r.b.is_some() {
        em.emit(AInst::AddImm { rd: B_PTR, rn: B_PTR, imm: esize as u16, w: false });
    }
    em.emit(AInst::SubImm { rd: SCALAR_COUNT, rn: SCALAR_COUNT, imm: 1, w: false });
    em.emit(AInst::B { label: loop_label });
    em.emit(AInst::Label(done));

    // Deliver the result in the destination's machine type.
    match r.kind {
        ReduceKind::Avg => {
            // sum / n, always double.
            if float {
                if !double {
                    em.emit(AInst::FCvt { vd: VEC_A, vn: VEC_A, to_double: true });
                }
            } else {
                em.emit(AInst::SCvtF { vd: VEC_A, rn: INT_ELEM, double: true, from64: true });
            }
            em.emit(AInst::SCvtF { vd: VEC_B, rn: LEN, double: true, from64: true });
            em.emit(AInst::FBin { op: FOp::Div, rd: VEC_A, rn: VEC_A, rm: VEC_B, double: true });
            let rd = em.def_fp(r.dst);
            em.emit(AInst::FMovReg { rd, rn: VEC_A, double: true });
        }
        ReduceKind::Dot => {
            if !double {
                em.emit(AInst::FCvt { vd: VEC_A, vn: VEC_A, to_double: true });
            }
            let rd = em.def_fp(r.dst);
            em.emit(AInst::FMovReg { rd, rn: VEC_A, double: true });
        }
        _ => {
            if float {
                let rd = em.def_fp(r.dst);
                em.emit(AInst::FMovReg { rd, rn: VEC_A, double });
            } else {
                let rd = em.def_int(r.dst);
                em.emit(AInst::MovReg { rd, rm: INT_ELEM, w: r.dst_ty == MTy::W });
            }
        }
    }
    em.finish_def(r.dst);
    Ok(())
}

fn emit_minmax_reduce(
    em: &mut FnEmitter<'_>,
    r: &ReduceInst,
    elem: ElementType,
    esize: i32,
    float: bool,
    double: bool,
) -> Result<(), CodeGenError> {
    let max = r.kind == ReduceKind::Max;
    let init_scalar = em.local_label("mm_init");
    let tail = em.local_label("mm_tail");
    let done = em.local_label("mm_done");
    let zero = em.local_label("mm_zero");
    let deliver = em.local_label("mm_deliver");

    em.emit(AInst::Cbz { rn: LEN, label: zero.clone(), w: false });

    if r.simd {
        let lanes = lanes_for(elem).ok_or_else(|| CodeGenError::ice("simd on bad element"))?;
        let k = lanes.trailing_zeros() as u8;
        em.emit(AInst::LsrImm { rd: VEC_ITERS, rn: LEN, shift: k, w: false });
        em.emit(AInst::AddRegShifted {
            rd: SCALAR_COUNT,
            rn: LEN,
            rm: VEC_ITERS,
            shift: k,
            sub: true,
            w: false,
        });
    } else {
        em.emit(AInst::MovZ { rd: VEC_ITERS, imm: 0, shift: 0, w: false });
        em.emit(AInst::MovReg { rd: SCALAR_COUNT, rm: LEN, w: false });
    }
    em.emit(AInst::Cbz { rn: VEC_ITERS, label: init_scalar.clone(), w: false });

    // Vector part: seed the accumulator with the first vector, fold the
    // rest, then reduce across lanes.
    em.emit(AInst::LdrFPost { rt: VEC_A, base: A_PTR, imm: 16, size: FSize::Q });
    em.emit(AInst::SubImm { rd: VEC_ITERS, rn: VEC_ITERS, imm: 1, w: false });
    let loop_label = em.local_label("mm_vec");
    let fold = em.local_label("mm_fold");
    em.emit(AInst::Label(loop_label.clone()));
    em.emit(AInst::Cbz { rn: VEC_ITERS, label: fold.clone(), w: false });
    em.emit(AInst::LdrFPost { rt: VEC_B, base: A_PTR, imm: 16, size: FSize::Q });
    let vop = match (float, max) {
        (true, true) => VOp::FMax,
        (true, false) => VOp::FMin,
        (false, true) => VOp::SMax,
        (false, false) => VOp::SMin,
    };
    em.emit(AInst::VBin { op: vop, vd: VEC_A, vn: VEC_A, vm: VEC_B, arr: arrangement(elem) });
    em.emit(AInst::SubImm { rd: VEC_ITERS, rn: VEC_ITERS, imm: 1, w: false });
    em.emit(AInst::B { label: loop_label });
    em.emit(AInst::Label(fold));
    match (float, double, max) {
        (true, true, true) => {
            em.emit(AInst::PairFold { mnemonic: "fmaxp", vd: VEC_A, vn: VEC_A, double: true });
        }
        (true, true, false) => {
            em.emit(AInst::PairFold { mnemonic: "fminp", vd: VEC_A, vn: VEC_A, double: true });
        }
        (true, false, _) => {
            let mnemonic = if max { "fmaxv" } else { "fminv" };
            em.emit(AInst::AcrossLanes { mnemonic, vd: VEC_A, vn: VEC_A, arr: Arr::S4 });
        }
        (false, _, _) => {
            let mnemonic = if max { "smaxv" } else { "sminv" };
            em.emit(AInst::AcrossLanes { mnemonic, vd: VEC_A, vn: VEC_A, arr: Arr::S4 });
            em.emit(AInst::FMovToGp { rd: INT_ELEM, vn: VEC_A, w: true });
            em.emit(AInst::SxtW { rd: INT_ELEM, rn: INT_ELEM });
        }
    }
    em.emit(AInst::B { label: tail.clone() });

    // No vector part: seed the accumulator with the first element.
    em.emit(AInst::Label(init_scalar));
    if float {
        em.emit(AInst::LdrF { rt: VEC_A, base: A_PTR, offset: 0, size: fsize(elem) });
    } else {
        let (isize_, sign) = mem_size(elem);
        em.emit(AInst::Ldr { rt: INT_ELEM, base: A_PTR, offset: 0, size: isize_, sign_extend: sign });
    }
    em.emit(AInst::AddImm { rd: A_PTR, rn: A_PTR, imm: esize as u16, w: false });
    em.emit(AInst::SubImm { rd: SCALAR_COUNT, rn: SCALAR_COUNT, imm: 1, w: false });

    // Scalar remainder folds into the accumulator.
    em.emit(AInst::Label(tail.clone()));
    let sc_loop = em.local_label("mm_sc");
    em.emit(AInst::Label(sc_loop.clone()));
    em.emit(AInst::Cbz { rn: SCALAR_COUNT, label: deliver.clone(), w: false });
    if float {
        em.emit(AInst::LdrF { rt: F_ELEM_A, base: A_PTR, offset: 0, size: fsize(elem) });
        let op = if max { FOp::Max } else { FOp::Min };
        em.emit(AInst::FBin { op, rd: VEC_A, rn: VEC_A, rm: F_ELEM_A, double });
    } else {
        let (isize_, sign) = mem_size(elem);
        let w = !matches!(isize_, MemSize::X);
        em.emit(AInst::Ldr { rt: INT_SCALAR, base: A_PTR, offset: 0, size: isize_, sign_extend: sign });
        em.emit(AInst::CmpReg { rn: INT_ELEM, rm: INT_SCALAR, w });
        let cond = if max { Cond::Gt } else { Cond::Lt };
        em.emit(AInst::CSel { rd: INT_ELEM, rn: INT_ELEM, rm: INT_SCALAR, cond, w });
    }
    em.emit(AInst::AddImm { rd: A_PTR, rn: A_PTR, imm: esize as u16, w: false });
    em.emit(AInst::SubImm { rd: SCALAR_COUNT, rn: SCALAR_COUNT, imm: 1, w: false });
    em.emit(AInst::B { label: sc_loop });

    // Empty array: zero result.
    em.emit(AInst::Label(zero));
    em.emit(AInst::MovI0 { vd: VEC_A });
    em.emit(AInst::MovZ { rd: INT_ELEM, imm: 0, shift: 0, w: false });

    em.emit(AInst::Label(deliver));
    if float {
        let rd = em.def_fp(r.dst);
        em.emit(AInst::FMovReg { rd, rn: VEC_A, double });
    } else {
        let rd = em.def_int(r.dst);
        em.emit(AInst::MovReg { rd, rm: INT_ELEM, w: r.dst_ty == MTy::W });
    }
    em.finish_def(r.dst);
    Ok(())
}

// ----------------------------------------------------------------------
// Whole-UDT operations

pub fn emit_udt_vec(em: &mut FnEmitter<'_>, u: &UdtVecInst) -> Result<(), CodeGenError> {
    // Addresses first, before any scratch is clobbered.
    let dst = em.use_int(&u.dst, false, Scratch::A)?;
    em.emit(AInst::MovReg { rd: DST_PTR, rm: dst, w: false });
    let a = em.use_int(&u.a, false, Scratch::A)?;
    em.emit(AInst::MovReg { rd: A_PTR, rm: a, w: false });
    if let Some(b) = &u.b {
        let b = em.use_int(b, false, Scratch::A)?;
        em.emit(AInst::MovReg { rd: B_PTR, rm: b, w: false });
    }

    let arr = match u.class {
        SimdClass::I32x4 => Arr::S4,
        SimdClass::F32x4 => Arr::S4,
        SimdClass::F64x2 => Arr::D2,
    };
    let float = !matches!(u.class, SimdClass::I32x4);

    if u.simd {
        em.emit(AInst::LdrF { rt: VEC_A, base: A_PTR, offset: 0, size: FSize::Q });
        match u.kind {
            UdtVecKind::Copy => {}
            _ => {
                em.emit(AInst::LdrF { rt: VEC_B, base: B_PTR, offset: 0, size: FSize::Q });
                let op = match (u.kind, float) {
                    (UdtVecKind::Add, true) => VOp::FAdd,
                    (UdtVecKind::Sub, true) => VOp::FSub,
                    (UdtVecKind::Mul, true) => VOp::FMul,
                    (UdtVecKind::Div, true) => VOp::FDiv,
                    (UdtVecKind::Add, false) => VOp::Add,
                    (UdtVecKind::Sub, false) => VOp::Sub,
                    _ => VOp::Mul,
                };
                em.emit(AInst::VBin { op, vd: VEC_A, vn: VEC_A, vm: VEC_B, arr });
            }
        }
        em.emit(AInst::StrF { rt: VEC_A, base: DST_PTR, offset: 0, size: FSize::Q });
        return Ok(());
    }

    // Field-wise scalar fallback.
    if u.kind == UdtVecKind::Copy {
        em.emit(AInst::LdrF { rt: VEC_C, base: A_PTR, offset: 0, size: FSize::Q });
        em.emit(AInst::StrF { rt: VEC_C, base: DST_PTR, offset: 0, size: FSize::Q });
        return Ok(());
    }
    let (lanes, step) = match u.class {
        SimdClass::F64x2 => (2, 8),
        _ => (4, 4),
    };
    for i in 0..lanes {
        let offset = i * step;
        match u.class {
            SimdClass::I32x4 => {
                em.emit(AInst::Ldr { rt: INT_ELEM, base: A_PTR, offset, size: MemSize::W, sign_extend: false });
                em.emit(AInst::Ldr { rt: INT_SCALAR, base: B_PTR, offset, size: MemSize::W, sign_extend: false });
                let op = match u.kind {
                    UdtVecKind::Add => IOp::Add,
                    UdtVecKind::Sub => IOp::Sub,
                    UdtVecKind::Mul => IOp::Mul,
                    _ => IOp::SDiv,
                };
                em.emit(AInst::IBin { op, rd: INT_ELEM, rn: INT_ELEM, rm: INT_SCALAR, w: true });
                em.emit(AInst::Str { rt: INT_ELEM, base: DST_PTR, offset, size: MemSize::W });
            }
            class => {
                let double = matches!(class, SimdClass::F64x2);
                let size = if double { FSize::D } else { FSize::S };
                em.emit(AInst::LdrF { rt: F_ELEM_A, base: A_PTR, offset, size });
                em.emit(AInst::LdrF { rt: F_ELEM_B, base: B_PTR, offset, size });
                let op = match u.kind {
                    UdtVecKind::Add => FOp::Add,
                    UdtVecKind::Sub => FOp::Sub,
                    UdtVecKind::Mul => FOp::Mul,
                    _ => FOp::Div,
                };
                em.emit(AInst::FBin { op, rd: F_ELEM_A, rn: F_ELEM_A, rm: F_ELEM_B, double });
                em.emit(AInst::StrF { rt: F_ELEM_A, base: DST_PTR, offset, size });
            }
        }
    }
    Ok(())
}
