//! The ARM64 instruction set the emitter targets, with the GNU-assembly
//! printer. One structured form feeds two backends: the textual printer
//! for AOT and the binary encoder for the JIT.
//!
//! Register conventions:
//! - x0–x7 / d0–d7: argument and result registers, plus free scratch in
//!   the expanded whole-array loops (which clobber like calls).
//! - x9–x15: allocator pool for temporaries that do not cross a call.
//! - x19–x28 / d8–d15: allocator pool for call-crossing temporaries,
//!   saved in the prologue when used.
//! - x16/x17, v30/v31: emitter scratch (immediates, spill reloads).
//! - v28/v29: reserved NEON scratch; the allocator never hands them out.

use std::fmt;

/// General-purpose register number (31 is xzr or sp by context).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XReg(pub u8);

pub const XZR: XReg = XReg(31);

/// SIMD/FP register number; viewed as s/d/q per instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VReg(pub u8);

/// Condition codes. Float compares use MI/LS for < and <= so unordered
/// results fall out as false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Unsigned >=.
    Hs,
    /// Float <.
    Mi,
    /// Float <=.
    Ls,
}

impl Cond {
    pub fn text(self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Le => "le",
            Cond::Gt => "gt",
            Cond::Ge => "ge",
            Cond::Hs => "hs",
            Cond::Mi => "mi",
            Cond::Ls => "ls",
        }
    }

    /// Encoding per the condition-code table.
    pub fn code(self) -> u32 {
        match self {
            Cond::Eq => 0b0000,
            Cond::Ne => 0b0001,
            Cond::Hs => 0b0010,
            Cond::Mi => 0b0100,
            Cond::Ls => 0b1001,
            Cond::Ge => 0b1010,
            Cond::Lt => 0b1011,
            Cond::Gt => 0b1100,
            Cond::Le => 0b1101,
        }
    }

}

/// Integer load/store width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemSize {
    B,
    H,
    W,
    X,
}

impl MemSize {
    pub fn bytes(self) -> i32 {
        match self {
            MemSize::B => 1,
            MemSize::H => 2,
            MemSize::W => 4,
            MemSize::X => 8,
        }
    }
}

/// FP/SIMD load/store width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FSize {
    S,
    D,
    Q,
}

impl FSize {
    pub fn bytes(self) -> i32 {
        match self {
            FSize::S => 4,
            FSize::D => 8,
            FSize::Q => 16,
        }
    }

    fn prefix(self) -> char {
        match self {
            FSize::S => 's',
            FSize::D => 'd',
            FSize::Q => 'q',
        }
    }
}

/// Vector arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arr {
    B16,
    H8,
    S4,
    D2,
}

impl Arr {
    pub fn text(self) -> &'static str {
        match self {
            Arr::B16 => "16b",
            Arr::H8 => "8h",
            Arr::S4 => "4s",
            Arr::D2 => "2d",
        }
    }

    pub fn lanes(self) -> i32 {
        match self {
            Arr::B16 => 16,
            Arr::H8 => 8,
            Arr::S4 => 4,
            Arr::D2 => 2,
        }
    }
}

/// Vector binary operation selector (shared by the printer and encoder).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VOp {
    Add,
    Sub,
    Mul,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FMla,
    SMax,
    SMin,
    FMax,
    FMin,
    /// Pairwise add (vector form), used in horizontal folds.
    FAddP,
}

impl VOp {
    fn mnemonic(self) -> &'static str {
        match self {
            VOp::Add => "add",
            VOp::Sub => "sub",
            VOp::Mul => "mul",
            VOp::FAdd => "fadd",
            VOp::FSub => "fsub",
            VOp::FMul => "fmul",
            VOp::FDiv => "fdiv",
            VOp::FMla => "fmla",
            VOp::SMax => "smax",
            VOp::SMin => "smin",
            VOp::FMax => "fmax",
            VOp::FMin => "fmin",
            VOp::FAddP => "faddp",
        }
    }
}

/// Vector unary operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VUnOp {
    Abs,
    Neg,
    FAbs,
    FNeg,
    FSqrt,
}

impl VUnOp {
    fn mnemonic(self) -> &'static str {
        match self {
            VUnOp::Abs => "abs",
            VUnOp::Neg => "neg",
            VUnOp::FAbs => "fabs",
            VUnOp::FNeg => "fneg",
            VUnOp::FSqrt => "fsqrt",
        }
    }
}

/// Scalar FP binary op selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

impl FOp {
    fn mnemonic(self) -> &'static str {
        match self {
            FOp::Add => "fadd",
            FOp::Sub => "fsub",
            FOp::Mul => "fmul",
            FOp::Div => "fdiv",
            FOp::Max => "fmax",
            FOp::Min => "fmin",
        }
    }
}

/// Integer ALU register-form op selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IOp {
    Add,
    Sub,
    Mul,
    SDiv,
    And,
    Orr,
    Eor,
    Lsl,
    Lsr,
    Asr,
}

impl IOp {
    fn mnemonic(self) -> &'static str {
        match self {
            IOp::Add => "add",
            IOp::Sub => "sub",
            IOp::Mul => "mul",
            IOp::SDiv => "sdiv",
            IOp::And => "and",
            IOp::Orr => "orr",
            IOp::Eor => "eor",
            IOp::Lsl => "lsl",
            IOp::Lsr => "lsr",
            IOp::Asr => "asr",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AInst {
    /// Local label definition.
    Label(String),
    /// BTI landing pad on function entry.
    Bti,
    /// `stp x29, x30, [sp, #-frame]!`; the frame is patched in after
    /// emission when the callee-saved set is known.
    Prologue { frame: i32 },
    /// `ldp x29, x30, [sp], #frame` + `ret`.
    Epilogue { frame: i32 },
    /// `stp`/`ldp` of a callee-saved pair at [x29, #offset].
    StpX { r1: XReg, r2: XReg, offset: i32 },
    LdpX { r1: XReg, r2: XReg, offset: i32 },
    StpD { r1: VReg, r2: VReg, offset: i32 },
    LdpD { r1: VReg, r2: VReg, offset: i32 },
    MovSp { rd: XReg, rn: XReg },

    MovZ { rd: XReg, imm: u16, shift: u8, w: bool },
    MovK { rd: XReg, imm: u16, shift: u8, w: bool },
    MovN { rd: XReg, imm: u16, shift: u8, w: bool },
    MovReg { rd: XReg, rm: XReg, w: bool },

    AddImm { rd: XReg, rn: XReg, imm: u16, w: bool },
    SubImm { rd: XReg, rn: XReg, imm: u16, w: bool },
    IBin { op: IOp, rd: XReg, rn: XReg, rm: XReg, w: bool },
    /// `add/sub rd, rn, rm, lsl #shift`.
    AddRegShifted { rd: XReg, rn: XReg, rm: XReg, shift: u8, sub: bool, w: bool },
    /// `msub rd, rn, rm, ra` (rd = ra - rn*rm).
    MSub { rd: XReg, rn: XReg, rm: XReg, ra: XReg, w: bool },
    /// Arithmetic shift right by constant.
    AsrImm { rd: XReg, rn: XReg, shift: u8, w: bool },
    LsrImm { rd: XReg, rn: XReg, shift: u8, w: bool },
    LslImm { rd: XReg, rn: XReg, shift: u8, w: bool },
    /// `mvn rd, rm`.
    Mvn { rd: XReg, rm: XReg, w: bool },
    /// `sxtw xd, wn`.
    SxtW { rd: XReg, rn: XReg },

    CmpImm { rn: XReg, imm: u16, w: bool },
    CmpReg { rn: XReg, rm: XReg, w: bool },
    /// `csetm rd, cond`: all-ones on true (classic truth value).
    CSetM { rd: XReg, cond: Cond, w: bool },
    CSel { rd: XReg, rn: XReg, rm: XReg, cond: Cond, w: bool },

    Ldr { rt: XReg, base: XReg, offset: i32, size: MemSize, sign_extend: bool },
    Str { rt: XReg, base: XReg, offset: i32, size: MemSize },
    /// Post-indexed `ldr/str xt, [base], #imm`.
    LdrXPost { rt: XReg, base: XReg, imm: i32 },
    StrXPost { rt: XReg, base: XReg, imm: i32 },
    LdrF { rt: VReg, base: XReg, offset: i32, size: FSize },
    StrF { rt: VReg, base: XReg, offset: i32, size: FSize },
    LdrFPost { rt: VReg, base: XReg, imm: i32, size: FSize },
    StrFPost { rt: VReg, base: XReg, imm: i32, size: FSize },

    /// PC-relative address of a nearby label.
    Adr { rd: XReg, label: String },
    /// Address of a data symbol: `adrp` + `add :lo12:` in assembly, `adr`
    /// in the JIT image (everything lives in one buffer).
    AddrOf { rd: XReg, sym: String },
    /// FP constant from the per-function literal pool.
    LdrLit { rt: VReg, size: FSize, pool: usize },

    B { label: String },
    BCond { cond: Cond, label: String },
    Cbz { rn: XReg, label: String, w: bool },
    Cbnz { rn: XReg, label: String, w: bool },
    Bl { sym: String },
    Blr { rn: XReg },
    Br { rn: XReg },
    Ret,
    Brk,

    FMovReg { rd: VReg, rn: VReg, double: bool },
    /// `fmov xd, dn` / `fmov wd, sn`.
    FMovToGp { rd: XReg, vn: VReg, w: bool },
    FMovFromGp { vd: VReg, rn: XReg, w: bool },
    FBin { op: FOp, rd: VReg, rn: VReg, rm: VReg, double: bool },
    /// Fused `fmadd rd, rn, rm, ra` (rd = ra + rn*rm); the scalar
    /// remainder must round once, exactly like the vector `fmla`.
    FMadd { rd: VReg, rn: VReg, rm: VReg, ra: VReg, double: bool },
    FNeg { rd: VReg, rn: VReg, double: bool },
    FAbs { rd: VReg, rn: VReg, double: bool },
    FSqrt { rd: VReg, rn: VReg, double: bool },
    FCmp { rn: VReg, rm: VReg, double: bool },
    /// `scvtf` from a general register.
    SCvtF { vd: VReg, rn: XReg, double: bool, from64: bool },
    /// `fcvtas`: round to nearest, ties away; BASIC's float-to-integer rule.
    FCvtAs { rd: XReg, vn: VReg, double: bool, to64: bool },
    /// `fcvt` between s and d.
    FCvt { vd: VReg, vn: VReg, to_double: bool },

    /// `movi vd.16b, #0`.
    MovI0 { vd: VReg },
    /// Broadcast a general register into all lanes.
    Dup { vd: VReg, rn: XReg, arr: Arr },
    /// Broadcast lane 0 of a vector register.
    DupLane0 { vd: VReg, vn: VReg, arr: Arr },
    VBin { op: VOp, vd: VReg, vn: VReg, vm: VReg, arr: Arr },
    VUn { op: VUnOp, vd: VReg, vn: VReg, arr: Arr },
    /// `addv` / `smaxv` / `sminv` / `fmaxv` / `fminv` across lanes into a
    /// scalar (element 0 of vd).
    AcrossLanes { mnemonic: &'static str, vd: VReg, vn: VReg, arr: Arr },
    /// `sadalp vd.2d, vn.4s`: widening pairwise accumulate.
    SAdalp { vd: VReg, vn: VReg },
    /// Scalar pairwise fold: `faddp dd, vn.2d` / `faddp sd, vn.2s`, and
    /// the `fmaxp`/`fminp`/`addp` variants.
    PairFold { mnemonic: &'static str, vd: VReg, vn: VReg, double: bool },
    /// `umov xd, vn.d[0]` lane extract.
    UMovD0 { rd: XReg, vn: VReg },
}

fn x(r: XReg, w: bool) -> String {
    match (r.0, w) {
        (31, false) => "xzr".to_string(),
        (31, true) => "wzr".to_string(),
        (n, false) => format!("x{}", n),
        (n, true) => format!("w{}", n),
    }
}

fn fp(r: VReg, double: bool) -> String {
    if double { format!("d{}", r.0) } else { format!("s{}", r.0) }
}

impl fmt::Display for AInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use AInst::*;
        match self {
            Label(name) => write!(f, "{}:", name),
            Bti => write!(f, "\tbti c"),
            Prologue { frame } => {
                // The pre-indexed form only reaches 504 bytes; larger
                // frames drop sp first (in two steps past the immediate
                // range).
                if *frame <= 504 {
                    write!(f, "\tstp x29, x30, [sp, #-{}]!", frame)
                } else if *frame <= 4095 {
                    write!(f, "\tsub sp, sp, #{}\n\tstp x29, x30, [sp]", frame)
                } else {
                    write!(
                        f,
                        "\tsub sp, sp, #{}, lsl #12\n\tsub sp, sp, #{}\n\tstp x29, x30, [sp]",
                        frame >> 12,
                        frame & 0xfff
                    )
                }
            }
            Epilogue { frame } => {
                if *frame <= 504 {
                    write!(f, "\tldp x29, x30, [sp], #{}\n\tret", frame)
                } else if *frame <= 4095 {
                    write!(f, "\tldp x29, x30, [sp]\n\tadd sp, sp, #{}\n\tret", frame)
                } else {
                    write!(
                        f,
                        "\tldp x29, x30, [sp]\n\tadd sp, sp, #{}, lsl #12\n\tadd sp, sp, #{}\n\tret",
                        frame >> 12,
                        frame & 0xfff
                    )
                }
            }
            StpX { r1, r2, offset } => {
                write!(f, "\tstp {}, {}, [x29, #{}]", x(*r1, false), x(*r2, false), offset)
            }
            LdpX { r1, r2, offset } => {
                write!(f, "\tldp {}, {}, [x29, #{}]", x(*r1, false), x(*r2, false), offset)
            }
            StpD { r1, r2, offset } => {
                write!(f, "\tstp d{}, d{}, [x29, #{}]", r1.0, r2.0, offset)
            }
            LdpD { r1, r2, offset } => {
                write!(f, "\tldp d{}, d{}, [x29, #{}]", r1.0, r2.0, offset)
            }
            MovSp { rd, rn } => {
                let name = |r: &XReg| if r.0 == 31 { "sp".to_string() } else { x(*r, false) };
                write!(f, "\tmov {}, {}", name(rd), name(rn))
            }
            MovZ { rd, imm, shift, w } => {
                if *shift == 0 {
                    write!(f, "\tmovz {}, #{}", x(*rd, *w), imm)
                } else {
                    write!(f, "\tmovz {}, #{}, lsl #{}", x(*rd, *w), imm, shift)
                }
            }
            MovK { rd, imm, shift, w } => {
                write!(f, "\tmovk {}, #{}, lsl #{}", x(*rd, *w), imm, shift)
            }
            MovN { rd, imm, shift, w } => {
                if *shift == 0 {
                    write!(f, "\tmovn {}, #{}", x(*rd, *w), imm)
                } else {
                    write!(f, "\tmovn {}, #{}, lsl #{}", x(*rd, *w), imm, shift)
                }
            }
            MovReg { rd, rm, w } => write!(f, "\tmov {}, {}", x(*rd, *w), x(*rm, *w)),
            AddImm { rd, rn, imm, w } => {
                write!(f, "\tadd {}, {}, #{}", x(*rd, *w), x(*rn, *w), imm)
            }
            SubImm { rd, rn, imm, w } => {
                write!(f, "\tsub {}, {}, #{}", x(*rd, *w), x(*rn, *w), imm)
            }
            IBin { op, rd, rn, rm, w } => write!(
                f,
                "\t{} {}, {}, {}",
                op.mnemonic(),
                x(*rd, *w),
                x(*rn, *w),
                x(*rm, *w)
            ),
            AddRegShifted { rd, rn, rm, shift, sub, w } => write!(
                f,
                "\t{} {}, {}, {}, lsl #{}",
                if *sub { "sub" } else { "add" },
                x(*rd, *w),
                x(*rn, *w),
                x(*rm, *w),
                shift
            ),
            MSub { rd, rn, rm, ra, w } => write!(
                f,
                "\tmsub {}, {}, {}, {}",
                x(*rd, *w),
                x(*rn, *w),
                x(*rm, *w),
                x(*ra, *w)
            ),
            AsrImm { rd, rn, shift, w } => {
                write!(f, "\tasr {}, {}, #{}", x(*rd, *w), x(*rn, *w), shift)
            }
            LsrImm { rd, rn, shift, w } => {
                write!(f, "\tlsr {}, {}, #{}", x(*rd, *w), x(*rn, *w), shift)
            }
            LslImm { rd, rn, shift, w } => {
                write!(f, "\tlsl {}, {}, #{}", x(*rd, *w), x(*rn, *w), shift)
            }
            Mvn { rd, rm, w } => write!(f, "\tmvn {}, {}", x(*rd, *w), x(*rm, *w)),
            SxtW { rd, rn } => write!(f, "\tsxtw {}, {}", x(*rd, false), x(*rn, true)),
            CmpImm { rn, imm, w } => write!(f, "\tcmp {}, #{}", x(*rn, *w), imm),
            CmpReg { rn, rm, w } => write!(f, "\tcmp {}, {}", x(*rn, *w), x(*rm, *w)),
            CSetM { rd, cond, w } => write!(f, "\tcsetm {}, {}", x(*rd, *w), cond.text()),
            CSel { rd, rn, rm, cond, w } => write!(
                f,
                "\tcsel {}, {}, {}, {}",
                x(*rd, *w),
                x(*rn, *w),
                x(*rm, *w),
                cond.text()
            ),
            Ldr { rt, base, offset, size, sign_extend } => {
                let mnemonic = match (size, sign_extend) {
                    (MemSize::B, false) => "ldrb",
                    (MemSize::B, true) => "ldrsb",
                    (MemSize::H, false) => "ldrh",
                    (MemSize::H, true) => "ldrsh",
                    (_, _) => "ldr",
                };
                let w = !matches!(size, MemSize::X);
                write!(f, "\t{} {}, [{}, #{}]", mnemonic, x(*rt, w), x(*base, false), offset)
            }
            Str { rt, base, offset, size } => {
                let mnemonic = match size {
                    MemSize::B => "strb",
                    MemSize::H => "strh",
                    _ => "str",
                };
                let w = !matches!(size, MemSize::X);
                write!(f, "\t{} {}, [{}, #{}]", mnemonic, x(*rt, w), x(*base, false), offset)
            }
            LdrXPost { rt, base, imm } => {
                write!(f, "\tldr {}, [{}], #{}", x(*rt, false), x(*base, false), imm)
            }
            StrXPost { rt, base, imm } => {
                write!(f, "\tstr {}, [{}], #{}", x(*rt, false), x(*base, false), imm)
            }
            LdrF { rt, base, offset, size } => write!(
                f,
                "\tldr {}{}, [{}, #{}]",
                size.prefix(),
                rt.0,
                x(*base, false),
                offset
            ),
            StrF { rt, base, offset, size } => write!(
                f,
                "\tstr {}{}, [{}, #{}]",
                size.prefix(),
                rt.0,
                x(*base, false),
                offset
            ),
            LdrFPost { rt, base, imm, size } => write!(
                f,
                "\tldr {}{}, [{}], #{}",
                size.prefix(),
                rt.0,
                x(*base, false),
                imm
            ),
            StrFPost { rt, base, imm, size } => write!(
                f,
                "\tstr {}{}, [{}], #{}",
                size.prefix(),
                rt.0,
                x(*base, false),
                imm
            ),
            Adr { rd, label } => write!(f, "\tadr {}, {}", x(*rd, false), label),
            AddrOf { rd, sym } => write!(
                f,
                "\tadrp {}, {}\n\tadd {}, {}, :lo12:{}",
                x(*rd, false),
                sym,
                x(*rd, false),
                x(*rd, false),
                sym
            ),
            LdrLit { rt, size, pool } => {
                write!(f, "\tldr {}{}, .LCP{}", size.prefix(), rt.0, pool)
            }
            B { label } => write!(f, "\tb {}", label),
            BCond { cond, label } => write!(f, "\tb.{} {}", cond.text(), label),
            Cbz { rn, label, w } => write!(f, "\tcbz {}, {}", x(*rn, *w), label),
            Cbnz { rn, label, w } => write!(f, "\tcbnz {}, {}", x(*rn, *w), label),
            Bl { sym } => write!(f, "\tbl {}", sym),
            Blr { rn } => write!(f, "\tblr {}", x(*rn, false)),
            Br { rn } => write!(f, "\tbr {}", x(*rn, false)),
            Ret => write!(f, "\tret"),
            Brk => write!(f, "\tbrk #0"),
            FMovReg { rd, rn, double } => {
                write!(f, "\tfmov {}, {}", fp(*rd, *double), fp(*rn, *double))
            }
            FMovToGp { rd, vn, w } => {
                write!(f, "\tfmov {}, {}", x(*rd, *w), fp(*vn, !*w))
            }
            FMovFromGp { vd, rn, w } => {
                write!(f, "\tfmov {}, {}", fp(*vd, !*w), x(*rn, *w))
            }
            FBin { op, rd, rn, rm, double } => write!(
                f,
                "\t{} {}, {}, {}",
                op.mnemonic(),
                fp(*rd, *double),
                fp(*rn, *double),
                fp(*rm, *double)
            ),
            FMadd { rd, rn, rm, ra, double } => write!(
                f,
                "\tfmadd {}, {}, {}, {}",
                fp(*rd, *double),
                fp(*rn, *double),
                fp(*rm, *double),
                fp(*ra, *double)
            ),
            FNeg { rd, rn, double } => {
                write!(f, "\tfneg {}, {}", fp(*rd, *double), fp(*rn, *double))
            }
            FAbs { rd, rn, double } => {
                write!(f, "\tfabs {}, {}", fp(*rd, *double), fp(*rn, *double))
            }
            FSqrt { rd, rn, double } => {
                write!(f, "\tfsqrt {}, {}", fp(*rd, *double), fp(*rn, *double))
            }
            FCmp { rn, rm, double } => {
                write!(f, "\tfcmp {}, {}", fp(*rn, *double), fp(*rm, *double))
            }
            SCvtF { vd, rn, double, from64 } => {
                write!(f, "\tscvtf {}, {}", fp(*vd, *double), x(*rn, !*from64))
            }
            FCvtAs { rd, vn, double, to64 } => {
                write!(f, "\tfcvtas {}, {}", x(*rd, !*to64), fp(*vn, *double))
            }
            FCvt { vd, vn, to_double } => {
                write!(f, "\tfcvt {}, {}", fp(*vd, *to_double), fp(*vn, !*to_double))
            }
            MovI0 { vd } => write!(f, "\tmovi v{}.16b, #0", vd.0),
            Dup { vd, rn, arr } => {
                let w = !matches!(arr, Arr::D2);
                write!(f, "\tdup v{}.{}, {}", vd.0, arr.text(), x(*rn, w))
            }
            DupLane0 { vd, vn, arr } => {
                let lane = match arr {
                    Arr::B16 => "b[0]",
                    Arr::H8 => "h[0]",
                    Arr::S4 => "s[0]",
                    Arr::D2 => "d[0]",
                };
                write!(f, "\tdup v{}.{}, v{}.{}", vd.0, arr.text(), vn.0, lane)
            }
            VBin { op, vd, vn, vm, arr } => write!(
                f,
                "\t{} v{}.{}, v{}.{}, v{}.{}",
                op.mnemonic(),
                vd.0,
                arr.text(),
                vn.0,
                arr.text(),
                vm.0,
                arr.text()
            ),
            VUn { op, vd, vn, arr } => write!(
                f,
                "\t{} v{}.{}, v{}.{}",
                op.mnemonic(),
                vd.0,
                arr.text(),
                vn.0,
                arr.text()
            ),
            AcrossLanes { mnemonic, vd, vn, arr } => {
                let scalar = match arr {
                    Arr::B16 => format!("b{}", vd.0),
                    Arr::H8 => format!("h{}", vd.0),
                    _ => format!("s{}", vd.0),
                };
                write!(f, "\t{} {}, v{}.{}", mnemonic, scalar, vn.0, arr.text())
            }
            SAdalp { vd, vn } => write!(f, "\tsadalp v{}.2d, v{}.4s", vd.0, vn.0),
            PairFold { mnemonic, vd, vn, double } => {
                if *double {
                    write!(f, "\t{} d{}, v{}.2d", mnemonic, vd.0, vn.0)
                } else {
                    write!(f, "\t{} s{}, v{}.2s", mnemonic, vd.0, vn.0)
                }
            }
            UMovD0 { rd, vn } => write!(f, "\tumov {}, v{}.d[0]", x(*rd, false), vn.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_core_forms() {
        assert_eq!(
            AInst::Prologue { frame: 208 }.to_string(),
            "\tstp x29, x30, [sp, #-208]!"
        );
        assert_eq!(
            AInst::MovSp { rd: XReg(29), rn: XReg(31) }.to_string(),
            "\tmov x29, sp"
        );
        assert_eq!(
            AInst::Ldr {
                rt: XReg(9),
                base: XReg(10),
                offset: 40,
                size: MemSize::W,
                sign_extend: false
            }
            .to_string(),
            "\tldr w9, [x10, #40]"
        );
        assert_eq!(
            AInst::CSetM { rd: XReg(9), cond: Cond::Gt, w: true }.to_string(),
            "\tcsetm w9, gt"
        );
        assert_eq!(AInst::Bl { sym: "setjmp".into() }.to_string(), "\tbl setjmp");
    }

    #[test]
    fn prints_neon_forms() {
        assert_eq!(
            AInst::LdrFPost { rt: VReg(28), base: XReg(1), imm: 16, size: FSize::Q }.to_string(),
            "\tldr q28, [x1], #16"
        );
        assert_eq!(
            AInst::VBin { op: VOp::FMla, vd: VReg(28), vn: VReg(29), vm: VReg(30), arr: Arr::S4 }
                .to_string(),
            "\tfmla v28.4s, v29.4s, v30.4s"
        );
        assert_eq!(
            AInst::Dup { vd: VReg(29), rn: XReg(6), arr: Arr::S4 }.to_string(),
            "\tdup v29.4s, w6"
        );
        assert_eq!(
            AInst::AcrossLanes { mnemonic: "addv", vd: VReg(28), vn: VReg(28), arr: Arr::S4 }
                .to_string(),
            "\taddv s28, v28.4s"
        );
        assert_eq!(
            AInst::PairFold { mnemonic: "faddp", vd: VReg(0), vn: VReg(28), double: true }
                .to_string(),
            "\tfaddp d0, v28.2d"
        );
    }
}
