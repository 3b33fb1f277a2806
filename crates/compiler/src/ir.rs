//! Typed intermediate representation.
//!
//! Functions of basic blocks. Every instruction writes at most one
//! temporary, and every temporary has a fixed machine type from
//! {w, l, s, d, ptr}. Variables live in frame slots and are loaded/stored
//! explicitly; expression temporaries are single-assignment and never cross
//! a loop back edge, which is what lets the allocator run a forward linear
//! scan.
//!
//! Whole-array operations and reductions are first-class instructions
//! carrying a kind tag: the canonical loop skeleton the vectoriser matches
//! by shape. The backend expands each one into either a NEON loop with a
//! scalar tail or the plain scalar loop, from the same instruction.

use crate::semantic::SimdClass;
use fb_core::ElementType;
use std::fmt;

/// Machine type of a temporary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MTy {
    /// 32-bit integer.
    W,
    /// 64-bit integer.
    L,
    /// 32-bit float.
    S,
    /// 64-bit float.
    D,
    /// Pointer (64-bit).
    P,
}

impl MTy {
    pub fn is_float(self) -> bool {
        matches!(self, MTy::S | MTy::D)
    }

    pub fn tag(self) -> &'static str {
        match self {
            MTy::W => "w",
            MTy::L => "l",
            MTy::S => "s",
            MTy::D => "d",
            MTy::P => "ptr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalId(pub usize);

/// An operand: a temporary or an immediate constant. Constants take their
/// machine type from the instruction that consumes them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    Temp(TempId),
    I(i64),
    F(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// Signed division (`sdiv` / `fdiv` by type).
    Div,
    /// Signed remainder.
    Rem,
    And,
    Or,
    Xor,
    Shl,
    /// Arithmetic shift right.
    Ashr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Memory access width and extension rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemWidth {
    /// BYTE elements: unsigned 8-bit (ldrb/strb), register class w.
    U8,
    /// SHORT elements: signed 16-bit (ldrh+sxth/strh), register class w.
    S16,
    /// 32-bit integer, register class w.
    W32,
    /// 64-bit integer, register class l.
    X64,
    /// 32-bit float, register class s.
    F32,
    /// 64-bit float, register class d.
    F64,
    /// Pointer, register class ptr.
    Ptr,
}

impl MemWidth {
    pub fn reg_class(self) -> MTy {
        match self {
            MemWidth::U8 | MemWidth::S16 | MemWidth::W32 => MTy::W,
            MemWidth::X64 => MTy::L,
            MemWidth::F32 => MTy::S,
            MemWidth::F64 => MTy::D,
            MemWidth::Ptr => MTy::P,
        }
    }

    pub fn bytes(self) -> i32 {
        match self {
            MemWidth::U8 => 1,
            MemWidth::S16 => 2,
            MemWidth::W32 | MemWidth::F32 => 4,
            MemWidth::X64 | MemWidth::F64 | MemWidth::Ptr => 8,
        }
    }

    pub fn for_element(elem: ElementType) -> MemWidth {
        match elem {
            ElementType::Byte => MemWidth::U8,
            ElementType::Short => MemWidth::S16,
            ElementType::Int32 => MemWidth::W32,
            ElementType::Int64 => MemWidth::X64,
            ElementType::Single => MemWidth::F32,
            ElementType::Double => MemWidth::F64,
            ElementType::Str | ElementType::Udt => MemWidth::Ptr,
        }
    }
}

/// Whole-array operation kinds: the loop-skeleton tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOpKind {
    Copy,
    Fill,
    Neg,
    Abs,
    Sqrt,
    Add,
    Sub,
    Mul,
    Div,
    /// dst = a + b * c (element-wise fused multiply-add).
    Fma,
    /// dst = scalar op a (scalar on the left).
    BroadcastLeft(BroadcastOp),
    /// dst = a op scalar (scalar on the right).
    BroadcastRight(BroadcastOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A whole-array statement: `dst() = <kind over a, b, c, scalar>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayOpInst {
    pub kind: ArrayOpKind,
    pub elem: ElementType,
    /// Descriptor pointers.
    pub dst: Val,
    pub a: Option<Val>,
    pub b: Option<Val>,
    pub c: Option<Val>,
    pub scalar: Option<Val>,
    /// Set by the vectoriser.
    pub simd: bool,
    pub line: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    Max,
    Min,
    Avg,
    Dot,
}

/// Array reduction: `dst = SUM(a())` and friends.
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceInst {
    pub kind: ReduceKind,
    pub elem: ElementType,
    pub dst: TempId,
    pub dst_ty: MTy,
    pub a: Val,
    /// Second operand for DOT.
    pub b: Option<Val>,
    pub simd: bool,
    pub line: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdtVecKind {
    Copy,
    Add,
    Sub,
    Mul,
    Div,
}

/// Whole-UDT operation on a SIMD-eligible record: one 16-byte vector op
/// when enabled, field-wise scalar code otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct UdtVecInst {
    pub kind: UdtVecKind,
    pub class: SimdClass,
    /// Byte addresses of the records.
    pub dst: Val,
    pub a: Val,
    pub b: Option<Val>,
    pub simd: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    /// dst = src.
    Copy { dst: TempId, ty: MTy, src: Val },
    Bin { dst: TempId, ty: MTy, op: BinOp, a: Val, b: Val },
    /// Compare under the operand type `ty`; dst is w-typed 0/1.
    Cmp { dst: TempId, ty: MTy, op: CmpOp, a: Val, b: Val },
    /// Numeric conversion between machine types.
    Conv { dst: TempId, from: MTy, to: MTy, src: Val },
    /// Address of a stack slot.
    SlotAddr { dst: TempId, slot: SlotId },
    /// Address of a program global.
    GlobalAddr { dst: TempId, id: GlobalId },
    /// Address of a NUL-terminated string literal in rodata.
    StrAddr { dst: TempId, id: StrId },
    Load { dst: TempId, width: MemWidth, addr: Val, offset: i32 },
    Store { width: MemWidth, val: Val, addr: Val, offset: i32 },
    /// Call a runtime (or libm) symbol by name.
    Call {
        dst: Option<(TempId, MTy)>,
        func: String,
        args: Vec<(Val, MTy)>,
    },
    /// Direct `setjmp` on the buffer, never through a wrapper. Returns
    /// twice; the result is the w-typed dispatch selector.
    Setjmp { dst: TempId, buf: Val },
    /// Byte copy for whole-UDT assignment outside the SIMD classes.
    MemCopy { dst: Val, src: Val, bytes: i32 },
    ArrayOp(ArrayOpInst),
    Reduce(ReduceInst),
    UdtVec(UdtVecInst),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Jmp(BlockId),
    Br { cond: Val, then_to: BlockId, else_to: BlockId },
    /// Dense jump table over `value - base`, falling back to `default`.
    Switch {
        value: Val,
        base: i64,
        targets: Vec<BlockId>,
        default: BlockId,
    },
    Ret(Option<(Val, MTy)>),
    /// GOSUB: push the resume block's address on the runtime return stack,
    /// jump to the target. The resume block is the statement after the
    /// GOSUB, never a structured merge point.
    Gosub { target: BlockId, resume: BlockId },
    /// RETURN from GOSUB: pop and branch indirect.
    GosubRet,
    /// After a THROW call; control never falls through.
    Unreachable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub label: String,
    pub insts: Vec<Inst>,
    pub term: Term,
}

/// A named stack slot (variable, UDT record, or spill home).
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub name: String,
    pub size: i32,
    pub align: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    /// Assembly symbol name.
    pub symbol: String,
    pub size: i32,
    pub align: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    /// Assembly symbol: `main` or `fb_<name>`.
    pub name: String,
    /// Incoming parameters: the slot each ABI register is stored to.
    pub params: Vec<(SlotId, MTy)>,
    pub slots: Vec<Slot>,
    pub blocks: Vec<Block>,
    pub is_main: bool,
}

impl IrFunction {
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub funcs: Vec<IrFunction>,
    /// Rodata string literals (NUL terminator added at emission).
    pub strings: Vec<String>,
    pub globals: Vec<Global>,
}

// ----------------------------------------------------------------------
// Textual form (`fbc -i`)

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Temp(t) => write!(f, "%t{}", t.0),
            Val::I(v) => write!(f, "{}", v),
            Val::F(v) => write!(f, "{:?}", v),
        }
    }
}

impl Module {
    pub fn print(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        for (i, s) in self.strings.iter().enumerate() {
            let _ = writeln!(out, "data $str{} = \"{}\"", i, s.escape_default());
        }
        for g in &self.globals {
            let _ = writeln!(out, "data ${} = zero {}", g.symbol, g.size);
        }
        for func in &self.funcs {
            let _ = writeln!(out, "\nfunction ${}() {{", func.name);
            for (i, slot) in func.slots.iter().enumerate() {
                let _ = writeln!(out, "  # slot{} {} size={}", i, slot.name, slot.size);
            }
            for block in &func.blocks {
                let _ = writeln!(out, "@{}", block.label);
                for inst in &block.insts {
                    let _ = writeln!(out, "  {}", print_inst(inst));
                }
                let _ = writeln!(out, "  {}", print_term(&block.term, func));
            }
            let _ = writeln!(out, "}}");
        }
        out
    }
}

fn print_inst(inst: &Inst) -> String {
    match inst {
        Inst::Copy { dst, ty, src } => format!("%t{} ={} copy {}", dst.0, ty.tag(), src),
        Inst::Bin { dst, ty, op, a, b } => {
            format!("%t{} ={} {} {}, {}", dst.0, ty.tag(), format!("{:?}", op).to_lowercase(), a, b)
        }
        Inst::Cmp { dst, ty, op, a, b } => {
            format!("%t{} =w c{}{} {}, {}", dst.0, format!("{:?}", op).to_lowercase(), ty.tag(), a, b)
        }
        Inst::Conv { dst, from, to, src } => {
            format!("%t{} ={} conv.{} {}", dst.0, to.tag(), from.tag(), src)
        }
        Inst::SlotAddr { dst, slot } => format!("%t{} =ptr slot{}", dst.0, slot.0),
        Inst::GlobalAddr { dst, id } => format!("%t{} =ptr global{}", dst.0, id.0),
        Inst::StrAddr { dst, id } => format!("%t{} =ptr $str{}", dst.0, id.0),
        Inst::Load { dst, width, addr, offset } => format!(
            "%t{} ={} load{:?} {}, {}",
            dst.0,
            width.reg_class().tag(),
            width,
            addr,
            offset
        ),
        Inst::Store { width, val, addr, offset } => {
            format!("store{:?} {}, {}, {}", width, val, addr, offset)
        }
        Inst::Call { dst, func, args } => {
            let args: Vec<String> = args.iter().map(|(v, t)| format!("{} {}", t.tag(), v)).collect();
            match dst {
                Some((dst, ty)) => {
                    format!("%t{} ={} call ${}({})", dst.0, ty.tag(), func, args.join(", "))
                }
                None => format!("call ${}({})", func, args.join(", ")),
            }
        }
        Inst::Setjmp { dst, buf } => format!("%t{} =w setjmp {}", dst.0, buf),
        Inst::MemCopy { dst, src, bytes } => format!("memcopy {}, {}, {}", dst, src, bytes),
        Inst::ArrayOp(op) => {
            let simd = if op.simd { " simd" } else { "" };
            format!(
                "arrayop {:?} {:?}{} dst={} a={:?} b={:?} c={:?} scalar={:?}",
                op.kind, op.elem, simd, op.dst, op.a, op.b, op.c, op.scalar
            )
        }
        Inst::Reduce(r) => {
            let simd = if r.simd { " simd" } else { "" };
            format!(
                "%t{} ={} reduce {:?} {:?}{} a={} b={:?}",
                r.dst.0,
                r.dst_ty.tag(),
                r.kind,
                r.elem,
                simd,
                r.a,
                r.b
            )
        }
        Inst::UdtVec(u) => {
            let simd = if u.simd { " simd" } else { "" };
            format!(
                "udtvec {:?} {:?}{} dst={} a={} b={:?}",
                u.kind, u.class, simd, u.dst, u.a, u.b
            )
        }
    }
}

fn print_term(term: &Term, func: &IrFunction) -> String {
    let label = |id: &BlockId| func.blocks[id.0].label.clone();
    match term {
        Term::Jmp(to) => format!("jmp @{}", label(to)),
        Term::Br { cond, then_to, else_to } => {
            format!("br {}, @{}, @{}", cond, label(then_to), label(else_to))
        }
        Term::Switch { value, base, targets, default } => {
            let targets: Vec<String> = targets.iter().map(|t| format!("@{}", label(t))).collect();
            format!(
                "switch {}, base {}, [{}], @{}",
                value,
                base,
                targets.join(", "),
                label(default)
            )
        }
        Term::Ret(None) => "ret".to_string(),
        Term::Ret(Some((v, ty))) => format!("ret {} {}", ty.tag(), v),
        Term::Gosub { target, resume } => {
            format!("gosub @{}, resume @{}", label(target), label(resume))
        }
        Term::GosubRet => "gosubret".to_string(),
        Term::Unreachable => "unreachable".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_width_classes() {
        assert_eq!(MemWidth::U8.reg_class(), MTy::W);
        assert_eq!(MemWidth::S16.reg_class(), MTy::W);
        assert_eq!(MemWidth::X64.reg_class(), MTy::L);
        assert_eq!(MemWidth::F32.reg_class(), MTy::S);
        assert_eq!(MemWidth::for_element(ElementType::Str), MemWidth::Ptr);
        assert_eq!(MemWidth::for_element(ElementType::Single).bytes(), 4);
    }

    #[test]
    fn printer_produces_labels_and_temps() {
        let module = Module {
            funcs: vec![IrFunction {
                name: "main".to_string(),
                params: Vec::new(),
                slots: vec![Slot { name: "I".to_string(), size: 8, align: 8 }],
                blocks: vec![
                    Block {
                        label: "entry".to_string(),
                        insts: vec![
                            Inst::SlotAddr { dst: TempId(0), slot: SlotId(0) },
                            Inst::Store {
                                width: MemWidth::F64,
                                val: Val::F(1.0),
                                addr: Val::Temp(TempId(0)),
                                offset: 0,
                            },
                        ],
                        term: Term::Jmp(BlockId(1)),
                    },
                    Block {
                        label: "exit".to_string(),
                        insts: Vec::new(),
                        term: Term::Ret(Some((Val::I(0), MTy::W))),
                    },
                ],
                is_main: true,
            }],
            strings: vec!["Hello".to_string()],
            globals: Vec::new(),
        };
        let text = module.print();
        assert!(text.contains("data $str0 = \"Hello\""));
        assert!(text.contains("function $main()"));
        assert!(text.contains("@entry"));
        assert!(text.contains("jmp @exit"));
        assert!(text.contains("ret w 0"));
    }
}
