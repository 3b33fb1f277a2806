//! Per-function emitter state: frame layout, register pools, operand
//! resolution, the literal pool, and prologue/epilogue assembly.
//!
//! Frame layout (x29 = frame base after the prologue):
//!
//! ```text
//! [x29 +   0]  saved x29, x30
//! [x29 +  16]  callee-saved area, fixed 144 bytes (x19..x28, d8..d15)
//! [x29 + 160]  variable slots, then spill homes
//! ```
//!
//! The callee-saved area is reserved whole so slot offsets are known
//! before emission; only the registers actually used are stored into it.

use super::insts::*;
use super::regalloc::Liveness;
use crate::codegen::CodeGenError;
use crate::ir::{BlockId, IrFunction, MTy, SlotId, TempId, Val};
use std::collections::{BTreeSet, HashMap};

const CSAVE_BASE: i32 = 16;
const SLOTS_BASE: i32 = 160;

/// Emitter scratch registers, two of each class so a two-operand
/// instruction can materialise both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scratch {
    A,
    B,
}

impl Scratch {
    pub fn x(self) -> XReg {
        match self {
            Scratch::A => XReg(16),
            Scratch::B => XReg(17),
        }
    }

    pub fn v(self) -> VReg {
        match self {
            Scratch::A => VReg(30),
            Scratch::B => VReg(31),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Home {
    X(u8),
    V(u8),
    Spill(i32),
}

pub struct FnEmitter<'a> {
    pub func: &'a IrFunction,
    pub live: Liveness,
    pub body: Vec<AInst>,
    /// Current IR instruction index (matches the liveness numbering).
    pub idx: usize,

    int_caller: Vec<u8>,
    int_callee: Vec<u8>,
    fp_caller: Vec<u8>,
    fp_callee: Vec<u8>,
    used_callee_x: BTreeSet<u8>,
    used_callee_v: BTreeSet<u8>,
    assign: HashMap<TempId, Home>,
    temp_class: HashMap<TempId, bool>, // true = fp

    slot_offsets: Vec<i32>,
    spill_next: i32,

    /// FP literal pool: raw bits plus width.
    pub pool: Vec<(u64, FSize)>,
    label_seq: u32,
}

impl<'a> FnEmitter<'a> {
    pub fn new(func: &'a IrFunction) -> FnEmitter<'a> {
        let live = Liveness::analyze(func);
        let mut slot_offsets = Vec::with_capacity(func.slots.len());
        let mut offset = SLOTS_BASE;
        for slot in &func.slots {
            let align = slot.align.max(1);
            offset = (offset + align - 1) & !(align - 1);
            slot_offsets.push(offset);
            offset += slot.size;
        }
        FnEmitter {
            func,
            live,
            body: Vec::new(),
            idx: 0,
            int_caller: (9u8..=15).collect(),
            int_callee: (19u8..=28).collect(),
            fp_caller: (16u8..=27).collect(),
            fp_callee: (8u8..=15).collect(),
            used_callee_x: BTreeSet::new(),
            used_callee_v: BTreeSet::new(),
            assign: HashMap::new(),
            temp_class: HashMap::new(),
            slot_offsets,
            spill_next: offset,
            pool: Vec::new(),
            label_seq: 0,
        }
    }

    pub fn emit(&mut self, inst: AInst) {
        self.body.push(inst);
    }

    pub fn block_label(&self, id: BlockId) -> String {
        format!(".L{}_{}", self.func.name, self.func.blocks[id.0].label)
    }

    pub fn local_label(&mut self, hint: &str) -> String {
        let label = format!(".L{}_{}_{}", self.func.name, hint, self.label_seq);
        self.label_seq += 1;
        label
    }

    pub fn epilogue_label(&self) -> String {
        format!(".L{}_epilogue", self.func.name)
    }

    pub fn slot_offset(&self, slot: SlotId) -> i32 {
        self.slot_offsets[slot.0]
    }

    // ------------------------------------------------------------------
    // Register assignment

    fn alloc_home(&mut self, temp: TempId, fp: bool) -> Home {
        let crossing = self.live.crosses_clobber(temp);
        let home = if fp {
            let pick = if crossing {
                self.fp_callee.pop().or_else(|| self.fp_caller.pop())
            } else {
                self.fp_caller.pop().or_else(|| self.fp_callee.pop())
            };
            match pick {
                Some(reg) => {
                    if (8..=15).contains(&reg) {
                        self.used_callee_v.insert(reg);
                    }
                    Home::V(reg)
                }
                None => self.spill_home(),
            }
        } else {
            let pick = if crossing {
                self.int_callee.pop().or_else(|| self.int_caller.pop())
            } else {
                self.int_caller.pop().or_else(|| self.int_callee.pop())
            };
            match pick {
                Some(reg) => {
                    if (19..=28).contains(&reg) {
                        self.used_callee_x.insert(reg);
                    }
                    Home::X(reg)
                }
                None => self.spill_home(),
            }
        };
        // A caller-saved home for a crossing temp would be clobbered;
        // spill instead.
        let home = match home {
            Home::X(reg) if crossing && (9..=15).contains(&reg) => {
                self.int_caller.push(reg);
                self.spill_home()
            }
            Home::V(reg) if crossing && (16..=27).contains(&reg) => {
                self.fp_caller.push(reg);
                self.spill_home()
            }
            other => other,
        };
        self.assign.insert(temp, home);
        self.temp_class.insert(temp, fp);
        home
    }

    fn spill_home(&mut self) -> Home {
        let offset = self.spill_next;
        self.spill_next += 8;
        Home::Spill(offset)
    }

    /// Free the homes of every temporary whose last use is at or before
    /// the current instruction. Called once per IR instruction, after its
    /// operands are resolved.
    pub fn free_dead(&mut self) {
        let dead: Vec<TempId> = self
            .assign
            .keys()
            .copied()
            .filter(|t| match self.live.last_use.get(t) {
                Some(&last) => last <= self.idx,
                None => true,
            })
            .collect();
        for temp in dead {
            if let Some(home) = self.assign.remove(&temp) {
                match home {
                    Home::X(reg) => {
                        if (9..=15).contains(&reg) {
                            self.int_caller.push(reg);
                        } else {
                            self.int_callee.push(reg);
                        }
                    }
                    Home::V(reg) => {
                        if (8..=15).contains(&reg) {
                            self.fp_callee.push(reg);
                        } else {
                            self.fp_caller.push(reg);
                        }
                    }
                    Home::Spill(_) => {}
                }
            }
        }
    }

    /// Register to compute an integer-class definition into. Spilled
    /// temps compute into scratch; `finish_def` stores them home.
    pub fn def_int(&mut self, temp: TempId) -> XReg {
        match self.alloc_home(temp, false) {
            Home::X(reg) => XReg(reg),
            Home::Spill(_) => Scratch::A.x(),
            Home::V(_) => unreachable!(),
        }
    }

    pub fn def_fp(&mut self, temp: TempId) -> VReg {
        match self.alloc_home(temp, true) {
            Home::V(reg) => VReg(reg),
            Home::Spill(_) => Scratch::A.v(),
            Home::X(_) => unreachable!(),
        }
    }

    /// Store a spilled definition to its home. No-op for register homes.
    pub fn finish_def(&mut self, temp: TempId) {
        if let Some(Home::Spill(offset)) = self.assign.get(&temp).copied() {
            let fp = self.temp_class[&temp];
            if fp {
                self.emit(AInst::StrF {
                    rt: Scratch::A.v(),
                    base: XReg(29),
                    offset,
                    size: FSize::D,
                });
            } else {
                self.emit(AInst::Str {
                    rt: Scratch::A.x(),
                    base: XReg(29),
                    offset,
                    size: MemSize::X,
                });
            }
        }
    }

    /// Resolve an integer-class operand into a register.
    pub fn use_int(&mut self, val: &Val, w: bool, scratch: Scratch) -> Result<XReg, CodeGenError> {
        match val {
            Val::Temp(t) => match self.assign.get(t).copied() {
                Some(Home::X(reg)) => Ok(XReg(reg)),
                Some(Home::Spill(offset)) => {
                    let reg = scratch.x();
                    self.emit(AInst::Ldr {
                        rt: reg,
                        base: XReg(29),
                        offset,
                        size: MemSize::X,
                        sign_extend: false,
                    });
                    Ok(reg)
                }
                Some(Home::V(_)) | None => Err(CodeGenError::ice(format!(
                    "temp %t{} has no integer home",
                    t.0
                ))),
            },
            Val::I(v) => {
                let reg = scratch.x();
                self.load_imm(reg, *v, w);
                Ok(reg)
            }
            Val::F(_) => Err(CodeGenError::ice("float constant in integer position")),
        }
    }

    /// Resolve a float-class operand into a register.
    pub fn use_fp(
        &mut self,
        val: &Val,
        double: bool,
        scratch: Scratch,
    ) -> Result<VReg, CodeGenError> {
        match val {
            Val::Temp(t) => match self.assign.get(t).copied() {
                Some(Home::V(reg)) => Ok(VReg(reg)),
                Some(Home::Spill(offset)) => {
                    let reg = scratch.v();
                    self.emit(AInst::LdrF {
                        rt: reg,
                        base: XReg(29),
                        offset,
                        size: if double { FSize::D } else { FSize::S },
                    });
                    Ok(reg)
                }
                Some(Home::X(_)) | None => Err(CodeGenError::ice(format!(
                    "temp %t{} has no float home",
                    t.0
                ))),
            },
            Val::F(v) => {
                let reg = scratch.v();
                self.float_const(reg, *v, double);
                Ok(reg)
            }
            Val::I(v) => {
                let reg = scratch.v();
                self.float_const(reg, *v as f64, double);
                Ok(reg)
            }
        }
    }

    /// Materialise an integer constant with the shortest movz/movn/movk
    /// sequence.
    pub fn load_imm(&mut self, rd: XReg, value: i64, w: bool) {
        let value = if w { value as u32 as u64 } else { value as u64 };
        let chunks = if w { 2usize } else { 4 };
        let halfwords: Vec<u16> = (0..chunks)
            .map(|i| ((value >> (i * 16)) & 0xffff) as u16)
            .collect();
        let ones = halfwords.iter().filter(|&&h| h == 0xffff).count();
        let zeros = halfwords.iter().filter(|&&h| h == 0).count();
        if ones > zeros {
            // movn seeds the register with all-ones; movk patches the rest.
            let mut first = true;
            for (i, &h) in halfwords.iter().enumerate() {
                if h == 0xffff {
                    continue;
                }
                if first {
                    self.emit(AInst::MovN { rd, imm: !h, shift: (i * 16) as u8, w });
                    first = false;
                } else {
                    self.emit(AInst::MovK { rd, imm: h, shift: (i * 16) as u8, w });
                }
            }
            if first {
                // All chunks were 0xffff: the value is -1.
                self.emit(AInst::MovN { rd, imm: 0, shift: 0, w });
            }
        } else {
            let mut first = true;
            for (i, &h) in halfwords.iter().enumerate() {
                if h == 0 {
                    continue;
                }
                if first {
                    self.emit(AInst::MovZ { rd, imm: h, shift: (i * 16) as u8, w });
                    first = false;
                } else {
                    self.emit(AInst::MovK { rd, imm: h, shift: (i * 16) as u8, w });
                }
            }
            if first {
                self.emit(AInst::MovZ { rd, imm: 0, shift: 0, w });
            }
        }
    }

    /// Load an FP constant from the function's literal pool.
    pub fn float_const(&mut self, rd: VReg, value: f64, double: bool) {
        let (bits, size) = if double {
            (value.to_bits(), FSize::D)
        } else {
            ((value as f32).to_bits() as u64, FSize::S)
        };
        let pool = match self.pool.iter().position(|&(b, s)| b == bits && s == size) {
            Some(i) => i,
            None => {
                self.pool.push((bits, size));
                self.pool.len() - 1
            }
        };
        self.emit(AInst::LdrLit { rt: rd, size, pool });
    }

    /// `rd = x29 + slot offset`, handling offsets beyond the add-immediate
    /// range.
    pub fn emit_slot_addr(&mut self, rd: XReg, slot: SlotId) {
        let offset = self.slot_offset(slot);
        if offset < 4096 {
            self.emit(AInst::AddImm { rd, rn: XReg(29), imm: offset as u16, w: false });
        } else {
            self.load_imm(Scratch::B.x(), offset as i64, false);
            self.emit(AInst::IBin {
                op: IOp::Add,
                rd,
                rn: XReg(29),
                rm: Scratch::B.x(),
                w: false,
            });
        }
    }

    // ------------------------------------------------------------------
    // Prologue / epilogue

    /// Assemble the complete function: prologue, saves, slot zeroing,
    /// parameter stores, the emitted body, and the epilogue.
    pub fn finalize(mut self) -> (Vec<AInst>, Vec<(u64, FSize)>) {
        let frame = (self.spill_next + 15) & !15;
        let mut out = Vec::with_capacity(self.body.len() + 32);
        out.push(AInst::Label(self.func.name.clone()));
        out.push(AInst::Bti);
        out.push(AInst::Prologue { frame });
        out.push(AInst::MovSp { rd: XReg(29), rn: XReg(31) });

        // Callee-saved stores into the reserved area, paired in sorted
        // order; the offset follows the pair index, not the register.
        let x_saves: Vec<u8> = self.used_callee_x.iter().copied().collect();
        for (i, pair) in x_saves.chunks(2).enumerate() {
            let offset = CSAVE_BASE + (i as i32) * 16;
            match pair {
                [a, b] => out.push(AInst::StpX { r1: XReg(*a), r2: XReg(*b), offset }),
                [a] => out.push(AInst::Str {
                    rt: XReg(*a),
                    base: XReg(29),
                    offset,
                    size: MemSize::X,
                }),
                _ => unreachable!(),
            }
        }
        let v_saves: Vec<u8> = self.used_callee_v.iter().copied().collect();
        for (i, pair) in v_saves.chunks(2).enumerate() {
            let offset = CSAVE_BASE + 80 + (i as i32) * 16;
            match pair {
                [a, b] => out.push(AInst::StpD { r1: VReg(*a), r2: VReg(*b), offset }),
                [a] => out.push(AInst::StrF {
                    rt: VReg(*a),
                    base: XReg(29),
                    offset,
                    size: FSize::D,
                }),
                _ => unreachable!(),
            }
        }

        // Zero the slot + spill area: deterministic locals, null string
        // descriptors, zeroed records.
        let zero_bytes = self.spill_next - SLOTS_BASE;
        if zero_bytes > 0 {
            if zero_bytes <= 128 {
                let mut offset = SLOTS_BASE;
                while offset < self.spill_next {
                    out.push(AInst::Str {
                        rt: XZR,
                        base: XReg(29),
                        offset,
                        size: MemSize::X,
                    });
                    offset += 8;
                }
            } else {
                out.push(AInst::AddImm {
                    rd: XReg(16),
                    rn: XReg(29),
                    imm: SLOTS_BASE as u16,
                    w: false,
                });
                // End pointer may exceed the immediate range.
                if self.spill_next < 4096 {
                    out.push(AInst::AddImm {
                        rd: XReg(17),
                        rn: XReg(29),
                        imm: self.spill_next as u16,
                        w: false,
                    });
                } else {
                    out.push(AInst::MovZ {
                        rd: XReg(17),
                        imm: (self.spill_next & 0xffff) as u16,
                        shift: 0,
                        w: false,
                    });
                    if self.spill_next > 0xffff {
                        out.push(AInst::MovK {
                            rd: XReg(17),
                            imm: (self.spill_next >> 16) as u16,
                            shift: 16,
                            w: false,
                        });
                    }
                    out.push(AInst::IBin {
                        op: IOp::Add,
                        rd: XReg(17),
                        rn: XReg(29),
                        rm: XReg(17),
                        w: false,
                    });
                }
                let loop_label = format!(".L{}_zero", self.func.name);
                let done_label = format!(".L{}_zero_done", self.func.name);
                out.push(AInst::Label(loop_label.clone()));
                out.push(AInst::CmpReg { rn: XReg(16), rm: XReg(17), w: false });
                out.push(AInst::BCond { cond: Cond::Hs, label: done_label.clone() });
                out.push(AInst::StrXPost { rt: XZR, base: XReg(16), imm: 8 });
                out.push(AInst::B { label: loop_label });
                out.push(AInst::Label(done_label));
            }
        }

        // Store incoming parameters to their slots.
        let mut next_x = 0u8;
        let mut next_v = 0u8;
        for (slot, mty) in &self.func.params {
            let offset = self.slot_offsets[slot.0];
            match mty {
                MTy::S => {
                    out.push(AInst::StrF {
                        rt: VReg(next_v),
                        base: XReg(29),
                        offset,
                        size: FSize::S,
                    });
                    next_v += 1;
                }
                MTy::D => {
                    out.push(AInst::StrF {
                        rt: VReg(next_v),
                        base: XReg(29),
                        offset,
                        size: FSize::D,
                    });
                    next_v += 1;
                }
                MTy::W => {
                    out.push(AInst::Str {
                        rt: XReg(next_x),
                        base: XReg(29),
                        offset,
                        size: MemSize::W,
                    });
                    next_x += 1;
                }
                _ => {
                    out.push(AInst::Str {
                        rt: XReg(next_x),
                        base: XReg(29),
                        offset,
                        size: MemSize::X,
                    });
                    next_x += 1;
                }
            }
        }

        out.append(&mut self.body);

        // Epilogue: restore and return.
        out.push(AInst::Label(self.epilogue_label()));
        for (i, pair) in x_saves.chunks(2).enumerate() {
            let offset = CSAVE_BASE + (i as i32) * 16;
            match pair {
                [a, b] => out.push(AInst::LdpX { r1: XReg(*a), r2: XReg(*b), offset }),
                [a] => out.push(AInst::Ldr {
                    rt: XReg(*a),
                    base: XReg(29),
                    offset,
                    size: MemSize::X,
                    sign_extend: false,
                }),
                _ => unreachable!(),
            }
        }
        for (i, pair) in v_saves.chunks(2).enumerate() {
            let offset = CSAVE_BASE + 80 + (i as i32) * 16;
            match pair {
                [a, b] => out.push(AInst::LdpD { r1: VReg(*a), r2: VReg(*b), offset }),
                [a] => out.push(AInst::LdrF {
                    rt: VReg(*a),
                    base: XReg(29),
                    offset,
                    size: FSize::D,
                }),
                _ => unreachable!(),
            }
        }
        out.push(AInst::Epilogue { frame });
        (out, self.pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;

    fn trivial_func() -> IrFunction {
        IrFunction {
            name: "fb_T".into(),
            params: Vec::new(),
            slots: vec![Slot { name: "X".into(), size: 8, align: 8 }],
            blocks: vec![Block {
                label: "entry".into(),
                insts: Vec::new(),
                term: Term::Ret(None),
            }],
            is_main: false,
        }
    }

    #[test]
    fn slots_start_past_the_save_area() {
        let func = trivial_func();
        let emitter = FnEmitter::new(&func);
        assert_eq!(emitter.slot_offset(SlotId(0)), 160);
    }

    #[test]
    fn load_imm_small_and_large() {
        let func = trivial_func();
        let mut emitter = FnEmitter::new(&func);
        emitter.load_imm(XReg(9), 42, false);
        assert_eq!(
            emitter.body,
            vec![AInst::MovZ { rd: XReg(9), imm: 42, shift: 0, w: false }]
        );
        emitter.body.clear();
        emitter.load_imm(XReg(9), 0x0001_0002_0003_0004, false);
        assert_eq!(emitter.body.len(), 4);
        emitter.body.clear();
        emitter.load_imm(XReg(9), -1, false);
        assert_eq!(
            emitter.body,
            vec![AInst::MovN { rd: XReg(9), imm: 0, shift: 0, w: false }]
        );
    }

    #[test]
    fn literal_pool_dedupes() {
        let func = trivial_func();
        let mut emitter = FnEmitter::new(&func);
        emitter.float_const(VReg(30), 1.5, true);
        emitter.float_const(VReg(31), 1.5, true);
        emitter.float_const(VReg(30), 2.5, true);
        assert_eq!(emitter.pool.len(), 2);
    }

    #[test]
    fn frame_is_16_aligned() {
        let func = trivial_func();
        let emitter = FnEmitter::new(&func);
        let (insts, _) = emitter.finalize();
        let frame = insts.iter().find_map(|inst| match inst {
            AInst::Prologue { frame } => Some(*frame),
            _ => None,
        });
        assert_eq!(frame, Some(176)); // 160 header+saves, 8 slot, aligned
    }
}
