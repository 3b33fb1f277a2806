//! ARM64 machine-code encoding for the JIT path.
//!
//! Two passes over the structured instructions: layout assigns a word
//! offset to every label (function entries, blocks, literal pools, rodata
//! strings), then encoding produces the final words. Everything internal
//! is pc-relative; calls to runtime/libc symbols load an absolute address
//! into x16 and `blr`; no wrapper frame is created, so the direct-call
//! contract (setjmp included) holds.

use super::asm::{AsmFunction, AsmModule};
use super::insts::*;
use crate::codegen::CodeGenError;
use std::collections::{HashMap, HashSet};

/// Words an external (absolute-address) call occupies:
/// movz+movk+movk+movk x16, then blr x16.
const EXTERN_CALL_WORDS: usize = 5;
/// Words an absolute data address occupies (globals live outside the
/// code buffer).
const ABS_ADDR_WORDS: usize = 4;

pub struct JitLayout {
    pub labels: HashMap<String, usize>,
    /// Total code+pool+string size in words.
    pub total_words: usize,
    /// Word offset of each rodata string.
    pub string_offsets: Vec<usize>,
}

fn is_local_label(sym: &str) -> bool {
    sym.starts_with(".L")
}

fn inst_words(inst: &AInst, internal: &HashSet<&str>) -> usize {
    match inst {
        AInst::Label(_) => 0,
        AInst::Prologue { frame } | AInst::Epilogue { frame } => {
            let extra = usize::from(matches!(inst, AInst::Epilogue { .. }));
            if *frame <= 504 {
                1 + extra
            } else if *frame <= 4095 {
                2 + extra
            } else {
                3 + extra
            }
        }
        AInst::AddrOf { sym, .. } => {
            if is_local_label(sym) {
                1
            } else {
                ABS_ADDR_WORDS
            }
        }
        AInst::Bl { sym } => {
            if internal.contains(sym.as_str()) {
                1
            } else {
                EXTERN_CALL_WORDS
            }
        }
        _ => 1,
    }
}

fn pool_label(func: &str, index: usize) -> String {
    format!(".Lpool_{}_{}", func, index)
}

/// Pass 1: assign every label a word offset and compute the image size.
pub fn layout(asm: &AsmModule) -> JitLayout {
    let internal: HashSet<&str> = asm.funcs.iter().map(|f| f.name.as_str()).collect();
    let mut labels = HashMap::new();
    let mut here = 0usize;
    for func in &asm.funcs {
        for inst in &func.insts {
            if let AInst::Label(name) = inst {
                labels.insert(name.clone(), here);
            }
            here += inst_words(inst, &internal);
        }
        // Pool, 8-byte aligned.
        if here % 2 == 1 {
            here += 1;
        }
        for (i, (_, size)) in func.pool.iter().enumerate() {
            labels.insert(pool_label(&func.name, i), here);
            here += if *size == FSize::S { 1 } else { 2 };
        }
    }
    let mut string_offsets = Vec::with_capacity(asm.strings.len());
    for (i, text) in asm.strings.iter().enumerate() {
        labels.insert(format!(".Lstr{}", i), here);
        string_offsets.push(here);
        here += (text.len() + 1).div_ceil(4);
    }
    JitLayout { labels, total_words: here, string_offsets }
}

pub struct Encoder<'a> {
    layout: &'a JitLayout,
    internal: HashSet<&'a str>,
    /// Absolute addresses for external symbols and globals.
    resolve: &'a dyn Fn(&str) -> Option<u64>,
    /// Base address the code buffer will run at (for absolute adr math
    /// it is not needed; everything internal is pc-relative).
    pub words: Vec<u32>,
}

impl<'a> Encoder<'a> {
    pub fn new(
        asm: &'a AsmModule,
        layout: &'a JitLayout,
        resolve: &'a dyn Fn(&str) -> Option<u64>,
    ) -> Encoder<'a> {
        Encoder {
            layout,
            internal: asm.funcs.iter().map(|f| f.name.as_str()).collect(),
            resolve,
            words: Vec::with_capacity(layout.total_words),
        }
    }

    fn here(&self) -> usize {
        self.words.len()
    }

    fn label_offset(&self, label: &str) -> Result<i64, CodeGenError> {
        self.layout
            .labels
            .get(label)
            .map(|&w| w as i64 - self.here() as i64)
            .ok_or_else(|| CodeGenError::ice(format!("unresolved label `{}`", label)))
    }

    fn push(&mut self, word: u32) {
        self.words.push(word);
    }

    /// movz/movk chain loading a 64-bit absolute into x16; fixed four
    /// words so layout stays deterministic.
    fn push_abs(&mut self, rd: u8, value: u64) {
        self.push(0xD280_0000 | (((value & 0xffff) as u32) << 5) | rd as u32);
        for chunk in 1..4u32 {
            let imm = ((value >> (chunk * 16)) & 0xffff) as u32;
            self.push(0xF280_0000 | (chunk << 21) | (imm << 5) | rd as u32);
        }
    }

    pub fn encode_module(asm: &AsmModule, layout_: &JitLayout, resolve: &dyn Fn(&str) -> Option<u64>) -> Result<Vec<u32>, CodeGenError> {
        let mut enc = Encoder::new(asm, layout_, resolve);
        for func in &asm.funcs {
            for inst in &func.insts {
                enc.encode(inst, &func.name)?;
            }
            if enc.here() % 2 == 1 {
                enc.push(0xD503_201F); // nop pad before the pool
            }
            for (bits, size) in &func.pool {
                if *size == FSize::S {
                    enc.push(*bits as u32);
                } else {
                    enc.push(*bits as u32);
                    enc.push((*bits >> 32) as u32);
                }
            }
        }
        for text in &asm.strings {
            let mut bytes: Vec<u8> = text.bytes().collect();
            bytes.push(0);
            while bytes.len() % 4 != 0 {
                bytes.push(0);
            }
            for chunk in bytes.chunks(4) {
                enc.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
        }
        if enc.words.len() != layout_.total_words {
            return Err(CodeGenError::ice(format!(
                "layout mismatch: predicted {} words, emitted {}",
                layout_.total_words,
                enc.words.len()
            )));
        }
        Ok(enc.words)
    }

    fn encode(&mut self, inst: &AInst, func: &str) -> Result<(), CodeGenError> {
        use AInst::*;
        // sf bit: set for 64-bit forms. Call sites pass `!*w`.
        let sf = |x64: bool| if x64 { 1u32 << 31 } else { 0 };
        match inst {
            Label(name) => {
                // Sanity: layout and encoding must agree.
                if self.layout.labels.get(name) != Some(&self.here()) {
                    return Err(CodeGenError::ice(format!(
                        "label `{}` drifted during encoding",
                        name
                    )));
                }
            }
            Bti => self.push(0xD503_245F),
            Prologue { frame } => {
                if *frame <= 504 {
                    let imm7 = ((-(*frame as i64) / 8) as u32) & 0x7f;
                    self.push(0xA980_0000 | (imm7 << 15) | (30 << 10) | (31 << 5) | 29);
                } else if *frame <= 4095 {
                    self.push(0xD100_0000 | ((*frame as u32) << 10) | (31 << 5) | 31);
                    self.push(0xA900_0000 | (30 << 10) | (31 << 5) | 29);
                } else {
                    self.push(
                        0xD140_0000 | (((*frame as u32) >> 12) << 10) | (31 << 5) | 31,
                    );
                    self.push(0xD100_0000 | (((*frame as u32) & 0xfff) << 10) | (31 << 5) | 31);
                    self.push(0xA900_0000 | (30 << 10) | (31 << 5) | 29);
                }
            }
            Epilogue { frame } => {
                if *frame <= 504 {
                    let imm7 = ((*frame as u32) / 8) & 0x7f;
                    self.push(0xA8C0_0000 | (imm7 << 15) | (30 << 10) | (31 << 5) | 29);
                } else if *frame <= 4095 {
                    self.push(0xA940_0000 | (30 << 10) | (31 << 5) | 29);
                    self.push(0x9100_0000 | ((*frame as u32) << 10) | (31 << 5) | 31);
                } else {
                    self.push(0xA940_0000 | (30 << 10) | (31 << 5) | 29);
                    self.push(
                        0x9140_0000 | (((*frame as u32) >> 12) << 10) | (31 << 5) | 31,
                    );
                    self.push(0x9100_0000 | (((*frame as u32) & 0xfff) << 10) | (31 << 5) | 31);
                }
                self.push(0xD65F_03C0);
            }
            StpX { r1, r2, offset } => {
                let imm7 = ((*offset / 8) as u32) & 0x7f;
                self.push(
                    0xA900_0000 | (imm7 << 15) | ((r2.0 as u32) << 10) | (29 << 5) | r1.0 as u32,
                );
            }
            LdpX { r1, r2, offset } => {
                let imm7 = ((*offset / 8) as u32) & 0x7f;
                self.push(
                    0xA940_0000 | (imm7 << 15) | ((r2.0 as u32) << 10) | (29 << 5) | r1.0 as u32,
                );
            }
            StpD { r1, r2, offset } => {
                let imm7 = ((*offset / 8) as u32) & 0x7f;
                self.push(
                    0x6D00_0000 | (imm7 << 15) | ((r2.0 as u32) << 10) | (29 << 5) | r1.0 as u32,
                );
            }
            LdpD { r1, r2, offset } => {
                let imm7 = ((*offset / 8) as u32) & 0x7f;
                self.push(
                    0x6D40_0000 | (imm7 << 15) | ((r2.0 as u32) << 10) | (29 << 5) | r1.0 as u32,
                );
            }
            MovSp { rd, rn } => {
                self.push(0x9100_0000 | ((rn.0 as u32) << 5) | rd.0 as u32);
            }
            MovZ { rd, imm, shift, w } => self.push(
                0x5280_0000
                    | sf(!*w)
                    | (((*shift as u32) / 16) << 21)
                    | ((*imm as u32) << 5)
                    | rd.0 as u32,
            ),
            MovK { rd, imm, shift, w } => self.push(
                0x7280_0000
                    | sf(!*w)
                    | (((*shift as u32) / 16) << 21)
                    | ((*imm as u32) << 5)
                    | rd.0 as u32,
            ),
            MovN { rd, imm, shift, w } => self.push(
                0x1280_0000
                    | sf(!*w)
                    | (((*shift as u32) / 16) << 21)
                    | ((*imm as u32) << 5)
                    | rd.0 as u32,
            ),
            MovReg { rd, rm, w } => self.push(
                0x2A00_03E0 | sf(!*w) | ((rm.0 as u32) << 16) | rd.0 as u32,
            ),
            AddImm { rd, rn, imm, w } => self.push(
                0x1100_0000
                    | sf(!*w)
                    | ((*imm as u32) << 10)
                    | ((rn.0 as u32) << 5)
                    | rd.0 as u32,
            ),
            SubImm { rd, rn, imm, w } => self.push(
                0x5100_0000
                    | sf(!*w)
                    | ((*imm as u32) << 10)
                    | ((rn.0 as u32) << 5)
                    | rd.0 as u32,
            ),
            IBin { op, rd, rn, rm, w } => {
                let rm = (rm.0 as u32) << 16;
                let rn = (rn.0 as u32) << 5;
                let rd = rd.0 as u32;
                let word = match op {
                    IOp::Add => 0x0B00_0000 | rm | rn | rd,
                    IOp::Sub => 0x4B00_0000 | rm | rn | rd,
                    IOp::Mul => 0x1B00_7C00 | rm | rn | rd,
                    IOp::SDiv => 0x1AC0_0C00 | rm | rn | rd,
                    IOp::And => 0x0A00_0000 | rm | rn | rd,
                    IOp::Orr => 0x2A00_0000 | rm | rn | rd,
                    IOp::Eor => 0x4A00_0000 | rm | rn | rd,
                    IOp::Lsl => 0x1AC0_2000 | rm | rn | rd,
                    IOp::Lsr => 0x1AC0_2400 | rm | rn | rd,
                    IOp::Asr => 0x1AC0_2800 | rm | rn | rd,
                };
                self.push(word | sf(!*w));
            }
            AddRegShifted { rd, rn, rm, shift, sub, w } => {
                let base = if *sub { 0x4B00_0000 } else { 0x0B00_0000u32 };
                self.push(
                    base | sf(!*w)
                        | ((rm.0 as u32) << 16)
                        | ((*shift as u32) << 10)
                        | ((rn.0 as u32) << 5)
                        | rd.0 as u32,
                );
            }
            MSub { rd, rn, rm, ra, w } => self.push(
                0x1B00_8000
                    | sf(!*w)
                    | ((rm.0 as u32) << 16)
                    | ((ra.0 as u32) << 10)
                    | ((rn.0 as u32) << 5)
                    | rd.0 as u32,
            ),
            AsrImm { rd, rn, shift, w } => {
                let word = if *w {
                    0x1300_7C00 | ((*shift as u32) << 16)
                } else {
                    0x9340_FC00 | ((*shift as u32) << 16)
                };
                self.push(word | ((rn.0 as u32) << 5) | rd.0 as u32);
            }
            LsrImm { rd, rn, shift, w } => {
                let word = if *w {
                    0x5300_7C00 | ((*shift as u32) << 16)
                } else {
                    0xD340_FC00 | ((*shift as u32) << 16)
                };
                self.push(word | ((rn.0 as u32) << 5) | rd.0 as u32);
            }
            LslImm { rd, rn, shift, w } => {
                let (immr, imms) = if *w {
                    (((32 - *shift as u32) % 32), 31 - *shift as u32)
                } else {
                    (((64 - *shift as u32) % 64), 63 - *shift as u32)
                };
                let base = if *w { 0x5300_0000 } else { 0xD340_0000u32 };
                self.push(base | (immr << 16) | (imms << 10) | ((rn.0 as u32) << 5) | rd.0 as u32);
            }
            Mvn { rd, rm, w } => self.push(
                0x2A20_03E0 | sf(!*w) | ((rm.0 as u32) << 16) | rd.0 as u32,
            ),
            SxtW { rd, rn } => {
                self.push(0x9340_7C00 | ((rn.0 as u32) << 5) | rd.0 as u32);
            }
            CmpImm { rn, imm, w } => self.push(
                0x7100_001F | sf(!*w) | ((*imm as u32) << 10) | ((rn.0 as u32) << 5),
            ),
            CmpReg { rn, rm, w } => self.push(
                0x6B00_001F | sf(!*w) | ((rm.0 as u32) << 16) | ((rn.0 as u32) << 5),
            ),
            CSetM { rd, cond, w } => {
                // csinv rd, wzr, wzr, !cond
                let inv = cond.code() ^ 1;
                self.push(0x5A9F_03E0 | sf(!*w) | (inv << 12) | rd.0 as u32);
            }
            CSel { rd, rn, rm, cond, w } => self.push(
                0x1A80_0000
                    | sf(!*w)
                    | ((rm.0 as u32) << 16)
                    | (cond.code() << 12)
                    | ((rn.0 as u32) << 5)
                    | rd.0 as u32,
            ),
            Ldr { rt, base, offset, size, sign_extend } => {
                let word = match (size, sign_extend) {
                    (MemSize::B, false) => 0x3940_0000,
                    (MemSize::B, true) => 0x39C0_0000,
                    (MemSize::H, false) => 0x7940_0000,
                    (MemSize::H, true) => 0x79C0_0000,
                    (MemSize::W, _) => 0xB940_0000,
                    (MemSize::X, _) => 0xF940_0000u32,
                };
                let scaled = (*offset / size.bytes()) as u32;
                self.push(word | (scaled << 10) | ((base.0 as u32) << 5) | rt.0 as u32);
            }
            Str { rt, base, offset, size } => {
                let word = match size {
                    MemSize::B => 0x3900_0000,
                    MemSize::H => 0x7900_0000,
                    MemSize::W => 0xB900_0000,
                    MemSize::X => 0xF900_0000u32,
                };
                let scaled = (*offset / size.bytes()) as u32;
                self.push(word | (scaled << 10) | ((base.0 as u32) << 5) | rt.0 as u32);
            }
            LdrXPost { rt, base, imm } => self.push(
                0xF840_0400 | (((*imm as u32) & 0x1ff) << 12) | ((base.0 as u32) << 5) | rt.0 as u32,
            ),
            StrXPost { rt, base, imm } => self.push(
                0xF800_0400 | (((*imm as u32) & 0x1ff) << 12) | ((base.0 as u32) << 5) | rt.0 as u32,
            ),
            LdrF { rt, base, offset, size } => {
                let word = match size {
                    FSize::S => 0xBD40_0000,
                    FSize::D => 0xFD40_0000,
                    FSize::Q => 0x3DC0_0000u32,
                };
                let scaled = (*offset / size.bytes()) as u32;
                self.push(word | (scaled << 10) | ((base.0 as u32) << 5) | rt.0 as u32);
            }
            StrF { rt, base, offset, size } => {
                let word = match size {
                    FSize::S => 0xBD00_0000,
                    FSize::D => 0xFD00_0000,
                    FSize::Q => 0x3D80_0000u32,
                };
                let scaled = (*offset / size.bytes()) as u32;
                self.push(word | (scaled << 10) | ((base.0 as u32) << 5) | rt.0 as u32);
            }
            LdrFPost { rt, base, imm, size } => {
                let word = match size {
                    FSize::S => 0xBC40_0400,
                    FSize::D => 0xFC40_0400,
                    FSize::Q => 0x3CC0_0400u32,
                };
                self.push(
                    word | (((*imm as u32) & 0x1ff) << 12) | ((base.0 as u32) << 5) | rt.0 as u32,
                );
            }
            StrFPost { rt, base, imm, size } => {
                let word = match size {
                    FSize::S => 0xBC00_0400,
                    FSize::D => 0xFC00_0400,
                    FSize::Q => 0x3C80_0400u32,
                };
                self.push(
                    word | (((*imm as u32) & 0x1ff) << 12) | ((base.0 as u32) << 5) | rt.0 as u32,
                );
            }
            Adr { rd, label } => {
                let delta_bytes = self.label_offset(label)? * 4;
                let lo = (delta_bytes & 3) as u32;
                let hi = ((delta_bytes >> 2) & 0x7ffff) as u32;
                self.push(0x1000_0000 | (lo << 29) | (hi << 5) | rd.0 as u32);
            }
            AddrOf { rd, sym } => {
                if is_local_label(sym) {
                    let delta_bytes = self.label_offset(sym)? * 4;
                    let lo = (delta_bytes & 3) as u32;
                    let hi = ((delta_bytes >> 2) & 0x7ffff) as u32;
                    self.push(0x1000_0000 | (lo << 29) | (hi << 5) | rd.0 as u32);
                } else {
                    let addr = (self.resolve)(sym).ok_or_else(|| {
                        CodeGenError::ice(format!("unresolved data symbol `{}`", sym))
                    })?;
                    self.push_abs(rd.0, addr);
                }
            }
            LdrLit { rt, size, pool } => {
                let label = pool_label(func, *pool);
                let delta = self.label_offset(&label)?;
                let imm19 = (delta as u32) & 0x7ffff;
                let word = match size {
                    FSize::S => 0x1C00_0000,
                    FSize::D => 0x5C00_0000,
                    FSize::Q => 0x9C00_0000u32,
                };
                self.push(word | (imm19 << 5) | rt.0 as u32);
            }
            B { label } => {
                let delta = self.label_offset(label)?;
                self.push(0x1400_0000 | ((delta as u32) & 0x03ff_ffff));
            }
            BCond { cond, label } => {
                let delta = self.label_offset(label)?;
                self.push(0x5400_0000 | (((delta as u32) & 0x7ffff) << 5) | cond.code());
            }
            Cbz { rn, label, w } => {
                let delta = self.label_offset(label)?;
                self.push(
                    0x3400_0000
                        | sf(!*w)
                        | (((delta as u32) & 0x7ffff) << 5)
                        | rn.0 as u32,
                );
            }
            Cbnz { rn, label, w } => {
                let delta = self.label_offset(label)?;
                self.push(
                    0x3500_0000
                        | sf(!*w)
                        | (((delta as u32) & 0x7ffff) << 5)
                        | rn.0 as u32,
                );
            }
            Bl { sym } => {
                if self.internal.contains(sym.as_str()) {
                    let delta = self.label_offset(sym)?;
                    self.push(0x9400_0000 | ((delta as u32) & 0x03ff_ffff));
                } else {
                    let addr = (self.resolve)(sym).ok_or_else(|| {
                        CodeGenError::ice(format!("unresolved call target `{}`", sym))
                    })?;
                    self.push_abs(16, addr);
                    self.push(0xD63F_0000 | (16 << 5));
                }
            }
            Blr { rn } => self.push(0xD63F_0000 | ((rn.0 as u32) << 5)),
            Br { rn } => self.push(0xD61F_0000 | ((rn.0 as u32) << 5)),
            Ret => self.push(0xD65F_03C0),
            Brk => self.push(0xD420_0000),
            FMovReg { rd, rn, double } => {
                let base = if *double { 0x1E60_4000 } else { 0x1E20_4000u32 };
                self.push(base | ((rn.0 as u32) << 5) | rd.0 as u32);
            }
            FMovToGp { rd, vn, w } => {
                let base = if *w { 0x1E26_0000 } else { 0x9E66_0000u32 };
                self.push(base | ((vn.0 as u32) << 5) | rd.0 as u32);
            }
            FMovFromGp { vd, rn, w } => {
                let base = if *w { 0x1E27_0000 } else { 0x9E67_0000u32 };
                self.push(base | ((rn.0 as u32) << 5) | vd.0 as u32);
            }
            FBin { op, rd, rn, rm, double } => {
                let base = match (op, double) {
                    (FOp::Add, false) => 0x1E20_2800,
                    (FOp::Add, true) => 0x1E60_2800,
                    (FOp::Sub, false) => 0x1E20_3800,
                    (FOp::Sub, true) => 0x1E60_3800,
                    (FOp::Mul, false) => 0x1E20_0800,
                    (FOp::Mul, true) => 0x1E60_0800,
                    (FOp::Div, false) => 0x1E20_1800,
                    (FOp::Div, true) => 0x1E60_1800,
                    (FOp::Max, false) => 0x1E20_4800,
                    (FOp::Max, true) => 0x1E60_4800,
                    (FOp::Min, false) => 0x1E20_5800,
                    (FOp::Min, true) => 0x1E60_5800u32,
                };
                self.push(base | ((rm.0 as u32) << 16) | ((rn.0 as u32) << 5) | rd.0 as u32);
            }
            FMadd { rd, rn, rm, ra, double } => {
                let base = if *double { 0x1F40_0000 } else { 0x1F00_0000u32 };
                self.push(
                    base | ((rm.0 as u32) << 16)
                        | ((ra.0 as u32) << 10)
                        | ((rn.0 as u32) << 5)
                        | rd.0 as u32,
                );
            }
            FNeg { rd, rn, double } => {
                let base = if *double { 0x1E61_4000 } else { 0x1E21_4000u32 };
                self.push(base | ((rn.0 as u32) << 5) | rd.0 as u32);
            }
            FAbs { rd, rn, double } => {
                let base = if *double { 0x1E60_C000 } else { 0x1E20_C000u32 };
                self.push(base | ((rn.0 as u32) << 5) | rd.0 as u32);
            }
            FSqrt { rd, rn, double } => {
                let base = if *double { 0x1E61_C000 } else { 0x1E21_C000u32 };
                self.push(base | ((rn.0 as u32) << 5) | rd.0 as u32);
            }
            FCmp { rn, rm, double } => {
                let base = if *double { 0x1E60_2000 } else { 0x1E20_2000u32 };
                self.push(base | ((rm.0 as u32) << 16) | ((rn.0 as u32) << 5));
            }
            SCvtF { vd, rn, double, from64 } => {
                let base = match (from64, double) {
                    (false, false) => 0x1E22_0000,
                    (false, true) => 0x1E62_0000,
                    (true, false) => 0x9E22_0000,
                    (true, true) => 0x9E62_0000u32,
                };
                self.push(base | ((rn.0 as u32) << 5) | vd.0 as u32);
            }
            FCvtAs { rd, vn, double, to64 } => {
                let base = match (to64, double) {
                    (false, false) => 0x1E24_0000,
                    (false, true) => 0x1E64_0000,
                    (true, false) => 0x9E24_0000,
                    (true, true) => 0x9E64_0000u32,
                };
                self.push(base | ((vn.0 as u32) << 5) | rd.0 as u32);
            }
            FCvt { vd, vn, to_double } => {
                let base = if *to_double { 0x1E22_C000 } else { 0x1E62_4000u32 };
                self.push(base | ((vn.0 as u32) << 5) | vd.0 as u32);
            }
            MovI0 { vd } => self.push(0x4F00_0400 | vd.0 as u32),
            Dup { vd, rn, arr } => {
                let imm5: u32 = match arr {
                    Arr::B16 => 1,
                    Arr::H8 => 2,
                    Arr::S4 => 4,
                    Arr::D2 => 8,
                };
                self.push(0x4E00_0C00 | (imm5 << 16) | ((rn.0 as u32) << 5) | vd.0 as u32);
            }
            DupLane0 { vd, vn, arr } => {
                let imm5: u32 = match arr {
                    Arr::B16 => 1,
                    Arr::H8 => 2,
                    Arr::S4 => 4,
                    Arr::D2 => 8,
                };
                self.push(0x4E00_0400 | (imm5 << 16) | ((vn.0 as u32) << 5) | vd.0 as u32);
            }
            VBin { op, vd, vn, vm, arr } => {
                let size = match arr {
                    Arr::B16 => 0u32,
                    Arr::H8 => 1,
                    Arr::S4 => 2,
                    Arr::D2 => 3,
                };
                let fp_d = *arr == Arr::D2;
                let base = match op {
                    VOp::Add => 0x4E20_8400 | (size << 22),
                    VOp::Sub => 0x6E20_8400 | (size << 22),
                    VOp::Mul => 0x4E20_9C00 | (size << 22),
                    VOp::SMax => 0x4E20_6400 | (size << 22),
                    VOp::SMin => 0x4E20_6C00 | (size << 22),
                    VOp::FAdd => {
                        if fp_d { 0x4E60_D400 } else { 0x4E20_D400 }
                    }
                    VOp::FSub => {
                        if fp_d { 0x4EE0_D400 } else { 0x4EA0_D400 }
                    }
                    VOp::FMul => {
                        if fp_d { 0x6E60_DC00 } else { 0x6E20_DC00 }
                    }
                    VOp::FDiv => {
                        if fp_d { 0x6E60_FC00 } else { 0x6E20_FC00 }
                    }
                    VOp::FMla => {
                        if fp_d { 0x4E60_CC00 } else { 0x4E20_CC00 }
                    }
                    VOp::FMax => {
                        if fp_d { 0x4E60_F400 } else { 0x4E20_F400 }
                    }
                    VOp::FMin => {
                        if fp_d { 0x4EE0_F400 } else { 0x4EA0_F400 }
                    }
                    VOp::FAddP => {
                        if fp_d { 0x6E60_D400 } else { 0x6E20_D400u32 }
                    }
                };
                self.push(base | ((vm.0 as u32) << 16) | ((vn.0 as u32) << 5) | vd.0 as u32);
            }
            VUn { op, vd, vn, arr } => {
                let size = match arr {
                    Arr::B16 => 0u32,
                    Arr::H8 => 1,
                    Arr::S4 => 2,
                    Arr::D2 => 3,
                };
                let fp_d = *arr == Arr::D2;
                let base = match op {
                    VUnOp::Abs => 0x4E20_B800 | (size << 22),
                    VUnOp::Neg => 0x6E20_B800 | (size << 22),
                    VUnOp::FAbs => {
                        if fp_d { 0x4EE0_F800 } else { 0x4EA0_F800 }
                    }
                    VUnOp::FNeg => {
                        if fp_d { 0x6EE0_F800 } else { 0x6EA0_F800 }
                    }
                    VUnOp::FSqrt => {
                        if fp_d { 0x6EE1_F800 } else { 0x6EA1_F800u32 }
                    }
                };
                self.push(base | ((vn.0 as u32) << 5) | vd.0 as u32);
            }
            AcrossLanes { mnemonic, vd, vn, arr } => {
                let size = match arr {
                    Arr::B16 => 0u32,
                    Arr::H8 => 1,
                    Arr::S4 => 2,
                    Arr::D2 => 3,
                };
                let base = match *mnemonic {
                    "addv" => 0x4E31_B800 | (size << 22),
                    "smaxv" => 0x4E30_A800 | (size << 22),
                    "sminv" => 0x4E31_A800 | (size << 22),
                    "fmaxv" => 0x6E30_F800,
                    "fminv" => 0x6EB0_F800,
                    other => {
                        return Err(CodeGenError::ice(format!(
                            "unknown across-lanes op `{}`",
                            other
                        )));
                    }
                };
                self.push(base | ((vn.0 as u32) << 5) | vd.0 as u32);
            }
            SAdalp { vd, vn } => {
                self.push(0x4EA0_6800 | ((vn.0 as u32) << 5) | vd.0 as u32);
            }
            PairFold { mnemonic, vd, vn, double } => {
                let base = match (*mnemonic, double) {
                    ("faddp", true) => 0x7E70_D800,
                    ("faddp", false) => 0x7E30_D800,
                    ("fmaxp", true) => 0x7E70_C800,
                    ("fminp", true) => 0x7EF0_C800,
                    ("addp", true) => 0x5EF1_B800u32,
                    (other, _) => {
                        return Err(CodeGenError::ice(format!(
                            "unknown pair fold `{}`",
                            other
                        )));
                    }
                };
                self.push(base | ((vn.0 as u32) << 5) | vd.0 as u32);
            }
            UMovD0 { rd, vn } => {
                self.push(0x4E08_3C00 | ((vn.0 as u32) << 5) | rd.0 as u32);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Global;

    fn encode_one(inst: AInst) -> u32 {
        let asm = AsmModule {
            funcs: vec![AsmFunction { name: "t".into(), insts: vec![inst], pool: Vec::new() }],
            strings: Vec::new(),
            globals: Vec::<Global>::new(),
        };
        let lay = layout(&asm);
        let words = Encoder::encode_module(&asm, &lay, &|_| Some(0x1000)).unwrap();
        words[0]
    }

    #[test]
    fn canonical_words() {
        assert_eq!(encode_one(AInst::Ret), 0xD65F03C0);
        assert_eq!(encode_one(AInst::Bti), 0xD503245F);
        assert_eq!(
            encode_one(AInst::Prologue { frame: 16 }),
            0xA9BF7BFD // stp x29, x30, [sp, #-16]!
        );
        assert_eq!(
            encode_one(AInst::MovSp { rd: XReg(29), rn: XReg(31) }),
            0x910003FD // mov x29, sp
        );
        assert_eq!(
            encode_one(AInst::MovZ { rd: XReg(9), imm: 42, shift: 0, w: true }),
            0x52800549
        );
    }

    #[test]
    fn loads_and_stores_scale_offsets() {
        // ldr w9, [x10, #40]: offset scales by 4.
        let word = encode_one(AInst::Ldr {
            rt: XReg(9),
            base: XReg(10),
            offset: 40,
            size: MemSize::W,
            sign_extend: false,
        });
        assert_eq!(word, 0xB9400000 | (10 << 10) | (10 << 5) | 9);
        // ldr q28, [x1], #16: post-index.
        let word = encode_one(AInst::LdrFPost {
            rt: VReg(28),
            base: XReg(1),
            imm: 16,
            size: FSize::Q,
        });
        assert_eq!(word, 0x3CC00400 | (16 << 12) | (1 << 5) | 28);
    }

    #[test]
    fn branches_are_pc_relative() {
        let asm = AsmModule {
            funcs: vec![AsmFunction {
                name: "t".into(),
                insts: vec![
                    AInst::Label(".Lt_a".into()),
                    AInst::B { label: ".Lt_a".into() },
                ],
                pool: Vec::new(),
            }],
            strings: Vec::new(),
            globals: Vec::<Global>::new(),
        };
        let lay = layout(&asm);
        let words = Encoder::encode_module(&asm, &lay, &|_| None).unwrap();
        // Branch to self: offset 0.
        assert_eq!(words[0], 0x14000000);
    }

    #[test]
    fn external_calls_are_five_words() {
        let asm = AsmModule {
            funcs: vec![AsmFunction {
                name: "t".into(),
                insts: vec![AInst::Bl { sym: "basic_print_int".into() }],
                pool: Vec::new(),
            }],
            strings: Vec::new(),
            globals: Vec::<Global>::new(),
        };
        let lay = layout(&asm);
        assert_eq!(lay.total_words, 5);
        let words = Encoder::encode_module(&asm, &lay, &|_| Some(0x0000_7f12_3456_0000)).unwrap();
        assert_eq!(words.len(), 5);
        // Final word is blr x16.
        assert_eq!(words[4], 0xD63F0000 | (16 << 5));
    }

    #[test]
    fn strings_land_after_code_nul_terminated() {
        let asm = AsmModule {
            funcs: vec![AsmFunction {
                name: "t".into(),
                insts: vec![AInst::Ret],
                pool: Vec::new(),
            }],
            strings: vec!["Hi".to_string()],
            globals: Vec::<Global>::new(),
        };
        let lay = layout(&asm);
        assert_eq!(lay.labels[".Lstr0"], 1);
        let words = Encoder::encode_module(&asm, &lay, &|_| None).unwrap();
        assert_eq!(words[1], u32::from_le_bytes([b'H', b'i', 0, 0]));
    }
}
