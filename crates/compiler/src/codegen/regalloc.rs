//! Liveness for the forward linear scan.
//!
//! Instructions are indexed in block layout order. Lowering guarantees a
//! temporary is defined before every use in that order and never crosses
//! a loop back edge, so an interval is just [def, last_use]. A temporary
//! whose interval spans a clobber point (a call, a setjmp, or one of the
//! expanded loop instructions) must live in a callee-saved register.

use crate::ir::{Inst, IrFunction, Term, TempId, Val};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Liveness {
    pub def_at: HashMap<TempId, usize>,
    pub last_use: HashMap<TempId, usize>,
    clobbers: Vec<usize>,
}

impl Liveness {
    pub fn analyze(func: &IrFunction) -> Liveness {
        let mut live = Liveness::default();
        let mut idx = 0usize;
        for block in &func.blocks {
            for inst in &block.insts {
                live.scan_inst(inst, idx);
                idx += 1;
            }
            live.scan_term(&block.term, idx);
            idx += 1;
        }
        live
    }

    /// True when `temp` is live across a clobber point and therefore
    /// needs a callee-saved home.
    pub fn crosses_clobber(&self, temp: TempId) -> bool {
        let (Some(&def), Some(&last)) = (self.def_at.get(&temp), self.last_use.get(&temp)) else {
            return false;
        };
        self.clobbers.iter().any(|&c| def < c && c < last)
    }

    /// True when the temporary is never read (dead definition).
    pub fn is_dead(&self, temp: TempId) -> bool {
        !self.last_use.contains_key(&temp)
    }

    fn def(&mut self, temp: TempId, idx: usize) {
        self.def_at.insert(temp, idx);
    }

    fn use_val(&mut self, val: &Val, idx: usize) {
        if let Val::Temp(t) = val {
            self.last_use.insert(*t, idx);
        }
    }

    fn scan_inst(&mut self, inst: &Inst, idx: usize) {
        match inst {
            Inst::Copy { dst, src, .. } => {
                self.use_val(src, idx);
                self.def(*dst, idx);
            }
            Inst::Bin { dst, a, b, .. } => {
                self.use_val(a, idx);
                self.use_val(b, idx);
                self.def(*dst, idx);
            }
            Inst::Cmp { dst, a, b, .. } => {
                self.use_val(a, idx);
                self.use_val(b, idx);
                self.def(*dst, idx);
            }
            Inst::Conv { dst, src, .. } => {
                self.use_val(src, idx);
                self.def(*dst, idx);
            }
            Inst::SlotAddr { dst, .. }
            | Inst::GlobalAddr { dst, .. }
            | Inst::StrAddr { dst, .. } => self.def(*dst, idx),
            Inst::Load { dst, addr, .. } => {
                self.use_val(addr, idx);
                self.def(*dst, idx);
            }
            Inst::Store { val, addr, .. } => {
                self.use_val(val, idx);
                self.use_val(addr, idx);
            }
            Inst::Call { dst, args, .. } => {
                for (arg, _) in args {
                    self.use_val(arg, idx);
                }
                self.clobbers.push(idx);
                if let Some((dst, _)) = dst {
                    self.def(*dst, idx);
                }
            }
            Inst::Setjmp { dst, buf } => {
                self.use_val(buf, idx);
                self.clobbers.push(idx);
                self.def(*dst, idx);
            }
            Inst::MemCopy { dst, src, .. } => {
                self.use_val(dst, idx);
                self.use_val(src, idx);
            }
            Inst::ArrayOp(op) => {
                self.use_val(&op.dst, idx);
                for val in [&op.a, &op.b, &op.c, &op.scalar].into_iter().flatten() {
                    self.use_val(val, idx);
                }
                self.clobbers.push(idx);
            }
            Inst::Reduce(r) => {
                self.use_val(&r.a, idx);
                if let Some(b) = &r.b {
                    self.use_val(b, idx);
                }
                self.clobbers.push(idx);
                self.def(r.dst, idx);
            }
            Inst::UdtVec(u) => {
                self.use_val(&u.dst, idx);
                self.use_val(&u.a, idx);
                if let Some(b) = &u.b {
                    self.use_val(b, idx);
                }
                self.clobbers.push(idx);
            }
        }
    }

    fn scan_term(&mut self, term: &Term, idx: usize) {
        match term {
            Term::Br { cond, .. } => self.use_val(cond, idx),
            Term::Switch { value, .. } => self.use_val(value, idx),
            Term::Ret(Some((val, _))) => self.use_val(val, idx),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;

    fn func_with(insts: Vec<Inst>, term: Term) -> IrFunction {
        IrFunction {
            name: "t".into(),
            params: Vec::new(),
            slots: Vec::new(),
            blocks: vec![Block { label: "entry".into(), insts, term }],
            is_main: false,
        }
    }

    #[test]
    fn interval_spanning_a_call_crosses() {
        // t0 defined, call, then t0 used: crosses. t1 used immediately
        // after definition: does not.
        let func = func_with(
            vec![
                Inst::Copy { dst: TempId(0), ty: MTy::L, src: Val::I(7) },
                Inst::Call { dst: None, func: "samm_push".into(), args: vec![] },
                Inst::Copy { dst: TempId(1), ty: MTy::L, src: Val::Temp(TempId(0)) },
            ],
            Term::Ret(Some((Val::Temp(TempId(1)), MTy::L))),
        );
        let live = Liveness::analyze(&func);
        assert!(live.crosses_clobber(TempId(0)));
        assert!(!live.crosses_clobber(TempId(1)));
    }

    #[test]
    fn call_operand_does_not_cross_its_own_call() {
        let func = func_with(
            vec![
                Inst::Copy { dst: TempId(0), ty: MTy::L, src: Val::I(1) },
                Inst::Call {
                    dst: None,
                    func: "basic_print_int".into(),
                    args: vec![(Val::Temp(TempId(0)), MTy::L)],
                },
            ],
            Term::Ret(None),
        );
        let live = Liveness::analyze(&func);
        assert!(!live.crosses_clobber(TempId(0)));
    }

    #[test]
    fn dead_defs_are_detected() {
        let func = func_with(
            vec![Inst::Copy { dst: TempId(0), ty: MTy::W, src: Val::I(0) }],
            Term::Ret(None),
        );
        let live = Liveness::analyze(&func);
        assert!(live.is_dead(TempId(0)));
    }
}
