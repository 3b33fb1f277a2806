//! NEON vectoriser.
//!
//! An IR→IR pass that decides, for every whole-array skeleton, reduction,
//! and whole-UDT operation, whether the backend may emit the NEON form.
//! The decision is recorded on the instruction (`simd`); both the vector
//! body and the scalar fallback are expanded from the same instruction in
//! the backend, so flipping a switch changes only which loop is emitted,
//! never its semantics.
//!
//! A pattern that was flagged vectorisable but fails eligibility here
//! (integer division, 64-bit integer lanes, string or record elements)
//! falls back to scalar with a diagnostic, never an error.

use crate::config::NeonConfig;
use crate::ir::{ArrayOpKind, BroadcastOp, Inst, Module, ReduceKind};
use fb_core::ElementType;

/// Vector lanes per 128-bit q register for an element type, or `None`
/// when the element type has no NEON form we emit.
pub fn lanes_for(elem: ElementType) -> Option<i32> {
    match elem {
        ElementType::Byte => Some(16),
        ElementType::Short => Some(8),
        ElementType::Int32 | ElementType::Single => Some(4),
        ElementType::Double => Some(2),
        ElementType::Int64 | ElementType::Str | ElementType::Udt => None,
    }
}

fn is_float(elem: ElementType) -> bool {
    matches!(elem, ElementType::Single | ElementType::Double)
}

/// Whether the op kind has a NEON encoding for this element type.
fn op_eligible(kind: ArrayOpKind, elem: ElementType) -> bool {
    if lanes_for(elem).is_none() {
        return false;
    }
    match kind {
        ArrayOpKind::Copy | ArrayOpKind::Fill => true,
        ArrayOpKind::Add | ArrayOpKind::Sub | ArrayOpKind::Neg | ArrayOpKind::Abs => true,
        // Integer lane multiply exists for b/h/s arrangements.
        ArrayOpKind::Mul => true,
        // No integer vector divide; FMA and square root are float forms.
        ArrayOpKind::Div | ArrayOpKind::Fma | ArrayOpKind::Sqrt => is_float(elem),
        ArrayOpKind::BroadcastLeft(op) | ArrayOpKind::BroadcastRight(op) => match op {
            BroadcastOp::Add | BroadcastOp::Sub | BroadcastOp::Mul => true,
            BroadcastOp::Div => is_float(elem),
        },
    }
}

fn reduce_eligible(kind: ReduceKind, elem: ElementType) -> bool {
    match elem {
        // Horizontal folds are emitted for full-width lanes only.
        ElementType::Int32 | ElementType::Single | ElementType::Double => match kind {
            ReduceKind::Sum | ReduceKind::Max | ReduceKind::Min | ReduceKind::Avg => true,
            // DOT needs the lane multiply-accumulate; float only.
            ReduceKind::Dot => is_float(elem),
        },
        _ => false,
    }
}

fn kind_switch(kind: ArrayOpKind, config: &NeonConfig) -> bool {
    match kind {
        ArrayOpKind::Copy | ArrayOpKind::Fill => config.copy,
        _ => config.arithmetic,
    }
}

/// Assign a strategy to every vectorisable instruction in the module.
pub fn vectorize(module: &mut Module, config: &NeonConfig) {
    for func in &mut module.funcs {
        for block in &mut func.blocks {
            for inst in &mut block.insts {
                match inst {
                    Inst::ArrayOp(op) => {
                        let eligible = op_eligible(op.kind, op.elem);
                        op.simd = config.loops && kind_switch(op.kind, config) && eligible;
                        if !eligible {
                            tracing::debug!(
                                func = %func.name,
                                kind = ?op.kind,
                                elem = ?op.elem,
                                "whole-array op falls back to the scalar loop"
                            );
                        }
                    }
                    Inst::Reduce(r) => {
                        let eligible = reduce_eligible(r.kind, r.elem);
                        r.simd = config.loops && eligible;
                        if !eligible {
                            tracing::debug!(
                                func = %func.name,
                                kind = ?r.kind,
                                elem = ?r.elem,
                                "reduction falls back to the scalar loop"
                            );
                        }
                    }
                    Inst::UdtVec(u) => {
                        // No NEON integer divide: the I32x4 class divides
                        // field-wise.
                        let eligible = match u.kind {
                            crate::ir::UdtVecKind::Div => !matches!(
                                u.class,
                                crate::semantic::SimdClass::I32x4
                            ),
                            _ => true,
                        };
                        u.simd = eligible
                            && match u.kind {
                                crate::ir::UdtVecKind::Copy => config.copy,
                                _ => config.arithmetic,
                            };
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NeonConfig;
    use crate::lower::lower_program;
    use crate::semantic::analyze_source;

    fn vectorized(source: &str, config: &NeonConfig) -> Module {
        let analyzed = analyze_source(source).expect("analysis should pass");
        let mut module = lower_program(&analyzed).expect("lowering should pass");
        vectorize(&mut module, config);
        module
    }

    fn array_op_simd_flags(module: &Module) -> Vec<(ArrayOpKind, bool)> {
        let mut out = Vec::new();
        for func in &module.funcs {
            for block in &func.blocks {
                for inst in &block.insts {
                    if let Inst::ArrayOp(op) = inst {
                        out.push((op.kind, op.simd));
                    }
                }
            }
        }
        out
    }

    #[test]
    fn lanes_match_the_lane_table() {
        assert_eq!(lanes_for(ElementType::Byte), Some(16));
        assert_eq!(lanes_for(ElementType::Short), Some(8));
        assert_eq!(lanes_for(ElementType::Int32), Some(4));
        assert_eq!(lanes_for(ElementType::Single), Some(4));
        assert_eq!(lanes_for(ElementType::Double), Some(2));
        assert_eq!(lanes_for(ElementType::Int64), None);
    }

    #[test]
    fn float_add_vectorizes_by_default() {
        let module = vectorized(
            "DIM a(10) AS SINGLE\nDIM b(10) AS SINGLE\nDIM c(10) AS SINGLE\nc() = a() + b()",
            &NeonConfig::default(),
        );
        assert_eq!(array_op_simd_flags(&module), vec![(ArrayOpKind::Add, true)]);
    }

    #[test]
    fn integer_divide_falls_back_to_scalar() {
        let module = vectorized(
            "DIM a%(10)\nDIM b%(10)\nDIM c%(10)\nc() = a() / b()",
            &NeonConfig::default(),
        );
        // `/` over integer arrays divides element-wise; no NEON integer
        // divide exists, so the skeleton stays scalar.
        let flags = array_op_simd_flags(&module);
        assert_eq!(flags.len(), 1);
        assert!(!flags[0].1);
    }

    #[test]
    fn kill_switch_disables_without_changing_kind() {
        let source = "DIM a(10) AS DOUBLE\nDIM b(10) AS DOUBLE\nDIM c(10) AS DOUBLE\nc() = a() + b()";
        let on = vectorized(source, &NeonConfig::default());
        let off = vectorized(
            source,
            &NeonConfig { loops: false, ..NeonConfig::default() },
        );
        assert_eq!(array_op_simd_flags(&on), vec![(ArrayOpKind::Add, true)]);
        assert_eq!(array_op_simd_flags(&off), vec![(ArrayOpKind::Add, false)]);
    }

    #[test]
    fn copy_switch_gates_copy_and_fill_only() {
        let source = "DIM a(10) AS SINGLE\nDIM b(10) AS SINGLE\nDIM c(10) AS SINGLE\n\
                      c() = a()\nc() = 0.0\nc() = a() + b()";
        let config = NeonConfig { copy: false, ..NeonConfig::default() };
        let module = vectorized(source, &config);
        let flags = array_op_simd_flags(&module);
        assert_eq!(
            flags,
            vec![
                (ArrayOpKind::Copy, false),
                (ArrayOpKind::Fill, false),
                (ArrayOpKind::Add, true),
            ]
        );
    }

    #[test]
    fn fma_is_float_only() {
        let double = vectorized(
            "DIM a(8) AS DOUBLE\nDIM b(8) AS DOUBLE\nDIM c(8) AS DOUBLE\nDIM d(8) AS DOUBLE\n\
             d() = a() + b() * c()",
            &NeonConfig::default(),
        );
        assert_eq!(
            array_op_simd_flags(&double),
            vec![(ArrayOpKind::Fma, true)]
        );
    }

    #[test]
    fn reductions_follow_the_loops_switch() {
        let source = "DIM a(10) AS SINGLE\nx! = SUM(a())";
        let analyzed = analyze_source(source).unwrap();
        let mut module = lower_program(&analyzed).unwrap();
        vectorize(&mut module, &NeonConfig::default());
        let mut found = false;
        for func in &module.funcs {
            for block in &func.blocks {
                for inst in &block.insts {
                    if let Inst::Reduce(r) = inst {
                        assert!(r.simd);
                        found = true;
                    }
                }
            }
        }
        assert!(found);
    }
}
