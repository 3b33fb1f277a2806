//! AST → IR lowering.
//!
//! Split by concern, one file each:
//! - `stmt.rs`: statement dispatch and control-flow graph construction
//! - `expr.rs`: expression lowering and implicit conversions
//! - `arrays.rs`: descriptor addressing, bounds checks, whole-array ops
//!
//! Failures here are internal compiler errors: semantic analysis has
//! already accepted the program, so an unresolved name or missing type at
//! this point is a compiler bug and aborts loudly.

mod arrays;
mod expr;
mod stmt;

use crate::ast::{ExitKind, ProcDef};
use crate::codegen::CodeGenError;
use crate::ir::*;
use crate::semantic::{AnalyzedProgram, ProcSig, var_key};
use crate::types::Type;
use std::collections::HashMap;

/// Mangle a BASIC identifier (with its type sigil) into an assembly-safe
/// symbol fragment.
pub fn mangle(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => out.push_str("_i"),
            '&' => out.push_str("_l"),
            '!' => out.push_str("_s"),
            '#' => out.push_str("_d"),
            '$' => out.push_str("_str"),
            c if c.is_ascii_alphanumeric() || c == '_' => out.push(c),
            c => out.push_str(&format!("_x{:02X}_", c as u32)),
        }
    }
    out
}

/// Machine type a language type lives in. Descriptor and record types are
/// pointers.
pub fn mty_of(ty: &Type) -> MTy {
    match ty {
        Type::Byte | Type::Short | Type::Int32 => MTy::W,
        Type::Int64 => MTy::L,
        Type::Single => MTy::S,
        Type::Double => MTy::D,
        _ => MTy::P,
    }
}

/// Memory width a scalar language type loads and stores with.
pub fn width_of(ty: &Type) -> MemWidth {
    match ty {
        Type::Byte => MemWidth::U8,
        Type::Short => MemWidth::S16,
        Type::Int32 => MemWidth::W32,
        Type::Int64 => MemWidth::X64,
        Type::Single => MemWidth::F32,
        Type::Double => MemWidth::F64,
        _ => MemWidth::Ptr,
    }
}

/// Where a resolved name lives.
#[derive(Debug, Clone, Copy)]
pub enum Storage {
    Slot(SlotId),
    Global(GlobalId),
}

pub struct LoopCtx {
    pub kind: ExitKind,
    pub exit: BlockId,
}

/// Per-function lowering state. Mirrors the code generator state object of
/// the IR emitter: fresh temp/block counters, the open block, and the
/// name→storage maps for the scope being lowered.
pub struct FuncLowerer<'a> {
    pub analyzed: &'a AnalyzedProgram,
    pub module: &'a mut Module,
    pub globals_map: &'a HashMap<String, (GlobalId, Type)>,
    pub string_ids: &'a mut HashMap<String, StrId>,

    pub scope_id: String,
    pub sig: Option<&'a ProcSig>,
    pub blocks: Vec<Block>,
    pub cur: BlockId,
    pub terminated: bool,
    pub next_temp: u32,
    pub next_label: u32,
    pub slots: Vec<Slot>,
    pub var_slots: HashMap<String, SlotId>,
    pub var_types: HashMap<String, Type>,
    pub labels: HashMap<String, BlockId>,
    pub loop_stack: Vec<LoopCtx>,
    pub exit_block: BlockId,
    pub ret_slot: Option<SlotId>,
    pub bounds_check: bool,
    pub scratch8: Option<SlotId>,
    pub is_main: bool,
}

impl<'a> FuncLowerer<'a> {
    pub fn fresh_temp(&mut self) -> TempId {
        let id = TempId(self.next_temp);
        self.next_temp += 1;
        id
    }

    pub fn new_block(&mut self, hint: &str) -> BlockId {
        let id = BlockId(self.blocks.len());
        let label = format!("{}_{}", hint, self.next_label);
        self.next_label += 1;
        self.blocks.push(Block {
            label,
            insts: Vec::new(),
            term: Term::Unreachable,
        });
        id
    }

    pub fn emit(&mut self, inst: Inst) {
        if !self.terminated {
            self.blocks[self.cur.0].insts.push(inst);
        }
    }

    /// Terminate the open block and switch to `next`.
    pub fn finish_with(&mut self, term: Term, next: BlockId) {
        if !self.terminated {
            self.blocks[self.cur.0].term = term;
        }
        self.cur = next;
        self.terminated = false;
    }

    /// Terminate the open block; the next block is chosen later.
    pub fn seal(&mut self, term: Term) {
        if !self.terminated {
            self.blocks[self.cur.0].term = term;
            self.terminated = true;
        }
    }

    /// Switch to an already-created block (e.g. a label block).
    pub fn switch_to(&mut self, block: BlockId) {
        if !self.terminated {
            self.blocks[self.cur.0].term = Term::Jmp(block);
        }
        self.cur = block;
        self.terminated = false;
    }

    pub fn new_slot(&mut self, name: &str, size: i32, align: i32) -> SlotId {
        let id = SlotId(self.slots.len());
        self.slots.push(Slot { name: name.to_string(), size, align });
        id
    }

    /// The shared 8-byte scratch slot used to move raw bits between
    /// register classes (double → payload bits).
    pub fn scratch8(&mut self) -> SlotId {
        if let Some(slot) = self.scratch8 {
            return slot;
        }
        let slot = self.new_slot("scratch8", 8, 8);
        self.scratch8 = Some(slot);
        slot
    }

    /// Intern a string literal and take its address.
    pub fn str_addr(&mut self, text: &str) -> Val {
        let id = match self.string_ids.get(text) {
            Some(id) => *id,
            None => {
                let id = StrId(self.module.strings.len());
                self.module.strings.push(text.to_string());
                self.string_ids.insert(text.to_string(), id);
                id
            }
        };
        let dst = self.fresh_temp();
        self.emit(Inst::StrAddr { dst, id });
        Val::Temp(dst)
    }

    /// Resolve a variable key to its storage and type, creating the local
    /// slot on first touch (semantic analysis already fixed the type).
    pub fn storage_of(&mut self, key: &str) -> Result<(Storage, Type), CodeGenError> {
        if let Some(slot) = self.var_slots.get(key) {
            let ty = self.var_types[key].clone();
            return Ok((Storage::Slot(*slot), ty));
        }
        if let Some(ty) = self.var_types.get(key).cloned() {
            let (size, align) = self.layout_of(&ty)?;
            let slot = self.new_slot(key, size, align);
            self.var_slots.insert(key.to_string(), slot);
            return Ok((Storage::Slot(slot), ty));
        }
        if let Some((id, ty)) = self.globals_map.get(key) {
            return Ok((Storage::Global(*id), ty.clone()));
        }
        Err(CodeGenError::ice(format!(
            "unresolved variable `{}` in scope `{}`",
            key, self.scope_id
        )))
    }

    /// Size and alignment of a variable of type `ty`.
    pub fn layout_of(&self, ty: &Type) -> Result<(i32, i32), CodeGenError> {
        if let Type::Udt(name) = ty {
            let info = self
                .analyzed
                .udts
                .get(name)
                .ok_or_else(|| CodeGenError::ice(format!("unknown TYPE `{}`", name)))?;
            // 16-byte alignment keeps the SIMD classes q-register friendly.
            return Ok((info.size, 16));
        }
        let size = ty
            .scalar_size()
            .ok_or_else(|| CodeGenError::ice(format!("type `{}` has no storage size", ty)))?;
        Ok((size, size))
    }

    /// Address of a variable as a temp.
    pub fn address_of_storage(&mut self, storage: Storage) -> Val {
        let dst = self.fresh_temp();
        match storage {
            Storage::Slot(slot) => self.emit(Inst::SlotAddr { dst, slot }),
            Storage::Global(id) => self.emit(Inst::GlobalAddr { dst, id }),
        }
        Val::Temp(dst)
    }

    /// Load a scalar variable.
    pub fn load_var(&mut self, storage: Storage, ty: &Type) -> Val {
        let addr = self.address_of_storage(storage);
        let dst = self.fresh_temp();
        self.emit(Inst::Load { dst, width: width_of(ty), addr, offset: 0 });
        Val::Temp(dst)
    }

    /// Call a runtime symbol, optionally producing a value.
    pub fn call(&mut self, func: &str, args: Vec<(Val, MTy)>, ret: Option<MTy>) -> Option<Val> {
        match ret {
            Some(ty) => {
                let dst = self.fresh_temp();
                self.emit(Inst::Call { dst: Some((dst, ty)), func: func.to_string(), args });
                Some(Val::Temp(dst))
            }
            None => {
                self.emit(Inst::Call { dst: None, func: func.to_string(), args });
                None
            }
        }
    }

    /// Find the innermost loop of one of `kinds`.
    pub fn loop_exit(&self, kinds: &[ExitKind]) -> Option<BlockId> {
        self.loop_stack
            .iter()
            .rev()
            .find(|ctx| kinds.contains(&ctx.kind))
            .map(|ctx| ctx.exit)
    }
}

/// Lower a fully analysed program to an IR module.
pub fn lower_program(analyzed: &AnalyzedProgram) -> Result<Module, CodeGenError> {
    let mut module = Module::default();
    let mut string_ids = HashMap::new();

    // Globals become zero-initialised data symbols.
    let mut globals_map = HashMap::new();
    let mut global_keys: Vec<&String> = analyzed.globals.keys().collect();
    global_keys.sort();
    for key in global_keys {
        let ty = analyzed.globals[key].clone();
        let id = GlobalId(module.globals.len());
        module.globals.push(Global {
            symbol: format!("fb_g_{}", mangle(key)),
            size: ty.scalar_size().unwrap_or(8),
            align: 8,
        });
        globals_map.insert(key.clone(), (id, ty));
    }

    let main = lower_main(analyzed, &mut module, &globals_map, &mut string_ids)?;
    module.funcs.push(main);
    for proc in &analyzed.program.procs {
        let func = lower_proc(analyzed, &mut module, &globals_map, &mut string_ids, proc)?;
        module.funcs.push(func);
    }
    Ok(module)
}

fn new_lowerer<'a>(
    analyzed: &'a AnalyzedProgram,
    module: &'a mut Module,
    globals_map: &'a HashMap<String, (GlobalId, Type)>,
    string_ids: &'a mut HashMap<String, StrId>,
    scope_id: &str,
    sig: Option<&'a ProcSig>,
) -> FuncLowerer<'a> {
    let var_types = analyzed
        .scope_vars
        .get(scope_id)
        .cloned()
        .unwrap_or_default();
    let bounds_check = *analyzed.bounds_check.get(scope_id).unwrap_or(&true);
    let mut lowerer = FuncLowerer {
        analyzed,
        module,
        globals_map,
        string_ids,
        scope_id: scope_id.to_string(),
        sig,
        blocks: Vec::new(),
        cur: BlockId(0),
        terminated: false,
        next_temp: 0,
        next_label: 0,
        slots: Vec::new(),
        var_slots: HashMap::new(),
        var_types,
        labels: HashMap::new(),
        loop_stack: Vec::new(),
        exit_block: BlockId(0),
        ret_slot: None,
        bounds_check,
        scratch8: None,
        is_main: scope_id.is_empty(),
    };
    let entry = lowerer.new_block("entry");
    lowerer.cur = entry;
    lowerer
}

fn lower_main(
    analyzed: &AnalyzedProgram,
    module: &mut Module,
    globals_map: &HashMap<String, (GlobalId, Type)>,
    string_ids: &mut HashMap<String, StrId>,
) -> Result<IrFunction, CodeGenError> {
    let mut lw = new_lowerer(analyzed, module, globals_map, string_ids, "", None);
    lw.exit_block = lw.new_block("main_exit");

    lw.call("basic_runtime_init", Vec::new(), None);
    lw.register_data(&analyzed.program.main)?;
    lw.predeclare_labels(&analyzed.program.main);
    lw.lower_stmts(&analyzed.program.main)?;

    // Fall off the end: normal exit.
    let exit = lw.exit_block;
    lw.switch_to(exit);
    lw.release_heap_globals();
    lw.call("basic_runtime_shutdown", Vec::new(), None);
    lw.seal(Term::Ret(Some((Val::I(0), MTy::W))));

    Ok(IrFunction {
        name: "main".to_string(),
        params: Vec::new(),
        slots: lw.slots,
        blocks: lw.blocks,
        is_main: true,
    })
}

fn lower_proc(
    analyzed: &AnalyzedProgram,
    module: &mut Module,
    globals_map: &HashMap<String, (GlobalId, Type)>,
    string_ids: &mut HashMap<String, StrId>,
    proc: &ProcDef,
) -> Result<IrFunction, CodeGenError> {
    let sig = analyzed
        .procs
        .get(&proc.name)
        .ok_or_else(|| CodeGenError::ice(format!("unresolved procedure `{}`", proc.name)))?;
    let mut lw = new_lowerer(analyzed, module, globals_map, string_ids, &proc.name, Some(sig));
    lw.exit_block = lw.new_block("fn_exit");

    // Parameter slots, in ABI order.
    let mut params = Vec::new();
    for (param, ty) in proc.params.iter().zip(sig.params.iter()) {
        let key = var_key(&param.name, param.suffix);
        let (size, align) = lw.layout_of(ty)?;
        let slot = lw.new_slot(&key, size, align);
        lw.var_slots.insert(key, slot);
        params.push((slot, mty_of(ty)));
    }
    if !sig.is_sub {
        let (size, align) = lw.layout_of(&sig.ret)?;
        lw.ret_slot = Some(lw.new_slot("ret", size, align));
    }

    lw.call("samm_push", Vec::new(), None);
    lw.predeclare_labels(&proc.body);
    lw.lower_stmts(&proc.body)?;

    let exit = lw.exit_block;
    let ret = sig.ret.clone();
    let is_sub = sig.is_sub;
    lw.switch_to(exit);
    if is_sub {
        lw.call("samm_pop", Vec::new(), None);
        lw.seal(Term::Ret(None));
    } else {
        let slot = lw.ret_slot.expect("function has a return slot");
        let addr = lw.address_of_storage(Storage::Slot(slot));
        let dst = lw.fresh_temp();
        lw.emit(Inst::Load { dst, width: width_of(&ret), addr, offset: 0 });
        if ret.is_heap() {
            // The result must outlive this frame.
            lw.call("samm_retain", vec![(Val::Temp(dst), MTy::P)], None);
        }
        lw.call("samm_pop", Vec::new(), None);
        lw.seal(Term::Ret(Some((Val::Temp(dst), mty_of(&ret)))));
    }

    Ok(IrFunction {
        name: format!("fb_{}", mangle(&proc.name)),
        params,
        slots: lw.slots,
        blocks: lw.blocks,
        is_main: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::analyze_source;

    fn lower_source(source: &str) -> Module {
        let analyzed = analyze_source(source).expect("analysis should pass");
        lower_program(&analyzed).expect("lowering should pass")
    }

    #[test]
    fn mangling_suffixes() {
        assert_eq!(mangle("COUNT%"), "COUNT_i");
        assert_eq!(mangle("NAME$"), "NAME_str");
        assert_eq!(mangle("PLAIN"), "PLAIN");
    }

    #[test]
    fn hello_world_shape() {
        let module = lower_source("PRINT \"Hello, World!\" : END");
        assert_eq!(module.funcs.len(), 1);
        let main = &module.funcs[0];
        assert!(main.is_main);
        assert_eq!(module.strings[0], "Hello, World!");
        let text = module.print();
        assert!(text.contains("call $basic_runtime_init"));
        assert!(text.contains("call $string_new_ascii"));
        assert!(text.contains("call $basic_print_string"));
        assert!(text.contains("call $basic_print_newline"));
        assert!(text.contains("call $basic_runtime_shutdown"));
    }

    #[test]
    fn functions_get_samm_scopes_and_retain() {
        let source = "FUNCTION Greet$(name$)\nRETURN \"hi \" + name$\nEND FUNCTION\nPRINT Greet$(\"x\")";
        let module = lower_source(source);
        assert_eq!(module.funcs.len(), 2);
        let func = &module.funcs[1];
        assert_eq!(func.name, "fb_GREET_str");
        let text = module.print();
        assert!(text.contains("call $samm_push"));
        assert!(text.contains("call $samm_retain"));
        assert!(text.contains("call $samm_pop"));
    }

    #[test]
    fn gosub_lowering_uses_resume_blocks() {
        let module = lower_source("GOSUB Work\nPRINT 1\nEND\nWork:\nRETURN");
        let text = module.print();
        assert!(text.contains("gosub @"));
        assert!(text.contains("resume @"));
        assert!(text.contains("gosubret"));
    }

    #[test]
    fn try_lowering_calls_setjmp_directly() {
        let module = lower_source("TRY\nTHROW 42, 100\nCATCH 42\nPRINT ERR()\nEND TRY");
        let text = module.print();
        assert!(text.contains("call $exception_frame_push"));
        // The hard ABI requirement: a setjmp instruction, not a call into a
        // wrapper.
        assert!(text.contains("setjmp %t"));
        assert!(text.contains("call $exception_frame_pop"));
        assert!(text.contains("call $basic_throw"));
        assert!(text.contains("call $basic_err"));
    }

    #[test]
    fn whole_array_add_produces_array_op() {
        let source = "DIM a(10) AS SINGLE\nDIM b(10) AS SINGLE\nDIM c(10) AS SINGLE\nc() = a() + b()";
        let module = lower_source(source);
        let text = module.print();
        assert!(text.contains("arrayop Add Single"));
    }

    #[test]
    fn fma_pattern_detected() {
        let source = "DIM a(8) AS DOUBLE\nDIM b(8) AS DOUBLE\nDIM c(8) AS DOUBLE\nDIM d(8) AS DOUBLE\nd() = a() + b() * c()";
        let module = lower_source(source);
        let text = module.print();
        assert!(text.contains("arrayop Fma Double"));
    }

    #[test]
    fn bounds_checks_toggle_with_option() {
        let checked = lower_source("DIM a%(10)\na%(5) = 1");
        assert!(checked.print().contains("array_bounds_fail"));
        let unchecked = lower_source("OPTION BOUNDS_CHECK OFF\nDIM a%(10)\na%(5) = 1");
        assert!(!unchecked.print().contains("array_bounds_fail"));
    }

    #[test]
    fn element_size_comes_from_offset_40() {
        // The descriptor load for the element size must read offset 40.
        let module = lower_source("DIM a%(10)\nx% = a%(3)");
        let text = module.print();
        assert!(text.contains("loadW32 %t"));
        assert!(
            text.contains(", 40"),
            "element size must load from descriptor offset 40:\n{}",
            text
        );
    }
}
