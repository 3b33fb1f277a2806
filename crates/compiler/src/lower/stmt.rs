//! Statement lowering: control-flow graph construction.
//!
//! Block discipline: `goto_block` closes the open block with a jump,
//! `open_block` makes a block current. Statements after a terminator
//! (GOTO, THROW, END) fall into a dead block that is emitted but
//! unreachable, which keeps label statements inside dead regions valid
//! jump targets.

use super::{FuncLowerer, LoopCtx, Storage, mangle, mty_of};
use crate::ast::*;
use crate::codegen::CodeGenError;
use crate::ir::{
    BinOp as IrBin, BlockId, CmpOp, Inst, MTy, MemWidth, Term, Val,
};
use crate::semantic::var_key;
use crate::types::Type;

impl FuncLowerer<'_> {
    pub fn goto_block(&mut self, block: BlockId) {
        self.seal(Term::Jmp(block));
    }

    pub fn open_block(&mut self, block: BlockId) {
        self.cur = block;
        self.terminated = false;
    }

    /// Create the block for every label so GOTO/GOSUB can target labels
    /// defined later in the source.
    pub fn predeclare_labels(&mut self, body: &[Stmt]) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::Label(name) => {
                    if !self.labels.contains_key(name) {
                        let block = self.new_block(&format!("user_{}", mangle(name)));
                        self.labels.insert(name.clone(), block);
                    }
                }
                StmtKind::If { then_body, elseifs, else_body, .. } => {
                    self.predeclare_labels(then_body);
                    for (_, body) in elseifs {
                        self.predeclare_labels(body);
                    }
                    if let Some(body) = else_body {
                        self.predeclare_labels(body);
                    }
                }
                StmtKind::For { body, .. }
                | StmtKind::While { body, .. }
                | StmtKind::DoLoop { body, .. }
                | StmtKind::Repeat { body, .. } => self.predeclare_labels(body),
                StmtKind::Select { arms, else_body, .. } => {
                    for arm in arms {
                        self.predeclare_labels(&arm.body);
                    }
                    if let Some(body) = else_body {
                        self.predeclare_labels(body);
                    }
                }
                StmtKind::Try { body, catches, finally } => {
                    self.predeclare_labels(body);
                    for arm in catches {
                        self.predeclare_labels(&arm.body);
                    }
                    if let Some(body) = finally {
                        self.predeclare_labels(body);
                    }
                }
                _ => {}
            }
        }
    }

    /// Emit the DATA pool registration calls in the main prologue.
    pub fn register_data(&mut self, body: &[Stmt]) -> Result<(), CodeGenError> {
        for stmt in body {
            if let StmtKind::Data(items) = &stmt.kind {
                for item in items {
                    let (kind, payload) = match item {
                        DataItem::Int(v) => (1i64, Val::I(*v)),
                        DataItem::Float(v) => (2, Val::I(v.to_bits() as i64)),
                        DataItem::Str(text) => {
                            let addr = self.str_addr(text);
                            let desc = self
                                .call("string_new_ascii", vec![(addr, MTy::P)], Some(MTy::P))
                                .expect("call returns");
                            (3, desc)
                        }
                    };
                    self.call(
                        "data_register",
                        vec![(Val::I(kind), MTy::W), (payload, MTy::L)],
                        None,
                    );
                }
            }
        }
        Ok(())
    }

    /// Main epilogue: globals holding retained strings give their
    /// reference back so shutdown's frame walk is the only other owner.
    pub fn release_heap_globals(&mut self) {
        let globals: Vec<_> = self
            .globals_map
            .values()
            .filter(|(_, ty)| *ty == Type::Str)
            .map(|(id, _)| *id)
            .collect();
        for id in globals {
            let addr = self.fresh_temp();
            self.emit(Inst::GlobalAddr { dst: addr, id });
            let val = self.fresh_temp();
            self.emit(Inst::Load {
                dst: val,
                width: MemWidth::Ptr,
                addr: Val::Temp(addr),
                offset: 0,
            });
            self.call("string_release", vec![(Val::Temp(val), MTy::P)], None);
        }
    }

    pub fn lower_stmts(&mut self, body: &[Stmt]) -> Result<(), CodeGenError> {
        for stmt in body {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    pub fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CodeGenError> {
        let line = stmt.loc.line as i32;
        match &stmt.kind {
            StmtKind::Assign { target, value } => self.lower_assign(target, value),
            StmtKind::Print { channel, items, trailing_separator } => {
                self.lower_print(channel.as_ref(), items, *trailing_separator, line)
            }
            StmtKind::Input { prompt, target } => self.lower_input(prompt.as_deref(), target),
            StmtKind::If { cond, then_body, elseifs, else_body } => {
                self.lower_if(cond, then_body, elseifs, else_body.as_deref())
            }
            StmtKind::For { var, from, to, step, body } => {
                self.lower_for(var, from, to, step.as_ref(), body)
            }
            StmtKind::While { cond, body } => self.lower_while(cond, body),
            StmtKind::DoLoop { pre, post, body } => self.lower_do(pre, post, body),
            StmtKind::Repeat { body, until } => self.lower_repeat(body, until),
            StmtKind::Select { selector, arms, else_body } => {
                self.lower_select(selector, arms, else_body.as_deref())
            }
            StmtKind::Label(name) => {
                let block = self.labels[name];
                self.switch_to(block);
                Ok(())
            }
            StmtKind::Goto(label) => {
                let target = self.labels[label];
                self.goto_block(target);
                let dead = self.new_block("after_goto");
                self.open_block(dead);
                Ok(())
            }
            StmtKind::Gosub(label) => {
                let target = self.labels[label];
                let resume = self.new_block("gosub_resume");
                self.seal(Term::Gosub { target, resume });
                self.open_block(resume);
                Ok(())
            }
            StmtKind::Return(value) => self.lower_return(value.as_ref()),
            StmtKind::Dim { name, suffix, bounds, as_type } => {
                self.lower_dim(name, *suffix, bounds, as_type.as_ref(), line)
            }
            StmtKind::Redim { name, suffix, preserve, new_upper } => {
                self.lower_redim(name, *suffix, *preserve, new_upper)
            }
            StmtKind::Global { .. } => Ok(()),
            StmtKind::Call { name, args } => {
                let sig = self
                    .analyzed
                    .procs
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CodeGenError::ice(format!("unresolved SUB `{}`", name)))?;
                let mut lowered = Vec::new();
                for (arg, param_ty) in args.iter().zip(sig.params.iter()) {
                    let val = self.lower_expr_as(arg, param_ty)?;
                    lowered.push((val, mty_of(param_ty)));
                }
                let symbol = format!("fb_{}", mangle(&sig.name));
                let ret = if sig.is_sub { None } else { Some(mty_of(&sig.ret)) };
                self.call(&symbol, lowered, ret);
                Ok(())
            }
            StmtKind::Exit(kind) => {
                let target = match kind {
                    ExitKind::For => self.loop_exit(&[ExitKind::For]),
                    ExitKind::While => self.loop_exit(&[ExitKind::While]),
                    ExitKind::Do => self.loop_exit(&[ExitKind::Do]),
                    ExitKind::Function | ExitKind::Sub => Some(self.exit_block),
                };
                let target =
                    target.ok_or_else(|| CodeGenError::ice("EXIT outside its construct"))?;
                self.goto_block(target);
                let dead = self.new_block("after_exit");
                self.open_block(dead);
                Ok(())
            }
            StmtKind::End => {
                if self.is_main {
                    let exit = self.exit_block;
                    self.goto_block(exit);
                } else {
                    // END inside a procedure terminates the program.
                    self.call("basic_runtime_shutdown", Vec::new(), None);
                    self.call("exit", vec![(Val::I(0), MTy::W)], None);
                    self.seal(Term::Unreachable);
                }
                let dead = self.new_block("after_end");
                self.open_block(dead);
                Ok(())
            }
            StmtKind::Try { body, catches, finally } => {
                self.lower_try(body, catches, finally.as_deref(), line)
            }
            StmtKind::Throw { code, line: line_expr } => {
                let code = self.lower_expr_as(code, &Type::Int32)?;
                let line_val = match line_expr {
                    Some(expr) => self.lower_expr_as(expr, &Type::Int32)?,
                    None => Val::I(line as i64),
                };
                self.call(
                    "basic_throw",
                    vec![(code, MTy::W), (line_val, MTy::W)],
                    None,
                );
                self.seal(Term::Unreachable);
                let dead = self.new_block("after_throw");
                self.open_block(dead);
                Ok(())
            }
            StmtKind::Data(_) => Ok(()), // registered in the prologue
            StmtKind::Read(targets) => {
                for target in targets {
                    self.lower_read_into(target, line)?;
                }
                Ok(())
            }
            StmtKind::Restore(label) => {
                let index = match label {
                    Some(label) => *self
                        .analyzed
                        .data_labels
                        .get(label)
                        .ok_or_else(|| CodeGenError::ice("unresolved DATA label"))?
                        as i64,
                    None => 0,
                };
                self.call("data_restore", vec![(Val::I(index), MTy::L)], None);
                Ok(())
            }
            StmtKind::Open { path, mode, channel } => {
                let path = self.lower_expr_as(path, &Type::Str)?;
                let mode = match mode {
                    OpenMode::Input => 0i64,
                    OpenMode::Output => 1,
                    OpenMode::Append => 2,
                };
                let chan = self.lower_expr_as(channel, &Type::Int32)?;
                self.call(
                    "basic_open",
                    vec![
                        (path, MTy::P),
                        (Val::I(mode), MTy::W),
                        (chan, MTy::W),
                        (Val::I(line as i64), MTy::W),
                    ],
                    None,
                );
                Ok(())
            }
            StmtKind::CloseChannel(channel) => {
                let chan = self.lower_expr_as(channel, &Type::Int32)?;
                self.call(
                    "basic_close",
                    vec![(chan, MTy::W), (Val::I(line as i64), MTy::W)],
                    None,
                );
                Ok(())
            }
            StmtKind::ListAppend { list, value } => {
                let l = self.lower_expr_as(list, &Type::List)?;
                let (kind, payload) = self.lower_atom_payload(value)?;
                self.call(
                    "list_append",
                    vec![(l, MTy::P), (Val::I(kind), MTy::W), (payload, MTy::L)],
                    None,
                );
                Ok(())
            }
            StmtKind::OptionBoundsCheck(_) => Ok(()), // consumed by semantic analysis
        }
    }

    /// A list-atom (kind, payload-bits) pair for a value expression.
    fn lower_atom_payload(&mut self, value: &Expr) -> Result<(i64, Val), CodeGenError> {
        if value.ty == Type::Str {
            let v = self.lower_expr_as(value, &Type::Str)?;
            return Ok((3, v));
        }
        if value.ty.is_integer() {
            let v = self.lower_expr_as(value, &Type::Int64)?;
            return Ok((1, v));
        }
        let v = self.lower_expr_as(value, &Type::Double)?;
        Ok((2, self.f64_bits(v)))
    }

    /// Raw bit pattern of a double as an l value (via the scratch slot).
    pub fn f64_bits(&mut self, val: Val) -> Val {
        if let Val::F(v) = val {
            return Val::I(v.to_bits() as i64);
        }
        let scratch = self.scratch8();
        let addr = self.address_of_storage(Storage::Slot(scratch));
        self.emit(Inst::Store { width: MemWidth::F64, val, addr, offset: 0 });
        let dst = self.fresh_temp();
        self.emit(Inst::Load { dst, width: MemWidth::X64, addr, offset: 0 });
        Val::Temp(dst)
    }

    // ------------------------------------------------------------------
    // Assignment

    fn lower_assign(&mut self, target: &Expr, value: &Expr) -> Result<(), CodeGenError> {
        // Whole-array target.
        if let ExprKind::Call { args, .. } = &target.kind {
            if args.is_empty() && matches!(target.ty, Type::Array { .. }) {
                return self.lower_whole_array_assign(target, value);
            }
            // Hashmap entry.
            if let ExprKind::Call { name, suffix, args } = &target.kind {
                let key = var_key(name, *suffix);
                if let Ok((storage, Type::Hashmap)) = self.storage_of(&key) {
                    let map = self.load_var(storage, &Type::Hashmap);
                    let k = self.lower_expr_as(&args[0], &Type::Str)?;
                    let v = self.lower_expr_as(value, &Type::Str)?;
                    self.call(
                        "hashmap_put",
                        vec![(map, MTy::P), (k, MTy::P), (Val::I(3), MTy::W), (v, MTy::L)],
                        None,
                    );
                    return Ok(());
                }
            }
        }

        let (addr, offset, ty) = self.lower_address(target)?;
        match &ty {
            Type::Udt(udt_name) => {
                let dst = self.addr_plus(addr, offset);
                self.lower_udt_assign(dst, udt_name, value)
            }
            Type::Str => {
                let v = self.lower_expr_as(value, &Type::Str)?;
                if self.target_owns_string(target) {
                    let old = self.fresh_temp();
                    self.emit(Inst::Load { dst: old, width: MemWidth::Ptr, addr, offset });
                    self.call("string_release", vec![(Val::Temp(old), MTy::P)], None);
                    self.call("string_retain", vec![(v, MTy::P)], None);
                }
                self.emit(Inst::Store { width: MemWidth::Ptr, val: v, addr, offset });
                Ok(())
            }
            _ => {
                let v = self.lower_expr_as(value, &ty)?;
                self.emit(Inst::Store { width: super::width_of(&ty), val: v, addr, offset });
                Ok(())
            }
        }
    }

    /// Globals and array elements own a refcount on their string value;
    /// local scalars borrow from the frame.
    fn target_owns_string(&mut self, target: &Expr) -> bool {
        match &target.kind {
            ExprKind::Var { name, suffix } => {
                let key = var_key(name, *suffix);
                self.var_slots.get(&key).is_none()
                    && self.var_types.get(&key).is_none()
                    && self.globals_map.contains_key(&key)
            }
            ExprKind::Call { args, .. } => !args.is_empty(),
            _ => false,
        }
    }

    fn lower_udt_assign(
        &mut self,
        dst: Val,
        udt_name: &str,
        value: &Expr,
    ) -> Result<(), CodeGenError> {
        let info = self
            .analyzed
            .udts
            .get(udt_name)
            .ok_or_else(|| CodeGenError::ice(format!("unknown TYPE `{}`", udt_name)))?
            .clone();
        match &value.kind {
            ExprKind::Binary { op, lhs, rhs } => {
                let kind = match op {
                    BinOp::Add => crate::ir::UdtVecKind::Add,
                    BinOp::Sub => crate::ir::UdtVecKind::Sub,
                    BinOp::Mul => crate::ir::UdtVecKind::Mul,
                    BinOp::Div => crate::ir::UdtVecKind::Div,
                    _ => return Err(CodeGenError::ice("unsupported record operator")),
                };
                let class = info.simd.ok_or_else(|| {
                    CodeGenError::ice("record arithmetic on a non-SIMD TYPE")
                })?;
                let (a_addr, a_off, _) = self.lower_address(lhs)?;
                let a = self.addr_plus(a_addr, a_off);
                let (b_addr, b_off, _) = self.lower_address(rhs)?;
                let b = self.addr_plus(b_addr, b_off);
                self.emit(Inst::UdtVec(crate::ir::UdtVecInst {
                    kind,
                    class,
                    dst,
                    a,
                    b: Some(b),
                    simd: false,
                }));
                Ok(())
            }
            _ => {
                let (src_addr, src_off, _) = self.lower_address(value)?;
                let src = self.addr_plus(src_addr, src_off);
                match info.simd {
                    Some(class) => {
                        self.emit(Inst::UdtVec(crate::ir::UdtVecInst {
                            kind: crate::ir::UdtVecKind::Copy,
                            class,
                            dst,
                            a: src,
                            b: None,
                            simd: false,
                        }));
                    }
                    None => {
                        self.emit(Inst::MemCopy { dst, src, bytes: info.size });
                    }
                }
                Ok(())
            }
        }
    }

    pub fn addr_plus(&mut self, addr: Val, offset: i32) -> Val {
        if offset == 0 {
            return addr;
        }
        let dst = self.fresh_temp();
        self.emit(Inst::Bin {
            dst,
            ty: MTy::L,
            op: IrBin::Add,
            a: addr,
            b: Val::I(offset as i64),
        });
        Val::Temp(dst)
    }

    // ------------------------------------------------------------------
    // PRINT / INPUT / READ

    fn lower_print(
        &mut self,
        channel: Option<&Expr>,
        items: &[Expr],
        trailing_separator: bool,
        line: i32,
    ) -> Result<(), CodeGenError> {
        let chan = match channel {
            Some(chan) => Some(self.lower_expr_as(chan, &Type::Int32)?),
            None => None,
        };
        for item in items {
            match (&item.ty, chan) {
                (Type::Str, None) => {
                    let v = self.lower_expr_as(item, &Type::Str)?;
                    self.call("basic_print_string", vec![(v, MTy::P)], None);
                }
                (Type::Str, Some(chan)) => {
                    let v = self.lower_expr_as(item, &Type::Str)?;
                    self.call(
                        "basic_print_channel_string",
                        vec![(chan, MTy::W), (v, MTy::P), (Val::I(line as i64), MTy::W)],
                        None,
                    );
                }
                (ty, None) if ty.is_integer() => {
                    let v = self.lower_expr_as(item, &Type::Int64)?;
                    self.call("basic_print_int", vec![(v, MTy::L)], None);
                }
                (ty, Some(chan)) if ty.is_integer() => {
                    let v = self.lower_expr_as(item, &Type::Int64)?;
                    self.call(
                        "basic_print_channel_int",
                        vec![(chan, MTy::W), (v, MTy::L), (Val::I(line as i64), MTy::W)],
                        None,
                    );
                }
                (_, None) => {
                    let v = self.lower_expr_as(item, &Type::Double)?;
                    self.call("basic_print_double", vec![(v, MTy::D)], None);
                }
                (_, Some(chan)) => {
                    let v = self.lower_expr_as(item, &Type::Double)?;
                    self.call(
                        "basic_print_channel_double",
                        vec![(chan, MTy::W), (v, MTy::D), (Val::I(line as i64), MTy::W)],
                        None,
                    );
                }
            }
        }
        if !trailing_separator {
            match chan {
                Some(chan) => {
                    self.call(
                        "basic_print_channel_newline",
                        vec![(chan, MTy::W), (Val::I(line as i64), MTy::W)],
                        None,
                    );
                }
                None => {
                    self.call("basic_print_newline", Vec::new(), None);
                }
            }
        }
        Ok(())
    }

    fn lower_input(&mut self, prompt: Option<&str>, target: &Expr) -> Result<(), CodeGenError> {
        if let Some(text) = prompt {
            let addr = self.str_addr(text);
            let desc = self
                .call("string_new_ascii", vec![(addr, MTy::P)], Some(MTy::P))
                .expect("call returns");
            self.call("basic_print_string", vec![(desc, MTy::P)], None);
        }
        let input = self
            .call("basic_input_line", Vec::new(), Some(MTy::P))
            .expect("call returns");
        let (addr, offset, ty) = self.lower_address(target)?;
        if ty == Type::Str {
            if self.target_owns_string(target) {
                let old = self.fresh_temp();
                self.emit(Inst::Load { dst: old, width: MemWidth::Ptr, addr, offset });
                self.call("string_release", vec![(Val::Temp(old), MTy::P)], None);
                self.call("string_retain", vec![(input, MTy::P)], None);
            }
            self.emit(Inst::Store { width: MemWidth::Ptr, val: input, addr, offset });
            return Ok(());
        }
        let number = self
            .call("string_to_number", vec![(input, MTy::P)], Some(MTy::D))
            .expect("call returns");
        let v = self.convert(number, MTy::D, mty_of(&ty));
        self.emit(Inst::Store { width: super::width_of(&ty), val: v, addr, offset });
        Ok(())
    }

    fn lower_read_into(&mut self, target: &Expr, line: i32) -> Result<(), CodeGenError> {
        let (addr, offset, ty) = self.lower_address(target)?;
        let line_arg = (Val::I(line as i64), MTy::W);
        if ty == Type::Str {
            let v = self
                .call("data_read_string", vec![line_arg], Some(MTy::P))
                .expect("call returns");
            if self.target_owns_string(target) {
                let old = self.fresh_temp();
                self.emit(Inst::Load { dst: old, width: MemWidth::Ptr, addr, offset });
                self.call("string_release", vec![(Val::Temp(old), MTy::P)], None);
                self.call("string_retain", vec![(v, MTy::P)], None);
            }
            self.emit(Inst::Store { width: MemWidth::Ptr, val: v, addr, offset });
            return Ok(());
        }
        let v = if ty.is_integer() {
            let raw = self
                .call("data_read_int", vec![line_arg], Some(MTy::L))
                .expect("call returns");
            self.convert(raw, MTy::L, mty_of(&ty))
        } else {
            let raw = self
                .call("data_read_double", vec![line_arg], Some(MTy::D))
                .expect("call returns");
            self.convert(raw, MTy::D, mty_of(&ty))
        };
        self.emit(Inst::Store { width: super::width_of(&ty), val: v, addr, offset });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Control flow

    fn lower_if(
        &mut self,
        cond: &Expr,
        then_body: &[Stmt],
        elseifs: &[(Expr, Vec<Stmt>)],
        else_body: Option<&[Stmt]>,
    ) -> Result<(), CodeGenError> {
        let merge = self.new_block("if_end");
        let mut branches: Vec<(&Expr, &[Stmt])> = vec![(cond, then_body)];
        for (elseif_cond, body) in elseifs {
            branches.push((elseif_cond, body.as_slice()));
        }
        for (branch_cond, body) in branches {
            let then_block = self.new_block("if_then");
            let next_block = self.new_block("if_next");
            let c = self.lower_condition(branch_cond)?;
            self.seal(Term::Br { cond: c, then_to: then_block, else_to: next_block });
            self.open_block(then_block);
            self.lower_stmts(body)?;
            self.goto_block(merge);
            self.open_block(next_block);
        }
        if let Some(body) = else_body {
            self.lower_stmts(body)?;
        }
        self.goto_block(merge);
        self.open_block(merge);
        Ok(())
    }

    fn lower_while(&mut self, cond: &Expr, body: &[Stmt]) -> Result<(), CodeGenError> {
        let header = self.new_block("while_head");
        let body_block = self.new_block("while_body");
        let exit = self.new_block("while_end");
        self.goto_block(header);
        self.open_block(header);
        let c = self.lower_condition(cond)?;
        self.seal(Term::Br { cond: c, then_to: body_block, else_to: exit });
        self.open_block(body_block);
        self.loop_stack.push(LoopCtx { kind: ExitKind::While, exit });
        self.lower_stmts(body)?;
        self.loop_stack.pop();
        self.goto_block(header);
        self.open_block(exit);
        Ok(())
    }

    fn lower_do(
        &mut self,
        pre: &Option<(bool, Expr)>,
        post: &Option<(bool, Expr)>,
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let top = self.new_block("do_top");
        let body_block = self.new_block("do_body");
        let exit = self.new_block("do_end");
        self.goto_block(top);
        self.open_block(top);
        match pre {
            Some((until, cond)) => {
                let c = self.lower_condition(cond)?;
                let (then_to, else_to) = if *until { (exit, body_block) } else { (body_block, exit) };
                self.seal(Term::Br { cond: c, then_to, else_to });
            }
            None => self.goto_block(body_block),
        }
        self.open_block(body_block);
        self.loop_stack.push(LoopCtx { kind: ExitKind::Do, exit });
        self.lower_stmts(body)?;
        self.loop_stack.pop();
        match post {
            Some((until, cond)) => {
                let c = self.lower_condition(cond)?;
                let (then_to, else_to) = if *until { (exit, top) } else { (top, exit) };
                self.seal(Term::Br { cond: c, then_to, else_to });
            }
            None => self.goto_block(top),
        }
        self.open_block(exit);
        Ok(())
    }

    fn lower_repeat(&mut self, body: &[Stmt], until: &Expr) -> Result<(), CodeGenError> {
        let top = self.new_block("repeat_top");
        let exit = self.new_block("repeat_end");
        self.goto_block(top);
        self.open_block(top);
        self.loop_stack.push(LoopCtx { kind: ExitKind::Do, exit });
        self.lower_stmts(body)?;
        self.loop_stack.pop();
        let c = self.lower_condition(until)?;
        self.seal(Term::Br { cond: c, then_to: exit, else_to: top });
        self.open_block(exit);
        Ok(())
    }

    fn lower_for(
        &mut self,
        var: &Expr,
        from: &Expr,
        to: &Expr,
        step: Option<&Expr>,
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let (var_addr, var_off, var_ty) = self.lower_address(var)?;
        let mty = mty_of(&var_ty);
        let width = super::width_of(&var_ty);

        // Counter, limit, and step are fixed at entry (limit and step live
        // in hidden slots because they cross the back edge).
        let init = self.lower_expr_as(from, &var_ty)?;
        self.emit(Inst::Store { width, val: init, addr: var_addr, offset: var_off });
        let limit_slot = self.new_slot("for_limit", 8, 8);
        let limit = self.lower_expr_as(to, &var_ty)?;
        let limit_addr = self.address_of_storage(Storage::Slot(limit_slot));
        self.emit(Inst::Store { width, val: limit, addr: limit_addr, offset: 0 });

        let const_step = match step {
            None => Some(1i64),
            Some(expr) => match expr.kind {
                ExprKind::Int(v) => Some(v),
                _ => None,
            },
        };
        let step_slot = self.new_slot("for_step", 8, 8);
        let step_val = match step {
            Some(expr) => self.lower_expr_as(expr, &var_ty)?,
            None => {
                if mty.is_float() {
                    Val::F(1.0)
                } else {
                    Val::I(1)
                }
            }
        };
        let step_addr = self.address_of_storage(Storage::Slot(step_slot));
        self.emit(Inst::Store { width, val: step_val, addr: step_addr, offset: 0 });

        let header = self.new_block("for_head");
        let body_block = self.new_block("for_body");
        let footer = self.new_block("for_step");
        let exit = self.new_block("for_end");
        self.goto_block(header);

        // Header: compare against the limit, direction by sign of step.
        self.open_block(header);
        let (var_addr_h, var_off_h, _) = self.lower_address(var)?;
        let counter = self.fresh_temp();
        self.emit(Inst::Load { dst: counter, width, addr: var_addr_h, offset: var_off_h });
        let limit_addr_h = self.address_of_storage(Storage::Slot(limit_slot));
        let limit_h = self.fresh_temp();
        self.emit(Inst::Load { dst: limit_h, width, addr: limit_addr_h, offset: 0 });
        let cond = match const_step {
            Some(step) if step >= 0 => {
                let c = self.fresh_temp();
                self.emit(Inst::Cmp {
                    dst: c,
                    ty: mty,
                    op: CmpOp::Le,
                    a: Val::Temp(counter),
                    b: Val::Temp(limit_h),
                });
                Val::Temp(c)
            }
            Some(_) => {
                let c = self.fresh_temp();
                self.emit(Inst::Cmp {
                    dst: c,
                    ty: mty,
                    op: CmpOp::Ge,
                    a: Val::Temp(counter),
                    b: Val::Temp(limit_h),
                });
                Val::Temp(c)
            }
            None => {
                // Runtime step sign: (step >= 0 AND i <= limit) OR
                // (step < 0 AND i >= limit), on -1/0 truth values.
                let step_addr_h = self.address_of_storage(Storage::Slot(step_slot));
                let step_h = self.fresh_temp();
                self.emit(Inst::Load { dst: step_h, width, addr: step_addr_h, offset: 0 });
                let zero = if mty.is_float() { Val::F(0.0) } else { Val::I(0) };
                let step_ge = self.fresh_temp();
                self.emit(Inst::Cmp {
                    dst: step_ge,
                    ty: mty,
                    op: CmpOp::Ge,
                    a: Val::Temp(step_h),
                    b: zero,
                });
                let up = self.fresh_temp();
                self.emit(Inst::Cmp {
                    dst: up,
                    ty: mty,
                    op: CmpOp::Le,
                    a: Val::Temp(counter),
                    b: Val::Temp(limit_h),
                });
                let down = self.fresh_temp();
                self.emit(Inst::Cmp {
                    dst: down,
                    ty: mty,
                    op: CmpOp::Ge,
                    a: Val::Temp(counter),
                    b: Val::Temp(limit_h),
                });
                let step_lt = self.fresh_temp();
                self.emit(Inst::Bin {
                    dst: step_lt,
                    ty: MTy::W,
                    op: IrBin::Xor,
                    a: Val::Temp(step_ge),
                    b: Val::I(-1),
                });
                let up_ok = self.fresh_temp();
                self.emit(Inst::Bin {
                    dst: up_ok,
                    ty: MTy::W,
                    op: IrBin::And,
                    a: Val::Temp(step_ge),
                    b: Val::Temp(up),
                });
                let down_ok = self.fresh_temp();
                self.emit(Inst::Bin {
                    dst: down_ok,
                    ty: MTy::W,
                    op: IrBin::And,
                    a: Val::Temp(step_lt),
                    b: Val::Temp(down),
                });
                let either = self.fresh_temp();
                self.emit(Inst::Bin {
                    dst: either,
                    ty: MTy::W,
                    op: IrBin::Or,
                    a: Val::Temp(up_ok),
                    b: Val::Temp(down_ok),
                });
                Val::Temp(either)
            }
        };
        self.seal(Term::Br { cond, then_to: body_block, else_to: exit });

        self.open_block(body_block);
        self.loop_stack.push(LoopCtx { kind: ExitKind::For, exit });
        self.lower_stmts(body)?;
        self.loop_stack.pop();
        self.goto_block(footer);

        // Footer: counter += step.
        self.open_block(footer);
        let (var_addr_f, var_off_f, _) = self.lower_address(var)?;
        let counter_f = self.fresh_temp();
        self.emit(Inst::Load { dst: counter_f, width, addr: var_addr_f, offset: var_off_f });
        let step_addr_f = self.address_of_storage(Storage::Slot(step_slot));
        let step_f = self.fresh_temp();
        self.emit(Inst::Load { dst: step_f, width, addr: step_addr_f, offset: 0 });
        let next = self.fresh_temp();
        self.emit(Inst::Bin {
            dst: next,
            ty: mty,
            op: IrBin::Add,
            a: Val::Temp(counter_f),
            b: Val::Temp(step_f),
        });
        self.emit(Inst::Store {
            width,
            val: Val::Temp(next),
            addr: var_addr_f,
            offset: var_off_f,
        });
        self.goto_block(header);
        self.open_block(exit);
        Ok(())
    }

    fn lower_select(
        &mut self,
        selector: &Expr,
        arms: &[CaseArm],
        else_body: Option<&[Stmt]>,
    ) -> Result<(), CodeGenError> {
        let merge = self.new_block("select_end");
        let is_string = selector.ty == Type::Str;
        let sel_ty = selector.ty.clone();
        let (sel, sel_mty) = self.lower_expr(selector)?;

        // Dense integer singletons become a jump table.
        if let Some((base, arm_for_value)) = dense_int_arms(arms, &sel_ty) {
            let arm_blocks: Vec<BlockId> =
                (0..arms.len()).map(|_| self.new_block("case_arm")).collect();
            let default = self.new_block("case_else");
            let targets: Vec<BlockId> = arm_for_value
                .iter()
                .copied()
                .map(|slot| slot.map(|i| arm_blocks[i]).unwrap_or(default))
                .collect();
            let sel_l = self.convert(sel, sel_mty, MTy::L);
            self.seal(Term::Switch { value: sel_l, base, targets, default });
            for (arm, block) in arms.iter().zip(&arm_blocks) {
                self.open_block(*block);
                self.lower_stmts(&arm.body)?;
                self.goto_block(merge);
            }
            self.open_block(default);
            if let Some(body) = else_body {
                self.lower_stmts(body)?;
            }
            self.goto_block(merge);
            self.open_block(merge);
            return Ok(());
        }

        // General compare-and-branch chain. CASE ELSE runs only when no
        // prior arm matched; there is no fallthrough between arms.
        for arm in arms {
            let arm_block = self.new_block("case_arm");
            let next_arm = self.new_block("case_next");
            for (i, test) in arm.tests.iter().enumerate() {
                let matched = self.lower_case_test(test, sel, sel_mty, is_string, &sel_ty)?;
                let after_test = if i + 1 < arm.tests.len() {
                    self.new_block("case_test")
                } else {
                    next_arm
                };
                self.seal(Term::Br { cond: matched, then_to: arm_block, else_to: after_test });
                if after_test != next_arm {
                    self.open_block(after_test);
                }
            }
            self.open_block(arm_block);
            self.lower_stmts(&arm.body)?;
            self.goto_block(merge);
            self.open_block(next_arm);
        }
        if let Some(body) = else_body {
            self.lower_stmts(body)?;
        }
        self.goto_block(merge);
        self.open_block(merge);
        Ok(())
    }

    fn lower_case_test(
        &mut self,
        test: &CaseTest,
        sel: Val,
        sel_mty: MTy,
        is_string: bool,
        sel_ty: &Type,
    ) -> Result<Val, CodeGenError> {
        match test {
            CaseTest::Value(value) => self.case_compare(CmpOp::Eq, sel, sel_mty, is_string, sel_ty, value),
            CaseTest::Relation(op, value) => {
                let op = match op {
                    BinOp::Eq => CmpOp::Eq,
                    BinOp::Ne => CmpOp::Ne,
                    BinOp::Lt => CmpOp::Lt,
                    BinOp::Le => CmpOp::Le,
                    BinOp::Gt => CmpOp::Gt,
                    BinOp::Ge => CmpOp::Ge,
                    _ => return Err(CodeGenError::ice("CASE IS with a non-relational operator")),
                };
                self.case_compare(op, sel, sel_mty, is_string, sel_ty, value)
            }
            CaseTest::Range(lo, hi) => {
                let lo_ok = self.case_compare(CmpOp::Ge, sel, sel_mty, is_string, sel_ty, lo)?;
                let hi_ok = self.case_compare(CmpOp::Le, sel, sel_mty, is_string, sel_ty, hi)?;
                let both = self.fresh_temp();
                self.emit(Inst::Bin {
                    dst: both,
                    ty: MTy::W,
                    op: IrBin::And,
                    a: lo_ok,
                    b: hi_ok,
                });
                Ok(Val::Temp(both))
            }
        }
    }

    fn case_compare(
        &mut self,
        op: CmpOp,
        sel: Val,
        sel_mty: MTy,
        is_string: bool,
        sel_ty: &Type,
        value: &Expr,
    ) -> Result<Val, CodeGenError> {
        if is_string {
            let v = self.lower_expr_as(value, &Type::Str)?;
            let cmp = self
                .call("string_compare", vec![(sel, MTy::P), (v, MTy::P)], Some(MTy::W))
                .expect("call returns");
            let dst = self.fresh_temp();
            self.emit(Inst::Cmp { dst, ty: MTy::W, op, a: cmp, b: Val::I(0) });
            return Ok(Val::Temp(dst));
        }
        // The CASE value converts to the selector's type.
        let v = self.lower_expr_as(value, sel_ty)?;
        let dst = self.fresh_temp();
        self.emit(Inst::Cmp { dst, ty: sel_mty, op, a: sel, b: v });
        Ok(Val::Temp(dst))
    }

    fn lower_return(&mut self, value: Option<&Expr>) -> Result<(), CodeGenError> {
        match (self.sig, value) {
            (None, None) => {
                // RETURN from GOSUB.
                self.seal(Term::GosubRet);
                let dead = self.new_block("after_return");
                self.open_block(dead);
                Ok(())
            }
            (None, Some(_)) => Err(CodeGenError::ice("RETURN value outside a FUNCTION")),
            (Some(sig), value) => {
                if let Some(value) = value {
                    let ret_ty = sig.ret.clone();
                    let slot = self
                        .ret_slot
                        .ok_or_else(|| CodeGenError::ice("missing return slot"))?;
                    let v = self.lower_expr_as(value, &ret_ty)?;
                    let addr = self.address_of_storage(Storage::Slot(slot));
                    self.emit(Inst::Store {
                        width: super::width_of(&ret_ty),
                        val: v,
                        addr,
                        offset: 0,
                    });
                }
                let exit = self.exit_block;
                self.goto_block(exit);
                let dead = self.new_block("after_return");
                self.open_block(dead);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // TRY / CATCH / FINALLY

    fn lower_try(
        &mut self,
        body: &[Stmt],
        catches: &[CatchArm],
        finally: Option<&[Stmt]>,
        line: i32,
    ) -> Result<(), CodeGenError> {
        let _ = line;
        let exit = self.new_block("try_end");
        let body_block = self.new_block("try_body");
        let dispatch = self.new_block("try_dispatch");

        // Push the frame and anchor it with a direct setjmp. The nonzero
        // return is the longjmp arriving from basic_throw.
        let buf = self
            .call("exception_frame_push", Vec::new(), Some(MTy::P))
            .expect("call returns");
        let selector = self.fresh_temp();
        self.emit(Inst::Setjmp { dst: selector, buf });
        self.seal(Term::Br {
            cond: Val::Temp(selector),
            then_to: dispatch,
            else_to: body_block,
        });

        // Protected body; normal completion pops the frame and runs FINALLY.
        self.open_block(body_block);
        self.lower_stmts(body)?;
        self.call("exception_frame_pop", Vec::new(), None);
        if let Some(finally) = finally {
            self.lower_stmts(finally)?;
        }
        self.goto_block(exit);

        // Dispatch: the frame is popped first so a THROW inside a CATCH arm
        // propagates to the enclosing TRY.
        self.open_block(dispatch);
        self.call("exception_frame_pop", Vec::new(), None);
        let err = self
            .call("basic_err", Vec::new(), Some(MTy::W))
            .expect("call returns");
        for arm in catches {
            let arm_block = self.new_block("catch_arm");
            match &arm.code {
                Some(code) => {
                    let next = self.new_block("catch_next");
                    let code_val = self.lower_expr_as(code, &Type::Int32)?;
                    let matched = self.fresh_temp();
                    self.emit(Inst::Cmp {
                        dst: matched,
                        ty: MTy::W,
                        op: CmpOp::Eq,
                        a: err,
                        b: code_val,
                    });
                    self.seal(Term::Br {
                        cond: Val::Temp(matched),
                        then_to: arm_block,
                        else_to: next,
                    });
                    self.open_block(arm_block);
                    self.lower_stmts(&arm.body)?;
                    if let Some(finally) = finally {
                        self.lower_stmts(finally)?;
                    }
                    self.goto_block(exit);
                    self.open_block(next);
                }
                None => {
                    // Catch-all.
                    self.goto_block(arm_block);
                    self.open_block(arm_block);
                    self.lower_stmts(&arm.body)?;
                    if let Some(finally) = finally {
                        self.lower_stmts(finally)?;
                    }
                    self.goto_block(exit);
                    let dead = self.new_block("catch_unreached");
                    self.open_block(dead);
                }
            }
        }
        // No arm matched: FINALLY still runs, then the error continues
        // outward.
        if let Some(finally) = finally {
            self.lower_stmts(finally)?;
        }
        let erl = self
            .call("basic_erl", Vec::new(), Some(MTy::W))
            .expect("call returns");
        self.call("basic_throw", vec![(err, MTy::W), (erl, MTy::W)], None);
        self.seal(Term::Unreachable);

        self.open_block(exit);
        Ok(())
    }

    fn lower_whole_array_assign(
        &mut self,
        target: &Expr,
        value: &Expr,
    ) -> Result<(), CodeGenError> {
        self.lower_array_statement(target, value)
    }
}

/// Detect the dense-jump-table shape: every arm test a constant integer
/// singleton, selector integral, and the value span small enough that a
/// table beats a chain. Returns the base value and, per table slot, the
/// arm index it dispatches to.
fn dense_int_arms(arms: &[CaseArm], sel_ty: &Type) -> Option<(i64, Vec<Option<usize>>)> {
    if !sel_ty.is_integer() || arms.len() < 3 {
        return None;
    }
    let mut values: Vec<(i64, usize)> = Vec::new();
    for (i, arm) in arms.iter().enumerate() {
        for test in &arm.tests {
            match test {
                CaseTest::Value(Expr { kind: ExprKind::Int(v), .. }) => values.push((*v, i)),
                _ => return None,
            }
        }
    }
    let min = values.iter().map(|(v, _)| *v).min()?;
    let max = values.iter().map(|(v, _)| *v).max()?;
    let span = max.checked_sub(min)?.checked_add(1)?;
    if span > 128 || (span as usize) > values.len() * 4 {
        return None;
    }
    let mut table: Vec<Option<usize>> = vec![None; span as usize];
    for (v, arm) in values {
        let slot = (v - min) as usize;
        // First match wins, as in the chain form.
        if table[slot].is_none() {
            table[slot] = Some(arm);
        }
    }
    Some((min, table))
}
