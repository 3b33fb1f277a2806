//! Semantic analysis.
//!
//! Two passes. Pass 1 collects TYPE, FUNCTION, SUB, and GLOBAL definitions
//! plus the DATA segment layout. Pass 2 resolves every name, fills in every
//! expression's type, checks assignability, arity, array rank, and CASE-arm
//! type rules, computes UDT field offsets, and marks SIMD-eligible UDTs.
//!
//! Errors are collected, not thrown: one run reports everything it can.
//! Implicit numeric conversions are *checked* here; the lowerer performs
//! them by comparing an operand's type against the type its context needs.

use crate::ast::*;
use crate::lexer::{Loc, Suffix};
use crate::types::Type;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum SemanticError {
    Undefined { name: String, loc: Loc },
    TypeMismatch { expected: String, found: String, loc: Loc },
    Arity { name: String, expected: usize, found: usize, loc: Loc },
    Redeclared { name: String, loc: Loc },
    NotAssignable { what: String, loc: Loc },
    BadCast { from: String, to: String, loc: Loc },
    BadBound { detail: String, loc: Loc },
    UndefinedLabel { name: String, loc: Loc },
    MisplacedExit { what: String, loc: Loc },
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticError::Undefined { name, loc } => {
                write!(f, "{}: undefined name `{}`", loc, name)
            }
            SemanticError::TypeMismatch { expected, found, loc } => {
                write!(f, "{}: type mismatch: expected {}, found {}", loc, expected, found)
            }
            SemanticError::Arity { name, expected, found, loc } => {
                write!(
                    f,
                    "{}: `{}` takes {} argument(s), found {}",
                    loc, name, expected, found
                )
            }
            SemanticError::Redeclared { name, loc } => {
                write!(f, "{}: `{}` is already declared", loc, name)
            }
            SemanticError::NotAssignable { what, loc } => {
                write!(f, "{}: {} is not assignable", loc, what)
            }
            SemanticError::BadCast { from, to, loc } => {
                write!(f, "{}: cannot convert {} to {}", loc, from, to)
            }
            SemanticError::BadBound { detail, loc } => {
                write!(f, "{}: bad array bound: {}", loc, detail)
            }
            SemanticError::UndefinedLabel { name, loc } => {
                write!(f, "{}: undefined label `{}`", loc, name)
            }
            SemanticError::MisplacedExit { what, loc } => {
                write!(f, "{}: EXIT {} outside a {}", loc, what, what)
            }
        }
    }
}

impl std::error::Error for SemanticError {}

/// NEON lane pattern of a SIMD-eligible UDT: 16 bytes of uniform lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdClass {
    I32x4,
    F32x4,
    F64x2,
}

#[derive(Debug, Clone)]
pub struct UdtField {
    pub name: String,
    pub ty: Type,
    pub offset: i32,
    pub size: i32,
}

#[derive(Debug, Clone)]
pub struct UdtInfo {
    pub name: String,
    pub fields: Vec<UdtField>,
    pub size: i32,
    pub simd: Option<SimdClass>,
}

impl UdtInfo {
    pub fn field(&self, name: &str) -> Option<&UdtField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct ProcSig {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub is_sub: bool,
}

/// Where a DATA label RESTOREs to.
pub type DataLabels = HashMap<String, usize>;

/// The analysed program: the same AST with every expression typed, plus the
/// symbol tables the lowerer reads.
#[derive(Debug)]
pub struct AnalyzedProgram {
    pub program: Program,
    pub udts: HashMap<String, UdtInfo>,
    pub procs: HashMap<String, ProcSig>,
    pub globals: HashMap<String, Type>,
    /// Variable types per scope; key "" is main, otherwise the proc name.
    pub scope_vars: HashMap<String, HashMap<String, Type>>,
    /// Bounds-check setting per scope (OPTION BOUNDS_CHECK).
    pub bounds_check: HashMap<String, bool>,
    pub data_labels: DataLabels,
    pub data_count: usize,
}

/// Key a variable by name plus sigil so `A%` and `A#` stay distinct.
pub fn var_key(name: &str, suffix: Suffix) -> String {
    format!("{}{}", name, suffix.sigil())
}

struct Scope<'a> {
    /// "" for main, proc name otherwise.
    id: String,
    vars: HashMap<String, Type>,
    params: HashSet<String>,
    proc: Option<&'a ProcSig>,
    labels: HashSet<String>,
    loops: Vec<ExitKind>,
}

pub struct Analyzer {
    errors: Vec<SemanticError>,
    udts: HashMap<String, UdtInfo>,
    procs: HashMap<String, ProcSig>,
    globals: HashMap<String, Type>,
    scope_vars: HashMap<String, HashMap<String, Type>>,
    bounds_check: HashMap<String, bool>,
    data_labels: DataLabels,
    data_count: usize,
}

impl Analyzer {
    pub fn analyze(mut program: Program) -> Result<AnalyzedProgram, Vec<SemanticError>> {
        let mut analyzer = Analyzer {
            errors: Vec::new(),
            udts: HashMap::new(),
            procs: HashMap::new(),
            globals: HashMap::new(),
            scope_vars: HashMap::new(),
            bounds_check: HashMap::new(),
            data_labels: HashMap::new(),
            data_count: 0,
        };
        analyzer.collect_definitions(&program);
        analyzer.collect_data(&program.main);

        // Main body.
        let mut main_scope = Scope {
            id: String::new(),
            vars: HashMap::new(),
            params: HashSet::new(),
            proc: None,
            labels: collect_labels(&program.main),
            loops: Vec::new(),
        };
        let mut main = std::mem::take(&mut program.main);
        analyzer.check_body(&mut main, &mut main_scope);
        program.main = main;
        analyzer.finish_scope(main_scope);

        // Procedures.
        let mut procs = std::mem::take(&mut program.procs);
        for proc in &mut procs {
            analyzer.check_proc(proc);
        }
        program.procs = procs;

        if analyzer.errors.is_empty() {
            Ok(AnalyzedProgram {
                program,
                udts: analyzer.udts,
                procs: analyzer.procs,
                globals: analyzer.globals,
                scope_vars: analyzer.scope_vars,
                bounds_check: analyzer.bounds_check,
                data_labels: analyzer.data_labels,
                data_count: analyzer.data_count,
            })
        } else {
            Err(analyzer.errors)
        }
    }

    fn finish_scope(&mut self, scope: Scope<'_>) {
        self.scope_vars.insert(scope.id.clone(), scope.vars);
    }

    // ------------------------------------------------------------------
    // Pass 1

    fn collect_definitions(&mut self, program: &Program) {
        for def in &program.types {
            if self.udts.contains_key(&def.name) {
                self.errors.push(SemanticError::Redeclared {
                    name: def.name.clone(),
                    loc: def.loc,
                });
                continue;
            }
            let info = self.layout_udt(def);
            self.udts.insert(def.name.clone(), info);
        }
        for proc in &program.procs {
            if self.procs.contains_key(&proc.name) {
                self.errors.push(SemanticError::Redeclared {
                    name: proc.name.clone(),
                    loc: proc.loc,
                });
                continue;
            }
            let params = proc
                .params
                .iter()
                .map(|p| self.param_type(p))
                .collect();
            self.procs.insert(
                proc.name.clone(),
                ProcSig {
                    name: proc.name.clone(),
                    params,
                    ret: proc.ret.clone(),
                    is_sub: proc.is_sub,
                },
            );
        }
        // GLOBAL declarations anywhere in main.
        for stmt in &program.main {
            if let StmtKind::Global { name, suffix, as_type } = &stmt.kind {
                let ty = as_type
                    .clone()
                    .or_else(|| Type::from_suffix(*suffix))
                    .unwrap_or(Type::Double);
                let key = var_key(name, *suffix);
                if self.globals.insert(key.clone(), ty).is_some() {
                    self.errors.push(SemanticError::Redeclared {
                        name: key,
                        loc: stmt.loc,
                    });
                }
            }
        }
    }

    fn param_type(&mut self, param: &Param) -> Type {
        let ty = param
            .as_type
            .clone()
            .or_else(|| Type::from_suffix(param.suffix))
            .unwrap_or(Type::Double);
        // Records pass neither by value nor by reference; scalar,
        // string, and descriptor parameters only.
        if matches!(ty, Type::Udt(_)) {
            self.errors.push(SemanticError::TypeMismatch {
                expected: "a scalar, string, hashmap, or list parameter".to_string(),
                found: ty.to_string(),
                loc: param.loc,
            });
            return Type::Unknown;
        }
        ty
    }

    fn layout_udt(&mut self, def: &TypeDef) -> UdtInfo {
        let mut fields = Vec::new();
        let mut offset = 0i32;
        for field in &def.fields {
            let size = match field.ty.scalar_size() {
                Some(size) if field.ty.is_numeric() => size,
                _ => {
                    self.errors.push(SemanticError::TypeMismatch {
                        expected: "a numeric field type".to_string(),
                        found: field.ty.to_string(),
                        loc: field.loc,
                    });
                    continue;
                }
            };
            // Natural alignment per field.
            offset = (offset + size - 1) & !(size - 1);
            fields.push(UdtField {
                name: field.name.clone(),
                ty: field.ty.clone(),
                offset,
                size,
            });
            offset += size;
        }
        let max_align = fields.iter().map(|f| f.size).max().unwrap_or(1);
        let size = (offset + max_align - 1) & !(max_align - 1);
        let simd = Self::simd_class(&fields, size);
        UdtInfo { name: def.name.clone(), fields, size, simd }
    }

    /// {4 x i32}, {4 x single}, or {2 x double}: 16 bytes, uniform lanes.
    fn simd_class(fields: &[UdtField], size: i32) -> Option<SimdClass> {
        if size != 16 {
            return None;
        }
        let first = fields.first()?;
        if !fields.iter().all(|f| f.ty == first.ty) {
            return None;
        }
        match (first.ty.clone(), fields.len()) {
            (Type::Int32, 4) => Some(SimdClass::I32x4),
            (Type::Single, 4) => Some(SimdClass::F32x4),
            (Type::Double, 2) => Some(SimdClass::F64x2),
            _ => None,
        }
    }

    fn collect_data(&mut self, main: &[Stmt]) {
        // DATA items live in the main body, pooled in program order.
        // A label's RESTORE point is the number of items before it.
        let mut count = 0usize;
        for stmt in main {
            match &stmt.kind {
                StmtKind::Label(name) => {
                    self.data_labels.insert(name.clone(), count);
                }
                StmtKind::Data(items) => count += items.len(),
                _ => {}
            }
        }
        self.data_count = count;
    }

    // ------------------------------------------------------------------
    // Pass 2: scopes and statements

    fn check_proc(&mut self, proc: &mut ProcDef) {
        let sig = self.procs.get(&proc.name).cloned();
        let sig_ref = sig.as_ref();
        let mut scope = Scope {
            id: proc.name.clone(),
            vars: HashMap::new(),
            params: HashSet::new(),
            proc: sig_ref,
            labels: collect_labels(&proc.body),
            loops: Vec::new(),
        };
        for (param, ty) in proc.params.iter().zip(sig_ref.iter().flat_map(|s| s.params.iter())) {
            let key = var_key(&param.name, param.suffix);
            scope.params.insert(key.clone());
            if scope.vars.insert(key.clone(), ty.clone()).is_some() {
                self.errors.push(SemanticError::Redeclared { name: key, loc: param.loc });
            }
        }
        let mut body = std::mem::take(&mut proc.body);
        self.check_body(&mut body, &mut scope);
        proc.body = body;
        self.finish_scope(scope);
    }

    fn check_body(&mut self, body: &mut Vec<Stmt>, scope: &mut Scope<'_>) {
        for stmt in body {
            self.check_stmt(stmt, scope);
        }
    }

    fn check_stmt(&mut self, stmt: &mut Stmt, scope: &mut Scope<'_>) {
        let loc = stmt.loc;
        match &mut stmt.kind {
            StmtKind::Assign { target, value } => self.check_assign(target, value, scope, loc),
            StmtKind::Print { channel, items, .. } => {
                if let Some(chan) = channel {
                    self.expect_integer(chan, scope);
                }
                for item in items {
                    let ty = self.type_expr(item, scope);
                    if !(ty.is_numeric() || ty == Type::Str || ty == Type::Unknown) {
                        self.errors.push(SemanticError::TypeMismatch {
                            expected: "a printable value".to_string(),
                            found: ty.to_string(),
                            loc: item.loc,
                        });
                    }
                }
            }
            StmtKind::Input { target, .. } => {
                let ty = self.type_lvalue(target, scope);
                if !(ty.is_numeric() || ty == Type::Str || ty == Type::Unknown) {
                    self.errors.push(SemanticError::TypeMismatch {
                        expected: "a numeric or string target".to_string(),
                        found: ty.to_string(),
                        loc: target.loc,
                    });
                }
            }
            StmtKind::If { cond, then_body, elseifs, else_body } => {
                self.expect_condition(cond, scope);
                self.check_body(then_body, scope);
                for (elseif_cond, elseif_body) in elseifs {
                    self.expect_condition(elseif_cond, scope);
                    self.check_body(elseif_body, scope);
                }
                if let Some(body) = else_body {
                    self.check_body(body, scope);
                }
            }
            StmtKind::For { var, from, to, step, body } => {
                let var_ty = self.type_lvalue(var, scope);
                if !var_ty.is_numeric() {
                    self.errors.push(SemanticError::TypeMismatch {
                        expected: "a numeric loop counter".to_string(),
                        found: var_ty.to_string(),
                        loc: var.loc,
                    });
                }
                self.expect_numeric(from, scope);
                self.expect_numeric(to, scope);
                if let Some(step) = step {
                    self.expect_numeric(step, scope);
                }
                scope.loops.push(ExitKind::For);
                self.check_body(body, scope);
                scope.loops.pop();
            }
            StmtKind::While { cond, body } => {
                self.expect_condition(cond, scope);
                scope.loops.push(ExitKind::While);
                self.check_body(body, scope);
                scope.loops.pop();
            }
            StmtKind::DoLoop { pre, post, body } => {
                if let Some((_, cond)) = pre {
                    self.expect_condition(cond, scope);
                }
                scope.loops.push(ExitKind::Do);
                self.check_body(body, scope);
                scope.loops.pop();
                if let Some((_, cond)) = post {
                    self.expect_condition(cond, scope);
                }
            }
            StmtKind::Repeat { body, until } => {
                scope.loops.push(ExitKind::Do);
                self.check_body(body, scope);
                scope.loops.pop();
                self.expect_condition(until, scope);
            }
            StmtKind::Select { selector, arms, else_body } => {
                self.check_select(selector, arms, else_body, scope)
            }
            StmtKind::Label(_) => {}
            StmtKind::Goto(label) | StmtKind::Gosub(label) => {
                if !scope.labels.contains(label) {
                    self.errors.push(SemanticError::UndefinedLabel {
                        name: label.clone(),
                        loc,
                    });
                }
            }
            StmtKind::Return(value) => {
                let proc = scope.proc;
                match (proc, value.as_mut()) {
                    (Some(sig), Some(value)) if !sig.is_sub => {
                        let ret = sig.ret.clone();
                        self.expect_convertible(value, &ret, scope);
                    }
                    (Some(sig), Some(value)) if sig.is_sub => {
                        self.errors.push(SemanticError::TypeMismatch {
                            expected: "no RETURN value in a SUB".to_string(),
                            found: "an expression".to_string(),
                            loc: value.loc,
                        });
                    }
                    (None, Some(value)) => {
                        // Main-level RETURN pairs with GOSUB and carries
                        // no value.
                        self.errors.push(SemanticError::TypeMismatch {
                            expected: "RETURN without a value outside a FUNCTION".to_string(),
                            found: "an expression".to_string(),
                            loc: value.loc,
                        });
                    }
                    _ => {}
                }
            }
            StmtKind::Dim { name, suffix, bounds, as_type } => {
                self.check_dim(name, *suffix, bounds, as_type.as_ref(), scope, loc)
            }
            StmtKind::Redim { name, suffix, new_upper, .. } => {
                self.expect_integer(new_upper, scope);
                let key = var_key(name, *suffix);
                match lookup_var(scope, &self.globals, &key) {
                    Some(Type::Array { rank: 1, .. }) => {}
                    Some(other) => self.errors.push(SemanticError::TypeMismatch {
                        expected: "a one-dimensional array".to_string(),
                        found: other.to_string(),
                        loc,
                    }),
                    None => self.errors.push(SemanticError::Undefined { name: key, loc }),
                }
            }
            StmtKind::Global { .. } => {
                // Collected in pass 1; nothing to do per-statement.
            }
            StmtKind::Call { name, args } => {
                let Some(sig) = self.procs.get(name).cloned() else {
                    self.errors.push(SemanticError::Undefined { name: name.clone(), loc });
                    return;
                };
                self.check_call_args(&sig, args, scope, loc);
            }
            StmtKind::Exit(kind) => {
                let ok = match kind {
                    ExitKind::For => scope.loops.contains(&ExitKind::For),
                    ExitKind::While => scope.loops.contains(&ExitKind::While),
                    ExitKind::Do => scope.loops.contains(&ExitKind::Do),
                    ExitKind::Function => scope.proc.is_some_and(|p| !p.is_sub),
                    ExitKind::Sub => scope.proc.is_some_and(|p| p.is_sub),
                };
                if !ok {
                    let what = match kind {
                        ExitKind::For => "FOR",
                        ExitKind::While => "WHILE",
                        ExitKind::Do => "DO",
                        ExitKind::Function => "FUNCTION",
                        ExitKind::Sub => "SUB",
                    };
                    self.errors.push(SemanticError::MisplacedExit {
                        what: what.to_string(),
                        loc,
                    });
                }
            }
            StmtKind::End => {}
            StmtKind::Try { body, catches, finally } => {
                self.check_body(body, scope);
                for arm in catches {
                    if let Some(code) = &mut arm.code {
                        self.expect_integer(code, scope);
                    }
                    self.check_body(&mut arm.body, scope);
                }
                if let Some(body) = finally {
                    self.check_body(body, scope);
                }
            }
            StmtKind::Throw { code, line } => {
                self.expect_integer(code, scope);
                if let Some(line) = line {
                    self.expect_integer(line, scope);
                }
            }
            StmtKind::Data(_) => {}
            StmtKind::Read(targets) => {
                for target in targets {
                    let ty = self.type_lvalue(target, scope);
                    if !(ty.is_numeric() || ty == Type::Str || ty == Type::Unknown) {
                        self.errors.push(SemanticError::TypeMismatch {
                            expected: "a numeric or string READ target".to_string(),
                            found: ty.to_string(),
                            loc: target.loc,
                        });
                    }
                }
            }
            StmtKind::Restore(Some(label)) => {
                if !self.data_labels.contains_key(label) {
                    self.errors.push(SemanticError::UndefinedLabel {
                        name: label.clone(),
                        loc,
                    });
                }
            }
            StmtKind::Restore(None) => {}
            StmtKind::Open { path, channel, .. } => {
                self.expect_convertible(path, &Type::Str, scope);
                self.expect_integer(channel, scope);
            }
            StmtKind::CloseChannel(chan) => self.expect_integer(chan, scope),
            StmtKind::ListAppend { list, value } => {
                let list_ty = self.type_expr(list, scope);
                if list_ty != Type::List {
                    self.errors.push(SemanticError::TypeMismatch {
                        expected: "LIST".to_string(),
                        found: list_ty.to_string(),
                        loc: list.loc,
                    });
                }
                let value_ty = self.type_expr(value, scope);
                if !(value_ty.is_numeric() || value_ty == Type::Str) {
                    self.errors.push(SemanticError::TypeMismatch {
                        expected: "a numeric or string list item".to_string(),
                        found: value_ty.to_string(),
                        loc: value.loc,
                    });
                }
            }
            StmtKind::OptionBoundsCheck(on) => {
                self.bounds_check.insert(scope.id.clone(), *on);
            }
        }
    }

    fn check_dim(
        &mut self,
        name: &str,
        suffix: Suffix,
        bounds: &mut [(Option<Expr>, Expr)],
        as_type: Option<&Type>,
        scope: &mut Scope<'_>,
        loc: Loc,
    ) {
        if let Some(Type::Udt(udt_name)) = as_type {
            if !self.udts.contains_key(udt_name) {
                self.errors.push(SemanticError::Undefined {
                    name: udt_name.clone(),
                    loc,
                });
                return;
            }
        }
        let base_ty = as_type
            .cloned()
            .or_else(|| Type::from_suffix(suffix))
            .unwrap_or(Type::Double);
        let key = var_key(name, suffix);
        let ty = if bounds.is_empty() {
            base_ty
        } else {
            if bounds.len() > 2 {
                self.errors.push(SemanticError::BadBound {
                    detail: "arrays have rank 1 or 2".to_string(),
                    loc,
                });
            }
            for (lo, hi) in bounds.iter_mut() {
                if let Some(lo) = lo {
                    self.expect_integer(lo, scope);
                }
                self.expect_integer(hi, scope);
            }
            Type::Array {
                elem: Box::new(base_ty),
                rank: bounds.len().min(2) as u8,
            }
        };
        if scope.vars.insert(key.clone(), ty).is_some() {
            self.errors.push(SemanticError::Redeclared { name: key, loc });
        }
    }

    fn check_select(
        &mut self,
        selector: &mut Expr,
        arms: &mut [CaseArm],
        else_body: &mut Option<Vec<Stmt>>,
        scope: &mut Scope<'_>,
    ) {
        let sel_ty = self.type_expr(selector, scope);
        let is_string = sel_ty == Type::Str;
        if !(sel_ty.is_numeric() || is_string || sel_ty == Type::Unknown) {
            self.errors.push(SemanticError::TypeMismatch {
                expected: "a numeric or string selector".to_string(),
                found: sel_ty.to_string(),
                loc: selector.loc,
            });
        }
        for arm in arms.iter_mut() {
            for test in &mut arm.tests {
                match test {
                    CaseTest::Value(value) => {
                        self.expect_convertible(value, &sel_ty, scope);
                    }
                    CaseTest::Range(lo, hi) => {
                        if is_string {
                            // The reference leaves string ranges undefined;
                            // rejecting beats guessing an ordering.
                            self.errors.push(SemanticError::TypeMismatch {
                                expected: "a numeric selector for range cases".to_string(),
                                found: "STRING".to_string(),
                                loc: lo.loc,
                            });
                        }
                        self.expect_convertible(lo, &sel_ty, scope);
                        self.expect_convertible(hi, &sel_ty, scope);
                    }
                    CaseTest::Relation(_, value) => {
                        self.expect_convertible(value, &sel_ty, scope);
                    }
                }
            }
            self.check_body(&mut arm.body, scope);
        }
        if let Some(body) = else_body {
            self.check_body(body, scope);
        }
    }

    fn check_assign(&mut self, target: &mut Expr, value: &mut Expr, scope: &mut Scope<'_>, loc: Loc) {
        // A call-shaped target must resolve to a variable (array element,
        // hashmap entry, whole-array); a function result is not a place.
        if let ExprKind::Call { name, suffix, .. } = &target.kind {
            let key = var_key(name, *suffix);
            if lookup_var(scope, &self.globals, &key).is_none() {
                self.errors.push(SemanticError::NotAssignable {
                    what: format!("the result of `{}`", key),
                    loc,
                });
                self.type_expr(value, scope);
                return;
            }
        }
        let target_ty = self.type_lvalue(target, scope);
        match &target_ty {
            Type::Array { elem, .. } => {
                // Whole-array target: element-wise expression or scalar
                // fill. Only numeric element types have loop skeletons.
                let elem_ty = (**elem).clone();
                if !elem_ty.is_numeric() {
                    self.errors.push(SemanticError::TypeMismatch {
                        expected: "a numeric element type for whole-array assignment"
                            .to_string(),
                        found: elem_ty.to_string(),
                        loc,
                    });
                }
                self.check_array_expr(value, &elem_ty, scope);
            }
            Type::Unknown => {
                // Error already reported while typing the target.
                self.type_expr(value, scope);
            }
            _ => {
                if matches!(target.kind, ExprKind::Slice { .. }) {
                    self.errors.push(SemanticError::NotAssignable {
                        what: "a string slice".to_string(),
                        loc,
                    });
                }
                self.expect_convertible(value, &target_ty, scope);
            }
        }
    }

    /// Validate the right-hand side of a whole-array assignment: the loop
    /// skeleton shapes the vectoriser knows (COPY, FILL, unary NEG/ABS/SQR,
    /// binary ADD/SUB/MUL/DIV, FMA, scalar broadcast). Deeper nesting has
    /// no skeleton and is rejected.
    fn check_array_expr(&mut self, expr: &mut Expr, elem: &Type, scope: &mut Scope<'_>) {
        let loc = expr.loc;
        let ty = self.type_expr(expr, scope);
        match ty {
            Type::Array { elem: found, .. } => {
                if *found != *elem {
                    self.errors.push(SemanticError::TypeMismatch {
                        expected: format!("an array of {}", elem),
                        found: format!("an array of {}", found),
                        loc,
                    });
                }
                if !array_shape_ok(expr) {
                    self.errors.push(SemanticError::TypeMismatch {
                        expected: "a single element-wise operation (or a + b * c)".to_string(),
                        found: "a nested whole-array expression".to_string(),
                        loc,
                    });
                }
            }
            ty if ty.is_numeric() => {} // scalar FILL / broadcast operand
            Type::Unknown => {}
            other => self.errors.push(SemanticError::TypeMismatch {
                expected: "an array expression".to_string(),
                found: other.to_string(),
                loc,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Expressions

    fn expect_condition(&mut self, expr: &mut Expr, scope: &mut Scope<'_>) {
        let ty = self.type_expr(expr, scope);
        if !(ty.is_numeric() || ty == Type::Unknown) {
            self.errors.push(SemanticError::TypeMismatch {
                expected: "a numeric condition".to_string(),
                found: ty.to_string(),
                loc: expr.loc,
            });
        }
    }

    fn expect_numeric(&mut self, expr: &mut Expr, scope: &mut Scope<'_>) {
        let ty = self.type_expr(expr, scope);
        if !(ty.is_numeric() || ty == Type::Unknown) {
            self.errors.push(SemanticError::TypeMismatch {
                expected: "a numeric value".to_string(),
                found: ty.to_string(),
                loc: expr.loc,
            });
        }
    }

    fn expect_integer(&mut self, expr: &mut Expr, scope: &mut Scope<'_>) {
        let ty = self.type_expr(expr, scope);
        if !(ty.is_numeric() || ty == Type::Unknown) {
            self.errors.push(SemanticError::TypeMismatch {
                expected: "an integer value".to_string(),
                found: ty.to_string(),
                loc: expr.loc,
            });
        }
    }

    fn expect_convertible(&mut self, expr: &mut Expr, want: &Type, scope: &mut Scope<'_>) {
        let ty = self.type_expr(expr, scope);
        if ty == Type::Unknown || *want == Type::Unknown {
            return;
        }
        let ok = ty == *want
            || (ty.is_numeric() && want.is_numeric())
            || (ty == Type::Str && *want == Type::Str);
        if !ok {
            self.errors.push(SemanticError::BadCast {
                from: ty.to_string(),
                to: want.to_string(),
                loc: expr.loc,
            });
        }
    }

    /// Type an lvalue, implicitly declaring plain variables on first use.
    fn type_lvalue(&mut self, expr: &mut Expr, scope: &mut Scope<'_>) -> Type {
        self.type_expr_inner(expr, scope, true)
    }

    fn type_expr(&mut self, expr: &mut Expr, scope: &mut Scope<'_>) -> Type {
        self.type_expr_inner(expr, scope, false)
    }

    fn type_expr_inner(&mut self, expr: &mut Expr, scope: &mut Scope<'_>, lvalue: bool) -> Type {
        let loc = expr.loc;
        let ty = match &mut expr.kind {
            ExprKind::Int(v) => {
                if i32::try_from(*v).is_ok() {
                    Type::Int32
                } else {
                    Type::Int64
                }
            }
            ExprKind::Float { single, .. } => {
                if *single { Type::Single } else { Type::Double }
            }
            ExprKind::Str(_) => Type::Str,
            ExprKind::Var { name, suffix } => {
                let key = var_key(name, *suffix);
                match lookup_var(scope, &self.globals, &key) {
                    Some(ty) => ty,
                    None => {
                        // Implicit declaration, suffix picks the type.
                        let ty = Type::from_suffix(*suffix).unwrap_or(Type::Double);
                        scope.vars.insert(key, ty.clone());
                        ty
                    }
                }
            }
            ExprKind::Call { name, suffix, .. } => {
                // End the borrow of `expr.kind` before handing `expr` on.
                let name = name.clone();
                let suffix = *suffix;
                return self.type_call(expr, loc, lvalue, scope, name, suffix);
            }
            ExprKind::Field { base, field } => {
                let base_ty = self.type_expr_inner(base, scope, lvalue);
                match base_ty {
                    Type::Udt(udt_name) => match self.udts.get(&udt_name) {
                        Some(info) => match info.field(field) {
                            Some(f) => f.ty.clone(),
                            None => {
                                self.errors.push(SemanticError::Undefined {
                                    name: format!("{}.{}", udt_name, field),
                                    loc,
                                });
                                Type::Unknown
                            }
                        },
                        None => Type::Unknown,
                    },
                    Type::Unknown => Type::Unknown,
                    other => {
                        self.errors.push(SemanticError::TypeMismatch {
                            expected: "a TYPE value".to_string(),
                            found: other.to_string(),
                            loc,
                        });
                        Type::Unknown
                    }
                }
            }
            ExprKind::Slice { base, lo, hi } => {
                let base_ty = self.type_expr(base, scope);
                if base_ty != Type::Str && base_ty != Type::Unknown {
                    self.errors.push(SemanticError::TypeMismatch {
                        expected: "STRING".to_string(),
                        found: base_ty.to_string(),
                        loc,
                    });
                }
                if let Some(lo) = lo {
                    self.expect_integer(lo, scope);
                }
                if let Some(hi) = hi {
                    self.expect_integer(hi, scope);
                }
                Type::Str
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let op = *op;
                let lt = self.type_expr(lhs, scope);
                let rt = self.type_expr(rhs, scope);
                self.type_binary(op, lt, rt, loc)
            }
            ExprKind::Unary { op, operand } => {
                let op = *op;
                let ty = self.type_expr(operand, scope);
                match op {
                    UnOp::Neg => {
                        if let Type::Array { .. } = ty {
                            ty // whole-array negate
                        } else if ty.is_numeric() || ty == Type::Unknown {
                            ty
                        } else {
                            self.errors.push(SemanticError::TypeMismatch {
                                expected: "a numeric operand".to_string(),
                                found: ty.to_string(),
                                loc,
                            });
                            Type::Unknown
                        }
                    }
                    UnOp::Not => {
                        if ty.is_numeric() || ty == Type::Unknown {
                            // Logical on 0/nonzero, bitwise on integers.
                            if ty.is_integer() { ty } else { Type::Int64 }
                        } else {
                            self.errors.push(SemanticError::TypeMismatch {
                                expected: "a numeric operand".to_string(),
                                found: ty.to_string(),
                                loc,
                            });
                            Type::Unknown
                        }
                    }
                }
            }
        };
        expr.ty = ty.clone();
        ty
    }

    fn type_binary(&mut self, op: BinOp, lt: Type, rt: Type, loc: Loc) -> Type {
        use Type::*;
        if lt == Unknown || rt == Unknown {
            return Unknown;
        }
        // Record arithmetic: SIMD-eligible TYPEs support element-wise
        // + - * / on whole records.
        if let (Udt(a), Udt(b)) = (&lt, &rt) {
            if a != b {
                self.errors.push(SemanticError::TypeMismatch {
                    expected: a.to_string(),
                    found: b.to_string(),
                    loc,
                });
                return Unknown;
            }
            let eligible = self.udts.get(a).is_some_and(|info| info.simd.is_some());
            let allowed = matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div);
            if !allowed || !eligible {
                self.errors.push(SemanticError::TypeMismatch {
                    expected: "element-wise + - * / on a 16-byte uniform TYPE".to_string(),
                    found: format!("{:?} on {}", op, a),
                    loc,
                });
                return Unknown;
            }
            return lt;
        }
        // Whole-array operands: element-wise forms and scalar broadcast.
        if let (Array { elem, rank }, other) | (other, Array { elem, rank }) = (lt.clone(), rt.clone())
        {
            let allowed = matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div);
            if !allowed {
                self.errors.push(SemanticError::TypeMismatch {
                    expected: "+, -, *, or / on whole arrays".to_string(),
                    found: format!("{:?}", op),
                    loc,
                });
                return Unknown;
            }
            match other {
                Array { elem: other_elem, .. } => {
                    if other_elem != elem {
                        self.errors.push(SemanticError::TypeMismatch {
                            expected: format!("an array of {}", elem),
                            found: format!("an array of {}", other_elem),
                            loc,
                        });
                    }
                }
                scalar if scalar.is_numeric() => {}
                other => {
                    self.errors.push(SemanticError::TypeMismatch {
                        expected: "an array or scalar operand".to_string(),
                        found: other.to_string(),
                        loc,
                    });
                }
            }
            return Array { elem, rank };
        }
        match op {
            BinOp::Add if lt == Str && rt == Str => Str,
            BinOp::Add | BinOp::Sub | BinOp::Mul => self.require_widened(lt, rt, loc),
            BinOp::Div => {
                if lt.is_numeric() && rt.is_numeric() {
                    // `/` is float division; singles stay single.
                    if lt == Single && rt == Single { Single } else { Double }
                } else {
                    self.mismatch_numeric(lt, rt, loc)
                }
            }
            BinOp::IntDiv | BinOp::Mod => {
                if lt.is_numeric() && rt.is_numeric() {
                    let widened = lt.widened(&rt).unwrap();
                    if widened.is_integer() { widened } else { Int64 }
                } else {
                    self.mismatch_numeric(lt, rt, loc)
                }
            }
            BinOp::Pow => {
                if lt.is_numeric() && rt.is_numeric() {
                    Double
                } else {
                    self.mismatch_numeric(lt, rt, loc)
                }
            }
            op if op.is_comparison() => {
                let ok = (lt.is_numeric() && rt.is_numeric()) || (lt == Str && rt == Str);
                if !ok {
                    return self.mismatch_numeric(lt, rt, loc);
                }
                Int32
            }
            _ => {
                // AND/OR/XOR: logical on 0/nonzero, bitwise on integers.
                if lt.is_numeric() && rt.is_numeric() {
                    let widened = lt.widened(&rt).unwrap();
                    if widened.is_integer() { widened } else { Int64 }
                } else {
                    self.mismatch_numeric(lt, rt, loc)
                }
            }
        }
    }

    fn require_widened(&mut self, lt: Type, rt: Type, loc: Loc) -> Type {
        match lt.widened(&rt) {
            Some(ty) => ty,
            None => self.mismatch_numeric(lt, rt, loc),
        }
    }

    fn mismatch_numeric(&mut self, lt: Type, rt: Type, loc: Loc) -> Type {
        self.errors.push(SemanticError::TypeMismatch {
            expected: "numeric operands".to_string(),
            found: format!("{} and {}", lt, rt),
            loc,
        });
        Type::Unknown
    }

    /// Resolve `name(args...)`: array index / whole-array reference,
    /// hashmap lookup, list index, builtin, or user function call.
    fn type_call(
        &mut self,
        expr: &mut Expr,
        loc: Loc,
        lvalue: bool,
        scope: &mut Scope<'_>,
        name: String,
        suffix: Suffix,
    ) -> Type {
        let key = var_key(&name, suffix);
        if let Some(var_ty) = lookup_var(scope, &self.globals, &key) {
            let ExprKind::Call { args, .. } = &mut expr.kind else { unreachable!() };
            let ty = match var_ty {
                Type::Array { elem, rank } => {
                    if args.is_empty() {
                        Type::Array { elem, rank }
                    } else if args.len() != rank as usize {
                        self.errors.push(SemanticError::Arity {
                            name: key,
                            expected: rank as usize,
                            found: args.len(),
                            loc,
                        });
                        Type::Unknown
                    } else {
                        for index in args.iter_mut() {
                            self.expect_integer(index, scope);
                        }
                        (*elem).clone()
                    }
                }
                Type::Hashmap => {
                    if args.len() != 1 {
                        self.errors.push(SemanticError::Arity {
                            name: key,
                            expected: 1,
                            found: args.len(),
                            loc,
                        });
                    } else {
                        self.expect_convertible(&mut args[0], &Type::Str, scope);
                    }
                    Type::Str
                }
                Type::List => {
                    if lvalue {
                        self.errors.push(SemanticError::NotAssignable {
                            what: "a list element".to_string(),
                            loc,
                        });
                    }
                    if args.len() != 1 {
                        self.errors.push(SemanticError::Arity {
                            name: key,
                            expected: 1,
                            found: args.len(),
                            loc,
                        });
                    } else {
                        self.expect_integer(&mut args[0], scope);
                    }
                    Type::Double
                }
                other => {
                    self.errors.push(SemanticError::TypeMismatch {
                        expected: "an indexable value".to_string(),
                        found: other.to_string(),
                        loc,
                    });
                    Type::Unknown
                }
            };
            expr.ty = ty.clone();
            return ty;
        }

        if let Some(ty) = self.type_builtin(expr, loc, scope, &name, suffix) {
            expr.ty = ty.clone();
            return ty;
        }

        if let Some(sig) = self.procs.get(&name).cloned() {
            if sig.is_sub {
                self.errors.push(SemanticError::TypeMismatch {
                    expected: "a FUNCTION in an expression".to_string(),
                    found: format!("SUB {}", name),
                    loc,
                });
            }
            let ExprKind::Call { args, .. } = &mut expr.kind else { unreachable!() };
            let mut args = std::mem::take(args);
            self.check_call_args(&sig, &mut args, scope, loc);
            if let ExprKind::Call { args: slot, .. } = &mut expr.kind {
                *slot = args;
            }
            expr.ty = sig.ret.clone();
            return sig.ret;
        }

        self.errors.push(SemanticError::Undefined { name: key, loc });
        expr.ty = Type::Unknown;
        Type::Unknown
    }

    fn check_call_args(
        &mut self,
        sig: &ProcSig,
        args: &mut [Expr],
        scope: &mut Scope<'_>,
        loc: Loc,
    ) {
        if args.len() != sig.params.len() {
            self.errors.push(SemanticError::Arity {
                name: sig.name.clone(),
                expected: sig.params.len(),
                found: args.len(),
                loc,
            });
            // Still type the args we have for downstream diagnostics.
            for arg in args.iter_mut() {
                self.type_expr(arg, scope);
            }
            return;
        }
        let params = sig.params.to_vec();
        for (arg, param_ty) in args.iter_mut().zip(params) {
            self.expect_convertible(arg, &param_ty, scope);
        }
    }

    /// Builtin function table. Returns `None` when `name` is not a builtin.
    fn type_builtin(
        &mut self,
        expr: &mut Expr,
        loc: Loc,
        scope: &mut Scope<'_>,
        name: &str,
        suffix: Suffix,
    ) -> Option<Type> {
        let ExprKind::Call { args, .. } = &mut expr.kind else { unreachable!() };
        let mut args = std::mem::take(args);
        let full = format!("{}{}", name, suffix.sigil());

        let arity_check = |analyzer: &mut Analyzer, expected: usize, found: usize| {
            if expected != found {
                analyzer.errors.push(SemanticError::Arity {
                    name: full.clone(),
                    expected,
                    found,
                    loc,
                });
                return false;
            }
            true
        };

        let ty = match full.as_str() {
            "ABS" => {
                if arity_check(self, 1, args.len()) {
                    let ty = self.type_expr(&mut args[0], scope);
                    match ty {
                        Type::Array { .. } => ty,
                        ty if ty.is_numeric() => ty,
                        Type::Unknown => Type::Unknown,
                        other => {
                            self.errors.push(SemanticError::TypeMismatch {
                                expected: "a numeric operand".to_string(),
                                found: other.to_string(),
                                loc,
                            });
                            Type::Unknown
                        }
                    }
                } else {
                    Type::Unknown
                }
            }
            "SQR" => {
                if arity_check(self, 1, args.len()) {
                    let ty = self.type_expr(&mut args[0], scope);
                    match ty {
                        Type::Array { .. } => ty,
                        ty if ty.is_numeric() => Type::Double,
                        _ => Type::Unknown,
                    }
                } else {
                    Type::Unknown
                }
            }
            "INT" => {
                if arity_check(self, 1, args.len()) {
                    self.expect_numeric(&mut args[0], scope);
                }
                Type::Int64
            }
            "LEN" => {
                if arity_check(self, 1, args.len()) {
                    let ty = self.type_expr(&mut args[0], scope);
                    if !matches!(
                        ty,
                        Type::Str | Type::Array { .. } | Type::Hashmap | Type::List | Type::Unknown
                    ) {
                        self.errors.push(SemanticError::TypeMismatch {
                            expected: "a string, array, hashmap, or list".to_string(),
                            found: ty.to_string(),
                            loc,
                        });
                    }
                }
                Type::Int64
            }
            "STR$" => {
                if arity_check(self, 1, args.len()) {
                    self.expect_numeric(&mut args[0], scope);
                }
                Type::Str
            }
            "VAL" => {
                if arity_check(self, 1, args.len()) {
                    self.expect_convertible(&mut args[0], &Type::Str, scope);
                }
                Type::Double
            }
            "CHR$" => {
                if arity_check(self, 1, args.len()) {
                    self.expect_integer(&mut args[0], scope);
                }
                Type::Str
            }
            "ASC" => {
                if arity_check(self, 1, args.len()) {
                    self.expect_convertible(&mut args[0], &Type::Str, scope);
                }
                Type::Int64
            }
            "SUM" | "MAX" | "MIN" | "AVG" => {
                if arity_check(self, 1, args.len()) {
                    match self.type_expr(&mut args[0], scope) {
                        Type::Array { elem, .. } => match full.as_str() {
                            "AVG" => Type::Double,
                            "SUM" => {
                                if elem.is_integer() { Type::Int64 } else { (*elem).clone() }
                            }
                            _ => (*elem).clone(),
                        },
                        Type::Unknown => Type::Unknown,
                        other => {
                            self.errors.push(SemanticError::TypeMismatch {
                                expected: "a whole-array argument".to_string(),
                                found: other.to_string(),
                                loc,
                            });
                            Type::Unknown
                        }
                    }
                } else {
                    Type::Unknown
                }
            }
            "DOT" => {
                if arity_check(self, 2, args.len()) {
                    let a = self.type_expr(&mut args[0], scope);
                    let b = self.type_expr(&mut args[1], scope);
                    match (&a, &b) {
                        (Type::Array { elem: ea, .. }, Type::Array { elem: eb, .. })
                            if ea == eb => {}
                        _ => {
                            self.errors.push(SemanticError::TypeMismatch {
                                expected: "two arrays of the same element type".to_string(),
                                found: format!("{} and {}", a, b),
                                loc,
                            });
                        }
                    }
                }
                Type::Double
            }
            "EXP" | "SIN" | "COS" | "TAN" | "LOG" | "ATN" => {
                if arity_check(self, 1, args.len()) {
                    self.expect_numeric(&mut args[0], scope);
                }
                Type::Double
            }
            "ERR" | "ERL" => {
                arity_check(self, 0, args.len());
                Type::Int32
            }
            "EOF" => {
                if arity_check(self, 1, args.len()) {
                    self.expect_integer(&mut args[0], scope);
                }
                Type::Int32
            }
            "HASKEY" => {
                if arity_check(self, 2, args.len()) {
                    self.expect_convertible(&mut args[0], &Type::Hashmap, scope);
                    self.expect_convertible(&mut args[1], &Type::Str, scope);
                }
                Type::Int32
            }
            "LGET$" => {
                if arity_check(self, 2, args.len()) {
                    self.expect_convertible(&mut args[0], &Type::List, scope);
                    self.expect_integer(&mut args[1], scope);
                }
                Type::Str
            }
            "INPUT$" => {
                // Internal: INPUT #chan reads through this.
                if arity_check(self, 1, args.len()) {
                    self.expect_integer(&mut args[0], scope);
                }
                Type::Str
            }
            _ => {
                // Not a builtin; restore the args.
                if let ExprKind::Call { args: slot, .. } = &mut expr.kind {
                    *slot = args;
                }
                return None;
            }
        };
        if let ExprKind::Call { args: slot, .. } = &mut expr.kind {
            *slot = args;
        }
        Some(ty)
    }
}

/// A bare whole-array reference: `name()` typed as an array.
fn is_array_ref(expr: &Expr) -> bool {
    matches!(&expr.kind, ExprKind::Call { args, .. } if args.is_empty())
        && matches!(expr.ty, Type::Array { .. })
}

/// The loop-skeleton grammar for whole-array right-hand sides.
fn array_shape_ok(expr: &Expr) -> bool {
    if is_array_ref(expr) {
        return true; // COPY
    }
    match &expr.kind {
        ExprKind::Unary { op: UnOp::Neg, operand } => is_array_ref(operand),
        ExprKind::Call { name, args, .. } => {
            (name == "ABS" || name == "SQR") && args.len() == 1 && is_array_ref(&args[0])
        }
        ExprKind::Binary { op, lhs, rhs } => {
            if !matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div) {
                return false;
            }
            let mul_of_arrays = |e: &Expr| {
                matches!(
                    &e.kind,
                    ExprKind::Binary { op: BinOp::Mul, lhs, rhs }
                        if is_array_ref(lhs) && is_array_ref(rhs)
                )
            };
            // FMA: a() + b() * c() in either addend order.
            if *op == BinOp::Add
                && ((is_array_ref(lhs) && mul_of_arrays(rhs))
                    || (mul_of_arrays(lhs) && is_array_ref(rhs)))
            {
                return true;
            }
            let scalar = |e: &Expr| e.ty.is_numeric();
            (is_array_ref(lhs) && is_array_ref(rhs))
                || (is_array_ref(lhs) && scalar(rhs))
                || (scalar(lhs) && is_array_ref(rhs))
        }
        _ => false,
    }
}

fn lookup_var(
    scope: &Scope<'_>,
    globals: &HashMap<String, Type>,
    key: &str,
) -> Option<Type> {
    scope
        .vars
        .get(key)
        .or_else(|| globals.get(key))
        .cloned()
}

fn collect_labels(body: &[Stmt]) -> HashSet<String> {
    let mut labels = HashSet::new();
    fn walk(body: &[Stmt], labels: &mut HashSet<String>) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::Label(name) => {
                    labels.insert(name.clone());
                }
                StmtKind::If { then_body, elseifs, else_body, .. } => {
                    walk(then_body, labels);
                    for (_, body) in elseifs {
                        walk(body, labels);
                    }
                    if let Some(body) = else_body {
                        walk(body, labels);
                    }
                }
                StmtKind::For { body, .. }
                | StmtKind::While { body, .. }
                | StmtKind::DoLoop { body, .. }
                | StmtKind::Repeat { body, .. } => walk(body, labels),
                StmtKind::Select { arms, else_body, .. } => {
                    for arm in arms {
                        walk(&arm.body, labels);
                    }
                    if let Some(body) = else_body {
                        walk(body, labels);
                    }
                }
                StmtKind::Try { body, catches, finally } => {
                    walk(body, labels);
                    for arm in catches {
                        walk(&arm.body, labels);
                    }
                    if let Some(body) = finally {
                        walk(body, labels);
                    }
                }
                _ => {}
            }
        }
    }
    walk(body, &mut labels);
    labels
}

/// Convenience: parse and analyse a source string.
pub fn analyze_source(source: &str) -> Result<AnalyzedProgram, crate::error::CompileError> {
    let program = crate::parser::parse_source(source)?;
    Analyzer::analyze(program).map_err(crate::error::CompileError::Semantic)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze_ok(source: &str) -> AnalyzedProgram {
        analyze_source(source).expect("program should analyse")
    }

    fn analyze_errs(source: &str) -> Vec<SemanticError> {
        match analyze_source(source) {
            Err(crate::error::CompileError::Semantic(errs)) => errs,
            other => panic!("expected semantic errors, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn suffixes_fix_types() {
        let analyzed = analyze_ok("a% = 1\nb& = 2\nc! = 3\nd# = 4\ne$ = \"x\"\nf = 5");
        let vars = &analyzed.scope_vars[""];
        assert_eq!(vars["A%"], Type::Int32);
        assert_eq!(vars["B&"], Type::Int64);
        assert_eq!(vars["C!"], Type::Single);
        assert_eq!(vars["D#"], Type::Double);
        assert_eq!(vars["E$"], Type::Str);
        assert_eq!(vars["F"], Type::Double);
    }

    #[test]
    fn dim_declares_arrays_and_scalars() {
        let analyzed = analyze_ok("DIM a%(100)\nDIM x AS INTEGER\nDIM g(1 TO 3, 1 TO 3) AS DOUBLE");
        let vars = &analyzed.scope_vars[""];
        assert_eq!(
            vars["A%"],
            Type::Array { elem: Box::new(Type::Int32), rank: 1 }
        );
        assert_eq!(vars["X"], Type::Int32);
        assert_eq!(
            vars["G"],
            Type::Array { elem: Box::new(Type::Double), rank: 2 }
        );
    }

    #[test]
    fn widening_in_mixed_arithmetic() {
        let analyzed = analyze_ok("x% = 1\ny# = x% + 2.5");
        // The assignment checks INT32 + DOUBLE widens to DOUBLE.
        let StmtKind::Assign { value, .. } = &analyzed.program.main[1].kind else {
            panic!();
        };
        assert_eq!(value.ty, Type::Double);
    }

    #[test]
    fn string_plus_string_concatenates() {
        let analyzed = analyze_ok("a$ = \"x\" + \"y\"");
        let StmtKind::Assign { value, .. } = &analyzed.program.main[0].kind else {
            panic!();
        };
        assert_eq!(value.ty, Type::Str);
    }

    #[test]
    fn string_plus_number_is_an_error() {
        let errs = analyze_errs("a$ = \"x\" + 1");
        assert!(errs
            .iter()
            .any(|e| matches!(e, SemanticError::TypeMismatch { .. })));
    }

    #[test]
    fn undefined_function_reported() {
        let errs = analyze_errs("x = NOSUCH(1)");
        assert!(errs.iter().any(|e| matches!(
            e,
            SemanticError::Undefined { name, .. } if name == "NOSUCH"
        )));
    }

    #[test]
    fn function_arity_checked() {
        let source = "FUNCTION F%(a%, b%)\nRETURN a% + b%\nEND FUNCTION\nx = F%(1)";
        let errs = analyze_errs(source);
        assert!(errs.iter().any(|e| matches!(
            e,
            SemanticError::Arity { expected: 2, found: 1, .. }
        )));
    }

    #[test]
    fn udt_layout_and_simd_classes() {
        let source = "TYPE Vec4\nx AS SINGLE\ny AS SINGLE\nz AS SINGLE\nw AS SINGLE\nEND TYPE\n\
                      TYPE Pair\na AS DOUBLE\nb AS DOUBLE\nEND TYPE\n\
                      TYPE Mixed\ni AS INTEGER\nd AS DOUBLE\nEND TYPE\n\
                      DIM v AS Vec4";
        let analyzed = analyze_ok(source);
        let vec4 = &analyzed.udts["VEC4"];
        assert_eq!(vec4.size, 16);
        assert_eq!(vec4.simd, Some(SimdClass::F32x4));
        assert_eq!(vec4.field("Z").unwrap().offset, 8);
        let pair = &analyzed.udts["PAIR"];
        assert_eq!(pair.simd, Some(SimdClass::F64x2));
        let mixed = &analyzed.udts["MIXED"];
        assert_eq!(mixed.simd, None);
        assert_eq!(mixed.field("D").unwrap().offset, 8);
        assert_eq!(mixed.size, 16);
    }

    #[test]
    fn select_case_rejects_string_ranges() {
        let errs = analyze_errs(
            "s$ = \"m\"\nSELECT CASE s$\nCASE \"a\" TO \"z\"\nPRINT 1\nEND SELECT",
        );
        assert!(!errs.is_empty());
        // Equality arms on strings stay legal.
        analyze_ok("s$ = \"m\"\nSELECT CASE s$\nCASE \"m\"\nPRINT 1\nEND SELECT");
    }

    #[test]
    fn goto_undefined_label() {
        let errs = analyze_errs("GOTO Nowhere");
        assert!(errs
            .iter()
            .any(|e| matches!(e, SemanticError::UndefinedLabel { .. })));
    }

    #[test]
    fn exit_outside_loop() {
        let errs = analyze_errs("EXIT FOR");
        assert!(errs
            .iter()
            .any(|e| matches!(e, SemanticError::MisplacedExit { .. })));
    }

    #[test]
    fn err_erl_are_int32() {
        let analyzed = analyze_ok("TRY\nTHROW 1\nCATCH\ne% = ERR()\nl% = ERL()\nEND TRY");
        let StmtKind::Try { catches, .. } = &analyzed.program.main[0].kind else {
            panic!();
        };
        let StmtKind::Assign { value, .. } = &catches[0].body[0].kind else {
            panic!();
        };
        assert_eq!(value.ty, Type::Int32);
    }

    #[test]
    fn whole_array_expression_types() {
        let source = "DIM a(10) AS SINGLE\nDIM b(10) AS SINGLE\nDIM c(10) AS SINGLE\n\
                      c() = a() + b()\nc() = a() * 2.0\nc() = 0.0\nx! = SUM(a())";
        let analyzed = analyze_ok(source);
        let StmtKind::Assign { value, .. } = &analyzed.program.main[3].kind else {
            panic!();
        };
        assert!(matches!(value.ty, Type::Array { .. }));
    }

    #[test]
    fn whole_array_element_type_mismatch() {
        let errs = analyze_errs(
            "DIM a(10) AS SINGLE\nDIM b(10) AS DOUBLE\nDIM c(10) AS SINGLE\nc() = a() + b()",
        );
        assert!(!errs.is_empty());
    }

    #[test]
    fn hashmap_access_types() {
        let analyzed = analyze_ok("DIM m AS HASHMAP\nm(\"k\") = \"v\"\ns$ = m(\"k\")");
        let StmtKind::Assign { value, .. } = &analyzed.program.main[2].kind else {
            panic!();
        };
        assert_eq!(value.ty, Type::Str);
    }

    #[test]
    fn hashmap_numeric_value_rejected() {
        let errs = analyze_errs("DIM m AS HASHMAP\nm(\"k\") = 5");
        assert!(errs.iter().any(|e| matches!(e, SemanticError::BadCast { .. })));
    }

    #[test]
    fn globals_visible_in_procs() {
        let source = "GLOBAL counter%\nSUB Bump()\ncounter% = counter% + 1\nEND SUB\nBump";
        let analyzed = analyze_ok(source);
        assert_eq!(analyzed.globals["COUNTER%"], Type::Int32);
    }

    #[test]
    fn data_labels_index_items() {
        let source = "DATA 1, 2\nMore:\nDATA 3\nREAD a%, b%, c%\nRESTORE More\nREAD d%";
        let analyzed = analyze_ok(source);
        assert_eq!(analyzed.data_count, 3);
        assert_eq!(analyzed.data_labels["MORE"], 2);
    }

    #[test]
    fn bounds_check_option_is_scoped() {
        let source = "OPTION BOUNDS_CHECK OFF\nDIM a%(10)\na%(1) = 1";
        let analyzed = analyze_ok(source);
        assert_eq!(analyzed.bounds_check.get(""), Some(&false));
    }
}
