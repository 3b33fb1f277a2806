//! Abstract syntax tree.
//!
//! The parser produces this shape untyped (`Type::Unknown` everywhere); the
//! semantic analyser resolves names and fills in every expression's type in
//! place, so the lowerer never sees an unknown.

use crate::lexer::{Loc, Suffix};
use crate::types::Type;

/// Binary operators, in source terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,    // `/`  float division
    IntDiv, // `\`  integer division
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or | BinOp::Xor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Float { value: f64, single: bool },
    Str(String),
    /// A bare name. After semantic analysis this is a variable, parameter,
    /// or global read.
    Var { name: String, suffix: Suffix },
    /// `name(args...)`. Parsed for array indexing, hashmap lookup, list
    /// indexing, builtin calls, and user function calls alike; semantic
    /// analysis discriminates. `name()` with no arguments over an array
    /// symbol is a whole-array reference.
    Call {
        name: String,
        suffix: Suffix,
        args: Vec<Expr>,
    },
    /// `base.field` on a UDT value.
    Field { base: Box<Expr>, field: String },
    /// `s$(lo TO hi)`, `s$(lo TO)`, `s$(TO hi)`.
    Slice {
        base: Box<Expr>,
        lo: Option<Box<Expr>>,
        hi: Option<Box<Expr>>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary { op: UnOp, operand: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: Loc,
    /// Filled by the semantic analyser.
    pub ty: Type,
}

impl Expr {
    pub fn new(kind: ExprKind, loc: Loc) -> Expr {
        Expr { kind, loc, ty: Type::Unknown }
    }
}

/// One `CASE` arm of a SELECT CASE.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseTest {
    /// `CASE v1, v2, ...`: each value its own test.
    Value(Expr),
    /// `CASE lo TO hi`.
    Range(Expr, Expr),
    /// `CASE IS > x` and friends.
    Relation(BinOp, Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseArm {
    pub tests: Vec<CaseTest>,
    pub body: Vec<Stmt>,
    pub loc: Loc,
}

/// `CATCH [code]` arm of a TRY block.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchArm {
    /// The error-code filter; `None` catches everything.
    pub code: Option<Expr>,
    pub body: Vec<Stmt>,
    pub loc: Loc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    For,
    While,
    Do,
    Function,
    Sub,
}

/// OPEN mode, checked against the literal by the semantic analyser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Input,
    Output,
    Append,
}

/// One DATA item: a literal constant.
#[derive(Debug, Clone, PartialEq)]
pub enum DataItem {
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `target = value`, where `target` is a variable, array element,
    /// UDT field, hashmap entry, or whole-array reference.
    Assign { target: Expr, value: Expr },
    Print {
        channel: Option<Expr>,
        items: Vec<Expr>,
        /// Trailing `;` or `,` suppresses the newline.
        trailing_separator: bool,
    },
    Input {
        prompt: Option<String>,
        target: Expr,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        elseifs: Vec<(Expr, Vec<Stmt>)>,
        else_body: Option<Vec<Stmt>>,
    },
    For {
        var: Expr,
        from: Expr,
        to: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    While { cond: Expr, body: Vec<Stmt> },
    /// DO ... LOOP with an optional WHILE/UNTIL test at either end.
    /// `until` inverts the sense of the test.
    DoLoop {
        pre: Option<(bool, Expr)>,
        post: Option<(bool, Expr)>,
        body: Vec<Stmt>,
    },
    /// REPEAT ... UNTIL cond.
    Repeat { body: Vec<Stmt>, until: Expr },
    Select {
        selector: Expr,
        arms: Vec<CaseArm>,
        else_body: Option<Vec<Stmt>>,
    },
    Label(String),
    Goto(String),
    Gosub(String),
    /// RETURN: from a GOSUB in main code, or (with a value) from a FUNCTION.
    Return(Option<Expr>),
    Dim {
        name: String,
        suffix: Suffix,
        /// Per-dimension bounds; `lo` defaults to 0.
        bounds: Vec<(Option<Expr>, Expr)>,
        /// AS clause type name, already mapped where builtin.
        as_type: Option<Type>,
    },
    Redim {
        name: String,
        suffix: Suffix,
        preserve: bool,
        new_upper: Expr,
    },
    Global {
        name: String,
        suffix: Suffix,
        as_type: Option<Type>,
    },
    Call { name: String, args: Vec<Expr> },
    Exit(ExitKind),
    End,
    Try {
        body: Vec<Stmt>,
        catches: Vec<CatchArm>,
        finally: Option<Vec<Stmt>>,
    },
    Throw { code: Expr, line: Option<Expr> },
    Data(Vec<DataItem>),
    Read(Vec<Expr>),
    Restore(Option<String>),
    Open {
        path: Expr,
        mode: OpenMode,
        channel: Expr,
    },
    CloseChannel(Expr),
    /// `APPEND list, value`: the list append statement.
    ListAppend { list: Expr, value: Expr },
    /// OPTION BOUNDS_CHECK ON|OFF, scoped to the containing procedure.
    OptionBoundsCheck(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub suffix: Suffix,
    pub as_type: Option<Type>,
    pub loc: Loc,
}

/// FUNCTION or SUB definition. SUBs have `ret: Type::Void`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcDef {
    pub name: String,
    pub suffix: Suffix,
    pub params: Vec<Param>,
    pub ret: Type,
    pub body: Vec<Stmt>,
    pub is_sub: bool,
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeField {
    pub name: String,
    pub ty: Type,
    pub loc: Loc,
}

/// TYPE ... END TYPE record definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub fields: Vec<TypeField>,
    pub loc: Loc,
}

/// A whole parse: type definitions, procedures, and the main program body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub types: Vec<TypeDef>,
    pub procs: Vec<ProcDef>,
    pub main: Vec<Stmt>,
}
