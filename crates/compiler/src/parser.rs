//! Recursive-descent parser.
//!
//! Accepts both classic numbered programs and free-form source; a leading
//! line number becomes a label definition (`L<number>`). On an error the
//! parser records it, resynchronises at the next end of line, and keeps
//! going, so one pass collects as many diagnostics as it can.

use crate::ast::*;
use crate::lexer::{Keyword, Loc, Punct, Suffix, Token, TokenKind};
use crate::types::Type;
use std::fmt;

/// Give up after this many errors; past that the token stream is usually
/// noise.
const MAX_ERRORS: usize = 25;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub expected: String,
    pub found: String,
    pub loc: Loc,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, found {}",
            self.loc, self.expected, self.found
        )
    }
}

impl std::error::Error for ParseError {}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Keyword(kw) => format!("`{}`", kw.text()),
        TokenKind::Ident { name, suffix } => format!("`{}{}`", name, suffix.sigil()),
        TokenKind::Int(v) => format!("`{}`", v),
        TokenKind::Float { value, .. } => format!("`{}`", value),
        TokenKind::Str(s) => format!("\"{}\"", s),
        TokenKind::Punct(p) => format!("`{}`", p.text()),
        TokenKind::Eol => "end of line".to_string(),
        TokenKind::Eos => "`:`".to_string(),
        TokenKind::Eof => "end of file".to_string(),
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<ParseError>,
    numbered_lines: usize,
    unnumbered_lines: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            errors: Vec::new(),
            numbered_lines: 0,
            unnumbered_lines: 0,
        }
    }

    // ------------------------------------------------------------------
    // Token helpers

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)].kind
    }

    fn loc(&self) -> Loc {
        self.peek().loc
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: Keyword) -> Result<(), ParseError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error_here(&format!("`{}`", kw.text())))
        }
    }

    fn check_punct(&self, p: Punct) -> bool {
        matches!(self.peek_kind(), TokenKind::Punct(q) if *q == p)
    }

    fn eat_punct(&mut self, p: Punct) -> bool {
        if self.check_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: Punct) -> Result<(), ParseError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error_here(&format!("`{}`", p.text())))
        }
    }

    fn error_here(&self, expected: &str) -> ParseError {
        ParseError {
            expected: expected.to_string(),
            found: describe(self.peek_kind()),
            loc: self.loc(),
        }
    }

    fn at_stmt_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eol | TokenKind::Eos | TokenKind::Eof)
    }

    fn expect_stmt_end(&mut self) -> Result<(), ParseError> {
        if self.at_stmt_end() {
            Ok(())
        } else {
            Err(self.error_here("end of statement"))
        }
    }

    fn skip_stmt_ends(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Eol | TokenKind::Eos) {
            self.advance();
        }
    }

    /// Error recovery: drop tokens until the next line boundary.
    fn sync_to_eol(&mut self) {
        while !matches!(self.peek_kind(), TokenKind::Eol | TokenKind::Eof) {
            self.advance();
        }
    }

    /// `END <kw>` lookahead without consuming.
    fn check_end_pair(&self, kw: Keyword) -> bool {
        self.check_kw(Keyword::End) && matches!(self.peek_at(1), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat_end_pair(&mut self, kw: Keyword) -> bool {
        if self.check_end_pair(kw) {
            self.advance();
            self.advance();
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Program structure

    pub fn parse(mut self) -> Result<Program, Vec<ParseError>> {
        let mut program = Program::default();
        loop {
            self.skip_stmt_ends();
            if matches!(self.peek_kind(), TokenKind::Eof) {
                break;
            }
            self.note_line_numbering();
            let result = if self.check_kw(Keyword::Type) {
                self.parse_type_def().map(|t| program.types.push(t))
            } else if self.check_kw(Keyword::Function) || self.check_kw(Keyword::Sub) {
                self.parse_proc().map(|p| program.procs.push(p))
            } else {
                self.parse_line(&mut program.main)
            };
            if let Err(err) = result {
                self.errors.push(err);
                if self.errors.len() >= MAX_ERRORS {
                    break;
                }
                self.sync_to_eol();
            }
        }
        if self.numbered_lines > 0 && self.unnumbered_lines > 0 {
            tracing::warn!(
                numbered = self.numbered_lines,
                unnumbered = self.unnumbered_lines,
                "program mixes numbered and unnumbered lines"
            );
        }
        if self.errors.is_empty() {
            Ok(program)
        } else {
            Err(self.errors)
        }
    }

    fn note_line_numbering(&mut self) {
        if matches!(self.peek_kind(), TokenKind::Int(_)) {
            self.numbered_lines += 1;
        } else {
            self.unnumbered_lines += 1;
        }
    }

    /// One physical line of the main body: optional line-number label, then
    /// colon-separated statements.
    fn parse_line(&mut self, out: &mut Vec<Stmt>) -> Result<(), ParseError> {
        let loc = self.loc();
        if let TokenKind::Int(number) = *self.peek_kind() {
            self.advance();
            out.push(Stmt {
                kind: StmtKind::Label(format!("L{}", number)),
                loc,
            });
        }
        loop {
            self.skip_label_definition(out);
            if self.at_stmt_end() {
                // Allow empty statements between colons.
                if matches!(self.peek_kind(), TokenKind::Eol | TokenKind::Eof) {
                    break;
                }
                self.advance();
                continue;
            }
            let stmt = self.parse_stmt()?;
            out.push(stmt);
            if matches!(self.peek_kind(), TokenKind::Eol | TokenKind::Eof) {
                break;
            }
            self.expect_stmt_end()?;
            self.advance();
        }
        Ok(())
    }

    /// `name:` at the start of a statement defines a label.
    fn skip_label_definition(&mut self, out: &mut Vec<Stmt>) {
        if let TokenKind::Ident { name, suffix: Suffix::None } = self.peek_kind()
            && matches!(self.peek_at(1), TokenKind::Eos)
        {
            let loc = self.loc();
            let name = name.clone();
            self.advance();
            self.advance();
            out.push(Stmt { kind: StmtKind::Label(name), loc });
        }
    }

    // ------------------------------------------------------------------
    // Blocks

    /// Parse statements until one of the stopper checks fires. Stoppers are
    /// left unconsumed.
    fn parse_block(&mut self, stop: &dyn Fn(&Parser) -> bool) -> Result<Vec<Stmt>, ParseError> {
        let mut body = Vec::new();
        loop {
            self.skip_stmt_ends();
            if matches!(self.peek_kind(), TokenKind::Eof) {
                return Err(self.error_here("end of block"));
            }
            if stop(self) {
                return Ok(body);
            }
            if let TokenKind::Int(number) = *self.peek_kind() {
                let loc = self.loc();
                self.advance();
                body.push(Stmt {
                    kind: StmtKind::Label(format!("L{}", number)),
                    loc,
                });
                continue;
            }
            self.skip_label_definition(&mut body);
            if self.at_stmt_end() {
                continue;
            }
            body.push(self.parse_stmt()?);
        }
    }

    // ------------------------------------------------------------------
    // Statements

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        let kind = match self.peek_kind().clone() {
            TokenKind::Keyword(kw) => match kw {
                Keyword::Print => self.parse_print()?,
                Keyword::Input => self.parse_input()?,
                Keyword::If => self.parse_if()?,
                Keyword::For => self.parse_for()?,
                Keyword::While => self.parse_while()?,
                Keyword::Do => self.parse_do()?,
                Keyword::Repeat => self.parse_repeat()?,
                Keyword::Select => self.parse_select()?,
                Keyword::Goto => self.parse_goto(false)?,
                Keyword::Gosub => self.parse_goto(true)?,
                Keyword::Return => {
                    self.advance();
                    if self.at_stmt_end() {
                        StmtKind::Return(None)
                    } else {
                        StmtKind::Return(Some(self.parse_expr()?))
                    }
                }
                Keyword::Dim => self.parse_dim()?,
                Keyword::Redim => self.parse_redim()?,
                Keyword::Global => self.parse_global()?,
                Keyword::Call => {
                    self.advance();
                    let (name, _) = self.expect_ident()?;
                    let args = if self.eat_punct(Punct::LParen) {
                        self.parse_call_args()?
                    } else {
                        Vec::new()
                    };
                    StmtKind::Call { name, args }
                }
                Keyword::Exit => self.parse_exit()?,
                Keyword::End => {
                    self.advance();
                    StmtKind::End
                }
                Keyword::Try => self.parse_try()?,
                Keyword::Throw => {
                    self.advance();
                    let code = self.parse_expr()?;
                    let line = if self.eat_punct(Punct::Comma) {
                        Some(self.parse_expr()?)
                    } else {
                        None
                    };
                    StmtKind::Throw { code, line }
                }
                Keyword::Data => self.parse_data()?,
                Keyword::Read => {
                    self.advance();
                    let mut targets = vec![self.parse_lvalue()?];
                    while self.eat_punct(Punct::Comma) {
                        targets.push(self.parse_lvalue()?);
                    }
                    StmtKind::Read(targets)
                }
                Keyword::Restore => {
                    self.advance();
                    let label = match self.peek_kind().clone() {
                        TokenKind::Int(number) => {
                            self.advance();
                            Some(format!("L{}", number))
                        }
                        TokenKind::Ident { name, suffix: Suffix::None } => {
                            self.advance();
                            Some(name)
                        }
                        _ => None,
                    };
                    StmtKind::Restore(label)
                }
                Keyword::Open => self.parse_open()?,
                Keyword::Close => {
                    self.advance();
                    self.eat_punct(Punct::Hash);
                    StmtKind::CloseChannel(self.parse_expr()?)
                }
                Keyword::Append => {
                    self.advance();
                    let list = self.parse_lvalue()?;
                    self.expect_punct(Punct::Comma)?;
                    let value = self.parse_expr()?;
                    StmtKind::ListAppend { list, value }
                }
                Keyword::Option => self.parse_option()?,
                _ => return Err(self.error_here("a statement")),
            },
            TokenKind::Ident { .. } => self.parse_assign_or_call()?,
            _ => return Err(self.error_here("a statement")),
        };
        Ok(Stmt { kind, loc })
    }

    fn expect_ident(&mut self) -> Result<(String, Suffix), ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident { name, suffix } => {
                self.advance();
                Ok((name, suffix))
            }
            _ => Err(self.error_here("an identifier")),
        }
    }

    fn parse_assign_or_call(&mut self) -> Result<StmtKind, ParseError> {
        let target = self.parse_lvalue()?;
        if self.eat_punct(Punct::Eq) {
            let value = self.parse_expr()?;
            return Ok(StmtKind::Assign { target, value });
        }
        // A bare name (or name(args)) statement is a SUB call.
        match target.kind {
            ExprKind::Var { name, .. } => Ok(StmtKind::Call { name, args: Vec::new() }),
            ExprKind::Call { name, args, .. } => Ok(StmtKind::Call { name, args }),
            _ => Err(self.error_here("`=`")),
        }
    }

    fn parse_print(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let channel = if self.eat_punct(Punct::Hash) {
            let chan = self.parse_expr()?;
            self.eat_punct(Punct::Comma);
            Some(chan)
        } else {
            None
        };
        let mut items = Vec::new();
        let mut trailing_separator = false;
        while !self.at_stmt_end() && !self.check_kw(Keyword::Else) {
            items.push(self.parse_expr()?);
            if self.eat_punct(Punct::Semicolon) || self.eat_punct(Punct::Comma) {
                trailing_separator = true;
            } else {
                trailing_separator = false;
                break;
            }
        }
        Ok(StmtKind::Print { channel, items, trailing_separator })
    }

    fn parse_input(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        if self.eat_punct(Punct::Hash) {
            // INPUT #n, target reads one line from a channel.
            let chan = self.parse_expr()?;
            self.expect_punct(Punct::Comma)?;
            let target = self.parse_lvalue()?;
            // Channel input is represented as an assignment from an
            // internal read; the lowerer special-cases it via the mode.
            return Ok(StmtKind::Assign {
                target,
                value: Expr::new(
                    ExprKind::Call {
                        name: "INPUT".to_string(),
                        suffix: Suffix::Str,
                        args: vec![chan],
                    },
                    self.loc(),
                ),
            });
        }
        let prompt = if let TokenKind::Str(text) = self.peek_kind().clone() {
            self.advance();
            if !self.eat_punct(Punct::Semicolon) {
                self.expect_punct(Punct::Comma)?;
            }
            Some(text)
        } else {
            None
        };
        let target = self.parse_lvalue()?;
        Ok(StmtKind::Input { prompt, target })
    }

    fn parse_if(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let cond = self.parse_expr()?;
        self.expect_kw(Keyword::Then)?;

        if !matches!(self.peek_kind(), TokenKind::Eol) {
            // Single-line IF: statements to end of line, optional ELSE.
            // A block-closing keyword after a colon (`THEN PRINT i; : NEXT`)
            // ends the branch and belongs to the enclosing construct.
            let closes_branch = |p: &Parser| {
                p.check_kw(Keyword::Next)
                    || p.check_kw(Keyword::Wend)
                    || p.check_kw(Keyword::Loop)
                    || p.check_kw(Keyword::Until)
                    || p.check_kw(Keyword::Case)
            };
            let mut then_body = Vec::new();
            loop {
                then_body.push(self.parse_stmt()?);
                if matches!(self.peek_kind(), TokenKind::Eos) {
                    self.advance();
                    if self.check_kw(Keyword::Else) || self.at_stmt_end() || closes_branch(self) {
                        break;
                    }
                    continue;
                }
                break;
            }
            let else_body = if self.eat_kw(Keyword::Else) {
                let mut body = vec![self.parse_stmt()?];
                while matches!(self.peek_kind(), TokenKind::Eos) {
                    self.advance();
                    if self.at_stmt_end() {
                        break;
                    }
                    body.push(self.parse_stmt()?);
                }
                Some(body)
            } else {
                None
            };
            return Ok(StmtKind::If { cond, then_body, elseifs: Vec::new(), else_body });
        }

        // Multiline IF ... END IF with optional ELSEIF chain.
        let stop = |p: &Parser| {
            p.check_kw(Keyword::Elseif) || p.check_kw(Keyword::Else) || p.check_end_pair(Keyword::If)
        };
        let then_body = self.parse_block(&stop)?;
        let mut elseifs = Vec::new();
        while self.eat_kw(Keyword::Elseif) {
            let elseif_cond = self.parse_expr()?;
            self.expect_kw(Keyword::Then)?;
            let body = self.parse_block(&stop)?;
            elseifs.push((elseif_cond, body));
        }
        let else_body = if self.eat_kw(Keyword::Else) {
            Some(self.parse_block(&|p: &Parser| p.check_end_pair(Keyword::If))?)
        } else {
            None
        };
        if !self.eat_end_pair(Keyword::If) {
            return Err(self.error_here("`END IF`"));
        }
        Ok(StmtKind::If { cond, then_body, elseifs, else_body })
    }

    fn parse_for(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let (name, suffix) = self.expect_ident()?;
        let var = Expr::new(ExprKind::Var { name, suffix }, self.loc());
        self.expect_punct(Punct::Eq)?;
        let from = self.parse_expr()?;
        self.expect_kw(Keyword::To)?;
        let to = self.parse_expr()?;
        let step = if self.eat_kw(Keyword::Step) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let body = self.parse_block(&|p: &Parser| p.check_kw(Keyword::Next))?;
        self.expect_kw(Keyword::Next)?;
        // `NEXT i`: the counter name is optional and unchecked here.
        if matches!(self.peek_kind(), TokenKind::Ident { .. }) {
            self.advance();
        }
        Ok(StmtKind::For { var, from, to, step, body })
    }

    fn parse_while(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let cond = self.parse_expr()?;
        let body = self.parse_block(&|p: &Parser| p.check_kw(Keyword::Wend))?;
        self.expect_kw(Keyword::Wend)?;
        Ok(StmtKind::While { cond, body })
    }

    fn parse_do(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let pre = if self.eat_kw(Keyword::While) {
            Some((false, self.parse_expr()?))
        } else if self.eat_kw(Keyword::Until) {
            Some((true, self.parse_expr()?))
        } else {
            None
        };
        let body = self.parse_block(&|p: &Parser| p.check_kw(Keyword::Loop))?;
        self.expect_kw(Keyword::Loop)?;
        let post = if self.eat_kw(Keyword::While) {
            Some((false, self.parse_expr()?))
        } else if self.eat_kw(Keyword::Until) {
            Some((true, self.parse_expr()?))
        } else {
            None
        };
        Ok(StmtKind::DoLoop { pre, post, body })
    }

    fn parse_repeat(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let body = self.parse_block(&|p: &Parser| p.check_kw(Keyword::Until))?;
        self.expect_kw(Keyword::Until)?;
        let until = self.parse_expr()?;
        Ok(StmtKind::Repeat { body, until })
    }

    fn parse_select(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        self.expect_kw(Keyword::Case)?;
        let selector = self.parse_expr()?;
        let mut arms = Vec::new();
        let mut else_body = None;
        loop {
            self.skip_stmt_ends();
            if self.eat_end_pair(Keyword::Select) {
                break;
            }
            let loc = self.loc();
            self.expect_kw(Keyword::Case)?;
            let stop = |p: &Parser| p.check_kw(Keyword::Case) || p.check_end_pair(Keyword::Select);
            if self.eat_kw(Keyword::Else) {
                else_body = Some(self.parse_block(&stop)?);
                continue;
            }
            let mut tests = Vec::new();
            loop {
                if self.eat_kw(Keyword::Is) {
                    let op = self.parse_relation_op()?;
                    tests.push(CaseTest::Relation(op, self.parse_expr()?));
                } else {
                    let value = self.parse_expr()?;
                    if self.eat_kw(Keyword::To) {
                        tests.push(CaseTest::Range(value, self.parse_expr()?));
                    } else {
                        tests.push(CaseTest::Value(value));
                    }
                }
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
            let body = self.parse_block(&stop)?;
            arms.push(CaseArm { tests, body, loc });
        }
        Ok(StmtKind::Select { selector, arms, else_body })
    }

    fn parse_relation_op(&mut self) -> Result<BinOp, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Punct(Punct::Eq) => BinOp::Eq,
            TokenKind::Punct(Punct::Ne) => BinOp::Ne,
            TokenKind::Punct(Punct::Lt) => BinOp::Lt,
            TokenKind::Punct(Punct::Gt) => BinOp::Gt,
            TokenKind::Punct(Punct::Le) => BinOp::Le,
            TokenKind::Punct(Punct::Ge) => BinOp::Ge,
            _ => return Err(self.error_here("a comparison operator")),
        };
        self.advance();
        Ok(op)
    }

    fn parse_goto(&mut self, gosub: bool) -> Result<StmtKind, ParseError> {
        self.advance();
        let label = match self.peek_kind().clone() {
            TokenKind::Int(number) => {
                self.advance();
                format!("L{}", number)
            }
            TokenKind::Ident { name, suffix: Suffix::None } => {
                self.advance();
                name
            }
            _ => return Err(self.error_here("a label or line number")),
        };
        Ok(if gosub { StmtKind::Gosub(label) } else { StmtKind::Goto(label) })
    }

    fn parse_as_type(&mut self) -> Result<Type, ParseError> {
        let ty = match self.peek_kind().clone() {
            TokenKind::Keyword(Keyword::Byte) => Type::Byte,
            TokenKind::Keyword(Keyword::Short) => Type::Short,
            TokenKind::Keyword(Keyword::Integer) => Type::Int32,
            TokenKind::Keyword(Keyword::Long) => Type::Int64,
            TokenKind::Keyword(Keyword::Single) => Type::Single,
            TokenKind::Keyword(Keyword::Double) => Type::Double,
            TokenKind::Keyword(Keyword::Str) => Type::Str,
            TokenKind::Keyword(Keyword::Hashmap) => Type::Hashmap,
            TokenKind::Keyword(Keyword::List) => Type::List,
            TokenKind::Ident { name, suffix: Suffix::None } => Type::Udt(name),
            _ => return Err(self.error_here("a type name")),
        };
        self.advance();
        Ok(ty)
    }

    fn parse_dim(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let (name, suffix) = self.expect_ident()?;
        let mut bounds = Vec::new();
        if self.eat_punct(Punct::LParen) {
            loop {
                let first = self.parse_expr()?;
                if self.eat_kw(Keyword::To) {
                    let upper = self.parse_expr()?;
                    bounds.push((Some(first), upper));
                } else {
                    bounds.push((None, first));
                }
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
            self.expect_punct(Punct::RParen)?;
        }
        let as_type = if self.eat_kw(Keyword::As) {
            Some(self.parse_as_type()?)
        } else {
            None
        };
        Ok(StmtKind::Dim { name, suffix, bounds, as_type })
    }

    fn parse_redim(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let preserve = self.eat_kw(Keyword::Preserve);
        let (name, suffix) = self.expect_ident()?;
        self.expect_punct(Punct::LParen)?;
        let new_upper = self.parse_expr()?;
        self.expect_punct(Punct::RParen)?;
        Ok(StmtKind::Redim { name, suffix, preserve, new_upper })
    }

    fn parse_global(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let (name, suffix) = self.expect_ident()?;
        let as_type = if self.eat_kw(Keyword::As) {
            Some(self.parse_as_type()?)
        } else {
            None
        };
        Ok(StmtKind::Global { name, suffix, as_type })
    }

    fn parse_exit(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let kind = if self.eat_kw(Keyword::For) {
            ExitKind::For
        } else if self.eat_kw(Keyword::While) {
            ExitKind::While
        } else if self.eat_kw(Keyword::Do) {
            ExitKind::Do
        } else if self.eat_kw(Keyword::Function) {
            ExitKind::Function
        } else if self.eat_kw(Keyword::Sub) {
            ExitKind::Sub
        } else {
            return Err(self.error_here("`FOR`, `WHILE`, `DO`, `FUNCTION`, or `SUB`"));
        };
        Ok(StmtKind::Exit(kind))
    }

    fn parse_try(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let stop = |p: &Parser| {
            p.check_kw(Keyword::Catch)
                || p.check_kw(Keyword::Finally)
                || p.check_end_pair(Keyword::Try)
        };
        let body = self.parse_block(&stop)?;
        let mut catches = Vec::new();
        while self.check_kw(Keyword::Catch) {
            let loc = self.loc();
            self.advance();
            let code = if self.at_stmt_end() {
                None
            } else {
                Some(self.parse_expr()?)
            };
            let catch_body = self.parse_block(&stop)?;
            catches.push(CatchArm { code, body: catch_body, loc });
        }
        let finally = if self.eat_kw(Keyword::Finally) {
            Some(self.parse_block(&|p: &Parser| p.check_end_pair(Keyword::Try))?)
        } else {
            None
        };
        if !self.eat_end_pair(Keyword::Try) {
            return Err(self.error_here("`END TRY`"));
        }
        Ok(StmtKind::Try { body, catches, finally })
    }

    fn parse_data(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let mut items = Vec::new();
        loop {
            let negative = self.eat_punct(Punct::Minus);
            let item = match self.peek_kind().clone() {
                TokenKind::Int(v) => DataItem::Int(if negative { -v } else { v }),
                TokenKind::Float { value, .. } => {
                    DataItem::Float(if negative { -value } else { value })
                }
                TokenKind::Str(text) => {
                    if negative {
                        return Err(self.error_here("a numeric literal"));
                    }
                    DataItem::Str(text)
                }
                _ => return Err(self.error_here("a literal DATA item")),
            };
            self.advance();
            items.push(item);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        Ok(StmtKind::Data(items))
    }

    fn parse_open(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let path = self.parse_expr()?;
        self.expect_kw(Keyword::For)?;
        let mode = if self.eat_kw(Keyword::Input) {
            OpenMode::Input
        } else if self.eat_kw(Keyword::Output) {
            OpenMode::Output
        } else if self.eat_kw(Keyword::Append) {
            OpenMode::Append
        } else {
            return Err(self.error_here("`INPUT`, `OUTPUT`, or `APPEND`"));
        };
        self.expect_kw(Keyword::As)?;
        self.eat_punct(Punct::Hash);
        let channel = self.parse_expr()?;
        Ok(StmtKind::Open { path, mode, channel })
    }

    fn parse_option(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        match self.peek_kind().clone() {
            TokenKind::Ident { name, .. } if name == "BOUNDS_CHECK" => {
                self.advance();
                let on = if self.eat_kw(Keyword::On) {
                    true
                } else if self.eat_kw(Keyword::Off) {
                    false
                } else {
                    return Err(self.error_here("`ON` or `OFF`"));
                };
                Ok(StmtKind::OptionBoundsCheck(on))
            }
            _ => Err(self.error_here("`BOUNDS_CHECK`")),
        }
    }

    // ------------------------------------------------------------------
    // Procedures and types

    fn parse_proc(&mut self) -> Result<ProcDef, ParseError> {
        let loc = self.loc();
        let is_sub = self.check_kw(Keyword::Sub);
        self.advance();
        let (name, suffix) = self.expect_ident()?;
        let mut params = Vec::new();
        if self.eat_punct(Punct::LParen) {
            if !self.check_punct(Punct::RParen) {
                loop {
                    let param_loc = self.loc();
                    let (param_name, param_suffix) = self.expect_ident()?;
                    let as_type = if self.eat_kw(Keyword::As) {
                        Some(self.parse_as_type()?)
                    } else {
                        None
                    };
                    params.push(Param {
                        name: param_name,
                        suffix: param_suffix,
                        as_type,
                        loc: param_loc,
                    });
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
            }
            self.expect_punct(Punct::RParen)?;
        }
        let ret = if is_sub {
            Type::Void
        } else if self.eat_kw(Keyword::As) {
            self.parse_as_type()?
        } else {
            Type::from_suffix(suffix).unwrap_or(Type::Double)
        };
        let end_kw = if is_sub { Keyword::Sub } else { Keyword::Function };
        let body = self.parse_block(&|p: &Parser| p.check_end_pair(end_kw))?;
        self.advance();
        self.advance();
        Ok(ProcDef { name, suffix, params, ret, body, is_sub, loc })
    }

    fn parse_type_def(&mut self) -> Result<TypeDef, ParseError> {
        let loc = self.loc();
        self.advance();
        let (name, _) = self.expect_ident()?;
        let mut fields = Vec::new();
        loop {
            self.skip_stmt_ends();
            if self.eat_end_pair(Keyword::Type) {
                break;
            }
            let field_loc = self.loc();
            let (field_name, field_suffix) = self.expect_ident()?;
            let ty = if self.eat_kw(Keyword::As) {
                self.parse_as_type()?
            } else {
                Type::from_suffix(field_suffix)
                    .ok_or_else(|| self.error_here("`AS <type>`"))?
            };
            fields.push(TypeField { name: field_name, ty, loc: field_loc });
        }
        Ok(TypeDef { name, fields, loc })
    }

    // ------------------------------------------------------------------
    // Expressions (precedence climbing, loosest first)

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_xor()
    }

    fn parse_xor(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_or()?;
        while self.eat_kw(Keyword::Xor) {
            let rhs = self.parse_or()?;
            let loc = lhs.loc;
            lhs = Expr::new(
                ExprKind::Binary { op: BinOp::Xor, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                loc,
            );
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat_kw(Keyword::Or) {
            let rhs = self.parse_and()?;
            let loc = lhs.loc;
            lhs = Expr::new(
                ExprKind::Binary { op: BinOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                loc,
            );
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.eat_kw(Keyword::And) {
            let rhs = self.parse_not()?;
            let loc = lhs.loc;
            lhs = Expr::new(
                ExprKind::Binary { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                loc,
            );
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.check_kw(Keyword::Not) {
            let loc = self.loc();
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::new(
                ExprKind::Unary { op: UnOp::Not, operand: Box::new(operand) },
                loc,
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek_kind() {
            TokenKind::Punct(Punct::Eq) => Some(BinOp::Eq),
            TokenKind::Punct(Punct::Ne) => Some(BinOp::Ne),
            TokenKind::Punct(Punct::Lt) => Some(BinOp::Lt),
            TokenKind::Punct(Punct::Gt) => Some(BinOp::Gt),
            TokenKind::Punct(Punct::Le) => Some(BinOp::Le),
            TokenKind::Punct(Punct::Ge) => Some(BinOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let rhs = self.parse_additive()?;
            let loc = lhs.loc;
            return Ok(Expr::new(
                ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                loc,
            ));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_mod()?;
        loop {
            let op = if self.eat_punct(Punct::Plus) {
                BinOp::Add
            } else if self.eat_punct(Punct::Minus) {
                BinOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_mod()?;
            let loc = lhs.loc;
            lhs = Expr::new(
                ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                loc,
            );
        }
    }

    fn parse_mod(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_int_div()?;
        while self.eat_kw(Keyword::Mod) {
            let rhs = self.parse_int_div()?;
            let loc = lhs.loc;
            lhs = Expr::new(
                ExprKind::Binary { op: BinOp::Mod, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                loc,
            );
        }
        Ok(lhs)
    }

    fn parse_int_div(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        while self.eat_punct(Punct::Backslash) {
            let rhs = self.parse_multiplicative()?;
            let loc = lhs.loc;
            lhs = Expr::new(
                ExprKind::Binary { op: BinOp::IntDiv, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                loc,
            );
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.eat_punct(Punct::Star) {
                BinOp::Mul
            } else if self.eat_punct(Punct::Slash) {
                BinOp::Div
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_unary()?;
            let loc = lhs.loc;
            lhs = Expr::new(
                ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                loc,
            );
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.check_punct(Punct::Minus) {
            let loc = self.loc();
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Unary { op: UnOp::Neg, operand: Box::new(operand) },
                loc,
            ));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_postfix()?;
        if self.eat_punct(Punct::Caret) {
            // Right-associative.
            let rhs = self.parse_unary()?;
            let loc = lhs.loc;
            return Ok(Expr::new(
                ExprKind::Binary { op: BinOp::Pow, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                loc,
            ));
        }
        Ok(lhs)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        while self.eat_punct(Punct::Dot) {
            let loc = expr.loc;
            let (field, _) = self.expect_ident()?;
            expr = Expr::new(ExprKind::Field { base: Box::new(expr), field }, loc);
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        // Opening paren already consumed.
        let mut args = Vec::new();
        if self.eat_punct(Punct::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc();
        match self.peek_kind().clone() {
            TokenKind::Int(v) => {
                self.advance();
                Ok(Expr::new(ExprKind::Int(v), loc))
            }
            TokenKind::Float { value, single } => {
                self.advance();
                Ok(Expr::new(ExprKind::Float { value, single }, loc))
            }
            TokenKind::Str(text) => {
                self.advance();
                Ok(Expr::new(ExprKind::Str(text), loc))
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_punct(Punct::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident { name, suffix } => {
                self.advance();
                if !self.eat_punct(Punct::LParen) {
                    return Ok(Expr::new(ExprKind::Var { name, suffix }, loc));
                }
                // Either a call/index, or a string slice when TO appears.
                if self.eat_kw(Keyword::To) {
                    // s$(TO hi)
                    let hi = self.parse_expr()?;
                    self.expect_punct(Punct::RParen)?;
                    let base = Expr::new(ExprKind::Var { name, suffix }, loc);
                    return Ok(Expr::new(
                        ExprKind::Slice { base: Box::new(base), lo: None, hi: Some(Box::new(hi)) },
                        loc,
                    ));
                }
                if self.check_punct(Punct::RParen) {
                    self.advance();
                    return Ok(Expr::new(
                        ExprKind::Call { name, suffix, args: Vec::new() },
                        loc,
                    ));
                }
                let first = self.parse_expr()?;
                if self.eat_kw(Keyword::To) {
                    let hi = if self.check_punct(Punct::RParen) {
                        None
                    } else {
                        Some(Box::new(self.parse_expr()?))
                    };
                    self.expect_punct(Punct::RParen)?;
                    let base = Expr::new(ExprKind::Var { name, suffix }, loc);
                    return Ok(Expr::new(
                        ExprKind::Slice { base: Box::new(base), lo: Some(Box::new(first)), hi },
                        loc,
                    ));
                }
                let mut args = vec![first];
                while self.eat_punct(Punct::Comma) {
                    args.push(self.parse_expr()?);
                }
                self.expect_punct(Punct::RParen)?;
                Ok(Expr::new(ExprKind::Call { name, suffix, args }, loc))
            }
            _ => Err(self.error_here("an expression")),
        }
    }

    fn parse_lvalue(&mut self) -> Result<Expr, ParseError> {
        // Lvalues are the postfix subset: variable, call-shaped index,
        // field access, slice.
        self.parse_postfix()
    }
}

/// Convenience: lex and parse a source string.
pub fn parse_source(source: &str) -> Result<Program, crate::error::CompileError> {
    let tokens = crate::lexer::tokenize(source)?;
    Parser::new(tokens).parse().map_err(crate::error::CompileError::Parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        parse_source(source).expect("program should parse")
    }

    fn parse_errs(source: &str) -> Vec<ParseError> {
        match parse_source(source) {
            Err(crate::error::CompileError::Parse(errs)) => errs,
            other => panic!("expected parse errors, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn hello_world() {
        let program = parse_ok("PRINT \"Hello, World!\" : END");
        assert_eq!(program.main.len(), 2);
        assert!(matches!(program.main[0].kind, StmtKind::Print { .. }));
        assert!(matches!(program.main[1].kind, StmtKind::End));
    }

    #[test]
    fn numbered_lines_become_labels() {
        let program = parse_ok("10 PRINT \"A\"\n20 GOTO 10");
        assert!(matches!(
            &program.main[0].kind,
            StmtKind::Label(l) if l == "L10"
        ));
        assert!(matches!(
            &program.main[3].kind,
            StmtKind::Goto(l) if l == "L10"
        ));
    }

    #[test]
    fn single_line_if_with_else() {
        let program = parse_ok("IF x > 0 THEN PRINT 1 ELSE PRINT 2");
        let StmtKind::If { then_body, else_body, .. } = &program.main[0].kind else {
            panic!("expected IF");
        };
        assert_eq!(then_body.len(), 1);
        assert_eq!(else_body.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn multiline_if_elseif_else() {
        let source = "IF a THEN\nPRINT 1\nELSEIF b THEN\nPRINT 2\nELSE\nPRINT 3\nEND IF";
        let program = parse_ok(source);
        let StmtKind::If { elseifs, else_body, .. } = &program.main[0].kind else {
            panic!("expected IF");
        };
        assert_eq!(elseifs.len(), 1);
        assert!(else_body.is_some());
    }

    #[test]
    fn for_next_with_step() {
        let program = parse_ok("FOR i = 10 TO 1 STEP -1\nPRINT i\nNEXT i");
        let StmtKind::For { step, body, .. } = &program.main[0].kind else {
            panic!("expected FOR");
        };
        assert!(step.is_some());
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn do_loop_condition_positions() {
        let pre = parse_ok("DO WHILE x < 3\nx = x + 1\nLOOP");
        assert!(matches!(
            &pre.main[0].kind,
            StmtKind::DoLoop { pre: Some((false, _)), post: None, .. }
        ));
        let post = parse_ok("DO\nx = x + 1\nLOOP UNTIL x = 3");
        assert!(matches!(
            &post.main[0].kind,
            StmtKind::DoLoop { pre: None, post: Some((true, _)), .. }
        ));
    }

    #[test]
    fn repeat_until() {
        let program = parse_ok("REPEAT\nx = x + 1\nUNTIL x > 9");
        assert!(matches!(&program.main[0].kind, StmtKind::Repeat { .. }));
    }

    #[test]
    fn select_case_arm_shapes() {
        let source = "SELECT CASE n\n\
                      CASE 1\nPRINT 1\n\
                      CASE 2, 3\nPRINT 2\n\
                      CASE 10 TO 20\nPRINT 3\n\
                      CASE IS > 50\nPRINT 4\n\
                      CASE ELSE\nPRINT 5\n\
                      END SELECT";
        let program = parse_ok(source);
        let StmtKind::Select { arms, else_body, .. } = &program.main[0].kind else {
            panic!("expected SELECT");
        };
        assert_eq!(arms.len(), 4);
        assert_eq!(arms[1].tests.len(), 2);
        assert!(matches!(arms[2].tests[0], CaseTest::Range(..)));
        assert!(matches!(arms[3].tests[0], CaseTest::Relation(BinOp::Gt, _)));
        assert!(else_body.is_some());
    }

    #[test]
    fn try_catch_finally() {
        let source = "TRY\nTHROW 42, 100\nCATCH 42\nPRINT \"caught\"\nFINALLY\nPRINT \"always\"\nEND TRY";
        let program = parse_ok(source);
        let StmtKind::Try { body, catches, finally } = &program.main[0].kind else {
            panic!("expected TRY");
        };
        assert_eq!(body.len(), 1);
        assert_eq!(catches.len(), 1);
        assert!(catches[0].code.is_some());
        assert!(finally.is_some());
    }

    #[test]
    fn dim_forms() {
        let program = parse_ok(
            "DIM a%(100)\nDIM b(1 TO 10, 1 TO 5) AS DOUBLE\nDIM m AS HASHMAP\nDIM v AS Vec4",
        );
        let StmtKind::Dim { bounds, .. } = &program.main[0].kind else {
            panic!("expected DIM");
        };
        assert_eq!(bounds.len(), 1);
        let StmtKind::Dim { bounds, as_type, .. } = &program.main[1].kind else {
            panic!("expected DIM");
        };
        assert_eq!(bounds.len(), 2);
        assert_eq!(as_type, &Some(Type::Double));
        assert!(matches!(
            &program.main[2].kind,
            StmtKind::Dim { as_type: Some(Type::Hashmap), .. }
        ));
        assert!(matches!(
            &program.main[3].kind,
            StmtKind::Dim { as_type: Some(Type::Udt(name)), .. } if name == "VEC4"
        ));
    }

    #[test]
    fn whole_array_assignment_parses_as_empty_call() {
        let program = parse_ok("C() = A() + B()");
        let StmtKind::Assign { target, value } = &program.main[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(
            &target.kind,
            ExprKind::Call { name, args, .. } if name == "C" && args.is_empty()
        ));
        assert!(matches!(&value.kind, ExprKind::Binary { op: BinOp::Add, .. }));
    }

    #[test]
    fn string_slice_forms() {
        let program = parse_ok("a$ = s$(2 TO 5)\nb$ = s$(2 TO)\nc$ = s$(TO 5)");
        for (i, (has_lo, has_hi)) in [(true, true), (true, false), (false, true)].iter().enumerate()
        {
            let StmtKind::Assign { value, .. } = &program.main[i].kind else {
                panic!("expected assignment");
            };
            let ExprKind::Slice { lo, hi, .. } = &value.kind else {
                panic!("expected slice, got {:?}", value.kind);
            };
            assert_eq!(&lo.is_some(), has_lo);
            assert_eq!(&hi.is_some(), has_hi);
        }
    }

    #[test]
    fn udt_field_access_chain() {
        let program = parse_ok("x = p.pos.y");
        let StmtKind::Assign { value, .. } = &program.main[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Field { base, field } = &value.kind else {
            panic!("expected field access");
        };
        assert_eq!(field, "Y");
        assert!(matches!(&base.kind, ExprKind::Field { .. }));
    }

    #[test]
    fn function_and_sub_definitions() {
        let source = "FUNCTION Ack%(m%, n%)\nRETURN 0\nEND FUNCTION\n\
                      SUB Greet(name$)\nPRINT name$\nEND SUB\n\
                      PRINT Ack%(3, 4)";
        let program = parse_ok(source);
        assert_eq!(program.procs.len(), 2);
        assert_eq!(program.procs[0].name, "ACK");
        assert_eq!(program.procs[0].params.len(), 2);
        assert!(!program.procs[0].is_sub);
        assert!(program.procs[1].is_sub);
        assert_eq!(program.main.len(), 1);
    }

    #[test]
    fn type_definition() {
        let source = "TYPE Vec4\nx AS SINGLE\ny AS SINGLE\nz AS SINGLE\nw AS SINGLE\nEND TYPE";
        let program = parse_ok(source);
        assert_eq!(program.types.len(), 1);
        assert_eq!(program.types[0].fields.len(), 4);
        assert_eq!(program.types[0].fields[0].ty, Type::Single);
    }

    #[test]
    fn data_read_restore() {
        let program = parse_ok("DATA 1, -2.5, \"three\"\nREAD a, b, c$\nRESTORE");
        let StmtKind::Data(items) = &program.main[0].kind else {
            panic!("expected DATA");
        };
        assert_eq!(
            items,
            &vec![
                DataItem::Int(1),
                DataItem::Float(-2.5),
                DataItem::Str("three".to_string())
            ]
        );
        assert!(matches!(&program.main[1].kind, StmtKind::Read(targets) if targets.len() == 3));
    }

    #[test]
    fn open_print_close() {
        let source = "OPEN \"out.txt\" FOR OUTPUT AS #1\nPRINT #1, \"x\"\nCLOSE #1";
        let program = parse_ok(source);
        assert!(matches!(
            &program.main[0].kind,
            StmtKind::Open { mode: OpenMode::Output, .. }
        ));
        assert!(matches!(
            &program.main[1].kind,
            StmtKind::Print { channel: Some(_), .. }
        ));
        assert!(matches!(&program.main[2].kind, StmtKind::CloseChannel(_)));
    }

    #[test]
    fn gosub_return_and_labels() {
        let program = parse_ok("GOSUB Sub3\nEND\nSub3:\nRETURN");
        assert!(matches!(&program.main[0].kind, StmtKind::Gosub(l) if l == "SUB3"));
        assert!(matches!(&program.main[2].kind, StmtKind::Label(l) if l == "SUB3"));
        assert!(matches!(&program.main[3].kind, StmtKind::Return(None)));
    }

    #[test]
    fn missing_end_if_reports_and_recovers() {
        let errs = parse_errs("IF a THEN\nPRINT 1\n");
        assert!(errs.iter().any(|e| e.expected.contains("end of block")));
    }

    #[test]
    fn error_recovery_collects_multiple() {
        let errs = parse_errs("PRINT +\nGOTO\nPRINT 1");
        assert!(errs.len() >= 2);
    }

    #[test]
    fn operator_precedence_shape() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let program = parse_ok("x = 1 + 2 * 3");
        let StmtKind::Assign { value, .. } = &program.main[0].kind else {
            panic!();
        };
        let ExprKind::Binary { op: BinOp::Add, rhs, .. } = &value.kind else {
            panic!("expected + at the top");
        };
        assert!(matches!(&rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn power_is_right_associative_and_tight() {
        let program = parse_ok("x = -2 ^ 2");
        // -(2^2): unary minus binds looser than ^.
        let StmtKind::Assign { value, .. } = &program.main[0].kind else {
            panic!();
        };
        assert!(matches!(
            &value.kind,
            ExprKind::Unary { op: UnOp::Neg, .. }
        ));
    }

    #[test]
    fn option_bounds_check() {
        let program = parse_ok("OPTION BOUNDS_CHECK OFF");
        assert!(matches!(
            &program.main[0].kind,
            StmtKind::OptionBoundsCheck(false)
        ));
    }
}
