//! Recursive-descent parser producing [`Program`] trees.
//!
//! Every failure is a `SyntaxError` diagnostic; unsupported language features
//! are named in the message so a learner knows what to change.

use crate::config::types::{FaultDiagnostic, FaultKind};
use crate::script::ast::*;
use crate::script::lexer::{tokenize, Keyword, Op, Token, TokenKind};
use std::rc::Rc;

/// Bound on syntactic nesting: blocks, brackets and operator chains all count
pub const MAX_NESTING_DEPTH: usize = 64;

type ParseResult<T> = Result<T, FaultDiagnostic>;

/// Tokenize and parse a whole program
pub fn parse(source: &str) -> ParseResult<Program> {
    let tokens = tokenize(source).map_err(|e| {
        FaultDiagnostic::new(FaultKind::SyntaxError, e.kind.to_string(), Some(e.line))
    })?;
    Parser::new(tokens).program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    /// Enclosing loops within the current function body
    loops: usize,
    in_function: bool,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            loops: 0,
            in_function: false,
        }
    }

    fn program(mut self) -> ParseResult<Program> {
        let mut body = Vec::new();
        while !self.at_end() {
            if self.peek() == &TokenKind::Indent {
                return Err(self.error("unexpected indent"));
            }
            body.extend(self.statement()?);
        }
        Ok(Program { body })
    }

    // ---- token helpers ----

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        let idx = (self.pos + ahead).min(self.tokens.len().saturating_sub(1));
        self.tokens
            .get(idx)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::EndOfInput)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn at_end(&self) -> bool {
        self.peek() == &TokenKind::EndOfInput
    }

    fn bump(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if !self.at_end() {
            self.pos += 1;
        }
        kind
    }

    fn at_op(&self, op: Op) -> bool {
        self.peek() == &TokenKind::Op(op)
    }

    fn eat_op(&mut self, op: Op) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: Op) -> ParseResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected '{}' but found {}",
                op.as_str(),
                self.peek().describe()
            )))
        }
    }

    fn at_keyword(&self, kw: Keyword) -> bool {
        self.peek() == &TokenKind::Keyword(kw)
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> FaultDiagnostic {
        FaultDiagnostic::new(FaultKind::SyntaxError, message, Some(self.line()))
    }

    fn unexpected(&self) -> FaultDiagnostic {
        match self.peek() {
            TokenKind::Keyword(kw) if !is_supported_keyword(*kw) => self.unsupported_keyword(*kw),
            TokenKind::Indent => self.error("unexpected indent"),
            other => self.error(format!("invalid syntax near {}", other.describe())),
        }
    }

    fn unsupported_keyword(&self, kw: Keyword) -> FaultDiagnostic {
        self.error(format!("'{}' is not supported", kw.as_str()))
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(self.error("nesting is too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.leave_n(1);
    }

    fn leave_n(&mut self, n: usize) {
        self.depth = self.depth.saturating_sub(n);
    }

    // ---- statements ----

    fn statement(&mut self) -> ParseResult<Vec<Stmt>> {
        match self.peek() {
            TokenKind::Keyword(Keyword::If) => Ok(vec![self.if_statement()?]),
            TokenKind::Keyword(Keyword::While) => Ok(vec![self.while_statement()?]),
            TokenKind::Keyword(Keyword::For) => Ok(vec![self.for_statement()?]),
            TokenKind::Keyword(Keyword::Def) => Ok(vec![self.function_def()?]),
            TokenKind::Keyword(Keyword::Elif) | TokenKind::Keyword(Keyword::Else) => {
                Err(self.unexpected())
            }
            _ => self.simple_line(),
        }
    }

    /// `;`-separated simple statements terminated by a newline
    fn simple_line(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = vec![self.simple_statement()?];
        while self.eat_op(Op::Semicolon) {
            if matches!(self.peek(), TokenKind::Newline | TokenKind::EndOfInput) {
                break;
            }
            stmts.push(self.simple_statement()?);
        }
        match self.peek() {
            TokenKind::Newline => {
                self.pos += 1;
                Ok(stmts)
            }
            TokenKind::EndOfInput => Ok(stmts),
            _ => Err(self.unexpected()),
        }
    }

    fn simple_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        let kind = match self.peek() {
            TokenKind::Keyword(Keyword::Pass) => {
                self.pos += 1;
                StmtKind::Pass
            }
            TokenKind::Keyword(Keyword::Break) => {
                if self.loops == 0 {
                    return Err(self.error("'break' outside loop"));
                }
                self.pos += 1;
                StmtKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                if self.loops == 0 {
                    return Err(self.error("'continue' not properly in loop"));
                }
                self.pos += 1;
                StmtKind::Continue
            }
            TokenKind::Keyword(Keyword::Return) => {
                if !self.in_function {
                    return Err(self.error("'return' outside function"));
                }
                self.pos += 1;
                if matches!(
                    self.peek(),
                    TokenKind::Newline | TokenKind::EndOfInput | TokenKind::Op(Op::Semicolon)
                ) {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.expression()?))
                }
            }
            TokenKind::Keyword(kw) if !is_expression_keyword(*kw) => {
                return Err(self.unexpected());
            }
            _ => self.expression_statement()?,
        };
        Ok(Stmt { kind, line })
    }

    fn expression_statement(&mut self) -> ParseResult<StmtKind> {
        let first = self.expression()?;

        if self.at_op(Op::Assign) {
            let mut targets = vec![to_target(first)?];
            loop {
                self.pos += 1;
                let value = self.expression()?;
                if self.at_op(Op::Assign) {
                    targets.push(to_target(value)?);
                } else {
                    return Ok(StmtKind::Assign { targets, value });
                }
            }
        }

        if let TokenKind::Op(op) = self.peek() {
            if let Some(bin) = augmented_op(*op) {
                let target = to_target(first)?;
                self.pos += 1;
                let value = self.expression()?;
                return Ok(StmtKind::AugAssign {
                    target,
                    op: bin,
                    value,
                });
            }
        }

        Ok(StmtKind::Expr(first))
    }

    /// `:` followed by an indented block or a same-line simple statement list
    fn suite(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect_op(Op::Colon)?;
        self.enter()?;
        let body = self.block();
        self.leave();
        body
    }

    fn loop_suite(&mut self) -> ParseResult<Vec<Stmt>> {
        self.loops += 1;
        let body = self.suite();
        self.loops -= 1;
        body
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        if self.peek() != &TokenKind::Newline {
            return self.simple_line();
        }
        self.pos += 1;
        if self.peek() != &TokenKind::Indent {
            return Err(self.error("expected an indented block"));
        }
        self.pos += 1;

        let mut body = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Dedent => {
                    self.pos += 1;
                    break;
                }
                TokenKind::EndOfInput => break,
                TokenKind::Indent => return Err(self.error("unexpected indent")),
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        self.pos += 1;
        let mut branches = Vec::new();
        let test = self.expression()?;
        let body = self.suite()?;
        branches.push((test, body));

        let mut orelse = Vec::new();
        loop {
            if self.eat_keyword(Keyword::Elif) {
                let test = self.expression()?;
                let body = self.suite()?;
                branches.push((test, body));
            } else if self.eat_keyword(Keyword::Else) {
                orelse = self.suite()?;
                break;
            } else {
                break;
            }
        }

        Ok(Stmt {
            kind: StmtKind::If { branches, orelse },
            line,
        })
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        self.pos += 1;
        let test = self.expression()?;
        let body = self.loop_suite()?;
        if self.at_keyword(Keyword::Else) {
            return Err(self.error("'while ... else' is not supported"));
        }
        Ok(Stmt {
            kind: StmtKind::While { test, body },
            line,
        })
    }

    fn for_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        self.pos += 1;
        let var = match self.bump() {
            TokenKind::Name(name) => name,
            _ => return Err(self.error("for-loop variable must be a single name")),
        };
        if !self.eat_keyword(Keyword::In) {
            return Err(self.error("expected 'in' after the for-loop variable"));
        }
        let iter = self.expression()?;
        let body = self.loop_suite()?;
        if self.at_keyword(Keyword::Else) {
            return Err(self.error("'for ... else' is not supported"));
        }
        Ok(Stmt {
            kind: StmtKind::For { var, iter, body },
            line,
        })
    }

    fn function_def(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        self.pos += 1;
        let name = match self.bump() {
            TokenKind::Name(name) => name,
            _ => return Err(self.error("expected a function name after 'def'")),
        };

        self.expect_op(Op::LParen)?;
        let mut params: Vec<String> = Vec::new();
        while !self.at_op(Op::RParen) {
            match self.bump() {
                TokenKind::Name(param) => {
                    if params.contains(&param) {
                        return Err(self.error(format!(
                            "duplicate argument '{}' in function definition",
                            param
                        )));
                    }
                    params.push(param);
                }
                TokenKind::Op(Op::Star) | TokenKind::Op(Op::DoubleStar) => {
                    return Err(self.error("variable argument lists are not supported"));
                }
                _ => return Err(self.error("expected a parameter name")),
            }
            if self.at_op(Op::Assign) {
                return Err(self.error("default parameter values are not supported"));
            }
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        self.expect_op(Op::RParen)?;

        let outer = (self.loops, self.in_function);
        self.loops = 0;
        self.in_function = true;
        let body = self.suite();
        (self.loops, self.in_function) = outer;
        let body = body?;
        Ok(Stmt {
            kind: StmtKind::FunctionDef(Rc::new(FunctionDef {
                name,
                params,
                body,
                line,
            })),
            line,
        })
    }

    // ---- expressions, lowest precedence first ----

    fn expression(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let expr = self.conditional();
        self.leave();
        expr
    }

    fn conditional(&mut self) -> ParseResult<Expr> {
        let body = self.or_test()?;
        if !self.at_keyword(Keyword::If) {
            return Ok(body);
        }
        let line = self.line();
        self.pos += 1;
        let test = self.or_test()?;
        if !self.eat_keyword(Keyword::Else) {
            return Err(self.error("expected 'else' in conditional expression"));
        }
        let orelse = self.expression()?;
        Ok(Expr {
            kind: ExprKind::Conditional {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            line,
        })
    }

    fn or_test(&mut self) -> ParseResult<Expr> {
        let mut left = self.and_test()?;
        let mut chain = 0;
        while self.at_keyword(Keyword::Or) {
            let line = self.line();
            self.pos += 1;
            self.enter()?;
            chain += 1;
            let right = self.and_test()?;
            left = Expr {
                kind: ExprKind::Logical {
                    op: BoolOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            };
        }
        self.leave_n(chain);
        Ok(left)
    }

    fn and_test(&mut self) -> ParseResult<Expr> {
        let mut left = self.not_test()?;
        let mut chain = 0;
        while self.at_keyword(Keyword::And) {
            let line = self.line();
            self.pos += 1;
            self.enter()?;
            chain += 1;
            let right = self.not_test()?;
            left = Expr {
                kind: ExprKind::Logical {
                    op: BoolOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            };
        }
        self.leave_n(chain);
        Ok(left)
    }

    fn not_test(&mut self) -> ParseResult<Expr> {
        if !self.at_keyword(Keyword::Not) {
            return self.comparison();
        }
        let line = self.line();
        self.pos += 1;
        self.enter()?;
        let operand = self.not_test();
        self.leave();
        Ok(Expr {
            kind: ExprKind::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand?),
            },
            line,
        })
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let first = self.arith()?;
        let line = first.line;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                TokenKind::Op(Op::Eq) => CompareOp::Eq,
                TokenKind::Op(Op::NotEq) => CompareOp::NotEq,
                TokenKind::Op(Op::Lt) => CompareOp::Lt,
                TokenKind::Op(Op::LtE) => CompareOp::LtE,
                TokenKind::Op(Op::Gt) => CompareOp::Gt,
                TokenKind::Op(Op::GtE) => CompareOp::GtE,
                TokenKind::Keyword(Keyword::In) => CompareOp::In,
                TokenKind::Keyword(Keyword::Not)
                    if self.peek_at(1) == &TokenKind::Keyword(Keyword::In) =>
                {
                    self.pos += 1;
                    CompareOp::NotIn
                }
                TokenKind::Keyword(Keyword::Is) => {
                    if self.peek_at(1) == &TokenKind::Keyword(Keyword::Not) {
                        self.pos += 1;
                        CompareOp::IsNot
                    } else {
                        CompareOp::Is
                    }
                }
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.arith()?));
        }
        if rest.len() > MAX_NESTING_DEPTH {
            return Err(self.error("nesting is too deep"));
        }

        if rest.is_empty() {
            return Ok(first);
        }
        Ok(Expr {
            kind: ExprKind::Compare {
                first: Box::new(first),
                rest,
            },
            line,
        })
    }

    fn arith(&mut self) -> ParseResult<Expr> {
        let mut left = self.term()?;
        let mut chain = 0;
        loop {
            let op = match self.peek() {
                TokenKind::Op(Op::Plus) => BinaryOp::Add,
                TokenKind::Op(Op::Minus) => BinaryOp::Sub,
                _ => break,
            };
            let line = self.line();
            self.pos += 1;
            self.enter()?;
            chain += 1;
            let right = self.term()?;
            left = binary(op, left, right, line);
        }
        self.leave_n(chain);
        Ok(left)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let mut left = self.factor()?;
        let mut chain = 0;
        loop {
            let op = match self.peek() {
                TokenKind::Op(Op::Star) => BinaryOp::Mul,
                TokenKind::Op(Op::Slash) => BinaryOp::Div,
                TokenKind::Op(Op::DoubleSlash) => BinaryOp::FloorDiv,
                TokenKind::Op(Op::Percent) => BinaryOp::Mod,
                _ => break,
            };
            let line = self.line();
            self.pos += 1;
            self.enter()?;
            chain += 1;
            let right = self.factor()?;
            left = binary(op, left, right, line);
        }
        self.leave_n(chain);
        Ok(left)
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let op = match self.peek() {
            TokenKind::Op(Op::Minus) => UnaryOp::Neg,
            TokenKind::Op(Op::Plus) => UnaryOp::Pos,
            TokenKind::Op(Op::Tilde) => return Err(self.error("'~' is not supported")),
            _ => return self.power(),
        };
        let line = self.line();
        self.pos += 1;
        self.enter()?;
        let operand = self.factor();
        self.leave();
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand?),
            },
            line,
        })
    }

    fn power(&mut self) -> ParseResult<Expr> {
        let base = self.postfix()?;
        if !self.at_op(Op::DoubleStar) {
            return Ok(base);
        }
        let line = self.line();
        self.pos += 1;
        self.enter()?;
        let exponent = self.factor();
        self.leave();
        Ok(binary(BinaryOp::Pow, base, exponent?, line))
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.atom()?;
        let mut chain = 0;
        let result = loop {
            let next = match self.peek() {
                TokenKind::Op(Op::LParen) => {
                    self.enter()?;
                    self.call(expr)
                }
                TokenKind::Op(Op::LBracket) => {
                    self.enter()?;
                    self.subscript(expr)
                }
                TokenKind::Op(Op::Dot) => {
                    break Err(self.error("attribute access is not supported"))
                }
                _ => break Ok(expr),
            };
            chain += 1;
            expr = next?;
        };
        self.leave_n(chain);
        result
    }

    fn call(&mut self, func: Expr) -> ParseResult<Expr> {
        let line = self.line();
        self.pos += 1;
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();

        while !self.at_op(Op::RParen) {
            if matches!(self.peek(), TokenKind::Op(Op::Star) | TokenKind::Op(Op::DoubleStar)) {
                return Err(self.error("argument unpacking is not supported"));
            }
            let keyword = match (self.peek(), self.peek_at(1)) {
                (TokenKind::Name(name), TokenKind::Op(Op::Assign)) => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = keyword {
                self.pos += 2;
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                let value = self.expression()?;
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.expression()?;
                if self.at_keyword(Keyword::For) {
                    return Err(self.error("generator expressions are not supported"));
                }
                args.push(arg);
            }
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        self.expect_op(Op::RParen)?;

        Ok(Expr {
            kind: ExprKind::Call {
                func: Box::new(func),
                args,
                kwargs,
            },
            line,
        })
    }

    fn subscript(&mut self, target: Expr) -> ParseResult<Expr> {
        let line = self.line();
        self.pos += 1;

        let lower = if self.at_op(Op::Colon) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };

        if !self.eat_op(Op::Colon) {
            self.expect_op(Op::RBracket)?;
            let index = lower.ok_or_else(|| self.error("empty subscript"))?;
            return Ok(Expr {
                kind: ExprKind::Index {
                    target: Box::new(target),
                    index,
                },
                line,
            });
        }

        let upper = if self.at_op(Op::Colon) || self.at_op(Op::RBracket) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        let mut step = None;
        if self.eat_op(Op::Colon) && !self.at_op(Op::RBracket) {
            step = Some(Box::new(self.expression()?));
        }
        self.expect_op(Op::RBracket)?;

        Ok(Expr {
            kind: ExprKind::Slice {
                target: Box::new(target),
                lower,
                upper,
                step,
            },
            line,
        })
    }

    fn atom(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let kind = match self.peek().clone() {
            TokenKind::Name(name) => {
                self.pos += 1;
                ExprKind::Name(name)
            }
            TokenKind::Int(v) => {
                self.pos += 1;
                ExprKind::Int(v)
            }
            TokenKind::Float(v) => {
                self.pos += 1;
                ExprKind::Float(v)
            }
            TokenKind::Str(first) => {
                self.pos += 1;
                let mut text = first;
                while let TokenKind::Str(next) = self.peek() {
                    text.push_str(next);
                    self.pos += 1;
                }
                ExprKind::Str(text)
            }
            TokenKind::Keyword(Keyword::True) => {
                self.pos += 1;
                ExprKind::Bool(true)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.pos += 1;
                ExprKind::Bool(false)
            }
            TokenKind::Keyword(Keyword::None) => {
                self.pos += 1;
                ExprKind::None
            }
            TokenKind::Op(Op::LParen) => {
                self.pos += 1;
                if self.at_op(Op::RParen) {
                    return Err(self.error("tuples are not supported"));
                }
                let inner = self.expression()?;
                if self.at_op(Op::Comma) {
                    return Err(self.error("tuples are not supported"));
                }
                if self.at_keyword(Keyword::For) {
                    return Err(self.error("generator expressions are not supported"));
                }
                self.expect_op(Op::RParen)?;
                return Ok(inner);
            }
            TokenKind::Op(Op::LBracket) => {
                self.pos += 1;
                ExprKind::List(self.list_items()?)
            }
            TokenKind::Op(Op::LBrace) => {
                return Err(self.error("dictionaries and sets are not supported"))
            }
            _ => return Err(self.unexpected()),
        };
        Ok(Expr { kind, line })
    }

    fn list_items(&mut self) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.at_op(Op::RBracket) {
            items.push(self.expression()?);
            if self.at_keyword(Keyword::For) {
                return Err(self.error("list comprehensions are not supported"));
            }
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        self.expect_op(Op::RBracket)?;
        Ok(items)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr, line: usize) -> Expr {
    Expr {
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        line,
    }
}

fn augmented_op(op: Op) -> Option<BinaryOp> {
    match op {
        Op::PlusAssign => Some(BinaryOp::Add),
        Op::MinusAssign => Some(BinaryOp::Sub),
        Op::StarAssign => Some(BinaryOp::Mul),
        Op::SlashAssign => Some(BinaryOp::Div),
        Op::DoubleSlashAssign => Some(BinaryOp::FloorDiv),
        Op::PercentAssign => Some(BinaryOp::Mod),
        Op::DoubleStarAssign => Some(BinaryOp::Pow),
        _ => None,
    }
}

fn to_target(expr: Expr) -> ParseResult<Target> {
    let line = expr.line;
    match expr.kind {
        ExprKind::Name(name) => Ok(Target::Name(name)),
        ExprKind::Index { target, index } => Ok(Target::Index {
            target: *target,
            index: *index,
        }),
        other => {
            let what = match other {
                ExprKind::Call { .. } => "function call",
                ExprKind::Slice { .. } => "slice",
                ExprKind::None
                | ExprKind::Bool(_)
                | ExprKind::Int(_)
                | ExprKind::Float(_)
                | ExprKind::Str(_) => "literal",
                _ => "expression",
            };
            Err(FaultDiagnostic::new(
                FaultKind::SyntaxError,
                format!("cannot assign to {}", what),
                Some(line),
            ))
        }
    }
}

/// Keywords that can begin an expression
fn is_expression_keyword(kw: Keyword) -> bool {
    matches!(
        kw,
        Keyword::True | Keyword::False | Keyword::None | Keyword::Not
    )
}

fn is_supported_keyword(kw: Keyword) -> bool {
    matches!(
        kw,
        Keyword::True
            | Keyword::False
            | Keyword::None
            | Keyword::And
            | Keyword::Or
            | Keyword::Not
            | Keyword::In
            | Keyword::Is
            | Keyword::If
            | Keyword::Elif
            | Keyword::Else
            | Keyword::While
            | Keyword::For
            | Keyword::Break
            | Keyword::Continue
            | Keyword::Pass
            | Keyword::Def
            | Keyword::Return
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        parse(source).unwrap_or_else(|e| panic!("{source:?}: {e}"))
    }

    fn parse_err(source: &str) -> FaultDiagnostic {
        let err = parse(source).expect_err("expected a syntax error");
        assert_eq!(err.kind, FaultKind::SyntaxError);
        err
    }

    #[test]
    fn test_empty_program() {
        assert!(parse_ok("").body.is_empty());
        assert!(parse_ok("\n\n# only a comment\n").body.is_empty());
    }

    #[test]
    fn test_precedence() {
        let program = parse_ok("x = 1 + 2 * 3 ** 2");
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { op, right, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let program = parse_ok("-2 ** 2");
        let StmtKind::Expr(expr) = &program.body[0].kind else {
            panic!("expected expression");
        };
        assert!(matches!(expr.kind, ExprKind::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn test_compound_statements() {
        let program = parse_ok(
            "def f(a, b):\n    if a > b:\n        return a\n    elif a == b:\n        return 0\n    else:\n        return b\nfor i in range(3): print(i)\nwhile False: pass\n",
        );
        assert_eq!(program.body.len(), 3);
        let StmtKind::FunctionDef(def) = &program.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(def.params, vec!["a", "b"]);
        let StmtKind::If { branches, orelse } = &def.body[0].kind else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(orelse.len(), 1);
    }

    #[test]
    fn test_semicolons_and_chained_assignment() {
        let program = parse_ok("a = b = 1; c = 2;\n");
        assert_eq!(program.body.len(), 2);
        let StmtKind::Assign { targets, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_chained_comparison_and_membership() {
        let program = parse_ok("ok = 1 < x <= 3 and y not in items and z is not None");
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Logical { op: BoolOp::And, .. }));
    }

    #[test]
    fn test_slices_and_keyword_arguments() {
        parse_ok("print(s[1:], s[:2], s[::-1], sep='-', end='')");
    }

    #[test]
    fn test_line_numbers() {
        let program = parse_ok("x = 1\n\ny = 2\n");
        assert_eq!(program.body[1].line, 3);
    }

    #[test]
    fn test_unsupported_features_are_named() {
        assert!(parse_err("x.y").message.contains("attribute access"));
        assert!(parse_err("t = (1, 2)").message.contains("tuples"));
        assert!(parse_err("d = {}").message.contains("dictionaries"));
        assert!(parse_err("[x for x in y]").message.contains("comprehensions"));
        assert!(parse_err("assert x").message.contains("'assert' is not supported"));
        assert!(parse_err("def f(a=1): pass").message.contains("default"));
    }

    #[test]
    fn test_invalid_assignment_targets() {
        assert!(parse_err("f() = 1").message.contains("function call"));
        assert!(parse_err("1 = x").message.contains("literal"));
        assert!(parse_err("s[1:2] = x").message.contains("slice"));
    }

    #[test]
    fn test_block_errors() {
        assert!(parse_err("if x:\nprint(1)").message.contains("indented block"));
        assert!(parse_err("  x = 1").message.contains("unexpected indent"));
        let err = parse_err("x = 1\ny = (\n");
        assert!(err.line.is_some());
    }

    #[test]
    fn test_control_flow_placement() {
        assert_eq!(parse_err("break").message, "'break' outside loop");
        assert!(parse_err("if True: continue").message.contains("not properly in loop"));
        assert_eq!(parse_err("return 1").message, "'return' outside function");
        // A loop outside a function does not license break inside its body.
        assert!(parse_err("while True:\n    def f():\n        break\n").message.contains("outside loop"));
        parse_ok("def f():\n    for i in range(3):\n        if i: break\n    return i\n");
        parse_ok("while True:\n    break\n");
    }

    #[test]
    fn test_lex_errors_become_syntax_errors() {
        let err = parse_err("x = 'abc");
        assert!(err.message.contains("unterminated"));
        assert_eq!(err.line, Some(1));
    }

    #[test]
    fn test_nesting_is_bounded() {
        let deep = format!("x = {}1{}", "(".repeat(100), ")".repeat(100));
        assert!(parse_err(&deep).message.contains("too deep"));

        let ok = format!("x = {}1{}", "(".repeat(20), ")".repeat(20));
        parse_ok(&ok);

        let mut source = String::new();
        for level in 0..80 {
            source.push_str(&" ".repeat(level));
            source.push_str("if True:\n");
        }
        source.push_str(&" ".repeat(80));
        source.push_str("pass\n");
        assert!(parse_err(&source).message.contains("too deep"));

        let long_sum = format!("x = {}1", "1 + ".repeat(200));
        assert!(parse_err(&long_sum).message.contains("too deep"));
        let short_sum = format!("x = {}1", "1 + ".repeat(30));
        parse_ok(&short_sum);
    }
}
