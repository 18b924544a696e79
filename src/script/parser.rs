// src/script/parser.rs

//! Parser for the script language, built from nom combinators.
//!
//! The grammar is a small Lua subset:
//!
//! ```text
//! block  := { stmt [';'] }
//! stmt   := 'local' name ['=' expr]
//!         | target '=' expr
//!         | 'if' expr 'then' block {'elseif' expr 'then' block} ['else' block] 'end'
//!         | 'for' name '=' expr ',' expr [',' expr] 'do' block 'end'
//!         | 'while' expr 'do' block 'end'
//!         | 'return' [expr]
//!         | call
//! ```
//!
//! Operator precedence, loosest first: `or`, `and`, comparisons, `..`
//! (right associative), `+ -`, `* / %`, unary `not # -`.
//!
//! Nesting is capped at `MAX_NESTING` levels. Every sub-expression, block,
//! prefix operator and link of an operator chain counts, so the compiled tree
//! is never deeper than that and walking it cannot exhaust the stack.

use std::cell::Cell;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{anychar, char, digit1, multispace1, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, recognize, value, verify},
    error::{Error, ErrorKind},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
};

use crate::error::{CommandError, CommandResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Len,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableItem {
    Positional(Expr),
    Named(String, Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Nil,
    Bool(bool),
    Int(i64),
    Str(Vec<u8>),
    Var(String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Table(Vec<TableItem>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }
}

/// Left-hand side of an assignment: a variable plus optional index path.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub path: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Local(String, Option<Expr>),
    Assign(Target, Expr),
    If(Vec<(Expr, Vec<Stmt>)>, Option<Vec<Stmt>>),
    For {
        var: String,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    While(Expr, Vec<Stmt>),
    Return(Option<Expr>),
    Expr(Expr),
}

/// A compiled script.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

/// Compile script source.
pub fn parse_program(src: &str) -> CommandResult<Program> {
    match all_consuming(terminated(block, sp))(src) {
        Ok((_, body)) => Ok(Program { body }),
        Err(nom::Err::Failure(e)) if e.code == ErrorKind::TooLarge => Err(CommandError::Script(format!(
            "Error compiling script: too deeply nested (more than {} levels)",
            MAX_NESTING
        ))),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let near: String = e.input.trim_start().chars().take(20).collect();
            Err(CommandError::Script(format!(
                "Error compiling script: unexpected input near '{}'",
                near
            )))
        }
        Err(nom::Err::Incomplete(_)) => Err(CommandError::Script(
            "Error compiling script: unexpected end of input".into(),
        )),
    }
}

type PResult<'a, T> = IResult<&'a str, T>;

pub const MAX_NESTING: usize = 100;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Holds `levels` of nesting until dropped.
struct Nesting {
    levels: usize,
}

impl Nesting {
    fn enter(i: &str) -> Result<Self, nom::Err<Error<&str>>> {
        let mut guard = Nesting { levels: 0 };
        guard.deeper(i)?;
        Ok(guard)
    }

    fn deeper<'a>(&mut self, i: &'a str) -> Result<(), nom::Err<Error<&'a str>>> {
        let depth = DEPTH.with(|d| d.get()) + 1;
        if depth > MAX_NESTING {
            return Err(nom::Err::Failure(Error::new(i, ErrorKind::TooLarge)));
        }
        DEPTH.with(|d| d.set(depth));
        self.levels += 1;
        Ok(())
    }
}

impl Drop for Nesting {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get().saturating_sub(self.levels)));
    }
}

fn nested<'a, T>(mut inner: impl FnMut(&'a str) -> PResult<'a, T>) -> impl FnMut(&'a str) -> PResult<'a, T> {
    move |i: &'a str| {
        let _guard = Nesting::enter(i)?;
        inner(i)
    }
}

/// `operand { op operand }`, folded to the left. Each link nests one level.
fn chain<'a, O, P>(mut operand: O, mut op: P) -> impl FnMut(&'a str) -> PResult<'a, Expr>
where
    O: FnMut(&'a str) -> PResult<'a, Expr>,
    P: FnMut(&'a str) -> PResult<'a, BinOp>,
{
    move |i: &'a str| {
        let (mut i, mut acc) = operand(i)?;
        let mut guard = Nesting { levels: 0 };
        loop {
            let (rest, op) = match op(i) {
                Ok(found) => found,
                Err(nom::Err::Error(_)) => break,
                Err(e) => return Err(e),
            };
            guard.deeper(rest)?;
            let (rest, rhs) = match operand(rest) {
                Ok(found) => found,
                Err(nom::Err::Error(_)) => break,
                Err(e) => return Err(e),
            };
            acc = Expr::binary(op, acc, rhs);
            i = rest;
        }
        Ok((i, acc))
    }
}

const KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// whitespace and `--` line comments
fn sp(i: &str) -> PResult<'_, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), pair(tag("--"), take_while(|c| c != '\n'))),
        ))),
    )(i)
}

fn tok<'a>(t: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    preceded(sp, tag(t))
}

fn kw<'a>(k: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    preceded(sp, terminated(tag(k), not(satisfy(is_ident_char))))
}

fn ident_raw(i: &str) -> PResult<'_, String> {
    map(
        verify(
            recognize(pair(satisfy(is_ident_start), take_while(is_ident_char))),
            |s: &str| !KEYWORDS.contains(&s),
        ),
        String::from,
    )(i)
}

fn ident(i: &str) -> PResult<'_, String> {
    preceded(sp, ident_raw)(i)
}

// `=` but not `==`
fn assign_eq(i: &str) -> PResult<'_, &str> {
    terminated(tok("="), not(char('=')))(i)
}

fn quoted<'a>(q: char) -> impl FnMut(&'a str) -> PResult<'a, Vec<u8>> {
    move |i: &'a str| {
        let open: PResult<'a, char> = char(q)(i);
        let (mut rest, _) = open?;
        let mut out = String::new();
        loop {
            let next: PResult<'a, char> = anychar(rest);
            let (r, c) = next?;
            rest = r;
            if c == q {
                return Ok((rest, out.into_bytes()));
            }
            if c == '\\' {
                let escaped: PResult<'a, char> = anychar(rest);
                let (r, esc) = escaped?;
                rest = r;
                out.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
            } else {
                out.push(c);
            }
        }
    }
}

fn string_lit(i: &str) -> PResult<'_, Vec<u8>> {
    preceded(sp, alt((quoted('"'), quoted('\''))))(i)
}

fn number(i: &str) -> PResult<'_, i64> {
    preceded(sp, map_res(digit1, str::parse::<i64>))(i)
}

// ---- expressions ----

pub(crate) fn expr(i: &str) -> PResult<'_, Expr> {
    nested(or_expr)(i)
}

fn or_expr(i: &str) -> PResult<'_, Expr> {
    chain(and_expr, value(BinOp::Or, kw("or")))(i)
}

fn and_expr(i: &str) -> PResult<'_, Expr> {
    chain(comparison, value(BinOp::And, kw("and")))(i)
}

fn comparison_op(i: &str) -> PResult<'_, BinOp> {
    alt((
        value(BinOp::Le, tok("<=")),
        value(BinOp::Ge, tok(">=")),
        value(BinOp::Eq, tok("==")),
        value(BinOp::Ne, tok("~=")),
        value(BinOp::Ne, tok("!=")),
        value(BinOp::Lt, tok("<")),
        value(BinOp::Gt, tok(">")),
    ))(i)
}

fn comparison(i: &str) -> PResult<'_, Expr> {
    chain(concat, comparison_op)(i)
}

fn concat(i: &str) -> PResult<'_, Expr> {
    let (i, lhs) = additive(i)?;
    let (i, rhs) = opt(preceded(tok(".."), nested(concat)))(i)?;
    Ok((
        i,
        match rhs {
            Some(rhs) => Expr::binary(BinOp::Concat, lhs, rhs),
            None => lhs,
        },
    ))
}

fn additive(i: &str) -> PResult<'_, Expr> {
    chain(
        multiplicative,
        alt((value(BinOp::Add, tok("+")), value(BinOp::Sub, tok("-")))),
    )(i)
}

fn multiplicative(i: &str) -> PResult<'_, Expr> {
    chain(
        unary,
        alt((
            value(BinOp::Mul, tok("*")),
            value(BinOp::Div, tok("/")),
            value(BinOp::Mod, tok("%")),
        )),
    )(i)
}

fn unary(i: &str) -> PResult<'_, Expr> {
    alt((
        map(preceded(kw("not"), nested(unary)), |e| Expr::Unary(UnOp::Not, Box::new(e))),
        map(preceded(tok("#"), nested(unary)), |e| Expr::Unary(UnOp::Len, Box::new(e))),
        map(preceded(tok("-"), nested(unary)), |e| Expr::Unary(UnOp::Neg, Box::new(e))),
        postfix,
    ))(i)
}

// `[expr]` or `.name` (but not `..`)
fn index_suffix(i: &str) -> PResult<'_, Expr> {
    alt((
        delimited(tok("["), expr, tok("]")),
        map(preceded(terminated(tok("."), not(char('.'))), ident_raw), |name| {
            Expr::Str(name.into_bytes())
        }),
    ))(i)
}

fn postfix(i: &str) -> PResult<'_, Expr> {
    let (mut i, mut acc) = primary(i)?;
    let mut guard = Nesting { levels: 0 };
    loop {
        let (rest, key) = match index_suffix(i) {
            Ok(found) => found,
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        };
        guard.deeper(rest)?;
        acc = Expr::Index(Box::new(acc), Box::new(key));
        i = rest;
    }
    Ok((i, acc))
}

// `name(args)` or `redis.call(args)`
fn call(i: &str) -> PResult<'_, Expr> {
    map(
        pair(
            pair(ident, many0(preceded(char('.'), ident_raw))),
            delimited(tok("("), separated_list0(tok(","), expr), tok(")")),
        ),
        |((head, rest), args)| {
            let mut name = head;
            for part in rest {
                name.push('.');
                name.push_str(&part);
            }
            Expr::Call(name, args)
        },
    )(i)
}

fn table_item(i: &str) -> PResult<'_, TableItem> {
    alt((
        map(pair(terminated(ident, assign_eq), expr), |(k, v)| TableItem::Named(k, v)),
        map(expr, TableItem::Positional),
    ))(i)
}

fn table(i: &str) -> PResult<'_, Expr> {
    map(
        delimited(
            tok("{"),
            terminated(
                separated_list0(alt((tok(","), tok(";"))), table_item),
                opt(alt((tok(","), tok(";")))),
            ),
            tok("}"),
        ),
        Expr::Table,
    )(i)
}

fn primary(i: &str) -> PResult<'_, Expr> {
    alt((
        value(Expr::Nil, kw("nil")),
        value(Expr::Bool(true), kw("true")),
        value(Expr::Bool(false), kw("false")),
        map(number, Expr::Int),
        map(string_lit, Expr::Str),
        table,
        call,
        map(ident, Expr::Var),
        delimited(tok("("), expr, tok(")")),
    ))(i)
}

// ---- statements ----

fn block(i: &str) -> PResult<'_, Vec<Stmt>> {
    nested(many0(terminated(stmt, opt(tok(";")))))(i)
}

fn stmt(i: &str) -> PResult<'_, Stmt> {
    alt((
        local_stmt,
        if_stmt,
        for_stmt,
        while_stmt,
        return_stmt,
        assign_stmt,
        map(call, Stmt::Expr),
    ))(i)
}

fn local_stmt(i: &str) -> PResult<'_, Stmt> {
    map(
        pair(preceded(kw("local"), ident), opt(preceded(assign_eq, expr))),
        |(name, init)| Stmt::Local(name, init),
    )(i)
}

fn if_stmt(i: &str) -> PResult<'_, Stmt> {
    map(
        tuple((
            preceded(kw("if"), expr),
            preceded(kw("then"), block),
            many0(pair(preceded(kw("elseif"), expr), preceded(kw("then"), block))),
            opt(preceded(kw("else"), block)),
            kw("end"),
        )),
        |(cond, body, elifs, otherwise, _)| {
            let mut arms = vec![(cond, body)];
            arms.extend(elifs);
            Stmt::If(arms, otherwise)
        },
    )(i)
}

fn for_stmt(i: &str) -> PResult<'_, Stmt> {
    map(
        tuple((
            preceded(kw("for"), ident),
            preceded(assign_eq, expr),
            preceded(tok(","), expr),
            opt(preceded(tok(","), expr)),
            delimited(kw("do"), block, kw("end")),
        )),
        |(var, start, end, step, body)| Stmt::For { var, start, end, step, body },
    )(i)
}

fn while_stmt(i: &str) -> PResult<'_, Stmt> {
    map(
        pair(preceded(kw("while"), expr), delimited(kw("do"), block, kw("end"))),
        |(cond, body)| Stmt::While(cond, body),
    )(i)
}

fn return_stmt(i: &str) -> PResult<'_, Stmt> {
    map(preceded(kw("return"), opt(expr)), Stmt::Return)(i)
}

fn assign_stmt(i: &str) -> PResult<'_, Stmt> {
    map(
        tuple((ident, many0(index_suffix), assign_eq, expr)),
        |(name, path, _, rhs)| Stmt::Assign(Target { name, path }, rhs),
    )(i)
}
