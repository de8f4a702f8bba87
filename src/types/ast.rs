//! AST representing a template.

use std::collections::BTreeMap;

use crate::types::span::Span;
use crate::Value;

/// The result of parsing a template source.
#[derive(Debug)]
pub struct Template {
    pub scope: Scope,
    pub parent: Option<Str>,
    pub blocks: BTreeMap<String, Block>,
    pub macros: BTreeMap<String, Macro>,
    pub includes: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Scope {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug)]
pub enum Stmt {
    Raw(Span),
    InlineExpr(InlineExpr),
    IfElse(IfElse),
    ForLoop(ForLoop),
    Set(Set),
    SetBlock(SetBlock),
    With(With),
    Block(BlockRef),
    Include(Include),
    CallBlock(CallBlock),
}

#[derive(Debug)]
pub struct InlineExpr {
    pub expr: Expr,
    pub span: Span,
}

#[derive(Debug)]
pub struct IfElse {
    pub cond: Expr,
    pub then_branch: Scope,
    pub else_branch: Option<Scope>,
}

#[derive(Debug)]
pub struct ForLoop {
    pub vars: LoopVars,
    pub iterable: Expr,
    pub body: Scope,
    pub else_branch: Option<Scope>,
    pub span: Span,
}

#[derive(Debug)]
pub enum LoopVars {
    Item(Ident),
    KeyValue(KeyValue),
}

#[derive(Debug)]
pub struct KeyValue {
    pub key: Ident,
    pub value: Ident,
    pub span: Span,
}

#[derive(Debug)]
pub struct Set {
    pub name: Ident,
    pub expr: Expr,
}

#[derive(Debug)]
pub struct SetBlock {
    pub name: Ident,
    pub body: Scope,
}

#[derive(Debug)]
pub struct With {
    pub assigns: Vec<(Ident, Expr)>,
    pub body: Scope,
}

/// Marks the position of a named block in the template body, the body
/// itself lives in [`Template::blocks`].
#[derive(Debug)]
pub struct BlockRef {
    pub name: Ident,
}

#[derive(Debug)]
pub struct Block {
    pub name: Ident,
    pub body: Scope,
    pub span: Span,
}

#[derive(Debug)]
pub struct Include {
    pub name: Str,
    pub ignore_missing: bool,
    pub span: Span,
}

#[derive(Debug)]
pub struct Macro {
    pub name: Ident,
    pub params: Vec<Param>,
    pub body: Scope,
    pub span: Span,
}

#[derive(Debug)]
pub struct Param {
    pub name: Ident,
    pub default: Option<Expr>,
}

#[derive(Debug)]
pub struct CallBlock {
    pub call: Call,
    pub params: Vec<Param>,
    pub body: Scope,
    pub span: Span,
}

/// A string literal used where only a constant is allowed, e.g. template
/// names in `extends` and `include`.
#[derive(Debug, Clone)]
pub struct Str {
    pub value: String,
    pub span: Span,
}

#[derive(Debug)]
pub enum Expr {
    Literal(Literal),
    Var(Var),
    Attr(Attr),
    Item(Item),
    Call(Call),
    Filter(Filter),
    Test(Test),
    Unary(Unary),
    Binary(Binary),
    Cond(Cond),
    List(List),
    Map(Map),
}

#[derive(Debug)]
pub struct Literal {
    pub value: Value,
    pub span: Span,
}

#[derive(Debug)]
pub struct Var {
    pub name: Ident,
}

#[derive(Debug)]
pub struct Attr {
    pub base: Box<Expr>,
    pub name: Ident,
    pub span: Span,
}

#[derive(Debug)]
pub struct Item {
    pub base: Box<Expr>,
    pub index: Box<Expr>,
    pub span: Span,
}

#[derive(Debug)]
pub struct Call {
    pub callee: Box<Expr>,
    pub args: Args,
    pub span: Span,
}

#[derive(Debug)]
pub struct Filter {
    pub receiver: Box<Expr>,
    pub name: Ident,
    pub args: Args,
    pub span: Span,
}

#[derive(Debug)]
pub struct Test {
    pub receiver: Box<Expr>,
    pub name: Ident,
    pub args: Args,
    pub negated: bool,
    pub span: Span,
}

#[derive(Debug, Default)]
pub struct Args {
    pub values: Vec<Expr>,
    pub kwargs: Vec<(Ident, Expr)>,
    pub span: Span,
}

#[derive(Debug)]
pub struct Unary {
    pub op: UnaryOp,
    pub expr: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug)]
pub struct Binary {
    pub op: BinaryOp,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
}

#[derive(Debug)]
pub struct Cond {
    pub cond: Box<Expr>,
    pub then: Box<Expr>,
    pub otherwise: Option<Box<Expr>>,
    pub span: Span,
}

#[derive(Debug)]
pub struct List {
    pub items: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug)]
pub struct Map {
    pub items: Vec<(Expr, Expr)>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Scope {
    pub const fn new() -> Self {
        Self { stmts: Vec::new() }
    }
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Self::Literal(lit) => lit.span,
            Self::Var(var) => var.name.span,
            Self::Attr(attr) => attr.span,
            Self::Item(item) => item.span,
            Self::Call(call) => call.span,
            Self::Filter(filter) => filter.span,
            Self::Test(test) => test.span,
            Self::Unary(unary) => unary.span,
            Self::Binary(binary) => binary.span,
            Self::Cond(cond) => cond.span,
            Self::List(list) => list.span,
            Self::Map(map) => map.span,
        }
    }
}

impl Ident {
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl BinaryOp {
    pub fn human(&self) -> &'static str {
        match self {
            Self::Or => "or",
            Self::And => "and",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Concat => "~",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Rem => "%",
        }
    }
}
