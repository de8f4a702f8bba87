use std::collections::BTreeMap;
use std::fmt::Display;

use crate::compile::lex::{Lexer, Token};
use crate::types::ast;
use crate::types::span::Span;
use crate::{Error, ErrorKind, Result, Value};

/// Rendering and parsing recurse on nesting, anything nested deeper than
/// this is rejected instead of overflowing the stack. The limit applies
/// separately to brackets and unary operators while parsing, to the depth
/// of an expression tree and to open statement blocks.
const MAX_DEPTH: usize = 64;

/// Binding power of `not`, it binds looser than comparisons.
const NOT: u8 = 3;

/// Binding power of `or`, the loosest binary operator.
const OR: u8 = 1;

/// Words that can never be used as variable names.
const RESERVED: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "else", "true", "false", "none", "True", "False", "None",
];

/// A parser that constructs an AST from a token stream.
///
/// The parser is implemented as a simple hand written parser with no
/// recursion for statements. Expressions are parsed by precedence climbing.
#[cfg_attr(internal_debug, derive(Debug))]
pub struct Parser<'source> {
    tokens: Lexer<'source>,
    peeked: Option<Option<(Token, Span)>>,
    depth: usize,
    parent: Option<ast::Str>,
    blocks: BTreeMap<String, ast::Block>,
    macros: BTreeMap<String, ast::Macro>,
    includes: Vec<String>,
}

/// A partial statement that is waiting for its closing tag.
#[cfg_attr(internal_debug, derive(Debug))]
enum State {
    /// A partial `if` statement.
    If {
        /// Whether this is an `elif` which desugars into a nested `if`.
        is_else_if: bool,
        cond: ast::Expr,
        span: Span,
        has_else: bool,
    },

    /// A partial `for` statement.
    For {
        vars: ast::LoopVars,
        iterable: ast::Expr,
        span: Span,
        has_else: bool,
    },

    /// A partial `set` statement capturing its body.
    Set { name: ast::Ident, span: Span },

    /// A partial `with` statement.
    With {
        assigns: Vec<(ast::Ident, ast::Expr)>,
        span: Span,
    },

    /// A partial `block` statement.
    Block { name: ast::Ident, span: Span },

    /// A partial `macro` definition.
    Macro {
        name: ast::Ident,
        params: Vec<ast::Param>,
        span: Span,
    },

    /// A partial `call` statement.
    Call {
        call: ast::Call,
        params: Vec<ast::Param>,
        span: Span,
    },
}

/// The contents of a single `{% ... %}` tag.
#[cfg_attr(internal_debug, derive(Debug))]
enum Tag {
    If(ast::Expr),
    ElseIf(ast::Expr),
    Else,
    EndIf,
    For(ast::LoopVars, ast::Expr),
    EndFor,
    Set(ast::Ident, ast::Expr),
    SetBlock(ast::Ident),
    EndSet,
    With(Vec<(ast::Ident, ast::Expr)>),
    EndWith,
    Block(ast::Ident),
    EndBlock(Option<ast::Ident>),
    Extends(ast::Str),
    Include(ast::Str, bool),
    Macro(ast::Ident, Vec<ast::Param>),
    EndMacro(Option<ast::Ident>),
    Call(Vec<ast::Param>, ast::Call),
    EndCall,
}

/// A statement keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    If,
    Elif,
    Else,
    EndIf,
    For,
    EndFor,
    Set,
    EndSet,
    With,
    EndWith,
    Block,
    EndBlock,
    Extends,
    Include,
    Macro,
    EndMacro,
    Call,
    EndCall,
    Raw,
    EndRaw,
}

#[derive(Clone, Copy)]
enum Sign {
    Pos,
    Neg,
}

impl<'source> Parser<'source> {
    /// Construct a new parser.
    pub fn new(source: &'source str) -> Self {
        Self {
            tokens: Lexer::new(source),
            peeked: None,
            depth: 0,
            parent: None,
            blocks: BTreeMap::new(),
            macros: BTreeMap::new(),
            includes: Vec::new(),
        }
    }

    /// Parses a template.
    ///
    /// This function works using two stacks:
    /// - A stack of blocks e.g. `{% if cond %} ... {% else %}`.
    /// - A stack of scopes which collect each parsed statement.
    pub fn parse_template(mut self) -> Result<ast::Template> {
        let mut blocks: Vec<State> = vec![];
        let mut scopes = vec![ast::Scope::new()];

        while let Some(next) = self.next()? {
            // An `elif` counts as a nested `if` here since that is how it
            // renders.
            if let Some(block) = blocks.last().filter(|_| blocks.len() > MAX_DEPTH) {
                return Err(Error::syntax(
                    "statements are nested too deeply",
                    self.source(),
                    block.span(),
                ));
            }

            let stmt = match next {
                // Simply raw template, emit a single statement for it.
                (Token::Raw, span) => ast::Stmt::Raw(span),

                // The start of a comment, e.g. `{# ... #}`
                (Token::BeginComment, _) => {
                    if self.is_next(Token::Raw)? {
                        self.expect(Token::Raw)?;
                    }
                    self.expect(Token::EndComment)?;
                    continue;
                }

                // The start of an expression, e.g. `{{ user.name }}`
                (Token::BeginExpr, begin) => {
                    let expr = self.parse_expr()?;
                    let end = self.expect(Token::EndExpr)?;
                    let span = begin.combine(end);
                    ast::Stmt::InlineExpr(ast::InlineExpr { expr, span })
                }

                // The start of a block, e.g. `{% if cond %}`
                (Token::BeginBlock, begin) => {
                    let tag = self.parse_tag()?;
                    let end = self.expect(Token::EndBlock)?;
                    let span = begin.combine(end);

                    match tag {
                        // The start of an `if` statement. For example:
                        //
                        //   {% if cond %}
                        //
                        // We must push a block to the block stack and a scope
                        // to the scope stack because an if statement starts a
                        // new scope.
                        Tag::If(cond) => {
                            blocks.push(State::If {
                                is_else_if: false,
                                cond,
                                span,
                                has_else: false,
                            });
                            scopes.push(ast::Scope::new());
                            continue;
                        }

                        // An `elif` clause. For example:
                        //
                        //   {% elif cond %}
                        //
                        // We expect that the previous block was an `if` block
                        // and update it accordingly. We must also push two
                        // scopes to the scope stack, one for the `else` and one
                        // for the `if`.
                        Tag::ElseIf(cond) => {
                            let err =
                                || Error::syntax("unexpected `elif` block", self.source(), span);
                            match blocks.last_mut().ok_or_else(err)? {
                                State::If {
                                    has_else: has_else @ false,
                                    ..
                                } => {
                                    *has_else = true;
                                }
                                _ => return Err(err()),
                            }
                            blocks.push(State::If {
                                is_else_if: true,
                                cond,
                                span,
                                has_else: false,
                            });
                            scopes.push(ast::Scope::new());
                            scopes.push(ast::Scope::new());
                            continue;
                        }

                        // The `else` clause of an `if` or `for` statement. For
                        // example:
                        //
                        //   {% else %}
                        //
                        // We must also push to the scope stack since an
                        // `else` clause starts a new scope.
                        Tag::Else => {
                            let err =
                                || Error::syntax("unexpected `else` block", self.source(), span);
                            match blocks.last_mut().ok_or_else(err)? {
                                State::If {
                                    has_else: has_else @ false,
                                    ..
                                }
                                | State::For {
                                    has_else: has_else @ false,
                                    ..
                                } => {
                                    *has_else = true;
                                }
                                _ => return Err(err()),
                            }
                            scopes.push(ast::Scope::new());
                            continue;
                        }

                        // The end of an `if` statement. For example:
                        //
                        //   {% endif %}
                        //
                        // We have to make sure to pop back the scopes until we
                        // get to the original `if`. Any `elif` blocks along
                        // the way are desugared into an `if` statement.
                        Tag::EndIf => {
                            let err =
                                || Error::syntax("unexpected `endif` block", self.source(), span);

                            loop {
                                match blocks.pop().ok_or_else(err)? {
                                    State::If {
                                        is_else_if,
                                        cond,
                                        has_else,
                                        ..
                                    } => {
                                        let else_branch = has_else.then(|| pop(&mut scopes));
                                        let then_branch = pop(&mut scopes);
                                        let stmt = ast::Stmt::IfElse(ast::IfElse {
                                            cond,
                                            then_branch,
                                            else_branch,
                                        });
                                        if !is_else_if {
                                            break stmt;
                                        }
                                        current(&mut scopes).stmts.push(stmt);
                                    }
                                    _ => return Err(err()),
                                };
                            }
                        }

                        // The start of a `for` statement. For example:
                        //
                        //   {% for vars in iterable %}
                        //
                        Tag::For(vars, iterable) => {
                            blocks.push(State::For {
                                vars,
                                iterable,
                                span,
                                has_else: false,
                            });
                            scopes.push(ast::Scope::new());
                            continue;
                        }

                        // The end of a `for` statement. For example:
                        //
                        //   {% endfor %}
                        //
                        // We expect that the previous block was a `for` block.
                        Tag::EndFor => {
                            let err =
                                || Error::syntax("unexpected `endfor` block", self.source(), span);

                            match blocks.pop().ok_or_else(err)? {
                                State::For {
                                    vars,
                                    iterable,
                                    span: for_span,
                                    has_else,
                                } => {
                                    let else_branch = has_else.then(|| pop(&mut scopes));
                                    let body = pop(&mut scopes);
                                    ast::Stmt::ForLoop(ast::ForLoop {
                                        vars,
                                        iterable,
                                        body,
                                        else_branch,
                                        span: for_span,
                                    })
                                }
                                _ => return Err(err()),
                            }
                        }

                        // An assignment. For example:
                        //
                        //   {% set name = expr %}
                        //
                        Tag::Set(name, expr) => ast::Stmt::Set(ast::Set { name, expr }),

                        // The start of a `set` statement that captures its
                        // body. For example:
                        //
                        //   {% set name %}
                        //
                        Tag::SetBlock(name) => {
                            blocks.push(State::Set { name, span });
                            scopes.push(ast::Scope::new());
                            continue;
                        }

                        Tag::EndSet => {
                            let err =
                                || Error::syntax("unexpected `endset` block", self.source(), span);
                            match blocks.pop().ok_or_else(err)? {
                                State::Set { name, .. } => {
                                    let body = pop(&mut scopes);
                                    ast::Stmt::SetBlock(ast::SetBlock { name, body })
                                }
                                _ => return Err(err()),
                            }
                        }

                        // The start of a `with` statement. For example:
                        //
                        //   {% with a = expr, b = expr %}
                        //
                        Tag::With(assigns) => {
                            blocks.push(State::With { assigns, span });
                            scopes.push(ast::Scope::new());
                            continue;
                        }

                        Tag::EndWith => {
                            let err =
                                || Error::syntax("unexpected `endwith` block", self.source(), span);
                            match blocks.pop().ok_or_else(err)? {
                                State::With { assigns, .. } => {
                                    let body = pop(&mut scopes);
                                    ast::Stmt::With(ast::With { assigns, body })
                                }
                                _ => return Err(err()),
                            }
                        }

                        // The start of a named block. For example:
                        //
                        //   {% block content %}
                        //
                        Tag::Block(name) => {
                            blocks.push(State::Block { name, span });
                            scopes.push(ast::Scope::new());
                            continue;
                        }

                        // The end of a named block. The body is stored in the
                        // block table and a reference to it is left in place.
                        Tag::EndBlock(end_name) => {
                            let err = || {
                                Error::syntax("unexpected `endblock` block", self.source(), span)
                            };
                            let (name, block_span) = match blocks.pop().ok_or_else(err)? {
                                State::Block { name, span } => (name, span),
                                _ => return Err(err()),
                            };
                            if let Some(end_name) = end_name {
                                if end_name.name != name.name {
                                    return Err(Error::syntax(
                                        format!("expected `endblock {}`", name.name),
                                        self.source(),
                                        end_name.span,
                                    ));
                                }
                            }
                            if self.blocks.contains_key(&name.name) {
                                return Err(Error::syntax(
                                    format!("block `{}` defined twice", name.name),
                                    self.source(),
                                    name.span,
                                ));
                            }
                            let body = pop(&mut scopes);
                            self.blocks.insert(
                                name.name.clone(),
                                ast::Block {
                                    name: name.clone(),
                                    body,
                                    span: block_span,
                                },
                            );
                            ast::Stmt::Block(ast::BlockRef { name })
                        }

                        // The parent of this template. For example:
                        //
                        //   {% extends "base.html" %}
                        //
                        Tag::Extends(name) => {
                            if !blocks.is_empty() {
                                return Err(Error::syntax(
                                    "`extends` is only allowed at the top level",
                                    self.source(),
                                    span,
                                ));
                            }
                            if self.parent.is_some() {
                                return Err(Error::syntax(
                                    "template already extends another template",
                                    self.source(),
                                    span,
                                ));
                            }
                            self.parent = Some(name);
                            continue;
                        }

                        // An `include` statement. For example:
                        //
                        //   {% include "header.html" ignore missing %}
                        //
                        Tag::Include(name, ignore_missing) => {
                            if !self.includes.contains(&name.value) {
                                self.includes.push(name.value.clone());
                            }
                            ast::Stmt::Include(ast::Include {
                                name,
                                ignore_missing,
                                span,
                            })
                        }

                        // The start of a macro definition. For example:
                        //
                        //   {% macro input(name, type="text") %}
                        //
                        Tag::Macro(name, params) => {
                            blocks.push(State::Macro { name, params, span });
                            scopes.push(ast::Scope::new());
                            continue;
                        }

                        // The end of a macro definition. Macros are stored in
                        // the macro table and produce no output where they are
                        // defined.
                        Tag::EndMacro(end_name) => {
                            let err = || {
                                Error::syntax("unexpected `endmacro` block", self.source(), span)
                            };
                            let (name, params, macro_span) = match blocks.pop().ok_or_else(err)? {
                                State::Macro { name, params, span } => (name, params, span),
                                _ => return Err(err()),
                            };
                            if let Some(end_name) = end_name {
                                if end_name.name != name.name {
                                    return Err(Error::syntax(
                                        format!("expected `endmacro {}`", name.name),
                                        self.source(),
                                        end_name.span,
                                    ));
                                }
                            }
                            let body = pop(&mut scopes);
                            self.macros.insert(
                                name.name.clone(),
                                ast::Macro {
                                    name,
                                    params,
                                    body,
                                    span: macro_span,
                                },
                            );
                            continue;
                        }

                        // The start of a `call` statement. For example:
                        //
                        //   {% call(item) list(items) %}
                        //
                        Tag::Call(params, call) => {
                            blocks.push(State::Call { call, params, span });
                            scopes.push(ast::Scope::new());
                            continue;
                        }

                        Tag::EndCall => {
                            let err =
                                || Error::syntax("unexpected `endcall` block", self.source(), span);
                            match blocks.pop().ok_or_else(err)? {
                                State::Call {
                                    call,
                                    params,
                                    span: call_span,
                                } => {
                                    let body = pop(&mut scopes);
                                    ast::Stmt::CallBlock(ast::CallBlock {
                                        call,
                                        params,
                                        body,
                                        span: call_span,
                                    })
                                }
                                _ => return Err(err()),
                            }
                        }
                    }
                }

                (tk, span) => {
                    return Err(self.err_unexpected_token("template", tk, span));
                }
            };
            current(&mut scopes).stmts.push(stmt);
        }

        if let Some(block) = blocks.last() {
            let msg = match block {
                State::If { .. } => "unclosed `if` block",
                State::For { .. } => "unclosed `for` block",
                State::Set { .. } => "unclosed `set` block",
                State::With { .. } => "unclosed `with` block",
                State::Block { .. } => "unclosed `block` block",
                State::Macro { .. } => "unclosed `macro` block",
                State::Call { .. } => "unclosed `call` block",
            };
            return Err(Error::span(
                ErrorKind::UnclosedDelimiter,
                msg,
                self.source(),
                block.span(),
            ));
        }

        Ok(ast::Template {
            scope: pop(&mut scopes),
            parent: self.parent,
            blocks: self.blocks,
            macros: self.macros,
            includes: self.includes,
        })
    }

    /// Parses the contents of a single tag. All of the following are valid.
    ///
    ///   if user.is_enabled
    ///
    ///   elif user.is_admin
    ///
    ///   for uid, user in group.users | items
    ///
    ///   set title = page.title | default("Home")
    ///
    ///   macro input(name, type="text")
    ///
    ///   call(row) table(rows)
    ///
    fn parse_tag(&mut self) -> Result<Tag> {
        let (kw, span) = self.parse_keyword()?;
        match kw {
            Keyword::If => Ok(Tag::If(self.parse_expr()?)),

            Keyword::Elif => Ok(Tag::ElseIf(self.parse_expr()?)),

            Keyword::Else => {
                if self.is_next_word("if")? {
                    self.expect_word("if")?;
                    Ok(Tag::ElseIf(self.parse_expr()?))
                } else {
                    Ok(Tag::Else)
                }
            }

            Keyword::EndIf => Ok(Tag::EndIf),

            Keyword::For => {
                let vars = self.parse_loop_vars()?;
                self.expect_word("in")?;
                let iterable = self.parse_expr()?;
                Ok(Tag::For(vars, iterable))
            }

            Keyword::EndFor => Ok(Tag::EndFor),

            Keyword::Set => {
                let name = self.parse_ident()?;
                if self.is_next(Token::Assign)? {
                    self.expect(Token::Assign)?;
                    let expr = self.parse_expr()?;
                    Ok(Tag::Set(name, expr))
                } else {
                    Ok(Tag::SetBlock(name))
                }
            }

            Keyword::EndSet => Ok(Tag::EndSet),

            Keyword::With => {
                let mut assigns = Vec::new();
                while self.is_next(Token::Ident)? {
                    let name = self.parse_ident()?;
                    self.expect(Token::Assign)?;
                    let expr = self.parse_expr()?;
                    assigns.push((name, expr));
                    if !self.is_next(Token::Comma)? {
                        break;
                    }
                    self.expect(Token::Comma)?;
                }
                Ok(Tag::With(assigns))
            }

            Keyword::EndWith => Ok(Tag::EndWith),

            Keyword::Block => Ok(Tag::Block(self.parse_ident()?)),

            Keyword::EndBlock => Ok(Tag::EndBlock(self.parse_optional_ident()?)),

            Keyword::Extends => Ok(Tag::Extends(self.parse_str()?)),

            Keyword::Include => {
                let name = self.parse_str()?;
                let ignore_missing = if self.is_next_word("ignore")? {
                    self.expect_word("ignore")?;
                    self.expect_word("missing")?;
                    true
                } else {
                    false
                };
                Ok(Tag::Include(name, ignore_missing))
            }

            Keyword::Macro => {
                let name = self.parse_ident()?;
                let params = self.parse_params()?;
                Ok(Tag::Macro(name, params))
            }

            Keyword::EndMacro => Ok(Tag::EndMacro(self.parse_optional_ident()?)),

            Keyword::Call => {
                let params = if self.is_next(Token::OpenParen)? {
                    self.parse_params()?
                } else {
                    Vec::new()
                };
                match self.parse_expr()? {
                    ast::Expr::Call(call) => Ok(Tag::Call(params, call)),
                    expr => Err(Error::syntax(
                        "expected macro call",
                        self.source(),
                        expr.span(),
                    )),
                }
            }

            Keyword::EndCall => Ok(Tag::EndCall),

            Keyword::Raw => Err(Error::syntax(
                "`raw` tag takes no arguments",
                self.source(),
                span,
            )),

            Keyword::EndRaw => Err(Error::syntax(
                "unexpected `endraw` block",
                self.source(),
                span,
            )),
        }
    }

    /// Parses an expression, the lowest precedence level is an inline
    /// conditional.
    ///
    ///   user.name | upper if user else "anonymous"
    ///
    fn parse_expr(&mut self) -> Result<ast::Expr> {
        self.enter()?;
        let expr = self.parse_binary(OR)?;
        let expr = if self.is_next_word("if")? {
            self.expect_word("if")?;
            let cond = self.parse_binary(OR)?;
            let otherwise = if self.is_next_word("else")? {
                self.expect_word("else")?;
                Some(Box::new(self.parse_expr()?))
            } else {
                None
            };
            let end = otherwise.as_ref().map_or(cond.span(), |e| e.span());
            self.check_depth(ast::Expr::Cond(ast::Cond {
                span: expr.span().combine(end),
                cond: Box::new(cond),
                then: Box::new(expr),
                otherwise,
            }))?
        } else {
            expr
        };
        self.depth -= 1;
        Ok(expr)
    }

    /// Parses binary operators that bind at least as tightly as `min`.
    ///
    /// All binary operators are left associative so the right hand side is
    /// parsed one level tighter. A chain like `a + b + c` is built in a loop
    /// so only its tree depth is limited, not the parser's recursion.
    fn parse_binary(&mut self, min: u8) -> Result<ast::Expr> {
        let mut lhs = if min <= NOT && self.is_next_word("not")? {
            let span = self.expect_word("not")?;
            self.enter()?;
            let expr = self.parse_binary(NOT)?;
            self.depth -= 1;
            self.check_depth(ast::Expr::Unary(ast::Unary {
                op: ast::UnaryOp::Not,
                span: span.combine(expr.span()),
                expr: Box::new(expr),
            }))?
        } else {
            self.parse_unary()?
        };

        while let Some(op) = self.peek_binary_op()? {
            let prec = precedence(op);
            if prec < min {
                break;
            }
            self.next()?;
            if op == ast::BinaryOp::NotIn {
                self.expect_word("in")?;
            }
            let rhs = self.parse_binary(prec + 1)?;
            lhs = self.check_depth(binary(op, lhs, rhs))?;
        }
        Ok(lhs)
    }

    /// Returns the binary operator at the next token, if any.
    fn peek_binary_op(&mut self) -> Result<Option<ast::BinaryOp>> {
        let op = match self.peek()? {
            Some((Token::Ident, sp)) => match &self.source()[sp] {
                "or" => ast::BinaryOp::Or,
                "and" => ast::BinaryOp::And,
                "in" => ast::BinaryOp::In,
                "not" => ast::BinaryOp::NotIn,
                _ => return Ok(None),
            },
            Some((Token::Eq, _)) => ast::BinaryOp::Eq,
            Some((Token::Ne, _)) => ast::BinaryOp::Ne,
            Some((Token::Lt, _)) => ast::BinaryOp::Lt,
            Some((Token::Le, _)) => ast::BinaryOp::Le,
            Some((Token::Gt, _)) => ast::BinaryOp::Gt,
            Some((Token::Ge, _)) => ast::BinaryOp::Ge,
            Some((Token::Tilde, _)) => ast::BinaryOp::Concat,
            Some((Token::Plus, _)) => ast::BinaryOp::Add,
            Some((Token::Minus, _)) => ast::BinaryOp::Sub,
            Some((Token::Star, _)) => ast::BinaryOp::Mul,
            Some((Token::Slash, _)) => ast::BinaryOp::Div,
            Some((Token::SlashSlash, _)) => ast::BinaryOp::FloorDiv,
            Some((Token::Percent, _)) => ast::BinaryOp::Rem,
            _ => return Ok(None),
        };
        Ok(Some(op))
    }

    fn parse_unary(&mut self) -> Result<ast::Expr> {
        let (op, span) = match self.peek()? {
            Some((Token::Minus, span)) => (ast::UnaryOp::Neg, span),
            Some((Token::Plus, span)) => (ast::UnaryOp::Pos, span),
            _ => {
                let primary = self.parse_primary()?;
                return self.parse_postfix(primary);
            }
        };
        self.next()?;

        // Negative number literals are folded so that `-9223372036854775808`
        // is representable.
        if op == ast::UnaryOp::Neg {
            if let Some((Token::Number, num)) = self.peek()? {
                self.next()?;
                let lit = self.parse_literal_number(num, Sign::Neg)?;
                let lit = ast::Literal {
                    value: lit.value,
                    span: span.combine(num),
                };
                return self.parse_postfix(ast::Expr::Literal(lit));
            }
        }

        self.enter()?;
        let expr = self.parse_unary()?;
        self.depth -= 1;
        self.check_depth(ast::Expr::Unary(ast::Unary {
            op,
            span: span.combine(expr.span()),
            expr: Box::new(expr),
        }))
    }

    /// Parses member access, calls, filters and tests following a primary
    /// expression.
    ///
    ///   user.names[0] | upper
    ///
    ///   value is not divisibleby(3)
    ///
    fn parse_postfix(&mut self, mut expr: ast::Expr) -> Result<ast::Expr> {
        loop {
            expr = match self.peek()? {
                Some((Token::Dot, _)) => {
                    self.next()?;
                    match self.parse()? {
                        (Token::Ident, span) => {
                            let name = ast::Ident {
                                name: self.source()[span].to_owned(),
                                span,
                            };
                            ast::Expr::Attr(ast::Attr {
                                span: expr.span().combine(span),
                                base: Box::new(expr),
                                name,
                            })
                        }
                        (Token::Number, span) => {
                            let index = self.parse_literal_number(span, Sign::Pos)?;
                            ast::Expr::Item(ast::Item {
                                span: expr.span().combine(span),
                                base: Box::new(expr),
                                index: Box::new(ast::Expr::Literal(index)),
                            })
                        }
                        (tk, span) => {
                            return Err(self.err_unexpected_token("identifier", tk, span));
                        }
                    }
                }

                Some((Token::OpenBracket, _)) => {
                    self.next()?;
                    let index = self.parse_expr()?;
                    let end = self.expect(Token::CloseBracket)?;
                    ast::Expr::Item(ast::Item {
                        span: expr.span().combine(end),
                        base: Box::new(expr),
                        index: Box::new(index),
                    })
                }

                Some((Token::OpenParen, _)) => {
                    let args = self.parse_args()?;
                    ast::Expr::Call(ast::Call {
                        span: expr.span().combine(args.span),
                        callee: Box::new(expr),
                        args,
                    })
                }

                Some((Token::Pipe, _)) => {
                    self.next()?;
                    let name = self.parse_name()?;
                    let args = self.parse_optional_args(name.span)?;
                    ast::Expr::Filter(ast::Filter {
                        span: expr.span().combine(args.span),
                        receiver: Box::new(expr),
                        name,
                        args,
                    })
                }

                Some((Token::Ident, span)) if &self.source()[span] == "is" => {
                    self.next()?;
                    let negated = self.is_next_word("not")?;
                    if negated {
                        self.expect_word("not")?;
                    }
                    let name = self.parse_name()?;
                    let args = self.parse_optional_args(name.span)?;
                    ast::Expr::Test(ast::Test {
                        span: expr.span().combine(args.span),
                        receiver: Box::new(expr),
                        name,
                        args,
                        negated,
                    })
                }

                _ => return Ok(expr),
            };
            expr = self.check_depth(expr)?;
        }
    }

    fn parse_primary(&mut self) -> Result<ast::Expr> {
        let (tk, span) = self.parse()?;
        let expr = match tk {
            Token::Number => ast::Expr::Literal(self.parse_literal_number(span, Sign::Pos)?),

            Token::String => {
                let value = Value::String(self.parse_string(span)?);
                ast::Expr::Literal(ast::Literal { value, span })
            }

            Token::Ident => {
                let value = match &self.source()[span] {
                    "true" | "True" => Some(Value::Bool(true)),
                    "false" | "False" => Some(Value::Bool(false)),
                    "none" | "None" => Some(Value::None),
                    word if RESERVED.contains(&word) => {
                        return Err(self.err_unexpected_keyword(word, span));
                    }
                    _ => None,
                };
                match value {
                    Some(value) => ast::Expr::Literal(ast::Literal { value, span }),
                    None => ast::Expr::Var(ast::Var {
                        name: ast::Ident {
                            name: self.source()[span].to_owned(),
                            span,
                        },
                    }),
                }
            }

            Token::OpenParen => {
                let expr = self.parse_expr()?;
                self.expect(Token::CloseParen)?;
                expr
            }

            Token::OpenBracket => {
                let mut items = Vec::new();
                let end = loop {
                    if let Some((Token::CloseBracket, end)) = self.peek()? {
                        self.next()?;
                        break end;
                    }
                    items.push(self.parse_expr()?);
                    match self.parse()? {
                        (Token::Comma, _) => continue,
                        (Token::CloseBracket, end) => break end,
                        (tk, span) => {
                            return Err(self.err_unexpected_token("`,` or `]`", tk, span));
                        }
                    }
                };
                ast::Expr::List(ast::List {
                    items,
                    span: span.combine(end),
                })
            }

            Token::OpenBrace => {
                let mut items = Vec::new();
                let end = loop {
                    if let Some((Token::CloseBrace, end)) = self.peek()? {
                        self.next()?;
                        break end;
                    }
                    let key = self.parse_expr()?;
                    self.expect(Token::Colon)?;
                    let value = self.parse_expr()?;
                    items.push((key, value));
                    match self.parse()? {
                        (Token::Comma, _) => continue,
                        (Token::CloseBrace, end) => break end,
                        (tk, span) => {
                            return Err(self.err_unexpected_token("`,` or `}`", tk, span));
                        }
                    }
                };
                ast::Expr::Map(ast::Map {
                    items,
                    span: span.combine(end),
                })
            }

            tk => return Err(self.err_unexpected_token("expression", tk, span)),
        };
        Ok(expr)
    }

    /// Parses call arguments including the surrounding parentheses.
    ///
    ///   (1, "two", three=3)
    ///
    fn parse_args(&mut self) -> Result<ast::Args> {
        let begin = self.expect(Token::OpenParen)?;
        let mut values = Vec::new();
        let mut kwargs = Vec::new();
        let end = loop {
            if let Some((Token::CloseParen, end)) = self.peek()? {
                self.next()?;
                break end;
            }
            let expr = self.parse_expr()?;
            if self.is_next(Token::Assign)? {
                let name = match expr {
                    ast::Expr::Var(var) => var.name,
                    expr => {
                        return Err(Error::syntax(
                            "expected identifier before `=`",
                            self.source(),
                            expr.span(),
                        ));
                    }
                };
                self.expect(Token::Assign)?;
                kwargs.push((name, self.parse_expr()?));
            } else if !kwargs.is_empty() {
                return Err(Error::syntax(
                    "positional argument follows keyword argument",
                    self.source(),
                    expr.span(),
                ));
            } else {
                values.push(expr);
            }
            match self.parse()? {
                (Token::Comma, _) => continue,
                (Token::CloseParen, end) => break end,
                (tk, span) => return Err(self.err_unexpected_token("`,` or `)`", tk, span)),
            }
        };
        Ok(ast::Args {
            values,
            kwargs,
            span: begin.combine(end),
        })
    }

    /// Parses arguments if the next token opens them, used for filters and
    /// tests where the parentheses are optional.
    fn parse_optional_args(&mut self, name: Span) -> Result<ast::Args> {
        if self.is_next(Token::OpenParen)? {
            self.parse_args()
        } else {
            Ok(ast::Args {
                span: name,
                ..Default::default()
            })
        }
    }

    /// Parses macro or caller parameters including the parentheses.
    ///
    ///   (name, type="text")
    ///
    fn parse_params(&mut self) -> Result<Vec<ast::Param>> {
        self.expect(Token::OpenParen)?;
        let mut params: Vec<ast::Param> = Vec::new();
        loop {
            if self.is_next(Token::CloseParen)? {
                self.next()?;
                break;
            }
            let name = self.parse_ident()?;
            if params.iter().any(|p| p.name.name == name.name) {
                return Err(Error::syntax(
                    format!("duplicate parameter `{}`", name.name),
                    self.source(),
                    name.span,
                ));
            }
            let default = if self.is_next(Token::Assign)? {
                self.next()?;
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(ast::Param { name, default });
            match self.parse()? {
                (Token::Comma, _) => continue,
                (Token::CloseParen, _) => break,
                (tk, span) => return Err(self.err_unexpected_token("`,` or `)`", tk, span)),
            }
        }
        Ok(params)
    }

    fn parse_loop_vars(&mut self) -> Result<ast::LoopVars> {
        let key = self.parse_ident()?;
        if !self.is_next(Token::Comma)? {
            return Ok(ast::LoopVars::Item(key));
        }
        self.expect(Token::Comma)?;
        let value = self.parse_ident()?;
        let span = key.span.combine(value.span);
        Ok(ast::LoopVars::KeyValue(ast::KeyValue { key, value, span }))
    }

    /// Parses a string literal used as a template name.
    fn parse_str(&mut self) -> Result<ast::Str> {
        let span = self.expect(Token::String)?;
        let value = self.parse_string(span)?;
        Ok(ast::Str { value, span })
    }

    /// Parses an integer or float literal.
    fn parse_literal_number(&self, span: Span, sign: Sign) -> Result<ast::Literal> {
        let raw = &self.source()[span];
        let is_radix = matches!(raw.as_bytes(), [b'0', b'b' | b'o' | b'x', ..]);
        if !is_radix && raw.contains(['.', 'e', 'E']) {
            self.parse_literal_float(raw, span, sign)
        } else {
            self.parse_literal_integer(raw, span, sign)
        }
    }

    fn parse_literal_integer(&self, raw: &str, span: Span, sign: Sign) -> Result<ast::Literal> {
        let digits = raw.as_bytes();
        let (i, radix) = match digits {
            [b'0', b'b', ..] => (2, 2),
            [b'0', b'o', ..] => (2, 8),
            [b'0', b'x', ..] => (2, 16),
            _ => (0, 10),
        };
        if digits.len() == i {
            return Err(Error::syntax(
                format!("missing digits for base {radix} literal"),
                self.source(),
                span,
            ));
        }
        let int = digits[i..]
            .iter()
            .enumerate()
            .filter(|(_, d)| **d != b'_')
            .try_fold(0i64, |acc, (j, &d)| {
                let x = (d as char).to_digit(radix).ok_or_else(|| {
                    let m = span.m + i + j;
                    Error::syntax(
                        format!("invalid digit for base {radix} literal"),
                        self.source(),
                        m..m + 1,
                    )
                })?;
                let err = || {
                    Error::syntax(
                        format!("base {radix} literal out of range for 64-bit integer"),
                        self.source(),
                        span,
                    )
                };
                let value = acc.checked_mul(radix.into()).ok_or_else(err)?;
                match sign {
                    Sign::Pos => value.checked_add(x.into()),
                    Sign::Neg => value.checked_sub(x.into()),
                }
                .ok_or_else(err)
            })?;
        let value = Value::Integer(int);
        Ok(ast::Literal { value, span })
    }

    fn parse_literal_float(&self, raw: &str, span: Span, sign: Sign) -> Result<ast::Literal> {
        let float: f64 = raw
            .replace('_', "")
            .parse()
            .map_err(|_| Error::syntax("invalid float literal", self.source(), span))?;
        let value = Value::Float(match sign {
            Sign::Pos => float,
            Sign::Neg => -float,
        });
        Ok(ast::Literal { value, span })
    }

    /// Parses a string and handles escape characters.
    fn parse_string(&self, span: Span) -> Result<String> {
        let raw = &self.source()[span];
        let inner = &raw[1..raw.len() - 1];
        if !inner.contains('\\') {
            return Ok(inner.to_owned());
        }
        let mut iter = inner.char_indices().map(|(i, c)| (span.m + 1 + i, c));
        let mut string = String::with_capacity(inner.len());
        while let Some((i, c)) = iter.next() {
            if c != '\\' {
                string.push(c);
                continue;
            }
            let (j, esc) = iter.next().ok_or_else(|| {
                Error::syntax("unterminated escape sequence", self.source(), i..i + 1)
            })?;
            let c = match esc {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                '0' => '\0',
                '\\' => '\\',
                '"' => '"',
                '\'' => '\'',
                _ => {
                    return Err(Error::syntax(
                        "unknown escape character",
                        self.source(),
                        i..j + esc.len_utf8(),
                    ));
                }
            };
            string.push(c);
        }
        Ok(string)
    }

    /// Parses a statement keyword at the start of a tag.
    fn parse_keyword(&mut self) -> Result<(Keyword, Span)> {
        match self.parse()? {
            (Token::Ident, span) => {
                let word = &self.source()[span];
                match Keyword::from_str(word) {
                    Some(kw) => Ok((kw, span)),
                    None => Err(Error::span(
                        ErrorKind::UnknownTag,
                        format!("unknown statement `{word}`"),
                        self.source(),
                        span,
                    )),
                }
            }
            (tk, span) => Err(self.err_unexpected_token("statement", tk, span)),
        }
    }

    /// Parses an identifier that can be bound as a variable.
    fn parse_ident(&mut self) -> Result<ast::Ident> {
        let ident = self.parse_name()?;
        if RESERVED.contains(&ident.name.as_str()) {
            return Err(self.err_unexpected_keyword(&ident.name, ident.span));
        }
        Ok(ident)
    }

    /// Parses any identifier, including reserved words, e.g. filter names.
    fn parse_name(&mut self) -> Result<ast::Ident> {
        let span = self.expect(Token::Ident)?;
        Ok(ast::Ident {
            name: self.source()[span].to_owned(),
            span,
        })
    }

    fn parse_optional_ident(&mut self) -> Result<Option<ast::Ident>> {
        if self.is_next(Token::Ident)? {
            self.parse_ident().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Expects an identifier with the given text, e.g. `in`.
    fn expect_word(&mut self, exp: &str) -> Result<Span> {
        match self.next()? {
            Some((Token::Ident, span)) if &self.source()[span] == exp => Ok(span),
            Some((tk, span)) => Err(self.err_unexpected_token(format!("`{exp}`"), tk, span)),
            None => Err(self.err_unexpected_eof(format!("`{exp}`"))),
        }
    }

    /// Returns `true` if the next token is an identifier with the given text.
    fn is_next_word(&mut self, exp: &str) -> Result<bool> {
        Ok(self
            .peek()?
            .map(|(tk, sp)| tk == Token::Ident && &self.source()[sp] == exp)
            .unwrap_or(false))
    }

    /// Rejects an expression tree that is too deep to evaluate.
    fn check_depth(&self, expr: ast::Expr) -> Result<ast::Expr> {
        if expr_depth(&expr) > MAX_DEPTH {
            return Err(Error::syntax(
                "expression is nested too deeply",
                self.source(),
                expr.span(),
            ));
        }
        Ok(expr)
    }

    /// Tracks expression nesting.
    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            let span = self
                .peeked
                .flatten()
                .map(|(_, span)| span)
                .unwrap_or_default();
            return Err(Error::syntax(
                "expression is nested too deeply",
                self.source(),
                span,
            ));
        }
        Ok(())
    }

    /// Parses any token.
    fn parse(&mut self) -> Result<(Token, Span)> {
        match self.next()? {
            Some((tk, sp)) => Ok((tk, sp)),
            None => Err(self.err_unexpected_eof("token")),
        }
    }

    /// Parses the specified token and returns its span.
    fn expect(&mut self, exp: Token) -> Result<Span> {
        match self.next()? {
            Some((tk, span)) if tk == exp => Ok(span),
            Some((tk, span)) => Err(self.err_unexpected_token(exp.human(), tk, span)),
            None => Err(self.err_unexpected_eof(exp.human())),
        }
    }

    /// Returns `true` if the next token is equal to the provided one.
    fn is_next(&mut self, token: Token) -> Result<bool> {
        Ok(self.peek()?.map(|(tk, _)| tk == token).unwrap_or(false))
    }

    /// Returns a copy of the next token without affecting the result of the
    /// following `.next()` call.
    fn peek(&mut self) -> Result<Option<(Token, Span)>> {
        match self.peeked {
            Some(peeked) => Ok(peeked),
            None => {
                let next = self.tokens.next()?;
                self.peeked = Some(next);
                Ok(next)
            }
        }
    }

    /// Returns the next token and span in the stream.
    fn next(&mut self) -> Result<Option<(Token, Span)>> {
        match self.peeked.take() {
            Some(v) => Ok(v),
            None => self.tokens.next(),
        }
    }

    fn source(&self) -> &'source str {
        self.tokens.source
    }

    fn err_unexpected_eof(&self, exp: impl Display) -> Error {
        let n = self.source().len();
        Error::syntax(format!("expected {exp}, found EOF"), self.source(), n..n)
    }

    fn err_unexpected_token(&self, exp: impl Display, got: Token, span: Span) -> Error {
        let got = got.human();
        Error::syntax(format!("expected {exp}, found {got}"), self.source(), span)
    }

    fn err_unexpected_keyword(&self, kw: impl Display, span: Span) -> Error {
        Error::syntax(format!("unexpected keyword `{kw}`"), self.source(), span)
    }
}

impl State {
    fn span(&self) -> Span {
        match self {
            Self::If { span, .. }
            | Self::For { span, .. }
            | Self::Set { span, .. }
            | Self::With { span, .. }
            | Self::Block { span, .. }
            | Self::Macro { span, .. }
            | Self::Call { span, .. } => *span,
        }
    }
}

impl Keyword {
    fn from_str(s: &str) -> Option<Self> {
        let kw = match s {
            "if" => Self::If,
            "elif" => Self::Elif,
            "else" => Self::Else,
            "endif" => Self::EndIf,
            "for" => Self::For,
            "endfor" => Self::EndFor,
            "set" => Self::Set,
            "endset" => Self::EndSet,
            "with" => Self::With,
            "endwith" => Self::EndWith,
            "block" => Self::Block,
            "endblock" => Self::EndBlock,
            "extends" => Self::Extends,
            "include" => Self::Include,
            "macro" => Self::Macro,
            "endmacro" => Self::EndMacro,
            "call" => Self::Call,
            "endcall" => Self::EndCall,
            "raw" => Self::Raw,
            "endraw" => Self::EndRaw,
            _ => return None,
        };
        Some(kw)
    }
}

fn precedence(op: ast::BinaryOp) -> u8 {
    use ast::BinaryOp::*;
    match op {
        Or => OR,
        And => 2,
        Eq | Ne | Lt | Le | Gt | Ge | In | NotIn => 4,
        Concat => 5,
        Add | Sub => 6,
        Mul | Div | FloorDiv | Rem => 7,
    }
}

/// Returns the height of an expression tree.
///
/// Subexpressions have already been checked so this recursion is bounded.
fn expr_depth(expr: &ast::Expr) -> usize {
    let args = |args: &ast::Args| {
        args.values
            .iter()
            .chain(args.kwargs.iter().map(|(_, v)| v))
            .map(expr_depth)
            .max()
            .unwrap_or(0)
    };
    let below = match expr {
        ast::Expr::Literal(_) | ast::Expr::Var(_) => 0,
        ast::Expr::Attr(attr) => expr_depth(&attr.base),
        ast::Expr::Item(item) => expr_depth(&item.base).max(expr_depth(&item.index)),
        ast::Expr::Call(call) => expr_depth(&call.callee).max(args(&call.args)),
        ast::Expr::Filter(filter) => expr_depth(&filter.receiver).max(args(&filter.args)),
        ast::Expr::Test(test) => expr_depth(&test.receiver).max(args(&test.args)),
        ast::Expr::Unary(unary) => expr_depth(&unary.expr),
        ast::Expr::Binary(bin) => expr_depth(&bin.lhs).max(expr_depth(&bin.rhs)),
        ast::Expr::Cond(cond) => {
            let otherwise = cond.otherwise.as_deref().map_or(0, expr_depth);
            expr_depth(&cond.cond)
                .max(expr_depth(&cond.then))
                .max(otherwise)
        }
        ast::Expr::List(list) => list.items.iter().map(expr_depth).max().unwrap_or(0),
        ast::Expr::Map(map) => map
            .items
            .iter()
            .map(|(k, v)| expr_depth(k).max(expr_depth(v)))
            .max()
            .unwrap_or(0),
    };
    below + 1
}

fn binary(op: ast::BinaryOp, lhs: ast::Expr, rhs: ast::Expr) -> ast::Expr {
    ast::Expr::Binary(ast::Binary {
        op,
        span: lhs.span().combine(rhs.span()),
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

/// Returns the innermost scope, the scope stack is never empty.
fn current(scopes: &mut Vec<ast::Scope>) -> &mut ast::Scope {
    if scopes.is_empty() {
        scopes.push(ast::Scope::new());
    }
    let last = scopes.len() - 1;
    &mut scopes[last]
}

/// Pops the innermost scope.
fn pop(scopes: &mut Vec<ast::Scope>) -> ast::Scope {
    scopes.pop().unwrap_or_default()
}
