use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use crate::render::chain::{Env, Include};
use crate::render::iter::{self, Item};
use crate::render::stack::{Stack, State};
use crate::render::value::{self, Eval, Reason, Undefined};
use crate::types::ast;
use crate::types::escape::{self, Escaper};
use crate::types::span::Span;
use crate::types::template::Template;
use crate::value::ValueCow;
use crate::{Engine, Error, ErrorKind, Map, Result, UndefinedBehavior, Value};

/// A tree walking renderer for a single render call.
pub struct Renderer<'a> {
    engine: &'a Engine,
    includes: &'a HashMap<String, Include>,
    stack: Stack<'a>,
    /// The `call` block that invoked each active macro, if any.
    callers: Vec<Option<Caller<'a>>>,
    escape: bool,
    undefined: UndefinedBehavior,
    max_recursion: usize,
    depth: usize,
    /// Whether statements are at the top level of a template, `set` there
    /// is visible to macros.
    toplevel: bool,
}

/// The template being rendered and where it sits in an inheritance chain.
#[derive(Clone, Copy)]
#[cfg_attr(internal_debug, derive(Debug))]
pub struct Frame<'a> {
    /// The template whose AST is being walked.
    t: &'a Template,
    /// The inheritance chain, most derived template first.
    chain: &'a [Arc<Template>],
    /// The block being rendered and the index of its definition in the
    /// chain, used to resolve `super()`.
    block: Option<(&'a str, usize)>,
}

/// The body of a `call` block, rendered when the macro calls `caller()`.
#[derive(Clone, Copy)]
#[cfg_attr(internal_debug, derive(Debug))]
struct Caller<'a> {
    body: &'a ast::Scope,
    params: &'a [ast::Param],
    frame: Frame<'a>,
    /// The height of the stack at the `call` block.
    resume: usize,
}

impl<'a> Frame<'a> {
    fn err(self, kind: ErrorKind, msg: impl Into<String>, span: Span) -> Error {
        Error::span(kind, msg, &self.t.source, span).with_template_name(self.t.name.as_deref())
    }

    /// Attaches this template's location to an error without one.
    fn enrich(self, span: Span) -> impl FnOnce(Error) -> Error + 'a {
        move |err| err.enrich(self.t.name.as_deref(), &self.t.source, span)
    }
}

impl<'a> Renderer<'a> {
    pub fn new(engine: &'a Engine, env: &'a Env, globals: &'a Value, escape: bool) -> Self {
        Self {
            engine,
            includes: &env.includes,
            stack: Stack::new(globals),
            callers: Vec::new(),
            escape,
            undefined: engine.undefined,
            max_recursion: engine.max_recursion,
            depth: 0,
            toplevel: true,
        }
    }

    /// Renders the outermost ancestor of the chain, blocks resolve to their
    /// most derived definition.
    pub fn render(mut self, chain: &'a [Arc<Template>], out: &mut String) -> Result<()> {
        let t = match chain.last() {
            Some(t) => &**t,
            None => return Ok(()),
        };
        let f = Frame {
            t,
            chain,
            block: None,
        };
        self.render_scope(f, &t.scope, out)
    }

    fn render_scope(&mut self, f: Frame<'a>, scope: &'a ast::Scope, out: &mut String) -> Result<()> {
        for stmt in &scope.stmts {
            self.render_stmt(f, stmt, out)?;
        }
        Ok(())
    }

    fn render_stmt(&mut self, f: Frame<'a>, stmt: &'a ast::Stmt, out: &mut String) -> Result<()> {
        match stmt {
            ast::Stmt::Raw(span) => {
                out.push_str(&f.t.source.as_str()[*span]);
            }

            ast::Stmt::InlineExpr(ast::InlineExpr { expr, .. }) => {
                let value = self.eval(f, expr)?;
                self.write(value, out)?;
            }

            ast::Stmt::IfElse(ast::IfElse {
                cond,
                then_branch,
                else_branch,
            }) => {
                let cond = self.eval(f, cond)?;
                if self.truthy(cond)? {
                    self.render_scope(f, then_branch, out)?;
                } else if let Some(else_branch) = else_branch {
                    self.render_scope(f, else_branch, out)?;
                }
            }

            ast::Stmt::ForLoop(for_loop) => {
                self.render_loop(f, for_loop, out)?;
            }

            ast::Stmt::Set(ast::Set { name, expr }) => {
                let value = self.eval(f, expr)?;
                self.assign(name, value);
            }

            ast::Stmt::SetBlock(ast::SetBlock { name, body }) => {
                let mut buf = String::new();
                self.scoped(|r| r.render_scope(f, body, &mut buf))?;
                let value = self.markup(buf);
                self.assign(name, value);
            }

            ast::Stmt::With(ast::With { assigns, body }) => {
                self.scoped(|r| {
                    for (name, expr) in assigns {
                        let value = r.eval(f, expr)?;
                        r.stack.push_var(name.as_str(), value);
                    }
                    r.render_scope(f, body, out)
                })?;
            }

            ast::Stmt::Block(ast::BlockRef { name }) => {
                self.render_block(f, name, out)?;
            }

            ast::Stmt::Include(include) => {
                self.render_include(f, include, out)?;
            }

            ast::Stmt::CallBlock(call_block) => {
                let caller = Caller {
                    body: &call_block.body,
                    params: &call_block.params,
                    frame: f,
                    resume: self.stack.len(),
                };
                let value = self.eval_call(f, &call_block.call, Some(caller))?;
                self.write(value, out)?;
            }
        }
        Ok(())
    }

    fn render_loop(&mut self, f: Frame<'a>, l: &'a ast::ForLoop, out: &mut String) -> Result<()> {
        let iterable = match self.eval(f, &l.iterable)? {
            Eval::Value(v) => v,
            Eval::Markup(s) => ValueCow::Owned(Value::String(s)),
            Eval::Undefined(u) => {
                if !self.undefined.allows_iteration() {
                    return Err(u.to_error());
                }
                ValueCow::Owned(Value::List(Vec::new()))
            }
        };
        let items = iter::items(iterable, &l.vars).map_err(f.enrich(l.iterable.span()))?;

        if items.is_empty() {
            if let Some(else_branch) = &l.else_branch {
                self.scoped(|r| r.render_scope(f, else_branch, out))?;
            }
            return Ok(());
        }

        let length = items.len();
        for (i, item) in items.into_iter().enumerate() {
            self.scoped(|r| {
                r.stack.push_loop(i, Eval::owned(iter::loop_info(i, length)));
                match (&l.vars, item) {
                    (ast::LoopVars::Item(name), Item::One(value)) => {
                        r.stack.push_var(name.as_str(), Eval::Value(value));
                    }
                    (ast::LoopVars::KeyValue(kv), Item::Two(key, value)) => {
                        r.stack.push_var(kv.key.as_str(), Eval::Value(key));
                        r.stack.push_var(kv.value.as_str(), Eval::Value(value));
                    }
                    _ => {
                        return Err(f.err(
                            ErrorKind::InvalidOperation,
                            "mismatched loop variables",
                            l.span,
                        ));
                    }
                }
                r.render_scope(f, &l.body, out)
            })?;
        }
        Ok(())
    }

    fn render_block(&mut self, f: Frame<'a>, name: &'a ast::Ident, out: &mut String) -> Result<()> {
        let found = f.chain.iter().enumerate().find_map(|(i, t)| {
            t.blocks.get(name.as_str()).map(|block| (i, &**t, block))
        });
        let (i, t, block) = match found {
            Some(found) => found,
            None => return Ok(()),
        };
        let frame = Frame {
            t,
            chain: f.chain,
            block: Some((name.as_str(), i)),
        };
        self.nested(f, name.span, |r| {
            r.scoped(|r| r.render_scope(frame, &block.body, out))
        })
    }

    fn render_include(
        &mut self,
        f: Frame<'a>,
        include: &'a ast::Include,
        out: &mut String,
    ) -> Result<()> {
        let includes = self.includes;
        let name = &include.name;
        let chain = match includes.get(&name.value) {
            Some(Include::Found(chain)) => chain,
            Some(Include::Missing(_)) if include.ignore_missing => return Ok(()),
            Some(Include::Missing(err) | Include::Failed(err)) => {
                return Err(err.clone().enrich(f.t.name.as_deref(), &f.t.source, name.span));
            }
            None => {
                return Err(Error::template_not_found(&name.value).enrich(
                    f.t.name.as_deref(),
                    &f.t.source,
                    name.span,
                ));
            }
        };
        let t = match chain.last() {
            Some(t) => &**t,
            None => return Ok(()),
        };
        let frame = Frame {
            t,
            chain,
            block: None,
        };
        tracing::trace!(name = %name.value, "rendering include");
        self.nested(f, include.span, |r| {
            r.scoped(|r| {
                r.toplevel = true;
                r.render_scope(frame, &t.scope, out)
            })
        })
    }

    fn assign(&mut self, name: &'a ast::Ident, value: Eval<'a>) {
        if self.toplevel {
            self.stack.push_toplevel(name.as_str(), value);
        } else {
            self.stack.push_var(name.as_str(), value);
        }
    }

    /// Writes a value to the output, escaping it if required.
    fn write(&self, value: Eval<'a>, out: &mut String) -> Result<()> {
        match value {
            Eval::Value(v) => match (&*v, self.escape) {
                (Value::String(s), true) => escape::escape_into(out, s),
                (Value::String(s), false) => out.push_str(s),
                (v, true) => write!(Escaper(out), "{v}")?,
                (v, false) => write!(out, "{v}")?,
            },
            Eval::Markup(s) => out.push_str(&s),
            Eval::Undefined(u) => {
                if !self.undefined.allows_print() {
                    return Err(u.to_error());
                }
            }
        }
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////
    // Expressions
    ////////////////////////////////////////////////////////////////////////

    fn eval(&mut self, f: Frame<'a>, expr: &'a ast::Expr) -> Result<Eval<'a>> {
        match expr {
            ast::Expr::Literal(lit) => Ok(Eval::Value(ValueCow::Borrowed(&lit.value))),

            ast::Expr::Var(ast::Var { name }) => Ok(self
                .stack
                .lookup(name.as_str())
                .unwrap_or_else(|| Eval::undefined(f.t, name.span))),

            ast::Expr::Attr(attr) => match self.eval(f, &attr.base)? {
                Eval::Value(v) => Ok(value::attr(v, attr.name.as_str())
                    .map(Eval::Value)
                    .unwrap_or_else(|| Eval::undefined(f.t, attr.span))),
                Eval::Markup(_) => Ok(Eval::undefined(f.t, attr.span)),
                Eval::Undefined(u) => self.undefined_access(f, u, attr.span),
            },

            ast::Expr::Item(item) => {
                let base = self.eval(f, &item.base)?;
                let index = self.eval(f, &item.index)?;
                let base = match base {
                    Eval::Value(v) => v,
                    Eval::Markup(s) => ValueCow::Owned(Value::String(s)),
                    Eval::Undefined(u) => return self.undefined_access(f, u, item.span),
                };
                let index = match index {
                    Eval::Undefined(u) => return self.undefined_operation(u),
                    index => self.to_value(index)?,
                };
                Ok(value::item(base, &index)
                    .map(Eval::Value)
                    .unwrap_or_else(|| Eval::undefined(f.t, item.span)))
            }

            ast::Expr::Call(call) => self.eval_call(f, call, None),

            ast::Expr::Filter(filter) => self.eval_filter(f, filter),

            ast::Expr::Test(test) => self.eval_test(f, test),

            ast::Expr::Unary(unary) => self.eval_unary(f, unary),

            ast::Expr::Binary(binary) => self.eval_binary(f, binary),

            ast::Expr::Cond(ast::Cond {
                cond,
                then,
                otherwise,
                span,
            }) => {
                let c = self.eval(f, cond)?;
                if self.truthy(c)? {
                    self.eval(f, then)
                } else {
                    match otherwise {
                        Some(otherwise) => self.eval(f, otherwise),
                        None => Ok(Eval::undefined_because(f.t, *span, Reason::NoElse)),
                    }
                }
            }

            ast::Expr::List(list) => {
                let mut items = Vec::with_capacity(list.items.len());
                for expr in &list.items {
                    let value = self.eval(f, expr)?;
                    items.push(self.to_value(value)?);
                }
                Ok(Eval::owned(Value::List(items)))
            }

            ast::Expr::Map(map) => {
                let mut items = Map::with_capacity(map.items.len());
                for (key, expr) in &map.items {
                    let key = match self.eval(f, key)? {
                        Eval::Undefined(u) => return Err(u.to_error()),
                        key => match self.to_value(key)? {
                            Value::String(s) => s,
                            key => key.to_string(),
                        },
                    };
                    let value = self.eval(f, expr)?;
                    items.insert(key, self.to_value(value)?);
                }
                Ok(Eval::owned(Value::Map(items)))
            }
        }
    }

    fn eval_unary(&mut self, f: Frame<'a>, unary: &'a ast::Unary) -> Result<Eval<'a>> {
        let value = self.eval(f, &unary.expr)?;
        if unary.op == ast::UnaryOp::Not {
            let b = self.truthy(value)?;
            return Ok(Eval::owned(!b));
        }
        let value = match value {
            Eval::Undefined(u) => return self.undefined_operation(u),
            value => self.to_value(value)?,
        };
        let result = match (unary.op, value) {
            (ast::UnaryOp::Neg, Value::Integer(i)) => match i.checked_neg() {
                Some(i) => Value::Integer(i),
                None => {
                    return Err(f.err(
                        ErrorKind::InvalidOperation,
                        "integer overflow",
                        unary.span,
                    ))
                }
            },
            (ast::UnaryOp::Neg, Value::Float(x)) => Value::Float(-x),
            (ast::UnaryOp::Pos, v @ (Value::Integer(_) | Value::Float(_))) => v,
            (op, v) => {
                let sym = if op == ast::UnaryOp::Neg { "-" } else { "+" };
                return Err(f.err(
                    ErrorKind::InvalidOperation,
                    format!("cannot apply unary `{sym}` to {}", v.human()),
                    unary.span,
                ));
            }
        };
        Ok(Eval::owned(result))
    }

    fn eval_binary(&mut self, f: Frame<'a>, binary: &'a ast::Binary) -> Result<Eval<'a>> {
        let op = binary.op;
        match op {
            // Short circuiting operators return one of their operands.
            ast::BinaryOp::And | ast::BinaryOp::Or => {
                let lhs = self.eval(f, &binary.lhs)?;
                let truthy = self.truthy(lhs.clone())?;
                if truthy == (op == ast::BinaryOp::Or) {
                    Ok(lhs)
                } else {
                    self.eval(f, &binary.rhs)
                }
            }

            op => {
                let lhs = self.eval(f, &binary.lhs)?;
                let rhs = self.eval(f, &binary.rhs)?;
                if let Some(u) = first_undefined(&lhs, &rhs) {
                    if !self.undefined.allows_operation() {
                        return Err(u.to_error());
                    }
                    if op != ast::BinaryOp::Concat {
                        return Ok(Eval::Undefined(u.clone()));
                    }
                }

                let has_markup = matches!(lhs, Eval::Markup(_)) || matches!(rhs, Eval::Markup(_));
                if op == ast::BinaryOp::Concat && has_markup && self.escape {
                    let mut s = self.markup_str(lhs)?;
                    s.push_str(&self.markup_str(rhs)?);
                    return Ok(Eval::Markup(s));
                }

                let lhs = self.operand(lhs)?;
                let rhs = self.operand(rhs)?;
                value::binary(op, &lhs, &rhs)
                    .map(Eval::owned)
                    .map_err(f.enrich(binary.span))
            }
        }
    }

    fn eval_call(
        &mut self,
        f: Frame<'a>,
        call: &'a ast::Call,
        caller: Option<Caller<'a>>,
    ) -> Result<Eval<'a>> {
        let var = match &*call.callee {
            ast::Expr::Var(var) => var,
            ast::Expr::Attr(attr) if caller.is_none() => return self.call_method(f, attr, call),
            callee => {
                return Err(f.err(
                    ErrorKind::InvalidOperation,
                    "expression is not callable",
                    callee.span(),
                ))
            }
        };
        let name = var.name.as_str();

        if caller.is_none() {
            match name {
                "super" => return self.call_super(f, call),
                "caller" => return self.call_caller(f, call),
                _ => {}
            }
        }

        let found = f
            .chain
            .iter()
            .find_map(|t| t.macros.get(name).map(|m| (&**t, m)));
        if let Some((t, m)) = found {
            let def = Frame {
                t,
                chain: f.chain,
                block: None,
            };
            return self.call_macro(f, def, m, call, caller);
        }

        if caller.is_some() {
            return Err(f.err(
                ErrorKind::InvalidOperation,
                format!("`call` block expected a macro, found `{name}`"),
                var.name.span,
            ));
        }

        let engine = self.engine;
        match engine.functions.get(name) {
            Some(func) => {
                self.no_kwargs(f, &call.args, "function", name)?;
                let args = self.eval_args(f, &call.args)?;
                func(&args).map(Eval::owned).map_err(f.enrich(call.span))
            }
            None => Err(f.err(
                ErrorKind::UnknownFunction,
                format!("unknown function `{name}`"),
                var.name.span,
            )),
        }
    }

    /// Calls a method on a value, e.g. `user.items()` or `loop.cycle(..)`.
    fn call_method(&mut self, f: Frame<'a>, attr: &'a ast::Attr, call: &'a ast::Call) -> Result<Eval<'a>> {
        let loop_index = match &*attr.base {
            ast::Expr::Var(var) if var.name.as_str() == "loop" => self.stack.loop_index(),
            _ => None,
        };
        let base = match self.eval(f, &attr.base)? {
            Eval::Undefined(u) => return self.undefined_access(f, u, call.span),
            base => self.to_value(base)?,
        };
        let name = attr.name.as_str();
        self.no_kwargs(f, &call.args, "method", name)?;
        let args = self.eval_args(f, &call.args)?;

        if let (Some(index0), "cycle") = (loop_index, name) {
            let value = iter::cycle(index0, args).map_err(f.enrich(call.span))?;
            return Ok(Eval::owned(value));
        }

        let result: Value = match (name, &base) {
            ("items" | "keys" | "values", Value::Map(map)) => {
                if !args.is_empty() {
                    return Err(f.err(
                        ErrorKind::ArgumentMismatch,
                        format!("method `{name}` takes no arguments"),
                        call.args.span,
                    ));
                }
                match name {
                    "items" => map
                        .iter()
                        .map(|(k, v)| Value::List(vec![Value::from(k.as_str()), v.clone()]))
                        .collect(),
                    "keys" => map.keys().map(|k| Value::from(k.as_str())).collect(),
                    _ => map.values().cloned().collect(),
                }
            }
            _ => {
                return Err(f.err(
                    ErrorKind::InvalidOperation,
                    format!("{} has no method `{name}`", base.human()),
                    attr.name.span,
                ))
            }
        };
        Ok(Eval::owned(result))
    }

    fn call_macro(
        &mut self,
        f: Frame<'a>,
        def: Frame<'a>,
        m: &'a ast::Macro,
        call: &'a ast::Call,
        caller: Option<Caller<'a>>,
    ) -> Result<Eval<'a>> {
        let what = format!("macro `{}`", m.name.as_str());
        let bound = self.bind_args(f, &what, &m.params, &call.args, call.span)?;
        self.nested(f, call.span, |r| {
            r.scoped(|r| {
                r.stack.push(State::Boundary);
                r.bind(def, &m.params, bound, Some(m.name.as_str()))?;
                r.callers.push(caller);
                let mut buf = String::new();
                let result = r.render_scope(def, &m.body, &mut buf);
                r.callers.pop();
                result?;
                Ok(r.markup(buf))
            })
        })
    }

    fn call_caller(&mut self, f: Frame<'a>, call: &'a ast::Call) -> Result<Eval<'a>> {
        let caller = match self.callers.last().copied().flatten() {
            Some(caller) => caller,
            None => {
                return Err(f.err(
                    ErrorKind::InvalidOperation,
                    "`caller()` used outside of a macro invoked by a `call` block",
                    call.span,
                ))
            }
        };
        let bound = self.bind_args(f, "`caller`", caller.params, &call.args, call.span)?;
        self.nested(f, call.span, |r| {
            r.scoped(|r| {
                r.stack.push(State::Caller(caller.resume));
                r.bind(caller.frame, caller.params, bound, None)?;
                // The body sees the caller of the enclosing macro, if any.
                let current = r.callers.pop();
                let mut buf = String::new();
                let result = r.render_scope(caller.frame, caller.body, &mut buf);
                if let Some(current) = current {
                    r.callers.push(current);
                }
                result?;
                Ok(r.markup(buf))
            })
        })
    }

    fn call_super(&mut self, f: Frame<'a>, call: &'a ast::Call) -> Result<Eval<'a>> {
        let (name, i) = match f.block {
            Some(block) => block,
            None => {
                return Err(f.err(
                    ErrorKind::InvalidOperation,
                    "`super()` used outside of a block",
                    call.span,
                ))
            }
        };
        if !call.args.values.is_empty() || !call.args.kwargs.is_empty() {
            return Err(f.err(
                ErrorKind::ArgumentMismatch,
                "`super()` takes no arguments",
                call.args.span,
            ));
        }
        let found = f
            .chain
            .iter()
            .enumerate()
            .skip(i + 1)
            .find_map(|(j, t)| t.blocks.get(name).map(|block| (j, &**t, block)));
        let (j, t, block) = match found {
            Some(found) => found,
            None => {
                return Err(f.err(
                    ErrorKind::InvalidOperation,
                    format!("block `{name}` has no parent block"),
                    call.span,
                ))
            }
        };
        let frame = Frame {
            t,
            chain: f.chain,
            block: Some((name, j)),
        };
        self.nested(f, call.span, |r| {
            r.scoped(|r| {
                let mut buf = String::new();
                r.render_scope(frame, &block.body, &mut buf)?;
                Ok(r.markup(buf))
            })
        })
    }

    /// Matches call arguments to parameters, positional then keyword.
    fn bind_args(
        &mut self,
        f: Frame<'a>,
        what: &str,
        params: &'a [ast::Param],
        args: &'a ast::Args,
        span: Span,
    ) -> Result<Vec<Option<Eval<'a>>>> {
        if args.values.len() > params.len() {
            return Err(f.err(
                ErrorKind::ArgumentMismatch,
                format!(
                    "{what} takes {} argument{} but {} were given",
                    params.len(),
                    if params.len() == 1 { "" } else { "s" },
                    args.values.len()
                ),
                span,
            ));
        }
        let mut bound = Vec::with_capacity(params.len());
        for expr in &args.values {
            bound.push(Some(self.eval(f, expr)?));
        }
        bound.resize_with(params.len(), || None);
        for (name, expr) in &args.kwargs {
            let i = match params.iter().position(|p| p.name.name == name.name) {
                Some(i) => i,
                None => {
                    return Err(f.err(
                        ErrorKind::ArgumentMismatch,
                        format!("{what} has no parameter `{}`", name.name),
                        name.span,
                    ))
                }
            };
            if bound[i].is_some() {
                return Err(f.err(
                    ErrorKind::ArgumentMismatch,
                    format!("{what} got multiple values for parameter `{}`", name.name),
                    name.span,
                ));
            }
            bound[i] = Some(self.eval(f, expr)?);
        }
        Ok(bound)
    }

    /// Pushes parameters onto the stack, missing ones take their default.
    fn bind(
        &mut self,
        def: Frame<'a>,
        params: &'a [ast::Param],
        bound: Vec<Option<Eval<'a>>>,
        callee: Option<&'a str>,
    ) -> Result<()> {
        for (param, value) in params.iter().zip(bound) {
            let value = match (value, &param.default) {
                (Some(value), _) => value,
                (None, Some(default)) => self.eval(def, default)?,
                (None, None) => {
                    let reason = Reason::MissingArg {
                        param: param.name.as_str(),
                        callee,
                    };
                    Eval::undefined_because(def.t, param.name.span, reason)
                }
            };
            self.stack.push_var(param.name.as_str(), value);
        }
        Ok(())
    }

    fn eval_filter(&mut self, f: Frame<'a>, filter: &'a ast::Filter) -> Result<Eval<'a>> {
        let name = filter.name.as_str();
        match name {
            "default" | "d" => return self.filter_default(f, filter),
            "safe" | "escape" | "e" => return self.filter_markup(f, filter),
            _ => {}
        }

        let engine = self.engine;
        let func = match engine.filters.get(name) {
            Some(func) => func,
            None => {
                return Err(f.err(
                    ErrorKind::UnknownFilter,
                    format!("unknown filter `{name}`"),
                    filter.name.span,
                ))
            }
        };
        self.no_kwargs(f, &filter.args, "filter", name)?;

        let receiver = self.eval(f, &filter.receiver)?;
        let is_markup = matches!(receiver, Eval::Markup(_));
        let value = match receiver {
            Eval::Undefined(u) => return self.undefined_operation(u),
            receiver => self.to_value(receiver)?,
        };
        let args = self.eval_args(f, &filter.args)?;
        let result = func(value, args).map_err(f.enrich(filter.name.span))?;
        Ok(match result {
            Value::String(s) if is_markup => Eval::Markup(s),
            // JSON output is escaped for HTML by the filter itself.
            Value::String(s) if name == "tojson" => self.markup(s),
            result => Eval::owned(result),
        })
    }

    /// The `default` filter, the only filter that accepts undefined values.
    fn filter_default(&mut self, f: Frame<'a>, filter: &'a ast::Filter) -> Result<Eval<'a>> {
        self.no_kwargs(f, &filter.args, "filter", filter.name.as_str())?;
        let args = &filter.args.values;
        if args.len() > 2 {
            return Err(f.err(
                ErrorKind::ArgumentMismatch,
                format!(
                    "filter `{}` expected at most 2 arguments, found {}",
                    filter.name.as_str(),
                    args.len()
                ),
                filter.args.span,
            ));
        }
        let receiver = self.eval(f, &filter.receiver)?;
        let boolean = match args.get(1) {
            Some(expr) => {
                let b = self.eval(f, expr)?;
                self.truthy(b)?
            }
            None => false,
        };
        let missing = match &receiver {
            Eval::Undefined(_) => true,
            Eval::Value(v) => boolean && !v.is_true(),
            Eval::Markup(s) => boolean && s.is_empty(),
        };
        if !missing {
            return Ok(receiver);
        }
        match args.first() {
            Some(expr) => self.eval(f, expr),
            None => Ok(Eval::owned("")),
        }
    }

    /// The `safe` and `escape` filters which mark their output as safe.
    fn filter_markup(&mut self, f: Frame<'a>, filter: &'a ast::Filter) -> Result<Eval<'a>> {
        let name = filter.name.as_str();
        if !filter.args.values.is_empty() || !filter.args.kwargs.is_empty() {
            return Err(f.err(
                ErrorKind::ArgumentMismatch,
                format!("filter `{name}` takes no arguments"),
                filter.args.span,
            ));
        }
        match self.eval(f, &filter.receiver)? {
            Eval::Value(v) => {
                let s = v.to_string();
                Ok(Eval::Markup(match name {
                    "safe" => s,
                    _ => escape::escape(&s),
                }))
            }
            receiver => Ok(receiver),
        }
    }

    fn eval_test(&mut self, f: Frame<'a>, test: &'a ast::Test) -> Result<Eval<'a>> {
        let receiver = self.eval(f, &test.receiver)?;
        let result = match test.name.as_str() {
            "defined" => !matches!(receiver, Eval::Undefined(_)),
            "undefined" => matches!(receiver, Eval::Undefined(_)),
            name => {
                let engine = self.engine;
                let func = match engine.tests.get(name) {
                    Some(func) => func,
                    None => {
                        return Err(f.err(
                            ErrorKind::UnknownTest,
                            format!("unknown test `{name}`"),
                            test.name.span,
                        ))
                    }
                };
                self.no_kwargs(f, &test.args, "test", name)?;
                match receiver {
                    Eval::Undefined(u) => {
                        if !self.undefined.allows_operation() {
                            return Err(u.to_error());
                        }
                        false
                    }
                    receiver => {
                        let value = self.to_value(receiver)?;
                        let args = self.eval_args(f, &test.args)?;
                        func(value, args)
                            .map_err(f.enrich(test.name.span))?
                            .is_true()
                    }
                }
            }
        };
        Ok(Eval::owned(result != test.negated))
    }

    fn eval_args(&mut self, f: Frame<'a>, args: &'a ast::Args) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(args.values.len());
        for expr in &args.values {
            let value = self.eval(f, expr)?;
            values.push(self.to_value(value)?);
        }
        Ok(values)
    }

    fn no_kwargs(&self, f: Frame<'a>, args: &ast::Args, what: &str, name: &str) -> Result<()> {
        match args.kwargs.first() {
            Some((kw, _)) => Err(f.err(
                ErrorKind::ArgumentMismatch,
                format!("{what} `{name}` does not accept keyword arguments"),
                kw.span,
            )),
            None => Ok(()),
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Undefined handling
    ////////////////////////////////////////////////////////////////////////

    fn truthy(&self, value: Eval<'a>) -> Result<bool> {
        match value {
            Eval::Value(v) => Ok(v.is_true()),
            Eval::Markup(s) => Ok(!s.is_empty()),
            Eval::Undefined(u) => {
                if !self.undefined.allows_truthiness() {
                    return Err(u.to_error());
                }
                Ok(false)
            }
        }
    }

    fn to_value(&self, value: Eval<'a>) -> Result<Value> {
        match value {
            Eval::Value(v) => Ok(v.into_owned()),
            Eval::Markup(s) => Ok(Value::String(s)),
            Eval::Undefined(u) => {
                if !self.undefined.allows_operation() {
                    return Err(u.to_error());
                }
                Ok(Value::None)
            }
        }
    }

    /// Converts a binary operand, undefined operands only reach here when
    /// concatenating in which case they are empty.
    fn operand(&self, value: Eval<'a>) -> Result<Value> {
        match value {
            Eval::Undefined(_) => Ok(Value::String(String::new())),
            value => self.to_value(value),
        }
    }

    fn markup_str(&self, value: Eval<'a>) -> Result<String> {
        match value {
            Eval::Markup(s) => Ok(s),
            Eval::Undefined(_) => Ok(String::new()),
            Eval::Value(v) => Ok(escape::escape(&v.to_string())),
        }
    }

    fn undefined_operation(&self, u: Undefined<'a>) -> Result<Eval<'a>> {
        if !self.undefined.allows_operation() {
            return Err(u.to_error());
        }
        Ok(Eval::Undefined(u))
    }

    fn undefined_access(&self, f: Frame<'a>, u: Undefined<'a>, span: Span) -> Result<Eval<'a>> {
        if !self.undefined.allows_attribute() {
            return Err(u.to_error());
        }
        Ok(Eval::undefined(f.t, span))
    }

    ////////////////////////////////////////////////////////////////////////
    // Helpers
    ////////////////////////////////////////////////////////////////////////

    /// Rendered output that is safe to print, only marked as such when
    /// escaping is enabled so that the `escape` filter still applies
    /// otherwise.
    fn markup(&self, s: String) -> Eval<'a> {
        if self.escape {
            Eval::Markup(s)
        } else {
            Eval::owned(s)
        }
    }

    /// Runs `g` in a new scope, variables it sets are dropped afterwards.
    fn scoped<T>(&mut self, g: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let mark = self.stack.len();
        let toplevel = std::mem::replace(&mut self.toplevel, false);
        let result = g(self);
        self.toplevel = toplevel;
        self.stack.truncate(mark);
        result
    }

    /// Runs `g` one level deeper, failing if the recursion limit is reached.
    fn nested<T>(
        &mut self,
        f: Frame<'a>,
        span: Span,
        g: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if self.depth >= self.max_recursion {
            return Err(f.err(
                ErrorKind::RecursionLimitExceeded,
                format!(
                    "maximum recursion depth of {} exceeded",
                    self.max_recursion
                ),
                span,
            ));
        }
        self.depth += 1;
        let result = g(self);
        self.depth -= 1;
        result
    }
}

fn first_undefined<'e, 'a>(lhs: &'e Eval<'a>, rhs: &'e Eval<'a>) -> Option<&'e Undefined<'a>> {
    match (lhs, rhs) {
        (Eval::Undefined(u), _) | (_, Eval::Undefined(u)) => Some(u),
        _ => None,
    }
}
