use crate::render::value::Eval;
use crate::value::ValueCow;
use crate::Value;

/// The variables visible to the renderer.
///
/// The bottom of the stack is always the render context. Variables are
/// resolved by searching from the top of the stack down.
#[cfg_attr(internal_debug, derive(Debug))]
pub struct Stack<'a> {
    stack: Vec<State<'a>>,
}

#[cfg_attr(internal_debug, derive(Debug))]
pub enum State<'a> {
    /// An entire scope of variables, always a map.
    Scope(ValueCow<'a>),

    /// A single variable.
    Var(&'a str, Eval<'a>),

    /// A variable set at the top level of a template, macros can see these.
    Toplevel(&'a str, Eval<'a>),

    /// The `loop` variable of a `for` loop at the given iteration.
    Loop(usize, Eval<'a>),

    /// A macro boundary, below it only top level variables and the render
    /// context are visible.
    Boundary,

    /// The body of a `call` block, lookups continue at the given height of
    /// the stack where the `call` block appeared.
    Caller(usize),
}

impl<'a> Stack<'a> {
    pub fn new(globals: &'a Value) -> Self {
        Self {
            stack: vec![State::Scope(ValueCow::Borrowed(globals))],
        }
    }

    /// Resolves a variable on the stack.
    pub fn lookup(&self, name: &str) -> Option<Eval<'a>> {
        self.resolve(name).map(|(value, _)| value)
    }

    /// Returns the iteration index if `loop` resolves to the variable of a
    /// `for` loop rather than something a template set.
    pub fn loop_index(&self) -> Option<usize> {
        self.resolve("loop").and_then(|(_, index0)| index0)
    }

    fn resolve(&self, name: &str) -> Option<(Eval<'a>, Option<usize>)> {
        let mut i = self.stack.len();
        let mut closed = false;
        while i > 0 {
            i -= 1;
            match &self.stack[i] {
                State::Toplevel(var, value) if *var == name => {
                    return Some((value.clone(), None));
                }
                State::Toplevel(..) => {}
                _ if closed && i > 0 => {}
                State::Scope(scope) => {
                    let value = match scope {
                        ValueCow::Borrowed(v) => v.get(name).map(ValueCow::Borrowed),
                        ValueCow::Owned(v) => v.get(name).cloned().map(ValueCow::Owned),
                    };
                    if let Some(value) = value {
                        return Some((Eval::Value(value), None));
                    }
                }
                State::Var(var, value) if *var == name => return Some((value.clone(), None)),
                State::Var(..) => {}
                State::Loop(index0, value) if name == "loop" => {
                    return Some((value.clone(), Some(*index0)));
                }
                State::Loop(..) => {}
                State::Boundary => closed = true,
                State::Caller(resume) => {
                    i = *resume;
                }
            }
        }
        None
    }

    pub fn push(&mut self, state: State<'a>) {
        self.stack.push(state);
    }

    pub fn push_var(&mut self, name: &'a str, value: Eval<'a>) {
        self.stack.push(State::Var(name, value));
    }

    pub fn push_toplevel(&mut self, name: &'a str, value: Eval<'a>) {
        self.stack.push(State::Toplevel(name, value));
    }

    pub fn push_loop(&mut self, index0: usize, info: Eval<'a>) {
        self.stack.push(State::Loop(index0, info));
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Drops everything above the given height, the render context is never
    /// dropped.
    pub fn truncate(&mut self, len: usize) {
        self.stack.truncate(len.max(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(stack: &Stack<'_>, name: &str) -> Option<Value> {
        match stack.lookup(name)? {
            Eval::Value(v) => Some(v.into_owned()),
            _ => None,
        }
    }

    #[test]
    fn stack_shadowing() {
        let globals = value! { x: 1, y: 2 };
        let mut stack = Stack::new(&globals);
        stack.push_var("x", Eval::owned(10));
        assert_eq!(get(&stack, "x"), Some(Value::Integer(10)));
        assert_eq!(get(&stack, "y"), Some(Value::Integer(2)));
        stack.truncate(1);
        assert_eq!(get(&stack, "x"), Some(Value::Integer(1)));
        assert_eq!(get(&stack, "z"), None);
    }

    #[test]
    fn stack_boundary_hides_locals() {
        let globals = value! { g: "global" };
        let mut stack = Stack::new(&globals);
        stack.push_var("local", Eval::owned("outer"));
        stack.push(State::Boundary);
        stack.push_var("param", Eval::owned("p"));
        assert_eq!(get(&stack, "param"), Some(Value::from("p")));
        assert_eq!(get(&stack, "g"), Some(Value::from("global")));
        assert_eq!(get(&stack, "local"), None);
    }

    #[test]
    fn stack_boundary_shows_toplevel() {
        let globals = value! { g: "global" };
        let mut stack = Stack::new(&globals);
        stack.push_toplevel("g", Eval::owned("shadowed"));
        stack.push_var("local", Eval::owned("outer"));
        stack.push(State::Boundary);
        stack.push_var("local", Eval::owned("param"));
        stack.push(State::Boundary);
        assert_eq!(get(&stack, "g"), Some(Value::from("shadowed")));
        assert_eq!(get(&stack, "local"), None);
    }

    #[test]
    fn stack_loop_index_respects_shadowing() {
        let globals = value! { "loop": { index0: 5 } };
        let mut stack = Stack::new(&globals);
        assert_eq!(stack.loop_index(), None);
        stack.push_loop(1, Eval::owned(value! { index0: 1 }));
        assert_eq!(stack.loop_index(), Some(1));
        assert_eq!(get(&stack, "loop"), Some(value! { index0: 1 }));
        stack.push_var("loop", Eval::owned("mine"));
        assert_eq!(stack.loop_index(), None);
    }

    #[test]
    fn stack_caller_resumes_at_call_site() {
        let globals = value! {};
        let mut stack = Stack::new(&globals);
        stack.push_var("site", Eval::owned("visible"));
        let resume = stack.len();
        stack.push(State::Boundary);
        stack.push_var("hidden", Eval::owned("macro local"));
        stack.push(State::Caller(resume));
        stack.push_var("row", Eval::owned(1));
        assert_eq!(get(&stack, "row"), Some(Value::Integer(1)));
        assert_eq!(get(&stack, "site"), Some(Value::from("visible")));
        assert_eq!(get(&stack, "hidden"), None);
    }
}
