//! Filters, tests and functions that can be called from templates.

mod args;
mod builtins;
mod testers;

use std::collections::BTreeMap;

use crate::{Error, ErrorKind, Result, Value};

/// A type erased filter or test, called with the piped value and the
/// positional arguments.
pub type FilterFn = dyn Fn(Value, Vec<Value>) -> Result<Value> + Send + Sync + 'static;

/// A type erased function, called with the positional arguments.
pub type FunctionFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync + 'static;

pub fn new<F, R, A>(f: F) -> Box<FilterFn>
where
    F: Filter<R, A> + Send + Sync + 'static,
    R: FilterReturn,
    A: FilterArgs,
{
    Box::new(move |value: Value, args: Vec<Value>| -> Result<Value> {
        let args = A::from_args(value, args)?;
        let result = Filter::filter(&f, args);
        FilterReturn::to_value(result)
    })
}

pub fn function<F, R>(f: F) -> Box<FunctionFn>
where
    F: Fn(&[Value]) -> R + Send + Sync + 'static,
    R: FilterReturn,
{
    Box::new(move |args: &[Value]| -> Result<Value> { f(args).to_value() })
}

/// The built-in filters.
pub fn builtin_filters() -> BTreeMap<String, Box<FilterFn>> {
    let mut filters = BTreeMap::new();
    builtins::register(&mut filters);
    filters
}

/// The built-in tests.
pub fn builtin_tests() -> BTreeMap<String, Box<FilterFn>> {
    let mut tests = BTreeMap::new();
    testers::register(&mut tests);
    tests
}

/// The built-in functions.
pub fn builtin_functions() -> BTreeMap<String, Box<FunctionFn>> {
    let mut functions = BTreeMap::new();
    functions.insert("range".into(), function(builtins::range));
    functions
}

/// Represents any filter function.
///
/// This trait is used by the [`Engine::add_filter`][crate::Engine::add_filter]
/// and [`Engine::add_test`][crate::Engine::add_test] methods to abstract over
/// a variety of function and closure types. This includes filters with
/// variable argument types, return types and arity. The first argument to a
/// filter function will always receive the piped value. It can then have up
/// to four more arguments. The renderer will check the number of arguments
/// and the type of arguments when the filter is used.
///
/// [`Filter`] is implemented for functions that return any of the following
/// types.
///
/// - `R` where `R` implements `Into<Value>`
/// - `Result<R>` where `R` implements `Into<Value>`
///
/// [`Filter`] is implemented for functions that take any of the following
/// owned types as arguments.
/// - [`bool`]
/// - [`i64`]
/// - [`f64`], integers are converted
/// - [`String`]
/// - [`Vec<Value>`]
/// - [`Map`][crate::Map]
/// - [`Value`]
/// - [`Option<T>`] of any of the above, trailing optional arguments may be
///   omitted in the template
///
/// ## Examples
///
/// Consider the following template.
///
/// ```text
/// {{ user.name | split(" ") | last }}
/// ```
///
/// We could implement a `split` filter like this:
///
/// ```rust
/// use trellis::Engine;
///
/// let mut engine = Engine::new();
/// engine.add_filter("split", split);
///
/// fn split(s: String, sep: Option<String>) -> Vec<String> {
///     match sep {
///         Some(sep) => s.split(sep.as_str()).map(String::from).collect(),
///         None => s.split_whitespace().map(String::from).collect(),
///     }
/// }
/// ```
pub trait Filter<R, A> {
    #[doc(hidden)]
    fn filter(&self, args: A) -> R;
}

pub trait FilterArgs: Sized {
    fn from_args(value: Value, args: Vec<Value>) -> Result<Self>;
}

pub trait FilterArg: Sized {
    /// Whether the argument may be omitted.
    const OPTIONAL: bool = false;

    fn from_value(v: Value) -> args::Result<Self>;

    /// The value of the argument when it is omitted.
    fn missing() -> Option<Self> {
        None
    }
}

pub trait FilterReturn {
    fn to_value(self) -> Result<Value>;
}

////////////////////////////////////////////////////////////////////////////////
// Filter and FilterArgs
////////////////////////////////////////////////////////////////////////////////

macro_rules! impl_filter {
    ($($ty:ident $var:ident)*) => {
        impl<Func, R, V, $($ty,)*> Filter<R, (V, $($ty,)*)> for Func
        where
            Func: Fn(V, $($ty,)*) -> R,
            R: FilterReturn,
        {
            #[doc(hidden)]
            fn filter(&self, (v, $($var,)*): (V, $($ty,)*)) -> R {
                self(v, $($var,)*)
            }
        }

        impl<V, $($ty,)*> FilterArgs for (V, $($ty,)*)
        where
            V: FilterArg,
            $($ty: FilterArg,)*
        {
            #[allow(unused_mut, unused_variables)]
            fn from_args(value: Value, args: Vec<Value>) -> Result<Self> {
                check_args(&[$(<$ty as FilterArg>::OPTIONAL,)*], args.len())?;
                let v = V::from_value(value).map_err(err_expected_val)?;
                let mut args = args.into_iter();
                $(let $var = get_arg::<$ty>(args.next())?;)*
                Ok((v, $($var,)*))
            }
        }
    };
}

impl_filter! {}
impl_filter! { A a }
impl_filter! { A a B b }
impl_filter! { A a B b C c }
impl_filter! { A a B b C c D d }

fn check_args(optional: &[bool], got: usize) -> Result<()> {
    let max = optional.len();
    let min = optional.iter().take_while(|o| !**o).count();
    if (min..=max).contains(&got) {
        return Ok(());
    }
    let expected = if min == max {
        format!("{max} argument{}", if max == 1 { "" } else { "s" })
    } else {
        format!("{min} to {max} arguments")
    };
    Err(Error::new(
        ErrorKind::ArgumentMismatch,
        format!("filter expected {expected}, found {got}"),
    ))
}

fn get_arg<T: FilterArg>(value: Option<Value>) -> Result<T> {
    match value {
        Some(v) => T::from_value(v).map_err(err_expected_arg),
        None => T::missing().ok_or_else(|| {
            Error::new(ErrorKind::ArgumentMismatch, "filter expected more arguments")
        }),
    }
}

fn err_expected_arg(err: args::Error) -> Error {
    let args::Error::Type(exp, got) = err;
    Error::new(
        ErrorKind::InvalidOperation,
        format!("filter expected {exp} argument, found {got}"),
    )
}

fn err_expected_val(err: args::Error) -> Error {
    let args::Error::Type(exp, got) = err;
    Error::new(
        ErrorKind::InvalidOperation,
        format!("filter expected {exp} value, found {got}"),
    )
}

////////////////////////////////////////////////////////////////////////////////
// FilterReturn
////////////////////////////////////////////////////////////////////////////////

impl<T> FilterReturn for T
where
    T: Into<Value>,
{
    fn to_value(self) -> Result<Value> {
        Ok(self.into())
    }
}

impl<T> FilterReturn for Result<T>
where
    T: Into<Value>,
{
    fn to_value(self) -> Result<Value> {
        self.map(Into::into)
    }
}
