pub mod ast;
pub mod escape;
pub mod span;
pub mod template;
