//! Tree-walking interpreter for Mython, a small indentation-sensitive
//! dynamic language with classes, single inheritance and dunder operator
//! hooks.

pub mod ast;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod runtime;

use std::io::Write;

use anyhow::Result;

use runtime::{Closure, Context};

/// Lex, parse and execute a whole program, printing to `output`.
pub fn run(code: &str, output: &mut dyn Write) -> Result<()> {
    let program = parser::parse(code)?;
    let mut globals = Closure::new();
    let mut ctx = Context::new(output);
    interpreter::interpret(&program, &mut globals, &mut ctx)?;
    Ok(())
}
