use std::fmt::Display;
use std::rc::Rc;

use crate::runtime::{Class, Function};

/// An executable node. Expressions evaluate to a value handle; statements
/// with nothing to say evaluate to the empty handle.
#[derive(Debug, Clone)]
pub enum Stmt {
    Number(i64),
    String(String),
    Bool(bool),
    /// The `None` literal. Evaluates to the empty handle.
    None,
    /// A dotted identifier chain: the head is looked up in the closure,
    /// every further segment descends into instance fields.
    Variable(Vec<String>),
    Assignment {
        name: String,
        value: Box<Stmt>,
    },
    FieldAssignment {
        object: Box<Stmt>,
        field: String,
        value: Box<Stmt>,
    },
    Print(Vec<Stmt>),
    MethodCall {
        object: Box<Stmt>,
        method: String,
        args: Vec<Stmt>,
    },
    /// A call of a top-level function value looked up by name at runtime.
    Call {
        name: String,
        args: Vec<Stmt>,
    },
    NewInstance {
        class: Class,
        args: Vec<Stmt>,
    },
    ClassDefinition(Class),
    FunctionDef(Rc<Function>),
    /// `str(expr)`: what `print` would emit for the value, as a string.
    Stringify(Box<Stmt>),
    Add(Box<Stmt>, Box<Stmt>),
    Sub(Box<Stmt>, Box<Stmt>),
    Mult(Box<Stmt>, Box<Stmt>),
    Div(Box<Stmt>, Box<Stmt>),
    Or(Box<Stmt>, Box<Stmt>),
    And(Box<Stmt>, Box<Stmt>),
    Not(Box<Stmt>),
    Comparison {
        op: CompareOp,
        lhs: Box<Stmt>,
        rhs: Box<Stmt>,
    },
    Compound(Vec<Stmt>),
    IfElse {
        condition: Box<Stmt>,
        then_body: Box<Stmt>,
        else_body: Option<Box<Stmt>>,
    },
    /// Unwinds to the innermost enclosing `MethodBody`.
    Return(Box<Stmt>),
    /// Wraps every method and function body; the sole catcher of `Return`.
    MethodBody(Box<Stmt>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
}

impl Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareOp::Equal => f.write_str("=="),
            CompareOp::NotEqual => f.write_str("!="),
            CompareOp::Less => f.write_str("<"),
            CompareOp::Greater => f.write_str(">"),
            CompareOp::LessOrEqual => f.write_str("<="),
            CompareOp::GreaterOrEqual => f.write_str(">="),
        }
    }
}
