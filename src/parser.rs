use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::ast::{CompareOp, Stmt};
use crate::lexer::{Lexer, LexerError, Token};
use crate::runtime::{Class, Function, Method};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("lex error: {0}")]
    Lex(#[from] LexerError),
    #[error("expected {expected}, found {found:?}")]
    Unexpected {
        expected: &'static str,
        found: Token,
    },
    #[error("unknown base class '{0}'")]
    UnknownBaseClass(String),
    #[error("'return' outside of a function or method")]
    ReturnOutsideFunction,
    #[error("str() takes exactly one argument")]
    StrArity,
}

/// Parse a whole program into one executable compound statement.
pub fn parse(code: &str) -> Result<Stmt, ParseError> {
    let lexer = Lexer::new(code)?;
    let mut parser = Parser {
        lexer,
        classes: HashMap::new(),
        def_depth: 0,
    };
    parser.program()
}

struct Parser<'code> {
    lexer: Lexer<'code>,
    // Classes seen so far; `Name(...)` in a call position instantiates one.
    classes: HashMap<String, Class>,
    // How many `def` bodies enclose the current position.
    def_depth: usize,
}

impl<'code> Parser<'code> {
    fn program(&mut self) -> Result<Stmt, ParseError> {
        let mut stmts = Vec::new();
        while *self.lexer.current() != Token::Eof {
            stmts.push(self.statement()?);
        }
        Ok(Stmt::Compound(stmts))
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        match self.lexer.current() {
            Token::Class => self.class_definition(),
            Token::Def => self.function_definition(),
            Token::If => self.if_statement(),
            _ => {
                let stmt = self.simple_statement()?;
                self.expect(Token::Newline, "end of line")?;
                Ok(stmt)
            }
        }
    }

    // A statement that fits on one line, without its terminating newline.
    fn simple_statement(&mut self) -> Result<Stmt, ParseError> {
        match self.lexer.current() {
            Token::Print => {
                self.lexer.advance()?;
                let mut args = Vec::new();
                if *self.lexer.current() != Token::Newline {
                    args.push(self.expression()?);
                    while *self.lexer.current() == Token::Char(',') {
                        self.lexer.advance()?;
                        args.push(self.expression()?);
                    }
                }
                Ok(Stmt::Print(args))
            }
            Token::Return => {
                if self.def_depth == 0 {
                    return Err(ParseError::ReturnOutsideFunction);
                }
                self.lexer.advance()?;
                let value = if *self.lexer.current() == Token::Newline {
                    Stmt::None
                } else {
                    self.expression()?
                };
                Ok(Stmt::Return(Box::new(value)))
            }
            _ => self.assignment_or_expression(),
        }
    }

    fn assignment_or_expression(&mut self) -> Result<Stmt, ParseError> {
        let expr = self.expression()?;
        if *self.lexer.current() != Token::Char('=') {
            return Ok(expr);
        }
        let Stmt::Variable(mut ids) = expr else {
            return Err(ParseError::Unexpected {
                expected: "an assignable name before '='",
                found: self.lexer.current().clone(),
            });
        };
        self.lexer.advance()?;
        let value = Box::new(self.expression()?);
        if ids.len() == 1 {
            Ok(Stmt::Assignment {
                name: ids.remove(0),
                value,
            })
        } else if let Some(field) = ids.pop() {
            Ok(Stmt::FieldAssignment {
                object: Box::new(Stmt::Variable(ids)),
                field,
                value,
            })
        } else {
            Err(ParseError::Unexpected {
                expected: "an assignable name before '='",
                found: Token::Char('='),
            })
        }
    }

    fn class_definition(&mut self) -> Result<Stmt, ParseError> {
        self.lexer.advance()?;
        let name = self.expect_id()?;
        let parent = if *self.lexer.current() == Token::Char('(') {
            self.lexer.advance()?;
            let base = self.expect_id()?;
            self.expect(Token::Char(')'), "')' after the base class")?;
            Some(
                self.classes
                    .get(&base)
                    .cloned()
                    .ok_or(ParseError::UnknownBaseClass(base))?,
            )
        } else {
            None
        };
        self.expect(Token::Char(':'), "':' after the class name")?;
        self.expect(Token::Newline, "end of line")?;
        self.expect(Token::Indent, "an indented class body")?;
        let mut methods = Vec::new();
        while *self.lexer.current() == Token::Def {
            methods.push(self.method_definition()?);
        }
        self.expect(Token::Dedent, "a method definition")?;

        let class = Class::new(name.clone(), methods, parent);
        self.classes.insert(name, class.clone());
        Ok(Stmt::ClassDefinition(class))
    }

    fn method_definition(&mut self) -> Result<Method, ParseError> {
        let (name, formal_params, body) = self.def_signature_and_body()?;
        Ok(Method {
            name,
            formal_params,
            body,
        })
    }

    fn function_definition(&mut self) -> Result<Stmt, ParseError> {
        let (name, formal_params, body) = self.def_signature_and_body()?;
        Ok(Stmt::FunctionDef(Rc::new(Function {
            name,
            formal_params,
            body,
        })))
    }

    // `def name(params):` followed by a suite, which is wrapped in the
    // MethodBody node that catches `return`.
    fn def_signature_and_body(&mut self) -> Result<(String, Vec<String>, Stmt), ParseError> {
        self.expect(Token::Def, "'def'")?;
        let name = self.expect_id()?;
        self.expect(Token::Char('('), "'(' after the name")?;
        let mut params = Vec::new();
        if *self.lexer.current() != Token::Char(')') {
            params.push(self.expect_id()?);
            while *self.lexer.current() == Token::Char(',') {
                self.lexer.advance()?;
                params.push(self.expect_id()?);
            }
        }
        self.expect(Token::Char(')'), "')' after the parameters")?;
        self.expect(Token::Char(':'), "':' after the signature")?;
        self.def_depth += 1;
        let suite = self.suite();
        self.def_depth -= 1;
        Ok((name, params, Stmt::MethodBody(Box::new(suite?))))
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        self.lexer.advance()?;
        let condition = Box::new(self.expression()?);
        self.expect(Token::Char(':'), "':' after the condition")?;
        let then_body = Box::new(self.suite()?);
        let else_body = if *self.lexer.current() == Token::Else {
            self.lexer.advance()?;
            self.expect(Token::Char(':'), "':' after 'else'")?;
            Some(Box::new(self.suite()?))
        } else {
            None
        };
        Ok(Stmt::IfElse {
            condition,
            then_body,
            else_body,
        })
    }

    // Either a simple statement on the same line, or an indented block.
    fn suite(&mut self) -> Result<Stmt, ParseError> {
        if *self.lexer.current() != Token::Newline {
            let stmt = self.simple_statement()?;
            self.expect(Token::Newline, "end of line")?;
            return Ok(stmt);
        }
        self.lexer.advance()?;
        self.expect(Token::Indent, "an indented block")?;
        let mut stmts = Vec::new();
        while *self.lexer.current() != Token::Dedent {
            stmts.push(self.statement()?);
        }
        self.lexer.advance()?;
        Ok(Stmt::Compound(stmts))
    }

    fn expression(&mut self) -> Result<Stmt, ParseError> {
        self.or_test()
    }

    fn or_test(&mut self) -> Result<Stmt, ParseError> {
        let mut expr = self.and_test()?;
        while *self.lexer.current() == Token::Or {
            self.lexer.advance()?;
            let rhs = self.and_test()?;
            expr = Stmt::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn and_test(&mut self) -> Result<Stmt, ParseError> {
        let mut expr = self.not_test()?;
        while *self.lexer.current() == Token::And {
            self.lexer.advance()?;
            let rhs = self.not_test()?;
            expr = Stmt::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn not_test(&mut self) -> Result<Stmt, ParseError> {
        if *self.lexer.current() == Token::Not {
            self.lexer.advance()?;
            let arg = self.not_test()?;
            return Ok(Stmt::Not(Box::new(arg)));
        }
        self.comparison()
    }

    // A single, non-chained comparison.
    fn comparison(&mut self) -> Result<Stmt, ParseError> {
        let lhs = self.sum()?;
        let op = match self.lexer.current() {
            Token::Eq => CompareOp::Equal,
            Token::NotEq => CompareOp::NotEqual,
            Token::Char('<') => CompareOp::Less,
            Token::Char('>') => CompareOp::Greater,
            Token::LessOrEq => CompareOp::LessOrEqual,
            Token::GreaterOrEq => CompareOp::GreaterOrEqual,
            _ => return Ok(lhs),
        };
        self.lexer.advance()?;
        let rhs = self.sum()?;
        Ok(Stmt::Comparison {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn sum(&mut self) -> Result<Stmt, ParseError> {
        let mut expr = self.term()?;
        loop {
            match self.lexer.current() {
                Token::Char('+') => {
                    self.lexer.advance()?;
                    let rhs = self.term()?;
                    expr = Stmt::Add(Box::new(expr), Box::new(rhs));
                }
                Token::Char('-') => {
                    self.lexer.advance()?;
                    let rhs = self.term()?;
                    expr = Stmt::Sub(Box::new(expr), Box::new(rhs));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn term(&mut self) -> Result<Stmt, ParseError> {
        let mut expr = self.primary()?;
        loop {
            match self.lexer.current() {
                Token::Char('*') => {
                    self.lexer.advance()?;
                    let rhs = self.primary()?;
                    expr = Stmt::Mult(Box::new(expr), Box::new(rhs));
                }
                Token::Char('/') => {
                    self.lexer.advance()?;
                    let rhs = self.primary()?;
                    expr = Stmt::Div(Box::new(expr), Box::new(rhs));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Stmt, ParseError> {
        match self.lexer.current().clone() {
            Token::Number(n) => {
                self.lexer.advance()?;
                Ok(Stmt::Number(n))
            }
            Token::String(s) => {
                self.lexer.advance()?;
                Ok(Stmt::String(s))
            }
            Token::True => {
                self.lexer.advance()?;
                Ok(Stmt::Bool(true))
            }
            Token::False => {
                self.lexer.advance()?;
                Ok(Stmt::Bool(false))
            }
            Token::None => {
                self.lexer.advance()?;
                Ok(Stmt::None)
            }
            Token::Char('(') => {
                self.lexer.advance()?;
                let expr = self.expression()?;
                self.expect(Token::Char(')'), "')'")?;
                Ok(expr)
            }
            Token::Id(_) => self.name_expression(),
            found => Err(ParseError::Unexpected {
                expected: "an expression",
                found,
            }),
        }
    }

    // A dotted identifier chain, optionally called. What a call means
    // depends on the shape: `Known(...)` instantiates a class declared
    // earlier, `str(x)` stringifies, any other bare `name(...)` is a
    // function call, and `a.b.method(...)` dispatches on an instance.
    fn name_expression(&mut self) -> Result<Stmt, ParseError> {
        let mut prefix = Vec::new();
        let mut last = self.expect_id()?;
        while *self.lexer.current() == Token::Char('.') {
            self.lexer.advance()?;
            prefix.push(std::mem::replace(&mut last, self.expect_id()?));
        }
        if *self.lexer.current() != Token::Char('(') {
            prefix.push(last);
            return Ok(Stmt::Variable(prefix));
        }
        let args = self.call_args()?;
        if !prefix.is_empty() {
            return Ok(Stmt::MethodCall {
                object: Box::new(Stmt::Variable(prefix)),
                method: last,
                args,
            });
        }
        if last == "str" {
            let mut args = args;
            let Some(arg) = args.pop() else {
                return Err(ParseError::StrArity);
            };
            if !args.is_empty() {
                return Err(ParseError::StrArity);
            }
            return Ok(Stmt::Stringify(Box::new(arg)));
        }
        if let Some(class) = self.classes.get(&last).cloned() {
            return Ok(Stmt::NewInstance { class, args });
        }
        Ok(Stmt::Call { name: last, args })
    }

    fn call_args(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(Token::Char('('), "'('")?;
        let mut args = Vec::new();
        if *self.lexer.current() != Token::Char(')') {
            args.push(self.expression()?);
            while *self.lexer.current() == Token::Char(',') {
                self.lexer.advance()?;
                args.push(self.expression()?);
            }
        }
        self.expect(Token::Char(')'), "')' after the arguments")?;
        Ok(args)
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> Result<(), ParseError> {
        if *self.lexer.current() != token {
            return Err(ParseError::Unexpected {
                expected,
                found: self.lexer.current().clone(),
            });
        }
        self.lexer.advance()?;
        Ok(())
    }

    fn expect_id(&mut self) -> Result<String, ParseError> {
        if let Token::Id(name) = self.lexer.current() {
            let name = name.clone();
            self.lexer.advance()?;
            return Ok(name);
        }
        Err(ParseError::Unexpected {
            expected: "an identifier",
            found: self.lexer.current().clone(),
        })
    }
}
