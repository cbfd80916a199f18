use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{CompareOp, Stmt};
use crate::runtime::{
    self, Closure, Context, Instance, Object, ObjectHolder, RuntimeError, ADD_METHOD, INIT_METHOD,
};

/// Why evaluation of a node stopped early. `Return` is the only non-error
/// unwind in the language; it is intercepted by `Stmt::MethodBody` and must
/// never reach the host.
pub enum UnwindCause {
    Error(RuntimeError),
    Return(ObjectHolder),
}

impl From<RuntimeError> for UnwindCause {
    fn from(error: RuntimeError) -> UnwindCause {
        UnwindCause::Error(error)
    }
}

/// Run a program to completion against the given global closure. A stray
/// `Return` unwind ends execution quietly, an error unwind surfaces to the
/// host.
pub fn interpret(
    program: &Stmt,
    closure: &mut Closure,
    ctx: &mut Context,
) -> Result<(), RuntimeError> {
    debug!("executing program");
    match execute(program, closure, ctx) {
        Ok(_) => Ok(()),
        Err(UnwindCause::Return(_)) => Ok(()),
        Err(UnwindCause::Error(error)) => Err(error),
    }
}

pub fn execute(
    stmt: &Stmt,
    closure: &mut Closure,
    ctx: &mut Context,
) -> Result<ObjectHolder, UnwindCause> {
    match stmt {
        Stmt::Number(n) => Ok(ObjectHolder::own(Object::Number(*n))),
        Stmt::String(s) => Ok(ObjectHolder::own(Object::String(s.clone()))),
        Stmt::Bool(b) => Ok(ObjectHolder::own(Object::Bool(*b))),
        Stmt::None => Ok(ObjectHolder::none()),
        Stmt::Variable(ids) => lookup_variable(ids, closure),
        Stmt::Assignment { name, value } => {
            let value = execute(value, closure, ctx)?;
            closure.insert(name.clone(), value.share());
            Ok(value)
        }
        Stmt::FieldAssignment {
            object,
            field,
            value,
        } => {
            let target = execute(object, closure, ctx)?;
            let instance = as_instance(&target, "field assignment target is not a class instance")?;
            let value = execute(value, closure, ctx)?;
            instance.fields_mut().insert(field.clone(), value.share());
            Ok(value)
        }
        Stmt::Print(args) => {
            let mut first = true;
            for arg in args {
                let value = execute(arg, closure, ctx)?;
                let text = value.render(ctx)?;
                let out = ctx.output_stream();
                if !first {
                    write!(out, " ").map_err(RuntimeError::from)?;
                }
                write!(out, "{}", text).map_err(RuntimeError::from)?;
                first = false;
            }
            writeln!(ctx.output_stream()).map_err(RuntimeError::from)?;
            Ok(ObjectHolder::none())
        }
        Stmt::MethodCall {
            object,
            method,
            args,
        } => {
            let target = execute(object, closure, ctx)?;
            let instance = as_instance(&target, "method call on a non-instance")?;
            let mut actual = Vec::with_capacity(args.len());
            for arg in args {
                actual.push(execute(arg, closure, ctx)?);
            }
            Ok(instance.call(method, actual, ctx)?)
        }
        Stmt::Call { name, args } => {
            let callee = closure
                .get(name)
                .map(ObjectHolder::share)
                .ok_or_else(|| RuntimeError::NameError(name.clone()))?;
            let Some(Object::Function(function)) = callee.get() else {
                return Err(RuntimeError::TypeError("call target is not a function").into());
            };
            let function = Rc::clone(function);
            let mut actual = Vec::with_capacity(args.len());
            for arg in args {
                actual.push(execute(arg, closure, ctx)?);
            }
            if actual.len() != function.formal_params.len() {
                return Err(RuntimeError::ArityMismatch {
                    name: function.name.clone(),
                    expected: function.formal_params.len(),
                    got: actual.len(),
                }
                .into());
            }
            // Fresh scope: the function itself (for recursion) plus formals.
            let mut local = Closure::new();
            local.insert(function.name.clone(), callee.share());
            for (param, arg) in function.formal_params.iter().zip(actual) {
                local.insert(param.clone(), arg);
            }
            execute(&function.body, &mut local, ctx)
        }
        Stmt::NewInstance { class, args } => {
            let instance = Instance::new(class.clone());
            let holder = ObjectHolder::own(Object::Instance(instance.clone()));
            if instance.has_method(INIT_METHOD, args.len()) {
                let mut actual = Vec::with_capacity(args.len());
                for arg in args {
                    actual.push(execute(arg, closure, ctx)?);
                }
                instance.call(INIT_METHOD, actual, ctx)?;
            }
            Ok(holder.share())
        }
        Stmt::ClassDefinition(class) => {
            trace!(class = %class.name(), "class definition");
            closure.insert(
                class.name().to_string(),
                ObjectHolder::own(Object::Class(class.clone())),
            );
            Ok(ObjectHolder::none())
        }
        Stmt::FunctionDef(function) => {
            closure.insert(
                function.name.clone(),
                ObjectHolder::own(Object::Function(Rc::clone(function))),
            );
            Ok(ObjectHolder::none())
        }
        Stmt::Stringify(arg) => {
            let value = execute(arg, closure, ctx)?;
            let text = value.render(ctx)?;
            Ok(ObjectHolder::own(Object::String(text)))
        }
        Stmt::Add(lhs, rhs) => {
            let lhs = execute(lhs, closure, ctx)?;
            let rhs = execute(rhs, closure, ctx)?;
            match (lhs.get(), rhs.get()) {
                (Some(Object::Number(l)), Some(Object::Number(r))) => {
                    Ok(ObjectHolder::own(Object::Number(l + r)))
                }
                (Some(Object::String(l)), Some(Object::String(r))) => {
                    Ok(ObjectHolder::own(Object::String(format!("{}{}", l, r))))
                }
                (Some(Object::Instance(instance)), _) => {
                    Ok(instance.call(ADD_METHOD, vec![rhs.share()], ctx)?)
                }
                _ => Err(RuntimeError::TypeError("unsupported operands for '+'").into()),
            }
        }
        Stmt::Sub(lhs, rhs) => {
            let (l, r) =
                numeric_operands(lhs, rhs, "unsupported operands for '-'", closure, ctx)?;
            Ok(ObjectHolder::own(Object::Number(l - r)))
        }
        Stmt::Mult(lhs, rhs) => {
            let (l, r) =
                numeric_operands(lhs, rhs, "unsupported operands for '*'", closure, ctx)?;
            Ok(ObjectHolder::own(Object::Number(l * r)))
        }
        Stmt::Div(lhs, rhs) => {
            let (l, r) =
                numeric_operands(lhs, rhs, "unsupported operands for '/'", closure, ctx)?;
            if r == 0 {
                return Err(RuntimeError::DivisionByZero.into());
            }
            Ok(ObjectHolder::own(Object::Number(l / r)))
        }
        Stmt::Or(lhs, rhs) => {
            let lhs = execute(lhs, closure, ctx)?;
            if runtime::is_true(&lhs) {
                Ok(ObjectHolder::own(Object::Bool(true)))
            } else {
                let rhs = execute(rhs, closure, ctx)?;
                Ok(ObjectHolder::own(Object::Bool(runtime::is_true(&rhs))))
            }
        }
        Stmt::And(lhs, rhs) => {
            let lhs = execute(lhs, closure, ctx)?;
            if runtime::is_true(&lhs) {
                let rhs = execute(rhs, closure, ctx)?;
                Ok(ObjectHolder::own(Object::Bool(runtime::is_true(&rhs))))
            } else {
                Ok(ObjectHolder::own(Object::Bool(false)))
            }
        }
        Stmt::Not(arg) => {
            let value = execute(arg, closure, ctx)?;
            Ok(ObjectHolder::own(Object::Bool(!runtime::is_true(&value))))
        }
        Stmt::Comparison { op, lhs, rhs } => {
            let lhs = execute(lhs, closure, ctx)?;
            let rhs = execute(rhs, closure, ctx)?;
            let result = match op {
                CompareOp::Equal => runtime::equal(&lhs, &rhs, ctx)?,
                CompareOp::NotEqual => runtime::not_equal(&lhs, &rhs, ctx)?,
                CompareOp::Less => runtime::less(&lhs, &rhs, ctx)?,
                CompareOp::Greater => runtime::greater(&lhs, &rhs, ctx)?,
                CompareOp::LessOrEqual => runtime::less_or_equal(&lhs, &rhs, ctx)?,
                CompareOp::GreaterOrEqual => runtime::greater_or_equal(&lhs, &rhs, ctx)?,
            };
            Ok(ObjectHolder::own(Object::Bool(result)))
        }
        Stmt::Compound(stmts) => {
            for stmt in stmts {
                execute(stmt, closure, ctx)?;
            }
            Ok(ObjectHolder::none())
        }
        Stmt::IfElse {
            condition,
            then_body,
            else_body,
        } => {
            let condition = execute(condition, closure, ctx)?;
            if runtime::is_true(&condition) {
                execute(then_body, closure, ctx)
            } else if let Some(else_body) = else_body {
                execute(else_body, closure, ctx)
            } else {
                Ok(ObjectHolder::none())
            }
        }
        Stmt::Return(value) => {
            let value = execute(value, closure, ctx)?;
            Err(UnwindCause::Return(value))
        }
        Stmt::MethodBody(body) => match execute(body, closure, ctx) {
            Ok(_) => Ok(ObjectHolder::none()),
            Err(UnwindCause::Return(value)) => Ok(value),
            Err(unwind) => Err(unwind),
        },
    }
}

fn lookup_variable(ids: &[String], closure: &Closure) -> Result<ObjectHolder, UnwindCause> {
    let Some((head, rest)) = ids.split_first() else {
        return Err(RuntimeError::TypeError("empty variable reference").into());
    };
    let mut current = closure
        .get(head)
        .map(ObjectHolder::share)
        .ok_or_else(|| RuntimeError::NameError(head.clone()))?;
    for name in rest {
        let instance = as_instance(&current, "attribute access on a non-instance")?;
        let next = instance
            .fields()
            .get(name)
            .map(ObjectHolder::share)
            .ok_or_else(|| RuntimeError::NameError(name.clone()))?;
        current = next;
    }
    Ok(current)
}

fn as_instance(holder: &ObjectHolder, context: &'static str) -> Result<Instance, UnwindCause> {
    holder
        .as_instance()
        .cloned()
        .ok_or_else(|| RuntimeError::TypeError(context).into())
}

fn numeric_operands(
    lhs: &Stmt,
    rhs: &Stmt,
    message: &'static str,
    closure: &mut Closure,
    ctx: &mut Context,
) -> Result<(i64, i64), UnwindCause> {
    let lhs = execute(lhs, closure, ctx)?;
    let rhs = execute(rhs, closure, ctx)?;
    match (lhs.get(), rhs.get()) {
        (Some(Object::Number(l)), Some(Object::Number(r))) => Ok((*l, *r)),
        _ => Err(RuntimeError::TypeError(message).into()),
    }
}
