use std::{
    cell::{Ref, RefCell, RefMut},
    collections::HashMap,
    io::{self, Write},
    rc::Rc,
};

use thiserror::Error;
use tracing::trace;

use crate::ast::Stmt;
use crate::interpreter::{execute, UnwindCause};

pub const SELF_NAME: &str = "self";
pub const INIT_METHOD: &str = "__init__";
pub const STR_METHOD: &str = "__str__";
pub const EQ_METHOD: &str = "__eq__";
pub const LT_METHOD: &str = "__lt__";
pub const ADD_METHOD: &str = "__add__";

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("name '{0}' is not defined")]
    NameError(String),
    #[error("type error: {0}")]
    TypeError(&'static str),
    #[error("division by zero")]
    DivisionByZero,
    #[error("class '{class}' has no method '{method}' taking {argc} arguments")]
    MethodError {
        class: String,
        method: String,
        argc: usize,
    },
    #[error("function '{name}' expects {expected} arguments, got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// A local scope or an instance's field store: names bound to value handles.
/// Source programs cannot observe iteration order.
pub type Closure = HashMap<String, ObjectHolder>;

/// Host state threaded through evaluation. Print statements write to the
/// output stream; stringification renders into a private buffer instead.
pub struct Context<'out> {
    output: &'out mut dyn Write,
}

impl<'out> Context<'out> {
    pub fn new(output: &'out mut dyn Write) -> Context<'out> {
        Context { output }
    }

    pub fn output_stream(&mut self) -> &mut dyn Write {
        &mut *self.output
    }
}

#[derive(Debug, Clone)]
pub enum Object {
    /// The Mython `None` value. Distinct from the empty handle: both print
    /// as `None`, but only a handle can be empty.
    None,
    Number(i64),
    Bool(bool),
    String(String),
    Class(Class),
    Instance(Instance),
    Function(Rc<Function>),
}

impl Object {
    /// The text `print` would emit for this value. Instances defer to an
    /// arity-0 `__str__` when the class provides one.
    pub fn render(&self, ctx: &mut Context) -> Result<String, RuntimeError> {
        match self {
            Object::None => Ok("None".to_string()),
            Object::Number(n) => Ok(n.to_string()),
            Object::Bool(b) => Ok(if *b { "True" } else { "False" }.to_string()),
            Object::String(s) => Ok(s.clone()),
            Object::Class(class) => Ok(format!("Class {}", class.name())),
            Object::Function(function) => Ok(format!("<fn {}>", function.name)),
            Object::Instance(instance) => {
                if instance.has_method(STR_METHOD, 0) {
                    instance.call(STR_METHOD, Vec::new(), ctx)?.render(ctx)
                } else {
                    Ok(format!(
                        "<{} object at {:p}>",
                        instance.class().name(),
                        instance.id()
                    ))
                }
            }
        }
    }
}

/// The uniform handle to a runtime value.
///
/// `own` allocates a fresh payload, `share` aliases an existing one, and
/// `none` carries no payload at all. The empty handle maps to Mython `None`
/// when printed but is not interchangeable with a handle holding
/// `Object::None`: most operators reject it.
#[derive(Debug, Clone, Default)]
pub struct ObjectHolder(Option<Rc<Object>>);

impl ObjectHolder {
    pub fn own(object: Object) -> ObjectHolder {
        ObjectHolder(Some(Rc::new(object)))
    }

    pub fn none() -> ObjectHolder {
        ObjectHolder(None)
    }

    /// An alias of this handle. The payload stays alive as long as any
    /// alias does; cycles between instance fields are never collected.
    pub fn share(&self) -> ObjectHolder {
        ObjectHolder(self.0.clone())
    }

    pub fn get(&self) -> Option<&Object> {
        self.0.as_deref()
    }

    /// True only for the empty handle, not for a held `Object::None`.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// True for the empty handle and for a held `Object::None`.
    pub fn is_none(&self) -> bool {
        matches!(self.get(), None | Some(Object::None))
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self.get() {
            Some(Object::Instance(instance)) => Some(instance),
            _ => None,
        }
    }

    pub fn render(&self, ctx: &mut Context) -> Result<String, RuntimeError> {
        match self.get() {
            Some(object) => object.render(ctx),
            None => Ok("None".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Method {
    pub name: String,
    pub formal_params: Vec<String>,
    pub body: Stmt,
}

/// A class definition. Immutable once constructed; the parser builds one
/// per `class` statement and hands out cheap clones.
#[derive(Debug, Clone)]
pub struct Class {
    inner: Rc<ClassInner>,
}

#[derive(Debug)]
struct ClassInner {
    name: String,
    methods: Vec<Method>,
    parent: Option<Class>,
}

impl Class {
    pub fn new(name: String, methods: Vec<Method>, parent: Option<Class>) -> Class {
        Class {
            inner: Rc::new(ClassInner {
                name,
                methods,
                parent,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Resolve a method along the inheritance chain. Own methods are
    /// scanned in declaration order, first match wins, then the parent.
    pub fn get_method(&self, name: &str) -> Option<&Method> {
        match self.inner.methods.iter().find(|m| m.name == name) {
            Some(method) => Some(method),
            None => self.inner.parent.as_ref().and_then(|p| p.get_method(name)),
        }
    }
}

/// A top-level function bound by a `def` statement outside any class.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub formal_params: Vec<String>,
    pub body: Stmt,
}

/// An instance of a user class. Field storage is shared between handles,
/// so aliases observe each other's assignments.
#[derive(Debug, Clone)]
pub struct Instance {
    class: Class,
    fields: Rc<RefCell<Closure>>,
}

impl Instance {
    pub fn new(class: Class) -> Instance {
        Instance {
            class,
            fields: Rc::new(RefCell::new(Closure::new())),
        }
    }

    pub fn class(&self) -> &Class {
        &self.class
    }

    pub fn fields(&self) -> Ref<'_, Closure> {
        self.fields.borrow()
    }

    pub fn fields_mut(&self) -> RefMut<'_, Closure> {
        self.fields.borrow_mut()
    }

    /// Stable identity for printing dunder-less instances.
    pub fn id(&self) -> *const Closure {
        RefCell::as_ptr(&self.fields).cast_const()
    }

    pub fn has_method(&self, method: &str, argc: usize) -> bool {
        self.class
            .get_method(method)
            .is_some_and(|m| m.formal_params.len() == argc)
    }

    /// Invoke a method on this instance. The call executes against a fresh
    /// closure binding `self` to a shared handle and each formal parameter
    /// to its actual argument.
    pub fn call(
        &self,
        method: &str,
        args: Vec<ObjectHolder>,
        ctx: &mut Context,
    ) -> Result<ObjectHolder, RuntimeError> {
        let Some(resolved) = self
            .class
            .get_method(method)
            .filter(|m| m.formal_params.len() == args.len())
        else {
            return Err(RuntimeError::MethodError {
                class: self.class.name().to_string(),
                method: method.to_string(),
                argc: args.len(),
            });
        };
        trace!(class = %self.class.name(), method = %method, "method dispatch");

        let mut closure = Closure::new();
        closure.insert(
            SELF_NAME.to_string(),
            ObjectHolder::own(Object::Instance(self.clone())),
        );
        for (param, arg) in resolved.formal_params.iter().zip(args) {
            closure.insert(param.clone(), arg);
        }

        match execute(&resolved.body, &mut closure, ctx) {
            Ok(value) | Err(UnwindCause::Return(value)) => Ok(value),
            Err(UnwindCause::Error(error)) => Err(error),
        }
    }
}

pub fn is_true(value: &ObjectHolder) -> bool {
    match value.get() {
        Some(Object::Number(n)) => *n != 0,
        Some(Object::Bool(b)) => *b,
        Some(Object::String(s)) => !s.is_empty(),
        _ => false,
    }
}

/// Equality over values. Numbers, strings and booleans compare by payload;
/// an instance whose class defines `__eq__` of arity 1 decides for itself;
/// two `None`s are equal. Everything else is a type error.
pub fn equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    ctx: &mut Context,
) -> Result<bool, RuntimeError> {
    match (lhs.get(), rhs.get()) {
        (Some(Object::Number(l)), Some(Object::Number(r))) => Ok(l == r),
        (Some(Object::String(l)), Some(Object::String(r))) => Ok(l == r),
        (Some(Object::Bool(l)), Some(Object::Bool(r))) => Ok(l == r),
        (Some(Object::Instance(instance)), _) if instance.has_method(EQ_METHOD, 1) => {
            Ok(is_true(&instance.call(EQ_METHOD, vec![rhs.share()], ctx)?))
        }
        _ if lhs.is_none() && rhs.is_none() => Ok(true),
        _ => Err(RuntimeError::TypeError(
            "cannot compare these values for equality",
        )),
    }
}

/// Ordering over values, by natural `<`. An instance whose class defines
/// `__lt__` of arity 1 decides for itself. There is no `None` fallback.
pub fn less(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    ctx: &mut Context,
) -> Result<bool, RuntimeError> {
    match (lhs.get(), rhs.get()) {
        (Some(Object::Number(l)), Some(Object::Number(r))) => Ok(l < r),
        (Some(Object::String(l)), Some(Object::String(r))) => Ok(l < r),
        (Some(Object::Bool(l)), Some(Object::Bool(r))) => Ok(l < r),
        (Some(Object::Instance(instance)), _) if instance.has_method(LT_METHOD, 1) => {
            Ok(is_true(&instance.call(LT_METHOD, vec![rhs.share()], ctx)?))
        }
        _ => Err(RuntimeError::TypeError(
            "cannot compare these values for ordering",
        )),
    }
}

// The derived comparisons are computed from the two primitives above and
// never re-dispatch into user code: classes define __eq__ and __lt__ only.

pub fn not_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    ctx: &mut Context,
) -> Result<bool, RuntimeError> {
    Ok(!equal(lhs, rhs, ctx)?)
}

pub fn greater(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    ctx: &mut Context,
) -> Result<bool, RuntimeError> {
    Ok(!less(lhs, rhs, ctx)? && !equal(lhs, rhs, ctx)?)
}

pub fn less_or_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    ctx: &mut Context,
) -> Result<bool, RuntimeError> {
    Ok(!greater(lhs, rhs, ctx)?)
}

pub fn greater_or_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    ctx: &mut Context,
) -> Result<bool, RuntimeError> {
    Ok(!less(lhs, rhs, ctx)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::{CompareOp, Stmt};

    fn number(n: i64) -> ObjectHolder {
        ObjectHolder::own(Object::Number(n))
    }

    fn string(s: &str) -> ObjectHolder {
        ObjectHolder::own(Object::String(s.to_string()))
    }

    fn boolean(b: bool) -> ObjectHolder {
        ObjectHolder::own(Object::Bool(b))
    }

    fn with_context<A>(f: impl FnOnce(&mut Context) -> A) -> (A, String) {
        let mut out = Vec::new();
        let result = {
            let mut ctx = Context::new(&mut out);
            f(&mut ctx)
        };
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn truthiness_table() {
        assert!(!is_true(&number(0)));
        assert!(!is_true(&boolean(false)));
        assert!(!is_true(&string("")));
        assert!(!is_true(&ObjectHolder::none()));
        assert!(!is_true(&ObjectHolder::own(Object::None)));

        assert!(is_true(&number(3)));
        assert!(is_true(&number(-1)));
        assert!(is_true(&boolean(true)));
        assert!(is_true(&string("x")));

        let class = Class::new("Empty".to_string(), Vec::new(), None);
        let instance = ObjectHolder::own(Object::Instance(Instance::new(class.clone())));
        assert!(!is_true(&instance));
        assert!(!is_true(&ObjectHolder::own(Object::Class(class))));
    }

    #[test]
    fn empty_handle_is_distinguishable_from_none_value() {
        let empty = ObjectHolder::none();
        let none = ObjectHolder::own(Object::None);
        assert!(empty.is_empty());
        assert!(!none.is_empty());
        assert!(empty.is_none());
        assert!(none.is_none());
    }

    #[test]
    fn equal_primitives() {
        let (result, _) = with_context(|ctx| {
            assert!(equal(&number(7), &number(7), ctx).unwrap());
            assert!(!equal(&number(7), &number(8), ctx).unwrap());
            assert!(equal(&string("ab"), &string("ab"), ctx).unwrap());
            assert!(equal(&boolean(true), &boolean(true), ctx).unwrap());
            assert!(equal(&ObjectHolder::none(), &ObjectHolder::none(), ctx).unwrap());
            assert!(
                equal(&ObjectHolder::none(), &ObjectHolder::own(Object::None), ctx).unwrap()
            );
            equal(&number(1), &string("1"), ctx)
        });
        assert!(matches!(result, Err(RuntimeError::TypeError(_))));
    }

    #[test]
    fn less_has_no_none_fallback() {
        let (result, _) = with_context(|ctx| {
            assert!(less(&number(1), &number(2), ctx).unwrap());
            assert!(less(&string("a"), &string("b"), ctx).unwrap());
            assert!(less(&boolean(false), &boolean(true), ctx).unwrap());
            less(&ObjectHolder::none(), &ObjectHolder::none(), ctx)
        });
        assert!(matches!(result, Err(RuntimeError::TypeError(_))));
    }

    #[test]
    fn derived_comparisons_are_consistent() {
        let pairs = [(1, 2), (2, 2), (3, 2)];
        with_context(|ctx| {
            for (l, r) in pairs {
                let lhs = number(l);
                let rhs = number(r);
                let eq = equal(&lhs, &rhs, ctx).unwrap();
                let ne = not_equal(&lhs, &rhs, ctx).unwrap();
                let lt = less(&lhs, &rhs, ctx).unwrap();
                let gt = greater(&lhs, &rhs, ctx).unwrap();
                assert_eq!(eq, !ne);
                // Exactly one of <, ==, > holds.
                assert_eq!(1, [lt, eq, gt].into_iter().filter(|b| *b).count());
                assert_eq!(less_or_equal(&lhs, &rhs, ctx).unwrap(), !gt);
                assert_eq!(greater_or_equal(&lhs, &rhs, ctx).unwrap(), !lt);
            }
        });
    }

    // A class whose __eq__ and __lt__ compare the field "x".
    fn comparable_class() -> Class {
        let compare = |op: CompareOp| {
            Stmt::MethodBody(Box::new(Stmt::Return(Box::new(Stmt::Comparison {
                op,
                lhs: Box::new(Stmt::Variable(vec![
                    SELF_NAME.to_string(),
                    "x".to_string(),
                ])),
                rhs: Box::new(Stmt::Variable(vec![
                    "other".to_string(),
                    "x".to_string(),
                ])),
            }))))
        };
        Class::new(
            "Comparable".to_string(),
            vec![
                Method {
                    name: EQ_METHOD.to_string(),
                    formal_params: vec!["other".to_string()],
                    body: compare(CompareOp::Equal),
                },
                Method {
                    name: LT_METHOD.to_string(),
                    formal_params: vec!["other".to_string()],
                    body: compare(CompareOp::Less),
                },
            ],
            None,
        )
    }

    fn comparable(class: &Class, x: i64) -> ObjectHolder {
        let instance = Instance::new(class.clone());
        instance.fields_mut().insert("x".to_string(), number(x));
        ObjectHolder::own(Object::Instance(instance))
    }

    #[test]
    fn dunder_eq_and_lt_dispatch() {
        let class = comparable_class();
        with_context(|ctx| {
            assert!(equal(&comparable(&class, 3), &comparable(&class, 3), ctx).unwrap());
            assert!(!equal(&comparable(&class, 3), &comparable(&class, 4), ctx).unwrap());
            assert!(less(&comparable(&class, 3), &comparable(&class, 4), ctx).unwrap());
            assert!(greater(&comparable(&class, 5), &comparable(&class, 4), ctx).unwrap());
        });
    }

    #[test]
    fn method_lookup_follows_inheritance() {
        let body = Stmt::MethodBody(Box::new(Stmt::Return(Box::new(Stmt::Number(1)))));
        let parent = Class::new(
            "Base".to_string(),
            vec![
                Method {
                    name: "f".to_string(),
                    formal_params: Vec::new(),
                    body: body.clone(),
                },
                Method {
                    name: "g".to_string(),
                    formal_params: Vec::new(),
                    body: body.clone(),
                },
            ],
            None,
        );
        let child = Class::new(
            "Derived".to_string(),
            vec![Method {
                name: "f".to_string(),
                formal_params: vec!["v".to_string()],
                body,
            }],
            Some(parent),
        );

        // The override in Derived shadows Base::f and changes the arity.
        let instance = Instance::new(child);
        assert!(instance.has_method("f", 1));
        assert!(!instance.has_method("f", 0));
        assert!(instance.has_method("g", 0));
        assert!(!instance.has_method("missing", 0));
    }

    #[test]
    fn call_binds_self_and_params() {
        let body = Stmt::MethodBody(Box::new(Stmt::Return(Box::new(Stmt::Add(
            Box::new(Stmt::Variable(vec![SELF_NAME.to_string(), "x".to_string()])),
            Box::new(Stmt::Variable(vec!["delta".to_string()])),
        )))));
        let class = Class::new(
            "Counter".to_string(),
            vec![Method {
                name: "bump".to_string(),
                formal_params: vec!["delta".to_string()],
                body,
            }],
            None,
        );
        let instance = Instance::new(class);
        instance.fields_mut().insert("x".to_string(), number(40));

        let (result, _) = with_context(|ctx| instance.call("bump", vec![number(2)], ctx));
        let result = result.unwrap();
        assert!(matches!(result.get(), Some(Object::Number(42))));
    }

    #[test]
    fn call_rejects_unknown_method_and_bad_arity() {
        let class = Class::new("Empty".to_string(), Vec::new(), None);
        let instance = Instance::new(class);
        let (result, _) = with_context(|ctx| instance.call("poke", Vec::new(), ctx));
        assert!(matches!(result, Err(RuntimeError::MethodError { .. })));
    }

    #[test]
    fn render_primitives() {
        with_context(|ctx| {
            assert_eq!("14", number(14).render(ctx).unwrap());
            assert_eq!("-3", number(-3).render(ctx).unwrap());
            assert_eq!("True", boolean(true).render(ctx).unwrap());
            assert_eq!("False", boolean(false).render(ctx).unwrap());
            // Strings render raw, without quoting.
            assert_eq!("hi", string("hi").render(ctx).unwrap());
            assert_eq!("None", ObjectHolder::none().render(ctx).unwrap());
            assert_eq!("None", ObjectHolder::own(Object::None).render(ctx).unwrap());
        });
    }

    #[test]
    fn render_class_and_instance() {
        let class = Class::new("Cat".to_string(), Vec::new(), None);
        with_context(|ctx| {
            let object = ObjectHolder::own(Object::Class(class.clone()));
            assert_eq!("Class Cat", object.render(ctx).unwrap());

            let instance = ObjectHolder::own(Object::Instance(Instance::new(class)));
            let rendered = instance.render(ctx).unwrap();
            assert!(rendered.starts_with("<Cat object at "));
            // Identity is stable across renders.
            assert_eq!(rendered, instance.render(ctx).unwrap());
        });
    }

    #[test]
    fn render_uses_dunder_str() {
        let body = Stmt::MethodBody(Box::new(Stmt::Return(Box::new(Stmt::String(
            "a point".to_string(),
        )))));
        let class = Class::new(
            "Point".to_string(),
            vec![Method {
                name: STR_METHOD.to_string(),
                formal_params: Vec::new(),
                body,
            }],
            None,
        );
        with_context(|ctx| {
            let instance = ObjectHolder::own(Object::Instance(Instance::new(class)));
            assert_eq!("a point", instance.render(ctx).unwrap());
        });
    }

    #[test]
    fn field_store_is_shared_between_aliases() {
        let class = Class::new("Box".to_string(), Vec::new(), None);
        let instance = Instance::new(class);
        let alias = instance.clone();
        instance.fields_mut().insert("v".to_string(), number(9));
        assert!(matches!(
            alias.fields().get("v").and_then(ObjectHolder::get),
            Some(Object::Number(9))
        ));
    }
}
