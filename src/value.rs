//! Values and objects the resolution algorithm operates on.
//!
//! Objects are reference counted handles and their identity is pointer
//! identity. Nothing outside the engine can build a handle equal to the
//! intrinsic promise prototype.
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::promise::{Promise, PromiseData};
use crate::{Engine, Error};

/// Outcome of calling a function. `Err` carries the thrown value.
pub type Completion = Result<Value, Value>;

pub type NativeFunction = Rc<dyn Fn(&Engine, &Value, &[Value]) -> Completion>;

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Error(Rc<Error>),
    Object(Object),
}

impl Value {
    /// Wraps a Rust closure as a callable value. The closure receives the
    /// engine, the `this` value and the call arguments.
    pub fn function(f: impl Fn(&Engine, &Value, &[Value]) -> Completion + 'static) -> Self {
        Value::Object(Object::function(f))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&Error> {
        match self {
            Value::Error(err) => Some(&**err),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<Promise> {
        self.as_object().and_then(Object::as_promise)
    }

    pub fn is_callable(&self) -> bool {
        self.as_object().map_or(false, Object::is_callable)
    }

    /// Property lookup. Primitives have no properties here.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(obj) => obj.get(key),
            _ => Value::Undefined,
        }
    }

    pub fn call(&self, engine: &Engine, this: &Value, args: &[Value]) -> Completion {
        match self {
            Value::Object(obj) => obj.call(engine, this, args),
            _ => Err(Error::NotCallable.into()),
        }
    }
}

/// Missing arguments read as `undefined`.
pub(crate) fn argument(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            // SameValue: NaN equals itself, +0 and -0 differ.
            (Value::Number(a), Value::Number(b)) => {
                a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<Error> for Value {
    fn from(err: Error) -> Self {
        Value::Error(Rc::new(err))
    }
}

impl From<Object> for Value {
    fn from(obj: Object) -> Self {
        Value::Object(obj)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            Value::Error(err) => write!(f, "Error({err:?})"),
            Value::Object(obj) => obj.fmt(f),
            _ => write!(f, "{self}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => fmt_number(*n, f),
            Value::String(s) => f.write_str(s),
            Value::Error(err) => write!(f, "TypeError: {err}"),
            Value::Object(obj) => write!(f, "[object {}]", obj.0.kind.name()),
        }
    }
}

// Integral numbers print without a fractional part, the way a console does.
fn fmt_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.is_nan() {
        f.write_str("NaN")
    } else if n.is_infinite() {
        f.write_str(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n == 0.0 {
        f.write_str("0")
    } else {
        write!(f, "{n}")
    }
}

#[derive(Clone)]
pub struct Object(Rc<ObjectData>);

struct ObjectData {
    prototype: RefCell<Option<Object>>,
    properties: RefCell<HashMap<String, Value>>,
    kind: ObjectKind,
}

pub(crate) enum ObjectKind {
    Ordinary,
    Function(NativeFunction),
    Promise(RefCell<PromiseData>),
}

impl ObjectKind {
    fn name(&self) -> &'static str {
        match self {
            ObjectKind::Ordinary => "Object",
            ObjectKind::Function(_) => "Function",
            ObjectKind::Promise(_) => "Promise",
        }
    }
}

impl Object {
    pub fn ordinary(prototype: Option<Object>) -> Self {
        Self::with_kind(prototype, ObjectKind::Ordinary)
    }

    pub fn function(f: impl Fn(&Engine, &Value, &[Value]) -> Completion + 'static) -> Self {
        Self::with_kind(None, ObjectKind::Function(Rc::new(f)))
    }

    pub(crate) fn with_kind(prototype: Option<Object>, kind: ObjectKind) -> Self {
        Object(Rc::new(ObjectData {
            prototype: RefCell::new(prototype),
            properties: RefCell::new(HashMap::new()),
            kind,
        }))
    }

    pub(crate) fn kind(&self) -> &ObjectKind {
        &self.0.kind
    }

    pub fn prototype(&self) -> Option<Object> {
        self.0.prototype.borrow().clone()
    }

    /// Replaces the prototype link. Refuses a prototype whose chain already
    /// reaches this object, so lookups always terminate.
    pub fn set_prototype(&self, prototype: Option<Object>) -> Result<(), Error> {
        let mut ancestor = prototype.clone();
        while let Some(obj) = ancestor {
            if obj.ptr_eq(self) {
                return Err(Error::PrototypeCycle);
            }
            ancestor = obj.prototype();
        }
        *self.0.prototype.borrow_mut() = prototype;
        Ok(())
    }

    /// Looks `key` up on this object and then along its prototype chain.
    pub fn get(&self, key: &str) -> Value {
        let mut current = Some(self.clone());
        while let Some(obj) = current {
            if let Some(value) = obj.get_own(key) {
                return value;
            }
            current = obj.prototype();
        }
        Value::Undefined
    }

    pub fn get_own(&self, key: &str) -> Option<Value> {
        self.0.properties.borrow().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.0.properties.borrow_mut().insert(key.to_owned(), value.into());
    }

    pub fn delete(&self, key: &str) -> bool {
        self.0.properties.borrow_mut().remove(key).is_some()
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.0.kind, ObjectKind::Function(_))
    }

    pub fn is_promise(&self) -> bool {
        matches!(self.0.kind, ObjectKind::Promise(_))
    }

    pub fn as_promise(&self) -> Option<Promise> {
        Promise::from_object(self.clone())
    }

    pub fn call(&self, engine: &Engine, this: &Value, args: &[Value]) -> Completion {
        match &self.0.kind {
            ObjectKind::Function(f) => {
                let f = f.clone();
                f(engine, this, args)
            }
            _ => Err(Error::NotCallable.into()),
        }
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:p}", self.0.kind.name(), Rc::as_ptr(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::{Object, Value};
    use crate::Error;

    #[test]
    fn test_get_walks_prototype_chain() {
        let base = Object::ordinary(None);
        base.set("then", 1.0);
        let middle = Object::ordinary(Some(base.clone()));
        let leaf = Object::ordinary(Some(middle));
        assert_eq!(leaf.get("then"), Value::from(1.0));
        assert_eq!(leaf.get_own("then"), None);

        leaf.set("then", 2.0);
        assert_eq!(leaf.get("then"), Value::from(2.0));
        assert!(base.delete("then"));
        assert_eq!(Object::ordinary(None).get("then"), Value::Undefined);
    }

    #[test]
    fn test_set_prototype_refuses_cycles() {
        let a = Object::ordinary(None);
        let b = Object::ordinary(Some(a.clone()));
        assert!(matches!(a.set_prototype(Some(b.clone())), Err(Error::PrototypeCycle)));
        assert!(matches!(a.set_prototype(Some(a.clone())), Err(Error::PrototypeCycle)));
        assert!(a.prototype().is_none());
        assert_eq!(a.get("then"), Value::Undefined);

        let c = Object::ordinary(None);
        c.set("then", 3.0);
        a.set_prototype(Some(c)).unwrap();
        assert_eq!(b.get("then"), Value::from(3.0));
        b.set_prototype(None).unwrap();
        assert_eq!(b.get("then"), Value::Undefined);
    }

    #[test]
    fn test_numbers_compare_by_same_value() {
        assert_eq!(Value::from(f64::NAN), Value::from(f64::NAN));
        assert_ne!(Value::from(0.0), Value::from(-0.0));
        assert_eq!(Value::from(4.0), Value::from(2.0 + 2.0));
        assert!(Value::from(Object::ordinary(None)).is_object());
        assert!(!Value::from(1.0).is_object());
    }

    #[test]
    fn test_objects_compare_by_identity() {
        let a = Object::ordinary(None);
        let b = Object::ordinary(None);
        assert_eq!(Value::from(a.clone()), Value::from(a.clone()));
        assert_ne!(Value::from(a), Value::from(b));
    }

    #[test]
    fn test_number_display() {
        assert_eq!(Value::from(4.0).to_string(), "4");
        assert_eq!(Value::from(-0.0).to_string(), "0");
        assert_eq!(Value::from(1.5).to_string(), "1.5");
        assert_eq!(Value::from(1e20).to_string(), "100000000000000000000");
        assert_eq!(Value::from(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::from(f64::NEG_INFINITY).to_string(), "-Infinity");
    }

    #[test]
    fn test_primitives_are_not_callable() {
        assert!(!Value::from(1.0).is_callable());
        assert!(!Value::from(Object::ordinary(None)).is_callable());
        assert!(Value::function(|_, _, _| Ok(Value::Undefined)).is_callable());
        assert_eq!(Value::from("x").get("then"), Value::Undefined);
    }
}
