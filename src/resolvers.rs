use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::promise::Promise;
use crate::value::{argument, Value};
use crate::Engine;

/// The `{resolve, reject}` pair bound to a single promise.
///
/// Clones share one `already_resolved` flag: whichever call comes first, on
/// either side and through any clone, is the only one with an effect.
///
/// # Examples
///
/// ```
/// use promise_guard::{Engine, PromiseState, Value};
/// let engine = Engine::default();
/// let (promise, resolvers) = engine.create_future();
/// resolvers.resolve(&engine, 1.0);
/// resolvers.reject(&engine, "too late");
/// assert_eq!(promise.state(), PromiseState::Fulfilled(Value::from(1.0)));
/// ```
#[derive(Clone)]
pub struct Resolvers {
    promise: Promise,
    already_resolved: Rc<Cell<bool>>,
}

impl Resolvers {
    pub(crate) fn new(promise: Promise) -> Self {
        Self {
            promise,
            already_resolved: Rc::new(Cell::new(false)),
        }
    }

    pub fn promise(&self) -> &Promise {
        &self.promise
    }

    /// Whether either side has already been called.
    pub fn is_spent(&self) -> bool {
        self.already_resolved.get()
    }

    pub fn resolve(&self, engine: &Engine, value: impl Into<Value>) {
        if self.already_resolved.replace(true) {
            log::trace!("resolve on spent resolvers ignored");
            return;
        }
        engine.resolve_promise(&self.promise, value.into());
    }

    pub fn reject(&self, engine: &Engine, reason: impl Into<Value>) {
        if self.already_resolved.replace(true) {
            log::trace!("reject on spent resolvers ignored");
            return;
        }
        engine.reject(&self.promise, reason.into());
    }

    /// The resolve side as a callable value, suitable for handing to a
    /// thenable or an executor.
    pub fn resolve_function(&self) -> Value {
        let resolvers = self.clone();
        Value::function(move |engine, _this, args| {
            resolvers.resolve(engine, argument(args, 0));
            Ok(Value::Undefined)
        })
    }

    pub fn reject_function(&self) -> Value {
        let resolvers = self.clone();
        Value::function(move |engine, _this, args| {
            resolvers.reject(engine, argument(args, 0));
            Ok(Value::Undefined)
        })
    }
}

impl fmt::Debug for Resolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolvers")
            .field("promise", &self.promise)
            .field("already_resolved", &self.already_resolved.get())
            .finish()
    }
}
