use std::cell::RefCell;
use std::fmt;
use std::{future::Future, task::{Poll, Waker}};

use crate::resolvers::Resolvers;
use crate::value::{Object, ObjectKind, Value};
use crate::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

impl PromiseState {
    pub fn is_pending(&self) -> bool {
        matches!(self, PromiseState::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionType {
    Fulfill,
    Reject,
}

/// A handler waiting on a promise, plus the capability of the promise it
/// derives. `await` registers reactions with no derived promise.
pub(crate) struct Reaction {
    pub(crate) kind: ReactionType,
    pub(crate) handler: Option<Object>,
    pub(crate) capability: Option<Resolvers>,
}

pub(crate) struct PromiseData {
    pub(crate) state: PromiseState,
    pub(crate) fulfill_reactions: Vec<Reaction>,
    pub(crate) reject_reactions: Vec<Reaction>,
    pub(crate) is_handled: bool,
    // Every waiting Consumer gets woken, not only the last one to poll.
    pub(crate) wakers: Vec<Waker>,
}

impl PromiseData {
    fn new() -> Self {
        Self {
            state: PromiseState::Pending,
            fulfill_reactions: vec![],
            reject_reactions: vec![],
            is_handled: false,
            wakers: vec![],
        }
    }
}

/// A handle on an engine promise object.
///
/// Cloning the handle does not clone the promise; all clones observe the same
/// settlement.
#[derive(Clone)]
pub struct Promise(Object);

impl Promise {
    pub(crate) fn new(prototype: Object) -> Self {
        Promise(Object::with_kind(
            Some(prototype),
            ObjectKind::Promise(RefCell::new(PromiseData::new())),
        ))
    }

    pub(crate) fn from_object(obj: Object) -> Option<Self> {
        obj.is_promise().then(|| Promise(obj))
    }

    pub(crate) fn data(&self) -> &RefCell<PromiseData> {
        match self.0.kind() {
            ObjectKind::Promise(data) => data,
            _ => unreachable!("Promise always wraps a promise object"),
        }
    }

    pub fn as_object(&self) -> &Object {
        &self.0
    }

    pub fn state(&self) -> PromiseState {
        self.data().borrow().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.data().borrow().state.is_pending()
    }

    pub fn is_handled(&self) -> bool {
        self.data().borrow().is_handled
    }

    /// A Rust future that completes when this promise settles.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_guard::{Engine, Value};
    /// use futures::executor::block_on;
    /// let engine = Engine::default();
    /// let (promise, resolvers) = engine.create_future();
    /// let consumer = promise.waiter();
    /// resolvers.resolve(&engine, Value::from("🍓"));
    /// assert_eq!(block_on(consumer).unwrap(), Value::from("🍓"));
    /// ```
    pub fn waiter(&self) -> Consumer {
        Consumer { promise: self.clone() }
    }

    pub fn ptr_eq(&self, other: &Promise) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl PartialEq for Promise {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Promise").field(&self.0).field(&self.state()).finish()
    }
}

impl From<Promise> for Value {
    fn from(promise: Promise) -> Self {
        Value::Object(promise.0)
    }
}

/// Waits on a [`Promise`] from Rust. Something still has to drain the
/// engine's job queue for the promise to settle.
#[derive(Debug)]
pub struct Consumer {
    promise: Promise,
}

impl Future for Consumer {
    type Output = Result<Value, Error>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let mut data = self.promise.data().borrow_mut();
        let state = data.state.clone();
        match state {
            PromiseState::Fulfilled(value) => Poll::Ready(Ok(value)),
            PromiseState::Rejected(reason) => Poll::Ready(Err(Error::Rejected(reason))),
            PromiseState::Pending => {
                data.wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
