//! The resolution engine: promise creation, settlement, reaction scheduling
//! and the `then` lookup that decides how a resolved value is unwrapped.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::task::Waker;

use crate::config::{EngineConfig, ThenLookup};
use crate::promise::{Promise, PromiseState, Reaction, ReactionType};
use crate::queue::{Job, JobKind, JobQueue, MicrotaskQueue};
use crate::resolvers::Resolvers;
use crate::value::{argument, Completion, Object, Value};
use crate::Error;

/// What the host's rejection tracker is told.
#[derive(Debug, Clone)]
pub enum RejectionEvent {
    /// A promise was rejected while nothing was listening.
    Reject { promise: Promise, reason: Value },
    /// A handler was attached to a promise previously reported by `Reject`.
    Handle { promise: Promise },
    /// A job failed and there was no promise left to reject.
    Orphaned(Error),
}

type RejectionHook = Rc<dyn Fn(&RejectionEvent)>;

struct Intrinsics {
    promise_constructor: Object,
    promise_prototype: Object,
    then: Object,
}

/// How a thenable gets unwrapped.
enum ThenAction {
    /// A native promise with the intrinsic prototype; no property is read.
    Intrinsic(Promise),
    Dynamic(Object),
    None,
}

/// A handle on a resolution engine. Clones share the same queue,
/// intrinsics and configuration.
#[derive(Clone)]
pub struct Engine {
    inner: Rc<Inner>,
}

struct Inner {
    config: EngineConfig,
    queue: Rc<dyn JobQueue>,
    intrinsics: Intrinsics,
    rejection_hook: RefCell<RejectionHook>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("queued_jobs", &self.inner.queue.len())
            .finish()
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_queue(config, Rc::new(MicrotaskQueue::new()))
    }

    pub fn with_queue(config: EngineConfig, queue: Rc<dyn JobQueue>) -> Self {
        let promise_constructor = Object::function(intrinsic_promise_constructor);
        let then = Object::function(intrinsic_then);
        let promise_prototype = Object::ordinary(None);
        promise_prototype.set("constructor", promise_constructor.clone());
        promise_prototype.set("then", then.clone());
        promise_prototype.set("catch", Object::function(intrinsic_catch));
        let rejection_hook: RejectionHook = Rc::new(log_rejection);
        log::debug!("engine created with {} then lookup", config.then_lookup);
        Engine {
            inner: Rc::new(Inner {
                config,
                queue,
                intrinsics: Intrinsics {
                    promise_constructor,
                    promise_prototype,
                    then,
                },
                rejection_hook: RefCell::new(rejection_hook),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// `%Promise.prototype%`. It is an ordinary object: anyone holding it can
    /// overwrite `then` or `constructor`.
    pub fn promise_prototype(&self) -> Object {
        self.inner.intrinsics.promise_prototype.clone()
    }

    pub fn promise_constructor(&self) -> Object {
        self.inner.intrinsics.promise_constructor.clone()
    }

    /// The original `Promise.prototype.then`, unaffected by later writes to
    /// the prototype.
    pub fn intrinsic_then(&self) -> Value {
        self.inner.intrinsics.then.clone().into()
    }

    /// Replaces the host rejection tracker. The default logs through `log`.
    pub fn set_rejection_hook(&self, hook: impl Fn(&RejectionEvent) + 'static) {
        *self.inner.rejection_hook.borrow_mut() = Rc::new(hook);
    }

    fn report(&self, event: RejectionEvent) {
        let hook = self.inner.rejection_hook.borrow().clone();
        hook(&event);
    }

    pub fn create_future(&self) -> (Promise, Resolvers) {
        let promise = Promise::new(self.promise_prototype());
        (promise.clone(), Resolvers::new(promise))
    }

    /// `new Promise(executor)`.
    pub fn new_promise(&self, executor: &Value) -> Result<Promise, Error> {
        if !executor.is_callable() {
            return Err(Error::NotCallable);
        }
        let (promise, resolvers) = self.create_future();
        let args = [resolvers.resolve_function(), resolvers.reject_function()];
        if let Err(thrown) = executor.call(self, &Value::Undefined, &args) {
            resolvers.reject(self, thrown);
        }
        Ok(promise)
    }

    /// Runs `body` the way an `async` function without `await` runs: right
    /// away, with its result handed to `resolve` and a throw to `reject`.
    pub fn async_call(&self, body: impl FnOnce(&Engine) -> Completion) -> Promise {
        let (promise, resolvers) = self.create_future();
        match body(self) {
            Ok(value) => resolvers.resolve(self, value),
            Err(thrown) => resolvers.reject(self, thrown),
        }
        promise
    }

    /// `Promise.reject(reason)`.
    pub fn rejected(&self, reason: impl Into<Value>) -> Promise {
        let (promise, resolvers) = self.create_future();
        resolvers.reject(self, reason);
        promise
    }

    /// Resolves `promise` with `value`, unwrapping thenables.
    ///
    /// Non-objects fulfill synchronously. Objects whose then action is
    /// callable are unwrapped in a [`JobKind::ResolveThenable`] job.
    pub fn resolve_promise(&self, promise: &Promise, value: Value) {
        let Some(thenable) = value.as_object().cloned() else {
            self.fulfill(promise, value);
            return;
        };
        if thenable.ptr_eq(promise.as_object()) {
            log::debug!("promise resolved with itself");
            self.reject(promise, Error::SelfReference.into());
            return;
        }
        let action = match self.then_action(&thenable) {
            ThenAction::None => {
                self.fulfill(promise, value);
                return;
            }
            action => action,
        };
        let engine = self.clone();
        let promise = promise.clone();
        log::trace!("scheduling thenable resolution");
        self.inner.queue.enqueue(Job::new(JobKind::ResolveThenable, move || {
            engine.resolve_thenable(&promise, thenable, action);
            Ok(())
        }));
    }

    fn then_action(&self, thenable: &Object) -> ThenAction {
        if self.inner.config.then_lookup == ThenLookup::PrototypeIdentity {
            if let Some(promise) = self.pristine_promise(thenable) {
                return ThenAction::Intrinsic(promise);
            }
        }
        match thenable.get("then") {
            Value::Object(then) if then.is_callable() => ThenAction::Dynamic(then),
            _ => ThenAction::None,
        }
    }

    /// A native promise whose direct prototype is `%Promise.prototype%`.
    fn pristine_promise(&self, obj: &Object) -> Option<Promise> {
        let prototype = obj.prototype()?;
        if prototype.ptr_eq(&self.inner.intrinsics.promise_prototype) {
            obj.as_promise()
        } else {
            None
        }
    }

    fn resolve_thenable(&self, promise: &Promise, thenable: Object, action: ThenAction) {
        let resolvers = Resolvers::new(promise.clone());
        match action {
            ThenAction::Intrinsic(source) => self.perform_then(
                &source,
                resolvers.resolve_function(),
                resolvers.reject_function(),
                None,
            ),
            ThenAction::Dynamic(then) => {
                let args = [resolvers.resolve_function(), resolvers.reject_function()];
                if let Err(thrown) = then.call(self, &thenable.into(), &args) {
                    log::debug!("{}", Error::ThenableThrow(thrown.clone()));
                    resolvers.reject(self, thrown);
                }
            }
            ThenAction::None => self.fulfill(promise, thenable.into()),
        }
    }

    /// Fulfills a pending promise. Does nothing once it has settled.
    pub fn fulfill(&self, promise: &Promise, value: Value) {
        self.settle(promise, PromiseState::Fulfilled(value));
    }

    /// Rejects a pending promise. Does nothing once it has settled.
    pub fn reject(&self, promise: &Promise, reason: Value) {
        self.settle(promise, PromiseState::Rejected(reason));
    }

    fn settle(&self, promise: &Promise, state: PromiseState) {
        let (reactions, wakers, unhandled) = {
            let mut data = promise.data().borrow_mut();
            if !data.state.is_pending() {
                log::debug!("ignoring settlement of an already settled promise");
                return;
            }
            data.state = state.clone();
            let fulfill = std::mem::take(&mut data.fulfill_reactions);
            let reject = std::mem::take(&mut data.reject_reactions);
            let reactions = match state {
                PromiseState::Rejected(_) => reject,
                _ => fulfill,
            };
            let unhandled = !data.is_handled;
            (reactions, std::mem::take(&mut data.wakers), unhandled)
        };
        let argument = match state {
            PromiseState::Fulfilled(value) => {
                log::debug!("promise fulfilled with {value}");
                value
            }
            PromiseState::Rejected(reason) => {
                log::debug!("promise rejected with {reason}");
                if unhandled {
                    self.report(RejectionEvent::Reject {
                        promise: promise.clone(),
                        reason: reason.clone(),
                    });
                }
                reason
            }
            PromiseState::Pending => unreachable!("settle is never asked to go back to pending"),
        };
        for reaction in reactions {
            self.enqueue_reaction_job(reaction, argument.clone());
        }
        wakers.into_iter().for_each(Waker::wake);
    }

    fn enqueue_reaction_job(&self, reaction: Reaction, argument: Value) {
        let kind = reaction.kind;
        let engine = self.clone();
        log::trace!("scheduling {kind:?} reaction");
        self.inner.queue.enqueue(Job::new(JobKind::PromiseReaction(kind), move || {
            engine.run_reaction(reaction, argument)
        }));
    }

    fn run_reaction(&self, reaction: Reaction, argument: Value) -> Result<(), Error> {
        let had_handler = reaction.handler.is_some();
        let outcome = match (&reaction.handler, reaction.kind) {
            (Some(handler), _) => handler.call(self, &Value::Undefined, &[argument]),
            (None, ReactionType::Fulfill) => Ok(argument),
            (None, ReactionType::Reject) => Err(argument),
        };
        match (reaction.capability, outcome) {
            (Some(capability), Ok(value)) => capability.resolve(self, value),
            (Some(capability), Err(thrown)) => {
                if had_handler {
                    log::debug!("{}", Error::UserHandler(thrown.clone()));
                }
                capability.reject(self, thrown);
            }
            (None, Ok(_)) => {}
            (None, Err(thrown)) if had_handler => return Err(Error::UserHandler(thrown)),
            (None, Err(reason)) => return Err(Error::Rejected(reason)),
        }
        Ok(())
    }

    /// Registers reactions on `promise` without going through any property.
    /// Non-callable handlers pass the value or reason through.
    pub fn perform_then(
        &self,
        promise: &Promise,
        on_fulfilled: Value,
        on_rejected: Value,
        capability: Option<Resolvers>,
    ) {
        let fulfill = Reaction {
            kind: ReactionType::Fulfill,
            handler: callable(on_fulfilled),
            capability: capability.clone(),
        };
        let reject = Reaction {
            kind: ReactionType::Reject,
            handler: callable(on_rejected),
            capability,
        };
        let mut data = promise.data().borrow_mut();
        let was_handled = std::mem::replace(&mut data.is_handled, true);
        let state = data.state.clone();
        match state {
            PromiseState::Pending => {
                data.fulfill_reactions.push(fulfill);
                data.reject_reactions.push(reject);
            }
            PromiseState::Fulfilled(value) => {
                drop(data);
                self.enqueue_reaction_job(fulfill, value);
            }
            PromiseState::Rejected(reason) => {
                drop(data);
                if !was_handled {
                    self.report(RejectionEvent::Handle {
                        promise: promise.clone(),
                    });
                }
                self.enqueue_reaction_job(reject, reason);
            }
        }
    }

    /// `Promise.prototype.then` as the engine implements it: registers the
    /// handlers and returns the derived promise.
    pub fn promise_then(
        &self,
        promise: &Promise,
        on_fulfilled: Value,
        on_rejected: Value,
    ) -> Promise {
        let (derived, resolvers) = self.create_future();
        self.perform_then(promise, on_fulfilled, on_rejected, Some(resolvers));
        derived
    }

    /// `value.then(on_fulfilled, on_rejected)` with an ordinary property
    /// lookup, so whatever currently sits on the prototype is called.
    pub fn invoke_then(
        &self,
        value: &Value,
        on_fulfilled: Value,
        on_rejected: Value,
    ) -> Completion {
        value.get("then").call(self, value, &[on_fulfilled, on_rejected])
    }

    /// `Promise.resolve(value)`: returns `value` itself when it is a native
    /// promise built by `%Promise%`, otherwise a new promise resolved with
    /// it.
    pub fn promise_resolve(&self, value: Value) -> Promise {
        if let Some(promise) = value.as_object().and_then(|obj| self.same_constructor(obj)) {
            return promise;
        }
        let (promise, resolvers) = self.create_future();
        resolvers.resolve(self, value);
        promise
    }

    fn same_constructor(&self, obj: &Object) -> Option<Promise> {
        let promise = obj.as_promise()?;
        let same = match self.inner.config.then_lookup {
            ThenLookup::Observable => matches!(
                obj.get("constructor"),
                Value::Object(ctor) if ctor.ptr_eq(&self.inner.intrinsics.promise_constructor)
            ),
            ThenLookup::PrototypeIdentity => self.pristine_promise(obj).is_some(),
        };
        same.then_some(promise)
    }

    /// `await value`: coerces through [`Engine::promise_resolve`] and
    /// registers the continuation internally, with no derived promise.
    pub fn await_value(&self, value: Value, on_fulfilled: Value, on_rejected: Value) {
        let promise = self.promise_resolve(value);
        self.perform_then(&promise, on_fulfilled, on_rejected, None);
    }

    /// Drains the queue, returning how many jobs ran. A job's error never
    /// escapes; it goes to the rejection hook.
    pub fn run_jobs(&self) -> usize {
        let mut ran = 0;
        while let Some(job) = self.inner.queue.dequeue() {
            self.run_job(job);
            ran += 1;
        }
        ran
    }

    fn run_job(&self, job: Job) {
        let kind = job.kind();
        if let Err(err) = job.run() {
            log::debug!("{kind:?} job failed: {err}");
            self.report(RejectionEvent::Orphaned(err));
        }
    }

    /// Runs jobs until `promise` settles.
    pub fn block_on(&self, promise: &Promise) -> Result<Value, Error> {
        loop {
            match promise.state() {
                PromiseState::Fulfilled(value) => return Ok(value),
                PromiseState::Rejected(reason) => return Err(Error::Rejected(reason)),
                PromiseState::Pending => {}
            }
            match self.inner.queue.dequeue() {
                Some(job) => self.run_job(job),
                None => return Err(Error::Stalled),
            }
        }
    }
}

fn callable(value: Value) -> Option<Object> {
    match value {
        Value::Object(obj) if obj.is_callable() => Some(obj),
        _ => None,
    }
}

fn log_rejection(event: &RejectionEvent) {
    match event {
        RejectionEvent::Reject { reason, .. } => {
            log::warn!("unhandled promise rejection: {reason}")
        }
        RejectionEvent::Handle { .. } => log::debug!("rejection handled after the fact"),
        RejectionEvent::Orphaned(err) => log::warn!("uncaught error in job: {err}"),
    }
}

fn intrinsic_promise_constructor(engine: &Engine, _this: &Value, args: &[Value]) -> Completion {
    engine
        .new_promise(&argument(args, 0))
        .map(Value::from)
        .map_err(Value::from)
}

fn intrinsic_then(engine: &Engine, this: &Value, args: &[Value]) -> Completion {
    let promise = this.as_promise().ok_or_else(|| Value::from(Error::NotAPromise))?;
    Ok(engine
        .promise_then(&promise, argument(args, 0), argument(args, 1))
        .into())
}

fn intrinsic_catch(engine: &Engine, this: &Value, args: &[Value]) -> Completion {
    engine.invoke_then(this, Value::Undefined, argument(args, 0))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::RejectionEvent;
    use crate::{Engine, EngineConfig, Error, Object, PromiseState, ThenLookup, Value};

    fn engines() -> [Engine; 2] {
        [ThenLookup::Observable, ThenLookup::PrototypeIdentity]
            .map(|policy| Engine::new(EngineConfig::new().then_lookup(policy)))
    }

    #[test]
    fn test_self_resolution_rejects() {
        for engine in engines() {
            let (promise, resolvers) = engine.create_future();
            resolvers.resolve(&engine, promise.clone());
            match promise.state() {
                PromiseState::Rejected(reason) => {
                    assert!(matches!(reason.as_error(), Some(Error::SelfReference)))
                }
                other => panic!("expected rejection, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_primitive_fulfills_without_jobs() {
        for engine in engines() {
            let (promise, resolvers) = engine.create_future();
            resolvers.resolve(&engine, "plain");
            assert_eq!(promise.state(), PromiseState::Fulfilled(Value::from("plain")));
            assert_eq!(engine.run_jobs(), 0);
        }
    }

    #[test]
    fn test_object_without_then_fulfills_as_is() {
        for engine in engines() {
            let obj = Object::ordinary(None);
            obj.set("then", 7.0);
            let (promise, resolvers) = engine.create_future();
            resolvers.resolve(&engine, obj.clone());
            assert_eq!(promise.state(), PromiseState::Fulfilled(obj.into()));
        }
    }

    #[test]
    fn test_handler_throw_rejects_derived() {
        let engine = Engine::default();
        let (promise, resolvers) = engine.create_future();
        let derived = engine.promise_then(
            &promise,
            Value::function(|_, _, _| Err(Value::from("boom"))),
            Value::Undefined,
        );
        resolvers.resolve(&engine, 1.0);
        match engine.block_on(&derived) {
            Err(Error::Rejected(reason)) => assert_eq!(reason, Value::from("boom")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_rejection_passes_through_missing_handler() {
        let engine = Engine::default();
        let source = engine.rejected("nope");
        let derived = engine.promise_then(&source, Value::Undefined, Value::Undefined);
        let recovered = engine.promise_then(
            &derived,
            Value::Undefined,
            Value::function(|_, _, args| Ok(args[0].clone())),
        );
        assert_eq!(engine.block_on(&recovered).unwrap(), Value::from("nope"));
    }

    #[test]
    fn test_rejection_tracker_reports_and_revokes() {
        let engine = Engine::default();
        let events = Rc::new(RefCell::new(vec![]));
        let sink = events.clone();
        engine.set_rejection_hook(move |event| {
            sink.borrow_mut().push(match event {
                RejectionEvent::Reject { reason, .. } => format!("reject {reason}"),
                RejectionEvent::Handle { .. } => "handle".to_owned(),
                RejectionEvent::Orphaned(err) => format!("orphaned {err}"),
            })
        });
        let promise = engine.rejected("late");
        assert!(!promise.is_handled());
        let swallow = Value::function(|_, _, _| Ok(Value::Undefined));
        engine.promise_then(&promise, Value::Undefined, swallow);
        assert!(promise.is_handled());
        engine.run_jobs();
        assert_eq!(*events.borrow(), vec!["reject late".to_owned(), "handle".to_owned()]);
    }

    #[test]
    fn test_orphaned_handler_error_reaches_hook() {
        let engine = Engine::default();
        let orphaned = Rc::new(RefCell::new(vec![]));
        let sink = orphaned.clone();
        engine.set_rejection_hook(move |event| {
            if let RejectionEvent::Orphaned(err) = event {
                sink.borrow_mut().push(err.to_string());
            }
        });
        engine.await_value(
            Value::from(1.0),
            Value::function(|_, _, _| Err(Value::from("kaboom"))),
            Value::Undefined,
        );
        assert_eq!(engine.run_jobs(), 1);
        assert_eq!(*orphaned.borrow(), vec!["reaction handler threw: kaboom".to_owned()]);
    }

    #[test]
    fn test_new_promise_executor() {
        let engine = Engine::default();
        assert!(matches!(engine.new_promise(&Value::from(1.0)), Err(Error::NotCallable)));

        let throws_after_resolve = Value::function(|engine, _, args| {
            args[0].call(engine, &Value::Undefined, &[Value::from("kept")])?;
            Err(Value::from("ignored"))
        });
        let promise = engine.new_promise(&throws_after_resolve).unwrap();
        assert_eq!(promise.state(), PromiseState::Fulfilled(Value::from("kept")));

        let ctor = Value::from(engine.promise_constructor());
        let executor = Value::function(|engine, _, args| {
            args[1].call(engine, &Value::Undefined, &[Value::from(5.0)])
        });
        let made = ctor.call(&engine, &Value::Undefined, &[executor]).unwrap();
        assert_eq!(
            made.as_promise().unwrap().state(),
            PromiseState::Rejected(Value::from(5.0))
        );
    }

    #[test]
    fn test_intrinsic_then_rejects_foreign_receiver() {
        let engine = Engine::default();
        let thrown = engine
            .intrinsic_then()
            .call(&engine, &Value::from(Object::ordinary(None)), &[])
            .unwrap_err();
        assert!(matches!(thrown.as_error(), Some(Error::NotAPromise)));
    }

    #[test]
    fn test_catch_goes_through_then() {
        let engine = Engine::default();
        let promise = engine.rejected("caught");
        let derived = engine
            .promise_prototype()
            .get("catch")
            .call(
                &engine,
                &promise.into(),
                &[Value::function(|_, _, args| Ok(args[0].clone()))],
            )
            .unwrap();
        let derived = derived.as_promise().unwrap();
        assert_eq!(engine.block_on(&derived).unwrap(), Value::from("caught"));
    }

    #[test]
    fn test_block_on_stalls_on_forever_pending() {
        let engine = Engine::default();
        let (promise, _resolvers) = engine.create_future();
        assert!(matches!(engine.block_on(&promise), Err(Error::Stalled)));
    }
}
