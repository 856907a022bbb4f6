//! A small promise resolution engine that can run with either of two `then`
//! lookup policies:
//!
//! - [`ThenLookup::Observable`] reads `then` (and, for `await`,
//!   `constructor`) off the resolved value. Anything that has overwritten
//!   `Promise.prototype.then` sees every native promise that flows through
//!   `resolve`.
//! - [`ThenLookup::PrototypeIdentity`] recognises native promises whose
//!   prototype *is* the engine's own `%Promise.prototype%` and unwraps them
//!   with the internal then routine, so a polluted prototype is never
//!   consulted.
//!
//! All continuation work runs on an injected FIFO [`JobQueue`].
//!
//! # Examples
//!
//! ```
//! use promise_guard::{Engine, EngineConfig, ThenLookup, Value};
//!
//! let engine = Engine::new(EngineConfig::new().then_lookup(ThenLookup::PrototypeIdentity));
//! let add = engine.async_call(|_| Ok(Value::from(1.0 + 2.0)));
//! let inc = engine.async_call(|_| Ok(add.into()));
//! assert_eq!(engine.block_on(&inc).unwrap(), Value::from(3.0));
//! ```
pub mod config;
pub mod engine;
pub mod promise;
pub mod queue;
pub mod resolvers;
pub mod value;

pub use config::{EngineConfig, ThenLookup};
pub use engine::{Engine, RejectionEvent};
pub use promise::{Consumer, Promise, PromiseState, ReactionType};
pub use queue::{Job, JobKind, JobQueue, MicrotaskQueue};
pub use resolvers::Resolvers;
pub use value::{Completion, Object, Value};

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A promise was resolved with itself.
    #[error("chaining cycle detected for promise")]
    SelfReference,
    #[error("thenable threw while being unwrapped: {0}")]
    ThenableThrow(Value),
    #[error("reaction handler threw: {0}")]
    UserHandler(Value),
    #[error("value is not callable")]
    NotCallable,
    #[error("receiver is not a promise")]
    NotAPromise,
    #[error("promise rejected: {0}")]
    Rejected(Value),
    /// The job queue went idle while the awaited promise was still pending.
    #[error("job queue is idle but the promise is still pending")]
    Stalled,
    #[error("cyclic prototype chain")]
    PrototypeCycle,
    #[error("unknown then lookup policy {0:?}")]
    InvalidPolicy(String),
}
