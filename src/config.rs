use std::fmt;
use std::str::FromStr;

use crate::Error;

/// How `resolve` (and `await`) decide whether a value is a native promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThenLookup {
    /// Read `then` and `constructor` as ordinary properties. Overwriting
    /// them on `%Promise.prototype%` is observable.
    #[default]
    Observable,
    /// Trust a promise whose direct prototype is `%Promise.prototype%` and
    /// unwrap it with the internal then routine.
    PrototypeIdentity,
}

impl fmt::Display for ThenLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ThenLookup::Observable => "observable",
            ThenLookup::PrototypeIdentity => "prototype-identity",
        })
    }
}

impl FromStr for ThenLookup {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "observable" => Ok(ThenLookup::Observable),
            "prototype-identity" | "prototype_identity" => Ok(ThenLookup::PrototypeIdentity),
            _ => Err(Error::InvalidPolicy(s.to_owned())),
        }
    }
}

/// Engine settings, fixed for the lifetime of an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub then_lookup: ThenLookup,
}

impl EngineConfig {
    pub const THEN_LOOKUP_ENV: &'static str = "PROMISE_GUARD_THEN_LOOKUP";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_lookup(mut self, then_lookup: ThenLookup) -> Self {
        self.then_lookup = then_lookup;
        self
    }

    /// Reads the policy from `PROMISE_GUARD_THEN_LOOKUP`, falling back to the
    /// default when it is unset.
    pub fn from_env() -> Result<Self, Error> {
        match std::env::var(Self::THEN_LOOKUP_ENV) {
            Ok(value) => Ok(Self::new().then_lookup(value.parse()?)),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(std::env::VarError::NotUnicode(raw)) => {
                Err(Error::InvalidPolicy(raw.to_string_lossy().into_owned()))
            }
        }
    }
}
