//! Execution context shared by every job of one invocation.
//!
//! Values are addressed by typed [`Key`]s. A slot holding a different type
//! than the key asks for is a hard [`ContextError::TypeMismatch`]; nothing is
//! ever coerced or replaced by a default.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::errors::ErrorAccumulator;

/// Well-known slot for the invocation's error accumulator.
pub const ERRORS: Key<ErrorAccumulator> = Key::new("errors");

/// Typed handle naming one context slot.
pub struct Key<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key<{}>({})", type_name::<T>(), self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context key '{key}' holds {found}, expected {expected}")]
    TypeMismatch {
        key: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("context key '{key}' is not set (expected {expected})")]
    Missing {
        key: &'static str,
        expected: &'static str,
    },
    #[error("context store lock poisoned")]
    Poisoned,
}

struct Slot {
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

struct Inner {
    cmd: String,
    slots: Mutex<HashMap<&'static str, Slot>>,
    done: CancellationToken,
}

/// Per-invocation state store. Clones share the same store.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cmd", &self.inner.cmd)
            .field("done", &self.inner.done.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Create the context for command `cmd`. `done` is the flow's
    /// cancellation token, normally [`crate::control::Control::token`].
    pub fn new(cmd: impl Into<String>, done: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                cmd: cmd.into(),
                slots: Mutex::new(HashMap::new()),
                done,
            }),
        }
    }

    /// Identifier of the command being run (e.g. `secrets decrypt`).
    pub fn cmd(&self) -> &str {
        &self.inner.cmd
    }

    /// Resolves once the flow reached a terminal state.
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.inner.done.cancelled()
    }

    pub fn is_done(&self) -> bool {
        self.inner.done.is_cancelled()
    }

    /// Owned copy of the flow token, for futures that must be `'static`.
    pub fn done_token(&self) -> CancellationToken {
        self.inner.done.clone()
    }

    /// Return the value under `key`, creating `T::default()` on first access.
    ///
    /// Check and insert happen under one lock, so concurrent first accesses
    /// observe the same value.
    pub fn get<T>(&self, key: &Key<T>) -> Result<T, ContextError>
    where
        T: Default + Clone + Send + Sync + 'static,
    {
        let mut slots = self.slots()?;
        let slot = slots.entry(key.name).or_insert_with(|| Slot {
            type_name: type_name::<T>(),
            value: Box::new(T::default()),
        });
        downcast(key, slot)
    }

    /// Store `value` under `key`, replacing whatever was there.
    pub fn set<T>(&self, key: &Key<T>, value: T) -> Result<(), ContextError>
    where
        T: Send + Sync + 'static,
    {
        self.slots()?.insert(
            key.name,
            Slot {
                type_name: type_name::<T>(),
                value: Box::new(value),
            },
        );
        Ok(())
    }

    /// Return the value under `key` if one was set.
    pub fn lookup<T>(&self, key: &Key<T>) -> Result<Option<T>, ContextError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let slots = self.slots()?;
        slots.get(key.name).map(|slot| downcast(key, slot)).transpose()
    }

    /// Like [`Context::lookup`], but a missing slot is an error.
    pub fn require<T>(&self, key: &Key<T>) -> Result<T, ContextError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.lookup(key)?.ok_or(ContextError::Missing {
            key: key.name,
            expected: type_name::<T>(),
        })
    }

    /// The invocation's error accumulator (lazily created under [`ERRORS`]).
    pub fn errors(&self) -> Result<ErrorAccumulator, ContextError> {
        self.get(&ERRORS)
    }

    fn slots(&self) -> Result<MutexGuard<'_, HashMap<&'static str, Slot>>, ContextError> {
        self.inner.slots.lock().map_err(|_| ContextError::Poisoned)
    }
}

fn downcast<T: Clone + 'static>(key: &Key<T>, slot: &Slot) -> Result<T, ContextError> {
    slot.value
        .downcast_ref::<T>()
        .cloned()
        .ok_or(ContextError::TypeMismatch {
            key: key.name,
            expected: type_name::<T>(),
            found: slot.type_name,
        })
}
