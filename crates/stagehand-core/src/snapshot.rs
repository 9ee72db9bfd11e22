#![forbid(unsafe_code)]

//! Immutable model snapshots with supersession tracking.
//!
//! A [`Snapshot`] is the value of one model at a point in time, shared as
//! `Rc<Snapshot<S>>` with any number of external holders. When a mutation
//! session commits a successor, the prior snapshot is marked expired; read
//! accessors check the flag against the process-wide
//! [`ExpirySettings`](crate::ExpirySettings) to catch code that closed over
//! a stale reference across a mutation boundary.

use std::backtrace::Backtrace;
use std::cell::Cell;
use std::fmt;

use tracing::warn;

use crate::error::{DispatchError, DispatchResult};
use crate::expiry::{ExpiryEnforcement, ExpirySettings};
use crate::keys::ModelId;

/// An immutable model value at a point in time.
pub struct Snapshot<S> {
    model_id: ModelId,
    version: u64,
    value: S,
    expired: Cell<bool>,
}

impl<S> Snapshot<S> {
    #[must_use]
    pub fn new(model_id: ModelId, version: u64, value: S) -> Self {
        Self {
            model_id,
            version,
            value,
            expired: Cell::new(false),
        }
    }

    #[must_use]
    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    /// Monotonically increasing per model; bumped by exactly 1 per committed
    /// envelope.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether a successor snapshot has been committed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expired.get()
    }

    /// Read the value, enforcing the process-wide expiry policy.
    pub fn try_read(&self) -> DispatchResult<&S> {
        if self.expired.get() {
            match ExpirySettings::current().enforcement {
                ExpiryEnforcement::Strict => {
                    return Err(DispatchError::ExpiredModelAccess(self.model_id.clone()));
                }
                ExpiryEnforcement::Warn => self.warn_expired(),
                ExpiryEnforcement::Off => {}
            }
        }
        Ok(&self.value)
    }

    /// Read the value.
    ///
    /// # Panics
    ///
    /// When the snapshot is expired and enforcement is
    /// [`ExpiryEnforcement::Strict`].
    #[must_use]
    pub fn read(&self) -> &S {
        match self.try_read() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Read the value without consulting the expiry policy.
    ///
    /// Runtime plumbing that holds a snapshot across its own supersession
    /// (hook arguments, draft seeding) goes through here; external holders
    /// should prefer [`read`](Self::read)/[`try_read`](Self::try_read),
    /// which catch stale retention.
    #[must_use]
    pub fn peek(&self) -> &S {
        &self.value
    }

    /// Mark this snapshot superseded.
    pub(crate) fn mark_expired(&self) {
        self.expired.set(true);
    }

    fn warn_expired(&self) {
        let backtrace = Backtrace::capture();
        warn!(
            model_id = %self.model_id,
            version = self.version,
            backtrace = %backtrace,
            "snapshot read after being superseded"
        );
    }
}

impl<S: fmt::Debug> fmt::Debug for Snapshot<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("model_id", &self.model_id)
            .field("version", &self.version)
            .field("expired", &self.expired.get())
            .field("value", &self.value)
            .finish()
    }
}
