//! Error types and failure causes for RStream
//!
//! Every stream fails with a [`Cause`]: an expected error `E`, a [`Defect`]
//! (an unexpected fault such as a panic inside user code), or an interruption.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

/// An unexpected, unrecoverable fault
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("defect: {message}")]
pub struct Defect {
    message: String,
}

impl Defect {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Build a defect from the payload of a caught panic
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with a non-string payload".to_string()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why a stream stopped producing values
#[derive(Debug, Clone, PartialEq)]
pub enum Cause<E> {
    /// Expected domain failure, catchable with `catch_all`
    Fail(E),
    /// Unexpected fault
    Die(Defect),
    /// Cancellation; never swallowed by recovery combinators
    Interrupt,
}

impl<E> Cause<E> {
    pub fn fail(error: E) -> Self {
        Cause::Fail(error)
    }

    pub fn die(message: impl Into<String>) -> Self {
        Cause::Die(Defect::new(message))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Cause::Fail(_))
    }

    pub fn is_die(&self) -> bool {
        matches!(self, Cause::Die(_))
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Cause::Interrupt)
    }

    pub fn failure(&self) -> Option<&E> {
        match self {
            Cause::Fail(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_failure(self) -> Option<E> {
        match self {
            Cause::Fail(e) => Some(e),
            _ => None,
        }
    }

    pub fn defect(&self) -> Option<&Defect> {
        match self {
            Cause::Die(d) => Some(d),
            _ => None,
        }
    }

    /// Transform the expected error, keeping defects and interruptions as they are
    pub fn map<E2, F>(self, f: F) -> Cause<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Cause::Fail(e) => Cause::Fail(f(e)),
            Cause::Die(d) => Cause::Die(d),
            Cause::Interrupt => Cause::Interrupt,
        }
    }
}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Fail(e) => write!(f, "Stream failed: {}", e),
            Cause::Die(d) => write!(f, "Stream died: {}", d.message()),
            Cause::Interrupt => write!(f, "Stream interrupted"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Cause<E> {}

impl<E> From<Defect> for Cause<E> {
    fn from(defect: Defect) -> Self {
        Cause::Die(defect)
    }
}

/// Result type for stream runs
pub type StreamResult<T, E> = Result<T, Cause<E>>;

/// Run a synchronous user callback, turning a panic into a [`Defect`]
pub(crate) fn catch_defect<T>(f: impl FnOnce() -> T) -> Result<T, Defect> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(Defect::from_panic)
}
