//! Typed activity results.

use std::fmt;

/// Why an activity produced no usable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Absence {
    /// The agent produced no output at all.
    NoOutput,
    /// The agent produced output that did not match the expected schema.
    Malformed(String),
}

impl Absence {
    /// Returns `true` for [`Absence::Malformed`].
    pub fn is_malformed(&self) -> bool {
        matches!(self, Absence::Malformed(_))
    }
}

impl fmt::Display for Absence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Absence::NoOutput => write!(f, "no output"),
            Absence::Malformed(details) => write!(f, "malformed output: {details}"),
        }
    }
}

/// The outcome of an activity that did not fail.
///
/// Absence is a valid terminal state; the caller decides whether it aborts
/// the workflow.
///
/// # Examples
///
/// ```
/// use tasuki_core::{Absence, ActivityResult};
///
/// let found: ActivityResult<u32> = ActivityResult::Completed(7);
/// assert_eq!(found.value(), Some(&7));
///
/// let missing: ActivityResult<u32> = ActivityResult::Absent(Absence::NoOutput);
/// assert!(missing.is_absent());
/// assert_eq!(missing.into_option(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityResult<T> {
    /// A value was produced.
    Completed(T),
    /// No usable value was produced.
    Absent(Absence),
}

impl<T> ActivityResult<T> {
    /// Returns `true` if a value was produced.
    pub fn is_completed(&self) -> bool {
        matches!(self, ActivityResult::Completed(_))
    }

    /// Returns `true` if no value was produced.
    pub fn is_absent(&self) -> bool {
        matches!(self, ActivityResult::Absent(_))
    }

    /// Borrows the value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            ActivityResult::Completed(value) => Some(value),
            ActivityResult::Absent(_) => None,
        }
    }

    /// Returns the reason for absence, if any.
    pub fn absence(&self) -> Option<&Absence> {
        match self {
            ActivityResult::Completed(_) => None,
            ActivityResult::Absent(reason) => Some(reason),
        }
    }

    /// Converts into an `Option`, discarding the absence reason.
    pub fn into_option(self) -> Option<T> {
        match self {
            ActivityResult::Completed(value) => Some(value),
            ActivityResult::Absent(_) => None,
        }
    }

    /// Maps the completed value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ActivityResult<U> {
        match self {
            ActivityResult::Completed(value) => ActivityResult::Completed(f(value)),
            ActivityResult::Absent(reason) => ActivityResult::Absent(reason),
        }
    }

    /// Chains a computation that may itself be absent.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> ActivityResult<U>) -> ActivityResult<U> {
        match self {
            ActivityResult::Completed(value) => f(value),
            ActivityResult::Absent(reason) => ActivityResult::Absent(reason),
        }
    }
}
