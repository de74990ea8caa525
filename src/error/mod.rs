//! Errors surfaced at component boundaries
//!
//! Every fallible operation in the library returns [Error]. Errors are raised immediately at the
//! boundary where the bad input is seen and are never retried or swallowed internally; a failure
//! inside event processing aborts the run and surfaces to the caller of
//! [crate::backtest::Backtest::run].

use derive_more::Display;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Display, PartialEq)]
pub enum Error {
    /// A value of the wrong kind crossed an API boundary, for example fractional units for a
    /// non-cash trade or a NaN consideration.
    #[display(fmt = "type mismatch: {}", _0)]
    TypeMismatch(String),
    /// A value of the right kind but in the wrong range, for example a negative price or a
    /// currency code that is not three characters.
    #[display(fmt = "domain violation: {}", _0)]
    DomainViolation(String),
    /// A code or currency pair is already bound to a different live owner.
    #[display(fmt = "name conflict: {}", _0)]
    NameConflict(String),
    /// A lookup found nothing where the caller required something, for example an unavailable FX
    /// pair or an undefined local value.
    #[display(fmt = "missing resource: {}", _0)]
    MissingResource(String),
    /// An operation was repeated that is only valid once, for example processing an event twice.
    #[display(fmt = "lifecycle violation: {}", _0)]
    LifecycleViolation(String),
}

impl std::error::Error for Error {}

impl Error {
    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Error::TypeMismatch(msg.into())
    }

    pub fn domain_violation(msg: impl Into<String>) -> Self {
        Error::DomainViolation(msg.into())
    }

    pub fn name_conflict(msg: impl Into<String>) -> Self {
        Error::NameConflict(msg.into())
    }

    pub fn missing_resource(msg: impl Into<String>) -> Self {
        Error::MissingResource(msg.into())
    }

    pub fn lifecycle_violation(msg: impl Into<String>) -> Self {
        Error::LifecycleViolation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn test_that_errors_display_their_category() {
        let err = Error::name_conflict("XXX already registered");
        assert_eq!(err.to_string(), "name conflict: XXX already registered");
    }
}
