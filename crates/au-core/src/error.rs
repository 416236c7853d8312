//! Error taxonomy and result records

use thiserror::Error;

/// Identifier for every reportable outcome.
///
/// `Ok` and `Warning` are not errors; everything else is. The set is closed:
/// code that cannot classify a failure uses `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultId {
    Ok,
    Unknown,
    NotSet,
    BadAlloc,
    NullPointer,
    DivByZero,
    CaseNotDefined,
    Physics,
    InvalidParam,
    OutOfRange,
    BadSize,
    NotInitialized,
    SystemCall,
    NotAllowed,
    NotImplemented,
    File,
    Exception,
    Warning,
}

impl ResultId {
    /// True for `Ok` and `Warning`, which never abort even in paranoid mode.
    pub fn is_error(self) -> bool {
        !matches!(self, ResultId::Ok | ResultId::Warning)
    }
}

/// One reported outcome, with the location that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub id: ResultId,
    pub description: String,
    pub suggestion: String,
    pub file: &'static str,
    pub line: u32,
}

impl ResultRecord {
    pub fn new(
        id: ResultId,
        description: impl Into<String>,
        suggestion: impl Into<String>,
        file: &'static str,
        line: u32,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            suggestion: suggestion.into(),
            file,
            line,
        }
    }
}

/// Error type returned by fallible control-path operations.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("value not set: {0}")]
    NotSet(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("bad buffer size: {0}")]
    BadSize(String),

    #[error("not initialized: {0}")]
    NotInitialized(String),

    #[error("operation not allowed: {0}")]
    NotAllowed(String),

    #[error("case not defined: {0}")]
    CaseNotDefined(String),

    #[error("physically impossible value: {0}")]
    Physics(String),
}

impl CoreError {
    /// Taxonomy id of this error.
    pub fn id(&self) -> ResultId {
        match self {
            CoreError::NotSet(_) => ResultId::NotSet,
            CoreError::InvalidParam(_) => ResultId::InvalidParam,
            CoreError::OutOfRange(_) => ResultId::OutOfRange,
            CoreError::BadSize(_) => ResultId::BadSize,
            CoreError::NotInitialized(_) => ResultId::NotInitialized,
            CoreError::NotAllowed(_) => ResultId::NotAllowed,
            CoreError::CaseNotDefined(_) => ResultId::CaseNotDefined,
            CoreError::Physics(_) => ResultId::Physics,
        }
    }
}

/// Result type alias for control-path operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_and_warning_are_not_errors() {
        assert!(!ResultId::Ok.is_error());
        assert!(!ResultId::Warning.is_error());
        assert!(ResultId::BadSize.is_error());
        assert!(ResultId::NotSet.is_error());
    }

    #[test]
    fn test_error_maps_to_taxonomy() {
        let err = CoreError::BadSize("block".into());
        assert_eq!(err.id(), ResultId::BadSize);
        assert_eq!(
            CoreError::NotAllowed("ear".into()).id(),
            ResultId::NotAllowed
        );
    }
}
