//! Error and outcome types shared by every miner, index and generator.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum MiningError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("itemset not found: {0}")]
    NotFound(String),

    #[error("mining aborted")]
    Aborted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed transaction at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl MiningError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        MiningError::InvalidArgument(msg.into())
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, MiningError::Aborted)
    }
}

impl From<toml::de::Error> for MiningError {
    fn from(err: toml::de::Error) -> Self {
        MiningError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MiningError>;

/// Result of a long-running job. Cancellation is neither a success nor a
/// failure, so it gets its own arm instead of hiding inside `Err`.
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Aborted,
    Failed(MiningError),
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Outcome::Aborted)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Completed(v) => Outcome::Completed(f(v)),
            Outcome::Aborted => Outcome::Aborted,
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            Outcome::Completed(v) => Ok(v),
            Outcome::Aborted => Err(MiningError::Aborted),
            Outcome::Failed(e) => Err(e),
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(res: Result<T>) -> Self {
        match res {
            Ok(v) => Outcome::Completed(v),
            Err(MiningError::Aborted) => Outcome::Aborted,
            Err(e) => Outcome::Failed(e),
        }
    }
}

impl<T: fmt::Debug> fmt::Display for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed(_) => write!(f, "completed"),
            Outcome::Aborted => write!(f, "aborted"),
            Outcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_maps_to_its_own_arm() {
        let res: Result<u32> = Err(MiningError::Aborted);
        let outcome = Outcome::from(res);
        assert!(outcome.is_aborted());
        assert!(!outcome.is_completed());
    }

    #[test]
    fn test_failure_is_kept() {
        let res: Result<u32> = Err(MiningError::invalid("bad support"));
        match Outcome::from(res) {
            Outcome::Failed(MiningError::InvalidArgument(msg)) => assert_eq!(msg, "bad support"),
            other => panic!("unexpected outcome {}", other),
        }
    }

    #[test]
    fn test_round_trip_through_result() {
        let outcome: Outcome<u32> = Outcome::from(Ok(7));
        assert_eq!(outcome.map(|v| v * 2).into_result().unwrap(), 14);
        let aborted: Outcome<u32> = Outcome::Aborted;
        assert!(aborted.into_result().unwrap_err().is_aborted());
    }
}
