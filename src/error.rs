use thiserror::Error;

/// Errors raised by the record pipeline.
///
/// Every variant is fatal for the call that reported it. Frame-loss repair is
/// normal operation and never produces an error.
#[derive(Error, Debug)]
pub enum Error {
    /// Operation invoked out of the allowed lifecycle order
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Header or layout constraints violated
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A new record was started before the previous record's channel blocks were complete
    #[error("Record incomplete: {written} of {expected} channel blocks written")]
    RecordIncomplete { written: usize, expected: usize },

    /// Header changed mid-stream in a way the sink cannot follow
    #[error("Incompatible header: {0}")]
    IncompatibleHeader(String),

    #[error("IO failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Failure reported by the acquisition device collaborator
    #[error(transparent)]
    Device(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::InvalidConfiguration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = Error::RecordIncomplete { written: 2, expected: 5 };
        let display = format!("{}", error);
        assert!(display.contains("Record incomplete"));
        assert!(display.contains('2'));
        assert!(display.contains('5'));
    }

    #[test]
    fn test_io_error_wraps() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let error: Error = io.into();
        assert!(matches!(error, Error::IoFailure(_)));
        assert!(error.to_string().contains("disk full"));
    }
}
