use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed parameters: bad sizes, out-of-range values, mismatched lengths.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A sample rate or provider type outside the supported set.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Backend construction failed after exhausting every candidate.
    #[error("initialization failed: {message}")]
    InitializationFailed {
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },
}

impl Error {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::UnsupportedFormat(message.into())
    }

    /// Stable machine-readable code, matching the names hosts match on.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            Error::InitializationFailed { .. } => "INITIALIZATION_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn initialization_failure_exposes_cause() {
        let err = Error::InitializationFailed {
            message: "Failed to create FFT provider".into(),
            source: Some(Box::new(Error::unsupported("backend refused size 0"))),
        };
        assert_eq!(err.code(), "INITIALIZATION_FAILED");
        let cause = err.source().expect("cause");
        assert!(cause.to_string().contains("size 0"));
    }
}
