use thiserror::Error as ThisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    NotFound,
    InvalidArgument,
    InconsistentState,
    InitializeFailed,
    QuotaExceeded,
    Internal,
}

/// Error raised by the partition core.
///
/// `Io` errors come straight from the filesystem and are never retried here;
/// the caller of open/reopen decides what to do with them.
#[derive(Debug, ThisError)]
#[error("{kind:?}: {context}")]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn inconsistent<S: Into<String>>(msg: S) -> Self {
        Error::new(ErrorKind::InconsistentState, msg.into())
    }

    pub fn initialize_failed<S: Into<String>>(msg: S) -> Self {
        Error::new(ErrorKind::InitializeFailed, msg.into())
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::new(ErrorKind::InvalidArgument, msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Error::new(ErrorKind::NotFound, msg.into())
    }

    pub fn quota_exceeded<S: Into<String>>(msg: S) -> Self {
        Error::new(ErrorKind::QuotaExceeded, msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::new(ErrorKind::Internal, msg.into())
    }

    pub fn is_io(&self) -> bool {
        self.kind == ErrorKind::Io
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            context: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            context: format!("JSON error: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_their_own_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing version file");
        let err: Error = io.into();
        assert!(err.is_io());
        assert!(err.to_string().contains("missing version file"));
    }

    #[test]
    fn display_includes_kind() {
        let err = Error::inconsistent("duplicate segment 3");
        assert_eq!(err.to_string(), "InconsistentState: duplicate segment 3");
    }
}
