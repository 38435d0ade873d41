use thiserror::Error;

/// Crate-wide error kinds.
///
/// The pipeline routes on kinds, not payloads: the cache adapter falls back
/// on [`Error::Connection`], the query API maps [`Error::NoData`] and
/// [`Error::Validation`] to client errors, and [`Error::Canceled`] marks the
/// normal shutdown path.
#[derive(Error, Debug)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("no data found")]
    NoData,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("operation canceled")]
    Canceled,

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("already in {0} mode")]
    AlreadyInMode(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for connection-class failures, the only kind the cache adapter
    /// retries on its secondary.
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_io_error()
            || err.is_timeout()
        {
            Error::Connection(err.to_string())
        } else {
            Error::Internal(err.to_string())
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NoData,
            sqlx::Error::Io(e) => Error::Connection(e.to_string()),
            sqlx::Error::PoolTimedOut => Error::Connection("postgres pool timed out".to_string()),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Connection(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
