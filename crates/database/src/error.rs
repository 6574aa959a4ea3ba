use crate::connection::ConnectionState;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// What kind of failure a `DbError` represents, independent of the driver.
///
/// The retry executor only ever looks at this tag, never at driver messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The pool could not open a connection to the server.
    ConnectionFailed,
    /// No connection became available within the acquire timeout.
    ConnectionTimeout,
    /// A statement or lock wait was cancelled by a server-side timeout.
    OperationTimeout,
    /// The server closed the connection under us (restart, admin shutdown).
    ServerDisconnect,
    /// SQLSTATE 40001.
    SerializationFailure,
    /// SQLSTATE 40P01.
    Deadlock,
    NotFound,
    /// Anything else: constraint violations, syntax errors, bad input.
    Fatal,
}

/// Whether a failure may be attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    Retryable,
    Fatal,
}

impl ErrorKind {
    pub fn retryability(&self) -> Retryability {
        match self {
            ErrorKind::ConnectionFailed
            | ErrorKind::ConnectionTimeout
            | ErrorKind::OperationTimeout
            | ErrorKind::ServerDisconnect
            | ErrorKind::SerializationFailure
            | ErrorKind::Deadlock => Retryability::Retryable,
            ErrorKind::NotFound | ErrorKind::Fatal => Retryability::Fatal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionFailed => "connection_failed",
            ErrorKind::ConnectionTimeout => "connection_timeout",
            ErrorKind::OperationTimeout => "operation_timeout",
            ErrorKind::ServerDisconnect => "server_disconnect",
            ErrorKind::SerializationFailure => "serialization_failure",
            ErrorKind::Deadlock => "deadlock",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid database configuration: {0}")]
    ConnectionConfigError(String),

    #[error("Failed to connect to the database ({kind}): {message}")]
    Connection {
        kind: ErrorKind,
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("The database is not available (connection state: {0})")]
    NotConnected(ConnectionState),

    #[error("Database operation failed ({kind}): {message}")]
    Operation {
        kind: ErrorKind,
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Database operation failed after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<DbError>,
    },

    #[error("Transaction could not be started within {0:?}")]
    TransactionStartTimeout(Duration),

    #[error("Transaction did not complete within {0:?} and was rolled back")]
    TransactionTimeout(Duration),

    #[error("Database operation was cancelled")]
    Cancelled,

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("The requested data was not found in the database.")]
    NotFound,

    #[error("Refusing to clear the database without explicit confirmation")]
    ClearNotConfirmed,
}

impl DbError {
    /// Builds a classified operation error that did not originate in the driver.
    pub fn operation(kind: ErrorKind, message: impl Into<String>) -> Self {
        DbError::Operation {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Wraps a driver error raised while establishing or probing a connection.
    pub fn connection(source: sqlx::Error) -> Self {
        let kind = match classify_sqlx(&source) {
            ErrorKind::ConnectionTimeout => ErrorKind::ConnectionTimeout,
            ErrorKind::ServerDisconnect => ErrorKind::ServerDisconnect,
            _ => ErrorKind::ConnectionFailed,
        };
        DbError::Connection {
            kind,
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// The classification tag consulted by the retry executor.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Connection { kind, .. } | DbError::Operation { kind, .. } => *kind,
            // Waiting for a pooled connection to start a transaction is the
            // same condition as a pool acquire timeout.
            DbError::TransactionStartTimeout(_) => ErrorKind::ConnectionTimeout,
            DbError::TransactionTimeout(_) => ErrorKind::OperationTimeout,
            DbError::NotFound => ErrorKind::NotFound,
            DbError::RetryExhausted { last, .. } => last.kind(),
            DbError::ConnectionConfigError(_)
            | DbError::NotConnected(_)
            | DbError::Cancelled
            | DbError::ClearNotConfirmed
            | DbError::MigrationError(_) => ErrorKind::Fatal,
        }
    }

    pub fn retryability(&self) -> Retryability {
        match self {
            // An exhausted budget must never be re-entered by an outer retry loop.
            DbError::RetryExhausted { .. } => Retryability::Fatal,
            other => other.kind().retryability(),
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(source: sqlx::Error) -> Self {
        match classify_sqlx(&source) {
            ErrorKind::NotFound => DbError::NotFound,
            kind => DbError::Operation {
                kind,
                message: source.to_string(),
                source: Some(source),
            },
        }
    }
}

/// The closed PostgreSQL classification table.
pub fn classify_sqlx(error: &sqlx::Error) -> ErrorKind {
    match error {
        sqlx::Error::Io(io_err) => match io_err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => ErrorKind::ServerDisconnect,
            _ => ErrorKind::ConnectionFailed,
        },
        sqlx::Error::Tls(_) => ErrorKind::ConnectionFailed,
        sqlx::Error::PoolTimedOut => ErrorKind::ConnectionTimeout,
        sqlx::Error::RowNotFound => ErrorKind::NotFound,
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => classify_sqlstate(&code),
            None => ErrorKind::Fatal,
        },
        _ => ErrorKind::Fatal,
    }
}

/// Maps a PostgreSQL SQLSTATE onto an `ErrorKind`.
pub fn classify_sqlstate(code: &str) -> ErrorKind {
    match code {
        "40001" => ErrorKind::SerializationFailure,
        "40P01" => ErrorKind::Deadlock,
        // query_canceled (statement_timeout) and lock_not_available (lock_timeout)
        "57014" | "55P03" => ErrorKind::OperationTimeout,
        // admin_shutdown, crash_shutdown, cannot_connect_now
        "57P01" | "57P02" | "57P03" => ErrorKind::ServerDisconnect,
        c if c.starts_with("08") => ErrorKind::ConnectionFailed,
        _ => ErrorKind::Fatal,
    }
}
