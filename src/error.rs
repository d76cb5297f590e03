// ABOUTME: Error taxonomy for export and import runs
// ABOUTME: Maps driver failures to actionable connection hints

use thiserror::Error;

/// Errors raised by the synchronization engine.
///
/// Every variant carries a message that is meant to be shown to the user as-is.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid or incomplete configuration. Raised before anything is written.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An enabled source column has no counterpart in the destination table.
    #[error(
        "Column '{column}' does not exist in destination table '{table}'. \
         Use the 'Drop, Create & Repopulate' mode to resynchronize the table structure"
    )]
    SchemaMismatch { table: String, column: String },

    /// A value could not be represented in its destination column.
    #[error("Row {row}, column '{column}': {message}")]
    Coercion {
        row: usize,
        column: String,
        message: String,
    },

    /// A statement failed while creating, clearing, staging, merging or calling a hook.
    #[error("{context}: {message}")]
    Write { context: String, message: String },

    /// Driver-level failure opening or talking to the database.
    #[error("Connection error: {message}\n  Hint: {hint}")]
    Connection { message: String, hint: String },
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// A failed export run: the destination table and the error that stopped it.
#[derive(Error, Debug)]
#[error("Export to '{table}' failed: {cause}")]
pub struct ExportError {
    pub table: String,
    pub cause: SyncError,
}

impl ExportError {
    /// Wrap a run failure with the destination table name.
    pub fn new(table: impl Into<String>, cause: SyncError) -> Self {
        ExportError {
            table: table.into(),
            cause,
        }
    }
}

impl SyncError {
    /// Create a Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Configuration(message.into())
    }

    /// Create a Write error from a context label and the failing statement's error.
    pub fn write(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SyncError::Write {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Relabel a statement failure with the step that issued it.
    ///
    /// Only `Write` errors are relabelled; the other variants already say what went wrong.
    pub fn context(self, context: impl Into<String>) -> Self {
        match self {
            SyncError::Write { message, .. } => SyncError::Write {
                context: context.into(),
                message,
            },
            other => other,
        }
    }

    /// Classify a driver error.
    ///
    /// Failures that point at the connection itself (pooler incompatibility, TLS,
    /// authentication, timeouts, closed sockets) become `Connection` errors with a
    /// hint about the connection-string change that fixes them. Everything else is
    /// a `Write` error labelled with `context`. Errors reported by the server are
    /// classified by SQLSTATE; only client-side failures are matched on their text.
    pub fn from_driver(context: impl Into<String>, err: &tokio_postgres::Error) -> Self {
        let message = driver_message(err);
        let hint = match err.as_db_error() {
            Some(db) => server_hint(db.code().code())
                .or_else(|| err.is_closed().then_some(CLOSED_HINT)),
            None => connection_hint(&message, err.is_closed()),
        };
        match hint {
            Some(hint) => SyncError::Connection {
                message: format!("{}: {}", context.into(), message),
                hint: hint.to_string(),
            },
            None => SyncError::Write {
                context: context.into(),
                message,
            },
        }
    }
}

/// Render a driver error including the server's detail message, if any.
fn driver_message(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{} ({})", db.message(), detail),
            None => db.message().to_string(),
        },
        None => {
            let mut message = err.to_string();
            let mut source = std::error::Error::source(err);
            while let Some(cause) = source {
                message.push_str(": ");
                message.push_str(&cause.to_string());
                source = cause.source();
            }
            message
        }
    }
}

const POOLER_HINT: &str = "the server appears to be behind a transaction-pooling proxy, which \
     cannot run several active statements on one session; connect to the database port \
     directly or switch the pooler to session mode (pool_mode=session)";
const TLS_HINT: &str = "adjust 'sslmode' in the connection string (e.g. ?sslmode=require), or \
     set accept_invalid_certs = true for servers with self-signed certificates";
const CREDENTIALS_HINT: &str = "check the user and password in the connection string";
const TIMEOUT_HINT: &str =
    "increase timeout_seconds, or check that the host and port are reachable";
const UNREACHABLE_HINT: &str =
    "check host and port in the connection string and that the server accepts TCP connections";
const CLOSED_HINT: &str =
    "the server closed the connection; verify it is running and retry the export";

/// Pick the actionable hint for an error reported by the server, by SQLSTATE.
///
/// Statement errors (missing relations, constraint violations, ...) get none
/// and stay write errors.
pub(crate) fn server_hint(sqlstate: &str) -> Option<&'static str> {
    match sqlstate {
        // duplicate_prepared_statement
        "42P05" => Some(POOLER_HINT),
        // invalid_authorization_specification, invalid_password
        "28000" | "28P01" => Some(CREDENTIALS_HINT),
        // query_canceled (statement_timeout)
        "57014" => Some(TIMEOUT_HINT),
        // admin_shutdown, crash_shutdown, cannot_connect_now
        "57P01" | "57P02" | "57P03" => Some(CLOSED_HINT),
        // too_many_connections and the connection_exception class
        "53300" => Some(UNREACHABLE_HINT),
        code if code.starts_with("08") => Some(UNREACHABLE_HINT),
        _ => None,
    }
}

/// Pick the actionable hint for a client-side driver failure message.
pub(crate) fn connection_hint(message: &str, closed: bool) -> Option<&'static str> {
    let lower = message.to_lowercase();
    if (lower.contains("prepared statement") && lower.contains("already exists"))
        || lower.contains("another command is already in progress")
    {
        Some(POOLER_HINT)
    } else if lower.contains("tls") || lower.contains("ssl") || lower.contains("certificate") {
        Some(TLS_HINT)
    } else if lower.contains("password authentication failed")
        || lower.contains("no password supplied")
    {
        Some(CREDENTIALS_HINT)
    } else if lower.contains("timed out") || lower.contains("timeout") {
        Some(TIMEOUT_HINT)
    } else if lower.contains("connection refused")
        || lower.contains("could not connect")
        || lower.contains("error connecting")
    {
        Some(UNREACHABLE_HINT)
    } else if closed {
        Some(CLOSED_HINT)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pooler_failure_gets_session_mode_hint() {
        let hint = connection_hint("prepared statement \"s0\" already exists", false).unwrap();
        assert!(hint.contains("pool_mode=session"));

        let hint = connection_hint("another command is already in progress", false).unwrap();
        assert!(hint.contains("pool_mode=session"));
    }

    #[test]
    fn test_tls_failure_gets_sslmode_hint() {
        let hint = connection_hint("error performing TLS handshake", false).unwrap();
        assert!(hint.contains("sslmode"));
    }

    #[test]
    fn test_statement_failure_has_no_hint() {
        assert!(connection_hint("relation \"public.x\" does not exist", false).is_none());
        assert!(connection_hint("connection closed", true).is_some());
    }

    #[test]
    fn test_server_errors_classified_by_sqlstate() {
        assert_eq!(server_hint("42P05"), Some(POOLER_HINT));
        assert_eq!(server_hint("28P01"), Some(CREDENTIALS_HINT));
        assert_eq!(server_hint("57014"), Some(TIMEOUT_HINT));
        assert_eq!(server_hint("08006"), Some(UNREACHABLE_HINT));
        assert_eq!(server_hint("57P01"), Some(CLOSED_HINT));
    }

    #[test]
    fn test_statement_errors_mentioning_tls_are_not_connection_errors() {
        // undefined_column for "tls_version", undefined_table for "ssl_certs"
        assert_eq!(server_hint("42703"), None);
        assert_eq!(server_hint("42P01"), None);
        // unique_violation whose message mentions a timeout column
        assert_eq!(server_hint("23505"), None);
    }

    #[test]
    fn test_export_error_names_table() {
        let err = ExportError::new(
            "public.metrics",
            SyncError::config("timeout_seconds must be greater than zero"),
        );
        let msg = err.to_string();
        assert!(msg.contains("public.metrics"));
        assert!(msg.contains("timeout_seconds must be greater than zero"));
    }

    #[test]
    fn test_schema_mismatch_suggests_recreate() {
        let err = SyncError::SchemaMismatch {
            table: "public.metrics".into(),
            column: "Region".into(),
        };
        assert!(err.to_string().contains("Drop, Create & Repopulate"));
    }
}
