//! Error types and constructors for the orchestration kernel.
//!
//! Interior components (the store, the tracker, the scheduler) never
//! propagate a single bad row or a single failed check as a hard error —
//! they collect an [`AppError`]'s message into a batch's `errors` list and
//! keep going. Only initialization failures and unrecoverable store
//! corruption reach the top as a real `Err`.
//!
//! # Error Categories
//!
//! - **Validation errors**: a violation rejected by the tracker before it
//!   ever reaches the store
//! - **Engine errors**: an external analyzer returned non-zero or
//!   malformed output
//! - **Timeout errors**: a per-execution deadline was exceeded
//! - **Storage errors**: a transactional failure against the embedded store
//! - **Fatal errors**: initialization failure or unrecoverable corruption
//! - **Config errors**: a malformed configuration value

pub use masterror::{AppError, AppResult};

/// A violation was rejected during validation.
pub fn validation_error(message: impl Into<String>) -> AppError {
    AppError::bad_request(message.into())
}

/// An external analysis engine failed or returned malformed output.
pub fn engine_error(message: impl Into<String>) -> AppError {
    AppError::service(message.into())
}

/// A per-execution deadline was exceeded.
pub fn timeout_error(rule_id: &str, engine: &str) -> AppError {
    AppError::service(format!(
        "rule '{rule_id}' on engine '{engine}' exceeded its execution deadline"
    ))
}

/// A transactional failure against the embedded store.
pub fn storage_error(message: impl Into<String>) -> AppError {
    AppError::internal(message.into())
}

/// Initialization failure or unrecoverable store corruption.
pub fn fatal_error(message: impl Into<String>) -> AppError {
    AppError::internal(message.into())
}

/// An invalid configuration value or malformed configuration file.
pub fn config_error(message: impl Into<String>) -> AppError {
    AppError::bad_request(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_carries_message() {
        let err = validation_error("file_path is required");
        assert!(err.to_string().contains("file_path is required"));
    }

    #[test]
    fn timeout_error_names_rule_and_engine() {
        let err = timeout_error("no-unused-exports", "linter");
        let msg = err.to_string();
        assert!(msg.contains("no-unused-exports"));
        assert!(msg.contains("linter"));
    }
}
