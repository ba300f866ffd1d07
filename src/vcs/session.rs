//! Request/response access to the revision backend

use std::fmt::Debug;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::protocol::{Operation, SessionRequest, SessionResponse};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to access session store '{path}': {reason}")]
    Store { path: PathBuf, reason: String },

    #[error("Failed to run session command '{command}': {reason}")]
    Process { command: String, reason: String },

    #[error("Malformed session message: {0}")]
    Protocol(String),

    #[error("Session rejected {operation}: {message}")]
    Rejected {
        operation: Operation,
        message: String,
    },

    #[error("Unexpected {operation} response: {source}")]
    Decode {
        operation: Operation,
        #[source]
        source: serde_json::Error,
    },
}

/// Backend holding components and revisions
pub trait Session: Send + Sync + Debug {
    /// Sends one request; a backend-side refusal is a response, not an error
    fn execute(&self, request: &SessionRequest) -> Result<SessionResponse, SessionError>;

    /// User the session acts as
    fn user_id(&self) -> &str;
}

/// Runs one operation and decodes its data into `T`
pub fn call<T: DeserializeOwned>(
    session: &dyn Session,
    operation: Operation,
    params: Value,
) -> Result<T, SessionError> {
    let request = SessionRequest::new(operation, params, session.user_id());
    debug!(%operation, "session request");

    let response = session.execute(&request)?;
    if !response.success {
        return Err(SessionError::Rejected {
            operation,
            message: response
                .error
                .unwrap_or_else(|| "no error message".to_string()),
        });
    }

    let data = response.data.unwrap_or(Value::Null);
    serde_json::from_value(data).map_err(|source| SessionError::Decode { operation, source })
}

/// Handles requests in-process
pub(crate) fn dispatch(
    request: &SessionRequest,
    handler: impl FnOnce(&SessionRequest) -> Result<Value, String>,
) -> SessionResponse {
    match handler(request) {
        Ok(data) => SessionResponse::success(data),
        Err(message) => SessionResponse::error(message),
    }
}
